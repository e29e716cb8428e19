//! Block and instruction ordering.
//!
//! The layout determines the order of blocks in a function and the order of
//! instructions within each block, as doubly linked lists threaded through
//! secondary maps. The first block in the layout is the function entry.

use cranelift_entity::SecondaryMap;
use serde::{Deserialize, Serialize};

use crate::ir::entities::{Block, Inst};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct BlockNode {
    prev: Option<Block>,
    next: Option<Block>,
    first_inst: Option<Inst>,
    last_inst: Option<Inst>,
    inserted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct InstNode {
    block: Option<Block>,
    prev: Option<Inst>,
    next: Option<Inst>,
}

/// The layout of blocks and instructions in a function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    insts: SecondaryMap<Inst, InstNode>,
    first_block: Option<Block>,
    last_block: Option<Block>,
}

impl Layout {
    /// Create a new empty layout.
    pub fn new() -> Self {
        Self {
            blocks: SecondaryMap::new(),
            insts: SecondaryMap::new(),
            first_block: None,
            last_block: None,
        }
    }

    /// Is `block` inserted in the layout?
    pub fn is_block_inserted(&self, block: Block) -> bool {
        self.blocks[block].inserted
    }

    /// The entry block of the function, if any blocks have been inserted.
    pub fn entry_block(&self) -> Option<Block> {
        self.first_block
    }

    /// The last block in layout order.
    pub fn last_block(&self) -> Option<Block> {
        self.last_block
    }

    /// The block following `block` in layout order.
    pub fn next_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].next
    }

    /// Append `block` to the end of the layout.
    pub fn append_block(&mut self, block: Block) {
        debug_assert!(!self.is_block_inserted(block));
        let node = &mut self.blocks[block];
        node.inserted = true;
        node.prev = self.last_block;
        node.next = None;
        match self.last_block {
            Some(last) => self.blocks[last].next = Some(block),
            None => self.first_block = Some(block),
        }
        self.last_block = Some(block);
    }

    /// Insert `block` into the layout right after `after`.
    pub fn insert_block_after(&mut self, block: Block, after: Block) {
        debug_assert!(!self.is_block_inserted(block));
        debug_assert!(self.is_block_inserted(after));
        let next = self.blocks[after].next;
        {
            let node = &mut self.blocks[block];
            node.inserted = true;
            node.prev = Some(after);
            node.next = next;
        }
        self.blocks[after].next = Some(block);
        match next {
            Some(n) => self.blocks[n].prev = Some(block),
            None => self.last_block = Some(block),
        }
    }

    /// Remove `block` and everything in it from the layout.
    pub fn remove_block(&mut self, block: Block) {
        debug_assert!(self.is_block_inserted(block));
        while let Some(inst) = self.blocks[block].first_inst {
            self.remove_inst(inst);
        }
        let BlockNode { prev, next, .. } = self.blocks[block];
        match prev {
            Some(p) => self.blocks[p].next = next,
            None => self.first_block = next,
        }
        match next {
            Some(n) => self.blocks[n].prev = prev,
            None => self.last_block = prev,
        }
        self.blocks[block] = BlockNode::default();
    }

    /// Iterate over the blocks in layout order.
    pub fn blocks(&self) -> Blocks {
        Blocks {
            layout: self,
            next: self.first_block,
        }
    }

    /// The block containing `inst`, if it is inserted.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block
    }

    /// The first instruction of `block`.
    pub fn first_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].first_inst
    }

    /// The last instruction of `block`; its terminator once complete.
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last_inst
    }

    /// The instruction following `inst` in its block.
    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].next
    }

    /// The instruction preceding `inst` in its block.
    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].prev
    }

    /// Append `inst` to the end of `block`.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(self.insts[inst].block.is_none(), "instruction already inserted");
        debug_assert!(self.is_block_inserted(block));
        let last = self.blocks[block].last_inst;
        {
            let node = &mut self.insts[inst];
            node.block = Some(block);
            node.prev = last;
            node.next = None;
        }
        match last {
            Some(l) => self.insts[l].next = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
        self.blocks[block].last_inst = Some(inst);
    }

    /// Insert `inst` before `before`, in the same block.
    pub fn insert_inst(&mut self, inst: Inst, before: Inst) {
        debug_assert!(self.insts[inst].block.is_none(), "instruction already inserted");
        let block = self
            .inst_block(before)
            .expect("insertion point not inserted");
        let prev = self.insts[before].prev;
        {
            let node = &mut self.insts[inst];
            node.block = Some(block);
            node.prev = prev;
            node.next = Some(before);
        }
        self.insts[before].prev = Some(inst);
        match prev {
            Some(p) => self.insts[p].next = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
    }

    /// Remove `inst` from the layout. Its data stays in the DFG.
    pub fn remove_inst(&mut self, inst: Inst) {
        let block = self.inst_block(inst).expect("instruction not inserted");
        let InstNode { prev, next, .. } = self.insts[inst];
        match prev {
            Some(p) => self.insts[p].next = next,
            None => self.blocks[block].first_inst = next,
        }
        match next {
            Some(n) => self.insts[n].prev = prev,
            None => self.blocks[block].last_inst = prev,
        }
        self.insts[inst] = InstNode::default();
    }

    /// Split the block containing `before` in two. `new_block` is inserted
    /// after the old block in layout order and receives `before` and every
    /// instruction after it.
    pub fn split_block(&mut self, new_block: Block, before: Inst) {
        let old_block = self.inst_block(before).expect("split point not inserted");
        self.insert_block_after(new_block, old_block);

        let last_moved = self.blocks[old_block].last_inst;
        let prev = self.insts[before].prev;
        self.insts[before].prev = None;
        match prev {
            Some(p) => {
                self.insts[p].next = None;
                self.blocks[old_block].last_inst = Some(p);
            }
            None => {
                self.blocks[old_block].first_inst = None;
                self.blocks[old_block].last_inst = None;
            }
        }
        self.blocks[new_block].first_inst = Some(before);
        self.blocks[new_block].last_inst = last_moved;

        let mut cur = Some(before);
        while let Some(inst) = cur {
            self.insts[inst].block = Some(new_block);
            cur = self.insts[inst].next;
        }
    }

    /// Iterate over the instructions of `block` in layout order.
    pub fn block_insts(&self, block: Block) -> Insts {
        Insts {
            layout: self,
            next: self.blocks[block].first_inst,
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over blocks in layout order.
pub struct Blocks<'a> {
    layout: &'a Layout,
    next: Option<Block>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.next?;
        self.next = self.layout.blocks[block].next;
        Some(block)
    }
}

/// Iterator over the instructions of one block.
pub struct Insts<'a> {
    layout: &'a Layout,
    next: Option<Inst>,
}

impl<'a> Iterator for Insts<'a> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let inst = self.next?;
        self.next = self.layout.insts[inst].next;
        Some(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn b(n: usize) -> Block {
        Block::new(n)
    }

    fn i(n: usize) -> Inst {
        Inst::new(n)
    }

    #[test]
    fn block_order() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        layout.append_block(b(2));
        layout.insert_block_after(b(1), b(0));
        assert_eq!(layout.entry_block(), Some(b(0)));
        assert_eq!(layout.blocks().collect::<Vec<_>>(), [b(0), b(1), b(2)]);
        layout.remove_block(b(1));
        assert_eq!(layout.blocks().collect::<Vec<_>>(), [b(0), b(2)]);
        assert!(!layout.is_block_inserted(b(1)));
    }

    #[test]
    fn inst_order() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        layout.append_inst(i(0), b(0));
        layout.append_inst(i(2), b(0));
        layout.insert_inst(i(1), i(2));
        assert_eq!(layout.block_insts(b(0)).collect::<Vec<_>>(), [i(0), i(1), i(2)]);
        assert_eq!(layout.inst_block(i(1)), Some(b(0)));
        assert_eq!(layout.prev_inst(i(1)), Some(i(0)));

        layout.remove_inst(i(1));
        assert_eq!(layout.block_insts(b(0)).collect::<Vec<_>>(), [i(0), i(2)]);
        assert_eq!(layout.inst_block(i(1)), None);
    }

    #[test]
    fn split() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        for n in 0..4 {
            layout.append_inst(i(n), b(0));
        }
        layout.split_block(b(1), i(2));
        assert_eq!(layout.blocks().collect::<Vec<_>>(), [b(0), b(1)]);
        assert_eq!(layout.block_insts(b(0)).collect::<Vec<_>>(), [i(0), i(1)]);
        assert_eq!(layout.block_insts(b(1)).collect::<Vec<_>>(), [i(2), i(3)]);
        assert_eq!(layout.inst_block(i(3)), Some(b(1)));
        assert_eq!(layout.last_inst(b(0)), Some(i(1)));
    }

    #[test]
    fn split_at_block_head() {
        let mut layout = Layout::new();
        layout.append_block(b(0));
        layout.append_inst(i(0), b(0));
        layout.split_block(b(1), i(0));
        assert_eq!(layout.first_inst(b(0)), None);
        assert_eq!(layout.block_insts(b(1)).collect::<Vec<_>>(), [i(0)]);
    }
}

//! Cursors for inserting instructions into a function layout.

use crate::ir::{Block, Function, Inst, InsertBuilder};

/// The possible positions of a cursor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CursorPosition {
    /// Not pointing anywhere. No instructions can be inserted.
    Nowhere,
    /// Pointing at an existing instruction.
    /// New instructions are inserted *before* it.
    At(Inst),
    /// Before the beginning of a block. No instructions can be inserted.
    Before(Block),
    /// After the end of a block. New instructions are appended to it.
    After(Block),
}

/// A cursor holding a mutable reference to a whole function while keeping a
/// position. The function can be re-borrowed through the public `func`
/// member.
pub struct FuncCursor<'f> {
    pos: CursorPosition,
    nosan: bool,

    /// The referenced function.
    pub func: &'f mut Function,
}

impl<'f> FuncCursor<'f> {
    /// Create a new cursor pointing nowhere.
    pub fn new(func: &'f mut Function) -> Self {
        Self {
            pos: CursorPosition::Nowhere,
            nosan: false,
            func,
        }
    }

    /// Mark every instruction this cursor inserts with the "nosanitize" tag
    /// so later instrumentation runs leave them alone.
    pub fn nosan(mut self) -> Self {
        self.nosan = true;
        self
    }

    /// The current position.
    pub fn position(&self) -> CursorPosition {
        self.pos
    }

    /// Rebuild this cursor positioned at `inst`.
    pub fn at_inst(mut self, inst: Inst) -> Self {
        self.goto_inst(inst);
        self
    }

    /// Rebuild this cursor positioned after `inst`.
    pub fn after_inst(mut self, inst: Inst) -> Self {
        self.goto_after_inst(inst);
        self
    }

    /// Rebuild this cursor at the first insertion point of `block`.
    pub fn at_first_insertion_point(mut self, block: Block) -> Self {
        match self.func.first_insertion_point(block) {
            Some(inst) => self.goto_inst(inst),
            None => self.goto_bottom(block),
        }
        self
    }

    /// Rebuild this cursor at the bottom of `block`, where inserted
    /// instructions are appended.
    pub fn at_bottom(mut self, block: Block) -> Self {
        self.goto_bottom(block);
        self
    }

    /// Go to a specific instruction. New instructions are inserted before it.
    pub fn goto_inst(&mut self, inst: Inst) {
        debug_assert!(self.func.layout.inst_block(inst).is_some());
        self.pos = CursorPosition::At(inst);
    }

    /// Go to the position after `inst`.
    pub fn goto_after_inst(&mut self, inst: Inst) {
        self.pos = match self.func.layout.next_inst(inst) {
            Some(next) => CursorPosition::At(next),
            None => CursorPosition::After(
                self.func
                    .layout
                    .inst_block(inst)
                    .expect("current instruction removed?"),
            ),
        };
    }

    /// Go to the bottom of `block`.
    pub fn goto_bottom(&mut self, block: Block) {
        debug_assert!(self.func.layout.is_block_inserted(block));
        self.pos = CursorPosition::After(block);
    }

    /// The block corresponding to the current position.
    pub fn current_block(&self) -> Option<Block> {
        match self.pos {
            CursorPosition::Nowhere => None,
            CursorPosition::At(inst) => self.func.layout.inst_block(inst),
            CursorPosition::Before(block) | CursorPosition::After(block) => Some(block),
        }
    }

    /// Insert `inst` at the current position. The cursor does not move, so
    /// repeated insertions appear in insertion order.
    pub fn insert_inst(&mut self, inst: Inst) {
        match self.pos {
            CursorPosition::Nowhere | CursorPosition::Before(..) => {
                panic!("invalid insert_inst position")
            }
            CursorPosition::At(cur) => self.func.layout.insert_inst(inst, cur),
            CursorPosition::After(block) => self.func.layout.append_inst(inst, block),
        }
        if self.nosan {
            self.func.nosan[inst] = true;
        }
    }

    /// Create an instruction builder inserting at the current position.
    pub fn ins(&mut self) -> InsertBuilder<'_, 'f> {
        InsertBuilder::new(self)
    }
}

//! A control flow graph represented as mappings of basic blocks to their
//! predecessors and successors.
//!
//! Successors are plain blocks; predecessors are `(block, terminator)` pairs
//! so consumers can find the branch instruction that forms each edge.

use cranelift_entity::SecondaryMap;

use crate::ir::{Block, Function, Inst};

/// A predecessor edge: the branching block and its branch instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockPredecessor {
    /// The predecessor block.
    pub block: Block,
    /// The branch instruction forming the edge.
    pub inst: Inst,
}

impl BlockPredecessor {
    /// Convenient method to construct a new `BlockPredecessor`.
    pub fn new(block: Block, inst: Inst) -> Self {
        Self { block, inst }
    }
}

#[derive(Clone, Default)]
struct CFGNode {
    predecessors: Vec<BlockPredecessor>,
    successors: Vec<Block>,
}

/// The control flow graph of one function.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CFGNode>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute the control flow graph of `func`.
    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    /// Compute the control flow graph of `func`, clearing any information
    /// already stored here.
    pub fn compute(&mut self, func: &Function) {
        self.data.clear();
        self.data.resize(func.dfg.num_blocks());
        for block in func.layout.blocks() {
            if let Some(term) = func.layout.last_inst(block) {
                for target in func.branch_targets(term) {
                    self.add_edge(block, term, target);
                }
            }
        }
        self.valid = true;
    }

    fn add_edge(&mut self, from: Block, from_inst: Inst, to: Block) {
        if !self.data[from].successors.contains(&to) {
            self.data[from].successors.push(to);
        }
        let pred = BlockPredecessor::new(from, from_inst);
        if !self.data[to].predecessors.contains(&pred) {
            self.data[to].predecessors.push(pred);
        }
    }

    /// Iterate over the predecessors of `block`.
    pub fn pred_iter(&self, block: Block) -> impl Iterator<Item = BlockPredecessor> + '_ {
        debug_assert!(self.is_valid());
        self.data[block].predecessors.iter().copied()
    }

    /// Iterate over the successors of `block`.
    pub fn succ_iter(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        debug_assert!(self.is_valid());
        self.data[block].successors.iter().copied()
    }

    /// Has `compute()` been called since the last clear?
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FuncCursor;
    use crate::ir::{types, Function, Signature};

    #[test]
    fn empty() {
        let func = Function::with_name_signature("f", Signature::default());
        ControlFlowGraph::with_function(&func);
    }

    #[test]
    fn branches_and_jumps() {
        let mut func = Function::with_name_signature(
            "f",
            Signature::new(vec![types::I32], None),
        );
        let cond = func.params[0];
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        for b in [b0, b1, b2] {
            func.layout.append_block(b);
        }

        let br_b0_b2;
        let jmp_b1_b2;
        {
            let mut cur = FuncCursor::new(&mut func).at_bottom(b0);
            br_b0_b2 = cur.ins().brif(cond, b2, b1);
            let mut cur = FuncCursor::new(&mut func).at_bottom(b1);
            jmp_b1_b2 = cur.ins().jump(b2);
            let mut cur = FuncCursor::new(&mut func).at_bottom(b2);
            cur.ins().return_(None);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        assert_eq!(cfg.pred_iter(b0).count(), 0);
        assert_eq!(cfg.succ_iter(b0).collect::<Vec<_>>(), [b2, b1]);

        let b2_preds: Vec<_> = cfg.pred_iter(b2).collect();
        assert!(b2_preds.contains(&BlockPredecessor::new(b0, br_b0_b2)));
        assert!(b2_preds.contains(&BlockPredecessor::new(b1, jmp_b1_b2)));
        assert_eq!(cfg.succ_iter(b2).count(), 0);
    }
}

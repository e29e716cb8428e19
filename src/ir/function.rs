//! Intermediate representation of a function.
//!
//! The `Function` struct owns all of its blocks, instructions, and values. A
//! function with no blocks in its layout is a declaration.

use cranelift_entity::{PrimaryMap, SecondaryMap};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::dfg::DataFlowGraph;
use crate::ir::entities::{Block, Inst, SwitchTable, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::layout::Layout;
use crate::ir::types::Type;

/// A function signature: parameter types and an optional return type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Parameter types, in order.
    pub params: Vec<Type>,
    /// The return type, or `None` for void.
    pub ret: Option<Type>,
}

impl Signature {
    /// Create a signature.
    pub fn new(params: Vec<Type>, ret: Option<Type>) -> Self {
        Self { params, ret }
    }
}

/// The case table of a `switch` instruction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchTableData {
    /// `(case value, target block)` pairs. Case values are zero-extended.
    pub cases: Vec<(u64, Block)>,
}

/// A function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name.
    pub name: String,

    /// Signature of this function.
    pub signature: Signature,

    /// Parameter values, one per signature parameter.
    pub params: Vec<Value>,

    /// Data flow graph with the primary definition of all instructions,
    /// blocks, and values.
    pub dfg: DataFlowGraph,

    /// Layout of blocks and instructions in the function body.
    pub layout: Layout,

    /// Case tables used by `switch` instructions in this function.
    pub switch_tables: PrimaryMap<SwitchTable, SwitchTableData>,

    /// Per-instruction id metadata written by the id-assignment pass;
    /// 0 means no id was attached.
    pub iids: SecondaryMap<Inst, u32>,

    /// Per-instruction "nosanitize" tag. Tagged instructions are never
    /// visited by the instrumenter.
    pub nosan: SecondaryMap<Inst, bool>,

    /// Is this a compiler intrinsic? Intrinsic call sites are not traced.
    pub intrinsic: bool,

    /// Is this function known not to unwind?
    pub nounwind: bool,
}

impl Function {
    /// Create a function with the given name and signature. Parameter values
    /// are created eagerly.
    pub fn with_name_signature(name: impl Into<String>, signature: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        let params = signature
            .params
            .iter()
            .enumerate()
            .map(|(num, &ty)| dfg.make_param(ty, num as u16))
            .collect();
        Self {
            name: name.into(),
            signature,
            params,
            dfg,
            layout: Layout::new(),
            switch_tables: PrimaryMap::new(),
            iids: SecondaryMap::new(),
            nosan: SecondaryMap::new(),
            intrinsic: false,
            nounwind: false,
        }
    }

    /// Is this function a declaration without a body?
    pub fn is_declaration(&self) -> bool {
        self.layout.entry_block().is_none()
    }

    /// The entry block, if the function has a body.
    pub fn entry_block(&self) -> Option<Block> {
        self.layout.entry_block()
    }

    /// Create a case table for a `switch` instruction.
    pub fn create_switch_table(&mut self, data: SwitchTableData) -> SwitchTable {
        self.switch_tables.push(data)
    }

    /// The terminator instruction of `block`.
    pub fn terminator(&self, block: Block) -> Inst {
        self.layout.last_inst(block).expect("block has no terminator")
    }

    /// The first instruction of `block` that is not a phi; instrumentation
    /// is inserted before it.
    pub fn first_insertion_point(&self, block: Block) -> Option<Inst> {
        self.layout
            .block_insts(block)
            .find(|&inst| self.dfg.insts[inst].opcode() != Opcode::Phi)
    }

    /// The successor blocks of the branch or terminator `inst`, in operand
    /// order. Non-branches have none.
    pub fn branch_targets(&self, inst: Inst) -> SmallVec<[Block; 2]> {
        let mut targets = SmallVec::new();
        match self.dfg.insts[inst] {
            InstructionData::Jump { destination } => targets.push(destination),
            InstructionData::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                targets.push(then_dest);
                targets.push(else_dest);
            }
            InstructionData::Switch { table, default, .. } => {
                targets.push(default);
                for &(_, block) in &self.switch_tables[table].cases {
                    targets.push(block);
                }
            }
            InstructionData::Invoke { normal, unwind, .. } => {
                targets.push(normal);
                targets.push(unwind);
            }
            _ => {}
        }
        targets
    }

    /// Replace every occurrence of successor `old` in the terminator `inst`
    /// with `new`.
    pub fn replace_successor(&mut self, inst: Inst, old: Block, new: Block) {
        let mut table_to_fix = None;
        match &mut self.dfg.insts[inst] {
            InstructionData::Jump { destination } => {
                if *destination == old {
                    *destination = new;
                }
            }
            InstructionData::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                if *then_dest == old {
                    *then_dest = new;
                }
                if *else_dest == old {
                    *else_dest = new;
                }
            }
            InstructionData::Switch { table, default, .. } => {
                if *default == old {
                    *default = new;
                }
                table_to_fix = Some(*table);
            }
            InstructionData::Invoke { normal, unwind, .. } => {
                if *normal == old {
                    *normal = new;
                }
                if *unwind == old {
                    *unwind = new;
                }
            }
            _ => {}
        }
        if let Some(table) = table_to_fix {
            for (_, block) in &mut self.switch_tables[table].cases {
                if *block == old {
                    *block = new;
                }
            }
        }
    }

    /// Rename the incoming block `old` to `new` in every phi of `block`.
    pub fn replace_phi_pred(&mut self, block: Block, old: Block, new: Block) {
        let phis: SmallVec<[Inst; 4]> = self.phis(block).collect();
        for phi in phis {
            if let InstructionData::Phi { edges, .. } = &mut self.dfg.insts[phi] {
                for (pred, _) in edges.iter_mut() {
                    if *pred == old {
                        *pred = new;
                    }
                }
            }
        }
    }

    /// Collapse duplicate incoming entries for `pred` in every phi of
    /// `block`, keeping the first.
    pub fn dedup_phi_pred(&mut self, block: Block, pred: Block) {
        let phis: SmallVec<[Inst; 4]> = self.phis(block).collect();
        for phi in phis {
            if let InstructionData::Phi { edges, .. } = &mut self.dfg.insts[phi] {
                let mut kept = false;
                edges.retain(|&(p, _)| {
                    if p != pred {
                        return true;
                    }
                    if kept {
                        false
                    } else {
                        kept = true;
                        true
                    }
                });
            }
        }
    }

    /// Iterate over the phi instructions at the top of `block`.
    pub fn phis(&self, block: Block) -> impl Iterator<Item = Inst> + '_ {
        self.layout
            .block_insts(block)
            .take_while(|&inst| self.dfg.insts[inst].opcode() == Opcode::Phi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FuncCursor;
    use crate::ir::types;

    #[test]
    fn declaration() {
        let func = Function::with_name_signature("memcmp", Signature::default());
        assert!(func.is_declaration());
    }

    #[test]
    fn switch_successors() {
        let mut func = Function::with_name_signature(
            "f",
            Signature::new(vec![types::I32], None),
        );
        let entry = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        func.layout.append_block(entry);
        func.layout.append_block(b1);
        func.layout.append_block(b2);
        let table = func.create_switch_table(SwitchTableData {
            cases: vec![(1, b1), (3, b1)],
        });
        let cond = func.params[0];
        let mut cur = FuncCursor::new(&mut func).at_bottom(entry);
        cur.ins().switch(cond, table, b2);

        let term = func.terminator(entry);
        assert_eq!(func.branch_targets(term).as_slice(), &[b2, b1, b1]);

        func.replace_successor(term, b1, b2);
        assert_eq!(func.branch_targets(term).as_slice(), &[b2, b2, b2]);
    }

    #[test]
    fn phi_pred_fixup() {
        let mut func = Function::with_name_signature(
            "f",
            Signature::new(vec![types::I32], Some(types::I32)),
        );
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        for b in [b0, b1, b2] {
            func.layout.append_block(b);
        }
        let arg = func.params[0];
        {
            let mut cur = FuncCursor::new(&mut func).at_bottom(b0);
            cur.ins().jump(b2);
            let mut cur = FuncCursor::new(&mut func).at_bottom(b1);
            cur.ins().jump(b2);
            let mut cur = FuncCursor::new(&mut func).at_bottom(b2);
            let merged = cur.ins().phi(types::I32, vec![(b0, arg), (b1, arg)]);
            cur.ins().return_(Some(merged));
        }

        func.replace_phi_pred(b2, b0, b1);
        func.dedup_phi_pred(b2, b1);
        let phi = func.phis(b2).next().unwrap();
        match &func.dfg.insts[phi] {
            InstructionData::Phi { edges, .. } => assert_eq!(edges.len(), 1),
            _ => unreachable!(),
        }
    }
}

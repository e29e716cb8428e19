//! The data flow graph: primary owner of blocks, instructions, and values.

use cranelift_entity::{PrimaryMap, SecondaryMap};
use serde::{Deserialize, Serialize};

use crate::ir::entities::{Block, Inst, Value};
use crate::ir::instructions::{CallInfo, InstructionData};
use crate::ir::types::Type;

/// Where a value comes from.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ValueDef {
    /// Defined as the result of an instruction.
    Result(Inst),
    /// A function parameter, with its position.
    Param(u16),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum ValueData {
    Result { ty: Type, inst: Inst },
    Param { ty: Type, num: u16 },
}

/// Placeholder data for a basic block; block contents live in the layout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockData {}

/// The primary definition of all instructions, blocks, and values of a
/// function. Ordering lives in the `Layout`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataFlowGraph {
    /// Instruction contents.
    pub insts: PrimaryMap<Inst, InstructionData>,
    blocks: PrimaryMap<Block, BlockData>,
    values: PrimaryMap<Value, ValueData>,
    results: SecondaryMap<Inst, Option<Value>>,
}

impl DataFlowGraph {
    /// Create a new empty data flow graph.
    pub fn new() -> Self {
        Self {
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            values: PrimaryMap::new(),
            results: SecondaryMap::new(),
        }
    }

    /// Allocate a new basic block. It must still be inserted into the layout.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Number of blocks allocated so far.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Create an instruction. It must still be inserted into the layout, and
    /// a result attached if it produces a value.
    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    /// Attach a result value of the given type to `inst`.
    pub fn attach_result(&mut self, inst: Inst, ty: Type) -> Value {
        debug_assert!(self.results[inst].is_none(), "instruction already has a result");
        let value = self.values.push(ValueData::Result { ty, inst });
        self.results[inst] = Some(value);
        value
    }

    /// The result value of `inst`, if it produces one.
    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.results[inst]
    }

    /// Create a function parameter value.
    pub fn make_param(&mut self, ty: Type, num: u16) -> Value {
        self.values.push(ValueData::Param { ty, num })
    }

    /// The type of `value`.
    pub fn value_type(&self, value: Value) -> Type {
        match self.values[value] {
            ValueData::Result { ty, .. } | ValueData::Param { ty, .. } => ty,
        }
    }

    /// Where `value` is defined.
    pub fn value_def(&self, value: Value) -> ValueDef {
        match self.values[value] {
            ValueData::Result { inst, .. } => ValueDef::Result(inst),
            ValueData::Param { num, .. } => ValueDef::Param(num),
        }
    }

    /// If `value` is defined by an integer-constant instruction, its type and
    /// sign-extended bits.
    pub fn value_as_iconst(&self, value: Value) -> Option<(Type, i64)> {
        match self.value_def(value) {
            ValueDef::Result(inst) => match self.insts[inst] {
                InstructionData::Iconst { ty, imm } => Some((ty, imm)),
                _ => None,
            },
            ValueDef::Param(_) => None,
        }
    }

    /// The call-base view of `inst`, if it is a call of any flavor.
    pub fn call_info(&self, inst: Inst) -> Option<CallInfo> {
        self.insts[inst].call_info()
    }

    /// Does any instruction use `value` as an operand?
    pub fn value_is_used(&self, value: Value) -> bool {
        for (_, data) in self.insts.iter() {
            let mut used = false;
            data.visit_args(|v| used |= v == value);
            if used {
                return true;
            }
        }
        false
    }
}

impl Default for DataFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types;

    #[test]
    fn results_and_defs() {
        let mut dfg = DataFlowGraph::new();
        let inst = dfg.make_inst(InstructionData::Iconst {
            ty: types::I32,
            imm: 42,
        });
        assert_eq!(dfg.inst_result(inst), None);
        let v = dfg.attach_result(inst, types::I32);
        assert_eq!(dfg.inst_result(inst), Some(v));
        assert_eq!(dfg.value_type(v), types::I32);
        assert_eq!(dfg.value_def(v), ValueDef::Result(inst));
        assert_eq!(dfg.value_as_iconst(v), Some((types::I32, 42)));
    }

    #[test]
    fn use_scan() {
        let mut dfg = DataFlowGraph::new();
        let a = dfg.make_param(types::I32, 0);
        let b = dfg.make_param(types::I32, 1);
        let inst = dfg.make_inst(InstructionData::Binary {
            opcode: crate::ir::Opcode::Xor,
            args: [a, a],
        });
        let _ = dfg.attach_result(inst, types::I32);
        assert!(dfg.value_is_used(a));
        assert!(!dfg.value_is_used(b));
    }
}

//! Instruction builder.
//!
//! `FuncCursor::ins()` returns an `InsertBuilder` whose methods create one
//! instruction at the cursor position and hand back its result value (or the
//! instruction itself for ops without results).

use crate::cursor::FuncCursor;
use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::entities::{Block, Func, Global, Inst, SwitchTable, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::types::{self, Type};

/// Builder inserting one instruction at a cursor position.
pub struct InsertBuilder<'short, 'f> {
    pos: &'short mut FuncCursor<'f>,
}

impl<'short, 'f> InsertBuilder<'short, 'f> {
    /// Create a builder for `pos`.
    pub fn new(pos: &'short mut FuncCursor<'f>) -> Self {
        Self { pos }
    }

    fn build(self, data: InstructionData, result: Option<Type>) -> (Inst, Option<Value>) {
        let inst = self.pos.func.dfg.make_inst(data);
        let value = result.map(|ty| self.pos.func.dfg.attach_result(inst, ty));
        self.pos.insert_inst(inst);
        (inst, value)
    }

    /// An integer constant.
    pub fn iconst(self, ty: Type, imm: i64) -> Value {
        debug_assert!(ty.is_int());
        self.build(InstructionData::Iconst { ty, imm }, Some(ty)).1.unwrap()
    }

    fn unary(self, opcode: Opcode, ty: Type, arg: Value) -> Value {
        self.build(InstructionData::Unary { opcode, ty, arg }, Some(ty)).1.unwrap()
    }

    /// Zero-extend `arg` to `ty`. A no-op when `arg` already has that type.
    pub fn zext(self, ty: Type, arg: Value) -> Value {
        if self.pos.func.dfg.value_type(arg) == ty {
            return arg;
        }
        self.unary(Opcode::Zext, ty, arg)
    }

    /// Truncate `arg` to the narrower integer `ty`.
    pub fn trunc(self, ty: Type, arg: Value) -> Value {
        if self.pos.func.dfg.value_type(arg) == ty {
            return arg;
        }
        self.unary(Opcode::Trunc, ty, arg)
    }

    /// Convert a float to an unsigned integer.
    pub fn fptoui(self, ty: Type, arg: Value) -> Value {
        self.unary(Opcode::Fptoui, ty, arg)
    }

    /// Reinterpret a pointer as an integer.
    pub fn ptrtoint(self, ty: Type, arg: Value) -> Value {
        self.unary(Opcode::Ptrtoint, ty, arg)
    }

    fn binary(self, opcode: Opcode, a: Value, b: Value) -> Value {
        let ty = self.pos.func.dfg.value_type(a);
        self.build(InstructionData::Binary { opcode, args: [a, b] }, Some(ty)).1.unwrap()
    }

    /// Bitwise xor.
    pub fn xor(self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Xor, a, b)
    }

    /// Wrapping add.
    pub fn add(self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Add, a, b)
    }

    /// Bitwise and.
    pub fn band(self, a: Value, b: Value) -> Value {
        self.binary(Opcode::And, a, b)
    }

    /// Bitwise or.
    pub fn bor(self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Or, a, b)
    }

    /// Logical shift right.
    pub fn ushr(self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Ushr, a, b)
    }

    /// Logical shift right by a constant amount.
    pub fn ushr_imm(self, a: Value, imm: i64) -> Value {
        let ty = self.pos.func.dfg.value_type(a);
        let amount = self.pos.ins().iconst(ty, imm);
        self.binary(Opcode::Ushr, a, amount)
    }

    /// Pointer plus byte offset.
    pub fn gep(self, base: Value, offset: Value) -> Value {
        self.build(
            InstructionData::Binary {
                opcode: Opcode::Gep,
                args: [base, offset],
            },
            Some(Type::Ptr),
        )
        .1
        .unwrap()
    }

    /// Integer comparison producing an `i1`.
    pub fn icmp(self, cond: IntCC, a: Value, b: Value) -> Value {
        self.build(InstructionData::IntCompare { cond, args: [a, b] }, Some(types::I1))
            .1
            .unwrap()
    }

    /// Float comparison producing an `i1`.
    pub fn fcmp(self, cond: FloatCC, a: Value, b: Value) -> Value {
        self.build(InstructionData::FloatCompare { cond, args: [a, b] }, Some(types::I1))
            .1
            .unwrap()
    }

    /// Load a `ty` through `addr`.
    pub fn load(self, ty: Type, addr: Value) -> Value {
        self.build(InstructionData::Load { ty, addr }, Some(ty)).1.unwrap()
    }

    /// Store `value` through `addr`.
    pub fn store(self, value: Value, addr: Value) -> Inst {
        self.build(InstructionData::Store { args: [value, addr] }, None).0
    }

    /// Load a `ty` from a module global.
    pub fn global_load(self, ty: Type, global: Global) -> Value {
        self.build(InstructionData::GlobalLoad { ty, global }, Some(ty)).1.unwrap()
    }

    /// Store `value` to a module global.
    pub fn global_store(self, global: Global, value: Value) -> Inst {
        self.build(InstructionData::GlobalStore { global, arg: value }, None).0
    }

    /// The address of a module global.
    pub fn global_addr(self, global: Global) -> Value {
        self.build(InstructionData::GlobalAddr { global }, Some(Type::Ptr)).1.unwrap()
    }

    /// A direct call. `ret` must match the callee's return type.
    pub fn call(self, func: Func, ret: Option<Type>, args: &[Value]) -> Inst {
        self.build(
            InstructionData::Call {
                func,
                args: args.to_vec(),
            },
            ret,
        )
        .0
    }

    /// An indirect call through `callee`.
    pub fn call_indirect(self, callee: Value, ret: Option<Type>, args: &[Value]) -> Inst {
        self.build(
            InstructionData::CallIndirect {
                callee,
                args: args.to_vec(),
            },
            ret,
        )
        .0
    }

    /// A direct call with normal and unwind successors; terminates the block.
    pub fn invoke(
        self,
        func: Func,
        ret: Option<Type>,
        args: &[Value],
        normal: Block,
        unwind: Block,
    ) -> Inst {
        self.build(
            InstructionData::Invoke {
                func,
                args: args.to_vec(),
                normal,
                unwind,
            },
            ret,
        )
        .0
    }

    /// Opaque inline assembly.
    pub fn asm(self, args: &[Value]) -> Inst {
        self.build(InstructionData::Asm { args: args.to_vec() }, None).0
    }

    /// Unconditional branch.
    pub fn jump(self, destination: Block) -> Inst {
        self.build(InstructionData::Jump { destination }, None).0
    }

    /// Conditional branch: `then_dest` when `cond` is non-zero.
    pub fn brif(self, cond: Value, then_dest: Block, else_dest: Block) -> Inst {
        self.build(
            InstructionData::Branch {
                cond,
                then_dest,
                else_dest,
            },
            None,
        )
        .0
    }

    /// Multi-way branch over the case table `table`.
    pub fn switch(self, cond: Value, table: SwitchTable, default: Block) -> Inst {
        self.build(
            InstructionData::Switch {
                cond,
                table,
                default,
            },
            None,
        )
        .0
    }

    /// An SSA phi with one `(predecessor, value)` edge per predecessor.
    pub fn phi(self, ty: Type, edges: Vec<(Block, Value)>) -> Value {
        self.build(InstructionData::Phi { ty, edges }, Some(ty)).1.unwrap()
    }

    /// Function return.
    pub fn return_(self, arg: Option<Value>) -> Inst {
        self.build(InstructionData::Return { arg }, None).0
    }

    /// Exception resume.
    pub fn resume(self, arg: Value) -> Inst {
        self.build(InstructionData::Resume { arg }, None).0
    }
}

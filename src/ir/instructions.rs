//! Instruction data.
//!
//! One variant per instruction format; the opcode is recovered from the
//! variant. Instructions hold entity references only, never Rust references,
//! so `InstructionData` stays `Clone` and serializable.

use core::fmt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::entities::{Block, Func, Global, SwitchTable, Value};
use crate::ir::types::Type;

/// The contents of an instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InstructionData {
    /// An integer constant of the given type.
    Iconst {
        /// Result type.
        ty: Type,
        /// Constant bits, sign-extended to 64 bits.
        imm: i64,
    },
    /// A unary cast: `zext`, `trunc`, `fptoui`, or `ptrtoint`.
    Unary {
        /// Which cast.
        opcode: Opcode,
        /// Result type.
        ty: Type,
        /// Operand.
        arg: Value,
    },
    /// A binary integer operation, or `gep` (pointer plus byte offset).
    Binary {
        /// Which operation.
        opcode: Opcode,
        /// Operands.
        args: [Value; 2],
    },
    /// An integer comparison producing an `i1`.
    IntCompare {
        /// Condition code.
        cond: IntCC,
        /// Operands.
        args: [Value; 2],
    },
    /// A float comparison producing an `i1`.
    FloatCompare {
        /// Condition code.
        cond: FloatCC,
        /// Operands.
        args: [Value; 2],
    },
    /// A load through a pointer.
    Load {
        /// Loaded type.
        ty: Type,
        /// Address operand.
        addr: Value,
    },
    /// A store through a pointer: `args` = `[value, addr]`.
    Store {
        /// Stored value and address.
        args: [Value; 2],
    },
    /// A load from a module global.
    GlobalLoad {
        /// Loaded type.
        ty: Type,
        /// The global.
        global: Global,
    },
    /// A store to a module global.
    GlobalStore {
        /// The global.
        global: Global,
        /// Stored value.
        arg: Value,
    },
    /// The address of a module global.
    GlobalAddr {
        /// The global.
        global: Global,
    },
    /// A direct call.
    Call {
        /// Callee.
        func: Func,
        /// Arguments.
        args: Vec<Value>,
    },
    /// An indirect call through a function pointer.
    CallIndirect {
        /// The callee pointer.
        callee: Value,
        /// Arguments.
        args: Vec<Value>,
    },
    /// A direct call with an exception edge; terminates its block.
    Invoke {
        /// Callee.
        func: Func,
        /// Arguments.
        args: Vec<Value>,
        /// Successor on normal return.
        normal: Block,
        /// Successor on unwind.
        unwind: Block,
    },
    /// Opaque inline assembly; never instrumented.
    Asm {
        /// Operands.
        args: Vec<Value>,
    },
    /// An unconditional branch.
    Jump {
        /// Target block.
        destination: Block,
    },
    /// A two-way conditional branch on an integer condition.
    Branch {
        /// Condition value.
        cond: Value,
        /// Taken when the condition is non-zero.
        then_dest: Block,
        /// Taken when the condition is zero.
        else_dest: Block,
    },
    /// A multi-way branch over a case table.
    Switch {
        /// Condition value.
        cond: Value,
        /// Case table in the enclosing function.
        table: SwitchTable,
        /// Target when no case matches.
        default: Block,
    },
    /// An SSA phi: one incoming value per predecessor block.
    Phi {
        /// Result type.
        ty: Type,
        /// `(predecessor, value)` pairs.
        edges: Vec<(Block, Value)>,
    },
    /// Function return.
    Return {
        /// Returned value, if the function returns one.
        arg: Option<Value>,
    },
    /// Exception resume; terminates its block with no successors.
    Resume {
        /// The propagated exception value.
        arg: Value,
    },
}

/// Instruction opcodes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Opcode {
    /// Integer constant.
    Iconst,
    /// Zero extension.
    Zext,
    /// Integer truncation.
    Trunc,
    /// Float to unsigned integer.
    Fptoui,
    /// Pointer to integer.
    Ptrtoint,
    /// Bitwise xor.
    Xor,
    /// Wrapping add.
    Add,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Logical shift right.
    Ushr,
    /// Pointer plus byte offset.
    Gep,
    /// Integer comparison.
    Icmp,
    /// Float comparison.
    Fcmp,
    /// Memory load.
    Load,
    /// Memory store.
    Store,
    /// Global load.
    GlobalLoad,
    /// Global store.
    GlobalStore,
    /// Global address.
    GlobalAddr,
    /// Direct call.
    Call,
    /// Indirect call.
    CallIndirect,
    /// Call with exception edge.
    Invoke,
    /// Inline assembly.
    Asm,
    /// Unconditional branch.
    Jump,
    /// Conditional branch.
    Brif,
    /// Multi-way branch.
    Switch,
    /// SSA phi.
    Phi,
    /// Function return.
    Return,
    /// Exception resume.
    Resume,
}

impl Opcode {
    /// Does this opcode end its basic block?
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::Brif | Self::Switch | Self::Invoke | Self::Return | Self::Resume
        )
    }

    /// Does this opcode transfer control to other blocks?
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Jump | Self::Brif | Self::Switch | Self::Invoke)
    }

    /// Is this a call of any flavor?
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallIndirect | Self::Invoke)
    }

    /// Is this a comparison producing an `i1`?
    pub fn is_cmp(self) -> bool {
        matches!(self, Self::Icmp | Self::Fcmp)
    }

    /// The numeric opcode the trace runtime uses to tag exploitation values.
    pub fn number(self) -> u32 {
        use Opcode::*;
        match self {
            Return => 1,
            Jump => 2,
            Brif => 2,
            Switch => 3,
            Invoke => 5,
            Resume => 6,
            Add => 13,
            Ushr => 26,
            And => 28,
            Or => 29,
            Xor => 30,
            Load => 32,
            Store => 33,
            Gep => 34,
            Trunc => 38,
            Zext => 39,
            Fptoui => 42,
            Ptrtoint => 44,
            Icmp => 53,
            Fcmp => 54,
            Phi => 55,
            Call | CallIndirect => 56,
            Iconst => 0,
            GlobalLoad => 32,
            GlobalStore => 33,
            GlobalAddr => 0,
            Asm => 56,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Opcode::*;
        f.write_str(match *self {
            Iconst => "iconst",
            Zext => "zext",
            Trunc => "trunc",
            Fptoui => "fptoui",
            Ptrtoint => "ptrtoint",
            Xor => "xor",
            Add => "add",
            And => "and",
            Or => "or",
            Ushr => "ushr",
            Gep => "gep",
            Icmp => "icmp",
            Fcmp => "fcmp",
            Load => "load",
            Store => "store",
            GlobalLoad => "global_load",
            GlobalStore => "global_store",
            GlobalAddr => "global_addr",
            Call => "call",
            CallIndirect => "call_indirect",
            Invoke => "invoke",
            Asm => "asm",
            Jump => "jump",
            Brif => "brif",
            Switch => "switch",
            Phi => "phi",
            Return => "return",
            Resume => "resume",
        })
    }
}

/// A unified view of a call site: direct calls, indirect calls, and invokes
/// all expose a possibly-null callee and positional arguments.
pub struct CallInfo<'a> {
    /// The called function, or `None` for an indirect call.
    pub callee: Option<Func>,
    /// The call arguments.
    pub args: &'a [Value],
}

impl InstructionData {
    /// The opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match *self {
            Self::Iconst { .. } => Opcode::Iconst,
            Self::Unary { opcode, .. } | Self::Binary { opcode, .. } => opcode,
            Self::IntCompare { .. } => Opcode::Icmp,
            Self::FloatCompare { .. } => Opcode::Fcmp,
            Self::Load { .. } => Opcode::Load,
            Self::Store { .. } => Opcode::Store,
            Self::GlobalLoad { .. } => Opcode::GlobalLoad,
            Self::GlobalStore { .. } => Opcode::GlobalStore,
            Self::GlobalAddr { .. } => Opcode::GlobalAddr,
            Self::Call { .. } => Opcode::Call,
            Self::CallIndirect { .. } => Opcode::CallIndirect,
            Self::Invoke { .. } => Opcode::Invoke,
            Self::Asm { .. } => Opcode::Asm,
            Self::Jump { .. } => Opcode::Jump,
            Self::Branch { .. } => Opcode::Brif,
            Self::Switch { .. } => Opcode::Switch,
            Self::Phi { .. } => Opcode::Phi,
            Self::Return { .. } => Opcode::Return,
            Self::Resume { .. } => Opcode::Resume,
        }
    }

    /// The call-base view of this instruction, if it is a call.
    ///
    /// Inline assembly is not a call.
    pub fn call_info(&self) -> Option<CallInfo> {
        match self {
            Self::Call { func, args } | Self::Invoke { func, args, .. } => Some(CallInfo {
                callee: Some(*func),
                args,
            }),
            Self::CallIndirect { args, .. } => Some(CallInfo { callee: None, args }),
            _ => None,
        }
    }

    /// Visit every value operand of this instruction.
    pub fn visit_args(&self, mut f: impl FnMut(Value)) {
        match self {
            Self::Iconst { .. }
            | Self::GlobalLoad { .. }
            | Self::GlobalAddr { .. }
            | Self::Jump { .. }
            | Self::Return { arg: None } => {}
            Self::Unary { arg, .. }
            | Self::GlobalStore { arg, .. }
            | Self::Resume { arg }
            | Self::Return { arg: Some(arg) } => f(*arg),
            Self::Binary { args, .. }
            | Self::IntCompare { args, .. }
            | Self::FloatCompare { args, .. }
            | Self::Store { args } => {
                for &a in args {
                    f(a)
                }
            }
            Self::Load { addr, .. } => f(*addr),
            Self::Call { args, .. } | Self::Invoke { args, .. } | Self::Asm { args } => {
                for &a in args {
                    f(a)
                }
            }
            Self::CallIndirect { callee, args } => {
                f(*callee);
                for &a in args {
                    f(a)
                }
            }
            Self::Branch { cond, .. } | Self::Switch { cond, .. } => f(*cond),
            Self::Phi { edges, .. } => {
                for &(_, v) in edges {
                    f(v)
                }
            }
        }
    }

    /// Collect every value operand of this instruction.
    pub fn arguments(&self) -> SmallVec<[Value; 4]> {
        let mut out = SmallVec::new();
        self.visit_args(|v| out.push(v));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_base_view() {
        let v0 = Value::from_u32(0);
        let f0 = Func::from_u32(0);
        let direct = InstructionData::Call {
            func: f0,
            args: vec![v0],
        };
        let info = direct.call_info().unwrap();
        assert_eq!(info.callee, Some(f0));
        assert_eq!(info.args, &[v0]);

        let indirect = InstructionData::CallIndirect {
            callee: v0,
            args: vec![],
        };
        assert_eq!(indirect.call_info().unwrap().callee, None);

        let asm = InstructionData::Asm { args: vec![v0] };
        assert!(asm.call_info().is_none());
    }

    #[test]
    fn terminators() {
        assert!(Opcode::Invoke.is_terminator());
        assert!(Opcode::Invoke.is_call());
        assert!(!Opcode::Call.is_terminator());
        assert!(Opcode::Resume.is_terminator());
        assert!(!Opcode::Resume.is_branch());
    }
}

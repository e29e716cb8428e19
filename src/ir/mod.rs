//! Representation of modules, functions, and instructions.

mod builder;
pub mod condcodes;
mod dfg;
mod entities;
mod function;
mod instructions;
mod layout;
mod module;
pub mod types;

pub use self::builder::InsertBuilder;
pub use self::condcodes::{FloatCC, IntCC};
pub use self::dfg::{BlockData, DataFlowGraph, ValueDef};
pub use self::entities::{Block, Func, Global, Inst, SwitchTable, Value};
pub use self::function::{Function, Signature, SwitchTableData};
pub use self::instructions::{CallInfo, InstructionData, Opcode};
pub use self::layout::Layout;
pub use self::module::{GlobalData, GlobalKind, Linkage, Module};
pub use self::types::Type;

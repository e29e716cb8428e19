//! IR entity references.
//!
//! Instructions reference other parts of the module through compact `u32`
//! index types rather than Rust references. There is a separate index type
//! for each entity so we don't lose type safety.

use cranelift_entity::entity_impl;
use serde::{Deserialize, Serialize};

/// An opaque reference to a function in a module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Func(u32);
entity_impl!(Func, "fn");

/// An opaque reference to a basic block in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an instruction in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to an SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to a module-level global variable.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Global(u32);
entity_impl!(Global, "gv");

/// An opaque reference to a switch case table in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwitchTable(u32);
entity_impl!(SwitchTable, "st");

//! A module: functions plus global variables.

use cranelift_entity::PrimaryMap;
use serde::{Deserialize, Serialize};

use crate::ir::entities::{Func, Global};
use crate::ir::function::{Function, Signature};
use crate::ir::types::Type;

/// Linkage of a global variable.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Linkage {
    /// Defined elsewhere; no initializer here.
    External,
    /// Zero-initialized, mergeable across translation units.
    Common,
    /// Private to this module.
    Internal,
}

/// The contents of a global variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GlobalKind {
    /// A scalar of the given type; `init` is `None` for external globals.
    Scalar {
        /// Value type.
        ty: Type,
        /// Initial value bits, if defined here.
        init: Option<i64>,
    },
    /// A constant array of 64-bit values.
    Array64 {
        /// The elements.
        elems: Vec<u64>,
    },
}

/// A module-level global variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalData {
    /// Symbol name.
    pub name: String,
    /// Contents.
    pub kind: GlobalKind,
    /// Linkage.
    pub linkage: Linkage,
    /// Is this thread-local (general-dynamic model)?
    pub tls: bool,
}

impl GlobalData {
    /// The type a `global_load` of this global produces.
    pub fn value_type(&self) -> Type {
        match self.kind {
            GlobalKind::Scalar { ty, .. } => ty,
            GlobalKind::Array64 { .. } => Type::Ptr,
        }
    }
}

/// A module owning functions and globals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    /// The module identifier, normally the source file name.
    pub name: String,

    /// Size in bytes of the source the module was built from; mixed into the
    /// module id hash so different versions of a file get different ids.
    pub source_size: u32,

    /// All functions, declarations included.
    pub functions: PrimaryMap<Func, Function>,

    /// All global variables.
    pub globals: PrimaryMap<Global, GlobalData>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>, source_size: u32) -> Self {
        Self {
            name: name.into(),
            source_size,
            functions: PrimaryMap::new(),
            globals: PrimaryMap::new(),
        }
    }

    /// The module id: a djb2-style hash of the module name mixed with the
    /// source size. Seeds every random draw the instrumenter makes, so
    /// instrumenting the same module twice gives identical output.
    pub fn module_id(&self) -> u32 {
        let mut hash = 5381u32.wrapping_add(self.source_size.wrapping_mul(223));
        for b in self.name.bytes() {
            hash = hash.wrapping_mul(33).wrapping_add(u32::from(b));
        }
        hash
    }

    /// Add a function with the given name and signature, returning its id.
    /// The function starts out as a declaration.
    pub fn declare_function(&mut self, name: impl Into<String>, signature: Signature) -> Func {
        self.functions
            .push(Function::with_name_signature(name, signature))
    }

    /// Look up a function by symbol name.
    pub fn function_by_name(&self, name: &str) -> Option<Func> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    /// The function named `name`, declaring it with `signature` if missing.
    pub fn get_or_insert_function(&mut self, name: &str, signature: Signature) -> Func {
        match self.function_by_name(name) {
            Some(f) => f,
            None => self.declare_function(name, signature),
        }
    }

    /// Add a global variable, returning its id.
    pub fn declare_global(&mut self, data: GlobalData) -> Global {
        self.globals.push(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_id_is_stable() {
        let a = Module::new("server.c", 1024);
        let b = Module::new("server.c", 1024);
        assert_eq!(a.module_id(), b.module_id());
        assert_ne!(a.module_id(), Module::new("server.c", 1025).module_id());
        assert_ne!(a.module_id(), Module::new("client.c", 1024).module_id());
    }

    #[test]
    fn get_or_insert() {
        let mut module = Module::new("m.c", 0);
        let a = module.get_or_insert_function("memcmp", Signature::default());
        let b = module.get_or_insert_function("memcmp", Signature::default());
        assert_eq!(a, b);
        assert_eq!(module.functions.len(), 1);
    }
}

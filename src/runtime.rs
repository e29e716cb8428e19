//! The trace runtime ABI.
//!
//! Declares the `__angora_*` globals and extern functions the instrumented
//! binary links against. Signatures here are a bit-for-bit contract with the
//! runtime library; change nothing without changing both sides.

use crate::config::Mode;
use crate::ir::{
    types, Func, Global, GlobalData, GlobalKind, Linkage, Module, Signature, Type,
};

/// log2 of the coverage map size.
pub const MAP_SIZE_POW2: u32 = 16;
/// Size in bytes of the shared coverage map of 8-bit saturating counters.
pub const MAP_SIZE: u32 = 1 << MAP_SIZE_POW2;

/// Predicate number of an equality comparison.
pub const COND_EQ_OP: u32 = 32;
/// Predicate bit set when the right operand is a negative constant.
pub const COND_SIGN_MASK: u32 = 0x100;
/// Predicate bit marking a synthesized boolean comparison against 1.
pub const COND_BOOL_MASK: u32 = 0x200;
/// Predicate bit marking an exploitation-value record; the low bits carry
/// the instruction opcode instead of a comparison predicate.
pub const COND_EXPLOIT_MASK: u32 = 0x4000;

/// Handles to every runtime symbol the instrumenter references.
///
/// Mode-specific symbols are `None` in the other mode.
pub struct RuntimeAbi {
    /// TLS accumulated call-site context.
    pub context: Global,
    /// TLS most recent call-site id.
    pub call_site: Global,
    /// TLS most recent indirect call-site id; zeroed at function return.
    pub ind_call_site: Global,
    /// Pointer to the shared coverage byte map (fast mode).
    pub map_ptr: Option<Global>,
    /// The comparison id the fuzzer is currently tracking (fast mode).
    pub cond_cmpid: Option<Global>,
    /// TLS previous block tag (fast mode).
    pub prev_loc: Option<Global>,
    /// Gated comparison trace (fast mode).
    pub trace_cmp: Option<Func>,
    /// Gated switch trace (fast mode).
    pub trace_switch: Option<Func>,
    /// Full comparison trace (track mode).
    pub trace_cmp_tt: Option<Func>,
    /// Full switch trace (track mode).
    pub trace_switch_tt: Option<Func>,
    /// Compare-function trace (track mode).
    pub trace_fn_tt: Option<Func>,
    /// Exploitation-value trace (track mode).
    pub trace_exploit_tt: Option<Func>,
    /// Socket-readiness signal.
    pub listen_ready: Func,
    /// Early-termination probe.
    pub check_terminate: Func,
}

impl RuntimeAbi {
    /// Declare all symbols for `mode` in `module` and return their handles.
    pub fn declare(module: &mut Module, mode: Mode) -> Self {
        let tls_i32 = |name: &str| GlobalData {
            name: name.to_string(),
            kind: GlobalKind::Scalar {
                ty: types::I32,
                init: Some(0),
            },
            linkage: Linkage::Common,
            tls: true,
        };

        let context = module.declare_global(tls_i32("__angora_context"));
        let call_site = module.declare_global(tls_i32("__angora_call_site"));
        let ind_call_site = module.declare_global(tls_i32("__angora_indirect_call_site"));

        let listen_ready = extern_fn(module, "__angora_listen_ready", &[], None);
        let check_terminate = extern_fn(module, "__angora_check_terminate_static", &[], None);

        let mut abi = Self {
            context,
            call_site,
            ind_call_site,
            map_ptr: None,
            cond_cmpid: None,
            prev_loc: None,
            trace_cmp: None,
            trace_switch: None,
            trace_cmp_tt: None,
            trace_switch_tt: None,
            trace_fn_tt: None,
            trace_exploit_tt: None,
            listen_ready,
            check_terminate,
        };

        match mode {
            Mode::Fast => {
                abi.map_ptr = Some(module.declare_global(GlobalData {
                    name: "__angora_area_ptr".to_string(),
                    kind: GlobalKind::Scalar {
                        ty: Type::Ptr,
                        init: None,
                    },
                    linkage: Linkage::External,
                    tls: false,
                }));
                abi.cond_cmpid = Some(module.declare_global(GlobalData {
                    name: "__angora_cond_cmpid".to_string(),
                    kind: GlobalKind::Scalar {
                        ty: types::I32,
                        init: None,
                    },
                    linkage: Linkage::External,
                    tls: false,
                }));
                abi.prev_loc = Some(module.declare_global(tls_i32("__angora_prev_loc")));

                abi.trace_cmp = Some(extern_fn(
                    module,
                    "__angora_trace_cmp",
                    &[types::I32, types::I32, types::I32, types::I64, types::I64],
                    Some(types::I32),
                ));
                abi.trace_switch = Some(extern_fn(
                    module,
                    "__angora_trace_switch",
                    &[types::I32, types::I32, types::I64],
                    Some(types::I64),
                ));
            }
            Mode::Track => {
                abi.trace_cmp_tt = Some(extern_fn(
                    module,
                    "__angora_trace_cmp_tt",
                    &[
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I64,
                        types::I64,
                        types::I32,
                    ],
                    None,
                ));
                abi.trace_switch_tt = Some(extern_fn(
                    module,
                    "__angora_trace_switch_tt",
                    &[
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I64,
                        types::I32,
                        Type::Ptr,
                    ],
                    None,
                ));
                abi.trace_fn_tt = Some(extern_fn(
                    module,
                    "__angora_trace_fn_tt",
                    &[
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I32,
                        Type::Ptr,
                        Type::Ptr,
                    ],
                    None,
                ));
                abi.trace_exploit_tt = Some(extern_fn(
                    module,
                    "__angora_trace_exploit_val_tt",
                    &[
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I32,
                        types::I64,
                    ],
                    None,
                ));
            }
            Mode::Dfsan => {}
        }

        abi
    }
}

fn extern_fn(module: &mut Module, name: &str, params: &[Type], ret: Option<Type>) -> Func {
    let func = module.get_or_insert_function(name, Signature::new(params.to_vec(), ret));
    // Trace calls must never unwind across instrumented frames.
    module.functions[func].nounwind = true;
    func
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Module;

    #[test]
    fn fast_mode_symbols() {
        let mut module = Module::new("m.c", 0);
        let abi = RuntimeAbi::declare(&mut module, Mode::Fast);
        assert!(abi.map_ptr.is_some());
        assert!(abi.trace_cmp.is_some());
        assert!(abi.trace_cmp_tt.is_none());

        let trace = &module.functions[abi.trace_cmp.unwrap()];
        assert_eq!(trace.name, "__angora_trace_cmp");
        assert!(trace.nounwind);
        assert!(trace.is_declaration());
        assert_eq!(trace.signature.params.len(), 5);
        assert_eq!(trace.signature.ret, Some(types::I32));

        let ctx = &module.globals[abi.context];
        assert!(ctx.tls);
        assert_eq!(ctx.linkage, Linkage::Common);
    }

    #[test]
    fn track_mode_symbols() {
        let mut module = Module::new("m.c", 0);
        let abi = RuntimeAbi::declare(&mut module, Mode::Track);
        assert!(abi.map_ptr.is_none());
        assert!(abi.trace_cmp.is_none());
        let tt = &module.functions[abi.trace_cmp_tt.unwrap()];
        assert_eq!(tt.signature.params.len(), 8);
        assert_eq!(tt.signature.ret, None);
        assert_eq!(
            module.functions[abi.trace_switch_tt.unwrap()].signature.params[6],
            Type::Ptr
        );
    }

    #[test]
    fn reuses_existing_declaration() {
        let mut module = Module::new("m.c", 0);
        let existing =
            module.declare_function("__angora_listen_ready", Signature::default());
        let abi = RuntimeAbi::declare(&mut module, Mode::Fast);
        assert_eq!(abi.listen_ready, existing);
        assert!(module.functions[existing].nounwind);
    }
}

//! The id-assignment sub-pass.
//!
//! Walks every instruction in program order and attaches `base_id XOR
//! counter` as its id. Running it with the same `base_id` over the fast and
//! track builds of the same module yields identical ids instruction for
//! instruction, which is what lets the two builds agree on comparison ids.

use crate::ir::Module;

/// Assign an id to every instruction of every function in `module`.
pub fn assign_instruction_ids(module: &mut Module, base_id: u32) {
    let mut counter: u32 = 0;
    for (_, func) in module.functions.iter_mut() {
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                func.iids[inst] = base_id ^ counter;
                counter = counter.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FuncCursor;
    use crate::ir::{types, Signature};

    #[test]
    fn ids_are_monotonic_under_the_mask() {
        let mut module = Module::new("m.c", 0);
        let f = module.declare_function(
            "f",
            Signature::new(vec![types::I32], Some(types::I32)),
        );
        let func = &mut module.functions[f];
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let arg = func.params[0];
        {
            let mut cur = FuncCursor::new(func).at_bottom(block);
            let c = cur.ins().iconst(types::I32, 42);
            let x = cur.ins().xor(arg, c);
            cur.ins().return_(Some(x));
        }

        assign_instruction_ids(&mut module, 0x8000_0000);
        let func = &module.functions[f];
        let ids: Vec<u32> = func
            .layout
            .block_insts(func.entry_block().unwrap())
            .map(|inst| func.iids[inst])
            .collect();
        assert_eq!(ids, [0x8000_0000, 0x8000_0001, 0x8000_0002]);
    }

    #[test]
    fn mask_is_stable_across_runs() {
        let mut a = Module::new("m.c", 0);
        let f = a.declare_function("f", Signature::default());
        let func = &mut a.functions[f];
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        FuncCursor::new(func).at_bottom(block).ins().return_(None);
        let mut b = a.clone();

        assign_instruction_ids(&mut a, 7);
        assign_instruction_ids(&mut b, 7);
        let fa = &a.functions[f];
        let fb = &b.functions[f];
        let inst = fa.layout.first_inst(fa.entry_block().unwrap()).unwrap();
        assert_eq!(fa.iids[inst], fb.iids[inst]);
    }
}

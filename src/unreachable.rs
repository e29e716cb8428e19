//! Removal of blocks that cannot be reached from the function entry.
//!
//! Instrumentation runs after this cleanup so no ids or counters are spent
//! on dead code. Phis in surviving blocks drop the incoming edges that
//! pointed at removed blocks.

use std::collections::HashSet;

use log::debug;

use crate::ir::{Block, Function, InstructionData};

/// Remove every block not reachable from the entry of `func`. Returns true
/// if anything changed. Declarations are left alone.
pub fn remove_unreachable_blocks(func: &mut Function) -> bool {
    let entry = match func.layout.entry_block() {
        Some(entry) => entry,
        None => return false,
    };

    let mut reachable = HashSet::new();
    let mut stack = vec![entry];
    while let Some(block) = stack.pop() {
        if !reachable.insert(block) {
            continue;
        }
        if let Some(term) = func.layout.last_inst(block) {
            for target in func.branch_targets(term) {
                if !reachable.contains(&target) {
                    stack.push(target);
                }
            }
        }
    }

    let dead: Vec<Block> = func
        .layout
        .blocks()
        .filter(|b| !reachable.contains(b))
        .collect();
    if dead.is_empty() {
        return false;
    }
    debug!("removing {} unreachable blocks from {}", dead.len(), func.name);

    for &block in &dead {
        func.layout.remove_block(block);
    }

    // Phi edges from removed blocks are dangling now.
    let survivors: Vec<Block> = func.layout.blocks().collect();
    for block in survivors {
        let phis: Vec<_> = func.phis(block).collect();
        for phi in phis {
            if let InstructionData::Phi { edges, .. } = &mut func.dfg.insts[phi] {
                edges.retain(|(pred, _)| reachable.contains(pred));
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FuncCursor;
    use crate::ir::{types, Signature};

    #[test]
    fn drops_dead_block_and_phi_edge() {
        let mut func = Function::with_name_signature(
            "f",
            Signature::new(vec![types::I32], Some(types::I32)),
        );
        let entry = func.dfg.make_block();
        let dead = func.dfg.make_block();
        let exit = func.dfg.make_block();
        for b in [entry, dead, exit] {
            func.layout.append_block(b);
        }
        let arg = func.params[0];
        {
            let mut cur = FuncCursor::new(&mut func).at_bottom(entry);
            cur.ins().jump(exit);
            let mut cur = FuncCursor::new(&mut func).at_bottom(dead);
            cur.ins().jump(exit);
            let mut cur = FuncCursor::new(&mut func).at_bottom(exit);
            let merged = cur.ins().phi(types::I32, vec![(entry, arg), (dead, arg)]);
            cur.ins().return_(Some(merged));
        }

        assert!(remove_unreachable_blocks(&mut func));
        assert_eq!(func.layout.blocks().collect::<Vec<_>>(), [entry, exit]);
        let phi = func.phis(exit).next().unwrap();
        match &func.dfg.insts[phi] {
            InstructionData::Phi { edges, .. } => {
                assert_eq!(edges.as_slice(), &[(entry, arg)]);
            }
            _ => unreachable!(),
        }
        assert!(!remove_unreachable_blocks(&mut func));
    }
}

//! Early termination of executions that can no longer reach a sink.
//!
//! Walks forward from every source block and cuts each edge that leaves the
//! can-reach-sink region, rerouting it through a fresh block that calls the
//! runtime termination probe before continuing. The probe decides at run
//! time whether the execution is still worth anything.

use std::collections::{BTreeSet, HashSet, VecDeque};

use log::{debug, info};

use crate::cursor::FuncCursor;
use crate::ir::{Block, Func, Module};
use crate::reachability::{BlockRef, Fact, Reachability};
use crate::runtime::RuntimeAbi;

/// Cut and reroute every edge leaving the can-reach-sink region. Returns the
/// number of edges rewritten.
///
/// Unless `aggressive` is set, functions called from inside the region are
/// left untouched: such a callee may return into a block that still reaches
/// a sink, so cutting its edges could kill executions the fuzzer wants.
pub fn add_early_termination(
    module: &mut Module,
    reach: &Reachability,
    abi: &RuntimeAbi,
    aggressive: bool,
) -> u32 {
    let mut do_not_modify: HashSet<Func> = HashSet::new();
    if !aggressive {
        for (id, func) in module.functions.iter() {
            for block in func.layout.blocks() {
                if reach.can_reach_sink_before_source(BlockRef::new(id, block)) != Fact::Yes {
                    continue;
                }
                for inst in func.layout.block_insts(block) {
                    if let Some(info) = func.dfg.call_info(inst) {
                        if let Some(callee) = info.callee {
                            do_not_modify.insert(callee);
                        }
                    }
                }
            }
        }
    }

    // Walk forward from the sources; an edge from a block that may still
    // reach a sink into one that definitely cannot is where execution stops
    // being interesting.
    let mut seen: HashSet<BlockRef> = HashSet::new();
    let mut todo: VecDeque<BlockRef> = VecDeque::new();
    let mut edges: BTreeSet<(BlockRef, Block)> = BTreeSet::new();
    for &bb in reach.sources() {
        if !do_not_modify.contains(&bb.func) {
            todo.push_back(bb);
        }
    }
    while let Some(bb) = todo.pop_front() {
        if !seen.insert(bb) {
            continue;
        }
        let func = &module.functions[bb.func];
        let term = func.terminator(bb.block);
        for succ in func.branch_targets(term) {
            let succ_ref = BlockRef::new(bb.func, succ);
            if reach.can_reach_sink_before_source(bb) != Fact::No
                && reach.can_reach_sink_before_source(succ_ref) == Fact::No
            {
                edges.insert((bb, succ));
            } else {
                todo.push_back(succ_ref);
            }
        }
    }

    debug!("found {} edges to cut", edges.len());
    let count = edges.len() as u32;

    for (from, to) in edges {
        let func = &mut module.functions[from.func];
        let term = func.terminator(from.block);
        debug_assert!(
            func.layout.is_block_inserted(to),
            "edge endpoints are in the same function"
        );

        let probe_block = func.dfg.make_block();
        func.layout.append_block(probe_block);
        {
            let mut cur = FuncCursor::new(func).at_bottom(probe_block);
            cur.ins().call(abi.check_terminate, None, &[]);
            cur.ins().jump(to);
        }

        func.replace_successor(term, to, probe_block);
        func.replace_phi_pred(to, from.block, probe_block);
        // A multi-edge from the old block leaves duplicate phi entries.
        func.dedup_phi_pred(to, probe_block);
    }

    if count > 0 {
        info!("rerouted {} edges through the termination probe", count);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abilist::{self, CategoryList};
    use crate::config::Mode;
    use crate::ir::{types, InstructionData, Opcode, Signature};

    /// entry calls the source and falls into a check block that branches:
    /// one arm calls the sink, the other returns. The return arm can no
    /// longer reach a sink, so the edge into it gets the probe.
    #[test]
    fn cuts_edge_leaving_sink_region() {
        let mut module = Module::new("m.c", 0);
        let source = module.declare_function("recvfrom", Signature::default());
        let sink = module.declare_function("system", Signature::default());
        let main = module.declare_function(
            "main",
            Signature::new(vec![types::I32], None),
        );

        let func = &mut module.functions[main];
        let entry = func.dfg.make_block();
        let check = func.dfg.make_block();
        let danger = func.dfg.make_block();
        let bail = func.dfg.make_block();
        for b in [entry, check, danger, bail] {
            func.layout.append_block(b);
        }
        let cond = func.params[0];
        {
            let mut cur = FuncCursor::new(func).at_bottom(entry);
            cur.ins().call(source, None, &[]);
            cur.ins().jump(check);
            let mut cur = FuncCursor::new(func).at_bottom(check);
            cur.ins().brif(cond, danger, bail);
            let mut cur = FuncCursor::new(func).at_bottom(danger);
            cur.ins().call(sink, None, &[]);
            cur.ins().return_(None);
            let mut cur = FuncCursor::new(func).at_bottom(bail);
            cur.ins().return_(None);
        }

        let mut lists = CategoryList::new();
        lists.insert("recvfrom", abilist::SOURCE);
        lists.insert("system", abilist::SINK);
        let reach = Reachability::compute(&module, &lists);
        assert_eq!(
            reach.can_reach_sink_before_source(BlockRef::new(main, check)),
            Fact::Yes
        );
        assert_eq!(
            reach.can_reach_sink_before_source(BlockRef::new(main, bail)),
            Fact::No
        );

        let abi = RuntimeAbi::declare(&mut module, Mode::Fast);
        let cut = add_early_termination(&mut module, &reach, &abi, false);
        assert_eq!(cut, 1);

        // check's else edge now goes through a block calling the probe.
        let func = &module.functions[main];
        let term = func.terminator(check);
        let targets = func.branch_targets(term);
        assert_eq!(targets[0], danger);
        let probe_block = targets[1];
        assert_ne!(probe_block, bail);
        let mut insts = func.layout.block_insts(probe_block);
        let call = insts.next().unwrap();
        match &func.dfg.insts[call] {
            InstructionData::Call { func: callee, .. } => {
                assert_eq!(*callee, abi.check_terminate)
            }
            other => panic!("expected probe call, got {}", other.opcode()),
        }
        let jump = insts.next().unwrap();
        assert_eq!(func.branch_targets(jump).as_slice(), &[bail]);
    }

    /// Phi values in the rerouted successor follow the rename, and a
    /// two-armed edge collapsing onto one probe block drops the duplicate
    /// phi entry.
    #[test]
    fn phi_fixup_on_multi_edge() {
        let mut module = Module::new("m.c", 0);
        let source = module.declare_function("recvfrom", Signature::default());
        let sink = module.declare_function("system", Signature::default());
        let main = module.declare_function(
            "main",
            Signature::new(vec![types::I32], Some(types::I32)),
        );

        let func = &mut module.functions[main];
        let entry = func.dfg.make_block();
        let hub = func.dfg.make_block();
        let merge = func.dfg.make_block();
        for b in [entry, hub, merge] {
            func.layout.append_block(b);
        }
        let cond = func.params[0];
        {
            let mut cur = FuncCursor::new(func).at_bottom(entry);
            cur.ins().call(source, None, &[]);
            cur.ins().jump(hub);
            // hub hits the sink, then both arms fall into the same block;
            // the phi sees hub twice.
            let mut cur = FuncCursor::new(func).at_bottom(hub);
            cur.ins().call(sink, None, &[]);
            cur.ins().brif(cond, merge, merge);
        }
        let func = &mut module.functions[main];
        {
            // Build the phi by hand at the top of merge.
            let phi_data = InstructionData::Phi {
                ty: types::I32,
                edges: vec![(hub, cond), (hub, cond)],
            };
            let phi = func.dfg.make_inst(phi_data);
            func.layout.append_inst(phi, merge);
            let phi_value = func.dfg.attach_result(phi, types::I32);
            let mut cur = FuncCursor::new(func).at_bottom(merge);
            cur.ins().return_(Some(phi_value));
        }

        let mut lists = CategoryList::new();
        lists.insert("recvfrom", abilist::SOURCE);
        lists.insert("system", abilist::SINK);
        let reach = Reachability::compute(&module, &lists);
        assert_eq!(
            reach.can_reach_sink_before_source(BlockRef::new(main, hub)),
            Fact::Yes
        );
        let abi = RuntimeAbi::declare(&mut module, Mode::Fast);
        let cut = add_early_termination(&mut module, &reach, &abi, false);
        assert_eq!(cut, 1);

        let func = &module.functions[main];
        let phi = func.phis(merge).next().unwrap();
        match &func.dfg.insts[phi] {
            InstructionData::Phi { edges, .. } => {
                assert_eq!(edges.len(), 1, "duplicate phi entries collapse");
                assert_ne!(edges[0].0, hub, "incoming block renamed to the probe");
            }
            other => panic!("expected phi, got {}", other.opcode()),
        }
        // Both arms of hub's branch now go through the same probe block.
        let term = func.terminator(hub);
        let targets = func.branch_targets(term);
        assert_eq!(targets[0], targets[1]);
        assert_eq!(func.dfg.insts[func.terminator(targets[0])].opcode(), Opcode::Jump);
    }

    /// Functions called from inside the region are off limits without the
    /// aggressive override.
    #[test]
    fn do_not_modify_guard() {
        let mut module = Module::new("m.c", 0);
        let source = module.declare_function("recvfrom", Signature::default());
        let sink = module.declare_function("system", Signature::default());
        let helper = module.declare_function(
            "helper",
            Signature::new(vec![types::I32], None),
        );
        let main = module.declare_function("main", Signature::default());

        // helper: source, then a branch where one arm hits the sink and the
        // other bails: a cuttable edge, if anything were allowed to touch
        // this function.
        let func = &mut module.functions[helper];
        let hentry = func.dfg.make_block();
        let hcheck = func.dfg.make_block();
        let hdanger = func.dfg.make_block();
        let hbail = func.dfg.make_block();
        for b in [hentry, hcheck, hdanger, hbail] {
            func.layout.append_block(b);
        }
        let cond = func.params[0];
        {
            let mut cur = FuncCursor::new(func).at_bottom(hentry);
            cur.ins().call(source, None, &[]);
            cur.ins().jump(hcheck);
            let mut cur = FuncCursor::new(func).at_bottom(hcheck);
            cur.ins().brif(cond, hdanger, hbail);
            let mut cur = FuncCursor::new(func).at_bottom(hdanger);
            cur.ins().call(sink, None, &[]);
            cur.ins().return_(None);
            let mut cur = FuncCursor::new(func).at_bottom(hbail);
            cur.ins().return_(None);
        }

        // main: the sink first, then the helper call. This block reaches a
        // sink before any source, so its callees must not be modified.
        let func = &mut module.functions[main];
        let mentry = func.dfg.make_block();
        func.layout.append_block(mentry);
        {
            let mut cur = FuncCursor::new(func).at_bottom(mentry);
            cur.ins().call(sink, None, &[]);
            let zero = cur.ins().iconst(types::I32, 0);
            cur.ins().call(helper, None, &[zero]);
            cur.ins().return_(None);
        }

        let mut lists = CategoryList::new();
        lists.insert("recvfrom", abilist::SOURCE);
        lists.insert("system", abilist::SINK);
        let reach = Reachability::compute(&module, &lists);
        assert_eq!(
            reach.can_reach_sink_before_source(BlockRef::new(main, mentry)),
            Fact::Yes
        );

        let abi = RuntimeAbi::declare(&mut module, Mode::Fast);
        let blocks_before: Vec<_> = module.functions[helper].layout.blocks().collect();
        let cut = add_early_termination(&mut module, &reach, &abi, false);
        // helper is called from a can-reach-sink block, so its cuttable
        // edge stays.
        assert_eq!(cut, 0);
        assert_eq!(
            module.functions[helper].layout.blocks().collect::<Vec<_>>(),
            blocks_before
        );

        // With the guard off, helper's check→bail edge is fair game.
        let cut = add_early_termination(&mut module, &reach, &abi, true);
        assert_eq!(cut, 1);
    }
}

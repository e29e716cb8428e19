//! Export of the compressed comparison control-flow graph.
//!
//! Nodes are instrumented comparisons (ids from the instrumenter's `cmp_map`
//! submap). From each one, walk forward, crossing terminators into
//! successor blocks, until the next instrumented comparison, and emit a
//! directed id edge. A walk that crosses a call to a sink records its
//! origin id as a target. The result is what lets the fuzzer aim mutations
//! at conditions standing between it and a sink.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use serde::Serialize;

use crate::abilist::{self, CategoryList};
use crate::ir::{Func, Inst, Module};
use crate::reachability::Reachability;
use crate::result::{PassError, PassResult};

#[derive(Serialize)]
struct CfgJson {
    targets: Vec<u32>,
    edges: Vec<(u32, u32)>,
    callsite_dominators: BTreeMap<String, Vec<u32>>,
}

/// Walk the module and write the comparison CFG JSON to `path`.
pub fn export_cfg(
    module: &Module,
    cmp_map: &BTreeMap<(Func, Inst), u32>,
    reach: &Reachability,
    categories: &CategoryList,
    path: &Path,
) -> PassResult<()> {
    let (targets, edges) = build_graph(module, cmp_map, reach, categories);
    let json = CfgJson {
        targets: targets.into_iter().collect(),
        edges: edges.into_iter().collect(),
        callsite_dominators: BTreeMap::new(),
    };
    write_json(&json, path).map_err(|source| PassError::CfgWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json(json: &CfgJson, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, json).map_err(io::Error::from)
}

fn build_graph(
    module: &Module,
    cmp_map: &BTreeMap<(Func, Inst), u32>,
    reach: &Reachability,
    categories: &CategoryList,
) -> (BTreeSet<u32>, BTreeSet<(u32, u32)>) {
    let mut edges: BTreeSet<(u32, u32)> = BTreeSet::new();
    let mut targets: BTreeSet<u32> = BTreeSet::new();

    let mut todo: VecDeque<(u32, Func, Inst)> = cmp_map
        .iter()
        .map(|(&(func, inst), &id)| (id, func, inst))
        .collect();
    let mut seen: HashSet<(u32, Func, Inst)> = HashSet::new();

    while let Some((from_id, f, start)) = todo.pop_front() {
        let mut done = !seen.insert((from_id, f, start));
        let func = &module.functions[f];

        // Advance until the next instrumented comparison or the end of the
        // block, whichever comes first.
        let mut inst = start;
        while !(done || func.dfg.insts[inst].opcode().is_terminator()) {
            inst = match func.layout.next_inst(inst) {
                Some(next) => next,
                None => break,
            };

            if let Some(info) = func.dfg.call_info(inst) {
                if let Some(callee) = info.callee {
                    let name = &module.functions[callee].name;
                    if categories.contains(name, abilist::SINK) || reach.is_sink_function(callee)
                    {
                        targets.insert(from_id);
                    }
                }
            }

            if let Some(&to_id) = cmp_map.get(&(f, inst)) {
                edges.insert((from_id, to_id));
                done = true;
            }
        }

        // Fell off the end of the block: keep walking in every successor.
        if !done && func.dfg.insts[inst].opcode().is_terminator() {
            for succ in func.branch_targets(inst) {
                if let Some(first) = func.layout.first_inst(succ) {
                    todo.push_back((from_id, f, first));
                }
            }
        }
    }

    (targets, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abilist::CategoryList;
    use crate::cursor::FuncCursor;
    use crate::ir::{types, IntCC, Signature};

    /// Two comparisons in sequence with a sink call between them: one edge,
    /// and the first id becomes a target.
    #[test]
    fn edges_and_targets() {
        let mut module = Module::new("m.c", 0);
        let sink = module.declare_function("system", Signature::default());
        let f = module.declare_function(
            "f",
            Signature::new(vec![types::I32], None),
        );

        let func = &mut module.functions[f];
        let entry = func.dfg.make_block();
        let next = func.dfg.make_block();
        for b in [entry, next] {
            func.layout.append_block(b);
        }
        let x = func.params[0];
        let (cmp_a, cmp_b);
        {
            let mut cur = FuncCursor::new(func).at_bottom(entry);
            let c1 = cur.ins().iconst(types::I32, 1);
            let a = cur.ins().icmp(IntCC::Equal, x, c1);
            cmp_a = cur.func.dfg.value_def(a);
            cur.ins().call(sink, None, &[]);
            cur.ins().jump(next);
            let mut cur = FuncCursor::new(func).at_bottom(next);
            let c2 = cur.ins().iconst(types::I32, 2);
            let b = cur.ins().icmp(IntCC::Equal, x, c2);
            cmp_b = cur.func.dfg.value_def(b);
            cur.ins().return_(None);
        }
        let cmp_a = match cmp_a {
            crate::ir::ValueDef::Result(inst) => inst,
            _ => unreachable!(),
        };
        let cmp_b = match cmp_b {
            crate::ir::ValueDef::Result(inst) => inst,
            _ => unreachable!(),
        };

        let mut cmp_map = BTreeMap::new();
        cmp_map.insert((f, cmp_a), 10u32);
        cmp_map.insert((f, cmp_b), 20u32);

        let mut lists = CategoryList::new();
        lists.insert("system", abilist::SINK);
        let reach = Reachability::compute(&module, &lists);

        let (targets, edges) = build_graph(&module, &cmp_map, &reach, &lists);
        assert!(edges.contains(&(10, 20)));
        assert!(!edges.contains(&(20, 10)));
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), [10]);
    }

    /// The JSON keeps its three-field shape, empty dominators included.
    #[test]
    fn json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let json = CfgJson {
            targets: vec![10],
            edges: vec![(10, 20)],
            callsite_dominators: BTreeMap::new(),
        };
        write_json(&json, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["targets"], serde_json::json!([10]));
        assert_eq!(parsed["edges"], serde_json::json!([[10, 20]]));
        assert_eq!(parsed["callsite_dominators"], serde_json::json!({}));
    }
}

//! Interprocedural sink/source reachability.
//!
//! Classifies every basic block by four tri-valued facts:
//!
//! - `is_source`: some instruction in the block calls a source;
//! - `will_reach_source`: every continuation from the block eventually
//!   executes a source;
//! - `is_sink_before_source`: the block calls a sink before any source;
//! - `can_reach_sink_before_source`: some continuation hits a sink without
//!   first hitting a source.
//!
//! Facts are solved SCC by SCC over the call graph, callees first, with a
//! bounded worklist per component. Blocks still unknown when a component
//! quiesces fall to the safe side: `will_reach_source` defaults to Yes (the
//! edge cutter must not spare a path that always reaches a source) and
//! `can_reach_sink_before_source` defaults to No (the edge cutter must not
//! cut based on a guess).
//!
//! Callee resolution is asymmetric in the same direction: an unresolved
//! indirect callee counts as a possible sink but never as a source.

use std::collections::{HashMap, HashSet, VecDeque};

use log::warn;

use crate::abilist::{self, CategoryList};
use crate::callgraph::CallGraph;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Func, Module};

/// A tri-valued analysis fact. The ordering `No < Unknown < Yes` is what the
/// max/min folds below rely on.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Fact {
    /// Definitely not.
    No,
    /// Not resolved yet.
    Unknown,
    /// Definitely.
    Yes,
}

impl Fact {
    fn from_bool(b: bool) -> Self {
        if b {
            Self::Yes
        } else {
            Self::No
        }
    }
}

/// A basic block within a module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct BlockRef {
    /// The enclosing function.
    pub func: Func,
    /// The block.
    pub block: Block,
}

impl BlockRef {
    /// Convenient constructor.
    pub fn new(func: Func, block: Block) -> Self {
        Self { func, block }
    }
}

/// The resolved analysis: four block predicates, the source blocks, and the
/// per-function sink verdicts frozen after the fixed point.
pub struct Reachability {
    is_source: HashMap<BlockRef, bool>,
    is_sink_before_source: HashMap<BlockRef, bool>,
    will_reach_source: HashMap<BlockRef, bool>,
    can_reach_sink_before_source: HashMap<BlockRef, bool>,
    sources: Vec<BlockRef>,
    sink_functions: HashSet<Func>,
}

impl Reachability {
    /// Run the analysis over `module`.
    pub fn compute(module: &Module, categories: &CategoryList) -> Self {
        let call_graph = CallGraph::compute(module);
        let mut solver = Solver::new(module, categories);
        for scc in call_graph.sccs(module) {
            solver.process_scc(&scc);
        }
        solver.freeze()
    }

    /// Does some instruction in `bb` call a source?
    pub fn is_source(&self, bb: BlockRef) -> Fact {
        lookup(&self.is_source, bb)
    }

    /// Does `bb` call a sink before any source?
    pub fn is_sink_before_source(&self, bb: BlockRef) -> Fact {
        lookup(&self.is_sink_before_source, bb)
    }

    /// Does every continuation from `bb` execute a source?
    pub fn will_reach_source(&self, bb: BlockRef) -> Fact {
        lookup(&self.will_reach_source, bb)
    }

    /// Can some continuation from `bb` hit a sink before a source?
    pub fn can_reach_sink_before_source(&self, bb: BlockRef) -> Fact {
        lookup(&self.can_reach_sink_before_source, bb)
    }

    /// Every block that calls a source, in module order.
    pub fn sources(&self) -> &[BlockRef] {
        &self.sources
    }

    /// Is `func` a sink, either listed as one or able to reach one from its entry
    /// before any source?
    pub fn is_sink_function(&self, func: Func) -> bool {
        self.sink_functions.contains(&func)
    }
}

fn lookup(map: &HashMap<BlockRef, bool>, bb: BlockRef) -> Fact {
    match map.get(&bb) {
        Some(&b) => Fact::from_bool(b),
        None => Fact::Unknown,
    }
}

struct Solver<'a> {
    module: &'a Module,
    categories: &'a CategoryList,
    cfgs: HashMap<Func, ControlFlowGraph>,
    is_source: HashMap<BlockRef, bool>,
    is_sink_before_source: HashMap<BlockRef, bool>,
    will_reach_source: HashMap<BlockRef, bool>,
    can_reach_sink_before_source: HashMap<BlockRef, bool>,
}

impl<'a> Solver<'a> {
    fn new(module: &'a Module, categories: &'a CategoryList) -> Self {
        let cfgs = module
            .functions
            .iter()
            .filter(|(_, f)| !f.is_declaration())
            .map(|(id, f)| (id, ControlFlowGraph::with_function(f)))
            .collect();
        Self {
            module,
            categories,
            cfgs,
            is_source: HashMap::new(),
            is_sink_before_source: HashMap::new(),
            will_reach_source: HashMap::new(),
            can_reach_sink_before_source: HashMap::new(),
        }
    }

    fn freeze(self) -> Reachability {
        let mut sources = Vec::new();
        for (id, func) in self.module.functions.iter() {
            for block in func.layout.blocks() {
                let bb = BlockRef::new(id, block);
                if self.is_source.get(&bb) == Some(&true) {
                    sources.push(bb);
                }
            }
        }

        let mut sink_functions = HashSet::new();
        for (id, func) in self.module.functions.iter() {
            let listed = self.categories.contains(&func.name, abilist::SINK);
            let entry_reaches = func.entry_block().map_or(false, |entry| {
                self.can_reach_sink_before_source
                    .get(&BlockRef::new(id, entry))
                    == Some(&true)
            });
            if listed || entry_reaches {
                sink_functions.insert(id);
            }
        }

        Reachability {
            is_source: self.is_source,
            is_sink_before_source: self.is_sink_before_source,
            will_reach_source: self.will_reach_source,
            can_reach_sink_before_source: self.can_reach_sink_before_source,
            sources,
            sink_functions,
        }
    }

    fn successors(&self, bb: BlockRef) -> Vec<BlockRef> {
        match self.cfgs.get(&bb.func) {
            Some(cfg) => cfg
                .succ_iter(bb.block)
                .map(|block| BlockRef::new(bb.func, block))
                .collect(),
            None => Vec::new(),
        }
    }

    fn predecessors(&self, bb: BlockRef) -> Vec<BlockRef> {
        match self.cfgs.get(&bb.func) {
            Some(cfg) => cfg
                .pred_iter(bb.block)
                .map(|pred| BlockRef::new(bb.func, pred.block))
                .collect(),
            None => Vec::new(),
        }
    }

    fn is_entry(&self, bb: BlockRef) -> bool {
        self.module.functions[bb.func].entry_block() == Some(bb.block)
    }

    /// Is `callee` a sink, before any source of its own? Null callees
    /// over-approximate to Yes: an unknown target may well be dangerous.
    fn callee_sink_state(&self, callee: Option<Func>) -> Fact {
        let callee = match callee {
            Some(callee) => callee,
            None => return Fact::Yes,
        };
        let func = &self.module.functions[callee];
        if self.categories.contains(&func.name, abilist::SINK) {
            return Fact::Yes;
        }
        if func.is_declaration() {
            return Fact::No;
        }
        match func.entry_block() {
            Some(entry) => lookup(
                &self.can_reach_sink_before_source,
                BlockRef::new(callee, entry),
            ),
            None => Fact::No,
        }
    }

    /// Is `callee` a source? Null callees under-approximate to No: an
    /// unknown target must not cancel a sink path.
    fn callee_source_state(&self, callee: Option<Func>) -> Fact {
        let callee = match callee {
            Some(callee) => callee,
            None => return Fact::No,
        };
        let func = &self.module.functions[callee];
        if self.categories.contains(&func.name, abilist::SOURCE) {
            return Fact::Yes;
        }
        if func.is_declaration() {
            return Fact::No;
        }
        match func.entry_block() {
            Some(entry) => lookup(&self.will_reach_source, BlockRef::new(callee, entry)),
            None => Fact::No,
        }
    }

    fn compute_is_source(&mut self, bb: BlockRef) -> Fact {
        let func = &self.module.functions[bb.func];
        let mut state = Fact::No;
        for inst in func.layout.block_insts(bb.block) {
            if let Some(info) = func.dfg.call_info(inst) {
                state = state.max(self.callee_source_state(info.callee));
            }
        }
        if state != Fact::Unknown {
            self.is_source.insert(bb, state == Fact::Yes);
        }
        state
    }

    fn compute_is_sink_before_source(&mut self, bb: BlockRef) -> Fact {
        let func = &self.module.functions[bb.func];
        let mut state = Fact::No;
        for inst in func.layout.block_insts(bb.block) {
            if let Some(info) = func.dfg.call_info(inst) {
                state = state.max(self.callee_sink_state(info.callee));
                let source = self.callee_source_state(info.callee);
                if source != Fact::No {
                    if source == Fact::Unknown {
                        state = Fact::Unknown;
                    }
                    break;
                }
            }
        }
        if state != Fact::Unknown {
            self.is_sink_before_source.insert(bb, state == Fact::Yes);
        }
        state
    }

    fn compute_will_reach_source(&mut self, bb: BlockRef) -> Fact {
        let mut state = self.compute_is_source(bb);

        if state != Fact::Yes {
            let mut all_succs = Fact::Yes;
            let mut has_succs = false;
            for succ in self.successors(bb) {
                has_succs = true;
                all_succs = all_succs.min(lookup(&self.will_reach_source, succ));
            }
            if has_succs && all_succs > state {
                state = all_succs;
            }
        }

        if state != Fact::Unknown {
            self.will_reach_source.insert(bb, state == Fact::Yes);
        }
        state
    }

    fn compute_can_reach_sink_before_source(&mut self, bb: BlockRef) -> Fact {
        let mut state = self.compute_is_sink_before_source(bb);
        let block_is_source = lookup(&self.is_source, bb);

        if block_is_source == Fact::Unknown && state != Fact::Unknown {
            warn!("sink state of {:?} resolved before its source state", bb);
        }

        // A source block stops backward sink propagation (the input has
        // materialized again past this point).
        if state != Fact::Yes && block_is_source == Fact::No {
            let mut any_succ = Fact::No;
            let mut has_succs = false;
            for succ in self.successors(bb) {
                has_succs = true;
                any_succ = any_succ.max(lookup(&self.can_reach_sink_before_source, succ));
            }
            if has_succs && any_succ > state {
                state = any_succ;
            }
        }

        if state != Fact::Unknown {
            self.can_reach_sink_before_source
                .insert(bb, state == Fact::Yes);
        }
        state
    }

    /// Seed one worklist pass: every block of the component whose fact in
    /// `map` is still unknown, plus the reverse-call edges of its call sites.
    fn seed(
        &self,
        scc: &[Func],
        map: &HashMap<BlockRef, bool>,
        caller_map: &mut HashMap<Func, HashSet<BlockRef>>,
    ) -> (HashSet<BlockRef>, VecDeque<BlockRef>) {
        let mut unknown = HashSet::new();
        let mut todo = VecDeque::new();
        for &id in scc {
            let func = &self.module.functions[id];
            if func.is_declaration() {
                continue;
            }
            for block in func.layout.blocks() {
                let bb = BlockRef::new(id, block);
                if lookup(map, bb) != Fact::Unknown {
                    continue;
                }
                unknown.insert(bb);
                todo.push_back(bb);
                for inst in func.layout.block_insts(block) {
                    if let Some(info) = func.dfg.call_info(inst) {
                        if let Some(callee) = info.callee {
                            caller_map.entry(callee).or_default().insert(bb);
                        }
                    }
                }
            }
        }
        (unknown, todo)
    }

    fn process_scc(&mut self, scc: &[Func]) {
        // Blocks to re-check once a callee function resolves.
        let mut caller_map: HashMap<Func, HashSet<BlockRef>> = HashMap::new();

        // First pass: will_reach_source.
        let seeds = self.seed(scc, &self.is_source, &mut caller_map);
        let (mut unknown, mut todo) = seeds;
        while let Some(bb) = todo.pop_front() {
            if !unknown.contains(&bb) {
                continue;
            }
            let mut state = lookup(&self.will_reach_source, bb);
            let mut changed = false;
            if state == Fact::Unknown {
                state = self.compute_will_reach_source(bb);
                changed |= state != Fact::Unknown;
            }
            if changed {
                for pred in self.predecessors(bb) {
                    todo.push_back(pred);
                }
                if self.is_entry(bb) {
                    if let Some(callers) = caller_map.get(&bb.func) {
                        todo.extend(callers.iter().copied());
                    }
                }
                if state != Fact::Unknown {
                    unknown.remove(&bb);
                }
            }
        }
        // Anything the worklist could not settle always reaches a source as
        // far as the edge cutter is concerned.
        for bb in unknown {
            self.will_reach_source.insert(bb, true);
        }

        // Second pass: can_reach_sink_before_source.
        let seeds = self.seed(scc, &self.is_sink_before_source, &mut caller_map);
        let (mut unknown, mut todo) = seeds;
        while let Some(bb) = todo.pop_front() {
            if !unknown.contains(&bb) {
                continue;
            }
            let mut state = lookup(&self.can_reach_sink_before_source, bb);
            let mut changed = false;
            if state == Fact::Unknown {
                state = self.compute_can_reach_sink_before_source(bb);
                changed |= state != Fact::Unknown;
            }
            if changed {
                for pred in self.predecessors(bb) {
                    todo.push_back(pred);
                }
                if self.is_entry(bb) {
                    if let Some(callers) = caller_map.get(&bb.func) {
                        todo.extend(callers.iter().copied());
                    }
                }
                if state != Fact::Unknown {
                    unknown.remove(&bb);
                }
            }
        }
        // Unresolved sink reachability must not cut edges.
        for bb in unknown {
            self.can_reach_sink_before_source.insert(bb, false);
        }
    }
}

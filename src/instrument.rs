//! The per-function rewriter and the module pass driver.
//!
//! Fast mode gets edge counters and a gated trace for the one comparison the
//! fuzzer is tracking; track mode gets unguarded traces carrying operand
//! values. Everything inserted here is tagged "nosanitize" so a second run
//! over the same module leaves the inserted code alone.

use std::collections::BTreeMap;

use cranelift_entity::{PrimaryMap, SecondaryMap};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::abilist::{self, CategoryList};
use crate::cfg_export;
use crate::config::{Config, Mode};
use crate::config::ContextMode;
use crate::cursor::FuncCursor;
use crate::ir::{
    types, Block, Func, Function, Global, GlobalData, GlobalKind, Inst, InstructionData, IntCC,
    Linkage, Module, Opcode, Type, Value, ValueDef,
};
use crate::reachability::Reachability;
use crate::result::{PassError, PassResult};
use crate::runtime::{
    RuntimeAbi, COND_BOOL_MASK, COND_EQ_OP, COND_EXPLOIT_MASK, COND_SIGN_MASK, MAP_SIZE,
};
use crate::terminate;
use crate::unreachable;

/// What one pass run did, also echoed to the log.
#[derive(Debug, Clone)]
pub struct PassSummary {
    /// The module id every random draw was seeded from.
    pub module_id: u32,
    /// The mode the module was built in.
    pub mode: Mode,
    /// Number of socket-readiness call sites found.
    pub sockets: u32,
    /// Number of control-flow edges rerouted through the termination probe.
    pub cut_edges: u32,
    /// Number of comparisons given trace instrumentation.
    pub comparisons: u32,
}

/// Run the pass over `module`, loading category lists from the files named
/// in `config`.
pub fn instrument_module(module: &mut Module, config: &Config) -> PassResult<PassSummary> {
    let mut files = config.abilist_files.clone();
    files.extend(config.exploitation_files.iter().cloned());
    let categories = CategoryList::from_files(&files)?;
    instrument_module_with(module, config, &categories)
}

/// Run the pass over `module` with an already-built category list.
pub fn instrument_module_with(
    module: &mut Module,
    config: &Config,
    categories: &CategoryList,
) -> PassResult<PassSummary> {
    if module.name.is_empty() {
        return Err(PassError::MissingModuleName);
    }
    let module_id = module.module_id();
    info!(
        "instrumenting {} (module id {:#010x}), {} mode",
        module.name, module_id, config.mode
    );

    let abi = RuntimeAbi::declare(module, config.mode);
    let reach = Reachability::compute(module, categories);

    let mut pass = Instrumenter {
        config,
        categories,
        abi,
        reach,
        module_id,
        loc_rng: StdRng::seed_from_u64(u64::from(module_id)),
        ctx_rng: StdRng::seed_from_u64(u64::from(module_id)),
        funcs: SecondaryMap::new(),
        cmp_map: BTreeMap::new(),
        sockets: 0,
    };
    pass.run(module)
}

/// Per-function facts snapshotted before rewriting starts, so callee checks
/// don't have to re-borrow the function table mid-edit.
#[derive(Clone, Default)]
struct FuncInfo {
    name: String,
    intrinsic: bool,
    declaration: bool,
}

struct Instrumenter<'a> {
    config: &'a Config,
    categories: &'a CategoryList,
    abi: RuntimeAbi,
    reach: Reachability,
    module_id: u32,
    /// Generator for block tags and skip decisions; only fast mode draws
    /// from it.
    loc_rng: StdRng,
    /// Generator for call-site ids. Call sites draw in every mode, in the
    /// same order, so the fast and track builds of one module agree on
    /// every context value.
    ctx_rng: StdRng,
    funcs: SecondaryMap<Func, FuncInfo>,
    /// Instrumented comparisons and their ids, consumed by the CFG exporter.
    cmp_map: BTreeMap<(Func, Inst), u32>,
    sockets: u32,
}

impl<'a> Instrumenter<'a> {
    fn run(&mut self, module: &mut Module) -> PassResult<PassSummary> {
        if self.config.mode == Mode::Dfsan {
            return Ok(self.summary(0));
        }

        let cut_edges = if self.config.early_termination.enabled() {
            info!("adding early termination");
            terminate::add_early_termination(
                module,
                &self.reach,
                &self.abi,
                self.config.early_aggressive,
            )
        } else {
            0
        };

        info!("hooking dlopen and dlsym (and variants)");
        for name in ["dlopen", "dlmopen", "dlsym", "dlvsym"] {
            if let Some(f) = module.function_by_name(name) {
                module.functions[f].name = format!("__angora_{name}");
            }
        }

        for (id, func) in module.functions.iter() {
            self.funcs[id] = FuncInfo {
                name: func.name.clone(),
                intrinsic: func.intrinsic,
                declaration: func.is_declaration(),
            };
        }

        let ids: Vec<Func> = module.functions.iter().map(|(id, _)| id).collect();
        for f in ids {
            let info = &self.funcs[f];
            if info.declaration || info.name.starts_with("asan.module") {
                continue;
            }
            unreachable::remove_unreachable_blocks(&mut module.functions[f]);
            self.add_fn_wrap(&mut module.functions[f]);
            self.instrument_function(f, module);
        }
        info!("finished instrumentation");

        if self.config.mode == Mode::Track {
            match &self.config.cfg_out {
                Some(path) => {
                    info!("exporting comparison cfg to {}", path.display());
                    cfg_export::export_cfg(
                        module,
                        &self.cmp_map,
                        &self.reach,
                        self.categories,
                        path,
                    )?;
                }
                None => error!("no cfg output path provided"),
            }
        }

        Ok(self.summary(cut_edges))
    }

    fn summary(&self, cut_edges: u32) -> PassSummary {
        PassSummary {
            module_id: self.module_id,
            mode: self.config.mode,
            sockets: self.sockets,
            cut_edges,
            comparisons: self.cmp_map.len() as u32,
        }
    }

    fn random_block_id(&mut self) -> u32 {
        self.loc_rng.gen::<u32>() % MAP_SIZE
    }

    fn skip_block(&mut self) -> bool {
        self.loc_rng.gen::<u32>() % 100 >= self.config.inst_ratio
    }

    fn random_context_id(&mut self) -> u32 {
        let id = self.ctx_rng.gen::<u32>() % MAP_SIZE;
        if self.config.output_cond_loc {
            debug!("[CONTEXT] {}", id);
        }
        id
    }

    /// The id the id-assignment pass attached to `inst`, 0 if absent.
    fn instruction_id(&self, func: &Function, inst: Inst) -> u32 {
        let id = func.iids[inst];
        if self.config.output_cond_loc {
            debug!("[ID] {} for {} in {}", id, inst, func.name);
        }
        id
    }

    /// Does this instruction's callee belong to `category`? Only call sites
    /// with a known callee can match.
    fn inst_matches(&self, func: &Function, inst: Inst, category: &str) -> bool {
        match func.dfg.call_info(inst) {
            Some(info) => match info.callee {
                Some(callee) => self.categories.contains(&self.funcs[callee].name, category),
                None => false,
            },
            None => false,
        }
    }

    fn instrument_function(&mut self, f: Func, module: &mut Module) {
        let Module {
            ref mut functions,
            ref mut globals,
            ..
        } = *module;
        let func = &mut functions[f];

        let blocks: Vec<Block> = func.layout.blocks().collect();
        for block in blocks {
            let insts: Vec<Inst> = func.layout.block_insts(block).collect();
            let first_point = func.first_insertion_point(block);
            for inst in insts {
                // The unfold-hint cleanup can remove snapshot entries. Guard
                // splits merely move them to the tail block, where they are
                // still fair game.
                if func.layout.inst_block(inst).is_none() {
                    continue;
                }
                if func.nosan[inst] {
                    continue;
                }
                if Some(inst) == first_point {
                    self.count_edge(func, inst);
                }
                match func.dfg.insts[inst].opcode() {
                    Opcode::Call | Opcode::CallIndirect => self.visit_call(f, func, inst),
                    Opcode::Invoke => self.visit_invoke(f, func, inst),
                    Opcode::Brif => self.visit_branch(f, func, inst),
                    Opcode::Switch => self.visit_switch(f, func, globals, inst),
                    Opcode::Icmp | Opcode::Fcmp => self.visit_cmp(f, func, inst),
                    _ => self.visit_exploitation(f, func, inst),
                }
            }
        }
    }

    /// AFL-style edge counting with a never-zero saturating counter, plus
    /// the call-context fold into `prev_loc`.
    fn count_edge(&mut self, func: &mut Function, at: Inst) {
        if self.config.mode != Mode::Fast || self.skip_block() {
            return;
        }
        let cur_loc = self.random_block_id();
        let prev_loc = self.abi.prev_loc.expect("prev_loc is declared in fast mode");
        let map_ptr = self.abi.map_ptr.expect("area ptr is declared in fast mode");

        let mut cur = FuncCursor::new(func).at_inst(at).nosan();
        let prev = cur.ins().global_load(types::I32, prev_loc);
        let map = cur.ins().global_load(Type::Ptr, map_ptr);
        let loc = cur.ins().iconst(types::I32, i64::from(cur_loc));
        let edge = cur.ins().xor(prev, loc);
        let slot = cur.ins().gep(map, edge);
        let counter = cur.ins().load(types::I8, slot);

        // Never-zero counter: a wrap to 0 is bumped back to 1 so a 256th hit
        // cannot erase the edge.
        let one = cur.ins().iconst(types::I8, 1);
        let incremented = cur.ins().add(counter, one);
        let zero = cur.ins().iconst(types::I8, 0);
        let wrapped = cur.ins().icmp(IntCC::Equal, incremented, zero);
        let carry = cur.ins().zext(types::I8, wrapped);
        let incremented = cur.ins().add(incremented, carry);
        cur.ins().store(incremented, slot);

        let shifted = i64::from(cur_loc >> 1);
        let next_prev = if self.config.context.enabled() {
            let ctx = cur.ins().global_load(types::I32, self.abi.context);
            let loc = cur.ins().iconst(types::I32, shifted);
            cur.ins().xor(ctx, loc)
        } else {
            cur.ins().iconst(types::I32, shifted)
        };
        cur.ins().global_store(prev_loc, next_prev);
    }

    /// Fold the call site into `context` at entry and restore the pre-entry
    /// value at every return or resume. Recursion cancels out under xor,
    /// which is the point; a configured depth additionally shifts old
    /// callers away.
    fn add_fn_wrap(&mut self, func: &mut Function) {
        if !self.config.context.enabled() {
            return;
        }
        let entry = match func.entry_block() {
            Some(entry) => entry,
            None => return,
        };
        let at = match func.first_insertion_point(entry) {
            Some(at) => at,
            None => return,
        };

        let mut cur = FuncCursor::new(func).at_inst(at).nosan();
        let call_site = cur.ins().global_load(types::I32, self.abi.call_site);
        let entry_ctx = cur.ins().global_load(types::I32, self.abi.context);
        let folded = match self.config.context {
            ContextMode::Depth(depth) => cur.ins().ushr_imm(entry_ctx, i64::from(32 / depth)),
            _ => entry_ctx,
        };
        let updated = cur.ins().xor(folded, call_site);
        cur.ins().global_store(self.abi.context, updated);

        let blocks: Vec<Block> = func.layout.blocks().collect();
        for block in blocks {
            let term = match func.layout.last_inst(block) {
                Some(term) => term,
                None => continue,
            };
            if matches!(
                func.dfg.insts[term].opcode(),
                Opcode::Return | Opcode::Resume
            ) {
                let mut cur = FuncCursor::new(func).at_inst(term).nosan();
                cur.ins().global_store(self.abi.context, entry_ctx);
                self.reset_indirect_call_context(&mut cur);
            }
        }
    }

    fn reset_indirect_call_context(&self, cur: &mut FuncCursor) {
        let zero = cur.ins().iconst(types::I32, 0);
        cur.ins().global_store(self.abi.ind_call_site, zero);
    }

    fn visit_call(&mut self, f: Func, func: &mut Function, inst: Inst) {
        let callee = match &func.dfg.insts[inst] {
            InstructionData::Call { func: callee, .. } => Some(*callee),
            InstructionData::CallIndirect { .. } => None,
            _ => return,
        };

        if let Some(callee) = callee {
            let info = &self.funcs[callee];
            if info.intrinsic {
                return;
            }
            // Branch-unfolding hints have served their purpose by now.
            if info.name == "__unfold_branch_fn" {
                let unused = match func.dfg.inst_result(inst) {
                    Some(result) => !func.dfg.value_is_used(result),
                    None => true,
                };
                if unused {
                    func.layout.remove_inst(inst);
                }
                return;
            }
        }

        self.process_call(f, func, inst);
    }

    fn visit_invoke(&mut self, f: Func, func: &mut Function, inst: Inst) {
        let callee = match &func.dfg.insts[inst] {
            InstructionData::Invoke { func: callee, .. } => *callee,
            _ => return,
        };
        if self.funcs[callee].intrinsic {
            return;
        }
        self.process_call(f, func, inst);
    }

    /// Every surviving call site gets a fresh call-site id; callees with a
    /// category get their extra tracing first.
    fn process_call(&mut self, f: Func, func: &mut Function, inst: Inst) {
        let callee = func.dfg.call_info(inst).and_then(|info| info.callee);
        if callee.is_some() {
            self.visit_compare_func(func, inst);
            self.visit_exploitation(f, func, inst);
            self.visit_listen_call(func, inst);
        }

        let csid = self.random_context_id();
        let context_enabled = self.config.context.enabled();
        if context_enabled || callee.is_none() {
            let mut cur = FuncCursor::new(func).at_inst(inst).nosan();
            let id = cur.ins().iconst(types::I32, i64::from(csid));
            if context_enabled {
                cur.ins().global_store(self.abi.call_site, id);
            }
            if callee.is_none() {
                cur.ins().global_store(self.abi.ind_call_site, id);
            }
        }
    }

    /// Byte-comparison helpers (`memcmp` and friends) get their pointer
    /// operands and length traced whole in track mode.
    fn visit_compare_func(&mut self, func: &mut Function, inst: Inst) {
        if !self.inst_matches(func, inst, abilist::COMPARE_FUNC) {
            return;
        }
        let cid = self.instruction_id(func, inst);
        if self.config.mode != Mode::Track {
            return;
        }

        let (lhs, rhs, size_arg) = {
            let info = match func.dfg.call_info(inst) {
                Some(info) => info,
                None => return,
            };
            if info.args.len() < 2 {
                return;
            }
            (info.args[0], info.args[1], info.args.get(2).copied())
        };
        if func.dfg.value_type(lhs) != Type::Ptr || func.dfg.value_type(rhs) != Type::Ptr {
            return;
        }

        // The runtime takes a 32-bit length; a 64-bit size_t constant above
        // that is silently truncated below, which deserves a complaint.
        if let Some(size) = size_arg {
            if let Some((_, imm)) = func.dfg.value_as_iconst(size) {
                if imm as u64 > u64::from(u32::MAX) {
                    warn!(
                        "compare-function length {} exceeds 32 bits and will be truncated",
                        imm
                    );
                }
            }
        }

        let trace = self.abi.trace_fn_tt.expect("trace_fn_tt is declared in track mode");
        let mut cur = FuncCursor::new(func).at_inst(inst).nosan();
        let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
        let size = match size_arg {
            Some(size) => match cur.func.dfg.value_type(size) {
                Type::Int(bits) if bits < 32 => cur.ins().zext(types::I32, size),
                Type::Int(bits) if bits > 32 => cur.ins().trunc(types::I32, size),
                Type::Int(_) => size,
                _ => cur.ins().iconst(types::I32, 0),
            },
            None => cur.ins().iconst(types::I32, 0),
        };
        let ctx = cur.ins().global_load(types::I32, self.abi.context);
        let call_site = cur.ins().global_load(types::I32, self.abi.ind_call_site);
        cur.ins()
            .call(trace, None, &[cid_v, ctx, call_site, size, lhs, rhs]);
    }

    /// Socket-readiness calls get the runtime signal inserted right after
    /// them so the fuzzer knows the server is accepting input.
    fn visit_listen_call(&mut self, func: &mut Function, inst: Inst) {
        if !self.inst_matches(func, inst, abilist::SOCKET_READY) {
            return;
        }
        info!("found a socket call site in {}", func.name);
        self.sockets += 1;

        if func.dfg.insts[inst].opcode().is_terminator() {
            return;
        }
        let next = match func.layout.next_inst(inst) {
            Some(next) => next,
            None => return,
        };
        let mut cur = FuncCursor::new(func).at_inst(next);
        cur.ins().call(self.abi.listen_ready, None, &[]);
    }

    fn visit_cmp(&mut self, f: Func, func: &mut Function, inst: Inst) {
        let insert_point = match func.layout.next_inst(inst) {
            Some(next) => next,
            None => return,
        };
        let iid = self.instruction_id(func, inst);
        self.cmp_map.insert((f, inst), iid);
        self.process_cmp(func, inst, iid, insert_point);
    }

    fn visit_branch(&mut self, f: Func, func: &mut Function, inst: Inst) {
        let cond = match &func.dfg.insts[inst] {
            InstructionData::Branch { cond, .. } => *cond,
            _ => return,
        };
        if !func.dfg.value_type(cond).is_int() || func.dfg.value_as_iconst(cond).is_some() {
            return;
        }
        // Conditions that are comparison results were traced at the
        // comparison; this catches and/or/phi/call conditions.
        if let ValueDef::Result(def) = func.dfg.value_def(cond) {
            if func.dfg.insts[def].opcode().is_cmp() {
                return;
            }
        }
        let iid = self.instruction_id(func, inst);
        self.cmp_map.insert((f, inst), iid);
        self.process_bool_cmp(func, cond, iid, inst);
    }

    fn process_cmp(&mut self, func: &mut Function, inst: Inst, cid: u32, insert_point: Inst) {
        let (args, predicate) = match &func.dfg.insts[inst] {
            InstructionData::IntCompare { cond, args } => (*args, cond.predicate()),
            InstructionData::FloatCompare { cond, args } => (*args, cond.predicate()),
            _ => return,
        };
        let op_ty = func.dfg.value_type(args[0]);
        let supported = matches!(op_ty, Type::Int(bits) if bits <= 64)
            || op_ty.is_float()
            || op_ty.is_ptr();
        let result = match func.dfg.inst_result(inst) {
            Some(result) => result,
            None => return,
        };
        if !supported {
            self.process_bool_cmp(func, result, cid, insert_point);
            return;
        }
        let num_bytes = match op_ty {
            Type::Ptr => 8,
            other => other.bits() / 8,
        };
        if num_bytes == 0 {
            return;
        }

        match self.config.mode {
            Mode::Fast => {
                let then_block = self.fast_guard(func, cid, insert_point);
                let jump = func
                    .layout
                    .first_inst(then_block)
                    .expect("guard block has a terminator");
                let mut cur = FuncCursor::new(func).at_inst(jump).nosan();
                let lhs = cast_arg(&mut cur, args[0]);
                let rhs = cast_arg(&mut cur, args[1]);
                let outcome = cur.ins().zext(types::I32, result);
                let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
                let ctx = cur.ins().global_load(types::I32, self.abi.context);
                let trace = self.abi.trace_cmp.expect("trace_cmp is declared in fast mode");
                cur.ins()
                    .call(trace, Some(types::I32), &[outcome, cid_v, ctx, lhs, rhs]);
            }
            Mode::Track => {
                let mut predicate = predicate;
                if let Some((const_ty, imm)) = func.dfg.value_as_iconst(args[1]) {
                    if const_is_negative(const_ty, imm) {
                        predicate |= COND_SIGN_MASK;
                    }
                }
                let trace = self
                    .abi
                    .trace_cmp_tt
                    .expect("trace_cmp_tt is declared in track mode");
                let mut cur = FuncCursor::new(func).at_inst(insert_point).nosan();
                let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
                let size = cur.ins().iconst(types::I32, i64::from(num_bytes));
                let predicate = cur.ins().iconst(types::I32, i64::from(predicate));
                let outcome = cur.ins().zext(types::I32, result);
                let lhs = cast_arg(&mut cur, args[0]);
                let rhs = cast_arg(&mut cur, args[1]);
                let ctx = cur.ins().global_load(types::I32, self.abi.context);
                let call_site = cur.ins().global_load(types::I32, self.abi.ind_call_site);
                cur.ins().call(
                    trace,
                    None,
                    &[cid_v, ctx, call_site, size, predicate, lhs, rhs, outcome],
                );
                self.reset_indirect_call_context(&mut cur);
            }
            Mode::Dfsan => {}
        }
    }

    /// Conditions that aren't comparisons become a 1-byte equality trace
    /// against 1.
    fn process_bool_cmp(&mut self, func: &mut Function, cond: Value, cid: u32, insert_point: Inst) {
        match func.dfg.value_type(cond) {
            Type::Int(bits) if bits <= 32 => {}
            _ => return,
        }

        match self.config.mode {
            Mode::Fast => {
                let then_block = self.fast_guard(func, cid, insert_point);
                let jump = func
                    .layout
                    .first_inst(then_block)
                    .expect("guard block has a terminator");
                let mut cur = FuncCursor::new(func).at_inst(jump).nosan();
                let outcome = cur.ins().zext(types::I32, cond);
                let lhs = cur.ins().zext(types::I64, outcome);
                let rhs = cur.ins().iconst(types::I64, 1);
                let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
                let ctx = cur.ins().global_load(types::I32, self.abi.context);
                let trace = self.abi.trace_cmp.expect("trace_cmp is declared in fast mode");
                cur.ins()
                    .call(trace, Some(types::I32), &[outcome, cid_v, ctx, lhs, rhs]);
            }
            Mode::Track => {
                let trace = self
                    .abi
                    .trace_cmp_tt
                    .expect("trace_cmp_tt is declared in track mode");
                let mut cur = FuncCursor::new(func).at_inst(insert_point).nosan();
                let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
                let size = cur.ins().iconst(types::I32, 1);
                let predicate = cur
                    .ins()
                    .iconst(types::I32, i64::from(COND_EQ_OP | COND_BOOL_MASK));
                let outcome = cur.ins().zext(types::I32, cond);
                let lhs = cur.ins().zext(types::I64, outcome);
                let rhs = cur.ins().iconst(types::I64, 1);
                let ctx = cur.ins().global_load(types::I32, self.abi.context);
                let call_site = cur.ins().global_load(types::I32, self.abi.ind_call_site);
                cur.ins().call(
                    trace,
                    None,
                    &[cid_v, ctx, call_site, size, predicate, lhs, rhs, outcome],
                );
                self.reset_indirect_call_context(&mut cur);
            }
            Mode::Dfsan => {}
        }
    }

    fn visit_switch(
        &mut self,
        f: Func,
        func: &mut Function,
        globals: &mut PrimaryMap<Global, GlobalData>,
        inst: Inst,
    ) {
        let (cond, table) = match &func.dfg.insts[inst] {
            InstructionData::Switch { cond, table, .. } => (*cond, *table),
            _ => return,
        };
        let bits = match func.dfg.value_type(cond).int_bits() {
            Some(bits) => u32::from(bits),
            None => return,
        };
        if func.dfg.value_as_iconst(cond).is_some() {
            return;
        }
        // The trace carries whole bytes; oddly sized conditions are skipped.
        if bits / 8 == 0 || bits % 8 != 0 {
            return;
        }

        let iid = self.instruction_id(func, inst);
        self.cmp_map.insert((f, inst), iid);

        match self.config.mode {
            Mode::Fast => {
                let then_block = self.fast_guard(func, iid, inst);
                let jump = func
                    .layout
                    .first_inst(then_block)
                    .expect("guard block has a terminator");
                let mut cur = FuncCursor::new(func).at_inst(jump).nosan();
                let cond_ext = cur.ins().zext(types::I64, cond);
                let cid_v = cur.ins().iconst(types::I32, i64::from(iid));
                let ctx = cur.ins().global_load(types::I32, self.abi.context);
                let trace = self
                    .abi
                    .trace_switch
                    .expect("trace_switch is declared in fast mode");
                cur.ins()
                    .call(trace, Some(types::I64), &[cid_v, ctx, cond_ext]);
            }
            Mode::Track => {
                let case_values: Vec<u64> = func.switch_tables[table]
                    .cases
                    .iter()
                    .map(|&(value, _)| value)
                    .collect();
                let n_cases = case_values.len();
                let array = globals.push(GlobalData {
                    name: "__angora_switch_arg_values".to_string(),
                    kind: GlobalKind::Array64 { elems: case_values },
                    linkage: Linkage::Internal,
                    tls: false,
                });

                let trace = self
                    .abi
                    .trace_switch_tt
                    .expect("trace_switch_tt is declared in track mode");
                let mut cur = FuncCursor::new(func).at_inst(inst).nosan();
                let cid_v = cur.ins().iconst(types::I32, i64::from(iid));
                let size = cur.ins().iconst(types::I32, i64::from(bits / 8));
                let n = cur.ins().iconst(types::I32, n_cases as i64);
                let array_ptr = cur.ins().global_addr(array);
                let cond_ext = cur.ins().zext(types::I64, cond);
                let ctx = cur.ins().global_load(types::I32, self.abi.context);
                let call_site = cur.ins().global_load(types::I32, self.abi.ind_call_site);
                cur.ins().call(
                    trace,
                    None,
                    &[cid_v, ctx, call_site, size, cond_ext, n, array_ptr],
                );
                self.reset_indirect_call_context(&mut cur);
            }
            Mode::Dfsan => {}
        }
    }

    /// Operands the exploitation list tags (by callee name, `all` or `i<k>`)
    /// get their concrete values traced in track mode.
    fn visit_exploitation(&mut self, _f: Func, func: &mut Function, inst: Inst) {
        let exploit_all = self.inst_matches(func, inst, abilist::EXPLOIT_ALL);

        let args: SmallVec<[Value; 4]> = match func.dfg.call_info(inst) {
            Some(info) => info.args.iter().copied().collect(),
            None => func.dfg.insts[inst].arguments(),
        };
        let op_tag = COND_EXPLOIT_MASK | func.dfg.insts[inst].opcode().number();

        for (index, &param) in args.iter().take(abilist::EXPLOIT_ARG.len()).enumerate() {
            if !(exploit_all || self.inst_matches(func, inst, abilist::EXPLOIT_ARG[index])) {
                continue;
            }
            let ty = func.dfg.value_type(param);
            if !(ty.is_int() || ty.is_ptr()) {
                continue;
            }
            if func.dfg.value_as_iconst(param).is_some() {
                continue;
            }
            let size = if ty.is_ptr() {
                8
            } else {
                let bits = ty.bits();
                if bits > 64 {
                    continue;
                }
                bits / 8
            };
            let cid = self.instruction_id(func, inst);
            if self.config.mode != Mode::Track {
                continue;
            }

            let trace = self
                .abi
                .trace_exploit_tt
                .expect("trace_exploit_val_tt is declared in track mode");
            let mut cur = FuncCursor::new(func).at_inst(inst).nosan();
            let value = if ty.is_ptr() {
                cur.ins().ptrtoint(types::I64, param)
            } else {
                cur.ins().zext(types::I64, param)
            };
            let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
            let size_v = cur.ins().iconst(types::I32, i64::from(size));
            let op_v = cur.ins().iconst(types::I32, i64::from(op_tag));
            let ctx = cur.ins().global_load(types::I32, self.abi.context);
            let call_site = cur.ins().global_load(types::I32, self.abi.ind_call_site);
            cur.ins()
                .call(trace, None, &[cid_v, ctx, call_site, size_v, op_v, value]);
        }
    }

    /// Fast-mode traces only fire for the comparison the fuzzer is currently
    /// tracking: guard with `cid == __angora_cond_cmpid` on a split branch.
    fn fast_guard(&mut self, func: &mut Function, cid: u32, before: Inst) -> Block {
        let cond_cmpid = self
            .abi
            .cond_cmpid
            .expect("cond_cmpid is declared in fast mode");
        let mut cur = FuncCursor::new(func).at_inst(before).nosan();
        let cid_v = cur.ins().iconst(types::I32, i64::from(cid));
        let tracked = cur.ins().global_load(types::I32, cond_cmpid);
        let hit = cur.ins().icmp(IntCC::Equal, cid_v, tracked);
        split_and_insert_if_then(func, hit, before)
    }
}

/// Widen a comparison operand to the u64 slot of the trace calls.
fn cast_arg(cur: &mut FuncCursor, value: Value) -> Value {
    match cur.func.dfg.value_type(value) {
        Type::F32 => {
            let int = cur.ins().fptoui(types::I32, value);
            cur.ins().zext(types::I64, int)
        }
        Type::F64 => cur.ins().fptoui(types::I64, value),
        Type::Ptr => cur.ins().ptrtoint(types::I64, value),
        Type::Int(bits) if bits < 64 => cur.ins().zext(types::I64, value),
        _ => value,
    }
}

fn const_is_negative(ty: Type, imm: i64) -> bool {
    match ty {
        Type::Int(64) => imm < 0,
        Type::Int(bits) if bits >= 1 && bits < 64 => (imm >> (bits - 1)) & 1 == 1,
        _ => false,
    }
}

/// Split the block at `before` and wire in a conditionally executed block:
/// the original block branches on `cond` to either the new block or the
/// tail, and the new block jumps to the tail. Phis in the moved terminator's
/// successors are renamed to the tail. Returns the conditional block.
fn split_and_insert_if_then(func: &mut Function, cond: Value, before: Inst) -> Block {
    let old_block = func
        .layout
        .inst_block(before)
        .expect("split point is in the layout");
    let tail = func.dfg.make_block();
    func.layout.split_block(tail, before);
    let then_block = func.dfg.make_block();
    func.layout.insert_block_after(then_block, old_block);

    {
        let mut cur = FuncCursor::new(func).at_bottom(then_block).nosan();
        cur.ins().jump(tail);
        let mut cur = FuncCursor::new(func).at_bottom(old_block).nosan();
        cur.ins().brif(cond, then_block, tail);
    }

    let moved_term = func.terminator(tail);
    let successors = func.branch_targets(moved_term);
    for succ in successors {
        func.replace_phi_pred(succ, old_block, tail);
    }
    then_block
}

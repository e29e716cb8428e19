//! The module call graph and its strongly connected components.
//!
//! Only direct calls contribute edges; indirect call sites have no callee to
//! point at and are handled conservatively by the analyses that consume this
//! graph.

use cranelift_entity::{EntityRef, SecondaryMap};

use crate::ir::{Func, Module};

/// Direct-call graph over the functions of a module.
pub struct CallGraph {
    callees: SecondaryMap<Func, Vec<Func>>,
}

impl CallGraph {
    /// Compute the call graph of `module`.
    pub fn compute(module: &Module) -> Self {
        let mut callees: SecondaryMap<Func, Vec<Func>> = SecondaryMap::new();
        for (id, func) in module.functions.iter() {
            for block in func.layout.blocks() {
                for inst in func.layout.block_insts(block) {
                    if let Some(info) = func.dfg.call_info(inst) {
                        if let Some(callee) = info.callee {
                            if !callees[id].contains(&callee) {
                                callees[id].push(callee);
                            }
                        }
                    }
                }
            }
        }
        Self { callees }
    }

    /// The direct callees of `func`.
    pub fn callees(&self, func: Func) -> &[Func] {
        &self.callees[func]
    }

    /// The strongly connected components of the call graph, callees before
    /// callers (Tarjan emission order), so interprocedural analyses can
    /// resolve a callee's component before any of its callers.
    pub fn sccs(&self, module: &Module) -> Vec<Vec<Func>> {
        Tarjan::new(self, module.functions.len()).run(module)
    }
}

struct Tarjan<'a> {
    graph: &'a CallGraph,
    index: Vec<Option<u32>>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<Func>,
    next_index: u32,
    output: Vec<Vec<Func>>,
}

impl<'a> Tarjan<'a> {
    fn new(graph: &'a CallGraph, num_funcs: usize) -> Self {
        Self {
            graph,
            index: vec![None; num_funcs],
            lowlink: vec![0; num_funcs],
            on_stack: vec![false; num_funcs],
            stack: Vec::new(),
            next_index: 0,
            output: Vec::new(),
        }
    }

    fn run(mut self, module: &Module) -> Vec<Vec<Func>> {
        for (id, _) in module.functions.iter() {
            if self.index[id.index()].is_none() {
                self.visit(id);
            }
        }
        self.output
    }

    fn open(&mut self, node: Func) {
        let n = node.index();
        self.index[n] = Some(self.next_index);
        self.lowlink[n] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[n] = true;
    }

    // Iterative so deep call chains can't blow the stack.
    fn visit(&mut self, root: Func) {
        let graph = self.graph;
        let mut frames: Vec<(Func, usize)> = vec![(root, 0)];
        self.open(root);
        while let Some(&(node, succ_idx)) = frames.last() {
            let callees = graph.callees(node);
            if let Some(&succ) = callees.get(succ_idx) {
                frames.last_mut().expect("frame").1 += 1;
                let s = succ.index();
                match self.index[s] {
                    None => {
                        self.open(succ);
                        frames.push((succ, 0));
                    }
                    Some(succ_index) => {
                        if self.on_stack[s] {
                            let n = node.index();
                            self.lowlink[n] = self.lowlink[n].min(succ_index);
                        }
                    }
                }
            } else {
                frames.pop();
                let n = node.index();
                if let Some(&(parent, _)) = frames.last() {
                    let p = parent.index();
                    self.lowlink[p] = self.lowlink[p].min(self.lowlink[n]);
                }
                if Some(self.lowlink[n]) == self.index[n] {
                    let mut component = Vec::new();
                    loop {
                        let member = self.stack.pop().expect("scc stack underflow");
                        self.on_stack[member.index()] = false;
                        component.push(member);
                        if member == node {
                            break;
                        }
                    }
                    self.output.push(component);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FuncCursor;
    use crate::ir::{Function, Module, Signature};

    fn call_only_body(module: &mut Module, caller: Func, callees: &[Func]) {
        let name = module.functions[caller].name.clone();
        let mut func = std::mem::replace(
            &mut module.functions[caller],
            Function::with_name_signature(name, Signature::default()),
        );
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        {
            let mut cur = FuncCursor::new(&mut func).at_bottom(block);
            for &callee in callees {
                cur.ins().call(callee, None, &[]);
            }
            cur.ins().return_(None);
        }
        module.functions[caller] = func;
    }

    #[test]
    fn callees_before_callers() {
        let mut module = Module::new("m.c", 0);
        let main = module.declare_function("main", Signature::default());
        let helper = module.declare_function("helper", Signature::default());
        let leaf = module.declare_function("leaf", Signature::default());
        call_only_body(&mut module, main, &[helper]);
        call_only_body(&mut module, helper, &[leaf]);
        call_only_body(&mut module, leaf, &[]);

        let cg = CallGraph::compute(&module);
        assert_eq!(cg.callees(main), &[helper]);
        let sccs = cg.sccs(&module);
        let pos = |f: Func| sccs.iter().position(|scc| scc.contains(&f)).unwrap();
        assert!(pos(leaf) < pos(helper));
        assert!(pos(helper) < pos(main));
    }

    #[test]
    fn recursion_forms_one_component() {
        let mut module = Module::new("m.c", 0);
        let even = module.declare_function("even", Signature::default());
        let odd = module.declare_function("odd", Signature::default());
        call_only_body(&mut module, even, &[odd]);
        call_only_body(&mut module, odd, &[even]);

        let cg = CallGraph::compute(&module);
        let sccs = cg.sccs(&module);
        let scc = sccs.iter().find(|scc| scc.contains(&even)).unwrap();
        assert_eq!(scc.len(), 2);
        assert!(scc.contains(&odd));
    }
}

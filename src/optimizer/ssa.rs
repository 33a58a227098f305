//! SSA construction and elimination.
//!
//! Construction is the classic two-step: φ placement driven by dominance
//! frontiers, then variable renaming along an iterative preorder DFS with
//! per-variable version stacks. Member variables enter the routine with
//! version 0 and no defining instruction. Elimination strips the φ run
//! from every block; the back-end lowers φ via parallel moves.

use crate::compiler::scope::DefId;
use crate::ir::{analysis, BlockId, InstId};
use crate::optimizer::Optimizer;
use crate::utils::IndexSet;

#[derive(Debug, Clone, Copy)]
struct VersionFrame {
    version: usize,
    source: Option<InstId>,
}

struct SsaBuilder {
    /// per-variable version stack, indexed by variable map index
    rename: Vec<Vec<VersionFrame>>,
}

impl SsaBuilder {
    fn new(om: &Optimizer) -> Self {
        let mut rename = vec![Vec::new(); om.profile.num_variables];

        // members are not defined inside the CFG but are valid on entry,
        // defaulting to version 0
        for stack in rename.iter_mut().take(om.profile.num_members) {
            stack.push(VersionFrame {
                version: 0,
                source: None,
            });
        }

        SsaBuilder { rename }
    }

    fn top_version(&self, v: usize) -> usize {
        self.rename[v].last().map(|f| f.version).unwrap_or(0)
    }

    fn top_source(&self, v: usize) -> Option<InstId> {
        self.rename[v].last().and_then(|f| f.source)
    }

    /// Pushes the next version for a definition site and returns it.
    fn generate_version(&mut self, v: usize, source: InstId) -> usize {
        let version = match self.rename[v].last() {
            Some(frame) => frame.version + 1,
            None => 0,
        };

        self.rename[v].push(VersionFrame {
            version,
            source: Some(source),
        });

        version
    }

    fn pop_version(&mut self, v: usize) {
        self.rename[v].pop();
    }
}

/// Places φ instructions for one variable: a worklist over the blocks
/// defining it, expanding through their dominance frontiers.
fn place_phi(
    om: &mut Optimizer,
    variable: DefId,
    df: &[IndexSet],
) {
    let num_nodes = om.cfg.blocks.len();
    let mut worklist = IndexSet::new(num_nodes);
    let mut inserted = vec![false; num_nodes];
    let mut added = vec![false; num_nodes];

    // initialize with every block containing a definition of the variable
    for n in 0..num_nodes {
        let block = BlockId::from_index(n);
        let defines = om
            .cfg
            .block_insts(block)
            .any(|id| om.cfg.inst(id).lvalue.as_var_def(om.defs) == Some(variable));

        if defines {
            worklist.add(n);
            added[n] = true;
        }
    }

    while let Some(n) = worklist.pop() {
        for m in df[n].iter().collect::<Vec<_>>() {
            if inserted[m] {
                continue;
            }

            om.phi_place(BlockId::from_index(m), variable);
            inserted[m] = true;

            if !added[m] {
                added[m] = true;
                worklist.add(m);
            }
        }
    }
}

/// Renames variables along an iterative preorder DFS.
///
/// On entry to a block: operands first (right-hand side reads the current
/// top version), then the lvalue generates a new version; outbound edges
/// fill their successor φ operand slot with the defining instruction of
/// the current top version. On exit, every version defined in the block is
/// popped.
fn rename_variables(om: &mut Optimizer, builder: &mut SsaBuilder) {
    let num_nodes = om.cfg.blocks.len();
    let Some(entry) = om.cfg.entry else {
        return;
    };

    let mut stack = Vec::with_capacity(num_nodes);
    let mut visited = vec![false; num_nodes];
    let mut nc = vec![0usize; num_nodes];

    stack.push(entry);
    visited[entry.index()] = true;

    while let Some(cur) = stack.last().copied() {
        if nc[cur.index()] == 0 {
            // preorder: name generation on this block
            let insts: Vec<InstId> = om.cfg.block_insts(cur).collect();
            for id in insts {
                let (op1, op2, lvalue) = {
                    let inst = om.cfg.inst(id);
                    (inst.operand1, inst.operand2, inst.lvalue)
                };

                // order matters: right-hand side first
                if let Some(def) = op1.as_var_def(om.defs) {
                    let v = om.varmap_index(def);
                    let ver = builder.top_version(v);
                    if let crate::ir::Reference::Def { ver: slot, .. } =
                        &mut om.cfg.inst_mut(id).operand1
                    {
                        *slot = ver;
                    }
                }
                if let Some(def) = op2.as_var_def(om.defs) {
                    let v = om.varmap_index(def);
                    let ver = builder.top_version(v);
                    if let crate::ir::Reference::Def { ver: slot, .. } =
                        &mut om.cfg.inst_mut(id).operand2
                    {
                        *slot = ver;
                    }
                }
                if let Some(def) = lvalue.as_var_def(om.defs) {
                    let v = om.varmap_index(def);
                    let ver = builder.generate_version(v, id);
                    if let crate::ir::Reference::Def { ver: slot, .. } =
                        &mut om.cfg.inst_mut(id).lvalue
                    {
                        *slot = ver;
                    }
                }
            }

            // preorder: φ argument insertion on successors
            let out_edges: Vec<_> = om
                .cfg
                .block(cur)
                .out_edges
                .iter()
                .map(|e| {
                    let edge = om.cfg.edge(*e);
                    (edge.to, edge.to_phi_operand_index)
                })
                .collect();

            for (succ, slot) in out_edges {
                let phis: Vec<InstId> = om
                    .cfg
                    .block_insts(succ)
                    .take_while(|id| om.cfg.inst(*id).is_phi())
                    .collect();

                for phi in phis {
                    // value-join φ operands (ternary) are preset and not
                    // bound to a variable
                    let Some(def) =
                        om.cfg.inst(phi).lvalue.as_var_def(om.defs)
                    else {
                        continue;
                    };

                    let v = om.varmap_index(def);
                    let source = builder.top_source(v);
                    om.cfg.inst_mut(phi).phi_operands[slot] = source;
                }
            }
        }

        // locate next unvisited child
        let succs: Vec<BlockId> = om.cfg.successors(cur).collect();
        while nc[cur.index()] < succs.len()
            && visited[succs[nc[cur.index()]].index()]
        {
            nc[cur.index()] += 1;
        }

        if nc[cur.index()] >= succs.len() {
            // postorder: pop every version defined in this block
            let insts: Vec<InstId> = om.cfg.block_insts(cur).collect();
            for id in insts {
                if let Some(def) =
                    om.cfg.inst(id).lvalue.as_var_def(om.defs)
                {
                    let v = om.varmap_index(def);
                    builder.pop_version(v);
                }
            }

            stack.pop();
        } else {
            let next = succs[nc[cur.index()]];
            stack.push(next);
            visited[next.index()] = true;
            nc[cur.index()] += 1;
        }
    }
}

/// Converts the CFG to SSA: dominance frontiers → φ placement → renaming.
pub fn build(om: &mut Optimizer) {
    let postorder = analysis::node_order(om.cfg, analysis::DfsOrder::Postorder);
    let idom = analysis::idom(om.cfg, &postorder);
    let df = analysis::dominance_frontiers(om.cfg, &idom);

    let mut builder = SsaBuilder::new(om);

    // φ placement for every variable in the routine's universe
    let variables: Vec<Option<DefId>> = (0..om.profile.num_variables)
        .map(|v| {
            if om.varmap_is_member(v) {
                om.member_defs.get(v).copied()
            } else {
                om.local_defs.get(om.varmap_index_to_lid(v)).copied()
            }
        })
        .collect();

    for variable in variables.into_iter().flatten() {
        place_phi(om, variable, &df);
    }

    rename_variables(om, &mut builder);
}

/// Strips every φ instruction; the blocks keep their edges and operand
/// slots stay with the predecessors for the back-end's parallel moves.
pub fn eliminate(om: &mut Optimizer) {
    for n in 0..om.cfg.blocks.len() {
        let block = BlockId::from_index(n);

        loop {
            let first = om.cfg.block(block).inst_first;
            match first {
                Some(id) if om.cfg.inst(id).is_phi() => {
                    om.cfg.unlink_inst(id);
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;
    use crate::compiler::resolver::Resolver;
    use crate::compiler::scope::Definition;
    use crate::ir::walk::Walker;
    use crate::ir::{Opcode, Reference};

    struct Built {
        ctx: crate::compiler::scope::SymbolContext,
        code: crate::ir::Cfg,
        locals: Vec<crate::compiler::scope::DefId>,
    }

    fn build_method(source: &str, mangled: &str) -> Built {
        let mut parser = Parser::new(source);
        let root = parser.parse();
        let mut log = parser.log;
        assert!(!log.has_errors(), "{}", log.render("t"));

        let mut resolver = Resolver::new(source, &parser.ast);
        resolver.resolve(&mut log, root);

        let mut walker = Walker::new(source, &parser.ast, resolver.ctx);
        walker.run(&mut log);
        let mut ctx = walker.ctx;

        let method_id = *ctx.top_levels[0].members.get(mangled).unwrap();
        let member_defs: Vec<_> = {
            let mut m: Vec<_> = ctx.top_levels[0]
                .members
                .values()
                .copied()
                .filter(|id| {
                    matches!(ctx.defs.get(*id), Definition::Variable(_))
                })
                .collect();
            m.sort_by_key(|id| {
                ctx.defs.get(*id).as_variable().unwrap().ordinal
            });
            m
        };

        let (mut code, locals) = {
            let m = ctx.defs.get_mut(method_id).as_method_mut().unwrap();
            (m.code.take().unwrap(), m.locals.clone())
        };

        {
            let mut om = crate::optimizer::Optimizer::attach(
                &mut code,
                &mut ctx.defs,
                member_defs,
                locals.clone(),
                8,
            );
            om.apply_profile(&om.profile.clone());
            build(&mut om);
        }

        Built { ctx, code, locals }
    }

    fn versions_of(built: &Built, name: &str) -> Vec<usize> {
        let mut versions = Vec::new();

        for inst in &built.code.insts {
            if inst.block.is_none() {
                continue;
            }
            if let Reference::Def { def, ver } = inst.lvalue {
                let var = built.ctx.defs.get(def).as_variable().unwrap();
                if var.name == name {
                    versions.push(ver);
                }
            }
        }

        versions
    }

    #[test]
    fn member_write_bumps_past_entry_version() {
        // x is a member: version 0 on entry, the write defines version 1
        let built = build_method(
            "class C { int x; int f(int a) { x = a + 1; return x; } }",
            "fI",
        );

        assert_eq!(versions_of(&built, "x"), vec![1]);

        // the read of x after the write sees version 1
        let store = built
            .code
            .insts
            .iter()
            .find(|i| {
                i.block.is_some()
                    && i.op == Opcode::Store
                    && matches!(i.operand1, Reference::Def { .. })
            })
            .expect("return value store");
        assert!(matches!(store.operand1, Reference::Def { ver: 1, .. }));
    }

    #[test]
    fn loop_variable_gets_phi_with_predecessor_alignment() {
        let built = build_method(
            "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }",
            "fI",
        );

        let cfg = &built.code;

        // exactly one φ, placed at the loop header
        let phis: Vec<_> = cfg
            .insts
            .iter()
            .enumerate()
            .filter(|(_, i)| i.block.is_some() && i.op == Opcode::Phi)
            .collect();
        assert_eq!(phis.len(), 1);

        let (_, phi) = phis[0];
        let header = phi.block.unwrap();

        // arity equals the header's inbound edge count
        assert_eq!(
            phi.phi_operands.len(),
            cfg.block(header).in_edges.len()
        );

        // the slot fed by the back edge holds the body's definition; the
        // entry-path slot has no defining instruction (parameter entry)
        for edge_id in &cfg.block(header).in_edges {
            let edge = cfg.edge(*edge_id);
            let operand = phi.phi_operands[edge.to_phi_operand_index];

            if edge.kind == crate::ir::EdgeKind::Jump {
                let source = operand.expect("back edge carries a def");
                assert!(matches!(
                    cfg.inst(source).lvalue,
                    Reference::Def { .. }
                ));
            }
        }
    }

    #[test]
    fn ssa_versions_are_unique_per_variable() {
        let built = build_method(
            "class C { int f(int a) { a = a + 1; a = a + 2; int b = a; return b; } }",
            "fI",
        );

        let versions = versions_of(&built, "a");
        let mut dedup = versions.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(versions.len(), dedup.len());
    }

    #[test]
    fn rebuilding_ssa_is_a_no_op() {
        let source =
            "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }";
        let built = build_method(source, "fI");

        let phi_count = built
            .code
            .insts
            .iter()
            .filter(|i| i.block.is_some() && i.op == Opcode::Phi)
            .count();

        // run the builder again over the already-SSA graph with the same
        // variable universe
        let mut ctx = built.ctx;
        let mut code = built.code;
        let locals = built.locals;
        {
            let mut om = crate::optimizer::Optimizer::attach(
                &mut code,
                &mut ctx.defs,
                Vec::new(),
                locals,
                8,
            );
            om.apply_profile(&om.profile.clone());
            build(&mut om);
        }

        let phi_count_after = code
            .insts
            .iter()
            .filter(|i| i.block.is_some() && i.op == Opcode::Phi)
            .count();

        assert_eq!(phi_count, phi_count_after);
    }
}

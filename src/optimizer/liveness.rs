//! Live-variable analysis over individual instructions.
//!
//! Worklist dataflow on the instruction graph: the successor of an
//! instruction is the next one in its block, or the first instruction of
//! every successor block at a block boundary. Empty blocks are crossed
//! transitively in both directions.
//!
//! `out(s) = ∪ in(succ)`, `in(s) = (out(s) \ def(s)) ∪ use(s)`.

use crate::ir::{BlockId, Cfg, InstId};
use crate::optimizer::Optimizer;
use crate::utils::IndexSet;

/// First instructions reachable from the start of `block`, looking
/// through empty blocks.
fn first_insts_from(
    cfg: &Cfg,
    block: BlockId,
    visited: &mut Vec<bool>,
    out: &mut Vec<InstId>,
) {
    if visited[block.index()] {
        return;
    }
    visited[block.index()] = true;

    match cfg.block(block).inst_first {
        Some(inst) => out.push(inst),
        None => {
            for succ in cfg.successors(block).collect::<Vec<_>>() {
                first_insts_from(cfg, succ, visited, out);
            }
        }
    }
}

/// Last instructions leading into the start of `block`, looking through
/// empty predecessor blocks.
fn last_insts_into(
    cfg: &Cfg,
    block: BlockId,
    visited: &mut Vec<bool>,
    out: &mut Vec<InstId>,
) {
    if visited[block.index()] {
        return;
    }
    visited[block.index()] = true;

    for pred in cfg.predecessors(block).collect::<Vec<_>>() {
        match cfg.block(pred).inst_last {
            Some(inst) => out.push(inst),
            None => last_insts_into(cfg, pred, visited, out),
        }
    }
}

pub fn analyze(om: &mut Optimizer) {
    let num_variables = om.profile.num_variables;
    let num_instructions = om.instructions.len();

    for item in om.instructions.iter_mut() {
        item.live_in = IndexSet::new(num_variables);
        item.live_out = IndexSet::new(num_variables);
    }

    let mut worklist = IndexSet::new_filled(num_instructions);

    while let Some(index) = worklist.pop() {
        let inst_id = om.instructions[index].inst;
        let (next, prev, block) = {
            let inst = om.cfg.inst(inst_id);
            (inst.next, inst.prev, inst.block.expect("linked instruction"))
        };

        let old_in = om.instructions[index].live_in.clone();

        // out(s) = union of in over successor instructions
        let mut live_out = IndexSet::new(num_variables);
        match next {
            Some(next) => {
                live_out.union(&om.instructions[om.cfg.inst(next).id].live_in);
            }
            None => {
                let mut firsts = Vec::new();
                let mut visited = vec![false; om.cfg.blocks.len()];
                visited[block.index()] = true;
                for succ in om.cfg.successors(block).collect::<Vec<_>>() {
                    first_insts_from(om.cfg, succ, &mut visited, &mut firsts);
                }
                for succ_inst in firsts {
                    live_out.union(
                        &om.instructions[om.cfg.inst(succ_inst).id].live_in,
                    );
                }
            }
        }

        // in(s) = (out(s) \ def(s)) ∪ use(s)
        let mut live_in = live_out.clone();
        live_in.subtract(&om.instructions[index].defs);
        live_in.union(&om.instructions[index].uses);

        let changed = live_in != old_in;
        om.instructions[index].live_in = live_in;
        om.instructions[index].live_out = live_out;

        if changed {
            match prev {
                Some(prev) => {
                    worklist.add(om.cfg.inst(prev).id);
                }
                None => {
                    let mut lasts = Vec::new();
                    let mut visited = vec![false; om.cfg.blocks.len()];
                    last_insts_into(om.cfg, block, &mut visited, &mut lasts);
                    for pred_inst in lasts {
                        worklist.add(om.cfg.inst(pred_inst).id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::defuse;

    use crate::compiler::parser::Parser;
    use crate::compiler::resolver::Resolver;
    use crate::compiler::scope::DefId;
    use crate::ir::walk::Walker;

    fn analyzed(
        source: &str,
    ) -> (crate::compiler::scope::SymbolContext, crate::ir::Cfg, Vec<crate::optimizer::InstructionItem>, usize)
    {
        let mut parser = Parser::new(source);
        let root = parser.parse();
        let mut log = parser.log;

        let mut resolver = Resolver::new(source, &parser.ast);
        resolver.resolve(&mut log, root);

        let mut walker = Walker::new(source, &parser.ast, resolver.ctx);
        walker.run(&mut log);
        let mut ctx = walker.ctx;

        let method_id = ctx.top_levels[0]
            .members
            .values()
            .copied()
            .find(|id| {
                ctx.defs
                    .get(*id)
                    .as_method()
                    .map(|m| m.code.is_some())
                    .unwrap_or(false)
            })
            .unwrap();

        let (mut code, locals) = {
            let m = ctx.defs.get_mut(method_id).as_method_mut().unwrap();
            (m.code.take().unwrap(), m.locals.clone())
        };

        let (items, num_vars) = {
            let mut om = crate::optimizer::Optimizer::attach(
                &mut code,
                &mut ctx.defs,
                Vec::<DefId>::new(),
                locals,
                8,
            );
            om.apply_profile(&om.profile.clone());
            crate::optimizer::ssa::build(&mut om);
            om.apply_profile(&om.profile.clone());
            defuse::analyze(&mut om);
            analyze(&mut om);
            (om.instructions, om.profile.num_variables)
        };

        (ctx, code, items, num_vars)
    }

    #[test]
    fn fixpoint_invariants_hold() {
        let (_, _, items, _) = analyzed(
            "class C { int f(int a) { int b = a + 1; while (b < 10) { b = b + a; } return b; } }",
        );

        // in(s) ⊇ use(s) and in(s) ⊇ out(s) \ def(s) for every instruction
        for item in &items {
            let mut must = item.uses.clone();
            must.subtract(&item.live_in);
            assert!(must.is_empty());

            let mut flow = item.live_out.clone();
            flow.subtract(&item.defs);
            flow.subtract(&item.live_in);
            assert!(flow.is_empty());
        }
    }

    #[test]
    fn loop_carried_variable_stays_live_across_back_edge() {
        let (_, cfg, items, _) = analyzed(
            "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }",
        );

        // `a` is live-in at the loop test instruction on every path
        let test_item = items
            .iter()
            .find(|item| {
                cfg.inst(item.inst).op == crate::ir::Opcode::Less
            })
            .expect("condition instruction");

        assert!(!test_item.live_in.is_empty());
    }
}

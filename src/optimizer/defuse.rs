//! Def-use analysis.
//!
//! Fills the per-instruction def/use bitsets over the variable universe.
//! φ operands are deliberately NOT counted as uses at the φ: this is the
//! SSA-aware liveness convention the allocators rely on.

use crate::optimizer::Optimizer;
use crate::utils::IndexSet;

pub fn analyze(om: &mut Optimizer) {
    let num_variables = om.profile.num_variables;

    for item in om.instructions.iter_mut() {
        item.defs = IndexSet::new(num_variables);
        item.uses = IndexSet::new(num_variables);
    }

    for index in 0..om.instructions.len() {
        let (lvalue, op1, op2) = {
            let inst = om.cfg.inst(om.instructions[index].inst);
            (inst.lvalue, inst.operand1, inst.operand2)
        };

        if let Some(def) = lvalue.as_var_def(om.defs) {
            let v = om.varmap_index(def);
            om.instructions[index].defs.add(v);
        }
        if let Some(def) = op1.as_var_def(om.defs) {
            let v = om.varmap_index(def);
            om.instructions[index].uses.add(v);
        }
        if let Some(def) = op2.as_var_def(om.defs) {
            let v = om.varmap_index(def);
            om.instructions[index].uses.add(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;
    use crate::compiler::resolver::Resolver;
    use crate::compiler::scope::{DefId, Definition};
    use crate::ir::walk::Walker;
    use crate::ir::Opcode;

    #[test]
    fn phi_operands_are_not_uses() {
        let source =
            "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }";

        let mut parser = Parser::new(source);
        let root = parser.parse();
        let mut log = parser.log;

        let mut resolver = Resolver::new(source, &parser.ast);
        resolver.resolve(&mut log, root);

        let mut walker = Walker::new(source, &parser.ast, resolver.ctx);
        walker.run(&mut log);
        let mut ctx = walker.ctx;

        let method_id = *ctx.top_levels[0].members.get("fI").unwrap();
        let (mut code, locals) = {
            let m = ctx.defs.get_mut(method_id).as_method_mut().unwrap();
            (m.code.take().unwrap(), m.locals.clone())
        };

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

        analyze(&mut om);

        for item in &om.instructions {
            let inst = om.cfg.inst(item.inst);
            if inst.op == Opcode::Phi {
                assert!(item.uses.is_empty());
                // a φ over a variable still defines it
                if matches!(
                    inst.lvalue.as_var_def(om.defs).map(|d| om.defs.get(d)),
                    Some(Definition::Variable(_))
                ) {
                    assert!(!item.defs.is_empty());
                }
            }
        }
    }
}

//! Per-method optimization driver.
//!
//! The optimizer attaches to one routine's CFG, builds the flat variable
//! array (members first, then locals) and the flat instruction array in
//! reversed postorder (instruction ids become dense indices), runs SSA
//! construction, liveness and a register allocator, and finally eliminates
//! φ instructions. When graph-coloring injects spill code, variables and
//! instructions are re-populated and the pipeline loops until allocation
//! converges.

pub mod coloring;
pub mod defuse;
pub mod linear;
pub mod liveness;
pub mod ssa;

use log::debug;

use crate::compiler::error::DiagnosticLog;
use crate::compiler::scope::{DefId, Definitions};
use crate::ir::analysis::{self, DfsOrder};
use crate::ir::{BlockId, Cfg, InstId};
use crate::utils::IndexSet;

/// Allocator selection; both leave `(kind, location)` in the variable
/// table over the same profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    #[default]
    Coloring,
    LinearScan,
}

/// Flat per-variable dataflow item.
#[derive(Debug, Clone, Default)]
pub struct VariableItem {
    pub def: Option<DefId>,
    /// use/def sites outside any loop
    pub ud_loop_outside: usize,
    /// use/def sites inside a loop, weighted by the spill heuristic
    pub ud_loop_inside: usize,
}

/// Flat per-instruction dataflow item, indexed by instruction id.
#[derive(Debug, Clone)]
pub struct InstructionItem {
    pub inst: InstId,
    pub defs: IndexSet,
    pub uses: IndexSet,
    pub live_in: IndexSet,
    pub live_out: IndexSet,
}

/// Counts that survive re-population rounds.
#[derive(Debug, Clone, Default)]
pub struct OptimizerProfile {
    pub num_nodes: usize,
    pub num_members: usize,
    pub num_locals: usize,
    pub num_variables: usize,
    pub num_instructions: usize,
    /// register budget of the target
    pub reg_count: usize,
    /// number of variables allocated on the stack
    pub num_var_on_stack: usize,
}

pub struct Optimizer<'a> {
    pub cfg: &'a mut Cfg,
    pub defs: &'a mut Definitions,
    pub profile: OptimizerProfile,
    /// CFG nodes in postorder
    pub postorder: Vec<BlockId>,
    /// indexed by member id, then local id shifted past the members
    pub variables: Vec<VariableItem>,
    /// indexed by instruction id
    pub instructions: Vec<InstructionItem>,
    /// member variables of the owning top level, `mid` order
    pub member_defs: Vec<DefId>,
    /// local pool of the routine, `lid` order; spill temporaries extend it
    pub local_defs: Vec<DefId>,
}

impl<'a> Optimizer<'a> {
    pub fn attach(
        cfg: &'a mut Cfg,
        defs: &'a mut Definitions,
        member_defs: Vec<DefId>,
        local_defs: Vec<DefId>,
        reg_count: usize,
    ) -> Self {
        let postorder = analysis::node_order(cfg, DfsOrder::Postorder);

        let profile = OptimizerProfile {
            num_nodes: cfg.blocks.len(),
            num_members: member_defs.len(),
            num_locals: local_defs.len(),
            num_variables: member_defs.len() + local_defs.len(),
            num_instructions: 0,
            reg_count,
            num_var_on_stack: 0,
        };

        Optimizer {
            cfg,
            defs,
            profile,
            postorder,
            variables: Vec::new(),
            instructions: Vec::new(),
            member_defs,
            local_defs,
        }
    }

    // ---- variable map ----

    /// Variable id → flat index: members by `mid`, locals by
    /// `num_members + lid`.
    pub fn varmap_index(&self, def: DefId) -> usize {
        let var = self
            .defs
            .get(def)
            .as_variable()
            .expect("reference names a variable");

        match var.kind {
            crate::compiler::scope::VariableKind::Member => var.ordinal,
            _ => self.profile.num_members + var.ordinal,
        }
    }

    pub fn varmap_is_member(&self, index: usize) -> bool {
        index < self.profile.num_members
    }

    pub fn varmap_index_to_lid(&self, index: usize) -> usize {
        index - self.profile.num_members
    }

    pub fn varmap_lid_to_index(&self, lid: usize) -> usize {
        self.profile.num_members + lid
    }

    // ---- population ----

    fn count_variable_site(&mut self, r: crate::ir::Reference, in_loop: bool) {
        let Some(def) = r.as_var_def(self.defs) else {
            return;
        };
        let index = self.varmap_index(def);
        let item = &mut self.variables[index];

        item.def = Some(def);
        if in_loop {
            item.ud_loop_inside += 1;
        } else {
            item.ud_loop_outside += 1;
        }
    }

    /// Populates the flat variable array: every variable that appears in
    /// the CFG gets its item filled, with loop-weighted use counts.
    pub fn populate_variables(&mut self) {
        self.variables =
            vec![VariableItem::default(); self.profile.num_variables];

        for block_index in 0..self.cfg.blocks.len() {
            let block = BlockId::from_index(block_index);
            let in_loop = self.cfg.block(block).in_loop;

            let insts: Vec<InstId> = self.cfg.block_insts(block).collect();
            for id in insts {
                let (lvalue, op1, op2) = {
                    let inst = self.cfg.inst(id);
                    (inst.lvalue, inst.operand1, inst.operand2)
                };
                self.count_variable_site(lvalue, in_loop);
                self.count_variable_site(op1, in_loop);
                self.count_variable_site(op2, in_loop);
            }
        }
    }

    /// Populates the flat instruction array in reversed postorder,
    /// forward within each block; instruction ids become dense indices.
    pub fn populate_instructions(&mut self) {
        self.instructions = Vec::new();

        let blocks: Vec<BlockId> =
            self.postorder.iter().rev().copied().collect();

        let mut next = 0usize;
        for block in blocks {
            let insts: Vec<InstId> = self.cfg.block_insts(block).collect();
            for id in insts {
                self.cfg.inst_mut(id).id = next;
                self.instructions.push(InstructionItem {
                    inst: id,
                    defs: IndexSet::new(0),
                    uses: IndexSet::new(0),
                    live_in: IndexSet::new(0),
                    live_out: IndexSet::new(0),
                });
                next += 1;
            }
        }

        self.profile.num_instructions = next;
    }

    /// Applies a profile and re-populates both flat arrays; postorder is
    /// recomputed because spill code may have changed the graph.
    pub fn apply_profile(&mut self, profile: &OptimizerProfile) {
        self.profile = profile.clone();
        self.profile.num_nodes = self.cfg.blocks.len();
        self.postorder = analysis::node_order(self.cfg, DfsOrder::Postorder);

        self.populate_variables();
        self.populate_instructions();

        // re-populating counts instructions from the graph itself
        self.profile.num_variables =
            self.profile.num_members + self.profile.num_locals;
    }

    // ---- φ plumbing ----

    /// Locates the φ instruction of `variable` in a block's φ run.
    pub fn phi_locate(&self, block: BlockId, variable: DefId) -> Option<InstId> {
        for id in self.cfg.block_insts(block) {
            let inst = self.cfg.inst(id);

            if !inst.is_phi() {
                // φ instructions stay at the top
                return None;
            }

            if inst.lvalue.as_var_def(&*self.defs) == Some(variable) {
                return Some(id);
            }
        }

        None
    }

    /// Inserts a φ for `variable` with arity equal to the block's inbound
    /// edge count. Returns false if one already exists.
    pub fn phi_place(&mut self, block: BlockId, variable: DefId) -> bool {
        if self.phi_locate(block, variable).is_some() {
            return false;
        }

        let arity = self.cfg.block(block).in_edges.len();
        let mut phi = crate::ir::Instruction::new(crate::ir::Opcode::Phi);
        phi.id = self.profile.num_instructions;
        phi.lvalue = crate::ir::Reference::def(variable);
        phi.phi_operands = vec![None; arity];

        self.profile.num_instructions += 1;
        self.cfg.push_front(block, phi);

        true
    }

    // ---- driver ----

    /// Runs the full per-routine pipeline; results land in the variable
    /// table, the instruction ids and the spill-extended local pool.
    pub fn execute(
        &mut self,
        log: &mut DiagnosticLog,
        allocator: AllocatorKind,
    ) {
        self.apply_profile(&self.profile.clone());

        debug!(
            "optimizer: {} blocks, {} variables, {} instructions",
            self.profile.num_nodes,
            self.profile.num_variables,
            self.profile.num_instructions,
        );

        ssa::build(self);

        // φ insertion extended the instruction space
        self.apply_profile(&self.profile.clone());

        let reg_count = self.profile.reg_count;
        match allocator {
            AllocatorKind::Coloring => {
                coloring::allocate(self, reg_count);
            }
            AllocatorKind::LinearScan => {
                linear::allocate(self, log, reg_count);
            }
        }

        // the back-end lowers φ via parallel moves; the CFG is cleaned
        ssa::eliminate(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;
    use crate::compiler::resolver::Resolver;
    use crate::compiler::scope::Definition;
    use crate::ir::walk::Walker;
    use crate::ir::Opcode;

    fn optimize_first_method(
        source: &str,
        allocator: AllocatorKind,
        k: usize,
    ) -> (crate::compiler::scope::SymbolContext, DiagnosticLog, DefId) {
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
                matches!(ctx.defs.get(*id), Definition::Method(m) if m.code.is_some())
            })
            .expect("method with code");

        let member_defs: Vec<DefId> = {
            let mut members: Vec<DefId> = ctx.top_levels[0]
                .members
                .values()
                .copied()
                .filter(|id| {
                    matches!(ctx.defs.get(*id), Definition::Variable(_))
                })
                .collect();
            members.sort_by_key(|id| {
                ctx.defs.get(*id).as_variable().unwrap().ordinal
            });
            members
        };

        let (mut code, local_defs) = {
            let method = ctx.defs.get_mut(method_id).as_method_mut().unwrap();
            (method.code.take().unwrap(), method.locals.clone())
        };

        let mut om = Optimizer::attach(
            &mut code,
            &mut ctx.defs,
            member_defs,
            local_defs,
            k,
        );
        om.execute(&mut log, allocator);
        let locals = om.local_defs.clone();
        let stack = om.profile.num_var_on_stack;

        let method = ctx.defs.get_mut(method_id).as_method_mut().unwrap();
        method.code = Some(code);
        method.locals = locals;
        method.stack_slots = stack;
        method.reg_count = k;

        (ctx, log, method_id)
    }

    #[test]
    fn instruction_ids_are_unique_and_ordered_within_blocks() {
        let (ctx, _, method_id) = optimize_first_method(
            "class C { int f(int a) { if (a < 1) { a = 2; } return a; } }",
            AllocatorKind::LinearScan,
            8,
        );

        let method = ctx.defs.get(method_id).as_method().unwrap();
        let cfg = method.code.as_ref().unwrap();

        // ids stay unique after φ elimination and increase within a block
        let mut seen = Vec::new();
        for i in 0..cfg.blocks.len() {
            let ids: Vec<usize> = cfg
                .block_insts(crate::ir::BlockId::from_index(i))
                .map(|inst| cfg.inst(inst).id)
                .collect();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            seen.extend(ids);
        }

        let count = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), count);
    }

    #[test]
    fn phi_is_eliminated_after_allocation() {
        let (ctx, _, method_id) = optimize_first_method(
            "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }",
            AllocatorKind::LinearScan,
            8,
        );

        let method = ctx.defs.get(method_id).as_method().unwrap();
        let cfg = method.code.as_ref().unwrap();

        for i in 0..cfg.blocks.len() {
            for inst in cfg.block_insts(crate::ir::BlockId::from_index(i)) {
                assert_ne!(cfg.inst(inst).op, Opcode::Phi);
            }
        }
    }
}

//! Second pass: statement and expression walk, AST → CFG.
//!
//! For each method, constructor and member-initializer expression the
//! walker runs with a fresh scope-worker stack and statement-context
//! stack. Expressions arrive from the parser as a postfix sibling order
//! and reduce left to right; logical operators and the ternary form are
//! generated in-block first and expanded into control flow afterwards.

use std::collections::HashMap;

use log::trace;

use crate::compiler::ast::{Ast, NodeId, NodeKind, Payload};
use crate::compiler::error::{DiagnosticCode, DiagnosticLog};
use crate::compiler::expression::OperatorId;
use crate::compiler::lexer::{Lexeme, LineColumn, LineIndex};
use crate::compiler::resolver::{name_text, type_from_node};
use crate::compiler::scope::{
    DefId, LiteralValue, SymbolContext, TopLevelKind, VariableKind,
};
use crate::ir::worker::{
    CfgWorker, StatementContext, StatementContextKind, StatementContextStack,
};
use crate::ir::{
    BlockId, BlockKind, Cfg, EdgeKind, InstId, Instruction, Opcode, Reference,
};

/// Per-routine walk state: the CFG under construction, the scope-worker
/// stack and the statement-context stack.
#[derive(Default)]
struct WalkState {
    cfg: Cfg,
    workers: Vec<CfgWorker>,
    contexts: StatementContextStack,
    /// flushed local definitions; index becomes the variable's `lid`
    locals: Vec<DefId>,
    /// operator node → its attached instruction
    op_insts: HashMap<NodeId, InstId>,
    loop_depth: usize,
}

impl WalkState {
    fn push_worker(&mut self) {
        let mut worker = CfgWorker::new();
        worker.loop_depth = self.loop_depth;
        self.workers.push(worker);
    }

    fn pop_worker(&mut self) -> CfgWorker {
        self.workers.pop().expect("worker stack not empty")
    }
}

pub struct Walker<'a> {
    source: &'a str,
    ast: &'a Ast,
    lines: LineIndex,
    pub ctx: SymbolContext,
}

impl<'a> Walker<'a> {
    pub fn new(source: &'a str, ast: &'a Ast, ctx: SymbolContext) -> Self {
        Walker {
            source,
            ast,
            lines: LineIndex::new(source),
            ctx,
        }
    }

    fn at(&self, node: NodeId) -> (LineColumn, LineColumn) {
        self.lines.span_range(&self.ast.node(node).span)
    }

    /// Walks every class of the unit: member initializers, static
    /// initializers, constructors and methods.
    pub fn run(&mut self, log: &mut DiagnosticLog) {
        for top in 0..self.ctx.top_levels.len() {
            match self.ctx.top_levels[top].kind {
                TopLevelKind::Class => self.walk_class(log, top),
                // interfaces are name-only top levels
                TopLevelKind::Interface => {}
            }
        }
    }

    fn walk_class(&mut self, log: &mut DiagnosticLog, top: usize) {
        self.ctx.working_top_level = Some(top);

        let mut member_init = WalkState::default();
        member_init.push_worker();

        let mut static_init = WalkState::default();

        let mut part = self.ctx.top_levels[top].node_first_body_decl;
        while let Some(decl) = part {
            self.walk_class_member(
                log,
                decl,
                &mut member_init,
                &mut static_init,
            );
            part = self.ast.next_sibling(decl);
        }

        // finalize the member initializer graph
        let worker = member_init.pop_worker();
        if !member_init.cfg.is_empty() {
            member_init.cfg.entry = worker.entry;
            self.assign_local_ordinals(&member_init.locals);

            let top = &mut self.ctx.top_levels[top];
            top.member_init_code = Some(member_init.cfg);
            top.member_init_locals = member_init.locals;
        }

        if !static_init.cfg.is_empty() {
            self.assign_local_ordinals(&static_init.locals);

            let top = &mut self.ctx.top_levels[top];
            top.static_init_code = Some(static_init.cfg);
            top.static_init_locals = static_init.locals;
        }

        self.ctx.working_top_level = None;
    }

    fn walk_class_member(
        &mut self,
        log: &mut DiagnosticLog,
        decl: NodeId,
        member_init: &mut WalkState,
        static_init: &mut WalkState,
    ) {
        let Some(first) = self.ast.first_child(decl) else {
            return;
        };

        match self.ast.kind(first) {
            NodeKind::StaticInit => {
                if let Some(block) = self.ast.first_child(first) {
                    if static_init.workers.is_empty() {
                        static_init.push_worker();
                        // explicit entry, as for method bodies
                        let worker =
                            static_init.workers.last_mut().expect("worker");
                        worker.grow(&mut static_init.cfg);
                    }
                    let inner = self.walk_block(log, static_init, block, true);
                    let worker =
                        static_init.workers.last_mut().expect("worker");
                    worker.grow_with_graph(&mut static_init.cfg, &inner);
                    static_init.cfg.entry =
                        static_init.workers[0].entry.or(static_init.cfg.entry);
                }
            }
            NodeKind::CtorDecl => self.walk_method(log, first),
            NodeKind::Type => {
                let Some(next) = self.ast.next_sibling(first) else {
                    return;
                };

                match self.ast.kind(next) {
                    NodeKind::VarDeclarators => {
                        for var in self.ast.children(next).collect::<Vec<_>>()
                        {
                            self.walk_member_initializer(
                                log,
                                var,
                                member_init,
                            );
                        }
                    }
                    NodeKind::MethodDecl => self.walk_method(log, next),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Initializer code of one member declarator, spliced onto the class
    /// member-init graph.
    fn walk_member_initializer(
        &mut self,
        log: &mut DiagnosticLog,
        var: NodeId,
        state: &mut WalkState,
    ) {
        let Some(token) = self.ast.node(var).payload.token().cloned() else {
            return;
        };
        let name = token.text(self.source);
        let Some(def) = self.ctx.use_name(name, true) else {
            // registration failed in the first pass; already diagnosed
            return;
        };

        let at = self.at(var);
        let lvalue = Reference::def(def);

        match self.ast.first_child(var).map(|c| (c, self.ast.kind(c))) {
            Some((expr, NodeKind::Expression)) => {
                state.push_worker();
                self.walk_expression(log, state, expr);

                let worker = state.workers.last_mut().expect("worker");
                let last = worker
                    .current_block()
                    .and_then(|b| state.cfg.block(b).inst_last);
                let operand = match last {
                    Some(inst) => Reference::Inst(inst),
                    None => Reference::Undefined,
                };

                let worker = state.workers.last_mut().expect("worker");
                worker.execute(
                    &mut state.cfg,
                    log,
                    at,
                    Opcode::Assign,
                    lvalue,
                    operand,
                    Reference::Undefined,
                );

                let inner = state.pop_worker();
                let outer = state.workers.last_mut().expect("worker");
                outer.grow_with_graph(&mut state.cfg, &inner);
            }
            Some((_, NodeKind::ArrayInit)) | None => {
                // mark that the member defines here and needs default
                // initialization
                let worker = state.workers.last_mut().expect("worker");
                worker.execute(
                    &mut state.cfg,
                    log,
                    at,
                    Opcode::Init,
                    lvalue,
                    Reference::Undefined,
                    Reference::Undefined,
                );
            }
            _ => {}
        }
    }

    fn assign_local_ordinals(&mut self, locals: &[DefId]) {
        for (lid, def) in locals.iter().enumerate() {
            if let Some(var) = self.ctx.defs.get_mut(*def).as_variable_mut() {
                var.ordinal = lid;
            }
        }
    }

    /// Walks one method or constructor body into its definition.
    fn walk_method(&mut self, log: &mut DiagnosticLog, decl: NodeId) {
        // locate the registered definition through its stored body node
        let top = self.ctx.working_top_level.expect("top level active");
        let Some(def_id) = self.ctx.top_levels[top]
            .members
            .values()
            .copied()
            .find(|id| {
                self.ctx
                    .defs
                    .get(*id)
                    .as_method()
                    .map(|m| m.body == Some(decl))
                    .unwrap_or(false)
            })
        else {
            return;
        };

        let (params, block) = match self.ast.kind(decl) {
            NodeKind::MethodDecl => {
                let header =
                    self.ast.first_child(decl).expect("method has a header");
                let params = self
                    .ast
                    .children(header)
                    .find(|c| self.ast.kind(*c) == NodeKind::FormalParamList);
                let block = self
                    .ast
                    .children(decl)
                    .find(|c| self.ast.kind(*c) == NodeKind::MethodBody)
                    .and_then(|body| self.ast.first_child(body));
                (params, block)
            }
            NodeKind::CtorDecl => {
                let params = self
                    .ast
                    .children(decl)
                    .find(|c| self.ast.kind(*c) == NodeKind::FormalParamList);
                let block = self
                    .ast
                    .children(decl)
                    .find(|c| self.ast.kind(*c) == NodeKind::CtorBody)
                    .and_then(|body| {
                        self.ast.children(body).find(|c| {
                            self.ast.kind(*c) == NodeKind::Block
                        })
                    });
                (params, block)
            }
            _ => (None, None),
        };

        let Some(block) = block else {
            // abstract and native methods carry no code
            return;
        };

        trace!("second pass: walking method body");

        self.ctx.scopes.push(crate::compiler::scope::ScopeKind::Method);

        // parameters live in the method scope, ordered
        let mut ordered_params = Vec::new();
        if let Some(params) = params {
            for param in self.ast.children(params).collect::<Vec<_>>() {
                let payload = &self.ast.node(param).payload;
                let Some(id) = payload.token().cloned() else {
                    continue;
                };
                let dims = payload.dimension();
                let ty = self
                    .ast
                    .first_child(param)
                    .expect("formal parameter has a type");
                let type_name = type_from_node(self.ast, self.source, ty);
                let at = (id.begin, id.end);
                let name = id.text(self.source).to_string();

                if let Some(def) = self.ctx.define_variable(
                    log,
                    at,
                    &name,
                    type_name,
                    enumflags2::BitFlags::empty(),
                    VariableKind::Parameter,
                    dims,
                ) {
                    ordered_params.push(def);
                }
            }
        }

        let mut state = WalkState::default();

        // explicit entry block: the graph entry stays distinct from any
        // loop header the body opens with, so headers are proper joins
        let mut method_worker = CfgWorker::new();
        method_worker.grow(&mut state.cfg);

        // the body shares the method scope so parameters stay visible
        let inner = self.walk_block(log, &mut state, block, false);
        method_worker.grow_with_graph(&mut state.cfg, &inner);

        // keep all definitions alive for liveness and spill
        self.ctx.scopes.pop(Some(&mut state.locals));
        self.assign_local_ordinals(&state.locals);

        state.cfg.entry = method_worker.entry;

        let method = self
            .ctx
            .defs
            .get_mut(def_id)
            .as_method_mut()
            .expect("definition is a method");
        method.parameters = ordered_params;
        method.locals = state.locals;
        method.code = Some(state.cfg);
    }

    /// Block walk; returns the worker holding the block's graph fragment
    /// for the caller to splice.
    fn walk_block(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        block: NodeId,
        use_new_scope: bool,
    ) -> CfgWorker {
        if use_new_scope {
            self.ctx.scopes.push(crate::compiler::scope::ScopeKind::Plain);
        }

        state.push_worker();

        for stmt in self.ast.children(block).collect::<Vec<_>>() {
            if self.ast.kind(stmt) == NodeKind::Block {
                let inner = self.walk_block(log, state, stmt, true);
                let worker = state.workers.last_mut().expect("worker");
                worker.grow_with_graph(&mut state.cfg, &inner);
            } else {
                self.walk_statement(log, state, stmt);
            }
        }

        // a block fragment is never empty: branching statements rely on
        // an identifiable entry block
        if state.workers.last().expect("worker").entry.is_none() {
            let worker = state.workers.last_mut().expect("worker");
            worker.loop_depth = state.loop_depth;
            worker.grow(&mut state.cfg);
        }

        if use_new_scope {
            self.ctx.scopes.pop(Some(&mut state.locals));
        }

        state.pop_worker()
    }

    /// Grows the worker so the next statement starts in a new block, as
    /// required by branching statement contracts. Blocks merge their own
    /// fragment, so they never need this.
    fn start_statement_in_new_block(
        &mut self,
        state: &mut WalkState,
        stmt_kind: NodeKind,
    ) {
        if stmt_kind == NodeKind::Block {
            return;
        }

        let worker = state.workers.last_mut().expect("worker");
        if !worker.current_block_empty(&state.cfg)
            || worker.entry.is_none()
        {
            worker.loop_depth = state.loop_depth;
            worker.grow(&mut state.cfg);
        }
    }

    fn walk_statement(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        // code behind a branching statement never executes
        let worker = state.workers.last().expect("worker");
        if let Some(cur) = worker.cur {
            if matches!(
                state.cfg.block(cur).kind,
                BlockKind::Return | BlockKind::Break | BlockKind::Continue
            ) {
                let at = self.at(stmt);
                log.log(DiagnosticCode::UnreachableStatement, at.0, at.1, &[]);
            }
        }

        match self.ast.kind(stmt) {
            NodeKind::Block => {
                let inner = self.walk_block(log, state, stmt, true);
                let worker = state.workers.last_mut().expect("worker");
                worker.grow_with_graph(&mut state.cfg, &inner);
            }
            NodeKind::StatementIf => self.walk_if(log, state, stmt),
            NodeKind::StatementWhile => self.walk_while(log, state, stmt),
            NodeKind::StatementDo => self.walk_do(log, state, stmt),
            NodeKind::StatementFor => self.walk_for(log, state, stmt),
            NodeKind::StatementReturn => self.walk_return(log, state, stmt),
            NodeKind::StatementBreak => {
                self.walk_break_continue(log, state, stmt, true)
            }
            NodeKind::StatementContinue => {
                self.walk_break_continue(log, state, stmt, false)
            }
            NodeKind::StatementExpression => {
                if let Some(expr) = self.ast.first_child(stmt) {
                    self.walk_expression(log, state, expr);
                }
            }
            NodeKind::StatementVarDecl => {
                if let Some(decl) = self.ast.first_child(stmt) {
                    self.walk_variable_declaration(log, state, decl);
                }
            }
            NodeKind::StatementLabel => {
                if let Some(inner) = self.ast.first_child(stmt) {
                    self.walk_statement(log, state, inner);
                }
            }
            NodeKind::Ambiguous => {
                let resolved = match self.ast.node(stmt).payload {
                    Payload::Ambiguity { resolved } => resolved,
                    _ => 0,
                };
                if let Some(winner) = self.ast.children(stmt).nth(resolved) {
                    self.walk_statement(log, state, winner);
                }
            }
            // switch lowering is an extension point; try/throw and
            // synchronized have no IR counterpart yet
            NodeKind::StatementSwitch
            | NodeKind::StatementThrow
            | NodeKind::StatementTry
            | NodeKind::StatementSynchronized
            | NodeKind::StatementEmpty => {}
            _ => {}
        }
    }

    /// Branch bodies reject declarations; everything else dispatches.
    fn walk_branch_body(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        if self.ast.kind(stmt) == NodeKind::StatementVarDecl {
            let at = self.at(stmt);
            log.log(DiagnosticCode::DeclarationAsBranchBody, at.0, at.1, &[]);
        } else {
            self.walk_statement(log, state, stmt);
        }
    }

    fn walk_if(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        let at = self.at(stmt);
        let mut children = self.ast.children(stmt);
        let Some(cond) = children.next() else {
            return;
        };
        let body = children.next();
        let else_body = children.next();

        // condition, then mark the block as a test block
        self.walk_expression(log, state, cond);
        let worker = state.workers.last_mut().expect("worker");
        worker.execute(
            &mut state.cfg,
            log,
            at,
            Opcode::Test,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );
        let test = worker.current_block().expect("test block exists");

        // true branch
        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::True);
        if let Some(body) = body {
            self.start_statement_in_new_block(state, self.ast.kind(body));
            self.walk_branch_body(log, state, body);
        } else {
            self.start_statement_in_new_block(state, NodeKind::StatementEmpty);
        }

        // the join block is created before the else so the else can
        // target it
        let worker = state.workers.last_mut().expect("worker");
        worker.loop_depth = state.loop_depth;
        let join = worker.grow(&mut state.cfg);

        // false branch (optional)
        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, test, true, false);
        worker.set_strategy(EdgeKind::False);

        if let Some(else_body) = else_body {
            self.start_statement_in_new_block(
                state,
                self.ast.kind(else_body),
            );
            self.walk_branch_body(log, state, else_body);
        }

        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, join, true, true);
    }

    fn walk_while(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        let at = self.at(stmt);
        let mut children = self.ast.children(stmt);
        let Some(cond) = children.next() else {
            return;
        };
        let body = children.next();

        state.contexts.push(StatementContextKind::Loop);
        state.loop_depth += 1;

        // the condition is revisited every iteration: own block
        self.start_statement_in_new_block(state, NodeKind::StatementWhile);

        let worker = state.workers.last_mut().expect("worker");
        let continue_block = worker.current_block().expect("block exists");
        state.contexts.top_mut().continue_block = Some(continue_block);

        self.walk_expression(log, state, cond);

        let worker = state.workers.last_mut().expect("worker");
        let test = worker.current_block().expect("block exists");
        state.contexts.top_mut().test_block = Some(test);
        worker.execute(
            &mut state.cfg,
            log,
            at,
            Opcode::Test,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );

        // the break target must exist before the body recursion so nested
        // statements can see it
        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::False);
        worker.loop_depth = 0;
        let break_block = worker.grow(&mut state.cfg);
        state.contexts.top_mut().break_block = Some(break_block);

        // loop body on the true branch
        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, test, true, false);
        worker.set_strategy(EdgeKind::True);

        if let Some(body) = body {
            self.start_statement_in_new_block(state, self.ast.kind(body));
            self.walk_branch_body(log, state, body);
        } else {
            let worker = state.workers.last_mut().expect("worker");
            worker.loop_depth = state.loop_depth;
            worker.grow(&mut state.cfg);
        }

        // loop back
        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::Jump);
        worker.jump(&mut state.cfg, continue_block, false, true);

        // future parsing continues at the break target
        worker.jump(&mut state.cfg, break_block, true, false);

        state.loop_depth -= 1;
        state.contexts.pop();
    }

    fn walk_do(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        let at = self.at(stmt);
        let mut children = self.ast.children(stmt);
        let Some(body) = children.next() else {
            return;
        };
        let cond = children.next();

        state.contexts.push(StatementContextKind::Loop);
        state.loop_depth += 1;

        // the body must start in a fresh block even when it is a block
        // statement, so the loop entry stays identifiable
        self.start_statement_in_new_block(state, NodeKind::StatementDo);
        let worker = state.workers.last_mut().expect("worker");
        if worker.entry.is_none() {
            worker.loop_depth = state.loop_depth;
            worker.grow(&mut state.cfg);
        }
        let body_block = worker.current_block().expect("block exists");

        // continue and break are created detached so the body can grow
        let continue_block = state.cfg.new_block(true);
        let break_block = state.cfg.new_block(false);
        state.contexts.top_mut().continue_block = Some(continue_block);
        state.contexts.top_mut().break_block = Some(break_block);

        self.walk_branch_body(log, state, body);

        // connect the body end to the condition
        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::Any);
        worker.jump(&mut state.cfg, continue_block, true, true);

        // loop edge
        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::True);
        worker.jump(&mut state.cfg, body_block, false, true);

        if let Some(cond) = cond {
            self.walk_expression(log, state, cond);
        }
        let worker = state.workers.last_mut().expect("worker");
        worker.execute(
            &mut state.cfg,
            log,
            at,
            Opcode::Test,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );

        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::False);
        worker.jump(&mut state.cfg, break_block, true, true);

        state.loop_depth -= 1;
        state.contexts.pop();
    }

    fn walk_for(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        let at = self.at(stmt);

        state.contexts.push(StatementContextKind::Loop);

        // init runs once, in its own lexical scope, outside the loop body
        self.ctx.scopes.push(crate::compiler::scope::ScopeKind::For);

        let mut cursor = self.ast.first_child(stmt);

        if let Some(init) = cursor {
            if self.ast.kind(init) == NodeKind::ForInit {
                if let Some(content) = self.ast.first_child(init) {
                    match self.ast.kind(content) {
                        NodeKind::ExpressionList => {
                            self.walk_expression_list(log, state, content);
                        }
                        NodeKind::LocalVarDecl => {
                            self.walk_variable_declaration(
                                log, state, content,
                            );
                        }
                        _ => {}
                    }
                }
                cursor = self.ast.next_sibling(init);
            }
        }

        state.loop_depth += 1;

        // the condition block is the loop-back target
        self.start_statement_in_new_block(state, NodeKind::StatementFor);
        let worker = state.workers.last_mut().expect("worker");
        let test_expr_start = worker.current_block().expect("block exists");

        if let Some(cond) = cursor {
            if self.ast.kind(cond) == NodeKind::Expression {
                self.walk_expression(log, state, cond);
                cursor = self.ast.next_sibling(cond);
            }
        }

        // the marker also guarantees the test block is not empty, keeping
        // the body isolated
        let worker = state.workers.last_mut().expect("worker");
        worker.execute(
            &mut state.cfg,
            log,
            at,
            Opcode::Test,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );
        let test = worker.current_block().expect("block exists");
        state.contexts.top_mut().test_block = Some(test);

        // continue target: the update block, detached until the body is in
        let continue_block = state.cfg.new_block(true);
        state.contexts.top_mut().continue_block = Some(continue_block);

        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::False);
        worker.loop_depth = 0;
        let break_block = worker.grow(&mut state.cfg);
        state.contexts.top_mut().break_block = Some(break_block);

        // update expressions
        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, continue_block, true, false);
        if let Some(update) = cursor {
            if self.ast.kind(update) == NodeKind::ForUpdate {
                if let Some(list) = self.ast.first_child(update) {
                    self.walk_expression_list(log, state, list);
                }
                cursor = self.ast.next_sibling(update);
            }
        }

        // body on the true branch
        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, test, true, false);
        worker.set_strategy(EdgeKind::True);

        if let Some(body) = cursor {
            self.start_statement_in_new_block(state, self.ast.kind(body));
            self.walk_branch_body(log, state, body);
        }

        // body falls through to the update block
        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, continue_block, true, true);

        // loop back to the start of the test expression, not the test
        // block itself: expansion may have split the condition
        let worker = state.workers.last_mut().expect("worker");
        worker.set_strategy(EdgeKind::Jump);
        worker.jump(&mut state.cfg, test_expr_start, false, true);

        let worker = state.workers.last_mut().expect("worker");
        worker.jump(&mut state.cfg, break_block, true, false);

        state.loop_depth -= 1;
        state.contexts.pop();
        self.ctx.scopes.pop(Some(&mut state.locals));
    }

    fn walk_return(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
    ) {
        let at = self.at(stmt);
        let mut operand = Reference::Undefined;

        if let Some(expr) = self.ast.first_child(stmt) {
            self.walk_expression(log, state, expr);

            let worker = state.workers.last().expect("worker");
            if let Some(last) = worker
                .current_block()
                .and_then(|b| state.cfg.block(b).inst_last)
            {
                operand = Reference::Inst(last);
            }
        }

        // `execute` retags the block as an exit and grows; the grown
        // successor is marked so later statements are diagnosed as dead
        let worker = state.workers.last_mut().expect("worker");
        worker.loop_depth = state.loop_depth;
        worker.execute(
            &mut state.cfg,
            log,
            at,
            Opcode::Return,
            Reference::Undefined,
            operand,
            Reference::Undefined,
        );
        worker.set_current_block_kind(&mut state.cfg, BlockKind::Return);
    }

    fn walk_break_continue(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        stmt: NodeId,
        is_break: bool,
    ) {
        let at = self.at(stmt);

        let query = if is_break {
            StatementContextKind::Loop | StatementContextKind::Switch
        } else {
            StatementContextKind::Loop.into()
        };

        let target = state.contexts.get(query).map(|sc: &StatementContext| {
            if is_break {
                sc.break_block
            } else {
                sc.continue_block
            }
        });

        let Some(Some(target)) = target else {
            let code = if is_break {
                DiagnosticCode::BreakUnbound
            } else {
                DiagnosticCode::ContinueUnbound
            };
            log.log(code, at.0, at.1, &[]);
            return;
        };

        let worker = state.workers.last_mut().expect("worker");
        worker.execute(
            &mut state.cfg,
            log,
            at,
            Opcode::Jump,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );

        worker.set_strategy(EdgeKind::Jump);
        worker.jump(&mut state.cfg, target, false, true);

        // the jump opcode alone cannot distinguish break from continue
        worker.set_current_block_kind(
            &mut state.cfg,
            if is_break {
                BlockKind::Break
            } else {
                BlockKind::Continue
            },
        );
    }

    fn walk_expression_list(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        list: NodeId,
    ) {
        for expr in self.ast.children(list).collect::<Vec<_>>() {
            self.walk_expression(log, state, expr);
        }
    }

    fn walk_variable_declaration(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        decl: NodeId,
    ) {
        let modifiers = self.ast.node(decl).payload.modifiers();
        let mut children = self.ast.children(decl);
        let Some(ty) = children.next() else {
            return;
        };
        let Some(declarators) = children.next() else {
            return;
        };

        let type_name = type_from_node(self.ast, self.source, ty);

        for var in self.ast.children(declarators).collect::<Vec<_>>() {
            let payload = &self.ast.node(var).payload;
            let Some(id) = payload.token().cloned() else {
                continue;
            };
            let dims = payload.dimension();
            let name = id.text(self.source).to_string();
            let at = (id.begin, id.end);

            let Some(def) = self.ctx.define_variable(
                log,
                at,
                &name,
                type_name.clone(),
                modifiers,
                VariableKind::Local,
                dims,
            ) else {
                // code is only generated for successful registration
                continue;
            };

            let lvalue = Reference::def(def);

            match self.ast.first_child(var).map(|c| (c, self.ast.kind(c))) {
                Some((expr, NodeKind::Expression)) => {
                    self.walk_expression(log, state, expr);

                    let worker = state.workers.last_mut().expect("worker");
                    let operand = worker
                        .current_block()
                        .and_then(|b| state.cfg.block(b).inst_last)
                        .map(Reference::Inst)
                        .unwrap_or_default();

                    worker.execute(
                        &mut state.cfg,
                        log,
                        at,
                        Opcode::Assign,
                        lvalue,
                        operand,
                        Reference::Undefined,
                    );
                }
                _ => {
                    // declared but not initialized here
                    let worker = state.workers.last_mut().expect("worker");
                    worker.execute(
                        &mut state.cfg,
                        log,
                        at,
                        Opcode::Init,
                        lvalue,
                        Reference::Undefined,
                        Reference::Undefined,
                    );
                }
            }
        }
    }

    // ---- expressions ----

    /// Resolves an operand node to a reference. Operands that name an
    /// earlier operator read that operator's attached instruction.
    fn interpret_operand(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        base: Option<NodeId>,
    ) -> Reference {
        let Some(base) = base else {
            return Reference::Undefined;
        };

        if self.ast.kind(base) == NodeKind::Operator {
            return state
                .op_insts
                .get(&base)
                .copied()
                .map(Reference::Inst)
                .unwrap_or_default();
        }

        // primary
        let at = self.at(base);
        let payload = self.ast.node(base).payload.clone();

        if let Some(token) = payload.token() {
            let text = token.text(self.source).to_string();

            let literal = match token.lexeme {
                Lexeme::Integer(info) | Lexeme::Floating(info) => {
                    Some(LiteralValue::Number {
                        kind: info.kind,
                        bits: info.bits,
                    })
                }
                Lexeme::String => Some(LiteralValue::String),
                Lexeme::Character => Some(LiteralValue::Character),
                Lexeme::TrueKW => Some(LiteralValue::Boolean(true)),
                Lexeme::FalseKW => Some(LiteralValue::Boolean(false)),
                Lexeme::NullKW => Some(LiteralValue::Null),
                _ => None,
            };

            if let Some(literal) = literal {
                let def = self.ctx.intern_literal(log, at, &text, literal);
                return Reference::Literal(def);
            }

            if token.lexeme == Lexeme::Identifier {
                // invocation results have no IR counterpart yet; the
                // operand collapses to undefined
                if self
                    .ast
                    .children(base)
                    .any(|c| self.ast.kind(c) == NodeKind::ArgumentList)
                {
                    return Reference::Undefined;
                }

                return match self.ctx.use_name(&text, true) {
                    Some(def) => Reference::def(def),
                    None => {
                        log.log(
                            DiagnosticCode::UndefinedReference,
                            at.0,
                            at.1,
                            &[&text],
                        );
                        Reference::Undefined
                    }
                };
            }

            // `this`/`super` have no standalone value here
            return Reference::Undefined;
        }

        // children: parenthesized expression or qualified name
        if let Some(child) = self.ast.first_child(base) {
            match self.ast.kind(child) {
                NodeKind::Expression => {
                    self.walk_expression(log, state, child);
                    let worker = state.workers.last().expect("worker");
                    return worker
                        .current_block()
                        .and_then(|b| state.cfg.block(b).inst_last)
                        .map(Reference::Inst)
                        .unwrap_or_default();
                }
                NodeKind::Name => {
                    let dotted = name_text(self.ast, self.source, child);
                    log.log(
                        DiagnosticCode::UndefinedReference,
                        at.0,
                        at.1,
                        &[&dotted],
                    );
                    return Reference::Undefined;
                }
                _ => {}
            }
        }

        Reference::Undefined
    }

    /// Interned `1` literal used by increment/decrement lowering.
    fn step_literal(
        &mut self,
        log: &mut DiagnosticLog,
        at: (LineColumn, LineColumn),
    ) -> Reference {
        let def = self.ctx.intern_literal(
            log,
            at,
            "1",
            LiteralValue::Number {
                kind: crate::compiler::lexer::NumberKind::Decimal,
                bits: crate::compiler::lexer::NumberBits::Normal,
            },
        );
        Reference::Literal(def)
    }

    fn opid_to_opcode(opid: OperatorId) -> Opcode {
        use OperatorId::*;

        match opid {
            PostInc => Opcode::PostInc,
            PostDec => Opcode::PostDec,
            PreInc => Opcode::PreInc,
            PreDec => Opcode::PreDec,
            SignPos => Opcode::Pos,
            SignNeg => Opcode::Neg,
            LogicNot => Opcode::LogicNot,
            BitNot => Opcode::BitNot,
            Mul | MulAssign => Opcode::Mul,
            Div | DivAssign => Opcode::Div,
            Mod | ModAssign => Opcode::Mod,
            Add | AddAssign => Opcode::Add,
            Sub | SubAssign => Opcode::Sub,
            ShiftLeft | ShiftLeftAssign => Opcode::ShiftLeft,
            ShiftRight | ShiftRightAssign => Opcode::ShiftRight,
            ShiftRightUnsigned | ShiftRightUnsignedAssign => {
                Opcode::ShiftRightUnsigned
            }
            Less => Opcode::Less,
            LessEq => Opcode::LessEq,
            Greater => Opcode::Greater,
            GreaterEq => Opcode::GreaterEq,
            Equal => Opcode::Eq,
            NotEqual => Opcode::NotEq,
            BitAnd | AndAssign => Opcode::BitAnd,
            BitXor | XorAssign => Opcode::BitXor,
            BitOr | OrAssign => Opcode::BitOr,
            LogicAnd => Opcode::LogicAnd,
            LogicOr => Opcode::LogicOr,
            TernaryTest => Opcode::TernaryTest,
            TernaryBranch => Opcode::TernaryBranch,
            Assign => Opcode::Assign,
            // no IR counterpart
            InstanceOf | Lambda => Opcode::Noop,
        }
    }

    /// Finalizes one reduced operator into an instruction:
    /// `lvalue <- operand1 op operand2`.
    fn execute_operator(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        op_node: NodeId,
        mut operand1: Reference,
        mut operand2: Reference,
    ) {
        let at = self.at(op_node);
        let opid = self
            .ast
            .node(op_node)
            .payload
            .operator()
            .expect("operator node carries its id");

        let mut lvalue = Reference::Undefined;
        let mut validate_lvalue = false;

        match opid {
            OperatorId::Assign => {
                lvalue = operand1;
                operand1 = operand2;
                operand2 = Reference::Undefined;
                validate_lvalue = true;
            }
            OperatorId::AddAssign
            | OperatorId::SubAssign
            | OperatorId::MulAssign
            | OperatorId::DivAssign
            | OperatorId::ModAssign
            | OperatorId::AndAssign
            | OperatorId::XorAssign
            | OperatorId::OrAssign
            | OperatorId::ShiftLeftAssign
            | OperatorId::ShiftRightAssign
            | OperatorId::ShiftRightUnsignedAssign => {
                // the lvalue is a copy of operand 1: its version will
                // differ after the write
                lvalue = operand1;
                validate_lvalue = true;
            }
            OperatorId::PreInc | OperatorId::PreDec => {
                // the single operand arrives in operand2
                lvalue = operand2;
                operand1 = self.step_literal(log, at);
                validate_lvalue = true;
            }
            OperatorId::PostInc | OperatorId::PostDec => {
                // capture the pre-step value first; operands referencing
                // this operator read the capture, direct variable reads
                // see the stepped value
                let worker = state.workers.last_mut().expect("worker");
                let store = worker.execute(
                    &mut state.cfg,
                    log,
                    at,
                    Opcode::Store,
                    Reference::Undefined,
                    operand2,
                    Reference::Undefined,
                );
                state.op_insts.insert(op_node, store);

                lvalue = operand2;
                operand1 = self.step_literal(log, at);
                validate_lvalue = true;
            }
            _ => {}
        }

        if validate_lvalue && !lvalue.is_defined() {
            log.log(DiagnosticCode::ExpressionNoLvalue, at.0, at.1, &[]);
        }

        let worker = state.workers.last_mut().expect("worker");
        let inst = worker.execute(
            &mut state.cfg,
            log,
            at,
            Self::opid_to_opcode(opid),
            lvalue,
            operand1,
            operand2,
        );

        // a post-step override keeps pointing at the capture
        state.op_insts.entry(op_node).or_insert(inst);
    }

    /// Expression walk: reduces the postfix sibling order into a single
    /// block of code, then expands logical operators into control flow.
    fn walk_expression(
        &mut self,
        log: &mut DiagnosticLog,
        state: &mut WalkState,
        expression: NodeId,
    ) {
        let at = self.at(expression);
        let first_child = self.ast.first_child(expression);

        // if it starts with an operator (or is empty), it is invalid
        let Some(first_child) = first_child else {
            log.log(DiagnosticCode::ExpressionNoOperand, at.0, at.1, &[]);
            return;
        };
        if self.ast.kind(first_child) == NodeKind::Operator {
            log.log(DiagnosticCode::ExpressionNoOperand, at.0, at.1, &[]);
            return;
        }

        // remember where this expression's code starts
        let first_marker = {
            let worker = state.workers.last().expect("worker");
            worker
                .current_block()
                .and_then(|b| state.cfg.block(b).inst_last)
        };

        if self.ast.next_sibling(first_child).is_none() {
            // minimum case: a constant expression with a single operand
            let constant =
                self.interpret_operand(log, state, Some(first_child));
            let worker = state.workers.last_mut().expect("worker");
            worker.execute(
                &mut state.cfg,
                log,
                at,
                Opcode::Store,
                Reference::Undefined,
                constant,
                Reference::Undefined,
            );
            return;
        }

        let last_child =
            self.ast.last_child(expression).expect("children exist");
        if self.ast.kind(last_child) != NodeKind::Operator {
            log.log(DiagnosticCode::ExpressionNoOperator, at.0, at.1, &[]);
            return;
        }

        // reduction walks the postfix order; a side map of previous-sibling
        // overrides makes a reduced operator enclose its whole instruction
        // so later steps jump over it
        let mut prev_override: HashMap<NodeId, Option<NodeId>> =
            HashMap::new();
        let prev_of = |overrides: &HashMap<NodeId, Option<NodeId>>,
                       ast: &Ast,
                       node: NodeId| {
            overrides
                .get(&node)
                .copied()
                .unwrap_or_else(|| ast.prev_sibling(node))
        };

        let mut needs_expansion = false;
        let mut top = Some(first_child);

        while let Some(mut cursor) = top {
            // locate the next operator
            while self.ast.kind(cursor) != NodeKind::Operator {
                match self.ast.next_sibling(cursor) {
                    Some(next) => cursor = next,
                    None => {
                        top = None;
                        break;
                    }
                }
            }
            if top.is_none() {
                break;
            }

            let op_node = cursor;
            let opid = self
                .ast
                .node(op_node)
                .payload
                .operator()
                .expect("operator node carries its id");

            // first operand is always the immediately previous entry
            let base1 = prev_of(&prev_override, self.ast, op_node);
            let Some(base1) = base1 else {
                log.log(DiagnosticCode::ExpressionNoOperand, at.0, at.1, &[]);
                break;
            };

            let base2 = if opid.operand_count() == 2 {
                let base2 = prev_of(&prev_override, self.ast, base1);
                if base2.is_none() {
                    log.log(
                        DiagnosticCode::ExpressionNoOperand,
                        at.0,
                        at.1,
                        &[],
                    );
                    break;
                }
                base2
            } else {
                None
            };

            // enclose the reduced instruction: stepping back from this
            // operator now jumps over all of its operands
            let enclosed_prev = match base2 {
                Some(base2) => prev_of(&prev_override, self.ast, base2),
                None => prev_of(&prev_override, self.ast, base1),
            };
            prev_override.insert(op_node, enclosed_prev);

            let operand1 = self.interpret_operand(log, state, base2);
            let operand2 = self.interpret_operand(log, state, Some(base1));
            self.execute_operator(log, state, op_node, operand1, operand2);

            if matches!(
                opid,
                OperatorId::LogicAnd
                    | OperatorId::LogicOr
                    | OperatorId::TernaryTest
                    | OperatorId::TernaryBranch
            ) {
                needs_expansion = true;
            }

            top = self.ast.next_sibling(op_node);
        }

        // the sequencing distinction of inc/dec lived in the earlier
        // store; the opcode reduces to plain arithmetic
        self.rewrite_step_opcodes(state, first_marker);

        if needs_expansion {
            // logical code must start its own block before expansion;
            // nested expansion may already have moved the cursor past the
            // marker's block
            if let Some(first_marker) = first_marker {
                let worker = state.workers.last_mut().expect("worker");
                let block = worker.current_block().expect("block exists");

                if state.cfg.inst(first_marker).block == Some(block) {
                    let tail = state
                        .cfg
                        .split_block_after(block, Some(first_marker));
                    state.cfg.new_edge(block, tail, EdgeKind::Any);
                    worker.cur = Some(tail);
                }
            }

            self.expand_logical_precedence(state);
        }
    }

    fn rewrite_step_opcodes(
        &mut self,
        state: &mut WalkState,
        first_marker: Option<InstId>,
    ) {
        let worker = state.workers.last().expect("worker");
        let Some(block) = worker.current_block() else {
            return;
        };

        let mut cursor = match first_marker {
            Some(marker)
                if state.cfg.inst(marker).block == Some(block) =>
            {
                Some(marker)
            }
            _ => state.cfg.block(block).inst_first,
        };

        while let Some(id) = cursor {
            let inst = state.cfg.inst_mut(id);
            match inst.op {
                Opcode::PreInc | Opcode::PostInc => inst.op = Opcode::Add,
                Opcode::PreDec | Opcode::PostDec => inst.op = Opcode::Sub,
                _ => {}
            }
            cursor = state.cfg.inst(id).next;
        }
    }

    /// Post-hoc expansion of short-circuit and ternary forms.
    ///
    /// The current block holds straight-line code containing logical
    /// operator instructions; each one splits the block at the operator
    /// instruction and introduces the branch structure.
    fn expand_logical_precedence(&mut self, state: &mut WalkState) {
        let worker = state.workers.last_mut().expect("worker");
        let Some(mut block) = worker.current_block() else {
            return;
        };

        let mut cursor = state.cfg.block(block).inst_first;

        while let Some(id) = cursor {
            let op = state.cfg.inst(id).op;

            match op {
                Opcode::LogicAnd | Opcode::LogicOr => {
                    // short-circuit: lhs test block, rhs block holding the
                    // operator instruction, common join
                    let prev = state.cfg.inst(id).prev;
                    let rhs = state.cfg.split_block_after(block, prev);
                    let join = state.cfg.split_block_after(rhs, Some(id));

                    state.cfg.push_back(
                        block,
                        Instruction::new(Opcode::Test),
                    );
                    state.cfg.block_mut(block).kind = BlockKind::Test;

                    let (taken, short) = if op == Opcode::LogicAnd {
                        (EdgeKind::True, EdgeKind::False)
                    } else {
                        (EdgeKind::False, EdgeKind::True)
                    };

                    state.cfg.new_edge(block, rhs, taken);
                    state.cfg.new_edge(block, join, short);
                    state.cfg.new_edge(rhs, join, EdgeKind::Any);

                    block = join;
                    cursor = state.cfg.block(join).inst_first;
                }
                Opcode::TernaryTest => {
                    let branch = match state.cfg.inst(id).operand2 {
                        Reference::Inst(branch)
                            if state.cfg.inst(branch).op
                                == Opcode::TernaryBranch =>
                        {
                            branch
                        }
                        _ => {
                            // malformed ternary was already diagnosed
                            cursor = state.cfg.inst(id).next;
                            continue;
                        }
                    };

                    let (true_ref, false_ref) = {
                        let b = state.cfg.inst(branch);
                        (b.operand1, b.operand2)
                    };

                    // carve out the branch-pair instruction as the true
                    // arm, synthesize the false arm, let the test
                    // instruction become the value join
                    let before_branch = state.cfg.inst(branch).prev;
                    let true_arm =
                        state.cfg.split_block_after(block, before_branch);
                    let join =
                        state.cfg.split_block_after(true_arm, Some(branch));

                    {
                        let b = state.cfg.inst_mut(branch);
                        b.op = Opcode::Store;
                        b.operand1 = true_ref;
                        b.operand2 = Reference::Undefined;
                    }

                    let false_arm = state.cfg.new_block(
                        state.cfg.block(block).in_loop,
                    );
                    let mut store = Instruction::new(Opcode::Store);
                    store.operand1 = false_ref;
                    let false_store = state.cfg.push_back(false_arm, store);

                    state
                        .cfg
                        .push_back(block, Instruction::new(Opcode::Test));
                    state.cfg.block_mut(block).kind = BlockKind::Test;

                    state.cfg.new_edge(block, true_arm, EdgeKind::True);
                    state.cfg.new_edge(block, false_arm, EdgeKind::False);
                    // arm order fixes the φ operand slots
                    state.cfg.new_edge(true_arm, join, EdgeKind::Any);
                    state.cfg.new_edge(false_arm, join, EdgeKind::Any);

                    {
                        let test = state.cfg.inst_mut(id);
                        test.op = Opcode::Phi;
                        test.operand1 = Reference::Undefined;
                        test.operand2 = Reference::Undefined;
                        test.phi_operands =
                            vec![Some(branch), Some(false_store)];
                    }

                    block = join;
                    cursor = state.cfg.inst(id).next;
                }
                _ => {
                    cursor = state.cfg.inst(id).next;
                }
            }
        }

        let worker = state.workers.last_mut().expect("worker");
        worker.cur = Some(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;
    use crate::compiler::resolver::Resolver;

    fn walk(source: &str) -> (SymbolContext, DiagnosticLog) {
        let mut parser = Parser::new(source);
        let root = parser.parse();
        let mut log = parser.log;

        let mut resolver = Resolver::new(source, &parser.ast);
        resolver.resolve(&mut log, root);

        let mut walker = Walker::new(source, &parser.ast, resolver.ctx);
        walker.run(&mut log);

        (walker.ctx, log)
    }

    fn method_cfg<'c>(
        ctx: &'c SymbolContext,
        mangled: &str,
    ) -> &'c Cfg {
        let top = &ctx.top_levels[0];
        ctx.defs
            .get(top.members[mangled])
            .as_method()
            .unwrap()
            .code
            .as_ref()
            .unwrap()
    }

    #[test]
    fn straight_line_method() {
        let (ctx, log) =
            walk("class C { int x; int f(int a) { x = a + 1; return x; } }");

        assert!(!log.has_errors(), "{}", log.render("t"));

        let cfg = method_cfg(&ctx, "fI");

        // explicit empty entry, then the straight-line body
        let entry = cfg.entry.unwrap();
        assert!(cfg.block(entry).inst_first.is_none());
        let body = cfg.successors(entry).next().unwrap();

        let ops: Vec<_> = cfg
            .block_insts(body)
            .map(|i| cfg.inst(i).op)
            .collect();
        assert_eq!(
            ops,
            vec![Opcode::Add, Opcode::Assign, Opcode::Store, Opcode::Return]
        );

        // the return retagged its block; the graph grew one block past it
        assert_eq!(cfg.block(body).kind, BlockKind::Exit);
    }

    #[test]
    fn while_loop_shape() {
        let (ctx, log) = walk(
            "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }",
        );

        assert!(!log.has_errors(), "{}", log.render("t"));

        let cfg = method_cfg(&ctx, "fI");

        // entry → test; test branches true into the body and false out,
        // and the body jumps back
        let entry = cfg.entry.unwrap();
        let test = cfg.successors(entry).next().unwrap();
        assert_eq!(cfg.block(test).kind, BlockKind::Test);

        let kinds: Vec<_> = cfg
            .block(test)
            .out_edges
            .iter()
            .map(|e| cfg.edge(*e).kind)
            .collect();
        assert!(kinds.contains(&EdgeKind::True));
        assert!(kinds.contains(&EdgeKind::False));

        // loop-back edge is labeled jump and targets the test block,
        // which joins the entry path and the back edge
        assert!(cfg
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Jump && e.to == test));
        assert_eq!(cfg.block(test).in_edges.len(), 2);
    }

    #[test]
    fn post_increment_sequencing() {
        // b = 1; b++ + b; the first capture reads the pre-step value
        let (ctx, log) = walk(
            "class C { int f() { int b = 1; b++ + b; return b; } }",
        );

        assert!(!log.has_errors(), "{}", log.render("t"));

        let cfg = method_cfg(&ctx, "f");
        let body = cfg.successors(cfg.entry.unwrap()).next().unwrap();
        let ops: Vec<_> = cfg
            .block_insts(body)
            .map(|i| cfg.inst(i).op)
            .collect();

        // Store(1), Assign(b), Store(b), Add(b,1), Add(store, b), Store, Return
        assert_eq!(ops[0], Opcode::Store);
        assert_eq!(ops[1], Opcode::Assign);
        assert_eq!(ops[2], Opcode::Store);
        assert_eq!(ops[3], Opcode::Add);
        assert_eq!(ops[4], Opcode::Add);

        // the outer add reads the capture instruction, not the variable
        let outer = cfg.block_insts(body).nth(4).unwrap();
        let capture = cfg.block_insts(body).nth(2).unwrap();
        assert_eq!(cfg.inst(outer).operand1, Reference::Inst(capture));
    }

    #[test]
    fn pre_increment_reads_variable() {
        // ++b + b reads the stepped variable on both sides
        let (ctx, log) = walk(
            "class C { int f() { int b = 1; ++b + b; return b; } }",
        );

        assert!(!log.has_errors(), "{}", log.render("t"));

        let cfg = method_cfg(&ctx, "f");
        let body = cfg.successors(cfg.entry.unwrap()).next().unwrap();
        let ops: Vec<_> = cfg
            .block_insts(body)
            .map(|i| cfg.inst(i).op)
            .collect();

        // Store(1), Assign(b), Add(b <- 1+b), Add(inc, b), Store, Return
        assert_eq!(
            &ops[..4],
            &[Opcode::Store, Opcode::Assign, Opcode::Add, Opcode::Add]
        );

        let inc = cfg.block_insts(body).nth(2).unwrap();
        assert!(cfg.inst(inc).lvalue.as_var_def(&ctx.defs).is_some());
    }

    #[test]
    fn if_else_join_shape() {
        let (ctx, log) = walk(
            "class C { int f(int a) { if (a < 1) { a = 1; } else { a = 2; } return a; } }",
        );

        assert!(!log.has_errors(), "{}", log.render("t"));

        let cfg = method_cfg(&ctx, "fI");
        let test = cfg.successors(cfg.entry.unwrap()).next().unwrap();
        assert_eq!(cfg.block(test).kind, BlockKind::Test);

        // both arms converge on the join created before the else
        let join = cfg
            .blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.in_edges.len() == 2)
            .map(|(i, _)| i)
            .expect("join block exists");

        let preds: Vec<_> = cfg
            .predecessors(BlockId::from_index(join))
            .collect();
        assert_eq!(preds.len(), 2);
    }

    #[test]
    fn break_without_loop_is_diagnosed() {
        let (_, log) = walk("class C { int f() { break; return 0; } }");
        assert!(log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::BreakUnbound));
    }

    #[test]
    fn statements_after_return_warn() {
        let (_, log) =
            walk("class C { int f() { return 0; int x = 1; } }");
        assert!(log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::UnreachableStatement));
    }

    #[test]
    fn logical_and_expands_to_short_circuit() {
        let (ctx, log) = walk(
            "class C { int f(int a, int b) { int r = a < 1 && b < 2; return r; } }",
        );

        assert!(!log.has_errors(), "{}", log.render("t"));

        let cfg = method_cfg(&ctx, "fII");

        // expansion produced a test block with true and false edges
        let test = cfg
            .blocks
            .iter()
            .position(|b| b.kind == BlockKind::Test)
            .expect("test block exists");
        let kinds: Vec<_> = cfg
            .block(BlockId::from_index(test))
            .out_edges
            .iter()
            .map(|e| cfg.edge(*e).kind)
            .collect();

        assert!(kinds.contains(&EdgeKind::True));
        assert!(kinds.contains(&EdgeKind::False));
    }

    #[test]
    fn member_initializer_graph() {
        let (ctx, log) = walk("class C { int x = 1 + 2; int y; }");

        assert!(!log.has_errors(), "{}", log.render("t"));

        let top = &ctx.top_levels[0];
        let cfg = top.member_init_code.as_ref().expect("member init code");

        let entry = cfg.entry.unwrap();
        let ops: Vec<_> = cfg
            .block_insts(entry)
            .map(|i| cfg.inst(i).op)
            .collect();

        // x: Add + Assign, then y: Init
        assert_eq!(ops, vec![Opcode::Add, Opcode::Assign, Opcode::Init]);
    }

    #[test]
    fn local_pool_collects_all_scopes() {
        let (ctx, log) = walk(
            "class C { int f(int a) { int x = 1; { int y = 2; } return a; } }",
        );

        assert!(!log.has_errors(), "{}", log.render("t"));

        let top = &ctx.top_levels[0];
        let method = ctx.defs.get(top.members["fI"]).as_method().unwrap();

        // y flushed first (inner scope), then the method scope in
        // insertion order: the parameter, then x
        let names: Vec<_> = method
            .locals
            .iter()
            .map(|d| ctx.defs.get(*d).as_variable().unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["y", "a", "x"]);

        // lids follow pool order
        for (i, def) in method.locals.iter().enumerate() {
            assert_eq!(ctx.defs.get(*def).as_variable().unwrap().ordinal, i);
        }
    }
}

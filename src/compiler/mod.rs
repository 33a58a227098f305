//! Compilation pipeline driver.
//!
//! bytes → tokens → AST → global symbol table → per-method CFG → SSA →
//! liveness → register allocation → allocated SSA.
//!
//! Every phase writes diagnostics into the shared log and continues when
//! possible; the pipeline result carries the full log so callers can
//! decide what to do with partially broken units. Identical input
//! produces identical ids, allocation choices and diagnostics.

pub mod ast;
pub mod error;
pub mod expression;
pub mod lexer;
pub mod number;
pub mod parser;
pub mod resolver;
pub mod scope;

use log::{debug, info};
use thiserror::Error;

use crate::compiler::ast::Ast;
use crate::compiler::error::{DiagnosticLog, Summary};
use crate::compiler::parser::Parser;
use crate::compiler::resolver::Resolver;
use crate::compiler::scope::{DefId, Definition, SymbolContext};
use crate::ir::walk::Walker;
use crate::optimizer::{AllocatorKind, Optimizer};

#[derive(Debug, Error)]
pub enum CompileError {
    /// the unit was parsed but carries error-level diagnostics
    #[error("compilation failed with {0} error(s)")]
    HasErrors(usize),
}

/// Compilation options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// number of registers available to the allocators
    pub registers: usize,
    pub allocator: AllocatorKind,
    /// skip SSA/allocation entirely (front-end only runs)
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            registers: 8,
            allocator: AllocatorKind::Coloring,
            optimize: true,
        }
    }
}

/// Everything the back-end needs to emit a JIL container for one unit.
pub struct CompilationUnit {
    pub ast: Ast,
    pub ctx: SymbolContext,
    pub log: DiagnosticLog,
}

impl CompilationUnit {
    pub fn summary(&self) -> Summary {
        self.log.summary()
    }
}

/// Member variable definitions of a top level, in `mid` order.
fn member_variables(ctx: &SymbolContext, top: usize) -> Vec<DefId> {
    let mut members: Vec<DefId> = ctx.top_levels[top]
        .members
        .values()
        .copied()
        .filter(|id| matches!(ctx.defs.get(*id), Definition::Variable(_)))
        .collect();

    members.sort_by_key(|id| {
        ctx.defs.get(*id).as_variable().expect("variable").ordinal
    });

    members
}

/// Runs SSA construction, liveness and register allocation over one
/// routine's CFG, writing results back through the context.
fn optimize_routine(
    ctx: &mut SymbolContext,
    log: &mut DiagnosticLog,
    options: &CompileOptions,
    member_defs: Vec<DefId>,
    mut code: crate::ir::Cfg,
    locals: Vec<DefId>,
) -> (crate::ir::Cfg, Vec<DefId>, usize) {
    let mut om = Optimizer::attach(
        &mut code,
        &mut ctx.defs,
        member_defs,
        locals,
        options.registers,
    );
    om.execute(log, options.allocator);

    let locals = core::mem::take(&mut om.local_defs);
    let stack_slots = om.profile.num_var_on_stack;

    (code, locals, stack_slots)
}

/// Compiles one source buffer into an allocated compilation unit.
///
/// Syntax and semantic diagnostics accumulate in the returned log; the
/// call itself only fails on conditions that prevent producing a unit at
/// all.
pub fn compile_source(
    source: &str,
    options: CompileOptions,
) -> CompilationUnit {
    info!("compiling unit ({} bytes)", source.len());

    // parse
    let mut parser = Parser::new(source);
    let root = parser.parse();
    let Parser { ast, mut log, .. } = parser;

    // first pass: global definitions
    let mut resolver = Resolver::new(source, &ast);
    resolver.resolve(&mut log, root);

    // second pass: per-routine CFG construction
    let mut walker = Walker::new(source, &ast, resolver.ctx);
    walker.run(&mut log);
    let mut ctx = walker.ctx;

    // mid-end: SSA, liveness, allocation per routine
    if options.optimize {
        for top in 0..ctx.top_levels.len() {
            let member_defs = member_variables(&ctx, top);

            // methods and constructors
            let routine_ids: Vec<DefId> = ctx.top_levels[top]
                .members
                .values()
                .copied()
                .filter(|id| {
                    ctx.defs
                        .get(*id)
                        .as_method()
                        .map(|m| m.code.is_some())
                        .unwrap_or(false)
                })
                .collect();

            for method_id in routine_ids {
                debug!("optimizing routine def{}", method_id.index());

                let (code, locals) = {
                    let method = ctx
                        .defs
                        .get_mut(method_id)
                        .as_method_mut()
                        .expect("routine is a method");
                    (
                        method.code.take().expect("routine has code"),
                        core::mem::take(&mut method.locals),
                    )
                };

                let (code, locals, stack_slots) = optimize_routine(
                    &mut ctx,
                    &mut log,
                    &options,
                    member_defs.clone(),
                    code,
                    locals,
                );

                let method = ctx
                    .defs
                    .get_mut(method_id)
                    .as_method_mut()
                    .expect("routine is a method");
                method.code = Some(code);
                method.locals = locals;
                method.stack_slots = stack_slots;
                method.reg_count = options.registers;
            }

            // member initializer code
            if let Some(code) = ctx.top_levels[top].member_init_code.take() {
                let locals =
                    core::mem::take(&mut ctx.top_levels[top].member_init_locals);
                let (code, locals, _) = optimize_routine(
                    &mut ctx,
                    &mut log,
                    &options,
                    member_defs.clone(),
                    code,
                    locals,
                );
                let top = &mut ctx.top_levels[top];
                top.member_init_code = Some(code);
                top.member_init_locals = locals;
            }

            // static initializer code
            if let Some(code) = ctx.top_levels[top].static_init_code.take() {
                let locals =
                    core::mem::take(&mut ctx.top_levels[top].static_init_locals);
                let (code, locals, _) = optimize_routine(
                    &mut ctx,
                    &mut log,
                    &options,
                    member_defs.clone(),
                    code,
                    locals,
                );
                let top = &mut ctx.top_levels[top];
                top.static_init_code = Some(code);
                top.static_init_locals = locals;
            }
        }
    }

    let summary = log.summary();
    info!(
        "unit compiled: {} error(s), {} warning(s)",
        summary.errors, summary.warnings
    );

    CompilationUnit { ast, ctx, log }
}

/// Convenience wrapper that turns error-level diagnostics into a hard
/// error, for callers that want the emission-skip behavior.
pub fn compile_source_strict(
    source: &str,
    options: CompileOptions,
) -> Result<CompilationUnit, CompileError> {
    let unit = compile_source(source, options);
    let summary = unit.summary();

    if summary.errors > 0 {
        return Err(CompileError::HasErrors(summary.errors));
    }

    Ok(unit)
}

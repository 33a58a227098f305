//! Mid-end scenarios: SSA shape, allocation soundness and spill behavior
//! under register pressure.

use std::fmt::Write as _;

use indoc::indoc;

use jil_core::compiler::scope::{
    AllocationKind, DefId, Definition, SymbolContext, VariableKind,
};
use jil_core::compiler::{
    compile_source, CompilationUnit, CompileOptions,
};
use jil_core::ir::{Cfg, Opcode, Reference};
use jil_core::logger::init_logger_debug;
use jil_core::optimizer::{defuse, liveness, AllocatorKind, Optimizer};

fn compile(source: &str, allocator: AllocatorKind, k: usize) -> CompilationUnit {
    init_logger_debug();

    let unit = compile_source(
        source,
        CompileOptions {
            registers: k,
            allocator,
            optimize: true,
        },
    );
    assert_eq!(unit.summary().errors, 0, "{}", unit.log.render("t"));
    unit
}

fn method_code<'u>(
    unit: &'u CompilationUnit,
    mangled: &str,
) -> (&'u Cfg, &'u jil_core::compiler::scope::MethodDef) {
    let top = &unit.ctx.top_levels[0];
    let method = unit
        .ctx
        .defs
        .get(top.members[mangled])
        .as_method()
        .unwrap();
    (method.code.as_ref().unwrap(), method)
}

fn member_variables(ctx: &SymbolContext, top: usize) -> Vec<DefId> {
    let mut members: Vec<DefId> = ctx.top_levels[top]
        .members
        .values()
        .copied()
        .filter(|id| matches!(ctx.defs.get(*id), Definition::Variable(_)))
        .collect();
    members.sort_by_key(|id| {
        ctx.defs.get(*id).as_variable().unwrap().ordinal
    });
    members
}

/// Re-derives live sets on the allocated CFG and checks that overlapping
/// locals never share a register.
fn assert_allocation_sound(unit: &CompilationUnit, mangled: &str) {
    let top_members = member_variables(&unit.ctx, 0);
    let top = &unit.ctx.top_levels[0];
    let method = unit
        .ctx
        .defs
        .get(top.members[mangled])
        .as_method()
        .unwrap();

    let mut code = method.code.clone().unwrap();
    let mut defs_copy = unit.ctx.defs.clone();

    let mut om = Optimizer::attach(
        &mut code,
        &mut defs_copy,
        top_members,
        method.locals.clone(),
        method.reg_count,
    );
    om.apply_profile(&om.profile.clone());
    defuse::analyze(&mut om);
    liveness::analyze(&mut om);

    for item in &om.instructions {
        let mut live: Vec<usize> = item.live_in.iter().collect();
        live.extend(item.live_out.iter());
        live.sort_unstable();
        live.dedup();

        for (i, a) in live.iter().enumerate() {
            for b in live.iter().skip(i + 1) {
                if om.varmap_is_member(*a) || om.varmap_is_member(*b) {
                    continue;
                }

                let da = method.locals[om.varmap_index_to_lid(*a)];
                let db = method.locals[om.varmap_index_to_lid(*b)];
                let va = unit.ctx.defs.get(da).as_variable().unwrap();
                let vb = unit.ctx.defs.get(db).as_variable().unwrap();

                if va.allocation.kind == AllocationKind::Register
                    && vb.allocation.kind == AllocationKind::Register
                {
                    assert_ne!(
                        va.allocation.location, vb.allocation.location,
                        "overlapping locals {} and {} share a register",
                        va.name, vb.name,
                    );
                }
            }
        }
    }
}

#[test]
fn loop_variable_lands_in_one_register() {
    // scenario: the φ at the test merges a₀ (entry) and a_body (body);
    // after allocation `a` resides in a single register across the loop
    let source =
        "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }";

    for allocator in [AllocatorKind::Coloring, AllocatorKind::LinearScan] {
        let unit = compile(source, allocator, 8);
        let (_, method) = method_code(&unit, "fI");

        let a = method
            .locals
            .iter()
            .find(|d| {
                unit.ctx.defs.get(**d).as_variable().unwrap().name == "a"
            })
            .unwrap();
        let var = unit.ctx.defs.get(*a).as_variable().unwrap();

        assert_eq!(var.allocation.kind, AllocationKind::Register);
        assert_allocation_sound(&unit, "fI");
    }
}

#[test]
fn member_write_gets_fresh_version() {
    // scenario: f has one block; after SSA the member x has version 0 on
    // entry and a new version after the write
    let unit = compile(
        "class C { int x; int f(int a) { x = a + 1; return x; } }",
        AllocatorKind::LinearScan,
        8,
    );
    let (cfg, _) = method_code(&unit, "fI");

    let assign = cfg
        .insts
        .iter()
        .find(|i| i.block.is_some() && i.op == Opcode::Assign)
        .expect("member write");

    assert!(matches!(assign.lvalue, Reference::Def { ver: 1, .. }));
}

#[test]
fn allocators_agree_on_soundness() {
    let source = indoc! {"
        class C {
            int f(int a, int b) {
                int c = a + b;
                int d = c + a;
                int e = d + b;
                while (e < 100) { e = e + c; }
                return e + d;
            }
        }
    "};

    for allocator in [AllocatorKind::Coloring, AllocatorKind::LinearScan] {
        let unit = compile(source, allocator, 4);
        assert_allocation_sound(&unit, "fII");
    }
}

#[test]
fn pressure_forces_spills_with_distinct_slots() {
    // scenario: 40 simultaneously live locals against K = 8 registers
    let mut body = String::new();
    for i in 0..40 {
        let _ = writeln!(body, "        int v{i} = {i};");
    }
    let sum = (0..40)
        .map(|i| format!("v{i}"))
        .collect::<Vec<_>>()
        .join(" + ");
    let source = format!(
        "class C {{\n    int f() {{\n{body}        int s = {sum};\n        return s;\n    }}\n}}\n"
    );

    let unit = compile(&source, AllocatorKind::Coloring, 8);
    let (cfg, method) = method_code(&unit, "f");

    // at least 32 of the 40 cannot be held in registers
    let spilled: Vec<usize> = method
        .locals
        .iter()
        .filter_map(|d| {
            let var = unit.ctx.defs.get(*d).as_variable().unwrap();
            (var.kind != VariableKind::Temporary
                && var.allocation.kind == AllocationKind::Stack)
                .then_some(var.allocation.location)
        })
        .collect();

    assert!(
        spilled.len() >= 32,
        "expected at least 32 spills, got {}",
        spilled.len()
    );

    // every spilled variable owns a distinct stack slot
    let mut slots = spilled.clone();
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), spilled.len());
    assert!(method.stack_slots >= slots.len());

    // slot traffic instructions carry their locations
    let mut reads = 0;
    let mut writes = 0;
    for inst in cfg.insts.iter().filter(|i| i.block.is_some()) {
        match inst.op {
            Opcode::Read => {
                assert!(inst.rw_stack_loc.is_some());
                reads += 1;
            }
            Opcode::Write => {
                assert!(inst.rw_stack_loc.is_some());
                writes += 1;
            }
            _ => {}
        }
    }
    assert!(reads >= spilled.len());
    assert!(writes >= spilled.len());

    // every remaining read of a stack-allocated variable goes through a
    // temporary: only Write instructions may still name it
    for inst in cfg.insts.iter().filter(|i| i.block.is_some()) {
        for operand in [inst.operand1, inst.operand2] {
            let Some(def) = operand.as_def() else {
                continue;
            };
            let Some(var) = unit.ctx.defs.get(def).as_variable() else {
                continue;
            };

            if var.allocation.kind == AllocationKind::Stack {
                assert_eq!(
                    inst.op,
                    Opcode::Write,
                    "unbracketed read of spilled {}",
                    var.name
                );
            }
        }
    }

    assert_allocation_sound(&unit, "f");
}

#[test]
fn linear_scan_flags_unused_variables() {
    let source = "class C { int f() { int unused = 0; return 1; } }";

    let unit = compile_source(
        source,
        CompileOptions {
            registers: 8,
            allocator: AllocatorKind::LinearScan,
            optimize: true,
        },
    );

    // `unused` is written once and never read, so it never becomes live
    // and no storage is assigned
    assert!(unit.log.diagnostics().any(
        |d| d.code == jil_core::compiler::error::DiagnosticCode::UnusedVariable
    ));

    let top = &unit.ctx.top_levels[0];
    let method = unit.ctx.defs.get(top.members["f"]).as_method().unwrap();
    let unused = method
        .locals
        .iter()
        .find(|d| {
            unit.ctx.defs.get(**d).as_variable().unwrap().name == "unused"
        })
        .unwrap();
    assert_eq!(
        unit.ctx.defs.get(*unused).as_variable().unwrap().allocation.kind,
        AllocationKind::Undefined
    );
}

#[test]
fn spill_convergence_is_deterministic() {
    let mut body = String::new();
    for i in 0..16 {
        let _ = writeln!(body, "        int v{i} = {i};");
    }
    let sum = (0..16)
        .map(|i| format!("v{i}"))
        .collect::<Vec<_>>()
        .join(" + ");
    let source = format!(
        "class C {{\n    int f() {{\n{body}        int s = {sum};\n        return s;\n    }}\n}}\n"
    );

    let render = |unit: &CompilationUnit| {
        let (cfg, method) = method_code(unit, "f");
        let mut out = cfg.render(&unit.ctx.defs);
        for d in &method.locals {
            let var = unit.ctx.defs.get(*d).as_variable().unwrap();
            let _ = writeln!(
                out,
                "{} -> {:?} {}",
                var.name, var.allocation.kind, var.allocation.location
            );
        }
        out
    };

    let a = compile(&source, AllocatorKind::Coloring, 4);
    let b = compile(&source, AllocatorKind::Coloring, 4);

    assert_eq!(render(&a), render(&b));
}

#[test]
fn phi_count_matches_join_predecessors_before_elimination() {
    // run the front end and SSA by hand to observe φ before elimination
    let source =
        "class C { int f(int a) { while (a < 10) { a = a + 1; } return a; } }";

    let unit = compile_source(
        source,
        CompileOptions {
            optimize: false,
            ..CompileOptions::default()
        },
    );
    let mut ctx = unit.ctx;

    let method_id = ctx.top_levels[0].members["fI"];
    let (mut code, locals) = {
        let m = ctx.defs.get_mut(method_id).as_method_mut().unwrap();
        (m.code.take().unwrap(), m.locals.clone())
    };

    {
        let mut om = Optimizer::attach(
            &mut code,
            &mut ctx.defs,
            Vec::new(),
            locals,
            8,
        );
        om.apply_profile(&om.profile.clone());
        jil_core::optimizer::ssa::build(&mut om);
    }

    for inst in code.insts.iter().filter(|i| i.block.is_some()) {
        if inst.op == Opcode::Phi {
            let block = inst.block.unwrap();
            assert_eq!(
                inst.phi_operands.len(),
                code.block(block).in_edges.len()
            );
        }
    }
}

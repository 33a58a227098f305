//! jil-core: front-end and mid-end of the JIL compiler.
//!
//! The pipeline turns one Java-like source file into, for every method,
//! constructor and member-initializer of every top-level type, an optimized
//! SSA control-flow graph with registers assigned to live locals:
//!
//! bytes → tokens → AST → global symbol table → per-method CFG → SSA →
//! liveness → register allocation (→ spill and repeat) → allocated SSA.
//!
//! Entry point: [`compiler::compile_source`].

pub mod compiler;
pub mod global;
pub mod ir;
pub mod logger;
pub mod optimizer;
pub mod utils;

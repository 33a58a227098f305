//! Definitions, scope frames and top-level descriptors.
//!
//! All named entities of one compilation unit live in a single definition
//! arena and are referenced by [`DefId`]. The global scope maps simple
//! names to top-level descriptors; each top level owns its member table and
//! literal table. A stack of scope frames provides hierarchical lookup
//! while method bodies are walked; popping a frame flushes its local
//! definitions into the caller-provided pool so liveness and spill data can
//! outlive the lexical scope.

use enumflags2::BitFlags;
use indexmap::IndexMap;

use crate::compiler::ast::{Modifier, NodeId};
use crate::compiler::error::{DiagnosticCode, DiagnosticLog};
use crate::compiler::lexer::{LineColumn, NumberBits, NumberKind};
use crate::compiler::number::{self, BinaryData};
use crate::global::jil;
use crate::ir::Cfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefId(u32);

impl DefId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> DefId {
        DefId(index as u32)
    }
}

/// Identifier of a top-level descriptor within the compilation unit.
pub type TopLevelId = usize;

/// Primitive value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// byte
    Int8,
    /// short
    Int16,
    /// int
    Int32,
    /// long
    Int64,
    /// char
    IntU16,
    /// float
    Single,
    /// double
    Double,
    Boolean,
    Void,
}

impl PrimitiveKind {
    pub fn jil_code(self) -> char {
        match self {
            PrimitiveKind::Int8 => jil::JIL_TYPE_BYTE,
            PrimitiveKind::Int16 => jil::JIL_TYPE_SHORT,
            PrimitiveKind::Int32 => jil::JIL_TYPE_INT,
            PrimitiveKind::Int64 => jil::JIL_TYPE_LONG,
            PrimitiveKind::IntU16 => jil::JIL_TYPE_CHAR,
            PrimitiveKind::Single => jil::JIL_TYPE_FLOAT,
            PrimitiveKind::Double => jil::JIL_TYPE_DOUBLE,
            PrimitiveKind::Boolean => jil::JIL_TYPE_BOOL,
            PrimitiveKind::Void => jil::JIL_TYPE_VOID,
        }
    }
}

/// Resolved base of a type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeBase {
    Primitive(PrimitiveKind),
    /// reference type by source name; resolution happens at link time
    Reference(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub base: TypeBase,
    pub dimensions: usize,
}

impl TypeName {
    /// JIL type descriptor, as used in mangled method names.
    pub fn descriptor(&self) -> String {
        let mut out = String::new();

        for _ in 0..self.dimensions {
            out.push(jil::JIL_TYPE_ARRAY_DIM);
        }

        match &self.base {
            TypeBase::Primitive(kind) => out.push(kind.jil_code()),
            TypeBase::Reference(name) => {
                out.push(jil::JIL_TYPE_OBJECT);
                out.push_str(name);
                out.push(';');
            }
        }

        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Member,
    Local,
    Parameter,
    Temporary,
}

/// Storage decision left behind by the register allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationKind {
    /// optimized out or never materialized
    #[default]
    Undefined,
    Register,
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    pub kind: AllocationKind,
    pub location: usize,
}

#[derive(Debug, Clone)]
pub struct VariableDef {
    pub modifiers: BitFlags<Modifier>,
    pub type_name: TypeName,
    pub kind: VariableKind,
    /// `mid` for members (declaration order), `lid` for everything else
    pub ordinal: usize,
    pub name: String,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, Default)]
pub struct MethodDef {
    pub modifiers: BitFlags<Modifier>,
    pub return_type: Option<TypeName>,
    pub is_constructor: bool,
    pub parameters: Vec<DefId>,
    /// local definition pool: parameters, locals and temporaries, in
    /// flush order; index is the variable's `lid`
    pub locals: Vec<DefId>,
    /// AST root for the lazy second-pass walk
    pub body: Option<NodeId>,
    pub code: Option<Cfg>,
    /// allocator results: register budget and spill slot count
    pub reg_count: usize,
    pub stack_slots: usize,
}

/// Named entity table value.
#[derive(Debug, Clone)]
pub enum Definition {
    Variable(VariableDef),
    Method(MethodDef),
    NumberLiteral { primitive: PrimitiveKind, imm: u64 },
    CharacterLiteral { imm: u64 },
    BooleanLiteral { imm: bool },
    StringLiteral { stream: Vec<u8>, wide_char: bool },
    NullLiteral,
}

impl Definition {
    pub fn as_variable(&self) -> Option<&VariableDef> {
        match self {
            Definition::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_variable_mut(&mut self) -> Option<&mut VariableDef> {
        match self {
            Definition::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&MethodDef> {
        match self {
            Definition::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn as_method_mut(&mut self) -> Option<&mut MethodDef> {
        match self {
            Definition::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Definition::NumberLiteral { .. }
                | Definition::CharacterLiteral { .. }
                | Definition::BooleanLiteral { .. }
                | Definition::StringLiteral { .. }
                | Definition::NullLiteral
        )
    }
}

/// Definition arena for one compilation unit.
#[derive(Debug, Default, Clone)]
pub struct Definitions {
    defs: Vec<Definition>,
}

impl Definitions {
    pub fn alloc(&mut self, def: Definition) -> DefId {
        let id = DefId(self.defs.len() as u32);
        self.defs.push(def);
        id
    }

    pub fn get(&self, id: DefId) -> &Definition {
        &self.defs[id.index()]
    }

    pub fn get_mut(&mut self, id: DefId) -> &mut Definition {
        &mut self.defs[id.index()]
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelKind {
    Class,
    Interface,
}

/// Top-level descriptor: a class or interface and everything it owns.
#[derive(Debug)]
pub struct TopLevel {
    pub kind: TopLevelKind,
    pub name: String,
    pub modifiers: BitFlags<Modifier>,
    pub extend: Option<String>,
    pub implement: Vec<String>,
    /// first body declaration node, for the lazy second pass
    pub node_first_body_decl: Option<NodeId>,
    /// member name (methods mangled) → definition
    pub members: IndexMap<String, DefId>,
    /// literal source text → definition
    pub literals: IndexMap<String, DefId>,
    pub num_member_variables: usize,
    pub member_init_code: Option<Cfg>,
    pub member_init_locals: Vec<DefId>,
    pub static_init_code: Option<Cfg>,
    pub static_init_locals: Vec<DefId>,
}

impl TopLevel {
    pub fn new(kind: TopLevelKind, name: String) -> Self {
        TopLevel {
            kind,
            name,
            modifiers: BitFlags::empty(),
            extend: None,
            implement: Vec::new(),
            node_first_body_decl: None,
            members: IndexMap::new(),
            literals: IndexMap::new(),
            num_member_variables: 0,
            member_init_code: None,
            member_init_locals: Vec::new(),
            static_init_code: None,
            static_init_locals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub package: String,
    pub on_demand: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Method,
    Plain,
    If,
    Else,
    For,
    While,
    Do,
    Try,
    Catch,
    Finally,
}

#[derive(Debug)]
struct ScopeFrame {
    #[allow(dead_code)]
    kind: ScopeKind,
    table: IndexMap<String, DefId>,
}

/// Compile-time dynamic stack of the current lookup hierarchy.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn push(&mut self, kind: ScopeKind) {
        self.frames.push(ScopeFrame {
            kind,
            table: IndexMap::new(),
        });
    }

    /// Pops the top frame, flushing its definitions into `pool` in
    /// insertion order. Ordinals (`lid`) are assigned by the caller.
    pub fn pop(&mut self, pool: Option<&mut Vec<DefId>>) -> bool {
        let Some(frame) = self.frames.pop() else {
            return false;
        };

        if let Some(pool) = pool {
            pool.extend(frame.table.values().copied());
        }

        true
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Hierarchical lookup, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<DefId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.table.get(name).copied())
    }

    pub fn contains_anywhere(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn insert(&mut self, name: String, def: DefId) {
        self.frames
            .last_mut()
            .expect("insert requires an open scope")
            .table
            .insert(name, def);
    }
}

/// Symbol state of one compilation unit across both passes.
#[derive(Debug, Default)]
pub struct SymbolContext {
    pub defs: Definitions,
    pub imports: IndexMap<String, ImportEntry>,
    pub globals: IndexMap<String, TopLevelId>,
    pub top_levels: Vec<TopLevel>,
    pub scopes: ScopeStack,
    pub working_top_level: Option<TopLevelId>,
}

impl SymbolContext {
    pub fn new() -> Self {
        SymbolContext::default()
    }

    pub fn working(&self) -> &TopLevel {
        &self.top_levels[self.working_top_level.expect("top level active")]
    }

    pub fn working_mut(&mut self) -> &mut TopLevel {
        let id = self.working_top_level.expect("top level active");
        &mut self.top_levels[id]
    }

    /// Hierarchical name lookup: scope stack first, then optionally the
    /// working top level's member table.
    pub fn use_name(&self, name: &str, lookup_top_level: bool) -> Option<DefId> {
        if let Some(def) = self.scopes.lookup(name) {
            return Some(def);
        }

        if lookup_top_level {
            if let Some(id) = self.working_top_level {
                return self.top_levels[id].members.get(name).copied();
            }
        }

        None
    }

    /// Registers a variable in the current lookup scope (or the member
    /// table if `member` is set), running duplicate and dimension checks.
    ///
    /// `declarator_dims` is the dimension count attached to the declarator
    /// (`T x[]`); a non-zero value must agree with the type's own
    /// dimension or a diagnostic is raised.
    #[allow(clippy::too_many_arguments)]
    pub fn define_variable(
        &mut self,
        log: &mut DiagnosticLog,
        at: (LineColumn, LineColumn),
        name: &str,
        mut type_name: TypeName,
        modifiers: BitFlags<Modifier>,
        kind: VariableKind,
        declarator_dims: usize,
    ) -> Option<DefId> {
        let member = kind == VariableKind::Member;

        let (dup, dim_amb, dim_dup) = match kind {
            VariableKind::Member => (
                DiagnosticCode::MemberVariableDuplicate,
                DiagnosticCode::MemberVariableDimensionAmbiguous,
                DiagnosticCode::MemberVariableDimensionDuplicate,
            ),
            VariableKind::Parameter => (
                DiagnosticCode::ParameterDuplicate,
                DiagnosticCode::ParameterDimensionAmbiguous,
                DiagnosticCode::ParameterDuplicate,
            ),
            _ => (
                DiagnosticCode::LocalVariableDuplicate,
                DiagnosticCode::LocalVariableDimensionAmbiguous,
                DiagnosticCode::LocalVariableDimensionDuplicate,
            ),
        };

        // clash against the hierarchy, imports and global names
        let clash = if member {
            self.working().members.contains_key(name)
        } else {
            self.scopes.contains_anywhere(name)
        };

        if clash
            || self.imports.contains_key(name)
            || self.globals.contains_key(name)
        {
            log.log(dup, at.0, at.1, &[name]);
            return None;
        }

        // `T[] x` vs `T x[]` reconciliation
        if declarator_dims > 0 {
            if type_name.dimensions != 0
                && type_name.dimensions != declarator_dims
            {
                log.log(dim_amb, at.0, at.1, &[name]);
            } else if type_name.dimensions == declarator_dims {
                log.log(dim_dup, at.0, at.1, &[name]);
            } else {
                type_name.dimensions = declarator_dims;
            }
        }

        let ordinal = if member {
            let working = self.working_mut();
            let mid = working.num_member_variables;
            working.num_member_variables += 1;
            mid
        } else {
            // lid is assigned when the scope flushes into the local pool
            0
        };

        let def = self.defs.alloc(Definition::Variable(VariableDef {
            modifiers,
            type_name,
            kind,
            ordinal,
            name: name.to_string(),
            allocation: Allocation::default(),
        }));

        if member {
            self.working_mut().members.insert(name.to_string(), def);
        } else {
            self.scopes.insert(name.to_string(), def);
        }

        Some(def)
    }

    /// Registers a method (or constructor) under its mangled name.
    pub fn define_method(
        &mut self,
        log: &mut DiagnosticLog,
        at: (LineColumn, LineColumn),
        mangled: &str,
        method: MethodDef,
    ) -> Option<DefId> {
        if self.working().members.contains_key(mangled)
            || self.imports.contains_key(mangled)
        {
            log.log(DiagnosticCode::MethodDuplicate, at.0, at.1, &[mangled]);
            return None;
        }

        // a method may share the simple name of its own class: that is the
        // constructor case; any other global clash is an error
        if let Some(id) = self.globals.get(mangled) {
            let own_class = Some(*id) == self.working_top_level
                && self.working().kind == TopLevelKind::Class
                && method.is_constructor;

            if !own_class {
                log.log(
                    DiagnosticCode::MethodDuplicate,
                    at.0,
                    at.1,
                    &[mangled],
                );
                return None;
            }
        }

        let def = self.defs.alloc(Definition::Method(method));
        self.working_mut().members.insert(mangled.to_string(), def);
        Some(def)
    }

    /// Interns a literal at the working top level, keyed by source text.
    ///
    /// Numeric conversion runs once per distinct spelling; per-type
    /// overflow warnings are raised at the first occurrence.
    pub fn intern_literal(
        &mut self,
        log: &mut DiagnosticLog,
        at: (LineColumn, LineColumn),
        text: &str,
        literal: LiteralValue,
    ) -> DefId {
        if let Some(existing) = self.working().literals.get(text) {
            return *existing;
        }

        let def = match literal {
            LiteralValue::Number { kind, bits } => {
                let data = number::string_to_binary(
                    text,
                    crate::compiler::lexer::NumberInfo { kind, bits },
                );

                let primitive = match (kind, bits) {
                    (NumberKind::FpSingle, _) => PrimitiveKind::Single,
                    (NumberKind::FpDouble, _) => PrimitiveKind::Double,
                    (_, NumberBits::Long) => PrimitiveKind::Int64,
                    _ => PrimitiveKind::Int32,
                };

                log_overflow(log, at, &data, primitive);

                Definition::NumberLiteral {
                    primitive,
                    imm: data.bits,
                }
            }
            LiteralValue::Character => {
                let data = number::char_literal_value(text);
                log_overflow(log, at, &data, PrimitiveKind::IntU16);
                Definition::CharacterLiteral { imm: data.bits }
            }
            LiteralValue::Boolean(value) => {
                Definition::BooleanLiteral { imm: value }
            }
            LiteralValue::String => {
                let encoded = number::string_literal_stream(text);
                Definition::StringLiteral {
                    stream: encoded.stream,
                    wide_char: encoded.wide_char,
                }
            }
            LiteralValue::Null => Definition::NullLiteral,
        };

        let def = self.defs.alloc(def);
        self.working_mut().literals.insert(text.to_string(), def);
        def
    }
}

/// Literal classification for interning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralValue {
    Number { kind: NumberKind, bits: NumberBits },
    Character,
    Boolean(bool),
    String,
    Null,
}

/// Surfaces the overflow flags relevant to the literal's own width; the
/// remaining flags stay available on the binary data for later narrowing
/// conversions.
fn log_overflow(
    log: &mut DiagnosticLog,
    at: (LineColumn, LineColumn),
    data: &BinaryData,
    primitive: PrimitiveKind,
) {
    use crate::compiler::number::Overflow;

    let relevant: &[(Overflow, DiagnosticCode)] = match primitive {
        PrimitiveKind::Int32 => {
            &[(Overflow::Int32, DiagnosticCode::NumberOverflowInt32)]
        }
        PrimitiveKind::Int64 => {
            &[(Overflow::Int64, DiagnosticCode::NumberOverflowInt64)]
        }
        PrimitiveKind::IntU16 => {
            &[(Overflow::U16, DiagnosticCode::NumberOverflowU16)]
        }
        PrimitiveKind::Single => &[(
            Overflow::Fp32Exponent,
            DiagnosticCode::NumberOverflowFp32Exponent,
        )],
        PrimitiveKind::Double => &[(
            Overflow::Fp64Exponent,
            DiagnosticCode::NumberOverflowFp64Exponent,
        )],
        _ => &[],
    };

    for (flag, code) in relevant {
        if data.overflow.contains(*flag) {
            log.log(*code, at.0, at.1, &[]);
        }
    }
}

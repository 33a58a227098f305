//! First pass: global definitions.
//!
//! Walks imports, package and top-level declarations once. Each class
//! registers its name in the global scope, installs its member table and
//! registers every member declaration. Method bodies and initializer
//! expressions are NOT walked here; their AST roots are stored on the
//! definitions so the second pass can find them lazily.
//!
//! Methods are keyed by `simple name ∥ JIL-encoded parameter types`, so
//! overloads become distinct keys; constructors mangle the class name as
//! the method name.

use log::debug;

use crate::compiler::ast::{Ast, NodeId, NodeKind, Payload};
use crate::compiler::error::{DiagnosticCode, DiagnosticLog};
use crate::compiler::lexer::{Lexeme, Token};
use crate::compiler::scope::{
    MethodDef, PrimitiveKind, SymbolContext, TopLevel, TopLevelKind,
    TypeBase, TypeName, VariableKind,
};

pub struct Resolver<'a> {
    pub source: &'a str,
    pub ast: &'a Ast,
    pub ctx: SymbolContext,
}

/// Concatenated `a.b.c` text of a Name node.
pub fn name_text(ast: &Ast, source: &str, name: NodeId) -> String {
    let mut out = String::new();

    for unit in ast.children(name) {
        if let Some(token) = ast.node(unit).payload.token() {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(token.text(source));
        }
    }

    out
}

pub fn primitive_from_lexeme(lexeme: Lexeme) -> Option<PrimitiveKind> {
    Some(match lexeme {
        Lexeme::ByteKW => PrimitiveKind::Int8,
        Lexeme::ShortKW => PrimitiveKind::Int16,
        Lexeme::IntKW => PrimitiveKind::Int32,
        Lexeme::LongKW => PrimitiveKind::Int64,
        Lexeme::CharKW => PrimitiveKind::IntU16,
        Lexeme::FloatKW => PrimitiveKind::Single,
        Lexeme::DoubleKW => PrimitiveKind::Double,
        Lexeme::BooleanKW => PrimitiveKind::Boolean,
        Lexeme::VoidKW => PrimitiveKind::Void,
        _ => return None,
    })
}

/// Interprets a `Type` node into a type name.
pub fn type_from_node(ast: &Ast, source: &str, node: NodeId) -> TypeName {
    debug_assert_eq!(ast.kind(node), NodeKind::Type);

    let dimensions = ast.node(node).payload.dimension();
    let id = ast
        .node(node)
        .payload
        .token()
        .expect("type node carries its base token");

    let base = match primitive_from_lexeme(id.lexeme) {
        Some(kind) => TypeBase::Primitive(kind),
        None => {
            let name = ast
                .first_child(node)
                .expect("reference type has a name child");
            TypeBase::Reference(name_text(ast, source, name))
        }
    };

    TypeName { base, dimensions }
}

/// Mangled method key: simple name followed by every parameter type
/// descriptor in order.
pub fn mangle_method_name(
    ast: &Ast,
    source: &str,
    simple: &str,
    param_list: Option<NodeId>,
) -> String {
    let mut out = simple.to_string();

    if let Some(params) = param_list {
        for param in ast.children(params) {
            let ty = ast
                .first_child(param)
                .expect("formal parameter has a type child");
            let mut type_name = type_from_node(ast, source, ty);
            type_name.dimensions += ast.node(param).payload.dimension();
            out.push_str(&type_name.descriptor());
        }
    }

    out
}

fn token_at(token: &Token) -> (crate::compiler::lexer::LineColumn, crate::compiler::lexer::LineColumn) {
    (token.begin, token.end)
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a str, ast: &'a Ast) -> Self {
        Resolver {
            source,
            ast,
            ctx: SymbolContext::new(),
        }
    }

    /// Registers all global definitions of the compilation unit.
    pub fn resolve(&mut self, log: &mut DiagnosticLog, root: NodeId) {
        for decl in self.ast.children(root) {
            match self.ast.kind(decl) {
                NodeKind::PackageDecl => {}
                NodeKind::ImportDecl => self.define_import(log, decl),
                NodeKind::TopLevel => self.define_top_level(log, decl),
                _ => {}
            }
        }
    }

    fn define_import(&mut self, log: &mut DiagnosticLog, node: NodeId) {
        let Some(name) = self.ast.first_child(node) else {
            return;
        };
        let on_demand = matches!(
            self.ast.node(node).payload,
            Payload::Import { on_demand: true }
        );

        let units: Vec<NodeId> = self.ast.children(name).collect();
        let at = self
            .ast
            .node(units[0])
            .payload
            .token()
            .map(token_at)
            .unwrap_or_default();

        let (registered, package) = if on_demand {
            let package = name_text(self.ast, self.source, name);
            (package.clone(), package)
        } else {
            let last = units.last().expect("name has at least one unit");
            let class_name = self
                .ast
                .node(*last)
                .payload
                .token()
                .expect("name unit carries its token")
                .text(self.source)
                .to_string();

            let mut package = String::new();
            for unit in &units[..units.len() - 1] {
                if let Some(token) = self.ast.node(*unit).payload.token() {
                    if !package.is_empty() {
                        package.push('.');
                    }
                    package.push_str(token.text(self.source));
                }
            }

            (class_name, package)
        };

        if let Some(existing) = self.ctx.imports.get(&registered) {
            // duplicate only when both are the same import form over the
            // same package; anything else is an ambiguity
            let code = if existing.on_demand == on_demand
                && existing.package == package
            {
                DiagnosticCode::ImportDuplicate
            } else {
                DiagnosticCode::ImportAmbiguous
            };
            log.log(code, at.0, at.1, &[&registered]);
            return;
        }

        self.ctx.imports.insert(
            registered,
            crate::compiler::scope::ImportEntry { package, on_demand },
        );
    }

    fn define_top_level(&mut self, log: &mut DiagnosticLog, node: NodeId) {
        let modifiers = self.ast.node(node).payload.modifiers();
        let Some(decl) = self.ast.first_child(node) else {
            return;
        };

        match self.ast.kind(decl) {
            NodeKind::ClassDecl => self.define_class(log, decl, modifiers),
            NodeKind::InterfaceDecl => {
                self.define_interface(log, decl, modifiers)
            }
            _ => {}
        }
    }

    fn register_top_level(
        &mut self,
        log: &mut DiagnosticLog,
        decl: NodeId,
        mut top: TopLevel,
    ) -> Option<usize> {
        let Some(name_token) = self.ast.node(decl).payload.token() else {
            // a nameless declaration was already diagnosed by the parser
            return None;
        };

        let name = name_token.text(self.source).to_string();
        let at = token_at(name_token);

        if self.ctx.imports.contains_key(&name)
            || self.ctx.globals.contains_key(&name)
        {
            log.log(DiagnosticCode::ClassNameDuplicate, at.0, at.1, &[&name]);
            return None;
        }

        top.name = name.clone();
        let id = self.ctx.top_levels.len();
        self.ctx.top_levels.push(top);
        self.ctx.globals.insert(name, id);
        self.ctx.working_top_level = Some(id);

        Some(id)
    }

    fn define_class(
        &mut self,
        log: &mut DiagnosticLog,
        decl: NodeId,
        modifiers: enumflags2::BitFlags<crate::compiler::ast::Modifier>,
    ) {
        let mut top = TopLevel::new(TopLevelKind::Class, String::new());
        top.modifiers = modifiers;

        let mut body = None;
        for part in self.ast.children(decl) {
            match self.ast.kind(part) {
                NodeKind::ClassExtends => {
                    // extends -> class type -> name
                    if let Some(name) = self
                        .ast
                        .first_child(part)
                        .and_then(|ty| self.ast.first_child(ty))
                    {
                        top.extend =
                            Some(name_text(self.ast, self.source, name));
                    }
                }
                NodeKind::ClassImplements => {
                    if let Some(list) = self.ast.first_child(part) {
                        for ty in self.ast.children(list) {
                            if let Some(name) = self.ast.first_child(ty) {
                                top.implement.push(name_text(
                                    self.ast,
                                    self.source,
                                    name,
                                ));
                            }
                        }
                    }
                }
                NodeKind::ClassBody => body = Some(part),
                _ => {}
            }
        }

        top.node_first_body_decl =
            body.and_then(|body| self.ast.first_child(body));

        let Some(id) = self.register_top_level(log, decl, top) else {
            return;
        };

        debug!(
            "first pass: class '{}' registered",
            self.ctx.top_levels[id].name
        );

        let mut member = self.ctx.top_levels[id].node_first_body_decl;
        while let Some(part) = member {
            self.define_class_member(log, part);
            member = self.ast.next_sibling(part);
        }

        self.ctx.working_top_level = None;
    }

    fn define_class_member(&mut self, log: &mut DiagnosticLog, part: NodeId) {
        let modifiers = self.ast.node(part).payload.modifiers();
        let Some(first) = self.ast.first_child(part) else {
            return;
        };

        match self.ast.kind(first) {
            NodeKind::StaticInit => {
                // anonymous; the second pass walks the stored AST directly
            }
            NodeKind::CtorDecl => {
                self.define_constructor(log, first, modifiers)
            }
            NodeKind::Type => {
                let Some(next) = self.ast.next_sibling(first) else {
                    return;
                };

                match self.ast.kind(next) {
                    NodeKind::VarDeclarators => {
                        self.define_member_variables(
                            log, first, next, modifiers,
                        );
                    }
                    NodeKind::MethodDecl => {
                        self.define_member_method(log, first, next, modifiers);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn define_member_variables(
        &mut self,
        log: &mut DiagnosticLog,
        ty: NodeId,
        declarators: NodeId,
        modifiers: enumflags2::BitFlags<crate::compiler::ast::Modifier>,
    ) {
        let type_name = type_from_node(self.ast, self.source, ty);

        for decl in self.ast.children(declarators) {
            let payload = &self.ast.node(decl).payload;
            let Some(id) = payload.token() else {
                continue;
            };
            let dims = payload.dimension();
            let name = id.text(self.source).to_string();
            let at = token_at(id);

            self.ctx.define_variable(
                log,
                at,
                &name,
                type_name.clone(),
                modifiers,
                VariableKind::Member,
                dims,
            );
        }
    }

    fn define_member_method(
        &mut self,
        log: &mut DiagnosticLog,
        ty: NodeId,
        decl: NodeId,
        modifiers: enumflags2::BitFlags<crate::compiler::ast::Modifier>,
    ) {
        let header = self
            .ast
            .first_child(decl)
            .expect("method declaration has a header");
        let id = self
            .ast
            .node(header)
            .payload
            .token()
            .expect("method header carries its name")
            .clone();
        let params = self
            .ast
            .children(header)
            .find(|c| self.ast.kind(*c) == NodeKind::FormalParamList);

        let simple = id.text(self.source);
        let mangled =
            mangle_method_name(self.ast, self.source, simple, params);

        let method = MethodDef {
            modifiers,
            return_type: Some(type_from_node(self.ast, self.source, ty)),
            body: Some(decl),
            ..MethodDef::default()
        };

        self.ctx.define_method(log, token_at(&id), &mangled, method);
    }

    fn define_constructor(
        &mut self,
        log: &mut DiagnosticLog,
        decl: NodeId,
        modifiers: enumflags2::BitFlags<crate::compiler::ast::Modifier>,
    ) {
        let id = self
            .ast
            .node(decl)
            .payload
            .token()
            .expect("constructor carries its name")
            .clone();
        let params = self
            .ast
            .children(decl)
            .find(|c| self.ast.kind(*c) == NodeKind::FormalParamList);

        let simple = id.text(self.source);
        let mangled =
            mangle_method_name(self.ast, self.source, simple, params);

        let method = MethodDef {
            modifiers,
            is_constructor: true,
            body: Some(decl),
            ..MethodDef::default()
        };

        self.ctx.define_method(log, token_at(&id), &mangled, method);
    }

    fn define_interface(
        &mut self,
        log: &mut DiagnosticLog,
        decl: NodeId,
        modifiers: enumflags2::BitFlags<crate::compiler::ast::Modifier>,
    ) {
        let mut top = TopLevel::new(TopLevelKind::Interface, String::new());
        top.modifiers = modifiers;

        for part in self.ast.children(decl) {
            if self.ast.kind(part) == NodeKind::InterfaceExtends {
                if let Some(name) = self.ast.first_child(part) {
                    top.extend = Some(name_text(self.ast, self.source, name));
                }
            }
        }

        // interfaces are name-only top levels; members are not walked
        self.register_top_level(log, decl, top);
        self.ctx.working_top_level = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;
    use crate::compiler::scope::Definition;

    fn resolve(source: &str) -> (SymbolContext, DiagnosticLog) {
        let mut parser = Parser::new(source);
        let root = parser.parse();
        let mut log = parser.log;

        let mut resolver = Resolver::new(source, &parser.ast);
        resolver.resolve(&mut log, root);

        (resolver.ctx, log)
    }

    #[test]
    fn registers_members_and_methods() {
        let (ctx, log) = resolve(
            "class C { int x; int y; int f(int a) { return a; } C() { } }",
        );

        assert!(!log.has_errors());
        assert_eq!(ctx.top_levels.len(), 1);

        let top = &ctx.top_levels[0];
        assert_eq!(top.name, "C");
        assert_eq!(top.num_member_variables, 2);

        // methods are keyed by mangled names
        assert!(top.members.contains_key("x"));
        assert!(top.members.contains_key("fI"));
        assert!(top.members.contains_key("C"));

        let ctor = ctx.defs.get(top.members["C"]);
        assert!(matches!(
            ctor,
            Definition::Method(m) if m.is_constructor
        ));
    }

    #[test]
    fn overloads_become_distinct_keys() {
        let (ctx, log) = resolve(
            "class C { int f(int a) { return a; } int f(long a, int b) { return b; } }",
        );

        assert!(!log.has_errors());
        let top = &ctx.top_levels[0];
        assert!(top.members.contains_key("fI"));
        assert!(top.members.contains_key("fJI"));
    }

    #[test]
    fn duplicate_method_signature_is_an_error() {
        let (_, log) = resolve(
            "class C { int f(int a) { return a; } long f(int b) { return 0; } }",
        );

        assert!(log.has_errors());
    }

    #[test]
    fn class_name_clash_with_import() {
        let (_, log) = resolve("import a.b.C; class C { }");
        assert!(log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::ClassNameDuplicate));
    }

    #[test]
    fn duplicate_and_ambiguous_imports() {
        let (_, log) = resolve("import a.b.C; import a.b.C; class D { }");
        assert!(log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::ImportDuplicate));

        let (_, log) = resolve("import a.b.C; import x.y.C; class D { }");
        assert!(log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::ImportAmbiguous));
    }

    #[test]
    fn reference_parameter_types_in_mangled_name() {
        let (ctx, _) = resolve(
            "class C { void f(String s, int[] a) { } }",
        );

        let top = &ctx.top_levels[0];
        assert!(top.members.contains_key("fLString;[I"));
    }

    #[test]
    fn interface_is_registered_name_only() {
        let (ctx, log) = resolve("interface I extends J { void f(); }");

        assert!(!log.has_errors());
        let top = &ctx.top_levels[0];
        assert_eq!(top.kind, TopLevelKind::Interface);
        assert_eq!(top.extend.as_deref(), Some("J"));
        assert!(top.members.is_empty());
    }

    #[test]
    fn method_bodies_are_not_walked() {
        let (ctx, log) = resolve(
            "class C { int f() { int local = 1; return local; } }",
        );

        assert!(!log.has_errors());
        let top = &ctx.top_levels[0];
        let method = ctx.defs.get(top.members["f"]).as_method().unwrap();

        // the body is stored for the second pass, locals untouched
        assert!(method.body.is_some());
        assert!(method.locals.is_empty());
    }
}

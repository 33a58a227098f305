//! Reduction-based predictive parser.
//!
//! The parser commits a production only after deciding it through pure
//! lookahead tests over at most 4 tokens; there is no backtracking once a
//! reduction starts. When 4 tokens cannot separate two productions (a
//! qualified name prefix can open both a local declaration and an
//! expression statement), the parser opens an ambiguity frame: it forks the
//! token stream, parses every candidate speculatively, attaches one child
//! per interpretation under an ambiguous node and commits the first
//! candidate that parses without a hard error. Errors of losing candidates
//! collapse under an ambiguity entry in the diagnostic log.
//!
//! Recovery consults a per-error FOLLOW set and skips tokens until a member
//! of that set is at `peek(0)`; a failed production is never re-entered.

use enumflags2::BitFlags;
use log::trace;

use crate::compiler::ast::{Ast, Modifier, NodeId, NodeKind, Payload};
use crate::compiler::error::{DiagnosticCode, DiagnosticLog};
use crate::compiler::expression::{OperatorId, OperatorStack};
use crate::compiler::lexer::{Lexeme, Token, TokenStream};

pub struct Parser<'s> {
    stream: TokenStream<'s>,
    pub ast: Ast,
    pub log: DiagnosticLog,
}

/// Lookahead verdict for a statement starting with an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdStatementTrigger {
    Declaration,
    Expression,
    /// undecidable within 4 tokens
    Ambiguous,
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s str) -> Self {
        Parser {
            stream: TokenStream::new(source),
            ast: Ast::new(),
            log: DiagnosticLog::new(),
        }
    }

    /// Parses one compilation unit and returns its AST root.
    ///
    /// Parsing completes regardless of syntax errors so later phases can
    /// report semantic diagnostics too; the driver decides what to skip.
    pub fn parse(&mut self) -> NodeId {
        let root = self
            .ast
            .new_node(NodeKind::CompilationUnit, Payload::None);

        if self.peek_lexeme(0) == Lexeme::PackageKW {
            let decl = self.parse_package_declaration();
            self.ast.add_child(root, decl);
        }

        while self.peek_lexeme(0) == Lexeme::ImportKW {
            let decl = self.parse_import_declaration();
            self.ast.add_child(root, decl);
        }

        while self.peek_lexeme(0) != Lexeme::Eof {
            match self.parse_top_level() {
                Some(decl) => self.ast.add_child(root, decl),
                None => self.recover_top_level(),
            }
        }

        root
    }

    // ---- token helpers ----

    fn peek(&mut self, k: usize) -> &Token {
        self.stream.peek(k)
    }

    fn peek_lexeme(&mut self, k: usize) -> Lexeme {
        self.stream.peek(k).lexeme
    }

    fn consume(&mut self) -> Token {
        let token = self.stream.consume();

        // lexical diagnostics surface at consumption so speculative
        // candidates report them into their own branch
        match token.lexeme {
            Lexeme::Illegal => {
                let code = match self.stream.slice(&token.span).as_bytes() {
                    [b'"', ..] => DiagnosticCode::UnterminatedString,
                    [b'\'', ..] => DiagnosticCode::UnterminatedCharacter,
                    _ => DiagnosticCode::IllegalCharacter,
                };
                self.log.log(code, token.begin, token.end, &[]);
            }
            Lexeme::UnterminatedComment => {
                self.log.log(
                    DiagnosticCode::UnterminatedComment,
                    token.begin,
                    token.end,
                    &[],
                );
            }
            _ => {}
        }

        token
    }

    fn accept(&mut self, lexeme: Lexeme) -> Option<Token> {
        if self.peek_lexeme(0) == lexeme {
            Some(self.consume())
        } else {
            None
        }
    }

    fn expect(
        &mut self,
        lexeme: Lexeme,
        code: DiagnosticCode,
    ) -> Option<Token> {
        let found = self.accept(lexeme);
        if found.is_none() {
            self.diag_here(code, &[]);
        }
        found
    }

    fn diag_here(&mut self, code: DiagnosticCode, args: &[&str]) {
        let (begin, end) = {
            let token = self.stream.peek(0);
            (token.begin, token.end)
        };
        self.log.log(code, begin, end, args);
    }

    fn text(&self, token: &Token) -> String {
        self.stream.slice(&token.span).to_string()
    }

    // ---- recovery ----

    /// Skips to the FOLLOW set of a top-level declaration.
    fn recover_top_level(&mut self) {
        loop {
            let lexeme = self.peek_lexeme(0);
            match lexeme {
                Lexeme::Eof | Lexeme::ClassKW | Lexeme::InterfaceKW => break,
                _ if lexeme.is_modifier() => break,
                _ => {
                    self.consume();
                }
            }
        }
    }

    /// Skips to the FOLLOW set of a class member declaration.
    fn recover_member(&mut self) {
        loop {
            let lexeme = self.peek_lexeme(0);
            match lexeme {
                Lexeme::Semicolon => {
                    self.consume();
                    break;
                }
                Lexeme::RightBrace | Lexeme::Eof => break,
                _ if lexeme.is_modifier() || lexeme.is_primitive_type() => {
                    break
                }
                _ => {
                    self.consume();
                }
            }
        }
    }

    /// Skips to the FOLLOW set of a statement.
    fn recover_statement(&mut self) {
        loop {
            match self.peek_lexeme(0) {
                Lexeme::Semicolon => {
                    self.consume();
                    break;
                }
                Lexeme::RightBrace | Lexeme::Eof => break,
                _ => {
                    self.consume();
                }
            }
        }
    }

    // ---- names and types ----

    fn parse_name(&mut self) -> NodeId {
        let name = self.ast.new_node(NodeKind::Name, Payload::None);

        let id = self.consume();
        let unit = self
            .ast
            .new_node(NodeKind::NameUnit, Payload::Token(id));
        self.ast.add_child(name, unit);

        while self.peek_lexeme(0) == Lexeme::Dot
            && self.peek_lexeme(1) == Lexeme::Identifier
        {
            self.consume();
            let id = self.consume();
            let unit = self
                .ast
                .new_node(NodeKind::NameUnit, Payload::Token(id));
            self.ast.add_child(name, unit);
        }

        name
    }

    /// Trailing `[]` pairs of a type or declarator.
    fn parse_dimensions(&mut self) -> usize {
        let mut dims = 0;

        while self.peek_lexeme(0) == Lexeme::LeftBracket
            && self.peek_lexeme(1) == Lexeme::RightBracket
        {
            self.consume();
            self.consume();
            dims += 1;
        }

        dims
    }

    fn parse_type(&mut self) -> NodeId {
        if self.peek_lexeme(0).is_primitive_type() {
            let id = self.consume();
            let dimension = self.parse_dimensions();
            let span = id.span.clone();
            let node = self.ast.new_node(
                NodeKind::Type,
                Payload::Declarator { id, dimension },
            );
            self.ast.expand_span(node, &span);
            node
        } else {
            let name = self.parse_name();
            let id = self
                .ast
                .node(self.ast.last_child(name).expect("name has units"))
                .payload
                .token()
                .cloned()
                .expect("name unit carries its token");
            let dimension = self.parse_dimensions();
            let node = self.ast.new_node(
                NodeKind::Type,
                Payload::Declarator { id, dimension },
            );
            self.ast.add_child(node, name);
            node
        }
    }

    fn trigger_type(&mut self, k: usize) -> bool {
        let lexeme = self.peek_lexeme(k);
        lexeme.is_primitive_type() || lexeme == Lexeme::Identifier
    }

    // ---- compilation unit level ----

    fn parse_package_declaration(&mut self) -> NodeId {
        let node = self.ast.new_node(NodeKind::PackageDecl, Payload::None);
        let kw = self.consume();
        self.ast.expand_span(node, &kw.span);

        if self.peek_lexeme(0) == Lexeme::Identifier {
            let name = self.parse_name();
            self.ast.add_child(node, name);
        } else {
            self.diag_here(DiagnosticCode::PackageNoName, &[]);
            self.recover_package_or_import();
            return node;
        }

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::PackageNoSemicolon)
            .is_none()
        {
            self.recover_package_or_import();
        }

        node
    }

    fn recover_package_or_import(&mut self) {
        loop {
            let lexeme = self.peek_lexeme(0);
            match lexeme {
                Lexeme::Eof
                | Lexeme::ImportKW
                | Lexeme::ClassKW
                | Lexeme::InterfaceKW => break,
                _ if lexeme.is_modifier() => break,
                _ => {
                    self.consume();
                }
            }
        }
    }

    fn parse_import_declaration(&mut self) -> NodeId {
        let node = self.ast.new_node(
            NodeKind::ImportDecl,
            Payload::Import { on_demand: false },
        );
        let kw = self.consume();
        self.ast.expand_span(node, &kw.span);

        if self.peek_lexeme(0) == Lexeme::Identifier {
            let name = self.parse_name();
            self.ast.add_child(node, name);
        } else {
            self.diag_here(DiagnosticCode::ImportNoName, &[]);
            self.recover_package_or_import();
            return node;
        }

        if self.peek_lexeme(0) == Lexeme::Dot
            && self.peek_lexeme(1) == Lexeme::Star
        {
            self.consume();
            self.consume();
            self.ast.node_mut(node).payload =
                Payload::Import { on_demand: true };
        }

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::ImportNoSemicolon)
            .is_none()
        {
            self.recover_package_or_import();
        }

        node
    }

    fn parse_modifiers(&mut self) -> BitFlags<Modifier> {
        let mut flags = BitFlags::empty();

        loop {
            let flag = match self.peek_lexeme(0) {
                Lexeme::PublicKW => Modifier::Public,
                Lexeme::PrivateKW => Modifier::Private,
                Lexeme::ProtectedKW => Modifier::Protected,
                Lexeme::FinalKW => Modifier::Final,
                Lexeme::StaticKW => Modifier::Static,
                Lexeme::AbstractKW => Modifier::Abstract,
                Lexeme::TransientKW => Modifier::Transient,
                Lexeme::SynchronizedKW => Modifier::Synchronized,
                Lexeme::VolatileKW => Modifier::Volatile,
                Lexeme::NativeKW => Modifier::Native,
                _ => break,
            };

            self.consume();
            flags |= flag;
        }

        flags
    }

    fn parse_top_level(&mut self) -> Option<NodeId> {
        let modifiers = self.parse_modifiers();

        let decl = match self.peek_lexeme(0) {
            Lexeme::ClassKW => self.parse_class_declaration(),
            Lexeme::InterfaceKW => self.parse_interface_declaration(),
            _ => {
                self.diag_here(DiagnosticCode::TopLevelUnrecognized, &[]);
                return None;
            }
        };

        let node = self
            .ast
            .new_node(NodeKind::TopLevel, Payload::Modifiers(modifiers));
        self.ast.add_child(node, decl);

        Some(node)
    }

    fn parse_class_declaration(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::ClassDecl, Payload::None);
        self.ast.expand_span(node, &kw.span);

        match self.accept(Lexeme::Identifier) {
            Some(id) => {
                let span = id.span.clone();
                self.ast.node_mut(node).payload = Payload::Token(id);
                self.ast.expand_span(node, &span);
            }
            None => {
                self.diag_here(DiagnosticCode::ClassNoName, &[]);
                self.recover_class_header();
            }
        }

        if self.accept(Lexeme::ExtendsKW).is_some() {
            let ext = self.ast.new_node(NodeKind::ClassExtends, Payload::None);
            let ty = self.ast.new_node(NodeKind::ClassType, Payload::None);
            let name = self.parse_name();
            self.ast.add_child(ty, name);
            self.ast.add_child(ext, ty);
            self.ast.add_child(node, ext);
        }

        if self.accept(Lexeme::ImplementsKW).is_some() {
            let imp = self
                .ast
                .new_node(NodeKind::ClassImplements, Payload::None);
            let list = self
                .ast
                .new_node(NodeKind::InterfaceTypeList, Payload::None);

            loop {
                let ty = self
                    .ast
                    .new_node(NodeKind::InterfaceType, Payload::None);
                let name = self.parse_name();
                self.ast.add_child(ty, name);
                self.ast.add_child(list, ty);

                if self.accept(Lexeme::Comma).is_none() {
                    break;
                }
            }

            self.ast.add_child(imp, list);
            self.ast.add_child(node, imp);
        }

        if self
            .expect(Lexeme::LeftBrace, DiagnosticCode::ClassNoBody)
            .is_none()
        {
            self.recover_top_level();
            return node;
        }

        let body = self.ast.new_node(NodeKind::ClassBody, Payload::None);
        self.ast.add_child(node, body);

        loop {
            match self.peek_lexeme(0) {
                Lexeme::RightBrace => {
                    self.consume();
                    break;
                }
                Lexeme::Eof => {
                    self.diag_here(DiagnosticCode::ClassBodyEnclose, &[]);
                    break;
                }
                _ => {
                    if let Some(member) = self.parse_class_body_declaration()
                    {
                        self.ast.add_child(body, member);
                    }
                }
            }
        }

        node
    }

    fn recover_class_header(&mut self) {
        loop {
            let lexeme = self.peek_lexeme(0);
            match lexeme {
                Lexeme::Eof
                | Lexeme::ExtendsKW
                | Lexeme::ImplementsKW
                | Lexeme::LeftBrace
                | Lexeme::ClassKW
                | Lexeme::InterfaceKW => break,
                _ if lexeme.is_modifier() => break,
                _ => {
                    self.consume();
                }
            }
        }
    }

    fn parse_class_body_declaration(&mut self) -> Option<NodeId> {
        let modifiers = self.parse_modifiers();
        let node = self
            .ast
            .new_node(NodeKind::ClassBodyDecl, Payload::Modifiers(modifiers));

        // static initializer: the block directly follows the modifier run
        if self.peek_lexeme(0) == Lexeme::LeftBrace {
            let init = self.ast.new_node(NodeKind::StaticInit, Payload::None);
            let block = self.parse_block();
            self.ast.add_child(init, block);
            self.ast.add_child(node, init);
            return Some(node);
        }

        // constructor: member opening as `Identifier (`
        if self.peek_lexeme(0) == Lexeme::Identifier
            && self.peek_lexeme(1) == Lexeme::LeftParen
        {
            let ctor = self.parse_constructor_declaration();
            self.ast.add_child(node, ctor);
            return Some(node);
        }

        if !self.trigger_type(0) {
            self.diag_here(DiagnosticCode::MemberNoType, &[]);
            self.recover_member();
            return None;
        }

        let ty = self.parse_type();
        self.ast.add_child(node, ty);

        let Some(id) = self.accept(Lexeme::Identifier) else {
            self.diag_here(DiagnosticCode::MemberNoName, &[]);
            self.recover_member();
            return None;
        };

        if self.peek_lexeme(0) == Lexeme::LeftParen {
            let method = self.parse_method_declaration(id);
            self.ast.add_child(node, method);
        } else {
            let declarators = self.parse_var_declarators(id);
            self.ast.add_child(node, declarators);

            if self
                .expect(
                    Lexeme::Semicolon,
                    DiagnosticCode::MemberVarNoSemicolon,
                )
                .is_none()
            {
                self.recover_member();
            }
        }

        Some(node)
    }

    /// Declarator list headed by an already consumed identifier.
    fn parse_var_declarators(&mut self, first_id: Token) -> NodeId {
        let node = self
            .ast
            .new_node(NodeKind::VarDeclarators, Payload::None);

        let mut id = Some(first_id);
        loop {
            let decl_id = match id.take() {
                Some(token) => token,
                None => match self.accept(Lexeme::Identifier) {
                    Some(token) => token,
                    None => {
                        self.diag_here(DiagnosticCode::VarNoDeclarator, &[]);
                        break;
                    }
                },
            };

            let decl = self.parse_var_declarator(decl_id);
            self.ast.add_child(node, decl);

            if self.accept(Lexeme::Comma).is_none() {
                break;
            }
        }

        node
    }

    fn parse_var_declarator(&mut self, id: Token) -> NodeId {
        let dimension = self.parse_dimensions();
        let span = id.span.clone();
        let node = self.ast.new_node(
            NodeKind::VarDecl,
            Payload::Declarator { id, dimension },
        );
        self.ast.expand_span(node, &span);

        if self.accept(Lexeme::Assign).is_some() {
            if self.peek_lexeme(0) == Lexeme::LeftBrace {
                let init = self.parse_array_initializer();
                self.ast.add_child(node, init);
            } else {
                let expr = self.parse_expression();
                self.ast.add_child(node, expr);
            }
        }

        node
    }

    fn parse_array_initializer(&mut self) -> NodeId {
        let node = self.ast.new_node(NodeKind::ArrayInit, Payload::None);
        self.consume(); // {

        loop {
            match self.peek_lexeme(0) {
                Lexeme::RightBrace => {
                    self.consume();
                    break;
                }
                Lexeme::Eof => {
                    self.diag_here(DiagnosticCode::BlockEnclose, &[]);
                    break;
                }
                Lexeme::LeftBrace => {
                    let nested = self.parse_array_initializer();
                    self.ast.add_child(node, nested);
                    self.accept(Lexeme::Comma);
                }
                _ => {
                    let expr = self.parse_expression();
                    self.ast.add_child(node, expr);
                    self.accept(Lexeme::Comma);
                }
            }
        }

        node
    }

    fn parse_formal_parameter_list(&mut self) -> NodeId {
        let node = self
            .ast
            .new_node(NodeKind::FormalParamList, Payload::None);

        if self.peek_lexeme(0) == Lexeme::RightParen {
            return node;
        }

        loop {
            if !self.trigger_type(0) {
                self.diag_here(DiagnosticCode::FormalParameter, &[]);
                break;
            }

            let ty = self.parse_type();
            let Some(id) = self.accept(Lexeme::Identifier) else {
                self.diag_here(DiagnosticCode::FormalParameter, &[]);
                break;
            };
            let dimension = self.parse_dimensions();

            let param = self.ast.new_node(
                NodeKind::FormalParam,
                Payload::Declarator { id, dimension },
            );
            self.ast.add_child(param, ty);
            self.ast.add_child(node, param);

            if self.accept(Lexeme::Comma).is_none() {
                break;
            }
        }

        node
    }

    fn parse_method_declaration(&mut self, id: Token) -> NodeId {
        let node = self.ast.new_node(NodeKind::MethodDecl, Payload::None);
        let header = self.ast.new_node(
            NodeKind::MethodHeader,
            Payload::Declarator { id, dimension: 0 },
        );
        self.ast.add_child(node, header);

        self.consume(); // (
        let params = self.parse_formal_parameter_list();
        self.ast.add_child(header, params);
        self.expect(Lexeme::RightParen, DiagnosticCode::ExpressionParenthesis);

        if self.accept(Lexeme::ThrowsKW).is_some() {
            let throws = self.ast.new_node(NodeKind::Throws, Payload::None);
            loop {
                let name = self.parse_name();
                self.ast.add_child(throws, name);
                if self.accept(Lexeme::Comma).is_none() {
                    break;
                }
            }
            self.ast.add_child(header, throws);
        }

        let body = self.ast.new_node(NodeKind::MethodBody, Payload::None);
        self.ast.add_child(node, body);

        if self.peek_lexeme(0) == Lexeme::LeftBrace {
            let block = self.parse_block();
            self.ast.add_child(body, block);
        } else {
            // abstract/native methods end with a semicolon and carry no code
            self.expect(
                Lexeme::Semicolon,
                DiagnosticCode::MemberVarNoSemicolon,
            );
        }

        node
    }

    fn parse_constructor_declaration(&mut self) -> NodeId {
        let id = self.consume();
        let node = self.ast.new_node(
            NodeKind::CtorDecl,
            Payload::Declarator { id, dimension: 0 },
        );

        self.consume(); // (
        let params = self.parse_formal_parameter_list();
        self.ast.add_child(node, params);
        self.expect(Lexeme::RightParen, DiagnosticCode::ExpressionParenthesis);

        let body = self.ast.new_node(NodeKind::CtorBody, Payload::None);
        self.ast.add_child(node, body);

        if self.peek_lexeme(0) == Lexeme::LeftBrace {
            self.consume();

            // explicit constructor invocation, only valid directly after
            // the opening brace
            if matches!(
                self.peek_lexeme(0),
                Lexeme::ThisKW | Lexeme::SuperKW
            ) && self.peek_lexeme(1) == Lexeme::LeftParen
            {
                let is_super = self.peek_lexeme(0) == Lexeme::SuperKW;
                self.consume();
                self.consume();

                let invoke = self.ast.new_node(
                    NodeKind::CtorInvocation,
                    Payload::CtorInvocation { is_super },
                );
                let args = self
                    .ast
                    .new_node(NodeKind::ArgumentList, Payload::None);

                if self.peek_lexeme(0) != Lexeme::RightParen {
                    loop {
                        let expr = self.parse_expression();
                        self.ast.add_child(args, expr);
                        if self.accept(Lexeme::Comma).is_none() {
                            break;
                        }
                    }
                }

                self.expect(
                    Lexeme::RightParen,
                    DiagnosticCode::ExpressionParenthesis,
                );
                self.expect(
                    Lexeme::Semicolon,
                    DiagnosticCode::StatementNoSemicolon,
                );
                self.ast.add_child(invoke, args);
                self.ast.add_child(body, invoke);
            }

            let block = self.parse_block_rest();
            self.ast.add_child(body, block);
        } else {
            self.diag_here(DiagnosticCode::ClassNoBody, &[]);
            self.recover_member();
        }

        node
    }

    fn parse_interface_declaration(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::InterfaceDecl, Payload::None);
        self.ast.expand_span(node, &kw.span);

        match self.accept(Lexeme::Identifier) {
            Some(id) => {
                let span = id.span.clone();
                self.ast.node_mut(node).payload = Payload::Token(id);
                self.ast.expand_span(node, &span);
            }
            None => {
                self.diag_here(DiagnosticCode::InterfaceNoName, &[]);
                self.recover_class_header();
            }
        }

        if self.accept(Lexeme::ExtendsKW).is_some() {
            let ext = self
                .ast
                .new_node(NodeKind::InterfaceExtends, Payload::None);
            let name = self.parse_name();
            self.ast.add_child(ext, name);
            self.ast.add_child(node, ext);
        }

        if self
            .expect(Lexeme::LeftBrace, DiagnosticCode::InterfaceNoBody)
            .is_none()
        {
            self.recover_top_level();
            return node;
        }

        // interfaces are name-only top levels: skip the balanced body
        let body = self.ast.new_node(NodeKind::InterfaceBody, Payload::None);
        self.ast.add_child(node, body);

        let mut depth = 1usize;
        loop {
            match self.peek_lexeme(0) {
                Lexeme::LeftBrace => {
                    depth += 1;
                    self.consume();
                }
                Lexeme::RightBrace => {
                    depth -= 1;
                    self.consume();
                    if depth == 0 {
                        break;
                    }
                }
                Lexeme::Eof => {
                    self.diag_here(
                        DiagnosticCode::InterfaceBodyEnclose,
                        &[],
                    );
                    break;
                }
                _ => {
                    self.consume();
                }
            }
        }

        node
    }

    // ---- statements ----

    fn parse_block(&mut self) -> NodeId {
        self.expect(Lexeme::LeftBrace, DiagnosticCode::BlockEnclose);
        self.parse_block_rest()
    }

    /// Block body after the opening brace has been consumed.
    fn parse_block_rest(&mut self) -> NodeId {
        let node = self.ast.new_node(NodeKind::Block, Payload::None);

        loop {
            match self.peek_lexeme(0) {
                Lexeme::RightBrace => {
                    self.consume();
                    break;
                }
                Lexeme::Eof => {
                    self.diag_here(DiagnosticCode::BlockEnclose, &[]);
                    break;
                }
                _ => match self.parse_statement() {
                    Some(stmt) => self.ast.add_child(node, stmt),
                    None => self.recover_statement(),
                },
            }
        }

        node
    }

    /// Pure lookahead test for a statement opening with an identifier.
    fn trigger_identifier_statement(&mut self) -> IdStatementTrigger {
        match self.peek_lexeme(1) {
            Lexeme::Identifier => IdStatementTrigger::Declaration,
            Lexeme::LeftBracket => {
                if self.peek_lexeme(2) == Lexeme::RightBracket {
                    IdStatementTrigger::Declaration
                } else {
                    IdStatementTrigger::Expression
                }
            }
            Lexeme::Dot => {
                if self.peek_lexeme(2) != Lexeme::Identifier {
                    return IdStatementTrigger::Expression;
                }

                match self.peek_lexeme(3) {
                    Lexeme::Identifier => IdStatementTrigger::Declaration,
                    // `a.b.` leaves both a type name and an expression
                    // name reachable and the window ends here
                    Lexeme::Dot => IdStatementTrigger::Ambiguous,
                    _ => IdStatementTrigger::Expression,
                }
            }
            _ => IdStatementTrigger::Expression,
        }
    }

    fn parse_statement(&mut self) -> Option<NodeId> {
        let lexeme = self.peek_lexeme(0);

        if lexeme.is_deprecated_keyword() {
            let token = self.consume();
            let word = self.text(&token);
            self.log.log(
                DiagnosticCode::DeprecatedKeyword,
                token.begin,
                token.end,
                &[&word],
            );
            return self.parse_statement();
        }

        let stmt = match lexeme {
            Lexeme::LeftBrace => self.parse_block(),
            Lexeme::Semicolon => {
                let token = self.consume();
                let node = self
                    .ast
                    .new_node(NodeKind::StatementEmpty, Payload::None);
                self.ast.expand_span(node, &token.span);
                node
            }
            Lexeme::IfKW => self.parse_statement_if(),
            Lexeme::WhileKW => self.parse_statement_while(),
            Lexeme::DoKW => self.parse_statement_do(),
            Lexeme::ForKW => self.parse_statement_for(),
            Lexeme::SwitchKW => self.parse_statement_switch(),
            Lexeme::BreakKW => self.parse_statement_break_continue(true),
            Lexeme::ContinueKW => self.parse_statement_break_continue(false),
            Lexeme::ReturnKW => self.parse_statement_return(),
            Lexeme::ThrowKW => self.parse_statement_throw(),
            Lexeme::TryKW => self.parse_statement_try(),
            Lexeme::SynchronizedKW => self.parse_statement_synchronized(),
            _ if lexeme.is_modifier() || lexeme.is_primitive_type() => {
                self.parse_statement_var_decl()
            }
            Lexeme::Identifier => {
                if self.peek_lexeme(1) == Lexeme::Colon {
                    self.parse_statement_label()
                } else {
                    match self.trigger_identifier_statement() {
                        IdStatementTrigger::Declaration => {
                            self.parse_statement_var_decl()
                        }
                        IdStatementTrigger::Expression => {
                            self.parse_statement_expression()
                        }
                        IdStatementTrigger::Ambiguous => {
                            self.parse_ambiguous_statement()
                        }
                    }
                }
            }
            _ => {
                // expression statements can also open with a literal,
                // a parenthesis or a prefix operator
                if lexeme.is_literal()
                    || matches!(
                        lexeme,
                        Lexeme::LeftParen
                            | Lexeme::Increment
                            | Lexeme::Decrement
                            | Lexeme::Plus
                            | Lexeme::Minus
                            | Lexeme::Bang
                            | Lexeme::Tilde
                    )
                {
                    self.parse_statement_expression()
                } else {
                    self.diag_here(DiagnosticCode::StatementUnrecognized, &[]);
                    return None;
                }
            }
        };

        Some(stmt)
    }

    /// Statement whose first tokens leave both a local declaration and an
    /// expression reachable: speculate on a stream fork per candidate.
    fn parse_ambiguous_statement(&mut self) -> NodeId {
        trace!("ambiguity frame open at {:?}", self.stream.peek(0).span);

        let node = self.ast.new_node(
            NodeKind::Ambiguous,
            Payload::Ambiguity { resolved: 0 },
        );
        let origin = self.stream.fork();

        // candidate 0: local variable declaration
        self.log.ambiguity_begin();
        let decl = self.parse_statement_var_decl();
        self.ast.add_child(node, decl);
        let decl_errors = self.log.current_summary().errors;
        let decl_end = self.peek(0).span.start;
        let decl_stream = core::mem::replace(&mut self.stream, origin);

        // candidate 1: expression statement
        self.log.ambiguity_branch();
        let expr = self.parse_statement_expression();
        self.ast.add_child(node, expr);
        let expr_errors = self.log.current_summary().errors;
        let expr_end = self.peek(0).span.start;

        // first candidate that parses without a hard error wins; ties are
        // broken by earliest completion
        let winner = if decl_errors == 0 && expr_errors == 0 {
            usize::from(expr_end < decl_end)
        } else if decl_errors == 0 {
            0
        } else if expr_errors == 0 {
            1
        } else {
            0
        };

        if winner == 0 {
            self.stream = decl_stream;
        }

        self.log.resolve(winner);
        self.ast.node_mut(node).payload =
            Payload::Ambiguity { resolved: winner };

        trace!("ambiguity frame resolved to candidate {winner}");
        node
    }

    fn parse_statement_var_decl(&mut self) -> NodeId {
        let node = self
            .ast
            .new_node(NodeKind::StatementVarDecl, Payload::None);
        let decl = self.parse_local_var_decl();
        self.ast.add_child(node, decl);

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::StatementNoSemicolon)
            .is_none()
        {
            self.recover_statement();
        }

        node
    }

    fn parse_local_var_decl(&mut self) -> NodeId {
        let modifiers = self.parse_modifiers();
        let node = self.ast.new_node(
            NodeKind::LocalVarDecl,
            Payload::Modifiers(modifiers),
        );

        let ty = self.parse_type();
        self.ast.add_child(node, ty);

        match self.accept(Lexeme::Identifier) {
            Some(id) => {
                let declarators = self.parse_var_declarators(id);
                self.ast.add_child(node, declarators);
            }
            None => {
                self.diag_here(DiagnosticCode::VarNoDeclarator, &[]);
            }
        }

        node
    }

    fn parse_statement_expression(&mut self) -> NodeId {
        let node = self
            .ast
            .new_node(NodeKind::StatementExpression, Payload::None);
        let expr = self.parse_expression();
        self.ast.add_child(node, expr);

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::StatementNoSemicolon)
            .is_none()
        {
            self.recover_statement();
        }

        node
    }

    fn parse_condition_clause(&mut self, parent: NodeId) {
        self.expect(Lexeme::LeftParen, DiagnosticCode::ParenthesisExpected);
        let expr = self.parse_expression();
        self.ast.add_child(parent, expr);
        self.expect(
            Lexeme::RightParen,
            DiagnosticCode::ExpressionParenthesis,
        );
    }

    fn parse_statement_if(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::StatementIf, Payload::None);
        self.ast.expand_span(node, &kw.span);

        self.parse_condition_clause(node);

        if let Some(body) = self.parse_statement() {
            self.ast.add_child(node, body);
        } else {
            self.recover_statement();
        }

        if self.accept(Lexeme::ElseKW).is_some() {
            if let Some(body) = self.parse_statement() {
                self.ast.add_child(node, body);
            } else {
                self.recover_statement();
            }
        }

        node
    }

    fn parse_statement_while(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::StatementWhile, Payload::None);
        self.ast.expand_span(node, &kw.span);

        self.parse_condition_clause(node);

        if let Some(body) = self.parse_statement() {
            self.ast.add_child(node, body);
        } else {
            self.recover_statement();
        }

        node
    }

    fn parse_statement_do(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::StatementDo, Payload::None);
        self.ast.expand_span(node, &kw.span);

        if let Some(body) = self.parse_statement() {
            self.ast.add_child(node, body);
        } else {
            self.recover_statement();
        }

        if self
            .expect(Lexeme::WhileKW, DiagnosticCode::WhileExpected)
            .is_some()
        {
            self.parse_condition_clause(node);
            self.expect(
                Lexeme::Semicolon,
                DiagnosticCode::StatementNoSemicolon,
            );
        } else {
            self.recover_statement();
        }

        node
    }

    fn parse_statement_for(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::StatementFor, Payload::None);
        self.ast.expand_span(node, &kw.span);

        self.expect(Lexeme::LeftParen, DiagnosticCode::ParenthesisExpected);

        // init
        if self.peek_lexeme(0) != Lexeme::Semicolon {
            let init = self.ast.new_node(NodeKind::ForInit, Payload::None);
            let lexeme = self.peek_lexeme(0);

            let is_decl = lexeme.is_primitive_type()
                || lexeme.is_modifier()
                || (lexeme == Lexeme::Identifier
                    && self.trigger_identifier_statement()
                        == IdStatementTrigger::Declaration);

            if is_decl {
                let decl = self.parse_local_var_decl();
                self.ast.add_child(init, decl);
            } else {
                let list = self.parse_expression_list();
                self.ast.add_child(init, list);
            }

            self.ast.add_child(node, init);
        }
        self.expect(Lexeme::Semicolon, DiagnosticCode::ForNoSemicolon);

        // condition
        if self.peek_lexeme(0) != Lexeme::Semicolon {
            let expr = self.parse_expression();
            self.ast.add_child(node, expr);
        }
        self.expect(Lexeme::Semicolon, DiagnosticCode::ForNoSemicolon);

        // update
        if self.peek_lexeme(0) != Lexeme::RightParen {
            let update = self.ast.new_node(NodeKind::ForUpdate, Payload::None);
            let list = self.parse_expression_list();
            self.ast.add_child(update, list);
            self.ast.add_child(node, update);
        }
        self.expect(
            Lexeme::RightParen,
            DiagnosticCode::ExpressionParenthesis,
        );

        if let Some(body) = self.parse_statement() {
            self.ast.add_child(node, body);
        } else {
            self.recover_statement();
        }

        node
    }

    fn parse_expression_list(&mut self) -> NodeId {
        let node = self.ast.new_node(NodeKind::ExpressionList, Payload::None);

        loop {
            let expr = self.parse_expression();
            self.ast.add_child(node, expr);

            if self.accept(Lexeme::Comma).is_none() {
                break;
            }
        }

        node
    }

    fn parse_statement_break_continue(&mut self, is_break: bool) -> NodeId {
        let kw = self.consume();
        let kind = if is_break {
            NodeKind::StatementBreak
        } else {
            NodeKind::StatementContinue
        };
        let node = self.ast.new_node(kind, Payload::None);
        self.ast.expand_span(node, &kw.span);

        if let Some(label) = self.accept(Lexeme::Identifier) {
            let span = label.span.clone();
            self.ast.node_mut(node).payload = Payload::Token(label);
            self.ast.expand_span(node, &span);
        }

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::StatementNoSemicolon)
            .is_none()
        {
            self.recover_statement();
        }

        node
    }

    fn parse_statement_return(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self
            .ast
            .new_node(NodeKind::StatementReturn, Payload::None);
        self.ast.expand_span(node, &kw.span);

        if self.peek_lexeme(0) != Lexeme::Semicolon {
            let expr = self.parse_expression();
            self.ast.add_child(node, expr);
        }

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::StatementNoSemicolon)
            .is_none()
        {
            self.recover_statement();
        }

        node
    }

    fn parse_statement_throw(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::StatementThrow, Payload::None);
        self.ast.expand_span(node, &kw.span);

        let expr = self.parse_expression();
        self.ast.add_child(node, expr);

        if self
            .expect(Lexeme::Semicolon, DiagnosticCode::StatementNoSemicolon)
            .is_none()
        {
            self.recover_statement();
        }

        node
    }

    fn parse_statement_switch(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self
            .ast
            .new_node(NodeKind::StatementSwitch, Payload::None);
        self.ast.expand_span(node, &kw.span);

        self.parse_condition_clause(node);
        self.expect(Lexeme::LeftBrace, DiagnosticCode::BlockEnclose);

        loop {
            match self.peek_lexeme(0) {
                Lexeme::RightBrace => {
                    self.consume();
                    break;
                }
                Lexeme::Eof => {
                    self.diag_here(DiagnosticCode::BlockEnclose, &[]);
                    break;
                }
                Lexeme::CaseKW => {
                    self.consume();
                    let label = self.ast.new_node(
                        NodeKind::SwitchLabel,
                        Payload::SwitchLabel { is_default: false },
                    );
                    let expr = self.parse_expression();
                    self.ast.add_child(label, expr);
                    self.expect(Lexeme::Colon, DiagnosticCode::ColonExpected);
                    self.ast.add_child(node, label);
                }
                Lexeme::DefaultKW => {
                    self.consume();
                    let label = self.ast.new_node(
                        NodeKind::SwitchLabel,
                        Payload::SwitchLabel { is_default: true },
                    );
                    self.expect(Lexeme::Colon, DiagnosticCode::ColonExpected);
                    self.ast.add_child(node, label);
                }
                _ => match self.parse_statement() {
                    Some(stmt) => self.ast.add_child(node, stmt),
                    None => self.recover_statement(),
                },
            }
        }

        node
    }

    fn parse_statement_try(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self.ast.new_node(NodeKind::StatementTry, Payload::None);
        self.ast.expand_span(node, &kw.span);

        let block = self.parse_block();
        self.ast.add_child(node, block);

        let mut handled = false;
        while self.peek_lexeme(0) == Lexeme::CatchKW {
            handled = true;
            self.consume();
            let catch = self
                .ast
                .new_node(NodeKind::StatementCatch, Payload::None);

            self.expect(
                Lexeme::LeftParen,
                DiagnosticCode::ParenthesisExpected,
            );
            if self.trigger_type(0) {
                let ty = self.parse_type();
                if let Some(id) = self.accept(Lexeme::Identifier) {
                    let param = self.ast.new_node(
                        NodeKind::FormalParam,
                        Payload::Declarator { id, dimension: 0 },
                    );
                    self.ast.add_child(param, ty);
                    self.ast.add_child(catch, param);
                } else {
                    self.diag_here(DiagnosticCode::FormalParameter, &[]);
                }
            } else {
                self.diag_here(DiagnosticCode::FormalParameter, &[]);
            }
            self.expect(
                Lexeme::RightParen,
                DiagnosticCode::ExpressionParenthesis,
            );

            let block = self.parse_block();
            self.ast.add_child(catch, block);
            self.ast.add_child(node, catch);
        }

        if self.accept(Lexeme::FinallyKW).is_some() {
            handled = true;
            let finally = self
                .ast
                .new_node(NodeKind::StatementFinally, Payload::None);
            let block = self.parse_block();
            self.ast.add_child(finally, block);
            self.ast.add_child(node, finally);
        }

        if !handled {
            self.diag_here(DiagnosticCode::CatchOrFinallyExpected, &[]);
        }

        node
    }

    fn parse_statement_synchronized(&mut self) -> NodeId {
        let kw = self.consume();
        let node = self
            .ast
            .new_node(NodeKind::StatementSynchronized, Payload::None);
        self.ast.expand_span(node, &kw.span);

        self.parse_condition_clause(node);
        let block = self.parse_block();
        self.ast.add_child(node, block);

        node
    }

    fn parse_statement_label(&mut self) -> NodeId {
        let label = self.consume();
        self.consume(); // :
        let node = self
            .ast
            .new_node(NodeKind::StatementLabel, Payload::Token(label));

        if let Some(stmt) = self.parse_statement() {
            self.ast.add_child(node, stmt);
        } else {
            self.recover_statement();
        }

        node
    }

    // ---- expressions ----

    /// Shunting-Yard over the token stream; the children of the returned
    /// expression node form a left-to-right postfix order of primaries and
    /// operator nodes.
    pub fn parse_expression(&mut self) -> NodeId {
        let node = self.ast.new_node(NodeKind::Expression, Payload::None);
        let mut ops = OperatorStack::new();
        let mut op_tokens: Vec<Token> = Vec::new();
        let mut ternary_open = 0usize;
        let mut ternary_closed = 0usize;

        loop {
            let lexeme = self.peek_lexeme(0);

            // operands
            if lexeme.is_literal()
                || matches!(
                    lexeme,
                    Lexeme::Identifier
                        | Lexeme::LeftParen
                        | Lexeme::ThisKW
                        | Lexeme::SuperKW
                )
            {
                if ops.last_push_operand {
                    // two adjacent operands end the expression
                    break;
                }
                let primary = self.parse_primary();
                self.ast.add_child(node, primary);
                ops.last_push_operand = true;
                continue;
            }

            // a colon with no open ternary belongs to the enclosing
            // statement (switch label, labeled statement)
            if lexeme == Lexeme::Colon && ternary_open == ternary_closed {
                break;
            }

            let Some(mut opid) = OperatorId::from_lexeme(&lexeme) else {
                break;
            };

            // re-identify prefix forms of ambiguous lexemes
            if !ops.last_push_operand {
                opid = match opid {
                    OperatorId::Add => OperatorId::SignPos,
                    OperatorId::Sub => OperatorId::SignNeg,
                    OperatorId::PostInc => OperatorId::PreInc,
                    OperatorId::PostDec => OperatorId::PreDec,
                    other => other,
                };
            }

            match opid {
                OperatorId::TernaryTest => ternary_open += 1,
                OperatorId::TernaryBranch => ternary_closed += 1,
                _ => {}
            }

            while ops.pop_required(opid) {
                let popped = ops.pop().expect("pop_required implies a top");
                let token = op_tokens.pop().expect("token stack in sync");
                self.attach_operator(node, popped, token);
            }

            let token = self.consume();
            ops.push(opid);
            op_tokens.push(token);

            // a postfix operator leaves an operand-shaped result
            if matches!(opid, OperatorId::PostInc | OperatorId::PostDec) {
                ops.last_push_operand = true;
            }
        }

        while let Some(popped) = ops.pop() {
            let token = op_tokens.pop().expect("token stack in sync");
            self.attach_operator(node, popped, token);
        }

        if ternary_open != ternary_closed {
            self.diag_here(DiagnosticCode::ExpressionIncompleteTernary, &[]);
        }

        if self.ast.first_child(node).is_none() {
            self.diag_here(DiagnosticCode::ExpressionNoOperand, &[]);
        }

        node
    }

    fn attach_operator(
        &mut self,
        expr: NodeId,
        opid: OperatorId,
        token: Token,
    ) {
        let op = self
            .ast
            .new_node(NodeKind::Operator, Payload::Operator(opid));
        self.ast.expand_span(op, &token.span);
        self.ast.add_child(expr, op);
    }

    fn parse_primary(&mut self) -> NodeId {
        let node = self.ast.new_node(NodeKind::Primary, Payload::None);
        let lexeme = self.peek_lexeme(0);

        if lexeme == Lexeme::LeftParen {
            self.consume();
            let expr = self.parse_expression();
            self.ast.add_child(node, expr);
            self.expect(
                Lexeme::RightParen,
                DiagnosticCode::ExpressionParenthesis,
            );
            return node;
        }

        if lexeme.is_literal()
            || matches!(lexeme, Lexeme::ThisKW | Lexeme::SuperKW)
        {
            let token = self.consume();
            let span = token.span.clone();
            self.ast.node_mut(node).payload = Payload::Token(token);
            self.ast.expand_span(node, &span);
            return node;
        }

        // identifier: simple name, qualified name, invocation, array access
        if self.peek_lexeme(1) == Lexeme::Dot
            && self.peek_lexeme(2) == Lexeme::Identifier
        {
            let name = self.parse_name();
            self.ast.add_child(node, name);
        } else {
            let token = self.consume();
            let span = token.span.clone();
            self.ast.node_mut(node).payload = Payload::Token(token);
            self.ast.expand_span(node, &span);
        }

        if self.peek_lexeme(0) == Lexeme::LeftParen {
            self.consume();
            let args = self.ast.new_node(NodeKind::ArgumentList, Payload::None);
            if self.peek_lexeme(0) != Lexeme::RightParen {
                loop {
                    let expr = self.parse_expression();
                    self.ast.add_child(args, expr);
                    if self.accept(Lexeme::Comma).is_none() {
                        break;
                    }
                }
            }
            self.expect(
                Lexeme::RightParen,
                DiagnosticCode::ExpressionParenthesis,
            );
            self.ast.add_child(node, args);
        }

        while self.peek_lexeme(0) == Lexeme::LeftBracket {
            self.consume();
            let index = self.parse_expression();
            self.ast.add_child(node, index);
            self.expect(
                Lexeme::RightBracket,
                DiagnosticCode::ArrayEncloseExpected,
            );
        }

        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::expression::OperatorId;

    fn parse(source: &str) -> (Parser<'_>, NodeId) {
        let mut parser = Parser::new(source);
        let root = parser.parse();
        (parser, root)
    }

    fn find_kind(parser: &Parser, kind: NodeKind) -> Option<NodeId> {
        parser.ast.node_ids().find(|id| parser.ast.kind(*id) == kind)
    }

    fn first_expression_ops(parser: &Parser) -> Vec<OperatorId> {
        let expr = find_kind(parser, NodeKind::Expression)
            .expect("expression node present");
        parser
            .ast
            .children(expr)
            .filter_map(|c| parser.ast.node(c).payload.operator())
            .collect()
    }

    #[test]
    fn parses_minimal_class() {
        let (parser, root) =
            parse("class C { int x; int f(int a) { return a; } }");

        assert!(!parser.log.has_errors());
        assert_eq!(parser.ast.kind(root), NodeKind::CompilationUnit);

        let top = parser.ast.first_child(root).unwrap();
        assert_eq!(parser.ast.kind(top), NodeKind::TopLevel);

        let class = parser.ast.first_child(top).unwrap();
        assert_eq!(parser.ast.kind(class), NodeKind::ClassDecl);
        assert!(find_kind(&parser, NodeKind::MethodDecl).is_some());
    }

    #[test]
    fn postfix_expression_order() {
        // a + b * c reduces to postfix a b c * +
        let (parser, _) =
            parse("class C { int f() { return a + b * c; } }");

        let ops = first_expression_ops(&parser);
        assert_eq!(ops, vec![OperatorId::Mul, OperatorId::Add]);
    }

    #[test]
    fn prefix_operators_reidentified() {
        let (parser, _) =
            parse("class C { int f() { return -a + ++b; } }");
        let ops = first_expression_ops(&parser);

        assert_eq!(
            ops,
            vec![OperatorId::SignNeg, OperatorId::PreInc, OperatorId::Add]
        );
    }

    #[test]
    fn unterminated_string_is_reported() {
        let (parser, _) = parse("class C { int f() { int x = \"abc; } }");
        assert!(parser
            .log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::UnterminatedString));
    }

    #[test]
    fn missing_semicolon_recovers() {
        let (parser, _) = parse(
            "class C { int f() { int x = 1 int y = 2; return x; } int z; }",
        );

        assert!(parser.log.has_errors());
        assert!(parser
            .log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::StatementNoSemicolon));

        // recovery resynchronized: members after the bad statement parsed
        assert!(find_kind(&parser, NodeKind::StatementReturn).is_some());
    }

    #[test]
    fn ambiguous_statement_resolves_to_declaration() {
        let (parser, _) = parse("class C { int f() { a.b.c x = 1; } }");

        assert!(!parser.log.has_errors());

        let amb = find_kind(&parser, NodeKind::Ambiguous)
            .expect("ambiguous node present");

        assert_eq!(parser.ast.child_count(amb), 2);
        assert_eq!(
            parser.ast.node(amb).payload,
            Payload::Ambiguity { resolved: 0 }
        );
    }

    #[test]
    fn interface_is_name_only() {
        let (parser, _) =
            parse("interface I { void f(); int g(int x); }");
        assert!(!parser.log.has_errors());

        let body = find_kind(&parser, NodeKind::InterfaceBody).unwrap();
        assert_eq!(parser.ast.child_count(body), 0);
    }

    #[test]
    fn deprecated_keyword_warns() {
        let (parser, _) = parse("class C { int f() { goto; return 0; } }");
        assert!(parser
            .log
            .diagnostics()
            .any(|d| d.code == DiagnosticCode::DeprecatedKeyword));
    }

    #[test]
    fn ternary_parses_as_two_operators() {
        let (parser, _) =
            parse("class C { int f() { return a ? b : c; } }");
        let ops = first_expression_ops(&parser);

        assert_eq!(
            ops,
            vec![OperatorId::TernaryBranch, OperatorId::TernaryTest]
        );
    }

    #[test]
    fn for_statement_shape() {
        let (parser, _) = parse(
            "class C { int f() { for (int i = 0; i < 10; i += 1) { } return 0; } }",
        );

        assert!(!parser.log.has_errors());
        let stmt = find_kind(&parser, NodeKind::StatementFor).unwrap();
        let kinds: Vec<_> = parser
            .ast
            .children(stmt)
            .map(|c| parser.ast.kind(c))
            .collect();

        assert_eq!(
            kinds,
            vec![
                NodeKind::ForInit,
                NodeKind::Expression,
                NodeKind::ForUpdate,
                NodeKind::Block,
            ]
        );
    }
}

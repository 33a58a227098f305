//! Abstract syntax tree.
//!
//! Nodes live in an arena owned by [`Ast`] and reference each other through
//! dense [`NodeId`]s: first/last child, previous/next sibling, parent.
//! Children order is meaningful and corresponds to grammar position. Each
//! node carries a kind tag and a payload whose shape is determined by the
//! kind.

use enumflags2::{bitflags, BitFlags};

use crate::compiler::expression::OperatorId;
use crate::compiler::lexer::{Span, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Declaration modifier bits.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Public = 1 << 0,
    Private = 1 << 1,
    Protected = 1 << 2,
    Final = 1 << 3,
    Static = 1 << 4,
    Abstract = 1 << 5,
    Transient = 1 << 6,
    Synchronized = 1 << 7,
    Volatile = 1 << 8,
    Native = 1 << 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    CompilationUnit,
    Name,
    NameUnit,
    ClassType,
    InterfaceType,
    InterfaceTypeList,
    PackageDecl,
    ImportDecl,
    TopLevel,
    ClassDecl,
    InterfaceDecl,
    ClassExtends,
    ClassImplements,
    ClassBody,
    InterfaceExtends,
    InterfaceBody,
    ClassBodyDecl,
    InterfaceBodyDecl,
    StaticInit,
    CtorDecl,
    CtorBody,
    CtorInvocation,
    Type,
    MethodHeader,
    MethodDecl,
    MethodBody,
    FormalParamList,
    FormalParam,
    Throws,
    ArgumentList,
    VarDeclarators,
    VarDecl,
    LocalVarDecl,
    ArrayInit,
    Primary,
    Expression,
    Operator,
    Block,
    StatementEmpty,
    StatementSwitch,
    SwitchLabel,
    StatementDo,
    StatementBreak,
    StatementContinue,
    StatementReturn,
    StatementSynchronized,
    StatementThrow,
    StatementTry,
    StatementCatch,
    StatementFinally,
    StatementIf,
    StatementWhile,
    StatementFor,
    ForInit,
    ForUpdate,
    StatementLabel,
    StatementExpression,
    StatementVarDecl,
    ExpressionList,
    Ambiguous,
}

impl NodeKind {
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            NodeKind::Block
                | NodeKind::StatementEmpty
                | NodeKind::StatementSwitch
                | NodeKind::StatementDo
                | NodeKind::StatementBreak
                | NodeKind::StatementContinue
                | NodeKind::StatementReturn
                | NodeKind::StatementSynchronized
                | NodeKind::StatementThrow
                | NodeKind::StatementTry
                | NodeKind::StatementIf
                | NodeKind::StatementWhile
                | NodeKind::StatementFor
                | NodeKind::StatementLabel
                | NodeKind::StatementExpression
                | NodeKind::StatementVarDecl
        )
    }
}

/// Per-kind node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    /// token copy; identifiers and literals
    Token(Token),
    /// declarator with array dimension; `id` is the name or primitive word
    Declarator { id: Token, dimension: usize },
    /// operator meaning resolved during expression parsing
    Operator(OperatorId),
    Import { on_demand: bool },
    Modifiers(BitFlags<Modifier>),
    CtorInvocation { is_super: bool },
    SwitchLabel { is_default: bool },
    /// index of the winning candidate child of an ambiguous node
    Ambiguity { resolved: usize },
}

impl Payload {
    pub fn token(&self) -> Option<&Token> {
        match self {
            Payload::Token(token) => Some(token),
            Payload::Declarator { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn operator(&self) -> Option<OperatorId> {
        match self {
            Payload::Operator(id) => Some(*id),
            _ => None,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Payload::Declarator { dimension, .. } => *dimension,
            _ => 0,
        }
    }

    pub fn modifiers(&self) -> BitFlags<Modifier> {
        match self {
            Payload::Modifiers(flags) => *flags,
            _ => BitFlags::empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub payload: Payload,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub last_child: Option<NodeId>,
    pub prev_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
}

/// AST arena. Nodes are created detached and wired with `add_child`.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn new_node(&mut self, kind: NodeKind, payload: Payload) -> NodeId {
        let span = payload.token().map(|t| t.span.clone()).unwrap_or(0..0);
        let id = NodeId(self.nodes.len() as u32);

        self.nodes.push(Node {
            kind,
            payload,
            span,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        });

        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    /// Appends `child` as the last child of `parent` and widens the
    /// parent's span to cover it.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.node(child).parent.is_none());

        let prev = self.node(parent).last_child;

        {
            let node = self.node_mut(child);
            node.parent = Some(parent);
            node.prev_sibling = prev;
        }

        if let Some(prev) = prev {
            self.node_mut(prev).next_sibling = Some(child);
        } else {
            self.node_mut(parent).first_child = Some(child);
        }
        self.node_mut(parent).last_child = Some(child);

        let child_span = self.node(child).span.clone();
        self.expand_span(parent, &child_span);
    }

    /// Widens a node's span to include `span`.
    pub fn expand_span(&mut self, id: NodeId, span: &Span) {
        if span.start == span.end {
            return;
        }

        let node = self.node_mut(id);
        if node.span.start == node.span.end {
            node.span = span.clone();
        } else {
            node.span.start = node.span.start.min(span.start);
            node.span.end = node.span.end.max(span.end);
        }

        if let Some(parent) = node.parent {
            let span = span.clone();
            self.expand_span(parent, &span);
        }
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).last_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev_sibling
    }

    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        ChildIter {
            ast: self,
            next: self.node(id).first_child,
        }
    }

    /// Child count; grammar positions are dense so this is O(children).
    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    /// All node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }
}

pub struct ChildIter<'a> {
    ast: &'a Ast,
    next: Option<NodeId>,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.ast.node(id).next_sibling;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::{Lexeme, LineColumn};

    fn token(span: Span) -> Token {
        Token {
            lexeme: Lexeme::Identifier,
            span,
            begin: LineColumn::default(),
            end: LineColumn::default(),
        }
    }

    #[test]
    fn sibling_links() {
        let mut ast = Ast::new();
        let root = ast.new_node(NodeKind::CompilationUnit, Payload::None);
        let a = ast.new_node(NodeKind::NameUnit, Payload::Token(token(0..1)));
        let b = ast.new_node(NodeKind::NameUnit, Payload::Token(token(2..3)));
        let c = ast.new_node(NodeKind::NameUnit, Payload::Token(token(4..5)));

        ast.add_child(root, a);
        ast.add_child(root, b);
        ast.add_child(root, c);

        assert_eq!(ast.first_child(root), Some(a));
        assert_eq!(ast.last_child(root), Some(c));
        assert_eq!(ast.next_sibling(a), Some(b));
        assert_eq!(ast.prev_sibling(c), Some(b));
        assert_eq!(ast.node(b).parent, Some(root));
        assert_eq!(ast.children(root).collect::<Vec<_>>(), vec![a, b, c]);
    }

    #[test]
    fn span_union_covers_children() {
        let mut ast = Ast::new();
        let root = ast.new_node(NodeKind::Expression, Payload::None);
        let a = ast.new_node(NodeKind::Primary, Payload::Token(token(4..7)));
        let b = ast.new_node(NodeKind::Primary, Payload::Token(token(10..12)));

        ast.add_child(root, a);
        ast.add_child(root, b);

        assert_eq!(ast.node(root).span, 4..12);
    }
}

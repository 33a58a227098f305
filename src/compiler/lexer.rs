use core::fmt;
use core::ops::Range;

use logos::{Lexer, Logos};

pub type Span = Range<usize>;

/// Line/column pair, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for LineColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Numeric literal radix/format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Decimal,
    Hex,
    Octal,
    Binary,
    FpSingle,
    FpDouble,
}

/// Bit-length marker carried by a numeric literal suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberBits {
    Normal,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberInfo {
    pub kind: NumberKind,
    pub bits: NumberBits,
}

fn int_info(lex: &mut Lexer<Lexeme>, kind: NumberKind) -> NumberInfo {
    let bits = if lex.slice().ends_with(['l', 'L']) {
        NumberBits::Long
    } else {
        NumberBits::Normal
    };

    NumberInfo { kind, bits }
}

fn fp_info(lex: &mut Lexer<Lexeme>) -> NumberInfo {
    let kind = if lex.slice().ends_with(['f', 'F']) {
        NumberKind::FpSingle
    } else {
        NumberKind::FpDouble
    };

    NumberInfo {
        kind,
        bits: NumberBits::Normal,
    }
}

/// Consumes a `/* ... */` comment. Emits the lexeme only when the closing
/// delimiter is missing, so a well-formed comment never surfaces as a token.
fn lex_block_comment(
    lex: &mut Lexer<Lexeme>,
) -> logos::FilterResult<(), ()> {
    if let Some(end) = lex.remainder().find("*/") {
        lex.bump(end + 2);
        logos::FilterResult::Skip
    } else {
        lex.bump(lex.remainder().len());
        logos::FilterResult::Emit(())
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"[ \n\t\r\f]+")]
#[rustfmt::skip]
pub enum Lexeme {
    // ==< Separators >==
    #[token("(")] LeftParen,
    #[token(")")] RightParen,
    #[token("{")] LeftBrace,
    #[token("}")] RightBrace,
    #[token("[")] LeftBracket,
    #[token("]")] RightBracket,
    #[token(";")] Semicolon,
    #[token(",")] Comma,
    #[token(".")] Dot,

    // ==< Operators >==
    #[token("=")] Assign,
    #[token("<")] Less,
    #[token(">")] Greater,
    #[token("!")] Bang,
    #[token("~")] Tilde,
    #[token("?")] Question,
    #[token(":")] Colon,
    #[token("==")] EqualEqual,
    #[token("<=")] LessEqual,
    #[token(">=")] GreaterEqual,
    #[token("!=")] NotEqual,
    #[token("&&")] AndAnd,
    #[token("||")] OrOr,
    #[token("++")] Increment,
    #[token("--")] Decrement,
    #[token("+")] Plus,
    #[token("-")] Minus,
    #[token("*")] Star,
    #[token("/")] Slash,
    #[token("&")] Ampersand,
    #[token("|")] Pipe,
    #[token("^")] Caret,
    #[token("%")] Percent,
    #[token("<<")] ShiftLeft,
    #[token(">>")] ShiftRight,
    #[token(">>>")] ShiftRightUnsigned,
    #[token("+=")] AddAssign,
    #[token("-=")] SubAssign,
    #[token("*=")] MulAssign,
    #[token("/=")] DivAssign,
    #[token("&=")] AndAssign,
    #[token("|=")] OrAssign,
    #[token("^=")] XorAssign,
    #[token("%=")] ModAssign,
    #[token("<<=")] ShiftLeftAssign,
    #[token(">>=")] ShiftRightAssign,
    #[token(">>>=")] ShiftRightUnsignedAssign,
    #[token("->")] Arrow,

    // ==< Keywords >==
    #[token("public")] PublicKW,
    #[token("private")] PrivateKW,
    #[token("protected")] ProtectedKW,
    #[token("final")] FinalKW,
    #[token("static")] StaticKW,
    #[token("abstract")] AbstractKW,
    #[token("transient")] TransientKW,
    #[token("synchronized")] SynchronizedKW,
    #[token("volatile")] VolatileKW,
    #[token("native")] NativeKW,
    #[token("default")] DefaultKW,
    #[token("if")] IfKW,
    #[token("else")] ElseKW,
    #[token("while")] WhileKW,
    #[token("do")] DoKW,
    #[token("for")] ForKW,
    #[token("switch")] SwitchKW,
    #[token("case")] CaseKW,
    #[token("break")] BreakKW,
    #[token("continue")] ContinueKW,
    #[token("return")] ReturnKW,
    #[token("throw")] ThrowKW,
    #[token("throws")] ThrowsKW,
    #[token("try")] TryKW,
    #[token("catch")] CatchKW,
    #[token("finally")] FinallyKW,
    #[token("class")] ClassKW,
    #[token("interface")] InterfaceKW,
    #[token("extends")] ExtendsKW,
    #[token("implements")] ImplementsKW,
    #[token("import")] ImportKW,
    #[token("package")] PackageKW,
    #[token("new")] NewKW,
    #[token("this")] ThisKW,
    #[token("super")] SuperKW,
    #[token("instanceof")] InstanceofKW,
    #[token("void")] VoidKW,
    #[token("boolean")] BooleanKW,
    #[token("byte")] ByteKW,
    #[token("short")] ShortKW,
    #[token("int")] IntKW,
    #[token("long")] LongKW,
    #[token("char")] CharKW,
    #[token("float")] FloatKW,
    #[token("double")] DoubleKW,
    #[token("true")] TrueKW,
    #[token("false")] FalseKW,
    #[token("null")] NullKW,

    // reserved but not usable; using one is a syntax error, not an identifier
    #[token("const")] ConstKW,
    #[token("goto")] GotoKW,

    // ==< Value literals >==
    #[regex(r"0[xX][0-9a-fA-F]+[lL]?", |lex| int_info(lex, NumberKind::Hex))]
    #[regex(r"0[bB][01]+[lL]?", |lex| int_info(lex, NumberKind::Binary))]
    #[regex(r"0[0-7]+[lL]?", |lex| int_info(lex, NumberKind::Octal), priority = 4)]
    #[regex(r"(0|[1-9][0-9]*)[lL]?", |lex| int_info(lex, NumberKind::Decimal))]
    Integer(NumberInfo),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fFdD]?", fp_info)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fFdD]?", fp_info)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fFdD]?", fp_info)]
    #[regex(r"[0-9]+[fFdD]", fp_info)]
    Floating(NumberInfo),

    #[regex(r#""(\\.|[^\\"\n])*""#)]
    String,

    #[regex(r"'(\\.|[^\\'\n])+'")]
    Character,

    // ==< Other >==
    #[regex(r"[_a-zA-Z][_a-zA-Z0-9]*")]
    Identifier,

    #[token("/*", lex_block_comment)]
    UnterminatedComment,

    /// placeholder for end-of-input; recurs once reached
    Eof,

    /// lexer error fallback
    Illegal,
}

impl Lexeme {
    pub fn is_modifier(&self) -> bool {
        matches!(
            self,
            Lexeme::PublicKW
                | Lexeme::PrivateKW
                | Lexeme::ProtectedKW
                | Lexeme::FinalKW
                | Lexeme::StaticKW
                | Lexeme::AbstractKW
                | Lexeme::TransientKW
                | Lexeme::SynchronizedKW
                | Lexeme::VolatileKW
                | Lexeme::NativeKW
        )
    }

    pub fn is_primitive_type(&self) -> bool {
        matches!(
            self,
            Lexeme::BooleanKW
                | Lexeme::ByteKW
                | Lexeme::ShortKW
                | Lexeme::IntKW
                | Lexeme::LongKW
                | Lexeme::CharKW
                | Lexeme::FloatKW
                | Lexeme::DoubleKW
                | Lexeme::VoidKW
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Lexeme::Integer(_)
                | Lexeme::Floating(_)
                | Lexeme::String
                | Lexeme::Character
                | Lexeme::TrueKW
                | Lexeme::FalseKW
                | Lexeme::NullKW
        )
    }

    /// Deprecated C-family reserved words; never valid in a program.
    pub fn is_deprecated_keyword(&self) -> bool {
        matches!(self, Lexeme::ConstKW | Lexeme::GotoKW)
    }
}

/// Language token model.
///
/// Tokens are values: the parser copies them into AST payloads, so they
/// carry everything a later phase needs without going back to the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub lexeme: Lexeme,
    pub span: Span,
    pub begin: LineColumn,
    pub end: LineColumn,
}

impl Token {
    /// Lexeme text within the source buffer.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    pub fn number_info(&self) -> Option<NumberInfo> {
        match self.lexeme {
            Lexeme::Integer(info) | Lexeme::Floating(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.lexeme == Lexeme::Eof
    }
}

/// Byte offset → line/column conversion over one source buffer.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );

        LineIndex { line_starts }
    }

    pub fn locate(&self, offset: usize) -> LineColumn {
        let line = self.line_starts.partition_point(|start| *start <= offset);

        LineColumn {
            line,
            column: offset - self.line_starts[line - 1] + 1,
        }
    }

    pub fn span_range(&self, span: &Span) -> (LineColumn, LineColumn) {
        (self.locate(span.start), self.locate(span.end.max(span.start)))
    }
}

/// maximum lookahead distance of the parser
pub const MAX_LOOKAHEAD: usize = 4;

/// Token source with a 4-token lookahead window.
///
/// Peeks are idempotent until a consume. Comments are dropped while
/// buffering. The EOF token recurs indefinitely. `fork` produces an
/// independent cursor over the same source buffer, used by the parser to
/// speculate past an ambiguity without committing.
#[derive(Clone)]
pub struct TokenStream<'s> {
    source: &'s str,
    lexer: Lexer<'s, Lexeme>,
    lookahead: Vec<Token>,
    line_index: std::rc::Rc<LineIndex>,
}

impl<'s> TokenStream<'s> {
    pub fn new(source: &'s str) -> Self {
        TokenStream {
            source,
            lexer: Lexeme::lexer(source),
            lookahead: Vec::with_capacity(MAX_LOOKAHEAD),
            line_index: std::rc::Rc::new(LineIndex::new(source)),
        }
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    /// Independent cursor sharing the underlying buffer.
    pub fn fork(&self) -> TokenStream<'s> {
        self.clone()
    }

    pub fn line_column(&self, offset: usize) -> LineColumn {
        self.line_index.locate(offset)
    }

    fn next_raw(&mut self) -> Token {
        let lexeme = match self.lexer.next() {
            Some(Ok(lexeme)) => lexeme,
            Some(Err(())) => Lexeme::Illegal,
            None => Lexeme::Eof,
        };
        let span = self.lexer.span();

        Token {
            lexeme,
            begin: self.line_column(span.start),
            end: self.line_column(span.end.max(span.start)),
            span,
        }
    }

    fn fill(&mut self, upto: usize) {
        debug_assert!(upto < MAX_LOOKAHEAD);

        while self.lookahead.len() <= upto {
            let token = self.next_raw();
            self.lookahead.push(token);
        }
    }

    /// Peeks the k-th upcoming token, k < 4.
    pub fn peek(&mut self, k: usize) -> &Token {
        self.fill(k);
        &self.lookahead[k]
    }

    /// Consumes and returns the first upcoming token.
    pub fn consume(&mut self) -> Token {
        self.fill(0);
        self.lookahead.remove(0)
    }

    /// Text of a span in the source buffer.
    pub fn slice(&self, span: &Span) -> &'s str {
        &self.source[span.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(src: &str) -> TokenStream<'_> {
        TokenStream::new(src)
    }

    #[test]
    fn peek_is_idempotent_until_consume() {
        let mut ts = stream("int x = 10;");

        assert_eq!(ts.peek(0).lexeme, Lexeme::IntKW);
        assert_eq!(ts.peek(0).lexeme, Lexeme::IntKW);
        assert_eq!(ts.peek(1).lexeme, Lexeme::Identifier);
        assert_eq!(
            ts.peek(3).lexeme,
            Lexeme::Integer(NumberInfo {
                kind: NumberKind::Decimal,
                bits: NumberBits::Normal,
            })
        );

        assert_eq!(ts.consume().lexeme, Lexeme::IntKW);
        assert_eq!(ts.peek(0).lexeme, Lexeme::Identifier);
    }

    #[test]
    fn eof_recurs() {
        let mut ts = stream("x");

        assert_eq!(ts.consume().lexeme, Lexeme::Identifier);
        assert!(ts.consume().is_eof());
        assert!(ts.consume().is_eof());
        assert!(ts.peek(3).is_eof());
    }

    #[test]
    fn comments_are_dropped() {
        let mut ts = stream("a // line\n /* block\nstill */ b");

        assert_eq!(ts.consume().lexeme, Lexeme::Identifier);
        assert_eq!(ts.consume().lexeme, Lexeme::Identifier);
        assert!(ts.consume().is_eof());
    }

    #[test]
    fn unterminated_comment_surfaces() {
        let mut ts = stream("a /* no end");

        assert_eq!(ts.consume().lexeme, Lexeme::Identifier);
        assert_eq!(ts.consume().lexeme, Lexeme::UnterminatedComment);
    }

    #[test]
    fn number_formats() {
        let mut ts = stream("0x1F 017 0b101 42L 1.5f 2e3 .25 3F");

        let kinds: Vec<_> = core::iter::from_fn(|| {
            let t = ts.consume();
            t.number_info().map(|i| i.kind)
        })
        .collect();

        assert_eq!(
            kinds,
            vec![
                NumberKind::Hex,
                NumberKind::Octal,
                NumberKind::Binary,
                NumberKind::Decimal,
                NumberKind::FpSingle,
                NumberKind::FpDouble,
                NumberKind::FpDouble,
                NumberKind::FpSingle,
            ]
        );
    }

    #[test]
    fn fork_is_independent() {
        let mut ts = stream("a b c");
        ts.consume();

        let mut copy = ts.fork();
        let b_span = copy.consume().span;
        copy.consume();

        // original cursor unaffected by the fork's consumption
        assert_eq!(ts.peek(0).span, b_span);
        assert_eq!(ts.slice(&b_span), "b");
    }

    #[test]
    fn line_columns() {
        let mut ts = stream("a\n  b");
        let a = ts.consume();
        let b = ts.consume();

        assert_eq!((a.begin.line, a.begin.column), (1, 1));
        assert_eq!((b.begin.line, b.begin.column), (2, 3));
    }
}

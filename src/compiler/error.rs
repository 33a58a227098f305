//! Diagnostic taxonomy and the append-only diagnostic log.
//!
//! Every code carries a `(Severity, ErrorScope)` descriptor. The log
//! supports nested ambiguity streams: during speculative parsing each
//! candidate writes into its own sub-stream, and resolution promotes the
//! winner's entries while the losers stay collapsed under the ambiguity
//! entry.

use core::fmt;

use strum::Display;

use crate::compiler::lexer::LineColumn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorScope {
    Internal,
    Runtime,
    Lexical,
    Syntax,
    Context,
    Optimization,
    Linker,
    Build,
}

/// Closed diagnostic code set.
///
/// Discriminants are stable and observable in rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DiagnosticCode {
    Internal = 1,

    // runtime
    FileOpenFailed = 100,
    FileSizeMismatch = 101,

    // lexical
    IllegalCharacter = 200,
    UnterminatedCharacter = 201,
    UnterminatedString = 202,
    UnterminatedComment = 203,
    MalformedNumber = 204,

    // syntax
    TrailingContent = 300,
    PackageNoName = 301,
    PackageNoSemicolon = 302,
    ImportNoName = 303,
    ImportNoSemicolon = 304,
    TopLevelUnrecognized = 305,
    ClassNoName = 306,
    ClassNoBody = 307,
    ClassBodyEnclose = 308,
    InterfaceNoName = 309,
    InterfaceNoBody = 310,
    InterfaceBodyEnclose = 311,
    MemberNoType = 312,
    MemberNoName = 313,
    MemberVarNoSemicolon = 314,
    BlockEnclose = 315,
    StatementUnrecognized = 316,
    StatementNoSemicolon = 317,
    ParenthesisExpected = 318,
    VarNoDeclarator = 319,
    ArrayEncloseExpected = 320,
    FormalParameter = 321,
    ForNoSemicolon = 322,
    WhileExpected = 323,
    ExpressionNoOperand = 324,
    ExpressionNoOperator = 325,
    ExpressionNoLvalue = 326,
    ExpressionLiteralLvalue = 327,
    ExpressionIncompleteTernary = 328,
    ExpressionParenthesis = 329,
    DeprecatedKeyword = 330,
    ColonExpected = 331,
    CatchOrFinallyExpected = 332,

    // context
    ClassNameDuplicate = 400,
    MemberVariableDuplicate = 401,
    MemberVariableDimensionAmbiguous = 402,
    MemberVariableDimensionDuplicate = 403,
    LocalVariableDuplicate = 404,
    LocalVariableDimensionAmbiguous = 405,
    LocalVariableDimensionDuplicate = 406,
    ParameterDuplicate = 407,
    ParameterDimensionAmbiguous = 408,
    MethodDuplicate = 409,
    MethodDimensionAmbiguous = 410,
    UndefinedReference = 411,
    BreakUnbound = 412,
    ContinueUnbound = 413,
    ImportAmbiguous = 414,
    ImportDuplicate = 415,
    DeclarationAsBranchBody = 416,
    UnreachableStatement = 417,

    // numeric (overflow warnings)
    NumberOverflowInt8 = 500,
    NumberOverflowInt16 = 501,
    NumberOverflowInt32 = 502,
    NumberOverflowInt64 = 503,
    NumberOverflowU16 = 504,
    NumberOverflowFp32Exponent = 505,
    NumberOverflowFp32Mantissa = 506,
    NumberOverflowFp64Exponent = 507,
    NumberOverflowFp64Mantissa = 508,

    // optimization
    UnusedVariable = 600,
}

impl DiagnosticCode {
    pub fn severity(self) -> Severity {
        use DiagnosticCode::*;

        match self {
            ImportDuplicate
            | UnreachableStatement
            | NumberOverflowInt8
            | NumberOverflowInt16
            | NumberOverflowInt32
            | NumberOverflowInt64
            | NumberOverflowU16
            | NumberOverflowFp32Exponent
            | NumberOverflowFp32Mantissa
            | NumberOverflowFp64Exponent
            | NumberOverflowFp64Mantissa
            | MemberVariableDimensionDuplicate
            | LocalVariableDimensionDuplicate
            | DeprecatedKeyword
            | UnusedVariable => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn scope(self) -> ErrorScope {
        let id = self as u16;

        match id {
            100..=199 => ErrorScope::Runtime,
            200..=299 => ErrorScope::Lexical,
            300..=399 => ErrorScope::Syntax,
            400..=499 | 500..=599 => ErrorScope::Context,
            600..=699 => ErrorScope::Optimization,
            _ => ErrorScope::Internal,
        }
    }

    fn template(self) -> &'static str {
        use DiagnosticCode::*;

        match self {
            Internal => "internal compiler error: {}",
            FileOpenFailed => "cannot open source file: {}",
            FileSizeMismatch => "source file size changed while reading",
            IllegalCharacter => "illegal character in input",
            UnterminatedCharacter => "character literal is not closed",
            UnterminatedString => "string literal is not closed",
            UnterminatedComment => "multi-line comment is not closed",
            MalformedNumber => "malformed numeric literal",
            TrailingContent => "trailing content after compilation unit",
            PackageNoName => "expected package name",
            PackageNoSemicolon => "expected ';' after package declaration",
            ImportNoName => "expected import name",
            ImportNoSemicolon => "expected ';' after import declaration",
            TopLevelUnrecognized => "expected class or interface declaration",
            ClassNoName => "expected class name",
            ClassNoBody => "expected class body",
            ClassBodyEnclose => "expected '}' to close class body",
            InterfaceNoName => "expected interface name",
            InterfaceNoBody => "expected interface body",
            InterfaceBodyEnclose => "expected '}' to close interface body",
            MemberNoType => "expected member type",
            MemberNoName => "expected member name",
            MemberVarNoSemicolon => "expected ';' after member declaration",
            BlockEnclose => "expected '}' to close block",
            StatementUnrecognized => "unrecognized statement",
            StatementNoSemicolon => "expected ';' after statement",
            ParenthesisExpected => "expected '('",
            VarNoDeclarator => "expected variable declarator",
            ArrayEncloseExpected => "expected ']'",
            FormalParameter => "malformed formal parameter",
            ForNoSemicolon => "expected ';' in for statement",
            WhileExpected => "expected 'while' after do body",
            ExpressionNoOperand => "expression has an operator with no operand",
            ExpressionNoOperator => "expression has operands with no operator",
            ExpressionNoLvalue => "expression has no lvalue to assign to",
            ExpressionLiteralLvalue => "literal cannot be used as lvalue",
            ExpressionIncompleteTernary => "incomplete ternary expression",
            ExpressionParenthesis => "expected ')' to close expression",
            DeprecatedKeyword => "'{}' is reserved and cannot be used",
            ColonExpected => "expected ':'",
            CatchOrFinallyExpected => "expected 'catch' or 'finally' after try block",
            ClassNameDuplicate => "class name '{}' clashes with another top level or import",
            MemberVariableDuplicate => "duplicate member variable '{}'",
            MemberVariableDimensionAmbiguous => "member variable '{}' has conflicting array dimensions",
            MemberVariableDimensionDuplicate => "member variable '{}' repeats its array dimension",
            LocalVariableDuplicate => "duplicate local variable '{}'",
            LocalVariableDimensionAmbiguous => "local variable '{}' has conflicting array dimensions",
            LocalVariableDimensionDuplicate => "local variable '{}' repeats its array dimension",
            ParameterDuplicate => "duplicate parameter '{}'",
            ParameterDimensionAmbiguous => "parameter '{}' has conflicting array dimensions",
            MethodDuplicate => "duplicate method '{}'",
            MethodDimensionAmbiguous => "method '{}' has conflicting return dimensions",
            UndefinedReference => "use of undefined name '{}'",
            BreakUnbound => "'break' is not bound by a loop or switch",
            ContinueUnbound => "'continue' is not bound by a loop",
            ImportAmbiguous => "import '{}' is ambiguous",
            ImportDuplicate => "duplicate import '{}'",
            DeclarationAsBranchBody => "variable declaration cannot be the body of a branch",
            UnreachableStatement => "statement will never execute",
            NumberOverflowInt8 => "number overflows 8-bit integer",
            NumberOverflowInt16 => "number overflows 16-bit integer",
            NumberOverflowInt32 => "number overflows 32-bit integer",
            NumberOverflowInt64 => "number overflows 64-bit integer",
            NumberOverflowU16 => "number overflows 16-bit character",
            NumberOverflowFp32Exponent => "number overflows float exponent",
            NumberOverflowFp32Mantissa => "number loses float precision",
            NumberOverflowFp64Exponent => "number overflows double exponent",
            NumberOverflowFp64Mantissa => "number loses double precision",
            UnusedVariable => "variable '{}' is never used",
        }
    }

    /// Formats the parameterized message for this code.
    pub fn message(self, args: &[&str]) -> String {
        let mut out = String::new();
        let mut args = args.iter();

        for part in self.template().split("{}") {
            out.push_str(part);
            if let Some(arg) = args.next() {
                out.push_str(arg);
            }
        }

        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub begin: LineColumn,
    pub end: LineColumn,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {}-E{:04}: {}",
            self.begin,
            self.code.severity(),
            self.code.scope(),
            self.code as u16,
            self.message
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub information: usize,
    pub warnings: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Diagnostic(Diagnostic),
    Ambiguity(AmbiguityEntry),
}

/// One sub-stream per candidate interpretation; `resolved` is the winning
/// candidate after the parser commits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbiguityEntry {
    pub branches: Vec<DiagnosticStream>,
    pub resolved: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticStream {
    pub entries: Vec<LogEntry>,
}

impl DiagnosticStream {
    fn summarize(&self, out: &mut Summary) {
        for entry in &self.entries {
            if let LogEntry::Diagnostic(diag) = entry {
                match diag.code.severity() {
                    Severity::Information => out.information += 1,
                    Severity::Warning => out.warnings += 1,
                    Severity::Error => out.errors += 1,
                }
            }
        }
    }
}

/// Append-only diagnostic log shared by every phase of one compilation.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    main: DiagnosticStream,
    /// path into nested ambiguity entries: (entry index, branch index)
    cursor: Vec<(usize, usize)>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        DiagnosticLog::default()
    }

    fn current_stream_mut(&mut self) -> &mut DiagnosticStream {
        let mut stream = &mut self.main;

        for (entry, branch) in &self.cursor {
            let LogEntry::Ambiguity(amb) = &mut stream.entries[*entry] else {
                unreachable!("ambiguity cursor out of sync");
            };
            stream = &mut amb.branches[*branch];
        }

        stream
    }

    fn current_stream(&self) -> &DiagnosticStream {
        let mut stream = &self.main;

        for (entry, branch) in &self.cursor {
            let LogEntry::Ambiguity(amb) = &stream.entries[*entry] else {
                unreachable!("ambiguity cursor out of sync");
            };
            stream = &amb.branches[*branch];
        }

        stream
    }

    /// Summary of the stream currently being written (an ambiguity branch
    /// during speculative parsing, the main stream otherwise).
    pub fn current_summary(&self) -> Summary {
        let mut out = Summary::default();
        self.current_stream().summarize(&mut out);
        out
    }

    pub fn log(
        &mut self,
        code: DiagnosticCode,
        begin: LineColumn,
        end: LineColumn,
        args: &[&str],
    ) {
        let diag = Diagnostic {
            code,
            begin,
            end,
            message: code.message(args),
        };

        self.current_stream_mut()
            .entries
            .push(LogEntry::Diagnostic(diag));
    }

    /// Opens an ambiguity entry and enters its first candidate stream.
    pub fn ambiguity_begin(&mut self) {
        let stream = self.current_stream_mut();
        let entry_idx = stream.entries.len();

        stream.entries.push(LogEntry::Ambiguity(AmbiguityEntry {
            branches: vec![DiagnosticStream::default()],
            resolved: None,
        }));

        self.cursor.push((entry_idx, 0));
    }

    /// Moves to the next candidate stream of the innermost ambiguity.
    pub fn ambiguity_branch(&mut self) {
        let (entry_idx, branch_idx) = self
            .cursor
            .pop()
            .expect("ambiguity_branch outside of ambiguity");
        let stream = self.current_stream_mut();

        let LogEntry::Ambiguity(amb) = &mut stream.entries[entry_idx] else {
            unreachable!("ambiguity cursor out of sync");
        };
        amb.branches.push(DiagnosticStream::default());

        self.cursor.push((entry_idx, branch_idx + 1));
    }

    /// Closes the innermost ambiguity without resolving it.
    pub fn ambiguity_end(&mut self) {
        self.cursor
            .pop()
            .expect("ambiguity_end outside of ambiguity");
    }

    /// Closes the innermost ambiguity and promotes the winner's entries
    /// into the parent stream; losing branches stay collapsed.
    pub fn resolve(&mut self, winner: usize) {
        let (entry_idx, _) = self
            .cursor
            .pop()
            .expect("resolve outside of ambiguity");
        let stream = self.current_stream_mut();

        let LogEntry::Ambiguity(amb) = &mut stream.entries[entry_idx] else {
            unreachable!("ambiguity cursor out of sync");
        };

        amb.resolved = Some(winner);
        let promoted =
            core::mem::take(&mut amb.branches[winner].entries);

        // keep ambiguity entry in place; winner entries follow it directly
        let at = entry_idx + 1;
        stream.entries.splice(at..at, promoted);
    }

    /// Summary over the main stream; collapsed ambiguity branches are not
    /// counted.
    pub fn summary(&self) -> Summary {
        let mut out = Summary::default();
        self.main.summarize(&mut out);
        out
    }

    pub fn has_errors(&self) -> bool {
        self.summary().errors > 0
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.main.entries
    }

    /// Iterates main-stream diagnostics in log (source) order.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.main.entries.iter().filter_map(|e| match e {
            LogEntry::Diagnostic(d) => Some(d),
            LogEntry::Ambiguity(_) => None,
        })
    }

    /// Flattened user-visible rendering, one line per diagnostic.
    pub fn render(&self, file: &str) -> String {
        fn render_stream(
            stream: &DiagnosticStream,
            file: &str,
            indent: usize,
            out: &mut String,
        ) {
            for entry in &stream.entries {
                match entry {
                    LogEntry::Diagnostic(diag) => {
                        for _ in 0..indent {
                            out.push_str("  ");
                        }
                        out.push_str(file);
                        out.push(':');
                        out.push_str(&diag.to_string());
                        out.push('\n');
                    }
                    LogEntry::Ambiguity(amb) => {
                        for (i, branch) in amb.branches.iter().enumerate() {
                            if Some(i) == amb.resolved {
                                continue;
                            }
                            for _ in 0..indent {
                                out.push_str("  ");
                            }
                            out.push_str(&format!(
                                "{file}: ambiguity candidate {i}:\n"
                            ));
                            render_stream(branch, file, indent + 1, out);
                        }
                    }
                }
            }
        }

        let mut out = String::new();
        render_stream(&self.main, file, 0, &mut out);
        out
    }

    /// Rich rendering with source labels.
    #[cfg(feature = "pretty_errors")]
    pub fn render_pretty(&self, file: &str, source: &str) -> String {
        use ariadne::{Label, Report, ReportKind, Source};

        let line_starts: Vec<usize> = core::iter::once(0)
            .chain(
                source
                    .bytes()
                    .enumerate()
                    .filter(|(_, b)| *b == b'\n')
                    .map(|(i, _)| i + 1),
            )
            .collect();
        let offset_of = |lc: &LineColumn| {
            line_starts
                .get(lc.line.saturating_sub(1))
                .map(|start| start + lc.column.saturating_sub(1))
                .unwrap_or(0)
                .min(source.len())
        };

        let mut out = Vec::new();
        for diag in self.diagnostics() {
            let start = offset_of(&diag.begin);
            let end = offset_of(&diag.end).max(start);

            let kind = match diag.code.severity() {
                Severity::Error => ReportKind::Error,
                Severity::Warning => ReportKind::Warning,
                Severity::Information => ReportKind::Advice,
            };

            let _ = Report::build(kind, (file, start..end))
                .with_message(&diag.message)
                .with_label(Label::new((file, start..end)))
                .finish()
                .write((file, Source::from(source)), &mut out);
        }

        String::from_utf8_lossy(&out).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(line: usize, column: usize) -> LineColumn {
        LineColumn { line, column }
    }

    #[test]
    fn descriptors() {
        assert_eq!(
            DiagnosticCode::ImportDuplicate.severity(),
            Severity::Warning
        );
        assert_eq!(
            DiagnosticCode::ImportDuplicate.scope(),
            ErrorScope::Context
        );
        assert_eq!(
            DiagnosticCode::BlockEnclose.severity(),
            Severity::Error
        );
        assert_eq!(
            DiagnosticCode::UnterminatedString.scope(),
            ErrorScope::Lexical
        );
    }

    #[test]
    fn message_formatting() {
        assert_eq!(
            DiagnosticCode::UndefinedReference.message(&["x"]),
            "use of undefined name 'x'"
        );
        assert_eq!(
            DiagnosticCode::BlockEnclose.message(&[]),
            "expected '}' to close block"
        );
    }

    #[test]
    fn ambiguity_resolution_promotes_winner() {
        let mut log = DiagnosticLog::new();

        log.log(DiagnosticCode::ImportDuplicate, at(1, 1), at(1, 2), &["a"]);

        log.ambiguity_begin();
        log.log(DiagnosticCode::BlockEnclose, at(2, 1), at(2, 2), &[]);
        log.ambiguity_branch();
        log.log(
            DiagnosticCode::ImportDuplicate,
            at(3, 1),
            at(3, 2),
            &["b"],
        );
        log.resolve(1);

        // winner branch's warning promoted; loser branch's error collapsed
        let summary = log.summary();
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.warnings, 2);
        assert!(!log.has_errors());

        let rendered = log.render("test.java");
        assert!(rendered.contains("ambiguity candidate 0"));
        assert!(!rendered.contains("ambiguity candidate 1"));
    }

    #[test]
    fn nested_ambiguity() {
        let mut log = DiagnosticLog::new();

        log.ambiguity_begin();
        log.ambiguity_begin();
        log.log(DiagnosticCode::BlockEnclose, at(1, 1), at(1, 2), &[]);
        log.resolve(0);
        log.ambiguity_branch();
        log.ambiguity_end();

        assert_eq!(log.summary().errors, 0);
    }

    #[test]
    fn rendering_format() {
        let mut log = DiagnosticLog::new();
        log.log(
            DiagnosticCode::UndefinedReference,
            at(3, 7),
            at(3, 8),
            &["y"],
        );

        assert_eq!(
            log.render("a.java"),
            "a.java:3:7: error context-E0411: use of undefined name 'y'\n"
        );
    }
}

use std::path::PathBuf;

use thiserror::Error;

use crate::frontend::{SourceFile, lexer::Span};

/// Fatal errors. Construction stops at the first one.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("expected {expected}, found `{found}`")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unexpected end of file while parsing {context}")]
    UnexpectedEof { context: String, span: Span },

    #[error("unexpected character `{character}`")]
    UnexpectedCharacter { character: char, span: Span },

    #[error("unterminated {what} literal")]
    UnterminatedLiteral { what: &'static str, span: Span },

    #[error("`{name}` is already declared in this scope")]
    Redeclaration { name: String, span: Span },

    #[error("cannot find `{name}` in this scope")]
    Unresolved { name: String, span: Span },

    #[error("unknown type `{name}`")]
    UnknownType { name: String, span: Span },

    #[error("type `{ty}` is too large")]
    TypeTooLarge { ty: String, span: Span },

    #[error("no `main` function declared")]
    MissingMain { span: Span },

    #[error("`main` must take no parameters and return nothing")]
    InvalidMain { span: Span },

    #[error("`{name}` takes {expected} argument(s) but {found} were supplied")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("`{keyword}` is not allowed here")]
    MisplacedJump { keyword: &'static str, span: Span },

    #[error("function `{name}` must return a value of type `{ty}`")]
    MissingReturn { name: String, ty: String, span: Span },

    #[error("failed to read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UnexpectedToken { span, .. }
            | Self::UnexpectedEof { span, .. }
            | Self::UnexpectedCharacter { span, .. }
            | Self::UnterminatedLiteral { span, .. }
            | Self::Redeclaration { span, .. }
            | Self::Unresolved { span, .. }
            | Self::UnknownType { span, .. }
            | Self::TypeTooLarge { span, .. }
            | Self::MissingMain { span }
            | Self::InvalidMain { span }
            | Self::ArityMismatch { span, .. }
            | Self::MisplacedJump { span, .. }
            | Self::MissingReturn { span, .. } => Some(*span),
            Self::Io { .. } => None,
        }
    }

    /// Formats the error as `file:line:col: message` followed by the offending line
    pub fn render(&self, source: &SourceFile) -> String {
        match self.span() {
            Some(span) => format!(
                "{}:{}:{}: {}\n{}",
                source.origin,
                source.row_for_position(span.start),
                source.column_for_position(span.start),
                self,
                source.highlight_span(span)
            ),
            None => self.to_string(),
        }
    }
}

/// A graph-level error surviving construction, reported after the fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn render(&self, source: &SourceFile) -> String {
        format!(
            "{}:{}:{}: {}\n{}",
            source.origin,
            source.row_for_position(self.span.start),
            source.column_for_position(self.span.start),
            self.message,
            source.highlight_span(self.span)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_points_at_line_and_column() {
        colored::control::set_override(false);

        let source = SourceFile::from_memory("func main() {\n    foo;\n}\n");
        let start = source.contents.find("foo").unwrap();
        let error = CompileError::Unresolved {
            name: "foo".into(),
            span: Span::new(start, start + 3),
        };

        let rendered = error.render(&source);

        assert!(rendered.starts_with("<memory>:2:5: cannot find `foo` in this scope"));
    }
}

use std::path::{Path, PathBuf};

use colored::Colorize;

use self::lexer::Span;
use crate::error::CompileError;

pub mod intern;
pub mod lexer;
pub mod parser;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn from_memory(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_owned(),
            source,
        })?;

        Ok(Self {
            contents,
            origin: SourceFileOrigin::File(path.to_owned()),
        })
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// 1-based line of the byte at `position`
    pub fn row_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());

        self.contents[..position]
            .bytes()
            .filter(|b| *b == b'\n')
            .count()
            + 1
    }

    /// 1-based column of the byte at `position`
    pub fn column_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());

        match self.contents[..position].rfind('\n') {
            Some(newline) => position - newline,
            None => position + 1,
        }
    }

    /// Renders the line containing `span` with the span underlined
    pub fn highlight_span(&self, span: Span) -> String {
        let start = span.start.min(self.contents.len());
        let line_start = self.contents[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = self.contents[start..]
            .find('\n')
            .map_or(self.contents.len(), |i| start + i);

        let line = &self.contents[line_start..line_end];
        let row = self.row_for_position(start).to_string();
        let width = span.end.clamp(start + 1, line_end.max(start + 1)) - start;

        format!(
            "{} {} {}\n{} {} {}{}",
            row.blue(),
            "|".blue(),
            line,
            " ".repeat(row.len()),
            "|".blue(),
            " ".repeat(start - line_start),
            "^".repeat(width).red()
        )
    }
}

#[derive(Debug, Clone)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

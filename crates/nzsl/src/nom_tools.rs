//! `nom` plumbing shared by the lexer: a [`State`] carrying the current
//! [`SourceFile`] through `nom_locate`'s [`LocatedSpan`], and a
//! [`SourceLocation`] (file + 1-based line/column range) that every token
//! and AST node is stamped with once parsing is done. AST nodes themselves
//! are owned (no borrowed `&str`/lifetime) so a [`crate::ast::Module`] can
//! travel unchanged through resolution, constant folding, validation and
//! the binary (de)serializer.

use std::ops::Range;
use std::sync::Arc;

use nom_locate::LocatedSpan;

use crate::file::SourceFile;

/// Parser state threaded through every `nom_locate` span: just the file
/// being tokenized, cheap to clone (it's `Arc`-backed internally).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct State {
    pub file: SourceFile,
}

impl State {
    pub fn new(file: SourceFile) -> Self {
        Self { file }
    }
}

/// A `nom_locate` span over source text, carrying [`State`] as its `extra`.
pub type NomSpan<'base> = LocatedSpan<&'base str, State>;

/// A file reference plus an inclusive, 1-based start/end line-and-column
/// range, per spec §3.1. Locations are merged with [`SourceLocation::extend_to`]
/// when a parent node's range is the union of its children's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Arc<SourceFile>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    /// Byte offset range, kept alongside line/column so the diagnostics
    /// renderer (`codespan_reporting`) can label a snippet directly.
    pub position: Range<usize>,
}

impl SourceLocation {
    /// Builds a location spanning exactly the two given `nom_locate` spans
    /// (`start`'s first character through `end`'s last character).
    pub fn spanning(start: &NomSpan<'_>, end: &NomSpan<'_>) -> Self {
        let end_len = end.fragment().len().max(1);
        let end_col_len = end.fragment().chars().count().max(1) as u32;
        Self {
            file: Arc::new(start.extra.file.clone()),
            start_line: start.location_line(),
            start_column: start.get_column() as u32,
            end_line: end.location_line(),
            end_column: end.get_column() as u32 + end_col_len - 1,
            position: start.location_offset()..(end.location_offset() + end_len),
        }
    }

    pub fn single(span: &NomSpan<'_>) -> Self {
        Self::spanning(span, span)
    }

    /// Merges two locations into the smallest range covering both. Used by
    /// the parser to build a statement/expression's location from its
    /// first and last child.
    pub fn extend_to(&self, other: &SourceLocation) -> SourceLocation {
        let (start_line, start_column) = if self.start_line < other.start_line
            || (self.start_line == other.start_line && self.start_column <= other.start_column)
        {
            (self.start_line, self.start_column)
        } else {
            (other.start_line, other.start_column)
        };

        let (end_line, end_column) = if self.end_line > other.end_line
            || (self.end_line == other.end_line && self.end_column >= other.end_column)
        {
            (self.end_line, self.end_column)
        } else {
            (other.end_line, other.end_column)
        };

        let start_pos = self.position.start.min(other.position.start);
        let end_pos = self.position.end.max(other.position.end);

        SourceLocation {
            file: self.file.clone(),
            start_line,
            start_column,
            end_line,
            end_column,
            position: start_pos..end_pos,
        }
    }
}

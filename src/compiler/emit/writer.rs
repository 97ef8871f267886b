//! Output buffer with indentation and source-location tracking
//!
//! The writer keeps a logical cursor `(path, line, column)` naming where the
//! next emitted text claims to come from. A requested location is applied
//! lazily: the next non-empty text either pads with newlines, emits a `#line`
//! directive, or does nothing when the cursor already matches.

use crate::compiler::target::{Dialect, LineDirectiveMode};
use crate::diagnostics::SourceLoc;
use std::collections::HashMap;
use std::sync::Arc;

/// Lines the writer will close with plain newlines instead of a directive
pub const MAX_LINE_PADDING: u32 = 3;

const INDENT: &str = "    ";

/// Indenting text sink that tracks the source position it represents
#[derive(Debug)]
pub struct SourceWriter {
    text: String,
    indent_level: usize,
    at_line_start: bool,
    cursor_path: Option<Arc<str>>,
    cursor_line: u32,
    cursor_column: u32,
    pending: Option<SourceLoc>,
    mode: LineDirectiveMode,
    dialect: Dialect,
    source_ids: HashMap<Arc<str>, u32>,
    directives_emitted: usize,
}

impl SourceWriter {
    /// Create an empty writer
    pub fn new(dialect: Dialect, mode: LineDirectiveMode) -> Self {
        Self {
            text: String::new(),
            indent_level: 0,
            at_line_start: true,
            cursor_path: None,
            cursor_line: 1,
            cursor_column: 1,
            pending: None,
            mode,
            dialect,
            source_ids: HashMap::new(),
            directives_emitted: 0,
        }
    }

    /// Text written so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the writer
    pub fn finish(self) -> String {
        self.text
    }

    /// Number of `#line` directives written
    pub fn directives_emitted(&self) -> usize {
        self.directives_emitted
    }

    /// Increase indentation for following lines
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    /// Decrease indentation for following lines
    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Request that the next text be attributed to `loc`
    pub fn advance_to(&mut self, loc: Option<&SourceLoc>) {
        if let Some(loc) = loc.filter(|loc| loc.is_valid()) {
            self.pending = Some(loc.clone());
        }
    }

    /// Write text, splitting it into lines for indentation and tracking
    pub fn emit(&mut self, text: &str) {
        let mut rest = text;
        while let Some(pos) = rest.find('\n') {
            let (line, tail) = rest.split_at(pos + 1);
            self.emit_span(line);
            self.cursor_line += 1;
            self.cursor_column = 1;
            self.at_line_start = true;
            rest = tail;
        }
        self.emit_span(rest);
    }

    fn emit_span(&mut self, span: &str) {
        if span.is_empty() {
            return;
        }
        self.flush_location();

        // No indentation on empty lines
        if self.at_line_start && !span.starts_with('\n') {
            self.at_line_start = false;
            for _ in 0..self.indent_level {
                self.text.push_str(INDENT);
                self.cursor_column += INDENT.len() as u32;
            }
        }
        self.text.push_str(span);
        self.cursor_column += span.len() as u32;
    }

    fn flush_location(&mut self) {
        let Some(loc) = self.pending.take() else {
            return;
        };
        if self.mode.is_suppressed() {
            return;
        }

        let same_path = self.cursor_path.as_deref() == Some(&*loc.path);
        if same_path && loc.line == self.cursor_line && loc.column >= self.cursor_column {
            return;
        }

        if same_path && loc.line > self.cursor_line && loc.line - self.cursor_line <= MAX_LINE_PADDING {
            let gap = loc.line - self.cursor_line;
            for _ in 0..gap {
                self.emit("\n");
            }
            return;
        }

        self.write_line_directive(&loc);
        self.cursor_path = Some(loc.path.clone());
        self.cursor_line = loc.line;
        self.cursor_column = 1;
    }

    fn write_line_directive(&mut self, loc: &SourceLoc) {
        self.text.push_str(&format!("\n#line {} ", loc.line));

        let use_source_id = match self.mode {
            LineDirectiveMode::DialectSpecific => self.dialect == Dialect::Glsl,
            _ => false,
        };
        if use_source_id {
            let next = self.source_ids.len() as u32;
            let id = *self.source_ids.entry(loc.path.clone()).or_insert(next);
            self.text.push_str(&id.to_string());
        } else {
            self.text.push('"');
            self.text.push_str(&loc.path.replace('\\', "/"));
            self.text.push('"');
        }
        self.text.push('\n');
        self.directives_emitted += 1;
        tracing::trace!(path = %loc.path, line = loc.line, "line directive");
    }
}

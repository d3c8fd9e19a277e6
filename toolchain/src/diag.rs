// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every atlkit component and
// the stable code table the CLI prints in front of each message.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::path::PathBuf;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0102`, `W0301`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Code table. Grouped by component: `E00xx` configuration and I/O,
/// `E01xx` argument binding, `E02xx` numeric sources, `E03xx`/`W03xx`
/// allocation rewriting, `E04xx` external toolchain, `E05xx` inlining.
pub mod codes {
    use super::DiagCode;

    pub const E0001: DiagCode = DiagCode("E0001"); // no declarations discovered
    pub const E0002: DiagCode = DiagCode("E0002"); // I/O failure

    pub const E0101: DiagCode = DiagCode("E0101"); // function not in registry
    pub const E0102: DiagCode = DiagCode("E0102"); // int argument count mismatch
    pub const E0103: DiagCode = DiagCode("E0103"); // array argument count mismatch
    pub const E0104: DiagCode = DiagCode("E0104"); // missing/non-positive output size
    pub const E0105: DiagCode = DiagCode("E0105"); // token is neither numeral nor @array
    pub const E0106: DiagCode = DiagCode("E0106"); // output parameter rules disagree
    pub const E0107: DiagCode = DiagCode("E0107"); // no array parameter to hold output
    pub const E0108: DiagCode = DiagCode("E0108"); // array source has no elements

    pub const E0201: DiagCode = DiagCode("E0201"); // non-numeric leaf
    pub const E0202: DiagCode = DiagCode("E0202"); // invalid JSON

    pub const E0301: DiagCode = DiagCode("E0301"); // rewriter could not tokenize file
    pub const W0301: DiagCode = DiagCode("W0301"); // unpaired calloc
    pub const W0302: DiagCode = DiagCode("W0302"); // simplified size still nested

    pub const E0401: DiagCode = DiagCode("E0401"); // external compile/run failed

    pub const E0501: DiagCode = DiagCode("E0501"); // definition cannot be inlined
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// File position a diagnostic refers to. `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    pub line: Option<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path.display(), line),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic surfaced to the invoker as one line (plus optional hint).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub location: Option<Location>,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, location, or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            location: None,
            hint: None,
        }
    }

    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>, line: Option<usize>) -> Self {
        self.location = Some(Location {
            path: path.into(),
            line,
        });
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: ", level, code)?;
        } else {
            write!(f, "{}: ", level)?;
        }
        if let Some(loc) = &self.location {
            write!(f, "{}: ", loc)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// 1-based line number of byte offset `pos` in `source`.
pub fn line_of(source: &str, pos: usize) -> usize {
    source.as_bytes()[..pos.min(source.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

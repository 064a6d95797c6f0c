//! Spreadsheet-surface error representation.
//!
//! - **`ErrorKind`**   : the canonical set of error codes
//! - **`EngineError`** : kind plus an optional human explanation
//!
//! Errors are *values*: they travel through operators and functions like any
//! other computed value, and only `IFERROR`/`ISERROR`-style functions trap
//! them. `Display` renders them exactly as the grid shows them (`#DIV/0!`, …).

use std::{error::Error, fmt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::LiteralValue;

/// All recognised error codes.
///
/// Names are CamelCase (idiomatic Rust) while `Display` renders the
/// grid-facing form.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Division by zero.
    Div0,
    /// Lookup produced no match.
    Na,
    /// Unknown identifier or function.
    Name,
    /// Numeric domain or overflow problem.
    Num,
    /// Reference to a deleted entity or an out-of-bounds spill slot.
    Ref,
    /// Wrong type or arity.
    Value,
    /// The cell participates in a dependency cycle.
    Cycle,
    /// Malformed formula.
    Error,
    /// Spill area obstructed.
    Spill,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Div0 => "#DIV/0!",
            Self::Na => "#N/A",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::Ref => "#REF!",
            Self::Value => "#VALUE!",
            Self::Cycle => "#CYCLE!",
            Self::Error => "#ERROR!",
            Self::Spill => "#SPILL!",
        })
    }
}

impl ErrorKind {
    /// Parse a grid-facing error code. Returns `None` for anything that is
    /// not one of the nine recognised codes; callers decide whether that is
    /// a `#NAME?` situation or plain text.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "#DIV/0!" => Some(Self::Div0),
            "#N/A" => Some(Self::Na),
            "#NAME?" => Some(Self::Name),
            "#NUM!" => Some(Self::Num),
            "#REF!" => Some(Self::Ref),
            "#VALUE!" => Some(Self::Value),
            "#CYCLE!" => Some(Self::Cycle),
            "#ERROR!" => Some(Self::Error),
            "#SPILL!" => Some(Self::Spill),
            _ => None,
        }
    }
}

/// The single error struct the engine passes around.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

/* ───────────────────── Constructors & helpers ─────────────────────── */

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl EngineError {
    /// Basic constructor (no message).
    pub fn new(kind: ErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn from_error_string(s: &str) -> Option<Self> {
        ErrorKind::parse(s).map(Self::new)
    }
}

/* ───────────────────────── Display / Error ────────────────────────── */

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl Error for EngineError {}

impl From<EngineError> for LiteralValue {
    fn from(error: EngineError) -> Self {
        LiteralValue::Error(error)
    }
}

impl PartialEq<str> for ErrorKind {
    fn eq(&self, other: &str) -> bool {
        self.to_string() == other
    }
}

impl PartialEq<str> for EngineError {
    fn eq(&self, other: &str) -> bool {
        self.kind.to_string() == other
    }
}

impl PartialEq<&str> for EngineError {
    fn eq(&self, other: &&str) -> bool {
        self.kind.to_string() == *other
    }
}

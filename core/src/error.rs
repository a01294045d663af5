//! Error taxonomy (spec §7). Typed enums at the library boundary
//! (`thiserror`), with `anyhow::Error` reserved for the one genuinely dynamic
//! escape hatch: custom diff/patch hook failures, which are surfaced
//! verbatim per §7's propagation policy.

use crate::path::PathBuf;
use thiserror::Error;

/// Path-resolution failures (§4.1 edge cases).
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("index {index} out of bounds (len {len}) at {path}")]
    OutOfBounds { path: PathBuf, index: usize, len: usize },
    #[error("traversal through nil pointer/interface at {0}")]
    NilTraversal(PathBuf),
    #[error("invalid escape sequence in segment {0:?}")]
    Unescape(String),
    #[error("could not parse {0:?} as a {1} map key")]
    KeyParse(String, &'static str),
    #[error("`-` append token used in a non-terminal position at {0}")]
    DashNotTerminal(PathBuf),
}

/// Schema-compatibility failures (§4.1, §4.2).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown field {field:?} on {type_name}")]
    UnknownField { type_name: &'static str, field: String },
    #[error("expected a {expected} value, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("array index {index} beyond fixed length {len}")]
    ArrayBounds { index: usize, len: usize },
    #[error("cycle detected reconstructing a value")]
    Cycle,
}

/// A single precondition violation collected during `applyChecked` (§4.5,
/// §7 "errors during applyChecked are collected, not thrown").
#[derive(Debug, Error, Clone)]
#[error("{path}: {reason}")]
pub struct PreconditionError {
    pub path: PathBuf,
    pub reason: String,
}

impl PreconditionError {
    pub fn new(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            path,
            reason: reason.into(),
        }
    }
}

/// The aggregate error returned by `applyChecked`: every violation found
/// while walking the patch, not only the first (§7).
#[derive(Debug, Error, Clone, Default)]
pub struct ApplyErrors(pub Vec<PreconditionError>);

impl ApplyErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, err: PreconditionError) {
        self.0.push(err);
    }

    pub fn failures(&self) -> &[PreconditionError] {
        &self.0
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ApplyErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// Top-level error type composing the taxonomy above plus the custom-hook
/// escape hatch.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{0} precondition violation(s)", .0.failures().len())]
    Apply(#[from] ApplyErrors),
    #[error("condition parse error: {0}")]
    Condition(String),
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

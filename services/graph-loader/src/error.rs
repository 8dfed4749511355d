use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Discriminator recorded in the run summary for every failed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    FormatError,
    SchemaError,
    NamingConventionError,
    StoreError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::FormatError => "FormatError",
            ErrorKind::SchemaError => "SchemaError",
            ErrorKind::NamingConventionError => "NamingConventionError",
            ErrorKind::StoreError => "StoreError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-scoped failures. Any of these rolls back the file's transaction and
/// is recorded in the summary; none of them stops the run.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Unsupported extension or unreadable content.
    #[error("{0}")]
    Format(String),

    /// Required identity column absent, or an identity cell blank/unparseable.
    #[error("{0}")]
    Schema(String),

    /// File name does not yield a sector token.
    #[error("{0}")]
    NamingConvention(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Format(_) => ErrorKind::FormatError,
            IngestError::Schema(_) => ErrorKind::SchemaError,
            IngestError::NamingConvention(_) => ErrorKind::NamingConventionError,
            IngestError::Store(_) => ErrorKind::StoreError,
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a model-backed capability (classification, extraction, generation) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCause {
    Quota,
    Auth,
    Timeout,
    Validation,
    Unknown,
}

impl ModelCause {
    /// Map an HTTP status code from a model endpoint to a cause.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::Quota,
            401 | 403 => Self::Auth,
            408 | 504 => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ModelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quota => "quota",
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Why a vector index operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexCause {
    Connection,
    Auth,
    Embedding,
    /// A write or read named a scope other than the document owner.
    Scope,
}

impl fmt::Display for IndexCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Auth => "auth",
            Self::Embedding => "embedding",
            Self::Scope => "scope",
        };
        f.write_str(s)
    }
}

/// Classification of a step-level failure.
///
/// A rejected classification is *not* a failure and has no variant here; it
/// is a normal negative outcome recorded in the verdict slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum FailureKind {
    AccessDenied,
    NotFound,
    DownloadFailure,
    Classification(ModelCause),
    Extraction(ModelCause),
    Generation(ModelCause),
    Index(IndexCause),
    /// One or more fan-out branches failed.
    FanOut { failed: usize, total: usize },
}

impl FailureKind {
    /// Whether a repeat of the same step could reasonably succeed.
    ///
    /// Quota and auth problems do not heal within a run; timeouts, malformed
    /// model output and unclassified transport errors can.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Classification(cause) | Self::Extraction(cause) | Self::Generation(cause) => {
                matches!(
                    cause,
                    ModelCause::Timeout | ModelCause::Validation | ModelCause::Unknown
                )
            }
            Self::DownloadFailure => true,
            Self::Index(IndexCause::Connection) => true,
            Self::AccessDenied | Self::NotFound | Self::Index(_) | Self::FanOut { .. } => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => f.write_str("access denied"),
            Self::NotFound => f.write_str("not found"),
            Self::DownloadFailure => f.write_str("download failure"),
            Self::Classification(c) => write!(f, "classification failure ({})", c),
            Self::Extraction(c) => write!(f, "extraction failure ({})", c),
            Self::Generation(c) => write!(f, "generation failure ({})", c),
            Self::Index(c) => write!(f, "index failure ({})", c),
            Self::FanOut { failed, total } => {
                write!(f, "{} of {} parallel branches failed", failed, total)
            }
        }
    }
}

/// A classified step failure, written into the run state's error slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AccessDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DownloadFailure, message)
    }

    pub fn index(cause: IndexCause, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Index(cause), message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Re-tag a model failure for the capability role that surfaced it.
    ///
    /// The generation client only knows it made a model call; the step that
    /// used it knows whether that call was a classification or an extraction.
    pub fn in_role(self, role: fn(ModelCause) -> FailureKind) -> Self {
        let kind = match self.kind {
            FailureKind::Classification(c)
            | FailureKind::Extraction(c)
            | FailureKind::Generation(c) => role(c),
            other => other,
        };
        Self {
            kind,
            message: self.message,
        }
    }

    /// Combine branch failures into one aggregated failure, in branch order.
    pub fn aggregate(failures: &[(String, Failure)], total: usize) -> Self {
        let message = failures
            .iter()
            .map(|(branch, f)| format!("[{}] {}", branch, f))
            .collect::<Vec<_>>()
            .join("; ");
        Self::new(
            FailureKind::FanOut {
                failed: failures.len(),
                total,
            },
            message,
        )
    }
}

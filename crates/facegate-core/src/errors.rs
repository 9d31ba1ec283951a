use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera device unavailable: {0}")]
    Device(String),

    #[error("camera is already held by an active session")]
    ResourceBusy,

    #[error("no face detected")]
    NoFaceDetected,

    #[error("face detection failed: {0}")]
    Detection(String),

    #[error("{0}")]
    Precondition(String),

    #[error("invalid enrollment input: {0}")]
    Validation(String),

    #[error("failed to store enrollment record {path}: {message}")]
    Storage { path: PathBuf, message: String },
}

/// Stable, serializable discriminant used when errors cross into notifications
/// or JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Device,
    ResourceBusy,
    NoFaceDetected,
    Detection,
    Precondition,
    Validation,
    Storage,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Device(_) => ErrorKind::Device,
            SessionError::ResourceBusy => ErrorKind::ResourceBusy,
            SessionError::NoFaceDetected => ErrorKind::NoFaceDetected,
            SessionError::Detection(_) => ErrorKind::Detection,
            SessionError::Precondition(_) => ErrorKind::Precondition,
            SessionError::Validation(_) => ErrorKind::Validation,
            SessionError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Errors the frame loop absorbs without telling the user.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::NoFaceDetected)
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        SessionError::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

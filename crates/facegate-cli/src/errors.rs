use std::io;
use std::process::ExitCode;

use facegate_config::ConfigError;
use facegate_core::{ErrorKind, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no face engine in this build; rebuild facegate with `--features dlib`")]
    EngineUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub fn exit_status(&self) -> u8 {
        match self {
            AppError::Session(err) => match err.kind() {
                ErrorKind::Validation | ErrorKind::Precondition => 2,
                ErrorKind::Detection | ErrorKind::NoFaceDetected => 3,
                ErrorKind::Device | ErrorKind::ResourceBusy => 4,
                ErrorKind::Storage => 5,
            },
            AppError::Config(_) => 2,
            AppError::InvalidArgument(_) | AppError::EngineUnavailable => 2,
            _ => 1,
        }
    }

    /// Short machine-readable label used in JSON error payloads.
    pub fn kind_label(&self) -> &'static str {
        match self {
            AppError::Session(err) => match err.kind() {
                ErrorKind::Device => "device",
                ErrorKind::ResourceBusy => "resource_busy",
                ErrorKind::NoFaceDetected => "no_face_detected",
                ErrorKind::Detection => "detection",
                ErrorKind::Precondition => "precondition",
                ErrorKind::Validation => "validation",
                ErrorKind::Storage => "storage",
            },
            AppError::Config(_) => "config",
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::EngineUnavailable => "engine_unavailable",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
        }
    }

    pub fn human_message(&self) -> String {
        match self {
            AppError::Session(SessionError::ResourceBusy) => {
                "camera is already in use; stop the running capture first".into()
            }
            other => other.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

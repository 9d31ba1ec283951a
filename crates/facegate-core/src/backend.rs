//! Boundary between the session core and the services it drives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SessionResult;
use crate::frame::{CapturedFrame, EncodedImage, VerificationSample};
use crate::scorer::Threshold;

/// Camera plus detection collaborator. Implementations report "no face in
/// this frame" as [`SessionError::NoFaceDetected`](crate::SessionError).
#[async_trait]
pub trait FaceBackend: Send + Sync {
    async fn check_face_from_image(&self, path: &Path) -> SessionResult<CapturedFrame>;
    async fn open_camera(&self) -> SessionResult<()>;
    async fn stop_camera(&self) -> SessionResult<()>;
    async fn check_face_from_camera(&self) -> SessionResult<CapturedFrame>;
    async fn verify_face(&self, reference: &EncodedImage) -> SessionResult<VerificationSample>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub username: String,
}

impl AccountIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentRecord {
    pub alias: String,
    pub reference_image: EncodedImage,
    pub threshold: Threshold,
    pub account: AccountIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordHandle {
    pub id: String,
    pub path: PathBuf,
}

pub trait EnrollmentStore: Send + Sync {
    fn save_face_registration(&self, record: &EnrollmentRecord) -> SessionResult<RecordHandle>;
}

pub trait IdentityProvider: Send + Sync {
    fn current_username(&self) -> SessionResult<String>;
}

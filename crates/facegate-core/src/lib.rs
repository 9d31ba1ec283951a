//! Face enrollment and live verification sessions.
//!
//! [`SessionController`] drives a [`FaceBackend`] through capture, confirm,
//! verification and save. [`LocalFaceBackend`] is the default backend, built
//! from a V4L2 camera and a [`FaceEngine`].

pub mod backend;
pub mod camera;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod identity;
pub mod local;
pub mod scorer;
pub mod session;
pub mod store;

pub use backend::{
    AccountIdentity, EnrollmentRecord, EnrollmentStore, FaceBackend, IdentityProvider,
    RecordHandle,
};
pub use camera::{CameraConfig, CameraOpener, CameraSource, DeviceLocator, V4lCameraOpener};
pub use engine::{FaceEngine, ModelPaths};
pub use errors::{ErrorKind, SessionError, SessionResult};
pub use frame::{CapturedFrame, EncodedImage, ImageFormat, VerificationSample};
pub use identity::SystemIdentity;
pub use local::LocalFaceBackend;
pub use scorer::{Classification, Confidence, Threshold, Verdict, VerificationScorer};
pub use session::{
    LiveView, LoopReport, Notification, SessionController, SessionMode, SessionSettings,
    SessionStatus,
};
pub use store::{EnvStoreDirResolver, FilesystemEnrollmentStore, StoreDirResolver, StoredEnrollment};

#[cfg(feature = "dlib")]
pub use engine::DlibEngine;

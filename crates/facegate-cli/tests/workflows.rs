use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use facegate_cli::enroll::{enroll_with, EnrollRequest};
use facegate_cli::errors::AppError;
use facegate_cli::interactive::{run_session_with, SessionEvent};
use facegate_cli::verify::{verify_with, VerifyRequest};
use facegate_core::{
    CapturedFrame, EncodedImage, FaceBackend, FilesystemEnrollmentStore, IdentityProvider,
    ImageFormat, SessionController, SessionError, SessionMode, SessionResult, SessionSettings,
    Threshold, VerificationSample,
};
use tempfile::TempDir;

fn frame(tag: u8) -> CapturedFrame {
    CapturedFrame {
        display_image: EncodedImage::new(ImageFormat::Jpeg, vec![tag]),
        raw_image: EncodedImage::new(ImageFormat::Png, vec![tag, tag]),
    }
}

#[derive(Default)]
struct ScriptedBackend {
    image: Mutex<Option<CapturedFrame>>,
    camera: Mutex<VecDeque<CapturedFrame>>,
    scores: Mutex<VecDeque<f64>>,
    stops: AtomicUsize,
}

#[async_trait]
impl FaceBackend for ScriptedBackend {
    async fn check_face_from_image(&self, _path: &Path) -> SessionResult<CapturedFrame> {
        self.image
            .lock()
            .unwrap()
            .clone()
            .ok_or(SessionError::NoFaceDetected)
    }

    async fn open_camera(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn stop_camera(&self) -> SessionResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_face_from_camera(&self) -> SessionResult<CapturedFrame> {
        self.camera
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(SessionError::NoFaceDetected)
    }

    async fn verify_face(&self, _reference: &EncodedImage) -> SessionResult<VerificationSample> {
        let score = self
            .scores
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(SessionError::NoFaceDetected)?;
        Ok(VerificationSample {
            similarity_score: score,
            stream_image: None,
        })
    }
}

struct FixedIdentity;

impl IdentityProvider for FixedIdentity {
    fn current_username(&self) -> SessionResult<String> {
        Ok("alice".into())
    }
}

fn controller(backend: &Arc<ScriptedBackend>, store_dir: &Path) -> SessionController {
    SessionController::new(
        backend.clone(),
        Arc::new(FilesystemEnrollmentStore::new(store_dir)),
        Arc::new(FixedIdentity),
        SessionSettings {
            refresh_interval: Duration::from_millis(10),
            tick_timeout: Duration::from_secs(1),
            ..SessionSettings::default()
        },
    )
}

fn enroll_request(image: Option<PathBuf>, wait: Duration) -> EnrollRequest {
    EnrollRequest {
        image,
        alias: "  desk ".into(),
        threshold: Threshold::new(65).unwrap(),
        user: None,
        wait,
    }
}

#[tokio::test(start_paused = true)]
async fn camera_enrollment_waits_for_a_face_and_saves_it() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    backend.camera.lock().unwrap().push_back(frame(7));
    let mut session = controller(&backend, dir.path());

    let outcome = enroll_with(&mut session, &enroll_request(None, Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(outcome.user, "alice");
    assert_eq!(outcome.alias, "desk");
    assert_eq!(outcome.source, "camera");
    assert!(outcome.path.exists());
    assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
    assert_eq!(session.mode(), SessionMode::Idle);

    let stored = FilesystemEnrollmentStore::new(dir.path())
        .load(&outcome.id)
        .unwrap();
    assert_eq!(stored.reference_image, frame(7).raw_image);
    assert_eq!(stored.threshold.value(), 65);
}

#[tokio::test(start_paused = true)]
async fn camera_enrollment_gives_up_after_wait() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let mut session = controller(&backend, dir.path());

    let err = enroll_with(&mut session, &enroll_request(None, Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert_eq!(err.exit_status(), 3);
    assert_eq!(session.mode(), SessionMode::Idle);
    assert!(!session.is_running());
    assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
}

#[tokio::test(start_paused = true)]
async fn file_enrollment_without_face_is_detection_error() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let mut session = controller(&backend, dir.path());

    let err = enroll_with(
        &mut session,
        &enroll_request(Some("empty.png".into()), Duration::from_secs(1)),
    )
    .await
    .unwrap_err();

    match err {
        AppError::Session(SessionError::Detection(message)) => {
            assert!(message.contains("empty.png"))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn verification_collects_each_new_verdict() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    *backend.image.lock().unwrap() = Some(frame(3));
    backend.scores.lock().unwrap().extend([0.42, 0.91]);
    let mut session = controller(&backend, dir.path());

    let outcome = verify_with(
        &mut session,
        &VerifyRequest {
            reference: "me.png".into(),
            threshold: Threshold::new(80).unwrap(),
            duration: Duration::from_secs(1),
        },
    )
    .await
    .unwrap();

    let confidences: Vec<u8> = outcome.samples.iter().map(|s| s.confidence).collect();
    assert_eq!(confidences, vec![42, 91]);
    assert!(!outcome.samples[0].matched);
    assert!(outcome.samples[1].matched);
    assert!(outcome.matched);
    assert_eq!(outcome.best_confidence, Some(91));
    assert!(outcome.errors.is_empty());
    assert_eq!(session.mode(), SessionMode::Captured);
    assert!(!session.is_running());
}

#[tokio::test(start_paused = true)]
async fn repl_saves_selected_face_with_form_values() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    *backend.image.lock().unwrap() = Some(frame(5));
    let mut session = controller(&backend, dir.path());
    let script = b"threshold 70\nalias front door\n\nselect me.png\nsave\nbogus\nquit\nstatus\n";

    let mut events = Vec::new();
    let summary = run_session_with(&mut session, &script[..], |event| events.push(event.clone()))
        .await
        .unwrap();

    assert_eq!(summary.commands, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.saved.len(), 1);
    assert!(events.contains(&SessionEvent::Mode {
        mode: SessionMode::Captured
    }));
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::Error { kind, .. } if kind == "invalid_argument")));

    let stored = FilesystemEnrollmentStore::new(dir.path())
        .load(&summary.saved[0])
        .unwrap();
    assert_eq!(stored.alias, "front door");
    assert_eq!(stored.account.username, "alice");
    assert_eq!(stored.threshold.value(), 70);
}

#[tokio::test(start_paused = true)]
async fn repl_reports_failed_operations_and_keeps_going() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let mut session = controller(&backend, dir.path());
    let script = b"verify\nthreshold 5\nsave\nstatus\n";

    let mut events = Vec::new();
    let summary = run_session_with(&mut session, &script[..], |event| events.push(event.clone()))
        .await
        .unwrap();

    assert_eq!(summary.commands, 4);
    assert_eq!(summary.failed, 3);
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Error { kind, .. } => Some(kind.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["precondition", "validation", "validation"]);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Status { status, .. }) if status.mode == SessionMode::Idle
    ));
}

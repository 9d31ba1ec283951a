//! Enrollment and live-verification session state machine.
//!
//! The controller owns the camera lease while a frame loop runs. Every
//! transition that gives the camera back first drains the loop, then asks the
//! backend to stop the camera, and clears the local running flag whether or
//! not that request succeeded.

mod frame_loop;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::{
    AccountIdentity, EnrollmentRecord, EnrollmentStore, FaceBackend, IdentityProvider,
    RecordHandle,
};
use crate::errors::{SessionError, SessionResult};
use crate::frame::CapturedFrame;
use crate::scorer::{Threshold, Verdict, VerificationScorer};

use self::frame_loop::{FrameLoop, FrameLoopHandle, LoopMode};
pub use self::frame_loop::{LiveView, LoopReport, Notification};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(33);
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Idle,
    EnrollCapture,
    Captured,
    Verify,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub refresh_interval: Duration,
    pub tick_timeout: Duration,
    pub scorer: VerificationScorer,
    pub threshold: Threshold,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
            scorer: VerificationScorer::default(),
            threshold: Threshold::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub mode: SessionMode,
    pub running: bool,
    pub has_frame: bool,
    pub threshold: Threshold,
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

pub struct SessionController {
    backend: Arc<dyn FaceBackend>,
    store: Arc<dyn EnrollmentStore>,
    identity: Arc<dyn IdentityProvider>,
    settings: SessionSettings,
    mode: SessionMode,
    running: bool,
    captured: Option<CapturedFrame>,
    frame_loop: Option<FrameLoopHandle>,
    last_report: Option<LoopReport>,
    live: Arc<watch::Sender<LiveView>>,
    threshold: watch::Sender<Threshold>,
    notices: mpsc::UnboundedSender<Notification>,
    notice_rx: Option<mpsc::UnboundedReceiver<Notification>>,
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn FaceBackend>,
        store: Arc<dyn EnrollmentStore>,
        identity: Arc<dyn IdentityProvider>,
        settings: SessionSettings,
    ) -> Self {
        let (live, _) = watch::channel(LiveView::default());
        let (threshold, _) = watch::channel(settings.threshold);
        let (notices, notice_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            store,
            identity,
            settings,
            mode: SessionMode::Idle,
            running: false,
            captured: None,
            frame_loop: None,
            last_report: None,
            live: Arc::new(live),
            threshold,
            notices,
            notice_rx: Some(notice_rx),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn captured_frame(&self) -> Option<&CapturedFrame> {
        self.captured.as_ref()
    }

    pub fn threshold(&self) -> Threshold {
        *self.threshold.borrow()
    }

    /// Report of the most recently drained frame loop.
    pub fn last_loop_report(&self) -> Option<LoopReport> {
        self.last_report
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveView> {
        self.live.subscribe()
    }

    /// Hands out the notification stream. Only the first caller receives it.
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notice_rx.take()
    }

    pub fn status(&self) -> SessionStatus {
        let live = self.live.borrow();
        SessionStatus {
            mode: self.mode,
            running: self.running,
            has_frame: self.captured.is_some(),
            threshold: self.threshold(),
            ticks: live.ticks,
            verdict: live.verdict,
        }
    }

    pub fn set_threshold(&mut self, threshold: Threshold) {
        self.threshold.send_replace(threshold);
        debug!(target: "session", threshold = threshold.value(), "threshold updated");
    }

    pub fn prefill_identity(&self) -> SessionResult<AccountIdentity> {
        self.identity.current_username().map(AccountIdentity::new)
    }

    pub async fn select_from_file(&mut self, path: &Path) -> SessionResult<()> {
        if self.running {
            return Err(SessionError::Precondition(
                "stop the camera before selecting an image file".into(),
            ));
        }

        let frame = self
            .backend
            .check_face_from_image(path)
            .await
            .map_err(|err| match err {
                SessionError::NoFaceDetected => {
                    SessionError::Detection(format!("no face detected in {}", path.display()))
                }
                other => other,
            })?;

        self.live.send_modify(|view| {
            view.clear();
            view.frame = Some(frame.clone());
        });
        self.captured = Some(frame);
        self.mode = SessionMode::Captured;
        info!(target: "session", path = %path.display(), "reference selected from file");
        Ok(())
    }

    pub async fn start_camera(&mut self) -> SessionResult<()> {
        if self.running || self.frame_loop.is_some() {
            warn!(target: "session", mode = ?self.mode, "camera start refused while running");
            return Err(SessionError::ResourceBusy);
        }

        self.backend.open_camera().await?;
        self.running = true;
        self.captured = None;
        self.live.send_modify(LiveView::clear);
        self.spawn_loop(LoopMode::Enroll);
        self.mode = SessionMode::EnrollCapture;
        info!(target: "session", "enrollment capture started");
        Ok(())
    }

    /// Stops capture and keeps the latest detected frame, if any.
    pub async fn confirm_capture(&mut self) -> SessionMode {
        let previous = self.mode;
        self.release_camera().await;
        match previous {
            SessionMode::EnrollCapture => {
                self.captured = self.live.borrow().frame.clone();
                self.mode = if self.captured.is_some() {
                    SessionMode::Captured
                } else {
                    SessionMode::Idle
                };
                info!(target: "session", retained = self.captured.is_some(), "capture confirmed");
            }
            SessionMode::Verify => self.leave_verification(),
            SessionMode::Idle | SessionMode::Captured => {}
        }
        self.mode
    }

    pub async fn cancel_capture(&mut self) -> SessionMode {
        self.release_camera().await;
        self.captured = None;
        self.live.send_modify(LiveView::clear);
        self.mode = SessionMode::Idle;
        info!(target: "session", "capture cancelled");
        self.mode
    }

    pub async fn toggle_verification(&mut self) -> SessionResult<SessionMode> {
        if self.mode == SessionMode::Verify {
            self.release_camera().await;
            self.leave_verification();
            return Ok(self.mode);
        }

        let reference = match &self.captured {
            Some(frame) => frame.raw_image.clone(),
            None => {
                return Err(SessionError::Precondition(
                    "capture or select a face before starting verification".into(),
                ))
            }
        };
        if self.running || self.frame_loop.is_some() {
            return Err(SessionError::ResourceBusy);
        }

        self.backend.open_camera().await?;
        self.running = true;
        self.live.send_modify(LiveView::clear_verification);
        self.spawn_loop(LoopMode::Verify { reference });
        self.mode = SessionMode::Verify;
        info!(target: "session", threshold = self.threshold().value(), "verification started");
        Ok(self.mode)
    }

    pub fn save(
        &mut self,
        alias: &str,
        threshold: Threshold,
        account: &AccountIdentity,
    ) -> SessionResult<RecordHandle> {
        let frame = self.captured.as_ref().ok_or_else(|| {
            SessionError::Validation("no captured face; capture or select one first".into())
        })?;
        let username = account.username.trim();
        if username.is_empty() {
            return Err(SessionError::Validation("account user name is required".into()));
        }
        if self.running {
            return Err(SessionError::Precondition(
                "stop the camera before saving".into(),
            ));
        }

        let record = EnrollmentRecord {
            alias: alias.trim().to_string(),
            reference_image: frame.raw_image.clone(),
            threshold,
            account: AccountIdentity::new(username),
        };
        let handle = self.store.save_face_registration(&record)?;
        info!(
            target: "session",
            id = %handle.id,
            user = %record.account.username,
            "enrollment saved"
        );

        self.captured = None;
        self.live.send_modify(LiveView::clear);
        self.mode = SessionMode::Idle;
        Ok(handle)
    }

    pub async fn shutdown(&mut self) {
        self.release_camera().await;
        if matches!(self.mode, SessionMode::EnrollCapture | SessionMode::Verify) {
            self.mode = if self.captured.is_some() {
                SessionMode::Captured
            } else {
                SessionMode::Idle
            };
        }
    }

    fn spawn_loop(&mut self, mode: LoopMode) {
        // Counters are per loop instance.
        self.live.send_modify(|view| {
            view.ticks = 0;
            view.samples = 0;
        });
        let frame_loop = FrameLoop {
            backend: Arc::clone(&self.backend),
            mode,
            scorer: self.settings.scorer,
            threshold: self.threshold.subscribe(),
            live: Arc::clone(&self.live),
            notices: self.notices.clone(),
            refresh_interval: self.settings.refresh_interval,
            tick_timeout: self.settings.tick_timeout,
        };
        self.frame_loop = Some(frame_loop.spawn());
    }

    fn leave_verification(&mut self) {
        self.live.send_modify(LiveView::clear_verification);
        self.mode = if self.captured.is_some() {
            SessionMode::Captured
        } else {
            SessionMode::Idle
        };
        info!(target: "session", "verification stopped");
    }

    async fn release_camera(&mut self) {
        if let Some(handle) = self.frame_loop.take() {
            let report = handle.stop().await;
            debug!(target: "session", ticks = report.ticks, "frame loop drained");
            self.last_report = Some(report);
        }

        if self.running {
            let limit = self.settings.tick_timeout;
            let released = match timeout(limit, self.backend.stop_camera()).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Device(format!(
                    "camera release exceeded {} ms",
                    limit.as_millis()
                ))),
            };
            if let Err(err) = released {
                warn!(
                    target: "session",
                    error = %err,
                    "camera release failed; clearing local state anyway"
                );
                let _ = self.notices.send(Notification::from(&err));
            }
            self.running = false;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(handle) = self.frame_loop.take() {
            handle.signal_stop();
        }
        if self.running {
            warn!(
                target: "session",
                mode = ?self.mode,
                "controller dropped while the camera is held; call shutdown() first"
            );
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::backend::FaceBackend;
use crate::errors::{ErrorKind, SessionError, SessionResult};
use crate::frame::{CapturedFrame, EncodedImage, VerificationSample};
use crate::scorer::{Threshold, Verdict, VerificationScorer};

/// Latest results published by the running loop. Every field is last-value-wins.
#[derive(Debug, Clone, Default)]
pub struct LiveView {
    pub ticks: u64,
    /// Successful detection calls so far, whether they produced a frame or a sample.
    pub samples: u64,
    pub frame: Option<CapturedFrame>,
    pub verdict: Option<Verdict>,
    pub stream_image: Option<EncodedImage>,
}

impl LiveView {
    pub(crate) fn clear(&mut self) {
        self.frame = None;
        self.clear_verification();
    }

    pub(crate) fn clear_verification(&mut self) {
        self.verdict = None;
        self.stream_image = None;
    }
}

/// User-visible message raised from inside the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SessionError> for Notification {
    fn from(err: &SessionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub ticks: u64,
    pub frames: u64,
    pub no_face: u64,
    pub surfaced_errors: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum LoopMode {
    Enroll,
    Verify { reference: EncodedImage },
}

enum TickOutput {
    Frame(CapturedFrame),
    Sample(VerificationSample),
}

pub(crate) struct FrameLoop {
    pub(crate) backend: Arc<dyn FaceBackend>,
    pub(crate) mode: LoopMode,
    pub(crate) scorer: VerificationScorer,
    pub(crate) threshold: watch::Receiver<Threshold>,
    pub(crate) live: Arc<watch::Sender<LiveView>>,
    pub(crate) notices: mpsc::UnboundedSender<Notification>,
    pub(crate) refresh_interval: Duration,
    pub(crate) tick_timeout: Duration,
}

pub(crate) struct FrameLoopHandle {
    should_continue: watch::Sender<bool>,
    task: JoinHandle<LoopReport>,
}

impl FrameLoopHandle {
    pub(crate) fn signal_stop(&self) {
        let _ = self.should_continue.send(false);
    }

    /// Signals the loop and waits for the in-flight call to finish.
    pub(crate) async fn stop(self) -> LoopReport {
        self.signal_stop();
        match self.task.await {
            Ok(report) => report,
            Err(err) => {
                warn!(target: "frame_loop", error = %err, "frame loop task ended abnormally");
                LoopReport::default()
            }
        }
    }
}

impl FrameLoop {
    pub(crate) fn spawn(self) -> FrameLoopHandle {
        let (should_continue, signal) = watch::channel(true);
        let task = tokio::spawn(self.run(signal));
        FrameLoopHandle {
            should_continue,
            task,
        }
    }

    async fn run(self, mut should_continue: watch::Receiver<bool>) -> LoopReport {
        let mut report = LoopReport::default();
        debug!(target: "frame_loop", mode = self.mode_name(), "frame loop started");

        loop {
            if !*should_continue.borrow_and_update() {
                break;
            }

            let outcome = self.tick().await;
            report.ticks += 1;
            self.apply(outcome, &mut report);

            tokio::select! {
                changed = should_continue.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(self.refresh_interval) => {}
            }
        }

        debug!(
            target: "frame_loop",
            ticks = report.ticks,
            frames = report.frames,
            no_face = report.no_face,
            errors = report.surfaced_errors,
            "frame loop stopped"
        );
        report
    }

    fn mode_name(&self) -> &'static str {
        match self.mode {
            LoopMode::Enroll => "enroll",
            LoopMode::Verify { .. } => "verify",
        }
    }

    async fn tick(&self) -> SessionResult<TickOutput> {
        let call = async {
            match &self.mode {
                LoopMode::Enroll => self
                    .backend
                    .check_face_from_camera()
                    .await
                    .map(TickOutput::Frame),
                LoopMode::Verify { reference } => self
                    .backend
                    .verify_face(reference)
                    .await
                    .map(TickOutput::Sample),
            }
        };

        match timeout(self.tick_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Detection(format!(
                "detection call exceeded {} ms",
                self.tick_timeout.as_millis()
            ))),
        }
    }

    fn apply(&self, outcome: SessionResult<TickOutput>, report: &mut LoopReport) {
        let ticks = report.ticks;
        match outcome {
            Ok(TickOutput::Frame(frame)) => {
                report.frames += 1;
                let samples = report.frames;
                self.live.send_modify(|view| {
                    view.ticks = ticks;
                    view.samples = samples;
                    view.frame = Some(frame);
                });
            }
            Ok(TickOutput::Sample(sample)) => {
                report.frames += 1;
                let samples = report.frames;
                let threshold = *self.threshold.borrow();
                let verdict = self.scorer.evaluate(sample.similarity_score, threshold);
                debug!(
                    target: "frame_loop",
                    similarity = sample.similarity_score,
                    confidence = verdict.confidence.value(),
                    threshold = threshold.value(),
                    matched = verdict.is_match(),
                    "verification sample"
                );
                self.live.send_modify(|view| {
                    view.ticks = ticks;
                    view.samples = samples;
                    view.verdict = Some(verdict);
                    if let Some(image) = sample.stream_image {
                        view.stream_image = Some(image);
                    }
                });
            }
            Err(err) if err.is_transient() => {
                report.no_face += 1;
                debug!(target: "frame_loop", tick = ticks, "no face in frame");
                self.live.send_modify(|view| view.ticks = ticks);
            }
            Err(err) => {
                report.surfaced_errors += 1;
                warn!(target: "frame_loop", tick = ticks, error = %err, "detection tick failed");
                let _ = self.notices.send(Notification::from(&err));
                self.live.send_modify(|view| view.ticks = ticks);
            }
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use facegate_core::{Notification, SessionController, Threshold};
use serde::Serialize;
use tokio::time::sleep;
use tracing::info;

use crate::cli::VerifyArgs;
use crate::config;
use crate::errors::AppResult;
use crate::services::{self, next_notice, Services};

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub reference: PathBuf,
    pub threshold: Threshold,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifySample {
    pub sample: u64,
    pub similarity: f64,
    pub confidence: u8,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub reference: String,
    pub threshold: Threshold,
    pub samples: Vec<VerifySample>,
    pub best_confidence: Option<u8>,
    pub matched: bool,
    pub errors: Vec<Notification>,
}

pub fn run_verify(args: &VerifyArgs) -> AppResult<VerifyOutcome> {
    let config = config::load_runtime_config()?;
    let services = Services::build(&config, &args.camera, None, args.threshold)?;
    let request = VerifyRequest {
        reference: args.reference.clone(),
        threshold: services.settings.threshold,
        duration: Duration::from_secs(args.duration.max(1)),
    };

    services::runtime()?.block_on(async {
        let mut controller = services.controller();
        let result = verify_with(&mut controller, &request).await;
        controller.shutdown().await;
        result
    })
}

pub async fn verify_with(
    controller: &mut SessionController,
    request: &VerifyRequest,
) -> AppResult<VerifyOutcome> {
    controller.select_from_file(&request.reference).await?;
    controller.set_threshold(request.threshold);

    let mut notices = controller.take_notifications();
    let mut live = controller.subscribe();
    controller.toggle_verification().await?;

    let mut samples: Vec<VerifySample> = Vec::new();
    let mut errors = Vec::new();
    let mut last_seen = 0;
    let deadline = sleep(request.duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = live.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = live.borrow_and_update();
                if view.samples > last_seen {
                    if let Some(verdict) = view.verdict {
                        last_seen = view.samples;
                        info!(
                            target: "verify",
                            confidence = verdict.confidence.value(),
                            matched = verdict.is_match(),
                            "sample"
                        );
                        samples.push(VerifySample {
                            sample: view.samples,
                            similarity: verdict.similarity,
                            confidence: verdict.confidence.value(),
                            matched: verdict.is_match(),
                        });
                    }
                }
            }
            Some(notice) = next_notice(&mut notices) => errors.push(notice),
        }
    }

    controller.toggle_verification().await?;

    let best_confidence = samples.iter().map(|sample| sample.confidence).max();
    let matched = samples.iter().any(|sample| sample.matched);
    Ok(VerifyOutcome {
        reference: request.reference.display().to_string(),
        threshold: request.threshold,
        samples,
        best_confidence,
        matched,
        errors,
    })
}

use std::error::Error;
use std::io::{self, Write};

use facegate_core::SessionMode;
use serde::Serialize;
use serde_json::json;

use crate::cli::OutputMode;
use crate::enroll::EnrollOutcome;
use crate::errors::{AppError, AppResult};
use crate::faces::{FacesListOutcome, FacesRemoveOutcome};
use crate::interactive::{SessionEvent, SessionSummary};
use crate::verify::VerifyOutcome;

fn write_json_line<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(value)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

pub fn render_enroll(outcome: &EnrollOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    tracing::info!("{line}");
                }
            }
            println!(
                "Enrollment saved for user {}: {}",
                outcome.user,
                outcome.path.display()
            );
            if !outcome.alias.is_empty() {
                println!("Alias: {}", outcome.alias);
            }
            println!("Threshold: {}", outcome.threshold);
        }
        OutputMode::Json => write_json_line(outcome)?,
    }
    Ok(())
}

pub fn render_verify(outcome: &VerifyOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for sample in &outcome.samples {
                    println!(
                        "sample {}: confidence {} ({})",
                        sample.sample,
                        sample.confidence,
                        if sample.matched { "match" } else { "mismatch" }
                    );
                }
            }
            for notice in &outcome.errors {
                eprintln!("warning: {}", notice.message);
            }
            match outcome.best_confidence {
                Some(best) => println!(
                    "{}: best confidence {best} against threshold {} over {} sample(s)",
                    if outcome.matched { "Match" } else { "No match" },
                    outcome.threshold,
                    outcome.samples.len()
                ),
                None => println!("No face was compared against {}", outcome.reference),
            }
        }
        OutputMode::Json => write_json_line(outcome)?,
    }
    Ok(())
}

pub fn render_session_event(event: &SessionEvent, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => match event {
            SessionEvent::Mode { mode } => println!("mode: {}", mode_label(*mode)),
            SessionEvent::Status {
                status,
                alias,
                user,
            } => {
                println!(
                    "mode: {} | camera: {} | face: {} | threshold: {} | ticks: {}",
                    mode_label(status.mode),
                    if status.running { "on" } else { "off" },
                    if status.has_frame { "yes" } else { "no" },
                    status.threshold,
                    status.ticks
                );
                println!(
                    "alias: '{alias}' | user: {}",
                    user.as_deref().unwrap_or("<unset>")
                );
            }
            SessionEvent::FaceDetected => println!("face detected; type 'confirm' to keep it"),
            SessionEvent::Verdict {
                confidence,
                threshold,
                matched,
            } => println!(
                "{} (confidence {confidence}, threshold {threshold})",
                if *matched { "MATCH" } else { "MISMATCH" }
            ),
            SessionEvent::Saved { id, path } => println!("saved {id} to {path}"),
            SessionEvent::Notice { message, .. } => eprintln!("warning: {message}"),
            SessionEvent::Error { message, .. } => eprintln!("error: {message}"),
            SessionEvent::Info { message } => println!("{message}"),
        },
        OutputMode::Json => write_json_line(event)?,
    }
    Ok(())
}

pub fn render_session_summary(summary: &SessionSummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Session ended: {} command(s), {} failed, {} record(s) saved",
                summary.commands,
                summary.failed,
                summary.saved.len()
            );
        }
        OutputMode::Json => write_json_line(&json!({ "event": "summary", "summary": summary }))?,
    }
    Ok(())
}

pub fn render_faces_list(outcome: &FacesListOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if outcome.records.is_empty() {
                println!("No enrollments in {}", outcome.store_dir.display());
            }
            for record in &outcome.records {
                let alias = if record.alias.is_empty() {
                    "-"
                } else {
                    record.alias.as_str()
                };
                println!(
                    "{}  {}  {}  threshold {}  {}",
                    record.id, record.user, alias, record.threshold, record.created_at
                );
            }
        }
        OutputMode::Json => write_json_line(outcome)?,
    }
    Ok(())
}

pub fn render_faces_remove(outcome: &FacesRemoveOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Removed enrollment {} ({})",
                outcome.id,
                outcome.removed.display()
            );
        }
        OutputMode::Json => write_json_line(outcome)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "kind": err.kind_label(),
                "error": err.human_message(),
            });
            println!("{payload}");
        }
    }
}

fn mode_label(mode: SessionMode) -> &'static str {
    match mode {
        SessionMode::Idle => "idle",
        SessionMode::EnrollCapture => "capturing",
        SessionMode::Captured => "captured",
        SessionMode::Verify => "verifying",
    }
}

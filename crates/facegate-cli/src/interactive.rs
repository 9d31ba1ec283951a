//! Line-driven session REPL.
//!
//! Each input line maps to one controller operation. Live results from the
//! frame loop and surfaced loop errors are interleaved with command replies as
//! [`SessionEvent`]s, so the same loop serves terminal and JSON output.

use std::path::PathBuf;

use facegate_core::{
    AccountIdentity, ErrorKind, SessionController, SessionMode, SessionStatus, Threshold,
};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::cli::{OutputMode, SessionArgs};
use crate::config;
use crate::errors::{AppError, AppResult};
use crate::output::render_session_event;
use crate::services::{self, next_notice, Services};

pub const HELP: &str = "commands: select <path> | start | confirm | cancel | verify | \
threshold <20-100> | alias [text] | user <name> | save | status | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Select(PathBuf),
    Start,
    Confirm,
    Cancel,
    Verify,
    Threshold(u8),
    Alias(String),
    User(String),
    Save,
    Status,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "select" | "open" => {
            if rest.is_empty() {
                return Err("select needs an image path".into());
            }
            ReplCommand::Select(PathBuf::from(rest))
        }
        "start" => ReplCommand::Start,
        "confirm" => ReplCommand::Confirm,
        "cancel" => ReplCommand::Cancel,
        "verify" => ReplCommand::Verify,
        "threshold" => {
            let value = rest
                .parse::<u8>()
                .map_err(|_| format!("threshold must be a whole number, got '{rest}'"))?;
            ReplCommand::Threshold(value)
        }
        "alias" => ReplCommand::Alias(rest.to_string()),
        "user" => {
            if rest.is_empty() {
                return Err("user needs an account name".into());
            }
            ReplCommand::User(rest.to_string())
        }
        "save" => ReplCommand::Save,
        "status" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => return Err(format!("unknown command '{other}'; try 'help'")),
    };
    Ok(Some(command))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Mode {
        mode: SessionMode,
    },
    Status {
        status: SessionStatus,
        alias: String,
        user: Option<String>,
    },
    FaceDetected,
    Verdict {
        confidence: u8,
        threshold: u8,
        matched: bool,
    },
    Saved {
        id: String,
        path: String,
    },
    Notice {
        kind: ErrorKind,
        message: String,
    },
    Error {
        kind: String,
        message: String,
    },
    Info {
        message: String,
    },
}

impl From<&AppError> for SessionEvent {
    fn from(err: &AppError) -> Self {
        SessionEvent::Error {
            kind: err.kind_label().to_string(),
            message: err.human_message(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub commands: usize,
    pub failed: usize,
    pub saved: Vec<String>,
}

#[derive(Debug, Default)]
struct FormState {
    alias: String,
    user: Option<String>,
}

#[derive(Debug, Default)]
struct LiveMarks {
    face_announced: bool,
    last_verdict: Option<(u8, bool)>,
}

pub fn run_session(args: &SessionArgs, mode: OutputMode) -> AppResult<SessionSummary> {
    let config = config::load_runtime_config()?;
    let services = Services::build(&config, &args.camera, args.store_dir.clone(), None)?;

    services::runtime()?.block_on(async {
        let mut controller = services.controller();
        let input = BufReader::new(tokio::io::stdin());
        let result = run_session_with(&mut controller, input, |event| {
            if let Err(err) = render_session_event(event, mode) {
                warn!(target: "session", error = %err, "failed to render session event");
            }
        })
        .await;
        controller.shutdown().await;
        result
    })
}

pub async fn run_session_with<R, F>(
    controller: &mut SessionController,
    input: R,
    mut emit: F,
) -> AppResult<SessionSummary>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&SessionEvent),
{
    let mut lines = input.lines();
    let mut notices = controller.take_notifications();
    let mut live = controller.subscribe();
    let mut form = FormState {
        user: controller.prefill_identity().ok().map(|account| account.username),
        ..FormState::default()
    };
    let mut marks = LiveMarks::default();
    let mut summary = SessionSummary::default();

    emit(&SessionEvent::Info {
        message: HELP.to_string(),
    });

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(message) => {
                        summary.failed += 1;
                        emit(&SessionEvent::Error { kind: "invalid_argument".into(), message });
                        continue;
                    }
                };
                if command == ReplCommand::Quit {
                    break;
                }
                summary.commands += 1;
                if matches!(command, ReplCommand::Start | ReplCommand::Verify) {
                    marks = LiveMarks::default();
                }
                debug!(target: "session", ?command, "repl command");
                match execute(controller, &mut form, command).await {
                    Ok(event) => {
                        if let SessionEvent::Saved { id, .. } = &event {
                            summary.saved.push(id.clone());
                        }
                        emit(&event);
                    }
                    Err(err) => {
                        summary.failed += 1;
                        emit(&SessionEvent::from(&err));
                    }
                }
            }
            Some(notice) = next_notice(&mut notices) => {
                emit(&SessionEvent::Notice { kind: notice.kind, message: notice.message });
            }
            changed = live.changed() => {
                if changed.is_err() {
                    break;
                }
                let (has_frame, verdict) = {
                    let view = live.borrow_and_update();
                    (view.frame.is_some(), view.verdict)
                };
                match controller.mode() {
                    SessionMode::EnrollCapture if has_frame && !marks.face_announced => {
                        marks.face_announced = true;
                        emit(&SessionEvent::FaceDetected);
                    }
                    SessionMode::Verify => {
                        if let Some(verdict) = verdict {
                            let key = (verdict.confidence.value(), verdict.is_match());
                            if marks.last_verdict != Some(key) {
                                marks.last_verdict = Some(key);
                                emit(&SessionEvent::Verdict {
                                    confidence: key.0,
                                    threshold: verdict.threshold.value(),
                                    matched: key.1,
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(summary)
}

async fn execute(
    controller: &mut SessionController,
    form: &mut FormState,
    command: ReplCommand,
) -> AppResult<SessionEvent> {
    let event = match command {
        ReplCommand::Select(path) => {
            controller.select_from_file(&path).await?;
            mode_event(controller)
        }
        ReplCommand::Start => {
            controller.start_camera().await?;
            mode_event(controller)
        }
        ReplCommand::Confirm => SessionEvent::Mode {
            mode: controller.confirm_capture().await,
        },
        ReplCommand::Cancel => SessionEvent::Mode {
            mode: controller.cancel_capture().await,
        },
        ReplCommand::Verify => SessionEvent::Mode {
            mode: controller.toggle_verification().await?,
        },
        ReplCommand::Threshold(value) => {
            let threshold = Threshold::new(value)?;
            controller.set_threshold(threshold);
            SessionEvent::Info {
                message: format!("threshold set to {threshold}"),
            }
        }
        ReplCommand::Alias(alias) => {
            form.alias = alias;
            SessionEvent::Info {
                message: format!("alias set to '{}'", form.alias),
            }
        }
        ReplCommand::User(user) => {
            form.user = Some(user);
            SessionEvent::Info {
                message: format!("user set to {}", form.user.as_deref().unwrap_or_default()),
            }
        }
        ReplCommand::Save => {
            let account = AccountIdentity::new(form.user.clone().unwrap_or_default());
            let threshold = controller.threshold();
            let handle = controller.save(&form.alias, threshold, &account)?;
            SessionEvent::Saved {
                id: handle.id,
                path: handle.path.display().to_string(),
            }
        }
        ReplCommand::Status => SessionEvent::Status {
            status: controller.status(),
            alias: form.alias.clone(),
            user: form.user.clone(),
        },
        ReplCommand::Help => SessionEvent::Info {
            message: HELP.to_string(),
        },
        ReplCommand::Quit => SessionEvent::Info {
            message: "bye".into(),
        },
    };
    Ok(event)
}

fn mode_event(controller: &SessionController) -> SessionEvent {
    SessionEvent::Mode {
        mode: controller.mode(),
    }
}

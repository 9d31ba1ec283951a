use std::path::PathBuf;
use std::time::Duration;

use facegate_core::{AccountIdentity, SessionController, SessionError, SessionMode, Threshold};
use serde::Serialize;
use tokio::time::timeout;
use tracing::info;

use crate::cli::EnrollArgs;
use crate::config;
use crate::errors::AppResult;
use crate::services::{self, Services};

#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub image: Option<PathBuf>,
    pub alias: String,
    pub threshold: Threshold,
    pub user: Option<String>,
    pub wait: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub id: String,
    pub path: PathBuf,
    pub user: String,
    pub alias: String,
    pub threshold: Threshold,
    pub source: String,
    #[serde(skip)]
    pub logs: Vec<String>,
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<EnrollOutcome> {
    let config = config::load_runtime_config()?;
    let services = Services::build(&config, &args.camera, args.store_dir.clone(), args.threshold)?;
    let request = EnrollRequest {
        image: args.image.clone(),
        alias: args.alias.clone(),
        threshold: services.settings.threshold,
        user: args.user.clone(),
        wait: Duration::from_secs(args.wait.max(1)),
    };

    services::runtime()?.block_on(async {
        let mut controller = services.controller();
        let result = enroll_with(&mut controller, &request).await;
        controller.shutdown().await;
        result
    })
}

pub async fn enroll_with(
    controller: &mut SessionController,
    request: &EnrollRequest,
) -> AppResult<EnrollOutcome> {
    let mut logs = Vec::new();

    let source = match &request.image {
        Some(path) => {
            controller.select_from_file(path).await?;
            logs.push(format!("Selected face from {}", path.display()));
            path.display().to_string()
        }
        None => {
            capture_from_camera(controller, request.wait, &mut logs).await?;
            "camera".to_string()
        }
    };

    let account = match &request.user {
        Some(user) => AccountIdentity::new(user.clone()),
        None => {
            let account = controller.prefill_identity()?;
            logs.push(format!("Linking current user {}", account.username));
            account
        }
    };

    let handle = controller.save(&request.alias, request.threshold, &account)?;
    logs.push(format!(
        "Saved enrollment {} to {}",
        handle.id,
        handle.path.display()
    ));
    info!(target: "enroll", id = %handle.id, "enrollment complete");

    Ok(EnrollOutcome {
        id: handle.id,
        path: handle.path,
        user: account.username.trim().to_string(),
        alias: request.alias.trim().to_string(),
        threshold: request.threshold,
        source,
        logs,
    })
}

async fn capture_from_camera(
    controller: &mut SessionController,
    wait: Duration,
    logs: &mut Vec<String>,
) -> AppResult<()> {
    let mut live = controller.subscribe();
    controller.start_camera().await?;
    logs.push("Camera started; waiting for a face".into());

    let found = matches!(
        timeout(wait, live.wait_for(|view| view.frame.is_some())).await,
        Ok(Ok(_))
    );
    if !found {
        controller.cancel_capture().await;
        return Err(SessionError::Detection(format!(
            "no face captured within {} s",
            wait.as_secs()
        ))
        .into());
    }

    if controller.confirm_capture().await != SessionMode::Captured {
        return Err(SessionError::Detection("captured frame was lost before confirm".into()).into());
    }
    logs.push("Face captured and camera released".into());
    Ok(())
}

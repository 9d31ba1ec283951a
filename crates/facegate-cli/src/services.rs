use std::path::PathBuf;
use std::sync::Arc;

use facegate_config::ResolvedConfig;
use facegate_core::{
    FaceBackend, FaceEngine, FilesystemEnrollmentStore, LocalFaceBackend, Notification,
    SessionController, SessionSettings, SystemIdentity, V4lCameraOpener,
};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cli::CameraArgs;
use crate::config;
use crate::errors::AppResult;

/// Concrete collaborators for one command invocation.
pub struct Services {
    pub backend: Arc<dyn FaceBackend>,
    pub store: Arc<FilesystemEnrollmentStore>,
    pub settings: SessionSettings,
}

impl Services {
    pub fn build(
        config: &ResolvedConfig,
        camera: &CameraArgs,
        store_dir: Option<PathBuf>,
        threshold: Option<u8>,
    ) -> AppResult<Self> {
        let opener = Arc::new(V4lCameraOpener::new(config::camera_config(config, camera)));
        let engine = build_engine(config)?;
        let backend = LocalFaceBackend::new(opener, engine, config.display_max_dimension);
        let store = FilesystemEnrollmentStore::new(config::store_dir(config, store_dir.as_deref()));
        Ok(Self {
            backend: Arc::new(backend),
            store: Arc::new(store),
            settings: config::session_settings(config, threshold)?,
        })
    }

    pub fn controller(&self) -> SessionController {
        SessionController::new(
            Arc::clone(&self.backend),
            self.store.clone(),
            Arc::new(SystemIdentity),
            self.settings,
        )
    }
}

#[cfg(feature = "dlib")]
fn build_engine(config: &ResolvedConfig) -> AppResult<Arc<dyn FaceEngine>> {
    let paths = facegate_core::ModelPaths {
        landmark: config.landmark_model.clone(),
        encoder: config.encoder_model.clone(),
    }
    .resolve()?;
    Ok(Arc::new(facegate_core::DlibEngine::new(&paths, config.jitters)?))
}

#[cfg(not(feature = "dlib"))]
fn build_engine(_config: &ResolvedConfig) -> AppResult<Arc<dyn FaceEngine>> {
    Err(crate::errors::AppError::EngineUnavailable)
}

/// Single-threaded runtime; detection work still goes to the blocking pool.
pub fn runtime() -> AppResult<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Next surfaced loop error. Pends forever once the stream was handed out elsewhere.
pub async fn next_notice(
    notices: &mut Option<UnboundedReceiver<Notification>>,
) -> Option<Notification> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    #[cfg(not(feature = "dlib"))]
    #[test]
    fn commands_needing_detection_are_refused_without_an_engine() {
        let config = ResolvedConfig::default();
        let result = Services::build(&config, &CameraArgs::default(), None, None);
        assert!(matches!(result, Err(AppError::EngineUnavailable)));
    }

    #[tokio::test]
    async fn next_notice_pends_without_a_receiver() {
        let mut notices = None;
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            next_notice(&mut notices),
        )
        .await;
        assert!(waited.is_err());
    }
}

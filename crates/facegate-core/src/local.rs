use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use async_trait::async_trait;
use image::RgbImage;
use tokio::task;
use tracing::debug;

use crate::backend::FaceBackend;
use crate::camera::{CameraOpener, CameraSource};
use crate::engine::{cosine_similarity, FaceEngine};
use crate::errors::{SessionError, SessionResult};
use crate::frame::{
    annotate, downscale, encode_jpeg, encode_png, CapturedFrame, EncodedImage, VerificationSample,
};

type CameraGuard<'a> = MutexGuard<'a, Option<Box<dyn CameraSource>>>;

/// The open camera plus a release request left by `stop_camera` when a frame
/// read was still holding it.
#[derive(Default)]
struct CameraSlot {
    source: Mutex<Option<Box<dyn CameraSource>>>,
    release_pending: AtomicBool,
}

impl CameraSlot {
    /// `Ok(None)` while another call holds the camera. Never waits.
    fn try_acquire(&self) -> SessionResult<Option<CameraGuard<'_>>> {
        match self.source.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => {
                Err(SessionError::Device("camera state poisoned".into()))
            }
        }
    }

    /// Runs `work` with the camera, or fails fast if a stuck read still holds it.
    fn with_camera<T>(
        &self,
        work: impl FnOnce(&mut Option<Box<dyn CameraSource>>) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let mut guard = self.try_acquire()?.ok_or_else(|| {
            SessionError::Detection("camera is still busy with an earlier frame".into())
        })?;
        let result = work(&mut *guard);
        self.finish_pending_release(&mut guard);
        result
    }

    fn finish_pending_release(&self, guard: &mut CameraGuard<'_>) {
        if self.release_pending.swap(false, Ordering::SeqCst) && guard.take().is_some() {
            debug!(target: "camera", "deferred camera release completed");
        }
    }
}

/// [`FaceBackend`] backed by a local camera and an in-process face engine.
///
/// Engine and camera work runs on the blocking pool. A read holds the camera
/// for the whole grab-and-detect step; calls arriving while a timed-out read
/// is still stuck fail fast instead of queueing behind it, and a release
/// requested meanwhile is applied as soon as that read returns.
pub struct LocalFaceBackend {
    opener: Arc<dyn CameraOpener>,
    engine: Arc<dyn FaceEngine>,
    camera: Arc<CameraSlot>,
    max_dimension: u32,
}

impl LocalFaceBackend {
    pub fn new(
        opener: Arc<dyn CameraOpener>,
        engine: Arc<dyn FaceEngine>,
        max_dimension: u32,
    ) -> Self {
        Self {
            opener,
            engine,
            camera: Arc::new(CameraSlot::default()),
            max_dimension,
        }
    }

    /// A camera held by an in-flight read counts as open.
    pub fn is_camera_open(&self) -> bool {
        match self.camera.try_acquire() {
            Ok(Some(guard)) => guard.is_some(),
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

async fn blocking<T, F>(work: F) -> SessionResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> SessionResult<T> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| SessionError::Detection(format!("detection worker failed: {err}")))?
}

fn grab(camera: &mut Option<Box<dyn CameraSource>>) -> SessionResult<RgbImage> {
    let camera = camera
        .as_mut()
        .ok_or_else(|| SessionError::Device("camera is not open; start it first".into()))?;
    let frame = camera.grab()?;
    if frame.width() == 0 || frame.height() == 0 {
        return Err(SessionError::Detection("camera returned an empty frame".into()));
    }
    Ok(frame)
}

fn format_capture(
    engine: &dyn FaceEngine,
    image: &RgbImage,
    max_dimension: u32,
) -> SessionResult<CapturedFrame> {
    let scaled = downscale(image, max_dimension);
    let faces = engine.detect(&scaled)?;
    let face = faces.first().ok_or(SessionError::NoFaceDetected)?;

    let mut display = scaled.clone();
    annotate(&mut display, face);
    Ok(CapturedFrame {
        display_image: encode_jpeg(&display)?,
        raw_image: encode_png(&scaled)?,
    })
}

fn first_embedding(engine: &dyn FaceEngine, image: &RgbImage) -> SessionResult<Option<Vec<f64>>> {
    let faces = engine.detect(image)?;
    match faces.first() {
        Some(face) => engine.embed(image, face).map(Some),
        None => Ok(None),
    }
}

fn read_image(path: &Path) -> SessionResult<RgbImage> {
    let bytes = std::fs::read(path).map_err(|err| {
        SessionError::Detection(format!("failed to read image {}: {err}", path.display()))
    })?;
    image::load_from_memory(&bytes)
        .map(|img| img.to_rgb8())
        .map_err(|err| {
            SessionError::Detection(format!("failed to decode image {}: {err}", path.display()))
        })
}

#[async_trait]
impl FaceBackend for LocalFaceBackend {
    async fn check_face_from_image(&self, path: &Path) -> SessionResult<CapturedFrame> {
        let path: PathBuf = path.to_path_buf();
        let engine = Arc::clone(&self.engine);
        let max_dimension = self.max_dimension;
        blocking(move || {
            let image = read_image(&path)?;
            debug!(target: "camera", path = %path.display(), width = image.width(), height = image.height(), "loaded still image");
            format_capture(engine.as_ref(), &image, max_dimension)
        })
        .await
    }

    async fn open_camera(&self) -> SessionResult<()> {
        let opener = Arc::clone(&self.opener);
        let slot = Arc::clone(&self.camera);
        blocking(move || {
            let mut guard = slot.try_acquire()?.ok_or(SessionError::ResourceBusy)?;
            slot.finish_pending_release(&mut guard);
            if guard.is_some() {
                return Err(SessionError::ResourceBusy);
            }
            let mut camera = opener.open()?;
            // One read brings the sensor out of standby before the loop starts.
            camera.grab()?;
            *guard = Some(camera);
            debug!(target: "camera", "camera opened");
            Ok(())
        })
        .await
    }

    async fn stop_camera(&self) -> SessionResult<()> {
        let slot = Arc::clone(&self.camera);
        blocking(move || {
            if let Some(mut guard) = slot.try_acquire()? {
                slot.release_pending.store(false, Ordering::SeqCst);
                if guard.take().is_some() {
                    debug!(target: "camera", "camera released");
                }
                return Ok(());
            }
            slot.release_pending.store(true, Ordering::SeqCst);
            // The read may have finished between the two checks.
            if let Some(mut guard) = slot.try_acquire()? {
                slot.finish_pending_release(&mut guard);
                return Ok(());
            }
            Err(SessionError::Device(
                "camera is blocked in a frame read; it will be released when the read returns"
                    .into(),
            ))
        })
        .await
    }

    async fn check_face_from_camera(&self) -> SessionResult<CapturedFrame> {
        let slot = Arc::clone(&self.camera);
        let engine = Arc::clone(&self.engine);
        let max_dimension = self.max_dimension;
        blocking(move || {
            slot.with_camera(|camera| {
                let frame = grab(camera)?;
                format_capture(engine.as_ref(), &frame, max_dimension)
            })
        })
        .await
    }

    async fn verify_face(&self, reference: &EncodedImage) -> SessionResult<VerificationSample> {
        let slot = Arc::clone(&self.camera);
        let engine = Arc::clone(&self.engine);
        let reference = reference.clone();
        let max_dimension = self.max_dimension;
        blocking(move || {
            let reference = reference.decode()?;
            let reference_embedding = first_embedding(engine.as_ref(), &reference)?
                .ok_or_else(|| SessionError::Detection("reference image contains no face".into()))?;

            let (frame, live_embedding) = slot.with_camera(|camera| {
                let frame = downscale(&grab(camera)?, max_dimension);
                let embedding = first_embedding(engine.as_ref(), &frame)?;
                Ok((frame, embedding))
            })?;
            let live_embedding = live_embedding.ok_or(SessionError::NoFaceDetected)?;

            if live_embedding.len() != reference_embedding.len() {
                return Err(SessionError::Detection(format!(
                    "embedding length mismatch: reference {} vs live {}",
                    reference_embedding.len(),
                    live_embedding.len()
                )));
            }

            Ok(VerificationSample {
                similarity_score: cosine_similarity(&reference_embedding, &live_embedding),
                stream_image: Some(encode_jpeg(&frame)?),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{channel, Receiver};
    use std::time::{Duration, Instant};

    use image::Rgb;
    use tempfile::TempDir;

    use crate::engine::{BoundingBox, DetectedFace};

    /// Bright pixels in the top-left corner stand in for a face.
    struct BrightnessEngine;

    impl FaceEngine for BrightnessEngine {
        fn detect(&self, image: &RgbImage) -> SessionResult<Vec<DetectedFace>> {
            if image.get_pixel(0, 0)[0] > 100 {
                Ok(vec![DetectedFace {
                    bounding_box: BoundingBox {
                        left: 0,
                        top: 0,
                        right: 3,
                        bottom: 3,
                    },
                    landmarks: vec![(1, 1)],
                }])
            } else {
                Ok(Vec::new())
            }
        }

        fn embed(&self, image: &RgbImage, _face: &DetectedFace) -> SessionResult<Vec<f64>> {
            let px = image.get_pixel(0, 0);
            Ok(vec![f64::from(px[0]), f64::from(px[1]), f64::from(px[2])])
        }
    }

    struct StaticCamera {
        color: Rgb<u8>,
    }

    impl CameraSource for StaticCamera {
        fn grab(&mut self) -> SessionResult<RgbImage> {
            Ok(RgbImage::from_pixel(8, 8, self.color))
        }
    }

    struct CountingOpener {
        color: Rgb<u8>,
        opens: AtomicUsize,
    }

    impl CameraOpener for CountingOpener {
        fn open(&self) -> SessionResult<Box<dyn CameraSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StaticCamera { color: self.color }))
        }
    }

    /// Blocks on its second read until the test sends on the paired channel.
    struct HangingCamera {
        grabs: usize,
        hang: Option<Receiver<()>>,
    }

    impl CameraSource for HangingCamera {
        fn grab(&mut self) -> SessionResult<RgbImage> {
            self.grabs += 1;
            if self.grabs > 1 {
                if let Some(hang) = self.hang.take() {
                    let _ = hang.recv();
                }
            }
            Ok(RgbImage::from_pixel(8, 8, Rgb([200, 200, 200])))
        }
    }

    struct HangingOpener {
        hang: Mutex<Option<Receiver<()>>>,
        opens: AtomicUsize,
    }

    impl CameraOpener for HangingOpener {
        fn open(&self) -> SessionResult<Box<dyn CameraSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HangingCamera {
                grabs: 0,
                hang: self.hang.lock().unwrap().take(),
            }))
        }
    }

    async fn wait_until_closed(backend: &LocalFaceBackend) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while backend.is_camera_open() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn backend(color: Rgb<u8>) -> (LocalFaceBackend, Arc<CountingOpener>) {
        let opener = Arc::new(CountingOpener {
            color,
            opens: AtomicUsize::new(0),
        });
        let backend = LocalFaceBackend::new(opener.clone(), Arc::new(BrightnessEngine), 1270);
        (backend, opener)
    }

    #[tokio::test]
    async fn second_open_reports_busy_without_reopening() {
        let (backend, opener) = backend(Rgb([200, 200, 200]));
        backend.open_camera().await.unwrap();
        let err = backend.open_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::ResourceBusy));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        backend.stop_camera().await.unwrap();
        backend.stop_camera().await.unwrap();
        assert!(!backend.is_camera_open());
    }

    #[tokio::test]
    async fn camera_frames_require_an_open_camera() {
        let (backend, _) = backend(Rgb([200, 200, 200]));
        let err = backend.check_face_from_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::Device(_)));
    }

    #[tokio::test]
    async fn camera_frame_without_face_is_transient() {
        let (backend, _) = backend(Rgb([10, 10, 10]));
        backend.open_camera().await.unwrap();
        let err = backend.check_face_from_camera().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn still_image_produces_annotated_and_raw_frames() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("face.png");
        RgbImage::from_pixel(8, 8, Rgb([220, 30, 30])).save(&path).unwrap();

        let (backend, _) = backend(Rgb([0, 0, 0]));
        let frame = backend.check_face_from_image(&path).await.unwrap();
        let raw = frame.raw_image.decode().unwrap();
        assert_eq!(*raw.get_pixel(5, 5), Rgb([220, 30, 30]));
        assert!(!frame.display_image.is_empty());
    }

    #[tokio::test]
    async fn unreadable_still_image_is_a_detection_error() {
        let (backend, _) = backend(Rgb([0, 0, 0]));
        let err = backend
            .check_face_from_image(Path::new("/nonexistent/face.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Detection(_)));
    }

    #[tokio::test]
    async fn verify_reports_cosine_similarity_against_reference() {
        let (backend, _) = backend(Rgb([200, 200, 200]));
        backend.open_camera().await.unwrap();
        let reference = encode_png(&RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]))).unwrap();

        let sample = backend.verify_face(&reference).await.unwrap();
        assert!((sample.similarity_score - 1.0).abs() < 1e-9);
        assert!(sample.stream_image.is_some());
    }

    #[tokio::test]
    async fn verify_rejects_reference_without_face() {
        let (backend, _) = backend(Rgb([200, 200, 200]));
        backend.open_camera().await.unwrap();
        let reference = encode_png(&RgbImage::from_pixel(8, 8, Rgb([5, 5, 5]))).unwrap();

        let err = backend.verify_face(&reference).await.unwrap_err();
        assert!(matches!(err, SessionError::Detection(_)));
    }

    #[tokio::test]
    async fn stuck_read_fails_fast_and_deferred_release_frees_the_camera() {
        let (unblock, hang) = channel();
        let opener = Arc::new(HangingOpener {
            hang: Mutex::new(Some(hang)),
            opens: AtomicUsize::new(0),
        });
        let backend = LocalFaceBackend::new(opener.clone(), Arc::new(BrightnessEngine), 1270);
        backend.open_camera().await.unwrap();

        let stuck =
            tokio::time::timeout(Duration::from_millis(100), backend.check_face_from_camera())
                .await;
        assert!(stuck.is_err());

        let err = backend.check_face_from_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::Detection(_)));
        let err = backend.stop_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::Device(_)));
        let err = backend.open_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::ResourceBusy));
        assert!(backend.is_camera_open());

        unblock.send(()).unwrap();
        wait_until_closed(&backend).await;
        assert!(!backend.is_camera_open());

        backend.open_camera().await.unwrap();
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        backend.stop_camera().await.unwrap();
    }
}

use std::env;
use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};

const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub landmarks: Vec<(i64, i64)>,
}

/// Detection and embedding primitives the local backend is built on.
pub trait FaceEngine: Send + Sync {
    fn detect(&self, image: &RgbImage) -> SessionResult<Vec<DetectedFace>>;
    fn embed(&self, image: &RgbImage, face: &DetectedFace) -> SessionResult<Vec<f64>>;
}

pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_lhs = 0.0;
    let mut norm_rhs = 0.0;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denominator = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    dot / denominator
}

#[derive(Debug, Clone, Default)]
pub struct ModelPaths {
    pub landmark: Option<PathBuf>,
    pub encoder: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

impl ModelPaths {
    /// Explicit paths win over `DLIB_LANDMARK_MODEL` / `DLIB_ENCODER_MODEL`.
    pub fn resolve(&self) -> SessionResult<ResolvedModelPaths> {
        let landmark = self
            .landmark
            .clone()
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or_else(|| {
                SessionError::Detection(format!(
                    "missing landmark predictor model; set landmark_model or ${LANDMARK_ENV}"
                ))
            })?;
        let encoder = self
            .encoder
            .clone()
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or_else(|| {
                SessionError::Detection(format!(
                    "missing face encoder model; set encoder_model or ${ENCODER_ENV}"
                ))
            })?;
        Ok(ResolvedModelPaths { landmark, encoder })
    }
}

#[cfg(feature = "dlib")]
pub use self::dlib::DlibEngine;

#[cfg(feature = "dlib")]
mod dlib {
    use std::sync::Mutex;

    use dlib_face_recognition::{
        FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
        LandmarkPredictor, LandmarkPredictorTrait, Rectangle,
    };
    use image::RgbImage;
    use tracing::debug;

    use super::{BoundingBox, DetectedFace, FaceEngine, ResolvedModelPaths};
    use crate::errors::{SessionError, SessionResult};

    struct Models {
        detector: FaceDetector,
        predictor: LandmarkPredictor,
        encoder: FaceEncoderNetwork,
    }

    // SAFETY: the dlib handles are only ever touched while `DlibEngine::models`
    // is locked, so no two threads use them at once.
    unsafe impl Send for Models {}

    pub struct DlibEngine {
        models: Mutex<Models>,
        jitters: u32,
    }

    impl DlibEngine {
        pub fn new(paths: &ResolvedModelPaths, jitters: u32) -> SessionResult<Self> {
            debug!(path = %paths.landmark.display(), "loading landmark model");
            let predictor = LandmarkPredictor::open(&paths.landmark).map_err(|message| {
                SessionError::Detection(format!(
                    "failed to load model {}: {message}",
                    paths.landmark.display()
                ))
            })?;
            debug!(path = %paths.encoder.display(), "loading encoder model");
            let encoder = FaceEncoderNetwork::open(&paths.encoder).map_err(|message| {
                SessionError::Detection(format!(
                    "failed to load model {}: {message}",
                    paths.encoder.display()
                ))
            })?;

            Ok(Self {
                models: Mutex::new(Models {
                    detector: FaceDetector::new(),
                    predictor,
                    encoder,
                }),
                jitters,
            })
        }

        fn lock(&self) -> SessionResult<std::sync::MutexGuard<'_, Models>> {
            self.models
                .lock()
                .map_err(|_| SessionError::Detection("face engine state poisoned".into()))
        }
    }

    fn to_rectangle(bbox: &BoundingBox) -> Rectangle {
        Rectangle {
            left: bbox.left,
            top: bbox.top,
            right: bbox.right,
            bottom: bbox.bottom,
        }
    }

    impl FaceEngine for DlibEngine {
        fn detect(&self, image: &RgbImage) -> SessionResult<Vec<DetectedFace>> {
            let models = self.lock()?;
            let matrix = ImageMatrix::from_image(image);
            let locations = models.detector.face_locations(&matrix);

            let mut faces = Vec::with_capacity(locations.len());
            for rect in locations.iter() {
                let landmarks = models.predictor.face_landmarks(&matrix, rect);
                faces.push(DetectedFace {
                    bounding_box: BoundingBox {
                        left: rect.left,
                        top: rect.top,
                        right: rect.right,
                        bottom: rect.bottom,
                    },
                    landmarks: landmarks.iter().map(|p| (p.x(), p.y())).collect(),
                });
            }
            Ok(faces)
        }

        fn embed(&self, image: &RgbImage, face: &DetectedFace) -> SessionResult<Vec<f64>> {
            let models = self.lock()?;
            let matrix = ImageMatrix::from_image(image);
            let rect = to_rectangle(&face.bounding_box);
            let landmarks = models.predictor.face_landmarks(&matrix, &rect);
            let encodings = models
                .encoder
                .get_face_encodings(&matrix, &[landmarks], self.jitters);
            encodings
                .first()
                .map(|encoding| encoding.as_ref().to_vec())
                .ok_or_else(|| SessionError::Detection("face encoder returned no embedding".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = [0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_of_opposite_vectors_is_negative() {
        let a = [1.0, 0.0];
        let b = [-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn explicit_model_paths_take_precedence() {
        let paths = ModelPaths {
            landmark: Some(PathBuf::from("/models/landmark.dat")),
            encoder: Some(PathBuf::from("/models/encoder.dat")),
        };
        let resolved = paths.resolve().unwrap();
        assert_eq!(resolved.landmark, PathBuf::from("/models/landmark.dat"));
        assert_eq!(resolved.encoder, PathBuf::from("/models/encoder.dat"));
    }
}

use crate::detector::{CascadeFaceDetector, DnnFaceDetector, FaceDetector};
use crate::error::EyeDetectionError;
use crate::landmarks::{CascadeEyeDetector, LandmarkDetector};
use clap::ValueEnum;
use log::info;
use opencv::core;
use std::path::{Path, PathBuf};

pub const SSD_PROTOTXT: &str = "deploy.prototxt";
pub const SSD_WEIGHTS: &str = "res10_300x300_ssd_iter_140000.caffemodel";
pub const FACE_CASCADE: &str = "haarcascade_frontalface_alt.xml";
pub const EYE_CASCADE: &str = "haarcascade_eye.xml";

/// Face detection backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// ResNet SSD face model, scored detections.
    Dnn,
    /// Haar cascade, unscored detections.
    Cascade,
}

/// Directory holding the model files.
#[derive(Clone, Debug)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Looks up `name` in the store. Haar cascades fall back to the ones
    /// shipped with OpenCV.
    pub fn resolve(&self, name: &str) -> anyhow::Result<String> {
        let path = self.dir.join(name);
        if path.is_file() {
            return Ok(path.to_string_lossy().into_owned());
        }
        if name.starts_with("haarcascade_") {
            if let Ok(found) = core::find_file(&format!("haarcascades/{name}"), false, true) {
                if !found.is_empty() {
                    return Ok(found);
                }
            }
        }
        Err(EyeDetectionError::ModelNotFound {
            name: name.to_owned(),
            dir: self.dir.clone(),
        }
        .into())
    }
}

pub struct Models {
    pub face_detector: Box<dyn FaceDetector>,
    pub landmark_detector: Box<dyn LandmarkDetector>,
}

/// Loads the face detection model, then the landmark model.
pub fn load_models(store: &ModelStore, backend: Backend) -> anyhow::Result<Models> {
    let face_detector: Box<dyn FaceDetector> = match backend {
        Backend::Dnn => {
            let prototxt = store.resolve(SSD_PROTOTXT)?;
            let weights = store.resolve(SSD_WEIGHTS)?;
            Box::new(DnnFaceDetector::new(&prototxt, &weights)?)
        }
        Backend::Cascade => Box::new(CascadeFaceDetector::new(&store.resolve(FACE_CASCADE)?)?),
    };
    info!("Loaded {:?} face detection model", backend);

    let landmark_detector = Box::new(CascadeEyeDetector::new(&store.resolve(EYE_CASCADE)?)?);
    info!("Loaded landmark model");

    Ok(Models {
        face_detector,
        landmark_detector,
    })
}

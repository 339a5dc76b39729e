use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EyeDetectionError {
    #[error("Model {name} not found in {dir:?}")]
    ModelNotFound { name: String, dir: PathBuf },
    #[error("Unable to open camera {0}")]
    CameraUnavailable(i32),
    #[error("Unable to open video file {0:?}")]
    VideoUnavailable(PathBuf),
    #[error("Invalid detector options: {0}")]
    InvalidOptions(String),
    #[error("Unexpected detector output: {0}")]
    MalformedOutput(String),
}

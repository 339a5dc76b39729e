pub mod camera;
pub mod component;
pub mod detector;
pub mod display;
pub mod error;
pub mod geometry;
pub mod landmarks;
pub mod models;
pub mod overlay;

pub use camera::{CameraSource, FrameRead, FrameSource};
pub use component::{ComponentConfig, EyeDetection, EyeObservation};
pub use detector::{DetectorOptions, FaceDetection, FaceDetector};
pub use display::{HighguiWindow, KeyCommand, Surface};
pub use error::EyeDetectionError;
pub use landmarks::{FaceLandmarks, LandmarkDetector};
pub use models::{load_models, Backend, ModelStore, Models};
pub use overlay::{BoxStyle, Overlay};

use opencv::prelude::*;
use opencv::imgproc;

pub fn convert_to_grayscale(image: &Mat) -> anyhow::Result<Mat> {
    if image.channels() == 1 {
        return Ok(image.clone());
    }
    let mut gray: Mat = Mat::default();
    imgproc::cvt_color_def(&image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    Ok(gray)
}


use crate::convert_to_grayscale;
use crate::detector::clamp_to_frame;
use crate::geometry::VideoDimensions;
use opencv::core::{Point2f, Rect, Size};
use opencv::prelude::*;
use opencv::types::VectorOfRect;
use opencv::{imgproc, objdetect};

/// Share of the face box, from the top, searched for eyes.
const EYE_REGION_HEIGHT: f64 = 0.6;

/// Eye boxes in frame coordinates. `left_eye` is the one further left in
/// the image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceLandmarks {
    pub left_eye: Rect,
    pub right_eye: Rect,
}

impl FaceLandmarks {
    pub fn left_eye_center(&self) -> Point2f {
        center(self.left_eye)
    }

    pub fn right_eye_center(&self) -> Point2f {
        center(self.right_eye)
    }
}

fn center(rect: Rect) -> Point2f {
    Point2f::new(
        rect.x as f32 + rect.width as f32 / 2.0,
        rect.y as f32 + rect.height as f32 / 2.0,
    )
}

pub trait LandmarkDetector: Send {
    fn detect(&mut self, frame: &Mat, face: Rect) -> anyhow::Result<Option<FaceLandmarks>>;
}

/// Picks the largest candidate on each side of the face. Candidates are
/// relative to `face`, the result is in frame coordinates.
pub fn pick_eye_pair(candidates: &[Rect], face: Rect) -> Option<FaceLandmarks> {
    let midline = face.width as f32 / 2.0;
    let largest = |left_side: bool| {
        candidates
            .iter()
            .filter(|eye| (center(**eye).x < midline) == left_side)
            .max_by_key(|eye| eye.width as i64 * eye.height as i64)
            .map(|eye| Rect::new(eye.x + face.x, eye.y + face.y, eye.width, eye.height))
    };
    Some(FaceLandmarks {
        left_eye: largest(true)?,
        right_eye: largest(false)?,
    })
}

/// Haar cascade eye detector run inside the face box.
pub struct CascadeEyeDetector {
    classifier: objdetect::CascadeClassifier,
}

impl CascadeEyeDetector {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let classifier = objdetect::CascadeClassifier::new(path)?;
        if classifier.empty()? {
            anyhow::bail!("Cascade {path} is empty");
        }
        Ok(Self { classifier })
    }
}

impl LandmarkDetector for CascadeEyeDetector {
    fn detect(&mut self, frame: &Mat, face: Rect) -> anyhow::Result<Option<FaceLandmarks>> {
        let dimensions = VideoDimensions::from(frame.size()?);
        let Some(face) = clamp_to_frame(face, dimensions) else {
            return Ok(None);
        };
        let eye_region = Rect::new(
            face.x,
            face.y,
            face.width,
            ((face.height as f64 * EYE_REGION_HEIGHT).round() as i32).max(1),
        );

        let gray = convert_to_grayscale(frame)?;
        let roi = Mat::roi(&gray, eye_region)?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&roi, &mut equalized)?;

        let min_side = (face.width / 8).max(1);
        let mut eyes = VectorOfRect::new();
        self.classifier.detect_multi_scale(
            &equalized,
            &mut eyes,
            1.1,
            3,
            objdetect::CASCADE_SCALE_IMAGE,
            Size::new(min_side, min_side),
            Size::new(0, 0),
        )?;

        let candidates: Vec<Rect> = eyes.iter().collect();
        Ok(pick_eye_pair(&candidates, face))
    }
}

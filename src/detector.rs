use crate::error::EyeDetectionError;
use crate::convert_to_grayscale;
use crate::geometry::VideoDimensions;
use log::debug;
use opencv::core::{Rect, Scalar, Size};
use opencv::prelude::*;
use opencv::types::VectorOfRect;
use opencv::{core, dnn, imgproc, objdetect};
use std::cmp::Ordering;

/// Input resolution the SSD face model was trained at.
pub const SSD_INPUT_SIZE: i32 = 300;
/// BGR channel means subtracted by the SSD face model.
const SSD_MEAN: (f64, f64, f64) = (104.0, 177.0, 123.0);
/// Values per detection row: image id, class, confidence, x1, y1, x2, y2.
const SSD_ROW_LEN: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceDetection {
    pub bbox: Rect,
    pub score: f32,
}

impl FaceDetection {
    pub fn new(bbox: Rect, score: f32) -> Self {
        Self { bbox, score }
    }

    pub fn area(&self) -> i64 {
        self.bbox.width as i64 * self.bbox.height as i64
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DetectorOptions {
    /// Full resolution detector used for the overlay.
    SsdMobilenet {
        min_confidence: f32,
        max_results: usize,
    },
    /// Low resolution detector used for eye tracking.
    TinyFace {
        input_size: i32,
        score_threshold: f32,
    },
}

impl DetectorOptions {
    pub fn ssd_mobilenet() -> Self {
        DetectorOptions::SsdMobilenet {
            min_confidence: 0.5,
            max_results: 100,
        }
    }

    pub fn tiny_face() -> Self {
        DetectorOptions::TinyFace {
            input_size: 128,
            score_threshold: 0.5,
        }
    }

    pub fn validate(&self) -> Result<(), EyeDetectionError> {
        let threshold = self.threshold();
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EyeDetectionError::InvalidOptions(format!(
                "threshold {threshold} is outside of [0, 1]"
            )));
        }
        match *self {
            DetectorOptions::SsdMobilenet { max_results, .. } if max_results == 0 => Err(
                EyeDetectionError::InvalidOptions("max_results must be positive".to_owned()),
            ),
            DetectorOptions::TinyFace { input_size, .. } if input_size <= 0 || input_size % 32 != 0 => {
                Err(EyeDetectionError::InvalidOptions(format!(
                    "input size {input_size} must be a positive multiple of 32"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn threshold(&self) -> f32 {
        match *self {
            DetectorOptions::SsdMobilenet { min_confidence, .. } => min_confidence,
            DetectorOptions::TinyFace {
                score_threshold, ..
            } => score_threshold,
        }
    }

    pub fn input_size(&self) -> i32 {
        match *self {
            DetectorOptions::SsdMobilenet { .. } => SSD_INPUT_SIZE,
            DetectorOptions::TinyFace { input_size, .. } => input_size,
        }
    }

    pub fn max_results(&self) -> Option<usize> {
        match *self {
            DetectorOptions::SsdMobilenet { max_results, .. } => Some(max_results),
            DetectorOptions::TinyFace { .. } => None,
        }
    }
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self::ssd_mobilenet()
    }
}

pub trait FaceDetector: Send {
    /// All faces above the option's threshold, best first.
    fn detect_all(
        &mut self,
        frame: &Mat,
        options: &DetectorOptions,
    ) -> anyhow::Result<Vec<FaceDetection>>;

    fn detect_single(
        &mut self,
        frame: &Mat,
        options: &DetectorOptions,
    ) -> anyhow::Result<Option<FaceDetection>> {
        let detections = self.detect_all(frame, options)?;
        Ok(find_best_face(&detections))
    }
}

/// Highest score wins, larger area breaks ties.
pub fn find_best_face(faces: &[FaceDetection]) -> Option<FaceDetection> {
    faces.iter().copied().max_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.area().cmp(&b.area()))
    })
}

/// Sorts best first and applies the result limit.
fn rank(mut detections: Vec<FaceDetection>, max_results: Option<usize>) -> Vec<FaceDetection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    if let Some(max_results) = max_results {
        detections.truncate(max_results);
    }
    detections
}

/// Clamps a rectangle to the frame, returning `None` when nothing is left.
pub fn clamp_to_frame(rect: Rect, frame: VideoDimensions) -> Option<Rect> {
    let (width, height) = (frame.width as i64, frame.height as i64);
    let x1 = (rect.x as i64).clamp(0, width);
    let y1 = (rect.y as i64).clamp(0, height);
    let x2 = (rect.x as i64 + rect.width as i64).clamp(0, width);
    let y2 = (rect.y as i64 + rect.height as i64).clamp(0, height);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::new(
        x1 as i32,
        y1 as i32,
        (x2 - x1) as i32,
        (y2 - y1) as i32,
    ))
}

/// Turns the flattened SSD output blob into frame space detections.
pub fn parse_ssd_output(
    data: &[f32],
    frame: VideoDimensions,
    threshold: f32,
) -> Result<Vec<FaceDetection>, EyeDetectionError> {
    if data.len() % SSD_ROW_LEN != 0 {
        return Err(EyeDetectionError::MalformedOutput(format!(
            "{} values is not a multiple of {SSD_ROW_LEN}",
            data.len()
        )));
    }

    let width = frame.width as f32;
    let height = frame.height as f32;
    let detections = data
        .chunks_exact(SSD_ROW_LEN)
        .filter(|row| row.iter().all(|value| value.is_finite()))
        .filter(|row| row[2] >= threshold)
        .filter_map(|row| {
            // model coordinates are normalized but not guaranteed to stay in range
            let x1 = (row[3].clamp(0.0, 1.0) * width).round() as i32;
            let y1 = (row[4].clamp(0.0, 1.0) * height).round() as i32;
            let x2 = (row[5].clamp(0.0, 1.0) * width).round() as i32;
            let y2 = (row[6].clamp(0.0, 1.0) * height).round() as i32;
            let bbox = clamp_to_frame(Rect::new(x1, y1, x2 - x1, y2 - y1), frame)?;
            Some(FaceDetection::new(bbox, row[2]))
        })
        .collect();
    Ok(detections)
}

/// ResNet-10 SSD face model run through the OpenCV dnn module.
pub struct DnnFaceDetector {
    net: dnn::Net,
}

impl DnnFaceDetector {
    pub fn new(prototxt: &str, weights: &str) -> anyhow::Result<Self> {
        let net = dnn::read_net_from_caffe(prototxt, weights)?;
        if net.empty()? {
            anyhow::bail!("Face detection network {weights} is empty");
        }
        Ok(Self { net })
    }
}

impl FaceDetector for DnnFaceDetector {
    fn detect_all(
        &mut self,
        frame: &Mat,
        options: &DetectorOptions,
    ) -> anyhow::Result<Vec<FaceDetection>> {
        options.validate()?;
        let dimensions = VideoDimensions::from(frame.size()?);
        if dimensions.is_empty() {
            return Ok(Vec::new());
        }

        let input_size = options.input_size();
        let blob = dnn::blob_from_image(
            frame,
            1.0,
            Size::new(input_size, input_size),
            Scalar::new(SSD_MEAN.0, SSD_MEAN.1, SSD_MEAN.2, 0.0),
            false,
            false,
            core::CV_32F,
        )?;
        self.net.set_input_def(&blob)?;
        let output = self.net.forward_single_def()?;

        let detections = parse_ssd_output(output.data_typed::<f32>()?, dimensions, options.threshold())?;
        debug!("dnn detector found {} faces", detections.len());
        Ok(rank(detections, options.max_results()))
    }
}

/// Downscale factor applied before running a cascade. `TinyFace` fits the
/// longer side of the frame into `input_size`, never upscaling.
pub fn cascade_scale(frame: VideoDimensions, options: &DetectorOptions) -> f64 {
    match *options {
        DetectorOptions::TinyFace { input_size, .. } => {
            let longer = frame.width.max(frame.height);
            if longer <= 0 {
                return 1.0;
            }
            (input_size as f64 / longer as f64).min(1.0)
        }
        DetectorOptions::SsdMobilenet { .. } => 1.0,
    }
}

/// Smallest face searched for in the scaled image.
pub fn min_face_side(scale: f64) -> i32 {
    ((30.0 * scale).round() as i32).max(12)
}

/// Maps a box found in the scaled image back onto the frame.
pub fn scale_to_frame(rect: Rect, scale: f64, frame: VideoDimensions) -> Option<Rect> {
    let map = |value: i32| (value as f64 / scale).round() as i32;
    let bbox = Rect::new(map(rect.x), map(rect.y), map(rect.width), map(rect.height));
    clamp_to_frame(bbox, frame)
}

/// Haar cascade face detector. Cascades carry no confidence, every
/// detection scores 1.0.
pub struct CascadeFaceDetector {
    classifier: objdetect::CascadeClassifier,
}

impl CascadeFaceDetector {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let classifier = objdetect::CascadeClassifier::new(path)?;
        if classifier.empty()? {
            anyhow::bail!("Cascade {path} is empty");
        }
        Ok(Self { classifier })
    }
}

impl FaceDetector for CascadeFaceDetector {
    fn detect_all(
        &mut self,
        frame: &Mat,
        options: &DetectorOptions,
    ) -> anyhow::Result<Vec<FaceDetection>> {
        options.validate()?;
        let dimensions = VideoDimensions::from(frame.size()?);
        if dimensions.is_empty() {
            return Ok(Vec::new());
        }
        let gray = convert_to_grayscale(frame)?;

        let scale = cascade_scale(dimensions, options);
        let image = if scale < 1.0 {
            let mut reduced = Mat::default();
            imgproc::resize(
                &gray,
                &mut reduced,
                Size::default(),
                scale,
                scale,
                imgproc::INTER_AREA,
            )?;
            reduced
        } else {
            gray
        };

        let min_side = min_face_side(scale);
        let mut faces = VectorOfRect::new();
        self.classifier.detect_multi_scale(
            &image,
            &mut faces,
            1.1,
            2,
            objdetect::CASCADE_SCALE_IMAGE,
            Size::new(min_side, min_side),
            Size::new(0, 0),
        )?;

        let detections = faces
            .iter()
            .filter_map(|face| {
                scale_to_frame(face, scale, dimensions).map(|bbox| FaceDetection::new(bbox, 1.0))
            })
            .collect();
        Ok(rank(detections, options.max_results()))
    }
}

use crate::error::EyeDetectionError;
use log::info;
use opencv::prelude::*;
use opencv::videoio;
use std::path::{Path, PathBuf};

pub enum FrameRead {
    Frame(Mat),
    /// Device is open but has no frame yet.
    Pending,
    /// End of stream.
    Ended,
}

pub trait FrameSource {
    fn next_frame(&mut self) -> anyhow::Result<FrameRead>;

    /// Aspect ratio reported by the device, if any.
    fn aspect_ratio(&self) -> Option<f64> {
        None
    }
}

enum SourceKind {
    Camera(i32),
    File(PathBuf),
}

pub struct CameraSource {
    capture: videoio::VideoCapture,
    kind: SourceKind,
}

impl CameraSource {
    pub fn open(index: i32) -> anyhow::Result<Self> {
        let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&capture)? {
            return Err(EyeDetectionError::CameraUnavailable(index).into());
        }
        info!("Opened camera {}", index);
        Ok(Self {
            capture,
            kind: SourceKind::Camera(index),
        })
    }

    pub fn open_file(path: &Path) -> anyhow::Result<Self> {
        let name = path.to_string_lossy();
        let capture = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&capture)? {
            return Err(EyeDetectionError::VideoUnavailable(path.to_owned()).into());
        }
        info!("Opened video file {:?}", path);
        Ok(Self {
            capture,
            kind: SourceKind::File(path.to_owned()),
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> anyhow::Result<FrameRead> {
        let mut frame = Mat::default();
        let grabbed = self.capture.read(&mut frame)?;
        if grabbed && frame.size()?.width > 0 {
            return Ok(FrameRead::Frame(frame));
        }
        match &self.kind {
            SourceKind::Camera(_) => Ok(FrameRead::Pending),
            SourceKind::File(path) => {
                info!("Reached end of {:?}", path);
                Ok(FrameRead::Ended)
            }
        }
    }

    fn aspect_ratio(&self) -> Option<f64> {
        let width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH).ok()?;
        let height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT).ok()?;
        if width > 0.0 && height > 0.0 {
            Some(width / height)
        } else {
            None
        }
    }
}

use crate::detector::FaceDetection;
use opencv::core::{self, Rect, Scalar, Size};
use opencv::imgproc;
use opencv::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxStyle {
    /// BGR stroke color.
    pub color: (f64, f64, f64),
    pub thickness: i32,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            color: (255.0, 0.0, 0.0),
            thickness: 2,
        }
    }
}

/// Transparent BGRA canvas drawn above the video. Pixels with a non zero
/// alpha replace the video pixel underneath when composited.
pub struct Overlay {
    canvas: Mat,
    style: BoxStyle,
}

impl Overlay {
    pub fn new(size: Size, style: BoxStyle) -> anyhow::Result<Self> {
        Ok(Self {
            canvas: blank_canvas(size)?,
            style,
        })
    }

    pub fn size(&self) -> anyhow::Result<Size> {
        Ok(self.canvas.size()?)
    }

    pub fn is_empty(&self) -> bool {
        self.canvas.empty()
    }

    /// Resizing always clears, even when the size is unchanged.
    pub fn resize(&mut self, size: Size) -> anyhow::Result<()> {
        self.canvas = blank_canvas(size)?;
        Ok(())
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        let size = self.size()?;
        self.resize(size)
    }

    pub fn stroke_rect(&mut self, rect: Rect) -> anyhow::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let (b, g, r) = self.style.color;
        imgproc::rectangle(
            &mut self.canvas,
            rect,
            Scalar::new(b, g, r, 255.0),
            self.style.thickness,
            imgproc::LINE_8,
            0,
        )?;
        Ok(())
    }

    pub fn draw_detections(&mut self, detections: &[FaceDetection]) -> anyhow::Result<()> {
        self.clear()?;
        for detection in detections {
            self.stroke_rect(detection.bbox)?;
        }
        Ok(())
    }

    /// Returns a copy of `frame` with the overlay drawn over it. The overlay
    /// is skipped when its size doesn't match the frame.
    pub fn composite(&self, frame: &Mat) -> anyhow::Result<Mat> {
        let mut output = match frame.channels() {
            1 => convert(frame, imgproc::COLOR_GRAY2BGR)?,
            4 => convert(frame, imgproc::COLOR_BGRA2BGR)?,
            _ => frame.clone(),
        };
        if self.is_empty() || frame.empty() || self.canvas.size()? != frame.size()? {
            return Ok(output);
        }

        let mut alpha = Mat::default();
        core::extract_channel(&self.canvas, &mut alpha, 3)?;
        let strokes = convert(&self.canvas, imgproc::COLOR_BGRA2BGR)?;
        strokes.copy_to_masked(&mut output, &alpha)?;
        Ok(output)
    }
}

fn blank_canvas(size: Size) -> anyhow::Result<Mat> {
    if size.width <= 0 || size.height <= 0 {
        return Ok(Mat::default());
    }
    Ok(Mat::new_size_with_default(
        size,
        core::CV_8UC4,
        Scalar::all(0.0),
    )?)
}

fn convert(image: &Mat, code: i32) -> anyhow::Result<Mat> {
    let mut converted = Mat::default();
    imgproc::cvt_color_def(image, &mut converted, code)?;
    Ok(converted)
}

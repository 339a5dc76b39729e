use opencv::core::Size;

/// Intrinsic size of the video stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: i32,
    pub height: i32,
}

impl VideoDimensions {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn as_size(&self) -> Size {
        Size {
            width: self.width.max(0),
            height: self.height.max(0),
        }
    }
}

impl From<Size> for VideoDimensions {
    fn from(size: Size) -> Self {
        Self::new(size.width, size.height)
    }
}

/// Prefers the aspect ratio reported by the capture device and falls back
/// to the intrinsic video dimensions.
pub fn aspect_ratio(reported: Option<f64>, dimensions: VideoDimensions) -> Option<f64> {
    if let Some(reported) = reported {
        if reported.is_finite() && reported > 0.0 {
            return Some(reported);
        }
    }
    if dimensions.is_empty() {
        return None;
    }
    Some(dimensions.width as f64 / dimensions.height as f64)
}

/// Display size that fills `client_width` while keeping `aspect`.
pub fn display_size(aspect: f64, client_width: i32) -> Option<Size> {
    if !aspect.is_finite() || aspect <= 0.0 || client_width <= 0 {
        return None;
    }
    let height = (client_width as f64 / aspect).round() as i32;
    if height <= 0 {
        return None;
    }
    Some(Size {
        width: client_width,
        height,
    })
}

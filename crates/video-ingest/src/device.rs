//! Device seam shared by every capture backend.

use tracing::debug;

use crate::{
    pattern::TestPattern,
    types::{CaptureError, Frame},
};

/// URI accepted by [`open_device`] to select the synthetic test pattern.
pub const TEST_PATTERN_URI: &str = "testsrc";

/// An opened camera. Dropping the value releases the underlying device.
pub trait CameraDevice: Send {
    /// Block until the next raw frame is available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Kind of source a URI refers to.
pub enum SourceKind {
    /// Local V4L device by index or `/dev/videoN` path.
    Device,
    /// File path or network stream handled by the OpenCV backend.
    Stream,
    /// Built-in moving test pattern.
    TestPattern,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri == TEST_PATTERN_URI {
            SourceKind::TestPattern
        } else if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::Stream
        }
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

/// Open the device named by `uri`, configured for `target_size` at `fps`.
pub fn open_device(
    uri: &str,
    target_size: (i32, i32),
    fps: f64,
) -> Result<Box<dyn CameraDevice>, CaptureError> {
    let kind = SourceKind::from_uri(uri);
    debug!(uri, ?kind, "opening video source");
    match kind {
        SourceKind::TestPattern => Ok(Box::new(TestPattern::new(target_size.0, target_size.1))),
        SourceKind::Device | SourceKind::Stream => open_opencv(uri, target_size, fps),
    }
}

#[cfg(feature = "opencv")]
fn open_opencv(
    uri: &str,
    target_size: (i32, i32),
    fps: f64,
) -> Result<Box<dyn CameraDevice>, CaptureError> {
    let camera = crate::camera::OpenCvCamera::open(uri, target_size, fps)?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "opencv"))]
fn open_opencv(
    uri: &str,
    _target_size: (i32, i32),
    _fps: f64,
) -> Result<Box<dyn CameraDevice>, CaptureError> {
    Err(CaptureError::Unsupported {
        uri: uri.to_string(),
        feature: "opencv",
    })
}

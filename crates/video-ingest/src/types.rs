use anyhow::Error;
use thiserror::Error;

/// Raw, tightly packed frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Byte length a frame with this geometry and format must carry.
    pub fn expected_len(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize) * self.format.bytes_per_pixel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} needs the `{feature}` feature of video-ingest")]
    Unsupported { uri: String, feature: &'static str },
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("video source returned an empty frame")]
    EmptyFrame,
    #[error(transparent)]
    Other(#[from] Error),
}

impl CaptureError {
    /// Whether the error concerns a single frame rather than the device itself.
    ///
    /// Capture loops retry these a bounded number of times before giving up.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Read(_) | CaptureError::EmptyFrame)
    }
}

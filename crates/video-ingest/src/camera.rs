//! OpenCV-backed camera capture.

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::{
    device::{CameraDevice, parse_device_index},
    types::{CaptureError, Frame, FrameFormat},
};

/// V4L device, file, or network stream opened through OpenCV.
pub struct OpenCvCamera {
    uri: String,
    cap: VideoCapture,
    frame: Mat,
    scratch: Mat,
    target_size: (i32, i32),
}

impl OpenCvCamera {
    pub fn open(uri: &str, target_size: (i32, i32), fps: f64) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(uri)?;
        configure_camera(&mut cap, target_size, fps);
        Ok(Self {
            uri: uri.to_string(),
            cap,
            frame: Mat::default(),
            scratch: Mat::default(),
            target_size,
        })
    }
}

impl CameraDevice for OpenCvCamera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let grabbed = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        if !grabbed {
            return Err(CaptureError::Read(format!("{} returned no frame", self.uri)));
        }

        let size = self.frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 || size.height <= 0 {
            return Err(CaptureError::EmptyFrame);
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }

    fn describe(&self) -> String {
        format!("opencv:{}", self.uri)
    }
}

impl Drop for OpenCvCamera {
    fn drop(&mut self) {
        match self.cap.release() {
            Ok(()) => debug!(uri = %self.uri, "camera released"),
            Err(err) => warn!(uri = %self.uri, "camera release failed: {err}"),
        }
    }
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Request the target size and rate, preferring MJPG then YUYV on the wire.
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    let preferred = [['M', 'J', 'P', 'G'], ['Y', 'U', 'Y', 'V']];
    let accepted = preferred.iter().find(|[a, b, c, d]| {
        videoio::VideoWriter::fourcc(*a, *b, *c, *d)
            .and_then(|code| cap.set(videoio::CAP_PROP_FOURCC, code as f64))
            .unwrap_or(false)
    });
    if accepted.is_none() {
        debug!("camera kept its default pixel format");
    }

    for (prop, value) in [
        (videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64),
        (videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64),
        (videoio::CAP_PROP_FPS, fps),
    ] {
        if !matches!(cap.set(prop, value), Ok(true)) {
            debug!(prop, value, "camera ignored capture property");
        }
    }
}

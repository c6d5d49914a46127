//! Camera access for the vision assistant.
//!
//! Backends implement [`CameraDevice`], a blocking pull interface. The capture
//! loop in the application owns the returned device and drops it to release
//! the hardware.

#[cfg(feature = "opencv")]
pub mod camera;
pub mod device;
pub mod pattern;
pub mod types;

#[cfg(feature = "opencv")]
pub use camera::OpenCvCamera;
pub use device::{CameraDevice, SourceKind, TEST_PATTERN_URI, open_device, parse_device_index};
pub use pattern::TestPattern;
pub use types::{CaptureError, Frame, FrameFormat};

//! Producer/consumer frame streaming.
//!
//! - `frame_buffer`: latest-frame holder with wait/notify.
//! - `capture`: camera thread publishing encoded frames.
//! - `encoding`: raw frame to JPEG.
//! - `session`: per-viewer multipart body stream.

pub(crate) mod capture;
pub(crate) mod encoding;
pub(crate) mod frame_buffer;
pub(crate) mod session;

pub(crate) use capture::{CaptureExit, CaptureSettings, spawn_capture_loop};
pub(crate) use frame_buffer::FrameBuffer;
pub(crate) use session::StreamSession;

//! Synthetic source for running without camera hardware.

use chrono::Utc;

use crate::{
    device::CameraDevice,
    types::{CaptureError, Frame, FrameFormat},
};

const BAR_WIDTH: i32 = 24;
const BAR_STEP: i32 = 8;

/// Horizontal gradient with a white bar sweeping left to right.
pub struct TestPattern {
    width: i32,
    height: i32,
    tick: u64,
}

impl TestPattern {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }

    fn bar_origin(&self) -> i32 {
        let span = self.width + BAR_WIDTH;
        ((self.tick as i64 * BAR_STEP as i64) % span as i64) as i32 - BAR_WIDTH
    }
}

impl CameraDevice for TestPattern {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_start = self.bar_origin();
        let bar = bar_start..bar_start + BAR_WIDTH;
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            let green = (y * 255 / h.max(1)) as u8;
            for x in 0..w {
                if bar.contains(&(x as i32)) {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let blue = (x * 255 / w.max(1)) as u8;
                    data.extend_from_slice(&[blue, green, 96]);
                }
            }
        }
        self.tick = self.tick.wrapping_add(1);

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }

    fn describe(&self) -> String {
        format!("testsrc {}x{}", self.width, self.height)
    }
}

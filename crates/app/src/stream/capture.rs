//! Capture loop owning the camera device.
//!
//! The loop runs on a dedicated thread and walks `Closed → Opening → Running →
//! Closed`. It is the only code that opens or drops a [`CameraDevice`]. Any
//! exit path closes the [`FrameBuffer`], which marks capture inactive and
//! releases every stream session waiting for a frame.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};
use video_ingest::{CameraDevice, CaptureError};

use crate::stream::{encoding::FrameEncoder, frame_buffer::FrameBuffer};

#[derive(Clone, Debug)]
pub(crate) struct CaptureSettings {
    /// Target interval between device reads.
    pub(crate) frame_interval: Duration,
    /// Consecutive transient read failures tolerated before giving up.
    pub(crate) max_read_retries: u32,
    /// Back-off unit; the n-th retry waits `n * retry_backoff`.
    pub(crate) retry_backoff: Duration,
    pub(crate) jpeg_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            max_read_retries: 3,
            retry_backoff: Duration::from_millis(50),
            jpeg_quality: 85,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CapturePhase {
    Closed,
    Opening,
    Running,
}

/// Why the capture loop ended.
#[derive(Debug)]
pub(crate) enum CaptureExit {
    /// The device could not be opened.
    DeviceUnavailable(CaptureError),
    /// The device failed mid-run and retries were exhausted.
    DeviceLost(CaptureError),
    /// A stop was requested.
    Stopped,
    /// The capture thread panicked.
    Panicked,
}

/// Handle to the running capture thread.
pub(crate) struct CaptureHandle {
    stop: Arc<AtomicBool>,
    buffer: Arc<FrameBuffer>,
    handle: Option<thread::JoinHandle<CaptureExit>>,
}

impl CaptureHandle {
    /// Ask the loop to stop, wait for it to release the device, and return
    /// how it ended.
    pub(crate) fn stop(mut self) -> CaptureExit {
        self.stop.store(true, Ordering::SeqCst);
        self.finish()
    }

    /// Wait for the loop to end on its own.
    #[cfg(test)]
    pub(crate) fn join(mut self) -> CaptureExit {
        self.finish()
    }

    fn finish(&mut self) -> CaptureExit {
        let exit = match self.handle.take().map(|handle| handle.join()) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => {
                error!("capture thread panicked");
                CaptureExit::Panicked
            }
            None => CaptureExit::Stopped,
        };
        self.buffer.close();
        exit
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.store(true, Ordering::SeqCst);
            let _ = self.finish();
        }
    }
}

/// Spawn the capture thread.
///
/// `open` runs on the capture thread and is the only place the device is
/// acquired.
pub(crate) fn spawn_capture_loop<F>(
    open: F,
    buffer: Arc<FrameBuffer>,
    settings: CaptureSettings,
) -> io::Result<CaptureHandle>
where
    F: FnOnce() -> Result<Box<dyn CameraDevice>, CaptureError> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let handle = thread::Builder::new().name("camera-capture".into()).spawn({
        let stop = stop.clone();
        let buffer = buffer.clone();
        move || run_capture(open, &buffer, &settings, &stop)
    })?;
    Ok(CaptureHandle {
        stop,
        buffer,
        handle: Some(handle),
    })
}

fn run_capture<F>(
    open: F,
    buffer: &FrameBuffer,
    settings: &CaptureSettings,
    stop: &AtomicBool,
) -> CaptureExit
where
    F: FnOnce() -> Result<Box<dyn CameraDevice>, CaptureError>,
{
    let span = tracing::info_span!("capture.loop");
    let _guard = span.enter();
    let _closer = CloseOnExit(buffer);

    let mut phase = CapturePhase::Closed;
    transition(&mut phase, CapturePhase::Opening);
    let mut device = match open() {
        Ok(device) => device,
        Err(err) => {
            warn!("camera unavailable, continuing without video: {err}");
            transition(&mut phase, CapturePhase::Closed);
            buffer.close();
            return CaptureExit::DeviceUnavailable(err);
        }
    };

    let description = device.describe();
    if !buffer.mark_active() {
        debug!(device = %description, "frame buffer closed while opening");
        drop(device);
        transition(&mut phase, CapturePhase::Closed);
        return CaptureExit::Stopped;
    }
    transition(&mut phase, CapturePhase::Running);
    info!(device = %description, "camera opened");
    metrics::gauge!("assistant_camera_active").set(1.0);

    let exit = drive(device.as_mut(), buffer, settings, stop);

    drop(device);
    transition(&mut phase, CapturePhase::Closed);
    buffer.close();
    metrics::gauge!("assistant_camera_active").set(0.0);
    match &exit {
        CaptureExit::DeviceLost(err) => error!(device = %description, "camera lost: {err}"),
        _ => info!(device = %description, "camera released"),
    }
    exit
}

/// Closes the buffer when the capture thread leaves `run_capture`, including
/// by unwinding out of a device or encoder panic.
struct CloseOnExit<'a>(&'a FrameBuffer);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("capture thread unwinding, closing frame buffer");
        }
        self.0.close();
        metrics::gauge!("assistant_camera_active").set(0.0);
    }
}

fn transition(phase: &mut CapturePhase, next: CapturePhase) {
    debug!(from = ?*phase, to = ?next, "capture phase");
    *phase = next;
}

fn drive(
    device: &mut dyn CameraDevice,
    buffer: &FrameBuffer,
    settings: &CaptureSettings,
    stop: &AtomicBool,
) -> CaptureExit {
    let encoder = FrameEncoder::new(settings.jpeg_quality);
    let mut failures: u32 = 0;
    let mut last_publish: Option<Instant> = None;

    while !stop.load(Ordering::Relaxed) {
        let iteration_start = Instant::now();
        match device.read_frame() {
            Ok(frame) => {
                failures = 0;
                let encode_start = Instant::now();
                match encoder.encode(&frame) {
                    Ok(jpeg) => {
                        metrics::histogram!("assistant_encode_seconds")
                            .record(encode_start.elapsed().as_secs_f64());
                        if let Some(version) = buffer.publish(jpeg) {
                            metrics::counter!("assistant_frames_published_total").increment(1);
                            if version % 300 == 0 {
                                debug!(version, "capture heartbeat");
                            }
                        }
                        if let Some(previous) = last_publish.replace(Instant::now()) {
                            metrics::histogram!("assistant_capture_interval_seconds")
                                .record(previous.elapsed().as_secs_f64());
                        }
                    }
                    Err(err) => {
                        metrics::counter!("assistant_encode_errors_total").increment(1);
                        warn!("dropping frame that failed to encode: {err}");
                    }
                }
            }
            Err(err) if err.is_transient() && failures < settings.max_read_retries => {
                failures += 1;
                metrics::counter!("assistant_capture_read_failures_total").increment(1);
                warn!(attempt = failures, "frame read failed, retrying: {err}");
                sleep_unless_stopped(settings.retry_backoff * failures, stop);
                continue;
            }
            Err(err) => {
                metrics::counter!("assistant_capture_read_failures_total").increment(1);
                return CaptureExit::DeviceLost(err);
            }
        }

        if let Some(remaining) = settings
            .frame_interval
            .checked_sub(iteration_start.elapsed())
        {
            sleep_unless_stopped(remaining, stop);
        }
    }

    CaptureExit::Stopped
}

/// Sleep in short slices so a stop request is honoured promptly.
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use tokio::time::timeout;
    use video_ingest::{Frame, TestPattern};

    use super::*;

    fn fast_settings() -> CaptureSettings {
        CaptureSettings {
            frame_interval: Duration::from_millis(1),
            max_read_retries: 2,
            retry_backoff: Duration::from_millis(1),
            jpeg_quality: 70,
        }
    }

    fn small_frame() -> Frame {
        TestPattern::new(8, 8).read_frame().unwrap()
    }

    /// Plays back a fixed script, then reports the device as unplugged.
    struct ScriptedDevice {
        script: VecDeque<Result<Frame, CaptureError>>,
        released: Arc<AtomicUsize>,
    }

    impl ScriptedDevice {
        fn boxed(
            script: Vec<Result<Frame, CaptureError>>,
            released: Arc<AtomicUsize>,
        ) -> Box<dyn CameraDevice> {
            Box::new(Self {
                script: script.into(),
                released,
            })
        }
    }

    impl CameraDevice for ScriptedDevice {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Read("unplugged".into())))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    impl Drop for ScriptedDevice {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn open_failure_leaves_capture_inactive() {
        let buffer = Arc::new(FrameBuffer::new());
        let handle = spawn_capture_loop(
            || Err(CaptureError::Open { uri: "0".into() }),
            buffer.clone(),
            fast_settings(),
        )
        .unwrap();

        let exit = handle.join();
        assert!(matches!(exit, CaptureExit::DeviceUnavailable(_)));
        assert!(!buffer.is_active());
        assert!(buffer.is_closed());
        assert!(buffer.read().is_none());
    }

    #[test]
    fn unplugged_device_is_released_once_after_retries() {
        let buffer = Arc::new(FrameBuffer::new());
        let released = Arc::new(AtomicUsize::new(0));
        let script = vec![Ok(small_frame()), Ok(small_frame()), Ok(small_frame())];
        let handle = spawn_capture_loop(
            {
                let released = released.clone();
                move || Ok(ScriptedDevice::boxed(script, released))
            },
            buffer.clone(),
            fast_settings(),
        )
        .unwrap();

        let exit = handle.join();
        assert!(matches!(exit, CaptureExit::DeviceLost(CaptureError::Read(_))));
        assert_eq!(buffer.version(), 3);
        assert!(!buffer.is_active());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_read_failures_are_tolerated() {
        let buffer = Arc::new(FrameBuffer::new());
        let released = Arc::new(AtomicUsize::new(0));
        let script = vec![
            Ok(small_frame()),
            Err(CaptureError::EmptyFrame),
            Err(CaptureError::Read("timeout".into())),
            Ok(small_frame()),
            Err(CaptureError::EmptyFrame),
            Ok(small_frame()),
            Err(CaptureError::Open { uri: "0".into() }),
        ];
        let handle = spawn_capture_loop(
            {
                let released = released.clone();
                move || Ok(ScriptedDevice::boxed(script, released))
            },
            buffer.clone(),
            fast_settings(),
        )
        .unwrap();

        let exit = handle.join();
        assert!(matches!(exit, CaptureExit::DeviceLost(CaptureError::Open { .. })));
        assert_eq!(buffer.version(), 3);
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let buffer = Arc::new(FrameBuffer::new());
        let released = Arc::new(AtomicUsize::new(0));
        let mut broken = small_frame();
        broken.data.clear();
        let script = vec![Ok(small_frame()), Ok(broken), Ok(small_frame())];
        let handle = spawn_capture_loop(
            move || Ok(ScriptedDevice::boxed(script, released)),
            buffer.clone(),
            fast_settings(),
        )
        .unwrap();

        handle.join();
        assert_eq!(buffer.version(), 2);
    }

    #[tokio::test]
    async fn panicking_device_closes_buffer_and_wakes_waiters() {
        let buffer = Arc::new(FrameBuffer::new());
        let released = Arc::new(AtomicUsize::new(0));

        struct Faulty {
            reads: u32,
            released: Arc<AtomicUsize>,
        }
        impl CameraDevice for Faulty {
            fn read_frame(&mut self) -> Result<Frame, CaptureError> {
                self.reads += 1;
                if self.reads > 1 {
                    panic!("driver fault");
                }
                Ok(small_frame())
            }
            fn describe(&self) -> String {
                "faulty".into()
            }
        }
        impl Drop for Faulty {
            fn drop(&mut self) {
                self.released.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handle = spawn_capture_loop(
            {
                let released = released.clone();
                move || Ok(Box::new(Faulty { reads: 0, released }) as Box<dyn CameraDevice>)
            },
            buffer.clone(),
            fast_settings(),
        )
        .unwrap();

        let first = timeout(Duration::from_secs(2), buffer.wait_for_newer(0))
            .await
            .unwrap();
        let after = first.map_or(0, |snapshot| snapshot.version);
        let woke = timeout(Duration::from_secs(2), buffer.wait_for_newer(after))
            .await
            .unwrap();
        assert!(woke.is_none());
        assert!(buffer.is_closed());
        assert!(!buffer.is_active());
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let exit = tokio::task::spawn_blocking(move || handle.join()).await.unwrap();
        assert!(matches!(exit, CaptureExit::Panicked));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_releases_device_and_wakes_sessions() {
        let buffer = Arc::new(FrameBuffer::new());
        let released = Arc::new(AtomicUsize::new(0));

        struct Endless {
            pattern: TestPattern,
            released: Arc<AtomicUsize>,
        }
        impl CameraDevice for Endless {
            fn read_frame(&mut self) -> Result<Frame, CaptureError> {
                self.pattern.read_frame()
            }
            fn describe(&self) -> String {
                "endless".into()
            }
        }
        impl Drop for Endless {
            fn drop(&mut self) {
                self.released.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handle = spawn_capture_loop(
            {
                let released = released.clone();
                move || {
                    Ok(Box::new(Endless {
                        pattern: TestPattern::new(8, 8),
                        released,
                    }) as Box<dyn CameraDevice>)
                }
            },
            buffer.clone(),
            fast_settings(),
        )
        .unwrap();

        let first = timeout(Duration::from_secs(2), buffer.wait_for_newer(0))
            .await
            .unwrap()
            .unwrap();
        assert!(buffer.is_active());

        let waiter = tokio::spawn({
            let buffer = buffer.clone();
            async move {
                let mut last = first.version;
                let mut delivered = 0usize;
                while let Some(snapshot) = buffer.wait_for_newer(last).await {
                    assert!(snapshot.version > last);
                    last = snapshot.version;
                    delivered += 1;
                }
                delivered
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let exit = tokio::task::spawn_blocking(move || handle.stop()).await.unwrap();
        assert!(matches!(exit, CaptureExit::Stopped));

        timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert!(!buffer.is_active());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}

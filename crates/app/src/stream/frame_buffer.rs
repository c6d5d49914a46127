//! Single-writer, multi-reader holder for the most recent encoded frame.
//!
//! The capture thread is the only writer. Stream sessions either take a
//! non-blocking snapshot with [`FrameBuffer::read`] or suspend in
//! [`FrameBuffer::wait_for_newer`] until the version moves past the one they
//! last delivered. Frames are swapped as whole `Bytes` values, so a reader
//! never observes a partially written image.

use actix_web::web::Bytes;
use tokio::sync::watch;

/// Encoded frame together with the version it was published under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameSnapshot {
    pub(crate) jpeg: Bytes,
    pub(crate) version: u64,
}

#[derive(Clone, Debug, Default)]
struct BufferState {
    frame: Option<Bytes>,
    version: u64,
    active: bool,
    closed: bool,
}

pub(crate) struct FrameBuffer {
    state: watch::Sender<BufferState>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(BufferState::default());
        Self { state }
    }

    /// Replace the latest frame and wake every waiting reader.
    ///
    /// Returns the new version, or `None` once the buffer has been closed.
    pub(crate) fn publish(&self, jpeg: Bytes) -> Option<u64> {
        let mut published = None;
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.version += 1;
            state.frame = Some(jpeg);
            published = Some(state.version);
            true
        });
        published
    }

    /// Latest frame without waiting. `None` until the first publish.
    pub(crate) fn read(&self) -> Option<FrameSnapshot> {
        let state = self.state.borrow();
        state.frame.as_ref().map(|jpeg| FrameSnapshot {
            jpeg: jpeg.clone(),
            version: state.version,
        })
    }

    /// Suspend until a frame newer than `after_version` exists.
    ///
    /// Resolves to `None` when the buffer is closed, even if an undelivered
    /// frame is still held.
    pub(crate) async fn wait_for_newer(&self, after_version: u64) -> Option<FrameSnapshot> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| {
                state.closed || (state.version > after_version && state.frame.is_some())
            })
            .await
            .ok()?;
        if state.closed {
            return None;
        }
        state.frame.as_ref().map(|jpeg| FrameSnapshot {
            jpeg: jpeg.clone(),
            version: state.version,
        })
    }

    /// Flag the device as open. Refused once the buffer has been closed.
    pub(crate) fn mark_active(&self) -> bool {
        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if state.closed || state.active {
                accepted = !state.closed;
                return false;
            }
            state.active = true;
            accepted = true;
            true
        });
        accepted
    }

    /// Tear the buffer down: capture is inactive from now on and every
    /// waiter is released. Idempotent.
    pub(crate) fn close(&self) {
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.active = false;
            state.closed = true;
            true
        });
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub(crate) fn version(&self) -> u64 {
        self.state.borrow().version
    }
}

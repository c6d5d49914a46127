//! Per-viewer multipart stream.
//!
//! A session is a lazy, infinite sequence of `multipart/x-mixed-replace`
//! parts. It suspends in [`FrameBuffer::wait_for_newer`] between frames and
//! ends when capture stops or when the HTTP runtime drops the stream because
//! the client went away.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use actix_web::web::Bytes;
use async_stream::stream;
use futures_util::stream::Stream;
use tracing::debug;

use crate::stream::frame_buffer::FrameBuffer;

pub(crate) const BOUNDARY: &str = "frame";
pub(crate) const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a session stopped delivering frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    CaptureStopped,
    ClientDisconnected,
}

pub(crate) struct StreamSession {
    id: u64,
    buffer: Arc<FrameBuffer>,
    last_seen_version: u64,
}

impl StreamSession {
    pub(crate) fn new(buffer: Arc<FrameBuffer>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            buffer,
            last_seen_version: 0,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Turn the session into the response body stream.
    pub(crate) fn into_stream(self) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
        stream! {
            let mut session = self;
            let mut guard = SessionGuard::open(session.id);
            while let Some(snapshot) = session.buffer.wait_for_newer(session.last_seen_version).await {
                session.last_seen_version = snapshot.version;
                guard.delivered += 1;
                metrics::counter!("assistant_stream_chunks_total").increment(1);
                yield Ok(multipart_chunk(&snapshot.jpeg));
            }
            guard.end = SessionEnd::CaptureStopped;
        }
    }
}

/// Accounts for a live session and logs how it ended when dropped.
struct SessionGuard {
    id: u64,
    delivered: u64,
    end: SessionEnd,
}

impl SessionGuard {
    fn open(id: u64) -> Self {
        metrics::gauge!("assistant_stream_sessions").increment(1.0);
        debug!(session = id, "viewer connected");
        Self {
            id,
            delivered: 0,
            end: SessionEnd::ClientDisconnected,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        metrics::gauge!("assistant_stream_sessions").decrement(1.0);
        debug!(
            session = self.id,
            delivered = self.delivered,
            reason = ?self.end,
            "stream session ended"
        );
    }
}

/// Frame one JPEG as a multipart part.
pub(crate) fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut payload = Vec::with_capacity(header.len() + jpeg.len() + 2);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

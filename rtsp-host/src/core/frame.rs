use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame range {offset}+{length} exceeds buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },
}

/// One elementary-stream access unit as delivered by the session.
///
/// The buffer is shared, so a session can hand over its receive buffer
/// without copying; `bytes()` exposes only the `offset..offset + length` window.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
    timestamp_us: i64,
}

impl Frame {
    pub fn new(
        data: Arc<Vec<u8>>,
        offset: usize,
        length: usize,
        timestamp_us: i64,
    ) -> Result<Self, FrameError> {
        match offset.checked_add(length) {
            Some(end) if end <= data.len() => Ok(Self {
                data,
                offset,
                length,
                timestamp_us,
            }),
            _ => Err(FrameError::OutOfBounds {
                offset,
                length,
                size: data.len(),
            }),
        }
    }

    /// Frame covering the whole buffer
    pub fn from_vec(data: Vec<u8>, timestamp_us: i64) -> Self {
        let length = data.len();
        Self {
            data: Arc::new(data),
            offset: 0,
            length,
            timestamp_us,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    pub fn data(&self) -> &Arc<Vec<u8>> {
        &self.data
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }
}

/// Represents a single decoded video frame with YUV I420 data
#[derive(Clone)]
pub struct FrameData {
    pub width: u32,
    pub height: u32,
    pub y_plane: Arc<Vec<u8>>,
    pub u_plane: Arc<Vec<u8>>,
    pub v_plane: Arc<Vec<u8>>,
    pub y_stride: usize,
    pub uv_stride: usize,
    pub timestamp_us: i64,
}

/// Display surface the video decoder renders into.
///
/// Holds at most 1 pending frame. If a new frame arrives before
/// the previous one is consumed, the old frame is dropped (to minimize latency).
/// The last presented frame is kept for snapshots.
pub struct Surface {
    pending_frame: Mutex<Option<FrameData>>,
    last_frame: Mutex<Option<FrameData>>,
    frame_count: AtomicU64,
}

impl Surface {
    pub fn new() -> Self {
        Self {
            pending_frame: Mutex::new(None),
            last_frame: Mutex::new(None),
            frame_count: AtomicU64::new(0),
        }
    }

    /// Present a new frame, replacing any pending frame.
    /// Returns true if the previous frame was skipped
    pub fn present(&self, frame: FrameData) -> bool {
        if let Ok(mut last) = self.last_frame.try_lock() {
            *last = Some(frame.clone());
        }
        if let Ok(mut pending) = self.pending_frame.try_lock() {
            let skipped = pending.is_some();
            *pending = Some(frame);
            self.frame_count.fetch_add(1, Ordering::Relaxed);
            skipped
        } else {
            // Lock contention - drop this frame to avoid blocking the decoder
            true
        }
    }

    /// Consume the pending frame, if any
    pub fn consume(&self) -> Option<FrameData> {
        self.pending_frame
            .try_lock()
            .ok()
            .and_then(|mut p| p.take())
    }

    /// Last frame presented, kept after `consume`
    pub fn last_frame(&self) -> Option<FrameData> {
        self.last_frame.lock().ok().and_then(|f| f.clone())
    }

    /// Total frames presented
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_frame(ts: i64) -> FrameData {
        FrameData {
            width: 2,
            height: 2,
            y_plane: Arc::new(vec![16; 4]),
            u_plane: Arc::new(vec![128]),
            v_plane: Arc::new(vec![128]),
            y_stride: 2,
            uv_stride: 1,
            timestamp_us: ts,
        }
    }

    #[test]
    fn frame_rejects_range_past_buffer() {
        let data = Arc::new(vec![1, 2, 3]);
        assert_eq!(
            Frame::new(data.clone(), 2, 2, 0).unwrap_err(),
            FrameError::OutOfBounds {
                offset: 2,
                length: 2,
                size: 3
            }
        );
        assert!(Frame::new(data.clone(), usize::MAX, 2, 0).is_err());

        let frame = Frame::new(data, 1, 2, 40).unwrap();
        assert_eq!(frame.bytes(), &[2, 3]);
        assert_eq!(frame.timestamp_us(), 40);
    }

    #[test]
    fn surface_keeps_only_latest_pending_frame() {
        let surface = Surface::new();
        assert!(!surface.present(tiny_frame(1)));
        assert!(surface.present(tiny_frame(2)));

        let frame = surface.consume().unwrap();
        assert_eq!(frame.timestamp_us, 2);
        assert!(surface.consume().is_none());
        assert_eq!(surface.last_frame().unwrap().timestamp_us, 2);
        assert_eq!(surface.frame_count(), 2);
    }
}

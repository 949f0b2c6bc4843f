use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use gnbwatch_protocol::TelemetryFrame;

/// Read-only view of buffered telemetry, for consumers such as renderers.
pub trait FrameSource: Send + Sync {
    /// Number of frames appended so far.
    fn len(&self) -> usize;

    /// Whether no frame has been appended yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames at positions `from..`, in delivery order.
    fn snapshot_since(&self, from: usize) -> Vec<Arc<TelemetryFrame>>;
}

/// Append-only, shareable sequence of telemetry frames.
///
/// Cloning the buffer clones the handle, not the frames. The lock is held
/// only for the push or for copying out frame pointers, never while a
/// consumer walks a snapshot. Once [`seal`](Self::seal) returns, every
/// further append is refused.
#[derive(Debug, Clone, Default)]
pub struct TelemetryBuffer {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    frames: RwLock<Vec<Arc<TelemetryFrame>>>,
    sealed: AtomicBool,
}

impl TelemetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame. Returns `false` if the buffer has been sealed.
    pub fn append(&self, frame: TelemetryFrame) -> bool {
        let mut frames = self
            .inner
            .frames
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.sealed.load(Ordering::Acquire) {
            return false;
        }
        frames.push(Arc::new(frame));
        true
    }

    /// Refuses further appends. Waits for an append already holding the
    /// lock to finish, so nothing lands after this returns.
    pub fn seal(&self) {
        let _frames = self
            .inner
            .frames
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner
            .frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every frame appended before this call, in delivery order.
    pub fn snapshot(&self) -> Vec<Arc<TelemetryFrame>> {
        self.snapshot_since(0)
    }

    /// Frames at positions `from..`. Empty when `from` is past the end.
    pub fn snapshot_since(&self, from: usize) -> Vec<Arc<TelemetryFrame>> {
        let frames = self
            .inner
            .frames
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        frames.get(from..).map(<[_]>::to_vec).unwrap_or_default()
    }
}

impl FrameSource for TelemetryBuffer {
    fn len(&self) -> usize {
        TelemetryBuffer::len(self)
    }

    fn snapshot_since(&self, from: usize) -> Vec<Arc<TelemetryFrame>> {
        TelemetryBuffer::snapshot_since(self, from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnbwatch_protocol::Timestamp;

    fn frame(ts: i64) -> TelemetryFrame {
        TelemetryFrame {
            timestamp: Timestamp::Int(ts),
            ues: Vec::new(),
            extra: Default::default(),
        }
    }

    fn timestamps(frames: &[Arc<TelemetryFrame>]) -> Vec<i64> {
        frames
            .iter()
            .map(|f| match f.timestamp {
                Timestamp::Int(v) => v,
                _ => panic!("unexpected timestamp"),
            })
            .collect()
    }

    #[test]
    fn append_preserves_delivery_order() {
        let buf = TelemetryBuffer::new();
        for ts in [3, 1, 2, 2] {
            assert!(buf.append(frame(ts)));
        }
        assert_eq!(timestamps(&buf.snapshot()), vec![3, 1, 2, 2]);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_appends() {
        let buf = TelemetryBuffer::new();
        buf.append(frame(1));
        buf.append(frame(2));
        let snap = buf.snapshot();
        buf.append(frame(3));
        assert_eq!(timestamps(&snap), vec![1, 2]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn snapshot_since_returns_tail() {
        let buf = TelemetryBuffer::new();
        for ts in 0..5 {
            buf.append(frame(ts));
        }
        assert_eq!(timestamps(&buf.snapshot_since(3)), vec![3, 4]);
        assert!(buf.snapshot_since(5).is_empty());
        assert!(buf.snapshot_since(99).is_empty());
    }

    #[test]
    fn sealed_buffer_refuses_appends() {
        let buf = TelemetryBuffer::new();
        buf.append(frame(1));
        buf.seal();
        assert!(buf.is_sealed());
        assert!(!buf.append(frame(2)));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn clones_share_frames() {
        let buf = TelemetryBuffer::new();
        let other = buf.clone();
        other.append(frame(7));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn snapshot_during_concurrent_appends_sees_a_prefix() {
        let buf = TelemetryBuffer::new();
        let writer = {
            let buf = buf.clone();
            std::thread::spawn(move || {
                for ts in 0..2_000 {
                    buf.append(frame(ts));
                }
            })
        };

        // Every snapshot must be an in-order prefix of the final sequence.
        for _ in 0..200 {
            let snap = timestamps(&buf.snapshot());
            let expected: Vec<i64> = (0..snap.len() as i64).collect();
            assert_eq!(snap, expected);
        }

        writer.join().unwrap();
        let n = 2_000usize;
        assert_eq!(buf.len(), n);
        // A snapshot taken after N appends holds exactly those N frames.
        assert_eq!(buf.snapshot().len(), n);
    }

    #[test]
    fn frame_source_view() {
        let buf = TelemetryBuffer::new();
        let source: &dyn FrameSource = &buf;
        assert!(source.is_empty());
        buf.append(frame(1));
        assert_eq!(source.len(), 1);
        assert_eq!(source.snapshot_since(0).len(), 1);
    }
}

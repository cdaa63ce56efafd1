use crate::frame::CapturedFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// Bounded overwrite-oldest buffer of recent frames for one camera
///
/// One writer (the camera's worker) and arbitrarily many readers. Slots are
/// individually locked so a reader only ever contends on the single slot it
/// touches; the write cursor is advanced after the slot is filled so
/// `latest()` never observes a half-written entry.
pub struct FrameRing {
    slots: Vec<RwLock<Option<CapturedFrame>>>,
    write_count: AtomicU64,
    capacity: usize,
    stats: FrameRingStats,
}

/// Push/overrun counters for monitoring
#[derive(Debug, Default)]
struct FrameRingStats {
    frames_pushed: AtomicU64,
    overruns: AtomicU64,
}

/// Snapshot of ring statistics
#[derive(Debug, Clone, Copy)]
pub struct FrameRingStatsSnapshot {
    pub frames_pushed: u64,
    pub overruns: u64,
}

impl FrameRing {
    /// Create a ring with the given capacity
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Frame ring capacity must be greater than 0");

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(RwLock::new(None));
        }

        Self {
            slots,
            write_count: AtomicU64::new(0),
            capacity,
            stats: FrameRingStats::default(),
        }
    }

    /// Push a frame, evicting the oldest entry when at capacity
    pub async fn push(&self, frame: CapturedFrame) {
        let count = self.write_count.load(Ordering::Acquire);
        let index = (count % self.capacity as u64) as usize;

        trace!("Pushing frame into ring slot {}", index);

        {
            let mut slot = self.slots[index].write().await;
            if slot.is_some() {
                self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            }
            *slot = Some(frame);
        }

        // Publish the new cursor only after the slot holds the frame
        self.write_count.store(count + 1, Ordering::Release);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// The most recently pushed frame, or `None` if nothing was ever pushed
    pub async fn latest(&self) -> Option<CapturedFrame> {
        let count = self.write_count.load(Ordering::Acquire);
        if count == 0 {
            return None;
        }

        let index = ((count - 1) % self.capacity as u64) as usize;
        let slot = self.slots[index].read().await;
        slot.clone()
    }

    /// All held frames, oldest first
    pub async fn snapshot(&self) -> Vec<CapturedFrame> {
        let count = self.write_count.load(Ordering::Acquire);
        let start = count.saturating_sub(self.capacity as u64);

        let mut frames = Vec::with_capacity((count - start) as usize);
        for i in start..count {
            let index = (i % self.capacity as u64) as usize;
            let slot = self.slots[index].read().await;
            if let Some(frame) = slot.as_ref() {
                frames.push(frame.clone());
            }
        }
        frames
    }

    /// Number of frames currently held, never above capacity
    pub fn len(&self) -> usize {
        let count = self.write_count.load(Ordering::Acquire);
        (count.min(self.capacity as u64)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.write_count.load(Ordering::Acquire) == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FrameRingStatsSnapshot {
        FrameRingStatsSnapshot {
            frames_pushed: self.stats.frames_pushed.load(Ordering::Relaxed),
            overruns: self.stats.overruns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SourceKind;
    use image::RgbImage;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn test_frame(seq: u64) -> CapturedFrame {
        CapturedFrame::new(
            RgbImage::new(4, 4),
            SystemTime::UNIX_EPOCH + Duration::from_secs(seq),
            SourceKind::Rtsp,
        )
    }

    fn frame_seq(frame: &CapturedFrame) -> u64 {
        frame
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[tokio::test]
    async fn test_empty_ring() {
        let ring = FrameRing::new(5);
        assert!(ring.latest().await.is_none());
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
        assert!(ring.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_latest_tracks_most_recent_push() {
        let ring = FrameRing::new(3);
        for seq in 1..=2 {
            ring.push(test_frame(seq)).await;
            let latest = ring.latest().await.unwrap();
            assert_eq!(frame_seq(&latest), seq);
        }
        assert_eq!(ring.len(), 2);
    }

    #[tokio::test]
    async fn test_len_is_min_of_pushes_and_capacity() {
        let capacity = 4;
        let ring = FrameRing::new(capacity);

        for n in 1..=10u64 {
            ring.push(test_frame(n)).await;
            assert_eq!(ring.len(), (n as usize).min(capacity));
            assert_eq!(frame_seq(&ring.latest().await.unwrap()), n);
        }
    }

    #[tokio::test]
    async fn test_overwrite_discards_oldest() {
        let ring = FrameRing::new(3);
        for seq in 1..=5 {
            ring.push(test_frame(seq)).await;
        }

        let frames = ring.snapshot().await;
        let seqs: Vec<u64> = frames.iter().map(frame_seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);

        let stats = ring.stats();
        assert_eq!(stats.frames_pushed, 5);
        assert_eq!(stats.overruns, 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_oldest_first_before_wraparound() {
        let ring = FrameRing::new(5);
        for seq in 1..=3 {
            ring.push(test_frame(seq)).await;
        }
        let seqs: Vec<u64> = ring.snapshot().await.iter().map(frame_seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ = FrameRing::new(0);
    }

    #[tokio::test]
    async fn test_concurrent_readers_never_observe_invalid_state() {
        let ring = Arc::new(FrameRing::new(8));
        let capacity = ring.capacity();

        let writer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move {
                for seq in 1..=200 {
                    ring.push(test_frame(seq)).await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let ring = Arc::clone(&ring);
            readers.push(tokio::spawn(async move {
                let mut last_seen = 0u64;
                for _ in 0..100 {
                    assert!(ring.len() <= capacity);
                    if let Some(frame) = ring.latest().await {
                        let seq = frame_seq(&frame);
                        // Frames arrive in push order; latest never goes backwards
                        assert!(seq >= last_seen);
                        last_seen = seq;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(frame_seq(&ring.latest().await.unwrap()), 200);
        assert_eq!(ring.stats().frames_pushed, 200);
    }
}

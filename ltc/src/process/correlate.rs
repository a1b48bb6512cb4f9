use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};

use crate::structs::event::{SyncPoint, WallClock};

/// Default ring capacity in sync points, one per host period.
pub const DEFAULT_SYNC_CAPACITY: usize = 256;

/// Entries kept free when the consumer falls behind.
const OVERFLOW_HEADROOM: usize = 16;

/// Sync points kept while no frames are being correlated.
const IDLE_KEEP: usize = 8;

/// Creates the sync-point ring shared by the real-time context and the
/// consumer.
pub fn correlator_channel(capacity: usize) -> (SyncWriter, ClockCorrelator) {
    let capacity = capacity.max(OVERFLOW_HEADROOM + 2);
    let (producer, consumer) = HeapRb::new(capacity).split();
    let skipped = Arc::new(AtomicUsize::new(0));
    (
        SyncWriter {
            producer,
            skipped: skipped.clone(),
        },
        ClockCorrelator {
            consumer,
            snapshot: Vec::with_capacity(capacity),
            processed: 0,
            capacity,
            skipped,
            reported_skips: 0,
        },
    )
}

/// Real-time end of the sync-point ring.
pub struct SyncWriter {
    producer: HeapProd<SyncPoint>,
    skipped: Arc<AtomicUsize>,
}

impl SyncWriter {
    /// Appends a sync point. When the ring is full the point is dropped and
    /// counted; this never blocks.
    #[inline]
    pub fn push(&mut self, point: SyncPoint) -> bool {
        if self.producer.try_push(point).is_ok() {
            true
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

/// Which pair of sync points to extrapolate from when no pair brackets an
/// offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extrapolate {
    /// Oldest pair that is still in use, for frame start offsets.
    Oldest,
    /// Newest pair, for frame end offsets.
    Newest,
}

/// Maps monotonic sample offsets to wall-clock time.
///
/// Call [`refresh`](Self::refresh) once per consumer pass, correlate every
/// frame of the pass, then [`retire`](Self::retire) the sync points no
/// longer needed.
pub struct ClockCorrelator {
    consumer: HeapCons<SyncPoint>,
    snapshot: Vec<SyncPoint>,
    processed: usize,
    capacity: usize,
    skipped: Arc<AtomicUsize>,
    reported_skips: usize,
}

impl ClockCorrelator {
    /// Copies the available sync points without removing them from the
    /// ring. Returns how many are available.
    pub fn refresh(&mut self) -> usize {
        self.snapshot.clear();
        self.snapshot.extend(self.consumer.iter().copied());
        self.processed = 0;

        let skipped = self.skipped.load(Ordering::Relaxed);
        if skipped != self.reported_skips {
            warn!(
                "Sync ring full, {} sync point(s) dropped",
                skipped - self.reported_skips
            );
            self.reported_skips = skipped;
        }
        self.snapshot.len()
    }

    pub fn available(&self) -> usize {
        self.snapshot.len()
    }

    /// Sync points dropped by the writer so far.
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Wall clock at `offset`: the sync point's own wall clock on an exact
    /// hit, otherwise interpolated between the two sync points that
    /// bracket it or extrapolated from the pair chosen by `mode`. `None`
    /// with fewer than two sync points.
    ///
    /// Sync points strictly before `offset` are marked as consumed.
    pub fn interpolate(&mut self, offset: i64, mode: Extrapolate) -> Option<WallClock> {
        let n = self.snapshot.len();
        if n < 2 {
            return None;
        }

        let mut bracket = None;
        for i in 0..n - 1 {
            let (s0, s1) = (&self.snapshot[i], &self.snapshot[i + 1]);
            if s0.sample_count < offset {
                if mode == Extrapolate::Oldest {
                    self.processed = i;
                }
                if s1.sample_count > offset {
                    bracket = Some(i);
                }
            }
        }

        if bracket.is_none() {
            // on a sync point its own wall clock is exact
            if let Some(hit) = self.snapshot.iter().find(|p| p.sample_count == offset) {
                return Some(hit.wallclock);
            }
        }

        let i = match (bracket, mode) {
            (Some(i), _) => i,
            (None, Extrapolate::Oldest) => self.processed,
            (None, Extrapolate::Newest) => n - 2,
        };
        Some(interpolate_between(
            &self.snapshot[i],
            &self.snapshot[i + 1],
            offset,
        ))
    }

    /// Wall-clock times of a frame's start and end offsets.
    pub fn correlate(&mut self, off_start: i64, off_end: i64) -> Option<(WallClock, WallClock)> {
        let start = self.interpolate(off_start, Extrapolate::Oldest)?;
        let end = self.interpolate(off_end, Extrapolate::Newest)?;
        Some((start, end))
    }

    /// Drops consumed sync points, and more when the ring is close to full.
    pub fn retire(&mut self) {
        let mut count = self.processed;
        let avail = self.snapshot.len();
        if avail > self.capacity - OVERFLOW_HEADROOM {
            count += avail - (self.capacity - OVERFLOW_HEADROOM);
        }
        self.advance(count);
    }

    /// Drops a single sync point when more than a few are buffered, used
    /// while nothing is being correlated.
    pub fn retire_idle(&mut self) {
        if self.snapshot.len() > IDLE_KEEP {
            self.processed = 1;
        } else {
            self.processed = 0;
        }
        self.retire();
    }

    fn advance(&mut self, count: usize) {
        let count = count.min(self.consumer.occupied_len());
        if count > 0 {
            self.consumer.skip(count);
        }
        self.processed = 0;
    }
}

/// Linear interpolation (or extrapolation) of wall clock at `offset`.
pub fn interpolate_between(s0: &SyncPoint, s1: &SyncPoint, offset: i64) -> WallClock {
    let span = s1.sample_count - s0.sample_count;
    if span == 0 {
        return s0.wallclock;
    }
    let fact = (offset - s0.sample_count) as f64 / span as f64;
    s0.wallclock + (s1.wallclock - s0.wallclock).scale(fact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(count: i64, secs: f64) -> SyncPoint {
        SyncPoint {
            sample_count: count,
            wallclock: WallClock::from_secs_f64(secs),
        }
    }

    #[test]
    fn exact_at_sync_points_and_midpoint_between() {
        let (mut writer, mut corr) = correlator_channel(64);
        for p in [point(0, 10.0), point(1000, 11.0), point(2000, 13.0)] {
            assert!(writer.push(p));
        }
        assert_eq!(corr.refresh(), 3);

        for mode in [Extrapolate::Oldest, Extrapolate::Newest] {
            assert_eq!(corr.interpolate(1000, mode), Some(WallClock::new(11, 0)));
            assert_eq!(corr.interpolate(1500, mode), Some(WallClock::new(12, 0)));
            assert_eq!(corr.interpolate(500, mode), Some(WallClock::new(10, 500_000_000)));
        }
    }

    #[test]
    fn exact_hit_on_interior_point_with_jitter() {
        let (mut writer, mut corr) = correlator_channel(64);
        for p in [point(0, 10.0), point(1000, 11.0), point(2000, 13.0), point(3000, 14.0)] {
            writer.push(p);
        }
        corr.refresh();

        for mode in [Extrapolate::Oldest, Extrapolate::Newest] {
            assert_eq!(corr.interpolate(1000, mode), Some(WallClock::new(11, 0)));
            assert_eq!(corr.interpolate(2000, mode), Some(WallClock::new(13, 0)));
        }
        let (start, end) = corr.correlate(500, 1000).expect("two points");
        assert_eq!(start, WallClock::new(10, 500_000_000));
        assert_eq!(end, WallClock::new(11, 0));
    }

    #[test]
    fn extrapolates_outside_the_window() {
        let (mut writer, mut corr) = correlator_channel(64);
        for p in [point(0, 0.0), point(1000, 1.0), point(2000, 2.5)] {
            writer.push(p);
        }
        corr.refresh();
        // before the oldest point: oldest pair
        assert_eq!(
            corr.interpolate(-500, Extrapolate::Oldest),
            Some(WallClock::from_secs_f64(-0.5))
        );
        // after the newest point: newest pair
        assert_eq!(
            corr.interpolate(3000, Extrapolate::Newest),
            Some(WallClock::new(4, 0))
        );
    }

    #[test]
    fn needs_two_points() {
        let (mut writer, mut corr) = correlator_channel(64);
        writer.push(point(0, 0.0));
        corr.refresh();
        assert_eq!(corr.correlate(10, 20), None);
    }

    #[test]
    fn retire_drops_consumed_points() {
        let (mut writer, mut corr) = correlator_channel(64);
        for i in 0..10 {
            writer.push(point(i * 100, i as f64));
        }
        corr.refresh();
        corr.correlate(550, 640).unwrap();
        corr.retire();
        // points 0..4 are strictly before 550, the pair (500, 600) is kept
        assert_eq!(corr.refresh(), 5);
    }

    #[test]
    fn full_ring_skips_and_forces_advance() {
        let (mut writer, mut corr) = correlator_channel(32);
        let pushed = (0..40).filter(|i| writer.push(point(i * 10, *i as f64))).count();
        assert_eq!(pushed, 32);
        assert_eq!(corr.refresh(), 32);
        assert_eq!(corr.skipped(), 8);
        corr.retire();
        assert_eq!(corr.refresh(), 16);
    }

    #[test]
    fn idle_retire_keeps_a_few() {
        let (mut writer, mut corr) = correlator_channel(64);
        for i in 0..10 {
            writer.push(point(i, 0.0));
        }
        corr.refresh();
        corr.retire_idle();
        assert_eq!(corr.refresh(), 9);
        corr.retire_idle();
        assert_eq!(corr.refresh(), 8);
        corr.retire_idle();
        assert_eq!(corr.refresh(), 8);
    }
}

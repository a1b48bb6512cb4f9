//! Generator clock discipline
//!
//! Keeps an emitted LTC stream phase-locked to the wall clock. At start the
//! first frame is aligned to the next host period, the sub-frame phase is
//! turned into a latency offset that [`LatencyAligner`] removes in the
//! real-time context, and [`DriftCompensator::measure`] later compares what
//! is being played with the clock.

use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use ringbuf::traits::*;

use crate::structs::event::WallClock;
use crate::structs::framerate::FrameRate;
use crate::structs::timecode::{DateStamp, Timecode};

/// Samples kept buffered ahead of the real-time output stage.
pub const DEFAULT_PRECACHE: usize = 8192;

/// Drift beyond which a resync is requested, in milliseconds.
pub const DEFAULT_DRIFT_LIMIT_MS: i64 = 40;

/// Fine slack subtracted from the start phase, in seconds. Covers the time
/// between capturing the clock and the first audible sample.
const START_SLACK_SECS: f64 = 0.0008;

const MS_PER_DAY: i64 = 86_400_000;

/// Where the generated timecode starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Time of day, UTC, as of the next host period.
    Now,
    /// A fixed timecode; drift is measured relative to when it started.
    Timecode(Timecode),
}

/// Outcome of [`DriftCompensator::plan_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    /// First frame to encode.
    pub timecode: Timecode,
    /// Initial output latency in samples. Negative values mean the head of
    /// the stream lies in the past and must be skipped.
    pub phase_offset_samples: i64,
    /// Timecode minus wall clock at sync time.
    pub sync_offset_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftReport {
    /// Played timecode minus wall clock, in milliseconds.
    pub ms: i64,
    /// Same, in whole frames.
    pub frames: i64,
    /// `ms` is outside the configured limit.
    pub exceeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSettings {
    pub sample_rate: u32,
    pub rate: FrameRate,
    pub drift_limit_ms: i64,
    pub auto_resync: bool,
}

impl DriftSettings {
    pub fn new(sample_rate: u32, rate: FrameRate) -> Self {
        Self {
            sample_rate,
            rate,
            drift_limit_ms: DEFAULT_DRIFT_LIMIT_MS,
            auto_resync: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriftCompensator {
    settings: DriftSettings,
    sync_offset_ms: i64,
}

impl DriftCompensator {
    pub fn new(settings: DriftSettings) -> Self {
        Self {
            settings,
            sync_offset_ms: 0,
        }
    }

    pub fn settings(&self) -> &DriftSettings {
        &self.settings
    }

    pub fn sync_offset_ms(&self) -> i64 {
        self.sync_offset_ms
    }

    /// Plans the start of the stream from the wall clock `captured` at the
    /// beginning of the first host period of `period` samples.
    pub fn plan_sync(&mut self, captured: WallClock, period: u32, mode: &StartMode) -> SyncPlan {
        let sr = self.settings.sample_rate.max(1) as i64;
        let rate = self.settings.rate;
        let mut sync_ms = captured.ms_of_day();

        let plan = match mode {
            StartMode::Now => {
                // the first period is silent, start with the next one
                let period_ms = period as i64 * 1000 / sr;
                sync_ms += period_ms;

                let sync_at = captured + WallClock::from_nanos(period_ms as i128 * 1_000_000);
                let date = sync_at
                    .to_utc()
                    .map(|t| t.date_naive())
                    .unwrap_or(NaiveDate::MIN);
                let timecode = timecode_of_day(sync_ms, &rate, date);

                let ms_in_sec = sync_ms.rem_euclid(1000);
                let frame_start_ms =
                    1000 * timecode.frames as i64 * rate.den as i64 / rate.num.max(1) as i64;
                let foff = frame_start_ms - ms_in_sec;
                let phase = (foff * sr / 1000) as f64 - START_SLACK_SECS * sr as f64;

                SyncPlan {
                    timecode,
                    phase_offset_samples: phase as i64,
                    sync_offset_ms: period_ms,
                }
            }
            StartMode::Timecode(timecode) => SyncPlan {
                timecode: *timecode,
                phase_offset_samples: 0,
                sync_offset_ms: timecode.to_ms(&rate) as i64 - sync_ms,
            },
        };

        debug!(
            "Sync planned at {} ms of day: {} (phase {} samples, offset {} ms)",
            sync_ms, plan.timecode, plan.phase_offset_samples, plan.sync_offset_ms
        );
        self.sync_offset_ms = plan.sync_offset_ms;
        plan
    }

    /// Difference between the timecode being played and the wall clock.
    ///
    /// `frame_ms` is the position of the next frame to be encoded, `buffered`
    /// the samples queued ahead of the output and `current_latency` the
    /// latency the real-time side currently accounts for.
    pub fn measure(
        &self,
        frame_ms: f64,
        buffered: usize,
        current_latency: i64,
        now: WallClock,
    ) -> DriftReport {
        let sr = self.settings.sample_rate.max(1) as i64;
        let mut ms = frame_ms as i64;
        ms -= (buffered as i64 + current_latency) * 1000 / sr;
        ms -= self.sync_offset_ms;
        ms -= now.ms_of_day();
        // a day boundary between the two clocks is not drift
        let ms = (ms + MS_PER_DAY / 2).rem_euclid(MS_PER_DAY) - MS_PER_DAY / 2;

        let frames = (ms as f64 * self.settings.rate.fps() / 1000.0) as i64;
        DriftReport {
            ms,
            frames,
            exceeded: ms.abs() > self.settings.drift_limit_ms,
        }
    }

    /// Whether `report` should re-initialise the sync.
    pub fn should_resync(&self, report: &DriftReport) -> bool {
        if report.exceeded && self.settings.auto_resync {
            info!(
                "Drift {:+} ms exceeds {} ms, resyncing",
                report.ms, self.settings.drift_limit_ms
            );
            return true;
        }
        false
    }
}

/// Timecode at `ms` milliseconds since midnight, digit for digit.
fn timecode_of_day(ms: i64, rate: &FrameRate, date: NaiveDate) -> Timecode {
    let ms = ms.rem_euclid(MS_PER_DAY);
    let secs = ms / 1000;
    let frames = ((ms % 1000) as f64 * rate.fps() / 1000.0).floor() as u8;
    let mut timecode = Timecode {
        date: (date.year() >= 2000).then(|| DateStamp::from(date)),
        timezone: Some(0),
        ..Timecode::new(
            (secs / 3600) as u8,
            ((secs / 60) % 60) as u8,
            (secs % 60) as u8,
            frames,
        )
    };
    // labels 00 and 01 do not exist at the start of most drop-frame minutes
    if rate.drop_frame
        && rate.nominal() == 30
        && timecode.seconds == 0
        && timecode.minutes % 10 != 0
        && timecode.frames < 2
    {
        timecode.frames = 2;
    }
    timecode
}

/// What the real-time stage did with one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOutcome {
    /// Silence while the latency offset is being closed.
    Aligning,
    Played,
    /// Not enough buffered samples; silence was written.
    Underrun,
}

/// Real-time latency alignment of the output ring.
///
/// While the accounted latency differs from the port's playback latency,
/// periods are silent and buffered samples are skipped to close the gap.
#[derive(Debug, Clone, Default)]
pub struct LatencyAligner {
    current: i64,
}

impl LatencyAligner {
    pub fn new(current: i64) -> Self {
        Self { current }
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn set_current(&mut self, current: i64) {
        self.current = current;
    }

    /// Fills `out` from `ring`, aligning towards `target` samples of output
    /// latency. Never blocks or allocates.
    pub fn render<C>(&mut self, ring: &mut C, target: i64, out: &mut [f32]) -> AlignOutcome
    where
        C: Consumer<Item = f32>,
    {
        let nframes = out.len() as i64;

        if self.current != target {
            out.fill(0.0);
            let gap = target - self.current;
            if gap > 0 {
                let skip = (ring.occupied_len() as i64).min(gap + nframes);
                ring.skip(skip as usize);
                self.current += skip;
            }
            self.current -= nframes;
            return AlignOutcome::Aligning;
        }

        if ring.occupied_len() > out.len() {
            ring.pop_slice(out);
            AlignOutcome::Played
        } else {
            out.fill(0.0);
            AlignOutcome::Underrun
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::HeapRb;

    fn settings(rate: FrameRate) -> DriftSettings {
        DriftSettings::new(48000, rate)
    }

    #[test]
    fn now_starts_on_the_next_period() {
        let mut comp = DriftCompensator::new(settings(FrameRate::new(25, 1, false)));
        // 2024-03-05 10:20:30.100 UTC
        let captured = WallClock::new(1_709_634_030, 100_000_000);
        let plan = comp.plan_sync(captured, 960, &StartMode::Now);

        // 100 ms + 20 ms period = frame 3 (starts at 120 ms exactly)
        assert_eq!(plan.timecode.to_string(), "24-03-05 10:20:30:03 +0000");
        assert_eq!(plan.sync_offset_ms, 20);
        assert_eq!(plan.phase_offset_samples, -38);
        assert_eq!(comp.sync_offset_ms(), 20);
    }

    #[test]
    fn phase_offset_reaches_back_to_frame_start() {
        let mut comp = DriftCompensator::new(settings(FrameRate::new(25, 1, false)));
        let captured = WallClock::new(1_709_634_030, 130_000_000);
        let plan = comp.plan_sync(captured, 960, &StartMode::Now);
        // 150 ms lies 30 ms into frame 3
        assert_eq!(plan.timecode.frames, 3);
        assert_eq!(plan.phase_offset_samples, -1440 - 38);
    }

    #[test]
    fn fixed_timecode_measures_from_sync() {
        let rate = FrameRate::new(25, 1, false);
        let mut comp = DriftCompensator::new(settings(rate));
        let tc = Timecode::new(1, 0, 0, 0);
        let captured = WallClock::new(10, 0);
        let plan = comp.plan_sync(captured, 1024, &StartMode::Timecode(tc));
        assert_eq!(plan.timecode, tc);
        assert_eq!(plan.phase_offset_samples, 0);
        assert_eq!(plan.sync_offset_ms, 3_600_000 - 10_000);

        // two seconds later the 2 s timecode is audible: no drift
        let report = comp.measure(3_602_000.0 + 500.0, 24_000, 0, WallClock::new(12, 0));
        assert_eq!(report.ms, 0);
        assert!(!report.exceeded);
    }

    #[test]
    fn drift_is_reported_in_frames_and_limited() {
        let rate = FrameRate::new(25, 1, false);
        let mut comp = DriftCompensator::new(DriftSettings {
            auto_resync: true,
            ..settings(rate)
        });
        comp.plan_sync(WallClock::ZERO, 0, &StartMode::Timecode(Timecode::new(0, 0, 0, 0)));

        let ahead = comp.measure(1_000.0 + 120.0, 0, 0, WallClock::new(1, 0));
        assert_eq!(ahead.ms, 120);
        assert_eq!(ahead.frames, 3);
        assert!(ahead.exceeded);
        assert!(comp.should_resync(&ahead));

        let behind = comp.measure(1_000.0 - 20.0, 0, 0, WallClock::new(1, 0));
        assert_eq!(behind.ms, -20);
        assert!(!comp.should_resync(&behind));
    }

    #[test]
    fn midnight_is_not_drift() {
        let rate = FrameRate::new(25, 1, false);
        let mut comp = DriftCompensator::new(settings(rate));
        comp.plan_sync(WallClock::ZERO, 0, &StartMode::Timecode(Timecode::new(0, 0, 0, 0)));
        let report = comp.measure(86_399_990.0, 0, 0, WallClock::new(86_400, 10_000_000));
        assert_eq!(report.ms, -20);
    }

    #[test]
    fn drop_frame_start_skips_missing_labels() {
        let rate = FrameRate::new(30000, 1001, true);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let tc = timecode_of_day(60_010, &rate, date);
        assert_eq!((tc.minutes, tc.seconds, tc.frames), (1, 0, 2));
        let tc = timecode_of_day(600_010, &rate, date);
        assert_eq!((tc.minutes, tc.seconds, tc.frames), (10, 0, 0));
    }

    #[test]
    fn aligner_closes_the_latency_gap() {
        let (mut prod, mut cons) = HeapRb::<f32>::new(8192).split();
        for i in 0..4096 {
            prod.try_push(i as f32).unwrap();
        }

        // phase -38, playback latency 256, period 64
        let mut aligner = LatencyAligner::new(-38);
        let mut out = [1.0f32; 64];
        assert_eq!(aligner.render(&mut cons, 256, &mut out), AlignOutcome::Aligning);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(aligner.current(), 256);
        assert_eq!(cons.occupied_len(), 4096 - (256 + 38 + 64));

        assert_eq!(aligner.render(&mut cons, 256, &mut out), AlignOutcome::Played);
        assert_eq!(out[0], (256 + 38 + 64) as f32);
    }

    #[test]
    fn aligner_waits_out_a_shrinking_latency() {
        let (_prod, mut cons) = HeapRb::<f32>::new(1024).split();
        let mut aligner = LatencyAligner::new(200);
        let mut out = [0.0f32; 64];
        // target below current: silence until the excess has been played out
        aligner.render(&mut cons, 100, &mut out);
        assert_eq!(aligner.current(), 136);
        aligner.render(&mut cons, 100, &mut out);
        assert_eq!(aligner.current(), 72);
    }

    #[test]
    fn aligner_counts_underruns() {
        let (mut prod, mut cons) = HeapRb::<f32>::new(1024).split();
        for _ in 0..64 {
            prod.try_push(0.5).unwrap();
        }
        let mut aligner = LatencyAligner::new(0);
        let mut out = [1.0f32; 64];
        // exactly one period buffered is not enough
        assert_eq!(aligner.render(&mut cons, 0, &mut out), AlignOutcome::Underrun);
        assert!(out.iter().all(|s| *s == 0.0));
    }
}

//! Generator pipeline
//!
//! [`Generator::service`] keeps an output ring filled with encoded LTC and
//! supervises clock drift; [`GenerateProducer::process`] plays the ring in
//! the real-time context with the start phase and port latency removed.
//!
//! Sync runs in stages: the consumer requests it, the real-time side
//! captures the wall clock at the start of a period, the consumer plans the
//! first frame from that capture and the real-time side starts playing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};

use crate::codec::FrameEncoder;
use crate::log_or_err;
use crate::process::drift::{
    AlignOutcome, DEFAULT_DRIFT_LIMIT_MS, DEFAULT_PRECACHE, DriftCompensator, DriftReport,
    DriftSettings, LatencyAligner, StartMode,
};
use crate::structs::event::WallClock;
use crate::structs::framerate::FrameRate;
use crate::structs::frame::LTC_FRAME_BYTES;
use crate::utils::arith::frame_to_ms;
use crate::utils::clock::Clock;
use crate::utils::errors::SignalError;
use crate::utils::wakeup::{RunMode, RunState, Wakeup};

/// Default output level.
pub const DEFAULT_VOLUME_DBFS: f64 = -18.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SyncStage {
    Idle = 0,
    Requested = 1,
    Captured = 2,
    Planned = 3,
    Running = 4,
}

impl SyncStage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncStage::Requested,
            2 => SyncStage::Captured,
            3 => SyncStage::Planned,
            4 => SyncStage::Running,
            _ => SyncStage::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateSettings {
    pub sample_rate: u32,
    pub rate: FrameRate,
    pub start: StartMode,
    /// Samples kept buffered ahead of the output.
    pub precache: usize,
    pub drift_limit_ms: i64,
    /// Resync when the drift exceeds the limit (only with [`StartMode::Now`]).
    pub auto_resync: bool,
    pub fail_level: log::Level,
}

impl GenerateSettings {
    pub fn new(sample_rate: u32, rate: FrameRate, start: StartMode) -> Self {
        Self {
            sample_rate,
            rate,
            start,
            precache: DEFAULT_PRECACHE,
            drift_limit_ms: DEFAULT_DRIFT_LIMIT_MS,
            auto_resync: false,
            fail_level: log::Level::Error,
        }
    }
}

/// State shared by host, producer and generator.
#[derive(Debug, Default)]
pub struct GenerateShared {
    stage: AtomicU8,
    captured_nanos: AtomicI64,
    capture_sample: AtomicI64,
    period: AtomicU32,
    planned_latency: AtomicI64,
    playback_latency: AtomicI64,
    current_latency: AtomicI64,
    underruns: AtomicUsize,
    drift_requested: AtomicBool,
    pub run: RunState,
    pub wakeup: Wakeup,
}

impl GenerateShared {
    fn stage(&self) -> SyncStage {
        SyncStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    fn set_stage(&self, stage: SyncStage) {
        self.stage.store(stage as u8, Ordering::Release);
    }

    /// Latency of the output port, in samples.
    pub fn set_playback_latency(&self, samples: i64) {
        self.playback_latency.store(samples, Ordering::Relaxed);
    }

    pub fn playback_latency(&self) -> i64 {
        self.playback_latency.load(Ordering::Relaxed)
    }

    /// Latency the real-time side currently accounts for.
    pub fn current_latency(&self) -> i64 {
        self.current_latency.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.stage() == SyncStage::Running
    }

    /// Asks the generator to log the current drift.
    pub fn request_drift_report(&self) {
        self.drift_requested.store(true, Ordering::Relaxed);
        self.wakeup.notify();
    }

    pub fn shutdown(&self) {
        self.run.set(RunMode::Exit);
        self.wakeup.notify();
    }
}

/// Creates the generator and its real-time output stage. The ring holds
/// one second of audio.
pub fn generate_channel(
    settings: GenerateSettings,
    mut encoder: Box<dyn FrameEncoder>,
    clock: Arc<dyn Clock>,
) -> (Generator, GenerateProducer) {
    let shared = Arc::new(GenerateShared::default());
    let capacity = (settings.sample_rate as usize).max(settings.precache * 2);
    let (ring_in, ring_out) = HeapRb::new(capacity).split();

    if let StartMode::Timecode(timecode) = &settings.start {
        encoder.set_timecode(timecode);
    }

    let mut drift = DriftSettings::new(settings.sample_rate, settings.rate);
    drift.drift_limit_ms = settings.drift_limit_ms;
    drift.auto_resync = settings.auto_resync;

    let generator = Generator {
        settings,
        shared: shared.clone(),
        encoder,
        ring: ring_in,
        compensator: DriftCompensator::new(drift),
        clock: clock.clone(),
        scratch: Vec::new(),
        announced: false,
        reported_underruns: 0,
        fail_level: settings.fail_level,
    };
    let producer = GenerateProducer {
        ring: ring_out,
        aligner: LatencyAligner::default(),
        clock,
        shared,
        monotonic: 0,
    };
    (generator, producer)
}

/// Real-time output stage.
pub struct GenerateProducer {
    ring: HeapCons<f32>,
    aligner: LatencyAligner,
    clock: Arc<dyn Clock>,
    shared: Arc<GenerateShared>,
    monotonic: i64,
}

impl GenerateProducer {
    pub fn shared(&self) -> &Arc<GenerateShared> {
        &self.shared
    }

    /// Fills one host period of output. Never blocks or allocates.
    pub fn process(&mut self, out: &mut [f32]) {
        let nframes = out.len();
        match self.shared.stage() {
            SyncStage::Requested => {
                let now = self.clock.now();
                self.shared
                    .captured_nanos
                    .store(now.as_nanos() as i64, Ordering::Relaxed);
                self.shared
                    .capture_sample
                    .store(self.monotonic, Ordering::Relaxed);
                self.shared.period.store(nframes as u32, Ordering::Relaxed);
                self.shared.set_stage(SyncStage::Captured);
                out.fill(0.0);
            }
            SyncStage::Idle | SyncStage::Captured => out.fill(0.0),
            SyncStage::Planned => {
                // the plan starts at the period after the capture
                let start = self.shared.capture_sample.load(Ordering::Relaxed)
                    + self.shared.period.load(Ordering::Relaxed) as i64;
                let planned = self.shared.planned_latency.load(Ordering::Relaxed);
                self.aligner.set_current(planned - (self.monotonic - start));
                let stale = self.ring.occupied_len();
                self.ring.skip(stale);
                self.shared.set_stage(SyncStage::Running);
                self.render(out);
            }
            SyncStage::Running => self.render(out),
        }

        self.monotonic += nframes as i64;
        self.shared.wakeup.try_signal();
    }

    fn render(&mut self, out: &mut [f32]) {
        let target = self.shared.playback_latency();
        if self.aligner.render(&mut self.ring, target, out) == AlignOutcome::Underrun {
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.shared
            .current_latency
            .store(self.aligner.current(), Ordering::Relaxed);
    }
}

/// Encodes LTC ahead of the output stage and keeps it on the wall clock.
pub struct Generator {
    settings: GenerateSettings,
    shared: Arc<GenerateShared>,
    encoder: Box<dyn FrameEncoder>,
    ring: HeapProd<f32>,
    compensator: DriftCompensator,
    clock: Arc<dyn Clock>,
    scratch: Vec<f32>,
    announced: bool,
    reported_underruns: usize,
    pub fail_level: log::Level,
}

impl Generator {
    pub fn shared(&self) -> &Arc<GenerateShared> {
        &self.shared
    }

    pub fn encoder(&self) -> &dyn FrameEncoder {
        self.encoder.as_ref()
    }

    /// Samples waiting in the output ring.
    pub fn buffered(&self) -> usize {
        self.ring.occupied_len()
    }

    /// Advances the sync stages and tops up the output ring.
    pub fn service(&mut self) -> Result<()> {
        match self.shared.stage() {
            SyncStage::Idle => {
                self.shared.set_stage(SyncStage::Requested);
                return Ok(());
            }
            SyncStage::Requested | SyncStage::Planned => return Ok(()),
            SyncStage::Captured => {
                self.plan();
                return Ok(());
            }
            SyncStage::Running => {}
        }

        if !self.announced {
            self.announced = true;
            info!("start LTC: {}", self.encoder.timecode());
        }

        let underruns = self.shared.underruns();
        if underruns != self.reported_underruns {
            self.reported_underruns = underruns;
            log_or_err!(self, log::Level::Warn, SignalError::Underrun(underruns));
        }

        if self.shared.drift_requested.swap(false, Ordering::Relaxed) {
            self.report_drift()?;
        }

        self.precache();

        if self.settings.auto_resync {
            let report = self.drift();
            if self.compensator.should_resync(&report) {
                self.resync();
            }
        }
        Ok(())
    }

    /// Services the ring until the run state becomes [`RunMode::Exit`].
    pub fn run(&mut self, poll: Duration) -> Result<()> {
        let shared = self.shared.clone();
        while shared.run.get() != RunMode::Exit {
            self.service()?;
            shared.wakeup.wait(&shared.run, poll);
        }
        Ok(())
    }

    /// Played timecode minus wall clock.
    pub fn drift(&self) -> DriftReport {
        let frame_ms = frame_to_ms(&self.encoder.frame(), &self.settings.rate);
        self.compensator.measure(
            frame_ms,
            self.ring.occupied_len(),
            self.shared.current_latency(),
            self.clock.now(),
        )
    }

    /// Logs the drift and the timecode about to be encoded.
    pub fn report_drift(&mut self) -> Result<DriftReport> {
        let report = self.drift();
        info!(
            "drift: {:+} ltc-frames (off: {:+} ms | lat: {})",
            report.frames,
            report.ms,
            self.shared.playback_latency()
        );
        info!("TC: {}", self.encoder.timecode());
        if report.exceeded && !self.settings.auto_resync {
            log_or_err!(
                self,
                log::Level::Warn,
                SignalError::DriftExceeded {
                    drift_ms: report.ms,
                    limit_ms: self.settings.drift_limit_ms,
                }
            );
        }
        Ok(report)
    }

    /// Re-aligns the stream to the wall clock. Only a stream started at the
    /// current time can be resynced; returns whether a resync was started.
    pub fn resync(&mut self) -> bool {
        if self.settings.start != StartMode::Now {
            debug!("Resync ignored for a fixed start timecode");
            return false;
        }
        info!("Resyncing LTC to the system clock");
        self.announced = false;
        self.shared.set_stage(SyncStage::Requested);
        true
    }

    fn plan(&mut self) {
        let captured =
            WallClock::from_nanos(self.shared.captured_nanos.load(Ordering::Relaxed) as i128);
        let period = self.shared.period.load(Ordering::Relaxed);
        let plan = self
            .compensator
            .plan_sync(captured, period, &self.settings.start);
        if self.settings.start == StartMode::Now {
            self.encoder.set_timecode(&plan.timecode);
        }
        info!("cfg LTC: {}", plan.timecode);
        self.shared
            .planned_latency
            .store(plan.phase_offset_samples, Ordering::Relaxed);
        self.shared.set_stage(SyncStage::Planned);
    }

    /// Encodes whole frames until at least `precache` samples are buffered.
    fn precache(&mut self) {
        while self.ring.occupied_len() < self.settings.precache {
            for index in 0..LTC_FRAME_BYTES {
                self.encoder.encode_byte(index, 1.0);
            }
            self.scratch.clear();
            self.encoder.drain_buffer(&mut self.scratch);
            let written = self.ring.push_slice(&self.scratch);
            if written < self.scratch.len() {
                warn!("Output ring buffer overflow");
                break;
            }
            self.encoder.increment_timecode();
        }
    }
}

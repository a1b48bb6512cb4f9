//! Decode pipeline
//!
//! [`DecodeProducer::process`] runs once per host period in the real-time
//! context: it stamps a sync point, feeds the demodulator, moves decoded
//! frames into a bounded queue, runs the run/stop filter and delivers
//! scheduled MTC. [`DecodeConsumer::drain`] does everything else outside
//! the real-time context and hands [`CorrelatedFrame`]s to a
//! [`FrameHandler`].

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, trace, warn};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};

use crate::codec::FrameDecoder;
use crate::log_or_err;
use crate::process::correlate::{ClockCorrelator, DEFAULT_SYNC_CAPACITY, SyncWriter, correlator_channel};
use crate::process::detect::{DetectedRate, DiscontinuityDetector, FrameRateTracker, FuzzyPolicy};
use crate::process::mtc::{MidiPort, MtcOutput};
use crate::process::runstop::{
    EdgeKind, RecordingWindow, RunStopEdge, RunStopEdges, RunStopFilter, RunStopMachine,
    RunStopSettings, RunStopState, runstop_channel,
};
use crate::structs::event::{DecodedFrameEvent, SyncPoint, WallClock};
use crate::structs::frame::{CompareMask, TvStandard};
use crate::structs::framerate::FrameRate;
use crate::structs::timecode::Timecode;
use crate::utils::clock::Clock;
use crate::utils::errors::SignalError;
use crate::utils::wakeup::{RunMode, RunState, Wakeup};

/// Decoded frames buffered between the real-time context and the consumer.
pub const DEFAULT_FRAME_QUEUE: usize = 42;

/// Frames before the run signal that still belong to the window, in frame
/// periods.
const RUN_TIMEIN_FRAMES: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct DecodeSettings {
    pub sample_rate: u32,
    /// Expected rate; replaced by detection when `detect_fps` is set.
    pub rate: FrameRate,
    pub detect_fps: bool,
    /// Read date and timezone from the user bits.
    pub use_date: bool,
    /// Continuity rule for frames numbered 0.
    pub fuzzy: FuzzyPolicy,
    /// Gate output with a run/stop signal on the second input.
    pub runstop: Option<RunStopSettings>,
    pub sync_capacity: usize,
    pub frame_queue: usize,
    /// Warnings at or above this level become errors.
    pub fail_level: log::Level,
}

impl DecodeSettings {
    pub fn new(sample_rate: u32, rate: FrameRate) -> Self {
        Self {
            sample_rate,
            rate,
            detect_fps: false,
            use_date: false,
            fuzzy: FuzzyPolicy::Strict,
            runstop: None,
            sync_capacity: DEFAULT_SYNC_CAPACITY,
            frame_queue: DEFAULT_FRAME_QUEUE,
            fail_level: log::Level::Error,
        }
    }
}

/// State shared by host, producer and consumer.
#[derive(Debug, Default)]
pub struct DecodeShared {
    capture_latency: AtomicI64,
    playback_latency: AtomicI64,
    period: AtomicU32,
    fps: AtomicU32,
    frame_overflows: AtomicUsize,
    pub run: RunState,
    pub wakeup: Wakeup,
}

impl DecodeShared {
    pub fn set_capture_latency(&self, samples: i64) {
        self.capture_latency.store(samples, Ordering::Relaxed);
    }

    pub fn capture_latency(&self) -> i64 {
        self.capture_latency.load(Ordering::Relaxed)
    }

    pub fn set_playback_latency(&self, samples: i64) {
        self.playback_latency.store(samples, Ordering::Relaxed);
    }

    pub fn playback_latency(&self) -> i64 {
        self.playback_latency.load(Ordering::Relaxed)
    }

    /// Length of the last host period.
    pub fn period(&self) -> u32 {
        self.period.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Frames dropped because the consumer fell behind.
    pub fn frame_overflows(&self) -> usize {
        self.frame_overflows.load(Ordering::Relaxed)
    }

    /// Asks the consumer to stop and wakes it up.
    pub fn shutdown(&self) {
        self.run.set(RunMode::Exit);
        self.wakeup.notify();
    }
}

/// Creates the producer/consumer pair around `decoder`.
pub fn decode_channel(
    settings: DecodeSettings,
    decoder: Box<dyn FrameDecoder>,
    clock: Arc<dyn Clock>,
) -> (DecodeProducer, DecodeConsumer) {
    let shared = Arc::new(DecodeShared::default());
    let fps = settings.rate.nominal();
    shared.fps.store(fps, Ordering::Relaxed);

    let (sync, correlator) = correlator_channel(settings.sync_capacity);
    let (frames_in, frames_out) = HeapRb::new(settings.frame_queue.max(2)).split();
    let (filter, edges) = match settings.runstop {
        Some(rs) => {
            let (filter, edges) = runstop_channel(rs, settings.sample_rate, fps);
            (Some(filter), Some(edges))
        }
        None => (None, None),
    };

    // without a run/stop signal everything is one window
    let mut machine = RunStopMachine::new(if settings.runstop.is_some() {
        RunStopState::Idle
    } else {
        RunStopState::Starting
    });
    machine.set_fail_level(settings.fail_level);

    let producer = DecodeProducer {
        decoder,
        sync,
        frames: frames_in,
        runstop: filter,
        mtc: None,
        clock,
        shared: shared.clone(),
        monotonic: 0,
        fps,
    };
    let consumer = DecodeConsumer {
        settings,
        shared,
        frames: frames_out,
        correlator,
        edges,
        machine,
        tracker: FrameRateTracker::with_initial(fps),
        detector: DiscontinuityDetector::new(CompareMask::TIME_ONLY, settings.fuzzy),
        fps,
        locked: false,
        frames_in_sequence: 0,
        last_off_end: 0,
        last_wallclock: WallClock::ZERO,
        reported_overflows: 0,
        reported_edge_overflows: 0,
        fail_level: settings.fail_level,
    };
    (producer, consumer)
}

/// Real-time half of the decode pipeline.
pub struct DecodeProducer {
    decoder: Box<dyn FrameDecoder>,
    sync: SyncWriter,
    frames: HeapProd<DecodedFrameEvent>,
    runstop: Option<RunStopFilter>,
    mtc: Option<MtcOutput>,
    clock: Arc<dyn Clock>,
    shared: Arc<DecodeShared>,
    monotonic: i64,
    fps: u32,
}

impl DecodeProducer {
    pub fn shared(&self) -> &Arc<DecodeShared> {
        &self.shared
    }

    /// Routes scheduled MTC to the MIDI output of [`process`](Self::process).
    pub fn attach_mtc(&mut self, output: MtcOutput) {
        self.mtc = Some(output);
    }

    /// Samples processed so far.
    pub fn monotonic(&self) -> i64 {
        self.monotonic
    }

    /// Processes one host period. `inputs[0]` carries LTC, `inputs[1]` the
    /// optional run/stop signal; `midi` receives MTC due in this period.
    ///
    /// Never blocks or allocates.
    pub fn process(&mut self, inputs: &[&[f32]], midi: Option<&mut dyn MidiPort>, nframes: usize) {
        let now = self.clock.now();
        let offset = self.monotonic - self.shared.capture_latency();
        self.shared.period.store(nframes as u32, Ordering::Relaxed);

        self.sync.push(SyncPoint {
            sample_count: offset,
            wallclock: now,
        });

        if let Some(ltc) = inputs.first() {
            self.decoder.write(&ltc[..nframes.min(ltc.len())], offset);
            while let Some(event) = self.decoder.read() {
                if self.frames.try_push(event).is_err() {
                    self.shared.frame_overflows.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let (Some(filter), Some(signal)) = (self.runstop.as_mut(), inputs.get(1)) {
            let fps = self.shared.fps();
            if fps != self.fps {
                filter.set_fps(fps);
                self.fps = fps;
            }
            filter.process(&signal[..nframes.min(signal.len())], offset, now);
        }

        if let (Some(output), Some(port)) = (self.mtc.as_mut(), midi) {
            output.deliver(
                self.monotonic,
                nframes as u32,
                self.shared.playback_latency(),
                port,
            );
        }

        self.monotonic += nframes as i64;
        self.shared.wakeup.try_signal();
    }
}

/// A decoded frame placed on the wall clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelatedFrame {
    /// The frame as decoded.
    pub event: DecodedFrameEvent,
    pub timecode: Timecode,
    /// Offsets shifted to the video frame boundary.
    pub off_start: i64,
    pub off_end: i64,
    /// Wall clock at the aligned offsets; `None` before two sync points
    /// exist.
    pub start: Option<WallClock>,
    pub end: Option<WallClock>,
    pub fps: u32,
    pub discontinuity: bool,
    /// Capture plus playback latency plus one period, in samples.
    pub latency: i64,
}

/// Receives the output of [`DecodeConsumer::drain`].
pub trait FrameHandler {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()>;

    /// Called before [`on_frame`](Self::on_frame) for a frame that breaks
    /// the sequence.
    fn on_discontinuity(&mut self, _frame: &CorrelatedFrame) -> Result<()> {
        Ok(())
    }

    fn on_rate_detected(&mut self, _rate: &DetectedRate) -> Result<()> {
        Ok(())
    }

    fn on_window_start(&mut self, _window: &RecordingWindow) -> Result<()> {
        Ok(())
    }

    fn on_window_end(&mut self, _window: &RecordingWindow) -> Result<()> {
        Ok(())
    }
}

/// Non-real-time half of the decode pipeline.
pub struct DecodeConsumer {
    settings: DecodeSettings,
    shared: Arc<DecodeShared>,
    frames: HeapCons<DecodedFrameEvent>,
    correlator: ClockCorrelator,
    edges: Option<RunStopEdges>,
    machine: RunStopMachine,
    tracker: FrameRateTracker,
    detector: DiscontinuityDetector,
    fps: u32,
    locked: bool,
    frames_in_sequence: usize,
    last_off_end: i64,
    last_wallclock: WallClock,
    reported_overflows: usize,
    reported_edge_overflows: usize,
    pub fail_level: log::Level,
}

impl DecodeConsumer {
    pub fn shared(&self) -> &Arc<DecodeShared> {
        &self.shared
    }

    pub fn state(&self) -> RunStopState {
        self.machine.state()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Processes everything the producer queued since the last call.
    /// Returns the number of frames handed to `handler`.
    pub fn drain(&mut self, handler: &mut dyn FrameHandler) -> Result<usize> {
        self.report_overflows();

        while let Some(edge) = self.edges.as_mut().and_then(|e| e.pop()) {
            self.machine.on_edge(&edge)?;
        }

        self.correlator.refresh();

        match self.machine.state() {
            RunStopState::Idle => {
                self.drain_idle(handler)?;
                self.correlator.retire_idle();
                return Ok(0);
            }
            RunStopState::Stopped if self.last_off_end > self.machine.window().end_sample => {
                let window = *self.machine.window();
                self.machine.finish();
                info!("Recording window closed at sample {}", window.end_sample);
                handler.on_window_end(&window)?;
                self.correlator.retire_idle();
                return Ok(0);
            }
            RunStopState::Starting => {
                let window = *self.machine.window();
                info!("Recording window opened at sample {}", window.start_sample);
                handler.on_window_start(&window)?;
                self.machine.mark_started();
                self.frames_in_sequence = 0;
            }
            _ => {}
        }

        let sample_rate = self.settings.sample_rate as f64;
        let latency = self.shared.capture_latency()
            + self.shared.playback_latency()
            + self.shared.period() as i64;
        let mut handled = 0;

        while let Some(event) = self.frames.try_pop() {
            let discontinuity = self.observe(&event, handler)?;

            if self.settings.runstop.is_some() {
                let window = self.machine.window();
                let timein = (RUN_TIMEIN_FRAMES * sample_rate / self.fps.max(1) as f64) as i64;
                if event.off_end < window.start_sample - timein {
                    continue;
                }
                if self.machine.state() == RunStopState::Stopped && event.off_end > window.end_sample {
                    continue;
                }
            }

            let (standard, samples_per_frame) = alignment_standard(&event, self.fps, sample_rate);
            let shift = standard.frame_alignment(samples_per_frame);
            let off_start = event.off_start - shift;
            let off_end = event.off_end - shift;

            let (start, end) = match self.correlator.correlate(off_start, off_end) {
                Some((start, end)) => (Some(start), Some(end)),
                None => (None, None),
            };
            if let Some(end) = end {
                self.last_wallclock = end;
            }

            let frame = CorrelatedFrame {
                event,
                timecode: Timecode::from_frame(&event.frame, self.settings.use_date),
                off_start,
                off_end,
                start,
                end,
                fps: self.fps,
                discontinuity: discontinuity && self.frames_in_sequence > 0,
                latency,
            };

            if frame.discontinuity {
                log_or_err!(
                    self,
                    log::Level::Warn,
                    SignalError::Discontinuity {
                        sample: off_start,
                        expected: self
                            .detector
                            .expected()
                            .map(|f| f.to_string())
                            .unwrap_or_default(),
                        actual: event.frame.to_string(),
                    }
                );
                handler.on_discontinuity(&frame)?;
            }
            self.frames_in_sequence += 1;

            trace!(
                "{} | {:8} {:8} | {:?} {:?}",
                frame.timecode, off_start, off_end, start, end
            );
            handler.on_frame(&frame)?;
            handled += 1;
        }

        self.correlator.retire();
        Ok(handled)
    }

    /// Waits for the producer and drains until the run state becomes
    /// [`RunMode::Exit`], then closes the open window.
    pub fn run(&mut self, handler: &mut dyn FrameHandler, poll: Duration) -> Result<()> {
        let shared = self.shared.clone();
        while shared.run.get() != RunMode::Exit {
            self.drain(handler)?;
            shared.wakeup.wait(&shared.run, poll);
        }
        self.close(handler)
    }

    /// Processes pending frames and ends the current window at the last
    /// frame seen.
    pub fn close(&mut self, handler: &mut dyn FrameHandler) -> Result<()> {
        if self.machine.state() == RunStopState::Idle {
            return Ok(());
        }
        self.drain(handler)?;

        if self.machine.state() == RunStopState::Started {
            self.machine.on_edge(&RunStopEdge {
                kind: EdgeKind::End,
                sample: self.last_off_end,
                wallclock: self.last_wallclock,
            })?;
        }
        if self.machine.state() == RunStopState::Stopped {
            let window = *self.machine.window();
            self.machine.finish();
            handler.on_window_end(&window)?;
        }
        Ok(())
    }

    /// Runs rate detection and continuity tracking for one frame.
    fn observe(&mut self, event: &DecodedFrameEvent, handler: &mut dyn FrameHandler) -> Result<bool> {
        if self.settings.detect_fps {
            if let Some(rate) = self.tracker.observe(event) {
                self.locked = true;
                self.fps = rate.fps;
                self.shared.fps.store(rate.fps, Ordering::Relaxed);
                if rate.changed {
                    handler.on_rate_detected(&rate)?;
                }
            }
        }

        // before the rate is locked only the previous frame is tracked
        let broken = self.detector.check(event, self.fps);
        let discontinuity = broken && (self.locked || !self.settings.detect_fps);
        if discontinuity {
            self.locked = false;
        }
        self.last_off_end = event.off_end;
        Ok(discontinuity)
    }

    /// Reads frames while no window is open so the queue never overflows,
    /// keeping the newest half.
    fn drain_idle(&mut self, handler: &mut dyn FrameHandler) -> Result<()> {
        let keep = self.settings.frame_queue / 2;
        while self.frames.occupied_len() > keep {
            let Some(event) = self.frames.try_pop() else {
                break;
            };
            self.observe(&event, handler)?;
        }
        Ok(())
    }

    fn report_overflows(&mut self) {
        let overflows = self.shared.frame_overflows();
        if overflows != self.reported_overflows {
            warn!(
                "Frame queue full, {} frame(s) dropped",
                overflows - self.reported_overflows
            );
            self.reported_overflows = overflows;
        }
        if let Some(edges) = &self.edges {
            let lost = edges.overflows();
            if lost != self.reported_edge_overflows {
                warn!("Run/stop queue full, {} edge(s) dropped", lost - self.reported_edge_overflows);
                self.reported_edge_overflows = lost;
            }
        }
    }
}

/// Television standard and frame length used to align a decoded frame.
fn alignment_standard(event: &DecodedFrameEvent, fps: u32, sample_rate: f64) -> (TvStandard, f64) {
    let samples_per_frame = sample_rate / fps.max(1) as f64;
    if event.frame.drop_frame {
        (TvStandard::Tv525_60, samples_per_frame * 1000.0 / 1001.0)
    } else if fps == 25 {
        (TvStandard::Tv625_50, samples_per_frame)
    } else {
        (TvStandard::Film24, samples_per_frame)
    }
}

/// Plain-text frame log.
///
/// One line per frame with user bits (or the date), timecode, aligned
/// sample offsets, direction, wall-clock start and end, and level.
pub struct TextLog<W: Write> {
    out: W,
    use_date: bool,
}

impl<W: Write> TextLog<W> {
    pub fn new(out: W, use_date: bool) -> Self {
        Self { out, use_date }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        if self.use_date {
            writeln!(self.out, "##  SMPTE   | audio-sample-num REV|             unix-system-time")?;
            writeln!(self.out, "##time-code |  start      end  ERS|       start                   end   ")
        } else {
            writeln!(self.out, "##        SMPTE        | audio-sample-num REV|             unix-system-time")?;
            writeln!(self.out, "##u-bits    time-code  |  start      end  ERS|       start                   end   ")
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Formats one log line, without the newline.
pub fn format_frame(frame: &CorrelatedFrame, use_date: bool) -> String {
    let ltc = &frame.event.frame;
    let prefix = match (use_date, frame.timecode.date) {
        (true, Some(date)) => format!("{date} "),
        _ => format!("{:<11}", ltc.user_bits_hex().to_lowercase()),
    };
    format!(
        "{prefix}{:02}:{:02}:{:02}{}{:02} | {:8} {:8}{} | {}  {} | {:.1}dB",
        frame.timecode.hours,
        frame.timecode.minutes,
        frame.timecode.seconds,
        if ltc.drop_frame { '.' } else { ':' },
        frame.timecode.frames,
        frame.off_start,
        frame.off_end,
        if frame.event.reverse { " R" } else { "  " },
        frame.start.unwrap_or(WallClock::ZERO),
        frame.end.unwrap_or(WallClock::ZERO),
        frame.event.volume_dbfs,
    )
}

impl<W: Write> FrameHandler for TextLog<W> {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        writeln!(self.out, "{}", format_frame(frame, self.use_date))?;
        Ok(())
    }

    fn on_discontinuity(&mut self, _frame: &CorrelatedFrame) -> Result<()> {
        writeln!(self.out, "#DISCONTINUITY")?;
        Ok(())
    }

    fn on_rate_detected(&mut self, rate: &DetectedRate) -> Result<()> {
        writeln!(
            self.out,
            "# detected fps: {}{}",
            rate.fps,
            if rate.drop_frame { "df" } else { "" }
        )?;
        Ok(())
    }

    fn on_window_start(&mut self, window: &RecordingWindow) -> Result<()> {
        writeln!(
            self.out,
            "#Start: sample: {} tme: {}",
            window.start_sample, window.start_wallclock
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn on_window_end(&mut self, window: &RecordingWindow) -> Result<()> {
        writeln!(
            self.out,
            "#End: sample: {} tme: {}",
            window.end_sample, window.end_wallclock
        )?;
        self.out.flush()?;
        debug!("Window of {} samples logged", window.end_sample - window.start_sample);
        Ok(())
    }
}

//! Run/stop signal detection
//!
//! A run/stop channel carries a square wave at the frame rate while the
//! transport runs and silence otherwise. [`RunStopFilter`] runs per sample
//! in the real-time context and posts start/end edges; [`RunStopMachine`]
//! consumes them and tracks the recording window.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use log::{debug, info};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};

use crate::log_or_err;
use crate::structs::event::WallClock;
use crate::utils::errors::SignalError;

/// Edge queue depth.
pub const DEFAULT_EDGE_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStopSettings {
    /// High-pass coefficient, `1 / (1 + 2π fc / fs)`.
    pub alpha: f32,
    /// Squared filter output above which a sample counts as signal.
    pub threshold: f32,
}

impl Default for RunStopSettings {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            threshold: 0.01,
        }
    }
}

impl RunStopSettings {
    pub fn new(alpha: f32, threshold: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.1, 1.0),
            threshold: threshold.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Start,
    End,
}

impl Display for EdgeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EdgeKind::Start => "start",
            EdgeKind::End => "end",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStopEdge {
    pub kind: EdgeKind,
    /// Monotonic sample position of the edge.
    pub sample: i64,
    pub wallclock: WallClock,
}

/// One-pole high-pass envelope follower with zero-crossing timing.
pub struct RunStopFilter {
    settings: RunStopSettings,
    sample_rate: u32,
    timeout: u32,
    timein: u32,
    x1: f32,
    y1: f32,
    level: i8,
    active: bool,
    silence: u32,
    edges: HeapProd<RunStopEdge>,
    overflows: Arc<AtomicUsize>,
}

impl RunStopFilter {
    /// Timing windows follow the frame period, set with
    /// [`set_fps`](Self::set_fps).
    pub fn set_fps(&mut self, fps: u32) {
        let period = self.sample_rate as f64 / fps.max(1) as f64;
        // two zero transitions per frame, +-3%
        self.timeout = (0.53 * period) as u32;
        self.timein = (0.47 * period) as u32;
    }

    /// Filters one period of run/stop samples. The first sample sits at
    /// `base_offset`; edges are stamped with `cycle_time` advanced by their
    /// position within the period.
    pub fn process(&mut self, samples: &[f32], base_offset: i64, cycle_time: WallClock) {
        let alpha = self.settings.alpha;
        for (s, &x) in samples.iter().enumerate() {
            let y = self.y1 + alpha * (x - self.x1);
            self.y1 = y;
            self.x1 = x;

            let mut transition = false;
            if y * y > self.settings.threshold {
                if self.level > 0 && y < 0.0 {
                    self.level = -1;
                    transition = true;
                    if !self.active && self.silence <= self.timeout && self.silence > self.timein {
                        self.active = true;
                        self.post(EdgeKind::Start, base_offset, s, cycle_time);
                    }
                }
                if self.level < 0 && y > 0.0 {
                    self.level = 1;
                    transition = true;
                }
            }

            if transition {
                self.silence = 0;
            } else {
                self.silence = self.silence.saturating_add(1);
                if self.active && self.silence > self.timeout {
                    self.active = false;
                    self.level = 1;
                    self.post(EdgeKind::End, base_offset, s, cycle_time);
                }
            }
        }
    }

    fn post(&mut self, kind: EdgeKind, base_offset: i64, index: usize, cycle_time: WallClock) {
        let nanos = index as i128 * 1_000_000_000 / self.sample_rate.max(1) as i128;
        let edge = RunStopEdge {
            kind,
            sample: base_offset + index as i64,
            wallclock: cycle_time + WallClock::from_nanos(nanos),
        };
        if self.edges.try_push(edge).is_err() {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer end of the edge queue.
pub struct RunStopEdges {
    consumer: HeapCons<RunStopEdge>,
    overflows: Arc<AtomicUsize>,
}

impl RunStopEdges {
    pub fn pop(&mut self) -> Option<RunStopEdge> {
        self.consumer.try_pop()
    }

    /// Edges lost because the queue was full.
    pub fn overflows(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }
}

/// Creates a filter and the queue its edges are posted to.
pub fn runstop_channel(
    settings: RunStopSettings,
    sample_rate: u32,
    fps: u32,
) -> (RunStopFilter, RunStopEdges) {
    let (producer, consumer) = HeapRb::new(DEFAULT_EDGE_QUEUE).split();
    let overflows = Arc::new(AtomicUsize::new(0));
    let mut filter = RunStopFilter {
        settings,
        sample_rate,
        timeout: 0,
        timein: 0,
        x1: 0.0,
        y1: 0.0,
        level: 1,
        active: false,
        silence: 0,
        edges: producer,
        overflows: overflows.clone(),
    };
    filter.set_fps(fps);
    (
        filter,
        RunStopEdges {
            consumer,
            overflows,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStopState {
    #[default]
    Idle,
    Starting,
    Started,
    Stopped,
}

impl RunStopState {
    pub fn name(self) -> &'static str {
        match self {
            RunStopState::Idle => "Idle",
            RunStopState::Starting => "Starting",
            RunStopState::Started => "Started",
            RunStopState::Stopped => "Stopped",
        }
    }
}

impl Display for RunStopState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Start and end of a recording window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingWindow {
    pub start_sample: i64,
    pub start_wallclock: WallClock,
    pub end_sample: i64,
    pub end_wallclock: WallClock,
}

/// Recording-window state machine fed by run/stop edges.
#[derive(Debug, Clone)]
pub struct RunStopMachine {
    state: RunStopState,
    window: RecordingWindow,
    pub fail_level: log::Level,
}

impl Default for RunStopMachine {
    fn default() -> Self {
        Self::new(RunStopState::Idle)
    }
}

impl RunStopMachine {
    pub fn new(state: RunStopState) -> Self {
        Self {
            state,
            window: RecordingWindow::default(),
            fail_level: log::Level::Error,
        }
    }

    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    pub fn state(&self) -> RunStopState {
        self.state
    }

    pub fn window(&self) -> &RecordingWindow {
        &self.window
    }

    /// Applies one edge.
    ///
    /// - start while not Idle: ignored
    /// - end while Starting: back to Idle (flapping)
    /// - end while not Started: ignored
    /// - end while Started: Stopped
    pub fn on_edge(&mut self, edge: &RunStopEdge) -> Result<()> {
        match (edge.kind, self.state) {
            (EdgeKind::Start, RunStopState::Idle) => {
                self.window.start_sample = edge.sample;
                self.window.start_wallclock = edge.wallclock;
                self.state = RunStopState::Starting;
                info!("Run signal at sample {}", edge.sample);
            }
            (EdgeKind::Start, state) => {
                log_or_err!(
                    self,
                    log::Level::Warn,
                    SignalError::IgnoredEdge {
                        edge: "start",
                        state: state.name(),
                    }
                );
            }
            (EdgeKind::End, RunStopState::Starting) => {
                debug!("Stop signal while starting (flapping), back to Idle");
                self.state = RunStopState::Idle;
            }
            (EdgeKind::End, RunStopState::Started) => {
                self.window.end_sample = edge.sample;
                self.window.end_wallclock = edge.wallclock;
                self.state = RunStopState::Stopped;
                info!("Stop signal at sample {}", edge.sample);
            }
            (EdgeKind::End, state) => {
                log_or_err!(
                    self,
                    log::Level::Warn,
                    SignalError::IgnoredEdge {
                        edge: "end",
                        state: state.name(),
                    }
                );
            }
        }
        Ok(())
    }

    /// Starting → Started, once the consumer has opened the window.
    pub fn mark_started(&mut self) {
        if self.state == RunStopState::Starting {
            self.state = RunStopState::Started;
        }
    }

    /// Stopped → Idle, once every frame up to the end was processed.
    pub fn finish(&mut self) {
        if self.state == RunStopState::Stopped {
            self.state = RunStopState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square wave at `fps` for `run` samples, framed by silence.
    fn run_stop_signal(sample_rate: u32, fps: u32, lead: usize, run: usize, tail: usize) -> Vec<f32> {
        let half = (sample_rate / fps / 2) as usize;
        let mut out = vec![0.0; lead];
        out.extend((0..run).map(|i| if (i / half) % 2 == 0 { 0.8 } else { -0.8 }));
        out.extend(std::iter::repeat_n(0.0, tail));
        out
    }

    fn collect(edges: &mut RunStopEdges) -> Vec<RunStopEdge> {
        std::iter::from_fn(|| edges.pop()).collect()
    }

    #[test]
    fn square_wave_raises_one_start_and_one_end() {
        let (mut filter, mut edges) = runstop_channel(RunStopSettings::default(), 48000, 25);
        let signal = run_stop_signal(48000, 25, 4800, 48000, 9600);

        for (i, period) in signal.chunks(256).enumerate() {
            filter.process(period, (i * 256) as i64, WallClock::new(1000 + i as i64, 0));
        }

        let got = collect(&mut edges);
        assert_eq!(got.len(), 2, "{got:?}");
        assert_eq!(got[0].kind, EdgeKind::Start);
        assert_eq!(got[1].kind, EdgeKind::End);

        // first falling crossing preceded by a half period of the expected length
        assert_eq!(got[0].sample, 4800 + 3 * 960);
        // the end fires one timeout after the last transition
        let last_transition = 4800 + 49 * 960;
        assert_eq!(got[1].sample, last_transition + 1018);
        assert_eq!(edges.overflows(), 0);
    }

    #[test]
    fn edge_timestamps_follow_position_in_period() {
        let (mut filter, mut edges) = runstop_channel(RunStopSettings::default(), 48000, 25);
        let signal = run_stop_signal(48000, 25, 0, 9600, 2000);
        filter.process(&signal, 0, WallClock::new(50, 0));
        let got = collect(&mut edges);
        let start = got[0];
        let expected = WallClock::new(50, 0) + WallClock::from_nanos(start.sample as i128 * 1_000_000_000 / 48000);
        assert_eq!(start.wallclock, expected);
    }

    #[test]
    fn silence_never_starts() {
        let (mut filter, mut edges) = runstop_channel(RunStopSettings::default(), 48000, 25);
        filter.process(&[0.0; 48000], 0, WallClock::ZERO);
        // below threshold
        filter.process(&vec![0.01; 48000], 48000, WallClock::ZERO);
        assert!(edges.pop().is_none());
    }

    #[test]
    fn state_machine_transitions() {
        let edge = |kind, sample| RunStopEdge {
            kind,
            sample,
            wallclock: WallClock::new(sample, 0),
        };
        let mut machine = RunStopMachine::default();

        machine.on_edge(&edge(EdgeKind::End, 1)).unwrap();
        assert_eq!(machine.state(), RunStopState::Idle);

        machine.on_edge(&edge(EdgeKind::Start, 10)).unwrap();
        assert_eq!(machine.state(), RunStopState::Starting);
        machine.on_edge(&edge(EdgeKind::Start, 11)).unwrap();
        assert_eq!(machine.window().start_sample, 10);

        // flapping
        machine.on_edge(&edge(EdgeKind::End, 12)).unwrap();
        assert_eq!(machine.state(), RunStopState::Idle);

        machine.on_edge(&edge(EdgeKind::Start, 20)).unwrap();
        machine.mark_started();
        assert_eq!(machine.state(), RunStopState::Started);
        machine.on_edge(&edge(EdgeKind::End, 30)).unwrap();
        assert_eq!(machine.state(), RunStopState::Stopped);
        assert_eq!(machine.window().end_sample, 30);
        machine.finish();
        assert_eq!(machine.state(), RunStopState::Idle);
    }

    #[test]
    fn ignored_edges_fail_in_strict_mode() {
        let mut machine = RunStopMachine::new(RunStopState::Started);
        machine.set_fail_level(log::Level::Warn);
        let start = RunStopEdge {
            kind: EdgeKind::Start,
            sample: 0,
            wallclock: WallClock::ZERO,
        };
        assert!(machine.on_edge(&start).is_err());
    }
}

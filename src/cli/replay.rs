//! Offline host for the decode pipeline.
//!
//! Plays a capture through the real producer/consumer pair. The host
//! stands in for the audio server: it calls the producer once per period
//! and moves a simulated wall clock along with the sample position.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use chrono::DateTime;
use indicatif::{MultiProgress, ProgressBar};
use log::{info, warn};

use ltc::codec::replay::FrameReplay;
use ltc::process::decode::{
    CorrelatedFrame, DecodeProducer, DecodeSettings, FrameHandler, decode_channel,
};
use ltc::process::detect::{DetectedRate, FuzzyPolicy};
use ltc::process::mtc::{MidiPort, MtcOutput};
use ltc::process::runstop::RecordingWindow;
use ltc::structs::event::{DecodedFrameEvent, WallClock};
use ltc::structs::framerate::FrameRate;
use ltc::utils::clock::{Clock, ManualClock, SystemClock};
use ltc::utils::wakeup::RunMode;

use super::command::ReplayArgs;
use super::mtc::MidiLog;
use super::progress::create_progress_bar;
use crate::capture::Capture;
use crate::input::InputReader;

/// How long the consumer sleeps when the host does not wake it.
const CONSUMER_POLL: Duration = Duration::from_millis(50);

pub struct Replay {
    pub settings: DecodeSettings,
    pub events: Vec<DecodedFrameEvent>,
    /// Run/stop signal, one sample per LTC sample.
    pub runstop: Option<Vec<f32>>,
    pub start: WallClock,
    pub period: usize,
    pub capture_latency: i64,
    pub playback_latency: i64,
    pub realtime: bool,
}

impl Replay {
    pub fn from_args(args: &ReplayArgs, fail_level: log::Level) -> Result<Self> {
        let capture = Capture::load(&args.input)?;
        let rate = match &args.fps {
            Some(text) => text.parse::<FrameRate>()?,
            None => capture.rate(FrameRate::default())?,
        };
        for note in rate.sanity_notes() {
            warn!("{note}");
        }
        if capture.sample_rate == 0 {
            bail!("Capture sample rate must be positive");
        }
        if args.period == 0 {
            bail!("Host period must be at least one sample");
        }

        let events = capture.events(&rate)?;
        let runstop = match &args.runstop_signal {
            Some(path) => Some(InputReader::new(path)?.read_f32le()?),
            None => None,
        };
        let start = match &args.start_time {
            Some(text) => parse_start_time(text)?,
            None => SystemClock.now(),
        };

        let mut settings = DecodeSettings::new(capture.sample_rate, rate);
        settings.fail_level = fail_level;
        if args.fuzzy {
            settings.fuzzy = FuzzyPolicy::SkipFrameZero;
        }

        info!(
            "Replaying {} frame(s) at {} fps, {} Hz, period {}",
            events.len(),
            rate,
            capture.sample_rate,
            args.period
        );

        Ok(Self {
            settings,
            events,
            runstop,
            start,
            period: args.period,
            capture_latency: args.capture_latency,
            playback_latency: args.playback_latency,
            realtime: args.realtime,
        })
    }

    /// Samples to play: the whole capture plus a second for latencies and
    /// scheduled MIDI to drain.
    fn total_samples(&self) -> i64 {
        let last = self.events.last().map(|e| e.off_end + 1).unwrap_or(0);
        let signal = self.runstop.as_ref().map_or(0, |s| s.len() as i64);
        last.max(signal)
            + self.capture_latency.max(0)
            + self.playback_latency.max(0)
            + self.settings.sample_rate as i64
    }

    /// Runs the capture through `handler`, sending MTC to `midi` when an
    /// output is attached.
    pub fn run(
        self,
        handler: &mut dyn FrameHandler,
        mtc: Option<(MtcOutput, MidiLog)>,
        multi: Option<&MultiProgress>,
    ) -> Result<()> {
        let total = self.total_samples();
        let periods = (total as usize).div_ceil(self.period);
        let clock = ManualClock::new(self.start);
        let frame_count = self.events.len() as u64;
        let decoder = FrameReplay::new(self.events);
        let (mut producer, mut consumer) =
            decode_channel(self.settings, Box::new(decoder), Arc::new(clock.clone()));
        producer.shared().set_capture_latency(self.capture_latency);
        producer.shared().set_playback_latency(self.playback_latency);

        let midi = match mtc {
            Some((output, log)) => {
                producer.attach_mtc(output);
                Some(log)
            }
            None => None,
        };

        let pb = match multi {
            Some(multi) => Some(create_progress_bar(multi, Some(frame_count), "frames")?),
            None => None,
        };
        let mut handler = Progress {
            inner: handler,
            pb: pb.clone(),
        };

        let mut host = Host {
            producer,
            clock,
            start: self.start,
            sample_rate: self.settings.sample_rate,
            silence: vec![0.0; self.period],
            signal: self.runstop,
            signal_buf: vec![0.0; self.period],
            midi,
        };
        host.producer.shared().run.set(RunMode::Run);

        let midi = if self.realtime {
            let pace = Duration::from_secs_f64(self.period as f64 / self.settings.sample_rate as f64);
            let handle = thread::spawn(move || -> Result<Option<MidiLog>> {
                let started = Instant::now();
                for n in 0..periods {
                    host.step();
                    if let Some(wait) = (started + pace * (n as u32 + 1)).checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
                host.producer.shared().shutdown();
                Ok(host.midi)
            });
            consumer.run(&mut handler, CONSUMER_POLL)?;
            handle
                .join()
                .map_err(|_| anyhow!("Replay host thread panicked"))??
        } else {
            for _ in 0..periods {
                host.step();
                consumer.drain(&mut handler)?;
            }
            host.producer.shared().shutdown();
            consumer.close(&mut handler)?;
            host.midi
        };

        if let Some(mut midi) = midi {
            midi.finish()?;
        }
        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }
        Ok(())
    }
}

/// Stand-in for the audio server.
struct Host {
    producer: DecodeProducer,
    clock: ManualClock,
    start: WallClock,
    sample_rate: u32,
    silence: Vec<f32>,
    signal: Option<Vec<f32>>,
    signal_buf: Vec<f32>,
    midi: Option<MidiLog>,
}

impl Host {
    fn step(&mut self) {
        let now = self.producer.monotonic();
        let nframes = self.silence.len();
        self.clock.set(
            self.start + WallClock::from_secs_f64(now as f64 / self.sample_rate as f64),
        );
        if let Some(midi) = self.midi.as_mut() {
            midi.begin_cycle(now);
        }
        let midi = self.midi.as_mut().map(|m| m as &mut dyn MidiPort);

        match &self.signal {
            Some(signal) => {
                let from = (now as usize).min(signal.len());
                let to = (from + nframes).min(signal.len());
                self.signal_buf.fill(0.0);
                self.signal_buf[..to - from].copy_from_slice(&signal[from..to]);
                self.producer
                    .process(&[&self.silence[..], &self.signal_buf[..]], midi, nframes);
            }
            None => self.producer.process(&[&self.silence[..]], midi, nframes),
        }
    }
}

/// Forwards to the command's handler and advances the progress bar.
struct Progress<'a> {
    inner: &'a mut dyn FrameHandler,
    pb: Option<ProgressBar>,
}

impl FrameHandler for Progress<'_> {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        if let Some(pb) = &self.pb {
            pb.inc(1);
            pb.set_message(frame.timecode.to_string());
        }
        self.inner.on_frame(frame)
    }

    fn on_discontinuity(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        self.inner.on_discontinuity(frame)
    }

    fn on_rate_detected(&mut self, rate: &DetectedRate) -> Result<()> {
        self.inner.on_rate_detected(rate)
    }

    fn on_window_start(&mut self, window: &RecordingWindow) -> Result<()> {
        self.inner.on_window_start(window)
    }

    fn on_window_end(&mut self, window: &RecordingWindow) -> Result<()> {
        self.inner.on_window_end(window)
    }
}

/// Parses RFC 3339 or fractional Unix seconds.
pub fn parse_start_time(text: &str) -> Result<WallClock> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text.trim()) {
        return Ok(WallClock::new(t.timestamp(), t.timestamp_subsec_nanos()));
    }
    match text.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() => Ok(WallClock::from_secs_f64(secs)),
        _ => bail!("Cannot parse start time `{text}`: expected RFC 3339 or Unix seconds"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltc::structs::frame::LtcFrame;

    #[derive(Default)]
    struct Collect {
        frames: Vec<CorrelatedFrame>,
        ends: usize,
    }

    impl FrameHandler for Collect {
        fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
            self.frames.push(*frame);
            Ok(())
        }

        fn on_window_end(&mut self, _window: &RecordingWindow) -> Result<()> {
            self.ends += 1;
            Ok(())
        }
    }

    fn replay(realtime: bool) -> Replay {
        let rate = FrameRate::default();
        let events = (0..10)
            .map(|i| {
                let mut frame = LtcFrame::default();
                frame.set_time(1, 0, 0, i as u8);
                DecodedFrameEvent {
                    frame,
                    off_start: 1920 * i,
                    off_end: 1920 * (i + 1) - 1,
                    ..Default::default()
                }
            })
            .collect();
        Replay {
            settings: DecodeSettings::new(48000, rate),
            events,
            runstop: None,
            start: WallClock::new(1_700_000_000, 0),
            period: 480,
            capture_latency: 0,
            playback_latency: 0,
            realtime,
        }
    }

    #[test]
    fn lockstep_replay_places_frames_on_the_clock() -> Result<()> {
        let mut collect = Collect::default();
        replay(false).run(&mut collect, None, None)?;

        assert_eq!(collect.frames.len(), 10);
        assert_eq!(collect.ends, 1);
        assert_eq!(collect.frames[3].timecode.frames, 3);
        let start = collect.frames[3].start.expect("correlated");
        let expected = 1_700_000_000.0 + collect.frames[3].off_start as f64 / 48000.0;
        assert!((start.as_secs_f64() - expected).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn start_time_formats() -> Result<()> {
        assert_eq!(
            parse_start_time("2024-03-05T10:20:30.5Z")?,
            WallClock::new(1_709_634_030, 500_000_000)
        );
        assert_eq!(parse_start_time("12.25")?, WallClock::new(12, 250_000_000));
        assert!(parse_start_time("yesterday").is_err());
        Ok(())
    }
}

//! MIDI Time Code
//!
//! [`MtcTranslator`] turns decoded LTC frames into MTC messages stamped with
//! the monotonic sample position at which they are due. Messages travel to
//! the real-time context through an SPSC queue, where [`MtcOutput`] hands the
//! ones due in the current cycle to a [`MidiPort`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use log::{debug, trace, warn};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};

use crate::log_or_err;
use crate::process::detect::FrameRateTracker;
use crate::structs::event::DecodedFrameEvent;
use crate::structs::frame::TvStandard;
use crate::structs::timecode::Timecode;
use crate::utils::errors::{FrameRateError, SignalError};

/// Quarter-frame status byte.
pub const MTC_QUARTER_FRAME: u8 = 0xF1;

/// Largest MTC message, a full-frame sysex.
pub const MTC_MAX_MESSAGE: usize = 10;

/// Default queue depth: eight quarter frames for each of 30 frames.
pub const DEFAULT_MTC_QUEUE: usize = 8 * 30;

/// MTC frame rate code, stored in bits 5..6 of the hours byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MtcRate {
    Film24 = 0x00,
    Ebu25 = 0x20,
    DropFrame30 = 0x40,
    NonDrop30 = 0x60,
}

impl Display for MtcRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MtcRate::Film24 => "24",
            MtcRate::Ebu25 => "25",
            MtcRate::DropFrame30 => "29.97 df",
            MtcRate::NonDrop30 => "30",
        })
    }
}

impl MtcRate {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x60 {
            0x00 => MtcRate::Film24,
            0x20 => MtcRate::Ebu25,
            0x40 => MtcRate::DropFrame30,
            _ => MtcRate::NonDrop30,
        }
    }

    /// Maps an integer LTC rate to the MTC rate and the television standard
    /// used for frame arithmetic. `None` for rates MTC cannot express.
    ///
    /// 30 fps maps to drop-frame when the frame carries the drop bit or
    /// `force_drop_frame` is set.
    pub fn for_ltc(fps: u32, drop_frame: bool, force_drop_frame: bool) -> Option<(Self, TvStandard)> {
        match fps {
            24 => Some((MtcRate::Film24, TvStandard::Film24)),
            25 => Some((MtcRate::Ebu25, TvStandard::Tv625_50)),
            29 => Some((MtcRate::DropFrame30, TvStandard::Tv525_60)),
            30 if drop_frame || force_drop_frame => {
                Some((MtcRate::DropFrame30, TvStandard::Tv525_60))
            }
            30 => Some((MtcRate::NonDrop30, TvStandard::Tv1125_60)),
            _ => None,
        }
    }
}

/// One scheduled MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtcEvent {
    /// Monotonic sample position the message is due at.
    pub position: i64,
    len: u8,
    bytes: [u8; MTC_MAX_MESSAGE],
}

impl MtcEvent {
    pub fn new(position: i64, data: &[u8]) -> Self {
        let len = data.len().min(MTC_MAX_MESSAGE);
        let mut bytes = [0u8; MTC_MAX_MESSAGE];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            position,
            len: len as u8,
            bytes,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Data byte of quarter-frame message `piece` (0..8).
pub fn quarter_frame_data(tc: &Timecode, rate: MtcRate, piece: u8) -> u8 {
    let hours = rate.bits() | tc.hours;
    let nibble = match piece & 7 {
        0 => tc.frames & 0xF,
        1 => (tc.frames & 0xF0) >> 4,
        2 => tc.seconds & 0xF,
        3 => (tc.seconds & 0xF0) >> 4,
        4 => tc.minutes & 0xF,
        5 => (tc.minutes & 0xF0) >> 4,
        6 => hours & 0xF,
        _ => (hours & 0xF0) >> 4,
    };
    (piece & 7) << 4 | nibble
}

/// Full-frame sysex `F0 7F 7F 01 01 hh mm ss ff F7`.
pub fn full_frame_sysex(tc: &Timecode, rate: MtcRate) -> [u8; MTC_MAX_MESSAGE] {
    [
        0xF0,
        0x7F,
        0x7F,
        0x01,
        0x01,
        (rate.bits() & 0x60) | (tc.hours & 0x1F),
        tc.minutes & 0x7F,
        tc.seconds & 0x7F,
        tc.frames & 0x7F,
        0xF7,
    ]
}

/// Direction of the last quarter-frame run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// Quarter-frame cycle state.
///
/// A full timecode is spread over eight messages, i.e. two frames. The
/// timecode is latched when the cycle starts so the second half still
/// describes the same frame.
#[derive(Debug, Clone, Default)]
pub struct MtcSequencer {
    next_quarter: u8,
    latched: Timecode,
    direction: Direction,
    misaligned: usize,
}

impl MtcSequencer {
    pub fn next_quarter(&self) -> u8 {
        self.next_quarter
    }

    pub fn latched(&self) -> &Timecode {
        &self.latched
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Times the cycle index had to be reset.
    pub fn misaligned(&self) -> usize {
        self.misaligned
    }

    /// Emits the next four quarter-frame messages for `tc`, spaced
    /// `duration / 4` samples apart starting at `position`.
    ///
    /// Returns the number of messages emitted; zero when a non-25 fps cycle
    /// would start on an odd frame number.
    pub fn quarter_frames(
        &mut self,
        tc: &Timecode,
        rate: MtcRate,
        reverse: bool,
        duration: i64,
        position: i64,
        out: &mut Vec<MtcEvent>,
    ) -> usize {
        if self.next_quarter != 0 && self.next_quarter != 4 {
            warn!(
                "Quarter-frame misalignment: {} (should be 0 or 4)",
                self.next_quarter
            );
            self.misaligned += 1;
            self.next_quarter = 0;
        }

        // frame numbers assembled from quarter frames are even, except at 25 fps
        if rate != MtcRate::Ebu25 && tc.frames % 2 == 1 && self.next_quarter == 0 {
            debug!("Re-aligning quarter frames to an even frame number");
            return 0;
        }

        if self.next_quarter == 0 {
            self.latched = *tc;
        }
        self.direction = if reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        };

        let spacing = duration as f64 / 4.0;
        for i in 0..4 {
            if reverse {
                self.next_quarter = (self.next_quarter + 7) % 8;
            }

            let data = quarter_frame_data(&self.latched, rate, self.next_quarter);
            let offset = (i as f64 * spacing) as i64;
            out.push(MtcEvent::new(position + offset, &[MTC_QUARTER_FRAME, data]));

            if !reverse {
                self.next_quarter = (self.next_quarter + 1) % 8;
            }
        }
        4
    }

    pub fn reset(&mut self) {
        self.next_quarter = 0;
    }
}

/// Consumer end of the MTC queue.
pub struct MtcQueue {
    producer: HeapProd<MtcEvent>,
    late: Arc<AtomicUsize>,
    dropped: usize,
    reported_late: usize,
}

impl MtcQueue {
    /// Queues `event`; returns `false` when the queue is full.
    pub fn push(&mut self, event: MtcEvent) -> bool {
        if self.producer.try_push(event).is_ok() {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Messages discarded because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Messages the output stage dropped for being late.
    pub fn late(&self) -> usize {
        self.late.load(Ordering::Relaxed)
    }

    /// Late messages since the last call.
    pub fn take_late(&mut self) -> usize {
        let late = self.late();
        let new = late - self.reported_late;
        self.reported_late = late;
        new
    }
}

/// Destination for MIDI messages of the current cycle.
pub trait MidiPort {
    /// Writes `data` at sample `time` relative to the start of the cycle.
    fn write(&mut self, time: u32, data: &[u8]);
}

/// Real-time end of the MTC queue.
pub struct MtcOutput {
    consumer: HeapCons<MtcEvent>,
    late: Arc<AtomicUsize>,
}

impl MtcOutput {
    /// Delivers queued messages due in `[now, now + nframes)` after
    /// subtracting `output_latency`. Messages for later cycles stay queued;
    /// messages for past cycles are dropped and counted.
    ///
    /// Returns the number of messages written.
    pub fn deliver(
        &mut self,
        now: i64,
        nframes: u32,
        output_latency: i64,
        port: &mut dyn MidiPort,
    ) -> usize {
        let mut written = 0;
        while let Some(event) = self.consumer.try_peek() {
            let mt = event.position - output_latency;
            if mt >= now + nframes as i64 {
                break;
            }
            if mt < now {
                self.late.fetch_add(1, Ordering::Relaxed);
            } else {
                port.write((mt - now) as u32, event.data());
                written += 1;
            }
            self.consumer.skip(1);
        }
        written
    }

    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }
}

/// Creates the MTC queue between translator and output stage.
pub fn mtc_channel(capacity: usize) -> (MtcQueue, MtcOutput) {
    let (producer, consumer) = HeapRb::new(capacity.max(8)).split();
    let late = Arc::new(AtomicUsize::new(0));
    (
        MtcQueue {
            producer,
            late: late.clone(),
            dropped: 0,
            reported_late: 0,
        },
        MtcOutput { consumer, late },
    )
}

/// Translator options.
#[derive(Debug, Clone)]
pub struct MtcSettings {
    pub sample_rate: u32,
    /// Rate assumed until one is detected.
    pub fps: u32,
    pub detect_fps: bool,
    /// Announce 30 fps as drop-frame even without the drop bit.
    pub force_drop_frame: bool,
    /// Send full-frame sysex instead of quarter frames.
    pub sysex: bool,
}

impl Default for MtcSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            fps: 25,
            detect_fps: false,
            force_drop_frame: false,
            sysex: false,
        }
    }
}

/// Converts decoded LTC frames into scheduled MTC messages.
pub struct MtcTranslator {
    settings: MtcSettings,
    sequencer: MtcSequencer,
    tracker: Option<FrameRateTracker>,
    previous: Option<Timecode>,
    rate_warned: bool,
    pub fail_level: log::Level,
}

impl MtcTranslator {
    pub fn new(settings: MtcSettings) -> Self {
        let tracker = settings
            .detect_fps
            .then(|| FrameRateTracker::with_initial(settings.fps));
        Self {
            settings,
            sequencer: MtcSequencer::default(),
            tracker,
            previous: None,
            rate_warned: false,
            fail_level: log::Level::Error,
        }
    }

    /// - `log::Level::Error`: only fail on Error level messages (default)
    /// - `log::Level::Warn`: fail on unsupported rates and late messages
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    pub fn sequencer(&self) -> &MtcSequencer {
        &self.sequencer
    }

    pub fn fps(&self) -> u32 {
        self.tracker
            .as_ref()
            .and_then(|t| t.fps())
            .unwrap_or(self.settings.fps)
    }

    /// Translates one frame. `latency` is the total delay in samples between
    /// the LTC signal entering and the MTC leaving, including any processing
    /// delay of the consumer.
    ///
    /// Returns the number of messages appended to `out`.
    pub fn translate(
        &mut self,
        event: &DecodedFrameEvent,
        latency: i64,
        out: &mut Vec<MtcEvent>,
    ) -> Result<usize> {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.observe(event);
        }
        let fps = self.fps();

        let (rate, standard) = match MtcRate::for_ltc(fps, event.frame.drop_frame, self.settings.force_drop_frame) {
            Some(mapping) => {
                self.rate_warned = false;
                mapping
            }
            None => {
                if !self.rate_warned {
                    self.rate_warned = true;
                    log_or_err!(self, log::Level::Warn, FrameRateError::UnsupportedMtcRate(fps));
                }
                (MtcRate::Ebu25, TvStandard::Tv625_50)
            }
        };

        let tc = Timecode::from_frame(&event.frame, false);
        let moving = self.previous != Some(tc);
        self.previous = Some(tc);

        let mut frame = event.frame;
        let duration = 1 + event.off_end - event.off_start;
        let mut off_end = event.off_end;

        trace!(
            "{} | {:8} {:8}{}",
            frame,
            event.off_start,
            event.off_end,
            if event.reverse { " R" } else { "  " }
        );

        // a decoded frame has just passed; send the one starting now
        let alignment = standard.frame_alignment(self.settings.sample_rate as f64 / fps.max(1) as f64);
        if !moving {
            trace!("Not moving");
        } else if !event.reverse {
            frame.increment(fps, standard, false);
            off_end += alignment;
        } else {
            frame.decrement(fps, standard, false);
            off_end += duration + alignment;
        }

        if latency > 0 && duration > 0 {
            let extra = (latency as f64 / duration as f64).ceil() as i64;
            for _ in 0..extra {
                if event.reverse {
                    frame.decrement(fps, standard, false);
                } else {
                    frame.increment(fps, standard, false);
                }
                off_end += duration;
            }
            trace!("Latency of {latency} samples, extrapolated {extra} frame(s)");
        }

        let tc = Timecode::from_frame(&frame, false);
        let position = off_end + 1;
        if self.settings.sysex {
            out.push(MtcEvent::new(position, &full_frame_sysex(&tc, rate)));
            Ok(1)
        } else {
            Ok(self
                .sequencer
                .quarter_frames(&tc, rate, event.reverse, duration, position, out))
        }
    }

    /// Logs messages the output stage dropped since the last call.
    pub fn report_late(&self, queue: &mut MtcQueue) -> Result<()> {
        let count = queue.take_late();
        if count > 0 {
            log_or_err!(self, log::Level::Warn, SignalError::LateMidi { count });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::frame::LtcFrame;

    #[derive(Default)]
    struct CapturePort(Vec<(u32, Vec<u8>)>);

    impl MidiPort for CapturePort {
        fn write(&mut self, time: u32, data: &[u8]) {
            self.0.push((time, data.to_vec()));
        }
    }

    fn reassemble(messages: &[MtcEvent]) -> (Timecode, MtcRate) {
        let mut nibbles = [0u8; 8];
        for m in messages {
            let data = m.data();
            assert_eq!(data[0], MTC_QUARTER_FRAME);
            nibbles[(data[1] >> 4) as usize] = data[1] & 0xF;
        }
        let hours = nibbles[6] | nibbles[7] << 4;
        (
            Timecode::new(
                hours & 0x1F,
                nibbles[4] | nibbles[5] << 4,
                nibbles[2] | nibbles[3] << 4,
                nibbles[0] | nibbles[1] << 4,
            ),
            MtcRate::from_bits(hours),
        )
    }

    fn event(h: u8, m: u8, s: u8, f: u8, start: i64, len: i64) -> DecodedFrameEvent {
        let mut frame = LtcFrame::default();
        frame.set_time(h, m, s, f);
        DecodedFrameEvent {
            frame,
            off_start: start,
            off_end: start + len - 1,
            ..Default::default()
        }
    }

    #[test]
    fn eight_quarter_frames_reassemble_latched_timecode() {
        let mut seq = MtcSequencer::default();
        let mut out = Vec::new();
        let first = Timecode::new(10, 20, 30, 12);
        assert_eq!(seq.quarter_frames(&first, MtcRate::Ebu25, false, 1920, 0, &mut out), 4);
        assert_eq!(seq.next_quarter(), 4);
        let second = Timecode::new(10, 20, 30, 13);
        seq.quarter_frames(&second, MtcRate::Ebu25, false, 1920, 1920, &mut out);
        assert_eq!(seq.next_quarter(), 0);

        assert_eq!(out.len(), 8);
        let positions: Vec<i64> = out.iter().map(|e| e.position).collect();
        assert_eq!(positions, [0, 480, 960, 1440, 1920, 2400, 2880, 3360]);
        assert_eq!(reassemble(&out), (first, MtcRate::Ebu25));
    }

    #[test]
    fn reverse_run_counts_pieces_down() {
        let mut seq = MtcSequencer::default();
        let mut out = Vec::new();
        let tc = Timecode::new(1, 2, 3, 4);
        seq.quarter_frames(&tc, MtcRate::Film24, true, 2000, 0, &mut out);
        seq.quarter_frames(&tc, MtcRate::Film24, true, 2000, 2000, &mut out);
        let pieces: Vec<u8> = out.iter().map(|e| e.data()[1] >> 4).collect();
        assert_eq!(pieces, [7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(reassemble(&out), (tc, MtcRate::Film24));
        assert_eq!(seq.direction(), Direction::Reverse);
    }

    #[test]
    fn odd_frame_does_not_start_a_cycle_except_at_25() {
        let mut seq = MtcSequencer::default();
        let mut out = Vec::new();
        let odd = Timecode::new(0, 0, 0, 3);
        assert_eq!(seq.quarter_frames(&odd, MtcRate::NonDrop30, false, 1600, 0, &mut out), 0);
        assert!(out.is_empty());
        assert_eq!(seq.quarter_frames(&odd, MtcRate::Ebu25, false, 1600, 0, &mut out), 4);
    }

    #[test]
    fn sysex_layout() {
        let sysex = full_frame_sysex(&Timecode::new(23, 59, 58, 29), MtcRate::DropFrame30);
        assert_eq!(sysex, [0xF0, 0x7F, 0x7F, 0x01, 0x01, 0x40 | 23, 59, 58, 29, 0xF7]);
    }

    #[test]
    fn rate_mapping() {
        assert_eq!(MtcRate::for_ltc(24, false, false).unwrap().0, MtcRate::Film24);
        assert_eq!(MtcRate::for_ltc(25, false, false).unwrap().0, MtcRate::Ebu25);
        assert_eq!(MtcRate::for_ltc(29, false, false).unwrap().0, MtcRate::DropFrame30);
        assert_eq!(MtcRate::for_ltc(30, true, false).unwrap().0, MtcRate::DropFrame30);
        assert_eq!(MtcRate::for_ltc(30, false, true).unwrap().0, MtcRate::DropFrame30);
        assert_eq!(MtcRate::for_ltc(30, false, false).unwrap().0, MtcRate::NonDrop30);
        assert!(MtcRate::for_ltc(50, false, false).is_none());
    }

    #[test]
    fn translator_sends_next_frame_at_frame_end() {
        let mut translator = MtcTranslator::new(MtcSettings {
            sysex: true,
            ..Default::default()
        });
        let mut out = Vec::new();
        translator.translate(&event(0, 0, 0, 24, 0, 1920), 0, &mut out).unwrap();
        // 625/50 alignment at 1920 samples per frame is 3 samples
        assert_eq!(out[0].position, 1920 + 3);
        assert_eq!(&out[0].data()[5..9], &[0x20, 0, 1, 0]);

        // same timecode again: not moving, no increment
        out.clear();
        translator.translate(&event(0, 0, 0, 24, 1920, 1920), 0, &mut out).unwrap();
        assert_eq!(out[0].position, 3840);
        assert_eq!(&out[0].data()[5..9], &[0x20, 0, 0, 24]);
    }

    #[test]
    fn translator_extrapolates_latency() {
        let mut translator = MtcTranslator::new(MtcSettings {
            sysex: true,
            ..Default::default()
        });
        let mut out = Vec::new();
        translator.translate(&event(0, 0, 10, 0, 0, 1920), 2000, &mut out).unwrap();
        // one frame for the passed frame, two to cover 2000 samples
        assert_eq!(&out[0].data()[5..9], &[0x20, 0, 10, 3]);
        assert_eq!(out[0].position, 1920 + 3 + 2 * 1920);
    }

    #[test]
    fn unsupported_rate_is_fatal_in_strict_mode() {
        let mut translator = MtcTranslator::new(MtcSettings {
            fps: 50,
            ..Default::default()
        });
        translator.set_fail_level(log::Level::Warn);
        let mut out = Vec::new();
        assert!(translator.translate(&event(0, 0, 0, 0, 0, 960), 0, &mut out).is_err());
    }

    #[test]
    fn output_stage_delivers_due_and_drops_late() {
        let (mut queue, mut output) = mtc_channel(16);
        for pos in [100, 600, 1300, 2300] {
            queue.push(MtcEvent::new(pos, &[MTC_QUARTER_FRAME, 0]));
        }
        let mut port = CapturePort::default();

        // cycle [1024, 2048) with 100 samples of output latency
        assert_eq!(output.deliver(1024, 1024, 100, &mut port), 1);
        assert_eq!(port.0, vec![(176, vec![MTC_QUARTER_FRAME, 0])]);
        assert_eq!(queue.late(), 2);
        assert_eq!(output.pending(), 1);

        assert_eq!(output.deliver(2048, 1024, 100, &mut port), 1);
        assert_eq!(port.0[1].0, 152);
        assert_eq!(queue.take_late(), 2);
        assert_eq!(queue.take_late(), 0);
    }
}

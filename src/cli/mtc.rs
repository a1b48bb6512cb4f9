use std::fs::File;
use std::io::{self, BufWriter, Write};

use anyhow::Result;
use indicatif::MultiProgress;
use log::{info, warn};

use ltc::process::decode::{CorrelatedFrame, FrameHandler};
use ltc::process::mtc::{
    DEFAULT_MTC_QUEUE, MidiPort, MtcEvent, MtcQueue, MtcSettings, MtcTranslator, mtc_channel,
};

use super::command::{Cli, MtcArgs};
use super::replay::Replay;

/// MIDI port that prints each message with its absolute sample position.
pub struct MidiLog {
    out: Box<dyn Write + Send>,
    cycle: i64,
    written: usize,
    error: Option<io::Error>,
}

impl MidiLog {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            cycle: 0,
            written: 0,
            error: None,
        }
    }

    /// Sample position of the first sample of the coming cycle.
    pub fn begin_cycle(&mut self, start: i64) {
        self.cycle = start;
    }

    /// Flushes the output and returns the first write error, if any.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err.into());
        }
        self.out.flush()?;
        info!("{} MIDI message(s) written", self.written);
        Ok(())
    }
}

impl MidiPort for MidiLog {
    fn write(&mut self, time: u32, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        let bytes: Vec<String> = data.iter().map(|b| format!("{b:02X}")).collect();
        match writeln!(
            self.out,
            "{:>10} {:>5} | {}",
            self.cycle + time as i64,
            time,
            bytes.join(" ")
        ) {
            Ok(()) => self.written += 1,
            Err(err) => self.error = Some(err),
        }
    }
}

/// Translates each frame and queues the result for the output stage.
pub struct MtcHandler {
    translator: MtcTranslator,
    queue: MtcQueue,
    scratch: Vec<MtcEvent>,
    reported_drops: usize,
}

impl MtcHandler {
    pub fn new(translator: MtcTranslator, queue: MtcQueue) -> Self {
        Self {
            translator,
            queue,
            scratch: Vec::new(),
            reported_drops: 0,
        }
    }

    /// Reports what is still outstanding once the replay has ended.
    pub fn finish(&mut self) -> Result<()> {
        self.translator.report_late(&mut self.queue)?;
        if self.translator.sequencer().misaligned() > 0 {
            warn!(
                "{} quarter-frame cycle(s) started off the frame boundary",
                self.translator.sequencer().misaligned()
            );
        }
        Ok(())
    }
}

impl FrameHandler for MtcHandler {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        self.translator.report_late(&mut self.queue)?;

        self.scratch.clear();
        self.translator
            .translate(&frame.event, frame.latency, &mut self.scratch)?;
        for event in self.scratch.drain(..) {
            self.queue.push(event);
        }

        let dropped = self.queue.dropped();
        if dropped != self.reported_drops {
            warn!(
                "MTC queue full, {} message(s) dropped",
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }
        Ok(())
    }
}

pub fn cmd_mtc(args: &MtcArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let mut replay = Replay::from_args(&args.replay, cli.fail_level())?;
    replay.settings.detect_fps = args.detect_fps;

    let mut translator = MtcTranslator::new(MtcSettings {
        sample_rate: replay.settings.sample_rate,
        fps: replay.settings.rate.nominal(),
        detect_fps: args.detect_fps,
        force_drop_frame: args.force_drop,
        sysex: args.sysex,
    });
    translator.set_fail_level(cli.fail_level());

    let out: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let (queue, output) = mtc_channel(DEFAULT_MTC_QUEUE);
    let mut handler = MtcHandler::new(translator, queue);

    replay.run(&mut handler, Some((output, MidiLog::new(out))), multi)?;
    handler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use ltc::process::decode::DecodeSettings;
    use ltc::structs::event::{DecodedFrameEvent, WallClock};
    use ltc::structs::frame::LtcFrame;
    use ltc::structs::framerate::FrameRate;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn replay() -> Replay {
        let events = (0..30)
            .map(|i| {
                let mut frame = LtcFrame::default();
                frame.set_time(0, 0, (i / 25) as u8, (i % 25) as u8);
                DecodedFrameEvent {
                    frame,
                    off_start: 1920 * i,
                    off_end: 1920 * (i + 1) - 1,
                    ..Default::default()
                }
            })
            .collect();
        Replay {
            settings: DecodeSettings::new(48000, FrameRate::default()),
            events,
            runstop: None,
            start: WallClock::new(1_700_000_000, 0),
            period: 480,
            capture_latency: 0,
            playback_latency: 0,
            realtime: false,
        }
    }

    fn run(sysex: bool) -> Result<Vec<String>> {
        let translator = MtcTranslator::new(MtcSettings {
            sysex,
            ..Default::default()
        });
        let (queue, output) = mtc_channel(DEFAULT_MTC_QUEUE);
        let mut handler = MtcHandler::new(translator, queue);
        let buf = SharedBuf::default();

        replay().run(&mut handler, Some((output, MidiLog::new(Box::new(buf.clone())))), None)?;
        handler.finish()?;

        let text = String::from_utf8(buf.0.lock().unwrap().clone())?;
        Ok(text.lines().map(str::to_string).collect())
    }

    #[test]
    fn sysex_sends_one_message_per_frame() -> Result<()> {
        let lines = run(true)?;
        assert_eq!(lines.len(), 30);
        assert!(lines.iter().all(|l| l.contains("| F0 7F 7F 01 01")));
        // ahead by the latency of one period plus the frame in flight
        assert!(lines[0].ends_with("20 00 00 02 F7"));
        Ok(())
    }

    #[test]
    fn quarter_frames_are_time_ordered() -> Result<()> {
        let lines = run(false)?;
        assert!(lines.len() >= 100);
        let positions: Vec<i64> = lines
            .iter()
            .map(|l| l.split_whitespace().next().unwrap().parse().unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
        assert!(lines.iter().all(|l| l.contains("| F1 ")));
        Ok(())
    }

    #[test]
    fn midi_log_format() -> Result<()> {
        let buf = SharedBuf::default();
        let mut log = MidiLog::new(Box::new(buf.clone()));
        log.begin_cycle(960);
        log.write(12, &[0xF1, 0x2A]);
        log.finish()?;
        assert_eq!(log.written, 1);
        assert_eq!(
            String::from_utf8(buf.0.lock().unwrap().clone())?,
            "       972    12 | F1 2A\n"
        );
        Ok(())
    }
}

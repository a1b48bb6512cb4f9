use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use indicatif::MultiProgress;
use log::info;

use ltc::process::decode::{CorrelatedFrame, FrameHandler, TextLog};
use ltc::process::detect::DetectedRate;
use ltc::process::runstop::{RecordingWindow, RunStopSettings};

use super::command::{Cli, DumpArgs};
use super::replay::Replay;
use crate::timestamp::file_stamp;

/// Log file of one recording window. Written under a `.new` name and
/// renamed once the window has ended.
struct WindowFile {
    log: TextLog<BufWriter<File>>,
    partial: PathBuf,
    path: PathBuf,
}

impl WindowFile {
    fn create(prefix: &Path, window: &RecordingWindow, use_date: bool) -> Result<Self> {
        let path = window_path(prefix, window);
        let partial = path.with_extension("tme.new");
        let mut log = TextLog::new(BufWriter::new(File::create(&partial)?), use_date);
        log.write_header()?;
        log.on_window_start(window)?;
        Ok(Self { log, partial, path })
    }

    fn close(mut self, window: &RecordingWindow) -> Result<PathBuf> {
        self.log.on_window_end(window)?;
        self.log.get_mut().flush()?;
        drop(self.log);
        fs::rename(&self.partial, &self.path)?;
        Ok(self.path)
    }
}

/// `PREFIX-YYYYmmdd-HHMMSS.tme`, stamped with the window start.
fn window_path(prefix: &Path, window: &RecordingWindow) -> PathBuf {
    let name = format!(
        "{}-{}.tme",
        prefix.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        file_stamp(window.start_wallclock)
    );
    prefix.with_file_name(name)
}

pub struct DumpHandler<W: Write> {
    out: TextLog<W>,
    prefix: Option<PathBuf>,
    use_date: bool,
    window: Option<WindowFile>,
    written: Vec<PathBuf>,
}

impl<W: Write> DumpHandler<W> {
    pub fn new(out: W, use_date: bool, prefix: Option<PathBuf>) -> io::Result<Self> {
        let mut out = TextLog::new(out, use_date);
        out.write_header()?;
        Ok(Self {
            out,
            prefix,
            use_date,
            window: None,
            written: Vec::new(),
        })
    }

    /// Window files completed so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> FrameHandler for DumpHandler<W> {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        if let Some(window) = self.window.as_mut() {
            window.log.on_frame(frame)?;
        }
        self.out.on_frame(frame)
    }

    fn on_discontinuity(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        if let Some(window) = self.window.as_mut() {
            window.log.on_discontinuity(frame)?;
        }
        self.out.on_discontinuity(frame)
    }

    fn on_rate_detected(&mut self, rate: &DetectedRate) -> Result<()> {
        info!(
            "Detected {}{} fps",
            rate.fps,
            if rate.drop_frame { " drop-frame" } else { "" }
        );
        self.out.on_rate_detected(rate)
    }

    fn on_window_start(&mut self, window: &RecordingWindow) -> Result<()> {
        if let Some(prefix) = &self.prefix {
            let file = WindowFile::create(prefix, window, self.use_date)?;
            info!("Recording to {}", file.partial.display());
            self.window = Some(file);
        }
        self.out.on_window_start(window)
    }

    fn on_window_end(&mut self, window: &RecordingWindow) -> Result<()> {
        if let Some(file) = self.window.take() {
            let path = file.close(window)?;
            info!("Closed {}", path.display());
            self.written.push(path);
        }
        self.out.on_window_end(window)
    }
}

pub fn cmd_dump(args: &DumpArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let mut replay = Replay::from_args(&args.replay, cli.fail_level())?;
    replay.settings.detect_fps = args.detect_fps;
    replay.settings.use_date = args.use_date;

    if args.runstop {
        if replay.runstop.is_none() {
            bail!("--runstop needs a run/stop signal (--runstop-signal)");
        }
        replay.settings.runstop = Some(RunStopSettings::new(args.highpass, args.rs_threshold));
    } else if args.output.is_some() {
        bail!("--output writes run/stop windows and needs --runstop");
    }

    let stdout = BufWriter::new(io::stdout().lock());
    let mut handler = DumpHandler::new(stdout, args.use_date, args.output.clone())?;
    replay.run(&mut handler, None, multi)?;

    info!("{} window file(s) written", handler.written().len());
    handler.into_inner().flush()?;
    Ok(())
}

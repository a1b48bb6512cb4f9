use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use indicatif::MultiProgress;
use log::{debug, info};

use ltc::process::decode::{CorrelatedFrame, FrameHandler};
use ltc::process::ntp::{ClockSegment, NTP_SHM_KEY, NtpWriter, ShmTime};
use ltc::utils::clock::ManualClock;
use ltc::utils::errors::SegmentError;
use ltctools_macros::ToBytes;

use super::command::{Cli, NtpArgs};
use super::replay::Replay;
use crate::byteorder::WriteBytesLe;

/// `struct shmTime` as laid out on x86-64.
pub const SHM_TIME_LEN: u64 = 56;

/// Offset of `valid` in [`SHM_TIME_LEN`] bytes.
const VALID_OFFSET: u64 = 48;

#[derive(ToBytes)]
struct ShmTimeRecord {
    mode: i32,
    count: i32,
    clock_sec: i64,
    clock_usec: i32,
    _pad0: [u8; 4],
    receive_sec: i64,
    receive_usec: i32,
    leap: i32,
    precision: i32,
    nsamples: i32,
    valid: i32,
    _pad1: [u8; 4],
}

impl From<&ShmTime> for ShmTimeRecord {
    fn from(t: &ShmTime) -> Self {
        Self {
            mode: t.mode,
            count: t.count,
            clock_sec: t.clock_sec,
            clock_usec: t.clock_usec,
            _pad0: [0; 4],
            receive_sec: t.receive_sec,
            receive_usec: t.receive_usec,
            leap: t.leap,
            precision: t.precision,
            nsamples: t.nsamples,
            valid: t.valid,
            _pad1: [0; 4],
        }
    }
}

/// File holding one `shmTime` record, standing in for the SysV segment.
pub struct FileSegment {
    file: File,
    commits: usize,
}

impl FileSegment {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.set_len(SHM_TIME_LEN)?;
        } else if len < SHM_TIME_LEN {
            return Err(SegmentError::Truncated(len).into());
        }
        Ok(Self { file, commits: 0 })
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl ClockSegment for FileSegment {
    fn is_valid(&mut self) -> Result<bool> {
        let mut valid = [0u8; 4];
        self.file.seek(SeekFrom::Start(VALID_OFFSET))?;
        self.file.read_exact(&mut valid)?;
        Ok(i32::from_le_bytes(valid) != 0)
    }

    fn commit(&mut self, time: &ShmTime) -> Result<()> {
        let mut bytes = Vec::with_capacity(SHM_TIME_LEN as usize);
        ShmTimeRecord::from(time).write_le(&mut bytes);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        self.commits += 1;
        Ok(())
    }
}

pub struct NtpHandler<S> {
    writer: NtpWriter<S>,
    clock: ManualClock,
    sent: usize,
}

impl<S: ClockSegment> NtpHandler<S> {
    /// `clock` is set to the wall clock of each frame before it is written,
    /// so receive stamps follow the replayed signal.
    pub fn new(segment: S, use_date: bool, clock: ManualClock) -> Self {
        let writer = NtpWriter::new(segment, use_date, Arc::new(clock.clone()));
        Self {
            writer,
            clock,
            sent: 0,
        }
    }

    pub fn segment(&self) -> &S {
        self.writer.segment()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl<S: ClockSegment> FrameHandler for NtpHandler<S> {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        if let Some(end) = frame.end {
            self.clock.set(end);
        }
        if let Some(sample) = self.writer.write(&frame.event.frame)? {
            if sample.sent {
                self.sent += 1;
                debug!(
                    "{} -> {}{}",
                    sample.timecode,
                    sample.clock,
                    if sample.committed { "" } else { " (segment busy)" }
                );
            }
        }
        Ok(())
    }
}

pub fn cmd_ntp(args: &NtpArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let mut replay = Replay::from_args(&args.replay, cli.fail_level())?;
    replay.settings.use_date = !args.no_date;

    info!(
        "NTP SHM unit {} (key {:#x}) backed by {}",
        args.unit,
        NTP_SHM_KEY + args.unit,
        args.segment.display()
    );
    let segment = FileSegment::open(&args.segment)?;
    let clock = ManualClock::new(replay.start);
    let mut handler = NtpHandler::new(segment, !args.no_date, clock);

    replay.run(&mut handler, None, multi)?;

    info!(
        "{} second(s) decoded, {} sample(s) committed",
        handler.sent(),
        handler.segment().commits()
    );
    Ok(())
}

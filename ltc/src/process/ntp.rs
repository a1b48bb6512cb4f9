//! NTP shared-memory reference clock
//!
//! Decoded frames are turned into second-resolution clock samples and
//! handed to an NTP daemon through the `shmTime` record of its SHM driver
//! (mode 0: the daemon reads the sample and clears `valid`).

use std::sync::Arc;

use anyhow::Result;
use chrono::{FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use log::{debug, trace};

use crate::structs::event::WallClock;
use crate::structs::frame::LtcFrame;
use crate::structs::timecode::{Timecode, USER_DEFINED_TIMEZONE, frame_timezone_code};
use crate::utils::clock::Clock;

/// SysV IPC key of NTP SHM unit 0; unit `n` uses `NTP_SHM_KEY + n`.
pub const NTP_SHM_KEY: u32 = 0x4e54_5030;

/// One clock sample in the layout of the NTP SHM driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShmTime {
    pub mode: i32,
    pub count: i32,
    pub clock_sec: i64,
    pub clock_usec: i32,
    pub receive_sec: i64,
    pub receive_usec: i32,
    pub leap: i32,
    pub precision: i32,
    pub nsamples: i32,
    pub valid: i32,
}

/// Storage shared with the NTP daemon.
pub trait ClockSegment {
    /// The previous sample has not been read yet.
    fn is_valid(&mut self) -> Result<bool>;
    fn commit(&mut self, time: &ShmTime) -> Result<()>;
}

/// What [`NtpWriter::write`] made of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpSample {
    pub timecode: Timecode,
    /// Clock time the frame stands for.
    pub clock: WallClock,
    /// The time differs from the previous frame's.
    pub sent: bool,
    /// A new sample was stored in the segment.
    pub committed: bool,
}

pub struct NtpWriter<S> {
    segment: S,
    use_date: bool,
    clock: Arc<dyn Clock>,
    prev: Option<WallClock>,
}

impl<S: ClockSegment> NtpWriter<S> {
    /// With `use_date`, the date and timezone in the user bits are used
    /// when the binary group flags announce them; otherwise the time of day
    /// is taken as local time today.
    pub fn new(segment: S, use_date: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            segment,
            use_date,
            clock,
            prev: None,
        }
    }

    pub fn segment(&self) -> &S {
        &self.segment
    }

    /// Publishes the time of `frame`. Frames without a representable
    /// clock time are skipped and return `None`.
    pub fn write(&mut self, frame: &LtcFrame) -> Result<Option<NtpSample>> {
        let dated = self.use_date
            && !frame.binary_group_flags[0]
            && frame.binary_group_flags[2];
        let timecode = Timecode::from_frame(frame, dated);
        let now = self.clock.now();

        let clock = if dated {
            dated_clock(&timecode, frame_timezone_code(frame))
        } else {
            local_clock_today(&timecode, now)
        };
        let Some(clock) = clock else {
            debug!("No clock time for {timecode}");
            return Ok(None);
        };

        let mut sample = NtpSample {
            timecode,
            clock,
            sent: false,
            committed: false,
        };
        if self.prev == Some(clock) {
            return Ok(Some(sample));
        }

        if !self.segment.is_valid()? {
            let time = ShmTime {
                mode: 0,
                clock_sec: clock.secs,
                clock_usec: (clock.nanos / 1000) as i32,
                receive_sec: now.secs,
                receive_usec: (now.nanos / 1000) as i32,
                valid: 1,
                ..Default::default()
            };
            self.segment.commit(&time)?;
            sample.committed = true;
            trace!("NTP sample {} received at {}", clock, now);
        }

        self.prev = Some(clock);
        sample.sent = true;
        Ok(Some(sample))
    }
}

fn time_of_day(timecode: &Timecode) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(
        timecode.hours as u32,
        timecode.minutes as u32,
        timecode.seconds as u32,
    )
}

/// Clock time of a frame carrying a date. A user-defined timezone code
/// means the time is local.
fn dated_clock(timecode: &Timecode, code: u8) -> Option<WallClock> {
    let date = timecode.date.and_then(|d| d.to_naive())?;
    let at = NaiveDateTime::new(date, time_of_day(timecode)?);

    let secs = if code == USER_DEFINED_TIMEZONE {
        Local.from_local_datetime(&at).earliest()?.timestamp()
    } else {
        let offset = FixedOffset::east_opt(timecode.timezone.unwrap_or(0) * 60)?;
        offset.from_local_datetime(&at).single()?.timestamp()
    };
    Some(WallClock::new(secs, 0))
}

fn local_clock_today(timecode: &Timecode, now: WallClock) -> Option<WallClock> {
    let today: NaiveDate = now.to_local()?.date_naive();
    let at = NaiveDateTime::new(today, time_of_day(timecode)?);
    let secs = Local.from_local_datetime(&at).earliest()?.timestamp();
    Some(WallClock::new(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::timecode::DateStamp;
    use crate::utils::clock::ManualClock;

    #[derive(Default)]
    struct MemorySegment {
        valid: bool,
        commits: Vec<ShmTime>,
    }

    impl ClockSegment for MemorySegment {
        fn is_valid(&mut self) -> Result<bool> {
            Ok(self.valid)
        }

        fn commit(&mut self, time: &ShmTime) -> Result<()> {
            self.commits.push(*time);
            Ok(())
        }
    }

    fn dated_frame(tz: i32, f: u8) -> LtcFrame {
        let mut frame = LtcFrame::default();
        Timecode {
            date: Some(DateStamp {
                years: 24,
                months: 3,
                days: 5,
            }),
            timezone: Some(tz),
            ..Timecode::new(10, 20, 30, f)
        }
        .write_to(&mut frame);
        frame
    }

    fn writer(use_date: bool) -> NtpWriter<MemorySegment> {
        let clock = ManualClock::new(WallClock::new(1_709_634_031, 5_000_000));
        NtpWriter::new(MemorySegment::default(), use_date, Arc::new(clock))
    }

    #[test]
    fn dated_frames_use_their_timezone() {
        let mut ntp = writer(true);
        // 10:20:30 at +0100 is 09:20:30 UTC
        let sample = ntp.write(&dated_frame(60, 0)).unwrap().unwrap();
        assert!(sample.sent && sample.committed);
        assert_eq!(sample.clock, WallClock::new(1_709_634_030 - 3600, 0));

        let shm = ntp.segment().commits[0];
        assert_eq!(shm.valid, 1);
        assert_eq!(shm.mode, 0);
        assert_eq!(shm.clock_usec, 0);
        assert_eq!(shm.receive_sec, 1_709_634_031);
        assert_eq!(shm.receive_usec, 5_000);
    }

    #[test]
    fn commits_once_per_second() {
        let mut ntp = writer(true);
        for f in 0..25 {
            ntp.write(&dated_frame(0, f)).unwrap();
        }
        assert_eq!(ntp.segment().commits.len(), 1);
        assert_eq!(ntp.segment().commits[0].clock_sec, 1_709_634_030);
    }

    #[test]
    fn unread_sample_is_not_overwritten() {
        let mut ntp = writer(true);
        ntp.segment.valid = true;
        let sample = ntp.write(&dated_frame(0, 0)).unwrap().unwrap();
        assert!(sample.sent);
        assert!(!sample.committed);
        assert!(ntp.segment().commits.is_empty());
    }

    #[test]
    fn undated_frames_are_local_today() {
        let mut ntp = writer(true);
        let mut frame = LtcFrame::default();
        frame.set_time(10, 20, 30, 0);
        let sample = ntp.write(&frame).unwrap().unwrap();

        let today = WallClock::new(1_709_634_031, 0).to_local().unwrap().date_naive();
        let expected = Local
            .from_local_datetime(&today.and_hms_opt(10, 20, 30).unwrap())
            .earliest()
            .unwrap()
            .timestamp();
        assert_eq!(sample.clock.secs, expected);
        assert!(sample.timecode.date.is_none());
    }

    #[test]
    fn date_ignored_without_use_date() {
        let mut ntp = writer(false);
        let sample = ntp.write(&dated_frame(60, 0)).unwrap().unwrap();
        assert!(sample.timecode.date.is_none());
    }
}

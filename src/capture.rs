//! Offline capture files.
//!
//! A capture holds frames that were demodulated ahead of time, with their
//! sample offsets. Frames are listed one by one, or as runs of consecutive
//! frames that are expanded at load time.

use std::path::Path;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use ltc::structs::event::DecodedFrameEvent;
use ltc::structs::frame::LtcFrame;
use ltc::structs::framerate::FrameRate;
use ltc::structs::timecode::{DateStamp, Timecode, parse_timezone};

use crate::input::InputReader;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("Cannot parse capture: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Frame {index}: {message}")]
    BadFrame { index: usize, message: String },

    #[error("Frame {index} ends before it starts ({off_start} > {off_end})")]
    NegativeDuration {
        index: usize,
        off_start: i64,
        off_end: i64,
    },

    #[error("Frame {index} ends at the same offset as the previous frame ({off_end})")]
    DuplicateOffset { index: usize, off_end: i64 },

    #[error("User bits `{0}` must be up to 8 hexadecimal digits")]
    BadUserBits(String),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Capture {
    pub sample_rate: u32,
    /// Rate the capture was recorded at, `NUM[/DEN][df|ndf]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<String>,
    #[serde(default)]
    pub frames: Vec<CapturedFrame>,
    #[serde(default)]
    pub runs: Vec<CapturedRun>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CapturedFrame {
    pub timecode: String,
    pub off_start: i64,
    pub off_end: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_bits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub drop_frame: bool,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default = "default_volume")]
    pub volume_dbfs: f32,
}

/// `count` consecutive frames starting at `start`, each one frame period
/// long.
#[derive(Debug, Deserialize, Serialize)]
pub struct CapturedRun {
    pub start: String,
    pub count: usize,
    pub off_start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default = "default_volume")]
    pub volume_dbfs: f32,
}

fn default_volume() -> f32 {
    -18.0
}

impl Capture {
    pub fn from_yaml(text: &str) -> Result<Self, CaptureError> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = InputReader::new(&path)?;
        if reader.is_pipe() {
            debug!("Reading capture from stdin");
        }
        let text = reader.read_to_string()?;
        Ok(Self::from_yaml(&text)?)
    }

    /// Frame rate of the capture, or `fallback` when none is given.
    pub fn rate(&self, fallback: FrameRate) -> Result<FrameRate> {
        match &self.fps {
            Some(text) => Ok(text.parse()?),
            None => Ok(fallback),
        }
    }

    /// Builds decoder events ordered by end offset.
    pub fn events(&self, rate: &FrameRate) -> Result<Vec<DecodedFrameEvent>> {
        let mut events = Vec::with_capacity(self.frames.len());
        for (index, captured) in self.frames.iter().enumerate() {
            events.push(captured.to_event(index, rate)?);
        }
        for run in &self.runs {
            run.expand(self.sample_rate, rate, &mut events)?;
        }
        events.sort_by_key(|e| e.off_end);
        validate(&events)?;
        Ok(events)
    }
}

impl CapturedFrame {
    fn to_event(&self, index: usize, rate: &FrameRate) -> Result<DecodedFrameEvent> {
        let bad = |e: anyhow::Error| CaptureError::BadFrame {
            index,
            message: e.to_string(),
        };
        let mut frame = LtcFrame {
            drop_frame: self.drop_frame || (rate.drop_frame && rate.nominal() == 30),
            ..Default::default()
        };
        if let Some(bits) = &self.user_bits {
            frame.user_bits = parse_user_bits(bits)?;
        }
        let timecode = dated_timecode(&self.timecode, &self.date, &self.timezone, rate).map_err(bad)?;
        timecode.write_to(&mut frame);
        frame.set_parity(rate.tv_standard());

        Ok(DecodedFrameEvent {
            frame,
            off_start: self.off_start,
            off_end: self.off_end,
            reverse: self.reverse,
            volume_dbfs: self.volume_dbfs,
        })
    }
}

impl CapturedRun {
    fn expand(&self, sample_rate: u32, rate: &FrameRate, out: &mut Vec<DecodedFrameEvent>) -> Result<()> {
        let standard = rate.tv_standard();
        let fps = rate.nominal();
        let mut frame = LtcFrame {
            drop_frame: rate.drop_frame && fps == 30,
            ..Default::default()
        };
        dated_timecode(&self.start, &self.date, &self.timezone, rate)?.write_to(&mut frame);
        frame.set_parity(standard);

        let spf = rate.samples_per_frame(sample_rate);
        for n in 0..self.count {
            let off_start = self.off_start + (n as f64 * spf).round() as i64;
            let off_end = self.off_start + ((n + 1) as f64 * spf).round() as i64 - 1;
            out.push(DecodedFrameEvent {
                frame,
                off_start,
                off_end,
                reverse: self.reverse,
                volume_dbfs: self.volume_dbfs,
            });
            if self.reverse {
                frame.decrement(fps, standard, true);
            } else {
                frame.increment(fps, standard, true);
            }
        }
        Ok(())
    }
}

fn dated_timecode(
    text: &str,
    date: &Option<String>,
    timezone: &Option<String>,
    rate: &FrameRate,
) -> Result<Timecode> {
    let mut timecode = Timecode::parse(text, rate)?;
    if let Some(date) = date {
        timecode.date = Some(DateStamp::parse(date)?);
        if let Some(tz) = timezone {
            timecode.timezone = Some(parse_timezone(tz)?);
        }
    }
    Ok(timecode)
}

/// Parses user bits written nibble 8 first, as in the decode log.
fn parse_user_bits(text: &str) -> Result<[u8; 8], CaptureError> {
    let text = text.trim();
    if text.is_empty() || text.len() > 8 {
        return Err(CaptureError::BadUserBits(text.to_string()));
    }
    let mut nibbles = [0u8; 8];
    for (nibble, c) in nibbles.iter_mut().zip(text.chars().rev()) {
        *nibble = c
            .to_digit(16)
            .ok_or_else(|| CaptureError::BadUserBits(text.to_string()))? as u8;
    }
    Ok(nibbles)
}

fn validate(events: &[DecodedFrameEvent]) -> Result<(), CaptureError> {
    for (index, event) in events.iter().enumerate() {
        if event.off_start > event.off_end {
            return Err(CaptureError::NegativeDuration {
                index,
                off_start: event.off_start,
                off_end: event.off_end,
            });
        }
        if index > 0 && events[index - 1].off_end == event.off_end {
            return Err(CaptureError::DuplicateOffset {
                index,
                off_end: event.off_end,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE: &str = r#"
sample_rate: 48000
fps: "25"
frames:
  - timecode: "10:00:00:00"
    off_start: 0
    off_end: 1919
    user_bits: "1234ABCD"
  - timecode: "10:00:00:01"
    off_start: 1920
    off_end: 3839
    reverse: true
    volume_dbfs: -6.5
"#;

    #[test]
    fn frames_are_loaded_in_order() -> Result<()> {
        let capture = Capture::from_yaml(CAPTURE)?;
        let rate = capture.rate(FrameRate::default())?;
        assert_eq!(rate.nominal(), 25);

        let events = capture.events(&rate)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].frame.to_string(), "10:00:00:00");
        assert_eq!(events[0].frame.user_bits_hex(), "1234ABCD");
        assert_eq!(events[0].volume_dbfs, -18.0);
        assert!(events[1].reverse);
        assert_eq!(events[1].volume_dbfs, -6.5);
        Ok(())
    }

    #[test]
    fn runs_expand_with_carries() -> Result<()> {
        let capture = Capture::from_yaml(
            r#"
sample_rate: 48000
runs:
  - start: "00:59:59:23"
    count: 3
    off_start: 100
"#,
        )?;
        let events = capture.events(&FrameRate::default())?;
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].frame.to_string(), "00:59:59:24");
        assert_eq!(events[2].frame.to_string(), "01:00:00:00");
        assert_eq!(events[2].off_start, 100 + 2 * 1920);
        assert_eq!(events[2].off_end, 100 + 3 * 1920 - 1);
        Ok(())
    }

    #[test]
    fn dated_frames_carry_the_date_flags() -> Result<()> {
        let capture = Capture::from_yaml(
            r#"
sample_rate: 48000
frames:
  - timecode: "12:00:00:00"
    off_start: 0
    off_end: 1919
    date: "050324"
    timezone: "+0100"
"#,
        )?;
        let events = capture.events(&FrameRate::default())?;
        let frame = &events[0].frame;
        assert!(!frame.binary_group_flags[0]);
        assert!(frame.binary_group_flags[2]);
        let tc = Timecode::from_frame(frame, true);
        assert_eq!(tc.date.map(|d| d.to_string()), Some("24-03-05".to_string()));
        assert_eq!(tc.timezone, Some(60));
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_user_bits("12345678A").is_err());
        assert!(parse_user_bits("XYZ").is_err());
        assert_eq!(parse_user_bits("1F").ok(), Some([0xF, 1, 0, 0, 0, 0, 0, 0]));

        let capture = Capture::from_yaml(
            r#"
sample_rate: 48000
frames:
  - timecode: "00:00:00:00"
    off_start: 50
    off_end: 10
"#,
        )
        .unwrap();
        assert!(capture.events(&FrameRate::default()).is_err());
        assert!(Capture::from_yaml("frames: 3").is_err());
    }
}

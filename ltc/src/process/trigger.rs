//! Timecode-triggered actions
//!
//! An action list holds one `TIMECODE COMMAND` entry per line. Each action
//! fires once the decoded timecode moves forward across its trigger time,
//! that is when `t0 < trigger <= t1` for two consecutive frames.

use log::{debug, info};

use crate::structs::frame::LtcFrame;
use crate::structs::framerate::FrameRate;
use crate::utils::arith::{SMPTE_OVERFLOW, bcd_to_frame_count, parse_timecode_fields};
use crate::utils::errors::{TimecodeError, TriggerError};

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerAction {
    /// Seconds since 00:00:00:00, in frame counts over the nominal rate.
    pub at_secs: f64,
    pub command: String,
    /// How often the action fired.
    pub called: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerSchedule {
    actions: Vec<TriggerAction>,
    last: Option<LtcFrame>,
}

impl TriggerSchedule {
    /// Parses an action list. Blank lines and lines starting with `#` are
    /// skipped; the timecode is read at `rate` with carries.
    pub fn parse(text: &str, rate: &FrameRate) -> Result<Self, TriggerError> {
        let fps = rate.nominal();
        let drop_frame = rate.drop_frame && fps == 30;
        let mut actions = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (timecode, command) = match line.split_once(char::is_whitespace) {
                Some((tc, cmd)) if !cmd.trim().is_empty() => (tc, cmd.trim()),
                _ => return Err(TriggerError::MissingCommand { line: line_no }),
            };

            let bcd = parse_timecode_fields(timecode, fps as i64).map_err(|source| {
                TriggerError::BadTimecode {
                    line: line_no,
                    source,
                }
            })?;
            if bcd[SMPTE_OVERFLOW] != 0 {
                return Err(TriggerError::BadTimecode {
                    line: line_no,
                    source: TimecodeError::FieldOutOfRange {
                        field: "days",
                        value: bcd[SMPTE_OVERFLOW],
                    },
                });
            }

            let count = bcd_to_frame_count(fps as f64, drop_frame, bcd[0], bcd[1], bcd[2], bcd[3]);
            let action = TriggerAction {
                at_secs: count as f64 / fps as f64,
                command: command.to_string(),
                called: 0,
            };
            debug!("Trigger at {:.3}s: {}", action.at_secs, action.command);
            actions.push(action);
        }

        info!("Loaded {} trigger action(s)", actions.len());
        Ok(Self {
            actions,
            last: None,
        })
    }

    pub fn actions(&self) -> &[TriggerAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Fires every action crossed between the previous frame and `frame`.
    /// Returns how many fired.
    pub fn observe<F>(&mut self, frame: &LtcFrame, fps: u32, mut run: F) -> usize
    where
        F: FnMut(&TriggerAction),
    {
        let fps = fps.max(1);
        let Some(prev) = self.last.replace(*frame) else {
            return 0;
        };
        let t0 = prev.frame_count(fps) as f64 / fps as f64;
        let t1 = frame.frame_count(fps) as f64 / fps as f64;
        self.fire(t0, t1, &mut run)
    }

    /// Fires every action with `t0 < at <= t1`.
    pub fn fire<F>(&mut self, t0: f64, t1: f64, mut run: F) -> usize
    where
        F: FnMut(&TriggerAction),
    {
        let mut fired = 0;
        for action in self.actions.iter_mut() {
            if t0 < action.at_secs && t1 >= action.at_secs {
                run(action);
                action.called += 1;
                fired += 1;
            }
        }
        fired
    }

    /// Forgets the previous frame; the next frame only primes the schedule.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::frame::LtcFrame;

    fn frame(h: u8, m: u8, s: u8, f: u8) -> LtcFrame {
        let mut frame = LtcFrame::default();
        frame.set_time(h, m, s, f);
        frame
    }

    const LIST: &str = "\
# start of show
00:00:01:00 echo one

14:35:00:00   /bin/true --flag
2:10 echo carried
";

    #[test]
    fn parses_actions_and_skips_comments() {
        let schedule = TriggerSchedule::parse(LIST, &FrameRate::new(25, 1, false)).unwrap();
        let actions = schedule.actions();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].at_secs, 1.0);
        assert_eq!(actions[1].at_secs, 52500.0);
        assert_eq!(actions[1].command, "/bin/true --flag");
        // 2 s + 10 frames
        assert_eq!(actions[2].at_secs, 2.4);
    }

    #[test]
    fn rejects_lines_without_command() {
        let err = TriggerSchedule::parse("00:00:01:00\n", &FrameRate::default()).unwrap_err();
        assert!(matches!(err, TriggerError::MissingCommand { line: 1 }));
        let err = TriggerSchedule::parse("# x\nab:cd cmd\n", &FrameRate::default()).unwrap_err();
        assert!(matches!(err, TriggerError::BadTimecode { line: 2, .. }));
    }

    #[test]
    fn fires_once_when_crossing_forward() {
        let mut schedule = TriggerSchedule::parse(LIST, &FrameRate::default()).unwrap();
        let mut fired = Vec::new();
        for f in 20..25 {
            schedule.observe(&frame(0, 0, 0, f), 25, |a| fired.push(a.command.clone()));
        }
        for f in 0..5 {
            schedule.observe(&frame(0, 0, 1, f), 25, |a| fired.push(a.command.clone()));
        }
        assert_eq!(fired, vec!["echo one"]);
        assert_eq!(schedule.actions()[0].called, 1);
    }

    #[test]
    fn ignores_reverse_motion_and_fires_on_jumps() {
        let mut schedule = TriggerSchedule::parse(LIST, &FrameRate::default()).unwrap();
        let mut count = 0;
        schedule.observe(&frame(0, 0, 1, 1), 25, |_| count += 1);
        schedule.observe(&frame(0, 0, 0, 24), 25, |_| count += 1);
        assert_eq!(count, 0);
        // a jump across two triggers fires both
        schedule.observe(&frame(0, 0, 5, 0), 25, |_| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn first_frame_only_primes() {
        let mut schedule = TriggerSchedule::parse(LIST, &FrameRate::default()).unwrap();
        assert_eq!(schedule.observe(&frame(0, 0, 1, 0), 25, |_| {}), 0);
        schedule.reset();
        assert_eq!(schedule.observe(&frame(0, 0, 1, 0), 25, |_| {}), 0);
    }
}

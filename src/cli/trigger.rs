use std::process::Command;

use anyhow::Result;
use indicatif::MultiProgress;
use log::{debug, info, warn};

use ltc::process::decode::{CorrelatedFrame, FrameHandler, format_frame};
use ltc::process::trigger::{TriggerAction, TriggerSchedule};

use super::command::{Cli, TriggerArgs};
use super::replay::Replay;
use crate::input::InputReader;

/// Runs an action's command through the shell.
pub trait ActionRunner {
    fn run(&mut self, action: &TriggerAction);
}

/// Spawns `sh -c COMMAND` without waiting for it.
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ActionRunner for ShellRunner {
    fn run(&mut self, action: &TriggerAction) {
        match Command::new("sh").arg("-c").arg(&action.command).spawn() {
            Ok(child) => debug!("Started `{}` (pid {})", action.command, child.id()),
            Err(err) => warn!("Cannot run `{}`: {err}", action.command),
        }
    }
}

pub struct TriggerHandler<R> {
    schedule: TriggerSchedule,
    runner: R,
    print: bool,
}

impl<R: ActionRunner> TriggerHandler<R> {
    pub fn new(schedule: TriggerSchedule, runner: R, print: bool) -> Self {
        Self {
            schedule,
            runner,
            print,
        }
    }

    /// Logs how often each action was called.
    pub fn report(&self) {
        for (n, action) in self.schedule.actions().iter().enumerate() {
            info!("# action #{} called {} time(s)", n + 1, action.called);
        }
    }
}

impl<R: ActionRunner> FrameHandler for TriggerHandler<R> {
    fn on_frame(&mut self, frame: &CorrelatedFrame) -> Result<()> {
        if self.print {
            println!("{}", format_frame(frame, false));
        }
        let runner = &mut self.runner;
        self.schedule.observe(&frame.event.frame, frame.fps, |action| {
            info!("Trigger at {:.3}s: {}", action.at_secs, action.command);
            runner.run(action);
        });
        Ok(())
    }

    fn on_discontinuity(&mut self, _frame: &CorrelatedFrame) -> Result<()> {
        // a jump must not fire everything in between
        self.schedule.reset();
        Ok(())
    }
}

pub fn cmd_trigger(args: &TriggerArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let mut replay = Replay::from_args(&args.replay, cli.fail_level())?;
    replay.settings.detect_fps = args.detect_fps;

    let text = InputReader::new(&args.actions)?.read_to_string()?;
    let schedule = TriggerSchedule::parse(&text, &replay.settings.rate)?;
    if schedule.is_empty() {
        warn!("No actions in {}", args.actions.display());
    }

    let mut handler = TriggerHandler::new(schedule, ShellRunner, args.print);
    replay.run(&mut handler, None, multi)?;
    handler.report();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltc::process::decode::DecodeSettings;
    use ltc::structs::event::{DecodedFrameEvent, WallClock};
    use ltc::structs::frame::LtcFrame;
    use ltc::structs::framerate::FrameRate;

    #[derive(Default)]
    struct Record(Vec<String>);

    impl ActionRunner for Record {
        fn run(&mut self, action: &TriggerAction) {
            self.0.push(action.command.clone());
        }
    }

    fn replay(frames: &[(u8, u8)]) -> Replay {
        let events = frames
            .iter()
            .enumerate()
            .map(|(i, &(s, f))| {
                let mut frame = LtcFrame::default();
                frame.set_time(0, 0, s, f);
                let i = i as i64;
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
            period: 512,
            capture_latency: 0,
            playback_latency: 0,
            realtime: false,
        }
    }

    #[test]
    fn actions_fire_once_when_crossed() -> Result<()> {
        let rate = FrameRate::default();
        let schedule = TriggerSchedule::parse("# list\n00:00:01:00 echo one\n00:00:01:02 echo two\n", &rate)?;
        let frames: Vec<(u8, u8)> = (20..25).map(|f| (0, f)).chain((0..5).map(|f| (1, f))).collect();

        let mut handler = TriggerHandler::new(schedule, Record::default(), false);
        replay(&frames).run(&mut handler, None, None)?;

        assert_eq!(handler.runner.0, vec!["echo one", "echo two"]);
        assert!(handler.schedule.actions().iter().all(|a| a.called == 1));
        Ok(())
    }

    #[test]
    fn jumps_do_not_fire_skipped_actions() -> Result<()> {
        let rate = FrameRate::default();
        let schedule = TriggerSchedule::parse("00:00:01:00 echo skipped\n", &rate)?;
        let frames = [(0, 10), (0, 11), (0, 12), (2, 0), (2, 1), (2, 2)];

        let mut handler = TriggerHandler::new(schedule, Record::default(), false);
        replay(&frames).run(&mut handler, None, None)?;

        assert!(handler.runner.0.is_empty());
        Ok(())
    }
}

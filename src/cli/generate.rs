use std::fs::File;
use std::sync::Arc;

use anyhow::{Result, bail};
use indicatif::MultiProgress;
use log::{info, warn};

use ltc::codec::FrameEncoder;
use ltc::codec::biphase::BiphaseEncoder;
use ltc::process::drift::StartMode;
use ltc::process::generate::{GenerateSettings, generate_channel};
use ltc::structs::event::WallClock;
use ltc::structs::framerate::FrameRate;
use ltc::structs::timecode::{DateStamp, Timecode, parse_timezone};
use ltc::utils::clock::{Clock, ManualClock, SystemClock};
use ltc::utils::wakeup::RunMode;

use super::command::{Cli, GenArgs};
use super::progress::create_progress_bar;
use crate::timestamp::time_str;
use crate::wav::W64Writer;

/// Builds the encoder and start mode from the command line.
fn encoder_from_args(args: &GenArgs, rate: FrameRate) -> Result<(BiphaseEncoder, StartMode)> {
    let mut encoder = BiphaseEncoder::new(args.sample_rate, rate);
    encoder.set_volume(args.volume);

    let timezone = match (&args.timezone, args.minuteswest) {
        (Some(text), _) => Some(parse_timezone(text)?),
        (None, Some(west)) => Some(-west),
        (None, None) => None,
    };
    let date = args.date.as_deref().map(DateStamp::parse).transpose()?;

    let Some(text) = &args.timecode else {
        if date.is_some() || args.user_bits.is_some() || timezone.is_some() {
            warn!("Date, timezone and user bits follow the system clock without --timecode");
        }
        encoder.set_use_date(true);
        return Ok((encoder, StartMode::Now));
    };

    let mut timecode = Timecode::parse(text, &rate)?;
    if let Some(date) = date {
        timecode.date = Some(date);
        timecode.timezone = timezone;
        encoder.set_use_date(true);
    } else if timezone.is_some() {
        warn!("Timezone is only stored together with --date");
    }
    if let Some(bits) = args.user_bits {
        let mut frame = encoder.frame();
        frame.set_user_bits_decimal(bits);
        encoder.set_frame(frame);
    }
    Ok((encoder, StartMode::Timecode(timecode)))
}

pub fn cmd_gen(args: &GenArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let rate: FrameRate = args.fps.parse()?;
    for note in rate.sanity_notes() {
        warn!("{note}");
    }
    if args.sample_rate == 0 || args.period == 0 {
        bail!("Sample rate and period must be positive");
    }
    if !(args.duration.is_finite() && args.duration > 0.0) {
        bail!("Duration must be a positive number of seconds");
    }

    let (encoder, start_mode) = encoder_from_args(args, rate)?;
    let mut settings = GenerateSettings::new(args.sample_rate, rate, start_mode);
    settings.drift_limit_ms = args.drift_limit;
    settings.auto_resync = args.auto_resync;
    settings.fail_level = cli.fail_level();

    let start = SystemClock.now();
    let clock = ManualClock::new(start);
    let (mut generator, mut producer) =
        generate_channel(settings, Box::new(encoder), Arc::new(clock.clone()));
    producer.shared().set_playback_latency(args.playback_latency);
    producer.shared().run.set(RunMode::Run);

    let total = (args.duration * args.sample_rate as f64).round() as u64;
    let periods = total.div_ceil(args.period as u64);
    let report_every = (args.drift_interval * args.sample_rate as f64).round() as u64;
    let skew = 1.0 + args.clock_skew * 1e-6;

    let mut writer = W64Writer::new(File::create(&args.output)?, args.sample_rate, 1);
    writer.write_header()?;

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi, Some(periods), "periods")?),
        None => None,
    };

    info!(
        "Generating {:.3}s of {} fps LTC at {} Hz into {}",
        args.duration,
        rate,
        args.sample_rate,
        args.output.display()
    );

    let mut buf = vec![0.0f32; args.period];
    let mut written = 0u64;
    let mut next_report = report_every;
    generator.service()?;
    while written < total {
        let elapsed = written as f64 / args.sample_rate as f64 * skew;
        clock.set(start + WallClock::from_secs_f64(elapsed));

        producer.process(&mut buf);
        generator.service()?;

        let len = (total - written).min(args.period as u64) as usize;
        writer.write_samples(&buf[..len])?;
        written += len as u64;

        if report_every > 0 && written >= next_report {
            generator.shared().request_drift_report();
            next_report += report_every;
        }
        if let Some(pb) = &pb {
            pb.inc(1);
            if producer.shared().is_playing() {
                pb.set_message(generator.encoder().timecode().to_string());
            }
        }
    }
    producer.shared().shutdown();
    writer.finish()?;
    let samples = writer.frames_written();
    writer.into_inner()?.sync_all()?;

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    if !producer.shared().is_playing() {
        warn!("Output ended before the generator was in sync");
    }
    let underruns = producer.shared().underruns();
    if underruns > 0 {
        warn!("{underruns} underrun(s)");
    }
    generator.report_drift()?;
    info!(
        "{} of LTC written ({samples} samples)",
        time_str(samples as f64 / args.sample_rate as f64)
    );
    Ok(())
}

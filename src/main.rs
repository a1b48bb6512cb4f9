use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::dump::cmd_dump;
use cli::generate::cmd_gen;
use cli::mtc::cmd_mtc;
use cli::ntp::cmd_ntp;
use cli::trigger::cmd_trigger;

mod byteorder;
mod capture;
mod cli;
mod input;
pub(crate) mod timestamp;
mod wav;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                writeln!(
                    buf,
                    "{{\"ts\":{},\"lvl\":\"{}\",\"msg\":\"{}\"}}",
                    buf.timestamp(),
                    record.level(),
                    record.args()
                )
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    match cli.command {
        Commands::Dump(ref args) => cmd_dump(args, &cli, pb)?,
        Commands::Mtc(ref args) => cmd_mtc(args, &cli, pb)?,
        Commands::Ntp(ref args) => cmd_ntp(args, &cli, pb)?,
        Commands::Trigger(ref args) => cmd_trigger(args, &cli, pb)?,
        Commands::Gen(ref args) => cmd_gen(args, &cli, pb)?,
    }

    Ok(())
}

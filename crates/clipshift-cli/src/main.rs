// crates/clipshift-cli/src/main.rs
//
// `clipshift`: headless front-end for the conversion pipeline. Parses the
// command line, installs env_logger, loads the pipeline config and hands off
// to one subcommand.

mod cli;
mod commands;
mod config;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};

fn init_logging(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = config::load(cli.config.as_deref())?;
    clipshift_media::init().context("FFmpeg init failed")?;

    match cli.command {
        Commands::Run(args)     => commands::run(args, config),
        Commands::Convert(args) => commands::convert(args, config),
        Commands::Scan(args)    => commands::scan(args, config),
        Commands::Probe(args)   => commands::probe(args, config),
        Commands::Thumb(args)   => commands::thumb(args, config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! sfmem - writes, verifies, lists and dumps SF Memory cassettes

mod args;
mod backend;
mod commands;
mod config;
mod progress;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use sfmem::Session;
use sfmem::sim::SimCassette;

use args::{Cli, Command};
use backend::DirBackend;
use commands::Images;
use config::Config;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("sfmem {}", sfmem::crate_version());

    let config = Config::from_cli(&cli)?;
    config.validate().map_err(anyhow::Error::msg)?;
    debug!("{config:?}");

    run(cli.command, &config)
}

fn open<'a>(
    cassette: &'a mut SimCassette,
    config: &Config,
) -> Result<Session<&'a mut SimCassette>> {
    Session::open_with_policy(cassette, config.poll_policy()).context("Failed to open device")
}

fn run(command: Command, config: &Config) -> Result<()> {
    let backend = DirBackend::new(&config.device_dir);
    info!("Using cassette in {}", backend.dir().display());

    match command {
        Command::Write(args) => {
            // Images are validated before the device is touched
            let images = Images::load(&args)?;
            let mut cassette = backend.load()?;
            let result = open(&mut cassette, config).and_then(|mut session| {
                commands::write(&mut session, images, args.rewrite_serial)
            });
            // A failed write may still have changed the cassette
            backend.save(&cassette)?;
            result
        }
        Command::Dir { json } => {
            let mut cassette = backend.load()?;
            let mut session = open(&mut cassette, config)?;
            commands::dir(&mut session, json, &mut std::io::stdout())
        }
        Command::Dump { out } => {
            let mut cassette = backend.load()?;
            let mut session = open(&mut cassette, config)?;
            commands::dump(&mut session, &out).map(|_| ())
        }
        Command::DumpAll { out } => {
            let mut cassette = backend.load()?;
            let mut session = open(&mut cassette, config)?;
            commands::dump_all(&mut session, &out).map(|_| ())
        }
    }
}

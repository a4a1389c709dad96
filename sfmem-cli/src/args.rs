// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sfmem")]
#[command(version, about = "SF Memory cassette programmer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the cassette image (np.sfc, np.map, np.srm)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub device: Option<PathBuf>,

    /// Seconds to wait for the flash to become ready, 0 waits forever
    #[arg(long, global = true, value_name = "SECS", value_parser = parse_timeout)]
    pub poll_timeout: Option<u64>,

    /// JSON file supplying defaults for the above
    #[arg(short, long, global = true, value_name = "FILE", value_parser = parse_existing_file)]
    pub config: Option<PathBuf>,

    /// More logging, repeat for more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write and verify a ROM, map and/or SRAM image
    Write(WriteArgs),

    /// List the multi-cassette directory
    Dir {
        /// Output JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Dump the map, all of flash and all of SRAM
    Dump {
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },

    /// Dump each directory entry's ROM and save separately
    DumpAll {
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = true)]
pub struct WriteArgs {
    /// ROM file
    #[arg(short, long, value_name = "PATH", value_parser = parse_existing_file)]
    pub rom: Option<PathBuf>,

    /// Map file
    #[arg(short, long, value_name = "PATH", value_parser = parse_existing_file)]
    pub map: Option<PathBuf>,

    /// SRAM file
    #[arg(short, long, value_name = "PATH", value_parser = parse_existing_file)]
    pub sram: Option<PathBuf>,

    /// Rewrite the serial number to the value in the map file
    #[arg(long, requires = "map")]
    pub rewrite_serial: bool,
}

pub fn parse_existing_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("{s}: No such file"))
    }
}

pub fn parse_timeout(s: &str) -> Result<u64, String> {
    s.parse::<u64>().map_err(|e| format!("Invalid timeout {s}: {e}"))
}

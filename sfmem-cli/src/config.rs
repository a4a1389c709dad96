// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use anyhow::{Context, Result};
use serde::Deserialize;
use sfmem::PollPolicy;
use sfmem::command::DEFAULT_POLL_TIMEOUT;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::args::Cli;

pub const DEFAULT_DEVICE_DIR: &str = "sfmem-device";

// Contents of the optional --config file.  Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub device_dir: Option<PathBuf>,
    pub poll_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device_dir: PathBuf,
    pub poll_timeout_secs: u64,
}

impl Config {
    /// Builds the configuration from the command line, reading the config
    /// file if one was given.  Command line values win.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli.device.clone(), cli.poll_timeout, file))
    }

    pub fn merge(
        device_dir: Option<PathBuf>,
        poll_timeout_secs: Option<u64>,
        file: FileConfig,
    ) -> Self {
        Self {
            device_dir: device_dir
                .or(file.device_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_DIR)),
            poll_timeout_secs: poll_timeout_secs
                .or(file.poll_timeout_secs)
                .unwrap_or(DEFAULT_POLL_TIMEOUT.as_secs()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.device_dir.as_os_str().is_empty() {
            return Err("Device directory cannot be empty".to_string());
        }
        if self.device_dir.exists() && !self.device_dir.is_dir() {
            return Err(format!(
                "Device path {} exists and is not a directory",
                self.device_dir.display()
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        match self.poll_timeout_secs {
            0 => PollPolicy::unbounded(),
            secs => PollPolicy::with_timeout(Duration::from_secs(secs)),
        }
    }
}

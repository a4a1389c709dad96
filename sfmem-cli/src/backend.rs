// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Directory backed cassette.
//!
//! The cassette's flash, map and SRAM are kept as `np.sfc`, `np.map` and
//! `np.srm` in a directory, loaded into a [`SimCassette`] before each command
//! and saved back after a write.  Missing files are treated as blank.

use anyhow::{Context, Result};
use log::{debug, info};
use sfmem::sim::SimCassette;
use std::path::{Path, PathBuf};

pub const ROM_FILE: &str = "np.sfc";
pub const MAP_FILE: &str = "np.map";
pub const SRAM_FILE: &str = "np.srm";

#[derive(Debug, Clone)]
pub struct DirBackend {
    dir: PathBuf,
}

impl DirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<SimCassette> {
        let rom = self.read_optional(ROM_FILE)?;
        let map = self.read_optional(MAP_FILE)?;
        let sram = self.read_optional(SRAM_FILE)?;
        debug!(
            "Loaded cassette from {}: ROM {} bytes, map {} bytes, SRAM {} bytes",
            self.dir.display(),
            rom.len(),
            map.len(),
            sram.len()
        );
        SimCassette::from_parts(&rom, &map, &sram)
            .with_context(|| format!("Invalid cassette image in {}", self.dir.display()))
    }

    pub fn save(&self, cassette: &SimCassette) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        save_file(&self.dir.join(ROM_FILE), &cassette.rom())?;
        save_file(&self.dir.join(MAP_FILE), &cassette.map())?;
        save_file(&self.dir.join(SRAM_FILE), cassette.sram())?;
        info!("Saved cassette to {}", self.dir.display());
        Ok(())
    }

    fn read_optional(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

pub fn save_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use anyhow::{Context, Result, bail};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use sfmem::{DirectoryEntry, Region, Session, Transport, WriteSession};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::args::WriteArgs;
use crate::backend::{MAP_FILE, ROM_FILE, SRAM_FILE, save_file};
use crate::progress::ConsoleProgress;
use crate::utils::{add_commas, secs};

/// Validated images to write.
#[derive(Debug, Default)]
pub struct Images {
    pub rom: Option<Vec<u8>>,
    pub map: Option<Vec<u8>>,
    pub sram: Option<Vec<u8>>,
}

impl Images {
    /// Reads and validates every image named in `args`.
    pub fn load(args: &WriteArgs) -> Result<Self> {
        Ok(Self {
            rom: load_with(args.rom.as_deref(), sfmem::load_rom)?,
            map: load_with(args.map.as_deref(), sfmem::load_map)?,
            sram: load_with(args.sram.as_deref(), sfmem::load_sram)?,
        })
    }
}

fn load_with(
    path: Option<&Path>,
    validate: fn(Vec<u8>) -> sfmem::Result<Vec<u8>>,
) -> Result<Option<Vec<u8>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let data = validate(data).with_context(|| format!("Invalid image {}", path.display()))?;
    Ok(Some(data))
}

/// Writes and verifies each image in turn: ROM, map, then SRAM.
///
/// Unless `rewrite_serial` is set, the serial number in the cassette's
/// current map is carried over into the new one.
pub fn write<T: Transport>(
    session: &mut Session<T>,
    mut images: Images,
    rewrite_serial: bool,
) -> Result<()> {
    let mut writer = session.unlock()?;

    if let Some(rom) = &images.rom {
        write_and_verify(&mut writer, Region::Rom, rom)?;
    }

    if let Some(map) = &mut images.map {
        if !rewrite_serial {
            let current = writer.read_map()?;
            sfmem::map::preserve_serial(map, &current)?;
        }
        write_and_verify(&mut writer, Region::Map, map)?;
    }

    if let Some(sram) = &images.sram {
        write_and_verify(&mut writer, Region::Sram, sram)?;
    }

    writer.release()?;
    Ok(())
}

fn write_and_verify<T: Transport>(
    writer: &mut WriteSession<'_, T>,
    region: Region,
    data: &[u8],
) -> Result<()> {
    let start = Instant::now();
    let written = {
        let mut progress = ConsoleProgress::new();
        match region {
            Region::Rom => writer.write_rom(data, &mut progress),
            Region::Map => writer.write_map(data, &mut progress),
            Region::Sram => writer.write_sram(data, &mut progress),
        }?
    };
    sfmem::check_written(region, written, data.len())?;
    println!("{region} was successfully written in {} sec", secs(start.elapsed()));

    let start = Instant::now();
    let verified = {
        let mut progress = ConsoleProgress::new();
        match region {
            Region::Rom => writer.verify_rom(data, &mut progress),
            Region::Map => writer.verify_map(data, &mut progress),
            Region::Sram => writer.verify_sram(data, &mut progress),
        }?
    };
    sfmem::check_verified(region, verified, data.len())?;
    println!("{region} was successfully verified in {} sec", secs(start.elapsed()));
    Ok(())
}

fn read_directory<T: Transport>(session: &mut Session<T>) -> Result<Vec<DirectoryEntry>> {
    if !session.is_multicassette()? {
        bail!("Menu is not detected");
    }
    Ok(session.directory().collect::<sfmem::Result<Vec<_>>>()?)
}

/// Prints the directory, as text or JSON.
pub fn dir<T: Transport>(
    session: &mut Session<T>,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let entries = read_directory(session)?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &entries)?;
        writeln!(out)?;
        return Ok(());
    }

    for entry in &entries {
        writeln!(out)?;
        writeln!(out, "Directory index        : {}", entry.index)?;
        writeln!(out, "First FLASH block      : {}", entry.first_flash_block)?;
        writeln!(out, "First SRAM block       : {}", entry.first_sram_block)?;
        writeln!(out, "Number of FLASH blocks : {}", entry.flash_blocks)?;
        writeln!(out, "Number of SRAM blocks  : {}", entry.sram_blocks)?;
        writeln!(out, "Gamecode               : {}", entry.gamecode)?;
        writeln!(out, "Title                  : {}", entry.title)?;
        writeln!(out, "Date                   : {}", entry.date)?;
        writeln!(out, "Time                   : {}", entry.time)?;
        writeln!(out, "Law                    : {}", entry.law)?;
    }
    Ok(())
}

fn save(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    save_file(&path, data)?;
    println!(
        "wrote {} successfully ({} bytes)",
        path.display(),
        add_commas(data.len() as u64)
    );
    Ok(path)
}

/// Dumps the map, all of flash and all of SRAM.
pub fn dump<T: Transport>(session: &mut Session<T>, out_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let map = session.read_map()?;
    let rom = session.read_rom()?;
    let sram = session.read_sram()?;

    Ok(vec![
        save(out_dir, MAP_FILE, &map)?,
        save(out_dir, ROM_FILE, &rom)?,
        save(out_dir, SRAM_FILE, &sram)?,
    ])
}

/// Dumps each directory entry's ROM, and its save if it has one.
pub fn dump_all<T: Transport>(session: &mut Session<T>, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = read_directory(session)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let sram = session.read_sram()?;
    let mut saved = Vec::new();
    for entry in &entries {
        let Some(plan) = entry.dump_plan() else {
            warn!("Skipping directory entry {}", entry.index);
            continue;
        };

        let rom = session.read_rom_banks(plan.first_bank, plan.last_bank)?;
        saved.push(save(out_dir, &format!("{}.sfc", plan.name), &rom)?);

        if let Some(range) = plan.sram {
            let data = sram
                .get(range.clone())
                .with_context(|| format!("SRAM range {range:?} out of bounds"))?;
            saved.push(save(out_dir, &format!("{}.srm", plan.name), data)?);
        }
    }
    Ok(saved)
}

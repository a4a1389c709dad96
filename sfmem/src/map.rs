// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Hidden sector ("map") programmer.
//!
//! The map is 512 bytes: 256 bytes in the hidden sector of each chip, exposed
//! at offset `0xFF00` of the chip's first bank once shown.  It is written as
//! four 128 byte pages, one at a time.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::command::Commands;
use crate::progress::{Progress, Stage};
use crate::{Chip, Error, MAP_SIZE, PAGE_SIZE, Region, Result, Transport};

// Bytes of the map held by each chip
const MAP_CHIP_SIZE: usize = MAP_SIZE / 2;

// Serial number bytes live at the odd offsets in the first 16 bytes
const SERIAL_OFFSETS: core::ops::Range<usize> = 1..16;

/// Page addresses, in write order, with the part of the map each receives
pub const MAP_PAGES: [u32; 4] = [0xC0FF00, 0xC0FF80, 0xE0FF00, 0xE0FF80];

fn check_map_len(len: usize) -> Result<()> {
    if len == MAP_SIZE {
        Ok(())
    } else {
        Err(Error::InvalidLength {
            region: Region::Map,
            length: len,
            reason: "map must be 512 bytes",
        })
    }
}

/// Erases the hidden sectors and writes `data` to them.
///
/// Returns 512 if every page programmed cleanly, 0 if any page reported an
/// error.
pub fn write_map<T: Transport + ?Sized>(
    commands: &mut Commands<'_, T>,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<usize> {
    check_map_len(data.len())?;

    progress.update(Region::Map, Stage::Erase, 0, MAP_SIZE);
    commands.hidden_erase()?;

    let mut failed = false;
    for (ii, (address, page)) in MAP_PAGES.iter().zip(data.chunks(PAGE_SIZE)).enumerate() {
        progress.update(Region::Map, Stage::Write, ii * PAGE_SIZE, MAP_SIZE);
        if commands.hidden_write(*address, page)? {
            error!("Map page at {address:#08X} reported an error");
            failed = true;
        }
    }
    commands.read_reset()?;

    if failed {
        Ok(0)
    } else {
        progress.update(Region::Map, Stage::Write, MAP_SIZE, MAP_SIZE);
        Ok(MAP_SIZE)
    }
}

/// Reads the 512 byte map.  Normal reads are restored afterwards, whether or
/// not the read succeeded.
pub fn read_map<T: Transport + ?Sized>(commands: &mut Commands<'_, T>) -> Result<Vec<u8>> {
    let shown = commands.show_hidden();
    let data = shown.and_then(|_| {
        let mut data = Vec::with_capacity(MAP_SIZE);
        for chip in Chip::ALL {
            data.extend(commands.transport().read(chip.map_address(), MAP_CHIP_SIZE)?);
        }
        Ok(data)
    });
    let reset = commands.read_reset();
    let data = data?;
    reset?;
    Ok(data)
}

/// Reads the map back and compares it against `data`.
///
/// Returns 512 on an exact match, otherwise 0.
pub fn verify_map<T: Transport + ?Sized>(
    commands: &mut Commands<'_, T>,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<usize> {
    check_map_len(data.len())?;
    progress.update(Region::Map, Stage::Verify, 0, MAP_SIZE);

    let current = read_map(commands)?;
    if current == data {
        progress.update(Region::Map, Stage::Verify, MAP_SIZE, MAP_SIZE);
        Ok(MAP_SIZE)
    } else {
        warn!("Map mismatch");
        Ok(0)
    }
}

/// Copies the cassette's serial number from `current` (the map as read from
/// the device) into `map`, so it survives a map rewrite.
pub fn preserve_serial(map: &mut [u8], current: &[u8]) -> Result<()> {
    check_map_len(map.len())?;
    check_map_len(current.len())?;
    for ii in SERIAL_OFFSETS.step_by(2) {
        map[ii] = current[ii];
    }
    Ok(())
}

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Validates and prepares ROM, SRAM and map images before any of them reach
//! the device.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, MAP_SIZE, MAX_ROM_SIZE, Result, SRAM_SIZE};

/// Size of the header some copiers prepend to ROM images
pub const COPIER_HEADER_SIZE: usize = 0x200;

/// Smallest ROM accepted
pub const MIN_ROM_SIZE: usize = 0x8000;

/// ROMs are padded to a whole number of 512KB flash blocks
pub const FLASH_BLOCK_SIZE: usize = 0x80000;

/// Internal header locations: LoROM and HiROM
pub const LOROM_HEADER: usize = 0x7FC0;
pub const HIROM_HEADER: usize = 0xFFC0;

// Internal header field offsets, relative to the header base
const TITLE_LEN: usize = 21;
const MAP_MODE: usize = 0x15;
const ROM_SIZE: usize = 0x17;
const SRAM_SIZE_FIELD: usize = 0x18;
const COUNTRY: usize = 0x19;
const COMPLEMENT: usize = 0x1C;
const CHECKSUM: usize = 0x1E;
const RESET_VECTOR: usize = 0x3C;
const HEADER_LEN: usize = 0x40;

// Score weights
const VALID_CHECKSUM_COMPLEMENT: i32 = 4;
const MATCHING_MAP_MODE: i32 = 2;
const PLAUSIBLE_FIELD: i32 = 1;
const PRINTABLE_TITLE: i32 = 1;
const UNPRINTABLE_TITLE: i32 = -1;
const RESET_VECTOR_IN_RAM: i32 = -4;

/// Scores how plausible it is that `offset` holds the image's internal
/// header.  A score of 0 or less means not plausible at all.
pub fn score_header(data: &[u8], offset: usize) -> i32 {
    let Some(header) = data.get(offset..offset + HEADER_LEN) else {
        return i32::MIN;
    };
    let mut score = 0;

    let complement = u16::from_le_bytes([header[COMPLEMENT], header[COMPLEMENT + 1]]);
    let checksum = u16::from_le_bytes([header[CHECKSUM], header[CHECKSUM + 1]]);
    if complement ^ checksum == 0xFFFF {
        score += VALID_CHECKSUM_COMPLEMENT;
    }

    // Bit 0 of the map mode distinguishes HiROM from LoROM
    let mode = header[MAP_MODE];
    let hirom = offset == HIROM_HEADER;
    if mode & 0xE0 == 0x20 && (mode & 0x01 == 1) == hirom {
        score += MATCHING_MAP_MODE;
    }

    if (0x08..=0x0D).contains(&header[ROM_SIZE]) {
        score += PLAUSIBLE_FIELD;
    }
    if header[SRAM_SIZE_FIELD] <= 0x08 {
        score += PLAUSIBLE_FIELD;
    }
    if header[COUNTRY] <= 0x14 {
        score += PLAUSIBLE_FIELD;
    }

    if header[..TITLE_LEN].iter().all(|c| (0x20..=0x7E).contains(c)) {
        score += PRINTABLE_TITLE;
    } else {
        score += UNPRINTABLE_TITLE;
    }

    let reset = u16::from_le_bytes([header[RESET_VECTOR], header[RESET_VECTOR + 1]]);
    if reset < 0x8000 {
        score += RESET_VECTOR_IN_RAM;
    } else {
        score += PLAUSIBLE_FIELD;
    }

    trace!("Header at {offset:#06X} scores {score}");
    score
}

/// Validates a ROM image and pads it for programming.
///
/// A copier header is stripped if present, the image must then be between
/// 32KB and 4MB, and is padded with `0xFF` to a whole flash block.  The image
/// is rejected if neither a LoROM nor a HiROM header can be found.
pub fn load_rom(mut data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() % MIN_ROM_SIZE == COPIER_HEADER_SIZE {
        debug!("Removing copier header");
        data.drain(..COPIER_HEADER_SIZE);
    }

    let size = data.len();
    if size < MIN_ROM_SIZE {
        return Err(Error::RomTooSmall { size });
    }
    if size > MAX_ROM_SIZE {
        return Err(Error::RomTooLarge { size });
    }

    data.resize(size.div_ceil(FLASH_BLOCK_SIZE) * FLASH_BLOCK_SIZE, 0xFF);

    let lo = score_header(&data, LOROM_HEADER);
    let hi = score_header(&data, HIROM_HEADER);
    if lo <= 0 && hi <= 0 {
        return Err(Error::NoValidHeader);
    }

    info!(
        "Loaded {} ROM, {size} bytes padded to {}",
        if hi > lo { "HiROM" } else { "LoROM" },
        data.len()
    );
    Ok(data)
}

/// Validates an SRAM image, which may be shorter than the SRAM.
pub fn load_sram(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() > SRAM_SIZE {
        return Err(Error::SramTooLarge { size: data.len() });
    }
    Ok(data)
}

/// Validates a map image.
pub fn load_map(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() != MAP_SIZE {
        return Err(Error::MapWrongSize { size: data.len() });
    }
    Ok(data)
}

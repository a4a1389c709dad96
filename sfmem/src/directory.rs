// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Multi-cassette directory reader.
//!
//! A cassette programmed with the menu holds a table of up to 8 entries, one
//! every 0x2000 bytes from `0xC60000`, each describing a game: which 512KB
//! flash blocks and 2KB SRAM blocks it occupies, and its title and build
//! information.  The table ends at the first entry with index `0xFF`.
//!
//! The table is only meaningful if [`is_multicassette()`] returns `true`.

use core::ops::Range;
use deku::prelude::*;
use encoding_rs::SHIFT_JIS;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use static_assertions::const_assert_eq;

use crate::address::ROM_FIRST_BANK;
use crate::{Error, Result, Transport};

/// Address of the first directory slot
pub const DIRECTORY_BASE: u32 = 0xC60000;

/// Distance between directory slots
pub const DIRECTORY_STRIDE: u32 = 0x2000;

/// Number of directory slots
pub const DIRECTORY_SLOTS: usize = 8;

/// Size of each directory record
pub const ENTRY_SIZE: usize = 0x1D9;

/// Index byte marking the end of the table
pub const END_OF_TABLE: u8 = 0xFF;

/// Address of the multi-cassette marker
pub const MULTICASSETTE_ADDR: u32 = 0xC61FF0;

/// Marker present when the cassette carries the menu and directory
pub const MULTICASSETTE_MARKER: &[u8; 16] = b"MULTICASSETTE 32";

// Flash is allocated in 512KB blocks, 8 banks each
const BANKS_PER_FLASH_BLOCK_SHIFT: u32 = 3;
const FLASH_BLOCKS: u16 = 8;

// SRAM is allocated in 2KB blocks
const SRAM_BLOCK_SHIFT: u32 = 11;
const SRAM_BLOCKS: u16 = 16;

#[derive(Debug, DekuRead)]
// On-cassette layout of a directory record
struct RawEntry {
    index: u8,
    first_flash_block: u8,
    first_sram_block: u8,
    block_counts: [u8; 4],
    gamecode: [u8; 12],
    title: [u8; 44],
    _reserved: [u8; 384],
    date: [u8; 10],
    time: [u8; 8],
    law: [u8; 8],
}

const_assert_eq!(core::mem::size_of::<RawEntry>(), ENTRY_SIZE);

/// A decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub index: u8,
    pub first_flash_block: u8,
    pub first_sram_block: u8,
    pub flash_blocks: u16,
    pub sram_blocks: u16,
    pub gamecode: String,
    pub title: String,
    pub date: String,
    pub time: String,
    pub law: String,
}

impl DirectoryEntry {
    /// Decodes a record from the start of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            return Err(Error::Parse(format!(
                "entry too short: {} < {ENTRY_SIZE} bytes",
                data.len()
            )));
        }

        let (_, raw) = RawEntry::from_bytes((data, 0)).map_err(|e| Error::Parse(e.to_string()))?;
        let counts = raw.block_counts;

        Ok(Self {
            index: raw.index,
            first_flash_block: raw.first_flash_block,
            first_sram_block: raw.first_sram_block,
            flash_blocks: ((counts[1] as u16) << 6) | (counts[0] as u16 >> 2),
            sram_blocks: ((counts[3] as u16) << 4) | (counts[2] as u16 >> 4),
            gamecode: decode_ascii(&raw.gamecode),
            title: decode_shift_jis(&raw.title),
            date: decode_ascii(&raw.date),
            time: decode_ascii(&raw.time),
            law: decode_ascii(&raw.law),
        })
    }

    /// Whether this entry terminates the table
    pub fn is_end(&self) -> bool {
        self.index == END_OF_TABLE
    }

    /// Works out what to dump for this entry, or `None` if its block
    /// allocation doesn't fit the cassette.
    ///
    /// Images built without the menu leave the first entry zeroed.  That entry
    /// is treated as a single flash block, so the menu itself can be dumped.
    pub fn dump_plan(&self) -> Option<DumpPlan> {
        let mut flash_blocks = self.flash_blocks;
        if self.index == 0 && flash_blocks == 0 {
            flash_blocks = 1;
        }

        let first_flash = self.first_flash_block as u16;
        let first_sram = self.first_sram_block as u16;
        if flash_blocks == 0
            || first_flash + flash_blocks > FLASH_BLOCKS
            || first_sram + self.sram_blocks > SRAM_BLOCKS
        {
            debug!("Entry {} has no dumpable allocation", self.index);
            return None;
        }

        let first_bank =
            ROM_FIRST_BANK as u32 + ((first_flash as u32) << BANKS_PER_FLASH_BLOCK_SHIFT);
        let last_bank = first_bank + ((flash_blocks as u32) << BANKS_PER_FLASH_BLOCK_SHIFT) - 1;

        let sram = (self.sram_blocks > 0).then(|| {
            let start = (first_sram as usize) << SRAM_BLOCK_SHIFT;
            start..start + ((self.sram_blocks as usize) << SRAM_BLOCK_SHIFT)
        });

        let name = if self.title.is_empty() {
            self.index.to_string()
        } else {
            self.title.replace(['/', '\\'], "_")
        };

        Some(DumpPlan {
            name,
            first_bank: first_bank as u8,
            last_bank: last_bank as u8,
            sram,
        })
    }
}

/// Where one directory entry's ROM and save live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPlan {
    /// File stem for the dumped files
    pub name: String,
    /// First flash bank, `0xC0`-`0xFF`
    pub first_bank: u8,
    /// Last flash bank, inclusive
    pub last_bank: u8,
    /// Byte range within the 32KB SRAM image, if the entry uses SRAM
    pub sram: Option<Range<usize>>,
}

impl DumpPlan {
    /// Size of the ROM this plan covers
    pub fn rom_size(&self) -> usize {
        (self.last_bank as usize - self.first_bank as usize + 1) << 16
    }
}

// Permissive ASCII: anything outside 7 bits becomes U+FFFD.
fn decode_ascii(bytes: &[u8]) -> String {
    let text: String = bytes
        .iter()
        .map(|b| {
            if b.is_ascii() {
                *b as char
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect();
    text.trim_matches('\0').to_string()
}

fn decode_shift_jis(bytes: &[u8]) -> String {
    let (text, had_errors) = SHIFT_JIS.decode_without_bom_handling(bytes);
    if had_errors {
        trace!("Replaced undecodable title bytes");
    }
    text.trim_matches('\0').to_string()
}

/// Checks for the multi-cassette marker.
pub fn is_multicassette<T: Transport + ?Sized>(transport: &mut T) -> Result<bool> {
    let marker = transport.read(MULTICASSETTE_ADDR, MULTICASSETTE_MARKER.len())?;
    Ok(marker == MULTICASSETTE_MARKER)
}

/// Lazily reads directory entries from the cassette, in slot order.
///
/// Each call to `next()` reads one record.  Iteration ends at the end of
/// table marker, after the last slot, or after the first error.
pub struct Directory<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    slot: usize,
    done: bool,
}

impl<'a, T: Transport + ?Sized> Directory<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            slot: 0,
            done: false,
        }
    }

    fn read_slot(&mut self) -> Result<DirectoryEntry> {
        let address = DIRECTORY_BASE + self.slot as u32 * DIRECTORY_STRIDE;
        trace!("Reading directory slot {} at {address:#08X}", self.slot);
        let data = self.transport.read(address, ENTRY_SIZE)?;
        DirectoryEntry::from_bytes(&data)
    }
}

impl<T: Transport + ?Sized> Iterator for Directory<'_, T> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.slot >= DIRECTORY_SLOTS {
            return None;
        }

        let entry = self.read_slot();
        self.slot += 1;
        match entry {
            Ok(entry) if entry.is_end() => {
                self.done = true;
                None
            }
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T: Transport + ?Sized> core::iter::FusedIterator for Directory<'_, T> {}

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! sfmem
//!
//! Programs and reads back SF Memory flash cassettes: a pair of 2MB flash
//! chips mapped at `0xC00000` and `0xE00000`, a small hidden boot sector
//! ("map") on each chip, and 32KB of battery backed SRAM.
//!
//! Everything operates on a [`Transport`], a byte addressable view of the
//! 24-bit cartridge address space.  Open a [`Session`] to detect and wake the
//! device, then [`Session::unlock()`] to obtain a [`WriteSession`] which
//! releases write protect, and re-asserts it when dropped.
//!
//! ```no_run
//! # fn run<T: sfmem::Transport>(transport: T, rom: &[u8]) -> sfmem::Result<()> {
//! use sfmem::{NoProgress, Region, Session};
//!
//! let mut session = Session::open(transport)?;
//! {
//!     let mut writer = session.unlock()?;
//!     let written = writer.write_rom(rom, &mut NoProgress)?;
//!     sfmem::check_written(Region::Rom, written, rom.len())?;
//!     writer.release()?;
//! }
//! let verified = session.verify_rom(rom, &mut NoProgress)?;
//! sfmem::check_verified(Region::Rom, verified, rom.len())?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod command;
pub mod directory;
pub mod image;
pub mod map;
pub mod progress;
pub mod rom;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;
pub mod sram;
pub mod transport;

pub use address::Chip;
pub use command::{Commands, PollPolicy, Status};
pub use directory::{Directory, DirectoryEntry, DumpPlan};
pub use image::{load_map, load_rom, load_sram};
pub use progress::{NoProgress, Progress, Stage};
pub use session::{DeviceState, Session, WriteSession};
pub use transport::Transport;

use std::time::Duration;

/// Size of a single flash chip
pub const CHIP_SIZE: usize = 0x200000;

/// Largest ROM image the cassette holds, across both chips
pub const MAX_ROM_SIZE: usize = 2 * CHIP_SIZE;

/// Flash program page size
pub const PAGE_SIZE: usize = 0x80;

/// Size of the hidden map, 256 bytes from each chip
pub const MAP_SIZE: usize = 0x200;

/// Size of the SRAM
pub const SRAM_SIZE: usize = 0x8000;

/// The areas of the cassette that can be programmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Region {
    Rom,
    Map,
    Sram,
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::Rom => write!(f, "ROM"),
            Region::Map => write!(f, "map"),
            Region::Sram => write!(f, "SRAM"),
        }
    }
}

/// Error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("SF memory is not detected (status {status:#04X})")]
    NotDetected { status: u8 },

    #[error("device at {address:#08X} still busy after {elapsed:?}")]
    PollTimeout { address: u32, elapsed: Duration },

    #[error("{address:#08X} is not a flash address")]
    InvalidAddress { address: u32 },

    #[error("invalid {region} length {length}: {reason}")]
    InvalidLength {
        region: Region,
        length: usize,
        reason: &'static str,
    },

    #[error("ROM must be at least 32KB, got {size} bytes")]
    RomTooSmall { size: usize },

    #[error("ROM cannot be larger than 4MB (32Mbit), got {size} bytes")]
    RomTooLarge { size: usize },

    #[error("no valid ROM type detected")]
    NoValidHeader,

    #[error("SRAM cannot be larger than 32KB (256kbit), got {size} bytes")]
    SramTooLarge { size: usize },

    #[error("map must be 512 bytes, got {size} bytes")]
    MapWrongSize { size: usize },

    #[error("{region} writing failed: {written} of {expected} bytes written")]
    WriteFailed {
        region: Region,
        written: usize,
        expected: usize,
    },

    #[error("{region} verification failed: {verified} of {expected} bytes matched")]
    VerifyFailed {
        region: Region,
        verified: usize,
        expected: usize,
    },

    #[error("failed to parse directory entry: {0}")]
    Parse(String),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Turns the byte count returned by a write operation into an error if it
/// falls short.
pub fn check_written(region: Region, written: usize, expected: usize) -> Result<()> {
    if written == expected {
        Ok(())
    } else {
        Err(Error::WriteFailed {
            region,
            written,
            expected,
        })
    }
}

/// Turns the byte count returned by a verify operation into an error if it
/// falls short.
pub fn check_verified(region: Region, verified: usize, expected: usize) -> Result<()> {
    if verified == expected {
        Ok(())
    } else {
        Err(Error::VerifyFailed {
            region,
            verified,
            expected,
        })
    }
}

pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

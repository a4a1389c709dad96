// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Bulk ROM writer and verifier.
//!
//! The first 2MB of the image goes to chip A, the remainder to chip B.  Pages
//! are written to the two chips alternately: while one chip is busy
//! programming a page, the other is being loaded or polled, hiding most of
//! each chip's program time behind the other's bus traffic.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::time::Instant;

use crate::command::{Commands, Status};
use crate::progress::{Progress, Stage};
use crate::{CHIP_SIZE, Chip, Error, MAX_ROM_SIZE, PAGE_SIZE, Region, Result, Transport};

/// Size of each read back during verification
pub const VERIFY_CHUNK_SIZE: usize = 0x10000;

// One chip's share of the image, and where the writer is within it.
#[derive(Debug)]
struct ChipStream<'d> {
    chip: Chip,
    data: &'d [u8],
    offset: usize,
    // Set while a page is programming, to when it was issued
    busy: Option<Instant>,
    aborted: bool,
}

impl<'d> ChipStream<'d> {
    fn new(chip: Chip, data: &'d [u8]) -> Self {
        Self {
            chip,
            data,
            offset: 0,
            busy: None,
            aborted: false,
        }
    }

    fn active(&self) -> bool {
        !self.aborted && self.offset < self.data.len()
    }

    // Advances this chip by at most one step: issue a page if idle, otherwise
    // poll the outstanding page once.
    fn step<T: Transport + ?Sized>(&mut self, commands: &mut Commands<'_, T>) -> Result<bool> {
        if !self.active() {
            return Ok(false);
        }

        match self.busy {
            None => {
                let page = &self.data[self.offset..self.offset + PAGE_SIZE];
                commands.page_write(self.chip.address(self.offset as u32), page)?;
                self.busy = Some(Instant::now());
                Ok(true)
            }
            Some(issued) => match commands.poll(self.chip, 0)? {
                Status::Busy => {
                    commands
                        .policy()
                        .check(self.chip.address(self.offset as u32), issued)?;
                    Ok(false)
                }
                Status::Ready => {
                    self.busy = None;
                    self.offset += PAGE_SIZE;
                    Ok(false)
                }
                Status::Error => {
                    error!(
                        "Programming failed on {} at offset {:#08X}",
                        self.chip, self.offset
                    );
                    self.busy = None;
                    self.aborted = true;
                    Ok(false)
                }
            },
        }
    }
}

fn check_rom_len(len: usize) -> Result<()> {
    let reason = if len == 0 {
        "image is empty"
    } else if len % PAGE_SIZE != 0 {
        "must be a multiple of 128 bytes"
    } else if len > MAX_ROM_SIZE {
        "must be no larger than 4MB"
    } else {
        return Ok(());
    };
    Err(Error::InvalidLength {
        region: Region::Rom,
        length: len,
        reason,
    })
}

/// Erases both chips, then writes `data` across them.
///
/// Returns the number of bytes successfully written.  A chip that reports a
/// program error stops at the failing page, while the other chip carries on,
/// so a short count indicates failure.
pub fn write_rom<T: Transport + ?Sized>(
    commands: &mut Commands<'_, T>,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<usize> {
    check_rom_len(data.len())?;
    let total = data.len();

    progress.update(Region::Rom, Stage::Erase, 0, total);
    commands.chip_erase()?;

    let split = total.min(CHIP_SIZE);
    let mut streams = [
        ChipStream::new(Chip::A, &data[..split]),
        ChipStream::new(Chip::B, &data[split..]),
    ];
    info!(
        "Writing ROM: {} bytes to chip A, {} bytes to chip B",
        streams[0].data.len(),
        streams[1].data.len()
    );

    while streams.iter().any(ChipStream::active) {
        #[allow(clippy::needless_range_loop)]
        for i in 0..streams.len() {
            if streams[i].step(commands)? {
                let done = streams[0].offset + streams[1].offset;
                progress.update(Region::Rom, Stage::Write, done, total);
            }
        }
    }

    let written = streams[0].offset + streams[1].offset;
    progress.update(Region::Rom, Stage::Write, written, total);
    commands.read_reset()?;

    debug!("ROM write complete: {written} of {total} bytes");
    Ok(written)
}

/// Reads the ROM back from chip A's mapped range, which continues into chip
/// B, comparing against `data` a chunk at a time.
///
/// Returns the number of bytes matched before the first mismatching chunk.
pub fn verify_rom<T: Transport + ?Sized>(
    transport: &mut T,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<usize> {
    let total = data.len();
    let mut offset = 0;

    while offset < total {
        progress.update(Region::Rom, Stage::Verify, offset, total);
        let len = VERIFY_CHUNK_SIZE.min(total - offset);
        let chunk = transport.read(Chip::A.base() + offset as u32, len)?;
        if chunk != data[offset..offset + len] {
            warn!("ROM mismatch in chunk at offset {offset:#08X}");
            break;
        }
        offset += len;
    }

    progress.update(Region::Rom, Stage::Verify, offset, total);
    Ok(offset)
}

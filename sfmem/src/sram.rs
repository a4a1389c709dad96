// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SRAM programmer.  SRAM needs no erase or unlock, so this is plain linear
//! access to four 8KB windows.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::address::{SRAM_BANK_END, SRAM_BANK_START, SRAM_FIRST_BANK, SRAM_LAST_BANK};
use crate::progress::{Progress, Stage};
use crate::{Error, Region, Result, SRAM_SIZE, Transport};

/// Size of each SRAM window
pub const SRAM_SEGMENT_SIZE: usize = 0x2000;

/// Base address of each SRAM window, in image order
pub const SRAM_SEGMENTS: [u32; 4] = [0x206000, 0x216000, 0x226000, 0x236000];

fn check_sram_len(len: usize) -> Result<()> {
    if len > SRAM_SIZE {
        Err(Error::SramTooLarge { size: len })
    } else {
        Ok(())
    }
}

/// Writes `data`, up to 32KB, from the start of SRAM.  Returns the number of
/// bytes written.
pub fn write_sram<T: Transport + ?Sized>(
    transport: &mut T,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<usize> {
    check_sram_len(data.len())?;

    let mut written = 0;
    for (address, segment) in SRAM_SEGMENTS.iter().zip(data.chunks(SRAM_SEGMENT_SIZE)) {
        progress.update(Region::Sram, Stage::Write, written, data.len());
        transport.write(*address, segment)?;
        written += segment.len();
    }
    progress.update(Region::Sram, Stage::Write, written, data.len());

    debug!("Wrote {written} bytes of SRAM");
    Ok(written)
}

/// Reads the whole 32KB of SRAM.
pub fn read_sram<T: Transport + ?Sized>(transport: &mut T) -> Result<Vec<u8>> {
    Ok(transport.read_range(SRAM_FIRST_BANK, SRAM_LAST_BANK, SRAM_BANK_START, SRAM_BANK_END)?)
}

/// Reads SRAM back and compares the first `data.len()` bytes against `data`.
/// Anything beyond is ignored.
///
/// Returns `data.len()` on a match, otherwise 0.
pub fn verify_sram<T: Transport + ?Sized>(
    transport: &mut T,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<usize> {
    check_sram_len(data.len())?;
    progress.update(Region::Sram, Stage::Verify, 0, data.len());

    let mut current = Vec::with_capacity(SRAM_SIZE);
    for address in SRAM_SEGMENTS {
        current.extend(transport.read(address, SRAM_SEGMENT_SIZE)?);
    }

    if current[..data.len()] == *data {
        progress.update(Region::Sram, Stage::Verify, data.len(), data.len());
        Ok(data.len())
    } else {
        let offset = current.iter().zip(data).position(|(a, b)| a != b);
        warn!("SRAM mismatch at offset {:#06X}", offset.unwrap_or_default());
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::transport::tests::Recorder;

    #[test]
    fn test_write_sram_segments() {
        let mut t = Recorder::new();
        let data = vec![0x33u8; 0x5000];
        assert_eq!(write_sram(&mut t, &data, &mut NoProgress).unwrap(), 0x5000);

        let layout: Vec<(u32, usize)> = t.writes.iter().map(|(a, d)| (*a, d.len())).collect();
        assert_eq!(layout, vec![(0x206000, 0x2000), (0x216000, 0x2000), (0x226000, 0x1000)]);
    }

    #[test]
    fn test_write_sram_too_large() {
        let mut t = Recorder::new();
        let result = write_sram(&mut t, &vec![0u8; SRAM_SIZE + 1], &mut NoProgress);
        assert!(matches!(result, Err(Error::SramTooLarge { size: 0x8001 })));
        assert!(t.writes.is_empty());
    }

    #[test]
    fn test_verify_sram_compares_prefix_only() {
        let mut t = Recorder::new();
        let data: Vec<u8> = (0..7000u32).map(|i| (i * 7) as u8).collect();
        t.mem[0x206000..0x206000 + 7000].copy_from_slice(&data);
        // Trailing contents differ from anything written
        t.mem[0x206000 + 7000..0x208000].fill(0xEE);
        t.mem[0x236000..0x238000].fill(0xEE);

        assert_eq!(verify_sram(&mut t, &data, &mut NoProgress).unwrap(), 7000);
        assert_eq!(t.reads.len(), 4);

        t.mem[0x206000 + 6999] ^= 1;
        assert_eq!(verify_sram(&mut t, &data, &mut NoProgress).unwrap(), 0);
    }

    #[test]
    fn test_verify_sram_spans_segments() {
        let mut t = Recorder::new();
        let data = vec![0xA5u8; SRAM_SIZE];
        for address in SRAM_SEGMENTS {
            let start = address as usize;
            t.mem[start..start + SRAM_SEGMENT_SIZE].fill(0xA5);
        }
        assert_eq!(verify_sram(&mut t, &data, &mut NoProgress).unwrap(), SRAM_SIZE);

        let dumped = read_sram(&mut t).unwrap();
        assert_eq!(dumped, data);
    }
}

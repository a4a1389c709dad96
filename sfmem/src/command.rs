// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash command encoder.
//!
//! Translates named flash operations into the single byte writes the chips
//! expect, JEDEC style: an unlock key (`0xAA` to `0xAAAA`, `0x55` to
//! `0x5554`), followed by the command byte.  Global commands go to both chips,
//! chip A first, a byte at a time.
//!
//! Status polling is exposed as a single step, [`Commands::poll()`], so the
//! caller decides how long to keep asking.  [`Commands::wait()`] is the
//! blocking form, bounded by the session's [`PollPolicy`].

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::time::{Duration, Instant};

use crate::address::{
    Chip, HIDDEN_STATUS_OFFSET, HIDDEN_UNLOCK_ADDR1, HIDDEN_UNLOCK_ADDR2, Target, UNLOCK_ADDR1,
    UNLOCK_ADDR2,
};
use crate::{Error, PAGE_SIZE, Region, Result, Transport};

// Status byte bits
const STATUS_READY: u8 = 0x80;
const STATUS_ERROR: u8 = 0x10;

// Unlock key bytes
const KEY1: u8 = 0xAA;
const KEY2: u8 = 0x55;

// Command bytes
const CMD_READ_RESET: u8 = 0xF0;
const CMD_ERASE_SETUP: u8 = 0x80;
const CMD_CHIP_ERASE: u8 = 0x10;
const CMD_PROGRAM: u8 = 0xA0;
const CMD_HIDDEN_UNLOCK: u8 = 0x77;
const CMD_HIDDEN_ERASE: u8 = 0xE0;
const CMD_HIDDEN_PROGRAM: u8 = 0x99;

// Show hidden sequence, written to offset 0 of both chips.  The first three
// bytes are followed by a status wait, the last two by nothing.
const SHOW_HIDDEN_PRE: [u8; 3] = [0x38, 0xD0, 0x71];
const SHOW_HIDDEN_POST: [u8; 2] = [0x72, 0x75];

/// Default bound on any single status wait
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Decoded status byte, valid only while an operation is being polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation still in progress
    Busy,
    /// Operation complete
    Ready,
    /// Operation complete with the error flag set
    Error,
}

impl Status {
    pub const fn from_byte(byte: u8) -> Self {
        if byte & STATUS_READY == 0 {
            Status::Busy
        } else if byte & STATUS_ERROR != 0 {
            Status::Error
        } else {
            Status::Ready
        }
    }

    pub const fn is_busy(&self) -> bool {
        matches!(self, Status::Busy)
    }
}

/// Bounds how long a blocking status wait may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// `None` waits forever, as the hardware itself provides no timeout
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }
}

impl PollPolicy {
    pub const fn unbounded() -> Self {
        Self { timeout: None }
    }

    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Returns an error if an operation started at `started` has overrun.
    pub fn check(&self, address: u32, started: Instant) -> Result<()> {
        match self.timeout {
            Some(timeout) if started.elapsed() > timeout => Err(Error::PollTimeout {
                address,
                elapsed: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

/// Issues flash commands over a borrowed transport.
pub struct Commands<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    policy: PollPolicy,
}

impl<'a, T: Transport + ?Sized> Commands<'a, T> {
    pub fn new(transport: &'a mut T, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn transport(&mut self) -> &mut T {
        &mut *self.transport
    }

    // Writes one byte at `offset` on each target chip, chip A first.
    fn write_to(&mut self, target: Target, offset: u32, value: u8) -> Result<()> {
        for chip in target.chips() {
            let address = chip.address(offset);
            trace!("Write {address:#08X} <- {value:#04X}");
            self.transport.write_byte(address, value)?;
        }
        Ok(())
    }

    /// Writes the unlock key followed by `cmd`.
    pub fn unlock_and(&mut self, target: Target, cmd: u8) -> Result<()> {
        debug!("Unlock {target:?} command {cmd:#04X}");
        self.write_to(target, UNLOCK_ADDR1, KEY1)?;
        self.write_to(target, UNLOCK_ADDR2, KEY2)?;
        self.write_to(target, UNLOCK_ADDR1, cmd)
    }

    // Hidden sector commands are preceded by a second key, at the upper
    // unlock addresses.
    fn hidden_unlock_and(&mut self, target: Target, cmd: u8) -> Result<()> {
        self.write_to(target, HIDDEN_UNLOCK_ADDR1, KEY1)?;
        self.write_to(target, HIDDEN_UNLOCK_ADDR2, KEY2)?;
        self.write_to(target, HIDDEN_UNLOCK_ADDR1, CMD_HIDDEN_UNLOCK)?;
        self.unlock_and(target, cmd)
    }

    /// Returns both chips to read array mode, which also hides the hidden
    /// sector again.
    pub fn read_reset(&mut self) -> Result<()> {
        self.unlock_and(Target::Global, CMD_READ_RESET)
    }

    /// Maps the hidden sector into the normal read window.  Must be followed
    /// by [`Self::read_reset()`] to restore normal reads.
    pub fn show_hidden(&mut self) -> Result<()> {
        debug!("Show hidden sector");
        for value in SHOW_HIDDEN_PRE {
            self.write_to(Target::Global, 0, value)?;
        }
        for chip in Chip::ALL {
            self.wait(chip, HIDDEN_STATUS_OFFSET)?;
        }
        for value in SHOW_HIDDEN_POST {
            self.write_to(Target::Global, 0, value)?;
        }
        Ok(())
    }

    /// Erases both chips entirely.  Blocks until both report ready.
    pub fn chip_erase(&mut self) -> Result<()> {
        info!("Erasing both flash chips");
        self.unlock_and(Target::Global, CMD_ERASE_SETUP)?;
        self.unlock_and(Target::Global, CMD_CHIP_ERASE)?;
        self.wait_erase()
    }

    /// Erases the hidden sector on both chips.  Blocks until both report
    /// ready.
    pub fn hidden_erase(&mut self) -> Result<()> {
        info!("Erasing hidden sectors");
        self.hidden_unlock_and(Target::Global, CMD_HIDDEN_ERASE)?;
        self.wait_erase()
    }

    // Erase completion only looks at the ready bit.
    fn wait_erase(&mut self) -> Result<()> {
        for chip in Chip::ALL {
            let status = self.wait(chip, 0)?;
            if Status::from_byte(status) == Status::Error {
                warn!("Error flag set after erasing {chip}: {status:#04X}");
            }
        }
        Ok(())
    }

    // Loads a page.  The last byte is written a second time, which the chip
    // requires to terminate the page buffer load.
    fn load_page(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.transport.write(address, data)?;
        self.transport
            .write_byte(address + (PAGE_SIZE as u32 - 1), data[PAGE_SIZE - 1])?;
        Ok(())
    }

    /// Programs a 128 byte page at `address`.  Does not wait for completion;
    /// use [`Self::poll()`] on the owning chip.
    pub fn page_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let chip = chip_for(address)?;
        check_page(Region::Rom, data)?;
        trace!("Page write {address:#08X}");
        self.unlock_and(Target::Local(chip), CMD_PROGRAM)?;
        self.load_page(address, data)
    }

    /// Programs a 128 byte page of the hidden sector at `address`, and waits
    /// for completion.  Returns `true` if the chip set its error flag.
    pub fn hidden_write(&mut self, address: u32, data: &[u8]) -> Result<bool> {
        let chip = chip_for(address)?;
        check_page(Region::Map, data)?;
        debug!("Hidden write {address:#08X}");
        self.hidden_unlock_and(Target::Local(chip), CMD_HIDDEN_PROGRAM)?;
        self.load_page(address, data)?;
        let status = self.wait(chip, 0)?;
        Ok(Status::from_byte(status) == Status::Error)
    }

    /// Reads the status register at `offset` of `chip` once.
    pub fn poll(&mut self, chip: Chip, offset: u32) -> Result<Status> {
        let byte = self.transport.read_byte(chip.address(offset))?;
        Ok(Status::from_byte(byte))
    }

    /// Polls until the ready bit is set, returning the raw status byte.
    pub fn wait(&mut self, chip: Chip, offset: u32) -> Result<u8> {
        let address = chip.address(offset);
        let started = Instant::now();
        let mut polls = 0u64;
        loop {
            let byte = self.transport.read_byte(address)?;
            polls += 1;
            if !Status::from_byte(byte).is_busy() {
                trace!("{chip} ready after {polls} polls: {byte:#04X}");
                return Ok(byte);
            }
            self.policy.check(address, started)?;
        }
    }
}

fn check_page(region: Region, data: &[u8]) -> Result<()> {
    if data.len() == PAGE_SIZE {
        Ok(())
    } else {
        Err(Error::InvalidLength {
            region,
            length: data.len(),
            reason: "pages are 128 bytes",
        })
    }
}

fn chip_for(address: u32) -> Result<Chip> {
    Chip::from_address(address).ok_or(Error::InvalidAddress { address })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::Recorder;

    fn commands(t: &mut Recorder) -> Commands<'_, Recorder> {
        Commands::new(t, PollPolicy::default())
    }

    #[test]
    fn test_status_decoding() {
        assert_eq!(Status::from_byte(0x00), Status::Busy);
        assert_eq!(Status::from_byte(0x10), Status::Busy);
        assert_eq!(Status::from_byte(0x80), Status::Ready);
        assert_eq!(Status::from_byte(0x90), Status::Error);
        assert_eq!(Status::from_byte(0xFF), Status::Error);
    }

    #[test]
    fn test_read_reset_sequence() {
        let mut t = Recorder::new();
        commands(&mut t).read_reset().unwrap();
        assert_eq!(
            t.byte_writes(),
            vec![
                (0xC0AAAA, 0xAA),
                (0xE0AAAA, 0xAA),
                (0xC05554, 0x55),
                (0xE05554, 0x55),
                (0xC0AAAA, 0xF0),
                (0xE0AAAA, 0xF0),
            ]
        );
    }

    #[test]
    fn test_chip_erase_sequence() {
        let mut t = Recorder::new();
        t.mem[0xC00000] = 0x80;
        t.mem[0xE00000] = 0x80;
        commands(&mut t).chip_erase().unwrap();

        let writes = t.byte_writes();
        let chip_a: Vec<_> = writes.iter().filter(|(a, _)| *a < 0xE00000).collect();
        assert_eq!(
            chip_a,
            vec![
                &(0xC0AAAA, 0xAA),
                &(0xC05554, 0x55),
                &(0xC0AAAA, 0x80),
                &(0xC0AAAA, 0xAA),
                &(0xC05554, 0x55),
                &(0xC0AAAA, 0x10),
            ]
        );
        assert_eq!(writes.len(), 12);
        assert_eq!(t.reads, vec![(0xC00000, 1), (0xE00000, 1)]);
    }

    #[test]
    fn test_erase_ignores_error_flag() {
        let mut t = Recorder::new();
        t.mem[0xC00000] = 0x90;
        t.mem[0xE00000] = 0x80;
        assert!(commands(&mut t).hidden_erase().is_ok());
    }

    #[test]
    fn test_hidden_erase_sequence() {
        let mut t = Recorder::new();
        t.mem[0xC00000] = 0x80;
        t.mem[0xE00000] = 0x80;
        commands(&mut t).hidden_erase().unwrap();

        let chip_b: Vec<_> = t
            .byte_writes()
            .into_iter()
            .filter(|(a, _)| *a >= 0xE00000)
            .collect();
        assert_eq!(
            chip_b,
            vec![
                (0xE1AAAA, 0xAA),
                (0xE15554, 0x55),
                (0xE1AAAA, 0x77),
                (0xE0AAAA, 0xAA),
                (0xE05554, 0x55),
                (0xE0AAAA, 0xE0),
            ]
        );
    }

    #[test]
    fn test_page_write_is_local_and_reasserts_last_byte() {
        let mut t = Recorder::new();
        let page: Vec<u8> = (0..128u8).collect();
        commands(&mut t).page_write(0xE01280, &page).unwrap();

        assert_eq!(
            t.writes,
            vec![
                (0xE0AAAA, vec![0xAA]),
                (0xE05554, vec![0x55]),
                (0xE0AAAA, vec![0xA0]),
                (0xE01280, page.clone()),
                (0xE012FF, vec![0x7F]),
            ]
        );
        // No polling
        assert!(t.reads.is_empty());
    }

    #[test]
    fn test_page_write_rejects_short_page() {
        let mut t = Recorder::new();
        let result = commands(&mut t).page_write(0xC00000, &[0u8; 64]);
        assert!(matches!(result, Err(Error::InvalidLength { length: 64, .. })));
        assert!(t.writes.is_empty());
    }

    #[test]
    fn test_page_write_rejects_non_flash_address() {
        let mut t = Recorder::new();
        let result = commands(&mut t).page_write(0x206000, &[0u8; 128]);
        assert!(matches!(result, Err(Error::InvalidAddress { address: 0x206000 })));
        assert!(t.writes.is_empty());
    }

    #[test]
    fn test_hidden_write_reports_error_flag() {
        let mut t = Recorder::new();
        let page = [0x5Au8; 128];

        t.mem[0xC00000] = 0x80;
        assert!(!commands(&mut t).hidden_write(0xC0FF80, &page).unwrap());

        t.mem[0xC00000] = 0x90;
        assert!(commands(&mut t).hidden_write(0xC0FF80, &page).unwrap());

        let writes = t.byte_writes();
        assert_eq!(&writes[..6], &[
            (0xC1AAAA, 0xAA),
            (0xC15554, 0x55),
            (0xC1AAAA, 0x77),
            (0xC0AAAA, 0xAA),
            (0xC05554, 0x55),
            (0xC0AAAA, 0x99),
        ]);
        assert_eq!(writes[6], (0xC0FFFF, 0x5A));
    }

    #[test]
    fn test_show_hidden_waits_on_status_offset() {
        let mut t = Recorder::new();
        t.mem[0xC00004] = 0x80;
        t.mem[0xE00004] = 0x80;
        commands(&mut t).show_hidden().unwrap();

        let values: Vec<u8> = t.byte_writes().iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0x38, 0x38, 0xD0, 0xD0, 0x71, 0x71, 0x72, 0x72, 0x75, 0x75]);
        assert_eq!(t.reads, vec![(0xC00004, 1), (0xE00004, 1)]);
    }

    #[test]
    fn test_wait_times_out() {
        let mut t = Recorder::new();
        let mut commands = Commands::new(&mut t, PollPolicy::with_timeout(Duration::from_millis(5)));
        let result = commands.wait(Chip::B, 0);
        assert!(matches!(result, Err(Error::PollTimeout { address: 0xE00000, .. })));
    }
}

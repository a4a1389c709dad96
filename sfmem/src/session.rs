// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Device session.
//!
//! [`Session::open()`] detects the cassette through its control register,
//! waking it if necessary, and leaves it in HIROM:ALL mode with both chips
//! reading array data.  Reads and verification run on a [`Session`] directly.
//!
//! Anything that erases or programs needs write protect released, which is
//! only possible through a [`WriteSession`], obtained from
//! [`Session::unlock()`].  Dropping a [`WriteSession`], on any path, resets
//! the chips to read mode and re-asserts write protect.

use core::ops::{Deref, DerefMut};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::address::{CONTROL_REG, CONTROL_REG2, ROM_FIRST_BANK, ROM_LAST_BANK};
use crate::command::{Commands, PollPolicy};
use crate::directory::{self, Directory};
use crate::progress::Progress;
use crate::{Error, Result, Transport, map, rom, sram};

// Control register status values
const STATUS_AWAKE: u8 = 0x2A;
const STATUS_ASLEEP: u8 = 0x7D;

// Control register commands
const CTRL_WP_RELEASE: u8 = 0x02;
const CTRL_WP_ASSERT: u8 = 0x03;
const CTRL_HIROM_ALL: u8 = 0x04;

/// The state the cassette reported when the session was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Asleep,
    Awake,
}

impl DeviceState {
    /// Decodes the control register, `None` if no cassette is recognised
    pub const fn from_status(status: u8) -> Option<Self> {
        match status {
            STATUS_AWAKE => Some(DeviceState::Awake),
            STATUS_ASLEEP => Some(DeviceState::Asleep),
            _ => None,
        }
    }
}

// Fixed wake up sequence.  The read of the control register part way through
// is part of the sequence, its value is discarded.
fn wake<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    debug!("Waking SF memory");
    transport.write_byte(CONTROL_REG, 0x09)?;
    let _ = transport.read_byte(CONTROL_REG)?;
    transport.write_byte(CONTROL_REG2, 0x28)?;
    transport.write_byte(CONTROL_REG2, 0x84)?;
    transport.write_byte(CONTROL_REG, 0x06)?;
    transport.write_byte(CONTROL_REG, 0x39)?;
    Ok(())
}

/// An open, detected, SF Memory cassette.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    policy: PollPolicy,
    initial_state: DeviceState,
}

impl<T: Transport> Session<T> {
    /// Detects the cassette, waking it if asleep, and selects HIROM:ALL.
    ///
    /// Fails with [`Error::NotDetected`] if the control register holds
    /// anything other than the awake or asleep values.  Nothing is written
    /// to the device in that case.
    pub fn open(transport: T) -> Result<Self> {
        Self::open_with_policy(transport, PollPolicy::default())
    }

    /// As [`Self::open()`], with a non-default bound on status waits.
    pub fn open_with_policy(mut transport: T, policy: PollPolicy) -> Result<Self> {
        let status = transport.read_byte(CONTROL_REG)?;
        let initial_state =
            DeviceState::from_status(status).ok_or(Error::NotDetected { status })?;
        if initial_state == DeviceState::Asleep {
            wake(&mut transport)?;
        }
        info!("SF memory is detected ({initial_state:?})");

        transport.write_byte(CONTROL_REG, CTRL_HIROM_ALL)?;
        let mut session = Self {
            transport,
            policy,
            initial_state,
        };
        session.commands().read_reset()?;
        Ok(session)
    }

    pub fn initial_state(&self) -> DeviceState {
        self.initial_state
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn set_poll_policy(&mut self, policy: PollPolicy) {
        self.policy = policy;
    }

    /// Flash command encoder over this session's transport
    pub fn commands(&mut self) -> Commands<'_, T> {
        Commands::new(&mut self.transport, self.policy)
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Closes the session, returning the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Releases write protect.  Protection is restored when the returned
    /// [`WriteSession`] is released or dropped.
    pub fn unlock(&mut self) -> Result<WriteSession<'_, T>> {
        let mut writer = WriteSession {
            session: self,
            released: false,
        };
        debug!("Releasing write protect");
        writer.session.transport.write_byte(CONTROL_REG, CTRL_WP_RELEASE)?;
        writer.session.transport.write_byte(CONTROL_REG, CTRL_HIROM_ALL)?;
        Ok(writer)
    }

    // Read mode, then write protect.  Both are attempted even if the first
    // fails.
    fn protect(&mut self) -> Result<()> {
        debug!("Asserting write protect");
        let reset = self.commands().read_reset();
        let protect = self.transport.write_byte(CONTROL_REG, CTRL_WP_ASSERT);
        reset?;
        Ok(protect?)
    }

    /// See [`rom::verify_rom()`]
    pub fn verify_rom(&mut self, data: &[u8], progress: &mut dyn Progress) -> Result<usize> {
        rom::verify_rom(&mut self.transport, data, progress)
    }

    /// See [`map::verify_map()`]
    pub fn verify_map(&mut self, data: &[u8], progress: &mut dyn Progress) -> Result<usize> {
        map::verify_map(&mut self.commands(), data, progress)
    }

    /// See [`sram::verify_sram()`]
    pub fn verify_sram(&mut self, data: &[u8], progress: &mut dyn Progress) -> Result<usize> {
        sram::verify_sram(&mut self.transport, data, progress)
    }

    /// Reads the 512 byte map
    pub fn read_map(&mut self) -> Result<Vec<u8>> {
        map::read_map(&mut self.commands())
    }

    /// Reads the entire 4MB of flash
    pub fn read_rom(&mut self) -> Result<Vec<u8>> {
        self.read_rom_banks(ROM_FIRST_BANK, ROM_LAST_BANK)
    }

    /// Reads whole flash banks, `first_bank..=last_bank`
    pub fn read_rom_banks(&mut self, first_bank: u8, last_bank: u8) -> Result<Vec<u8>> {
        if first_bank < ROM_FIRST_BANK {
            return Err(Error::InvalidAddress {
                address: (first_bank as u32) << 16,
            });
        }
        Ok(self.transport.read_range(first_bank, last_bank, 0x0000, 0xFFFF)?)
    }

    /// Reads all 32KB of SRAM
    pub fn read_sram(&mut self) -> Result<Vec<u8>> {
        sram::read_sram(&mut self.transport)
    }

    /// Whether the cassette carries the multi-cassette menu and directory
    pub fn is_multicassette(&mut self) -> Result<bool> {
        directory::is_multicassette(&mut self.transport)
    }

    /// Reads the directory.  Only meaningful if [`Self::is_multicassette()`].
    pub fn directory(&mut self) -> Directory<'_, T> {
        Directory::new(&mut self.transport)
    }
}

/// A [`Session`] with write protect released.
///
/// Derefs to the [`Session`], so reads and verification remain available.
pub struct WriteSession<'s, T: Transport> {
    session: &'s mut Session<T>,
    released: bool,
}

impl<T: Transport> WriteSession<'_, T> {
    /// See [`rom::write_rom()`]
    pub fn write_rom(&mut self, data: &[u8], progress: &mut dyn Progress) -> Result<usize> {
        rom::write_rom(&mut self.session.commands(), data, progress)
    }

    /// See [`map::write_map()`]
    pub fn write_map(&mut self, data: &[u8], progress: &mut dyn Progress) -> Result<usize> {
        map::write_map(&mut self.session.commands(), data, progress)
    }

    /// See [`sram::write_sram()`]
    pub fn write_sram(&mut self, data: &[u8], progress: &mut dyn Progress) -> Result<usize> {
        sram::write_sram(&mut self.session.transport, data, progress)
    }

    /// Restores read mode and write protect, reporting any failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.session.protect()
    }
}

impl<T: Transport> Deref for WriteSession<'_, T> {
    type Target = Session<T>;

    fn deref(&self) -> &Session<T> {
        &*self.session
    }
}

impl<T: Transport> DerefMut for WriteSession<'_, T> {
    fn deref_mut(&mut self) -> &mut Session<T> {
        &mut *self.session
    }
}

impl<T: Transport> Drop for WriteSession<'_, T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.session.protect() {
            warn!("Failed to restore write protect: {e}");
        }
    }
}

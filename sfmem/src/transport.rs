// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Byte level access to the cartridge address space.
//!
//! The engine in this crate never chunks or retries; every call is expected
//! to complete synchronously and byte-exact, or fail.

use std::io;

/// A byte addressable view of the 24-bit cartridge address space.
pub trait Transport {
    /// Read `len` bytes starting at `address`.
    fn read(&mut self, address: u32, len: usize) -> io::Result<Vec<u8>>;

    /// Write `data` starting at `address`.
    fn write(&mut self, address: u32, data: &[u8]) -> io::Result<()>;

    /// Read `start..=end` from each bank in `first_bank..=last_bank`, and
    /// concatenate the results.
    ///
    /// Transports with a faster bulk path should override this.
    fn read_range(
        &mut self,
        first_bank: u8,
        last_bank: u8,
        start: u16,
        end: u16,
    ) -> io::Result<Vec<u8>> {
        if end < start || last_bank < first_bank {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "invalid range: banks {first_bank:#04X}-{last_bank:#04X}, offsets {start:#06X}-{end:#06X}"
                ),
            ));
        }

        let per_bank = (end - start) as usize + 1;
        let mut data = Vec::with_capacity(per_bank * (last_bank - first_bank) as usize + per_bank);
        for bank in first_bank..=last_bank {
            let address = ((bank as u32) << 16) | start as u32;
            data.extend_from_slice(&self.read(address, per_bank)?);
        }
        Ok(data)
    }

    /// Read a single byte.
    fn read_byte(&mut self, address: u32) -> io::Result<u8> {
        let data = self.read(address, 1)?;
        data.first().copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("empty read at {address:#08X}"),
            )
        })
    }

    /// Write a single byte.
    fn write_byte(&mut self, address: u32, value: u8) -> io::Result<()> {
        self.write(address, &[value])
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self, address: u32, len: usize) -> io::Result<Vec<u8>> {
        (**self).read(address, len)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> io::Result<()> {
        (**self).write(address, data)
    }

    fn read_range(
        &mut self,
        first_bank: u8,
        last_bank: u8,
        start: u16,
        end: u16,
    ) -> io::Result<Vec<u8>> {
        (**self).read_range(first_bank, last_bank, start, end)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, address: u32, len: usize) -> io::Result<Vec<u8>> {
        (**self).read(address, len)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> io::Result<()> {
        (**self).write(address, data)
    }

    fn read_range(
        &mut self,
        first_bank: u8,
        last_bank: u8,
        start: u16,
        end: u16,
    ) -> io::Result<Vec<u8>> {
        (**self).read_range(first_bank, last_bank, start, end)
    }
}

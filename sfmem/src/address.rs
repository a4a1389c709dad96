// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Cartridge address map.
//!
//! Flash lives in banks `0xC0`-`0xFF`.  Bit 21 selects the chip: chip A at
//! `0xC00000`, chip B at `0xE00000`.  Flash command addresses are expressed
//! relative to a chip base, and global commands are mirrored to both chips.

/// Mask selecting the chip base from a flash address
pub const CHIP_MASK: u32 = 0xE00000;

/// Mask selecting the offset within a chip
pub const CHIP_OFFSET_MASK: u32 = 0x1FFFFF;

/// Device control / status register
pub const CONTROL_REG: u32 = 0x2400;

/// Second control register, only used during wake up
pub const CONTROL_REG2: u32 = 0x2401;

/// JEDEC unlock addresses, relative to a chip base
pub const UNLOCK_ADDR1: u32 = 0xAAAA;
pub const UNLOCK_ADDR2: u32 = 0x5554;

/// Hidden sector unlock addresses, relative to a chip base
pub const HIDDEN_UNLOCK_ADDR1: u32 = 0x1AAAA;
pub const HIDDEN_UNLOCK_ADDR2: u32 = 0x15554;

/// Offset of the show-hidden status register, relative to a chip base
pub const HIDDEN_STATUS_OFFSET: u32 = 0x0004;

/// Offset of the hidden map window within each chip (bank `0xC0`/`0xE0`)
pub const MAP_OFFSET: u32 = 0xFF00;

/// SRAM window: banks `0x20`-`0x23`, offsets `0x6000`-`0x7FFF`
pub const SRAM_FIRST_BANK: u8 = 0x20;
pub const SRAM_LAST_BANK: u8 = 0x23;
pub const SRAM_BANK_START: u16 = 0x6000;
pub const SRAM_BANK_END: u16 = 0x7FFF;

/// Flash banks, as mapped in HIROM:ALL mode
pub const ROM_FIRST_BANK: u8 = 0xC0;
pub const ROM_LAST_BANK: u8 = 0xFF;

/// One of the two flash chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Chip {
    A,
    B,
}

impl Chip {
    pub const ALL: [Chip; 2] = [Chip::A, Chip::B];

    /// Base address of this chip
    pub const fn base(&self) -> u32 {
        match self {
            Chip::A => 0xC00000,
            Chip::B => 0xE00000,
        }
    }

    /// Absolute address of `offset` within this chip
    pub const fn address(&self, offset: u32) -> u32 {
        self.base() | (offset & CHIP_OFFSET_MASK)
    }

    /// Which chip a flash address belongs to, if any
    pub const fn from_address(address: u32) -> Option<Chip> {
        match address & CHIP_MASK {
            0xC00000 => Some(Chip::A),
            0xE00000 => Some(Chip::B),
            _ => None,
        }
    }

    /// Index of this chip, 0 for A and 1 for B
    pub const fn index(&self) -> usize {
        match self {
            Chip::A => 0,
            Chip::B => 1,
        }
    }

    /// Absolute address of this chip's map window
    pub const fn map_address(&self) -> u32 {
        self.address(MAP_OFFSET)
    }
}

impl std::fmt::Display for Chip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chip::A => write!(f, "chip A"),
            Chip::B => write!(f, "chip B"),
        }
    }
}

/// Where a flash command is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Mirrored to both chips, chip A first
    Global,
    /// A single chip
    Local(Chip),
}

impl Target {
    /// The chips this target addresses, in write order
    pub fn chips(&self) -> &'static [Chip] {
        match self {
            Target::Global => &Chip::ALL,
            Target::Local(Chip::A) => &[Chip::A],
            Target::Local(Chip::B) => &[Chip::B],
        }
    }
}

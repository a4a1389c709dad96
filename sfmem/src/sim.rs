// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! A simulated SF Memory cassette, implementing [`Transport`].
//!
//! Models the control register (sleep, wake, write protect and mapping mode),
//! two flash chips with their hidden sectors, and the SRAM.  Each chip decodes
//! the command sequences written to it, and reports status the way the real
//! chips do, including staying busy for a configurable number of polls.
//!
//! Faults can be injected: individual pages that fail to program, and chips
//! that never complete.
//!
//! ```
//! use sfmem::sim::SimCassette;
//! use sfmem::Session;
//!
//! let mut session = Session::open(SimCassette::new()).unwrap();
//! assert!(!session.is_multicassette().unwrap());
//! ```

use std::collections::HashSet;
use std::io;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::address::{
    CHIP_OFFSET_MASK, CONTROL_REG, CONTROL_REG2, HIDDEN_UNLOCK_ADDR1, HIDDEN_UNLOCK_ADDR2,
    MAP_OFFSET, SRAM_BANK_END, SRAM_BANK_START, SRAM_FIRST_BANK, SRAM_LAST_BANK, UNLOCK_ADDR1,
    UNLOCK_ADDR2,
};
use crate::{CHIP_SIZE, Chip, Error, MAP_SIZE, MAX_ROM_SIZE, PAGE_SIZE, SRAM_SIZE, Transport};

// Command history long enough for the longest sequence
const HISTORY_LEN: usize = 6;

// Offset of the byte that must be re-written to commit a page load
const LAST_BYTE: u32 = PAGE_SIZE as u32 - 1;

const HIDDEN_SIZE: usize = MAP_SIZE / 2;

const STATUS_BUSY: u8 = 0x00;
const STATUS_READY: u8 = 0x80;
const STATUS_ERROR: u8 = 0x10;

// Control register values
const CTRL_AWAKE: u8 = 0x2A;
const CTRL_ASLEEP: u8 = 0x7D;
const CTRL_ABSENT: u8 = 0xFF;

const WAKE_SEQUENCE: [(u32, u8); 5] = [
    (CONTROL_REG, 0x09),
    (CONTROL_REG2, 0x28),
    (CONTROL_REG2, 0x84),
    (CONTROL_REG, 0x06),
    (CONTROL_REG, 0x39),
];

/// Something the simulated cassette did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    ChipErase { chip: Chip, ok: bool },
    HiddenErase { chip: Chip, ok: bool },
    Program { address: u32, ok: bool },
    HiddenProgram { address: u32, ok: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Power {
    Absent,
    // Progress through the wake sequence
    Asleep { step: usize },
    Awake,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Array,
    Status,
    ProgramArmed { hidden: bool },
    ProgramLoaded { hidden: bool, offset: u32, page: Vec<u8> },
}

// State shared by both chips, which affects the outcome of an operation
#[derive(Debug, Clone, Default)]
struct Conditions {
    write_protected: bool,
    busy_polls: u32,
    failing_pages: HashSet<u32>,
    failing_hidden: HashSet<u32>,
}

#[derive(Debug, Clone)]
struct SimChip {
    chip: Chip,
    flash: Vec<u8>,
    hidden: Vec<u8>,
    history: Vec<(u32, u8)>,
    mode: Mode,
    show_pending: bool,
    hidden_visible: bool,
    busy: u32,
    error: bool,
    stuck: bool,
}

impl SimChip {
    fn new(chip: Chip) -> Self {
        Self {
            chip,
            flash: vec![0xFF; CHIP_SIZE],
            hidden: vec![0xFF; HIDDEN_SIZE],
            history: Vec::with_capacity(HISTORY_LEN + 1),
            mode: Mode::Array,
            show_pending: false,
            hidden_visible: false,
            busy: 0,
            error: false,
            stuck: false,
        }
    }

    fn begin(&mut self, ok: bool, conditions: &Conditions) {
        self.mode = Mode::Status;
        self.busy = conditions.busy_polls;
        self.error = !ok;
    }

    fn take_loaded(&mut self) -> Option<(bool, u32, Vec<u8>)> {
        match std::mem::replace(&mut self.mode, Mode::Array) {
            Mode::ProgramLoaded {
                hidden,
                offset,
                page,
            } => Some((hidden, offset, page)),
            other => {
                self.mode = other;
                None
            }
        }
    }

    fn erase(&mut self, hidden: bool, conditions: &Conditions) -> SimEvent {
        let ok = !conditions.write_protected;
        if ok {
            if hidden {
                self.hidden.fill(0xFF);
            } else {
                self.flash.fill(0xFF);
            }
        }
        self.begin(ok, conditions);
        let kind = if hidden { "hidden" } else { "chip" };
        debug!("{}: {kind} erase, ok: {ok}", self.chip);

        let chip = self.chip;
        if hidden {
            SimEvent::HiddenErase { chip, ok }
        } else {
            SimEvent::ChipErase { chip, ok }
        }
    }

    fn program(
        &mut self,
        hidden: bool,
        offset: u32,
        page: &[u8],
        conditions: &Conditions,
    ) -> SimEvent {
        let address = self.chip.address(offset);
        let start = offset as usize;
        let (target, failing) = if hidden {
            let window = start
                .checked_sub(MAP_OFFSET as usize)
                .filter(|index| index + PAGE_SIZE <= HIDDEN_SIZE);
            (
                window.map(|index| &mut self.hidden[index..index + PAGE_SIZE]),
                conditions.failing_hidden.contains(&address),
            )
        } else {
            (
                Some(&mut self.flash[start..start + PAGE_SIZE]),
                conditions.failing_pages.contains(&address),
            )
        };

        let ok = !conditions.write_protected && !failing && target.is_some();
        if let Some(target) = target.filter(|_| ok) {
            // Programming can only clear bits
            for (cell, byte) in target.iter_mut().zip(page) {
                *cell &= byte;
            }
        }
        self.begin(ok, conditions);
        trace!("{}: program {address:#08X}, ok: {ok}", self.chip);

        if hidden {
            SimEvent::HiddenProgram { address, ok }
        } else {
            SimEvent::Program { address, ok }
        }
    }

    fn write_byte(&mut self, offset: u32, value: u8, conditions: &Conditions) -> Option<SimEvent> {
        if let Some((hidden, start, page)) = self.take_loaded() {
            if offset == start + LAST_BYTE && value == page[LAST_BYTE as usize] {
                self.history.clear();
                return Some(self.program(hidden, start, &page, conditions));
            }
            warn!("{}: page load at {start:#07X} not committed", self.chip);
        }

        self.history.push((offset, value));
        if self.history.len() > HISTORY_LEN {
            self.history.remove(0);
        }

        let event = match self.history.as_slice() {
            [
                ..,
                (UNLOCK_ADDR1, 0xAA),
                (UNLOCK_ADDR2, 0x55),
                (UNLOCK_ADDR1, 0x80),
                (UNLOCK_ADDR1, 0xAA),
                (UNLOCK_ADDR2, 0x55),
                (UNLOCK_ADDR1, 0x10),
            ] => Some(self.erase(false, conditions)),
            [
                ..,
                (HIDDEN_UNLOCK_ADDR1, 0xAA),
                (HIDDEN_UNLOCK_ADDR2, 0x55),
                (HIDDEN_UNLOCK_ADDR1, 0x77),
                (UNLOCK_ADDR1, 0xAA),
                (UNLOCK_ADDR2, 0x55),
                (UNLOCK_ADDR1, 0xE0),
            ] => Some(self.erase(true, conditions)),
            [
                ..,
                (HIDDEN_UNLOCK_ADDR1, 0xAA),
                (HIDDEN_UNLOCK_ADDR2, 0x55),
                (HIDDEN_UNLOCK_ADDR1, 0x77),
                (UNLOCK_ADDR1, 0xAA),
                (UNLOCK_ADDR2, 0x55),
                (UNLOCK_ADDR1, 0x99),
            ] => {
                self.mode = Mode::ProgramArmed { hidden: true };
                None
            }
            [.., (UNLOCK_ADDR1, 0xAA), (UNLOCK_ADDR2, 0x55), (UNLOCK_ADDR1, 0xF0)] => {
                self.mode = Mode::Array;
                self.hidden_visible = false;
                self.show_pending = false;
                None
            }
            [.., (UNLOCK_ADDR1, 0xAA), (UNLOCK_ADDR2, 0x55), (UNLOCK_ADDR1, 0xA0)] => {
                self.mode = Mode::ProgramArmed { hidden: false };
                None
            }
            [.., (0, 0x38), (0, 0xD0), (0, 0x71)] => {
                self.show_pending = true;
                self.begin(true, conditions);
                None
            }
            [.., (0, 0x72), (0, 0x75)] if self.show_pending => {
                self.show_pending = false;
                self.hidden_visible = true;
                self.mode = Mode::Array;
                None
            }
            _ => return None,
        };

        self.history.clear();
        event
    }

    fn load(&mut self, offset: u32, data: &[u8]) {
        self.history.clear();
        match self.mode {
            Mode::ProgramArmed { hidden }
                if data.len() == PAGE_SIZE && offset as usize % PAGE_SIZE == 0 =>
            {
                self.mode = Mode::ProgramLoaded {
                    hidden,
                    offset,
                    page: data.to_vec(),
                };
            }
            _ => debug!(
                "{}: ignoring {} byte write at {offset:#07X}",
                self.chip,
                data.len()
            ),
        }
    }

    fn status(&mut self) -> u8 {
        if self.stuck {
            STATUS_BUSY
        } else if self.busy > 0 {
            self.busy -= 1;
            STATUS_BUSY
        } else if self.error {
            STATUS_READY | STATUS_ERROR
        } else {
            STATUS_READY
        }
    }

    fn read(&mut self, offset: u32, out: &mut [u8]) {
        if self.mode == Mode::Status {
            let status = self.status();
            out.fill(status);
            return;
        }

        for (ii, byte) in out.iter_mut().enumerate() {
            let offset = offset as usize + ii;
            *byte = match offset.checked_sub(MAP_OFFSET as usize) {
                Some(index) if self.hidden_visible && index < HIDDEN_SIZE => self.hidden[index],
                _ => self.flash[offset],
            };
        }
    }
}

// What a cartridge address decodes to
enum Area {
    Control,
    Flash { chip: Chip, offset: u32 },
    Sram { index: usize, remaining: usize },
    Unmapped,
}

fn area(address: u32) -> Area {
    if address == CONTROL_REG || address == CONTROL_REG2 {
        return Area::Control;
    }
    if let Some(chip) = Chip::from_address(address) {
        return Area::Flash {
            chip,
            offset: address & CHIP_OFFSET_MASK,
        };
    }

    let bank = (address >> 16) as u8;
    let offset = address as u16;
    if (SRAM_FIRST_BANK..=SRAM_LAST_BANK).contains(&bank)
        && (SRAM_BANK_START..=SRAM_BANK_END).contains(&offset)
    {
        let window = (SRAM_BANK_END - SRAM_BANK_START) as usize + 1;
        let within = (offset - SRAM_BANK_START) as usize;
        Area::Sram {
            index: (bank - SRAM_FIRST_BANK) as usize * window + within,
            remaining: window - within,
        }
    } else {
        Area::Unmapped
    }
}

/// A simulated cassette.
#[derive(Debug, Clone)]
pub struct SimCassette {
    power: Power,
    hirom: bool,
    chips: [SimChip; 2],
    sram: Vec<u8>,
    conditions: Conditions,
    events: Vec<SimEvent>,
}

impl Default for SimCassette {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCassette {
    /// A blank cassette, asleep and write protected, as at power on
    pub fn new() -> Self {
        Self {
            power: Power::Asleep { step: 0 },
            hirom: false,
            chips: [SimChip::new(Chip::A), SimChip::new(Chip::B)],
            sram: vec![0; SRAM_SIZE],
            conditions: Conditions {
                write_protected: true,
                busy_polls: 1,
                ..Default::default()
            },
            events: Vec::new(),
        }
    }

    /// A blank cassette which is already awake
    pub fn awake() -> Self {
        let mut sim = Self::new();
        sim.power = Power::Awake;
        sim
    }

    /// No cassette at all
    pub fn absent() -> Self {
        let mut sim = Self::new();
        sim.power = Power::Absent;
        sim
    }

    /// A cassette holding the given contents.  Shorter images leave the rest
    /// of flash erased, the map erased if empty, and the rest of SRAM zeroed.
    pub fn from_parts(rom: &[u8], map: &[u8], sram: &[u8]) -> crate::Result<Self> {
        if rom.len() > MAX_ROM_SIZE {
            return Err(Error::RomTooLarge { size: rom.len() });
        }
        if !map.is_empty() && map.len() != MAP_SIZE {
            return Err(Error::MapWrongSize { size: map.len() });
        }
        if sram.len() > SRAM_SIZE {
            return Err(Error::SramTooLarge { size: sram.len() });
        }

        let mut sim = Self::new();
        for (chip, data) in sim.chips.iter_mut().zip(rom.chunks(CHIP_SIZE)) {
            chip.flash[..data.len()].copy_from_slice(data);
        }
        for (chip, data) in sim.chips.iter_mut().zip(map.chunks(HIDDEN_SIZE)) {
            chip.hidden.copy_from_slice(data);
        }
        sim.sram[..sram.len()].copy_from_slice(sram);
        Ok(sim)
    }

    /// The full 4MB of flash, chip A then chip B
    pub fn rom(&self) -> Vec<u8> {
        self.chips.iter().flat_map(|c| c.flash.iter().copied()).collect()
    }

    /// The 512 byte map, chip A's hidden sector then chip B's
    pub fn map(&self) -> Vec<u8> {
        self.chips.iter().flat_map(|c| c.hidden.iter().copied()).collect()
    }

    /// The 32KB of SRAM
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn is_awake(&self) -> bool {
        self.power == Power::Awake
    }

    pub fn is_write_protected(&self) -> bool {
        self.conditions.write_protected
    }

    pub fn is_hidden_visible(&self, chip: Chip) -> bool {
        self.chips[chip.index()].hidden_visible
    }

    /// Everything the cassette has erased or programmed, in order
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Number of status reads that report busy after each operation
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.conditions.busy_polls = polls;
    }

    /// Makes programming the page at `address` fail with the error flag
    pub fn fail_page(&mut self, address: u32) {
        self.conditions.failing_pages.insert(address);
    }

    /// Makes programming the hidden page at `address` fail with the error flag
    pub fn fail_hidden_page(&mut self, address: u32) {
        self.conditions.failing_hidden.insert(address);
    }

    /// Makes `chip` report busy forever
    pub fn stick(&mut self, chip: Chip) {
        self.chips[chip.index()].stuck = true;
    }

    // Flash only appears once the cassette is awake and mapped
    fn flash_mapped(&self) -> bool {
        self.power == Power::Awake && self.hirom
    }

    fn control_read(&self) -> u8 {
        match self.power {
            Power::Absent => CTRL_ABSENT,
            Power::Asleep { .. } => CTRL_ASLEEP,
            Power::Awake => CTRL_AWAKE,
        }
    }

    fn control_write(&mut self, address: u32, value: u8) {
        match self.power {
            Power::Absent => {}
            Power::Asleep { step } => {
                let step = if WAKE_SEQUENCE[step] == (address, value) {
                    step + 1
                } else if WAKE_SEQUENCE[0] == (address, value) {
                    1
                } else {
                    0
                };
                self.power = if step == WAKE_SEQUENCE.len() {
                    debug!("Woken");
                    Power::Awake
                } else {
                    Power::Asleep { step }
                };
            }
            Power::Awake if address == CONTROL_REG => match value {
                0x02 => self.conditions.write_protected = false,
                0x03 => self.conditions.write_protected = true,
                0x04 => self.hirom = true,
                _ => debug!("Ignoring control value {value:#04X}"),
            },
            Power::Awake => {}
        }
    }

    fn out_of_range(address: u32, len: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{len} byte access at {address:#08X} crosses a window"),
        )
    }
}

impl Transport for SimCassette {
    fn read(&mut self, address: u32, len: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0xFF; len];
        let mut done = 0;
        while done < len {
            let address = address + done as u32;
            let remaining = len - done;
            done += match area(address) {
                Area::Control => {
                    out[done] = self.control_read();
                    1
                }
                Area::Flash { chip, offset } => {
                    let run = remaining.min(CHIP_SIZE - offset as usize);
                    if self.flash_mapped() {
                        self.chips[chip.index()].read(offset, &mut out[done..done + run]);
                    }
                    run
                }
                Area::Sram { index, remaining: window } => {
                    let run = remaining.min(window);
                    out[done..done + run].copy_from_slice(&self.sram[index..index + run]);
                    run
                }
                Area::Unmapped => 1,
            };
        }
        Ok(out)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        match area(address) {
            Area::Control if data.len() == 1 => self.control_write(address, data[0]),
            Area::Control => return Err(Self::out_of_range(address, data.len())),
            Area::Flash { chip, offset } => {
                if offset as usize + data.len() > CHIP_SIZE {
                    return Err(Self::out_of_range(address, data.len()));
                }
                if !self.flash_mapped() {
                    debug!("Ignoring write to unmapped flash at {address:#08X}");
                    return Ok(());
                }
                let sim_chip = &mut self.chips[chip.index()];
                if data.len() == 1 {
                    if let Some(event) = sim_chip.write_byte(offset, data[0], &self.conditions) {
                        self.events.push(event);
                    }
                } else {
                    sim_chip.load(offset, data);
                }
            }
            Area::Sram { index, remaining } => {
                if data.len() > remaining {
                    return Err(Self::out_of_range(address, data.len()));
                }
                self.sram[index..index + data.len()].copy_from_slice(data);
            }
            Area::Unmapped => debug!("Ignoring write to {address:#08X}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Commands, PollPolicy, Status};

    fn mapped() -> SimCassette {
        let mut sim = SimCassette::awake();
        sim.write_byte(CONTROL_REG, 0x04).unwrap();
        sim.write_byte(CONTROL_REG, 0x02).unwrap();
        sim
    }

    #[test]
    fn test_wake_sequence() {
        let mut sim = SimCassette::new();
        assert_eq!(sim.read_byte(CONTROL_REG).unwrap(), CTRL_ASLEEP);

        for (address, value) in WAKE_SEQUENCE {
            assert!(!sim.is_awake());
            sim.write_byte(address, value).unwrap();
        }
        assert!(sim.is_awake());
        assert_eq!(sim.read_byte(CONTROL_REG).unwrap(), CTRL_AWAKE);
    }

    #[test]
    fn test_flash_hidden_until_mapped() {
        let mut sim = SimCassette::from_parts(&[0x12; 0x100], &[], &[]).unwrap();
        assert_eq!(sim.read_byte(0xC00000).unwrap(), 0xFF);
        sim.power = Power::Awake;
        sim.write_byte(CONTROL_REG, 0x04).unwrap();
        assert_eq!(sim.read_byte(0xC00000).unwrap(), 0x12);
    }

    #[test]
    fn test_page_requires_last_byte_rewrite() {
        let mut sim = mapped();
        let page = [0x00u8; PAGE_SIZE];
        {
            let mut commands = Commands::new(&mut sim, PollPolicy::default());
            commands.unlock_and(crate::address::Target::Local(Chip::A), 0xA0).unwrap();
            commands.transport().write(0xC00000, &page).unwrap();
        }
        // Without the re-write nothing is programmed
        assert!(sim.events().is_empty());

        let mut commands = Commands::new(&mut sim, PollPolicy::default());
        commands.page_write(0xC00080, &page).unwrap();
        assert_eq!(commands.poll(Chip::A, 0).unwrap(), Status::Busy);
        assert_eq!(commands.poll(Chip::A, 0).unwrap(), Status::Ready);
        assert_eq!(
            sim.events(),
            &[SimEvent::Program {
                address: 0xC00080,
                ok: true
            }]
        );
    }

    #[test]
    fn test_write_protect_fails_operations() {
        let mut sim = mapped();
        sim.write_byte(CONTROL_REG, 0x03).unwrap();

        let mut commands = Commands::new(&mut sim, PollPolicy::default());
        assert!(commands.hidden_write(0xE0FF00, &[0u8; PAGE_SIZE]).unwrap());
        assert_eq!(sim.map(), vec![0xFF; MAP_SIZE]);
    }

    #[test]
    fn test_show_hidden_and_reset() {
        let mut sim = SimCassette::from_parts(&[], &[0x5A; MAP_SIZE], &[]).unwrap();
        sim.power = Power::Awake;
        sim.write_byte(CONTROL_REG, 0x04).unwrap();
        assert_eq!(sim.read_byte(0xC0FF00).unwrap(), 0xFF);

        let mut commands = Commands::new(&mut sim, PollPolicy::default());
        commands.show_hidden().unwrap();
        assert_eq!(commands.transport().read(0xE0FFFE, 2).unwrap(), vec![0x5A, 0x5A]);
        commands.read_reset().unwrap();
        assert!(!sim.is_hidden_visible(Chip::B));
        assert_eq!(sim.read_byte(0xE0FF00).unwrap(), 0xFF);
    }

    #[test]
    fn test_sram_windows() {
        let mut sim = SimCassette::new();
        sim.write(0x216000, &[1, 2, 3]).unwrap();
        assert_eq!(&sim.sram()[0x2000..0x2003], &[1, 2, 3]);
        assert_eq!(sim.read(0x217FFE, 2).unwrap(), vec![0, 0]);
        assert!(sim.write(0x237FFF, &[0, 0]).is_err());
    }

    #[test]
    fn test_unmapped_reads() {
        let mut sim = SimCassette::absent();
        assert_eq!(sim.read_byte(CONTROL_REG).unwrap(), CTRL_ABSENT);
        assert_eq!(sim.read(0x800000, 4).unwrap(), vec![0xFF; 4]);
    }

    #[test]
    fn test_from_parts_round_trip() {
        let rom: Vec<u8> = (0..CHIP_SIZE + 0x100).map(|i| i as u8).collect();
        let map = vec![0x11u8; MAP_SIZE];
        let sim = SimCassette::from_parts(&rom, &map, &[9; 10]).unwrap();

        let out = sim.rom();
        assert_eq!(out.len(), MAX_ROM_SIZE);
        assert_eq!(&out[..rom.len()], &rom[..]);
        assert!(out[rom.len()..].iter().all(|b| *b == 0xFF));
        assert_eq!(sim.map(), map);
        assert_eq!(&sim.sram()[..11], &[9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 0]);

        assert!(SimCassette::from_parts(&[], &[0; 100], &[]).is_err());
    }
}

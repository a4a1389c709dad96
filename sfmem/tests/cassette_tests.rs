// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! End to end tests for sfmem, against the simulated cassette.
//!
//! # Test Plan
//!
//! ## Session
//! - [x] Wake from asleep, then HIROM:ALL
//! - [x] Not detected, nothing written
//! - [x] Write protect re-asserted after release, and after an error
//!
//! ## ROM
//! - [x] Write and verify across both chips
//! - [x] Chips written alternately
//! - [x] Page failure on one chip, other chip completes
//! - [x] Stuck chip times out
//! - [x] Verify reports the first mismatching chunk
//!
//! ## Map
//! - [x] Write and verify
//! - [x] Single page failure fails the whole map
//! - [x] Serial number preserved
//!
//! ## SRAM
//! - [x] Partial image written and verified
//!
//! ## Directory
//! - [x] Marker absent on blank cassette
//! - [x] Entries read up to the end of table marker
//! - [x] Dump plans extracted from a programmed cassette

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sfmem::directory::{
        DIRECTORY_BASE, DIRECTORY_STRIDE, ENTRY_SIZE, MULTICASSETTE_ADDR, MULTICASSETTE_MARKER,
    };
    use sfmem::map::{self, MAP_PAGES};
    use sfmem::rom::VERIFY_CHUNK_SIZE;
    use sfmem::sim::{SimCassette, SimEvent};
    use sfmem::{
        CHIP_SIZE, Chip, DeviceState, Error, MAP_SIZE, NoProgress, PollPolicy, Progress, Region,
        Session, Stage, check_verified, check_written,
    };

    // ========================================================================
    // Helpers
    // ========================================================================

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31) ^ seed ^ ((i >> 8) as u8))
            .collect()
    }

    fn open(sim: SimCassette) -> Session<SimCassette> {
        Session::open(sim).unwrap()
    }

    #[derive(Default)]
    struct Recorded {
        updates: Vec<(Region, Stage, usize, usize)>,
    }

    impl Progress for Recorded {
        fn update(&mut self, region: Region, stage: Stage, done: usize, total: usize) {
            self.updates.push((region, stage, done, total));
        }
    }

    fn programmed(sim: &SimCassette) -> Vec<u32> {
        sim.events()
            .iter()
            .filter_map(|e| match e {
                SimEvent::Program { address, ok: true } => Some(*address),
                _ => None,
            })
            .collect()
    }

    // ========================================================================
    // Session
    // ========================================================================

    #[test]
    fn test_session_wakes_sleeping_cassette() {
        let mut session = open(SimCassette::new());
        assert_eq!(session.initial_state(), DeviceState::Asleep);
        assert!(session.transport().is_awake());
        assert!(session.transport().is_write_protected());
    }

    #[test]
    fn test_session_not_detected() {
        let result = Session::open(SimCassette::absent());
        assert!(matches!(result, Err(Error::NotDetected { status: 0xFF })));
    }

    #[test]
    fn test_write_protect_restored() {
        let mut session = open(SimCassette::awake());
        {
            let mut writer = session.unlock().unwrap();
            assert!(!writer.transport().is_write_protected());
            writer.release().unwrap();
        }
        assert!(session.transport().is_write_protected());

        {
            let mut writer = session.unlock().unwrap();
            assert!(writer.write_map(&[0u8; 10], &mut NoProgress).is_err());
        }
        assert!(session.transport().is_write_protected());
    }

    // ========================================================================
    // ROM
    // ========================================================================

    #[test]
    fn test_rom_round_trip_both_chips() {
        let rom = pattern(CHIP_SIZE + 0x80000, 0x5A);
        let mut session = open(SimCassette::new());
        let mut progress = Recorded::default();

        {
            let mut writer = session.unlock().unwrap();
            let written = writer.write_rom(&rom, &mut progress).unwrap();
            check_written(Region::Rom, written, rom.len()).unwrap();
            writer.release().unwrap();
        }

        let verified = session.verify_rom(&rom, &mut progress).unwrap();
        check_verified(Region::Rom, verified, rom.len()).unwrap();

        let sim = session.into_inner();
        assert_eq!(&sim.rom()[..rom.len()], &rom[..]);
        assert_eq!(
            progress.updates.first(),
            Some(&(Region::Rom, Stage::Erase, 0, rom.len()))
        );
        assert_eq!(
            progress.updates.last(),
            Some(&(Region::Rom, Stage::Verify, rom.len(), rom.len()))
        );
    }

    #[test]
    fn test_rom_chips_written_alternately() {
        let rom = pattern(CHIP_SIZE + 0x400, 0x01);
        let mut sim = SimCassette::new();
        sim.set_busy_polls(3);
        let mut session = open(sim);

        let written = session
            .unlock()
            .unwrap()
            .write_rom(&rom, &mut NoProgress)
            .unwrap();
        assert_eq!(written, rom.len());

        let order = programmed(session.transport());
        assert_eq!(
            &order[..8],
            &[0xC00000, 0xE00000, 0xC00080, 0xE00080, 0xC00100, 0xE00100, 0xC00180, 0xE00180]
        );
        assert_eq!(order.len(), rom.len() / 128);
    }

    #[test]
    fn test_rom_page_failure_stops_one_chip() {
        let rom = pattern(CHIP_SIZE + 0x1000, 0x33);
        let mut sim = SimCassette::new();
        sim.fail_page(0xE00800);
        let mut session = open(sim);

        let written = {
            let mut writer = session.unlock().unwrap();
            writer.write_rom(&rom, &mut NoProgress).unwrap()
        };

        // Chip A completes, chip B stops at the failing page
        assert_eq!(written, CHIP_SIZE + 0x800);
        assert!(matches!(
            check_written(Region::Rom, written, rom.len()),
            Err(Error::WriteFailed { .. })
        ));

        let sim = session.transport();
        let order = programmed(sim);
        assert!(!order.iter().any(|a| *a >= 0xE00800));
        assert!(sim.is_write_protected());
    }

    #[test]
    fn test_rom_stuck_chip_times_out() {
        let mut sim = SimCassette::new();
        sim.stick(Chip::B);
        let mut session =
            Session::open_with_policy(sim, PollPolicy::with_timeout(Duration::from_millis(20)))
                .unwrap();

        let mut writer = session.unlock().unwrap();
        let result = writer.write_rom(&pattern(0x8000, 0), &mut NoProgress);
        assert!(matches!(
            result,
            Err(Error::PollTimeout {
                address: 0xE00000,
                ..
            })
        ));
    }

    #[test]
    fn test_rom_verify_reports_mismatching_chunk() {
        let rom = pattern(0x40000, 0x77);
        let mut stored = rom.clone();
        stored[0x2ABCD] ^= 0x01;

        let mut sim = SimCassette::from_parts(&stored, &[], &[]).unwrap();
        sim.set_busy_polls(0);
        let mut session = open(sim);

        let verified = session.verify_rom(&rom, &mut NoProgress).unwrap();
        assert_eq!(verified, 2 * VERIFY_CHUNK_SIZE);
        assert!(matches!(
            check_verified(Region::Rom, verified, rom.len()),
            Err(Error::VerifyFailed {
                verified: 0x20000,
                ..
            })
        ));
    }

    // ========================================================================
    // Map
    // ========================================================================

    #[test]
    fn test_map_round_trip() {
        let map_data = pattern(MAP_SIZE, 0x0F);
        let mut session = open(SimCassette::new());

        let written = {
            let mut writer = session.unlock().unwrap();
            writer.write_map(&map_data, &mut NoProgress).unwrap()
        };
        assert_eq!(written, MAP_SIZE);
        assert_eq!(session.verify_map(&map_data, &mut NoProgress).unwrap(), MAP_SIZE);
        assert_eq!(session.read_map().unwrap(), map_data);

        // Normal reads restored
        assert!(!session.transport().is_hidden_visible(Chip::A));
        assert_eq!(session.transport().map(), map_data);
    }

    #[test]
    fn test_map_single_page_failure() {
        for failing in MAP_PAGES {
            let mut sim = SimCassette::new();
            sim.fail_hidden_page(failing);
            let mut session = open(sim);

            let mut writer = session.unlock().unwrap();
            let written = writer.write_map(&[0u8; MAP_SIZE], &mut NoProgress).unwrap();
            assert_eq!(written, 0, "failing page {failing:#08X}");
        }
    }

    #[test]
    fn test_map_serial_preserved() {
        let mut current = vec![0u8; MAP_SIZE];
        for (ii, byte) in current.iter_mut().enumerate().take(16) {
            *byte = 0xA0 | ii as u8;
        }
        let mut session = open(SimCassette::from_parts(&[], &current, &[]).unwrap());

        let mut new_map = vec![0x11u8; MAP_SIZE];
        let existing = session.read_map().unwrap();
        map::preserve_serial(&mut new_map, &existing).unwrap();

        let mut writer = session.unlock().unwrap();
        assert_eq!(writer.write_map(&new_map, &mut NoProgress).unwrap(), MAP_SIZE);
        assert_eq!(writer.verify_map(&new_map, &mut NoProgress).unwrap(), MAP_SIZE);

        let stored = writer.transport().map();
        assert_eq!(stored[0], 0x11);
        assert_eq!(stored[1], 0xA1);
        assert_eq!(stored[15], 0xAF);
        assert_eq!(stored[16], 0x11);
    }

    // ========================================================================
    // SRAM
    // ========================================================================

    #[test]
    fn test_sram_partial_image() {
        let save = pattern(7000, 0x42);
        let mut sim = SimCassette::from_parts(&[], &[], &[0xEE; 0x8000]).unwrap();
        sim.set_busy_polls(0);
        let mut session = open(sim);

        {
            let mut writer = session.unlock().unwrap();
            assert_eq!(writer.write_sram(&save, &mut NoProgress).unwrap(), 7000);
        }
        assert_eq!(session.verify_sram(&save, &mut NoProgress).unwrap(), 7000);

        let all = session.read_sram().unwrap();
        assert_eq!(&all[..7000], &save[..]);
        assert!(all[7000..].iter().all(|b| *b == 0xEE));
    }

    // ========================================================================
    // Directory
    // ========================================================================

    fn entry(index: u8, first_flash: u8, flash_blocks: u8, title: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; ENTRY_SIZE];
        data[0] = index;
        data[1] = first_flash;
        data[3] = flash_blocks << 2;
        data[0x13..0x13 + title.len()].copy_from_slice(title);
        data
    }

    fn menu_rom(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut rom = vec![0xFFu8; 0x80000];
        for (slot, data) in entries.iter().enumerate() {
            let start = (DIRECTORY_BASE - 0xC00000) as usize + slot * DIRECTORY_STRIDE as usize;
            rom[start..start + ENTRY_SIZE].copy_from_slice(data);
        }
        let marker = (MULTICASSETTE_ADDR - 0xC00000) as usize;
        rom[marker..marker + 16].copy_from_slice(MULTICASSETTE_MARKER);
        rom
    }

    #[test]
    fn test_directory_blank_cassette() {
        let mut session = open(SimCassette::new());
        assert!(!session.is_multicassette().unwrap());
    }

    #[test]
    fn test_directory_entries() {
        let rom = menu_rom(&[
            entry(0, 0, 1, b"MENU"),
            entry(1, 1, 2, b"GAME ONE"),
            entry(2, 3, 4, b""),
            entry(0xFF, 0, 0, b""),
            entry(4, 7, 1, b"STALE"),
        ]);
        let mut session = open(SimCassette::from_parts(&rom, &[], &[]).unwrap());
        assert!(session.is_multicassette().unwrap());

        let entries: Vec<_> = session
            .directory()
            .collect::<sfmem::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].title, "GAME ONE");
        assert_eq!(entries[2].flash_blocks, 4);

        let plans: Vec<_> = entries.iter().filter_map(|e| e.dump_plan()).collect();
        let names: Vec<_> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["MENU", "GAME ONE", "2"]);
        assert_eq!((plans[2].first_bank, plans[2].last_bank), (0xD8, 0xF7));

        let rom_data = session
            .read_rom_banks(plans[1].first_bank, plans[1].last_bank)
            .unwrap();
        assert_eq!(rom_data.len(), plans[1].rom_size());
    }
}

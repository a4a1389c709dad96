// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use sfmem::{Progress, Region, Stage};
use std::io::Write;

use crate::utils::add_commas;

/// Prints progress on a single, repeatedly overwritten, console line.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    line_open: bool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends the progress line so that following output starts afresh
    pub fn finish(&mut self) {
        if self.line_open {
            println!();
            self.line_open = false;
        }
    }
}

pub fn format_update(region: Region, stage: Stage, done: usize, total: usize) -> String {
    match stage {
        Stage::Erase => format!("{stage} {region}"),
        _ => format!(
            "{stage} {region} {} / {} bytes",
            add_commas(done as u64),
            add_commas(total as u64)
        ),
    }
}

impl Progress for ConsoleProgress {
    fn update(&mut self, region: Region, stage: Stage, done: usize, total: usize) {
        // Pad to overwrite any longer previous line
        print!("\r{:<40}", format_update(region, stage, done, total));
        let _ = std::io::stdout().flush();
        self.line_open = true;
    }
}

impl Drop for ConsoleProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

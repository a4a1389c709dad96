// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Progress reporting for long running operations.

use crate::Region;

/// Phase of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Erase,
    Write,
    Verify,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Erase => write!(f, "erasing"),
            Stage::Write => write!(f, "writing"),
            Stage::Verify => write!(f, "verifying"),
        }
    }
}

/// Receives progress updates.  Called after each page written and each chunk
/// verified, and once at the start of an erase.
pub trait Progress {
    fn update(&mut self, region: Region, stage: Stage, done: usize, total: usize);
}

/// Discards progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _region: Region, _stage: Stage, _done: usize, _total: usize) {}
}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn update(&mut self, region: Region, stage: Stage, done: usize, total: usize) {
        (**self).update(region, stage, done, total)
    }
}

//! Simulated flash
//!
//! The boot core sees flash through two interfaces: plain reads, and a small
//! mapping window that can show a bounded number of pages at a time.  This
//! simulator provides both over an in-memory device, and records enough about
//! how the window was used for tests to check that every mapping was
//! released and that no mapping exceeded the window.
//!
//! Faults can be injected over ranges of the device, causing reads and
//! mappings that touch them to fail.

use std::ops::Range;

use anyhow::{anyhow, Result};
use storage::{check_map, check_read, Error, MapFlash, ReadFlash, Window};

pub mod gen;
pub mod styles;

/// Value of erased flash.
pub const ERASED: u8 = 0xff;

/// Counters describing how the window has been used.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowStats {
    pub maps: usize,
    pub unmaps: usize,
    /// Largest number of pages used by one mapping.
    pub max_pages: usize,
}

pub struct SimFlash {
    data: Vec<u8>,
    window: Window,
    live: Option<(usize, usize)>,
    faults: Vec<Range<usize>>,
    stats: WindowStats,
}

impl SimFlash {
    pub fn new(capacity: usize, window: Window) -> Result<SimFlash> {
        if capacity == 0 {
            return Err(anyhow!("Flash must have some capacity"));
        }
        Ok(SimFlash {
            data: vec![ERASED; capacity],
            window,
            live: None,
            faults: Vec::new(),
            stats: WindowStats::default(),
        })
    }

    /// Place data into the flash at the given offset.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| anyhow!("Install of {} bytes at {:#x} exceeds device", data.len(), offset))?;
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Make reads and mappings touching this range fail.
    pub fn fail_range(&mut self, range: Range<usize>) {
        self.faults.push(range);
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn stats(&self) -> &WindowStats {
        &self.stats
    }

    pub fn is_mapped(&self) -> bool {
        self.live.is_some()
    }

    fn faulted(&self, offset: usize, length: usize) -> bool {
        let end = offset + length;
        self.faults.iter().any(|f| f.start < end && offset < f.end)
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        1
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        check_read(self, offset, bytes.len())?;
        if self.faulted(offset, bytes.len()) {
            return Err(Error::ReadFailed);
        }
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl MapFlash for SimFlash {
    fn window(&self) -> Window {
        self.window
    }

    fn map(&mut self, offset: usize, length: usize) -> storage::Result<()> {
        if self.live.is_some() {
            // Only possible if a driver bypasses `Mapping`.
            return Err(Error::MapFailed);
        }
        check_map(self, offset, length)?;
        if self.faulted(offset, length) {
            return Err(Error::MapFailed);
        }
        self.live = Some((offset, length));
        self.stats.maps += 1;
        self.stats.max_pages = self.stats.max_pages.max(self.window.pages_spanned(offset, length));
        Ok(())
    }

    fn mapped(&self) -> &[u8] {
        match self.live {
            Some((offset, length)) => &self.data[offset..offset + length],
            None => &[],
        }
    }

    fn unmap(&mut self) {
        if self.live.take().is_some() {
            self.stats.unmaps += 1;
        }
    }
}

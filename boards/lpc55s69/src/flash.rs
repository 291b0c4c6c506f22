//! LPC55S6x flash driver.
//!
//! Replacement flash driver from the one in the hal.  The internal flash is
//! memory mapped in its entirety, so the mapping window covers the whole
//! device and mapping is mostly bookkeeping.  What the driver does have to
//! do is avoid busfaulting on unprogrammed data: every page of a read or a
//! mapping is checked with the controller first, and an error is returned
//! instead.
//!
//! To use this driver, you should release the FLASH PAC from the hal's driver.
//!
//!     let flash = hal.flash.release();
//!     let fl = flash::LpcFlash::new(flash);

use hal::raw::FLASH;
use lpc55_hal as hal;
use storage::{check_map, check_read, Error, MapFlash, ReadFlash, Result, Window};

const LPC_FLASH_BASE: usize = 0;
const LPC_FLASH_SIZE: usize = 630 * 1024;
const LPC_PAGE_SIZE: usize = 512;

pub struct LpcFlash {
    raw: FLASH,
    mapped: Option<(usize, usize)>,
}

impl LpcFlash {
    pub fn new(raw: FLASH) -> LpcFlash {
        LpcFlash { raw, mapped: None }
    }

    /// Are all of the pages touched by this range programmed?
    fn programmed(&self, offset: usize, length: usize) -> bool {
        let end = offset + length;
        let mut page = offset & !(LPC_PAGE_SIZE - 1);
        while page < end {
            if !read_check(&self.raw, (LPC_FLASH_BASE + page) as u32) {
                return false;
            }
            page += LPC_PAGE_SIZE;
        }
        true
    }

    /// The flash contents at `offset`.  The range must have been checked.
    fn memory(&self, offset: usize, length: usize) -> &[u8] {
        unsafe { core::slice::from_raw_parts((LPC_FLASH_BASE + offset) as *const u8, length) }
    }
}

impl ReadFlash for LpcFlash {
    // We allow arbitrary alignment of reads.
    fn read_size(&self) -> usize {
        1
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        check_read(self, offset, bytes.len())?;
        // Address zero cannot be made into a slice.  It holds our own vector
        // table, which is never read through this driver.
        if LPC_FLASH_BASE + offset == 0 || !self.programmed(offset, bytes.len()) {
            return Err(Error::ReadFailed);
        }
        bytes.copy_from_slice(self.memory(offset, bytes.len()));
        Ok(())
    }

    fn capacity(&self) -> usize {
        LPC_FLASH_SIZE
    }
}

impl MapFlash for LpcFlash {
    fn window(&self) -> Window {
        Window::new(LPC_PAGE_SIZE, LPC_FLASH_SIZE / LPC_PAGE_SIZE)
    }

    fn map(&mut self, offset: usize, length: usize) -> Result<()> {
        if self.mapped.is_some() {
            return Err(Error::MapFailed);
        }
        check_map(self, offset, length)?;
        if LPC_FLASH_BASE + offset == 0 || !self.programmed(offset, length) {
            return Err(Error::MapFailed);
        }
        self.mapped = Some((offset, length));
        Ok(())
    }

    fn mapped(&self) -> &[u8] {
        match self.mapped {
            Some((offset, length)) => self.memory(offset, length),
            None => &[],
        }
    }

    fn unmap(&mut self) {
        self.mapped = None;
    }
}

fn read_check(flash: &FLASH, addr: u32) -> bool {
    flash.int_clr_status.write(|w| w.done().set_bit().err().set_bit().fail().set_bit().ecc_err().set_bit());

    flash.starta.write(|w| unsafe { w.bits(addr >> 4) });
    flash.stopa.write(|w| unsafe { w.bits(addr >> 4) });
    flash.cmd.write(|w| unsafe { w.bits(6) });
    while flash.int_status.read().done().bit_is_clear() {}

    let good = flash.int_status.read().fail().bit_is_clear();

    flash.int_clr_status.write(|w| w.done().set_bit().err().set_bit().fail().set_bit().ecc_err().set_bit());

    good
}

#![no_main]
#![no_std]

#[cfg(feature = "semihosting")]
extern crate panic_semihosting;

#[cfg(feature = "rtt")]
use {defmt_rtt as _, panic_probe as _};

use cortex_m::peripheral::SCB;
use cortex_m_rt::entry;
use lpc55_hal as hal;
use otaboot::{AppImageValidator, BootConfig, ImageMetadata, Platform};

mod flash;

macro_rules! say {
    ($($arg:tt)*) => {
        #[cfg(feature = "semihosting")]
        cortex_m_semihosting::hprintln!($($arg)*);
        #[cfg(feature = "rtt")]
        defmt::info!($($arg)*);
    };
}

#[entry]
fn main() -> ! {
    let hal = hal::new();

    say!("Start of bootloader");

    let mut flash = flash::LpcFlash::new(hal.flash.release());
    let mut validator = AppImageValidator::new();
    let mut board = Board;
    otaboot::run(&mut flash, &BootConfig::default(), &mut validator, &mut board)
}

struct Board;

impl Platform for Board {
    // Segments loaded to where they sit in flash run in place.  Anything
    // else is copied to its load address before jumping.
    fn hand_off(&mut self, image: &ImageMetadata) -> ! {
        for seg in &image.segments {
            if seg.load_addr as usize != seg.data_offset {
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        seg.data_offset as *const u8,
                        seg.load_addr as *mut u8,
                        seg.data_len,
                    );
                }
            }
        }

        // The entry address of an image for this board is its vector table.
        let vectors = image.entry_addr;
        say!("chain: vector table at {:#x}", vectors);
        unsafe {
            let p = cortex_m::Peripherals::steal();
            p.SCB.vtor.write(vectors);
            cortex_m::asm::bootload(vectors as *const u32);
        }
    }

    fn reset(&mut self) -> ! {
        say!("no bootable image, resetting");
        SCB::sys_reset()
    }
}

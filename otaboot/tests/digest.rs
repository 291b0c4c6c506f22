// Chunked digest testing.

use otaboot::digest::{digest_flash, sha256_flash_contents, WindowChunks};
use otaboot::Error;
use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use sha2::{Digest, Sha256};
use simflash::SimFlash;
use storage::Window;

/// A flash filled with random data.
fn random_flash(capacity: usize, window: Window, seed: u64) -> SimFlash {
    let mut data = vec![0u8; capacity];
    Xoshiro256Plus::seed_from_u64(seed).fill_bytes(&mut data);
    let mut flash = SimFlash::new(capacity, window).unwrap();
    flash.install(&data, 0).unwrap();
    flash
}

fn reference(flash: &SimFlash, offset: usize, len: usize) -> [u8; 32] {
    Sha256::digest(&flash.contents()[offset..offset + len]).into()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn matches_single_pass(offset in 0usize..2048, len in 1usize..4200) {
        // Span of 1 KiB, so the longest ranges need more than three windows.
        let mut flash = random_flash(8192, Window::new(256, 4), 3);
        let got = sha256_flash_contents(&mut flash, offset, len).unwrap();
        prop_assert_eq!(got, reference(&flash, offset, len));
        prop_assert!(!flash.is_mapped());
        prop_assert_eq!(flash.stats().maps, flash.stats().unmaps);
        prop_assert_eq!(flash.stats().maps, WindowChunks::new(offset, len, Window::new(256, 4)).count());
    }
}

#[test]
fn four_megabytes() {
    // Fifty 64 KiB pages cover 3.2 MB, so 4 MiB is hashed in two pieces.
    let mut flash = random_flash(8 << 20, simflash::styles::ESP32.window, 11);
    let offset = 0x10000;
    let len = 4 << 20;
    let got = sha256_flash_contents(&mut flash, offset, len).unwrap();
    assert_eq!(got, reference(&flash, offset, len));
    assert_eq!(flash.stats().maps, 2);
    assert_eq!(flash.stats().unmaps, 2);
    assert_eq!(flash.stats().max_pages, 50);

    // Same bytes, window large enough to take it in one go.
    let mut wide = SimFlash::new(8 << 20, Window::new(64 << 10, 128)).unwrap();
    wide.install(flash.contents(), 0).unwrap();
    assert_eq!(sha256_flash_contents(&mut wide, offset, len).unwrap(), got);
    assert_eq!(wide.stats().maps, 1);
}

#[test]
fn empty_range() {
    let mut flash = random_flash(4096, Window::new(256, 2), 1);
    let got = sha256_flash_contents(&mut flash, 100, 0).unwrap();
    let empty: [u8; 32] = Sha256::digest(b"").into();
    assert_eq!(got, empty);
    assert_eq!(flash.stats().maps, 0);
}

#[test]
fn other_digests() {
    let mut flash = random_flash(4096, Window::new(256, 2), 5);
    let got = digest_flash::<sha2::Sha512, _>(&mut flash, 33, 3000).unwrap();
    assert_eq!(got, sha2::Sha512::digest(&flash.contents()[33..3033]));
}

#[test]
fn failure_aborts() {
    let mut flash = random_flash(8192, Window::new(256, 4), 9);
    flash.fail_range(5000..5001);
    assert_eq!(
        sha256_flash_contents(&mut flash, 100, 6000).err(),
        Some(Error::Flash(storage::Error::MapFailed))
    );
    // The pieces before the fault were mapped and released, and nothing is
    // left mapped.
    assert!(!flash.is_mapped());
    assert_eq!(flash.stats().maps, flash.stats().unmaps);
}

#[test]
fn out_of_range() {
    let mut flash = random_flash(4096, Window::new(256, 2), 1);
    assert_eq!(
        sha256_flash_contents(&mut flash, 4000, 200).err(),
        Some(Error::Flash(storage::Error::OutOfBounds))
    );
    assert_eq!(
        sha256_flash_contents(&mut flash, usize::MAX, 2).err(),
        Some(Error::Flash(storage::Error::OutOfBounds))
    );
}

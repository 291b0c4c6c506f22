//! Hashing of flash ranges through the mapping window.
//!
//! Images can be larger than the mapping window, so a range is hashed in
//! pieces.  `WindowChunks` splits the range so that each piece fits in the
//! window, and `digest_flash` maps, hashes and releases each piece in turn.
//! The hash is streaming, so the result does not depend on where the pieces
//! are split.

use sha2::digest::Output;
use sha2::{Digest, Sha256};
use storage::{MapFlash, Mapping, Window};

use crate::Result;

/// The result of a SHA256 hash, appropriate for stack allocation.
pub type Hash256 = [u8; 32];

/// Iterator over the `(offset, length)` pieces of a flash range, each of
/// which can be mapped at once.
///
/// A piece that starts partway into a page loses the rest of that page from
/// the window, so the first piece of an unaligned range ends on a page
/// boundary and every later piece is page aligned.
#[derive(Debug, Clone)]
pub struct WindowChunks {
    offset: usize,
    remaining: usize,
    window: Window,
}

impl WindowChunks {
    /// A range running past the end of the address space is cut short at
    /// its end.
    pub fn new(offset: usize, length: usize, window: Window) -> WindowChunks {
        let remaining = length.min(usize::MAX - offset);
        WindowChunks { offset, remaining, window }
    }
}

impl Iterator for WindowChunks {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let room = self.window.span() - self.window.page_offset(self.offset);
        let len = self.remaining.min(room);
        let chunk = (self.offset, len);
        self.offset += len;
        self.remaining -= len;
        Some(chunk)
    }
}

/// Compute the digest of `[offset, offset + length)`.
///
/// Any failure to map a piece fails the whole digest.
pub fn digest_flash<D: Digest, F: MapFlash>(
    flash: &mut F,
    offset: usize,
    length: usize,
) -> Result<Output<D>> {
    offset.checked_add(length).ok_or(storage::Error::OutOfBounds)?;

    let mut hasher = D::new();
    for (chunk, len) in WindowChunks::new(offset, length, flash.window()) {
        let mapped = Mapping::new(flash, chunk, len)?;
        hasher.update(&*mapped);
    }
    Ok(hasher.finalize())
}

/// SHA-256 of a flash range.
pub fn sha256_flash_contents<F: MapFlash>(
    flash: &mut F,
    offset: usize,
    length: usize,
) -> Result<Hash256> {
    let digest = digest_flash::<Sha256, F>(flash, offset, length)?;
    let mut result = [0u8; 32];
    result.copy_from_slice(digest.as_slice());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunks(offset: usize, len: usize, page: usize, pages: usize) -> Vec<(usize, usize)> {
        WindowChunks::new(offset, len, Window::new(page, pages)).collect()
    }

    #[test]
    fn aligned() {
        assert_eq!(chunks(0, 0, 64, 2), vec![]);
        assert_eq!(chunks(0, 100, 64, 2), vec![(0, 100)]);
        assert_eq!(chunks(128, 300, 64, 2), vec![(128, 128), (256, 128), (384, 44)]);
    }

    #[test]
    fn unaligned() {
        assert_eq!(chunks(10, 300, 64, 2), vec![(10, 118), (128, 128), (256, 54)]);
        // A single page window still makes progress.
        assert_eq!(chunks(60, 10, 64, 1), vec![(60, 4), (64, 6)]);
    }

    #[test]
    fn end_of_address_space() {
        let got = chunks(usize::MAX - 100, 300, 64, 2);
        assert_eq!(got.iter().map(|c| c.1).sum::<usize>(), 100);
        assert_eq!(got.last().map(|c| c.0 + c.1), Some(usize::MAX));
    }

    #[test]
    fn esp32_window() {
        // 4 MiB through fifty 64 KiB pages is two pieces.
        let got = chunks(0x10000, 4 << 20, 0x10000, 50);
        assert_eq!(got, vec![(0x10000, 50 * 0x10000), (0x330000, (4 << 20) - 50 * 0x10000)]);
    }

    proptest! {
        #[test]
        fn pieces_cover_range(
            offset in 0usize..4096,
            len in 0usize..8192,
            page_log in 4u32..9,
            pages in 1usize..5,
        ) {
            let window = Window::new(1 << page_log, pages);
            let mut pos = offset;
            for (chunk, size) in WindowChunks::new(offset, len, window) {
                prop_assert_eq!(chunk, pos);
                prop_assert!(size > 0);
                prop_assert!(window.pages_spanned(chunk, size) <= window.pages());
                pos += size;
            }
            prop_assert_eq!(pos, offset + len);
        }
    }
}

//! Storage types.
//!
//! The boot core reads flash in two ways: small reads through `ReadFlash`, and
//! larger spans through a memory mapping window (`MapFlash`).  The window is a
//! single hardware resource with a fixed page size and page count.  It is only
//! ever held through a `Mapping`, which borrows the flash mutably for as long
//! as the mapping exists and releases it when dropped.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::ops::Deref;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    NotAligned,
    OutOfBounds,
    /// The device reported a failure reading the requested range.
    ReadFailed,
    /// The requested range could not be mapped.
    MapFailed,
    /// The requested range spans more pages than the window holds.
    WindowTooSmall,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Geometry of the mapping window.  Mappings are made in whole pages, so a
/// range that does not start on a page boundary uses part of an extra page.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Window {
    page_size: usize,
    pages: usize,
}

impl Window {
    /// Panics if either dimension is zero, or the page size is not a power
    /// of two.
    pub const fn new(page_size: usize, pages: usize) -> Window {
        assert!(page_size.is_power_of_two());
        assert!(pages > 0);
        Window { page_size, pages }
    }

    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    pub const fn pages(&self) -> usize {
        self.pages
    }

    /// Largest number of bytes that can be mapped at once.
    pub const fn span(&self) -> usize {
        self.page_size * self.pages
    }

    /// Offset of `offset` within its page.
    pub const fn page_offset(&self, offset: usize) -> usize {
        offset & (self.page_size - 1)
    }

    /// Number of pages needed to map `[offset, offset + length)`.
    pub const fn pages_spanned(&self, offset: usize, length: usize) -> usize {
        if length == 0 {
            return 0;
        }
        (self.page_offset(offset) + length).div_ceil(self.page_size)
    }
}

/// Flash that can be mapped into the address space through a bounded window.
///
/// Callers should not use `map` and `unmap` directly, but go through
/// `Mapping`, which pairs them.
pub trait MapFlash: ReadFlash {
    fn window(&self) -> Window;

    /// Map the given range.  The window is free when this is called.
    fn map(&mut self, offset: usize, length: usize) -> Result<()>;

    /// The bytes of the current mapping.
    fn mapped(&self) -> &[u8];

    /// Release the current mapping.
    fn unmap(&mut self);
}

/// A live mapping of a range of flash.  Holding one keeps the flash borrowed,
/// so no other mapping can be made until it is dropped.
pub struct Mapping<'a, F: MapFlash + ?Sized> {
    flash: &'a mut F,
}

impl<'a, F: MapFlash + ?Sized> Mapping<'a, F> {
    pub fn new(flash: &'a mut F, offset: usize, length: usize) -> Result<Self> {
        flash.map(offset, length)?;
        Ok(Mapping { flash })
    }
}

impl<'a, F: MapFlash + ?Sized> Deref for Mapping<'a, F> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.flash.mapped()
    }
}

impl<'a, F: MapFlash + ?Sized> Drop for Mapping<'a, F> {
    fn drop(&mut self) {
        self.flash.unmap();
    }
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash + ?Sized>(flash: &T, offset: usize, length: usize) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

/// Validate a map request against the device bounds and the window geometry.
pub fn check_map<T: MapFlash + ?Sized>(flash: &T, offset: usize, length: usize) -> Result<()> {
    check_slice(flash, 1, offset, length)?;
    if flash.window().pages_spanned(offset, length) > flash.window().pages() {
        return Err(Error::WindowTooSmall);
    }
    Ok(())
}

pub fn check_slice<T: ReadFlash + ?Sized>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A tiny flash that counts mappings.
    struct Counted {
        data: [u8; 64],
        live: Option<(usize, usize)>,
        maps: usize,
        unmaps: usize,
    }

    impl Counted {
        fn new() -> Counted {
            let mut data = [0u8; 64];
            for (i, b) in data.iter_mut().enumerate() {
                *b = i as u8;
            }
            Counted { data, live: None, maps: 0, unmaps: 0 }
        }
    }

    impl ReadFlash for Counted {
        fn read_size(&self) -> usize {
            1
        }
        fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
            check_read(self, offset, bytes.len())?;
            bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
            Ok(())
        }
        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl MapFlash for Counted {
        fn window(&self) -> Window {
            Window::new(16, 2)
        }
        fn map(&mut self, offset: usize, length: usize) -> Result<()> {
            check_map(self, offset, length)?;
            self.live = Some((offset, length));
            self.maps += 1;
            Ok(())
        }
        fn mapped(&self) -> &[u8] {
            match self.live {
                Some((offset, length)) => &self.data[offset..offset + length],
                None => &[],
            }
        }
        fn unmap(&mut self) {
            self.live = None;
            self.unmaps += 1;
        }
    }

    #[test]
    fn window_pages() {
        let w = Window::new(16, 2);
        assert_eq!(w.span(), 32);
        assert_eq!(w.pages_spanned(0, 0), 0);
        assert_eq!(w.pages_spanned(0, 16), 1);
        assert_eq!(w.pages_spanned(0, 17), 2);
        assert_eq!(w.pages_spanned(15, 2), 2);
        assert_eq!(w.pages_spanned(8, 32), 3);
    }

    #[test]
    fn mapping_releases() {
        let mut flash = Counted::new();
        {
            let m = Mapping::new(&mut flash, 4, 20).unwrap();
            assert_eq!(m.len(), 20);
            assert_eq!(m[0], 4);
        }
        assert_eq!(flash.maps, 1);
        assert_eq!(flash.unmaps, 1);
        assert!(flash.live.is_none());
    }

    #[test]
    fn map_checks() {
        let mut flash = Counted::new();
        assert_eq!(Mapping::new(&mut flash, 8, 32).err(), Some(Error::WindowTooSmall));
        assert_eq!(Mapping::new(&mut flash, 60, 8).err(), Some(Error::OutOfBounds));
        // A failed map never leaves anything to release.
        assert_eq!(flash.maps, 0);
        assert_eq!(flash.unmaps, 0);
    }
}

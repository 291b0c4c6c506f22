//! AsRaw provides a safe way to view an on-flash record as its bytes, and an
//! unsafe way to have this as a mutable view.  Generally, this is safe and
//! meaningful for structures that are repr(C) and built only from integers and
//! byte arrays, which is how partition table entries, OTA records and image
//! headers are laid out.  `as_mut_raw` is only safe in this case.
//!
//! All of the records we read are little endian.  Fields are stored as read,
//! and accessors are expected to use `from_le` when interpreting them.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::{mem, slice};

pub trait AsRaw: Sized {
    fn as_raw(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self as *const _ as *const u8, mem::size_of::<Self>()) }
    }
}

/// Provide a view into a structure.  This is an unsafe trait, because, in
/// general, it isn't safe to interpret arbitrary bytes as another type.
/// However, if the struct is `repr(C)`, and all types used are valid for all
/// possible values, this will be safe.
pub unsafe trait AsMutRaw: Sized {
    fn as_mut_raw(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self as *mut _ as *mut u8, mem::size_of::<Self>()) }
    }
}

/// Build a record by copying it out of a larger buffer, such as a mapped
/// region of flash.  Returns None if the buffer is too short.
pub trait FromRaw: AsMutRaw + Default {
    fn from_raw(bytes: &[u8]) -> Option<Self> {
        let size = mem::size_of::<Self>();
        let src = bytes.get(..size)?;
        let mut item = Self::default();
        item.as_mut_raw().copy_from_slice(src);
        Some(item)
    }
}

impl<T: AsMutRaw + Default> FromRaw for T {}

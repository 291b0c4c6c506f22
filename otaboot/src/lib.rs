//! Boot partition selection for a second stage bootloader.
//!
//! The flow of a boot attempt is:
//!
//! - Load and verify the partition table (`partition`).
//! - Read the OTA data records to find the favored OTA slot (`otadata`).
//! - Pick the slot the search starts from (`select`).
//! - Walk the candidates in fallback order, validating each image
//!   (`image`, `digest`), until one passes (`loader`).
//! - Hand off to that image, or reset the device (`platform`).
//!
//! Everything here runs before any scheduler or allocator exists.  Flash is
//! accessed through the `storage` traits so the same code runs on hardware
//! and against the simulator.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod logging;

pub mod config;
pub mod digest;
pub mod image;
pub mod loader;
pub mod otadata;
pub mod partition;
pub mod platform;
pub mod select;

pub use config::{BootConfig, SequenceTieBreak};
pub use image::{AppImageValidator, ImageMetadata, ImageValidator};
pub use loader::{boot, load_boot_image, run, BootOutcome};
pub use partition::{BootloaderState, PartitionEntry, Role};
pub use platform::Platform;
pub use select::StartIndex;

pub type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("flash access failed: {0:?}")]
    Flash(storage::Error),
    #[error("malformed partition table: {0}")]
    Format(FormatError),
    #[error("partition table checksum mismatch")]
    Integrity,
    #[error("invalid image: {0}")]
    Validation(ValidationError),
    #[error("no bootable app partition")]
    NoCandidate,
}

/// Convert the flash error into our error type.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Flash(e)
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

/// Structural problems with the partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatError {
    #[error("entry {index} has bad magic {magic:#06x}")]
    BadMagic { index: usize, magic: u16 },
    #[error("no end marker")]
    Unterminated,
    #[error("no checksum record")]
    MissingChecksum,
    #[error("entry {index} follows the checksum record")]
    TrailingEntry { index: usize },
    #[error("entry {index} overflows the address space")]
    BadBounds { index: usize },
    #[error("entry {index} duplicates {role:?}")]
    DuplicateRole { index: usize, role: Role },
    #[error("OTA slot {missing} is missing")]
    OtaGap { missing: u8 },
}

/// Reasons an image is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValidationError {
    #[error("bad image magic {0:#04x}")]
    BadMagic(u8),
    #[error("bad segment count {0}")]
    SegmentCount(u8),
    #[error("segment {0} exceeds the partition")]
    SegmentBounds(u8),
    #[error("image exceeds the partition")]
    Truncated,
    #[error("checksum mismatch")]
    Checksum,
    #[error("no appended hash")]
    MissingHash,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("signature rejected")]
    Signature,
}

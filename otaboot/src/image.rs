//! App image support
//!
//! An app image starts with a 24 byte header, followed by a number of
//! segments, each with its own 8 byte header giving its load address and
//! length.  After the last segment, the image is padded so that a one byte
//! checksum (the XOR of all segment data, seeded with 0xef) ends on a 16 byte
//! boundary.  If the header says so, a SHA-256 of everything up to and
//! including the checksum byte follows.
//!
//! The loader only needs a yes/no answer from validation, along with enough
//! information about a good image to start it.  `ImageValidator` is that
//! seam; `AppImageValidator` is the implementation for this format.

use core::mem::size_of;

use asraw::{AsMutRaw, AsRaw};
use storage::MapFlash;

use crate::digest::{sha256_flash_contents, Hash256};
use crate::logging::{debug, warn};
use crate::partition::PartitionEntry;
use crate::{Result, ValidationError};

/// The image header begins with this byte.
pub const IMAGE_MAGIC: u8 = 0xe9;

/// Most segments an image may have.
pub const MAX_SEGMENTS: usize = 16;

/// Seed of the segment checksum.
pub const CHECKSUM_SEED: u8 = 0xef;

/// Checks candidate images.  Any error means the candidate is not bootable.
pub trait ImageValidator<F> {
    fn validate(&mut self, flash: &mut F, partition: &PartitionEntry) -> Result<ImageMetadata>;
}

/// Checks the signature of a verified image digest.  Supplied by boards
/// with secure boot.
pub trait SignatureVerifier<F> {
    fn verify(&mut self, flash: &mut F, partition: &PartitionEntry, digest: &Hash256) -> bool;
}

/// What the hand-off needs to know about a validated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub partition: PartitionEntry,
    pub entry_addr: u32,
    /// Length of the image, including checksum and appended hash.
    pub image_len: usize,
    pub segments: heapless::Vec<Segment, MAX_SEGMENTS>,
    pub hash: Option<Hash256>,
}

/// A segment of a validated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub load_addr: u32,
    /// Flash offset of the segment data.
    pub data_offset: usize,
    pub data_len: usize,
}

/// The image begins with the following header.  This is intended to be
/// interpreted as a C struct.
#[derive(Debug, Default)]
#[repr(C)]
#[allow(dead_code)]
pub struct ImageHeader {
    /// Magic number, indicates this particular header.
    magic: u8,
    segment_count: u8,
    /// Flash mode and speed for the application.  Not used by the loader.
    spi_mode: u8,
    spi_speed_size: u8,
    /// Address execution starts at.
    entry_addr: u32,
    wp_pin: u8,
    spi_pin_drv: [u8; 3],
    chip_id: u16,
    min_chip_rev: u8,
    reserved: [u8; 8],
    /// Non-zero if a SHA-256 follows the checksum.
    hash_appended: u8,
}

impl AsRaw for ImageHeader {}
unsafe impl AsMutRaw for ImageHeader {}

/// Each segment is preceeded by this header.
#[derive(Debug, Default)]
#[repr(C)]
struct SegmentHeader {
    load_addr: u32,
    data_len: u32,
}

impl AsRaw for SegmentHeader {}
unsafe impl AsMutRaw for SegmentHeader {}

/// Placeholder verifier for boards without secure boot.
pub struct NoSignature;

impl<F> SignatureVerifier<F> for NoSignature {
    fn verify(&mut self, _flash: &mut F, _partition: &PartitionEntry, _digest: &Hash256) -> bool {
        false
    }
}

/// Validator for app images.  With a signature verifier (secure boot), an
/// appended hash is required and its signature is checked.
pub struct AppImageValidator<V = NoSignature> {
    verifier: Option<V>,
}

impl AppImageValidator<NoSignature> {
    pub fn new() -> Self {
        AppImageValidator { verifier: None }
    }
}

impl Default for AppImageValidator<NoSignature> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> AppImageValidator<V> {
    pub fn secure(verifier: V) -> Self {
        AppImageValidator { verifier: Some(verifier) }
    }
}

impl<F: MapFlash, V: SignatureVerifier<F>> ImageValidator<F> for AppImageValidator<V> {
    fn validate(&mut self, flash: &mut F, partition: &PartitionEntry) -> Result<ImageMetadata> {
        let start = partition.start();
        let limit = partition.end();

        let mut header = ImageHeader::default();
        if start + size_of::<ImageHeader>() > limit {
            return Err(ValidationError::Truncated.into());
        }
        flash.read(start, header.as_mut_raw())?;

        if header.magic != IMAGE_MAGIC {
            return Err(ValidationError::BadMagic(header.magic).into());
        }
        if header.segment_count == 0 || header.segment_count as usize > MAX_SEGMENTS {
            return Err(ValidationError::SegmentCount(header.segment_count).into());
        }

        let mut segments = heapless::Vec::new();
        let mut checksum = CHECKSUM_SEED;
        let mut pos = start + size_of::<ImageHeader>();
        for index in 0..header.segment_count {
            let out_of_bounds = ValidationError::SegmentBounds(index);
            let mut seg = SegmentHeader::default();
            if pos + size_of::<SegmentHeader>() > limit {
                return Err(out_of_bounds.into());
            }
            flash.read(pos, seg.as_mut_raw())?;
            pos += size_of::<SegmentHeader>();

            let data_len = u32::from_le(seg.data_len) as usize;
            let end = pos.checked_add(data_len).ok_or(out_of_bounds)?;
            if end > limit {
                return Err(out_of_bounds.into());
            }
            checksum ^= xor_range(flash, pos, data_len)?;

            let segment = Segment { load_addr: u32::from_le(seg.load_addr), data_offset: pos, data_len };
            debug!("segment {}: load {:#x} len {:#x}", index, segment.load_addr, data_len);
            // Capacity matches MAX_SEGMENTS, which was checked above.
            let _ = segments.push(segment);
            pos = end;
        }

        // Pad so the checksum byte is the last of a 16 byte block.
        let checked_len = (pos - start + 1 + 15) & !15;
        let checksum_pos = start + checked_len - 1;
        let mut image_len = checked_len;
        if start + image_len > limit {
            return Err(ValidationError::Truncated.into());
        }
        let mut stored = [0u8; 1];
        flash.read(checksum_pos, &mut stored)?;
        if stored[0] != checksum {
            warn!("checksum {:#x} does not match {:#x}", stored[0], checksum);
            return Err(ValidationError::Checksum.into());
        }

        let hash = if header.hash_appended != 0 {
            image_len += size_of::<Hash256>();
            if start + image_len > limit {
                return Err(ValidationError::Truncated.into());
            }
            let mut expected = [0u8; 32];
            flash.read(start + checked_len, &mut expected)?;
            let actual = sha256_flash_contents(flash, start, checked_len)?;
            if actual != expected {
                warn!("hash verification failure");
                return Err(ValidationError::HashMismatch.into());
            }
            Some(actual)
        } else {
            None
        };

        if let Some(verifier) = self.verifier.as_mut() {
            let digest = hash.ok_or(ValidationError::MissingHash)?;
            if !verifier.verify(flash, partition, &digest) {
                return Err(ValidationError::Signature.into());
            }
        }

        Ok(ImageMetadata {
            partition: *partition,
            entry_addr: u32::from_le(header.entry_addr),
            image_len,
            segments,
            hash,
        })
    }
}

/// XOR together a range of flash.
fn xor_range<F: MapFlash>(flash: &mut F, offset: usize, length: usize) -> Result<u8> {
    let mut buffer = [0u8; 128];
    let mut acc = 0;
    let mut pos = 0;
    while pos < length {
        let todo = (length - pos).min(buffer.len());
        let buf = &mut buffer[..todo];
        flash.read(offset + pos, buf)?;
        acc = buf.iter().fold(acc, |a, b| a ^ b);
        pos += todo;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(size_of::<ImageHeader>(), 24);
        assert_eq!(size_of::<SegmentHeader>(), 8);
        let mut header = ImageHeader::default();
        header.as_mut_raw()[23] = 1;
        header.as_mut_raw()[4..8].copy_from_slice(&0x4008_0000u32.to_le_bytes());
        assert_eq!(header.hash_appended, 1);
        assert_eq!(u32::from_le(header.entry_addr), 0x4008_0000);
    }
}

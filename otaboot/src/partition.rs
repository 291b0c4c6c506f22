//! Partition table
//!
//! The partition table lives at a fixed offset in flash, and is a sequence of
//! 32-byte entries.  A checksum record holding the MD5 of every preceding
//! entry follows the last partition, and a record of erased flash (all 0xff)
//! ends the table.
//!
//! +--------+------+---------+--------+------+------------+-------+
//! | 0      | 2    | 3       | 4      | 8    | 12         | 28    |
//! | magic  | type | subtype | offset | size | label[16]  | flags |
//! +--------+------+---------+--------+------+------------+-------+
//!
//! The checksum record has magic 0xebeb, padding to byte 16, and the 16 byte
//! MD5 digest in the second half.
//!
//! Only the (type, subtype) pair of an entry determines what it is used for.
//! Its position in the table does not matter.

use md5::{Digest, Md5};

use asraw::{AsMutRaw, AsRaw, FromRaw};
use storage::{MapFlash, Mapping};

use crate::config::{
    BootConfig, MAX_OTA_SLOTS, PARTITION_ENTRY_SIZE, PARTITION_TABLE_MAX_ENTRIES,
    PARTITION_TABLE_MAX_LEN,
};
use crate::logging::{debug, info};
use crate::{Error, FormatError, Result};

pub const PARTITION_MAGIC: u16 = 0x50aa;
pub const CHECKSUM_MAGIC: u16 = 0xebeb;
pub const END_MAGIC: u16 = 0xffff;

pub const TYPE_APP: u8 = 0x00;
pub const TYPE_DATA: u8 = 0x01;

pub const SUBTYPE_APP_FACTORY: u8 = 0x00;
pub const SUBTYPE_APP_OTA_MIN: u8 = 0x10;
pub const SUBTYPE_APP_OTA_MAX: u8 = SUBTYPE_APP_OTA_MIN + MAX_OTA_SLOTS as u8 - 1;
pub const SUBTYPE_APP_TEST: u8 = 0x20;
pub const SUBTYPE_DATA_OTA: u8 = 0x00;

/// The partition is stored encrypted.
pub const FLAG_ENCRYPTED: u32 = 1 << 0;

/// The entry as laid out in flash.
#[derive(Debug, Default)]
#[repr(C)]
struct RawEntry {
    magic: u16,
    kind: u8,
    subtype: u8,
    offset: u32,
    size: u32,
    label: [u8; 16],
    flags: u32,
}

impl AsRaw for RawEntry {}
unsafe impl AsMutRaw for RawEntry {}

/// The broad kind of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PartitionType {
    App,
    Data,
    Unknown(u8),
}

impl From<u8> for PartitionType {
    fn from(kind: u8) -> Self {
        match kind {
            TYPE_APP => PartitionType::App,
            TYPE_DATA => PartitionType::Data,
            other => PartitionType::Unknown(other),
        }
    }
}

/// What the boot core uses a partition for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Factory,
    Ota(u8),
    Test,
    OtaData,
    /// Anything else.  Kept, but never booted.
    Other,
}

/// A single partition, as described by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub kind: PartitionType,
    pub subtype: u8,
    pub offset: u32,
    pub size: u32,
    pub label: [u8; 16],
    pub flags: u32,
}

impl PartitionEntry {
    /// Construct an entry with an empty label and no flags.
    pub const fn new(kind: PartitionType, subtype: u8, offset: u32, size: u32) -> Self {
        PartitionEntry { kind, subtype, offset, size, label: [0; 16], flags: 0 }
    }

    fn from_record(raw: &RawEntry, index: usize) -> Result<Self> {
        let offset = u32::from_le(raw.offset);
        let size = u32::from_le(raw.size);
        if offset.checked_add(size).is_none() {
            return Err(FormatError::BadBounds { index }.into());
        }
        Ok(PartitionEntry {
            kind: raw.kind.into(),
            subtype: raw.subtype,
            offset,
            size,
            label: raw.label,
            flags: u32::from_le(raw.flags),
        })
    }

    pub fn role(&self) -> Role {
        match (self.kind, self.subtype) {
            (PartitionType::App, SUBTYPE_APP_FACTORY) => Role::Factory,
            (PartitionType::App, sub @ SUBTYPE_APP_OTA_MIN..=SUBTYPE_APP_OTA_MAX) => {
                Role::Ota(sub - SUBTYPE_APP_OTA_MIN)
            }
            (PartitionType::App, SUBTYPE_APP_TEST) => Role::Test,
            (PartitionType::Data, SUBTYPE_DATA_OTA) => Role::OtaData,
            _ => Role::Other,
        }
    }

    /// The label, up to the first NUL.  Labels that are not UTF-8 read as
    /// empty.
    pub fn label(&self) -> &str {
        let len = self.label.iter().position(|&b| b == 0).unwrap_or(self.label.len());
        core::str::from_utf8(&self.label[..len]).unwrap_or("")
    }

    /// Whether the contents are stored encrypted on flash.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn start(&self) -> usize {
        self.offset as usize
    }

    /// One past the last byte.  Does not overflow, as loading checks this.
    pub fn end(&self) -> usize {
        self.offset as usize + self.size as usize
    }
}

pub type EntryVec = heapless::Vec<PartitionEntry, PARTITION_TABLE_MAX_ENTRIES>;

/// The partitions of one boot attempt, sorted into the roles the boot core
/// cares about.  Built once, and not changed afterwards.
#[derive(Debug, Clone)]
pub struct BootloaderState {
    entries: EntryVec,
    factory: Option<usize>,
    test: Option<usize>,
    ota_data: Option<usize>,
    /// Entry index of each OTA slot, by slot number.
    ota: heapless::Vec<usize, MAX_OTA_SLOTS>,
}

impl BootloaderState {
    /// Read the partition table from flash and classify it.
    pub fn load<F: MapFlash>(flash: &mut F, config: &BootConfig) -> Result<Self> {
        let entries = {
            let table = Mapping::new(flash, config.table_offset, PARTITION_TABLE_MAX_LEN)?;
            parse_table(&table, config.require_table_checksum)?
        };
        let state = Self::from_entries(entries)?;
        info!(
            "partition table: {} entries, {} OTA slots",
            state.entries.len(),
            state.ota.len()
        );
        Ok(state)
    }

    /// Classify a set of entries.  Fails if a role is claimed twice, or the
    /// OTA slots are not numbered contiguously from zero.
    pub fn from_entries(entries: EntryVec) -> Result<Self> {
        let mut factory = None;
        let mut test = None;
        let mut ota_data = None;
        let mut slots = [None; MAX_OTA_SLOTS];

        for (index, entry) in entries.iter().enumerate() {
            let role = entry.role();
            let place = match role {
                Role::Factory => &mut factory,
                Role::Test => &mut test,
                Role::OtaData => &mut ota_data,
                Role::Ota(slot) => &mut slots[slot as usize],
                Role::Other => {
                    debug!(
                        "ignoring partition {} (type {:?}, subtype {:#x})",
                        entry.label(),
                        entry.kind,
                        entry.subtype
                    );
                    continue;
                }
            };
            if place.is_some() {
                return Err(FormatError::DuplicateRole { index, role }.into());
            }
            *place = Some(index);
        }

        let count = slots.iter().take_while(|s| s.is_some()).count();
        if slots[count..].iter().any(Option::is_some) {
            return Err(FormatError::OtaGap { missing: count as u8 }.into());
        }
        let ota = slots.iter().flatten().copied().collect();

        Ok(BootloaderState { entries, factory, test, ota_data, ota })
    }

    /// Every entry in the table, including ones with no role.
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn factory(&self) -> Option<&PartitionEntry> {
        self.factory.map(|i| &self.entries[i])
    }

    pub fn test(&self) -> Option<&PartitionEntry> {
        self.test.map(|i| &self.entries[i])
    }

    pub fn ota_data(&self) -> Option<&PartitionEntry> {
        self.ota_data.map(|i| &self.entries[i])
    }

    pub fn ota_slot(&self, slot: u8) -> Option<&PartitionEntry> {
        self.ota.get(slot as usize).map(|&i| &self.entries[i])
    }

    pub fn ota_slot_count(&self) -> usize {
        self.ota.len()
    }
}

/// Walk the table entries, verifying the checksum record if present.
fn parse_table(table: &[u8], require_checksum: bool) -> Result<EntryVec> {
    let mut entries = EntryVec::new();
    let mut checksum_seen = false;

    for (index, chunk) in table.chunks_exact(PARTITION_ENTRY_SIZE).enumerate() {
        let raw = RawEntry::from_raw(chunk).ok_or(FormatError::Unterminated)?;
        match u16::from_le(raw.magic) {
            PARTITION_MAGIC => {
                if checksum_seen {
                    return Err(FormatError::TrailingEntry { index }.into());
                }
                let entry = PartitionEntry::from_record(&raw, index)?;
                // Capacity matches the number of chunks, so this cannot fail.
                let _ = entries.push(entry);
            }
            CHECKSUM_MAGIC => {
                let expected = &chunk[PARTITION_ENTRY_SIZE / 2..];
                let actual = Md5::digest(&table[..index * PARTITION_ENTRY_SIZE]);
                if actual.as_slice() != expected {
                    return Err(Error::Integrity);
                }
                checksum_seen = true;
            }
            END_MAGIC => {
                if require_checksum && !checksum_seen {
                    return Err(FormatError::MissingChecksum.into());
                }
                return Ok(entries);
            }
            magic => return Err(FormatError::BadMagic { index, magic }.into()),
        }
    }

    Err(FormatError::Unterminated.into())
}

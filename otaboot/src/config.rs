//! Boot configuration.
//!
//! The layout constants match the on-flash format written by the partition
//! and OTA tooling.  `BootConfig` carries the choices a board may make.

/// Default flash offset of the partition table.
pub const PARTITION_TABLE_OFFSET: usize = 0x8000;

/// Space reserved for the partition table, including the checksum record.
pub const PARTITION_TABLE_MAX_LEN: usize = 0xc00;

/// Size of one partition table entry.
pub const PARTITION_ENTRY_SIZE: usize = 32;

/// Entries that fit in the reserved space.
pub const PARTITION_TABLE_MAX_ENTRIES: usize = PARTITION_TABLE_MAX_LEN / PARTITION_ENTRY_SIZE;

/// Most OTA slots a table may describe.
pub const MAX_OTA_SLOTS: usize = 16;

/// The two OTA data records live in consecutive sectors of this size.
pub const OTA_DATA_SECTOR_SIZE: usize = 0x1000;

/// How to resolve two valid OTA data records.
///
/// The OTA writer alternates between the records, so normally the record
/// with the higher sequence number is the most recent.  What to do when the
/// records disagree in an unexpected way is a board decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceTieBreak {
    /// Use the larger sequence number.
    #[default]
    Highest,
    /// Always trust the first record.
    First,
    /// Always trust the second record.
    Second,
    /// Equal sequence numbers mean neither record can be trusted, otherwise
    /// use the larger one.
    DiscardEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Flash offset of the partition table.
    pub table_offset: usize,
    /// Refuse tables without a checksum record.  Tables written by older
    /// tooling have none.
    pub require_table_checksum: bool,
    pub tie_break: SequenceTieBreak,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            table_offset: PARTITION_TABLE_OFFSET,
            require_table_checksum: true,
            tie_break: SequenceTieBreak::default(),
        }
    }
}

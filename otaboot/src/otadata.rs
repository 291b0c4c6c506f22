//! OTA data
//!
//! The OTA data partition holds two copies of a small record, one at the start
//! of each of its first two sectors.  The running application writes them
//! alternately when it switches slots, bumping the sequence number each time.
//! The boot core only reads them.
//!
//! +---------+----------------+-----------+-------+
//! | 0       | 4              | 24        | 28    |
//! | ota_seq | seq_label[20]  | ota_state | crc   |
//! +---------+----------------+-----------+-------+
//!
//! The crc covers only the four bytes of `ota_seq`.  A sequence number of n
//! selects slot `(n - 1) % slot_count`.

use crc::{Algorithm, Crc};

use asraw::{AsMutRaw, AsRaw};
use storage::ReadFlash;

use crate::config::{SequenceTieBreak, OTA_DATA_SECTOR_SIZE};
use crate::logging::{debug, warn};
use crate::partition::BootloaderState;

/// The slot the OTA data asks for, if any.
pub type OtaSelection = Option<u8>;

/// CRC-32 as the OTA writer computes it: the reflected IEEE polynomial, but
/// starting from zero rather than all ones.
pub const OTA_SEQ_CRC: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
    refin: true,
    refout: true,
    xorout: 0xffff_ffff,
    check: 0xd202_d277,
    residue: 0xdebb_20e3,
};

const CRC: Crc<u32> = Crc::<u32>::new(&OTA_SEQ_CRC);

/// Sequence number of a record that has never been written.
const SEQ_ERASED: u32 = 0xffff_ffff;

/// One of the two records.
#[derive(Debug, Default, Clone)]
#[repr(C)]
#[allow(dead_code)]
pub struct OtaSelectEntry {
    ota_seq: u32,
    seq_label: [u8; 20],
    ota_state: u32,
    crc: u32,
}

impl AsRaw for OtaSelectEntry {}
unsafe impl AsMutRaw for OtaSelectEntry {}

impl OtaSelectEntry {
    /// Build a correctly checksummed record.
    pub fn new(seq: u32) -> Self {
        OtaSelectEntry {
            ota_seq: seq.to_le(),
            seq_label: [0xff; 20],
            ota_state: SEQ_ERASED,
            crc: seq_crc(seq).to_le(),
        }
    }

    pub fn seq(&self) -> u32 {
        u32::from_le(self.ota_seq)
    }

    /// The sequence number, if this record was fully written.  Sequence
    /// numbers start at one, so zero is never valid.
    pub fn valid_seq(&self) -> Option<u32> {
        let seq = self.seq();
        if seq == SEQ_ERASED || seq == 0 {
            return None;
        }
        if u32::from_le(self.crc) != seq_crc(seq) {
            return None;
        }
        Some(seq)
    }
}

pub fn seq_crc(seq: u32) -> u32 {
    CRC.checksum(&seq.to_le_bytes())
}

/// Decide between the sequence numbers of the two records.  `None` is a
/// record that is not valid.
pub fn resolve(records: [Option<u32>; 2], policy: SequenceTieBreak) -> Option<u32> {
    match records {
        [None, None] => None,
        [Some(a), None] => Some(a),
        [None, Some(b)] => Some(b),
        [Some(a), Some(b)] => match policy {
            SequenceTieBreak::Highest => Some(a.max(b)),
            SequenceTieBreak::First => Some(a),
            SequenceTieBreak::Second => Some(b),
            SequenceTieBreak::DiscardEqual if a == b => None,
            SequenceTieBreak::DiscardEqual => Some(a.max(b)),
        },
    }
}

/// Map a sequence number onto one of `slot_count` slots.
pub fn seq_to_slot(seq: u32, slot_count: usize) -> Option<u8> {
    if seq == 0 || slot_count == 0 {
        return None;
    }
    Some(((seq - 1) % slot_count as u32) as u8)
}

/// Read the OTA data partition and work out which slot it selects.
///
/// A table without OTA data or without OTA slots selects nothing.  Records
/// that fail their checksum, or cannot be read at all, are ignored, so one
/// good copy is enough.
pub fn read_selection<F: ReadFlash>(
    flash: &mut F,
    state: &BootloaderState,
    policy: SequenceTieBreak,
) -> OtaSelection {
    let Some(part) = state.ota_data() else {
        debug!("no OTA data partition");
        return None;
    };
    if state.ota_slot_count() == 0 {
        return None;
    }

    let mut records = [None; 2];
    for (i, record) in records.iter_mut().enumerate() {
        *record = read_record(flash, part.start() + i * OTA_DATA_SECTOR_SIZE, i);
    }

    let seq = resolve(records, policy);
    if seq.is_none() {
        warn!("OTA data holds no usable selection");
    }
    seq.and_then(|seq| seq_to_slot(seq, state.ota_slot_count()))
}

/// The sequence number of one record, or None if it is unreadable or invalid.
fn read_record<F: ReadFlash>(flash: &mut F, offset: usize, index: usize) -> Option<u32> {
    let mut entry = OtaSelectEntry::default();
    if let Err(e) = flash.read(offset, entry.as_mut_raw()) {
        warn!("unable to read OTA data record {}: {:?}", index, e);
        return None;
    }
    let seq = entry.valid_seq();
    debug!("OTA data record {}: seq {:#x} valid {}", index, entry.seq(), seq.is_some());
    seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use asraw::FromRaw;

    #[test]
    fn crc_matches_writer() {
        // Values produced by the OTA tooling.
        assert_eq!(seq_crc(1), 0x4743_989a);
        assert_eq!(CRC.checksum(b"123456789"), OTA_SEQ_CRC.check);
    }

    #[test]
    fn record_layout() {
        assert_eq!(core::mem::size_of::<OtaSelectEntry>(), 32);
        let entry = OtaSelectEntry::new(7);
        let copy = OtaSelectEntry::from_raw(entry.as_raw()).unwrap();
        assert_eq!(copy.valid_seq(), Some(7));
    }

    #[test]
    fn invalid_records() {
        assert_eq!(OtaSelectEntry::new(SEQ_ERASED).valid_seq(), None);
        assert_eq!(OtaSelectEntry::new(0).valid_seq(), None);

        let mut entry = OtaSelectEntry::new(3);
        entry.crc ^= 1;
        assert_eq!(entry.valid_seq(), None);

        let erased = OtaSelectEntry::from_raw(&[0xff; 32]).unwrap();
        assert_eq!(erased.valid_seq(), None);
    }

    #[test]
    fn tie_break() {
        use SequenceTieBreak::*;
        assert_eq!(resolve([Some(4), Some(5)], Highest), Some(5));
        assert_eq!(resolve([Some(5), Some(4)], Highest), Some(5));
        assert_eq!(resolve([Some(4), Some(5)], First), Some(4));
        assert_eq!(resolve([Some(4), Some(5)], Second), Some(5));
        assert_eq!(resolve([Some(4), Some(4)], DiscardEqual), None);
        assert_eq!(resolve([Some(4), Some(6)], DiscardEqual), Some(6));
        for policy in [Highest, First, Second, DiscardEqual] {
            assert_eq!(resolve([None, Some(2)], policy), Some(2));
            assert_eq!(resolve([Some(3), None], policy), Some(3));
            assert_eq!(resolve([None, None], policy), None);
        }
    }

    #[test]
    fn slots() {
        assert_eq!(seq_to_slot(1, 2), Some(0));
        assert_eq!(seq_to_slot(2, 2), Some(1));
        assert_eq!(seq_to_slot(3, 2), Some(0));
        assert_eq!(seq_to_slot(17, 16), Some(0));
        assert_eq!(seq_to_slot(0, 2), None);
        assert_eq!(seq_to_slot(5, 0), None);
    }
}

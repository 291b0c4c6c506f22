//! Generation of flash contents.
//!
//! Builders for the three things a boot attempt reads: the partition table,
//! the OTA data records, and app images.  These write the on-flash formats
//! independently of the boot code, so tests check one against the other.

use anyhow::{anyhow, Result};
use crc::{Algorithm, Crc};
use md5::{Digest, Md5};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use sha2::Sha256;

use crate::{SimFlash, ERASED};

pub const TABLE_OFFSET: usize = 0x8000;
const TABLE_LEN: usize = 0xc00;
const ENTRY_SIZE: usize = 32;

pub const TYPE_APP: u8 = 0x00;
pub const TYPE_DATA: u8 = 0x01;

pub const OTA_DATA_OFFSET: u32 = 0xd000;
pub const OTA_DATA_SIZE: u32 = 0x2000;
const OTA_SECTOR: usize = 0x1000;

/// Placement of the app partitions in the standard layout.
pub const APP_SIZE: u32 = 0x80000;
pub const FACTORY_OFFSET: u32 = 0x10000;
pub const TEST_OFFSET: u32 = 0x710000;

pub fn slot_offset(slot: u8) -> u32 {
    0x90000 + slot as u32 * APP_SIZE
}

/// Builds a partition table image.
pub struct TableBuilder {
    entries: Vec<[u8; ENTRY_SIZE]>,
    checksum: bool,
}

impl Default for TableBuilder {
    fn default() -> Self {
        TableBuilder { entries: Vec::new(), checksum: true }
    }
}

impl TableBuilder {
    /// The usual table: nvs, OTA data, and the requested app partitions.
    pub fn standard(factory: bool, slots: u8, test: bool) -> TableBuilder {
        let mut table = TableBuilder::default();
        table.entry(TYPE_DATA, 0x02, 0x9000, 0x4000, "nvs");
        table.ota_data(OTA_DATA_OFFSET, OTA_DATA_SIZE);
        if factory {
            table.factory(FACTORY_OFFSET, APP_SIZE);
        }
        for slot in 0..slots {
            table.ota(slot, slot_offset(slot), APP_SIZE);
        }
        if test {
            table.test(TEST_OFFSET, APP_SIZE);
        }
        table
    }

    pub fn entry(&mut self, kind: u8, subtype: u8, offset: u32, size: u32, label: &str) -> &mut Self {
        let mut e = [0u8; ENTRY_SIZE];
        e[0..2].copy_from_slice(&0x50aau16.to_le_bytes());
        e[2] = kind;
        e[3] = subtype;
        e[4..8].copy_from_slice(&offset.to_le_bytes());
        e[8..12].copy_from_slice(&size.to_le_bytes());
        let label = label.as_bytes();
        let n = label.len().min(16);
        e[12..12 + n].copy_from_slice(&label[..n]);
        self.entries.push(e);
        self
    }

    pub fn factory(&mut self, offset: u32, size: u32) -> &mut Self {
        self.entry(TYPE_APP, 0x00, offset, size, "factory")
    }

    pub fn ota(&mut self, slot: u8, offset: u32, size: u32) -> &mut Self {
        let label = format!("ota_{}", slot);
        self.entry(TYPE_APP, 0x10 + slot, offset, size, &label)
    }

    pub fn test(&mut self, offset: u32, size: u32) -> &mut Self {
        self.entry(TYPE_APP, 0x20, offset, size, "test")
    }

    pub fn ota_data(&mut self, offset: u32, size: u32) -> &mut Self {
        self.entry(TYPE_DATA, 0x00, offset, size, "otadata")
    }

    /// Whether to write the MD5 checksum record.
    pub fn checksum(&mut self, checksum: bool) -> &mut Self {
        self.checksum = checksum;
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let records = self.entries.len() + self.checksum as usize;
        if records * ENTRY_SIZE >= TABLE_LEN {
            return Err(anyhow!("Too many partitions: {}", self.entries.len()));
        }
        let mut table = vec![ERASED; TABLE_LEN];
        for (i, e) in self.entries.iter().enumerate() {
            table[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE].copy_from_slice(e);
        }
        if self.checksum {
            let pos = self.entries.len() * ENTRY_SIZE;
            let digest = Md5::digest(&table[..pos]);
            table[pos..pos + 2].copy_from_slice(&0xebebu16.to_le_bytes());
            table[pos + 16..pos + 32].copy_from_slice(&digest);
        }
        Ok(table)
    }

    /// Build and place the table at its usual offset.
    pub fn install(&self, flash: &mut SimFlash) -> Result<()> {
        flash.install(&self.build()?, TABLE_OFFSET)
    }
}

const OTA_SEQ_CRC: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0,
    refin: true,
    refout: true,
    xorout: 0xffff_ffff,
    check: 0xd202_d277,
    residue: 0xdebb_20e3,
};

/// Builds the two OTA data records.
#[derive(Default)]
pub struct OtaDataBuilder {
    records: [Option<(u32, bool)>; 2],
}

impl OtaDataBuilder {
    /// Write record `index` (0 or 1) with sequence number `seq`.
    pub fn record(&mut self, index: usize, seq: u32) -> &mut Self {
        self.records[index] = Some((seq, false));
        self
    }

    /// Write record `index` with a crc that does not match.
    pub fn corrupt(&mut self, index: usize, seq: u32) -> &mut Self {
        self.records[index] = Some((seq, true));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let crc = Crc::<u32>::new(&OTA_SEQ_CRC);
        let mut data = vec![ERASED; 2 * OTA_SECTOR];
        for (i, record) in self.records.iter().enumerate() {
            let Some((seq, corrupt)) = *record else {
                continue;
            };
            let mut value = crc.checksum(&seq.to_le_bytes());
            if corrupt {
                value ^= 0x5a5a_5a5a;
            }
            let base = i * OTA_SECTOR;
            data[base..base + 4].copy_from_slice(&seq.to_le_bytes());
            data[base + 28..base + 32].copy_from_slice(&value.to_le_bytes());
        }
        data
    }

    pub fn install(&self, flash: &mut SimFlash) -> Result<()> {
        flash.install(&self.build(), OTA_DATA_OFFSET as usize)
    }
}

pub struct GeneratedImage {
    pub data: Vec<u8>,
    /// Offset of the checksum byte within `data`.
    pub checksum_pos: usize,
    /// Offset of the appended hash within `data`, if there is one.
    pub hash_pos: Option<usize>,
}

impl GeneratedImage {
    /// Offset of the first byte of segment data.
    pub fn first_segment_data(&self) -> usize {
        24 + 8
    }
}

/// Builds an app image with random segment contents.
pub struct ImageBuilder {
    /// Size of each segment.
    segments: Vec<usize>,
    /// Seed for the PRNG
    seed: u64,
    entry: u32,
    hash: bool,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder {
            segments: vec![0x2000, 0x7123, 0x1e4],
            seed: 1,
            entry: 0x4008_0400,
            hash: true,
        }
    }
}

impl ImageBuilder {
    /// Use a single segment of the given size.
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.segments = vec![size];
        self
    }

    pub fn segments(&mut self, sizes: &[usize]) -> &mut Self {
        self.segments = sizes.to_vec();
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn entry(&mut self, entry: u32) -> &mut Self {
        self.entry = entry;
        self
    }

    pub fn hash(&mut self, hash: bool) -> &mut Self {
        self.hash = hash;
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        if self.segments.len() > 16 {
            return Err(anyhow!("Too many segments: {}", self.segments.len()));
        }
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);

        let mut data = Vec::new();
        data.push(0xe9);
        data.push(self.segments.len() as u8);
        data.push(0x02); // flash mode
        data.push(0x20); // flash speed and size
        data.extend_from_slice(&self.entry.to_le_bytes());
        data.push(0xee); // no write protect pin
        data.extend_from_slice(&[0; 3]);
        data.extend_from_slice(&0u16.to_le_bytes()); // chip id
        data.push(0); // min chip revision
        data.extend_from_slice(&[0; 8]);
        data.push(self.hash as u8);

        let mut checksum = 0xefu8;
        for (i, &size) in self.segments.iter().enumerate() {
            let load = 0x3f40_0000u32 + (i as u32) * 0x10_0000;
            data.extend_from_slice(&load.to_le_bytes());
            data.extend_from_slice(&(size as u32).to_le_bytes());
            let mut payload = vec![0u8; size];
            rng.fill_bytes(&mut payload);
            checksum = payload.iter().fold(checksum, |a, b| a ^ b);
            data.extend_from_slice(&payload);
        }

        while (data.len() + 1) % 16 != 0 {
            data.push(0);
        }
        let checksum_pos = data.len();
        data.push(checksum);

        let hash_pos = if self.hash {
            let digest = Sha256::digest(&data);
            let pos = data.len();
            data.extend_from_slice(&digest);
            Some(pos)
        } else {
            None
        };

        Ok(GeneratedImage { data, checksum_pos, hash_pos })
    }
}

#[cfg(test)]
mod tester {
    use super::*;
    use crate::styles;

    use otaboot::image::{AppImageValidator, ImageValidator};
    use otaboot::partition::{PartitionEntry, PartitionType};
    use otaboot::{BootConfig, BootloaderState};

    #[test]
    fn test_gen() {
        let img = ImageBuilder::default().build().unwrap();
        let mut flash = styles::NARROW.build().unwrap();
        flash.install(&img.data, FACTORY_OFFSET as usize).unwrap();
        let part = PartitionEntry::new(PartitionType::App, 0x00, FACTORY_OFFSET, APP_SIZE);
        let image = AppImageValidator::new().validate(&mut flash, &part).unwrap();
        assert_eq!(image.entry_addr, 0x4008_0400);
        assert_eq!(image.segments.len(), 3);
        assert_eq!(image.image_len, img.data.len());
    }

    #[test]
    fn test_table() {
        let mut flash = styles::ESP32.build().unwrap();
        TableBuilder::standard(true, 3, true).install(&mut flash).unwrap();
        let state = BootloaderState::load(&mut flash, &BootConfig::default()).unwrap();
        assert_eq!(state.ota_slot_count(), 3);
        assert_eq!(state.ota_slot(2).unwrap().offset, slot_offset(2));
        assert_eq!(state.test().unwrap().offset, TEST_OFFSET);
    }
}

//! Boot partition selection.
//!
//! Policy only: which partition should be tried first.  Whether it holds a
//! bootable image is decided later, by the loader.

use crate::logging::{info, warn};
use crate::otadata::OtaSelection;
use crate::partition::BootloaderState;

/// Where the search for a bootable image starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartIndex {
    Ota(u8),
    Factory,
    /// There is no sensible default.  The search still tries every
    /// partition, starting as if from the factory partition.
    Invalid,
}

/// Pick the starting partition.
///
/// 1. The OTA slot named by the OTA data, if that slot exists.
/// 2. The factory partition.
/// 3. OTA slot 0.
pub fn selected_boot_partition(state: &BootloaderState, selection: OtaSelection) -> StartIndex {
    if let Some(slot) = selection.filter(|&s| state.ota_slot(s).is_some()) {
        info!("OTA data selects slot {}", slot);
        return StartIndex::Ota(slot);
    }
    if state.factory().is_some() {
        return StartIndex::Factory;
    }
    if state.ota_slot_count() > 0 {
        warn!("no usable OTA selection and no factory app, starting at slot 0");
        return StartIndex::Ota(0);
    }
    warn!("no app partitions");
    StartIndex::Invalid
}

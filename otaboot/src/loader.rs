//! Image loading
//!
//! Given a start index, walk the candidate partitions in this order, skipping
//! any that are not in the table:
//!
//! - the start slot `k`
//! - OTA slots `k-1` down to 0
//! - the factory partition
//! - OTA slots `k+1` up to the last slot
//! - the test partition
//!
//! A factory or invalid start index begins at the factory partition.  The
//! first candidate the validator accepts is booted.  If none is accepted, the
//! device is reset.

use storage::MapFlash;

use crate::config::BootConfig;
use crate::image::{ImageMetadata, ImageValidator};
use crate::logging::{error, info, warn};
use crate::otadata::read_selection;
use crate::partition::{BootloaderState, PartitionEntry};
use crate::platform::Platform;
use crate::select::{selected_boot_partition, StartIndex};
use crate::Error;

/// The role a candidate is tried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CandidateRole {
    Ota(u8),
    Factory,
    Test,
}

/// One partition to try.
#[derive(Debug, Clone, Copy)]
pub struct BootCandidate<'s> {
    pub role: CandidateRole,
    pub partition: &'s PartitionEntry,
}

/// How a boot attempt ends.  Both variants are terminal.
#[derive(Debug)]
pub enum BootOutcome {
    Boot(ImageMetadata),
    Reset(Error),
}

#[derive(Debug, Clone, Copy)]
enum Step {
    /// Next OTA slot on the way down, or the factory partition when None.
    Down(Option<u8>),
    Up(u8),
    Test,
    Done,
}

/// The candidates of a search, in the order they are tried.
pub struct SearchOrder<'s> {
    state: &'s BootloaderState,
    step: Step,
    up_from: u8,
}

impl<'s> SearchOrder<'s> {
    pub fn new(state: &'s BootloaderState, start: StartIndex) -> Self {
        let start = match start {
            StartIndex::Ota(slot) => Some(slot),
            StartIndex::Factory | StartIndex::Invalid => None,
        };
        SearchOrder {
            state,
            step: Step::Down(start),
            up_from: start.map_or(0, |slot| slot.saturating_add(1)),
        }
    }
}

impl<'s> Iterator for SearchOrder<'s> {
    type Item = BootCandidate<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let role = match self.step {
                Step::Down(Some(slot)) => {
                    self.step = Step::Down(slot.checked_sub(1));
                    CandidateRole::Ota(slot)
                }
                Step::Down(None) => {
                    self.step = Step::Up(self.up_from);
                    CandidateRole::Factory
                }
                Step::Up(slot) if (slot as usize) < self.state.ota_slot_count() => {
                    self.step = Step::Up(slot + 1);
                    CandidateRole::Ota(slot)
                }
                Step::Up(_) => {
                    self.step = Step::Test;
                    continue;
                }
                Step::Test => {
                    self.step = Step::Done;
                    CandidateRole::Test
                }
                Step::Done => return None,
            };

            let partition = match role {
                CandidateRole::Ota(slot) => self.state.ota_slot(slot),
                CandidateRole::Factory => self.state.factory(),
                CandidateRole::Test => self.state.test(),
            };
            if let Some(partition) = partition {
                return Some(BootCandidate { role, partition });
            }
        }
    }
}

/// Search for a bootable image, starting at `start`.
pub fn load_boot_image<F, V>(
    flash: &mut F,
    state: &BootloaderState,
    start: StartIndex,
    validator: &mut V,
) -> BootOutcome
where
    V: ImageValidator<F>,
{
    for candidate in SearchOrder::new(state, start) {
        let part = candidate.partition;
        match validator.validate(flash, part) {
            Ok(image) => {
                if candidate.role == CandidateRole::Test {
                    warn!("falling back to test app as last resort");
                }
                info!("booting {:?} partition at {:#x}", candidate.role, part.offset);
                if part.is_encrypted() {
                    info!("partition {} is encrypted", part.label());
                }
                return BootOutcome::Boot(image);
            }
            Err(e) => {
                warn!("{:?} partition at {:#x} is not bootable: {}", candidate.role, part.offset, e);
            }
        }
    }

    error!("no bootable app partitions in the partition table");
    BootOutcome::Reset(Error::NoCandidate)
}

/// Run one boot attempt, up to deciding how it ends.
pub fn boot<F, V>(flash: &mut F, config: &BootConfig, validator: &mut V) -> BootOutcome
where
    F: MapFlash,
    V: ImageValidator<F>,
{
    let state = match BootloaderState::load(flash, config) {
        Ok(state) => state,
        Err(e) => {
            error!("unable to load partition table: {}", e);
            return BootOutcome::Reset(e);
        }
    };

    let selection = read_selection(flash, &state, config.tie_break);
    let start = selected_boot_partition(&state, selection);
    load_boot_image(flash, &state, start, validator)
}

/// Run one boot attempt, and act on the result.
pub fn run<F, V, P>(flash: &mut F, config: &BootConfig, validator: &mut V, platform: &mut P) -> !
where
    F: MapFlash,
    V: ImageValidator<F>,
    P: Platform,
{
    match boot(flash, config, validator) {
        BootOutcome::Boot(image) => platform.hand_off(&image),
        BootOutcome::Reset(_) => platform.reset(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{EntryVec, PartitionType};

    fn state(factory: bool, slots: u8, test: bool) -> BootloaderState {
        let mut entries = EntryVec::new();
        if test {
            entries.push(PartitionEntry::new(PartitionType::App, 0x20, 0x1000, 0x1000)).unwrap();
        }
        for slot in (0..slots).rev() {
            let offset = 0x10000 + slot as u32 * 0x1000;
            entries.push(PartitionEntry::new(PartitionType::App, 0x10 + slot, offset, 0x1000)).unwrap();
        }
        if factory {
            entries.push(PartitionEntry::new(PartitionType::App, 0x00, 0x2000, 0x1000)).unwrap();
        }
        BootloaderState::from_entries(entries).unwrap()
    }

    fn order(state: &BootloaderState, start: StartIndex) -> Vec<CandidateRole> {
        SearchOrder::new(state, start).map(|c| c.role).collect()
    }

    use CandidateRole::{Factory, Ota, Test};

    #[test]
    fn full_order() {
        let s = state(true, 4, true);
        assert_eq!(
            order(&s, StartIndex::Ota(2)),
            vec![Ota(2), Ota(1), Ota(0), Factory, Ota(3), Test]
        );
        assert_eq!(order(&s, StartIndex::Ota(0)), vec![Ota(0), Factory, Ota(1), Ota(2), Ota(3), Test]);
        assert_eq!(order(&s, StartIndex::Ota(3)), vec![Ota(3), Ota(2), Ota(1), Ota(0), Factory, Test]);
    }

    #[test]
    fn factory_and_invalid_start() {
        let s = state(true, 2, true);
        let expected = vec![Factory, Ota(0), Ota(1), Test];
        assert_eq!(order(&s, StartIndex::Factory), expected);
        assert_eq!(order(&s, StartIndex::Invalid), expected);
    }

    #[test]
    fn absent_roles_skipped() {
        let s = state(false, 3, false);
        assert_eq!(order(&s, StartIndex::Ota(1)), vec![Ota(1), Ota(0), Ota(2)]);
        let s = state(false, 0, true);
        assert_eq!(order(&s, StartIndex::Invalid), vec![Test]);
        let s = state(false, 0, false);
        assert_eq!(order(&s, StartIndex::Invalid), vec![]);
    }

    #[test]
    fn partitions_match_roles() {
        let s = state(true, 2, false);
        for c in SearchOrder::new(&s, StartIndex::Ota(1)) {
            let expected = match c.role {
                Ota(slot) => s.ota_slot(slot),
                Factory => s.factory(),
                Test => s.test(),
            };
            assert_eq!(Some(c.partition), expected);
        }
    }
}

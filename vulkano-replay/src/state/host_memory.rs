use super::MutateError;
use crate::DeviceSize;
use rangemap::RangeSet;
use std::ops::Range;

/// Host addresses handed out for scratch regions start here, far above anything a captured
/// application can have used.
const SCRATCH_BASE: u64 = 0x7000_0000_0000_0000;

/// Host addresses handed out for memory mappings start here.
const MAPPING_BASE: u64 = 0x6000_0000_0000_0000;

const PAGE_SIZE: u64 = 0x1000;

/// The host address space as seen by commands.
///
/// Transforms stage the data that their commands read through pointers in scratch regions.
/// Every region is owned by one allocation tracker, which marks the ranges it has allocated as
/// live. Commands that read from a scratch range that is not live are rejected, so that nothing
/// ever references memory that was already freed.
#[derive(Clone, Debug, Default)]
pub struct HostMemory {
    regions: Vec<ScratchRegion>,
    next_scratch: u64,
    next_mapping: u64,
}

#[derive(Clone, Debug)]
struct ScratchRegion {
    range: Range<u64>,
    live: RangeSet<u64>,
}

impl HostMemory {
    /// Reserves a new scratch region of at least `size` bytes, and returns its address range.
    pub fn reserve_scratch(&mut self, size: DeviceSize) -> Range<u64> {
        let start = SCRATCH_BASE + self.next_scratch;
        let size = size.max(1).next_multiple_of(PAGE_SIZE);
        // Leave a guard page between regions.
        self.next_scratch += size + PAGE_SIZE;

        let range = start..start + size;
        self.regions.push(ScratchRegion {
            range: range.clone(),
            live: RangeSet::new(),
        });

        range
    }

    /// Returns a fresh host address for mapping `size` bytes of device memory.
    pub fn map(&mut self, size: DeviceSize) -> u64 {
        let address = MAPPING_BASE + self.next_mapping;
        self.next_mapping += size.max(1).next_multiple_of(PAGE_SIZE);

        address
    }

    fn region_mut(&mut self, address: u64) -> Option<&mut ScratchRegion> {
        self.regions
            .iter_mut()
            .find(|region| region.range.contains(&address))
    }

    /// Marks a range of a scratch region as allocated.
    pub fn mark_live(&mut self, range: Range<u64>) {
        if let Some(region) = self.region_mut(range.start) {
            region.live.insert(range);
        }
    }

    /// Marks a range of a scratch region as freed.
    pub fn mark_freed(&mut self, range: Range<u64>) {
        if let Some(region) = self.region_mut(range.start) {
            region.live.remove(range);
        }
    }

    /// Returns whether every byte of `range` that lies in a scratch region is live.
    pub fn is_accessible(&self, range: Range<u64>) -> bool {
        if range.is_empty() {
            return true;
        }

        self.regions.iter().all(|region| {
            let start = range.start.max(region.range.start);
            let end = range.end.min(region.range.end);

            start >= end || region.live.gaps(&(start..end)).next().is_none()
        })
    }

    /// Checks that `size` bytes at `address` can be read by a command.
    pub fn check_access(&self, address: u64, size: DeviceSize) -> Result<(), MutateError> {
        let end = address.saturating_add(size);

        if self.is_accessible(address..end) {
            Ok(())
        } else {
            Err(MutateError::FreedScratchMemory { address, size })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HostMemory;

    #[test]
    fn scratch_access() {
        let mut memory = HostMemory::default();
        let region = memory.reserve_scratch(100);
        let other = memory.reserve_scratch(100);
        assert!(region.end < other.start);

        let start = region.start;
        assert!(!memory.is_accessible(start..start + 16));

        memory.mark_live(start..start + 16);
        assert!(memory.is_accessible(start..start + 16));
        assert!(!memory.is_accessible(start..start + 17));
        assert!(memory.check_access(start + 4, 8).is_ok());

        memory.mark_freed(start..start + 16);
        assert!(memory.check_access(start, 16).is_err());

        // Addresses outside of scratch regions belong to the application.
        assert!(memory.is_accessible(0x1000..0x2000));
    }
}

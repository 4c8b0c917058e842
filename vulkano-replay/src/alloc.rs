//! Scratch host memory for the data that synthesized commands read through pointers.
//!
//! A command such as `vkCreateShaderModule` reads its payload through a pointer. When a
//! transform synthesizes such a command, the payload has to live at a host address that the
//! replay target can resolve. An [`AllocationTracker`] owns one scratch region of the host
//! address space and suballocates it. Each allocation is handed out as an [`AllocResult`],
//! which must be freed explicitly once the command referencing it has been written.
//!
//! Every transform owns its own tracker; trackers are never shared.

use crate::{
    memory::HostData,
    state::GlobalState,
    DeviceSize, NonExhaustive,
};
use rangemap::RangeSet;
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    ops::Range,
    sync::Arc,
};

/// Parameters to create a new `AllocationTracker`.
#[derive(Clone, Debug)]
pub struct AllocationTrackerCreateInfo {
    /// The size in bytes of the scratch region that the tracker manages.
    ///
    /// The default value is 16 MiB.
    pub region_size: DeviceSize,

    /// The alignment of every allocation. Must be a power of two.
    ///
    /// The default value is `16`.
    pub alignment: DeviceSize,

    pub _ne: NonExhaustive,
}

impl Default for AllocationTrackerCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            region_size: 16 * 1024 * 1024,
            alignment: 16,
            _ne: NonExhaustive(()),
        }
    }
}

/// Suballocates a scratch region of the host address space.
#[derive(Debug)]
pub struct AllocationTracker {
    region: Range<u64>,
    alignment: DeviceSize,
    free_ranges: RangeSet<u64>,
    live: Vec<Range<u64>>,
    allocated_count: usize,
    freed_count: usize,
}

impl AllocationTracker {
    /// Creates a new `AllocationTracker`, reserving a scratch region in `state`.
    ///
    /// # Panics
    ///
    /// - Panics if `create_info.alignment` is not a power of two.
    pub fn new(state: &mut GlobalState, create_info: AllocationTrackerCreateInfo) -> Self {
        let AllocationTrackerCreateInfo {
            region_size,
            alignment,
            _ne: _,
        } = create_info;

        assert!(alignment.is_power_of_two());

        let region = state.host_memory.reserve_scratch(region_size);
        let mut free_ranges = RangeSet::new();
        free_ranges.insert(region.clone());

        AllocationTracker {
            region,
            alignment,
            free_ranges,
            live: Vec::new(),
            allocated_count: 0,
            freed_count: 0,
        }
    }

    /// Returns the address range of the scratch region.
    #[inline]
    pub fn region(&self) -> Range<u64> {
        self.region.clone()
    }

    /// Allocates space for `data` and stages it there.
    pub fn alloc(
        &mut self,
        state: &mut GlobalState,
        data: &[u8],
    ) -> Result<AllocResult, AllocError> {
        let size = (data.len() as DeviceSize).max(1);

        let start = self
            .free_ranges
            .iter()
            .find_map(|free| {
                let start = free.start.next_multiple_of(self.alignment);

                (start.checked_add(size)? <= free.end).then_some(start)
            })
            .ok_or(AllocError::OutOfScratchMemory {
                requested: size,
                region_size: self.region.end - self.region.start,
            })?;
        let range = start..start + size;

        self.free_ranges.remove(range.clone());
        self.live.push(range.clone());
        self.allocated_count += 1;
        state.host_memory.mark_live(range.clone());

        Ok(AllocResult {
            range,
            data: Arc::from(data),
        })
    }

    /// Frees an allocation made by this tracker.
    ///
    /// The allocation is consumed, so it can't be freed twice. The data stays available to
    /// commands that were already written, but no command written afterwards may reference it.
    pub fn free(&mut self, state: &mut GlobalState, alloc: AllocResult) -> Result<(), AllocError> {
        let index = self
            .live
            .iter()
            .position(|range| *range == alloc.range)
            .ok_or(AllocError::ForeignAllocation {
                address: alloc.range.start,
            })?;

        let range = self.live.swap_remove(index);
        self.free_ranges.insert(range.clone());
        self.freed_count += 1;
        state.host_memory.mark_freed(range);

        Ok(())
    }

    /// Frees every allocation that is still live. Each of them is a leak, and is logged.
    pub fn free_all(&mut self, state: &mut GlobalState) {
        for range in self.live.drain(..) {
            log::warn!(
                "freeing leaked scratch allocation of {} bytes at {:#x}",
                range.end - range.start,
                range.start,
            );
            self.free_ranges.insert(range.clone());
            self.freed_count += 1;
            state.host_memory.mark_freed(range);
        }
    }

    /// Returns the number of allocations that have not been freed.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Returns the number of allocations made so far.
    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Returns the number of allocations freed so far.
    #[inline]
    pub fn freed_count(&self) -> usize {
        self.freed_count
    }
}

/// A live scratch allocation.
#[must_use = "a scratch allocation must be freed with `AllocationTracker::free`"]
#[derive(Debug)]
pub struct AllocResult {
    range: Range<u64>,
    data: Arc<[u8]>,
}

impl AllocResult {
    /// Returns the address of the allocation.
    #[inline]
    pub fn address(&self) -> u64 {
        self.range.start
    }

    /// Returns the data staged in the allocation, in the form that a command references it.
    #[inline]
    pub fn host_data(&self) -> HostData {
        HostData {
            address: self.range.start,
            data: self.data.clone(),
        }
    }

    /// Frees the allocation. Equivalent to `tracker.free(state, self)`.
    #[inline]
    pub fn free(
        self,
        tracker: &mut AllocationTracker,
        state: &mut GlobalState,
    ) -> Result<(), AllocError> {
        tracker.free(state, self)
    }
}

/// Error that can happen when allocating or freeing scratch memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// There is no free range large enough in the scratch region.
    OutOfScratchMemory {
        requested: DeviceSize,
        region_size: DeviceSize,
    },

    /// The allocation was not made by this tracker.
    ForeignAllocation { address: u64 },
}

impl Error for AllocError {}

impl Display for AllocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::OutOfScratchMemory {
                requested,
                region_size,
            } => write!(
                f,
                "cannot allocate {requested} bytes from a scratch region of {region_size} bytes",
            ),
            Self::ForeignAllocation { address } => write!(
                f,
                "the allocation at {address:#x} was not made by this allocation tracker",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AllocError, AllocationTracker, AllocationTrackerCreateInfo};
    use crate::state::GlobalState;

    #[test]
    fn lifecycle() {
        let mut state = GlobalState::new();
        let mut tracker =
            AllocationTracker::new(&mut state, AllocationTrackerCreateInfo::default());

        let a = tracker.alloc(&mut state, &[1, 2, 3]).unwrap();
        let b = tracker.alloc(&mut state, &[4; 40]).unwrap();
        assert_eq!(a.address() % 16, 0);
        assert_eq!(b.address() % 16, 0);
        assert!(b.address() >= a.address() + 3);
        assert_eq!(&*a.host_data().data, &[1, 2, 3]);

        let address = a.address();
        assert!(state.host_memory.check_access(address, 3).is_ok());
        a.free(&mut tracker, &mut state).unwrap();
        assert!(state.host_memory.check_access(address, 3).is_err());

        // The freed range is reused.
        let c = tracker.alloc(&mut state, &[5]).unwrap();
        assert_eq!(c.address(), address);

        assert_eq!(tracker.live_count(), 2);
        tracker.free_all(&mut state);
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(tracker.allocated_count(), 3);
        assert_eq!(tracker.freed_count(), 3);

        // Leaked allocations were released by `free_all`.
        assert!(matches!(
            tracker.free(&mut state, b),
            Err(AllocError::ForeignAllocation { .. }),
        ));
        drop(c);
    }

    #[test]
    fn out_of_memory() {
        let mut state = GlobalState::new();
        let mut tracker = AllocationTracker::new(
            &mut state,
            AllocationTrackerCreateInfo {
                region_size: 0x1000,
                ..Default::default()
            },
        );

        let big = tracker.alloc(&mut state, &[0; 0x800]).unwrap();
        assert!(matches!(
            tracker.alloc(&mut state, &[0; 0x900]),
            Err(AllocError::OutOfScratchMemory { .. }),
        ));
        big.free(&mut tracker, &mut state).unwrap();
        let again = tracker.alloc(&mut state, &[0; 0x900]).unwrap();
        again.free(&mut tracker, &mut state).unwrap();
    }

    #[test]
    fn trackers_are_disjoint() {
        let mut state = GlobalState::new();
        let first = AllocationTracker::new(&mut state, AllocationTrackerCreateInfo::default());
        let second = AllocationTracker::new(&mut state, AllocationTrackerCreateInfo::default());

        assert!(first.region().end <= second.region().start);
    }
}

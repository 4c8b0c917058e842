//! Device memory allocations and host-side data referenced by commands.

use crate::{
    macros::{handles, vulkan_bitflags},
    DeviceSize,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

handles! {
    /// A block of memory allocated from a device memory type.
    DeviceMemory = DeviceMemory;
}

vulkan_bitflags! {
    /// Properties of a memory type.
    MemoryPropertyFlags = MemoryPropertyFlags(u32);

    DEVICE_LOCAL = DEVICE_LOCAL,
    HOST_VISIBLE = HOST_VISIBLE,
    HOST_COHERENT = HOST_COHERENT,
    HOST_CACHED = HOST_CACHED,
    LAZILY_ALLOCATED = LAZILY_ALLOCATED,
}

/// A memory type of a physical device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

/// Parameters to allocate device memory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAllocateInfo {
    pub allocation_size: DeviceSize,
    pub memory_type_index: u32,
}

/// A range of mapped device memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedMemoryRange {
    pub memory: DeviceMemory,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// Host data that a command reads through a pointer argument, together with the address the
/// pointer had.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostData {
    pub address: u64,
    pub data: Arc<[u8]>,
}

impl HostData {
    /// Returns the number of bytes that are read.
    #[inline]
    pub fn len(&self) -> DeviceSize {
        self.data.len() as DeviceSize
    }

    /// Returns whether no bytes are read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

//! Logical devices, their queues, and the properties of the physical device they were created
//! on.
//!
//! A capture records the properties of the physical device that the application ran on. The
//! transforms consult them when they synthesize objects: which memory type to allocate from,
//! whether a queue can execute graphics work, or which depth/stencil formats are supported.

use crate::{
    format::Format,
    macros::{handles, vulkan_bitflags},
    memory::{MemoryPropertyFlags, MemoryType},
};
use serde::{Deserialize, Serialize};

handles! {
    /// A logical device.
    Device = Device;

    /// A queue of a logical device.
    Queue = Queue;
}

vulkan_bitflags! {
    /// Attributes of a queue or queue family.
    QueueFlags = QueueFlags(u32);

    GRAPHICS = GRAPHICS,
    COMPUTE = COMPUTE,
    TRANSFER = TRANSFER,
    SPARSE_BINDING = SPARSE_BINDING,
}

vulkan_bitflags! {
    /// The features supported by images of a format.
    FormatFeatures = FormatFeatureFlags(u32);

    SAMPLED_IMAGE = SAMPLED_IMAGE,
    STORAGE_IMAGE = STORAGE_IMAGE,
    COLOR_ATTACHMENT = COLOR_ATTACHMENT,
    DEPTH_STENCIL_ATTACHMENT = DEPTH_STENCIL_ATTACHMENT,
    BLIT_SRC = BLIT_SRC,
    BLIT_DST = BLIT_DST,
    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
}

/// Properties of a queue family.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFamilyProperties {
    pub queue_flags: QueueFlags,
    pub queue_count: u32,
}

/// The features of a format with optimal tiling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatProperties {
    pub format: Format,
    pub optimal_tiling_features: FormatFeatures,
}

/// Parameters to create a new `Device`, together with the properties of the physical device it
/// is created on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCreateInfo {
    pub queue_families: Vec<QueueFamilyProperties>,
    pub memory_types: Vec<MemoryType>,
    pub format_properties: Vec<FormatProperties>,
}

impl DeviceCreateInfo {
    /// Returns the index of the first memory type that has all of `property_flags`.
    pub fn find_memory_type(&self, property_flags: MemoryPropertyFlags) -> Option<u32> {
        self.memory_types
            .iter()
            .position(|memory_type| memory_type.property_flags.contains(property_flags))
            .map(|index| index as u32)
    }

    /// Returns the features of `format` with optimal tiling.
    pub fn format_features(&self, format: Format) -> FormatFeatures {
        self.format_properties
            .iter()
            .find(|properties| properties.format == format)
            .map_or(FormatFeatures::empty(), |properties| {
                properties.optimal_tiling_features
            })
    }

    /// Returns whether images of `format` support all of `features` with optimal tiling.
    #[inline]
    pub fn supports_format(&self, format: Format, features: FormatFeatures) -> bool {
        self.format_features(format).contains(features)
    }

    /// Returns the flags of a queue family, or empty if the family doesn't exist.
    #[inline]
    pub fn queue_flags(&self, queue_family_index: u32) -> QueueFlags {
        self.queue_families
            .get(queue_family_index as usize)
            .map_or(QueueFlags::empty(), |family| family.queue_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_selection() {
        let create_info = DeviceCreateInfo {
            memory_types: vec![
                MemoryType {
                    property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            create_info.find_memory_type(MemoryPropertyFlags::HOST_VISIBLE),
            Some(1),
        );
        assert_eq!(
            create_info.find_memory_type(MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0),
        );
        assert_eq!(
            create_info.find_memory_type(MemoryPropertyFlags::HOST_CACHED),
            None,
        );
    }
}

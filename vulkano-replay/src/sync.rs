//! Synchronization primitives and barriers.

use crate::{
    buffer::Buffer,
    image::{Image, ImageLayout, ImageSubresourceRange},
    macros::{handles, vulkan_bitflags},
    DeviceSize,
};
use serde::{Deserialize, Serialize};

handles! {
    /// A host-waitable signal of the completion of a queue submission.
    Fence = Fence;

    /// A device-side signal between queue operations.
    Semaphore = Semaphore;
}

vulkan_bitflags! {
    /// A set of stages in a device queue.
    PipelineStages = PipelineStageFlags(u32);

    TOP_OF_PIPE = TOP_OF_PIPE,
    DRAW_INDIRECT = DRAW_INDIRECT,
    VERTEX_INPUT = VERTEX_INPUT,
    VERTEX_SHADER = VERTEX_SHADER,
    FRAGMENT_SHADER = FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS = EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS = LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT = COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER = COMPUTE_SHADER,
    TRANSFER = TRANSFER,
    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,
    HOST = HOST,
    ALL_GRAPHICS = ALL_GRAPHICS,
    ALL_COMMANDS = ALL_COMMANDS,
}

vulkan_bitflags! {
    /// A set of memory access types that are included in a memory dependency.
    AccessFlags = AccessFlags(u32);

    INDIRECT_COMMAND_READ = INDIRECT_COMMAND_READ,
    INDEX_READ = INDEX_READ,
    VERTEX_ATTRIBUTE_READ = VERTEX_ATTRIBUTE_READ,
    UNIFORM_READ = UNIFORM_READ,
    INPUT_ATTACHMENT_READ = INPUT_ATTACHMENT_READ,
    SHADER_READ = SHADER_READ,
    SHADER_WRITE = SHADER_WRITE,
    COLOR_ATTACHMENT_READ = COLOR_ATTACHMENT_READ,
    COLOR_ATTACHMENT_WRITE = COLOR_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_READ = DEPTH_STENCIL_ATTACHMENT_READ,
    DEPTH_STENCIL_ATTACHMENT_WRITE = DEPTH_STENCIL_ATTACHMENT_WRITE,
    TRANSFER_READ = TRANSFER_READ,
    TRANSFER_WRITE = TRANSFER_WRITE,
    HOST_READ = HOST_READ,
    HOST_WRITE = HOST_WRITE,
    MEMORY_READ = MEMORY_READ,
    MEMORY_WRITE = MEMORY_WRITE,
}

/// Parameters to create a new `Fence`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceCreateInfo {
    /// Whether the fence is created in the signaled state.
    pub signaled: bool,
}

/// A global memory barrier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// A memory barrier on a range of a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub buffer: Buffer,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// A memory barrier on a range of an image, optionally performing a layout transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub image: Image,
    pub subresource_range: ImageSubresourceRange,
}

impl ImageMemoryBarrier {
    /// Returns a barrier that transitions `subresource_range` of `image` from `old_layout` to
    /// `new_layout`, making every previous write available to every later access.
    #[inline]
    pub fn transition(
        image: Image,
        subresource_range: ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Self {
        Self {
            src_access: AccessFlags::MEMORY_WRITE,
            dst_access: AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
            old_layout,
            new_layout,
            image,
            subresource_range,
        }
    }
}

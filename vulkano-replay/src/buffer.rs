//! Linear device memory regions.

use crate::{
    image::ImageSubresourceLayers,
    macros::{handles, vulkan_bitflags, vulkan_enum},
    DeviceSize,
};
use serde::{Deserialize, Serialize};

handles! {
    /// A linear array of data, bound to device memory.
    Buffer = Buffer;
}

vulkan_bitflags! {
    /// Describes how a buffer is going to be used.
    BufferUsage = BufferUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    UNIFORM_BUFFER = UNIFORM_BUFFER,
    STORAGE_BUFFER = STORAGE_BUFFER,
    INDEX_BUFFER = INDEX_BUFFER,
    VERTEX_BUFFER = VERTEX_BUFFER,
    INDIRECT_BUFFER = INDIRECT_BUFFER,
}

vulkan_enum! {
    /// The type of the indices in an index buffer.
    IndexType = IndexType(i32);

    U16 = UINT16,
    U32 = UINT32,
}

/// Parameters to create a new `Buffer`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCreateInfo {
    pub size: DeviceSize,
    pub usage: BufferUsage,
}

/// A region of a buffer-to-buffer copy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCopy {
    pub src_offset: DeviceSize,
    pub dst_offset: DeviceSize,
    pub size: DeviceSize,
}

/// A region of a copy between a buffer and an image.
///
/// A `buffer_row_length` or `buffer_image_height` of zero means that the buffer data is tightly
/// packed according to `image_extent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferImageCopy {
    pub buffer_offset: DeviceSize,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: [i32; 3],
    pub image_extent: [u32; 3],
}

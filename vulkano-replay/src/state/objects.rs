use crate::{
    buffer::BufferCreateInfo,
    command_buffer::{
        CommandBuffer, CommandBufferBeginInfo, CommandBufferLevel, CommandPool, RecordedCommand,
    },
    descriptor::{
        DescriptorPool, DescriptorPoolCreateInfo, DescriptorSet, DescriptorSetLayout,
        DescriptorSetLayoutCreateInfo, WriteDescriptorSet,
    },
    device::{Device, DeviceCreateInfo, Queue, QueueFlags},
    image::{
        Image, ImageCreateInfo, ImageLayout, ImageSubresource, ImageSubresourceRange,
        ImageViewCreateInfo,
    },
    memory::{DeviceMemory, MemoryAllocateInfo, MemoryPropertyFlags},
    pipeline::{PipelineCreateInfo, PipelineLayoutCreateInfo},
    render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, RenderPassCreateInfo},
    swapchain::SwapchainCreateInfo,
    DeviceSize,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceObject {
    pub create_info: DeviceCreateInfo,
    pub queues: Vec<Queue>,
}

/// The render pass instance that a queue executed a draw in most recently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawInfo {
    pub framebuffer: Framebuffer,
    pub render_pass: RenderPass,
    pub subpass: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueObject {
    pub device: Device,
    pub queue_family_index: u32,
    pub queue_index: u32,
    pub flags: QueueFlags,
    pub last_draw_info: Option<DrawInfo>,
}

/// A host mapping of device memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMapping {
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub address: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceMemoryObject {
    pub device: Device,
    pub allocate_info: MemoryAllocateInfo,
    pub property_flags: MemoryPropertyFlags,
    pub mapping: Option<MemoryMapping>,
}

/// The memory an image or buffer is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBinding {
    pub memory: DeviceMemory,
    pub offset: DeviceSize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferObject {
    pub device: Device,
    pub create_info: BufferCreateInfo,
    pub memory: Option<MemoryBinding>,
    pub last_bound_queue: Option<Queue>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageObject {
    pub device: Device,
    pub create_info: ImageCreateInfo,
    pub memory: Option<MemoryBinding>,
    pub last_bound_queue: Option<Queue>,
    /// Whether the image is a presentable image owned by a swapchain.
    pub swapchain_owned: bool,
    /// The layout of every subresource, ordered by aspect, then array layer, then mip level.
    layouts: Vec<ImageLayout>,
}

impl ImageObject {
    pub fn new(device: Device, create_info: ImageCreateInfo) -> Self {
        let count = create_info.format.aspects().count()
            * create_info.array_layers
            * create_info.mip_levels;

        ImageObject {
            device,
            layouts: vec![create_info.initial_layout; count as usize],
            create_info,
            memory: None,
            last_bound_queue: None,
            swapchain_owned: false,
        }
    }

    fn layout_index(&self, subresource: ImageSubresource) -> Option<usize> {
        let aspect_index = self
            .create_info
            .format
            .aspects()
            .iter()
            .position(|aspect| aspect == subresource.aspect)?;

        if subresource.array_layer >= self.create_info.array_layers
            || subresource.mip_level >= self.create_info.mip_levels
        {
            return None;
        }

        let layers = self.create_info.array_layers as usize;
        let levels = self.create_info.mip_levels as usize;

        Some(
            (aspect_index * layers + subresource.array_layer as usize) * levels
                + subresource.mip_level as usize,
        )
    }

    /// Returns the tracked layout of a subresource, or `None` if the image has no such
    /// subresource.
    #[inline]
    pub fn layout(&self, subresource: ImageSubresource) -> Option<ImageLayout> {
        self.layout_index(subresource)
            .map(|index| self.layouts[index])
    }

    /// Sets the layout of every subresource of `range` that the image has.
    pub fn set_layout(&mut self, range: &ImageSubresourceRange, layout: ImageLayout) {
        for subresource in range.iter() {
            if let Some(index) = self.layout_index(subresource) {
                self.layouts[index] = layout;
            }
        }
    }

    /// Returns the width and height of the first mip level.
    #[inline]
    pub fn extent_2d(&self) -> [u32; 2] {
        [self.create_info.extent[0], self.create_info.extent[1]]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageViewObject {
    pub device: Device,
    pub create_info: ImageViewCreateInfo,
}

impl ImageViewObject {
    #[inline]
    pub fn image(&self) -> Image {
        self.create_info.image
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderPassObject {
    pub device: Device,
    pub create_info: RenderPassCreateInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FramebufferObject {
    pub device: Device,
    pub create_info: FramebufferCreateInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShaderModuleObject {
    pub device: Device,
    pub code: Arc<[u8]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DescriptorSetLayoutObject {
    pub device: Device,
    pub create_info: DescriptorSetLayoutCreateInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineLayoutObject {
    pub device: Device,
    pub create_info: PipelineLayoutCreateInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DescriptorPoolObject {
    pub device: Device,
    pub create_info: DescriptorPoolCreateInfo,
    pub descriptor_sets: Vec<DescriptorSet>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DescriptorSetObject {
    pub device: Device,
    pub descriptor_pool: DescriptorPool,
    pub layout: DescriptorSetLayout,
    /// The most recent write to each binding.
    pub writes: Vec<WriteDescriptorSet>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineObject {
    pub device: Device,
    pub create_info: PipelineCreateInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandPoolObject {
    pub device: Device,
    pub queue_family_index: u32,
    pub command_buffers: Vec<CommandBuffer>,
}

/// The recording state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Initial,
    Recording,
    Executable,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandBufferObject {
    pub device: Device,
    pub command_pool: CommandPool,
    pub level: CommandBufferLevel,
    pub recording: RecordingState,
    pub begin_info: CommandBufferBeginInfo,
    pub commands: Vec<RecordedCommand>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FenceObject {
    pub device: Device,
    pub signaled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemaphoreObject {
    pub device: Device,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapchainObject {
    pub device: Device,
    pub create_info: SwapchainCreateInfo,
    pub images: Vec<Image>,
}

//! Command pools, command buffers and the commands recorded into them.

use crate::{
    buffer::{Buffer, BufferCopy, BufferImageCopy, IndexType},
    descriptor::DescriptorSet,
    image::{Filter, Image, ImageLayout, ImageSubresourceLayers},
    macros::{handles, vulkan_bitflags, vulkan_enum},
    pipeline::{Pipeline, PipelineBindPoint, PipelineLayout, Scissor, Viewport},
    render_pass::{Framebuffer, RenderPass, RenderPassBeginInfo, SubpassContents},
    sync::{
        BufferMemoryBarrier, ImageMemoryBarrier, MemoryBarrier, PipelineStages, Semaphore,
    },
    DeviceSize,
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

handles! {
    /// A pool from which command buffers are allocated.
    CommandPool = CommandPool;

    /// A recorded sequence of commands.
    CommandBuffer = CommandBuffer;
}

vulkan_enum! {
    /// The level of a command buffer.
    CommandBufferLevel = CommandBufferLevel(i32);

    /// Submitted directly to a queue.
    Primary = PRIMARY,

    /// Executed from a primary command buffer.
    Secondary = SECONDARY,
}

vulkan_bitflags! {
    /// How a command buffer is going to be used.
    CommandBufferUsage = CommandBufferUsageFlags(u32);

    ONE_TIME_SUBMIT = ONE_TIME_SUBMIT,
    RENDER_PASS_CONTINUE = RENDER_PASS_CONTINUE,
    SIMULTANEOUS_USE = SIMULTANEOUS_USE,
}

/// Parameters to create a new `CommandPool`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPoolCreateInfo {
    pub queue_family_index: u32,
}

/// Parameters to allocate command buffers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBufferAllocateInfo {
    pub command_pool: CommandPool,
    pub level: CommandBufferLevel,
    pub command_buffer_count: u32,
}

/// The render pass state a secondary command buffer continues.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBufferInheritanceInfo {
    pub render_pass: RenderPass,
    pub subpass: u32,
    pub framebuffer: Framebuffer,
}

/// Parameters of a `BeginCommandBuffer` command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBufferBeginInfo {
    pub usage: CommandBufferUsage,
    pub inheritance_info: Option<CommandBufferInheritanceInfo>,
}

/// A batch of command buffers submitted to a queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<Semaphore>,
    pub wait_dst_stages: Vec<PipelineStages>,
    pub command_buffers: Vec<CommandBuffer>,
    pub signal_semaphores: Vec<Semaphore>,
}

/// A region of an image-to-image copy or resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: [i32; 3],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: [i32; 3],
    pub extent: [u32; 3],
}

/// A region of an image blit. The offsets are the two corners of the source and destination
/// boxes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offsets: [[i32; 3]; 2],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offsets: [[i32; 3]; 2],
}

/// A command recorded into a command buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordedCommand {
    BeginRenderPass {
        begin_info: RenderPassBeginInfo,
        contents: SubpassContents,
    },
    NextSubpass {
        contents: SubpassContents,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: Pipeline,
    },
    BindDescriptorSets {
        bind_point: PipelineBindPoint,
        layout: PipelineLayout,
        first_set: u32,
        descriptor_sets: Vec<DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<Buffer>,
        offsets: Vec<DeviceSize>,
    },
    BindIndexBuffer {
        buffer: Buffer,
        offset: DeviceSize,
        index_type: IndexType,
    },
    SetViewport {
        first_viewport: u32,
        viewports: Vec<Viewport>,
    },
    SetScissor {
        first_scissor: u32,
        scissors: Vec<Scissor>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: Buffer,
        offset: DeviceSize,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: Buffer,
        offset: DeviceSize,
        draw_count: u32,
        stride: u32,
    },
    Dispatch {
        group_counts: [u32; 3],
    },
    PipelineBarrier {
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        memory_barriers: Vec<MemoryBarrier>,
        buffer_memory_barriers: Vec<BufferMemoryBarrier>,
        image_memory_barriers: Vec<ImageMemoryBarrier>,
    },
    CopyBuffer {
        src_buffer: Buffer,
        dst_buffer: Buffer,
        regions: Vec<BufferCopy>,
    },
    CopyImage {
        src_image: Image,
        src_image_layout: ImageLayout,
        dst_image: Image,
        dst_image_layout: ImageLayout,
        regions: Vec<ImageCopy>,
    },
    BlitImage {
        src_image: Image,
        src_image_layout: ImageLayout,
        dst_image: Image,
        dst_image_layout: ImageLayout,
        regions: Vec<ImageBlit>,
        filter: Filter,
    },
    ResolveImage {
        src_image: Image,
        src_image_layout: ImageLayout,
        dst_image: Image,
        dst_image_layout: ImageLayout,
        regions: Vec<ImageCopy>,
    },
    CopyImageToBuffer {
        src_image: Image,
        src_image_layout: ImageLayout,
        dst_buffer: Buffer,
        regions: Vec<BufferImageCopy>,
    },
    CopyBufferToImage {
        src_buffer: Buffer,
        dst_image: Image,
        dst_image_layout: ImageLayout,
        regions: Vec<BufferImageCopy>,
    },
    ExecuteCommands {
        command_buffers: Vec<CommandBuffer>,
    },
}

impl RecordedCommand {
    /// Returns the name of the Vulkan function that records the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginRenderPass { .. } => "vkCmdBeginRenderPass",
            Self::NextSubpass { .. } => "vkCmdNextSubpass",
            Self::EndRenderPass => "vkCmdEndRenderPass",
            Self::BindPipeline { .. } => "vkCmdBindPipeline",
            Self::BindDescriptorSets { .. } => "vkCmdBindDescriptorSets",
            Self::BindVertexBuffers { .. } => "vkCmdBindVertexBuffers",
            Self::BindIndexBuffer { .. } => "vkCmdBindIndexBuffer",
            Self::SetViewport { .. } => "vkCmdSetViewport",
            Self::SetScissor { .. } => "vkCmdSetScissor",
            Self::Draw { .. } => "vkCmdDraw",
            Self::DrawIndexed { .. } => "vkCmdDrawIndexed",
            Self::DrawIndirect { .. } => "vkCmdDrawIndirect",
            Self::DrawIndexedIndirect { .. } => "vkCmdDrawIndexedIndirect",
            Self::Dispatch { .. } => "vkCmdDispatch",
            Self::PipelineBarrier { .. } => "vkCmdPipelineBarrier",
            Self::CopyBuffer { .. } => "vkCmdCopyBuffer",
            Self::CopyImage { .. } => "vkCmdCopyImage",
            Self::BlitImage { .. } => "vkCmdBlitImage",
            Self::ResolveImage { .. } => "vkCmdResolveImage",
            Self::CopyImageToBuffer { .. } => "vkCmdCopyImageToBuffer",
            Self::CopyBufferToImage { .. } => "vkCmdCopyBufferToImage",
            Self::ExecuteCommands { .. } => "vkCmdExecuteCommands",
        }
    }

    /// Returns whether the command is a draw command.
    #[inline]
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::Draw { .. }
                | Self::DrawIndexed { .. }
                | Self::DrawIndirect { .. }
                | Self::DrawIndexedIndirect { .. },
        )
    }

    /// Returns the images that the command reads or writes directly. Attachments accessed
    /// through a framebuffer are not included.
    pub fn images(&self) -> SmallVec<[Image; 2]> {
        match *self {
            Self::CopyImage {
                src_image,
                dst_image,
                ..
            }
            | Self::BlitImage {
                src_image,
                dst_image,
                ..
            }
            | Self::ResolveImage {
                src_image,
                dst_image,
                ..
            } => SmallVec::from_slice(&[src_image, dst_image]),
            Self::CopyImageToBuffer { src_image, .. } => SmallVec::from_slice(&[src_image]),
            Self::CopyBufferToImage { dst_image, .. } => SmallVec::from_slice(&[dst_image]),
            Self::PipelineBarrier {
                ref image_memory_barriers,
                ..
            } => image_memory_barriers
                .iter()
                .map(|barrier| barrier.image)
                .collect(),
            _ => SmallVec::new(),
        }
    }

    /// Returns the buffers that the command reads or writes directly.
    pub fn buffers(&self) -> SmallVec<[Buffer; 2]> {
        match *self {
            Self::BindVertexBuffers { ref buffers, .. } => buffers.iter().copied().collect(),
            Self::BindIndexBuffer { buffer, .. }
            | Self::DrawIndirect { buffer, .. }
            | Self::DrawIndexedIndirect { buffer, .. } => SmallVec::from_slice(&[buffer]),
            Self::CopyBuffer {
                src_buffer,
                dst_buffer,
                ..
            } => SmallVec::from_slice(&[src_buffer, dst_buffer]),
            Self::CopyImageToBuffer { dst_buffer, .. } => SmallVec::from_slice(&[dst_buffer]),
            Self::CopyBufferToImage { src_buffer, .. } => SmallVec::from_slice(&[src_buffer]),
            Self::PipelineBarrier {
                ref buffer_memory_barriers,
                ..
            } => buffer_memory_barriers
                .iter()
                .map(|barrier| barrier.buffer)
                .collect(),
            _ => SmallVec::new(),
        }
    }
}

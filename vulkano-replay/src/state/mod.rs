//! The replica of the state a driver tracks while executing a command stream.
//!
//! [`GlobalState`] holds one [`ObjectTable`] per object type. Commands are the only way the
//! tables change: a command must be applied with [`Cmd::mutate`] before its effects are visible
//! to later queries. Transforms that create objects of their own do so by writing creation
//! commands, which are applied like any other command.
//!
//! [`Cmd::mutate`]: crate::command::Cmd::mutate

pub use self::{
    host_memory::HostMemory,
    objects::*,
    table::ObjectTable,
};
use crate::{
    buffer::Buffer,
    command_buffer::{CommandBuffer, CommandPool, RecordedCommand},
    descriptor::{DescriptorPool, DescriptorSet, DescriptorSetLayout},
    device::{Device, Queue},
    image::{Image, ImageLayout, ImageSubresource, ImageView},
    memory::DeviceMemory,
    pipeline::{Pipeline, PipelineLayout, ShaderModule},
    render_pass::{Framebuffer, RenderPass, RenderPassBeginInfo},
    swapchain::Swapchain,
    sync::{Fence, Semaphore},
    DeviceSize, Handle,
};
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

mod host_memory;
mod mutate;
mod objects;
mod table;

/// Handles of synthesized objects are handed out from here upwards.
const SYNTHESIZED_HANDLE_BASE: u64 = 0x5eed_0000_0000_0000;

/// The mutable replica of everything the driver tracks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalState {
    pub devices: ObjectTable<Device, DeviceObject>,
    pub queues: ObjectTable<Queue, QueueObject>,
    pub memories: ObjectTable<DeviceMemory, DeviceMemoryObject>,
    pub buffers: ObjectTable<Buffer, BufferObject>,
    pub images: ObjectTable<Image, ImageObject>,
    pub image_views: ObjectTable<ImageView, ImageViewObject>,
    pub render_passes: ObjectTable<RenderPass, RenderPassObject>,
    pub framebuffers: ObjectTable<Framebuffer, FramebufferObject>,
    pub shader_modules: ObjectTable<ShaderModule, ShaderModuleObject>,
    pub descriptor_set_layouts: ObjectTable<DescriptorSetLayout, DescriptorSetLayoutObject>,
    pub pipeline_layouts: ObjectTable<PipelineLayout, PipelineLayoutObject>,
    pub descriptor_pools: ObjectTable<DescriptorPool, DescriptorPoolObject>,
    pub descriptor_sets: ObjectTable<DescriptorSet, DescriptorSetObject>,
    pub pipelines: ObjectTable<Pipeline, PipelineObject>,
    pub command_pools: ObjectTable<CommandPool, CommandPoolObject>,
    pub command_buffers: ObjectTable<CommandBuffer, CommandBufferObject>,
    pub fences: ObjectTable<Fence, FenceObject>,
    pub semaphores: ObjectTable<Semaphore, SemaphoreObject>,
    pub swapchains: ObjectTable<Swapchain, SwapchainObject>,
    #[serde(skip)]
    pub host_memory: HostMemory,
    /// The queue that the most recent `QueueSubmit` was made to.
    pub last_submit_queue: Option<Queue>,
    next_handle: u64,
}

impl GlobalState {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle value that no object of any type uses.
    pub fn new_handle<H: Handle>(&mut self) -> H {
        loop {
            let raw = SYNTHESIZED_HANDLE_BASE + self.next_handle;
            self.next_handle += 1;

            if !self.is_raw_handle_in_use(raw) {
                break H::from_raw(raw);
            }
        }
    }

    fn is_raw_handle_in_use(&self, raw: u64) -> bool {
        self.devices.contains(&Device::from_raw(raw))
            || self.queues.contains(&Queue::from_raw(raw))
            || self.memories.contains(&DeviceMemory::from_raw(raw))
            || self.buffers.contains(&Buffer::from_raw(raw))
            || self.images.contains(&Image::from_raw(raw))
            || self.image_views.contains(&ImageView::from_raw(raw))
            || self.render_passes.contains(&RenderPass::from_raw(raw))
            || self.framebuffers.contains(&Framebuffer::from_raw(raw))
            || self.shader_modules.contains(&ShaderModule::from_raw(raw))
            || self
                .descriptor_set_layouts
                .contains(&DescriptorSetLayout::from_raw(raw))
            || self.pipeline_layouts.contains(&PipelineLayout::from_raw(raw))
            || self.descriptor_pools.contains(&DescriptorPool::from_raw(raw))
            || self.descriptor_sets.contains(&DescriptorSet::from_raw(raw))
            || self.pipelines.contains(&Pipeline::from_raw(raw))
            || self.command_pools.contains(&CommandPool::from_raw(raw))
            || self.command_buffers.contains(&CommandBuffer::from_raw(raw))
            || self.fences.contains(&Fence::from_raw(raw))
            || self.semaphores.contains(&Semaphore::from_raw(raw))
            || self.swapchains.contains(&Swapchain::from_raw(raw))
    }

    /// Returns the layout that a subresource of `image` will be in once the `pending` command
    /// buffers have executed, in order.
    ///
    /// The tracked layout only reflects command buffers that were already submitted. Any
    /// transition recorded in a pending command buffer, either by a barrier or by the end of a
    /// render pass, overrides it; the most recent one wins.
    ///
    /// Returns `None` if the image or the subresource doesn't exist.
    pub fn current_layout(
        &self,
        image: Image,
        subresource: ImageSubresource,
        pending: &[CommandBuffer],
    ) -> Option<ImageLayout> {
        let mut layout = self.images.get(&image)?.layout(subresource)?;
        let mut render_pass = None;

        for &command_buffer in pending {
            self.scan_transitions(
                command_buffer,
                image,
                subresource,
                &mut layout,
                &mut render_pass,
            );
        }

        Some(layout)
    }

    fn scan_transitions(
        &self,
        command_buffer: CommandBuffer,
        image: Image,
        subresource: ImageSubresource,
        layout: &mut ImageLayout,
        render_pass: &mut Option<RenderPassBeginInfo>,
    ) {
        let Some(command_buffer) = self.command_buffers.get(&command_buffer) else {
            return;
        };

        for command in &command_buffer.commands {
            match command {
                RecordedCommand::BeginRenderPass { begin_info, .. } => {
                    *render_pass = Some(begin_info.clone());
                }
                RecordedCommand::EndRenderPass => {
                    if let Some(begin_info) = render_pass.take() {
                        if let Some(final_layout) =
                            self.attachment_final_layout(&begin_info, image, subresource)
                        {
                            *layout = final_layout;
                        }
                    }
                }
                RecordedCommand::PipelineBarrier {
                    image_memory_barriers,
                    ..
                } => {
                    for barrier in image_memory_barriers {
                        if barrier.image == image
                            && barrier.subresource_range.contains(subresource)
                        {
                            *layout = barrier.new_layout;
                        }
                    }
                }
                RecordedCommand::ExecuteCommands { command_buffers } => {
                    for &secondary in command_buffers {
                        self.scan_transitions(secondary, image, subresource, layout, render_pass);
                    }
                }
                _ => {}
            }
        }
    }

    /// Returns the final layout that a render pass instance leaves `subresource` of `image` in,
    /// if the image is one of its attachments.
    fn attachment_final_layout(
        &self,
        begin_info: &RenderPassBeginInfo,
        image: Image,
        subresource: ImageSubresource,
    ) -> Option<ImageLayout> {
        let render_pass = self.render_passes.get(&begin_info.render_pass)?;
        let framebuffer = self.framebuffers.get(&begin_info.framebuffer)?;

        framebuffer
            .create_info
            .attachments
            .iter()
            .zip(&render_pass.create_info.attachments)
            .rev()
            .find_map(|(view, description)| {
                let view = self.image_views.get(view)?;

                (view.image() == image
                    && view.create_info.subresource_range.contains(subresource))
                .then_some(description.final_layout)
            })
    }

    /// Returns the image view bound to attachment `attachment` of `framebuffer`, and the image
    /// it views.
    pub fn framebuffer_attachment(
        &self,
        framebuffer: Framebuffer,
        attachment: u32,
    ) -> Option<(ImageView, Image)> {
        let framebuffer = self.framebuffers.get(&framebuffer)?;
        let view = *framebuffer
            .create_info
            .attachments
            .get(attachment as usize)?;
        let image = self.image_views.get(&view)?.image();

        self.images.contains(&image).then_some((view, image))
    }
}

/// Error that can happen when applying a command to a [`GlobalState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutateError {
    /// The command references an object that doesn't exist.
    UnknownHandle {
        type_name: &'static str,
        handle: u64,
    },

    /// The command creates an object with a handle that is already in use.
    HandleInUse {
        type_name: &'static str,
        handle: u64,
    },

    /// The command requires a command buffer in the recording state.
    NotRecording(CommandBuffer),

    /// The command requires a command buffer in the executable state.
    NotExecutable(CommandBuffer),

    /// The command requires mapped memory.
    NotMapped(DeviceMemory),

    /// The command reads host memory from a scratch range that is not allocated.
    FreedScratchMemory { address: u64, size: DeviceSize },

    /// The arguments of the command are inconsistent with each other.
    InvalidArguments(&'static str),
}

impl MutateError {
    pub(crate) fn unknown<H: Handle>(handle: H) -> Self {
        MutateError::UnknownHandle {
            type_name: H::TYPE_NAME,
            handle: handle.as_raw(),
        }
    }
}

impl Error for MutateError {}

impl Display for MutateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::UnknownHandle { type_name, handle } => {
                write!(f, "cannot find {type_name} {handle:#x}")
            }
            Self::HandleInUse { type_name, handle } => {
                write!(f, "{type_name} handle {handle:#x} is already in use")
            }
            Self::NotRecording(command_buffer) => {
                write!(f, "{command_buffer:?} is not in the recording state")
            }
            Self::NotExecutable(command_buffer) => {
                write!(f, "{command_buffer:?} has not completed recording")
            }
            Self::NotMapped(memory) => write!(f, "{memory:?} is not mapped"),
            Self::FreedScratchMemory { address, size } => write!(
                f,
                "{size} bytes of host memory at {address:#x} are read after being freed",
            ),
            Self::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
        }
    }
}

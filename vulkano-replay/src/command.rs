//! The commands of a capture.
//!
//! [`Cmd`] is a closed sum type over every API call the transforms understand. Each variant
//! carries the arguments of the call as plain values, including the handles of the objects the
//! call creates. Applying a command to a [`GlobalState`] is done with [`Cmd::mutate`].
//!
//! Two variants never come from an application: [`Cmd::Insertion`] marks a point in the stream
//! where a transform may inject work, and [`Cmd::Post`] asks the replay target to send back the
//! contents of host memory. Neither is ever applied to the state or persisted.
//!
//! [`GlobalState`]: crate::state::GlobalState

use crate::{
    buffer::{Buffer, BufferCreateInfo},
    command_buffer::{
        CommandBuffer, CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandPool,
        CommandPoolCreateInfo, RecordedCommand, SubmitInfo,
    },
    descriptor::{
        DescriptorPool, DescriptorPoolCreateInfo, DescriptorSet, DescriptorSetAllocateInfo,
        DescriptorSetLayout, DescriptorSetLayoutCreateInfo, WriteDescriptorSet,
    },
    device::{Device, DeviceCreateInfo, Queue},
    image::{Image, ImageCreateInfo, ImageView, ImageViewCreateInfo},
    memory::{DeviceMemory, HostData, MappedMemoryRange, MemoryAllocateInfo},
    pipeline::{
        ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, Pipeline, PipelineLayout,
        PipelineLayoutCreateInfo, ShaderModule,
    },
    render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, RenderPassCreateInfo},
    sub_cmd_idx::SubCmdIdx,
    swapchain::{PresentInfo, Swapchain, SwapchainCreateInfo},
    sync::{Fence, FenceCreateInfo, Semaphore},
    transform::Promise,
    DeviceSize,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// The position of a command in the stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CmdId(pub u64);

impl CmdId {
    /// The identifier of commands that a transform synthesizes.
    pub const DERIVED: CmdId = CmdId(u64::MAX);

    /// Returns whether the command was synthesized rather than captured.
    #[inline]
    pub const fn is_derived(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Debug for CmdId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.is_derived() {
            write!(f, "CmdId(derived)")
        } else {
            write!(f, "CmdId({})", self.0)
        }
    }
}

impl Display for CmdId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.is_derived() {
            write!(f, "derived")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// An API call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Cmd {
    CreateDevice {
        create_info: DeviceCreateInfo,
        device: Device,
    },
    DestroyDevice {
        device: Device,
    },
    GetDeviceQueue {
        device: Device,
        queue_family_index: u32,
        queue_index: u32,
        queue: Queue,
    },
    DeviceWaitIdle {
        device: Device,
    },
    QueueWaitIdle {
        queue: Queue,
    },

    AllocateMemory {
        device: Device,
        allocate_info: MemoryAllocateInfo,
        memory: DeviceMemory,
    },
    FreeMemory {
        device: Device,
        memory: DeviceMemory,
    },
    /// `address` is the host address the memory is mapped at.
    MapMemory {
        device: Device,
        memory: DeviceMemory,
        offset: DeviceSize,
        size: DeviceSize,
        address: u64,
    },
    UnmapMemory {
        device: Device,
        memory: DeviceMemory,
    },
    InvalidateMappedMemoryRanges {
        device: Device,
        ranges: Vec<MappedMemoryRange>,
    },

    CreateBuffer {
        device: Device,
        create_info: BufferCreateInfo,
        buffer: Buffer,
    },
    DestroyBuffer {
        device: Device,
        buffer: Buffer,
    },
    BindBufferMemory {
        device: Device,
        buffer: Buffer,
        memory: DeviceMemory,
        offset: DeviceSize,
    },
    CreateImage {
        device: Device,
        create_info: ImageCreateInfo,
        image: Image,
    },
    DestroyImage {
        device: Device,
        image: Image,
    },
    BindImageMemory {
        device: Device,
        image: Image,
        memory: DeviceMemory,
        offset: DeviceSize,
    },
    CreateImageView {
        device: Device,
        create_info: ImageViewCreateInfo,
        image_view: ImageView,
    },
    DestroyImageView {
        device: Device,
        image_view: ImageView,
    },

    CreateRenderPass {
        device: Device,
        create_info: RenderPassCreateInfo,
        render_pass: RenderPass,
    },
    DestroyRenderPass {
        device: Device,
        render_pass: RenderPass,
    },
    CreateFramebuffer {
        device: Device,
        create_info: FramebufferCreateInfo,
        framebuffer: Framebuffer,
    },
    DestroyFramebuffer {
        device: Device,
        framebuffer: Framebuffer,
    },

    /// `code` is the SPIR-V code, as read through the `pCode` pointer.
    CreateShaderModule {
        device: Device,
        code: HostData,
        shader_module: ShaderModule,
    },
    DestroyShaderModule {
        device: Device,
        shader_module: ShaderModule,
    },
    CreateDescriptorSetLayout {
        device: Device,
        create_info: DescriptorSetLayoutCreateInfo,
        set_layout: DescriptorSetLayout,
    },
    DestroyDescriptorSetLayout {
        device: Device,
        set_layout: DescriptorSetLayout,
    },
    CreatePipelineLayout {
        device: Device,
        create_info: PipelineLayoutCreateInfo,
        pipeline_layout: PipelineLayout,
    },
    DestroyPipelineLayout {
        device: Device,
        pipeline_layout: PipelineLayout,
    },
    CreateDescriptorPool {
        device: Device,
        create_info: DescriptorPoolCreateInfo,
        descriptor_pool: DescriptorPool,
    },
    DestroyDescriptorPool {
        device: Device,
        descriptor_pool: DescriptorPool,
    },
    AllocateDescriptorSets {
        device: Device,
        allocate_info: DescriptorSetAllocateInfo,
        descriptor_sets: Vec<DescriptorSet>,
    },
    UpdateDescriptorSets {
        device: Device,
        writes: Vec<WriteDescriptorSet>,
    },
    CreateGraphicsPipelines {
        device: Device,
        create_infos: Vec<GraphicsPipelineCreateInfo>,
        pipelines: Vec<Pipeline>,
    },
    CreateComputePipelines {
        device: Device,
        create_infos: Vec<ComputePipelineCreateInfo>,
        pipelines: Vec<Pipeline>,
    },
    DestroyPipeline {
        device: Device,
        pipeline: Pipeline,
    },

    CreateCommandPool {
        device: Device,
        create_info: CommandPoolCreateInfo,
        command_pool: CommandPool,
    },
    DestroyCommandPool {
        device: Device,
        command_pool: CommandPool,
    },
    AllocateCommandBuffers {
        device: Device,
        allocate_info: CommandBufferAllocateInfo,
        command_buffers: Vec<CommandBuffer>,
    },
    FreeCommandBuffers {
        device: Device,
        command_pool: CommandPool,
        command_buffers: Vec<CommandBuffer>,
    },
    BeginCommandBuffer {
        command_buffer: CommandBuffer,
        begin_info: CommandBufferBeginInfo,
    },
    EndCommandBuffer {
        command_buffer: CommandBuffer,
    },
    /// A `vkCmd*` call recording `command` into `command_buffer`.
    Record {
        command_buffer: CommandBuffer,
        command: RecordedCommand,
    },

    CreateFence {
        device: Device,
        create_info: FenceCreateInfo,
        fence: Fence,
    },
    DestroyFence {
        device: Device,
        fence: Fence,
    },
    ResetFences {
        device: Device,
        fences: Vec<Fence>,
    },
    WaitForFences {
        device: Device,
        fences: Vec<Fence>,
        wait_all: bool,
        timeout: u64,
    },
    CreateSemaphore {
        device: Device,
        semaphore: Semaphore,
    },
    DestroySemaphore {
        device: Device,
        semaphore: Semaphore,
    },
    QueueSubmit {
        queue: Queue,
        submits: Vec<SubmitInfo>,
        fence: Fence,
    },

    /// `images` are the images owned by the swapchain.
    CreateSwapchain {
        device: Device,
        create_info: SwapchainCreateInfo,
        swapchain: Swapchain,
        images: Vec<Image>,
    },
    DestroySwapchain {
        device: Device,
        swapchain: Swapchain,
    },
    QueuePresent {
        queue: Queue,
        present_info: PresentInfo,
    },

    #[serde(skip)]
    Insertion(InsertionCommand),
    #[serde(skip)]
    Post(PostCommand),
}

impl Cmd {
    /// Returns the name of the Vulkan function of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateDevice { .. } => "vkCreateDevice",
            Self::DestroyDevice { .. } => "vkDestroyDevice",
            Self::GetDeviceQueue { .. } => "vkGetDeviceQueue",
            Self::DeviceWaitIdle { .. } => "vkDeviceWaitIdle",
            Self::QueueWaitIdle { .. } => "vkQueueWaitIdle",
            Self::AllocateMemory { .. } => "vkAllocateMemory",
            Self::FreeMemory { .. } => "vkFreeMemory",
            Self::MapMemory { .. } => "vkMapMemory",
            Self::UnmapMemory { .. } => "vkUnmapMemory",
            Self::InvalidateMappedMemoryRanges { .. } => "vkInvalidateMappedMemoryRanges",
            Self::CreateBuffer { .. } => "vkCreateBuffer",
            Self::DestroyBuffer { .. } => "vkDestroyBuffer",
            Self::BindBufferMemory { .. } => "vkBindBufferMemory",
            Self::CreateImage { .. } => "vkCreateImage",
            Self::DestroyImage { .. } => "vkDestroyImage",
            Self::BindImageMemory { .. } => "vkBindImageMemory",
            Self::CreateImageView { .. } => "vkCreateImageView",
            Self::DestroyImageView { .. } => "vkDestroyImageView",
            Self::CreateRenderPass { .. } => "vkCreateRenderPass",
            Self::DestroyRenderPass { .. } => "vkDestroyRenderPass",
            Self::CreateFramebuffer { .. } => "vkCreateFramebuffer",
            Self::DestroyFramebuffer { .. } => "vkDestroyFramebuffer",
            Self::CreateShaderModule { .. } => "vkCreateShaderModule",
            Self::DestroyShaderModule { .. } => "vkDestroyShaderModule",
            Self::CreateDescriptorSetLayout { .. } => "vkCreateDescriptorSetLayout",
            Self::DestroyDescriptorSetLayout { .. } => "vkDestroyDescriptorSetLayout",
            Self::CreatePipelineLayout { .. } => "vkCreatePipelineLayout",
            Self::DestroyPipelineLayout { .. } => "vkDestroyPipelineLayout",
            Self::CreateDescriptorPool { .. } => "vkCreateDescriptorPool",
            Self::DestroyDescriptorPool { .. } => "vkDestroyDescriptorPool",
            Self::AllocateDescriptorSets { .. } => "vkAllocateDescriptorSets",
            Self::UpdateDescriptorSets { .. } => "vkUpdateDescriptorSets",
            Self::CreateGraphicsPipelines { .. } => "vkCreateGraphicsPipelines",
            Self::CreateComputePipelines { .. } => "vkCreateComputePipelines",
            Self::DestroyPipeline { .. } => "vkDestroyPipeline",
            Self::CreateCommandPool { .. } => "vkCreateCommandPool",
            Self::DestroyCommandPool { .. } => "vkDestroyCommandPool",
            Self::AllocateCommandBuffers { .. } => "vkAllocateCommandBuffers",
            Self::FreeCommandBuffers { .. } => "vkFreeCommandBuffers",
            Self::BeginCommandBuffer { .. } => "vkBeginCommandBuffer",
            Self::EndCommandBuffer { .. } => "vkEndCommandBuffer",
            Self::Record { command, .. } => command.name(),
            Self::CreateFence { .. } => "vkCreateFence",
            Self::DestroyFence { .. } => "vkDestroyFence",
            Self::ResetFences { .. } => "vkResetFences",
            Self::WaitForFences { .. } => "vkWaitForFences",
            Self::CreateSemaphore { .. } => "vkCreateSemaphore",
            Self::DestroySemaphore { .. } => "vkDestroySemaphore",
            Self::QueueSubmit { .. } => "vkQueueSubmit",
            Self::CreateSwapchain { .. } => "vkCreateSwapchainKHR",
            Self::DestroySwapchain { .. } => "vkDestroySwapchainKHR",
            Self::QueuePresent { .. } => "vkQueuePresentKHR",
            Self::Insertion(_) => "insertion",
            Self::Post(_) => "post",
        }
    }

    /// Returns whether the command is synthetic, and never reaches a driver.
    #[inline]
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Insertion(_) | Self::Post(_))
    }

    /// Returns a `Record` command recording `command` into `command_buffer`.
    #[inline]
    pub fn record(command_buffer: CommandBuffer, command: RecordedCommand) -> Self {
        Self::Record {
            command_buffer,
            command,
        }
    }
}

/// A point in the stream where work may be inserted.
///
/// If `command_buffer` is `Some`, the insertion point lies inside that command buffer, which is
/// being recorded, and inserted work can be recorded into it directly. Otherwise the insertion
/// point lies between two top-level commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertionCommand {
    /// The path of the command after which the insertion happens.
    pub idx: SubCmdIdx,
    pub command_buffer: Option<CommandBuffer>,
    /// The command buffers that precede the insertion point in the same submission, and
    /// have not been executed by the state yet.
    pub pending_command_buffers: Vec<CommandBuffer>,
    pub queue: Queue,
}

/// A request to send back the contents of host memory from the replay target.
#[derive(Clone)]
pub struct PostCommand {
    pub address: u64,
    pub size: DeviceSize,
    pub handler: Promise<Vec<u8>>,
}

impl Debug for PostCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("PostCommand")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

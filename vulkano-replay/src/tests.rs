//! A small device and render setup shared by the unit tests.

use crate::{
    capture::Capture,
    command::{Cmd, CmdId, InsertionCommand},
    command_buffer::{
        CommandBuffer, CommandBufferAllocateInfo, CommandBufferBeginInfo,
        CommandBufferInheritanceInfo, CommandBufferLevel, CommandBufferUsage, CommandPool,
        CommandPoolCreateInfo, RecordedCommand, SubmitInfo,
    },
    device::{
        Device, DeviceCreateInfo, FormatFeatures, FormatProperties, Queue, QueueFamilyProperties,
        QueueFlags,
    },
    format::Format,
    image::{
        Image, ImageCreateInfo, ImageLayout, ImageUsage, ImageView, ImageViewCreateInfo,
        SampleCount,
    },
    memory::{DeviceMemory, MemoryAllocateInfo, MemoryPropertyFlags, MemoryType},
    pipeline::{
        DepthStencilState, GraphicsPipelineCreateInfo, Pipeline, PipelineBindPoint,
        PipelineLayout, PipelineLayoutCreateInfo,
    },
    render_pass::{
        AttachmentDescription, AttachmentReference, ClearValue, Framebuffer,
        FramebufferCreateInfo, LoadOp, RenderPass, RenderPassBeginInfo, RenderPassCreateInfo,
        StoreOp, SubpassContents, SubpassDescription,
    },
    replay::{CommandRecorder, ReplayWriter},
    state::GlobalState,
    sync::Fence,
    transform::{Transform, TransformError, Transformer, Writer},
    Handle,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) const WIDTH: u32 = 256;
pub(crate) const HEIGHT: u32 = 256;

/// A device with a graphics queue, a compute queue, and a render pass drawing into a color and
/// a depth attachment.
///
/// Every command the scene applies goes through `writer`, so the state is always one that the
/// recorded commands produce from an empty state.
pub(crate) struct TestScene {
    pub writer: ReplayWriter<CommandRecorder>,
    pub device: Device,
    /// A queue of family 0, which supports graphics, compute and transfer.
    pub queue: Queue,
    /// A queue of family 1, which supports compute only.
    pub compute_queue: Queue,
    pub command_pool: CommandPool,
    pub color_image: Image,
    pub color_view: ImageView,
    pub depth_image: Image,
    pub depth_view: ImageView,
    pub render_pass: RenderPass,
    pub framebuffer: Framebuffer,
    pub pipeline_layout: PipelineLayout,
    pub pipeline: Pipeline,
    history: Vec<Cmd>,
    next_handle: u64,
}

impl TestScene {
    pub fn new() -> Self {
        Self::with_device_info(Self::default_device_info())
    }

    /// The properties of the physical device the scene is created on.
    pub fn default_device_info() -> DeviceCreateInfo {
        let attachment_features = FormatFeatures::SAMPLED_IMAGE
            | FormatFeatures::TRANSFER_SRC
            | FormatFeatures::TRANSFER_DST;
        let depth_stencil = |format| FormatProperties {
            format,
            optimal_tiling_features: attachment_features
                | FormatFeatures::DEPTH_STENCIL_ATTACHMENT,
        };

        DeviceCreateInfo {
            queue_families: vec![
                QueueFamilyProperties {
                    queue_flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    queue_count: 1,
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::COMPUTE,
                    queue_count: 1,
                },
            ],
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
            format_properties: vec![
                FormatProperties {
                    format: Format::R8G8B8A8_UNORM,
                    optimal_tiling_features: attachment_features
                        | FormatFeatures::COLOR_ATTACHMENT
                        | FormatFeatures::BLIT_SRC
                        | FormatFeatures::BLIT_DST,
                },
                depth_stencil(Format::D32_SFLOAT),
                depth_stencil(Format::D32_SFLOAT_S8_UINT),
                depth_stencil(Format::D24_UNORM_S8_UINT),
                depth_stencil(Format::D16_UNORM_S8_UINT),
            ],
        }
    }

    pub fn with_device_info(device_info: DeviceCreateInfo) -> Self {
        let mut scene = TestScene {
            writer: ReplayWriter::new(GlobalState::new(), CommandRecorder::new()),
            device: Device::NULL,
            queue: Queue::NULL,
            compute_queue: Queue::NULL,
            command_pool: CommandPool::NULL,
            color_image: Image::NULL,
            color_view: ImageView::NULL,
            depth_image: Image::NULL,
            depth_view: ImageView::NULL,
            render_pass: RenderPass::NULL,
            framebuffer: Framebuffer::NULL,
            pipeline_layout: PipelineLayout::NULL,
            pipeline: Pipeline::NULL,
            history: Vec::new(),
            next_handle: 0x1000,
        };

        scene.device = scene.handle();
        scene.apply(Cmd::CreateDevice {
            create_info: device_info,
            device: scene.device,
        });
        scene.queue = scene.handle();
        scene.apply(Cmd::GetDeviceQueue {
            device: scene.device,
            queue_family_index: 0,
            queue_index: 0,
            queue: scene.queue,
        });
        scene.compute_queue = scene.handle();
        scene.apply(Cmd::GetDeviceQueue {
            device: scene.device,
            queue_family_index: 1,
            queue_index: 0,
            queue: scene.compute_queue,
        });
        scene.command_pool = scene.handle();
        scene.apply(Cmd::CreateCommandPool {
            device: scene.device,
            create_info: CommandPoolCreateInfo {
                queue_family_index: 0,
            },
            command_pool: scene.command_pool,
        });

        (scene.color_image, scene.color_view) = scene.create_attachment(
            Format::R8G8B8A8_UNORM,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC,
            SampleCount::Sample1,
        );
        (scene.depth_image, scene.depth_view) = scene.create_attachment(
            Format::D32_SFLOAT,
            ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::TRANSFER_SRC,
            SampleCount::Sample1,
        );
        (scene.render_pass, scene.framebuffer) = scene.create_render_pass(1);

        scene.pipeline_layout = scene.handle();
        scene.apply(Cmd::CreatePipelineLayout {
            device: scene.device,
            create_info: PipelineLayoutCreateInfo::default(),
            pipeline_layout: scene.pipeline_layout,
        });
        scene.pipeline = scene.create_pipeline(scene.render_pass, 0, None);

        scene
    }

    /// Returns a handle that no object of the scene uses.
    pub fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;

        H::from_raw(self.next_handle)
    }

    /// Applies `cmd` to the state, as the next command of the stream.
    pub fn apply(&mut self, cmd: Cmd) -> CmdId {
        let id = CmdId(self.next_id());
        self.writer
            .mutate_and_write(id, cmd.clone())
            .unwrap_or_else(|err| panic!("applying {} failed: {err}", cmd.name()));
        self.history.push(cmd);

        id
    }

    #[inline]
    pub fn state(&self) -> &GlobalState {
        self.writer.state()
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut GlobalState {
        self.writer.state_mut()
    }

    /// Returns every command that reached the writer, including the ones written to it
    /// directly.
    #[inline]
    pub fn recorded(&self) -> &[(CmdId, Cmd)] {
        self.writer.builder().commands()
    }

    /// Returns the id of the next command of the stream.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.history.len() as u64
    }

    /// Returns a chain without transforms, starting from the state of the scene.
    pub fn transformer(&self) -> Transformer<CommandRecorder> {
        Transformer::new(self.state().clone(), CommandRecorder::new())
    }

    /// Returns a capture of the setup of the scene, followed by `cmds`.
    pub fn capture(&self, cmds: &[Cmd]) -> Capture {
        Capture {
            commands: self.history.iter().chain(cmds).cloned().collect(),
            ..Default::default()
        }
    }

    /// Creates a `WIDTH` by `HEIGHT` image bound to device-local memory, and a view of it.
    pub fn create_attachment(
        &mut self,
        format: Format,
        usage: ImageUsage,
        samples: SampleCount,
    ) -> (Image, ImageView) {
        let image = self.handle();
        self.apply(Cmd::CreateImage {
            device: self.device,
            create_info: ImageCreateInfo {
                format,
                extent: [WIDTH, HEIGHT, 1],
                samples,
                usage,
                ..Default::default()
            },
            image,
        });
        let memory: DeviceMemory = self.handle();
        let allocation_size = self.state().images[image].create_info.memory_size();
        self.apply(Cmd::AllocateMemory {
            device: self.device,
            allocate_info: MemoryAllocateInfo {
                allocation_size,
                memory_type_index: 0,
            },
            memory,
        });
        self.apply(Cmd::BindImageMemory {
            device: self.device,
            image,
            memory,
            offset: 0,
        });

        let view = self.handle();
        self.apply(Cmd::CreateImageView {
            device: self.device,
            create_info: ImageViewCreateInfo::whole_2d(image, format),
            image_view: view,
        });

        (image, view)
    }

    /// Creates a render pass with `subpasses` subpasses that all draw into the color and depth
    /// attachments of the scene, and a framebuffer for it.
    pub fn create_render_pass(&mut self, subpasses: u32) -> (RenderPass, Framebuffer) {
        self.create_render_pass_with_depth(subpasses, LoadOp::Clear)
    }

    /// Like `create_render_pass`, with `depth_load_op` for the depth attachment. A loaded depth
    /// attachment starts in the depth/stencil attachment layout.
    pub fn create_render_pass_with_depth(
        &mut self,
        subpasses: u32,
        depth_load_op: LoadOp,
    ) -> (RenderPass, Framebuffer) {
        let depth_initial_layout = match depth_load_op {
            LoadOp::Load => ImageLayout::DepthStencilAttachmentOptimal,
            _ => ImageLayout::Undefined,
        };
        let subpass = SubpassDescription {
            color_attachments: vec![Some(AttachmentReference {
                attachment: 0,
                layout: ImageLayout::ColorAttachmentOptimal,
            })],
            depth_stencil_attachment: Some(AttachmentReference {
                attachment: 1,
                layout: ImageLayout::DepthStencilAttachmentOptimal,
            }),
            ..Default::default()
        };
        let render_pass = self.handle();
        self.apply(Cmd::CreateRenderPass {
            device: self.device,
            create_info: RenderPassCreateInfo {
                attachments: vec![
                    AttachmentDescription {
                        format: Format::R8G8B8A8_UNORM,
                        load_op: LoadOp::Clear,
                        store_op: StoreOp::Store,
                        final_layout: ImageLayout::PresentSrc,
                        ..Default::default()
                    },
                    AttachmentDescription {
                        format: Format::D32_SFLOAT,
                        load_op: depth_load_op,
                        store_op: StoreOp::Store,
                        initial_layout: depth_initial_layout,
                        final_layout: ImageLayout::DepthStencilAttachmentOptimal,
                        ..Default::default()
                    },
                ],
                subpasses: vec![subpass; subpasses as usize],
                dependencies: Vec::new(),
            },
            render_pass,
        });

        let framebuffer = self.handle();
        self.apply(Cmd::CreateFramebuffer {
            device: self.device,
            create_info: FramebufferCreateInfo {
                render_pass,
                attachments: vec![self.color_view, self.depth_view],
                width: WIDTH,
                height: HEIGHT,
                layers: 1,
            },
            framebuffer,
        });

        (render_pass, framebuffer)
    }

    /// Creates a graphics pipeline without shader stages for `subpass` of `render_pass`.
    pub fn create_pipeline(
        &mut self,
        render_pass: RenderPass,
        subpass: u32,
        depth_stencil_state: Option<DepthStencilState>,
    ) -> Pipeline {
        let pipeline = self.handle();
        self.apply(Cmd::CreateGraphicsPipelines {
            device: self.device,
            create_infos: vec![GraphicsPipelineCreateInfo {
                depth_stencil_state,
                layout: self.pipeline_layout,
                render_pass,
                subpass,
                ..Default::default()
            }],
            pipelines: vec![pipeline],
        });

        pipeline
    }

    fn allocate(&mut self, level: CommandBufferLevel) -> CommandBuffer {
        let command_buffer = self.handle();
        self.apply(Cmd::AllocateCommandBuffers {
            device: self.device,
            allocate_info: CommandBufferAllocateInfo {
                command_pool: self.command_pool,
                level,
                command_buffer_count: 1,
            },
            command_buffers: vec![command_buffer],
        });

        command_buffer
    }

    /// Allocates a primary command buffer.
    pub fn allocate_command_buffer(&mut self) -> CommandBuffer {
        self.allocate(CommandBufferLevel::Primary)
    }

    pub fn begin(&mut self, command_buffer: CommandBuffer) {
        self.apply(Cmd::BeginCommandBuffer {
            command_buffer,
            begin_info: CommandBufferBeginInfo::default(),
        });
    }

    fn record_into(&mut self, command_buffer: CommandBuffer, commands: &[RecordedCommand]) {
        for command in commands {
            self.apply(Cmd::record(command_buffer, command.clone()));
        }

        self.apply(Cmd::EndCommandBuffer { command_buffer });
    }

    /// Records `commands` into a new primary command buffer.
    pub fn record(&mut self, commands: &[RecordedCommand]) -> CommandBuffer {
        let command_buffer = self.allocate_command_buffer();
        self.begin(command_buffer);
        self.record_into(command_buffer, commands);

        command_buffer
    }

    /// Records `commands` into a new secondary command buffer that continues the first subpass
    /// of the render pass of the scene.
    pub fn record_secondary(&mut self, commands: &[RecordedCommand]) -> CommandBuffer {
        let command_buffer = self.allocate(CommandBufferLevel::Secondary);
        self.apply(Cmd::BeginCommandBuffer {
            command_buffer,
            begin_info: CommandBufferBeginInfo {
                usage: CommandBufferUsage::RENDER_PASS_CONTINUE,
                inheritance_info: Some(CommandBufferInheritanceInfo {
                    render_pass: self.render_pass,
                    subpass: 0,
                    framebuffer: self.framebuffer,
                }),
            },
        });
        self.record_into(command_buffer, commands);

        command_buffer
    }

    /// Records a command buffer that runs the render pass of the scene with `draws` draws.
    ///
    /// The draws are commands 2 and onward of the command buffer.
    pub fn record_single_subpass(&mut self, draws: usize) -> CommandBuffer {
        let mut commands = vec![
            self.begin_render_pass(self.render_pass, self.framebuffer, SubpassContents::Inline),
            self.bind_pipeline(self.pipeline),
        ];
        commands.extend(std::iter::repeat_n(Self::draw(), draws));
        commands.push(RecordedCommand::EndRenderPass);

        self.record(&commands)
    }

    pub fn begin_render_pass(
        &self,
        render_pass: RenderPass,
        framebuffer: Framebuffer,
        contents: SubpassContents,
    ) -> RecordedCommand {
        RecordedCommand::BeginRenderPass {
            begin_info: RenderPassBeginInfo {
                render_pass,
                framebuffer,
                render_area_offset: [0, 0],
                render_area_extent: [WIDTH, HEIGHT],
                clear_values: vec![
                    ClearValue::Color([0.0; 4]),
                    ClearValue::DepthStencil {
                        depth: 1.0,
                        stencil: 0,
                    },
                ],
            },
            contents,
        }
    }

    pub fn bind_pipeline(&self, pipeline: Pipeline) -> RecordedCommand {
        RecordedCommand::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        }
    }

    /// A draw of a single triangle.
    pub fn draw() -> RecordedCommand {
        RecordedCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }

    /// Returns a submission of `command_buffers` to the graphics queue, without applying it.
    pub fn submit_cmd(&self, command_buffers: &[CommandBuffer]) -> Cmd {
        Cmd::QueueSubmit {
            queue: self.queue,
            submits: vec![SubmitInfo {
                command_buffers: command_buffers.to_vec(),
                ..Default::default()
            }],
            fence: Fence::NULL,
        }
    }

    pub fn submit(&mut self, command_buffers: &[CommandBuffer]) -> CmdId {
        let submit = self.submit_cmd(command_buffers);

        self.apply(submit)
    }
}

/// An insertion point that reached a [`InsertionLog`].
#[derive(Clone, Debug)]
pub(crate) struct Seen {
    pub insertion: InsertionCommand,
    /// The number of commands recorded into the command buffer of the insertion at the time,
    /// or 0 for a top-level insertion.
    pub recorded: usize,
}

/// A transform that forwards everything and remembers the insertion points it saw.
#[derive(Clone, Default)]
pub(crate) struct InsertionLog {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl InsertionLog {
    pub fn insertions(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl Transform for InsertionLog {
    fn name(&self) -> &'static str {
        "insertion log"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        if let Cmd::Insertion(insertion) = &cmd {
            let recorded = insertion
                .command_buffer
                .and_then(|command_buffer| out.state().command_buffers.get(&command_buffer))
                .map_or(0, |command_buffer| command_buffer.commands.len());
            self.seen.lock().push(Seen {
                insertion: insertion.clone(),
                recorded,
            });
        }

        out.mutate_and_write(id, cmd)
    }
}

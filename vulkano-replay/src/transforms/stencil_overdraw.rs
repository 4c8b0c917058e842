//! Counting how many times each pixel of a render pass is drawn to.
//!
//! For a requested point of the stream, the [`StencilOverdraw`] transform rebuilds the command
//! buffer that executes the render pass instance begun last before that point. The rebuilt
//! command buffer renders into a copy of the render pass with an extra depth/stencil attachment,
//! and every graphics pipeline that draws inside the render pass, including one bound before
//! the render pass begins, is replaced by a copy that increments the stencil value of every
//! fragment that passes the depth test. Once the submission has executed, the stencil aspect of
//! the extra attachment is read back: each texel holds the number of fragments drawn to that
//! pixel, clamped at 255.
//!
//! The extra attachment takes over the depth testing of the original depth attachment, if
//! there is one. Its depth is initialized from the original attachment when that one is loaded,
//! and copied back into it when it is stored, so that the rest of the stream sees the same
//! depth data as without the transform. When the two formats don't store depth the same way,
//! the copy renders a fullscreen triangle that writes the depth read from an input attachment,
//! which takes shaders from the [`ShaderCompiler`] the transform is created with.

use super::readback::{record_readback, PendingReadback, ReadbackRequest, ReadbackTarget};
use crate::{
    alloc::{AllocationTracker, AllocationTrackerCreateInfo},
    builder::{CommandBuilder, Teardown},
    capture::Capture,
    command::{Cmd, CmdId},
    command_buffer::{
        CommandBuffer, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsage,
        ImageCopy, RecordedCommand, SubmitInfo,
    },
    descriptor::{
        DescriptorImageInfo, DescriptorPoolCreateInfo, DescriptorPoolSize,
        DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorType,
        WriteDescriptorSet,
    },
    device::{Device, FormatFeatures, Queue},
    format::Format,
    image::{
        Image, ImageAspects, ImageCreateInfo, ImageLayout, ImageSubresource,
        ImageSubresourceLayers, ImageSubresourceRange, ImageUsage, ImageView,
        ImageViewCreateInfo, ImageViewType, SampleCount,
    },
    image_data::ImageData,
    memory::MemoryPropertyFlags,
    pipeline::{
        CompareOp, DepthStencilState, GraphicsPipelineCreateInfo, Pipeline, PipelineBindPoint,
        PipelineCreateInfo, PipelineLayoutCreateInfo, PipelineShaderStage, Scissor,
        ShaderStages, StencilOp, StencilOpState, Viewport, ViewportState,
    },
    render_pass::{
        AttachmentDescription, AttachmentReference, ClearValue, Framebuffer,
        FramebufferCreateInfo, LoadOp, RenderPass, RenderPassBeginInfo, RenderPassCreateInfo,
        StoreOp, SubpassContents, SubpassDescription,
    },
    shader::{BuiltinShader, ShaderCompiler, ShaderError},
    state::GlobalState,
    sub_cmd_idx::SubCmdIdx,
    sync::{Fence, ImageMemoryBarrier, PipelineStages},
    transform::{Promise, RequestError, Transform, TransformError, Writer},
    NonExhaustive,
};
use foldhash::fast::RandomState;
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Error as FmtError, Formatter},
    mem,
    sync::Arc,
};

/// The stencil state of the pipelines that count fragments.
const COUNTING_STENCIL: StencilOpState = StencilOpState {
    fail_op: StencilOp::Keep,
    pass_op: StencilOp::IncrementAndClamp,
    depth_fail_op: StencilOp::Keep,
    compare_op: CompareOp::Always,
    compare_mask: 0xff,
    write_mask: 0xff,
    reference: 0,
};

/// The result of an overdraw request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverdrawImage {
    /// The number of fragments drawn to each pixel, one `S8_UINT` texel per pixel.
    pub image: ImageData,

    /// Whether any pixel reached 255, in which case its count may have been clamped.
    pub saturated: bool,
}

impl OverdrawImage {
    fn new(image: ImageData) -> Self {
        let saturated = image.bytes.contains(&u8::MAX);

        if saturated {
            log::warn!("the overdraw count saturated, some pixels were drawn 255 times or more");
        }

        OverdrawImage { image, saturated }
    }
}

/// Parameters to create a new `StencilOverdraw`.
#[derive(Clone)]
pub struct StencilOverdrawCreateInfo {
    /// Provides the shaders that copy depth between formats that store it differently.
    ///
    /// Without one, a request whose depth has to be copied that way fails with
    /// [`ShaderError::Unavailable`].
    ///
    /// The default value is `None`.
    pub shader_compiler: Option<Arc<dyn ShaderCompiler>>,

    pub _ne: NonExhaustive,
}

impl Default for StencilOverdrawCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            shader_compiler: None,
            _ne: NonExhaustive(()),
        }
    }
}

impl Debug for StencilOverdrawCreateInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("StencilOverdrawCreateInfo")
            .field("shader_compiler", &self.shader_compiler.is_some())
            .finish_non_exhaustive()
    }
}

/// A transform that measures the overdraw of render passes.
pub struct StencilOverdraw {
    shader_compiler: Option<Arc<dyn ShaderCompiler>>,
    requests: BTreeMap<CmdId, Vec<OverdrawRequest>>,
    tracker: Option<AllocationTracker>,
    pending: Vec<PendingOverdraw>,
}

struct OverdrawRequest {
    idx: SubCmdIdx,
    /// The path inside the submission, without the submission itself.
    path: Vec<u64>,
    handler: Promise<OverdrawImage>,
}

struct PendingOverdraw {
    readback: PendingReadback,
    teardown: Teardown,
}

impl StencilOverdraw {
    pub fn new(create_info: StencilOverdrawCreateInfo) -> Self {
        let StencilOverdrawCreateInfo {
            shader_compiler,
            _ne: _,
        } = create_info;

        StencilOverdraw {
            shader_compiler,
            requests: BTreeMap::new(),
            tracker: None,
            pending: Vec::new(),
        }
    }

    /// Requests the overdraw of the render pass that executes last before the command at `idx`
    /// of `capture`, in the same queue submission.
    ///
    /// The request is served by the nearest `QueueSubmit` at or before `idx[0]`. If `idx`
    /// points inside that submission, the rest of the path narrows down the batch, command
    /// buffer and command to search back from; otherwise the last render pass of the
    /// submission is measured. If there is no such submission, `handler` receives
    /// [`RequestError::NoQueueSubmit`] right away.
    ///
    /// Several requests for the same submission are served by a single measurement, of the
    /// render pass that the last of them points to.
    pub fn add(
        &mut self,
        idx: impl Into<SubCmdIdx>,
        capture: &Capture,
        handler: Promise<OverdrawImage>,
    ) {
        let idx = idx.into();
        let submit = idx.as_slice().first().and_then(|&first| {
            let last = usize::try_from(first)
                .unwrap_or(usize::MAX)
                .min(capture.commands.len().checked_sub(1)?);

            capture.commands[..=last]
                .iter()
                .rposition(|cmd| matches!(cmd, Cmd::QueueSubmit { .. }))
        });

        let Some(submit) = submit else {
            log::warn!("no queue submission precedes {idx}");
            handler.fulfill(Err(RequestError::NoQueueSubmit(idx)));

            return;
        };

        let submit = submit as u64;
        let path = if idx[0] == submit {
            idx.as_slice()[1..].to_vec()
        } else {
            Vec::new()
        };

        log::debug!("measuring the overdraw at {idx} in submission {submit}");
        self.requests
            .entry(CmdId(submit))
            .or_default()
            .push(OverdrawRequest { idx, path, handler });
    }

    fn rewrite_submit(
        &mut self,
        id: CmdId,
        queue: Queue,
        submits: Vec<SubmitInfo>,
        fence: Fence,
        requests: Vec<OverdrawRequest>,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        let path = requests
            .last()
            .map(|request| request.path.clone())
            .unwrap_or_default();
        let handler = fan_out(requests.into_iter().map(|request| request.handler).collect());

        let target = match locate(out.state(), &submits, &path)
            .and_then(|location| prepare(out.state(), queue, location))
        {
            Ok(target) => target,
            Err(err) => {
                log::warn!("cannot measure the overdraw of submission {id}: {err}");
                handler.fulfill(Err(err));

                return out.mutate_and_write(id, Cmd::QueueSubmit {
                    queue,
                    submits,
                    fence,
                });
            }
        };

        let mut teardown = Teardown::new();
        let recorded = self.record(&target, &submits, &mut teardown, out);
        let (command_buffer, stencil_image) = match recorded {
            Ok(recorded) => recorded,
            Err(err) => {
                log::warn!("cannot measure the overdraw of submission {id}: {err}");
                handler.fulfill(Err(err));

                if let Err(err) = teardown.unwind(out) {
                    log::warn!("cleaning up a failed overdraw measurement: {err}");
                }

                return out.mutate_and_write(id, Cmd::QueueSubmit {
                    queue,
                    submits,
                    fence,
                });
            }
        };

        let mut new_submits = submits.clone();
        new_submits[target.location.batch].command_buffers[target.location.index] =
            command_buffer;

        if let Err(err) = out.mutate_and_write(id, Cmd::QueueSubmit {
            queue,
            submits: new_submits,
            fence,
        }) {
            log::warn!("the rewritten submission {id} failed: {err}");
            handler.fulfill(Err(err.into()));

            if let Err(err) = teardown.unwind(out) {
                log::warn!("cleaning up a failed overdraw measurement: {err}");
            }

            return out.mutate_and_write(id, Cmd::QueueSubmit {
                queue,
                submits,
                fence,
            });
        }

        let request = ReadbackRequest {
            image: stencil_image,
            subresource: ImageSubresource {
                aspect: ImageAspects::STENCIL,
                array_layer: 0,
                mip_level: 0,
            },
            layout: ImageLayout::DepthStencilAttachmentOptimal,
            width: target.framebuffer.width,
            height: target.framebuffer.height,
        };
        let image_handler = Promise::new(move |result: Result<ImageData, RequestError>| {
            handler.fulfill(result.map(OverdrawImage::new));
        });

        match record_readback(out, ReadbackTarget::Queue(queue), &request, image_handler) {
            Ok(readback) => self.pending.push(PendingOverdraw { readback, teardown }),
            Err((err, image_handler)) => {
                image_handler.fulfill(Err(err));
                out.write(Cmd::QueueWaitIdle { queue })?;
                teardown.unwind(out)?;
            }
        }

        Ok(())
    }

    /// Creates the objects of the measurement and records the command buffer that replaces
    /// the target one. Returns it together with the image that holds the counts.
    fn record(
        &mut self,
        target: &Target,
        submits: &[SubmitInfo],
        teardown: &mut Teardown,
        out: &mut dyn Writer,
    ) -> Result<(CommandBuffer, Image), RequestError> {
        let Target {
            device,
            queue_family_index,
            ref location,
            bound_pipeline,
            ref begin_info,
            ref render_pass,
            ref framebuffer,
            ref depth,
            format,
        } = *target;
        let extent = [framebuffer.width, framebuffer.height];
        let copies_by_rendering = depth.as_ref().is_some_and(|depth| {
            (depth.copy_in() || depth.copy_back()) && !depth.format.same_depth_precision(format)
        });

        let mut builder = CommandBuilder::new(device, teardown);
        let mut usage = ImageUsage::DEPTH_STENCIL_ATTACHMENT
            | ImageUsage::TRANSFER_SRC
            | ImageUsage::TRANSFER_DST;

        if copies_by_rendering {
            usage |= ImageUsage::INPUT_ATTACHMENT;
        }

        let image = builder.create_image(
            out,
            ImageCreateInfo {
                format,
                extent: [extent[0], extent[1], 1],
                usage,
                ..Default::default()
            },
            MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let view = builder.create_image_view(out, ImageViewCreateInfo::whole_2d(image, format))?;
        let new_render_pass =
            builder.create_render_pass(out, overdraw_render_pass_info(render_pass, depth, format))?;
        let mut attachments = framebuffer.attachments.clone();
        attachments.push(view);
        let new_framebuffer = builder.create_framebuffer(
            out,
            FramebufferCreateInfo {
                render_pass: new_render_pass,
                attachments,
                ..framebuffer.clone()
            },
        )?;

        let command_pool = builder.create_command_pool(out, queue_family_index)?;
        let command_buffer =
            builder.allocate_command_buffer(out, command_pool, CommandBufferLevel::Primary)?;
        builder.begin(
            out,
            command_buffer,
            CommandBufferBeginInfo {
                usage: CommandBufferUsage::ONE_TIME_SUBMIT,
                inheritance_info: None,
            },
        )?;

        let commands = out
            .state()
            .command_buffers
            .get(&location.command_buffer)
            .ok_or_else(|| TransformError::missing(location.command_buffer))?
            .commands
            .clone();
        let (before, rest) = commands.split_at(location.begin);
        let end = rest
            .iter()
            .position(|command| matches!(command, RecordedCommand::EndRenderPass));

        let mut recorder = Recorder {
            builder,
            tracker: &mut self.tracker,
            shader_compiler: self.shader_compiler.as_deref(),
            command_buffer,
            render_pass: new_render_pass,
            pipelines: HashMap::default(),
            bound_pipeline,
        };

        for command in before {
            recorder.record(out, command.clone())?;
        }

        let counted = DepthImage {
            image,
            view,
            format,
            layers: ImageSubresourceLayers::first(ImageAspects::DEPTH),
            layout: ImageLayout::DepthStencilAttachmentOptimal,
            final_layout: ImageLayout::DepthStencilAttachmentOptimal,
        };

        if let Some(depth) = depth.as_ref().filter(|depth| depth.copy_in()) {
            // The layout the original attachment is in once everything before the render pass
            // has executed.
            let mut pending: Vec<CommandBuffer> = submits[..location.batch]
                .iter()
                .flat_map(|submit| submit.command_buffers.iter().copied())
                .chain(
                    submits[location.batch].command_buffers[..location.index]
                        .iter()
                        .copied(),
                )
                .collect();
            pending.push(command_buffer);

            let layout = out
                .state()
                .current_layout(depth.image.image, depth.subresource(), &pending)
                .ok_or(RequestError::AttachmentDestroyed)?;
            let src = DepthImage {
                layout,
                final_layout: layout,
                ..depth.image.clone()
            };
            let dst = DepthImage {
                layout: ImageLayout::Undefined,
                ..counted.clone()
            };

            recorder.copy_depth(out, &src, &dst, extent)?;
        }

        let mut clear_values = begin_info.clear_values.clone();
        clear_values.resize(
            framebuffer.attachments.len(),
            ClearValue::Color([0.0; 4]),
        );
        let depth_clear = depth
            .as_ref()
            .and_then(|depth| begin_info.clear_values.get(depth.attachment as usize))
            .and_then(|clear_value| match *clear_value {
                ClearValue::DepthStencil { depth, .. } => Some(depth),
                ClearValue::Color(_) => None,
            })
            .unwrap_or(1.0);
        clear_values.push(ClearValue::DepthStencil {
            depth: depth_clear,
            stencil: 0,
        });

        recorder.record(
            out,
            RecordedCommand::BeginRenderPass {
                begin_info: RenderPassBeginInfo {
                    render_pass: new_render_pass,
                    framebuffer: new_framebuffer,
                    clear_values,
                    ..begin_info.clone()
                },
                contents: SubpassContents::Inline,
            },
        )?;

        if let Some(pipeline) = bound_pipeline {
            recorder.rewrite(
                out,
                &RecordedCommand::BindPipeline {
                    bind_point: PipelineBindPoint::Graphics,
                    pipeline,
                },
            )?;
        }

        let inside = &rest[1..end.unwrap_or(rest.len())];

        for command in inside {
            recorder.rewrite(out, command)?;
        }

        if let Some(end) = end {
            recorder.record(out, RecordedCommand::EndRenderPass)?;

            if let Some(depth) = depth.as_ref().filter(|depth| depth.copy_back()) {
                let layout = depth.description.final_layout;
                let dst = DepthImage {
                    layout,
                    final_layout: layout,
                    ..depth.image.clone()
                };

                recorder.copy_depth(out, &counted, &dst, extent)?;
            }

            let after = &rest[end + 1..];

            // The commands that follow expect the original pipeline.
            if let Some(pipeline) = recorder.bound_pipeline.filter(|_| !after.is_empty()) {
                recorder.record(
                    out,
                    RecordedCommand::BindPipeline {
                        bind_point: PipelineBindPoint::Graphics,
                        pipeline,
                    },
                )?;
            }

            for command in after {
                recorder.record(out, command.clone())?;
            }
        }

        recorder.builder.end(out, command_buffer)?;

        log::debug!(
            "measuring the overdraw of {:?} in {command_buffer:?}, counting in a {format:?} \
            attachment",
            begin_info.render_pass,
        );

        Ok((command_buffer, image))
    }
}

impl Debug for StencilOverdraw {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("StencilOverdraw")
            .field("shader_compiler", &self.shader_compiler.is_some())
            .field("requests", &self.requests.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Returns a promise that delivers its result, success or error, to every one of `handlers`.
fn fan_out(handlers: Vec<Promise<OverdrawImage>>) -> Promise<OverdrawImage> {
    Promise::new(move |result: Result<OverdrawImage, RequestError>| {
        for handler in &handlers {
            handler.fulfill(result.clone());
        }
    })
}

/// Where the measured render pass instance is begun.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Location {
    batch: usize,
    index: usize,
    command_buffer: CommandBuffer,
    /// The position of the `BeginRenderPass` command in the command buffer.
    begin: usize,
}

/// Finds the render pass instance begun last at or before `path`, inside the submission.
fn locate(
    state: &GlobalState,
    submits: &[SubmitInfo],
    path: &[u64],
) -> Result<Location, RequestError> {
    let last_batch = match path.first() {
        Some(&batch) => batch as usize,
        None => submits.len().checked_sub(1).ok_or(RequestError::NoRenderPass)?,
    };

    if last_batch >= submits.len() {
        return Err(RequestError::NoRenderPass);
    }

    for batch in (0..=last_batch).rev() {
        let command_buffers = &submits[batch].command_buffers;
        let index_end = match path.get(1) {
            Some(&index) if batch == last_batch => {
                (index as usize).saturating_add(1).min(command_buffers.len())
            }
            _ => command_buffers.len(),
        };

        for index in (0..index_end).rev() {
            let command_buffer = command_buffers[index];
            let commands = &state
                .command_buffers
                .get(&command_buffer)
                .ok_or(RequestError::CommandBufferNotRecorded)?
                .commands;
            let command_end = match path.get(2) {
                Some(&command) if batch == last_batch && index + 1 == index_end => {
                    (command as usize).saturating_add(1).min(commands.len())
                }
                _ => commands.len(),
            };

            if let Some(begin) = commands[..command_end]
                .iter()
                .rposition(|command| matches!(command, RecordedCommand::BeginRenderPass { .. }))
            {
                return Ok(Location {
                    batch,
                    index,
                    command_buffer,
                    begin,
                });
            }
        }
    }

    Err(RequestError::NoRenderPass)
}

/// Everything the measurement needs to know about the target render pass instance.
struct Target {
    device: Device,
    queue_family_index: u32,
    location: Location,
    /// The graphics pipeline bound when the render pass begins.
    bound_pipeline: Option<Pipeline>,
    begin_info: RenderPassBeginInfo,
    render_pass: RenderPassCreateInfo,
    framebuffer: FramebufferCreateInfo,
    depth: Option<OriginalDepth>,
    /// The format of the counting attachment.
    format: Format,
}

/// The depth attachment of the original render pass.
struct OriginalDepth {
    attachment: u32,
    description: AttachmentDescription,
    format: Format,
    image: DepthImage,
}

impl OriginalDepth {
    fn copy_in(&self) -> bool {
        self.description.load_op == LoadOp::Load
    }

    fn copy_back(&self) -> bool {
        self.description.store_op == StoreOp::Store
    }

    fn subresource(&self) -> ImageSubresource {
        ImageSubresource {
            aspect: ImageAspects::DEPTH,
            array_layer: self.image.layers.array_layers.start,
            mip_level: self.image.layers.mip_level,
        }
    }
}

/// Validates the target and gathers what the measurement needs, before anything is created.
fn prepare(
    state: &GlobalState,
    queue: Queue,
    location: Location,
) -> Result<Target, RequestError> {
    let commands = &state
        .command_buffers
        .get(&location.command_buffer)
        .ok_or(RequestError::CommandBufferNotRecorded)?
        .commands;
    let RecordedCommand::BeginRenderPass { begin_info, .. } = &commands[location.begin] else {
        return Err(RequestError::NoRenderPass);
    };
    let end = commands[location.begin..]
        .iter()
        .position(|command| matches!(command, RecordedCommand::EndRenderPass))
        .map_or(commands.len(), |offset| location.begin + offset);

    // Pipelines stay bound across render pass instances.
    let bound_pipeline = last_graphics_pipeline(&commands[..location.begin]);

    if bound_pipeline.is_some_and(|pipeline| uses_stencil(state, pipeline))
        || binds_stencil_pipeline(state, &commands[location.begin..end])
    {
        return Err(RequestError::StencilInUse);
    }

    let render_pass = &state
        .render_passes
        .get(&begin_info.render_pass)
        .ok_or(RequestError::AttachmentDestroyed)?
        .create_info;
    let framebuffer = &state
        .framebuffers
        .get(&begin_info.framebuffer)
        .ok_or(RequestError::AttachmentDestroyed)?
        .create_info;

    if render_pass
        .attachments
        .iter()
        .any(|attachment| attachment.samples.is_multisampled())
    {
        return Err(RequestError::Multisampled);
    }

    let queue_object = state
        .queues
        .get(&queue)
        .ok_or_else(|| TransformError::missing(queue))?;
    let device_info = &state
        .devices
        .get(&queue_object.device)
        .ok_or_else(|| TransformError::missing(queue_object.device))?
        .create_info;

    let depth = match render_pass
        .subpasses
        .iter()
        .find_map(|subpass| subpass.depth_stencil_attachment)
    {
        Some(reference) => {
            let description = *render_pass
                .attachments
                .get(reference.attachment as usize)
                .ok_or(RequestError::InvalidAttachment { index: None })?;
            let (view, image) = state
                .framebuffer_attachment(begin_info.framebuffer, reference.attachment)
                .ok_or(RequestError::AttachmentDestroyed)?;
            let view_range = &state.image_views[view].create_info.subresource_range;

            Some(OriginalDepth {
                attachment: reference.attachment,
                description,
                format: description.format,
                image: DepthImage {
                    image,
                    view,
                    format: description.format,
                    layers: ImageSubresourceLayers {
                        aspects: ImageAspects::DEPTH,
                        mip_level: view_range.mip_levels.start,
                        array_layers: view_range.array_layers.start
                            ..view_range.array_layers.start + 1,
                    },
                    layout: description.initial_layout,
                    final_layout: description.final_layout,
                },
            })
        }
        None => None,
    };

    let preference = depth_stencil_preference(depth.as_ref().map(|depth| depth.format));
    let format = preference
        .iter()
        .copied()
        .find(|&format| {
            device_info.supports_format(format, FormatFeatures::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RequestError::NoDepthStencilFormat)?;

    if format != preference[0] {
        log::warn!(
            "{:?} is not supported, counting overdraw in {format:?} instead",
            preference[0],
        );
    }

    Ok(Target {
        device: queue_object.device,
        queue_family_index: queue_object.queue_family_index,
        location,
        bound_pipeline,
        begin_info: begin_info.clone(),
        render_pass: render_pass.clone(),
        framebuffer: framebuffer.clone(),
        depth,
        format,
    })
}

/// Returns the graphics pipeline that the last graphics `BindPipeline` of `commands` binds.
fn last_graphics_pipeline(commands: &[RecordedCommand]) -> Option<Pipeline> {
    commands.iter().rev().find_map(|command| match *command {
        RecordedCommand::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        } => Some(pipeline),
        _ => None,
    })
}

fn uses_stencil(state: &GlobalState, pipeline: Pipeline) -> bool {
    state
        .pipelines
        .get(&pipeline)
        .and_then(|pipeline| pipeline.create_info.as_graphics())
        .and_then(|create_info| create_info.depth_stencil_state)
        .is_some_and(|depth_stencil| depth_stencil.stencil_test_enable)
}

/// Returns whether any graphics pipeline bound by `commands`, or by the secondary command
/// buffers they execute, uses the stencil test.
fn binds_stencil_pipeline(state: &GlobalState, commands: &[RecordedCommand]) -> bool {
    commands.iter().any(|command| match *command {
        RecordedCommand::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        } => uses_stencil(state, pipeline),
        RecordedCommand::ExecuteCommands {
            ref command_buffers,
        } => command_buffers.iter().any(|secondary| {
            state
                .command_buffers
                .get(secondary)
                .is_some_and(|secondary| binds_stencil_pipeline(state, &secondary.commands))
        }),
        _ => false,
    })
}

/// Returns the combined depth/stencil formats to count in, most preferred first.
///
/// Formats that store depth like `depth_format` come first, then those with more depth bits,
/// then those with fewer.
fn depth_stencil_preference(depth_format: Option<Format>) -> Vec<Format> {
    let mut formats = Format::DEPTH_STENCIL_FORMATS.to_vec();

    let Some(depth_format) = depth_format.filter(|format| format.depth_bits() != 0) else {
        return formats;
    };

    let depth_bits = depth_format.depth_bits();
    formats.sort_by_key(|format| {
        let bits = format.depth_bits();

        if format.same_depth_precision(depth_format) {
            (0, 0)
        } else if bits > depth_bits {
            (1, bits)
        } else {
            (2, u32::MAX - bits)
        }
    });

    formats
}

/// Returns the render pass that counts fragments in an extra attachment, appended after the
/// attachments of `original`.
fn overdraw_render_pass_info(
    original: &RenderPassCreateInfo,
    depth: &Option<OriginalDepth>,
    format: Format,
) -> RenderPassCreateInfo {
    let attachment = original.attachments.len() as u32;
    let (load_op, store_op, initial_layout) = match depth {
        Some(depth) => (
            depth.description.load_op,
            depth.description.store_op,
            if depth.copy_in() {
                ImageLayout::DepthStencilAttachmentOptimal
            } else {
                ImageLayout::Undefined
            },
        ),
        None => (LoadOp::Clear, StoreOp::DontCare, ImageLayout::Undefined),
    };

    let mut attachments = original.attachments.clone();
    attachments.push(AttachmentDescription {
        format,
        samples: SampleCount::Sample1,
        load_op,
        store_op,
        stencil_load_op: LoadOp::Clear,
        stencil_store_op: StoreOp::Store,
        initial_layout,
        final_layout: ImageLayout::DepthStencilAttachmentOptimal,
    });

    let subpasses = original
        .subpasses
        .iter()
        .map(|subpass| SubpassDescription {
            depth_stencil_attachment: Some(AttachmentReference {
                attachment,
                layout: ImageLayout::DepthStencilAttachmentOptimal,
            }),
            ..subpass.clone()
        })
        .collect();

    RenderPassCreateInfo {
        attachments,
        subpasses,
        dependencies: original.dependencies.clone(),
    }
}

/// One end of a depth copy.
#[derive(Clone, Debug)]
struct DepthImage {
    image: Image,
    /// A view of every aspect, usable as a depth/stencil attachment.
    view: ImageView,
    format: Format,
    /// The depth aspect of the subresource that is copied.
    layers: ImageSubresourceLayers,
    /// The layout the subresource is in before the copy.
    layout: ImageLayout,
    /// The layout the subresource is left in after the copy.
    final_layout: ImageLayout,
}

impl DepthImage {
    /// Every aspect of the copied subresource. Depth/stencil images are transitioned as a
    /// whole.
    fn range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.format.aspects(),
            ..ImageSubresourceRange::from(self.layers.clone())
        }
    }

    /// Returns the barrier that moves the subresource back to `final_layout` from `layout`,
    /// unless it didn't hold anything before the copy.
    fn restore(&self, layout: ImageLayout) -> Option<ImageMemoryBarrier> {
        let held_data = !matches!(
            self.layout,
            ImageLayout::Undefined | ImageLayout::Preinitialized,
        );

        held_data.then(|| {
            ImageMemoryBarrier::transition(self.image, self.range(), layout, self.final_layout)
        })
    }
}

/// Records the command buffer that replaces the target one.
struct Recorder<'a> {
    builder: CommandBuilder<'a>,
    tracker: &'a mut Option<AllocationTracker>,
    shader_compiler: Option<&'a dyn ShaderCompiler>,
    command_buffer: CommandBuffer,
    /// The counting render pass.
    render_pass: RenderPass,
    pipelines: HashMap<Pipeline, Pipeline, RandomState>,
    /// The original graphics pipeline that the recorded commands have bound last.
    bound_pipeline: Option<Pipeline>,
}

impl Recorder<'_> {
    fn record(
        &mut self,
        out: &mut dyn Writer,
        command: RecordedCommand,
    ) -> Result<(), TransformError> {
        self.builder.record(out, self.command_buffer, command)
    }

    /// Records a command of the render pass instance, inlining secondary command buffers.
    fn rewrite(
        &mut self,
        out: &mut dyn Writer,
        command: &RecordedCommand,
    ) -> Result<(), TransformError> {
        match command {
            &RecordedCommand::BindPipeline {
                bind_point: PipelineBindPoint::Graphics,
                pipeline,
            } => {
                self.bound_pipeline = Some(pipeline);
                let pipeline = self.counting_pipeline(out, pipeline)?;

                self.record(
                    out,
                    RecordedCommand::BindPipeline {
                        bind_point: PipelineBindPoint::Graphics,
                        pipeline,
                    },
                )
            }
            RecordedCommand::NextSubpass { .. } => self.record(
                out,
                RecordedCommand::NextSubpass {
                    contents: SubpassContents::Inline,
                },
            ),
            RecordedCommand::ExecuteCommands { command_buffers } => {
                for &secondary in command_buffers {
                    let commands = out
                        .state()
                        .command_buffers
                        .get(&secondary)
                        .ok_or_else(|| TransformError::missing(secondary))?
                        .commands
                        .clone();

                    for command in &commands {
                        self.rewrite(out, command)?;
                    }
                }

                Ok(())
            }
            command => self.record(out, command.clone()),
        }
    }

    /// Returns a copy of a graphics pipeline that counts fragments in the counting render pass.
    fn counting_pipeline(
        &mut self,
        out: &mut dyn Writer,
        pipeline: Pipeline,
    ) -> Result<Pipeline, TransformError> {
        if let Some(&counting) = self.pipelines.get(&pipeline) {
            return Ok(counting);
        }

        let pipeline_object = out
            .state()
            .pipelines
            .get(&pipeline)
            .ok_or_else(|| TransformError::missing(pipeline))?;
        let PipelineCreateInfo::Graphics(create_info) = &pipeline_object.create_info else {
            return Ok(pipeline);
        };

        let mut create_info = GraphicsPipelineCreateInfo {
            render_pass: self.render_pass,
            ..create_info.clone()
        };
        create_info.depth_stencil_state = Some(DepthStencilState {
            stencil_test_enable: true,
            front: COUNTING_STENCIL,
            back: COUNTING_STENCIL,
            ..create_info.depth_stencil_state.unwrap_or_default()
        });
        create_info
            .dynamic_states
            .retain(|dynamic_state| !dynamic_state.is_stencil());

        let counting = self.builder.create_graphics_pipeline(out, create_info)?;
        self.pipelines.insert(pipeline, counting);

        Ok(counting)
    }

    /// Copies the depth of `src` into `dst`.
    fn copy_depth(
        &mut self,
        out: &mut dyn Writer,
        src: &DepthImage,
        dst: &DepthImage,
        extent: [u32; 2],
    ) -> Result<(), RequestError> {
        if src.format.same_depth_precision(dst.format) {
            self.copy_depth_image(out, src, dst, extent)?;
        } else {
            self.render_depth(out, src, dst, extent)?;
        }

        Ok(())
    }

    fn copy_depth_image(
        &mut self,
        out: &mut dyn Writer,
        src: &DepthImage,
        dst: &DepthImage,
        extent: [u32; 2],
    ) -> Result<(), TransformError> {
        self.record(
            out,
            RecordedCommand::PipelineBarrier {
                src_stages: PipelineStages::ALL_COMMANDS,
                dst_stages: PipelineStages::TRANSFER,
                memory_barriers: Vec::new(),
                buffer_memory_barriers: Vec::new(),
                image_memory_barriers: vec![
                    ImageMemoryBarrier::transition(
                        src.image,
                        src.range(),
                        src.layout,
                        ImageLayout::TransferSrcOptimal,
                    ),
                    ImageMemoryBarrier::transition(
                        dst.image,
                        dst.range(),
                        dst.layout,
                        ImageLayout::TransferDstOptimal,
                    ),
                ],
            },
        )?;
        self.record(
            out,
            RecordedCommand::CopyImage {
                src_image: src.image,
                src_image_layout: ImageLayout::TransferSrcOptimal,
                dst_image: dst.image,
                dst_image_layout: ImageLayout::TransferDstOptimal,
                regions: vec![ImageCopy {
                    src_subresource: src.layers.clone(),
                    src_offset: [0; 3],
                    dst_subresource: dst.layers.clone(),
                    dst_offset: [0; 3],
                    extent: [extent[0], extent[1], 1],
                }],
            },
        )?;

        let image_memory_barriers = src
            .restore(ImageLayout::TransferSrcOptimal)
            .into_iter()
            .chain(Some(ImageMemoryBarrier::transition(
                dst.image,
                dst.range(),
                ImageLayout::TransferDstOptimal,
                dst.final_layout,
            )))
            .collect();

        self.record(
            out,
            RecordedCommand::PipelineBarrier {
                src_stages: PipelineStages::TRANSFER,
                dst_stages: PipelineStages::ALL_COMMANDS,
                memory_barriers: Vec::new(),
                buffer_memory_barriers: Vec::new(),
                image_memory_barriers,
            },
        )
    }

    /// Copies depth between formats that store it differently, by drawing a fullscreen
    /// triangle that writes the depth it reads from `src` as an input attachment.
    fn render_depth(
        &mut self,
        out: &mut dyn Writer,
        src: &DepthImage,
        dst: &DepthImage,
        extent: [u32; 2],
    ) -> Result<(), TransformError> {
        let compiler = self
            .shader_compiler
            .ok_or(ShaderError::Unavailable(BuiltinShader::CopyDepthFragment))?;
        let vertex_code = compiler.compile(BuiltinShader::FullscreenVertex)?;
        let fragment_code = compiler.compile(BuiltinShader::CopyDepthFragment)?;

        let tracker = self.tracker.get_or_insert_with(|| {
            AllocationTracker::new(out.state_mut(), AllocationTrackerCreateInfo::default())
        });
        let vertex_module = self
            .builder
            .create_shader_module(out, tracker, &vertex_code)?;
        let fragment_module = self
            .builder
            .create_shader_module(out, tracker, &fragment_code)?;

        let builder = &mut self.builder;
        let set_layout = builder.create_descriptor_set_layout(
            out,
            DescriptorSetLayoutCreateInfo {
                bindings: vec![DescriptorSetLayoutBinding {
                    binding: 0,
                    descriptor_type: DescriptorType::InputAttachment,
                    descriptor_count: 1,
                    stages: ShaderStages::FRAGMENT,
                }],
            },
        )?;
        let pipeline_layout = builder.create_pipeline_layout(
            out,
            PipelineLayoutCreateInfo {
                set_layouts: vec![set_layout],
                push_constant_ranges: Vec::new(),
            },
        )?;
        let descriptor_pool = builder.create_descriptor_pool(
            out,
            DescriptorPoolCreateInfo {
                max_sets: 1,
                pool_sizes: vec![DescriptorPoolSize {
                    descriptor_type: DescriptorType::InputAttachment,
                    descriptor_count: 1,
                }],
            },
        )?;
        let descriptor_set = builder.allocate_descriptor_set(out, descriptor_pool, set_layout)?;

        // Input attachments can only read one aspect.
        let src_view = builder.create_image_view(
            out,
            ImageViewCreateInfo {
                image: src.image,
                view_type: ImageViewType::Dim2d,
                format: src.format,
                subresource_range: src.layers.clone().into(),
            },
        )?;
        builder.update_descriptor_sets(
            out,
            vec![WriteDescriptorSet {
                dst_set: descriptor_set,
                dst_binding: 0,
                dst_array_element: 0,
                descriptor_type: DescriptorType::InputAttachment,
                image_info: vec![DescriptorImageInfo {
                    image_view: src_view,
                    image_layout: ImageLayout::ShaderReadOnlyOptimal,
                }],
                buffer_info: Vec::new(),
            }],
        )?;

        let render_pass = builder.create_render_pass(
            out,
            RenderPassCreateInfo {
                attachments: vec![
                    AttachmentDescription {
                        format: src.format,
                        samples: SampleCount::Sample1,
                        load_op: LoadOp::Load,
                        store_op: StoreOp::Store,
                        stencil_load_op: LoadOp::Load,
                        stencil_store_op: StoreOp::Store,
                        initial_layout: ImageLayout::ShaderReadOnlyOptimal,
                        final_layout: ImageLayout::ShaderReadOnlyOptimal,
                    },
                    AttachmentDescription {
                        format: dst.format,
                        samples: SampleCount::Sample1,
                        load_op: LoadOp::DontCare,
                        store_op: StoreOp::Store,
                        stencil_load_op: LoadOp::Load,
                        stencil_store_op: StoreOp::Store,
                        initial_layout: dst.layout,
                        final_layout: dst.final_layout,
                    },
                ],
                subpasses: vec![SubpassDescription {
                    input_attachments: vec![Some(AttachmentReference {
                        attachment: 0,
                        layout: ImageLayout::ShaderReadOnlyOptimal,
                    })],
                    depth_stencil_attachment: Some(AttachmentReference {
                        attachment: 1,
                        layout: ImageLayout::DepthStencilAttachmentOptimal,
                    }),
                    ..Default::default()
                }],
                dependencies: Vec::new(),
            },
        )?;
        let framebuffer: Framebuffer = builder.create_framebuffer(
            out,
            FramebufferCreateInfo {
                render_pass,
                attachments: vec![src_view, dst.view],
                width: extent[0],
                height: extent[1],
                layers: 1,
            },
        )?;
        let pipeline = builder.create_graphics_pipeline(
            out,
            GraphicsPipelineCreateInfo {
                stages: vec![
                    PipelineShaderStage::main(ShaderStages::VERTEX, vertex_module),
                    PipelineShaderStage::main(ShaderStages::FRAGMENT, fragment_module),
                ],
                viewport_state: ViewportState {
                    viewports: vec![Viewport {
                        offset: [0.0; 2],
                        extent: [extent[0] as f32, extent[1] as f32],
                        depth_range: [0.0, 1.0],
                    }],
                    scissors: vec![Scissor {
                        offset: [0; 2],
                        extent,
                    }],
                },
                depth_stencil_state: Some(DepthStencilState {
                    depth_test_enable: true,
                    depth_write_enable: true,
                    depth_compare_op: CompareOp::Always,
                    ..Default::default()
                }),
                layout: pipeline_layout,
                render_pass,
                subpass: 0,
                ..Default::default()
            },
        )?;

        self.record(
            out,
            RecordedCommand::PipelineBarrier {
                src_stages: PipelineStages::ALL_COMMANDS,
                dst_stages: PipelineStages::FRAGMENT_SHADER,
                memory_barriers: Vec::new(),
                buffer_memory_barriers: Vec::new(),
                image_memory_barriers: vec![ImageMemoryBarrier::transition(
                    src.image,
                    src.range(),
                    src.layout,
                    ImageLayout::ShaderReadOnlyOptimal,
                )],
            },
        )?;
        self.record(
            out,
            RecordedCommand::BeginRenderPass {
                begin_info: RenderPassBeginInfo {
                    render_pass,
                    framebuffer,
                    render_area_offset: [0; 2],
                    render_area_extent: extent,
                    clear_values: Vec::new(),
                },
                contents: SubpassContents::Inline,
            },
        )?;
        self.record(
            out,
            RecordedCommand::BindPipeline {
                bind_point: PipelineBindPoint::Graphics,
                pipeline,
            },
        )?;
        self.record(
            out,
            RecordedCommand::BindDescriptorSets {
                bind_point: PipelineBindPoint::Graphics,
                layout: pipeline_layout,
                first_set: 0,
                descriptor_sets: vec![descriptor_set],
                dynamic_offsets: Vec::new(),
            },
        )?;
        self.record(
            out,
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
        )?;
        self.record(out, RecordedCommand::EndRenderPass)?;

        if let Some(barrier) = src.restore(ImageLayout::ShaderReadOnlyOptimal) {
            self.record(
                out,
                RecordedCommand::PipelineBarrier {
                    src_stages: PipelineStages::FRAGMENT_SHADER,
                    dst_stages: PipelineStages::ALL_COMMANDS,
                    memory_barriers: Vec::new(),
                    buffer_memory_barriers: Vec::new(),
                    image_memory_barriers: vec![barrier],
                },
            )?;
        }

        Ok(())
    }
}

impl Transform for StencilOverdraw {
    fn name(&self) -> &'static str {
        "stencil overdraw"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        if id.is_derived() {
            return out.mutate_and_write(id, cmd);
        }

        let Some(requests) = self.requests.remove(&id) else {
            return out.mutate_and_write(id, cmd);
        };

        match cmd {
            Cmd::QueueSubmit {
                queue,
                submits,
                fence,
            } => self.rewrite_submit(id, queue, submits, fence, requests, out),
            cmd => {
                for request in requests {
                    request
                        .handler
                        .fulfill(Err(RequestError::NoQueueSubmit(request.idx)));
                }

                out.mutate_and_write(id, cmd)
            }
        }
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        for (_, requests) in mem::take(&mut self.requests) {
            for request in requests {
                request
                    .handler
                    .fulfill(Err(RequestError::CommandNotFound(request.idx)));
            }
        }

        let pending = mem::take(&mut self.pending);
        let mut devices: Vec<Device> = Vec::new();

        for pending in &pending {
            if !devices.contains(&pending.readback.device()) {
                devices.push(pending.readback.device());
            }
        }

        let mut result = Ok(());

        for device in devices {
            if let Err(err) = out.write(Cmd::DeviceWaitIdle { device }) {
                result = result.and(Err(err));
            }
        }

        for PendingOverdraw {
            readback,
            mut teardown,
        } in pending
        {
            if let Err(err) = readback.finish(out) {
                result = result.and(Err(err));
            }

            if let Err(err) = teardown.unwind(out) {
                result = result.and(Err(err));
            }
        }

        if let Some(tracker) = &mut self.tracker {
            tracker.free_all(out.state_mut());
        }

        result
    }
}

//! Reading back one subresource of an image.
//!
//! [`record_readback`] records the commands that copy an image subresource into a host-visible
//! buffer, going through a resolve and a blit when needed. The contents only reach the host
//! later, once the replay target has executed the commands: [`PendingReadback::finish`] maps
//! the buffer, posts its contents and destroys everything that was created for the read. The
//! framebuffer reader and the overdraw transform both finish their reads when they are flushed.

use crate::{
    buffer::{BufferCreateInfo, BufferImageCopy, BufferUsage},
    builder::{CommandBuilder, Teardown},
    command::{Cmd, PostCommand},
    command_buffer::{
        CommandBuffer, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsage, ImageBlit,
        ImageCopy, RecordedCommand, SubmitInfo,
    },
    device::{Device, Queue, QueueFlags},
    format::Format,
    image::{
        Filter, Image, ImageAspects, ImageCreateInfo, ImageLayout, ImageSubresource,
        ImageSubresourceLayers, ImageSubresourceRange, ImageUsage, SampleCount,
    },
    image_data::ImageData,
    memory::{DeviceMemory, MappedMemoryRange, MemoryPropertyFlags},
    replay::ReplayError,
    sync::{AccessFlags, BufferMemoryBarrier, Fence, ImageMemoryBarrier, PipelineStages},
    transform::{Promise, RequestError, TransformError, Writer},
    DeviceSize,
};

/// Where the commands of a read are recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadbackTarget {
    /// Record into a command buffer that is being recorded, and that is submitted to `queue`.
    CommandBuffer {
        command_buffer: CommandBuffer,
        queue: Queue,
    },

    /// Record into a dedicated command buffer, submit it to the queue and wait for it.
    Queue(Queue),
}

impl ReadbackTarget {
    #[inline]
    pub fn queue(self) -> Queue {
        match self {
            Self::CommandBuffer { queue, .. } | Self::Queue(queue) => queue,
        }
    }
}

/// The subresource to read back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadbackRequest {
    pub image: Image,

    /// Must name a single aspect.
    pub subresource: ImageSubresource,

    /// The layout the subresource is in when the read executes. It is put back in this layout
    /// afterwards.
    pub layout: ImageLayout,

    /// The size of the image that is delivered. The subresource is scaled if this differs from
    /// its own size.
    pub width: u32,
    pub height: u32,
}

/// A read whose commands are recorded, and whose result is not delivered yet.
#[derive(Debug)]
pub struct PendingReadback {
    device: Device,
    teardown: Teardown,
    memory: DeviceMemory,
    size: DeviceSize,
    format: Format,
    width: u32,
    height: u32,
    handler: Promise<ImageData>,
}

/// Records the commands that copy a subresource into a new host-visible buffer.
///
/// On error, every object created for the read is destroyed again, and `handler` is returned
/// with the error so that the caller can deliver it.
pub fn record_readback(
    out: &mut dyn Writer,
    target: ReadbackTarget,
    request: &ReadbackRequest,
    handler: Promise<ImageData>,
) -> Result<PendingReadback, (RequestError, Promise<ImageData>)> {
    let device = match out.state().images.get(&request.image) {
        Some(image_object) => image_object.device,
        None => {
            return Err((
                TransformError::missing(request.image).into(),
                handler,
            ))
        }
    };
    let mut teardown = Teardown::new();

    match record(out, device, &mut teardown, target, request) {
        Ok((memory, size, format)) => {
            log::debug!(
                "reading back {:?} of {:?} as a {}x{} {format:?} image",
                request.subresource,
                request.image,
                request.width,
                request.height,
            );

            Ok(PendingReadback {
                device,
                teardown,
                memory,
                size,
                format,
                width: request.width,
                height: request.height,
                handler,
            })
        }
        Err(err) => {
            if let Err(teardown_err) = teardown.unwind(out) {
                log::warn!("cleaning up a failed read: {teardown_err}");
            }

            Err((err, handler))
        }
    }
}

fn record(
    out: &mut dyn Writer,
    device: Device,
    teardown: &mut Teardown,
    target: ReadbackTarget,
    request: &ReadbackRequest,
) -> Result<(DeviceMemory, DeviceSize, Format), RequestError> {
    let state = out.state();
    let image_object = state
        .images
        .get(&request.image)
        .ok_or_else(|| TransformError::missing(request.image))?;
    let image_format = image_object.create_info.format;
    let samples = image_object.create_info.samples;
    let aspect = request.subresource.aspect;
    let mip_level = request.subresource.mip_level;
    let [native_width, native_height] = image_object
        .extent_2d()
        .map(|extent| (extent >> mip_level).max(1));

    if !image_format.aspects().contains(aspect) || aspect.count() != 1 {
        return Err(RequestError::InvalidAttachment { index: None });
    }

    let queue_flags = state
        .queues
        .get(&target.queue())
        .ok_or_else(|| TransformError::missing(target.queue()))?
        .flags;
    let multisampled = samples.is_multisampled();
    let scaled = [request.width, request.height] != [native_width, native_height];

    if !queue_flags.intersects(QueueFlags::GRAPHICS)
        && (multisampled || scaled || aspect != ImageAspects::COLOR)
    {
        return Err(RequestError::NotGraphicsQueue);
    }

    if multisampled && aspect != ImageAspects::COLOR {
        return Err(RequestError::Multisampled);
    }

    let texel_format = image_format.aspect_format(aspect);
    let size = request.width as DeviceSize
        * request.height as DeviceSize
        * texel_format.block_size();

    let mut builder = CommandBuilder::new(device, teardown);
    let (buffer, memory) = builder.create_buffer(
        out,
        BufferCreateInfo {
            size,
            usage: BufferUsage::TRANSFER_DST,
        },
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let scratch_image_info = |extent: [u32; 2]| ImageCreateInfo {
        format: image_format,
        extent: [extent[0], extent[1], 1],
        samples: SampleCount::Sample1,
        usage: ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
        initial_layout: ImageLayout::Undefined,
        ..Default::default()
    };
    let resolve_image = if multisampled {
        Some(builder.create_image(
            out,
            scratch_image_info([native_width, native_height]),
            MemoryPropertyFlags::DEVICE_LOCAL,
        )?)
    } else {
        None
    };
    let staging_image = if scaled {
        Some(builder.create_image(
            out,
            scratch_image_info([request.width, request.height]),
            MemoryPropertyFlags::DEVICE_LOCAL,
        )?)
    } else {
        None
    };

    let command_buffer = match target {
        ReadbackTarget::CommandBuffer { command_buffer, .. } => command_buffer,
        ReadbackTarget::Queue(queue) => {
            let queue_family_index = out
                .state()
                .queues
                .get(&queue)
                .ok_or_else(|| TransformError::missing(queue))?
                .queue_family_index;
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

            command_buffer
        }
    };

    let layers = |image_aspect| ImageSubresourceLayers {
        aspects: image_aspect,
        mip_level,
        array_layers: request.subresource.array_layer..request.subresource.array_layer + 1,
    };
    // Depth/stencil images are transitioned as a whole.
    let attachment_range = ImageSubresourceRange {
        aspects: image_format.aspects(),
        ..ImageSubresourceRange::from(layers(aspect))
    };
    let scratch_range: ImageSubresourceRange = ImageSubresourceLayers::first(aspect).into();

    let mut record = |command| builder.record(&mut *out, command_buffer, command);
    let barrier = |image_memory_barriers| RecordedCommand::PipelineBarrier {
        src_stages: PipelineStages::ALL_COMMANDS,
        dst_stages: PipelineStages::TRANSFER,
        memory_barriers: Vec::new(),
        buffer_memory_barriers: Vec::new(),
        image_memory_barriers,
    };

    record(barrier(vec![ImageMemoryBarrier::transition(
        request.image,
        attachment_range.clone(),
        request.layout,
        ImageLayout::TransferSrcOptimal,
    )]))?;

    let mut source = (request.image, layers(aspect));

    if let Some(resolve_image) = resolve_image {
        record(barrier(vec![ImageMemoryBarrier::transition(
            resolve_image,
            scratch_range.clone(),
            ImageLayout::Undefined,
            ImageLayout::TransferDstOptimal,
        )]))?;
        record(RecordedCommand::ResolveImage {
            src_image: source.0,
            src_image_layout: ImageLayout::TransferSrcOptimal,
            dst_image: resolve_image,
            dst_image_layout: ImageLayout::TransferDstOptimal,
            regions: vec![ImageCopy {
                src_subresource: source.1.clone(),
                src_offset: [0; 3],
                dst_subresource: ImageSubresourceLayers::first(aspect),
                dst_offset: [0; 3],
                extent: [native_width, native_height, 1],
            }],
        })?;
        record(barrier(vec![ImageMemoryBarrier::transition(
            resolve_image,
            scratch_range.clone(),
            ImageLayout::TransferDstOptimal,
            ImageLayout::TransferSrcOptimal,
        )]))?;

        source = (resolve_image, ImageSubresourceLayers::first(aspect));
    }

    if let Some(staging_image) = staging_image {
        record(barrier(vec![ImageMemoryBarrier::transition(
            staging_image,
            scratch_range.clone(),
            ImageLayout::Undefined,
            ImageLayout::TransferDstOptimal,
        )]))?;
        record(RecordedCommand::BlitImage {
            src_image: source.0,
            src_image_layout: ImageLayout::TransferSrcOptimal,
            dst_image: staging_image,
            dst_image_layout: ImageLayout::TransferDstOptimal,
            regions: vec![ImageBlit {
                src_subresource: source.1.clone(),
                src_offsets: [[0; 3], [native_width as i32, native_height as i32, 1]],
                dst_subresource: ImageSubresourceLayers::first(aspect),
                dst_offsets: [[0; 3], [request.width as i32, request.height as i32, 1]],
            }],
            // Depth and stencil can only be blitted with nearest filtering.
            filter: if aspect == ImageAspects::COLOR {
                Filter::Linear
            } else {
                Filter::Nearest
            },
        })?;
        record(barrier(vec![ImageMemoryBarrier::transition(
            staging_image,
            scratch_range,
            ImageLayout::TransferDstOptimal,
            ImageLayout::TransferSrcOptimal,
        )]))?;

        source = (staging_image, ImageSubresourceLayers::first(aspect));
    }

    record(RecordedCommand::CopyImageToBuffer {
        src_image: source.0,
        src_image_layout: ImageLayout::TransferSrcOptimal,
        dst_buffer: buffer,
        regions: vec![BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: source.1,
            image_offset: [0; 3],
            image_extent: [request.width, request.height, 1],
        }],
    })?;

    let mut image_memory_barriers = Vec::new();

    // A subresource that held nothing is left in the transfer layout.
    if !matches!(
        request.layout,
        ImageLayout::Undefined | ImageLayout::Preinitialized,
    ) {
        image_memory_barriers.push(ImageMemoryBarrier::transition(
            request.image,
            attachment_range,
            ImageLayout::TransferSrcOptimal,
            request.layout,
        ));
    }

    record(RecordedCommand::PipelineBarrier {
        src_stages: PipelineStages::TRANSFER,
        dst_stages: PipelineStages::HOST | PipelineStages::ALL_COMMANDS,
        memory_barriers: Vec::new(),
        buffer_memory_barriers: vec![BufferMemoryBarrier {
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_access: AccessFlags::HOST_READ,
            buffer,
            offset: 0,
            size,
        }],
        image_memory_barriers,
    })?;

    if let ReadbackTarget::Queue(queue) = target {
        builder.end(out, command_buffer)?;
        out.write(Cmd::QueueSubmit {
            queue,
            submits: vec![SubmitInfo {
                command_buffers: vec![command_buffer],
                ..Default::default()
            }],
            fence: Fence::NULL,
        })?;
        out.write(Cmd::QueueWaitIdle { queue })?;
    }

    Ok((memory, size, texel_format))
}

impl PendingReadback {
    /// Returns the device that the read executes on.
    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Maps the buffer, posts its contents to the replay target, and destroys every object
    /// created for the read. The result, or the error that prevented it, is delivered to the
    /// promise the read was recorded with.
    ///
    /// Must be written after the commands of the read have been submitted.
    pub fn finish(self, out: &mut dyn Writer) -> Result<(), TransformError> {
        let PendingReadback {
            device,
            mut teardown,
            memory,
            size,
            format,
            width,
            height,
            handler,
        } = self;

        if let Err(err) = post(out, device, &mut teardown, memory, size, |address| {
            Promise::new(move |result: Result<Vec<u8>, RequestError>| {
                handler.fulfill(result.and_then(|bytes| {
                    ImageData::from_buffer(format, width, height, bytes).ok_or(
                        RequestError::Replay(ReplayError::HostMemoryUnavailable { address, size }),
                    )
                }));
            })
        }) {
            log::warn!("posting a read back image failed: {err}");
        }

        teardown.unwind(out)
    }

    /// Delivers `err` instead of the result, and destroys every object created for the read.
    /// For a read whose commands never executed.
    pub fn cancel(self, out: &mut dyn Writer, err: RequestError) -> Result<(), TransformError> {
        let PendingReadback {
            mut teardown,
            handler,
            ..
        } = self;

        handler.fulfill(Err(err));

        teardown.unwind(out)
    }
}

fn post(
    out: &mut dyn Writer,
    device: Device,
    teardown: &mut Teardown,
    memory: DeviceMemory,
    size: DeviceSize,
    handler: impl FnOnce(u64) -> Promise<Vec<u8>>,
) -> Result<(), TransformError> {
    let address = CommandBuilder::new(device, teardown).map_memory(out, memory)?;

    // Dropped unfulfilled if a later command fails, which reports the read as abandoned.
    let handler = handler(address);
    out.write(Cmd::InvalidateMappedMemoryRanges {
        device,
        ranges: vec![MappedMemoryRange {
            memory,
            offset: 0,
            size,
        }],
    })?;
    out.write(Cmd::Post(PostCommand {
        address,
        size,
        handler,
    }))?;

    out.write(Cmd::UnmapMemory { device, memory })
}

//! Replaying a range of frames several times.
//!
//! Frames are delimited by `QueuePresent` commands: frame 0 ends with the first present, frame
//! 1 with the second, and so on. The [`FrameLoop`] transform records the commands of frames
//! `start_frame..=end_frame` as they pass, and once the last of them has been presented it
//! emits them again, `loop_count - 1` more times.
//!
//! Before each repetition, the state that the loop changed is put back the way it was when the
//! loop started:
//!
//! - Objects created inside the loop are destroyed, so that the repeated body can create them
//!   again with the same handles.
//! - The contents of every buffer that was bound to memory at the start of the loop are
//!   restored from a copy taken at that point. Only buffers usable as both the source and
//!   destination of transfers can be backed up.
//! - Images are transitioned back to the layouts they had at the start of the loop.
//!
//! Image contents are not restored. Objects that existed before the loop and were destroyed
//! inside it are not recreated, so repeated commands that use them are dropped.

use crate::{
    buffer::{Buffer, BufferCopy, BufferCreateInfo, BufferUsage},
    builder::{CommandBuilder, Teardown},
    command::{Cmd, CmdId},
    command_buffer::{
        CommandBuffer, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsage,
        CommandPool, RecordedCommand, SubmitInfo,
    },
    device::{Device, Queue},
    image::{ImageLayout, ImageSubresourceRange},
    memory::MemoryPropertyFlags,
    state::GlobalState,
    sync::{Fence, ImageMemoryBarrier, PipelineStages},
    transform::{Transform, TransformError, Writer},
    DeviceSize, NonExhaustive,
};
use foldhash::fast::RandomState;
use indexmap::IndexMap;
use std::mem;

/// Parameters to create a new `FrameLoop`.
#[derive(Clone, Debug)]
pub struct FrameLoopCreateInfo {
    /// The first frame of the loop.
    ///
    /// The default value is `0`.
    pub start_frame: u64,

    /// The last frame of the loop.
    ///
    /// The default value is `0`.
    pub end_frame: u64,

    /// How many times the frames of the loop are executed in total.
    ///
    /// The default value is `1`.
    pub loop_count: u32,

    pub _ne: NonExhaustive,
}

impl Default for FrameLoopCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            start_frame: 0,
            end_frame: 0,
            loop_count: 1,
            _ne: NonExhaustive(()),
        }
    }
}

/// A transform that repeats a range of frames.
#[derive(Debug)]
pub struct FrameLoop {
    start_frame: u64,
    end_frame: u64,
    loop_count: u32,
    /// The index of the frame that the next command belongs to.
    frame: u64,
    phase: Phase,
    body: Vec<Cmd>,
    /// The objects the loop creates for itself, released at flush.
    teardown: Teardown,
}

#[derive(Debug)]
enum Phase {
    Waiting,
    Recording(Box<LoopStart>),
    Done,
}

/// What the loop restores before each repetition.
#[derive(Debug)]
struct LoopStart {
    state: GlobalState,
    devices: IndexMap<Device, DeviceBackup, RandomState>,
}

#[derive(Debug)]
struct DeviceBackup {
    queue: Queue,
    command_pool: CommandPool,
    buffers: Vec<BufferBackup>,
}

#[derive(Clone, Copy, Debug)]
struct BufferBackup {
    buffer: Buffer,
    shadow: Buffer,
    size: DeviceSize,
}

impl FrameLoop {
    /// Creates a new `FrameLoop`.
    ///
    /// # Panics
    ///
    /// - Panics if `create_info.end_frame` is less than `create_info.start_frame`.
    /// - Panics if `create_info.loop_count` is 0.
    pub fn new(create_info: FrameLoopCreateInfo) -> Self {
        let FrameLoopCreateInfo {
            start_frame,
            end_frame,
            loop_count,
            _ne: _,
        } = create_info;

        assert!(
            start_frame <= end_frame,
            "the loop ends at frame {end_frame}, before it starts at frame {start_frame}",
        );
        assert_ne!(loop_count, 0, "the loop must execute at least once");

        FrameLoop {
            start_frame,
            end_frame,
            loop_count,
            frame: 0,
            phase: Phase::Waiting,
            body: Vec::new(),
            teardown: Teardown::new(),
        }
    }

    /// Backs up the buffers of every device and remembers the state the loop starts from.
    fn start_loop(&mut self, out: &mut dyn Writer) -> Result<LoopStart, TransformError> {
        let mut buffers: IndexMap<Device, Vec<(Buffer, DeviceSize)>, RandomState> =
            IndexMap::default();

        for (&buffer, buffer_object) in out.state().buffers.iter() {
            if buffer_object.memory.is_none() {
                continue;
            }

            if !buffer_object
                .create_info
                .usage
                .contains(BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST)
            {
                log::warn!("{buffer:?} can't be transferred, its contents won't be restored");

                continue;
            }

            buffers
                .entry(buffer_object.device)
                .or_default()
                .push((buffer, buffer_object.create_info.size));
        }

        let mut devices = IndexMap::default();
        let device_handles: Vec<Device> = out.state().devices.keys().copied().collect();

        for device in device_handles {
            let Some(queue) = out.state().devices[device].queues.first().copied() else {
                continue;
            };
            let queue_family_index = out.state().queues[queue].queue_family_index;

            let mut builder = CommandBuilder::new(device, &mut self.teardown);
            let command_pool = builder.create_command_pool(out, queue_family_index)?;
            let mut backups = Vec::new();

            if let Some(buffers) = buffers.swap_remove(&device) {
                let command_buffer = begin_transfer(&mut builder, out, command_pool)?;

                for (buffer, size) in buffers {
                    let (shadow, _) = builder.create_buffer(
                        out,
                        BufferCreateInfo {
                            size,
                            usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
                            ..Default::default()
                        },
                        MemoryPropertyFlags::DEVICE_LOCAL,
                    )?;
                    builder.record(
                        out,
                        command_buffer,
                        RecordedCommand::CopyBuffer {
                            src_buffer: buffer,
                            dst_buffer: shadow,
                            regions: vec![BufferCopy {
                                src_offset: 0,
                                dst_offset: 0,
                                size,
                            }],
                        },
                    )?;
                    backups.push(BufferBackup {
                        buffer,
                        shadow,
                        size,
                    });
                }

                builder.end(out, command_buffer)?;
                submit_and_wait(out, queue, command_buffer)?;
            }

            log::debug!("backed up {} buffers of {device:?}", backups.len());
            devices.insert(
                device,
                DeviceBackup {
                    queue,
                    command_pool,
                    buffers: backups,
                },
            );
        }

        Ok(LoopStart {
            state: out.state().clone(),
            devices,
        })
    }

    /// Puts the state back to the start of the loop, then emits the body again.
    fn repeat(&mut self, out: &mut dyn Writer, start: &LoopStart) -> Result<(), TransformError> {
        for &device in start.devices.keys() {
            if out.state().devices.contains(&device) {
                out.write(Cmd::DeviceWaitIdle { device })?;
            }
        }

        let created = created_since(&start.state, out.state());

        if !created.is_empty() {
            log::debug!("destroying {} objects created inside the loop", created.len());
        }

        for cmd in created {
            write_recoverable(out, cmd)?;
        }

        for (&device, backup) in &start.devices {
            if !out.state().devices.contains(&device) {
                continue;
            }

            let barriers = layout_resets(&start.state, out.state(), device);
            let restores: Vec<BufferBackup> = backup
                .buffers
                .iter()
                .filter(|backup| out.state().buffers.contains(&backup.buffer))
                .copied()
                .collect();

            if barriers.is_empty() && restores.is_empty() {
                continue;
            }

            let mut builder = CommandBuilder::new(device, &mut self.teardown);
            let command_buffer = begin_transfer(&mut builder, out, backup.command_pool)?;

            for restore in restores {
                builder.record(
                    out,
                    command_buffer,
                    RecordedCommand::CopyBuffer {
                        src_buffer: restore.shadow,
                        dst_buffer: restore.buffer,
                        regions: vec![BufferCopy {
                            src_offset: 0,
                            dst_offset: 0,
                            size: restore.size,
                        }],
                    },
                )?;
            }

            if !barriers.is_empty() {
                builder.record(
                    out,
                    command_buffer,
                    RecordedCommand::PipelineBarrier {
                        src_stages: PipelineStages::ALL_COMMANDS,
                        dst_stages: PipelineStages::ALL_COMMANDS,
                        memory_barriers: Vec::new(),
                        buffer_memory_barriers: Vec::new(),
                        image_memory_barriers: barriers,
                    },
                )?;
            }

            builder.end(out, command_buffer)?;
            submit_and_wait(out, backup.queue, command_buffer)?;
        }

        for cmd in self.body.clone() {
            write_recoverable(out, cmd)?;
        }

        Ok(())
    }

    fn end_loop(&mut self, out: &mut dyn Writer, start: &LoopStart) -> Result<(), TransformError> {
        for iteration in 1..self.loop_count {
            log::debug!(
                "repeating frames {}..={}, iteration {} of {}",
                self.start_frame,
                self.end_frame,
                iteration + 1,
                self.loop_count,
            );
            self.repeat(out, start)?;
        }

        Ok(())
    }
}

fn begin_transfer(
    builder: &mut CommandBuilder<'_>,
    out: &mut dyn Writer,
    command_pool: CommandPool,
) -> Result<CommandBuffer, TransformError> {
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

    Ok(command_buffer)
}

fn submit_and_wait(
    out: &mut dyn Writer,
    queue: Queue,
    command_buffer: CommandBuffer,
) -> Result<(), TransformError> {
    out.write(Cmd::QueueSubmit {
        queue,
        submits: vec![SubmitInfo {
            command_buffers: vec![command_buffer],
            ..Default::default()
        }],
        fence: Fence::NULL,
    })?;
    out.write(Cmd::QueueWaitIdle { queue })
}

/// Writes a derived command. If the state can't apply it, the command is dropped with a
/// warning.
fn write_recoverable(out: &mut dyn Writer, cmd: Cmd) -> Result<(), TransformError> {
    let name = cmd.name();

    match out.write(cmd) {
        Err(err) if err.is_recoverable() => {
            log::warn!("dropping a repeated {name}: {err}");

            Ok(())
        }
        result => result,
    }
}

/// Returns the commands that destroy every object of `now` that is not in `start`, dependent
/// objects first.
fn created_since(start: &GlobalState, now: &GlobalState) -> Vec<Cmd> {
    let mut cmds = Vec::new();

    macro_rules! destroy_created {
        ($($table:ident => |$device:ident, $handle:ident| $cmd:expr;)*) => {
            $(
                for (&$handle, object) in now.$table.iter() {
                    if !start.$table.contains(&$handle) {
                        let $device = object.device;
                        cmds.push($cmd);
                    }
                }
            )*
        };
    }

    destroy_created! {
        framebuffers => |device, framebuffer| Cmd::DestroyFramebuffer { device, framebuffer };
        image_views => |device, image_view| Cmd::DestroyImageView { device, image_view };
        pipelines => |device, pipeline| Cmd::DestroyPipeline { device, pipeline };
        pipeline_layouts => |device, pipeline_layout| {
            Cmd::DestroyPipelineLayout { device, pipeline_layout }
        };
        descriptor_pools => |device, descriptor_pool| {
            Cmd::DestroyDescriptorPool { device, descriptor_pool }
        };
        descriptor_set_layouts => |device, set_layout| {
            Cmd::DestroyDescriptorSetLayout { device, set_layout }
        };
        render_passes => |device, render_pass| Cmd::DestroyRenderPass { device, render_pass };
        shader_modules => |device, shader_module| {
            Cmd::DestroyShaderModule { device, shader_module }
        };
        command_pools => |device, command_pool| Cmd::DestroyCommandPool { device, command_pool };
        fences => |device, fence| Cmd::DestroyFence { device, fence };
        semaphores => |device, semaphore| Cmd::DestroySemaphore { device, semaphore };
        buffers => |device, buffer| Cmd::DestroyBuffer { device, buffer };
    }

    // Presentable images belong to their swapchain.
    for (&image, object) in now.images.iter() {
        if !start.images.contains(&image) && !object.swapchain_owned {
            cmds.push(Cmd::DestroyImage {
                device: object.device,
                image,
            });
        }
    }

    destroy_created! {
        memories => |device, memory| Cmd::FreeMemory { device, memory };
    }

    cmds
}

/// Returns the barriers that move the images of `device` back to their layouts in `start`.
///
/// Subresources that were undefined at the start are left alone, as any use of them in the
/// loop starts by discarding their contents.
fn layout_resets(
    start: &GlobalState,
    now: &GlobalState,
    device: Device,
) -> Vec<ImageMemoryBarrier> {
    let mut barriers = Vec::new();

    for (&image, image_object) in now.images.iter() {
        if image_object.device != device {
            continue;
        }

        let Some(start_object) = start.images.get(&image) else {
            continue;
        };
        let create_info = &image_object.create_info;
        let range = ImageSubresourceRange {
            aspects: create_info.format.aspects(),
            mip_levels: 0..create_info.mip_levels,
            array_layers: 0..create_info.array_layers,
        };

        for subresource in range.iter() {
            let (Some(from), Some(to)) = (
                image_object.layout(subresource),
                start_object.layout(subresource),
            ) else {
                continue;
            };

            if from == to || matches!(to, ImageLayout::Undefined | ImageLayout::Preinitialized) {
                continue;
            }

            barriers.push(ImageMemoryBarrier::transition(
                image,
                ImageSubresourceRange {
                    aspects: subresource.aspect,
                    mip_levels: subresource.mip_level..subresource.mip_level + 1,
                    array_layers: subresource.array_layer..subresource.array_layer + 1,
                },
                from,
                to,
            ));
        }
    }

    barriers
}

impl Transform for FrameLoop {
    fn name(&self) -> &'static str {
        "frame loop"
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

        if matches!(self.phase, Phase::Waiting) && self.frame == self.start_frame {
            log::debug!("the loop starts at command {id}");

            if self.loop_count > 1 {
                let start = self.start_loop(out)?;
                self.phase = Phase::Recording(Box::new(start));
            } else {
                self.phase = Phase::Done;
            }
        }

        let is_present = matches!(cmd, Cmd::QueuePresent { .. });

        if let Phase::Recording(_) = self.phase {
            if !cmd.is_synthetic() {
                self.body.push(cmd.clone());
            }
        }

        out.mutate_and_write(id, cmd)?;

        if is_present {
            self.frame += 1;

            if self.frame == self.end_frame + 1 {
                if let Phase::Recording(start) = mem::replace(&mut self.phase, Phase::Done) {
                    self.end_loop(out, &start)?;
                }
            }
        }

        Ok(())
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        match self.phase {
            Phase::Waiting => log::warn!(
                "the stream ended at frame {}, before the loop started",
                self.frame,
            ),
            Phase::Recording(_) => log::warn!(
                "the stream ended at frame {}, before the loop reached frame {}",
                self.frame,
                self.end_frame,
            ),
            Phase::Done => {}
        }

        self.phase = Phase::Done;
        self.body.clear();

        if self.teardown.is_empty() {
            return Ok(());
        }

        let mut devices: Vec<Device> = Vec::new();

        for device in out.state().devices.keys() {
            devices.push(*device);
        }

        for device in devices {
            out.write(Cmd::DeviceWaitIdle { device })?;
        }

        self.teardown.unwind(out)
    }
}

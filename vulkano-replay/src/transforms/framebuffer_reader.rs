//! Reading back framebuffer attachments at insertion points.
//!
//! The reader acts on the [`Cmd::Insertion`] commands that a [`CommandSplitter`] earlier in
//! the chain produces, so every path it is asked to read at must also be requested from the
//! splitter, see [`FramebufferReader::requested_commands`].
//!
//! At an insertion point, the reader finds the render pass instance that was begun most
//! recently, either in the command buffers pending submission or, failing that, the last one
//! the queue drew in. It then reads the requested attachment of its framebuffer, as it is at
//! that point, with the commands of the [`readback`] module. A read recorded into a command
//! buffer only delivers data once a submission of that command buffer has been applied; if none
//! is, the read fails with [`RequestError::NotSubmitted`] when the reader is flushed.
//!
//! [`CommandSplitter`]: super::command_splitter::CommandSplitter
//! [`readback`]: super::readback

use super::readback::{record_readback, PendingReadback, ReadbackRequest, ReadbackTarget};
use crate::{
    command::{Cmd, CmdId, InsertionCommand},
    command_buffer::{CommandBuffer, RecordedCommand},
    device::Device,
    image::{ImageAspects, ImageSubresource},
    image_data::ImageData,
    state::{DrawInfo, GlobalState, RecordingState},
    sub_cmd_idx::SubCmdIdx,
    transform::{Promise, RequestError, Transform, TransformError, Writer},
};
use std::{collections::BTreeMap, mem};

/// A transform that reads back framebuffer attachments.
#[derive(Debug, Default)]
pub struct FramebufferReader {
    requests: BTreeMap<SubCmdIdx, Vec<ReadRequest>>,
    pending: Vec<PendingRead>,
}

#[derive(Debug)]
struct PendingRead {
    readback: PendingReadback,
    /// The command buffer the read is recorded into, until a submission of it is applied.
    unsubmitted: Option<CommandBuffer>,
}

#[derive(Debug)]
struct ReadRequest {
    attachment: AttachmentKind,
    handler: Promise<ImageData>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentKind {
    Color {
        index: u32,
        width: u32,
        height: u32,
    },
    Depth,
}

impl FramebufferReader {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests color attachment `attachment` of the current subpass after the command at
    /// `idx`, scaled to `width` by `height`.
    pub fn color(
        &mut self,
        idx: impl Into<SubCmdIdx>,
        width: u32,
        height: u32,
        attachment: u32,
        handler: Promise<ImageData>,
    ) {
        self.request(
            idx.into(),
            AttachmentKind::Color {
                index: attachment,
                width,
                height,
            },
            handler,
        );
    }

    /// Requests the depth aspect of the depth/stencil attachment of the current subpass after
    /// the command at `idx`, at its own size.
    pub fn depth(&mut self, idx: impl Into<SubCmdIdx>, handler: Promise<ImageData>) {
        self.request(idx.into(), AttachmentKind::Depth, handler);
    }

    fn request(&mut self, idx: SubCmdIdx, attachment: AttachmentKind, handler: Promise<ImageData>) {
        self.requests
            .entry(idx)
            .or_default()
            .push(ReadRequest {
                attachment,
                handler,
            });
    }

    /// Returns the paths that reads are requested at, and that must be split.
    pub fn requested_commands(&self) -> impl Iterator<Item = &SubCmdIdx> {
        self.requests.keys()
    }

    fn read(
        &mut self,
        insertion: &InsertionCommand,
        request: ReadRequest,
        out: &mut dyn Writer,
    ) {
        let ReadRequest {
            attachment,
            handler,
        } = request;

        let readback_request = match locate(out.state(), insertion, attachment) {
            Ok(readback_request) => readback_request,
            Err(err) => {
                log::warn!("cannot read the framebuffer at {}: {err}", insertion.idx);
                handler.fulfill(Err(err));

                return;
            }
        };

        let target = match insertion.command_buffer {
            Some(command_buffer) => ReadbackTarget::CommandBuffer {
                command_buffer,
                queue: insertion.queue,
            },
            None => ReadbackTarget::Queue(insertion.queue),
        };

        match record_readback(out, target, &readback_request, handler) {
            Ok(readback) => self.pending.push(PendingRead {
                readback,
                unsubmitted: insertion.command_buffer,
            }),
            Err((err, handler)) => {
                log::warn!("cannot read the framebuffer at {}: {err}", insertion.idx);
                handler.fulfill(Err(err));
            }
        }
    }
}

/// Returns what to read for `attachment` at the insertion point.
fn locate(
    state: &GlobalState,
    insertion: &InsertionCommand,
    attachment: AttachmentKind,
) -> Result<ReadbackRequest, RequestError> {
    let draw_info = last_render_pass(state, insertion)?
        .or_else(|| {
            state
                .queues
                .get(&insertion.queue)
                .and_then(|queue| queue.last_draw_info)
        })
        .ok_or(RequestError::NoRenderPass)?;

    let render_pass = state
        .render_passes
        .get(&draw_info.render_pass)
        .ok_or(RequestError::AttachmentDestroyed)?;
    let subpass = render_pass
        .create_info
        .subpasses
        .get(draw_info.subpass as usize)
        .ok_or(RequestError::NoRenderPass)?;

    let (reference, aspect) = match attachment {
        AttachmentKind::Color { index, .. } => (
            subpass
                .color_attachments
                .get(index as usize)
                .copied()
                .flatten()
                .ok_or(RequestError::InvalidAttachment { index: Some(index) })?,
            ImageAspects::COLOR,
        ),
        AttachmentKind::Depth => (
            subpass
                .depth_stencil_attachment
                .ok_or(RequestError::InvalidAttachment { index: None })?,
            ImageAspects::DEPTH,
        ),
    };

    let (view, image) = state
        .framebuffer_attachment(draw_info.framebuffer, reference.attachment)
        .ok_or(RequestError::AttachmentDestroyed)?;
    let view_range = &state.image_views[view].create_info.subresource_range;

    if !view_range.aspects.contains(aspect) {
        return Err(RequestError::InvalidAttachment {
            index: match attachment {
                AttachmentKind::Color { index, .. } => Some(index),
                AttachmentKind::Depth => None,
            },
        });
    }

    let subresource = ImageSubresource {
        aspect,
        array_layer: view_range.array_layers.start,
        mip_level: view_range.mip_levels.start,
    };
    let layout = state
        .current_layout(image, subresource, &insertion.pending_command_buffers)
        .ok_or(RequestError::AttachmentDestroyed)?;

    let (width, height) = match attachment {
        AttachmentKind::Color { width, height, .. } => (width, height),
        AttachmentKind::Depth => {
            let [width, height] = state.images[image]
                .extent_2d()
                .map(|extent| (extent >> subresource.mip_level).max(1));

            (width, height)
        }
    };

    Ok(ReadbackRequest {
        image,
        subresource,
        layout,
        width,
        height,
    })
}

/// Returns the render pass instance begun most recently in the command buffers leading up to
/// the insertion point.
fn last_render_pass(
    state: &GlobalState,
    insertion: &InsertionCommand,
) -> Result<Option<DrawInfo>, RequestError> {
    let mut command_buffers: Vec<CommandBuffer> = insertion.pending_command_buffers.clone();

    if let Some(command_buffer) = insertion.command_buffer {
        if !command_buffers.contains(&command_buffer) {
            command_buffers.push(command_buffer);
        }
    }

    for &command_buffer in command_buffers.iter().rev() {
        let command_buffer_object = state
            .command_buffers
            .get(&command_buffer)
            .ok_or(RequestError::CommandBufferNotRecorded)?;
        let is_current = insertion.command_buffer == Some(command_buffer);

        if !is_current && command_buffer_object.recording != RecordingState::Executable {
            return Err(RequestError::CommandBufferNotRecorded);
        }

        let mut found = None;
        scan_render_passes(state, &command_buffer_object.commands, &mut found);

        if found.is_some() {
            return Ok(found);
        }
    }

    Ok(None)
}

fn scan_render_passes(
    state: &GlobalState,
    commands: &[RecordedCommand],
    found: &mut Option<DrawInfo>,
) {
    for command in commands {
        match command {
            RecordedCommand::BeginRenderPass { begin_info, .. } => {
                *found = Some(DrawInfo {
                    framebuffer: begin_info.framebuffer,
                    render_pass: begin_info.render_pass,
                    subpass: 0,
                });
            }
            RecordedCommand::NextSubpass { .. } => {
                if let Some(draw_info) = found {
                    draw_info.subpass += 1;
                }
            }
            RecordedCommand::ExecuteCommands { command_buffers } => {
                for secondary in command_buffers {
                    if let Some(secondary) = state.command_buffers.get(secondary) {
                        scan_render_passes(state, &secondary.commands, found);
                    }
                }
            }
            _ => {}
        }
    }
}

impl Transform for FramebufferReader {
    fn name(&self) -> &'static str {
        "framebuffer reader"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        if let Cmd::Insertion(insertion) = &cmd {
            if let Some(requests) = self.requests.remove(&insertion.idx) {
                for request in requests {
                    self.read(insertion, request, out);
                }
            }
        }

        let submitted: Vec<CommandBuffer> = match &cmd {
            Cmd::QueueSubmit { submits, .. }
                if self.pending.iter().any(|pending| pending.unsubmitted.is_some()) =>
            {
                submits
                    .iter()
                    .flat_map(|submit| submit.command_buffers.iter().copied())
                    .collect()
            }
            _ => Vec::new(),
        };

        out.mutate_and_write(id, cmd)?;

        for pending in &mut self.pending {
            if pending
                .unsubmitted
                .is_some_and(|command_buffer| submitted.contains(&command_buffer))
            {
                pending.unsubmitted = None;
            }
        }

        Ok(())
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        for (idx, requests) in mem::take(&mut self.requests) {
            for request in requests {
                request
                    .handler
                    .fulfill(Err(RequestError::CommandNotFound(idx.clone())));
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

        for PendingRead {
            readback,
            unsubmitted,
        } in pending
        {
            let finished = match unsubmitted {
                None => readback.finish(out),
                Some(command_buffer) => {
                    log::warn!("{command_buffer:?} was never submitted, dropping the read in it");
                    readback.cancel(out, RequestError::NotSubmitted)
                }
            };

            if let Err(err) = finished {
                result = result.and(Err(err));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::FramebufferReader;
    use crate::{
        command::{Cmd, CmdId},
        command_buffer::{CommandBuffer, RecordedCommand},
        format::Format,
        image::ImageLayout,
        sub_cmd_idx::SubCmdIdx,
        tests::TestScene,
        transform::{promise, RequestError},
        transforms::command_splitter::{CommandSplitter, CommandSplitterCreateInfo},
    };

    #[test]
    fn native_color_read_is_copied() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(3);
        let submit_id = scene.next_id();
        let (handler, receiver) = promise::channel();

        let mut reader = FramebufferReader::new();
        reader.color([submit_id, 0, 0, 2], 256, 256, 0, handler);

        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());

        for idx in reader.requested_commands() {
            splitter.split(idx.clone());
        }

        let mut transformer = scene.transformer();
        transformer.add(splitter).add(reader);
        transformer
            .transform(CmdId(submit_id), scene.submit_cmd(&[command_buffer]))
            .unwrap();

        let recorded: Vec<RecordedCommand> = transformer
            .builder()
            .commands()
            .iter()
            .filter_map(|(_, cmd)| match cmd {
                Cmd::Record { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect();
        assert!(recorded
            .iter()
            .all(|command| !matches!(command, RecordedCommand::BlitImage { .. })));
        let copy = recorded
            .iter()
            .position(|command| matches!(command, RecordedCommand::CopyImageToBuffer { .. }))
            .unwrap();
        // The attachment is transitioned from the layout the split render pass left it in.
        let RecordedCommand::PipelineBarrier {
            image_memory_barriers,
            ..
        } = &recorded[copy - 1]
        else {
            panic!("the copy must follow a barrier");
        };
        assert_eq!(
            image_memory_barriers[0].old_layout,
            ImageLayout::ColorAttachmentOptimal,
        );

        transformer.flush().unwrap();

        let pixels: Vec<u8> = (0..256 * 256).flat_map(|_| [1, 2, 3, 4]).collect();
        transformer
            .builder_mut()
            .deliver_posts(|_| Ok(pixels.clone()));

        let image_data = receiver.try_recv().unwrap().unwrap();
        assert_eq!(image_data.format, Format::R8G8B8A8_UNORM);
        assert_eq!([image_data.width, image_data.height], [256, 256]);
        assert_eq!(image_data.bytes, pixels);
    }

    #[test]
    fn request_errors() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(1);
        let submit_id = scene.next_id();
        let (missing_attachment, missing_attachment_receiver) = promise::channel();
        let (outside, outside_receiver) = promise::channel();
        let (never_reached, never_reached_receiver) = promise::channel();

        let mut reader = FramebufferReader::new();
        reader.color([submit_id, 0, 0, 2], 256, 256, 3, missing_attachment);
        // Before the render pass begins, with nothing drawn on the queue yet.
        reader.depth(SubCmdIdx::from([submit_id, 0]), outside);
        reader.depth([submit_id + 10], never_reached);

        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());
        splitter.split([submit_id, 0, 0, 2]);

        let mut transformer = scene.transformer();
        transformer.add(splitter).add(reader);
        transformer
            .transform(CmdId(submit_id), scene.submit_cmd(&[command_buffer]))
            .unwrap();

        assert!(matches!(
            missing_attachment_receiver.try_recv(),
            Some(Err(RequestError::InvalidAttachment { index: Some(3) })),
        ));
        // Not split, so never reached.
        assert!(outside_receiver.try_recv().is_none());

        transformer.flush().unwrap();
        assert!(matches!(
            outside_receiver.try_recv(),
            Some(Err(RequestError::CommandNotFound(_))),
        ));
        assert!(matches!(
            never_reached_receiver.try_recv(),
            Some(Err(RequestError::CommandNotFound(_))),
        ));
    }

    #[test]
    fn depth_read_after_submit() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(1);
        let submit_id = scene.next_id();
        let (handler, receiver) = promise::channel();

        let mut reader = FramebufferReader::new();
        reader.depth([submit_id], handler);

        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());
        splitter.split([submit_id]);

        let mut transformer = scene.transformer();
        transformer.add(splitter).add(reader);
        transformer
            .transform(CmdId(submit_id), scene.submit_cmd(&[command_buffer]))
            .unwrap();
        transformer.flush().unwrap();

        let posts = transformer.builder().pending_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].size, 256 * 256 * 4);

        transformer
            .builder_mut()
            .deliver_posts(|post| Ok(vec![0; post.size as usize]));
        let image_data = receiver.try_recv().unwrap().unwrap();
        assert_eq!(image_data.format, Format::D32_SFLOAT);
    }

    #[test]
    fn dropped_submission_delivers_no_data() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(3);
        let submit_id = scene.next_id();
        let (handler, receiver) = promise::channel();

        let mut reader = FramebufferReader::new();
        reader.color([submit_id, 0, 0, 2], 256, 256, 0, handler);

        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());
        splitter.split([submit_id, 0, 0, 2]);

        let mut transformer = scene.transformer();
        transformer.add(splitter).add(reader);
        // The second command buffer doesn't exist, so the submission can't be applied and is
        // dropped after the read was recorded.
        let unknown = CommandBuffer::from_raw(0xdead);
        transformer
            .transform(
                CmdId(submit_id),
                scene.submit_cmd(&[command_buffer, unknown]),
            )
            .unwrap();
        assert!(!transformer
            .builder()
            .commands()
            .iter()
            .any(|(_, cmd)| matches!(cmd, Cmd::QueueSubmit { .. })));

        transformer.flush().unwrap();
        assert!(transformer.builder().pending_posts().is_empty());
        assert!(matches!(
            receiver.try_recv(),
            Some(Err(RequestError::NotSubmitted)),
        ));
        assert!(transformer.state().buffers.is_empty());
    }
}

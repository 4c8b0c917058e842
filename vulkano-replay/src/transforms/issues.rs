//! Reporting problems in a command stream.
//!
//! The [`IssueDetector`] transform forwards every command unchanged and notes the ones that
//! look wrong. The notes are delivered when the stream is flushed.

use crate::{
    command::{Cmd, CmdId},
    command_buffer::{CommandBuffer, CommandBufferLevel, RecordedCommand, SubmitInfo},
    image::{Image, ImageLayout, ImageSubresource},
    pipeline::PipelineBindPoint,
    render_pass::RenderPassBeginInfo,
    state::{GlobalState, MutateError},
    transform::{Promise, Transform, TransformError, Writer},
};
use foldhash::fast::RandomState;
use std::{
    collections::HashMap,
    fmt::{Display, Error as FmtError, Formatter},
    mem,
};

/// How bad an [`Issue`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// The command is applied, but likely doesn't do what was intended.
    Warning,

    /// The command can't be applied and is dropped from the stream.
    Error,
}

/// A problem found in a command stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    /// The command the problem was found in.
    pub command: CmdId,
    pub severity: Severity,
    pub message: String,
}

impl Display for Issue {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{:?} at command {}: {}", self.severity, self.command, self.message)
    }
}

/// A transform that collects the [`Issue`]s of a command stream.
#[derive(Debug, Default)]
pub struct IssueDetector {
    issues: Vec<Issue>,
    requests: Vec<Promise<Vec<Issue>>>,
}

impl IssueDetector {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the issues of the whole stream. `handler` receives them once the stream is
    /// flushed, in stream order.
    #[inline]
    pub fn request(&mut self, handler: Promise<Vec<Issue>>) {
        self.requests.push(handler);
    }

    fn report(&mut self, command: CmdId, severity: Severity, message: String) {
        let issue = Issue {
            command,
            severity,
            message,
        };

        log::debug!("{issue}");
        self.issues.push(issue);
    }

    fn check_record(
        &mut self,
        id: CmdId,
        state: &GlobalState,
        command_buffer: CommandBuffer,
        command: &RecordedCommand,
    ) {
        let Some(command_buffer_object) = state.command_buffers.get(&command_buffer) else {
            return;
        };
        let commands = &command_buffer_object.commands;

        let in_render_pass = commands
            .iter()
            .rev()
            .find_map(|command| match command {
                RecordedCommand::BeginRenderPass { .. } => Some(true),
                RecordedCommand::EndRenderPass => Some(false),
                _ => None,
            })
            .unwrap_or(
                command_buffer_object.level == CommandBufferLevel::Secondary
                    && command_buffer_object.begin_info.inheritance_info.is_some(),
            );
        let bound = |bind_point: PipelineBindPoint| {
            commands.iter().any(|command| {
                matches!(
                    command,
                    RecordedCommand::BindPipeline { bind_point: bound, .. } if *bound == bind_point,
                )
            })
        };

        if command.is_draw() {
            if !in_render_pass {
                self.report(
                    id,
                    Severity::Warning,
                    format!(
                        "{} is recorded into {command_buffer:?} outside of a render pass",
                        command.name(),
                    ),
                );
            }

            if !bound(PipelineBindPoint::Graphics) {
                self.report(
                    id,
                    Severity::Warning,
                    format!(
                        "{} is recorded into {command_buffer:?} without a graphics pipeline \
                        bound",
                        command.name(),
                    ),
                );
            }
        } else if let RecordedCommand::Dispatch { .. } = command {
            if in_render_pass {
                self.report(
                    id,
                    Severity::Warning,
                    format!(
                        "vkCmdDispatch is recorded into {command_buffer:?} inside a render pass"
                    ),
                );
            }

            if !bound(PipelineBindPoint::Compute) {
                self.report(
                    id,
                    Severity::Warning,
                    format!(
                        "vkCmdDispatch is recorded into {command_buffer:?} without a compute \
                        pipeline bound",
                    ),
                );
            }
        }
    }

    /// Checks that the image barriers of a submission transition from the layout their
    /// subresources are in when the barrier executes.
    fn check_submit(&mut self, id: CmdId, state: &GlobalState, submits: &[SubmitInfo]) {
        let mut layouts = LayoutTracker {
            state,
            layouts: HashMap::default(),
            render_pass: None,
            mismatches: Vec::new(),
        };

        for command_buffer in submits
            .iter()
            .flat_map(|submit| submit.command_buffers.iter().copied())
        {
            layouts.execute(command_buffer);
        }

        for (image, subresource, expected, old_layout) in layouts.mismatches {
            self.report(
                id,
                Severity::Warning,
                format!(
                    "a barrier transitions {subresource:?} of {image:?} from {old_layout:?}, \
                    but it is in {expected:?}",
                ),
            );
        }
    }
}

/// Follows the layout transitions of the command buffers of a submission.
struct LayoutTracker<'a> {
    state: &'a GlobalState,
    layouts: HashMap<(Image, ImageSubresource), ImageLayout, RandomState>,
    render_pass: Option<RenderPassBeginInfo>,
    mismatches: Vec<(Image, ImageSubresource, ImageLayout, ImageLayout)>,
}

impl LayoutTracker<'_> {
    fn layout(&self, image: Image, subresource: ImageSubresource) -> Option<ImageLayout> {
        self.layouts.get(&(image, subresource)).copied().or_else(|| {
            self.state
                .images
                .get(&image)
                .and_then(|image| image.layout(subresource))
        })
    }

    fn execute(&mut self, command_buffer: CommandBuffer) {
        let state = self.state;
        let Some(command_buffer) = state.command_buffers.get(&command_buffer) else {
            return;
        };

        for command in &command_buffer.commands {
            match command {
                RecordedCommand::BeginRenderPass { begin_info, .. } => {
                    self.render_pass = Some(begin_info.clone());
                }
                RecordedCommand::EndRenderPass => {
                    if let Some(begin_info) = self.render_pass.take() {
                        self.end_render_pass(&begin_info);
                    }
                }
                RecordedCommand::PipelineBarrier {
                    image_memory_barriers,
                    ..
                } => {
                    for barrier in image_memory_barriers {
                        for subresource in barrier.subresource_range.iter() {
                            if barrier.old_layout != ImageLayout::Undefined {
                                if let Some(layout) = self.layout(barrier.image, subresource) {
                                    if layout != barrier.old_layout {
                                        self.mismatches.push((
                                            barrier.image,
                                            subresource,
                                            layout,
                                            barrier.old_layout,
                                        ));
                                    }
                                }
                            }

                            self.layouts
                                .insert((barrier.image, subresource), barrier.new_layout);
                        }
                    }
                }
                RecordedCommand::ExecuteCommands { command_buffers } => {
                    for &secondary in command_buffers {
                        self.execute(secondary);
                    }
                }
                _ => {}
            }
        }
    }

    fn end_render_pass(&mut self, begin_info: &RenderPassBeginInfo) {
        let state = self.state;
        let (Some(render_pass), Some(framebuffer)) = (
            state.render_passes.get(&begin_info.render_pass),
            state.framebuffers.get(&begin_info.framebuffer),
        ) else {
            return;
        };

        for (view, description) in framebuffer
            .create_info
            .attachments
            .iter()
            .zip(&render_pass.create_info.attachments)
        {
            let Some(view) = state.image_views.get(view) else {
                continue;
            };

            for subresource in view.create_info.subresource_range.iter() {
                self.layouts
                    .insert((view.image(), subresource), description.final_layout);
            }
        }
    }
}

impl Transform for IssueDetector {
    fn name(&self) -> &'static str {
        "issue detector"
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

        match &cmd {
            &Cmd::Record {
                command_buffer,
                ref command,
            } => self.check_record(id, out.state(), command_buffer, command),
            Cmd::QueueSubmit { submits, .. } => self.check_submit(id, out.state(), submits),
            _ => {}
        }

        let name = cmd.name();
        let result = out.mutate_and_write(id, cmd);

        if let Err(TransformError::Mutate { error, .. }) = &result {
            let message = match error {
                MutateError::NotExecutable(command_buffer) => {
                    format!("{name} uses {command_buffer:?}, which is not executable")
                }
                error => format!("{name} can't be applied: {error}"),
            };

            self.report(id, Severity::Error, message);
        }

        result
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        let _ = out;

        if !self.issues.is_empty() {
            log::warn!("found {} issues in the command stream", self.issues.len());
        }

        for handler in mem::take(&mut self.requests) {
            handler.fulfill(Ok(self.issues.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{IssueDetector, Severity};
    use crate::{
        command::{Cmd, CmdId},
        command_buffer::RecordedCommand,
        image::{ImageAspects, ImageLayout, ImageSubresourceLayers},
        render_pass::SubpassContents,
        sync::{ImageMemoryBarrier, PipelineStages},
        tests::TestScene,
        transform::promise,
    };

    #[test]
    fn draws_need_a_render_pass_and_a_pipeline() {
        let mut scene = TestScene::new();
        let command_buffer = scene.allocate_command_buffer();
        scene.begin(command_buffer);
        let first_id = scene.next_id();

        let (handler, receiver) = promise::channel();
        let mut detector = IssueDetector::new();
        detector.request(handler);

        let mut transformer = scene.transformer();
        transformer.add(detector);
        transformer
            .transform_all(
                first_id,
                [
                    Cmd::record(command_buffer, TestScene::draw()),
                    Cmd::record(
                        command_buffer,
                        scene.begin_render_pass(
                            scene.render_pass,
                            scene.framebuffer,
                            SubpassContents::Inline,
                        ),
                    ),
                    Cmd::record(command_buffer, scene.bind_pipeline(scene.pipeline)),
                    Cmd::record(command_buffer, TestScene::draw()),
                ],
            )
            .unwrap();
        assert!(receiver.try_recv().is_none());
        transformer.flush().unwrap();

        let issues = receiver.try_recv().unwrap().unwrap();
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .all(|issue| issue.command == CmdId(first_id) && issue.severity == Severity::Warning));
        assert!(issues[0].message.contains("outside of a render pass"));
        assert!(issues[1].message.contains("without a graphics pipeline"));
    }

    #[test]
    fn barrier_from_wrong_layout() {
        let mut scene = TestScene::new();
        let barrier = |old_layout, new_layout| RecordedCommand::PipelineBarrier {
            src_stages: PipelineStages::ALL_COMMANDS,
            dst_stages: PipelineStages::ALL_COMMANDS,
            memory_barriers: Vec::new(),
            buffer_memory_barriers: Vec::new(),
            image_memory_barriers: vec![ImageMemoryBarrier::transition(
                scene.color_image,
                ImageSubresourceLayers::first(ImageAspects::COLOR).into(),
                old_layout,
                new_layout,
            )],
        };
        let commands = [
            barrier(ImageLayout::Undefined, ImageLayout::TransferDstOptimal),
            barrier(ImageLayout::TransferDstOptimal, ImageLayout::TransferSrcOptimal),
            // Still TransferSrcOptimal.
            barrier(ImageLayout::TransferDstOptimal, ImageLayout::General),
        ];
        let command_buffer = scene.record(&commands);
        let submit_id = scene.next_id();
        let submit = scene.submit_cmd(&[command_buffer]);

        let (handler, receiver) = promise::channel();
        let mut detector = IssueDetector::new();
        detector.request(handler);

        let mut transformer = scene.transformer();
        transformer.add(detector);
        transformer.transform(CmdId(submit_id), submit).unwrap();
        transformer.flush().unwrap();

        let issues = receiver.try_recv().unwrap().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].command, CmdId(submit_id));
        assert!(issues[0].message.contains("TransferSrcOptimal"));
    }

    #[test]
    fn unexecutable_submission_is_dropped() {
        let mut scene = TestScene::new();
        let command_buffer = scene.allocate_command_buffer();
        scene.begin(command_buffer);
        let submit_id = scene.next_id();
        let submit = scene.submit_cmd(&[command_buffer]);

        let (first, first_receiver) = promise::channel();
        let (second, second_receiver) = promise::channel();
        let mut detector = IssueDetector::new();
        detector.request(first);
        detector.request(second);

        let mut transformer = scene.transformer();
        transformer.add(detector);
        transformer.transform(CmdId(submit_id), submit).unwrap();
        assert!(transformer.builder().commands().is_empty());
        transformer.flush().unwrap();

        let issues = first_receiver.try_recv().unwrap().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        assert!(issues[0].message.contains("not executable"));
        assert_eq!(second_receiver.try_recv().unwrap().unwrap(), issues);
    }
}

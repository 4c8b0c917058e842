//! Splitting of command buffers and render passes, so that work can be inserted after any
//! command of the stream.
//!
//! A requested path names the command after which work is inserted. When the stream reaches it,
//! the [`CommandSplitter`] writes an [`InsertionCommand`] for later transforms to act on:
//!
//! - After a top-level command, the insertion lies between that command and the next one.
//! - After a command buffer or a batch of a submission, a new command buffer is inserted into
//!   the batch, and the insertion lies inside it.
//! - After a command recorded in a command buffer, the command buffer is rebuilt into a new one
//!   that is recorded while the stream is transformed, and the insertion lies inside it. If the
//!   command is inside a render pass, the render pass is split so that the insertion lies
//!   outside of any render pass instance, see [`split_render_pass`]. Secondary command buffers
//!   that contain a requested command are inlined into the new command buffer.
//!
//! Command buffers and render passes that don't contain a requested command are left untouched.
//!
//! [`split_render_pass`]: super::split_render_pass

use super::split_render_pass::{split_render_pass_infos, SplitRenderPasses};
use crate::{
    builder::{CommandBuilder, Teardown},
    command::{Cmd, CmdId, InsertionCommand},
    command_buffer::{
        CommandBuffer, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsage,
        CommandPool, RecordedCommand, SubmitInfo,
    },
    device::{Device, Queue},
    pipeline::{GraphicsPipelineCreateInfo, Pipeline, PipelineBindPoint, PipelineCreateInfo},
    render_pass::{RenderPass, RenderPassBeginInfo, SubpassContents},
    sub_cmd_idx::SubCmdIdx,
    sync::Fence,
    transform::{Transform, TransformError, Writer},
    NonExhaustive,
};
use foldhash::fast::RandomState;
use std::{collections::HashMap, mem};

/// Parameters to create a new `CommandSplitter`.
#[derive(Clone, Debug)]
pub struct CommandSplitterCreateInfo {
    /// The number of commands that precede the commands that requested paths count from. It is
    /// added to the first component of every requested path.
    ///
    /// The default value is `0`.
    pub initial_command_count: u64,

    pub _ne: NonExhaustive,
}

impl Default for CommandSplitterCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            initial_command_count: 0,
            _ne: NonExhaustive(()),
        }
    }
}

/// A transform that creates insertion points after requested commands.
#[derive(Debug)]
pub struct CommandSplitter {
    initial_command_count: u64,
    started: bool,

    // Sorted in reverse execution order, so that the next requested command is last.
    requested: Vec<SubCmdIdx>,
    not_found: Vec<SubCmdIdx>,

    devices: Vec<Device>,
    teardown: Teardown,
    render_passes: HashMap<RenderPass, Vec<SplitRenderPasses>, RandomState>,
    pipelines: HashMap<(Pipeline, RenderPass), Pipeline, RandomState>,
    command_pools: HashMap<(Device, u32), CommandPool, RandomState>,
}

impl CommandSplitter {
    pub fn new(create_info: CommandSplitterCreateInfo) -> Self {
        let CommandSplitterCreateInfo {
            initial_command_count,
            _ne: _,
        } = create_info;

        CommandSplitter {
            initial_command_count,
            started: false,
            requested: Vec::new(),
            not_found: Vec::new(),
            devices: Vec::new(),
            teardown: Teardown::new(),
            render_passes: HashMap::default(),
            pipelines: HashMap::default(),
            command_pools: HashMap::default(),
        }
    }

    /// Requests an insertion point after the command at `idx`.
    ///
    /// # Panics
    ///
    /// - Panics if `idx` is empty.
    /// - Panics if the splitter has already processed a command.
    pub fn split(&mut self, idx: impl Into<SubCmdIdx>) {
        let mut idx = idx.into();

        assert!(!idx.is_empty(), "cannot split at an empty path");
        assert!(
            !self.started,
            "cannot request a split after commands have been processed",
        );

        idx.offset_first(self.initial_command_count);

        if let Err(index) = self.requested.binary_search_by(|requested| idx.cmp(requested)) {
            self.requested.insert(index, idx);
        }
    }

    /// Returns the requested paths that have not been reached yet, in execution order.
    pub fn requested_commands(&self) -> impl Iterator<Item = &SubCmdIdx> {
        self.requested.iter().rev()
    }

    /// Removes `idx` from the requested paths.
    ///
    /// # Panics
    ///
    /// - Panics if `idx` is not the next requested path.
    fn remove_from_requested(&mut self, idx: &SubCmdIdx) {
        let next = self.requested.pop();

        assert_eq!(
            next.as_ref(),
            Some(idx),
            "requested commands must be reached in execution order",
        );
    }

    /// Returns whether `idx` is the next requested path, and removes it if so.
    ///
    /// Requested paths that execute before `idx` can't be reached anymore.
    fn take_request(&mut self, idx: &SubCmdIdx) -> bool {
        while self.requested.last().is_some_and(|next| next < idx) {
            self.not_found.extend(self.requested.pop());
        }

        if self.requested.last() == Some(idx) {
            self.remove_from_requested(idx);

            true
        } else {
            false
        }
    }

    fn has_request_inside(&self, idx: &SubCmdIdx) -> bool {
        self.requested.iter().any(|next| idx.is_ancestor_of(next))
    }

    fn has_request_in_range(&self, parent: &SubCmdIdx, begin: usize, end: usize) -> bool {
        self.requested
            .iter()
            .any(|next| next.in_range(parent, begin as u64, end as u64))
    }

    fn builder(&mut self, device: Device) -> CommandBuilder<'_> {
        if !self.devices.contains(&device) {
            self.devices.push(device);
        }

        CommandBuilder::new(device, &mut self.teardown)
    }

    fn rewrite_submit(
        &mut self,
        id: CmdId,
        idx: &SubCmdIdx,
        queue: Queue,
        submits: &[SubmitInfo],
        fence: Fence,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        let mut new_submits = submits.to_vec();
        let mut pending = Vec::new();

        for (batch_index, (submit, new_submit)) in submits.iter().zip(&mut new_submits).enumerate()
        {
            let batch_idx = idx.child(batch_index as u64);
            let mut command_buffers = Vec::with_capacity(submit.command_buffers.len());

            for (index, &command_buffer) in submit.command_buffers.iter().enumerate() {
                let command_buffer_idx = batch_idx.child(index as u64);

                if self.has_request_inside(&command_buffer_idx) {
                    command_buffers.push(self.rewrite_command_buffer(
                        command_buffer,
                        &command_buffer_idx,
                        queue,
                        &mut pending,
                        out,
                    )?);
                } else {
                    pending.push(command_buffer);
                    command_buffers.push(command_buffer);
                }

                if self.take_request(&command_buffer_idx) {
                    command_buffers.push(self.insertion_command_buffer(
                        &command_buffer_idx,
                        queue,
                        &mut pending,
                        out,
                    )?);
                }
            }

            if self.take_request(&batch_idx) {
                command_buffers.push(self.insertion_command_buffer(
                    &batch_idx,
                    queue,
                    &mut pending,
                    out,
                )?);
            }

            new_submit.command_buffers = command_buffers;
        }

        out.mutate_and_write(
            id,
            Cmd::QueueSubmit {
                queue,
                submits: new_submits,
                fence,
            },
        )
    }

    /// Allocates a command buffer that can be submitted to `queue`, and begins recording it.
    fn begin_command_buffer(
        &mut self,
        queue: Queue,
        out: &mut dyn Writer,
    ) -> Result<CommandBuffer, TransformError> {
        let queue_object = out
            .state()
            .queues
            .get(&queue)
            .ok_or_else(|| TransformError::missing(queue))?;
        let key = (queue_object.device, queue_object.queue_family_index);

        let command_pool = match self.command_pools.get(&key) {
            Some(&command_pool) => command_pool,
            None => {
                let command_pool = self.builder(key.0).create_command_pool(out, key.1)?;
                self.command_pools.insert(key, command_pool);

                command_pool
            }
        };

        let mut builder = self.builder(key.0);
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

    /// Creates a command buffer holding nothing but the insertion point after `idx`.
    fn insertion_command_buffer(
        &mut self,
        idx: &SubCmdIdx,
        queue: Queue,
        pending: &mut Vec<CommandBuffer>,
        out: &mut dyn Writer,
    ) -> Result<CommandBuffer, TransformError> {
        let command_buffer = self.begin_command_buffer(queue, out)?;
        pending.push(command_buffer);

        out.write(Cmd::Insertion(InsertionCommand {
            idx: idx.clone(),
            command_buffer: Some(command_buffer),
            pending_command_buffers: pending.clone(),
            queue,
        }))?;
        out.write(Cmd::EndCommandBuffer { command_buffer })?;

        Ok(command_buffer)
    }

    fn rewrite_command_buffer(
        &mut self,
        original: CommandBuffer,
        idx: &SubCmdIdx,
        queue: Queue,
        pending: &mut Vec<CommandBuffer>,
        out: &mut dyn Writer,
    ) -> Result<CommandBuffer, TransformError> {
        let commands = out
            .state()
            .command_buffers
            .get(&original)
            .ok_or_else(|| TransformError::missing(original))?
            .commands
            .clone();

        let command_buffer = self.begin_command_buffer(queue, out)?;
        pending.push(command_buffer);
        log::debug!("rebuilding {original:?} at {idx} into {command_buffer:?}");

        let mut rewrite = Rewrite {
            command_buffer,
            queue,
            pending: pending.clone(),
            render_pass: None,
            pipeline: None,
        };
        self.rewrite_commands(&commands, idx, &mut rewrite, out)?;

        out.write(Cmd::EndCommandBuffer { command_buffer })?;

        Ok(command_buffer)
    }

    fn rewrite_commands(
        &mut self,
        commands: &[RecordedCommand],
        parent: &SubCmdIdx,
        rewrite: &mut Rewrite,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        for (index, command) in commands.iter().enumerate() {
            let idx = parent.child(index as u64);

            match command {
                RecordedCommand::BeginRenderPass {
                    begin_info,
                    contents,
                } => {
                    let end = commands[index..]
                        .iter()
                        .position(|command| matches!(command, RecordedCommand::EndRenderPass))
                        .map_or(commands.len(), |offset| index + offset);

                    if self.has_request_in_range(parent, index, end) {
                        let split = self.split_render_pass(begin_info.render_pass, out)?;
                        let enter = split
                            .first()
                            .ok_or_else(|| TransformError::missing(begin_info.render_pass))?
                            .enter;
                        rewrite.render_pass = Some(ActiveRenderPass {
                            begin_info: begin_info.clone(),
                            subpass: 0,
                            current: enter,
                            split: Some(split),
                        });
                        self.begin_split(rewrite, enter, out)?;
                    } else {
                        rewrite.render_pass = Some(ActiveRenderPass {
                            begin_info: begin_info.clone(),
                            subpass: 0,
                            current: begin_info.render_pass,
                            split: None,
                        });
                        rewrite.record(
                            out,
                            RecordedCommand::BeginRenderPass {
                                begin_info: begin_info.clone(),
                                contents: *contents,
                            },
                        )?;
                    }
                }
                RecordedCommand::NextSubpass { .. } if rewrite.is_split() => {
                    self.exit_subpass(rewrite, out)?;

                    if let Some(active) = &mut rewrite.render_pass {
                        active.subpass += 1;

                        if let Some(split) = active.split_passes() {
                            let enter = split.enter;
                            active.current = enter;
                            self.begin_split(rewrite, enter, out)?;
                        }
                    }
                }
                RecordedCommand::NextSubpass { .. } => {
                    if let Some(active) = &mut rewrite.render_pass {
                        active.subpass += 1;
                    }

                    rewrite.record(out, command.clone())?;
                }
                RecordedCommand::EndRenderPass => {
                    if rewrite.is_split() {
                        self.exit_subpass(rewrite, out)?;
                    } else {
                        rewrite.record(out, command.clone())?;
                    }

                    rewrite.render_pass = None;
                }
                &RecordedCommand::BindPipeline {
                    bind_point: PipelineBindPoint::Graphics,
                    pipeline,
                } => {
                    rewrite.pipeline = Some(pipeline);

                    let pipeline = match &rewrite.render_pass {
                        Some(active) if active.split.is_some() => {
                            self.retarget_pipeline(pipeline, active.current, out)?
                        }
                        _ => pipeline,
                    };
                    rewrite.record(
                        out,
                        RecordedCommand::BindPipeline {
                            bind_point: PipelineBindPoint::Graphics,
                            pipeline,
                        },
                    )?;
                }
                RecordedCommand::ExecuteCommands { command_buffers }
                    if rewrite.is_split() || self.has_request_inside(&idx) =>
                {
                    for (secondary_index, &secondary) in command_buffers.iter().enumerate() {
                        let secondary_idx = idx.child(secondary_index as u64);
                        let secondary_commands = out
                            .state()
                            .command_buffers
                            .get(&secondary)
                            .ok_or_else(|| TransformError::missing(secondary))?
                            .commands
                            .clone();

                        self.rewrite_commands(&secondary_commands, &secondary_idx, rewrite, out)?;

                        if self.take_request(&secondary_idx) {
                            self.insert(secondary_idx, rewrite, out)?;
                        }
                    }
                }
                _ => rewrite.record(out, command.clone())?,
            }

            if self.take_request(&idx) {
                self.insert(idx, rewrite, out)?;
            }
        }

        Ok(())
    }

    /// Writes the insertion point after `idx`, interrupting the current render pass if needed.
    fn insert(
        &mut self,
        idx: SubCmdIdx,
        rewrite: &mut Rewrite,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        let intermediate = rewrite
            .render_pass
            .as_ref()
            .and_then(ActiveRenderPass::split_passes)
            .map(|split| split.intermediate);

        if intermediate.is_some() {
            rewrite.record(out, RecordedCommand::EndRenderPass)?;
        }

        out.write(Cmd::Insertion(InsertionCommand {
            idx,
            command_buffer: Some(rewrite.command_buffer),
            pending_command_buffers: rewrite.pending.clone(),
            queue: rewrite.queue,
        }))?;

        if let Some(intermediate) = intermediate {
            if let Some(active) = &mut rewrite.render_pass {
                active.current = intermediate;
            }

            self.begin_split(rewrite, intermediate, out)?;
        }

        Ok(())
    }

    /// Begins `render_pass`, one of the render passes replacing the current subpass, and binds
    /// the current pipeline again.
    fn begin_split(
        &mut self,
        rewrite: &mut Rewrite,
        render_pass: RenderPass,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        let Some(active) = &rewrite.render_pass else {
            return Ok(());
        };

        let begin_info = RenderPassBeginInfo {
            render_pass,
            ..active.begin_info.clone()
        };
        rewrite.record(
            out,
            RecordedCommand::BeginRenderPass {
                begin_info,
                contents: SubpassContents::Inline,
            },
        )?;

        if let Some(pipeline) = rewrite.pipeline {
            let pipeline = self.retarget_pipeline(pipeline, render_pass, out)?;
            rewrite.record(
                out,
                RecordedCommand::BindPipeline {
                    bind_point: PipelineBindPoint::Graphics,
                    pipeline,
                },
            )?;
        }

        Ok(())
    }

    /// Ends the current subpass of a split render pass by running its exit render pass.
    fn exit_subpass(
        &mut self,
        rewrite: &mut Rewrite,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        rewrite.record(out, RecordedCommand::EndRenderPass)?;

        let Some((begin_info, exit)) = rewrite.render_pass.as_ref().and_then(|active| {
            active
                .split_passes()
                .map(|split| (active.begin_info.clone(), split.exit))
        }) else {
            return Ok(());
        };

        rewrite.record(
            out,
            RecordedCommand::BeginRenderPass {
                begin_info: RenderPassBeginInfo {
                    render_pass: exit,
                    ..begin_info
                },
                contents: SubpassContents::Inline,
            },
        )?;
        rewrite.record(out, RecordedCommand::EndRenderPass)
    }

    fn split_render_pass(
        &mut self,
        render_pass: RenderPass,
        out: &mut dyn Writer,
    ) -> Result<Vec<SplitRenderPasses>, TransformError> {
        if let Some(split) = self.render_passes.get(&render_pass) {
            return Ok(split.clone());
        }

        let render_pass_object = out
            .state()
            .render_passes
            .get(&render_pass)
            .ok_or_else(|| TransformError::missing(render_pass))?;
        let device = render_pass_object.device;
        let infos = split_render_pass_infos(&render_pass_object.create_info);

        let mut builder = self.builder(device);
        let mut split = Vec::with_capacity(infos.len());

        for infos in infos {
            split.push(SplitRenderPasses {
                enter: builder.create_render_pass(out, infos.enter)?,
                intermediate: builder.create_render_pass(out, infos.intermediate)?,
                exit: builder.create_render_pass(out, infos.exit)?,
            });
        }

        log::debug!("split {render_pass:?} into {} subpasses", split.len());
        self.render_passes.insert(render_pass, split.clone());

        Ok(split)
    }

    /// Returns a copy of a graphics pipeline that can be used with `render_pass`.
    fn retarget_pipeline(
        &mut self,
        pipeline: Pipeline,
        render_pass: RenderPass,
        out: &mut dyn Writer,
    ) -> Result<Pipeline, TransformError> {
        if let Some(&retargeted) = self.pipelines.get(&(pipeline, render_pass)) {
            return Ok(retargeted);
        }

        let pipeline_object = out
            .state()
            .pipelines
            .get(&pipeline)
            .ok_or_else(|| TransformError::missing(pipeline))?;
        let PipelineCreateInfo::Graphics(create_info) = &pipeline_object.create_info else {
            return Ok(pipeline);
        };

        let device = pipeline_object.device;
        let create_info = GraphicsPipelineCreateInfo {
            render_pass,
            subpass: 0,
            ..create_info.clone()
        };
        let retargeted = self
            .builder(device)
            .create_graphics_pipeline(out, create_info)?;
        self.pipelines.insert((pipeline, render_pass), retargeted);

        Ok(retargeted)
    }
}

impl Transform for CommandSplitter {
    fn name(&self) -> &'static str {
        "command splitter"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        self.started = true;

        if id.is_derived() {
            return out.mutate_and_write(id, cmd);
        }

        while self.requested.last().is_some_and(|next| next[0] < id.0) {
            self.not_found.extend(self.requested.pop());
        }

        let idx = SubCmdIdx::new(&[id.0]);
        let submit_queue = match &cmd {
            Cmd::QueueSubmit { queue, .. } => Some(*queue),
            _ => None,
        };

        match cmd {
            Cmd::QueueSubmit {
                queue,
                submits,
                fence,
            } if self.has_request_inside(&idx) => {
                self.rewrite_submit(id, &idx, queue, &submits, fence, out)?;
            }
            cmd => out.mutate_and_write(id, cmd)?,
        }

        if self.take_request(&idx) {
            let queue = submit_queue
                .or(out.state().last_submit_queue)
                .unwrap_or(Queue::NULL);

            out.write(Cmd::Insertion(InsertionCommand {
                idx,
                command_buffer: None,
                pending_command_buffers: Vec::new(),
                queue,
            }))?;
        }

        Ok(())
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        let mut result = Ok(());

        for device in mem::take(&mut self.devices) {
            if out.state().devices.contains(&device) {
                if let Err(err) = out.write(Cmd::DeviceWaitIdle { device }) {
                    result = result.and(Err(err));
                }
            }
        }

        if let Err(err) = self.teardown.unwind(out) {
            result = result.and(Err(err));
        }

        self.render_passes.clear();
        self.pipelines.clear();
        self.command_pools.clear();

        let mut not_found = mem::take(&mut self.not_found);
        not_found.extend(self.requested.drain(..));

        if !not_found.is_empty() {
            not_found.sort();

            return Err(TransformError::RequestedCommandsNotFound(not_found));
        }

        result
    }
}

/// The command buffer being rebuilt.
struct Rewrite {
    command_buffer: CommandBuffer,
    queue: Queue,
    pending: Vec<CommandBuffer>,
    render_pass: Option<ActiveRenderPass>,
    /// The graphics pipeline bound by the original commands.
    pipeline: Option<Pipeline>,
}

impl Rewrite {
    fn is_split(&self) -> bool {
        self.render_pass
            .as_ref()
            .is_some_and(|active| active.split.is_some())
    }

    fn record(
        &self,
        out: &mut dyn Writer,
        command: RecordedCommand,
    ) -> Result<(), TransformError> {
        out.write(Cmd::record(self.command_buffer, command))
    }
}

struct ActiveRenderPass {
    begin_info: RenderPassBeginInfo,
    subpass: u32,
    /// The render pass that is begun in the rebuilt command buffer.
    current: RenderPass,
    split: Option<Vec<SplitRenderPasses>>,
}

impl ActiveRenderPass {
    fn split_passes(&self) -> Option<SplitRenderPasses> {
        self.split
            .as_ref()
            .and_then(|split| split.get(self.subpass as usize))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandSplitter, CommandSplitterCreateInfo};
    use crate::{
        command::{Cmd, CmdId},
        command_buffer::RecordedCommand,
        render_pass::{RenderPass, SubpassContents},
        replay::CommandRecorder,
        sub_cmd_idx::SubCmdIdx,
        tests::{InsertionLog, TestScene},
        transform::{TransformError, Transformer},
    };

    /// Returns the render passes begun by `commands`.
    fn begun_render_passes(commands: &[RecordedCommand]) -> Vec<RenderPass> {
        commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::BeginRenderPass { begin_info, .. } => {
                    Some(begin_info.render_pass)
                }
                _ => None,
            })
            .collect()
    }

    fn count(commands: &[RecordedCommand], name: &str) -> usize {
        commands
            .iter()
            .filter(|command| command.name() == name)
            .count()
    }

    /// Runs a submission of `command_buffer` through a splitter, and returns the transformer,
    /// the command buffer submitted in its place, and the insertions seen after the splitter.
    fn run_split(
        scene: &TestScene,
        command_buffer: crate::command_buffer::CommandBuffer,
        requests: &[SubCmdIdx],
    ) -> (Transformer<CommandRecorder>, InsertionLog, Vec<crate::command_buffer::CommandBuffer>) {
        let submit_id = scene.next_id();
        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());

        for idx in requests {
            splitter.split(idx.clone());
        }

        let seen = InsertionLog::default();
        let mut transformer = scene.transformer();
        transformer.add(splitter).add(seen.clone());
        transformer
            .transform(CmdId(submit_id), scene.submit_cmd(&[command_buffer]))
            .unwrap();

        let submitted = transformer
            .builder()
            .commands()
            .iter()
            .find_map(|(id, cmd)| match cmd {
                Cmd::QueueSubmit { submits, .. } if *id == CmdId(submit_id) => {
                    Some(submits[0].command_buffers.clone())
                }
                _ => None,
            })
            .unwrap();

        (transformer, seen, submitted)
    }

    #[test]
    fn split_inside_subpass() {
        let mut scene = TestScene::new();
        let (render_pass, framebuffer) = scene.create_render_pass(2);
        let pipeline = scene.create_pipeline(render_pass, 0, None);
        let command_buffer = scene.record(&[
            scene.begin_render_pass(render_pass, framebuffer, SubpassContents::Inline),
            scene.bind_pipeline(pipeline),
            TestScene::draw(),
            TestScene::draw(),
            TestScene::draw(),
            RecordedCommand::NextSubpass {
                contents: SubpassContents::Inline,
            },
            TestScene::draw(),
            RecordedCommand::EndRenderPass,
        ]);
        let target = SubCmdIdx::from([scene.next_id(), 0, 0, 3]);

        let (mut transformer, seen, submitted) =
            run_split(&scene, command_buffer, &[target.clone()]);
        assert_eq!(submitted.len(), 1);
        assert_ne!(submitted[0], command_buffer);

        let state = transformer.state();
        let commands = &state.command_buffers[submitted[0]].commands;
        let begun = begun_render_passes(commands);
        assert_eq!(begun.len(), 5);
        assert!(!begun.contains(&render_pass));

        // enter 0, intermediate 0, exit 0, enter 1, exit 1
        let split_infos = |render_pass: RenderPass| {
            state.render_passes[render_pass].create_info.clone()
        };
        assert_eq!(split_infos(begun[0]).subpasses.len(), 1);
        assert_ne!(begun[0], begun[1]);
        assert_ne!(begun[1], begun[2]);
        assert_eq!(count(commands, "vkCmdDraw"), 4);
        assert_eq!(count(commands, "vkCmdEndRenderPass"), 5);
        assert_eq!(count(commands, "vkCmdNextSubpass"), 0);

        let names: Vec<_> = commands.iter().map(RecordedCommand::name).collect();
        assert_eq!(
            names[..6],
            [
                "vkCmdBeginRenderPass",
                "vkCmdBindPipeline",
                "vkCmdDraw",
                "vkCmdDraw",
                "vkCmdEndRenderPass",
                "vkCmdBeginRenderPass",
            ],
        );

        let insertions = seen.insertions();
        assert_eq!(insertions.len(), 1);
        assert_eq!(insertions[0].insertion.idx, target);
        assert_eq!(insertions[0].insertion.command_buffer, Some(submitted[0]));
        assert_eq!(
            insertions[0].insertion.pending_command_buffers,
            [submitted[0]],
        );
        // The insertion lies right after the intermediate end of the render pass.
        assert_eq!(insertions[0].recorded, 5);

        // Every pipeline bound inside the split render pass targets the render pass it is
        // bound in.
        let mut current = None;

        for command in commands {
            match command {
                RecordedCommand::BeginRenderPass { begin_info, .. } => {
                    current = Some(begin_info.render_pass);
                }
                RecordedCommand::BindPipeline { pipeline, .. } => {
                    let crate::pipeline::PipelineCreateInfo::Graphics(create_info) =
                        &state.pipelines[*pipeline].create_info
                    else {
                        unreachable!();
                    };
                    assert_eq!(Some(create_info.render_pass), current);
                    assert_eq!(create_info.subpass, 0);
                }
                _ => {}
            }
        }

        transformer.flush().unwrap();
        assert!(!transformer.state().render_passes.contains(&begun[0]));
    }

    #[test]
    fn untargeted_render_pass_is_unchanged() {
        let mut scene = TestScene::new();
        let (render_pass, framebuffer) = scene.create_render_pass(2);
        let pipeline = scene.create_pipeline(render_pass, 0, None);
        let original = vec![
            scene.begin_render_pass(render_pass, framebuffer, SubpassContents::Inline),
            scene.bind_pipeline(pipeline),
            TestScene::draw(),
            RecordedCommand::NextSubpass {
                contents: SubpassContents::Inline,
            },
            TestScene::draw(),
            RecordedCommand::EndRenderPass,
        ];
        let command_buffer = scene.record(&original);
        let target = SubCmdIdx::from([scene.next_id(), 0, 0, 5]);

        let (transformer, seen, submitted) = run_split(&scene, command_buffer, &[target]);
        assert_ne!(submitted[0], command_buffer);
        assert_eq!(
            transformer.state().command_buffers[submitted[0]].commands,
            original,
        );
        assert_eq!(seen.insertions()[0].recorded, original.len());
    }

    #[test]
    fn insertion_command_buffers() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(1);
        let submit_id = scene.next_id();
        let requests = [
            SubCmdIdx::from([submit_id, 0, 0]),
            SubCmdIdx::from([submit_id, 0]),
            SubCmdIdx::from([submit_id]),
        ];

        let (_transformer, seen, submitted) = run_split(&scene, command_buffer, &requests);

        // The original command buffer is submitted as is, followed by one command buffer per
        // insertion point inside the submission.
        assert_eq!(submitted.len(), 3);
        assert_eq!(submitted[0], command_buffer);

        let insertions = seen.insertions();
        let idxs: Vec<_> = insertions
            .iter()
            .map(|seen| seen.insertion.idx.clone())
            .collect();
        assert_eq!(idxs, requests);
        assert_eq!(insertions[0].insertion.command_buffer, Some(submitted[1]));
        assert_eq!(
            insertions[1].insertion.pending_command_buffers,
            submitted,
        );
        assert_eq!(insertions[2].insertion.command_buffer, None);
        assert_eq!(insertions[2].insertion.queue, scene.queue);
    }

    #[test]
    fn secondary_command_buffers_are_inlined() {
        let mut scene = TestScene::new();
        let pipeline = scene.pipeline;
        let secondary = scene.record_secondary(&[
            scene.bind_pipeline(pipeline),
            TestScene::draw(),
            TestScene::draw(),
        ]);
        let command_buffer = scene.record(&[
            scene.begin_render_pass(
                scene.render_pass,
                scene.framebuffer,
                SubpassContents::SecondaryCommandBuffers,
            ),
            RecordedCommand::ExecuteCommands {
                command_buffers: vec![secondary],
            },
            RecordedCommand::EndRenderPass,
        ]);
        let target = SubCmdIdx::from([scene.next_id(), 0, 0, 1, 0, 1]);

        let (transformer, seen, submitted) = run_split(&scene, command_buffer, &[target]);
        let commands = &transformer.state().command_buffers[submitted[0]].commands;

        assert_eq!(count(commands, "vkCmdExecuteCommands"), 0);
        assert_eq!(count(commands, "vkCmdDraw"), 2);
        assert!(commands.iter().all(|command| !matches!(
            command,
            RecordedCommand::BeginRenderPass {
                contents: SubpassContents::SecondaryCommandBuffers,
                ..
            },
        )));
        // Begin, bind, draw, end.
        assert_eq!(seen.insertions()[0].recorded, 4);
    }

    #[test]
    fn top_level_insertion() {
        let scene = TestScene::new();
        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo {
            initial_command_count: 100,
            ..Default::default()
        });
        splitter.split([3]);
        assert_eq!(
            splitter.requested_commands().collect::<Vec<_>>(),
            [&SubCmdIdx::from([103])],
        );

        let seen = InsertionLog::default();
        let mut transformer = scene.transformer();
        transformer.add(splitter).add(seen.clone());
        transformer
            .transform(
                CmdId(103),
                Cmd::DeviceWaitIdle {
                    device: scene.device,
                },
            )
            .unwrap();

        let insertions = seen.insertions();
        assert_eq!(insertions.len(), 1);
        assert_eq!(insertions[0].insertion.idx, SubCmdIdx::from([103]));
        assert_eq!(insertions[0].insertion.command_buffer, None);
        transformer.flush().unwrap();
    }

    #[test]
    fn requested_commands_not_found() {
        let scene = TestScene::new();
        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());
        splitter.split([scene.next_id(), 0, 0, 7]);
        splitter.split([scene.next_id() + 5]);

        let mut transformer = scene.transformer();
        transformer.add(splitter);
        transformer
            .transform(
                CmdId(scene.next_id()),
                Cmd::DeviceWaitIdle {
                    device: scene.device,
                },
            )
            .unwrap();

        let errors = transformer.flush().unwrap_err();
        assert_eq!(errors.len(), 1);
        let TransformError::RequestedCommandsNotFound(missing) = &errors[0] else {
            panic!("unexpected error: {}", errors[0]);
        };
        assert_eq!(
            missing,
            &[
                SubCmdIdx::from([scene.next_id(), 0, 0, 7]),
                SubCmdIdx::from([scene.next_id() + 5]),
            ],
        );
    }

    #[test]
    #[should_panic = "empty path"]
    fn split_empty_path() {
        CommandSplitter::new(CommandSplitterCreateInfo::default()).split(SubCmdIdx::new(&[]));
    }

    #[test]
    #[should_panic = "after commands have been processed"]
    fn split_after_start() {
        let mut scene = TestScene::new();
        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());
        let device = scene.device;

        crate::transform::Transform::transform(
            &mut splitter,
            CmdId(scene.next_id()),
            Cmd::DeviceWaitIdle { device },
            &mut scene.writer,
        )
        .unwrap();
        splitter.split([1]);
    }

    #[test]
    #[should_panic = "execution order"]
    fn remove_out_of_order() {
        let mut splitter = CommandSplitter::new(CommandSplitterCreateInfo::default());
        splitter.split([4, 0, 0, 2]);
        splitter.split([4]);
        splitter.remove_from_requested(&SubCmdIdx::from([4]));
    }
}

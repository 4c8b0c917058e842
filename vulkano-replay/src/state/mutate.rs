use super::{
    BufferObject, CommandBufferObject, CommandPoolObject, DescriptorPoolObject,
    DescriptorSetLayoutObject, DescriptorSetObject, DeviceMemoryObject, DeviceObject, DrawInfo,
    FenceObject, FramebufferObject, GlobalState, ImageObject, ImageViewObject, MemoryBinding,
    MemoryMapping, MutateError, PipelineLayoutObject, PipelineObject, QueueObject,
    RecordingState, RenderPassObject, SemaphoreObject, ShaderModuleObject, SwapchainObject,
};
use crate::{
    command::Cmd,
    command_buffer::{CommandBuffer, CommandBufferLevel, RecordedCommand},
    device::Queue,
    image::{ImageCreateInfo, ImageType, ImageTiling},
    memory::MemoryPropertyFlags,
    pipeline::PipelineCreateInfo,
    render_pass::RenderPassBeginInfo,
    sync::FenceCreateInfo,
};

impl Cmd {
    /// Applies the effects of the command to `state`.
    ///
    /// On error, the state is left as it was before, except for `QueueSubmit`, which applies
    /// the command buffers it executed before the failing one.
    pub fn mutate(&self, state: &mut GlobalState) -> Result<(), MutateError> {
        match self {
            Cmd::CreateDevice {
                create_info,
                device,
            } => {
                state.devices.insert_new(
                    *device,
                    DeviceObject {
                        create_info: create_info.clone(),
                        queues: Vec::new(),
                    },
                )?;
            }
            Cmd::DestroyDevice { device } => {
                let device_object = state.devices.remove_existing(device)?;

                for queue in &device_object.queues {
                    state.queues.remove(queue);
                }
            }
            Cmd::GetDeviceQueue {
                device,
                queue_family_index,
                queue_index,
                queue,
            } => {
                let flags = state
                    .devices
                    .require(device)?
                    .create_info
                    .queue_flags(*queue_family_index);

                if !state.queues.contains(queue) {
                    state.queues.insert_new(
                        *queue,
                        QueueObject {
                            device: *device,
                            queue_family_index: *queue_family_index,
                            queue_index: *queue_index,
                            flags,
                            last_draw_info: None,
                        },
                    )?;
                    state.devices.require_mut(device)?.queues.push(*queue);
                }
            }
            Cmd::DeviceWaitIdle { device } => {
                state.devices.require(device)?;
            }
            Cmd::QueueWaitIdle { queue } => {
                state.queues.require(queue)?;
            }

            Cmd::AllocateMemory {
                device,
                allocate_info,
                memory,
            } => {
                let property_flags = state
                    .devices
                    .require(device)?
                    .create_info
                    .memory_types
                    .get(allocate_info.memory_type_index as usize)
                    .map_or(MemoryPropertyFlags::empty(), |memory_type| {
                        memory_type.property_flags
                    });
                state.memories.insert_new(
                    *memory,
                    DeviceMemoryObject {
                        device: *device,
                        allocate_info: allocate_info.clone(),
                        property_flags,
                        mapping: None,
                    },
                )?;
            }
            Cmd::FreeMemory { memory, .. } => {
                state.memories.remove_existing(memory)?;
            }
            Cmd::MapMemory {
                memory,
                offset,
                size,
                address,
                ..
            } => {
                let memory_object = state.memories.require_mut(memory)?;

                if *offset + *size > memory_object.allocate_info.allocation_size {
                    return Err(MutateError::InvalidArguments(
                        "the mapped range exceeds the allocation",
                    ));
                }

                memory_object.mapping = Some(MemoryMapping {
                    offset: *offset,
                    size: *size,
                    address: *address,
                });
            }
            Cmd::UnmapMemory { memory, .. } => {
                let memory_object = state.memories.require_mut(memory)?;

                if memory_object.mapping.take().is_none() {
                    return Err(MutateError::NotMapped(*memory));
                }
            }
            Cmd::InvalidateMappedMemoryRanges { ranges, .. } => {
                for range in ranges {
                    if state.memories.require(&range.memory)?.mapping.is_none() {
                        return Err(MutateError::NotMapped(range.memory));
                    }
                }
            }

            Cmd::CreateBuffer {
                device,
                create_info,
                buffer,
            } => {
                state.devices.require(device)?;
                state.buffers.insert_new(
                    *buffer,
                    BufferObject {
                        device: *device,
                        create_info: create_info.clone(),
                        memory: None,
                        last_bound_queue: None,
                    },
                )?;
            }
            Cmd::DestroyBuffer { buffer, .. } => {
                state.buffers.remove_existing(buffer)?;
            }
            Cmd::BindBufferMemory {
                buffer,
                memory,
                offset,
                ..
            } => {
                state.memories.require(memory)?;
                state.buffers.require_mut(buffer)?.memory = Some(MemoryBinding {
                    memory: *memory,
                    offset: *offset,
                });
            }
            Cmd::CreateImage {
                device,
                create_info,
                image,
            } => {
                state.devices.require(device)?;
                state
                    .images
                    .insert_new(*image, ImageObject::new(*device, create_info.clone()))?;
            }
            Cmd::DestroyImage { image, .. } => {
                state.images.remove_existing(image)?;
            }
            Cmd::BindImageMemory {
                image,
                memory,
                offset,
                ..
            } => {
                state.memories.require(memory)?;
                state.images.require_mut(image)?.memory = Some(MemoryBinding {
                    memory: *memory,
                    offset: *offset,
                });
            }
            Cmd::CreateImageView {
                device,
                create_info,
                image_view,
            } => {
                state.images.require(&create_info.image)?;
                state.image_views.insert_new(
                    *image_view,
                    ImageViewObject {
                        device: *device,
                        create_info: create_info.clone(),
                    },
                )?;
            }
            Cmd::DestroyImageView { image_view, .. } => {
                state.image_views.remove_existing(image_view)?;
            }

            Cmd::CreateRenderPass {
                device,
                create_info,
                render_pass,
            } => {
                if create_info.subpasses.is_empty() {
                    return Err(MutateError::InvalidArguments(
                        "a render pass must have at least one subpass",
                    ));
                }

                state.devices.require(device)?;
                state.render_passes.insert_new(
                    *render_pass,
                    RenderPassObject {
                        device: *device,
                        create_info: create_info.clone(),
                    },
                )?;
            }
            Cmd::DestroyRenderPass { render_pass, .. } => {
                state.render_passes.remove_existing(render_pass)?;
            }
            Cmd::CreateFramebuffer {
                device,
                create_info,
                framebuffer,
            } => {
                state.render_passes.require(&create_info.render_pass)?;

                for view in &create_info.attachments {
                    state.image_views.require(view)?;
                }

                state.framebuffers.insert_new(
                    *framebuffer,
                    FramebufferObject {
                        device: *device,
                        create_info: create_info.clone(),
                    },
                )?;
            }
            Cmd::DestroyFramebuffer { framebuffer, .. } => {
                state.framebuffers.remove_existing(framebuffer)?;
            }

            Cmd::CreateShaderModule {
                device,
                code,
                shader_module,
            } => {
                state.host_memory.check_access(code.address, code.len())?;
                state.shader_modules.insert_new(
                    *shader_module,
                    ShaderModuleObject {
                        device: *device,
                        code: code.data.clone(),
                    },
                )?;
            }
            Cmd::DestroyShaderModule { shader_module, .. } => {
                state.shader_modules.remove_existing(shader_module)?;
            }
            Cmd::CreateDescriptorSetLayout {
                device,
                create_info,
                set_layout,
            } => {
                state.descriptor_set_layouts.insert_new(
                    *set_layout,
                    DescriptorSetLayoutObject {
                        device: *device,
                        create_info: create_info.clone(),
                    },
                )?;
            }
            Cmd::DestroyDescriptorSetLayout { set_layout, .. } => {
                state.descriptor_set_layouts.remove_existing(set_layout)?;
            }
            Cmd::CreatePipelineLayout {
                device,
                create_info,
                pipeline_layout,
            } => {
                for set_layout in &create_info.set_layouts {
                    state.descriptor_set_layouts.require(set_layout)?;
                }

                state.pipeline_layouts.insert_new(
                    *pipeline_layout,
                    PipelineLayoutObject {
                        device: *device,
                        create_info: create_info.clone(),
                    },
                )?;
            }
            Cmd::DestroyPipelineLayout {
                pipeline_layout, ..
            } => {
                state.pipeline_layouts.remove_existing(pipeline_layout)?;
            }
            Cmd::CreateDescriptorPool {
                device,
                create_info,
                descriptor_pool,
            } => {
                state.descriptor_pools.insert_new(
                    *descriptor_pool,
                    DescriptorPoolObject {
                        device: *device,
                        create_info: create_info.clone(),
                        descriptor_sets: Vec::new(),
                    },
                )?;
            }
            Cmd::DestroyDescriptorPool {
                descriptor_pool, ..
            } => {
                let pool = state.descriptor_pools.remove_existing(descriptor_pool)?;

                for descriptor_set in &pool.descriptor_sets {
                    state.descriptor_sets.remove(descriptor_set);
                }
            }
            Cmd::AllocateDescriptorSets {
                device,
                allocate_info,
                descriptor_sets,
            } => {
                if allocate_info.set_layouts.len() != descriptor_sets.len() {
                    return Err(MutateError::InvalidArguments(
                        "one descriptor set must be allocated per set layout",
                    ));
                }

                state.descriptor_pools.require(&allocate_info.descriptor_pool)?;

                for (&descriptor_set, set_layout) in
                    descriptor_sets.iter().zip(&allocate_info.set_layouts)
                {
                    state.descriptor_set_layouts.require(set_layout)?;
                    state.descriptor_sets.insert_new(
                        descriptor_set,
                        DescriptorSetObject {
                            device: *device,
                            descriptor_pool: allocate_info.descriptor_pool,
                            layout: *set_layout,
                            writes: Vec::new(),
                        },
                    )?;
                    state
                        .descriptor_pools
                        .require_mut(&allocate_info.descriptor_pool)?
                        .descriptor_sets
                        .push(descriptor_set);
                }
            }
            Cmd::UpdateDescriptorSets { writes, .. } => {
                for write in writes {
                    state.descriptor_sets.require(&write.dst_set)?;
                }

                for write in writes {
                    let descriptor_set = state.descriptor_sets.require_mut(&write.dst_set)?;
                    descriptor_set
                        .writes
                        .retain(|existing| existing.dst_binding != write.dst_binding);
                    descriptor_set.writes.push(write.clone());
                }
            }
            Cmd::CreateGraphicsPipelines {
                device,
                create_infos,
                pipelines,
            } => {
                if create_infos.len() != pipelines.len() {
                    return Err(MutateError::InvalidArguments(
                        "one pipeline must be created per create info",
                    ));
                }

                for create_info in create_infos {
                    let render_pass = state.render_passes.require(&create_info.render_pass)?;

                    if create_info.subpass as usize >= render_pass.create_info.subpasses.len() {
                        return Err(MutateError::InvalidArguments(
                            "the subpass doesn't exist in the render pass",
                        ));
                    }

                    state.pipeline_layouts.require(&create_info.layout)?;
                }

                for (&pipeline, create_info) in pipelines.iter().zip(create_infos) {
                    state.pipelines.insert_new(
                        pipeline,
                        PipelineObject {
                            device: *device,
                            create_info: PipelineCreateInfo::Graphics(create_info.clone()),
                        },
                    )?;
                }
            }
            Cmd::CreateComputePipelines {
                device,
                create_infos,
                pipelines,
            } => {
                if create_infos.len() != pipelines.len() {
                    return Err(MutateError::InvalidArguments(
                        "one pipeline must be created per create info",
                    ));
                }

                for (&pipeline, create_info) in pipelines.iter().zip(create_infos) {
                    state.pipeline_layouts.require(&create_info.layout)?;
                    state.pipelines.insert_new(
                        pipeline,
                        PipelineObject {
                            device: *device,
                            create_info: PipelineCreateInfo::Compute(create_info.clone()),
                        },
                    )?;
                }
            }
            Cmd::DestroyPipeline { pipeline, .. } => {
                state.pipelines.remove_existing(pipeline)?;
            }

            Cmd::CreateCommandPool {
                device,
                create_info,
                command_pool,
            } => {
                state.devices.require(device)?;
                state.command_pools.insert_new(
                    *command_pool,
                    CommandPoolObject {
                        device: *device,
                        queue_family_index: create_info.queue_family_index,
                        command_buffers: Vec::new(),
                    },
                )?;
            }
            Cmd::DestroyCommandPool { command_pool, .. } => {
                let pool = state.command_pools.remove_existing(command_pool)?;

                for command_buffer in &pool.command_buffers {
                    state.command_buffers.remove(command_buffer);
                }
            }
            Cmd::AllocateCommandBuffers {
                device,
                allocate_info,
                command_buffers,
            } => {
                state.command_pools.require(&allocate_info.command_pool)?;

                for &command_buffer in command_buffers {
                    state.command_buffers.insert_new(
                        command_buffer,
                        CommandBufferObject {
                            device: *device,
                            command_pool: allocate_info.command_pool,
                            level: allocate_info.level,
                            recording: RecordingState::Initial,
                            begin_info: Default::default(),
                            commands: Vec::new(),
                        },
                    )?;
                    state
                        .command_pools
                        .require_mut(&allocate_info.command_pool)?
                        .command_buffers
                        .push(command_buffer);
                }
            }
            Cmd::FreeCommandBuffers {
                command_pool,
                command_buffers,
                ..
            } => {
                for command_buffer in command_buffers {
                    state.command_buffers.remove_existing(command_buffer)?;
                }

                state
                    .command_pools
                    .require_mut(command_pool)?
                    .command_buffers
                    .retain(|command_buffer| !command_buffers.contains(command_buffer));
            }
            Cmd::BeginCommandBuffer {
                command_buffer,
                begin_info,
            } => {
                let command_buffer_object = state.command_buffers.require_mut(command_buffer)?;

                if command_buffer_object.recording == RecordingState::Recording {
                    return Err(MutateError::InvalidArguments(
                        "the command buffer is already being recorded",
                    ));
                }

                command_buffer_object.recording = RecordingState::Recording;
                command_buffer_object.begin_info = begin_info.clone();
                command_buffer_object.commands.clear();
            }
            Cmd::EndCommandBuffer { command_buffer } => {
                let command_buffer_object = state.command_buffers.require_mut(command_buffer)?;

                if command_buffer_object.recording != RecordingState::Recording {
                    return Err(MutateError::NotRecording(*command_buffer));
                }

                command_buffer_object.recording = RecordingState::Executable;
            }
            Cmd::Record {
                command_buffer,
                command,
            } => {
                validate_recorded(state, command)?;

                let command_buffer_object = state.command_buffers.require_mut(command_buffer)?;

                if command_buffer_object.recording != RecordingState::Recording {
                    return Err(MutateError::NotRecording(*command_buffer));
                }

                command_buffer_object.commands.push(command.clone());
            }

            Cmd::CreateFence {
                device,
                create_info: FenceCreateInfo { signaled },
                fence,
            } => {
                state.fences.insert_new(
                    *fence,
                    FenceObject {
                        device: *device,
                        signaled: *signaled,
                    },
                )?;
            }
            Cmd::DestroyFence { fence, .. } => {
                state.fences.remove_existing(fence)?;
            }
            Cmd::ResetFences { fences, .. } => {
                for fence in fences {
                    state.fences.require_mut(fence)?.signaled = false;
                }
            }
            Cmd::WaitForFences { fences, .. } => {
                for fence in fences {
                    state.fences.require(fence)?;
                }
            }
            Cmd::CreateSemaphore { device, semaphore } => {
                state
                    .semaphores
                    .insert_new(*semaphore, SemaphoreObject { device: *device })?;
            }
            Cmd::DestroySemaphore { semaphore, .. } => {
                state.semaphores.remove_existing(semaphore)?;
            }
            Cmd::QueueSubmit {
                queue,
                submits,
                fence,
            } => {
                state.queues.require(queue)?;

                if !fence.is_null() {
                    state.fences.require(fence)?;
                }

                for submit in submits {
                    for command_buffer in &submit.command_buffers {
                        let command_buffer_object =
                            state.command_buffers.require(command_buffer)?;

                        if command_buffer_object.recording != RecordingState::Executable
                            || command_buffer_object.level != CommandBufferLevel::Primary
                        {
                            return Err(MutateError::NotExecutable(*command_buffer));
                        }
                    }
                }

                for submit in submits {
                    for &command_buffer in &submit.command_buffers {
                        execute_command_buffer(state, *queue, command_buffer, &mut None)?;
                    }
                }

                if let Some(fence) = state.fences.get_mut(fence) {
                    fence.signaled = true;
                }

                state.last_submit_queue = Some(*queue);
            }

            Cmd::CreateSwapchain {
                device,
                create_info,
                swapchain,
                images,
            } => {
                state.devices.require(device)?;
                state.swapchains.insert_new(
                    *swapchain,
                    SwapchainObject {
                        device: *device,
                        create_info: create_info.clone(),
                        images: images.clone(),
                    },
                )?;

                let [width, height] = create_info.image_extent;

                for &image in images {
                    let mut image_object = ImageObject::new(
                        *device,
                        ImageCreateInfo {
                            image_type: ImageType::Dim2d,
                            format: create_info.image_format,
                            extent: [width, height, 1],
                            tiling: ImageTiling::Optimal,
                            usage: create_info.image_usage,
                            ..Default::default()
                        },
                    );
                    image_object.swapchain_owned = true;
                    state.images.insert_new(image, image_object)?;
                }
            }
            Cmd::DestroySwapchain { swapchain, .. } => {
                let swapchain_object = state.swapchains.remove_existing(swapchain)?;

                for image in &swapchain_object.images {
                    state.images.remove(image);
                }
            }
            Cmd::QueuePresent {
                queue,
                present_info,
            } => {
                state.queues.require(queue)?;

                for swapchain in &present_info.swapchains {
                    state.swapchains.require(swapchain)?;
                }
            }

            Cmd::Insertion(_) | Cmd::Post(_) => {}
        }

        Ok(())
    }
}

/// Checks that the objects a recorded command references exist.
fn validate_recorded(state: &GlobalState, command: &RecordedCommand) -> Result<(), MutateError> {
    match command {
        RecordedCommand::BeginRenderPass { begin_info, .. } => {
            state.render_passes.require(&begin_info.render_pass)?;
            state.framebuffers.require(&begin_info.framebuffer)?;
        }
        RecordedCommand::BindPipeline { pipeline, .. } => {
            state.pipelines.require(pipeline)?;
        }
        RecordedCommand::BindDescriptorSets {
            descriptor_sets, ..
        } => {
            for descriptor_set in descriptor_sets {
                state.descriptor_sets.require(descriptor_set)?;
            }
        }
        RecordedCommand::ExecuteCommands { command_buffers } => {
            for command_buffer in command_buffers {
                let secondary = state.command_buffers.require(command_buffer)?;

                if secondary.level != CommandBufferLevel::Secondary
                    || secondary.recording != RecordingState::Executable
                {
                    return Err(MutateError::NotExecutable(*command_buffer));
                }
            }
        }
        _ => {}
    }

    for image in command.images() {
        state.images.require(&image)?;
    }

    for buffer in command.buffers() {
        state.buffers.require(&buffer)?;
    }

    Ok(())
}

/// Applies the effects of executing `command_buffer` on `queue`.
fn execute_command_buffer(
    state: &mut GlobalState,
    queue: Queue,
    command_buffer: CommandBuffer,
    render_pass: &mut Option<(RenderPassBeginInfo, u32)>,
) -> Result<(), MutateError> {
    let commands = state.command_buffers.require(&command_buffer)?.commands.clone();

    for command in &commands {
        match command {
            RecordedCommand::BeginRenderPass { begin_info, .. } => {
                *render_pass = Some((begin_info.clone(), 0));
                set_last_draw_info(state, queue, begin_info, 0)?;

                let attachments = state
                    .framebuffers
                    .require(&begin_info.framebuffer)?
                    .create_info
                    .attachments
                    .clone();

                for view in &attachments {
                    let image = state.image_views.require(view)?.image();
                    state.images.require_mut(&image)?.last_bound_queue = Some(queue);
                }
            }
            RecordedCommand::NextSubpass { .. } => {
                if let Some((begin_info, subpass)) = render_pass {
                    *subpass += 1;
                    let subpass = *subpass;
                    set_last_draw_info(state, queue, begin_info, subpass)?;
                }
            }
            RecordedCommand::EndRenderPass => {
                if let Some((begin_info, _)) = render_pass.take() {
                    apply_final_layouts(state, &begin_info)?;
                }
            }
            RecordedCommand::PipelineBarrier {
                image_memory_barriers,
                ..
            } => {
                for barrier in image_memory_barriers {
                    state
                        .images
                        .require_mut(&barrier.image)?
                        .set_layout(&barrier.subresource_range, barrier.new_layout);
                }
            }
            RecordedCommand::ExecuteCommands { command_buffers } => {
                for &secondary in command_buffers {
                    execute_command_buffer(state, queue, secondary, render_pass)?;
                }
            }
            _ => {}
        }

        for image in command.images() {
            if let Some(image) = state.images.get_mut(&image) {
                image.last_bound_queue = Some(queue);
            }
        }

        for buffer in command.buffers() {
            if let Some(buffer) = state.buffers.get_mut(&buffer) {
                buffer.last_bound_queue = Some(queue);
            }
        }
    }

    Ok(())
}

fn set_last_draw_info(
    state: &mut GlobalState,
    queue: Queue,
    begin_info: &RenderPassBeginInfo,
    subpass: u32,
) -> Result<(), MutateError> {
    state.queues.require_mut(&queue)?.last_draw_info = Some(DrawInfo {
        framebuffer: begin_info.framebuffer,
        render_pass: begin_info.render_pass,
        subpass,
    });

    Ok(())
}

fn apply_final_layouts(
    state: &mut GlobalState,
    begin_info: &RenderPassBeginInfo,
) -> Result<(), MutateError> {
    let descriptions = state
        .render_passes
        .require(&begin_info.render_pass)?
        .create_info
        .attachments
        .clone();
    let views = state
        .framebuffers
        .require(&begin_info.framebuffer)?
        .create_info
        .attachments
        .clone();

    for (view, description) in views.iter().zip(&descriptions) {
        let view = state.image_views.require(view)?;
        let range = view.create_info.subresource_range.clone();
        let image = view.image();
        state
            .images
            .require_mut(&image)?
            .set_layout(&range, description.final_layout);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        command::Cmd,
        command_buffer::RecordedCommand,
        image::{ImageAspects, ImageLayout, ImageSubresource},
        state::{MutateError, RecordingState},
        tests::TestScene,
    };

    #[test]
    fn submit_applies_final_layouts() {
        let mut scene = TestScene::new();
        let command_buffer = scene.record_single_subpass(3);
        let color = ImageSubresource {
            aspect: ImageAspects::COLOR,
            array_layer: 0,
            mip_level: 0,
        };

        assert_eq!(
            scene.state().images[scene.color_image].layout(color),
            Some(ImageLayout::Undefined),
        );
        assert_eq!(
            scene
                .state()
                .current_layout(scene.color_image, color, &[command_buffer]),
            Some(ImageLayout::PresentSrc),
        );

        scene.submit(&[command_buffer]);

        assert_eq!(
            scene.state().images[scene.color_image].layout(color),
            Some(ImageLayout::PresentSrc),
        );
        let draw_info = scene.state().queues[scene.queue].last_draw_info.unwrap();
        assert_eq!(draw_info.framebuffer, scene.framebuffer);
        assert_eq!(scene.state().last_submit_queue, Some(scene.queue));
    }

    #[test]
    fn recording_state() {
        let mut scene = TestScene::new();
        let command_buffer = scene.allocate_command_buffer();

        let draw = Cmd::record(
            command_buffer,
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
        );
        assert_eq!(
            draw.mutate(scene.state_mut()),
            Err(MutateError::NotRecording(command_buffer)),
        );

        scene.begin(command_buffer);
        draw.mutate(scene.state_mut()).unwrap();
        assert_eq!(
            scene.state().command_buffers[command_buffer].recording,
            RecordingState::Recording,
        );

        let submit = scene.submit_cmd(&[command_buffer]);
        assert_eq!(
            submit.mutate(scene.state_mut()),
            Err(MutateError::NotExecutable(command_buffer)),
        );
    }

    #[test]
    fn unknown_handles() {
        let mut scene = TestScene::new();
        let command_buffer = scene.allocate_command_buffer();
        scene.begin(command_buffer);

        let bind = Cmd::record(
            command_buffer,
            RecordedCommand::BindPipeline {
                bind_point: crate::pipeline::PipelineBindPoint::Graphics,
                pipeline: crate::pipeline::Pipeline::from_raw(0xdead),
            },
        );
        assert!(matches!(
            bind.mutate(scene.state_mut()),
            Err(MutateError::UnknownHandle {
                type_name: "Pipeline",
                handle: 0xdead,
            }),
        ));
        assert!(scene.state().command_buffers[command_buffer].commands.is_empty());
    }
}

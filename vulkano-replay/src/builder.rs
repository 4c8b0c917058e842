//! Synthesis of device objects in the middle of a command stream.
//!
//! A [`CommandBuilder`] writes the commands that create an object, in the order the device
//! needs them (create, allocate memory, bind), and returns the handle once the object exists in
//! the state. For every object it creates, it pushes the commands that destroy the object onto
//! a [`Teardown`] stack. Unwinding the stack destroys the objects in reverse creation order.
//!
//! A transform typically keeps one `Teardown` for objects that live until it is flushed, and a
//! local one for objects that only serve a single request.

use crate::{
    alloc::AllocationTracker,
    buffer::{Buffer, BufferCreateInfo},
    command::Cmd,
    command_buffer::{
        CommandBuffer, CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandBufferLevel,
        CommandPool, CommandPoolCreateInfo, RecordedCommand,
    },
    descriptor::{
        DescriptorPool, DescriptorPoolCreateInfo, DescriptorSet, DescriptorSetAllocateInfo,
        DescriptorSetLayout, DescriptorSetLayoutCreateInfo, WriteDescriptorSet,
    },
    device::Device,
    image::{Image, ImageCreateInfo, ImageView, ImageViewCreateInfo},
    memory::{DeviceMemory, MemoryAllocateInfo, MemoryPropertyFlags},
    pipeline::{
        GraphicsPipelineCreateInfo, Pipeline, PipelineLayout, PipelineLayoutCreateInfo,
        ShaderModule,
    },
    render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, RenderPassCreateInfo},
    sync::{Fence, FenceCreateInfo},
    transform::{TransformError, Writer},
    DeviceSize,
};

/// A stack of commands that destroy synthesized objects.
#[derive(Debug, Default)]
pub struct Teardown {
    commands: Vec<Cmd>,
}

impl Teardown {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a command to run when the stack is unwound.
    #[inline]
    pub fn push(&mut self, cmd: Cmd) {
        self.commands.push(cmd);
    }

    /// Pushes a command that runs right after the command on top of the stack.
    fn push_under_top(&mut self, cmd: Cmd) {
        let index = self.commands.len().saturating_sub(1);
        self.commands.insert(index, cmd);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Writes every command of the stack, most recently pushed first, leaving the stack empty.
    ///
    /// A command that fails to be written doesn't stop the unwinding. The first error is
    /// returned once every command has been written.
    pub fn unwind(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        let mut result = Ok(());

        while let Some(cmd) = self.commands.pop() {
            let name = cmd.name();

            if let Err(err) = out.write(cmd) {
                log::warn!("teardown command {name} failed: {err}");

                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.commands.is_empty() {
            log::warn!(
                "dropping a teardown stack that was not unwound, leaking {} objects",
                self.commands.len(),
            );
        }
    }
}

/// Writes the commands that create new objects on a device.
#[derive(Debug)]
pub struct CommandBuilder<'a> {
    device: Device,
    teardown: &'a mut Teardown,
}

impl<'a> CommandBuilder<'a> {
    /// Creates a builder for objects of `device`, whose destruction is pushed on `teardown`.
    #[inline]
    pub fn new(device: Device, teardown: &'a mut Teardown) -> Self {
        CommandBuilder { device, teardown }
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Returns the index of a memory type with `property_flags`, falling back to any memory
    /// type if `property_flags` is only a preference.
    fn memory_type_index(
        &self,
        out: &dyn Writer,
        property_flags: MemoryPropertyFlags,
        required: bool,
    ) -> Result<u32, TransformError> {
        let device = out
            .state()
            .devices
            .get(&self.device)
            .ok_or_else(|| TransformError::missing(self.device))?;

        device
            .create_info
            .find_memory_type(property_flags)
            .or_else(|| {
                (!required)
                    .then(|| device.create_info.find_memory_type(MemoryPropertyFlags::empty()))
                    .flatten()
            })
            .ok_or(TransformError::NoSuitableMemoryType(property_flags))
    }

    fn allocate_memory(
        &mut self,
        out: &mut dyn Writer,
        allocation_size: DeviceSize,
        property_flags: MemoryPropertyFlags,
    ) -> Result<DeviceMemory, TransformError> {
        let required = property_flags.intersects(MemoryPropertyFlags::HOST_VISIBLE);
        let memory_type_index = self.memory_type_index(out, property_flags, required)?;
        let memory = out.state_mut().new_handle();

        out.write(Cmd::AllocateMemory {
            device: self.device,
            allocate_info: MemoryAllocateInfo {
                allocation_size,
                memory_type_index,
            },
            memory,
        })?;

        Ok(memory)
    }

    /// Creates an image bound to its own memory allocation.
    ///
    /// Host-visible memory is required if `property_flags` contains `HOST_VISIBLE`; any other
    /// property is a preference.
    pub fn create_image(
        &mut self,
        out: &mut dyn Writer,
        create_info: ImageCreateInfo,
        property_flags: MemoryPropertyFlags,
    ) -> Result<Image, TransformError> {
        let allocation_size = create_info.memory_size();
        let image = out.state_mut().new_handle();

        out.write(Cmd::CreateImage {
            device: self.device,
            create_info,
            image,
        })?;
        self.teardown.push(Cmd::DestroyImage {
            device: self.device,
            image,
        });

        let memory = self.allocate_memory(out, allocation_size, property_flags)?;
        self.teardown.push_under_top(Cmd::FreeMemory {
            device: self.device,
            memory,
        });

        out.write(Cmd::BindImageMemory {
            device: self.device,
            image,
            memory,
            offset: 0,
        })?;

        Ok(image)
    }

    /// Creates a buffer bound to its own memory allocation, and returns both.
    pub fn create_buffer(
        &mut self,
        out: &mut dyn Writer,
        create_info: BufferCreateInfo,
        property_flags: MemoryPropertyFlags,
    ) -> Result<(Buffer, DeviceMemory), TransformError> {
        let allocation_size = create_info.size;
        let buffer = out.state_mut().new_handle();

        out.write(Cmd::CreateBuffer {
            device: self.device,
            create_info,
            buffer,
        })?;
        self.teardown.push(Cmd::DestroyBuffer {
            device: self.device,
            buffer,
        });

        let memory = self.allocate_memory(out, allocation_size, property_flags)?;
        self.teardown.push_under_top(Cmd::FreeMemory {
            device: self.device,
            memory,
        });

        out.write(Cmd::BindBufferMemory {
            device: self.device,
            buffer,
            memory,
            offset: 0,
        })?;

        Ok((buffer, memory))
    }

    pub fn create_image_view(
        &mut self,
        out: &mut dyn Writer,
        create_info: ImageViewCreateInfo,
    ) -> Result<ImageView, TransformError> {
        let image_view = out.state_mut().new_handle();

        out.write(Cmd::CreateImageView {
            device: self.device,
            create_info,
            image_view,
        })?;
        self.teardown.push(Cmd::DestroyImageView {
            device: self.device,
            image_view,
        });

        Ok(image_view)
    }

    pub fn create_render_pass(
        &mut self,
        out: &mut dyn Writer,
        create_info: RenderPassCreateInfo,
    ) -> Result<RenderPass, TransformError> {
        let render_pass = out.state_mut().new_handle();

        out.write(Cmd::CreateRenderPass {
            device: self.device,
            create_info,
            render_pass,
        })?;
        self.teardown.push(Cmd::DestroyRenderPass {
            device: self.device,
            render_pass,
        });

        Ok(render_pass)
    }

    pub fn create_framebuffer(
        &mut self,
        out: &mut dyn Writer,
        create_info: FramebufferCreateInfo,
    ) -> Result<Framebuffer, TransformError> {
        let framebuffer = out.state_mut().new_handle();

        out.write(Cmd::CreateFramebuffer {
            device: self.device,
            create_info,
            framebuffer,
        })?;
        self.teardown.push(Cmd::DestroyFramebuffer {
            device: self.device,
            framebuffer,
        });

        Ok(framebuffer)
    }

    /// Creates a shader module from SPIR-V `code`.
    ///
    /// The code is staged in a scratch allocation of `tracker`, which is freed as soon as the
    /// command is written, whether or not that succeeded.
    pub fn create_shader_module(
        &mut self,
        out: &mut dyn Writer,
        tracker: &mut AllocationTracker,
        code: &[u32],
    ) -> Result<ShaderModule, TransformError> {
        let shader_module = out.state_mut().new_handle();
        let alloc = tracker.alloc(out.state_mut(), bytemuck::cast_slice(code))?;

        let result = out.write(Cmd::CreateShaderModule {
            device: self.device,
            code: alloc.host_data(),
            shader_module,
        });
        alloc.free(tracker, out.state_mut())?;
        result?;

        self.teardown.push(Cmd::DestroyShaderModule {
            device: self.device,
            shader_module,
        });

        Ok(shader_module)
    }

    pub fn create_descriptor_set_layout(
        &mut self,
        out: &mut dyn Writer,
        create_info: DescriptorSetLayoutCreateInfo,
    ) -> Result<DescriptorSetLayout, TransformError> {
        let set_layout = out.state_mut().new_handle();

        out.write(Cmd::CreateDescriptorSetLayout {
            device: self.device,
            create_info,
            set_layout,
        })?;
        self.teardown.push(Cmd::DestroyDescriptorSetLayout {
            device: self.device,
            set_layout,
        });

        Ok(set_layout)
    }

    pub fn create_pipeline_layout(
        &mut self,
        out: &mut dyn Writer,
        create_info: PipelineLayoutCreateInfo,
    ) -> Result<PipelineLayout, TransformError> {
        let pipeline_layout = out.state_mut().new_handle();

        out.write(Cmd::CreatePipelineLayout {
            device: self.device,
            create_info,
            pipeline_layout,
        })?;
        self.teardown.push(Cmd::DestroyPipelineLayout {
            device: self.device,
            pipeline_layout,
        });

        Ok(pipeline_layout)
    }

    pub fn create_descriptor_pool(
        &mut self,
        out: &mut dyn Writer,
        create_info: DescriptorPoolCreateInfo,
    ) -> Result<DescriptorPool, TransformError> {
        let descriptor_pool = out.state_mut().new_handle();

        out.write(Cmd::CreateDescriptorPool {
            device: self.device,
            create_info,
            descriptor_pool,
        })?;
        self.teardown.push(Cmd::DestroyDescriptorPool {
            device: self.device,
            descriptor_pool,
        });

        Ok(descriptor_pool)
    }

    /// Allocates a descriptor set. It is freed together with its pool.
    pub fn allocate_descriptor_set(
        &mut self,
        out: &mut dyn Writer,
        descriptor_pool: DescriptorPool,
        set_layout: DescriptorSetLayout,
    ) -> Result<DescriptorSet, TransformError> {
        let descriptor_set = out.state_mut().new_handle();

        out.write(Cmd::AllocateDescriptorSets {
            device: self.device,
            allocate_info: DescriptorSetAllocateInfo {
                descriptor_pool,
                set_layouts: vec![set_layout],
            },
            descriptor_sets: vec![descriptor_set],
        })?;

        Ok(descriptor_set)
    }

    pub fn update_descriptor_sets(
        &mut self,
        out: &mut dyn Writer,
        writes: Vec<WriteDescriptorSet>,
    ) -> Result<(), TransformError> {
        out.write(Cmd::UpdateDescriptorSets {
            device: self.device,
            writes,
        })
    }

    pub fn create_graphics_pipeline(
        &mut self,
        out: &mut dyn Writer,
        create_info: GraphicsPipelineCreateInfo,
    ) -> Result<Pipeline, TransformError> {
        let pipeline = out.state_mut().new_handle();

        out.write(Cmd::CreateGraphicsPipelines {
            device: self.device,
            create_infos: vec![create_info],
            pipelines: vec![pipeline],
        })?;
        self.teardown.push(Cmd::DestroyPipeline {
            device: self.device,
            pipeline,
        });

        Ok(pipeline)
    }

    pub fn create_command_pool(
        &mut self,
        out: &mut dyn Writer,
        queue_family_index: u32,
    ) -> Result<CommandPool, TransformError> {
        let command_pool = out.state_mut().new_handle();

        out.write(Cmd::CreateCommandPool {
            device: self.device,
            create_info: CommandPoolCreateInfo { queue_family_index },
            command_pool,
        })?;
        self.teardown.push(Cmd::DestroyCommandPool {
            device: self.device,
            command_pool,
        });

        Ok(command_pool)
    }

    /// Allocates a command buffer. It is freed together with its pool.
    pub fn allocate_command_buffer(
        &mut self,
        out: &mut dyn Writer,
        command_pool: CommandPool,
        level: CommandBufferLevel,
    ) -> Result<CommandBuffer, TransformError> {
        let command_buffer = out.state_mut().new_handle();

        out.write(Cmd::AllocateCommandBuffers {
            device: self.device,
            allocate_info: CommandBufferAllocateInfo {
                command_pool,
                level,
                command_buffer_count: 1,
            },
            command_buffers: vec![command_buffer],
        })?;

        Ok(command_buffer)
    }

    pub fn create_fence(
        &mut self,
        out: &mut dyn Writer,
        signaled: bool,
    ) -> Result<Fence, TransformError> {
        let fence = out.state_mut().new_handle();

        out.write(Cmd::CreateFence {
            device: self.device,
            create_info: FenceCreateInfo { signaled },
            fence,
        })?;
        self.teardown.push(Cmd::DestroyFence {
            device: self.device,
            fence,
        });

        Ok(fence)
    }

    /// Maps the whole of `memory` and returns the host address it is mapped at.
    pub fn map_memory(
        &mut self,
        out: &mut dyn Writer,
        memory: DeviceMemory,
    ) -> Result<u64, TransformError> {
        let size = out
            .state()
            .memories
            .get(&memory)
            .ok_or_else(|| TransformError::missing(memory))?
            .allocate_info
            .allocation_size;
        let address = out.state_mut().host_memory.map(size);

        out.write(Cmd::MapMemory {
            device: self.device,
            memory,
            offset: 0,
            size,
            address,
        })?;

        Ok(address)
    }

    /// Begins recording a command buffer for a single submission.
    pub fn begin(
        &mut self,
        out: &mut dyn Writer,
        command_buffer: CommandBuffer,
        begin_info: CommandBufferBeginInfo,
    ) -> Result<(), TransformError> {
        out.write(Cmd::BeginCommandBuffer {
            command_buffer,
            begin_info,
        })
    }

    #[inline]
    pub fn record(
        &mut self,
        out: &mut dyn Writer,
        command_buffer: CommandBuffer,
        command: RecordedCommand,
    ) -> Result<(), TransformError> {
        out.write(Cmd::record(command_buffer, command))
    }

    #[inline]
    pub fn end(
        &mut self,
        out: &mut dyn Writer,
        command_buffer: CommandBuffer,
    ) -> Result<(), TransformError> {
        out.write(Cmd::EndCommandBuffer { command_buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandBuilder, Teardown};
    use crate::{
        alloc::{AllocationTracker, AllocationTrackerCreateInfo},
        buffer::{BufferCreateInfo, BufferUsage},
        command::Cmd,
        image::{ImageCreateInfo, ImageUsage},
        memory::MemoryPropertyFlags,
        shader::SPIRV_MAGIC,
        tests::TestScene,
        transform::{TransformError, Writer},
    };

    #[test]
    fn teardown_order() {
        let mut scene = TestScene::new();
        let mut teardown = Teardown::new();
        let mut builder = CommandBuilder::new(scene.device, &mut teardown);

        let image = builder
            .create_image(
                &mut scene.writer,
                ImageCreateInfo {
                    usage: ImageUsage::TRANSFER_SRC,
                    ..Default::default()
                },
                MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .unwrap();
        let (buffer, memory) = builder
            .create_buffer(
                &mut scene.writer,
                BufferCreateInfo {
                    size: 64,
                    usage: BufferUsage::TRANSFER_DST,
                },
                MemoryPropertyFlags::HOST_VISIBLE,
            )
            .unwrap();
        assert!(scene.writer.state().images.contains(&image));
        assert!(scene.writer.state().images[image].memory.is_some());
        assert_eq!(
            scene.writer.state().buffers[buffer].memory.unwrap().memory,
            memory,
        );

        let start = scene.recorded().len();
        teardown.unwind(&mut scene.writer).unwrap();
        assert!(teardown.is_empty());

        let names: Vec<_> = scene.recorded()[start..]
            .iter()
            .map(|(_, cmd)| cmd.name())
            .collect();
        assert_eq!(
            names,
            [
                "vkDestroyBuffer",
                "vkFreeMemory",
                "vkDestroyImage",
                "vkFreeMemory",
            ],
        );
        assert!(!scene.writer.state().images.contains(&image));
        assert!(!scene.writer.state().memories.contains(&memory));
    }

    #[test]
    fn unwinding_continues_past_errors() {
        let mut scene = TestScene::new();
        let mut teardown = Teardown::new();
        let fence = CommandBuilder::new(scene.device, &mut teardown)
            .create_fence(&mut scene.writer, false)
            .unwrap();
        teardown.push(Cmd::DestroyFence {
            device: scene.device,
            fence: crate::sync::Fence::from_raw(0xbad),
        });

        let result = teardown.unwind(&mut scene.writer);
        assert!(matches!(result, Err(TransformError::Mutate { .. })));
        assert!(!scene.writer.state().fences.contains(&fence));
    }

    #[test]
    fn shader_code_is_freed_after_use() {
        let mut scene = TestScene::new();
        let mut teardown = Teardown::new();
        let mut tracker = AllocationTracker::new(
            scene.writer.state_mut(),
            AllocationTrackerCreateInfo::default(),
        );

        let shader_module = CommandBuilder::new(scene.device, &mut teardown)
            .create_shader_module(&mut scene.writer, &mut tracker, &[SPIRV_MAGIC, 1, 2])
            .unwrap();
        assert_eq!(
            scene.writer.state().shader_modules[shader_module].code.len(),
            12,
        );
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(tracker.freed_count(), 1);

        // Replaying the command after the free references freed memory.
        let (_, cmd) = scene.recorded().last().unwrap().clone();
        let Cmd::CreateShaderModule { device, code, .. } = cmd else {
            unreachable!();
        };
        let replayed = Cmd::CreateShaderModule {
            device,
            code,
            shader_module: crate::pipeline::ShaderModule::from_raw(0x77),
        };
        assert!(replayed.mutate(scene.writer.state_mut()).is_err());

        teardown.unwind(&mut scene.writer).unwrap();
    }
}

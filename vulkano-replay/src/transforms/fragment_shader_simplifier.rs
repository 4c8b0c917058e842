//! Replacing fragment shaders with a trivial one.
//!
//! The [`FragmentShaderSimplifier`] transform rewrites every graphics pipeline that has a
//! fragment stage so that it runs [`BuiltinShader::SolidColorFragment`] instead. Comparing a
//! frame with and without the transform tells how much of its cost is fragment shading.

use crate::{
    alloc::{AllocationTracker, AllocationTrackerCreateInfo},
    builder::{CommandBuilder, Teardown},
    command::{Cmd, CmdId},
    device::Device,
    pipeline::{GraphicsPipelineCreateInfo, PipelineShaderStage, ShaderModule, ShaderStages},
    shader::{BuiltinShader, ShaderCompiler},
    transform::{Transform, TransformError, Writer},
};
use foldhash::fast::RandomState;
use std::{
    collections::HashMap,
    fmt::{Debug, Error as FmtError, Formatter},
    sync::Arc,
};

/// A transform that makes every graphics pipeline shade fragments with a solid color.
pub struct FragmentShaderSimplifier {
    shader_compiler: Arc<dyn ShaderCompiler>,
    /// The solid color module of each device, or `None` if it couldn't be created.
    modules: HashMap<Device, Option<ShaderModule>, RandomState>,
    tracker: Option<AllocationTracker>,
    teardown: Teardown,
}

impl FragmentShaderSimplifier {
    /// Creates a new `FragmentShaderSimplifier` that takes the replacement shader from
    /// `shader_compiler`.
    pub fn new(shader_compiler: Arc<dyn ShaderCompiler>) -> Self {
        FragmentShaderSimplifier {
            shader_compiler,
            modules: HashMap::default(),
            tracker: None,
            teardown: Teardown::new(),
        }
    }

    /// Returns the solid color module of `device`, creating it on first use.
    fn module(
        &mut self,
        out: &mut dyn Writer,
        device: Device,
    ) -> Result<Option<ShaderModule>, TransformError> {
        if let Some(&module) = self.modules.get(&device) {
            return Ok(module);
        }

        let code = match self
            .shader_compiler
            .compile(BuiltinShader::SolidColorFragment)
        {
            Ok(code) => code,
            Err(err) => {
                log::warn!("fragment shaders of {device:?} are left unchanged: {err}");
                self.modules.insert(device, None);

                return Ok(None);
            }
        };

        let tracker = self.tracker.get_or_insert_with(|| {
            AllocationTracker::new(out.state_mut(), AllocationTrackerCreateInfo::default())
        });
        let module = CommandBuilder::new(device, &mut self.teardown)
            .create_shader_module(out, tracker, &code)?;
        log::debug!("created the solid color fragment shader {module:?} for {device:?}");
        self.modules.insert(device, Some(module));

        Ok(Some(module))
    }
}

impl Debug for FragmentShaderSimplifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("FragmentShaderSimplifier")
            .field("modules", &self.modules)
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

/// Points the fragment stage of `create_info` at `module`.
fn replace_fragment_stage(create_info: &mut GraphicsPipelineCreateInfo, module: ShaderModule) {
    for stage in &mut create_info.stages {
        if stage.stage == ShaderStages::FRAGMENT {
            *stage = PipelineShaderStage::main(ShaderStages::FRAGMENT, module);
        }
    }
}

impl Transform for FragmentShaderSimplifier {
    fn name(&self) -> &'static str {
        "fragment shader simplifier"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        match cmd {
            Cmd::CreateGraphicsPipelines {
                device,
                mut create_infos,
                pipelines,
            } if !id.is_derived() => {
                let has_fragment_stage = create_infos.iter().any(|create_info| {
                    create_info
                        .stages
                        .iter()
                        .any(|stage| stage.stage == ShaderStages::FRAGMENT)
                });

                if has_fragment_stage {
                    if let Some(module) = self.module(out, device)? {
                        for create_info in &mut create_infos {
                            replace_fragment_stage(create_info, module);
                        }
                    }
                }

                out.mutate_and_write(
                    id,
                    Cmd::CreateGraphicsPipelines {
                        device,
                        create_infos,
                        pipelines,
                    },
                )
            }
            cmd => out.mutate_and_write(id, cmd),
        }
    }

    fn flush(&mut self, out: &mut dyn Writer) -> Result<(), TransformError> {
        let result = self.teardown.unwind(out);
        self.modules.clear();

        if let Some(tracker) = &mut self.tracker {
            tracker.free_all(out.state_mut());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::FragmentShaderSimplifier;
    use crate::{
        command::Cmd,
        pipeline::{
            Pipeline, PipelineCreateInfo, PipelineShaderStage, ShaderModule, ShaderStages,
        },
        shader::{BuiltinShader, ShaderLibrary, SPIRV_MAGIC},
        tests::TestScene,
    };
    use std::sync::Arc;

    #[test]
    fn replaces_fragment_stages() {
        let mut scene = TestScene::new();
        let PipelineCreateInfo::Graphics(mut create_info) =
            scene.state().pipelines[scene.pipeline].create_info.clone()
        else {
            unreachable!();
        };
        let vertex: ShaderModule = scene.handle();
        let fragment: ShaderModule = scene.handle();
        let depth_only = create_info.clone();
        create_info.stages = vec![
            PipelineShaderStage::main(ShaderStages::VERTEX, vertex),
            PipelineShaderStage::main(ShaderStages::FRAGMENT, fragment),
        ];
        let pipelines: [Pipeline; 3] = [scene.handle(), scene.handle(), scene.handle()];
        let first_id = scene.next_id();

        let mut library = ShaderLibrary::new();
        library.insert(BuiltinShader::SolidColorFragment, vec![SPIRV_MAGIC, 7]);

        let mut transformer = scene.transformer();
        transformer.add(FragmentShaderSimplifier::new(Arc::new(library)));
        transformer
            .transform_all(
                first_id,
                [
                    Cmd::CreateGraphicsPipelines {
                        device: scene.device,
                        create_infos: vec![create_info.clone(), depth_only],
                        pipelines: pipelines[..2].to_vec(),
                    },
                    Cmd::CreateGraphicsPipelines {
                        device: scene.device,
                        create_infos: vec![create_info],
                        pipelines: vec![pipelines[2]],
                    },
                ],
            )
            .unwrap();

        let state = transformer.state();
        assert_eq!(state.shader_modules.len(), 1);
        let (&solid, _) = state.shader_modules.iter().next().unwrap();
        let stages = |pipeline: Pipeline| {
            state.pipelines[pipeline]
                .create_info
                .as_graphics()
                .unwrap()
                .stages
                .clone()
        };
        assert_eq!(
            stages(pipelines[0]),
            [
                PipelineShaderStage::main(ShaderStages::VERTEX, vertex),
                PipelineShaderStage::main(ShaderStages::FRAGMENT, solid),
            ],
        );
        assert!(stages(pipelines[1]).is_empty());
        assert_eq!(stages(pipelines[2]), stages(pipelines[0]));

        transformer.flush().unwrap();
        assert!(transformer.state().shader_modules.is_empty());
        assert!(transformer.state().pipelines.contains(&pipelines[2]));
    }

    #[test]
    fn missing_shader_keeps_pipelines() {
        let mut scene = TestScene::new();
        let PipelineCreateInfo::Graphics(mut create_info) =
            scene.state().pipelines[scene.pipeline].create_info.clone()
        else {
            unreachable!();
        };
        let fragment: ShaderModule = scene.handle();
        create_info.stages = vec![PipelineShaderStage::main(ShaderStages::FRAGMENT, fragment)];
        let pipeline: Pipeline = scene.handle();
        let first_id = scene.next_id();

        let mut transformer = scene.transformer();
        transformer.add(FragmentShaderSimplifier::new(Arc::new(ShaderLibrary::new())));
        transformer
            .transform_all(
                first_id,
                [Cmd::CreateGraphicsPipelines {
                    device: scene.device,
                    create_infos: vec![create_info.clone()],
                    pipelines: vec![pipeline],
                }],
            )
            .unwrap();

        assert_eq!(
            transformer.state().pipelines[pipeline].create_info,
            PipelineCreateInfo::Graphics(create_info),
        );
        transformer.flush().unwrap();
    }
}

//! Reducing every draw to a single primitive.
//!
//! With the [`VertexMinimizer`] transform, each direct draw emits only the first primitive of
//! the topology of the pipeline bound when it is recorded, for a single instance. This takes
//! the vertex work out of a frame while keeping every draw, bind and state change in place.
//! Indirect draws read their parameters from buffers and are left unchanged.

use crate::{
    command::{Cmd, CmdId},
    command_buffer::{CommandBuffer, RecordedCommand},
    pipeline::{GraphicsPipelineCreateInfo, PipelineBindPoint},
    state::GlobalState,
    transform::{Transform, TransformError, Writer},
};

/// A transform that reduces every draw to one primitive of one instance.
#[derive(Debug, Default)]
pub struct VertexMinimizer {
    _private: (),
}

impl VertexMinimizer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Returns the number of vertices of one primitive of the graphics pipeline bound last in
/// `command_buffer`, or `None` if no graphics pipeline is bound.
fn vertices_per_primitive(state: &GlobalState, command_buffer: CommandBuffer) -> Option<u32> {
    let pipeline = state
        .command_buffers
        .get(&command_buffer)?
        .commands
        .iter()
        .rev()
        .find_map(|command| match *command {
            RecordedCommand::BindPipeline {
                bind_point: PipelineBindPoint::Graphics,
                pipeline,
            } => Some(pipeline),
            _ => None,
        })?;

    state
        .pipelines
        .get(&pipeline)?
        .create_info
        .as_graphics()
        .map(GraphicsPipelineCreateInfo::vertices_per_primitive)
}

impl Transform for VertexMinimizer {
    fn name(&self) -> &'static str {
        "vertex minimizer"
    }

    fn transform(
        &mut self,
        id: CmdId,
        cmd: Cmd,
        out: &mut dyn Writer,
    ) -> Result<(), TransformError> {
        let (command_buffer, command) = match cmd {
            Cmd::Record {
                command_buffer,
                command,
            } => (command_buffer, command),
            cmd => return out.mutate_and_write(id, cmd),
        };

        let command = match command {
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => match vertices_per_primitive(out.state(), command_buffer) {
                Some(per_primitive) => RecordedCommand::Draw {
                    vertex_count: vertex_count.min(per_primitive),
                    instance_count: instance_count.min(1),
                    first_vertex,
                    first_instance,
                },
                None => {
                    log::trace!("no pipeline is bound for the draw at {id}, leaving it as is");

                    RecordedCommand::Draw {
                        vertex_count,
                        instance_count,
                        first_vertex,
                        first_instance,
                    }
                }
            },
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => {
                let per_primitive =
                    vertices_per_primitive(out.state(), command_buffer).unwrap_or(index_count);

                RecordedCommand::DrawIndexed {
                    index_count: index_count.min(per_primitive),
                    instance_count: instance_count.min(1),
                    first_index,
                    vertex_offset,
                    first_instance,
                }
            }
            command => command,
        };

        out.mutate_and_write(
            id,
            Cmd::Record {
                command_buffer,
                command,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::VertexMinimizer;
    use crate::{
        command::Cmd,
        command_buffer::RecordedCommand,
        pipeline::{Pipeline, PipelineCreateInfo, PrimitiveTopology},
        tests::TestScene,
    };

    fn recorded_draws(
        scene: &mut TestScene,
        commands: Vec<RecordedCommand>,
    ) -> Vec<RecordedCommand> {
        let command_buffer = scene.allocate_command_buffer();
        scene.begin(command_buffer);
        let first_id = scene.next_id();

        let mut transformer = scene.transformer();
        transformer.add(VertexMinimizer::new());
        transformer
            .transform_all(
                first_id,
                commands
                    .into_iter()
                    .map(|command| Cmd::record(command_buffer, command)),
            )
            .unwrap();

        transformer.state().command_buffers[command_buffer]
            .commands
            .iter()
            .filter(|command| command.is_draw())
            .cloned()
            .collect()
    }

    #[test]
    fn one_triangle_per_draw() {
        let mut scene = TestScene::new();
        let commands = vec![
            scene.bind_pipeline(scene.pipeline),
            RecordedCommand::Draw {
                vertex_count: 300,
                instance_count: 4,
                first_vertex: 9,
                first_instance: 2,
            },
            RecordedCommand::DrawIndexed {
                index_count: 6000,
                instance_count: 0,
                first_index: 12,
                vertex_offset: -3,
                first_instance: 0,
            },
            RecordedCommand::Draw {
                vertex_count: 2,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
        ];

        assert_eq!(
            recorded_draws(&mut scene, commands),
            [
                RecordedCommand::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 9,
                    first_instance: 2,
                },
                RecordedCommand::DrawIndexed {
                    index_count: 3,
                    instance_count: 0,
                    first_index: 12,
                    vertex_offset: -3,
                    first_instance: 0,
                },
                RecordedCommand::Draw {
                    vertex_count: 2,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
            ],
        );
    }

    #[test]
    fn follows_the_bound_topology() {
        let mut scene = TestScene::new();
        let PipelineCreateInfo::Graphics(mut create_info) =
            scene.state().pipelines[scene.pipeline].create_info.clone()
        else {
            unreachable!();
        };
        create_info.input_assembly_state.topology = PrimitiveTopology::PointList;
        let points: Pipeline = scene.handle();
        scene.apply(Cmd::CreateGraphicsPipelines {
            device: scene.device,
            create_infos: vec![create_info],
            pipelines: vec![points],
        });

        let draw = RecordedCommand::Draw {
            vertex_count: 64,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        };
        let commands = vec![
            draw.clone(),
            scene.bind_pipeline(points),
            draw.clone(),
            scene.bind_pipeline(scene.pipeline),
            draw,
        ];

        let vertex_counts: Vec<u32> = recorded_draws(&mut scene, commands)
            .into_iter()
            .map(|command| match command {
                RecordedCommand::Draw { vertex_count, .. } => vertex_count,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(vertex_counts, [64, 1, 3]);
    }
}

//! Graphics and compute pipelines, and the shader modules and layouts they are built from.

use crate::{
    descriptor::DescriptorSetLayout,
    format::Format,
    image::SampleCount,
    macros::{handles, vulkan_bitflags, vulkan_enum},
    render_pass::RenderPass,
};
use serde::{Deserialize, Serialize};

handles! {
    /// A compiled graphics or compute pipeline.
    Pipeline = Pipeline;

    /// The interface between a pipeline and the descriptor sets and push constants bound to it.
    PipelineLayout = PipelineLayout;

    /// A module of SPIR-V code.
    ShaderModule = ShaderModule;
}

vulkan_enum! {
    /// The type of a pipeline, and the binding point it is bound to.
    PipelineBindPoint = PipelineBindPoint(i32);

    Graphics = GRAPHICS,
    Compute = COMPUTE,
}

vulkan_bitflags! {
    /// A set of shader stages.
    ShaderStages = ShaderStageFlags(u32);

    VERTEX = VERTEX,
    TESSELLATION_CONTROL = TESSELLATION_CONTROL,
    TESSELLATION_EVALUATION = TESSELLATION_EVALUATION,
    GEOMETRY = GEOMETRY,
    FRAGMENT = FRAGMENT,
    COMPUTE = COMPUTE,
}

vulkan_enum! {
    /// How vertices are assembled into primitives.
    PrimitiveTopology impl {
        /// Returns the number of vertices that a single primitive of this topology consumes,
        /// given the number of control points per patch for `PatchList`.
        #[inline]
        pub fn vertices_per_primitive(self, patch_control_points: u32) -> u32 {
            match self {
                Self::PointList => 1,
                Self::LineList | Self::LineStrip => 2,
                Self::TriangleList | Self::TriangleStrip | Self::TriangleFan => 3,
                Self::LineListWithAdjacency | Self::LineStripWithAdjacency => 4,
                Self::TriangleListWithAdjacency | Self::TriangleStripWithAdjacency => 6,
                Self::PatchList => patch_control_points.max(1),
            }
        }
    }
    = PrimitiveTopology(i32);

    PointList = POINT_LIST,
    LineList = LINE_LIST,
    LineStrip = LINE_STRIP,
    TriangleList = TRIANGLE_LIST,
    TriangleStrip = TRIANGLE_STRIP,
    TriangleFan = TRIANGLE_FAN,
    LineListWithAdjacency = LINE_LIST_WITH_ADJACENCY,
    LineStripWithAdjacency = LINE_STRIP_WITH_ADJACENCY,
    TriangleListWithAdjacency = TRIANGLE_LIST_WITH_ADJACENCY,
    TriangleStripWithAdjacency = TRIANGLE_STRIP_WITH_ADJACENCY,
    PatchList = PATCH_LIST,
}

vulkan_enum! {
    /// Specifies how two values should be compared to decide whether a test passes or fails.
    CompareOp = CompareOp(i32);

    Never = NEVER,
    Less = LESS,
    Equal = EQUAL,
    LessOrEqual = LESS_OR_EQUAL,
    Greater = GREATER,
    NotEqual = NOT_EQUAL,
    GreaterOrEqual = GREATER_OR_EQUAL,
    Always = ALWAYS,
}

vulkan_enum! {
    /// Operation to perform on the stencil value after a test.
    StencilOp = StencilOp(i32);

    Keep = KEEP,
    Zero = ZERO,
    Replace = REPLACE,
    IncrementAndClamp = INCREMENT_AND_CLAMP,
    DecrementAndClamp = DECREMENT_AND_CLAMP,
    Invert = INVERT,
    IncrementAndWrap = INCREMENT_AND_WRAP,
    DecrementAndWrap = DECREMENT_AND_WRAP,
}

vulkan_enum! {
    /// A particular state value within a graphics pipeline that can be dynamically set by a
    /// command buffer.
    DynamicState impl {
        /// Returns whether the state belongs to the stencil test.
        #[inline]
        pub fn is_stencil(self) -> bool {
            matches!(
                self,
                Self::StencilCompareMask | Self::StencilWriteMask | Self::StencilReference,
            )
        }
    }
    = DynamicState(i32);

    Viewport = VIEWPORT,
    Scissor = SCISSOR,
    LineWidth = LINE_WIDTH,
    DepthBias = DEPTH_BIAS,
    BlendConstants = BLEND_CONSTANTS,
    DepthBounds = DEPTH_BOUNDS,
    StencilCompareMask = STENCIL_COMPARE_MASK,
    StencilWriteMask = STENCIL_WRITE_MASK,
    StencilReference = STENCIL_REFERENCE,
}

vulkan_enum! {
    /// How the vertex source of a binding advances.
    VertexInputRate = VertexInputRate(i32);

    Vertex = VERTEX,
    Instance = INSTANCE,
}

/// A shader stage of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineShaderStage {
    pub stage: ShaderStages,
    pub module: ShaderModule,
    pub entry_point: String,
}

impl PipelineShaderStage {
    /// Returns a stage running the `main` entry point of `module`.
    #[inline]
    pub fn main(stage: ShaderStages, module: ShaderModule) -> Self {
        Self {
            stage,
            module,
            entry_point: "main".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexInputBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexInputAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexInputState {
    pub bindings: Vec<VertexInputBinding>,
    pub attributes: Vec<VertexInputAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAssemblyState {
    pub topology: PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

impl Default for InputAssemblyState {
    #[inline]
    fn default() -> Self {
        Self {
            topology: PrimitiveTopology::TriangleList,
            primitive_restart_enable: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TessellationState {
    pub patch_control_points: u32,
}

/// The area of the framebuffer a viewport maps to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub offset: [f32; 2],
    pub extent: [f32; 2],
    pub depth_range: [f32; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scissor {
    pub offset: [i32; 2],
    pub extent: [u32; 2],
}

/// Viewports and scissors, when they are not dynamic state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Scissor>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisampleState {
    pub rasterization_samples: SampleCount,
}

/// The stencil test configuration for one face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilOpState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl Default for StencilOpState {
    #[inline]
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Never,
            compare_mask: 0,
            write_mask: 0,
            reference: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front: StencilOpState,
    pub back: StencilOpState,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
}

impl Default for DepthStencilState {
    #[inline]
    fn default() -> Self {
        Self {
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::Always,
            depth_bounds_test_enable: false,
            stencil_test_enable: false,
            front: StencilOpState::default(),
            back: StencilOpState::default(),
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorBlendAttachmentState {
    pub blend_enable: bool,
    pub color_write_mask: u32,
}

impl Default for ColorBlendAttachmentState {
    #[inline]
    fn default() -> Self {
        Self {
            blend_enable: false,
            color_write_mask: 0xf,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorBlendState {
    pub attachments: Vec<ColorBlendAttachmentState>,
}

/// Parameters to create a new graphics `Pipeline`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphicsPipelineCreateInfo {
    pub stages: Vec<PipelineShaderStage>,
    pub vertex_input_state: VertexInputState,
    pub input_assembly_state: InputAssemblyState,
    pub tessellation_state: Option<TessellationState>,
    pub viewport_state: ViewportState,
    pub multisample_state: MultisampleState,
    pub depth_stencil_state: Option<DepthStencilState>,
    pub color_blend_state: Option<ColorBlendState>,
    pub dynamic_states: Vec<DynamicState>,
    pub layout: PipelineLayout,
    pub render_pass: RenderPass,
    pub subpass: u32,
}

impl GraphicsPipelineCreateInfo {
    /// Returns the stage for `stage`, if the pipeline has one.
    #[inline]
    pub fn stage(&self, stage: ShaderStages) -> Option<&PipelineShaderStage> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Returns the number of vertices a single primitive consumes in this pipeline.
    #[inline]
    pub fn vertices_per_primitive(&self) -> u32 {
        let patch_control_points = self
            .tessellation_state
            .as_ref()
            .map_or(1, |state| state.patch_control_points);

        self.input_assembly_state
            .topology
            .vertices_per_primitive(patch_control_points)
    }
}

/// Parameters to create a new compute `Pipeline`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePipelineCreateInfo {
    pub stage: PipelineShaderStage,
    pub layout: PipelineLayout,
}

/// The parameters a pipeline was created with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PipelineCreateInfo {
    Graphics(GraphicsPipelineCreateInfo),
    Compute(ComputePipelineCreateInfo),
}

impl PipelineCreateInfo {
    #[inline]
    pub fn bind_point(&self) -> PipelineBindPoint {
        match self {
            Self::Graphics(_) => PipelineBindPoint::Graphics,
            Self::Compute(_) => PipelineBindPoint::Compute,
        }
    }

    #[inline]
    pub fn as_graphics(&self) -> Option<&GraphicsPipelineCreateInfo> {
        match self {
            Self::Graphics(create_info) => Some(create_info),
            Self::Compute(_) => None,
        }
    }
}

/// A range of push constants visible to a set of shader stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

/// Parameters to create a new `PipelineLayout`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLayoutCreateInfo {
    pub set_layouts: Vec<DescriptorSetLayout>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

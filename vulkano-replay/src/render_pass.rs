//! Description of the steps of the rendering process, and the images used as input or output.
//!
//! A render pass is made of attachments and subpasses. Each subpass references some of the
//! attachments as input, color, resolve or depth/stencil attachment. What happens to the
//! contents of an attachment at the start and end of the render pass is described by its load
//! and store ops, and the layouts it is expected in and left in.
//!
//! A framebuffer binds concrete image views to the attachments of a render pass. The contents
//! of the framebuffer are only defined between a `BeginRenderPass` and the matching
//! `EndRenderPass`, so any work that must observe them from outside the render pass requires the
//! render pass to be split first.

use crate::{
    format::Format,
    image::{ImageLayout, ImageView, SampleCount},
    macros::{handles, vulkan_enum},
    sync::{AccessFlags, PipelineStages},
};
use serde::{Deserialize, Serialize};

handles! {
    /// An object representing the discrete steps in which rendering is done.
    RenderPass = RenderPass;

    /// A collection of image views bound to the attachments of a render pass.
    Framebuffer = Framebuffer;
}

vulkan_enum! {
    /// Describes what the implementation should do with an attachment at the start of the
    /// subpass that first uses it.
    LoadOp = AttachmentLoadOp(i32);

    /// The content of the attachment will be loaded from memory.
    Load = LOAD,

    /// The content of the attachment will be filled with a uniform value.
    Clear = CLEAR,

    /// The attachment will have undefined content.
    DontCare = DONT_CARE,
}

vulkan_enum! {
    /// Describes what the implementation should do with an attachment after all the subpasses
    /// have completed.
    StoreOp = AttachmentStoreOp(i32);

    /// The attachment will be stored.
    Store = STORE,

    /// The content of the attachment becomes undefined.
    DontCare = DONT_CARE,
}

vulkan_enum! {
    /// Specifies how the commands of a subpass are provided.
    SubpassContents = SubpassContents(i32);

    /// The commands are recorded directly into the primary command buffer.
    Inline = INLINE,

    /// The commands are recorded in secondary command buffers executed from the primary.
    SecondaryCommandBuffers = SECONDARY_COMMAND_BUFFERS,
}

/// Parameters to create a new `RenderPass`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPassCreateInfo {
    /// The attachments available for the render pass.
    pub attachments: Vec<AttachmentDescription>,

    /// The subpasses that make up this render pass. There must be at least one.
    pub subpasses: Vec<SubpassDescription>,

    /// The dependencies between subpasses.
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassCreateInfo {
    /// Returns the index of the first subpass that references `attachment`, if any.
    pub fn first_use_subpass(&self, attachment: u32) -> Option<u32> {
        self.subpasses
            .iter()
            .position(|subpass| subpass.references(attachment))
            .map(|index| index as u32)
    }

    /// Returns the index of the last subpass that references `attachment`, if any.
    pub fn last_use_subpass(&self, attachment: u32) -> Option<u32> {
        self.subpasses
            .iter()
            .rposition(|subpass| subpass.references(attachment))
            .map(|index| index as u32)
    }
}

/// Describes an attachment that will be used in a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescription {
    /// The format of the image that is going to be bound.
    pub format: Format,

    /// The number of samples of the image that is going to be bound.
    pub samples: SampleCount,

    /// What the implementation should do with the attachment at the start of the subpass that
    /// first uses it.
    pub load_op: LoadOp,

    /// What the implementation should do with the attachment at the end of the subpass that
    /// last uses it.
    pub store_op: StoreOp,

    /// The equivalent of `load_op` for the stencil component of the attachment, if any.
    pub stencil_load_op: LoadOp,

    /// The equivalent of `store_op` for the stencil component of the attachment, if any.
    pub stencil_store_op: StoreOp,

    /// The layout that the image must be in at the start of the render pass.
    pub initial_layout: ImageLayout,

    /// The layout that the image will be transitioned to at the end of the render pass.
    pub final_layout: ImageLayout,
}

impl Default for AttachmentDescription {
    #[inline]
    fn default() -> Self {
        Self {
            format: Format::R8G8B8A8_UNORM,
            samples: SampleCount::Sample1,
            load_op: LoadOp::DontCare,
            store_op: StoreOp::DontCare,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::Undefined,
        }
    }
}

impl AttachmentDescription {
    /// Returns true if this attachment is compatible with another attachment, as defined in the
    /// `Render Pass Compatibility` section of the Vulkan specs.
    #[inline]
    pub fn is_compatible_with(&self, other: &AttachmentDescription) -> bool {
        self.format == other.format && self.samples == other.samples
    }
}

/// Describes one of the subpasses of a render pass.
///
/// The index in the `Vec`s of this structure corresponds to the index used for that attachment
/// type in the shader. An unused index is set to `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubpassDescription {
    pub input_attachments: Vec<Option<AttachmentReference>>,
    pub color_attachments: Vec<Option<AttachmentReference>>,

    /// Either empty or the same length as `color_attachments`.
    pub resolve_attachments: Vec<Option<AttachmentReference>>,
    pub depth_stencil_attachment: Option<AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl SubpassDescription {
    /// Returns whether the subpass references `attachment` in any way, including preserving it.
    pub fn references(&self, attachment: u32) -> bool {
        self.attachment_references()
            .any(|reference| reference.attachment == attachment)
            || self.preserve_attachments.contains(&attachment)
    }

    /// Returns an iterator over every attachment reference of the subpass.
    pub fn attachment_references(&self) -> impl Iterator<Item = &AttachmentReference> {
        self.input_attachments
            .iter()
            .chain(&self.color_attachments)
            .chain(&self.resolve_attachments)
            .flatten()
            .chain(&self.depth_stencil_attachment)
    }
}

/// A reference in a subpass description to a particular attachment of the render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentReference {
    /// The number of the attachment being referred to.
    pub attachment: u32,

    /// The image layout that the attachment should be transitioned to at the start of the
    /// subpass.
    pub layout: ImageLayout,
}

/// A dependency between two subpasses of a render pass. `None` specifies an external
/// dependency.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub by_region: bool,
}

/// Parameters to create a new `Framebuffer`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferCreateInfo {
    pub render_pass: RenderPass,
    pub attachments: Vec<ImageView>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// A value used to clear an attachment at the start of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Parameters of a `BeginRenderPass` command.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderPassBeginInfo {
    pub render_pass: RenderPass,
    pub framebuffer: Framebuffer,
    pub render_area_offset: [i32; 2],
    pub render_area_extent: [u32; 2],
    pub clear_values: Vec<ClearValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_use() {
        let reference = |attachment| {
            Some(AttachmentReference {
                attachment,
                layout: ImageLayout::ColorAttachmentOptimal,
            })
        };
        let create_info = RenderPassCreateInfo {
            attachments: vec![AttachmentDescription::default(); 3],
            subpasses: vec![
                SubpassDescription {
                    color_attachments: vec![reference(0)],
                    ..Default::default()
                },
                SubpassDescription {
                    color_attachments: vec![reference(1)],
                    input_attachments: vec![reference(0)],
                    ..Default::default()
                },
            ],
            dependencies: Vec::new(),
        };

        assert_eq!(create_info.first_use_subpass(0), Some(0));
        assert_eq!(create_info.last_use_subpass(0), Some(1));
        assert_eq!(create_info.first_use_subpass(1), Some(1));
        assert_eq!(create_info.first_use_subpass(2), None);
    }
}

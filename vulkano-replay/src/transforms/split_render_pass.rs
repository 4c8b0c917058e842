//! The render passes that a render pass is split into.
//!
//! To insert work in the middle of a subpass, the render pass instance has to be ended there
//! and restarted afterwards, without losing what was rendered so far or changing what is left
//! at the end. Every subpass `N` of the original render pass is therefore replaced by three
//! render passes with a single subpass each:
//!
//! - `enter` starts subpass `N`. It applies the original load operations of the attachments
//!   whose first use is in subpass `N`, and loads every other attachment. An attachment that
//!   subpass 0 doesn't use is cleared or discarded by its original load operation in the
//!   subpass that uses it first, not in subpass 0, as Vulkan does for the unsplit render pass.
//! - `intermediate` continues subpass `N` after an insertion. It loads and stores everything.
//! - `exit` is begun and ended right away, after the work of subpass `N`. It loads everything
//!   and performs the resolve operations of subpass `N`. The exit of the last subpass stores
//!   and transitions the attachments exactly like the original render pass does; the exits of
//!   the other subpasses store everything and keep the layouts the next subpass needs.
//!
//! `enter` and `intermediate` never resolve, and always store and keep the attachments in the
//! layout the subpass uses them in.

use crate::{
    image::ImageLayout,
    render_pass::{
        AttachmentDescription, LoadOp, RenderPass, RenderPassCreateInfo, StoreOp,
        SubpassDescription,
    },
};

/// The parameters of the render passes that replace one subpass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitRenderPassInfos {
    pub enter: RenderPassCreateInfo,
    pub intermediate: RenderPassCreateInfo,
    pub exit: RenderPassCreateInfo,
}

/// The render passes that replace one subpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SplitRenderPasses {
    pub enter: RenderPass,
    pub intermediate: RenderPass,
    pub exit: RenderPass,
}

/// Returns the parameters of the render passes that replace each subpass of a render pass.
pub fn split_render_pass_infos(create_info: &RenderPassCreateInfo) -> Vec<SplitRenderPassInfos> {
    let subpass_count = create_info.subpasses.len();
    let mut layouts: Vec<ImageLayout> = create_info
        .attachments
        .iter()
        .map(|attachment| attachment.initial_layout)
        .collect();
    let mut infos = Vec::with_capacity(subpass_count);

    for (index, subpass) in create_info.subpasses.iter().enumerate() {
        let index = index as u32;
        let is_last = index as usize + 1 == subpass_count;
        let working_layouts = working_layouts(subpass, &layouts);

        let enter_attachments = create_info
            .attachments
            .iter()
            .enumerate()
            .map(|(attachment, description)| {
                let first_use = create_info
                    .first_use_subpass(attachment as u32)
                    .unwrap_or(0);
                let keep_load = first_use == index;

                AttachmentDescription {
                    load_op: if keep_load { description.load_op } else { LoadOp::Load },
                    stencil_load_op: if keep_load {
                        description.stencil_load_op
                    } else {
                        LoadOp::Load
                    },
                    store_op: StoreOp::Store,
                    stencil_store_op: StoreOp::Store,
                    initial_layout: layouts[attachment],
                    final_layout: working_layouts[attachment],
                    ..*description
                }
            })
            .collect();

        let intermediate_attachments = create_info
            .attachments
            .iter()
            .enumerate()
            .map(|(attachment, description)| AttachmentDescription {
                load_op: LoadOp::Load,
                stencil_load_op: LoadOp::Load,
                store_op: StoreOp::Store,
                stencil_store_op: StoreOp::Store,
                initial_layout: working_layouts[attachment],
                final_layout: working_layouts[attachment],
                ..*description
            })
            .collect();

        let exit_attachments = create_info
            .attachments
            .iter()
            .enumerate()
            .map(|(attachment, description)| {
                if is_last {
                    AttachmentDescription {
                        load_op: LoadOp::Load,
                        stencil_load_op: LoadOp::Load,
                        initial_layout: working_layouts[attachment],
                        ..*description
                    }
                } else {
                    AttachmentDescription {
                        load_op: LoadOp::Load,
                        stencil_load_op: LoadOp::Load,
                        store_op: StoreOp::Store,
                        stencil_store_op: StoreOp::Store,
                        initial_layout: working_layouts[attachment],
                        final_layout: working_layouts[attachment],
                        ..*description
                    }
                }
            })
            .collect();

        let without_resolve = SubpassDescription {
            resolve_attachments: Vec::new(),
            ..subpass.clone()
        };

        infos.push(SplitRenderPassInfos {
            enter: RenderPassCreateInfo {
                attachments: enter_attachments,
                subpasses: vec![without_resolve.clone()],
                dependencies: Vec::new(),
            },
            intermediate: RenderPassCreateInfo {
                attachments: intermediate_attachments,
                subpasses: vec![without_resolve],
                dependencies: Vec::new(),
            },
            exit: RenderPassCreateInfo {
                attachments: exit_attachments,
                subpasses: vec![subpass.clone()],
                dependencies: Vec::new(),
            },
        });

        layouts = working_layouts;
    }

    infos
}

/// Returns the layout of every attachment while `subpass` executes, given the layouts before it.
fn working_layouts(subpass: &SubpassDescription, layouts: &[ImageLayout]) -> Vec<ImageLayout> {
    let mut working_layouts: Vec<ImageLayout> = layouts
        .iter()
        .map(|&layout| {
            // An attachment can't be left in the undefined layout.
            if layout == ImageLayout::Undefined {
                ImageLayout::General
            } else {
                layout
            }
        })
        .collect();

    for reference in subpass.attachment_references() {
        if let Some(layout) = working_layouts.get_mut(reference.attachment as usize) {
            *layout = reference.layout;
        }
    }

    working_layouts
}

#[cfg(test)]
mod tests {
    use super::split_render_pass_infos;
    use crate::{
        format::Format,
        image::{ImageLayout, SampleCount},
        render_pass::{
            AttachmentDescription, AttachmentReference, LoadOp, RenderPassCreateInfo, StoreOp,
            SubpassDescription,
        },
    };

    fn reference(attachment: u32, layout: ImageLayout) -> Option<AttachmentReference> {
        Some(AttachmentReference { attachment, layout })
    }

    /// A multisampled color attachment resolved into a presentable image, plus a depth
    /// attachment and an attachment only used by the second subpass.
    fn create_info() -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            attachments: vec![
                AttachmentDescription {
                    format: Format::R8G8B8A8_UNORM,
                    samples: SampleCount::Sample4,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::DontCare,
                    final_layout: ImageLayout::ColorAttachmentOptimal,
                    ..Default::default()
                },
                AttachmentDescription {
                    format: Format::R8G8B8A8_UNORM,
                    load_op: LoadOp::DontCare,
                    store_op: StoreOp::Store,
                    final_layout: ImageLayout::PresentSrc,
                    ..Default::default()
                },
                AttachmentDescription {
                    format: Format::D32_SFLOAT,
                    samples: SampleCount::Sample4,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::DontCare,
                    final_layout: ImageLayout::DepthStencilAttachmentOptimal,
                    ..Default::default()
                },
                AttachmentDescription {
                    format: Format::R8G8B8A8_UNORM,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::Store,
                    final_layout: ImageLayout::TransferSrcOptimal,
                    ..Default::default()
                },
            ],
            subpasses: vec![
                SubpassDescription {
                    color_attachments: vec![reference(0, ImageLayout::ColorAttachmentOptimal)],
                    depth_stencil_attachment: reference(
                        2,
                        ImageLayout::DepthStencilAttachmentOptimal,
                    ),
                    ..Default::default()
                },
                SubpassDescription {
                    color_attachments: vec![
                        reference(0, ImageLayout::ColorAttachmentOptimal),
                        reference(3, ImageLayout::ColorAttachmentOptimal),
                    ],
                    resolve_attachments: vec![
                        reference(1, ImageLayout::ColorAttachmentOptimal),
                        None,
                    ],
                    ..Default::default()
                },
            ],
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn last_subpass_exit_matches_original() {
        let original = create_info();
        let infos = split_render_pass_infos(&original);
        let exit = &infos.last().unwrap().exit;

        for (split, original) in exit.attachments.iter().zip(&original.attachments) {
            assert_eq!(split.format, original.format);
            assert_eq!(split.samples, original.samples);
            assert_eq!(split.store_op, original.store_op);
            assert_eq!(split.stencil_store_op, original.stencil_store_op);
            assert_eq!(split.final_layout, original.final_layout);
            assert_eq!(split.load_op, LoadOp::Load);
        }

        assert_eq!(
            exit.subpasses[0].resolve_attachments,
            original.subpasses[1].resolve_attachments,
        );
    }

    #[test]
    fn enter_and_intermediate() {
        let original = create_info();
        let infos = split_render_pass_infos(&original);
        assert_eq!(infos.len(), 2);

        // The first subpass applies the original load ops of the attachments it uses first.
        let enter = &infos[0].enter;
        assert_eq!(enter.attachments[0].load_op, LoadOp::Clear);
        assert_eq!(enter.attachments[2].load_op, LoadOp::Clear);
        assert_eq!(enter.attachments[0].initial_layout, ImageLayout::Undefined);
        assert_eq!(
            enter.attachments[0].final_layout,
            ImageLayout::ColorAttachmentOptimal,
        );

        // Attachment 3 is first used by the second subpass, so that one clears it even though
        // it is not the first subpass.
        assert_eq!(enter.attachments[3].load_op, LoadOp::Load);
        assert_eq!(infos[1].enter.attachments[3].load_op, LoadOp::Clear);
        assert_eq!(infos[1].enter.attachments[0].load_op, LoadOp::Load);

        for infos in &infos {
            for split in [&infos.enter, &infos.intermediate] {
                assert!(split.subpasses[0].resolve_attachments.is_empty());
                assert!(split
                    .attachments
                    .iter()
                    .all(|attachment| attachment.store_op == StoreOp::Store
                        && attachment.final_layout != ImageLayout::Undefined));
            }

            assert!(infos
                .intermediate
                .attachments
                .iter()
                .all(|attachment| attachment.load_op == LoadOp::Load
                    && attachment.initial_layout == attachment.final_layout));
        }

        // The exit of a subpass that is not the last keeps everything for the next one.
        let exit = &infos[0].exit;
        assert!(exit
            .attachments
            .iter()
            .all(|attachment| attachment.store_op == StoreOp::Store));
        assert_eq!(
            exit.attachments[2].final_layout,
            infos[1].enter.attachments[2].initial_layout,
        );
    }
}

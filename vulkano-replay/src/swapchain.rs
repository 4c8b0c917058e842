//! Swapchains and presentation.

use crate::{
    format::Format,
    image::ImageUsage,
    macros::handles,
    sync::Semaphore,
};
use serde::{Deserialize, Serialize};

handles! {
    /// A set of images that are presented to a surface in turn.
    Swapchain = SwapchainKHR;
}

/// Parameters to create a new `Swapchain`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapchainCreateInfo {
    pub image_format: Format,
    pub image_extent: [u32; 2],
    pub image_count: u32,
    pub image_usage: ImageUsage,
}

/// Parameters of a `QueuePresent` command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentInfo {
    pub wait_semaphores: Vec<Semaphore>,
    pub swapchains: Vec<Swapchain>,
    pub image_indices: Vec<u32>,
}

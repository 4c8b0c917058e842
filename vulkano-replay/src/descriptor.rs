//! Descriptor set layouts, pools and sets.

use crate::{
    buffer::Buffer,
    image::{ImageLayout, ImageView},
    macros::{handles, vulkan_enum},
    pipeline::ShaderStages,
    DeviceSize,
};
use serde::{Deserialize, Serialize};

handles! {
    /// Describes the bindings of a descriptor set.
    DescriptorSetLayout = DescriptorSetLayout;

    /// A pool from which descriptor sets are allocated.
    DescriptorPool = DescriptorPool;

    /// A collection of descriptors bound to a pipeline together.
    DescriptorSet = DescriptorSet;
}

vulkan_enum! {
    /// Describes what kind of resource a descriptor refers to.
    DescriptorType = DescriptorType(i32);

    Sampler = SAMPLER,
    CombinedImageSampler = COMBINED_IMAGE_SAMPLER,
    SampledImage = SAMPLED_IMAGE,
    StorageImage = STORAGE_IMAGE,
    UniformBuffer = UNIFORM_BUFFER,
    StorageBuffer = STORAGE_BUFFER,
    InputAttachment = INPUT_ATTACHMENT,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
    pub stages: ShaderStages,
}

/// Parameters to create a new `DescriptorSetLayout`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSetLayoutCreateInfo {
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPoolSize {
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
}

/// Parameters to create a new `DescriptorPool`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPoolCreateInfo {
    pub max_sets: u32,
    pub pool_sizes: Vec<DescriptorPoolSize>,
}

/// Parameters to allocate descriptor sets, one per set layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSetAllocateInfo {
    pub descriptor_pool: DescriptorPool,
    pub set_layouts: Vec<DescriptorSetLayout>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorImageInfo {
    pub image_view: ImageView,
    pub image_layout: ImageLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorBufferInfo {
    pub buffer: Buffer,
    pub offset: DeviceSize,
    pub range: DeviceSize,
}

/// A write of descriptors into a descriptor set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteDescriptorSet {
    pub dst_set: DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: DescriptorType,
    pub image_info: Vec<DescriptorImageInfo>,
    pub buffer_info: Vec<DescriptorBufferInfo>,
}

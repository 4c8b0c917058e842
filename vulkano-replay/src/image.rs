//! Images, image views and the ways they are addressed.

use crate::{
    format::Format,
    macros::{handles, vulkan_bitflags, vulkan_enum},
    DeviceSize,
};
use serde::{Deserialize, Serialize};

handles! {
    /// A multidimensional storage for texels.
    Image = Image;

    /// A view into a subresource range of an image.
    ImageView = ImageView;
}

vulkan_bitflags! {
    /// A set of aspects of an image, or of a format.
    ImageAspects = ImageAspectFlags(u32);

    /// The color aspect of a color format.
    COLOR = COLOR,

    /// The depth component of a depth or depth/stencil format.
    DEPTH = DEPTH,

    /// The stencil component of a stencil or depth/stencil format.
    STENCIL = STENCIL,
}

impl ImageAspects {
    /// Returns an iterator over the individual aspects in `self`.
    pub fn iter(self) -> impl Iterator<Item = ImageAspects> {
        [Self::COLOR, Self::DEPTH, Self::STENCIL]
            .into_iter()
            .filter(move |&aspect| self.contains(aspect))
    }
}

vulkan_bitflags! {
    /// Describes how an image is going to be used.
    ImageUsage = ImageUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    SAMPLED = SAMPLED,
    STORAGE = STORAGE,
    COLOR_ATTACHMENT = COLOR_ATTACHMENT,
    DEPTH_STENCIL_ATTACHMENT = DEPTH_STENCIL_ATTACHMENT,
    TRANSIENT_ATTACHMENT = TRANSIENT_ATTACHMENT,
    INPUT_ATTACHMENT = INPUT_ATTACHMENT,
}

vulkan_enum! {
    /// In-memory layout of the texels of an image subresource.
    ImageLayout = ImageLayout(i32);

    Undefined = UNDEFINED,
    General = GENERAL,
    ColorAttachmentOptimal = COLOR_ATTACHMENT_OPTIMAL,
    DepthStencilAttachmentOptimal = DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    DepthStencilReadOnlyOptimal = DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,
    Preinitialized = PREINITIALIZED,
    PresentSrc = PRESENT_SRC_KHR,
}

impl Default for ImageLayout {
    #[inline]
    fn default() -> Self {
        ImageLayout::Undefined
    }
}

vulkan_enum! {
    /// The number of samples per texel of an image.
    SampleCount impl {
        /// Returns whether more than one sample is stored per texel.
        #[inline]
        pub fn is_multisampled(self) -> bool {
            self != SampleCount::Sample1
        }
    }
    = SampleCountFlags(u32);

    Sample1 = TYPE_1,
    Sample2 = TYPE_2,
    Sample4 = TYPE_4,
    Sample8 = TYPE_8,
    Sample16 = TYPE_16,
}

impl Default for SampleCount {
    #[inline]
    fn default() -> Self {
        SampleCount::Sample1
    }
}

vulkan_enum! {
    /// The basic dimensionality of an image.
    ImageType = ImageType(i32);

    Dim1d = TYPE_1D,
    Dim2d = TYPE_2D,
    Dim3d = TYPE_3D,
}

vulkan_enum! {
    /// The dimensionality of an image view.
    ImageViewType = ImageViewType(i32);

    Dim2d = TYPE_2D,
    Dim2dArray = TYPE_2D_ARRAY,
    Cube = CUBE,
}

vulkan_enum! {
    /// The arrangement of texels in memory.
    ImageTiling = ImageTiling(i32);

    Optimal = OPTIMAL,
    Linear = LINEAR,
}

vulkan_enum! {
    /// Describes how sampled image data should be filtered.
    Filter = Filter(i32);

    Nearest = NEAREST,
    Linear = LINEAR,
}

/// Parameters to create a new `Image`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCreateInfo {
    pub image_type: ImageType,
    pub format: Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: SampleCount,
    pub tiling: ImageTiling,
    pub usage: ImageUsage,
    pub initial_layout: ImageLayout,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            image_type: ImageType::Dim2d,
            format: Format::R8G8B8A8_UNORM,
            extent: [1, 1, 1],
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::Sample1,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::empty(),
            initial_layout: ImageLayout::Undefined,
        }
    }
}

impl ImageCreateInfo {
    /// Returns the number of bytes of memory that an image created with these parameters
    /// occupies, ignoring any driver-specific padding.
    pub fn memory_size(&self) -> DeviceSize {
        let mut size = 0;
        let [mut width, mut height, mut depth] = self.extent;

        for _ in 0..self.mip_levels {
            size += width as DeviceSize * height as DeviceSize * depth as DeviceSize;
            width = (width / 2).max(1);
            height = (height / 2).max(1);
            depth = (depth / 2).max(1);
        }

        size * self.format.block_size()
            * self.array_layers as DeviceSize
            * self.samples as u32 as DeviceSize
    }

    /// Returns the subresource range covering the whole image.
    #[inline]
    pub fn whole_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.format.aspects(),
            mip_levels: 0..self.mip_levels,
            array_layers: 0..self.array_layers,
        }
    }
}

/// One or more subresources of an image, spanning a single mip level, that should be accessed by
/// a copy command.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSubresourceLayers {
    pub aspects: ImageAspects,
    pub mip_level: u32,
    pub array_layers: std::ops::Range<u32>,
}

impl ImageSubresourceLayers {
    /// Returns the layers covering the first mip level and first layer of `aspect`.
    #[inline]
    pub fn first(aspect: ImageAspects) -> Self {
        Self {
            aspects: aspect,
            mip_level: 0,
            array_layers: 0..1,
        }
    }
}

impl From<ImageSubresourceLayers> for ImageSubresourceRange {
    #[inline]
    fn from(val: ImageSubresourceLayers) -> Self {
        Self {
            aspects: val.aspects,
            mip_levels: val.mip_level..val.mip_level + 1,
            array_layers: val.array_layers,
        }
    }
}

/// A range of subresources of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSubresourceRange {
    pub aspects: ImageAspects,
    pub mip_levels: std::ops::Range<u32>,
    pub array_layers: std::ops::Range<u32>,
}

impl ImageSubresourceRange {
    /// Returns whether `subresource` lies inside the range.
    #[inline]
    pub fn contains(&self, subresource: ImageSubresource) -> bool {
        self.aspects.contains(subresource.aspect)
            && self.mip_levels.contains(&subresource.mip_level)
            && self.array_layers.contains(&subresource.array_layer)
    }

    /// Returns an iterator over every subresource in the range.
    pub fn iter(&self) -> impl Iterator<Item = ImageSubresource> + '_ {
        self.aspects.iter().flat_map(move |aspect| {
            self.array_layers.clone().flat_map(move |array_layer| {
                self.mip_levels
                    .clone()
                    .map(move |mip_level| ImageSubresource {
                        aspect,
                        array_layer,
                        mip_level,
                    })
            })
        })
    }
}

/// A single subresource of an image: one aspect of one mip level of one array layer. This is
/// the granularity at which image layouts are tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSubresource {
    pub aspect: ImageAspects,
    pub array_layer: u32,
    pub mip_level: u32,
}

/// Parameters to create a new `ImageView`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageViewCreateInfo {
    pub image: Image,
    pub view_type: ImageViewType,
    pub format: Format,
    pub subresource_range: ImageSubresourceRange,
}

impl ImageViewCreateInfo {
    /// Returns the parameters of a 2D view of the first layer and level of `image`.
    #[inline]
    pub fn whole_2d(image: Image, format: Format) -> Self {
        Self {
            image,
            view_type: ImageViewType::Dim2d,
            format,
            subresource_range: ImageSubresourceRange {
                aspects: format.aspects(),
                mip_levels: 0..1,
                array_layers: 0..1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_range_iteration() {
        let range = ImageSubresourceRange {
            aspects: ImageAspects::DEPTH | ImageAspects::STENCIL,
            mip_levels: 0..2,
            array_layers: 1..2,
        };
        let subresources: Vec<_> = range.iter().collect();

        assert_eq!(subresources.len(), 4);
        assert!(subresources.iter().all(|&s| range.contains(s)));
        assert!(!range.contains(ImageSubresource {
            aspect: ImageAspects::DEPTH,
            array_layer: 0,
            mip_level: 0,
        }));
    }

    #[test]
    fn memory_size() {
        let create_info = ImageCreateInfo {
            format: Format::R8G8B8A8_UNORM,
            extent: [256, 256, 1],
            ..Default::default()
        };
        assert_eq!(create_info.memory_size(), 256 * 256 * 4);
    }

    #[test]
    fn handle_conversion() {
        let image = Image::from_raw(0x1234);
        let raw: ash::vk::Image = image.into();
        assert_eq!(Image::from(raw), image);
        assert!(Image::NULL.is_null());
    }
}

//! The formats of images and vertex attributes.
//!
//! Only the formats that the transforms of this crate have to reason about are modelled. A
//! capture that uses any other format still replays, because the replay target only sees the
//! raw value, but none of the transforms will read back or synthesize images of that format.

use crate::{image::ImageAspects, DeviceSize};
use serde::{Deserialize, Serialize};

/// An enumeration of the supported image and vertex formats.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
#[non_exhaustive]
pub enum Format {
    R8_UNORM = ash::vk::Format::R8_UNORM.as_raw(),
    R8_UINT = ash::vk::Format::R8_UINT.as_raw(),
    R8G8B8A8_UNORM = ash::vk::Format::R8G8B8A8_UNORM.as_raw(),
    R8G8B8A8_SRGB = ash::vk::Format::R8G8B8A8_SRGB.as_raw(),
    B8G8R8A8_UNORM = ash::vk::Format::B8G8R8A8_UNORM.as_raw(),
    B8G8R8A8_SRGB = ash::vk::Format::B8G8R8A8_SRGB.as_raw(),
    A2B10G10R10_UNORM_PACK32 = ash::vk::Format::A2B10G10R10_UNORM_PACK32.as_raw(),
    R16G16B16A16_SFLOAT = ash::vk::Format::R16G16B16A16_SFLOAT.as_raw(),
    R32_SFLOAT = ash::vk::Format::R32_SFLOAT.as_raw(),
    R32G32_SFLOAT = ash::vk::Format::R32G32_SFLOAT.as_raw(),
    R32G32B32_SFLOAT = ash::vk::Format::R32G32B32_SFLOAT.as_raw(),
    R32G32B32A32_SFLOAT = ash::vk::Format::R32G32B32A32_SFLOAT.as_raw(),
    D16_UNORM = ash::vk::Format::D16_UNORM.as_raw(),
    X8_D24_UNORM_PACK32 = ash::vk::Format::X8_D24_UNORM_PACK32.as_raw(),
    D32_SFLOAT = ash::vk::Format::D32_SFLOAT.as_raw(),
    S8_UINT = ash::vk::Format::S8_UINT.as_raw(),
    D16_UNORM_S8_UINT = ash::vk::Format::D16_UNORM_S8_UINT.as_raw(),
    D24_UNORM_S8_UINT = ash::vk::Format::D24_UNORM_S8_UINT.as_raw(),
    D32_SFLOAT_S8_UINT = ash::vk::Format::D32_SFLOAT_S8_UINT.as_raw(),
}

impl Format {
    /// The combined depth/stencil formats, from most to fewest depth bits.
    pub const DEPTH_STENCIL_FORMATS: [Format; 3] = [
        Format::D32_SFLOAT_S8_UINT,
        Format::D24_UNORM_S8_UINT,
        Format::D16_UNORM_S8_UINT,
    ];

    /// Returns the size in bytes of a single texel, as stored in an image of this format.
    ///
    /// For combined depth/stencil formats, this is the size of the texel when copied to a buffer
    /// one aspect at a time, summed over both aspects.
    #[inline]
    pub fn block_size(self) -> DeviceSize {
        match self {
            Self::R8_UNORM | Self::R8_UINT | Self::S8_UINT => 1,
            Self::D16_UNORM => 2,
            Self::D16_UNORM_S8_UINT => 3,
            Self::R8G8B8A8_UNORM
            | Self::R8G8B8A8_SRGB
            | Self::B8G8R8A8_UNORM
            | Self::B8G8R8A8_SRGB
            | Self::A2B10G10R10_UNORM_PACK32
            | Self::R32_SFLOAT
            | Self::X8_D24_UNORM_PACK32
            | Self::D24_UNORM_S8_UINT
            | Self::D32_SFLOAT => 4,
            Self::D32_SFLOAT_S8_UINT => 5,
            Self::R16G16B16A16_SFLOAT | Self::R32G32_SFLOAT => 8,
            Self::R32G32B32_SFLOAT => 12,
            Self::R32G32B32A32_SFLOAT => 16,
        }
    }

    /// Returns the aspects that images of this format have.
    #[inline]
    pub fn aspects(self) -> ImageAspects {
        match (self.depth_bits() != 0, self.has_stencil()) {
            (true, true) => ImageAspects::DEPTH | ImageAspects::STENCIL,
            (true, false) => ImageAspects::DEPTH,
            (false, true) => ImageAspects::STENCIL,
            (false, false) => ImageAspects::COLOR,
        }
    }

    /// Returns the number of bits of the depth component, or 0 if there is none.
    #[inline]
    pub fn depth_bits(self) -> u32 {
        match self {
            Self::D16_UNORM | Self::D16_UNORM_S8_UINT => 16,
            Self::X8_D24_UNORM_PACK32 | Self::D24_UNORM_S8_UINT => 24,
            Self::D32_SFLOAT | Self::D32_SFLOAT_S8_UINT => 32,
            _ => 0,
        }
    }

    /// Returns whether the format has a stencil component.
    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            Self::S8_UINT
                | Self::D16_UNORM_S8_UINT
                | Self::D24_UNORM_S8_UINT
                | Self::D32_SFLOAT_S8_UINT,
        )
    }

    /// Returns whether the format has a depth or a stencil component.
    #[inline]
    pub fn is_depth_stencil(self) -> bool {
        !self.aspects().intersects(ImageAspects::COLOR)
    }

    /// Returns whether the depth components of `self` and `other` are stored the same way, so
    /// that depth data can be copied between the two with a plain image copy.
    #[inline]
    pub fn same_depth_precision(self, other: Format) -> bool {
        let depth_bits = self.depth_bits();

        depth_bits != 0
            && depth_bits == other.depth_bits()
            && self.depth_aspect_format() == other.depth_aspect_format()
    }

    /// Returns the format in which the depth aspect of an image of this format is laid out when
    /// it is copied into a buffer.
    #[inline]
    pub fn depth_aspect_format(self) -> Option<Format> {
        match self {
            Self::D16_UNORM | Self::D16_UNORM_S8_UINT => Some(Self::D16_UNORM),
            Self::X8_D24_UNORM_PACK32 | Self::D24_UNORM_S8_UINT => Some(Self::X8_D24_UNORM_PACK32),
            Self::D32_SFLOAT | Self::D32_SFLOAT_S8_UINT => Some(Self::D32_SFLOAT),
            _ => None,
        }
    }

    /// Returns the format in which the given aspect of an image of this format is laid out when
    /// it is copied into a buffer.
    ///
    /// # Panics
    ///
    /// - Panics if `aspect` is not exactly one aspect that the format has.
    pub fn aspect_format(self, aspect: ImageAspects) -> Format {
        assert!(aspect.count() == 1 && self.aspects().contains(aspect));

        if aspect == ImageAspects::STENCIL {
            Self::S8_UINT
        } else if aspect == ImageAspects::DEPTH {
            // The assertion above guarantees a depth component.
            self.depth_aspect_format().unwrap_or(self)
        } else {
            self
        }
    }
}

impl From<Format> for ash::vk::Format {
    #[inline]
    fn from(val: Format) -> Self {
        ash::vk::Format::from_raw(val as i32)
    }
}

impl TryFrom<ash::vk::Format> for Format {
    type Error = ();

    fn try_from(val: ash::vk::Format) -> Result<Self, Self::Error> {
        Ok(match val {
            ash::vk::Format::R8_UNORM => Self::R8_UNORM,
            ash::vk::Format::R8_UINT => Self::R8_UINT,
            ash::vk::Format::R8G8B8A8_UNORM => Self::R8G8B8A8_UNORM,
            ash::vk::Format::R8G8B8A8_SRGB => Self::R8G8B8A8_SRGB,
            ash::vk::Format::B8G8R8A8_UNORM => Self::B8G8R8A8_UNORM,
            ash::vk::Format::B8G8R8A8_SRGB => Self::B8G8R8A8_SRGB,
            ash::vk::Format::A2B10G10R10_UNORM_PACK32 => Self::A2B10G10R10_UNORM_PACK32,
            ash::vk::Format::R16G16B16A16_SFLOAT => Self::R16G16B16A16_SFLOAT,
            ash::vk::Format::R32_SFLOAT => Self::R32_SFLOAT,
            ash::vk::Format::R32G32_SFLOAT => Self::R32G32_SFLOAT,
            ash::vk::Format::R32G32B32_SFLOAT => Self::R32G32B32_SFLOAT,
            ash::vk::Format::R32G32B32A32_SFLOAT => Self::R32G32B32A32_SFLOAT,
            ash::vk::Format::D16_UNORM => Self::D16_UNORM,
            ash::vk::Format::X8_D24_UNORM_PACK32 => Self::X8_D24_UNORM_PACK32,
            ash::vk::Format::D32_SFLOAT => Self::D32_SFLOAT,
            ash::vk::Format::S8_UINT => Self::S8_UINT,
            ash::vk::Format::D16_UNORM_S8_UINT => Self::D16_UNORM_S8_UINT,
            ash::vk::Format::D24_UNORM_S8_UINT => Self::D24_UNORM_S8_UINT,
            ash::vk::Format::D32_SFLOAT_S8_UINT => Self::D32_SFLOAT_S8_UINT,
            _ => return Err(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Format;
    use crate::image::ImageAspects;

    #[test]
    fn aspects() {
        assert_eq!(Format::R8G8B8A8_UNORM.aspects(), ImageAspects::COLOR);
        assert_eq!(Format::D16_UNORM.aspects(), ImageAspects::DEPTH);
        assert_eq!(Format::S8_UINT.aspects(), ImageAspects::STENCIL);
        assert_eq!(
            Format::D24_UNORM_S8_UINT.aspects(),
            ImageAspects::DEPTH | ImageAspects::STENCIL,
        );
        assert!(Format::D32_SFLOAT_S8_UINT.is_depth_stencil());
        assert!(!Format::B8G8R8A8_SRGB.is_depth_stencil());
    }

    #[test]
    fn depth_precision() {
        assert!(Format::D32_SFLOAT.same_depth_precision(Format::D32_SFLOAT_S8_UINT));
        assert!(Format::X8_D24_UNORM_PACK32.same_depth_precision(Format::D24_UNORM_S8_UINT));
        assert!(!Format::D16_UNORM.same_depth_precision(Format::D24_UNORM_S8_UINT));
        assert!(!Format::R32_SFLOAT.same_depth_precision(Format::R32_SFLOAT));
    }

    #[test]
    fn aspect_formats() {
        let format = Format::D24_UNORM_S8_UINT;
        assert_eq!(
            format.aspect_format(ImageAspects::DEPTH),
            Format::X8_D24_UNORM_PACK32,
        );
        assert_eq!(format.aspect_format(ImageAspects::STENCIL), Format::S8_UINT);
        assert_eq!(
            Format::R8G8B8A8_UNORM.aspect_format(ImageAspects::COLOR),
            Format::R8G8B8A8_UNORM,
        );
    }

    #[test]
    fn ash_conversion() {
        let raw: ash::vk::Format = Format::D16_UNORM_S8_UINT.into();
        assert_eq!(raw, ash::vk::Format::D16_UNORM_S8_UINT);
        assert_eq!(Format::try_from(raw), Ok(Format::D16_UNORM_S8_UINT));
        assert!(Format::try_from(ash::vk::Format::BC1_RGB_UNORM_BLOCK).is_err());
    }
}

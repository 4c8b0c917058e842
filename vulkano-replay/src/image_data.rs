//! Pixel data read back from the replay target.

use crate::format::Format;

/// The pixels of one subresource of an image, tightly packed, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    /// The format of the texels. For `X8_D24_UNORM_PACK32`, the padding byte of every texel is
    /// stripped, so that texels are 3 bytes.
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl ImageData {
    /// Decodes the contents of a buffer that an image was copied into.
    ///
    /// Images are copied bottom row first, so the rows are flipped. Packed formats have their
    /// padding stripped. Returns `None` if `bytes` is too short to hold the image.
    pub fn from_buffer(
        format: Format,
        width: u32,
        height: u32,
        mut bytes: Vec<u8>,
    ) -> Option<Self> {
        let len = width as usize * height as usize * format.block_size() as usize;

        if bytes.len() < len {
            return None;
        }

        bytes.truncate(len);

        let mut image_data = ImageData {
            format,
            width,
            height,
            bytes,
        };
        image_data.flip_vertically();
        image_data.strip_padding();

        Some(image_data)
    }

    /// Returns the number of bytes of one row.
    #[inline]
    pub fn row_size(&self) -> usize {
        if self.height == 0 {
            0
        } else {
            self.bytes.len() / self.height as usize
        }
    }

    /// Reverses the order of the rows.
    pub fn flip_vertically(&mut self) {
        let row_size = self.row_size();

        if row_size == 0 {
            return;
        }

        let rows = self.bytes.len() / row_size;

        for top in 0..rows / 2 {
            let bottom = rows - 1 - top;
            let (upper, lower) = self.bytes.split_at_mut(bottom * row_size);
            upper[top * row_size..(top + 1) * row_size].swap_with_slice(&mut lower[..row_size]);
        }
    }

    fn strip_padding(&mut self) {
        if self.format != Format::X8_D24_UNORM_PACK32 {
            return;
        }

        let words: &[[u8; 4]] = bytemuck::cast_slice(self.bytes.as_slice());
        self.bytes = words.iter().flat_map(|word| [word[0], word[1], word[2]]).collect();
    }

    /// Returns the texel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// - Panics if the coordinates are out of bounds.
    pub fn texel(&self, x: u32, y: u32) -> &[u8] {
        assert!(x < self.width && y < self.height);

        let texel_size = self.row_size() / self.width as usize;
        let start = y as usize * self.row_size() + x as usize * texel_size;

        &self.bytes[start..start + texel_size]
    }
}

#[cfg(test)]
mod tests {
    use super::ImageData;
    use crate::format::Format;

    #[test]
    fn flip_twice() {
        let bytes: Vec<u8> = (0..5 * 3).collect();
        let mut image_data = ImageData {
            format: Format::R8_UNORM,
            width: 3,
            height: 5,
            bytes: bytes.clone(),
        };

        image_data.flip_vertically();
        assert_eq!(&image_data.bytes[..3], &[12, 13, 14]);
        assert_eq!(&image_data.bytes[6..9], &[6, 7, 8]);

        image_data.flip_vertically();
        assert_eq!(image_data.bytes, bytes);
    }

    #[test]
    fn packed_depth() {
        let bytes = vec![
            1, 2, 3, 0xff, 4, 5, 6, 0xff, // bottom row
            7, 8, 9, 0xff, 10, 11, 12, 0xff, // top row
        ];
        let image_data = ImageData::from_buffer(Format::X8_D24_UNORM_PACK32, 2, 2, bytes).unwrap();

        assert_eq!(image_data.bytes, [7, 8, 9, 10, 11, 12, 1, 2, 3, 4, 5, 6]);
        assert_eq!(image_data.texel(1, 1), &[4, 5, 6]);

        assert!(ImageData::from_buffer(Format::R8G8B8A8_UNORM, 2, 2, vec![0; 15]).is_none());
    }
}

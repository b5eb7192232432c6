//! Pixel images for the panel matrix.

use crate::error::{CoreError, CoreResult};
use crate::{PANEL_HEIGHT, PANEL_WIDTH};

/// Number of pixels on the panel.
pub const PIXEL_COUNT: usize = PANEL_WIDTH * PANEL_HEIGHT;
/// Size of a serialized image in bytes.
pub const IMAGE_LEN: usize = PIXEL_COUNT * Rgb::LEN;

/// A 24-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Serialized size of one pixel.
    pub const LEN: usize = 3;
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// An 8x18 image, stored row-major (`index = y * 8 + x`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    pixels: [Rgb; PIXEL_COUNT],
}

impl Default for PixelImage {
    fn default() -> Self {
        Self { pixels: [Rgb::BLACK; PIXEL_COUNT] }
    }
}

impl PixelImage {
    /// Create an all-black image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an image by evaluating `f` for every `(x, y)`.
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> Rgb) -> Self {
        let mut image = Self::default();
        for (i, pixel) in image.pixels.iter_mut().enumerate() {
            *pixel = f(i % PANEL_WIDTH, i / PANEL_WIDTH);
        }
        image
    }

    /// Pixel at `(x, y)`, or `None` outside the panel.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        Self::index(x, y).map(|i| self.pixels[i])
    }

    /// Set the pixel at `(x, y)`.
    ///
    /// # Errors
    /// Returns an error if the coordinate is outside the panel.
    pub fn set_pixel(&mut self, x: usize, y: usize, color: Rgb) -> CoreResult<()> {
        let i = Self::index(x, y).ok_or(CoreError::PixelOutOfRange { x, y })?;
        self.pixels[i] = color;
        Ok(())
    }

    /// Serialize to the device layout, three bytes per pixel.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; IMAGE_LEN] {
        let mut bytes = [0u8; IMAGE_LEN];
        for (chunk, pixel) in bytes.chunks_exact_mut(Rgb::LEN).zip(&self.pixels) {
            chunk.copy_from_slice(&[pixel.r, pixel.g, pixel.b]);
        }
        bytes
    }

    /// Rebuild an image from its serialized form.
    ///
    /// # Errors
    /// Returns an error unless exactly [`IMAGE_LEN`] bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != IMAGE_LEN {
            return Err(CoreError::InvalidLength {
                what: "image",
                expected: IMAGE_LEN,
                actual: bytes.len(),
            });
        }

        let mut image = Self::default();
        for (pixel, chunk) in image.pixels.iter_mut().zip(bytes.chunks_exact(Rgb::LEN)) {
            *pixel = Rgb::new(chunk[0], chunk[1], chunk[2]);
        }
        Ok(image)
    }

    fn index(x: usize, y: usize) -> Option<usize> {
        (x < PANEL_WIDTH && y < PANEL_HEIGHT).then_some(y * PANEL_WIDTH + x)
    }
}

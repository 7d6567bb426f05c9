/// Frames and base-image payload conversion
///
/// Every frame handled by the pipeline is RGBA8. Incoming images are converted once, on
/// arrival, from one of the supported raw encodings or from an encoded (compressed)
/// image such as PNG or JPEG.
use std::fmt;
use std::str::FromStr;

use image::{Rgba, RgbaImage};

use crate::error::FrameError;

/// An owned RGBA8 pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pixels: RgbaImage,
}

impl Frame {
    /// A fully transparent frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self { pixels: RgbaImage::new(width, height) }
    }

    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self { pixels: RgbaImage::from_pixel(width, height, color) }
    }

    pub fn from_image(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// Decode a compressed image (any format the `image` crate was built with).
    pub fn decode_encoded(bytes: &[u8]) -> Result<Self, FrameError> {
        let decoded = image::load_from_memory(bytes)?;
        let pixels = decoded.to_rgba8();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self { pixels })
    }

    pub fn from_raw(raw: &RawImage) -> Result<Self, FrameError> {
        raw.to_frame()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        self.pixels.get_pixel_checked(x, y).copied()
    }

    /// Overwrite one pixel. Coordinates outside the frame are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        if let Some(pixel) = self.pixels.get_pixel_mut_checked(x, y) {
            *pixel = color;
        }
    }

    /// Composite `color` over one pixel using its alpha. Coordinates outside the frame
    /// are ignored.
    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        let Some(pixel) = self.pixels.get_pixel_mut_checked(x, y) else {
            return;
        };
        let src_a = color[3] as u32;
        match src_a {
            0 => {}
            255 => *pixel = color,
            _ => {
                let inv = 255 - src_a;
                for c in 0..3 {
                    pixel[c] = ((color[c] as u32 * src_a + pixel[c] as u32 * inv + 127) / 255) as u8;
                }
                pixel[3] = (src_a + (pixel[3] as u32 * inv + 127) / 255).min(255) as u8;
            }
        }
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    /// Raw RGBA bytes in row-major order.
    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Pixel encodings accepted from the raw image transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
    /// Little-endian 16-bit grey, scaled down to 8 bits.
    Mono16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Bgra8 => "bgra8",
            PixelFormat::Mono8 => "mono8",
            PixelFormat::Mono16 => "mono16",
        }
    }

    fn to_rgba(self, px: &[u8]) -> Rgba<u8> {
        match self {
            PixelFormat::Rgb8 => Rgba([px[0], px[1], px[2], 255]),
            PixelFormat::Bgr8 => Rgba([px[2], px[1], px[0], 255]),
            PixelFormat::Rgba8 => Rgba([px[0], px[1], px[2], px[3]]),
            PixelFormat::Bgra8 => Rgba([px[2], px[1], px[0], px[3]]),
            PixelFormat::Mono8 => Rgba([px[0], px[0], px[0], 255]),
            PixelFormat::Mono16 => {
                let v = (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8;
                Rgba([v, v, v, 255])
            }
        }
    }
}

impl FromStr for PixelFormat {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb8" => Ok(PixelFormat::Rgb8),
            "bgr8" => Ok(PixelFormat::Bgr8),
            "rgba8" => Ok(PixelFormat::Rgba8),
            "bgra8" => Ok(PixelFormat::Bgra8),
            "mono8" | "8UC1" => Ok(PixelFormat::Mono8),
            "mono16" | "16UC1" => Ok(PixelFormat::Mono16),
            other => Err(FrameError::UnknownEncoding(other.to_string())),
        }
    }
}

/// An uncompressed image as carried by the raw image transport.
///
/// Wire layout (little endian):
/// `width:u32, height:u32, step:u32, encoding_len:u8, encoding:[u8], data:[u8]`.
/// `step` is the byte length of one row and may include padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub step: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

const RAW_HEADER_LEN: usize = 13;

impl RawImage {
    /// Tightly packed image (no row padding).
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        // An overflowing width saturates and is rejected as too large on conversion.
        Self { width, height, step: width.saturating_mul(format.bytes_per_pixel()), format, data }
    }

    pub fn encode(&self) -> Vec<u8> {
        let encoding = self.format.as_str().as_bytes();
        let mut out = Vec::with_capacity(RAW_HEADER_LEN + encoding.len() + self.data.len());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.step.to_le_bytes());
        out.push(encoding.len() as u8);
        out.extend_from_slice(encoding);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < RAW_HEADER_LEN {
            return Err(FrameError::Truncated { needed: RAW_HEADER_LEN, got: bytes.len() });
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let width = word(0);
        let height = word(4);
        let step = word(8);
        let encoding_len = bytes[12] as usize;
        let data_start = RAW_HEADER_LEN + encoding_len;
        if bytes.len() < data_start {
            return Err(FrameError::Truncated { needed: data_start, got: bytes.len() });
        }
        let encoding = String::from_utf8_lossy(&bytes[RAW_HEADER_LEN..data_start]);
        let format = encoding.parse::<PixelFormat>()?;

        let raw = Self { width, height, step, format, data: bytes[data_start..].to_vec() };
        raw.check()?;
        Ok(raw)
    }

    fn check(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty);
        }
        let too_large = || FrameError::TooLarge { width: self.width, height: self.height };
        let min_step = self.width.checked_mul(self.format.bytes_per_pixel()).ok_or_else(too_large)?;
        if self.step < min_step {
            return Err(FrameError::StepTooSmall { step: self.step, min: min_step });
        }
        // The last row does not need its padding.
        let needed = (self.step as usize)
            .checked_mul(self.height as usize - 1)
            .and_then(|rows| rows.checked_add(min_step as usize))
            .ok_or_else(too_large)?;
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(too_large)?;
        if self.data.len() < needed {
            return Err(FrameError::Truncated { needed, got: self.data.len() });
        }
        Ok(())
    }

    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        self.check()?;
        let bpp = self.format.bytes_per_pixel() as usize;
        let mut pixels = RgbaImage::new(self.width, self.height);
        for (y, row) in pixels.rows_mut().enumerate() {
            let row_start = y * self.step as usize;
            for (x, pixel) in row.enumerate() {
                let at = row_start + x * bpp;
                *pixel = self.format.to_rgba(&self.data[at..at + bpp]);
            }
        }
        Ok(Frame { pixels })
    }
}

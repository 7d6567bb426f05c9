/// Run-length encoded segmentation masks
///
/// Payload: `{"size": [height, width], "counts": [run1, run2, ...], "category_id": 1}`.
/// Counts alternate between 0s and 1s, starting with 0s.
/// IMPORTANT: COCO RLE uses COLUMN-MAJOR (Fortran) order!
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::frame::Frame;
use crate::paint::{category_color, fill_mask, with_alpha};
use crate::plugin::OverlayPlugin;

pub const RLE_MASK_TYPE: &str = "vision/RleMask";

const MASK_ALPHA: u8 = 128;

/// Largest mask accepted, 16384 x 16384.
pub const MAX_MASK_PIXELS: usize = 1 << 28;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RleMaskPayload {
    pub size: Vec<u32>,
    pub counts: Vec<u32>,
    #[serde(default = "default_category")]
    pub category_id: u64,
}

fn default_category() -> u64 {
    1
}

/// A decoded mask in row-major order, one byte per pixel (0 or 1).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMask {
    pub width: usize,
    pub height: usize,
    pub mask: Vec<u8>,
    pub category_id: u64,
}

/// Decode RLE to a row-major binary mask.
/// Fails if `size` is not `[height, width]`, the mask exceeds [`MAX_MASK_PIXELS`] or the
/// runs cover more pixels than the mask. Runs that stop short leave the remaining pixels
/// unset.
pub fn decode_rle(size: &[u32], counts: &[u32]) -> Result<(usize, usize, Vec<u8>), DecodeError> {
    let &[height, width] = size else {
        return Err(DecodeError::Malformed(format!("size must be [height, width], got {} values", size.len())));
    };
    let height = height as usize;
    let width = width as usize;
    let total_pixels = height
        .checked_mul(width)
        .filter(|&pixels| pixels <= MAX_MASK_PIXELS)
        .ok_or_else(|| {
            DecodeError::Malformed(format!("mask of {}x{} exceeds {} pixels", width, height, MAX_MASK_PIXELS))
        })?;

    let covered: u64 = counts.iter().map(|&c| u64::from(c)).sum();
    if covered > total_pixels as u64 {
        return Err(DecodeError::Malformed(format!(
            "counts cover {} pixels but the mask has {}",
            covered, total_pixels
        )));
    }

    let mut mask = vec![0u8; total_pixels];
    let mut position = 0usize;
    let mut value = 0u8; // Start with 0 (background)

    for &count in counts {
        let count = count as usize;
        if value == 1 {
            for p in position..position + count {
                // Column-major position to row-major index
                let row = p % height;
                let col = p / height;
                mask[row * width + col] = 1;
            }
        }
        position += count;
        value = 1 - value;
    }

    Ok((width, height, mask))
}

/// Encode a row-major binary mask as column-major RLE counts, starting with 0s.
pub fn encode_rle(mask: &[u8], width: usize, height: usize) -> Vec<u32> {
    let mut counts = Vec::new();
    let mut value = 0u8;
    let mut run = 0u32;

    for col in 0..width {
        for row in 0..height {
            let pixel = u8::from(mask.get(row * width + col).map_or(false, |&v| v > 0));
            if pixel != value {
                counts.push(run);
                run = 0;
                value = pixel;
            }
            run += 1;
        }
    }
    counts.push(run);
    counts
}

#[derive(Debug, Default)]
pub struct RleMask;

impl OverlayPlugin for RleMask {
    type Annotation = DecodedMask;

    fn payload_type_name(&self) -> &str {
        RLE_MASK_TYPE
    }

    fn decode(&self, raw: &[u8]) -> Result<DecodedMask, DecodeError> {
        let payload: RleMaskPayload = serde_json::from_slice(raw)?;
        let (width, height, mask) = decode_rle(&payload.size, &payload.counts)?;
        Ok(DecodedMask { width, height, mask, category_id: payload.category_id })
    }

    fn draw(&self, canvas: &mut Frame, annotation: &DecodedMask) {
        let color = with_alpha(category_color(annotation.category_id), MASK_ALPHA);
        fill_mask(canvas, &annotation.mask, annotation.width, color);
    }
}

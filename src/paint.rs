/// Drawing primitives used by overlay layers
///
/// All primitives clip against the frame and composite with alpha blending.
use image::Rgba;

use crate::frame::Frame;

/// YOLO-style palette, indexed by category id.
const CATEGORY_PALETTE: [[f32; 3]; 80] = [
    [0.000, 0.447, 0.741], [0.850, 0.325, 0.098], [0.929, 0.694, 0.125],
    [0.494, 0.184, 0.556], [0.466, 0.674, 0.188], [0.301, 0.745, 0.933],
    [0.635, 0.078, 0.184], [0.300, 0.300, 0.300], [0.600, 0.600, 0.600],
    [1.000, 0.000, 0.000], [1.000, 0.500, 0.000], [0.749, 0.749, 0.000],
    [0.000, 1.000, 0.000], [0.000, 0.000, 1.000], [0.667, 0.000, 1.000],
    [0.333, 0.333, 0.000], [0.333, 0.667, 0.000], [0.333, 1.000, 0.000],
    [0.667, 0.333, 0.000], [0.667, 0.667, 0.000], [0.667, 1.000, 0.000],
    [1.000, 0.333, 0.000], [1.000, 0.667, 0.000], [1.000, 1.000, 0.000],
    [0.000, 0.333, 0.500], [0.000, 0.667, 0.500], [0.000, 1.000, 0.500],
    [0.333, 0.000, 0.500], [0.333, 0.333, 0.500], [0.333, 0.667, 0.500],
    [0.333, 1.000, 0.500], [0.667, 0.000, 0.500], [0.667, 0.333, 0.500],
    [0.667, 0.667, 0.500], [0.667, 1.000, 0.500], [1.000, 0.000, 0.500],
    [1.000, 0.333, 0.500], [1.000, 0.667, 0.500], [1.000, 1.000, 0.500],
    [0.000, 0.333, 1.000], [0.000, 0.667, 1.000], [0.000, 1.000, 1.000],
    [0.333, 0.000, 1.000], [0.333, 0.333, 1.000], [0.333, 0.667, 1.000],
    [0.333, 1.000, 1.000], [0.667, 0.000, 1.000], [0.667, 0.333, 1.000],
    [0.667, 0.667, 1.000], [0.667, 1.000, 1.000], [1.000, 0.000, 1.000],
    [1.000, 0.333, 1.000], [1.000, 0.667, 1.000], [0.333, 0.000, 0.000],
    [0.500, 0.000, 0.000], [0.667, 0.000, 0.000], [0.833, 0.000, 0.000],
    [1.000, 0.000, 0.000], [0.000, 0.167, 0.000], [0.000, 0.333, 0.000],
    [0.000, 0.500, 0.000], [0.000, 0.667, 0.000], [0.000, 0.833, 0.000],
    [0.000, 1.000, 0.000], [0.000, 0.000, 0.167], [0.000, 0.000, 0.333],
    [0.000, 0.000, 0.500], [0.000, 0.000, 0.667], [0.000, 0.000, 0.833],
    [0.000, 0.000, 1.000], [0.000, 0.000, 0.000], [0.143, 0.143, 0.143],
    [0.286, 0.286, 0.286], [0.429, 0.429, 0.429], [0.571, 0.571, 0.571],
    [0.714, 0.714, 0.714], [0.857, 0.857, 0.857], [0.000, 0.447, 0.741],
    [0.314, 0.717, 0.741], [0.500, 0.500, 0.000],
];

/// Opaque colour for a category id. Ids start at 1; 0 shares the colour of the last entry.
pub fn category_color(category_id: u64) -> Rgba<u8> {
    let len = CATEGORY_PALETTE.len() as u64;
    let idx = ((category_id % len + len - 1) % len) as usize;
    let [r, g, b] = CATEGORY_PALETTE[idx];
    Rgba([(r * 255.0).round() as u8, (g * 255.0).round() as u8, (b * 255.0).round() as u8, 255])
}

pub fn with_alpha(color: Rgba<u8>, alpha: u8) -> Rgba<u8> {
    Rgba([color[0], color[1], color[2], alpha])
}

fn blend_signed(frame: &mut Frame, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && x <= u32::MAX as i64 && y <= u32::MAX as i64 {
        frame.blend_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham line between two points (inclusive).
pub fn draw_line(frame: &mut Frame, from: (f32, f32), to: (f32, f32), color: Rgba<u8>) {
    let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
    let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);

    // Keep runaway coordinates from looping forever.
    let limit = 4 * (frame.width().max(frame.height()) as i64 + 1);
    let clamp = |v: i64| v.clamp(-limit, limit);
    let (x1, y1) = (clamp(x1), clamp(y1));
    x0 = clamp(x0);
    y0 = clamp(y0);

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        blend_signed(frame, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Rectangle outline. `x, y` is the top-left corner; the stroke grows inwards.
pub fn stroke_rect(frame: &mut Frame, x: f32, y: f32, width: f32, height: f32, thickness: u32, color: Rgba<u8>) {
    if width <= 0.0 || height <= 0.0 {
        return;
    }
    let left = x.round() as i64;
    let top = y.round() as i64;
    let right = (x + width).round() as i64 - 1;
    let bottom = (y + height).round() as i64 - 1;
    let frame_w = frame.width() as i64;
    let frame_h = frame.height() as i64;

    for py in top.max(0)..=bottom.min(frame_h - 1) {
        for px in left.max(0)..=right.min(frame_w - 1) {
            let edge = (px - left).min(right - px).min(py - top).min(bottom - py);
            if edge < thickness as i64 {
                frame.blend_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// Blend `color` over every pixel whose mask value is non-zero. The mask is row-major
/// with the given width and is anchored at the frame origin.
pub fn fill_mask(frame: &mut Frame, mask: &[u8], mask_width: usize, color: Rgba<u8>) {
    if mask_width == 0 {
        return;
    }
    for (row, values) in mask.chunks(mask_width).enumerate() {
        if row >= frame.height() as usize {
            break;
        }
        for (col, &value) in values.iter().enumerate() {
            if value > 0 {
                frame.blend_pixel(col as u32, row as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn lit(frame: &Frame) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                if frame.pixel(x, y) != Some(BLACK) {
                    out.push((x, y));
                }
            }
        }
        out
    }

    #[test]
    fn test_category_color_wraps() {
        assert_eq!(category_color(1), Rgba([0, 114, 189, 255]));
        assert_eq!(category_color(1), category_color(81));
        assert_eq!(category_color(0), category_color(80));
    }

    #[test]
    fn test_draw_line_diagonal_and_clipped() {
        let mut frame = Frame::filled(4, 4, BLACK);
        draw_line(&mut frame, (0.0, 0.0), (3.0, 3.0), RED);
        assert_eq!(lit(&frame), vec![(0, 0), (1, 1), (2, 2), (3, 3)]);

        let mut frame = Frame::filled(4, 4, BLACK);
        draw_line(&mut frame, (-10.0, 1.0), (100.0, 1.0), RED);
        assert_eq!(lit(&frame), vec![(0, 1), (1, 1), (2, 1), (3, 1)]);
    }

    #[test]
    fn test_stroke_rect_outline() {
        let mut frame = Frame::filled(5, 5, BLACK);
        stroke_rect(&mut frame, 1.0, 1.0, 3.0, 3.0, 1, RED);
        let lit = lit(&frame);
        assert_eq!(lit.len(), 8);
        assert!(!lit.contains(&(2, 2)));
        assert!(lit.contains(&(1, 1)) && lit.contains(&(3, 3)));
    }

    #[test]
    fn test_fill_mask_clips_to_frame() {
        let mut frame = Frame::filled(2, 2, BLACK);
        // 3x3 mask, only the corners set
        let mask = [1, 0, 1, 0, 0, 0, 1, 0, 1];
        fill_mask(&mut frame, &mask, 3, RED);
        assert_eq!(lit(&frame), vec![(0, 0)]);
    }
}

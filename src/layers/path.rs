/// Polylines such as planned paths or tracked trajectories
///
/// Payload: `{"points": [[x, y], ...], "closed": false, "color": [r, g, b, a]}`.
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::frame::Frame;
use crate::paint::draw_line;
use crate::plugin::OverlayPlugin;

pub const PATH_TYPE: &str = "nav/Path";

pub const DEFAULT_PATH_COLOR: [u8; 4] = [0, 255, 0, 255];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PathPayload {
    pub points: Vec<[f32; 2]>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 4]>,
}

impl PathPayload {
    pub fn color(&self) -> Rgba<u8> {
        Rgba(self.color.unwrap_or(DEFAULT_PATH_COLOR))
    }
}

#[derive(Debug, Default)]
pub struct Polyline;

impl OverlayPlugin for Polyline {
    type Annotation = PathPayload;

    fn payload_type_name(&self) -> &str {
        PATH_TYPE
    }

    fn decode(&self, raw: &[u8]) -> Result<PathPayload, DecodeError> {
        let path: PathPayload = serde_json::from_slice(raw)?;
        if let Some(i) = path.points.iter().position(|[x, y]| !x.is_finite() || !y.is_finite()) {
            return Err(DecodeError::Malformed(format!("point {} is not finite", i)));
        }
        Ok(path)
    }

    fn draw(&self, canvas: &mut Frame, annotation: &PathPayload) {
        let color = annotation.color();
        let points: Vec<(f32, f32)> = annotation.points.iter().map(|&[x, y]| (x, y)).collect();

        match points.as_slice() {
            [] => {}
            [only] => draw_line(canvas, *only, *only, color),
            _ => {
                for segment in points.windows(2) {
                    draw_line(canvas, segment[0], segment[1], color);
                }
                if annotation.closed && points.len() > 2 {
                    if let (Some(&last), Some(&first)) = (points.last(), points.first()) {
                        draw_line(canvas, last, first, color);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn lit(frame: &Frame) -> usize {
        frame.as_image().pixels().filter(|p| **p != BLACK).count()
    }

    #[test]
    fn test_decode() {
        let path = Polyline.decode(br#"{"points":[[0,0],[3,0]]}"#).unwrap();
        assert!(!path.closed);
        assert_eq!(path.color(), GREEN);

        let path = Polyline.decode(br#"{"points":[],"closed":true,"color":[1,2,3,4]}"#).unwrap();
        assert_eq!(path.color(), Rgba([1, 2, 3, 4]));

        assert!(matches!(Polyline.decode(br#"{"points":[[0]]}"#), Err(DecodeError::Json(_))));
        assert!(Polyline.decode(br#"{"points":[[0,0]],"color":[300,0,0,0]}"#).is_err());
    }

    #[test]
    fn test_open_and_closed_paths() {
        let mut open = Frame::filled(4, 4, BLACK);
        let mut path = PathPayload { points: vec![[0.0, 0.0], [3.0, 0.0], [3.0, 3.0]], closed: false, color: None };
        Polyline.draw(&mut open, &path);
        // Two segments of four pixels sharing a corner.
        assert_eq!(lit(&open), 7);
        assert_eq!(open.pixel(0, 3), Some(BLACK));

        let mut closed = Frame::filled(4, 4, BLACK);
        path.closed = true;
        Polyline.draw(&mut closed, &path);
        assert_eq!(closed.pixel(1, 1), Some(GREEN));
        assert_eq!(closed.pixel(2, 2), Some(GREEN));
        assert_eq!(lit(&closed), 9);
    }

    #[test]
    fn test_single_point_and_empty() {
        let mut frame = Frame::filled(3, 3, BLACK);
        Polyline.draw(&mut frame, &PathPayload { points: vec![], closed: true, color: None });
        assert_eq!(lit(&frame), 0);
        Polyline.draw(&mut frame, &PathPayload { points: vec![[1.0, 1.0]], closed: false, color: None });
        assert_eq!(frame.pixel(1, 1), Some(GREEN));
        assert_eq!(lit(&frame), 1);
    }
}

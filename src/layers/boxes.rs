/// Detection bounding boxes
///
/// Payload: `{"detections": [{"bbox": [x, y, w, h], "category_id": 3, "score": 0.9}]}`,
/// COCO-style boxes in pixel coordinates with the origin at the top-left corner.
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::frame::Frame;
use crate::paint::{category_color, stroke_rect};
use crate::plugin::OverlayPlugin;

pub const DETECTIONS_TYPE: &str = "vision/Detections";

const BOX_THICKNESS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub bbox: Vec<f32>,
    pub category_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Detection {
    pub fn new(bbox: [f32; 4], category_id: u64) -> Self {
        Self { bbox: bbox.to_vec(), category_id, score: None }
    }

    pub fn color(&self) -> Rgba<u8> {
        category_color(self.category_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Detections {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Default)]
pub struct DetectionBoxes;

impl OverlayPlugin for DetectionBoxes {
    type Annotation = Detections;

    fn payload_type_name(&self) -> &str {
        DETECTIONS_TYPE
    }

    fn decode(&self, raw: &[u8]) -> Result<Detections, DecodeError> {
        let parsed: Detections = serde_json::from_slice(raw)?;
        for (i, detection) in parsed.detections.iter().enumerate() {
            if detection.bbox.len() != 4 {
                return Err(DecodeError::Malformed(format!(
                    "detection {} has {} bbox values, expected 4",
                    i,
                    detection.bbox.len()
                )));
            }
            if detection.bbox.iter().any(|v| !v.is_finite()) {
                return Err(DecodeError::Malformed(format!("detection {} has a non-finite bbox", i)));
            }
        }
        Ok(parsed)
    }

    fn draw(&self, canvas: &mut Frame, annotation: &Detections) {
        for detection in &annotation.detections {
            if let [x, y, w, h] = detection.bbox[..] {
                stroke_rect(canvas, x, y, w, h, BOX_THICKNESS, detection.color());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn test_decode() {
        let plugin = DetectionBoxes;
        let parsed = plugin
            .decode(br#"{"detections":[{"bbox":[1,2,3,4],"category_id":7,"score":0.5}]}"#)
            .unwrap();
        assert_eq!(parsed.detections.len(), 1);
        assert_eq!(parsed.detections[0].bbox, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(parsed.detections[0].score, Some(0.5));

        assert!(plugin.decode(br#"{}"#).unwrap().detections.is_empty());
        assert!(matches!(
            plugin.decode(br#"{"detections":[{"bbox":[1,2,3],"category_id":1}]}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(plugin.decode(b"not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_draw_outline() {
        let mut frame = Frame::filled(10, 10, BLACK);
        let detections = Detections { detections: vec![Detection::new([2.0, 2.0, 6.0, 6.0], 1)] };
        DetectionBoxes.draw(&mut frame, &detections);

        let color = category_color(1);
        assert_eq!(frame.pixel(2, 2), Some(color));
        assert_eq!(frame.pixel(3, 3), Some(color));
        assert_eq!(frame.pixel(7, 7), Some(color));
        // Inside the two-pixel stroke and outside the box stay untouched.
        assert_eq!(frame.pixel(4, 4), Some(BLACK));
        assert_eq!(frame.pixel(1, 1), Some(BLACK));
        assert_eq!(frame.pixel(8, 8), Some(BLACK));
    }

    #[test]
    fn test_serialized_payload_round_trips_through_decode() {
        let payload = serde_json::to_vec(&Detections {
            detections: vec![Detection::new([0.0, 0.0, 4.0, 4.0], 2)],
        })
        .unwrap();
        let decoded = DetectionBoxes.decode(&payload).unwrap();
        assert_eq!(decoded.detections[0].category_id, 2);
    }
}

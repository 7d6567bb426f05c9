//! Built-in overlay plugins.
//!
//! All of them take JSON payloads and register under an `overlay_compositor/` class name.

pub mod boxes;
pub mod mask;
pub mod path;

pub use boxes::{Detection, DetectionBoxes, Detections, DETECTIONS_TYPE};
pub use mask::{decode_rle, encode_rle, DecodedMask, RleMask, RleMaskPayload, RLE_MASK_TYPE};
pub use path::{PathPayload, Polyline, PATH_TYPE};

use crate::plugin::PluginCatalog;

pub const DETECTION_BOXES_CLASS: &str = "overlay_compositor/DetectionBoxes";
pub const RLE_MASK_CLASS: &str = "overlay_compositor/RleMask";
pub const POLYLINE_CLASS: &str = "overlay_compositor/Polyline";

/// A catalog with every built-in plugin registered.
pub fn builtin_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    catalog
        .register::<DetectionBoxes>(DETECTION_BOXES_CLASS)
        .register::<RleMask>(RLE_MASK_CLASS)
        .register::<Polyline>(POLYLINE_CLASS);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginLoader;

    #[test]
    fn test_builtin_catalog() {
        let catalog = builtin_catalog();
        assert_eq!(
            catalog.available_classes(),
            vec![DETECTION_BOXES_CLASS, POLYLINE_CLASS, RLE_MASK_CLASS]
        );
        let types: Vec<String> = catalog
            .available_classes()
            .iter()
            .map(|class| catalog.instantiate(class).unwrap().type_name().to_string())
            .collect();
        assert_eq!(types, vec![DETECTIONS_TYPE, PATH_TYPE, RLE_MASK_TYPE]);
    }
}

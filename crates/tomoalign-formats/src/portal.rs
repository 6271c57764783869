//! cryoET Data Portal alignment JSON.
//!
//! The schema belongs to the portal; the structs here mirror the fields
//! tomoalign reads and writes. Fields added by newer portal versions are
//! ignored on read.
//! Lengths (`x_offset`, `y_offset`, `volume_offset`, `volume_dimension`) are
//! in Ångström.

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// An `{x, y, z}` triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Alignment parameters of one tilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionParameters {
    /// Index of the section in the raw tilt series.
    pub z_index: usize,
    pub tilt_angle: f64,
    pub volume_x_rotation: f64,
    /// Row-major 2x2 matrix.
    pub in_plane_rotation: [[f64; 2]; 2],
    pub x_offset: f64,
    pub y_offset: f64,
}

/// A portal alignment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalAlignment {
    pub affine_transformation_matrix: [[f64; 4]; 4],
    pub alignment_type: String,
    pub format: String,
    pub is_canonical: bool,
    pub tilt_offset: f64,
    pub volume_offset: Xyz,
    pub x_rotation_offset: f64,
    pub per_section_alignment_parameters: Vec<SectionParameters>,
    pub volume_dimension: Xyz,
}

impl PortalAlignment {
    /// 4x4 identity, the only volume transform emitted by tomoalign.
    pub const IDENTITY_4X4: [[f64; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    /// Number of sections, counting the excluded ones below the highest
    /// listed `z_index`.
    pub fn number_of_tilts(&self) -> usize {
        self.per_section_alignment_parameters
            .iter()
            .map(|s| s.z_index.saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "affine_transformation_matrix": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
        "alignment_type": "GLOBAL",
        "format": "ARETOMO3",
        "is_canonical": true,
        "tilt_offset": 0.0,
        "volume_offset": {"x": 0, "y": 0, "z": 0},
        "x_rotation_offset": 0.0,
        "per_section_alignment_parameters": [
            {"z_index": 2, "tilt_angle": -61.5, "volume_x_rotation": 0.0,
             "in_plane_rotation": [[0.9757, 0.2191], [-0.2191, 0.9757]],
             "x_offset": 24.786, "y_offset": -2.677},
            {"z_index": 3, "tilt_angle": -60.0, "volume_x_rotation": 0.0,
             "in_plane_rotation": [[0.9757, 0.2191], [-0.2191, 0.9757]],
             "x_offset": 34.451, "y_offset": -8.599}
        ],
        "volume_dimension": {"x": 4000.0, "y": 4000.0, "z": 1200.0}
    }"#;

    #[test]
    fn test_parse_portal_json() {
        let a = PortalAlignment::from_json(SAMPLE).unwrap();
        assert_eq!(a.format, "ARETOMO3");
        assert_eq!(a.per_section_alignment_parameters.len(), 2);
        assert_eq!(a.per_section_alignment_parameters[1].z_index, 3);
        assert_eq!(a.number_of_tilts(), 4);
        assert_eq!(a.affine_transformation_matrix, PortalAlignment::IDENTITY_4X4);
    }

    #[test]
    fn test_json_round_trip() {
        let a = PortalAlignment::from_json(SAMPLE).unwrap();
        let back = PortalAlignment::from_json(&a.to_json().unwrap()).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let text = SAMPLE.replace("\"tilt_offset\": 0.0,", "");
        let err = PortalAlignment::from_json(&text).unwrap_err();
        assert!(err.to_string().contains("tilt_offset"), "{}", err);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let text = SAMPLE.replace("\"is_canonical\": true,", "\"is_canonical\": true, \"id\": 17,");
        assert!(PortalAlignment::from_json(&text).is_ok());
    }

    #[test]
    fn test_count_saturates_on_extreme_z_index() {
        let mut a = PortalAlignment::from_json(SAMPLE).unwrap();
        a.per_section_alignment_parameters[0].z_index = usize::MAX;
        assert_eq!(a.number_of_tilts(), usize::MAX);
    }
}

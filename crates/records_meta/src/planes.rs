//! Multiplane SLM plane tables.
//!
//! The SLM control software exports one record per imaging plane:
//!
//! ```json
//! {
//!   "scan_data": {
//!     "num_planes": 2,
//!     "planes": [
//!       { "idx": 0, "pattern": "spiral", "x": 0.0, "y": 0.0, "z": -20.0,
//!         "i_targ": 1.0, "i_est": 0.97, "w_est": 0.5 },
//!       ...
//!     ]
//!   }
//! }
//! ```
//!
//! `num_planes` is optional. When present it must be a non-negative integer
//! equal to the number of plane records.

use std::path::Path;

use serde_json::Value;

use crate::error::{MetaError, MetaResult};
use crate::parser::MetadataParser;
use crate::record::{parse_count, RecordSet, UnitRecord};

/// Format identifier for SLM plane tables.
pub const SLM_PLANES_FORMAT: &str = "slm-planes";

/// Fields every plane record must carry, in display order.
pub const PLANE_FIELDS: [&str; 8] = ["idx", "pattern", "x", "y", "z", "i_targ", "i_est", "w_est"];

/// Parser for multiplane SLM metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlmPlaneParser;

impl MetadataParser for SlmPlaneParser {
    fn format(&self) -> &str {
        SLM_PLANES_FORMAT
    }

    fn parse_str(&self, path: &Path, content: &str) -> MetaResult<RecordSet> {
        let root: Value = serde_json::from_str(content).map_err(|e| MetaError::Malformed {
            format: SLM_PLANES_FORMAT.to_string(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let missing = |field: &str| MetaError::MissingField {
            path: path.to_path_buf(),
            field: field.to_string(),
        };

        let scan = root.get("scan_data").ok_or_else(|| missing("scan_data"))?;
        let planes = scan
            .get("planes")
            .ok_or_else(|| missing("scan_data.planes"))?
            .as_array()
            .ok_or_else(|| MetaError::InvalidValue {
                path: path.to_path_buf(),
                field: "scan_data.planes".to_string(),
                message: "expected an array of plane records".to_string(),
            })?;

        let mut record = RecordSet::new(path, SLM_PLANES_FORMAT);

        if let Some(declared) = scan.get("num_planes") {
            let declared = parse_count(path, &scalar(declared))?;
            if declared != planes.len() {
                return Err(MetaError::InvalidValue {
                    path: path.to_path_buf(),
                    field: "scan_data.num_planes".to_string(),
                    message: format!(
                        "declares {} planes but {} plane records are present",
                        declared,
                        planes.len()
                    ),
                });
            }
        }

        for (index, plane) in planes.iter().enumerate() {
            let mut unit = UnitRecord::new();
            for field in PLANE_FIELDS {
                let value = plane
                    .get(field)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| missing(&format!("scan_data.planes[{}].{}", index, field)))?;
                unit.insert(field.to_string(), scalar(value));
            }
            record.units.push(unit);
        }

        record.insert("planes", record.units.len().to_string());
        Ok(record)
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(idx: usize) -> String {
        format!(
            r#"{{"idx": {idx}, "pattern": "spiral", "x": 1.5, "y": -2.0, "z": {z}, "i_targ": 1.0, "i_est": 0.98, "w_est": 0.25}}"#,
            idx = idx,
            z = idx * 10
        )
    }

    fn document(count: usize) -> String {
        let planes: Vec<String> = (0..count).map(plane).collect();
        format!(
            r#"{{"scan_data": {{"num_planes": {}, "planes": [{}]}}}}"#,
            count,
            planes.join(",")
        )
    }

    fn parse(content: &str) -> MetaResult<RecordSet> {
        SlmPlaneParser.parse_str(Path::new("slm.json"), content)
    }

    #[test]
    fn test_plane_counts() {
        for count in [0, 1, 5] {
            let record = parse(&document(count)).unwrap();
            assert_eq!(record.unit_count(), count);
            assert_eq!(record.count("planes").unwrap(), count);
        }
    }

    #[test]
    fn test_plane_values() {
        let record = parse(&document(2)).unwrap();
        assert_eq!(record.unit_field(1, "idx").unwrap(), "1");
        assert_eq!(record.unit_field(1, "pattern").unwrap(), "spiral");
        assert_eq!(record.unit_field(1, "z").unwrap(), "10");
    }

    #[test]
    fn test_missing_plane_field() {
        let content = r#"{"scan_data": {"planes": [{"idx": 0, "pattern": "p", "x": 0, "y": 0, "z": 0, "i_targ": 1, "i_est": 1}]}}"#;
        match parse(content) {
            Err(MetaError::MissingField { field, .. }) => {
                assert_eq!(field, "scan_data.planes[0].w_est")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_negative_plane_count() {
        let content = r#"{"scan_data": {"num_planes": -2, "planes": []}}"#;
        assert!(matches!(parse(content), Err(MetaError::InvalidCount { .. })));
    }

    #[test]
    fn test_fractional_plane_count() {
        let content = r#"{"scan_data": {"num_planes": 1.5, "planes": []}}"#;
        assert!(matches!(parse(content), Err(MetaError::InvalidCount { .. })));
    }

    #[test]
    fn test_count_mismatch() {
        let content = format!(r#"{{"scan_data": {{"num_planes": 3, "planes": [{}]}}}}"#, plane(0));
        assert!(matches!(parse(&content), Err(MetaError::InvalidValue { .. })));
    }
}

//! Structured output shared by all metadata parsers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{MetaError, MetaResult};

/// A single per-unit parameter record (for example, one imaging plane).
pub type UnitRecord = BTreeMap<String, String>;

/// Parsed metadata: scalar fields plus an ordered list of unit records.
///
/// Values are kept as the strings found in the source file. Typed access
/// goes through [`RecordSet::number`] and [`RecordSet::count`], which report
/// the offending field on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSet {
    /// File the record set was parsed from.
    pub source: PathBuf,
    /// Parser format that produced it.
    pub format: String,
    /// Scalar and positional fields, keyed by snake_case name.
    pub fields: BTreeMap<String, String>,
    /// Per-unit records in file order.
    pub units: Vec<UnitRecord>,
}

impl RecordSet {
    pub fn new(source: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: format.into(),
            fields: BTreeMap::new(),
            units: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Get a required field.
    pub fn text(&self, name: &str) -> MetaResult<&str> {
        self.get(name).ok_or_else(|| MetaError::MissingField {
            path: self.source.clone(),
            field: name.to_string(),
        })
    }

    /// Get a required numeric field.
    pub fn number(&self, name: &str) -> MetaResult<f64> {
        let raw = self.text(name)?;
        parse_number(&self.source, name, raw)
    }

    /// Get an optional numeric field. Present but unparseable values are errors.
    pub fn optional_number(&self, name: &str) -> MetaResult<Option<f64>> {
        self.get(name)
            .map(|raw| parse_number(&self.source, name, raw))
            .transpose()
    }

    /// Get a required unit count. Negative and fractional values are rejected.
    pub fn count(&self, name: &str) -> MetaResult<usize> {
        let raw = self.text(name)?;
        parse_count(&self.source, raw)
    }

    /// Number of per-unit records.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Get a required field from a unit record.
    pub fn unit_field(&self, unit: usize, name: &str) -> MetaResult<&str> {
        self.units
            .get(unit)
            .and_then(|record| record.get(name))
            .map(String::as_str)
            .ok_or_else(|| MetaError::MissingField {
                path: self.source.clone(),
                field: format!("units[{}].{}", unit, name),
            })
    }
}

fn parse_number(path: &Path, field: &str, raw: &str) -> MetaResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| MetaError::InvalidValue {
            path: path.to_path_buf(),
            field: field.to_string(),
            message: format!("'{}' is not a number ({})", raw, e),
        })
}

/// Parse a unit count, accepting only non-negative integers.
pub(crate) fn parse_count(path: &Path, raw: &str) -> MetaResult<usize> {
    raw.trim().parse::<usize>().map_err(|_| MetaError::InvalidCount {
        path: path.to_path_buf(),
        value: raw.to_string(),
    })
}

/// Convert an instrument key or description into a snake_case field name.
///
/// `objectiveLensNA` becomes `objective_lens_na`, `XAxis` becomes `x_axis`
/// and `PMT 2 Green` becomes `pmt_2_green`.
pub fn field_name(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut result = String::with_capacity(raw.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                result.push('_');
            }
        }
        if c.is_alphanumeric() {
            result.extend(c.to_lowercase());
        } else {
            result.push('_');
        }
    }

    result
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

//! Record tables filled from the subject context.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::error::{RecordsError, RecordsResult};

/// A markdown table: column schema plus ordered rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableModel {
    pub key: String,
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableModel {
    pub fn new(key: impl Into<String>, title: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// A two-column `Field | Value` table.
    pub fn fields(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(key, title, vec!["Field".to_string(), "Value".to_string()])
    }

    pub fn push_field(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.rows.push(vec![label.into(), value.into()]);
    }

    /// Look up a field value in a `Field | Value` table.
    pub fn field(&self, label: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|row| row.first().map(String::as_str) == Some(label))
            .and_then(|row| row.get(1))
            .map(String::as_str)
    }

    /// Serialize to a markdown table. Short rows are padded, pipes escaped.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&markdown_row(self.columns.iter().map(String::as_str)));
        out.push_str(&markdown_row(self.columns.iter().map(|_| "---")));
        for row in &self.rows {
            let cells = (0..self.columns.len().max(row.len()))
                .map(|i| row.get(i).map(String::as_str).unwrap_or(""));
            out.push_str(&markdown_row(cells));
        }
        out
    }
}

fn markdown_row<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let cells: Vec<String> = cells.map(escape_cell).collect();
    format!("| {} |\n", cells.join(" | "))
}

/// Escape a cell so it cannot break the row layout.
pub fn escape_cell(cell: &str) -> String {
    cell.replace('\r', "")
        .replace('|', "\\|")
        .replace('\n', "<br>")
}

/// Context available to table builders.
#[derive(Debug, Clone)]
pub struct TableContext<'a> {
    pub subject: &'a str,
    pub now: NaiveDateTime,
    /// Configured values for this table, keyed by field name
    pub overrides: Option<&'a HashMap<String, String>>,
}

impl<'a> TableContext<'a> {
    pub fn new(subject: &'a str) -> Self {
        Self {
            subject,
            now: Local::now().naive_local(),
            overrides: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Option<&'a HashMap<String, String>>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }
}

/// Builds a table from the subject context.
pub trait TableBuilder: Send + Sync {
    fn title(&self) -> &str;

    fn build(&self, key: &str, context: &TableContext<'_>) -> RecordsResult<TableModel>;
}

/// Where a field's value comes from when nothing is configured.
#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    Subject,
    Today,
    Now,
    Text(&'static str),
}

type Normalizer = fn(&str) -> Result<String, String>;

#[derive(Clone)]
struct FieldSpec {
    name: &'static str,
    label: &'static str,
    default: FieldDefault,
    normalize: Option<Normalizer>,
}

/// A `Field | Value` table declared as a list of fields with defaults.
#[derive(Clone)]
pub struct FieldTable {
    title: String,
    fields: Vec<FieldSpec>,
}

impl FieldTable {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &'static str, label: &'static str, default: FieldDefault) -> Self {
        self.fields.push(FieldSpec {
            name,
            label,
            default,
            normalize: None,
        });
        self
    }

    /// Attach a normalizer to the most recently declared field.
    pub fn normalized(mut self, normalize: Normalizer) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.normalize = Some(normalize);
        }
        self
    }
}

impl TableBuilder for FieldTable {
    fn title(&self) -> &str {
        &self.title
    }

    fn build(&self, key: &str, context: &TableContext<'_>) -> RecordsResult<TableModel> {
        if let Some(overrides) = context.overrides {
            for name in overrides.keys() {
                if !self.fields.iter().any(|f| f.name == name.as_str()) {
                    return Err(RecordsError::Config(format!(
                        "table '{}' has no field '{}'",
                        key, name
                    )));
                }
            }
        }

        let mut table = TableModel::fields(key, &self.title);
        for field in &self.fields {
            let configured = context.overrides.and_then(|o| o.get(field.name)).cloned();
            let value = configured.unwrap_or_else(|| match field.default {
                FieldDefault::Subject => context.subject.to_string(),
                FieldDefault::Today => context.now.format("%Y-%m-%d").to_string(),
                FieldDefault::Now => context.now.format("%H:%M").to_string(),
                FieldDefault::Text(text) => text.to_string(),
            });
            let value = match field.normalize {
                Some(normalize) => normalize(&value).map_err(|message| {
                    RecordsError::Config(format!("{}.{}: {}", key, field.name, message))
                })?,
                None => value,
            };
            table.push_field(field.label, value);
        }
        Ok(table)
    }
}

/// Cage numbers are six digits, zero padded.
fn normalize_cage(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("cage number must be numeric, got '{}'", value));
    }
    Ok(format!("{:0>6}", value))
}

/// Registry of table builders keyed by table key.
#[derive(Default, Clone)]
pub struct TableRegistry {
    tables: HashMap<String, Arc<dyn TableBuilder>>,
}

impl TableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Registry with the standard lab tables.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (key, table) in default_tables() {
            registry.register(key, Arc::new(table));
        }
        registry
    }

    /// Register a builder. An existing entry with the same key is replaced.
    pub fn register(&mut self, key: impl Into<String>, builder: Arc<dyn TableBuilder>) {
        let key = key.into();
        debug!("Registering table: {}", key);
        self.tables.insert(key, builder);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn TableBuilder>> {
        self.tables.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Build a registered table.
    pub fn build(&self, key: &str, context: &TableContext<'_>) -> RecordsResult<TableModel> {
        let builder = self.get(key).ok_or_else(|| {
            RecordsError::Registry(format!("no table registered for key '{}'", key))
        })?;
        builder.build(key, context)
    }
}

impl std::fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRegistry")
            .field("tables", &self.keys())
            .finish()
    }
}

fn default_tables() -> Vec<(&'static str, FieldTable)> {
    use FieldDefault::{Now, Subject, Text, Today};

    vec![
        (
            "mouse-information",
            FieldTable::new("Mouse Information")
                .field("subject", "Subject", Subject)
                .field("cage", "Cage", Text("000000"))
                .normalized(normalize_cage)
                .field("dob", "DOB", Today)
                .field("gender", "Gender", Text("Female"))
                .field("headplate_id", "Headplate ID", Text("Plain"))
                .field("condition", "Condition", Text("N/A"))
                .field("physical_id", "Physical ID", Text("N/A"))
                .field("genotype", "Genotype", Text("Wildtype"))
                .field("transnetyx", "Transnetyx", Text("N/A")),
        ),
        (
            "head-fixation",
            FieldTable::new("Head-Fixation")
                .field("subject", "Subject", Subject)
                .field("procedure_date", "Procedure Date", Today)
                .field("procedure_time", "Procedure Time", Now)
                .field("headplate_id", "Headplate ID", Text("N/A"))
                .field(
                    "cement_formulation",
                    "Cement Formulation",
                    Text("2 Scoops Powder, 4 Drops Liquid, 1 Drop Catalyst"),
                )
                .field("silicone_cover", "Silicone Cover", Text("No")),
        ),
        (
            "cranial-window",
            FieldTable::new("Cranial Window")
                .field("subject", "Subject", Subject)
                .field("procedure_date", "Procedure Date", Today)
                .field("procedure_time", "Procedure Time", Now)
                .field("headplate_id", "Headplate ID", Text("N/A"))
                .field("window_size", "Window Size", Text("2mm x 1.6mm"))
                .field(
                    "window_location",
                    "Window Location",
                    Text("-2.75 mm AP, -1.75 mm ML"),
                )
                .field("window_quality", "Window Quality", Text("Average"))
                .field("reused_window", "Reused Window", Text("No"))
                .field(
                    "window_adhesion",
                    "Window Adhesion",
                    Text("Kwik-Sil Barrier & Cement"),
                ),
        ),
        (
            "tamoxifen-injection",
            FieldTable::new("Tamoxifen Injection")
                .field("subject", "Subject", Subject)
                .field("date", "Date", Today)
                .field("time", "Time", Now)
                .field("concentration", "Concentration (mg/mL)", Text("10.0"))
                .field("dose", "Dose (mg/kg)", Text("100.0"))
                .field("weight", "Weight (g)", Text("30.0"))
                .field("volume", "Volume (mL)", Text("0.30")),
        ),
        (
            "imaging-session",
            FieldTable::new("Imaging Session")
                .field("subject", "Subject", Subject)
                .field("date", "Date", Today)
                .field("time", "Time", Now)
                .field("relative_humidity", "Relative Humidity (%)", Text("5.0"))
                .field("imaging_wavelength", "Imaging Wavelength", Text("920 nm"))
                .field("stimulation_wavelength", "Stimulation Wavelength", Text("None"))
                .field("slm", "SLM", Text("Yes")),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn context(subject: &str) -> TableContext<'_> {
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        TableContext::new(subject).at(now)
    }

    #[test]
    fn test_defaults_use_subject_and_date() {
        let registry = TableRegistry::with_defaults();
        let table = registry.build("head-fixation", &context("EX042")).unwrap();

        assert_eq!(table.title, "Head-Fixation");
        assert_eq!(table.field("Subject"), Some("EX042"));
        assert_eq!(table.field("Procedure Date"), Some("2024-03-01"));
        assert_eq!(table.field("Procedure Time"), Some("09:30"));
    }

    #[test]
    fn test_overrides_and_cage_padding() {
        let registry = TableRegistry::with_defaults();
        let overrides = HashMap::from([("cage".to_string(), "1234".to_string())]);
        let table = registry
            .build(
                "mouse-information",
                &context("EX042").with_overrides(Some(&overrides)),
            )
            .unwrap();
        assert_eq!(table.field("Cage"), Some("001234"));
    }

    #[test]
    fn test_invalid_overrides() {
        let registry = TableRegistry::with_defaults();

        let bad_cage = HashMap::from([("cage".to_string(), "12a".to_string())]);
        assert!(matches!(
            registry.build("mouse-information", &context("E1").with_overrides(Some(&bad_cage))),
            Err(RecordsError::Config(_))
        ));

        let unknown = HashMap::from([("colour".to_string(), "blue".to_string())]);
        assert!(matches!(
            registry.build("mouse-information", &context("E1").with_overrides(Some(&unknown))),
            Err(RecordsError::Config(_))
        ));
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let mut table = TableModel::fields("notes", "Notes");
        table.push_field("Condition", "sham | control\nsecond line");
        let markdown = table.to_markdown();

        assert_eq!(
            markdown,
            "| Field | Value |\n| --- | --- |\n| Condition | sham \\| control<br>second line |\n"
        );
        for line in markdown.lines() {
            let unescaped = line.replace("\\|", "");
            assert_eq!(unescaped.matches('|').count(), 3);
        }
    }

    #[test]
    fn test_registry_keys() {
        let registry = TableRegistry::with_defaults();
        assert_eq!(
            registry.keys(),
            vec![
                "cranial-window",
                "head-fixation",
                "imaging-session",
                "mouse-information",
                "tamoxifen-injection"
            ]
        );
    }
}

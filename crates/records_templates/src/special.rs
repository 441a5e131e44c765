//! Special tables autofilled from instrument metadata.
//!
//! A special table declares the callbacks that supply its metadata files and
//! builds its rows from the parsed records. Multiplane tables fan out into one
//! sub-table per unit found in the metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use records_meta::{
    MetaError, ParserRegistry, RecordSet, PLANE_FIELDS, PRAIRIEVIEW_FORMAT, SLM_PLANES_FORMAT,
};
use tracing::debug;

use crate::callbacks::{IMAGING_METADATA_FILE, LANDMARK_METADATA_FILE, SLM_METADATA_FILE};
use crate::error::{RecordsError, RecordsResult};
use crate::links;
use crate::tables::TableModel;

const NOT_AVAILABLE: &str = "N/A";

/// A special table after autofill.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialTableModel {
    pub key: String,
    pub title: String,
    /// Single table for non fan-out tables
    pub table: Option<TableModel>,
    /// Per-unit sub-tables, in metadata order
    pub units: Vec<TableModel>,
    pub fan_out: bool,
    /// Metadata files the rows were read from
    pub sources: Vec<PathBuf>,
}

impl SpecialTableModel {
    pub fn single(key: impl Into<String>, table: TableModel, sources: Vec<PathBuf>) -> Self {
        Self {
            key: key.into(),
            title: table.title.clone(),
            table: Some(table),
            units: Vec::new(),
            fan_out: false,
            sources,
        }
    }

    pub fn fan_out(
        key: impl Into<String>,
        title: impl Into<String>,
        units: Vec<TableModel>,
        sources: Vec<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            table: None,
            units,
            fan_out: true,
            sources,
        }
    }

    /// Table region with headers and no rows, used when a source was not selected.
    pub fn empty(key: &str, table: &dyn SpecialTable) -> Self {
        if table.fans_out() {
            Self::fan_out(key, table.title(), Vec::new(), Vec::new())
        } else {
            Self::single(key, TableModel::fields(key, table.title()), Vec::new())
        }
    }

    /// Render to markdown. Fan-out tables put a title heading at
    /// `header_level` and one heading per unit below it.
    pub fn to_markdown(&self, header_level: usize) -> String {
        if !self.fan_out {
            return self
                .table
                .as_ref()
                .map(TableModel::to_markdown)
                .unwrap_or_default();
        }

        let level = header_level.clamp(1, 6);
        let mut out = format!("{} {}\n", "#".repeat(level), self.title);
        if !self.sources.is_empty() {
            let sources: Vec<String> = self.sources.iter().map(|p| links::plain_link(p)).collect();
            out.push('\n');
            out.push_str(&sources.join(" "));
            out.push('\n');
        }
        let unit_level = "#".repeat((level + 1).min(6));
        for unit in &self.units {
            out.push_str(&format!("\n{} {}\n\n{}", unit_level, unit.title, unit.to_markdown()));
        }
        out
    }
}

/// Parsed metadata memoized by (format, path) for one session.
#[derive(Debug)]
pub struct MetadataCache {
    parsers: ParserRegistry,
    entries: HashMap<(String, PathBuf), Arc<RecordSet>>,
    parses: usize,
}

impl MetadataCache {
    pub fn new(parsers: ParserRegistry) -> Self {
        Self {
            parsers,
            entries: HashMap::new(),
            parses: 0,
        }
    }

    /// Parse `path` with the parser for `format`, or return the cached record.
    pub fn get(&mut self, format: &str, path: &Path) -> RecordsResult<Arc<RecordSet>> {
        let key = (format.to_string(), path.to_path_buf());
        if let Some(record) = self.entries.get(&key) {
            return Ok(Arc::clone(record));
        }

        let parser = self.parsers.get_required(format)?;
        debug!("Parsing {} metadata: {:?}", format, path);
        let record = Arc::new(parser.parse(path)?);
        self.parses += 1;
        self.entries.insert(key, Arc::clone(&record));
        Ok(record)
    }

    /// Number of files actually parsed.
    pub fn parse_count(&self) -> usize {
        self.parses
    }
}

/// A table whose rows come from metadata files.
pub trait SpecialTable: Send + Sync {
    fn title(&self) -> &str;

    /// Callback names supplying the metadata files, in argument order.
    fn sources(&self) -> &[&'static str];

    fn fans_out(&self) -> bool {
        false
    }

    /// Build the table. `sources` has one path per declared source.
    fn build(
        &self,
        key: &str,
        sources: &[PathBuf],
        metadata: &mut MetadataCache,
    ) -> RecordsResult<SpecialTableModel>;
}

/// Registry of special tables keyed by table key.
#[derive(Default, Clone)]
pub struct SpecialTableRegistry {
    tables: HashMap<String, Arc<dyn SpecialTable>>,
}

impl SpecialTableRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Registry with the imaging and SLM tables.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("imaging-fov", Arc::new(ImagingFov));
        registry.register("imaging-roadmap", Arc::new(ImagingRoadmap));
        registry.register("multiplane-slm", Arc::new(MultiplaneSlm));
        registry
    }

    /// Register `table` under `key`, replacing any previous entry.
    pub fn register(&mut self, key: impl Into<String>, table: Arc<dyn SpecialTable>) {
        let key = key.into();
        debug!("Registering special table: {}", key);
        self.tables.insert(key, table);
    }

    /// Look up a special table by key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn SpecialTable>> {
        self.tables.get(key).cloned()
    }

    /// Look up a special table, failing with a registry error when unknown.
    pub fn get_required(&self, key: &str) -> RecordsResult<Arc<dyn SpecialTable>> {
        self.get(key).ok_or_else(|| {
            RecordsError::Registry(format!("no special table registered for key '{}'", key))
        })
    }

    /// Whether a special table is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    /// Registered table keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Autofill `key` from one selection per declared source.
    ///
    /// Any empty selection yields the empty table region. Extra paths in a
    /// selection are ignored.
    pub fn autofill(
        &self,
        key: &str,
        selections: &[Vec<PathBuf>],
        metadata: &mut MetadataCache,
    ) -> RecordsResult<SpecialTableModel> {
        let table = self.get_required(key)?;
        let expected = table.sources().len();
        if selections.len() != expected {
            return Err(RecordsError::Render(format!(
                "special table '{}' takes {} metadata source(s), got {}",
                key,
                expected,
                selections.len()
            )));
        }

        let mut sources = Vec::with_capacity(expected);
        for selection in selections {
            match selection.first() {
                Some(path) => sources.push(path.clone()),
                None => {
                    debug!("No metadata selected for {}, leaving table empty", key);
                    return Ok(SpecialTableModel::empty(key, table.as_ref()));
                }
            }
        }
        table.build(key, &sources, metadata)
    }
}

impl std::fmt::Debug for SpecialTableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialTableRegistry")
            .field("tables", &self.keys())
            .finish()
    }
}

struct ImagingFov;

impl SpecialTable for ImagingFov {
    fn title(&self) -> &str {
        "Imaging Field of View"
    }

    fn sources(&self) -> &[&'static str] {
        &[IMAGING_METADATA_FILE]
    }

    fn build(
        &self,
        key: &str,
        sources: &[PathBuf],
        metadata: &mut MetadataCache,
    ) -> RecordsResult<SpecialTableModel> {
        let path = &sources[0];
        let scan = metadata.get(PRAIRIEVIEW_FORMAT, path)?;

        let frame_period = scan.number("frame_period")?;
        if frame_period <= 0.0 {
            return Err(MetaError::InvalidValue {
                path: path.clone(),
                field: "frame_period".to_string(),
                message: format!("must be positive, got {}", frame_period),
            }
            .into());
        }
        let frame_rate = 1.0 / frame_period;
        let planes = scan.count("planes")?;
        let effective_rate = if planes > 0 {
            frame_rate / planes as f64
        } else {
            frame_rate
        };
        let (x, y, z) = stage_position(&scan)?;

        let mut table = TableModel::fields(key, self.title());
        table.push_field("Metadata File", links::plain_link(path));
        table.push_field("Objective Lens", scan.text("objective_lens")?);
        table.push_field("Laser Power", optional(&scan, "laser_power.imaging"));
        table.push_field("PMT Gain", optional(&scan, "pmt_gain.pmt_2_green"));
        table.push_field("Preamp Filter", optional(&scan, "preamp_filter"));
        table.push_field("Optical Zoom", scan.text("optical_zoom")?);
        table.push_field("Lines Per Frame", scan.text("lines_per_frame")?);
        table.push_field("Pixels Per Line", scan.text("pixels_per_line")?);
        table.push_field(
            "Microns Per Pixel",
            optional(&scan, "microns_per_pixel.x_axis"),
        );
        table.push_field("Planes", planes.to_string());
        table.push_field("Channels", scan.count("channels")?.to_string());
        table.push_field("Frame Rate (Hz)", format!("{:.2}", frame_rate));
        table.push_field("Effective Frame Rate (Hz)", format!("{:.2}", effective_rate));
        table.push_field("X (µm)", format_position(x));
        table.push_field("Y (µm)", format_position(y));
        table.push_field("Z (µm)", format_position(z));

        Ok(SpecialTableModel::single(key, table, vec![path.clone()]))
    }
}

struct ImagingRoadmap;

impl SpecialTable for ImagingRoadmap {
    fn title(&self) -> &str {
        "Imaging Roadmap"
    }

    fn sources(&self) -> &[&'static str] {
        &[IMAGING_METADATA_FILE, LANDMARK_METADATA_FILE]
    }

    fn build(
        &self,
        key: &str,
        sources: &[PathBuf],
        metadata: &mut MetadataCache,
    ) -> RecordsResult<SpecialTableModel> {
        let (imaging_path, landmark_path) = (&sources[0], &sources[1]);
        let imaging_scan = metadata.get(PRAIRIEVIEW_FORMAT, imaging_path)?;
        let landmark_scan = metadata.get(PRAIRIEVIEW_FORMAT, landmark_path)?;
        let imaging = stage_position(&imaging_scan)?;
        let landmark = stage_position(&landmark_scan)?;

        let mut table = TableModel::fields(key, self.title());
        table.push_field("Imaging Metadata File", links::plain_link(imaging_path));
        table.push_field("Landmark Metadata File", links::plain_link(landmark_path));
        table.push_field("Relative X (µm)", format_position(imaging.0 - landmark.0));
        table.push_field("Relative Y (µm)", format_position(imaging.1 - landmark.1));
        table.push_field("Relative Z (µm)", format_position(imaging.2 - landmark.2));

        Ok(SpecialTableModel::single(
            key,
            table,
            vec![imaging_path.clone(), landmark_path.clone()],
        ))
    }
}

struct MultiplaneSlm;

const PLANE_LABELS: [&str; 8] = [
    "Index",
    "Pattern",
    "X",
    "Y",
    "Z",
    "Target Intensity",
    "Estimated Intensity",
    "Estimated Weight",
];

impl SpecialTable for MultiplaneSlm {
    fn title(&self) -> &str {
        "Multiplane SLM"
    }

    fn sources(&self) -> &[&'static str] {
        &[SLM_METADATA_FILE]
    }

    fn fans_out(&self) -> bool {
        true
    }

    fn build(
        &self,
        key: &str,
        sources: &[PathBuf],
        metadata: &mut MetadataCache,
    ) -> RecordsResult<SpecialTableModel> {
        let path = &sources[0];
        let planes = metadata.get(SLM_PLANES_FORMAT, path)?;

        let mut units = Vec::with_capacity(planes.unit_count());
        for plane in 0..planes.unit_count() {
            let mut table = TableModel::fields(key, format!("Plane {}", plane));
            for (field, label) in PLANE_FIELDS.iter().zip(PLANE_LABELS) {
                table.push_field(label, planes.unit_field(plane, field)?);
            }
            units.push(table);
        }
        debug!("Multiplane SLM table has {} plane(s)", units.len());

        Ok(SpecialTableModel::fan_out(
            key,
            self.title(),
            units,
            vec![path.clone()],
        ))
    }
}

fn optional(record: &RecordSet, field: &str) -> String {
    record.get(field).unwrap_or(NOT_AVAILABLE).to_string()
}

/// Stage x/y/z. Z prefers the focus device when the axis has several,
/// otherwise the first Z value in file order.
fn stage_position(record: &RecordSet) -> RecordsResult<(f64, f64, f64)> {
    let x = record.number("position_current.x_axis")?;
    let y = record.number("position_current.y_axis")?;
    let z = match record.optional_number("position_current.z_axis_z_focus")? {
        Some(z) => z,
        None => record.number("position_current.z_axis")?,
    };
    Ok((x, y, z))
}

fn format_position(value: f64) -> String {
    format!("{:.2}", value)
}

//! Records configuration (`records.toml`).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RecordsError, RecordsResult};
use crate::session::DEFAULT_HEADER_LEVEL;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "records.toml";

/// Registry store file name inside the templates directory.
pub const REGISTRY_FILE: &str = "templates.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// Directory holding `<key>.md` template sources
    pub templates_dir: PathBuf,
    /// Root of the per-subject export directories
    pub exports_dir: PathBuf,
    /// Registry store; defaults to `<templates_dir>/templates.json`
    pub registry: Option<PathBuf>,
    pub links: LinkConfig,
    /// Per-table field overrides, e.g. `[tables.mouse-information] cage = 1234`
    pub tables: HashMap<String, HashMap<String, toml::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub header_level: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            header_level: DEFAULT_HEADER_LEVEL,
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            exports_dir: PathBuf::from("exports"),
            registry: None,
            links: LinkConfig::default(),
            tables: HashMap::new(),
        }
    }
}

impl RecordsConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> RecordsResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RecordsError::Config(format!("cannot read {:?}: {}", path, e)))?;
        let config: RecordsConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load `records.toml` from `dir` if present, otherwise the defaults.
    pub fn discover(dir: &Path) -> RecordsResult<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> RecordsResult<()> {
        if !(1..=6).contains(&self.links.header_level) {
            return Err(RecordsError::Config(format!(
                "links.header_level must be between 1 and 6, got {}",
                self.links.header_level
            )));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry
            .clone()
            .unwrap_or_else(|| self.templates_dir.join(REGISTRY_FILE))
    }

    /// Table overrides as strings. Non-string TOML values use their TOML form.
    pub fn table_overrides(&self) -> HashMap<String, HashMap<String, String>> {
        self.tables
            .iter()
            .map(|(table, fields)| {
                let fields = fields
                    .iter()
                    .map(|(name, value)| {
                        let value = match value {
                            toml::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), value)
                    })
                    .collect();
                (table.clone(), fields)
            })
            .collect()
    }

    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = dir.into();
        self
    }

    pub fn with_exports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exports_dir = dir.into();
        self
    }

    pub fn with_registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry = Some(path.into());
        self
    }

    pub fn with_header_level(mut self, header_level: usize) -> Self {
        self.links.header_level = header_level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RecordsConfig::default();
        assert_eq!(config.links.header_level, 4);
        assert_eq!(config.registry_path(), PathBuf::from("templates/templates.json"));
    }

    #[test]
    fn test_load_with_table_overrides() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
exports_dir = "/data/exports"

[links]
header_level = 5

[tables.mouse-information]
cage = 1234
genotype = "Ai148"
"#,
        )
        .unwrap();

        let config = RecordsConfig::discover(temp.path()).unwrap();
        assert_eq!(config.exports_dir, PathBuf::from("/data/exports"));
        assert_eq!(config.templates_dir, PathBuf::from("templates"));
        assert_eq!(config.links.header_level, 5);

        let overrides = config.table_overrides();
        let mouse = &overrides["mouse-information"];
        assert_eq!(mouse["cage"], "1234");
        assert_eq!(mouse["genotype"], "Ai148");
    }

    #[test]
    fn test_invalid_config() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(CONFIG_FILE);

        fs::write(&path, "[links]\nheader_level = 9\n").unwrap();
        assert!(matches!(RecordsConfig::load(&path), Err(RecordsError::Config(_))));

        fs::write(&path, "exports_dir = [").unwrap();
        assert!(matches!(RecordsConfig::load(&path), Err(RecordsError::Toml(_))));
    }
}

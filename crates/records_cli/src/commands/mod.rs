//! CLI argument definitions.
//!
//! `records <key> <subject>` generates the records for one subject.
//! `records --list` prints the registered templates instead.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use records_templates::config::CONFIG_FILE;
use records_templates::RecordsConfig;
use tracing::debug;

pub mod generate;
pub mod list;

/// Lab records generator
#[derive(Parser, Debug)]
#[command(name = "records")]
#[command(version, about = "Generate lab records from markdown templates")]
#[command(long_about = r#"
Generates a records document for one subject from a registered template.
Every file the template references is prompted for, copied into the export
and linked from the markdown.

OUTPUT:
  <exports-dir>/<subject>/<key>_<subject>.md
  <exports-dir>/<subject>/files/

EXIT CODES:
  0  - Success
  1  - General error
  2  - Invalid arguments
  3  - Registry error
  4  - Unknown template
  5  - Placeholder resolution error
  6  - Index out of range
  7  - Metadata parse error
  8  - Template syntax error
  9  - Render error
  10 - Invalid subject
  11 - Configuration error
  12 - Export I/O error
"#)]
pub struct Cli {
    /// Template key, e.g. experiment-records
    #[arg(required_unless_present = "list")]
    pub key: Option<String>,

    /// Subject the records are generated for, e.g. a mouse ID
    #[arg(required_unless_present = "list")]
    pub subject: Option<String>,

    /// Directory holding the template sources
    #[arg(long, env = "RECORDS_TEMPLATES_DIR")]
    pub templates_dir: Option<PathBuf>,

    /// Root directory for exports
    #[arg(long, env = "RECORDS_EXPORTS_DIR")]
    pub exports_dir: Option<PathBuf>,

    /// Template registry store (defaults to <templates-dir>/templates.json)
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Configuration file (defaults to ./records.toml when present)
    #[arg(long, env = "RECORDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Heading depth used when rendering link lists
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=6))]
    pub header_level: Option<u8>,

    /// List registered templates and exit
    #[arg(long)]
    pub list: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Configuration file values with flags and env vars layered on top.
    pub fn load_config(&self) -> Result<RecordsConfig> {
        let mut config = match &self.config {
            Some(path) => RecordsConfig::load(path)
                .with_context(|| format!("Failed to load configuration {:?}", path))?,
            None => {
                let current_dir = std::env::current_dir()?;
                RecordsConfig::discover(&current_dir)
                    .with_context(|| format!("Failed to load {}", CONFIG_FILE))?
            }
        };

        if let Some(dir) = &self.templates_dir {
            config = config.with_templates_dir(dir);
        }
        if let Some(dir) = &self.exports_dir {
            config = config.with_exports_dir(dir);
        }
        if let Some(path) = &self.registry {
            config = config.with_registry(path);
        }
        if let Some(level) = self.header_level {
            config = config.with_header_level(level as usize);
        }

        debug!("Using configuration: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_positional_arguments_required_without_list() {
        assert!(Cli::try_parse_from(["records"]).is_err());
        assert!(Cli::try_parse_from(["records", "experiment-records"]).is_err());

        let cli = Cli::try_parse_from(["records", "--list"]).unwrap();
        assert!(cli.list);
        assert!(cli.key.is_none());

        let cli = Cli::try_parse_from(["records", "experiment-records", "EX042"]).unwrap();
        assert_eq!(cli.key.as_deref(), Some("experiment-records"));
        assert_eq!(cli.subject.as_deref(), Some("EX042"));
    }

    #[test]
    fn test_header_level_range() {
        assert!(Cli::try_parse_from(["records", "--list", "--header-level", "7"]).is_err());
        let cli = Cli::try_parse_from(["records", "--list", "--header-level", "2"]).unwrap();
        assert_eq!(cli.header_level, Some(2));
    }

    #[test]
    fn test_flags_override_config_file() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join(CONFIG_FILE);
        fs::write(
            &config_path,
            "templates_dir = \"lab/templates\"\nexports_dir = \"lab/exports\"\n\n[links]\nheader_level = 3\n",
        )
        .unwrap();

        let config_arg = config_path.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "records",
            "--list",
            "--config",
            config_arg.as_str(),
            "--exports-dir",
            "/data/exports",
            "--header-level",
            "5",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.templates_dir, PathBuf::from("lab/templates"));
        assert_eq!(config.exports_dir, PathBuf::from("/data/exports"));
        assert_eq!(config.links.header_level, 5);
    }
}

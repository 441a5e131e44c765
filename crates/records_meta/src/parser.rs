//! Parser trait and registry.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{MetaError, MetaResult};
use crate::planes::SlmPlaneParser;
use crate::prairieview::PrairieViewParser;
use crate::record::RecordSet;

/// A pure function from a metadata file to a [`RecordSet`].
///
/// Parsers must not modify the source file, and the same file must always
/// produce the same record set.
pub trait MetadataParser: Send + Sync {
    /// Format identifier used for registry lookup (e.g. `prairieview`).
    fn format(&self) -> &str;

    /// Parse already-loaded file content.
    fn parse_str(&self, path: &Path, content: &str) -> MetaResult<RecordSet>;

    /// Read and parse a metadata file.
    fn parse(&self, path: &Path) -> MetaResult<RecordSet> {
        debug!("Parsing {} metadata from {:?}", self.format(), path);
        let content = fs::read_to_string(path).map_err(|source| MetaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(path, &content)
    }
}

/// Registry of metadata parsers keyed by format.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn MetadataParser>>,
}

impl ParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Registry with every built-in instrument parser.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PrairieViewParser));
        registry.register(Arc::new(SlmPlaneParser));
        registry
    }

    /// Register a parser under its `format()` identifier.
    pub fn register(&mut self, parser: Arc<dyn MetadataParser>) {
        let format = parser.format().to_string();
        debug!("Registering metadata parser: {}", format);
        self.parsers.insert(format, parser);
    }

    pub fn get(&self, format: &str) -> Option<Arc<dyn MetadataParser>> {
        self.parsers.get(format).cloned()
    }

    /// Get a parser, returning an error if the format is unknown.
    pub fn get_required(&self, format: &str) -> MetaResult<Arc<dyn MetadataParser>> {
        self.get(format)
            .ok_or_else(|| MetaError::UnknownFormat(format.to_string()))
    }

    /// All registered formats, sorted.
    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.formats())
            .finish()
    }
}

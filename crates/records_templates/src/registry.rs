//! Persisted template registry.
//!
//! The store is a JSON object mapping template keys to definitions:
//!
//! ```json
//! {
//!   "surgery": { "key": "surgery", "documents": ["Protocol"], "tables": ["head-fixation"] }
//! }
//! ```
//!
//! Writes go through a temp file in the store's directory followed by a
//! rename, and are serialized across processes with a `.lock` sidecar. The
//! sidecar records the holder's pid; one older than a minute is
//! treated as left behind by a crashed process and removed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::definition::TemplateDefinition;
use crate::error::{RecordsError, RecordsResult};
use crate::special::SpecialTableRegistry;
use crate::tables::TableRegistry;

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY: Duration = Duration::from_millis(100);

/// Age after which an existing store lock is considered abandoned.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Registry of template definitions backed by a JSON store.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, TemplateDefinition>,
    store_path: PathBuf,
    templates_dir: PathBuf,
}

impl TemplateRegistry {
    /// Create an empty registry that persists to `store_path`.
    pub fn new(store_path: impl Into<PathBuf>, templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates: BTreeMap::new(),
            store_path: store_path.into(),
            templates_dir: templates_dir.into(),
        }
    }

    /// Load the registry from its store. A missing store is an empty registry.
    pub fn load(
        store_path: impl Into<PathBuf>,
        templates_dir: impl Into<PathBuf>,
    ) -> RecordsResult<Self> {
        let mut registry = Self::new(store_path, templates_dir);

        if !registry.store_path.exists() {
            warn!("Template store does not exist: {:?}", registry.store_path);
            return Ok(registry);
        }

        registry.templates = read_store(&registry.store_path)?;
        info!(
            "Loaded {} templates from {:?}",
            registry.templates.len(),
            registry.store_path
        );
        Ok(registry)
    }

    /// Get a template definition by key.
    pub fn get(&self, key: &str) -> RecordsResult<&TemplateDefinition> {
        self.templates
            .get(key)
            .ok_or_else(|| RecordsError::UnknownTemplate(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    /// All template keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Location of a template's markdown source.
    pub fn template_path(&self, key: &str) -> PathBuf {
        self.templates_dir.join(format!("{}.md", key))
    }

    /// Template sources in the templates directory with no registry entry.
    pub fn unregistered_sources(&self) -> Vec<String> {
        if !self.templates_dir.exists() {
            return Vec::new();
        }

        let mut keys: Vec<String> = WalkDir::new(&self.templates_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|key| !self.templates.contains_key(key))
            .collect();
        keys.sort();
        keys
    }

    /// Add a definition and persist the store.
    ///
    /// Every declared table and special name must exist in its registry.
    /// The store is re-read under the lock so that definitions added by
    /// other processes are preserved.
    pub fn add(
        &mut self,
        definition: TemplateDefinition,
        tables: &TableRegistry,
        special: &SpecialTableRegistry,
    ) -> RecordsResult<()> {
        if definition.key.trim().is_empty() {
            return Err(RecordsError::Registry("template key is empty".into()));
        }
        for table in &definition.tables {
            if !tables.contains(table) {
                return Err(RecordsError::Registry(format!(
                    "template '{}' declares unknown table '{}'",
                    definition.key, table
                )));
            }
        }
        for table in &definition.special {
            if !special.contains(table) {
                return Err(RecordsError::Registry(format!(
                    "template '{}' declares unknown special table '{}'",
                    definition.key, table
                )));
            }
        }

        let _lock = StoreLock::acquire(&self.store_path)?;

        let mut templates = if self.store_path.exists() {
            read_store(&self.store_path)?
        } else {
            BTreeMap::new()
        };
        for (key, existing) in &self.templates {
            templates
                .entry(key.clone())
                .or_insert_with(|| existing.clone());
        }

        if templates.contains_key(&definition.key) {
            return Err(RecordsError::Registry(format!(
                "template with key '{}' already exists",
                definition.key
            )));
        }

        info!("Adding template: {}", definition.key);
        templates.insert(definition.key.clone(), definition);
        write_store(&self.store_path, &templates)?;
        self.templates = templates;
        Ok(())
    }
}

fn read_store(path: &Path) -> RecordsResult<BTreeMap<String, TemplateDefinition>> {
    debug!("Reading template store {:?}", path);
    let content = fs::read_to_string(path).map_err(|e| {
        RecordsError::Registry(format!("cannot read template store {:?}: {}", path, e))
    })?;
    let entries: StoreEntries = serde_json::from_str(&content).map_err(|e| {
        RecordsError::Registry(format!("malformed template store {:?}: {}", path, e))
    })?;

    let mut templates = BTreeMap::new();
    for (key, value) in entries.0 {
        let definition: TemplateDefinition = serde_json::from_value(value).map_err(|e| {
            RecordsError::Registry(format!("invalid definition for '{}': {}", key, e))
        })?;
        if definition.key != key {
            return Err(RecordsError::Registry(format!(
                "entry '{}' declares mismatched key '{}'",
                key, definition.key
            )));
        }
        if templates.insert(key.clone(), definition).is_some() {
            return Err(RecordsError::Registry(format!(
                "duplicate template key '{}'",
                key
            )));
        }
    }
    Ok(templates)
}

fn write_store(path: &Path, templates: &BTreeMap<String, TemplateDefinition>) -> RecordsResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| RecordsError::registry_io(&parent, e))?;

    let mut temp =
        NamedTempFile::new_in(&parent).map_err(|e| RecordsError::registry_io(&parent, e))?;
    let mut content = serde_json::to_string_pretty(templates)?;
    content.push('\n');
    temp.write_all(content.as_bytes())
        .map_err(|e| RecordsError::registry_io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| RecordsError::registry_io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| RecordsError::registry_io(path, e.error))?;

    debug!("Wrote {} templates to {:?}", templates.len(), path);
    Ok(())
}

/// Map entries in file order, duplicates included.
struct StoreEntries(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for StoreEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = StoreEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of template keys to definitions")
            }

            fn visit_map<A>(self, mut map: A) -> Result<StoreEntries, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    entries.push(entry);
                }
                Ok(StoreEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Exclusive lock on the store, held by a sidecar file.
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(store_path: &Path) -> RecordsResult<Self> {
        let mut path = store_path.as_os_str().to_owned();
        path.push(".lock");
        let path = PathBuf::from(path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RecordsError::registry_io(parent, e))?;
        }

        for _ in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!("Acquired template store lock {:?}", path);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        warn!("Removing stale template store lock {:?}", path);
                        match fs::remove_file(&path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                            Err(e) => return Err(RecordsError::registry_io(&path, e)),
                        }
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(RecordsError::registry_io(&path, e)),
            }
        }

        Err(RecordsError::Registry(format!(
            "timed out waiting for template store lock {:?}; \
             if no other records process is running, delete that file",
            path
        )))
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release template store lock {:?}: {}", self.path, e);
        }
    }
}

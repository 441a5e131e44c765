//! Per-generate state shared by the resolver, filters and the engine.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use records_meta::ParserRegistry;
use tracing::debug;

use crate::callbacks::CallbackRegistry;
use crate::error::{RecordsError, RecordsResult};
use crate::selector::FileSelector;
use crate::special::{MetadataCache, SpecialTableModel, SpecialTableRegistry};
use crate::value::Value;

/// Default heading depth for link sections.
pub const DEFAULT_HEADER_LEVEL: usize = 4;

/// State for one generate call.
///
/// Callback results are memoized by callback name for the whole pass, so a
/// prompt runs at most once however many tables or template locals use it.
pub struct Session<'a> {
    subject: String,
    selector: &'a dyn FileSelector,
    callbacks: &'a CallbackRegistry,
    special: &'a SpecialTableRegistry,
    metadata: MetadataCache,
    invoked: HashMap<String, Value>,
    references: Vec<PathBuf>,
    referenced: HashSet<PathBuf>,
    header_level: usize,
}

impl<'a> Session<'a> {
    pub fn new(
        subject: impl Into<String>,
        selector: &'a dyn FileSelector,
        callbacks: &'a CallbackRegistry,
        special: &'a SpecialTableRegistry,
        parsers: ParserRegistry,
    ) -> Self {
        Self {
            subject: subject.into(),
            selector,
            callbacks,
            special,
            metadata: MetadataCache::new(parsers),
            invoked: HashMap::new(),
            references: Vec::new(),
            referenced: HashSet::new(),
            header_level: DEFAULT_HEADER_LEVEL,
        }
    }

    pub fn with_header_level(mut self, header_level: usize) -> Self {
        self.header_level = header_level;
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn selector(&self) -> &'a dyn FileSelector {
        self.selector
    }

    pub fn header_level(&self) -> usize {
        self.header_level
    }

    /// Invoke a callback, or return its result from earlier in this pass.
    pub fn invoke(&mut self, callback: &str) -> RecordsResult<Value> {
        if let Some(value) = self.invoked.get(callback) {
            return Ok(value.clone());
        }
        debug!("Invoking callback: {}", callback);
        let value = self.callbacks.invoke(callback, self.selector)?;
        self.invoked.insert(callback.to_string(), value.clone());
        Ok(value)
    }

    /// Autofill a special table by invoking each of its source callbacks.
    pub fn autofill(&mut self, key: &str) -> RecordsResult<SpecialTableModel> {
        let table = self.special.get_required(key)?;
        let mut selections = Vec::with_capacity(table.sources().len());
        for source in table.sources() {
            let paths = match self.invoke(source)? {
                Value::Paths(paths) => paths,
                other => {
                    return Err(RecordsError::Render(format!(
                        "callback '{}' returned {}, expected paths",
                        source,
                        other.type_name()
                    )))
                }
            };
            selections.push(paths);
        }
        self.autofill_with(key, &selections)
    }

    /// Autofill a special table from explicit selections.
    pub fn autofill_with(
        &mut self,
        key: &str,
        selections: &[Vec<PathBuf>],
    ) -> RecordsResult<SpecialTableModel> {
        self.special.autofill(key, selections, &mut self.metadata)
    }

    /// Record a file the rendered markdown links to. Duplicates are ignored.
    pub fn reference(&mut self, path: &Path) {
        if self.referenced.insert(path.to_path_buf()) {
            self.references.push(path.to_path_buf());
        }
    }

    /// Referenced files in first-use order.
    pub fn references(&self) -> &[PathBuf] {
        &self.references
    }

    pub fn into_references(self) -> Vec<PathBuf> {
        self.references
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::IMAGING_METADATA_FILE;
    use crate::selector::ScriptedSelector;

    #[test]
    fn test_callbacks_are_memoized() {
        let selector = ScriptedSelector::new().answer(IMAGING_METADATA_FILE, ["/scan.xml"]);
        let callbacks = CallbackRegistry::with_defaults();
        let special = SpecialTableRegistry::with_defaults();
        let mut session = Session::new(
            "EX042",
            &selector,
            &callbacks,
            &special,
            ParserRegistry::with_defaults(),
        );

        let first = session.invoke(IMAGING_METADATA_FILE).unwrap();
        let second = session.invoke(IMAGING_METADATA_FILE).unwrap();
        assert_eq!(first, second);
        assert_eq!(selector.request_count(IMAGING_METADATA_FILE), 1);
    }

    #[test]
    fn test_references_keep_first_use_order() {
        let selector = ScriptedSelector::new();
        let callbacks = CallbackRegistry::new();
        let special = SpecialTableRegistry::new();
        let mut session =
            Session::new("EX042", &selector, &callbacks, &special, ParserRegistry::new());

        session.reference(Path::new("/b.png"));
        session.reference(Path::new("/a.png"));
        session.reference(Path::new("/b.png"));
        assert_eq!(
            session.into_references(),
            vec![PathBuf::from("/b.png"), PathBuf::from("/a.png")]
        );
    }
}

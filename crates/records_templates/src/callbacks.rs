//! Callbacks templates can invoke with `{% call name = callback %}`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{RecordsError, RecordsResult};
use crate::selector::{FileSelector, SelectionRequest};
use crate::value::Value;

pub const IMAGING_METADATA_FILE: &str = "imaging_metadata_file";
pub const LANDMARK_METADATA_FILE: &str = "landmark_metadata_file";
pub const SLM_METADATA_FILE: &str = "slm_metadata_file";

/// An external function a template can call. May block on user input.
pub trait Callback: Send + Sync {
    fn invoke(&self, name: &str, selector: &dyn FileSelector) -> RecordsResult<Value>;
}

/// Prompts for a single file.
#[derive(Debug, Clone)]
pub struct PromptFile {
    title: String,
}

impl PromptFile {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Callback for PromptFile {
    fn invoke(&self, name: &str, selector: &dyn FileSelector) -> RecordsResult<Value> {
        let paths = selector.select(&SelectionRequest::callback(name, &self.title))?;
        Ok(Value::Paths(paths))
    }
}

/// Registry of callbacks keyed by callback name.
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<dyn Callback>>,
}

impl CallbackRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Registry with the metadata file prompts.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            IMAGING_METADATA_FILE,
            Arc::new(PromptFile::new("Select the imaging metadata file")),
        );
        registry.register(
            LANDMARK_METADATA_FILE,
            Arc::new(PromptFile::new("Select the landmark metadata file")),
        );
        registry.register(
            SLM_METADATA_FILE,
            Arc::new(PromptFile::new("Select the multiplane SLM metadata file")),
        );
        registry
    }

    /// Register `callback` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, callback: Arc<dyn Callback>) {
        let name = name.into();
        debug!("Registering callback: {}", name);
        self.callbacks.insert(name, callback);
    }

    /// Look up a callback by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Callback>> {
        self.callbacks.get(name).cloned()
    }

    /// Whether a callback is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Registered callback names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callbacks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Invoke a registered callback. Unknown names are render errors.
    pub fn invoke(&self, name: &str, selector: &dyn FileSelector) -> RecordsResult<Value> {
        let callback = self
            .get(name)
            .ok_or_else(|| RecordsError::Render(format!("unknown callback '{}'", name)))?;
        callback.invoke(name, selector)
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.names())
            .finish()
    }
}

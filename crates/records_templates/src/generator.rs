//! Records generation: resolve, render and export one template for one subject.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use records_meta::{MetadataParser, ParserRegistry};
use tracing::info;

use crate::callbacks::{Callback, CallbackRegistry};
use crate::config::RecordsConfig;
use crate::definition::TemplateDefinition;
use crate::engine::RenderEngine;
use crate::error::{RecordsError, RecordsResult};
use crate::export::{ExportPackager, ExportReport};
use crate::filters::{Filter, FilterRegistry};
use crate::plan::ExpansionPlan;
use crate::registry::TemplateRegistry;
use crate::resolver::PlaceholderResolver;
use crate::selector::FileSelector;
use crate::session::Session;
use crate::special::{SpecialTable, SpecialTableRegistry};
use crate::tables::{TableBuilder, TableRegistry};

/// Markdown produced by a render, before export.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub markdown: String,
    /// Files the markdown links to, in first-use order
    pub references: Vec<PathBuf>,
}

/// Entry point tying the registries, engine and packager together.
#[derive(Debug)]
pub struct Records {
    config: RecordsConfig,
    registry: TemplateRegistry,
    tables: TableRegistry,
    special: SpecialTableRegistry,
    filters: FilterRegistry,
    callbacks: CallbackRegistry,
    parsers: ParserRegistry,
    overrides: HashMap<String, HashMap<String, String>>,
}

impl Records {
    /// Load the template registry named by `config` and register the
    /// built-in tables, filters, callbacks and parsers.
    pub fn new(config: RecordsConfig) -> RecordsResult<Self> {
        config.validate()?;
        let registry = TemplateRegistry::load(config.registry_path(), &config.templates_dir)?;
        let overrides = config.table_overrides();

        Ok(Self {
            config,
            registry,
            tables: TableRegistry::with_defaults(),
            special: SpecialTableRegistry::with_defaults(),
            filters: FilterRegistry::with_defaults(),
            callbacks: CallbackRegistry::with_defaults(),
            parsers: ParserRegistry::with_defaults(),
            overrides,
        })
    }

    pub fn with_table(mut self, key: impl Into<String>, table: Arc<dyn TableBuilder>) -> Self {
        self.tables.register(key, table);
        self
    }

    pub fn with_special_table(
        mut self,
        key: impl Into<String>,
        table: Arc<dyn SpecialTable>,
    ) -> Self {
        self.special.register(key, table);
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        self.filters.register(name, filter);
        self
    }

    pub fn with_callback(mut self, name: impl Into<String>, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.register(name, callback);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn MetadataParser>) -> Self {
        self.parsers.register(parser);
        self
    }

    pub fn config(&self) -> &RecordsConfig {
        &self.config
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Add and persist a template definition.
    pub fn add_template(&mut self, definition: TemplateDefinition) -> RecordsResult<()> {
        self.registry.add(definition, &self.tables, &self.special)
    }

    /// Resolve and render a template without exporting it.
    pub fn render(
        &self,
        key: &str,
        subject: &str,
        selector: &dyn FileSelector,
    ) -> RecordsResult<RenderOutput> {
        validate_subject(subject)?;
        let definition = self.registry.get(key)?;

        let template_path = self.registry.template_path(key);
        let source = fs::read_to_string(&template_path).map_err(|e| {
            RecordsError::Registry(format!(
                "cannot read template source {:?}: {}",
                template_path, e
            ))
        })?;
        let plan = ExpansionPlan::compile(key, &source)?;

        let mut session = Session::new(
            subject,
            selector,
            &self.callbacks,
            &self.special,
            self.parsers.clone(),
        )
        .with_header_level(self.config.links.header_level);

        let bindings =
            PlaceholderResolver::new(&self.tables, &self.overrides).resolve(definition, &mut session)?;
        let markdown = RenderEngine::new(&self.filters).render(&plan, &bindings, &mut session)?;

        Ok(RenderOutput {
            markdown,
            references: session.into_references(),
        })
    }

    /// Generate the records export for `subject`.
    ///
    /// Nothing is written unless resolution and rendering both succeed.
    pub fn generate(
        &self,
        key: &str,
        subject: &str,
        selector: &dyn FileSelector,
    ) -> RecordsResult<ExportReport> {
        info!("Generating {} records for {}", key, subject);
        let output = self.render(key, subject, selector)?;
        ExportPackager::new(&self.config.exports_dir).write(
            key,
            subject,
            &output.markdown,
            &output.references,
        )
    }
}

/// Subjects name a directory under the exports root.
pub fn validate_subject(subject: &str) -> RecordsResult<()> {
    let invalid = |message: &str| RecordsError::InvalidSubject {
        subject: subject.to_string(),
        message: message.to_string(),
    };

    if subject.trim().is_empty() {
        return Err(invalid("subject is empty"));
    }
    if subject != subject.trim() {
        return Err(invalid("subject has leading or trailing whitespace"));
    }
    if subject == "." || subject == ".." {
        return Err(invalid("subject cannot be a relative directory"));
    }
    if subject
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control())
    {
        return Err(invalid("subject contains characters not allowed in a directory name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_validation() {
        assert!(validate_subject("EX042").is_ok());
        assert!(validate_subject("mouse 7-b").is_ok());
        for subject in ["", "  ", "..", "a/b", "a\\b", " EX042", "EX\n42"] {
            assert!(
                matches!(
                    validate_subject(subject),
                    Err(RecordsError::InvalidSubject { .. })
                ),
                "accepted {:?}",
                subject
            );
        }
    }
}

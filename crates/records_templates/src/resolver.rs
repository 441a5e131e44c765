//! Placeholder resolution.
//!
//! Turns a template definition into bindings, one per declared name, in
//! declaration order. File kinds go through the selector, tables through the
//! table registry, special tables through their metadata callbacks.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::definition::{PlaceholderKind, TemplateDefinition};
use crate::error::{RecordsError, RecordsResult};
use crate::selector::SelectionRequest;
use crate::session::Session;
use crate::tables::{TableContext, TableRegistry};

/// A placeholder's resolved value.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingValue {
    /// Selected files, possibly none
    Paths(Vec<PathBuf>),
    /// Rendered markdown plus the files it links to
    Content {
        markdown: String,
        references: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderBinding {
    pub kind: PlaceholderKind,
    pub name: String,
    pub value: BindingValue,
}

/// All bindings for one generate call, indexed by kind and declaration order.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    bindings: HashMap<PlaceholderKind, Vec<PlaceholderBinding>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, binding: PlaceholderBinding) {
        self.bindings.entry(binding.kind).or_default().push(binding);
    }

    pub fn len(&self, kind: PlaceholderKind) -> usize {
        self.bindings.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.values().all(Vec::is_empty)
    }

    /// Binding `index` of `kind`. Out of range is an error, never empty content.
    pub fn get(&self, kind: PlaceholderKind, index: usize) -> RecordsResult<&PlaceholderBinding> {
        let list = self.bindings.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        list.get(index).ok_or(RecordsError::IndexOutOfRange {
            target: kind.as_str().to_string(),
            index,
            len: list.len(),
        })
    }
}

/// Resolves every declared placeholder of a definition.
pub struct PlaceholderResolver<'r> {
    tables: &'r TableRegistry,
    overrides: &'r HashMap<String, HashMap<String, String>>,
}

impl<'r> PlaceholderResolver<'r> {
    pub fn new(
        tables: &'r TableRegistry,
        overrides: &'r HashMap<String, HashMap<String, String>>,
    ) -> Self {
        Self { tables, overrides }
    }

    pub fn resolve(
        &self,
        definition: &TemplateDefinition,
        session: &mut Session<'_>,
    ) -> RecordsResult<Bindings> {
        info!(
            "Resolving {} placeholder(s) for template {}",
            definition.placeholder_count(),
            definition.key
        );

        let mut bindings = Bindings::new();
        for kind in PlaceholderKind::all() {
            for name in definition.names(kind) {
                let value = match kind {
                    PlaceholderKind::Documents
                    | PlaceholderKind::Files
                    | PlaceholderKind::Images => {
                        let request = SelectionRequest::placeholder(kind, name);
                        BindingValue::Paths(session.selector().select(&request)?)
                    }
                    PlaceholderKind::Tables => self.resolve_table(name, session)?,
                    PlaceholderKind::Special => {
                        let model = session.autofill(name)?;
                        BindingValue::Content {
                            markdown: model.to_markdown(session.header_level()),
                            references: model.sources,
                        }
                    }
                };
                debug!("Resolved {} placeholder: {}", kind, name);
                bindings.push(PlaceholderBinding {
                    kind,
                    name: name.clone(),
                    value,
                });
            }
        }
        Ok(bindings)
    }

    fn resolve_table(&self, key: &str, session: &Session<'_>) -> RecordsResult<BindingValue> {
        let context = TableContext::new(session.subject()).with_overrides(self.overrides.get(key));
        let table = self.tables.build(key, &context)?;
        Ok(BindingValue::Content {
            markdown: table.to_markdown(),
            references: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{CallbackRegistry, SLM_METADATA_FILE};
    use crate::selector::ScriptedSelector;
    use crate::special::SpecialTableRegistry;
    use records_meta::ParserRegistry;

    #[test]
    fn test_bindings_follow_declaration_order() {
        let definition = TemplateDefinition::new("surgery")
            .with_document("Protocol")
            .with_image("Window")
            .with_image("Vasculature")
            .with_table("head-fixation");
        let selector = ScriptedSelector::new()
            .answer("Protocol", ["/p.pdf"])
            .decline("Window")
            .answer("Vasculature", ["/v1.png", "/v2.png"]);

        let tables = TableRegistry::with_defaults();
        let overrides = HashMap::new();
        let callbacks = CallbackRegistry::with_defaults();
        let special = SpecialTableRegistry::with_defaults();
        let mut session = Session::new(
            "EX042",
            &selector,
            &callbacks,
            &special,
            ParserRegistry::with_defaults(),
        );

        let bindings = PlaceholderResolver::new(&tables, &overrides)
            .resolve(&definition, &mut session)
            .unwrap();

        assert_eq!(bindings.len(PlaceholderKind::Images), 2);
        assert_eq!(bindings.get(PlaceholderKind::Images, 0).unwrap().name, "Window");
        assert_eq!(
            bindings.get(PlaceholderKind::Images, 0).unwrap().value,
            BindingValue::Paths(Vec::new())
        );
        assert_eq!(
            bindings.get(PlaceholderKind::Images, 1).unwrap().value,
            BindingValue::Paths(vec![PathBuf::from("/v1.png"), PathBuf::from("/v2.png")])
        );
        match &bindings.get(PlaceholderKind::Tables, 0).unwrap().value {
            BindingValue::Content { markdown, .. } => assert!(markdown.contains("| Subject | EX042 |")),
            other => panic!("unexpected binding {:?}", other),
        }
        assert!(matches!(
            bindings.get(PlaceholderKind::Images, 2),
            Err(RecordsError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn test_declined_special_source_is_empty_region() {
        let definition = TemplateDefinition::new("slm").with_special("multiplane-slm");
        let selector = ScriptedSelector::new().decline(SLM_METADATA_FILE);

        let tables = TableRegistry::with_defaults();
        let overrides = HashMap::new();
        let callbacks = CallbackRegistry::with_defaults();
        let special = SpecialTableRegistry::with_defaults();
        let mut session = Session::new(
            "EX042",
            &selector,
            &callbacks,
            &special,
            ParserRegistry::with_defaults(),
        );

        let bindings = PlaceholderResolver::new(&tables, &overrides)
            .resolve(&definition, &mut session)
            .unwrap();
        assert_eq!(
            bindings.get(PlaceholderKind::Special, 0).unwrap().value,
            BindingValue::Content {
                markdown: "#### Multiplane SLM\n".to_string(),
                references: Vec::new(),
            }
        );
    }
}

//! Named filters applied in template expressions.
//!
//! A filter takes the value on its left, the literal or local arguments in
//! its call, and the session. New filters are added by registering them; the
//! engine looks them up by name at render time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::error::{RecordsError, RecordsResult};
use crate::links;
use crate::session::Session;
use crate::tables::TableModel;
use crate::value::Value;

/// A transform over a resolved value.
pub trait Filter: Send + Sync {
    fn apply(&self, input: Value, args: &[Value], session: &mut Session<'_>) -> RecordsResult<Value>;
}

impl<F> Filter for F
where
    F: Fn(Value, &[Value], &mut Session<'_>) -> RecordsResult<Value> + Send + Sync,
{
    fn apply(&self, input: Value, args: &[Value], session: &mut Session<'_>) -> RecordsResult<Value> {
        self(input, args, session)
    }
}

/// Registry of filters keyed by name.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Registry with the built-in link, table, autofill and line filters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("render_links", Arc::new(render_links_filter));
        registry.register("render_table", Arc::new(render_table_filter));
        registry.register("special_autofill_table", Arc::new(special_autofill_filter));
        registry.register("split_lines", Arc::new(split_lines_filter));
        registry
    }

    /// Register `filter` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        let name = name.into();
        debug!("Registering filter: {}", name);
        self.filters.insert(name, filter);
    }

    /// Look up a filter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(name).cloned()
    }

    /// Whether a filter is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Registered filter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}

/// Markdown links for `paths`. With more than one path each link gets a
/// heading at `header_level` named after the file stem.
pub fn render_links(paths: &[PathBuf], header_level: usize) -> String {
    match paths {
        [] => String::new(),
        [path] => links::markdown_link(path),
        _ => {
            let header = "#".repeat(header_level);
            paths
                .iter()
                .map(|path| {
                    format!(
                        "{} {}\n{}",
                        header,
                        links::file_stem(path),
                        links::markdown_link(path)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

/// Render links and record the paths for export.
pub(crate) fn link_paths(paths: &[PathBuf], header_level: usize, session: &mut Session<'_>) -> String {
    for path in paths {
        session.reference(path);
    }
    render_links(paths, header_level)
}

pub fn render_table(table: &TableModel) -> String {
    table.to_markdown()
}

fn header_level_arg(args: &[Value], session: &Session<'_>) -> RecordsResult<usize> {
    match args.first() {
        None => Ok(session.header_level()),
        Some(Value::Count(level)) if (1..=6).contains(level) => Ok(*level),
        Some(other) => Err(RecordsError::Render(format!(
            "render_links header level must be 1-6, got {:?}",
            other
        ))),
    }
}

fn render_links_filter(
    input: Value,
    args: &[Value],
    session: &mut Session<'_>,
) -> RecordsResult<Value> {
    let level = header_level_arg(args, session)?;
    match input {
        Value::Paths(paths) => Ok(Value::Text(link_paths(&paths, level, session))),
        other => Err(wrong_input("render_links", "paths", &other)),
    }
}

fn render_table_filter(
    input: Value,
    _args: &[Value],
    _session: &mut Session<'_>,
) -> RecordsResult<Value> {
    match input {
        Value::Table(table) => Ok(Value::Text(render_table(&table))),
        other => Err(wrong_input("render_table", "table", &other)),
    }
}

/// `paths | special_autofill_table("key", more_paths...)`
fn special_autofill_filter(
    input: Value,
    args: &[Value],
    session: &mut Session<'_>,
) -> RecordsResult<Value> {
    let key = match args.first() {
        Some(Value::Text(key)) => key.clone(),
        _ => {
            return Err(RecordsError::Render(
                "special_autofill_table needs a table key argument".to_string(),
            ))
        }
    };

    let mut selections = Vec::with_capacity(args.len());
    for value in std::iter::once(&input).chain(&args[1..]) {
        match value {
            Value::Paths(paths) => selections.push(paths.clone()),
            other => return Err(wrong_input("special_autofill_table", "paths", other)),
        }
    }

    let model = session.autofill_with(&key, &selections)?;
    Ok(Value::Special(model))
}

fn split_lines_filter(
    input: Value,
    _args: &[Value],
    _session: &mut Session<'_>,
) -> RecordsResult<Value> {
    match input {
        Value::Text(text) => Ok(Value::Lines(text.lines().map(str::to_string).collect())),
        other => Err(wrong_input("split_lines", "text", &other)),
    }
}

fn wrong_input(filter: &str, expected: &str, got: &Value) -> RecordsError {
    RecordsError::Render(format!(
        "{} expects {}, got {}",
        filter,
        expected,
        got.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackRegistry;
    use crate::selector::ScriptedSelector;
    use crate::special::SpecialTableRegistry;
    use records_meta::ParserRegistry;

    #[test]
    fn test_render_links_headings() {
        let paths = vec![PathBuf::from("/a/first.png"), PathBuf::from("/a/notes.pdf")];
        assert_eq!(
            render_links(&paths, 5),
            "##### first\n![first](</a/first.png>)\n##### notes\n![[/a/notes.pdf]]"
        );
        assert_eq!(render_links(&paths[..1], 5), "![first](</a/first.png>)");
        assert_eq!(render_links(&[], 5), "");
    }

    #[test]
    fn test_filters_record_references() {
        let selector = ScriptedSelector::new();
        let callbacks = CallbackRegistry::new();
        let special = SpecialTableRegistry::with_defaults();
        let mut session = Session::new(
            "EX042",
            &selector,
            &callbacks,
            &special,
            ParserRegistry::with_defaults(),
        );
        let filters = FilterRegistry::with_defaults();

        let links = filters
            .get("render_links")
            .unwrap()
            .apply(
                Value::Paths(vec![PathBuf::from("/x.png"), PathBuf::from("/y.png")]),
                &[Value::Count(3)],
                &mut session,
            )
            .unwrap();

        assert_eq!(links.as_text().unwrap().lines().next(), Some("### x"));
        assert_eq!(session.references().len(), 2);
    }

    #[test]
    fn test_wrong_input_type() {
        let selector = ScriptedSelector::new();
        let callbacks = CallbackRegistry::new();
        let special = SpecialTableRegistry::new();
        let mut session =
            Session::new("EX042", &selector, &callbacks, &special, ParserRegistry::new());

        let result = FilterRegistry::with_defaults()
            .get("render_table")
            .unwrap()
            .apply(Value::Count(1), &[], &mut session);
        assert!(matches!(result, Err(RecordsError::Render(_))));

        let result = FilterRegistry::with_defaults()
            .get("render_links")
            .unwrap()
            .apply(Value::Paths(Vec::new()), &[Value::Count(9)], &mut session);
        assert!(matches!(result, Err(RecordsError::Render(_))));
    }

    #[test]
    fn test_default_names_sorted() {
        let registry = FilterRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec!["render_links", "render_table", "special_autofill_table", "split_lines"]
        );
        assert!(registry.contains("render_table"));
        assert!(!FilterRegistry::new().contains("render_table"));
    }

    #[test]
    fn test_split_lines() {
        let selector = ScriptedSelector::new();
        let callbacks = CallbackRegistry::new();
        let special = SpecialTableRegistry::new();
        let mut session =
            Session::new("EX042", &selector, &callbacks, &special, ParserRegistry::new());

        let value = FilterRegistry::with_defaults()
            .get("split_lines")
            .unwrap()
            .apply(Value::Text("a\nb".to_string()), &[], &mut session)
            .unwrap();
        assert_eq!(value, Value::Lines(vec!["a".to_string(), "b".to_string()]));
    }
}

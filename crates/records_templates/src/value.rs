//! Values flowing through filter chains and template locals.

use std::path::PathBuf;

use crate::special::SpecialTableModel;
use crate::tables::TableModel;

/// A resolved value inside a render pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Selected files, possibly none
    Paths(Vec<PathBuf>),
    /// Rendered or literal text
    Text(String),
    /// Text split into lines
    Lines(Vec<String>),
    Table(TableModel),
    Special(SpecialTableModel),
    /// Integer literal or loop index
    Count(usize),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Paths(_) => "paths",
            Value::Text(_) => "text",
            Value::Lines(_) => "lines",
            Value::Table(_) => "table",
            Value::Special(_) => "special table",
            Value::Count(_) => "count",
        }
    }

    /// Number of items a loop over this value runs for.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Paths(paths) => Some(paths.len()),
            Value::Lines(lines) => Some(lines.len()),
            Value::Special(model) => Some(model.units.len()),
            Value::Count(n) => Some(*n),
            Value::Text(_) | Value::Table(_) => None,
        }
    }

    /// Item `index` of an indexable value.
    ///
    /// `None` means the value cannot be indexed; `Some(None)` means the index
    /// is past the end.
    pub fn item(&self, index: usize) -> Option<Option<Value>> {
        match self {
            Value::Paths(paths) => Some(paths.get(index).map(|p| Value::Paths(vec![p.clone()]))),
            Value::Lines(lines) => Some(lines.get(index).cloned().map(Value::Text)),
            Value::Special(model) => Some(model.units.get(index).cloned().map(Value::Table)),
            Value::Text(_) | Value::Table(_) | Value::Count(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<usize> {
        match self {
            Value::Count(n) => Some(*n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_paths() {
        let value = Value::Paths(vec![PathBuf::from("/a.png"), PathBuf::from("/b.png")]);
        assert_eq!(value.len(), Some(2));
        assert_eq!(value.item(1), Some(Some(Value::Paths(vec![PathBuf::from("/b.png")]))));
        assert_eq!(value.item(2), Some(None));
        assert_eq!(Value::Text("x".into()).item(0), None);
    }
}

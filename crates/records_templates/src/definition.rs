//! Template definitions.
//!
//! A definition names the placeholders a template expects, grouped by kind.
//! The order of each list is significant: index *i* in the template source
//! refers to the *i*-th declared name of that kind.

use serde::{Deserialize, Serialize};

/// The five placeholder kinds a template can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    Documents,
    Files,
    Images,
    Tables,
    Special,
}

impl PlaceholderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderKind::Documents => "documents",
            PlaceholderKind::Files => "files",
            PlaceholderKind::Images => "images",
            PlaceholderKind::Tables => "tables",
            PlaceholderKind::Special => "special",
        }
    }

    /// Kind for a template target name such as `images`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "documents" => Some(PlaceholderKind::Documents),
            "files" => Some(PlaceholderKind::Files),
            "images" => Some(PlaceholderKind::Images),
            "tables" => Some(PlaceholderKind::Tables),
            "special" => Some(PlaceholderKind::Special),
            _ => None,
        }
    }

    pub fn all() -> [Self; 5] {
        [
            PlaceholderKind::Documents,
            PlaceholderKind::Files,
            PlaceholderKind::Images,
            PlaceholderKind::Tables,
            PlaceholderKind::Special,
        ]
    }
}

impl std::fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registry entry describing one template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TemplateDefinition {
    /// Unique template key; the source lives at `<templates_dir>/<key>.md`
    pub key: String,
    /// Documents to select (protocols, notes, ...)
    #[serde(default)]
    pub documents: Vec<String>,
    /// Other files to select (notebooks, analysis scripts, ...)
    #[serde(default)]
    pub files: Vec<String>,
    /// Images to select
    #[serde(default)]
    pub images: Vec<String>,
    /// Table keys, resolved against the table registry
    #[serde(default)]
    pub tables: Vec<String>,
    /// Special table keys, resolved against the special table registry
    #[serde(default)]
    pub special: Vec<String>,
}

impl TemplateDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_document(mut self, name: impl Into<String>) -> Self {
        self.documents.push(name.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>) -> Self {
        self.files.push(name.into());
        self
    }

    pub fn with_image(mut self, name: impl Into<String>) -> Self {
        self.images.push(name.into());
        self
    }

    pub fn with_table(mut self, key: impl Into<String>) -> Self {
        self.tables.push(key.into());
        self
    }

    pub fn with_special(mut self, key: impl Into<String>) -> Self {
        self.special.push(key.into());
        self
    }

    /// Declared names for a placeholder kind, in declaration order.
    pub fn names(&self, kind: PlaceholderKind) -> &[String] {
        match kind {
            PlaceholderKind::Documents => &self.documents,
            PlaceholderKind::Files => &self.files,
            PlaceholderKind::Images => &self.images,
            PlaceholderKind::Tables => &self.tables,
            PlaceholderKind::Special => &self.special,
        }
    }

    /// Total number of declared placeholders.
    pub fn placeholder_count(&self) -> usize {
        PlaceholderKind::all()
            .iter()
            .map(|kind| self.names(*kind).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_default_to_empty() {
        let definition: TemplateDefinition =
            serde_json::from_str(r#"{"key": "surgery", "tables": ["head-fixation"]}"#).unwrap();
        assert_eq!(definition.key, "surgery");
        assert!(definition.documents.is_empty());
        assert_eq!(definition.names(PlaceholderKind::Tables), ["head-fixation"]);
    }

    #[test]
    fn test_key_is_required() {
        let result: Result<TemplateDefinition, _> = serde_json::from_str(r#"{"documents": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in PlaceholderKind::all() {
            assert_eq!(PlaceholderKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(PlaceholderKind::from_name("notebooks"), None);
    }
}

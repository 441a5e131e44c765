//! # records_templates
//!
//! Template registry, placeholder resolution, rendering and export for lab
//! records.
//!
//! A template is a markdown source plus a registry entry declaring the
//! placeholders it expects (documents, files, images, tables and special
//! tables). Generating records for a subject resolves every placeholder,
//! renders the compiled template and exports the markdown together with
//! copies of every linked file.

pub mod callbacks;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod export;
pub mod filters;
pub mod generator;
pub mod links;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod selector;
pub mod session;
pub mod special;
pub mod tables;
pub mod value;

pub use callbacks::{Callback, CallbackRegistry, PromptFile};
pub use config::RecordsConfig;
pub use definition::{PlaceholderKind, TemplateDefinition};
pub use engine::RenderEngine;
pub use error::{ErrorKind, RecordsError, RecordsResult};
pub use export::{ExportPackager, ExportReport, ExportedFile};
pub use filters::{render_links, render_table, Filter, FilterRegistry};
pub use generator::{validate_subject, Records, RenderOutput};
pub use plan::ExpansionPlan;
pub use registry::TemplateRegistry;
pub use resolver::{BindingValue, Bindings, PlaceholderBinding, PlaceholderResolver};
pub use selector::{FileSelector, PromptSelector, ScriptedSelector, SelectionRequest};
pub use session::{Session, DEFAULT_HEADER_LEVEL};
pub use special::{MetadataCache, SpecialTable, SpecialTableModel, SpecialTableRegistry};
pub use tables::{TableBuilder, TableContext, TableModel, TableRegistry};
pub use value::Value;

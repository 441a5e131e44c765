//! # records_meta
//!
//! Instrument metadata parsers for lab records.
//!
//! Each parser is a pure function from a metadata file to a [`RecordSet`]:
//! scalar fields (objective, zoom, stage position, ...) plus an ordered list
//! of per-unit records (one per imaging plane). Parsers are looked up by
//! format through a [`ParserRegistry`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use records_meta::ParserRegistry;
//! use std::path::Path;
//!
//! let parsers = ParserRegistry::with_defaults();
//! let scan = parsers
//!     .get_required("prairieview")
//!     .unwrap()
//!     .parse(Path::new("TSeries-001.xml"))
//!     .unwrap();
//! println!("zoom: {}", scan.number("optical_zoom").unwrap());
//! ```

pub mod error;
pub mod parser;
pub mod planes;
pub mod prairieview;
pub mod record;

pub use error::{MetaError, MetaResult};
pub use parser::{MetadataParser, ParserRegistry};
pub use planes::{SlmPlaneParser, PLANE_FIELDS, SLM_PLANES_FORMAT};
pub use prairieview::{PrairieViewParser, PRAIRIEVIEW_FORMAT};
pub use record::{field_name, RecordSet, UnitRecord};

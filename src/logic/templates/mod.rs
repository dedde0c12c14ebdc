//! Templates Module
//!
//! - `extractor.rs` - tag-tolerant canonical field extraction
//! - `index.rs` - tax id keyed, read-only template index

pub mod extractor;
pub mod index;

pub use extractor::{extract_from_bytes, extract_from_file, CanonicalFields};
pub use index::{is_xml_path, DuplicatePolicy, DuplicateTemplate, Template, TemplateIndex};

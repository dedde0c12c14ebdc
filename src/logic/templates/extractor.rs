//! Canonical Field Extraction
//!
//! Tag-tolerant extraction of the four identifying fields from arbitrary,
//! possibly namespaced XML. Pure: the result depends only on the document
//! and the synonym tables below.

use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, ParsingOptions};
use serde::{Deserialize, Serialize};

/// Tax identifier synonyms (matched as lower-case substrings of the local tag name)
pub const TAX_ID_TAGS: &[&str] = &["mst", "taxcode", "masothue"];

/// Company name synonyms
pub const COMPANY_NAME_TAGS: &[&str] = &["tennnt", "companyname", "tendn"];

/// Document type synonyms
pub const DOCUMENT_TYPE_TAGS: &[&str] = &["loaitkhai", "loaitokhai", "documenttype", "loaihoso"];

/// Declaration period synonyms
///
/// GDT declarations carry `kieuKy` (the period kind, e.g. `Q`) ahead of
/// `kyKKhai`, so no entry may be a bare fragment like `ky`.
pub const PERIOD_TAGS: &[&str] = &["kykkhai", "kykhaithue", "taxperiod", "period"];

/// The four fields used for equality comparison
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalFields {
    pub tax_id: Option<String>,
    pub company_name: Option<String>,
    pub document_type: Option<String>,
    pub period: Option<String>,
}

impl CanonicalFields {
    /// Names of the fields whose values differ from `other`
    pub fn differing_fields(&self, other: &CanonicalFields) -> Vec<&'static str> {
        let mut diff = Vec::new();
        if self.tax_id != other.tax_id {
            diff.push("tax_id");
        }
        if self.company_name != other.company_name {
            diff.push("company_name");
        }
        if self.document_type != other.document_type {
            diff.push("document_type");
        }
        if self.period != other.period {
            diff.push("period");
        }
        diff
    }
}

/// XML parse errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed XML in {path}: {reason}")]
    MalformedXml { path: PathBuf, reason: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn parsing_options() -> ParsingOptions {
    ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    }
}

/// Extract canonical fields from a parsed document
pub fn extract(document: &Document) -> CanonicalFields {
    let mut fields = CanonicalFields::default();

    for node in document.descendants().filter(|n| n.is_element()) {
        let tag = node.tag_name().name().to_lowercase();
        let text = match node.text().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => continue,
        };

        fill_first(&mut fields.tax_id, &tag, text, TAX_ID_TAGS);
        fill_first(&mut fields.company_name, &tag, text, COMPANY_NAME_TAGS);
        fill_first(&mut fields.document_type, &tag, text, DOCUMENT_TYPE_TAGS);
        fill_first(&mut fields.period, &tag, text, PERIOD_TAGS);
    }

    fields
}

fn fill_first(slot: &mut Option<String>, tag: &str, text: &str, synonyms: &[&str]) {
    if slot.is_none() && synonyms.iter().any(|s| tag.contains(s)) {
        *slot = Some(text.to_string());
    }
}

/// Parse XML text and extract
pub fn extract_from_str(content: &str, origin: &Path) -> Result<CanonicalFields, ParseError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let document = Document::parse_with_options(content, parsing_options()).map_err(|e| {
        ParseError::MalformedXml {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    Ok(extract(&document))
}

/// Extract from raw bytes (must be UTF-8)
pub fn extract_from_bytes(bytes: &[u8], origin: &Path) -> Result<CanonicalFields, ParseError> {
    let content = std::str::from_utf8(bytes).map_err(|e| ParseError::MalformedXml {
        path: origin.to_path_buf(),
        reason: format!("not UTF-8: {}", e),
    })?;
    extract_from_str(content, origin)
}

/// Read a file and extract
pub fn extract_from_file(path: &Path) -> Result<CanonicalFields, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    extract_from_bytes(&bytes, path)
}

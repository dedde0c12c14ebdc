//! Template Index
//!
//! Canonical reference documents keyed by tax id. Built once, then read-only;
//! reloading produces a new index.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::extractor::{extract_from_bytes, CanonicalFields};

/// A canonical reference document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub fields: CanonicalFields,
    /// Exact bytes of the template file
    pub canonical_content: Vec<u8>,
    pub source_path: PathBuf,
}

impl Template {
    pub fn tax_id(&self) -> &str {
        self.fields.tax_id.as_deref().unwrap_or_default()
    }
}

/// What to do when two templates carry the same tax id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// First file in name order is kept; later ones are skipped with a warning
    #[default]
    KeepFirst,
    /// Loading fails
    Reject,
}

/// Template loading errors
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("cannot read template directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tax id {tax_id} defined by both {first} and {second}")]
    DuplicateTaxId {
        tax_id: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// A skipped duplicate (KeepFirst policy)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateTemplate {
    pub tax_id: String,
    pub kept: PathBuf,
    pub skipped: PathBuf,
}

/// Tax id -> template
#[derive(Debug, Default)]
pub struct TemplateIndex {
    templates: HashMap<String, Arc<Template>>,
    duplicates: Vec<DuplicateTemplate>,
    skipped: Vec<PathBuf>,
}

impl TemplateIndex {
    /// Load every `.xml` file in `directory` with the default duplicate policy
    #[cfg(test)]
    pub fn load(directory: &Path) -> Result<Self, TemplateError> {
        Self::load_with_policy(directory, DuplicatePolicy::default())
    }

    pub fn load_with_policy(directory: &Path, policy: DuplicatePolicy) -> Result<Self, TemplateError> {
        let dir_err = |source: std::io::Error| TemplateError::Directory {
            path: directory.to_path_buf(),
            source,
        };

        let mut files: Vec<PathBuf> = fs::read_dir(directory)
            .map_err(dir_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_xml_path(p))
            .collect();
        files.sort();

        let mut index = Self::default();
        for path in files {
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("Skipping template {}: {}", path.display(), e);
                    index.skipped.push(path);
                    continue;
                }
            };
            index.insert_bytes(path, bytes, policy)?;
        }

        if index.is_empty() {
            log::warn!("No XML templates found in {}", directory.display());
        } else {
            log::info!(
                "Loaded {} XML templates from {}",
                index.len(),
                directory.display()
            );
        }
        Ok(index)
    }

    /// Build from in-memory documents (name, content), in the given order
    #[cfg(test)]
    pub fn from_documents<I>(docs: I, policy: DuplicatePolicy) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (PathBuf, Vec<u8>)>,
    {
        let mut index = Self::default();
        for (path, bytes) in docs {
            index.insert_bytes(path, bytes, policy)?;
        }
        Ok(index)
    }

    fn insert_bytes(
        &mut self,
        path: PathBuf,
        bytes: Vec<u8>,
        policy: DuplicatePolicy,
    ) -> Result<(), TemplateError> {
        let fields = match extract_from_bytes(&bytes, &path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Skipping template: {}", e);
                self.skipped.push(path);
                return Ok(());
            }
        };

        let tax_id = match fields.tax_id.clone() {
            Some(id) => id,
            None => {
                log::warn!("Skipping template {}: no tax id found", path.display());
                self.skipped.push(path);
                return Ok(());
            }
        };

        if let Some(existing) = self.templates.get(&tax_id) {
            match policy {
                DuplicatePolicy::Reject => {
                    return Err(TemplateError::DuplicateTaxId {
                        tax_id,
                        first: existing.source_path.clone(),
                        second: path,
                    });
                }
                DuplicatePolicy::KeepFirst => {
                    log::warn!(
                        "Template {} duplicates tax id {} from {}; keeping the first",
                        path.display(),
                        tax_id,
                        existing.source_path.display()
                    );
                    self.duplicates.push(DuplicateTemplate {
                        tax_id,
                        kept: existing.source_path.clone(),
                        skipped: path,
                    });
                    return Ok(());
                }
            }
        }

        log::info!(
            "Template {} - MST: {}, company: {}, period: {}",
            path.display(),
            tax_id,
            fields.company_name.as_deref().unwrap_or("-"),
            fields.period.as_deref().unwrap_or("-")
        );

        self.templates.insert(
            tax_id,
            Arc::new(Template {
                fields,
                canonical_content: bytes,
                source_path: path,
            }),
        );
        Ok(())
    }

    /// Exact tax id lookup
    pub fn lookup(&self, tax_id: &str) -> Option<Arc<Template>> {
        self.templates.get(tax_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates sorted by tax id
    pub fn templates(&self) -> Vec<Arc<Template>> {
        let mut list: Vec<_> = self.templates.values().cloned().collect();
        list.sort_by(|a, b| a.tax_id().cmp(b.tax_id()));
        list
    }

    pub fn duplicates(&self) -> &[DuplicateTemplate] {
        &self.duplicates
    }

    /// Files that were not usable as templates
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }
}

/// `.xml` extension, any case
pub fn is_xml_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(tax_id: &str, name: &str, doc_type: &str, period: &str) -> String {
        format!(
            "<Decl><mst>{}</mst><tenNNT>{}</tenNNT><LoaiToKhai>{}</LoaiToKhai><KyKhaiThue>{}</KyKhaiThue></Decl>",
            tax_id, name, doc_type, period
        )
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xml"), doc("0123456789", "ABC", "Decl01", "2025Q1")).unwrap();
        fs::write(dir.path().join("b.XML"), doc("0987654321", "XYZ", "Decl01", "2025Q1")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::write(dir.path().join("no_mst.xml"), "<doc><name>n</name></doc>").unwrap();
        fs::write(dir.path().join("broken.xml"), "<doc>").unwrap();

        let index = TemplateIndex::load(dir.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.skipped().len(), 2);

        let t = index.lookup("0123456789").unwrap();
        assert_eq!(t.fields.company_name.as_deref(), Some("ABC"));
        assert_eq!(
            t.canonical_content,
            doc("0123456789", "ABC", "Decl01", "2025Q1").into_bytes()
        );
        assert!(index.lookup("012345678").is_none());
    }

    #[test]
    fn test_empty_directory_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let index = TemplateIndex::load(dir.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TemplateIndex::load(&dir.path().join("nope"));
        assert!(matches!(result, Err(TemplateError::Directory { .. })));
    }

    #[test]
    fn test_duplicate_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_q1.xml"), doc("0123456789", "ABC", "Decl01", "2025Q1")).unwrap();
        fs::write(dir.path().join("2_q2.xml"), doc("0123456789", "ABC", "Decl01", "2025Q2")).unwrap();

        let index = TemplateIndex::load(dir.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.lookup("0123456789").unwrap().fields.period.as_deref(),
            Some("2025Q1")
        );
        assert_eq!(index.duplicates().len(), 1);
        assert!(index.duplicates()[0].skipped.ends_with("2_q2.xml"));
    }

    #[test]
    fn test_duplicate_reject() {
        let result = TemplateIndex::from_documents(
            vec![
                (PathBuf::from("a.xml"), doc("1", "A", "D", "P").into_bytes()),
                (PathBuf::from("b.xml"), doc("1", "A", "D", "Q").into_bytes()),
            ],
            DuplicatePolicy::Reject,
        );
        assert!(matches!(result, Err(TemplateError::DuplicateTaxId { .. })));
    }

    #[test]
    fn test_is_xml_path() {
        assert!(is_xml_path(Path::new("a.xml")));
        assert!(is_xml_path(Path::new("A.XmL")));
        assert!(!is_xml_path(Path::new("a.xml.backup.1700000000")));
        assert!(!is_xml_path(Path::new("xml")));
    }
}

//! Document materialization: the origin fetcher boundary and the local
//! document store.
//!
//! A document is identified by a URL and materialized to local storage
//! exactly once; the store is a plain file-existence-and-write facade over
//! a document directory, keyed by a file name derived deterministically
//! from the URL so the same URL always maps to the same local file.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod fetch;

pub use fetch::{FetchError, HttpFetcher, OriginFetcher};

const FALLBACK_FILE_NAME: &str = "document.pdf";

/// Derive the stable local file name for a document URL.
///
/// Uses the last path segment of the URL with any query string or fragment
/// stripped. URLs without a usable path segment fall back to a fixed name.
/// Same URL in, same name out, across runs.
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme =
        without_query.split_once("://").map_or(without_query, |(_, rest)| rest);

    match without_scheme.split_once('/') {
        Some((_, path)) => {
            let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
            if name.is_empty() {
                FALLBACK_FILE_NAME.to_owned()
            } else {
                name.to_owned()
            }
        }
        None => FALLBACK_FILE_NAME.to_owned(),
    }
}

/// A multi-page source document, identified by URL.
///
/// `local_path` is set once per session, after the document has been
/// downloaded or found already materialized in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub display_name: String,
    pub source_url: String,
    pub source_file_name: String,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl Document {
    /// Create a document entry for a URL, deriving its stable file name.
    pub fn from_url(display_name: impl Into<String>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let source_file_name = file_name_from_url(&source_url);

        Self {
            display_name: display_name.into(),
            source_url,
            source_file_name,
            local_path: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("document '{name}' already exists")]
    AlreadyExists { name: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local document directory.
///
/// `save` refuses to overwrite an existing file; callers are expected to
/// check `exists` first and skip the download entirely on a hit.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn from_default_project() -> Result<Self, StoreError> {
        let dirs = ProjectDirs::from("dev", "Paperflow", "Paperflow")
            .ok_or(StoreError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().join("documents") })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a materialized document, or `None` if it has not been
    /// downloaded yet.
    pub fn exists(&self, name: &str) -> Option<PathBuf> {
        let path = self.root.join(name);
        path.is_file().then_some(path)
    }

    /// Persist downloaded document bytes under their derived name.
    ///
    /// The write is not atomic; a failed download-and-save leaves whatever
    /// partial file resulted (see DESIGN.md).
    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.root)?;

        let path = self.root.join(name);
        if path.exists() {
            return Err(StoreError::AlreadyExists { name: name.to_owned() });
        }

        fs::write(&path, bytes)?;
        tracing::debug!(name, bytes = bytes.len(), "document materialized");

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_last_path_segment() {
        assert_eq!(
            file_name_from_url("https://example.com/docs/manual.pdf"),
            "manual.pdf"
        );
        assert_eq!(
            file_name_from_url("https://example.com/a/b/c/report.pdf?version=2#page=3"),
            "report.pdf"
        );
    }

    #[test]
    fn file_name_is_stable_across_calls() {
        let url = "https://example.com/files/18K.pdf";
        assert_eq!(file_name_from_url(url), file_name_from_url(url));
    }

    #[test]
    fn file_name_falls_back_without_path() {
        assert_eq!(file_name_from_url("https://example.com"), FALLBACK_FILE_NAME);
        assert_eq!(file_name_from_url("https://example.com/"), FALLBACK_FILE_NAME);
    }

    #[test]
    fn document_from_url_derives_file_name() {
        let doc = Document::from_url("BOE", "https://example.com/pdfs/BOE.pdf");

        assert_eq!(doc.source_file_name, "BOE.pdf");
        assert!(doc.local_path.is_none());
    }

    #[test]
    fn save_then_exists_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = DocumentStore::with_root(temp.path());

        assert!(store.exists("doc.pdf").is_none());

        let path = store.save("doc.pdf", b"%PDF-1.5").expect("save should succeed");
        assert_eq!(store.exists("doc.pdf"), Some(path.clone()));
        assert_eq!(fs::read(path).expect("read should succeed"), b"%PDF-1.5");
    }

    #[test]
    fn save_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = DocumentStore::with_root(temp.path());

        store.save("doc.pdf", b"first").expect("save should succeed");
        let err = store.save("doc.pdf", b"second").expect_err("second save should fail");

        assert!(matches!(err, StoreError::AlreadyExists { name } if name == "doc.pdf"));

        let path = store.exists("doc.pdf").expect("document should exist");
        assert_eq!(fs::read(path).expect("read should succeed"), b"first");
    }
}

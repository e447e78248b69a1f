//! Path and identity primitives.
//!
//! Every chunk is addressed by a materialized [`HierarchyPath`]: an ordered
//! sequence of ASCII-safe labels starting at the sentinel `root`. The path
//! doubles as a storage key, so labels are constrained to `[a-z0-9_]`.
//! Non-ASCII section titles (the normal case for Traditional Chinese
//! statutes) are substituted with a deterministic digest token; the raw
//! title is kept in chunk metadata so display never decodes the path.
//!
//! Identity follows the same rule: document ids are digest-sanitized
//! filenames, chunk ids are digests of `(document_id, path)` and therefore
//! stable across reindexing of unchanged sources.

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

/// Sentinel first label of every path.
pub const ROOT_LABEL: &str = "root";

/// Maximum length of a document id, matching common identifier limits in
/// backing stores.
pub const MAX_DOCUMENT_ID_LEN: usize = 63;

/// An ordered sequence of ASCII-safe labels addressing one node of a
/// document tree. The first label is always [`ROOT_LABEL`]; depth equals
/// label count minus one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchyPath {
    labels: Vec<String>,
}

impl HierarchyPath {
    /// The document-root path (`root`, depth 0).
    pub fn root() -> Self {
        Self {
            labels: vec![ROOT_LABEL.to_string()],
        }
    }

    /// Builds a path from raw (possibly non-ASCII) labels below the root.
    /// The resulting label count is `raw_labels.len() + 1`.
    pub fn from_raw_labels<S: AsRef<str>>(raw_labels: &[S]) -> Self {
        let mut path = Self::root();
        for raw in raw_labels {
            path = path.child(raw.as_ref());
        }
        path
    }

    /// Returns the child path obtained by sanitizing and appending one label.
    pub fn child(&self, raw_label: &str) -> Self {
        let mut labels = self.labels.clone();
        labels.push(sanitize_label(raw_label));
        Self { labels }
    }

    /// Appends an already-sanitized label. The caller guarantees the label
    /// is ASCII-safe (used for sibling disambiguation suffixes).
    pub fn child_sanitized(&self, label: String) -> Self {
        let mut labels = self.labels.clone();
        labels.push(label);
        Self { labels }
    }

    /// Parses a dot-joined path string as stored in the `chunks` table.
    pub fn parse(s: &str) -> Result<Self> {
        let labels: Vec<String> = s.split('.').map(|l| l.to_string()).collect();
        if labels.is_empty() || labels[0] != ROOT_LABEL {
            return Err(RagError::InvariantViolation(format!(
                "path does not start at {}: {}",
                ROOT_LABEL, s
            )));
        }
        for label in &labels {
            if label.is_empty() || !label.bytes().all(is_safe_byte) {
                return Err(RagError::InvariantViolation(format!(
                    "path label {:?} is not storage-safe in {}",
                    label, s
                )));
            }
        }
        Ok(Self { labels })
    }

    /// Number of labels including the root sentinel.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Depth of the addressed node: 0 for the document root.
    pub fn depth(&self) -> usize {
        self.labels.len() - 1
    }

    /// Last label of the path.
    pub fn leaf_label(&self) -> &str {
        self.labels.last().map(String::as_str).unwrap_or(ROOT_LABEL)
    }

    /// The parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.labels.len() <= 1 {
            return None;
        }
        Some(Self {
            labels: self.labels[..self.labels.len() - 1].to_vec(),
        })
    }

    /// Strict ancestry test: `self` is a proper prefix of `other`.
    pub fn is_ancestor_of(&self, other: &HierarchyPath) -> bool {
        other.labels.len() > self.labels.len()
            && other.labels[..self.labels.len()] == self.labels[..]
    }

    /// Strict descendant test, the inverse of [`is_ancestor_of`].
    ///
    /// [`is_ancestor_of`]: HierarchyPath::is_ancestor_of
    pub fn is_descendant_of(&self, other: &HierarchyPath) -> bool {
        other.is_ancestor_of(self)
    }
}

impl std::fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.labels.join("."))
    }
}

/// Whether a byte is allowed in a storage-safe label.
fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'
}

/// Turns an arbitrary label into a storage-safe one.
///
/// ASCII labels are lowercased with every other character replaced by `_`.
/// Labels with any non-ASCII character are replaced wholesale by
/// `seg_` plus the first 8 hex digits of a digest of the UTF-8 bytes, so
/// two titles differing only in encoding collide deterministically.
pub fn sanitize_label(raw: &str) -> String {
    if raw.is_empty() {
        return "empty".to_string();
    }
    if raw.is_ascii() {
        let sanitized: String = raw
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.chars().all(|c| c == '_') {
            "empty".to_string()
        } else {
            sanitized
        }
    } else {
        format!("seg_{}", short_digest(raw))
    }
}

/// First 8 hex digits of a SHA-256 digest.
fn short_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..8].to_string()
}

/// Derives a stable document id from a source filename: extension stripped,
/// labels sanitized by the path rules, truncated to [`MAX_DOCUMENT_ID_LEN`].
pub fn document_id_from_filename(filename: &str) -> Result<String> {
    let name = filename.trim();
    if name.is_empty() {
        return Err(RagError::InvalidInput(
            "cannot derive a document id from an empty filename".to_string(),
        ));
    }
    let stem = match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    };
    let mut id = sanitize_label(stem);
    id.truncate(MAX_DOCUMENT_ID_LEN);
    Ok(id)
}

/// Deterministic chunk id: SHA-256 hex digest of `document_id | path`.
/// Stable across reindex as long as the chunk keeps its position.
pub fn chunk_id_for(document_id: &str, path: &HierarchyPath) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"|");
    hasher.update(path.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

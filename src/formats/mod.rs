// Format handlers
//
// Every supported file type is reduced to the same flat projection:
// - KeyPath: ordered path segments identifying one leaf string
// - DocumentProjection: ordered key -> string view plus the original text
// - FormatHandler: parse / render / in-place patch contract used by the merge engine

pub mod android_xml;
pub mod json;
pub mod po;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::config::Config;
use crate::error::{AlgebrasError, Result};

/// Position of a leaf string inside a hierarchical document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Build from dot notation, `user.profile.title`.
    pub fn from_dotted(dotted: &str) -> Self {
        Self::new(dotted.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Which side of a translation pair a document is read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentRole {
    Source,
    Target,
}

/// Handler-owned view of the original document, enough to patch it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureHandle {
    raw: Option<String>,
}

impl StructureHandle {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { raw: Some(text.into()) }
    }

    pub fn absent() -> Self {
        Self { raw: None }
    }

    pub fn text(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.raw.is_some()
    }
}

/// Ordered key -> string view of a document.
#[derive(Debug, Clone, Default)]
pub struct DocumentProjection {
    entries: Vec<(KeyPath, String)>,
    index: HashMap<KeyPath, usize>,
    pub structure: StructureHandle,
}

impl DocumentProjection {
    pub fn new(structure: StructureHandle) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            structure,
        }
    }

    /// Projection of a document that does not exist yet.
    pub fn empty() -> Self {
        Self::new(StructureHandle::absent())
    }

    /// Insert or overwrite; the first insertion fixes the key's position.
    pub fn insert(&mut self, key: KeyPath, value: impl Into<String>) {
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &KeyPath) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains(&self, key: &KeyPath) -> bool {
        self.index.contains_key(key)
    }

    pub fn entries(&self) -> &[(KeyPath, String)] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyPath> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DocumentProjection {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut projection = DocumentProjection::empty();
        for (key, value) in iter {
            projection.insert(KeyPath::from_dotted(&key.into()), value);
        }
        projection
    }
}

/// Result of patching an existing document.
#[derive(Debug, Clone)]
pub struct PatchedDocument {
    pub content: String,
    /// Keys with no position in the original document, appended at the end
    pub appended: Vec<KeyPath>,
}

/// Contract between the translation core and a concrete file format.
pub trait FormatHandler: Send + Sync {
    /// Short format name for logs
    fn name(&self) -> &'static str;

    /// Whether `patch` can update a document without rewriting untouched content
    fn supports_in_place_merge(&self) -> bool;

    /// Project document text into key -> string pairs
    fn parse(&self, content: &str, role: DocumentRole) -> Result<DocumentProjection>;

    /// Build a complete document from scratch
    fn render(&self, entries: &[(KeyPath, String)]) -> Result<String>;

    /// Apply `updates` to the original document, leaving everything else byte-identical
    fn patch(&self, structure: &StructureHandle, updates: &[(KeyPath, String)]) -> Result<PatchedDocument> {
        let _ = (structure, updates);
        Err(AlgebrasError::UnsupportedFormat(format!(
            "{} documents cannot be updated in place",
            self.name()
        )))
    }

    /// Read and project a file; a missing file projects to an empty document.
    fn project(&self, path: &Path, role: DocumentRole) -> Result<DocumentProjection> {
        if !path.exists() {
            debug!("{} does not exist yet, using empty projection", path.display());
            return Ok(DocumentProjection::empty());
        }
        let content = std::fs::read_to_string(path)?;
        self.parse(&content, role).map_err(|e| match e {
            AlgebrasError::Format { format, message, .. } => {
                AlgebrasError::format(format, path.display().to_string(), message)
            }
            other => other,
        })
    }

    /// Write a whole document atomically, creating parent directories.
    fn write(&self, path: &Path, content: &str) -> Result<()> {
        write_atomically(path, content)
    }
}

/// Replace `path` with `content` through a sibling temp file so readers never see a partial write.
pub fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    std::io::Write::write_all(&mut temp, content.as_bytes())?;
    temp.persist(path).map_err(|e| AlgebrasError::Io(e.error))?;
    Ok(())
}

/// File extensions with a registered handler.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["json", "xml", "po"];

/// Factory for format handlers
pub struct FormatRegistry;

impl FormatRegistry {
    /// Choose a handler by file extension.
    pub fn handler_for(path: &Path, config: &Config) -> Result<Box<dyn FormatHandler>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "json" => Ok(Box::new(json::JsonHandler::new())),
            "xml" => Ok(Box::new(android_xml::AndroidXmlHandler::new(
                config.api.normalize_strings,
            ))),
            "po" => Ok(Box::new(po::PoHandler::new())),
            _ => Err(AlgebrasError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_keeps_first_insertion_order() {
        let mut projection = DocumentProjection::empty();
        projection.insert(KeyPath::from_dotted("b"), "1");
        projection.insert(KeyPath::from_dotted("a"), "2");
        projection.insert(KeyPath::from_dotted("b"), "3");

        let keys: Vec<String> = projection.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(projection.get(&KeyPath::from_dotted("b")), Some("3"));
    }

    #[test]
    fn test_registry_by_extension() {
        let config = Config::default();
        assert_eq!(FormatRegistry::handler_for(Path::new("a/strings.xml"), &config).unwrap().name(), "android-xml");
        assert_eq!(FormatRegistry::handler_for(Path::new("fr.json"), &config).unwrap().name(), "json");
        assert_eq!(FormatRegistry::handler_for(Path::new("messages.PO"), &config).unwrap().name(), "po");
        assert!(FormatRegistry::handler_for(Path::new("strings.csv"), &config).is_err());
    }

    #[test]
    fn test_missing_file_projects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let handler = json::JsonHandler::new();
        let projection = handler.project(&dir.path().join("nope.json"), DocumentRole::Target).unwrap();
        assert!(projection.is_empty());
        assert!(!projection.structure.exists());
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values-fr").join("strings.xml");
        write_atomically(&path, "<resources/>\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<resources/>\n");
    }
}

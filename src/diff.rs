//! Decide which keys of a target document need (re)translation.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{AlgebrasError, Result};
use crate::formats::{write_atomically, DocumentProjection, KeyPath};

/// Ledger of source hashes, relative to the project root.
pub const LEDGER_FILE: &str = ".algebras/state.json";

/// A key that needs a translation, with the target text it would replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub key: KeyPath,
    pub source_text: String,
    pub existing_target_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Only missing and stale keys
    #[default]
    Incremental,
    /// Every key with source content
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub mode: DiffMode,
    pub only_missing: bool,
    pub preserve_on_empty_source: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            mode: DiffMode::Incremental,
            only_missing: false,
            preserve_on_empty_source: true,
        }
    }
}

/// Last-modified instants of one key in the source and target files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyModification {
    pub source: Option<DateTime<FixedOffset>>,
    pub target: Option<DateTime<FixedOffset>>,
}

/// Optional evidence used to detect stale translations.
#[derive(Debug, Clone, Default)]
pub struct DiffContext {
    /// Hash of the source text at the time each key was last translated, by [`ledger_key`]
    pub recorded_hashes: Option<HashMap<String, String>>,
    pub modifications: Option<HashMap<KeyPath, KeyModification>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub missing: Vec<KeyPath>,
    pub stale: Vec<KeyPath>,
    pub skip: Vec<KeyPath>,
    /// Values settled without translation (empty source strings)
    pub resolved: Vec<(KeyPath, String)>,
}

impl Diff {
    /// Keys to send for translation, missing first.
    pub fn pending(&self) -> impl Iterator<Item = &KeyPath> {
        self.missing.iter().chain(self.stale.iter())
    }

    pub fn pending_count(&self) -> usize {
        self.missing.len() + self.stale.len()
    }

    /// Build translation units for the pending keys.
    pub fn units(&self, source: &DocumentProjection, target: &DocumentProjection) -> Vec<TranslationUnit> {
        self.pending()
            .filter_map(|key| {
                source.get(key).map(|text| TranslationUnit {
                    key: key.clone(),
                    source_text: text.to_string(),
                    existing_target_text: target.get(key).map(str::to_string),
                })
            })
            .collect()
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Ledger form of a key: its segments as a JSON array, so `["a.b"]` and `["a", "b"]` stay apart.
pub fn ledger_key(key: &KeyPath) -> String {
    serde_json::Value::from(key.segments().to_vec()).to_string()
}

/// Hash recorded per key to notice source edits between runs.
pub fn source_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Classify every source key as missing, stale or skipped.
///
/// Each source key lands in exactly one of the three sets; target-only keys are ignored.
pub fn compute_diff(
    source: &DocumentProjection,
    target: &DocumentProjection,
    options: &DiffOptions,
    context: &DiffContext,
) -> Diff {
    let mut diff = Diff::default();

    for (key, source_text) in source.entries() {
        let target_text = target.get(key);

        if is_blank(source_text) {
            match target_text {
                None => {
                    diff.resolved.push((key.clone(), source_text.clone()));
                    diff.skip.push(key.clone());
                }
                Some(existing) if is_blank(existing) => diff.skip.push(key.clone()),
                Some(_) if options.preserve_on_empty_source => diff.skip.push(key.clone()),
                Some(_) => {
                    diff.resolved.push((key.clone(), source_text.clone()));
                    diff.skip.push(key.clone());
                }
            }
            continue;
        }

        if target_text.is_none_or(|text| is_blank(text)) {
            diff.missing.push(key.clone());
            continue;
        }

        if options.only_missing {
            diff.skip.push(key.clone());
            continue;
        }

        if options.mode == DiffMode::Full || is_stale(key, source_text, context) {
            diff.stale.push(key.clone());
        } else {
            diff.skip.push(key.clone());
        }
    }

    debug!(
        missing = diff.missing.len(),
        stale = diff.stale.len(),
        skip = diff.skip.len(),
        "Computed diff"
    );
    diff
}

fn is_stale(key: &KeyPath, source_text: &str, context: &DiffContext) -> bool {
    if let Some(modification) = context.modifications.as_ref().and_then(|m| m.get(key)) {
        if let (Some(source), Some(target)) = (modification.source, modification.target) {
            if source > target {
                return true;
            }
        }
    }

    context
        .recorded_hashes
        .as_ref()
        .and_then(|hashes| hashes.get(&ledger_key(key)))
        .is_some_and(|recorded| *recorded != source_hash(source_text))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    /// target file -> key -> source hash
    targets: BTreeMap<String, BTreeMap<String, String>>,
}

/// Persistent record of which source text each target key was translated from.
#[derive(Debug)]
pub struct SourceHashLedger {
    path: PathBuf,
    data: LedgerFile,
    dirty: bool,
}

impl SourceHashLedger {
    /// Load the ledger; missing or unreadable files start empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                LedgerFile::default()
            }),
            Err(_) => LedgerFile::default(),
        };
        Self {
            path,
            data,
            dirty: false,
        }
    }

    fn target_id(target: &Path) -> String {
        target.to_string_lossy().replace('\\', "/")
    }

    /// Hashes recorded for `target`, if it was ever translated.
    pub fn hashes_for(&self, target: &Path) -> Option<HashMap<String, String>> {
        self.data
            .targets
            .get(&Self::target_id(target))
            .map(|keys| keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Record the current source hash for each key.
    pub fn record<'a>(&mut self, target: &Path, entries: impl IntoIterator<Item = (&'a KeyPath, &'a str)>) {
        let keys = self.data.targets.entry(Self::target_id(target)).or_default();
        for (key, text) in entries {
            let hash = source_hash(text);
            let id = ledger_key(key);
            if keys.get(&id) != Some(&hash) {
                keys.insert(id, hash);
                self.dirty = true;
            }
        }
    }

    /// Record hashes only for keys with no history, so the next run can detect edits.
    pub fn record_baseline<'a>(&mut self, target: &Path, entries: impl IntoIterator<Item = (&'a KeyPath, &'a str)>) {
        let keys = self.data.targets.entry(Self::target_id(target)).or_default();
        for (key, text) in entries {
            let id = ledger_key(key);
            if !keys.contains_key(&id) {
                keys.insert(id, source_hash(text));
                self.dirty = true;
            }
        }
    }

    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let content = serde_json::to_string_pretty(&self.data)
            .map_err(|e| AlgebrasError::Config(format!("Failed to serialize state: {}", e)))?;
        write_atomically(&self.path, &content)?;
        self.dirty = false;
        Ok(())
    }
}

//! Merge translated values into a target document.

use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Result;
use crate::formats::{DocumentProjection, FormatHandler, KeyPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Patch the existing document, touching only updated entries
    InPlace,
    /// Rebuild the document from the merged key set
    Regenerate,
}

/// Conditions worth reporting that do not stop the merge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeIssue {
    #[error("{format} files cannot be updated in place; regenerating the whole file")]
    FormatUnsupportedForInPlace { format: &'static str },

    #[error("key {key} has no position in the target document; appended at the end")]
    MergeKeyUnlocatable { key: KeyPath },

    #[error("in-place update failed ({reason}); regenerating the whole file")]
    PatchFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub content: String,
    pub mode_used: MergeMode,
    pub issues: Vec<MergeIssue>,
    /// False when the document would be unchanged; callers skip the write
    pub changed: bool,
}

/// Merge `translated` into `target`.
///
/// `source_order` fixes the key order of regenerated documents; keys present only in
/// the target follow in their original order.
pub fn merge(
    handler: &dyn FormatHandler,
    target: &DocumentProjection,
    translated: &BTreeMap<KeyPath, String>,
    requested: MergeMode,
    source_order: &[KeyPath],
) -> Result<MergeOutput> {
    let changed = translated
        .iter()
        .any(|(key, value)| target.get(key) != Some(value.as_str()));
    let target_exists = target.structure.exists();

    if !changed && target_exists {
        return Ok(MergeOutput {
            content: target.structure.text().unwrap_or_default().to_string(),
            mode_used: requested,
            issues: Vec::new(),
            changed: false,
        });
    }

    let mut issues = Vec::new();
    if requested == MergeMode::InPlace && target_exists {
        if handler.supports_in_place_merge() {
            match patch_in_place(handler, target, translated) {
                Ok((content, mut patch_issues)) => {
                    issues.append(&mut patch_issues);
                    return Ok(MergeOutput {
                        content,
                        mode_used: MergeMode::InPlace,
                        issues,
                        changed: true,
                    });
                }
                Err(e) => {
                    let issue = MergeIssue::PatchFailed { reason: e.to_string() };
                    warn!("{}", issue);
                    issues.push(issue);
                }
            }
        } else {
            let issue = MergeIssue::FormatUnsupportedForInPlace { format: handler.name() };
            debug!("{}", issue);
            issues.push(issue);
        }
    }

    let entries = merged_entries(target, translated, source_order);
    Ok(MergeOutput {
        content: handler.render(&entries)?,
        mode_used: MergeMode::Regenerate,
        issues,
        changed: true,
    })
}

fn patch_in_place(
    handler: &dyn FormatHandler,
    target: &DocumentProjection,
    translated: &BTreeMap<KeyPath, String>,
) -> Result<(String, Vec<MergeIssue>)> {
    let updates: Vec<(KeyPath, String)> = translated
        .iter()
        .filter(|(key, value)| target.get(key) != Some(value.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let patched = handler.patch(&target.structure, &updates)?;
    let issues = patched
        .appended
        .into_iter()
        .filter(|key| target.contains(key))
        .map(|key| {
            let issue = MergeIssue::MergeKeyUnlocatable { key };
            warn!("{}", issue);
            issue
        })
        .collect();
    Ok((patched.content, issues))
}

/// Target values overlaid with translations, in source order then target-only order.
fn merged_entries(
    target: &DocumentProjection,
    translated: &BTreeMap<KeyPath, String>,
    source_order: &[KeyPath],
) -> Vec<(KeyPath, String)> {
    let mut entries = Vec::with_capacity(source_order.len() + target.len());
    let mut seen = HashSet::new();

    for key in source_order {
        let value = translated.get(key).map(String::as_str).or_else(|| target.get(key));
        if let Some(value) = value {
            if seen.insert(key.clone()) {
                entries.push((key.clone(), value.to_string()));
            }
        }
    }
    for (key, value) in target.entries() {
        if seen.insert(key.clone()) {
            let value = translated.get(key).unwrap_or(value);
            entries.push((key.clone(), value.clone()));
        }
    }
    for (key, value) in translated {
        if seen.insert(key.clone()) {
            entries.push((key.clone(), value.clone()));
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::android_xml::AndroidXmlHandler;
    use crate::formats::json::JsonHandler;
    use crate::formats::DocumentRole;

    fn translated(pairs: &[(&str, &str)]) -> BTreeMap<KeyPath, String> {
        pairs
            .iter()
            .map(|(k, v)| (KeyPath::from_dotted(k), v.to_string()))
            .collect()
    }

    fn order(keys: &[&str]) -> Vec<KeyPath> {
        keys.iter().map(|k| KeyPath::from_dotted(k)).collect()
    }

    #[test]
    fn test_json_falls_back_to_regenerate() {
        let handler = JsonHandler::new();
        let target = handler
            .parse("{\"extra\": \"Garde\", \"greeting\": \"Salut\"}", DocumentRole::Target)
            .unwrap();

        let output = merge(
            &handler,
            &target,
            &translated(&[("greeting", "Bonjour"), ("farewell", "Au revoir")]),
            MergeMode::InPlace,
            &order(&["greeting", "farewell"]),
        )
        .unwrap();

        assert_eq!(output.mode_used, MergeMode::Regenerate);
        assert_eq!(output.issues, vec![MergeIssue::FormatUnsupportedForInPlace { format: "json" }]);
        assert_eq!(
            output.content,
            "{\n  \"greeting\": \"Bonjour\",\n  \"farewell\": \"Au revoir\",\n  \"extra\": \"Garde\"\n}\n"
        );
    }

    #[test]
    fn test_unchanged_values_are_not_rewritten() {
        let handler = JsonHandler::new();
        let original = "{\"greeting\":   \"Bonjour\"}";
        let target = handler.parse(original, DocumentRole::Target).unwrap();

        let output = merge(
            &handler,
            &target,
            &translated(&[("greeting", "Bonjour")]),
            MergeMode::Regenerate,
            &order(&["greeting"]),
        )
        .unwrap();
        assert!(!output.changed);
        assert_eq!(output.content, original);
    }

    #[test]
    fn test_missing_target_is_regenerated_silently() {
        let handler = AndroidXmlHandler::new(true);
        let output = merge(
            &handler,
            &DocumentProjection::empty(),
            &translated(&[("title", "Titre")]),
            MergeMode::InPlace,
            &order(&["title"]),
        )
        .unwrap();

        assert!(output.changed);
        assert_eq!(output.mode_used, MergeMode::Regenerate);
        assert!(output.issues.is_empty());
        assert!(output.content.contains("<string name=\"title\">Titre</string>"));
    }

    #[test]
    fn test_android_in_place_merge() {
        let handler = AndroidXmlHandler::new(true);
        let original = "<resources>\n    <!-- keep -->\n    <string name=\"a\">Ancien</string>\n</resources>\n";
        let target = handler.parse(original, DocumentRole::Target).unwrap();

        let output = merge(
            &handler,
            &target,
            &translated(&[("a", "Nouveau"), ("b", "Ajouté")]),
            MergeMode::InPlace,
            &order(&["a", "b"]),
        )
        .unwrap();

        assert_eq!(output.mode_used, MergeMode::InPlace);
        assert!(output.issues.is_empty());
        assert_eq!(
            output.content,
            "<resources>\n    <!-- keep -->\n    <string name=\"a\">Nouveau</string>\n    <string name=\"b\">Ajouté</string>\n</resources>\n"
        );
    }
}

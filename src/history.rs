use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::diff::KeyModification;
use crate::formats::KeyPath;

/// Source of per-key last-modification instants.
#[async_trait]
pub trait ModificationSource: Send + Sync {
    async fn last_modified(&self, path: &Path, key: &KeyPath) -> Option<DateTime<FixedOffset>>;
}

/// Reads modification instants from the git history of the working tree.
pub struct GitHistory {
    available: bool,
}

impl GitHistory {
    /// Look for git and a work tree rooted at or above `dir`.
    pub async fn detect(dir: &Path) -> Self {
        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--is-inside-work-tree")
            .current_dir(dir)
            .output()
            .await;

        let available = matches!(&output, Ok(out) if out.status.success()
            && String::from_utf8_lossy(&out.stdout).trim() == "true");
        if available {
            info!("Using git history to detect outdated translations");
        } else {
            debug!("git history unavailable in {}", dir.display());
        }
        Self { available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn split(path: &Path) -> (PathBuf, PathBuf) {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file = path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf());
        (dir, file)
    }

    /// Author date of the newest commit matched by `extra` args, touching `path`.
    async fn git_date(path: &Path, extra: &[String]) -> Option<DateTime<FixedOffset>> {
        let (dir, file) = Self::split(path);
        let mut cmd = Command::new("git");
        cmd.arg("log").arg("-1").arg("--format=%aI");
        for arg in extra {
            cmd.arg(arg);
        }
        cmd.arg("--").arg(&file).current_dir(&dir);

        debug!("Executing git command: {:?}", cmd);
        let output = cmd.output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        DateTime::parse_from_rfc3339(stdout.lines().next()?.trim()).ok()
    }
}

/// Regex for `git log -G` matching lines that mention every segment of `key` in order.
pub fn key_pattern(key: &KeyPath) -> String {
    key.segments()
        .iter()
        .map(|segment| {
            segment
                .chars()
                .flat_map(|c| {
                    let escaped = if "\\.^$|?*+()[]{}".contains(c) { Some('\\') } else { None };
                    escaped.into_iter().chain(std::iter::once(c))
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(".*")
}

#[async_trait]
impl ModificationSource for GitHistory {
    async fn last_modified(&self, path: &Path, key: &KeyPath) -> Option<DateTime<FixedOffset>> {
        if !self.available || !path.exists() {
            return None;
        }
        match Self::git_date(path, &["-G".to_string(), key_pattern(key)]).await {
            Some(date) => Some(date),
            None => Self::git_date(path, &[]).await,
        }
    }
}

/// Gather source/target modification instants for `keys`.
pub async fn collect_modifications(
    history: &dyn ModificationSource,
    source_path: &Path,
    target_path: &Path,
    keys: &[KeyPath],
) -> HashMap<KeyPath, KeyModification> {
    let mut modifications = HashMap::with_capacity(keys.len());
    for key in keys {
        let source = history.last_modified(source_path, key).await;
        let target = history.last_modified(target_path, key).await;
        if source.is_some() || target.is_some() {
            modifications.insert(key.clone(), KeyModification { source, target });
        }
    }
    modifications
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHistory {
        dates: HashMap<(PathBuf, String), DateTime<FixedOffset>>,
    }

    #[async_trait]
    impl ModificationSource for FixedHistory {
        async fn last_modified(&self, path: &Path, key: &KeyPath) -> Option<DateTime<FixedOffset>> {
            self.dates.get(&(path.to_path_buf(), key.to_string())).copied()
        }
    }

    #[test]
    fn test_key_pattern_escapes_segments() {
        assert_eq!(key_pattern(&KeyPath::from_dotted("menu.file")), "menu.*file");
        assert_eq!(key_pattern(&KeyPath::new(["price ($)"])), "price \\(\\$\\)");
    }

    #[tokio::test]
    async fn test_collect_modifications_pairs_dates() {
        let date = DateTime::parse_from_rfc3339("2024-03-01T12:00:00+02:00").unwrap();
        let mut dates = HashMap::new();
        dates.insert((PathBuf::from("en.json"), "title".to_string()), date);
        let history = FixedHistory { dates };

        let keys = vec![KeyPath::from_dotted("title"), KeyPath::from_dotted("other")];
        let modifications =
            collect_modifications(&history, Path::new("en.json"), Path::new("fr.json"), &keys).await;

        assert_eq!(modifications.len(), 1);
        let title = modifications.get(&KeyPath::from_dotted("title")).unwrap();
        assert_eq!(title.source, Some(date));
        assert_eq!(title.target, None);
    }

    #[tokio::test]
    async fn test_unavailable_history_reports_nothing() {
        let history = GitHistory { available: false };
        assert!(history.last_modified(Path::new("Cargo.toml"), &KeyPath::from_dotted("package")).await.is_none());
    }
}

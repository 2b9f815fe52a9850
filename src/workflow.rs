use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::cache::FingerprintCache;
use crate::config::{Config, LANG_PLACEHOLDER};
use crate::diff::{compute_diff, Diff, DiffContext, DiffMode, DiffOptions, SourceHashLedger, LEDGER_FILE};
use crate::error::{AlgebrasError, Result};
use crate::formats::{DocumentProjection, DocumentRole, FormatHandler, FormatRegistry, KeyPath};
use crate::history::{collect_modifications, GitHistory, ModificationSource};
use crate::merge::{merge, MergeMode};
use crate::summary::{LanguageStatus, LanguageSummary, RunSummary, StatusReport};
use crate::translate::{
    BackendFactory, Batcher, RateLimiter, RequestContext, RetryCoordinator, RetryPolicy, TranslationBackend,
};

/// Options of one `translate` / `update` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Restrict the run to one configured language
    pub language: Option<String>,
    /// Retranslate every key with source content
    pub force: bool,
    /// Only translate keys missing from the target
    pub only_missing: bool,
    /// Rewrite target files from scratch instead of patching them
    pub regenerate: bool,
    /// Consult git history for this run even if the configuration does not
    pub use_git_history: bool,
}

/// A source file and the target file it is translated into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Projections and diff of one file pair.
struct PairDiff {
    source: DocumentProjection,
    target: DocumentProjection,
    target_handler: Box<dyn FormatHandler>,
    diff: Diff,
}

pub struct Workflow {
    config: Config,
    root: PathBuf,
    backend: Option<Arc<dyn TranslationBackend>>,
    cache: Option<Arc<FingerprintCache>>,
    limiter: Arc<RateLimiter>,
    retry: RetryCoordinator,
    history: Option<Arc<dyn ModificationSource>>,
    cancel: CancellationToken,
}

impl Workflow {
    /// Build a workflow for the project at `root` with the configured backend.
    pub fn new(config: Config, root: impl Into<PathBuf>, cancel: CancellationToken) -> Result<Self> {
        let backend: Arc<dyn TranslationBackend> = Arc::from(BackendFactory::create(&config.api)?);
        info!("Using {} translation backend", backend.name());
        Ok(Self::with_backend(config, root, backend, cancel))
    }

    pub fn with_backend(
        config: Config,
        root: impl Into<PathBuf>,
        backend: Arc<dyn TranslationBackend>,
        cancel: CancellationToken,
    ) -> Self {
        let mut workflow = Self::offline_with_cancel(config, root, cancel);
        workflow.backend = Some(backend);
        workflow
    }

    /// Workflow that can inspect files but not translate them.
    pub fn offline(config: Config, root: impl Into<PathBuf>) -> Self {
        Self::offline_with_cancel(config, root, CancellationToken::new())
    }

    fn offline_with_cancel(config: Config, root: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        let root = root.into();
        let cache = config.cache.enabled.then(|| {
            Arc::new(FingerprintCache::open(
                config.resolved_cache_path(&root),
                config.cache.max_size_bytes,
            ))
        });
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.window_secs),
        ));
        let retry = RetryCoordinator::new(RetryPolicy::from_config(&config.retry), cancel.clone());

        Self {
            config,
            root,
            backend: None,
            cache,
            limiter,
            retry,
            history: None,
            cancel,
        }
    }

    /// Use `history` instead of probing git whenever git history is enabled.
    pub fn with_history(mut self, history: Arc<dyn ModificationSource>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve every configured mapping into concrete file pairs for `language`.
    pub fn file_pairs(&self, language: &str) -> Result<Vec<FilePair>> {
        let mut pairs = Vec::new();

        for mapping in &self.config.files {
            let source = self.root.join(&mapping.source);
            let destination = self.root.join(mapping.destination.replace(LANG_PLACEHOLDER, language));

            if source.is_dir() {
                for entry in WalkDir::new(&source)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && FormatRegistry::is_supported(e.path()))
                {
                    let Some(relative) = pathdiff::diff_paths(entry.path(), &source) else {
                        continue;
                    };
                    pairs.push(FilePair {
                        source: entry.path().to_path_buf(),
                        target: destination.join(relative),
                    });
                }
            } else if source.exists() {
                pairs.push(FilePair {
                    source,
                    target: destination,
                });
            } else {
                return Err(AlgebrasError::FileNotFound(source.display().to_string()));
            }
        }

        Ok(pairs)
    }

    /// Path used to key the source-hash ledger, relative to the project root.
    fn target_id(&self, target: &Path) -> PathBuf {
        pathdiff::diff_paths(target, &self.root).unwrap_or_else(|| target.to_path_buf())
    }

    async fn history(&self, requested: bool) -> Option<Arc<dyn ModificationSource>> {
        if !requested && !self.config.output.use_git_history {
            return None;
        }
        if let Some(history) = &self.history {
            return Some(history.clone());
        }
        let git = GitHistory::detect(&self.root).await;
        git.is_available().then(|| Arc::new(git) as Arc<dyn ModificationSource>)
    }

    async fn diff_pair(
        &self,
        pair: &FilePair,
        options: &DiffOptions,
        ledger: &SourceHashLedger,
        history: Option<&dyn ModificationSource>,
    ) -> Result<PairDiff> {
        let source_handler = FormatRegistry::handler_for(&pair.source, &self.config)?;
        let target_handler = FormatRegistry::handler_for(&pair.target, &self.config)?;

        let source = source_handler.project(&pair.source, DocumentRole::Source)?;
        let target = target_handler.project(&pair.target, DocumentRole::Target)?;

        let modifications = match history {
            Some(history) if !options.only_missing && target.structure.exists() => {
                let keys: Vec<KeyPath> = source.keys().cloned().collect();
                Some(collect_modifications(history, &pair.source, &pair.target, &keys).await)
            }
            _ => None,
        };
        let context = DiffContext {
            recorded_hashes: ledger.hashes_for(&self.target_id(&pair.target)),
            modifications,
        };

        let diff = compute_diff(&source, &target, options, &context);
        Ok(PairDiff {
            source,
            target,
            target_handler,
            diff,
        })
    }

    fn diff_options(&self, options: &RunOptions) -> DiffOptions {
        DiffOptions {
            mode: if options.force { DiffMode::Full } else { DiffMode::Incremental },
            only_missing: options.only_missing || self.config.output.only_missing,
            preserve_on_empty_source: self.config.output.preserve_on_empty_source,
        }
    }

    fn progress_bar(&self, len: usize, target: &Path) -> ProgressBar {
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(target.display().to_string());
        pb
    }

    /// Translate every configured file into every requested language.
    pub async fn translate(&self, options: &RunOptions) -> Result<RunSummary> {
        let started = std::time::Instant::now();
        let languages = self.config.target_languages(options.language.as_deref())?;
        let diff_options = self.diff_options(options);
        let merge_mode = if options.regenerate || self.config.output.regenerate_from_scratch {
            MergeMode::Regenerate
        } else {
            MergeMode::InPlace
        };

        let backend = self.backend.clone().ok_or_else(|| {
            AlgebrasError::MissingCredentials("no translation backend configured".to_string())
        })?;
        let mut batcher = Batcher::new(
            backend,
            self.limiter.clone(),
            self.retry.clone(),
            &self.config.batch,
            self.cancel.clone(),
        )
        .with_normalization(self.config.api.normalize_strings);
        if let Some(cache) = &self.cache {
            batcher = batcher.with_cache(cache.clone());
        }

        let history = self.history(options.use_git_history).await;
        let mut ledger = SourceHashLedger::open(self.root.join(LEDGER_FILE));
        let mut summary = RunSummary::default();

        let outcome = self
            .translate_languages(&languages, &diff_options, merge_mode, &batcher, history.as_deref(), &mut ledger, &mut summary)
            .await;

        // Whatever completed stays recorded, even when a fatal error stopped the run
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.persist() {
                warn!("Failed to save translation cache: {}", e);
            }
        }
        if let Err(e) = ledger.save() {
            warn!("Failed to save translation state: {}", e);
        }
        outcome?;

        summary.cancelled = self.cancel.is_cancelled();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate_languages(
        &self,
        languages: &[String],
        diff_options: &DiffOptions,
        merge_mode: MergeMode,
        batcher: &Batcher,
        history: Option<&dyn ModificationSource>,
        ledger: &mut SourceHashLedger,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for language in languages {
            let mut lang_summary = LanguageSummary::new(language);
            let context = RequestContext::new(&self.config.api, &self.config.project.source_language, language);

            for pair in self.file_pairs(language)? {
                if self.cancel.is_cancelled() {
                    warn!("Cancelled, skipping {}", pair.target.display());
                    break;
                }
                lang_summary.files += 1;
                self.translate_pair(&pair, diff_options, merge_mode, batcher, &context, history, ledger, &mut lang_summary)
                    .await?;
            }

            info!(
                language = %language,
                translated = lang_summary.translated,
                skipped = lang_summary.skipped,
                failed = lang_summary.failed,
                "Language completed"
            );
            summary.languages.push(lang_summary);
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate_pair(
        &self,
        pair: &FilePair,
        diff_options: &DiffOptions,
        merge_mode: MergeMode,
        batcher: &Batcher,
        context: &RequestContext,
        history: Option<&dyn ModificationSource>,
        ledger: &mut SourceHashLedger,
        summary: &mut LanguageSummary,
    ) -> Result<()> {
        info!("Translating {} -> {}", pair.source.display(), pair.target.display());

        let PairDiff {
            source,
            target,
            target_handler,
            diff,
        } = match self.diff_pair(pair, diff_options, ledger, history).await {
            Ok(pair_diff) => pair_diff,
            // A broken target must not stop the other files
            Err(AlgebrasError::Format { format, path, message }) if Path::new(&path) == pair.target => {
                error!("Skipping {}: malformed {} document: {}", path, format, message);
                let source_handler = FormatRegistry::handler_for(&pair.source, &self.config)?;
                let source = source_handler.project(&pair.source, DocumentRole::Source)?;
                for (key, text) in source.entries() {
                    if !text.trim().is_empty() {
                        summary.failed += 1;
                        summary.failed_keys.push(key.to_string());
                    }
                }
                return Ok(());
            }
            Err(AlgebrasError::UnsupportedFormat(path)) => {
                error!("Skipping {}: unsupported file format", path);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let target_id = self.target_id(&pair.target);
        let units = diff.units(&source, &target);
        let report = if units.is_empty() {
            Default::default()
        } else {
            let pb = self.progress_bar(units.len(), &target_id);
            let report = batcher.run(units, context, Some(&pb)).await;
            pb.finish_and_clear();
            report
        };

        let mut translated: BTreeMap<KeyPath, String> = report.translated.clone();
        translated.extend(diff.resolved.iter().cloned());

        summary.translated += translated.len();
        summary.skipped += diff.skip.len().saturating_sub(diff.resolved.len());
        summary.failed += report.failed.len();
        summary.cache_hits += report.cache_hits;
        summary.remote_calls += report.remote_calls;
        summary.failed_keys.extend(report.failed.iter().map(|f| f.key.to_string()));

        if !translated.is_empty() {
            let source_order: Vec<KeyPath> = source.keys().cloned().collect();
            let output = merge(target_handler.as_ref(), &target, &translated, merge_mode, &source_order)?;
            if output.changed {
                target_handler.write(&pair.target, &output.content)?;
                summary.files_written += 1;
                info!(
                    "Wrote {} ({} keys, {:?})",
                    target_id.display(),
                    translated.len(),
                    output.mode_used
                );
            }
        }

        ledger.record(
            &target_id,
            translated
                .keys()
                .filter_map(|key| source.get(key).map(|text| (key, text))),
        );
        ledger.record_baseline(
            &target_id,
            diff.skip
                .iter()
                .filter_map(|key| source.get(key).map(|text| (key, text))),
        );

        Ok(())
    }

    /// Diff counts per language without translating anything.
    pub async fn status(&self, language: Option<&str>) -> Result<StatusReport> {
        let languages = self.config.target_languages(language)?;
        let options = self.diff_options(&RunOptions::default());
        let history = self.history(false).await;
        let ledger = SourceHashLedger::open(self.root.join(LEDGER_FILE));
        let mut report = StatusReport::default();

        for language in &languages {
            let mut status = LanguageStatus {
                language: language.clone(),
                ..LanguageStatus::default()
            };
            for pair in self.file_pairs(language)? {
                status.files += 1;
                match self.diff_pair(&pair, &options, &ledger, history.as_deref()).await {
                    Ok(pair_diff) => {
                        status.missing += pair_diff.diff.missing.len();
                        status.stale += pair_diff.diff.stale.len();
                        status.up_to_date += pair_diff.diff.skip.len();
                    }
                    Err(e) => warn!("Cannot compute status of {}: {}", pair.target.display(), e),
                }
            }
            report.languages.push(status);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileMapping, ProjectConfig};
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};
    use crate::error::TranslationError;
    use crate::translate::testing::ScriptedBackend;

    fn config(root: &Path, source: &str, destination: &str) -> Config {
        let mut config = Config::default();
        config.project = ProjectConfig {
            source_language: "en".to_string(),
            languages: vec!["fr".to_string()],
        };
        config.files = vec![FileMapping {
            source: PathBuf::from(source),
            destination: destination.to_string(),
        }];
        config.cache.path = Some(root.join("cache").join("translation_cache.json"));
        config.retry.jitter = 0.0;
        config
    }

    fn workflow(config: Config, root: &Path, backend: &ScriptedBackend) -> Workflow {
        Workflow::with_backend(config, root, Arc::new(backend.clone()), CancellationToken::new())
    }

    const SOURCE_JSON: &str = r#"{
  "greeting": "Hello",
  "empty": "",
  "profile": { "title": "Profile" }
}"#;

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("locales")).unwrap();
        std::fs::write(root.join("locales/en.json"), SOURCE_JSON).unwrap();
        let config = config(root, "locales/en.json", "locales/%lang%.json");
        let backend = ScriptedBackend::new();

        let first = workflow(config.clone(), root, &backend).translate(&RunOptions::default()).await.unwrap();
        let fr = first.language("fr").unwrap();
        assert_eq!(fr.translated, 3);
        assert_eq!(fr.remote_calls, 2);
        assert_eq!(backend.calls(), 2);

        let written = std::fs::read_to_string(root.join("locales/fr.json")).unwrap();
        assert_eq!(
            written,
            "{\n  \"greeting\": \"[fr] Hello\",\n  \"empty\": \"\",\n  \"profile\": {\n    \"title\": \"[fr] Profile\"\n  }\n}\n"
        );

        let second = workflow(config, root, &backend).translate(&RunOptions::default()).await.unwrap();
        let fr = second.language("fr").unwrap();
        assert_eq!(fr.remote_calls, 0);
        assert_eq!(fr.translated, 0);
        assert_eq!(fr.skipped, 3);
        assert_eq!(fr.files_written, 0);
        assert_eq!(backend.calls(), 2);
        assert_eq!(std::fs::read_to_string(root.join("locales/fr.json")).unwrap(), written);
    }

    #[tokio::test]
    async fn test_edited_source_is_retranslated() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("en.json"), r#"{"a": "One", "b": "Two"}"#).unwrap();
        let config = config(root, "en.json", "%lang%.json");
        let backend = ScriptedBackend::new();

        workflow(config.clone(), root, &backend).translate(&RunOptions::default()).await.unwrap();
        std::fs::write(root.join("en.json"), r#"{"a": "One!", "b": "Two"}"#).unwrap();

        let summary = workflow(config, root, &backend).translate(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.language("fr").unwrap().translated, 1);
        assert_eq!(backend.calls(), 3);
        let written = std::fs::read_to_string(root.join("fr.json")).unwrap();
        assert!(written.contains("\"a\": \"[fr] One!\""));
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_other_translations() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("res/values")).unwrap();
        std::fs::write(
            root.join("res/values/strings.xml"),
            "<resources>\n    <string name=\"ok\">Fine</string>\n    <string name=\"bad\">Broken</string>\n</resources>\n",
        )
        .unwrap();
        let mut config = config(root, "res/values/strings.xml", "res/values-%lang%/strings.xml");
        config.batch.batch_size = 1;
        let backend = ScriptedBackend::new();
        backend.script("Broken", Err(TranslationError::client("rejected")));

        let summary = workflow(config, root, &backend).translate(&RunOptions::default()).await.unwrap();
        let fr = summary.language("fr").unwrap();
        assert_eq!(fr.translated, 1);
        assert_eq!(fr.failed, 1);
        assert_eq!(fr.failed_keys, vec!["bad".to_string()]);

        let written = std::fs::read_to_string(root.join("res/values-fr/strings.xml")).unwrap();
        assert!(written.contains("<string name=\"ok\">[fr] Fine</string>"));
        assert!(!written.contains("name=\"bad\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_batch_leaves_other_batches_merged() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("res/values")).unwrap();
        std::fs::write(
            root.join("res/values/strings.xml"),
            "<resources>\n    <string name=\"first\">First</string>\n    <string name=\"second\">Second</string>\n    <string name=\"third\">Third</string>\n</resources>\n",
        )
        .unwrap();
        let mut config = config(root, "res/values/strings.xml", "res/values-%lang%/strings.xml");
        config.batch.batch_size = 1;
        let backend = ScriptedBackend::new();
        for _ in 0..5 {
            backend.script("Second", Err(TranslationError::RateLimited { retry_after: None }));
        }

        let summary = workflow(config, root, &backend).translate(&RunOptions::default()).await.unwrap();
        let fr = summary.language("fr").unwrap();
        assert_eq!(fr.translated, 2);
        assert_eq!(fr.failed_keys, vec!["second".to_string()]);
        assert_eq!(fr.remote_calls, 7);

        let written = std::fs::read_to_string(root.join("res/values-fr/strings.xml")).unwrap();
        assert!(written.contains("<string name=\"first\">[fr] First</string>"));
        assert!(written.contains("<string name=\"third\">[fr] Third</string>"));
        assert!(!written.contains("name=\"second\""));
    }

    const XML_SOURCE: &str = "<resources>\n    <string name=\"terms\">user agreement</string>\n    <string name=\"welcome\">Welcome</string>\n</resources>\n";

    const XML_TARGET: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <!-- Reviewed by legal -->\n    <string name=\"terms\">accord&#160;utilisateur</string>\n</resources>\n";

    const PO_SOURCE: &str = "msgid \"\"\nmsgstr \"\"\n\"Content-Type: text/plain; charset=UTF-8\\n\"\n\nmsgid \"Hello\"\nmsgstr \"\"\n\nmsgid \"Goodbye\"\nmsgstr \"\"\n";

    const PO_TARGET: &str = "# French catalog\nmsgid \"\"\nmsgstr \"\"\n\"Content-Type: text/plain; charset=UTF-8\\n\"\n\n#. Shown on launch\nmsgid \"Hello\"\nmsgstr \"Bonjour\"\n";

    #[tokio::test]
    async fn test_in_place_targets_are_stable_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for (path, content) in [
            ("res/values/strings.xml", XML_SOURCE),
            ("res/values-fr/strings.xml", XML_TARGET),
            ("po/en.po", PO_SOURCE),
            ("po/fr.po", PO_TARGET),
        ] {
            let path = root.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let mut config = config(root, "res/values/strings.xml", "res/values-%lang%/strings.xml");
        config.files.push(FileMapping {
            source: PathBuf::from("po/en.po"),
            destination: "po/%lang%.po".to_string(),
        });
        let backend = ScriptedBackend::new();

        let first = workflow(config.clone(), root, &backend).translate(&RunOptions::default()).await.unwrap();
        let fr = first.language("fr").unwrap();
        assert_eq!(fr.remote_calls, 2);
        assert_eq!(fr.files_written, 2);

        let xml = std::fs::read_to_string(root.join("res/values-fr/strings.xml")).unwrap();
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <!-- Reviewed by legal -->\n    <string name=\"terms\">accord&#160;utilisateur</string>\n    <string name=\"welcome\">[fr] Welcome</string>\n</resources>\n"
        );
        let po = std::fs::read_to_string(root.join("po/fr.po")).unwrap();
        assert_eq!(po, format!("{}\nmsgid \"Goodbye\"\nmsgstr \"[fr] Goodbye\"\n", PO_TARGET));

        let second = workflow(config, root, &backend).translate(&RunOptions::default()).await.unwrap();
        let fr = second.language("fr").unwrap();
        assert_eq!(fr.remote_calls, 0);
        assert_eq!(fr.files_written, 0);
        assert_eq!(backend.calls(), 2);
        assert_eq!(std::fs::read_to_string(root.join("res/values-fr/strings.xml")).unwrap(), xml);
        assert_eq!(std::fs::read_to_string(root.join("po/fr.po")).unwrap(), po);
    }

    /// Reports every source file as edited after its translation.
    struct SourceEditedLater;

    #[async_trait]
    impl ModificationSource for SourceEditedLater {
        async fn last_modified(&self, path: &Path, _key: &KeyPath) -> Option<DateTime<FixedOffset>> {
            let date = if path.ends_with("en.json") {
                "2024-02-01T09:00:00+00:00"
            } else {
                "2024-01-01T09:00:00+00:00"
            };
            DateTime::parse_from_rfc3339(date).ok()
        }
    }

    #[tokio::test]
    async fn test_git_history_only_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("en.json"), r#"{"a": "One"}"#).unwrap();
        let config = config(root, "en.json", "%lang%.json");
        let backend = ScriptedBackend::new();
        let run = |options: RunOptions| {
            let workflow = workflow(config.clone(), root, &backend).with_history(Arc::new(SourceEditedLater));
            async move { workflow.translate(&options).await.unwrap() }
        };

        run(RunOptions::default()).await;
        assert_eq!(backend.calls(), 1);

        let plain = run(RunOptions::default()).await;
        assert_eq!(plain.language("fr").unwrap().remote_calls, 0);

        let with_git = run(RunOptions {
            use_git_history: true,
            ..RunOptions::default()
        })
        .await;
        let fr = with_git.language("fr").unwrap();
        assert_eq!(fr.translated, 1);
        assert_eq!(fr.cache_hits, 1);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_directory_mapping_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("i18n/en/admin")).unwrap();
        std::fs::write(root.join("i18n/en/common.json"), r#"{"save": "Save"}"#).unwrap();
        std::fs::write(root.join("i18n/en/admin/users.json"), r#"{"title": "Users", "empty": ""}"#).unwrap();
        std::fs::write(root.join("i18n/en/README.md"), "not a locale file").unwrap();
        let config = config(root, "i18n/en", "i18n/%lang%");
        let backend = ScriptedBackend::new();
        let workflow = workflow(config, root, &backend);

        let pairs = workflow.file_pairs("fr").unwrap();
        let targets: Vec<PathBuf> = pairs.iter().map(|p| workflow.target_id(&p.target)).collect();
        assert_eq!(
            targets,
            vec![PathBuf::from("i18n/fr/admin/users.json"), PathBuf::from("i18n/fr/common.json")]
        );

        let status = workflow.status(None).await.unwrap();
        let fr = status.language("fr").unwrap();
        assert_eq!(fr.files, 2);
        assert_eq!(fr.missing, 2);
        assert_eq!(fr.up_to_date, 1);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "missing.json", "%lang%.json");
        let backend = ScriptedBackend::new();

        let err = workflow(config, dir.path(), &backend)
            .translate(&RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AlgebrasError::FileNotFound(_)));
    }
}

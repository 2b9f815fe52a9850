//! Batch scheduling of translation units.
//!
//! Units are split into contiguous batches that run on a bounded worker pool. Each
//! worker reports exactly one outcome for its batch to a single collector, which owns
//! the result map.

use indicatif::ProgressBar;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{Fingerprint, FingerprintCache};
use crate::config::BatchConfig;
use crate::diff::TranslationUnit;
use crate::error::TranslationError;
use crate::formats::KeyPath;
use super::common::normalize_translation;
use super::rate_limit::RateLimiter;
use super::retry::RetryCoordinator;
use super::{RequestContext, TranslationBackend};

/// A unit that could not be translated in this run.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedUnit {
    pub key: KeyPath,
    pub error: TranslationError,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub translated: BTreeMap<KeyPath, String>,
    pub failed: Vec<FailedUnit>,
    pub cache_hits: usize,
    pub remote_calls: usize,
    pub failed_batches: usize,
}

impl BatchReport {
    pub fn failed_keys(&self) -> Vec<KeyPath> {
        self.failed.iter().map(|f| f.key.clone()).collect()
    }
}

/// Message sent from a worker to the collector.
#[derive(Debug)]
struct BatchOutcome {
    index: usize,
    translated: Vec<(KeyPath, String)>,
    /// Set when the batch failed; every unit of the batch is then reported failed
    failure: Option<(Vec<KeyPath>, TranslationError)>,
    cache_hits: usize,
    remote_calls: usize,
}

impl BatchOutcome {
    fn failed(index: usize, units: &[TranslationUnit], error: TranslationError) -> Self {
        Self {
            index,
            translated: Vec::new(),
            failure: Some((units.iter().map(|u| u.key.clone()).collect(), error)),
            cache_hits: 0,
            remote_calls: 0,
        }
    }
}

/// Everything a worker needs, cloned into each spawned task.
#[derive(Clone)]
struct BatchWorker {
    backend: Arc<dyn TranslationBackend>,
    cache: Option<Arc<FingerprintCache>>,
    limiter: Arc<RateLimiter>,
    retry: RetryCoordinator,
    cancel: CancellationToken,
    context: RequestContext,
    normalize: bool,
}

impl BatchWorker {
    async fn run(self, index: usize, units: Vec<TranslationUnit>) -> BatchOutcome {
        let mut translated = Vec::with_capacity(units.len());
        let mut cache_hits = 0;
        let mut remote_calls = 0;

        for unit in &units {
            if self.cancel.is_cancelled() {
                return BatchOutcome {
                    remote_calls,
                    cache_hits,
                    ..BatchOutcome::failed(index, &units, TranslationError::Cancelled)
                };
            }

            let text = &unit.source_text;
            if text.trim().is_empty() {
                translated.push((unit.key.clone(), text.clone()));
                continue;
            }

            let request = self.context.request(text);
            let fingerprint = Fingerprint::of(&request);
            if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&fingerprint)) {
                cache_hits += 1;
                translated.push((unit.key.clone(), hit));
                continue;
            }

            let label = unit.key.to_string();
            let mut attempts = 0usize;
            let result = self
                .retry
                .with_retry(&label, || {
                    attempts += 1;
                    let backend = self.backend.clone();
                    let limiter = self.limiter.clone();
                    let request = request.clone();
                    async move {
                        limiter.acquire().await;
                        backend.translate(&request).await
                    }
                })
                .await;
            remote_calls += attempts;

            match result {
                Ok(retried) => {
                    let value = if self.normalize {
                        normalize_translation(text, &retried.value)
                    } else {
                        retried.value
                    };
                    if let Some(cache) = &self.cache {
                        cache.put(fingerprint, value.clone());
                    }
                    translated.push((unit.key.clone(), value));
                }
                Err(err) => {
                    warn!(batch = index, key = %unit.key, "Batch failed: {}", err);
                    return BatchOutcome {
                        remote_calls,
                        cache_hits,
                        ..BatchOutcome::failed(index, &units, err)
                    };
                }
            }
        }

        debug!(batch = index, units = units.len(), cache_hits, remote_calls, "Batch completed");
        BatchOutcome {
            index,
            translated,
            failure: None,
            cache_hits,
            remote_calls,
        }
    }
}

pub struct Batcher {
    backend: Arc<dyn TranslationBackend>,
    cache: Option<Arc<FingerprintCache>>,
    limiter: Arc<RateLimiter>,
    retry: RetryCoordinator,
    batch_size: usize,
    max_parallel: usize,
    cancel: CancellationToken,
    normalize: bool,
}

impl Batcher {
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        limiter: Arc<RateLimiter>,
        retry: RetryCoordinator,
        config: &BatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            cache: None,
            limiter,
            retry,
            batch_size: config.batch_size.max(1),
            max_parallel: config.max_parallel_batches.max(1),
            cancel,
            normalize: false,
        }
    }

    pub fn with_cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Strip escape sequences the backend added to its answers.
    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Translate `units`, isolating failures per batch.
    pub async fn run(
        &self,
        units: Vec<TranslationUnit>,
        context: &RequestContext,
        progress: Option<&ProgressBar>,
    ) -> BatchReport {
        let batches: Vec<Vec<TranslationUnit>> = units.chunks(self.batch_size).map(<[_]>::to_vec).collect();
        if batches.is_empty() {
            return BatchReport::default();
        }
        info!(
            units = units.len(),
            batches = batches.len(),
            target = %context.target_lang,
            "Translating in batches"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<BatchOutcome>();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let worker = BatchWorker {
            backend: self.backend.clone(),
            cache: self.cache.clone(),
            limiter: self.limiter.clone(),
            retry: self.retry.clone(),
            cancel: self.cancel.clone(),
            context: context.clone(),
            normalize: self.normalize,
        };

        let schedule = async {
            let mut tasks = JoinSet::new();
            for (index, batch) in batches.iter().enumerate() {
                let permit = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    permit = semaphore.clone().acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit.filter(|_| !self.cancel.is_cancelled()) else {
                    let _ = tx.send(BatchOutcome::failed(index, batch, TranslationError::Cancelled));
                    continue;
                };

                let worker = worker.clone();
                let batch = batch.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    let outcome = worker.run(index, batch).await;
                    drop(permit);
                    let _ = tx.send(outcome);
                });
            }
            drop(tx);

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Batch worker aborted: {}", e);
                }
            }
        };

        let collect = async {
            let mut report = BatchReport::default();
            let mut reported = HashSet::new();
            while let Some(outcome) = rx.recv().await {
                reported.insert(outcome.index);
                report.cache_hits += outcome.cache_hits;
                report.remote_calls += outcome.remote_calls;

                let units_done = outcome.translated.len()
                    + outcome.failure.as_ref().map_or(0, |(keys, _)| keys.len());
                if let Some(pb) = progress {
                    pb.inc(units_done as u64);
                }

                match outcome.failure {
                    Some((keys, error)) => {
                        report.failed_batches += 1;
                        report
                            .failed
                            .extend(keys.into_iter().map(|key| FailedUnit { key, error: error.clone() }));
                    }
                    None => report.translated.extend(outcome.translated),
                }
            }
            (report, reported)
        };

        let ((), (mut report, reported)) = tokio::join!(schedule, collect);

        // A worker that panicked never reported; its units still count as failed
        for (index, batch) in batches.iter().enumerate() {
            if !reported.contains(&index) {
                report.failed_batches += 1;
                report.failed.extend(batch.iter().map(|u| FailedUnit {
                    key: u.key.clone(),
                    error: TranslationError::ServerError {
                        status: None,
                        message: "batch worker aborted".to_string(),
                    },
                }));
            }
        }

        report
    }
}

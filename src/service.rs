//! The library's front door.
//!
//! [`OcrService`] owns the job store, the worker pool, and the retention
//! sweeper. The HTTP layer is a thin shim over it, and so is
//! [`ocr_bytes`], the eager entry point that runs one document to the end
//! and hands back the searchable PDF.

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::job::{CancelOutcome, JobId, JobStatus};
use crate::pipeline::assemble;
use crate::pipeline::engine::EngineSet;
use crate::pipeline::validate::SubmitOptions;
use crate::progress::{NoopObserver, SharedObserver};
use crate::scheduler::{PoolStats, Scheduler};
use crate::store::{JobCounts, JobStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Text read back from a finished artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub job_id: JobId,
    pub pages: Vec<PageText>,
    /// All pages joined, whitespace collapsed to single spaces.
    pub extracted_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number.
    pub page: usize,
    pub text: String,
}

/// Service health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub pool: PoolStats,
    pub jobs: JobCounts,
}

/// Result of [`ocr_bytes`].
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub status: JobStatus,
    pub pdf: Vec<u8>,
}

pub struct OcrService {
    config: Arc<OcrConfig>,
    store: Arc<JobStore>,
    scheduler: Scheduler,
    started: Instant,
    sweeper: CancellationToken,
}

impl OcrService {
    /// Start with the engines named in `config`.
    ///
    /// Must be called from within a Tokio runtime: workers and the retention
    /// sweeper are spawned immediately.
    pub fn start(config: OcrConfig) -> Result<Self, OcrError> {
        let engines = EngineSet::from_config(&config);
        Self::with_engines(config, engines, Arc::new(NoopObserver))
    }

    /// Start with explicit engines and an observer.
    pub fn with_engines(
        config: OcrConfig,
        engines: EngineSet,
        observer: SharedObserver,
    ) -> Result<Self, OcrError> {
        config.validate()?;
        let config = Arc::new(config);
        let store = Arc::new(JobStore::new(config.retention()));
        let scheduler = Scheduler::start(
            Arc::clone(&config),
            engines,
            Arc::clone(&store),
            observer,
        )?;

        let sweeper = CancellationToken::new();
        spawn_sweeper(Arc::clone(&store), config.sweep_interval(), sweeper.clone());

        info!(
            workers = config.workers,
            engine = ?config.engine,
            artifact_dir = %config.artifact_dir.display(),
            "OCR service started"
        );
        Ok(Self {
            config,
            store,
            scheduler,
            started: Instant::now(),
            sweeper,
        })
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Validate and enqueue a document. Fails without creating a job when
    /// the document is rejected or the queue is full.
    pub async fn submit(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        options: SubmitOptions,
    ) -> Result<JobId, OcrError> {
        let handle = self.scheduler.submit(bytes.into(), options).await?;
        Ok(handle.id())
    }

    pub fn status(&self, id: JobId) -> Result<Arc<JobStatus>, OcrError> {
        self.store.status(id)
    }

    /// Path of the published artifact.
    pub fn artifact_path(&self, id: JobId) -> Result<PathBuf, OcrError> {
        self.store.artifact(id)
    }

    /// Bytes of the published artifact.
    pub async fn result(&self, id: JobId) -> Result<Vec<u8>, OcrError> {
        let path = self.store.artifact(id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| OcrError::Storage { path, source })
    }

    /// The invisible text layer of the artifact, per page.
    pub async fn text(&self, id: JobId) -> Result<ExtractedText, OcrError> {
        let bytes = self.result(id).await?;
        let pages = tokio::task::spawn_blocking(move || assemble::text_layer(&bytes))
            .await
            .map_err(|e| OcrError::Internal(format!("text extraction task panicked: {e}")))??;

        let extracted_text = pages
            .iter()
            .flat_map(|text| text.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(ExtractedText {
            job_id: id,
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| PageText { page: i + 1, text })
                .collect(),
            extracted_text,
        })
    }

    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, OcrError> {
        self.scheduler.cancel(id)
    }

    /// Wait until the job is terminal and return its final status.
    pub async fn wait(&self, id: JobId) -> Result<Arc<JobStatus>, OcrError> {
        let handle = self.store.get(id)?;
        handle.wait_terminal().await;
        Ok(handle.status())
    }

    /// Run one retention sweep now.
    pub fn sweep(&self) -> usize {
        self.store.sweep_expired(Utc::now())
    }

    pub fn health(&self) -> Health {
        let pool = self.scheduler.stats();
        Health {
            status: if pool.accepting { "ok" } else { "draining" },
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.started.elapsed().as_secs(),
            pool,
            jobs: self.store.counts(),
        }
    }

    /// Stop accepting jobs, drain for up to `grace`, then stop the workers
    /// and the sweeper.
    pub async fn shutdown(&self, grace: Duration) {
        self.scheduler.shutdown(grace).await;
        self.sweeper.cancel();
        info!("OCR service stopped");
    }
}

fn spawn_sweeper(store: Arc<JobStore>, every: Duration, stop: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    let removed = store.sweep_expired(Utc::now());
                    debug!(removed, "Retention sweep");
                }
            }
        }
    });
}

/// Run one document through the whole pipeline and return the searchable
/// PDF. Starts a private service whose artifacts live in a temporary
/// directory removed before returning.
///
/// A job that ends without an artifact (fail-closed with failed pages) is
/// reported as [`OcrError::NoArtifact`]; its status is in the logs.
pub async fn ocr_bytes(
    bytes: impl Into<Arc<[u8]>>,
    options: SubmitOptions,
    config: OcrConfig,
) -> Result<OcrOutput, OcrError> {
    let workdir = tempfile::tempdir().map_err(|source| OcrError::Storage {
        path: std::env::temp_dir(),
        source,
    })?;
    let config = OcrConfig {
        artifact_dir: workdir.path().to_path_buf(),
        ..config
    };
    let service = OcrService::start(config)?;

    let outcome = async {
        let id = service.submit(bytes, options).await?;
        let status = service.wait(id).await?;
        if !status.state.has_artifact() {
            return Err(OcrError::NoArtifact {
                id,
                state: status.state,
            });
        }
        let pdf = service.result(id).await?;
        Ok(OcrOutput {
            status: (*status).clone(),
            pdf,
        })
    }
    .await;

    service.shutdown(Duration::ZERO).await;
    outcome
}

//! Worker loop, retry scheduling and job finalization.

use super::{Inner, PageWork};
use crate::config::FailurePolicy;
use crate::error::AssemblyError;
use crate::job::{Claim, FinalizeInput, JobId, JobState, PageOutcome};
use crate::pipeline::{assemble, composite, engine};
use crate::store::JobHandle;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<PageWork>>>;

/// Pull work until shutdown. A page that has started always runs to
/// completion; shutdown is only observed between pages.
pub(super) async fn run(worker: usize, inner: Arc<Inner>, rx: SharedReceiver) {
    debug!(worker, "Worker started");
    loop {
        let work = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            work = async { rx.lock().await.recv().await } => match work {
                Some(work) => work,
                None => break,
            },
        };
        process(&inner, work).await;
    }
    debug!(worker, "Worker stopped");
}

async fn process(inner: &Arc<Inner>, work: PageWork) {
    let PageWork { job, index } = work;
    let id = job.id();
    let page = index + 1;

    let Claim::Run {
        attempt,
        document,
        languages,
        keep_original,
    } = job.update(|j| j.claim(index))
    else {
        inner.settle(&job);
        return;
    };

    inner.observer.on_page_start(id, index, attempt);
    inner.running_pages.fetch_add(1, Ordering::SeqCst);
    debug!(job_id = %id, page, attempt, "Page started");

    let result = if keep_original {
        engine::keep_page(document, index, inner.settings.call_timeout).await
    } else {
        engine::run_page(&inner.engines, inner.settings, document, index, languages).await
    };

    inner.running_pages.fetch_sub(1, Ordering::SeqCst);
    inner.observer.on_page_end(id, index);

    let (outcome, released) = job.update(|j| {
        let outcome = j.record(index, result, &inner.retry);
        let released = if outcome.is_terminal() {
            j.release_page_permit()
        } else {
            0
        };
        (outcome, released)
    });
    inner.admission.release(released);

    match outcome {
        PageOutcome::Succeeded => {
            debug!(job_id = %id, page, attempt, "Page succeeded");
            inner.observer.on_page_complete(id, index);
        }
        PageOutcome::Retry { delay, error } => {
            warn!(
                job_id = %id,
                page,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Page attempt failed, retrying: {error}"
            );
            inner.observer.on_page_retry(id, index, &error, delay);
            schedule_retry(inner, Arc::clone(&job), index, delay);
        }
        PageOutcome::Failed(error) => {
            warn!(job_id = %id, page, attempt, kind = error.kind(), "Page failed: {error}");
            inner.observer.on_page_failed(id, index, &error);
        }
        PageOutcome::Discarded => {
            debug!(job_id = %id, page, "Page result discarded after cancel");
        }
    }

    try_finalize(inner, &job).await;
    inner.settle(&job);
}

/// Put the page back on the queue once `delay` has passed.
fn schedule_retry(inner: &Arc<Inner>, job: Arc<JobHandle>, index: usize, delay: Duration) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.shutdown.cancelled() => return,
        }
        if job.update(|j| j.requeue(index)) {
            if inner.queue.send(PageWork { job, index }).is_err() {
                warn!(page = index + 1, "Work queue closed before retry");
            }
        } else {
            inner.settle(&job);
        }
    });
}

/// Pass the fan-in barrier if this was the job's last page.
async fn try_finalize(inner: &Inner, job: &JobHandle) {
    let Some(input) = job.update(|j| j.begin_finalize()) else {
        return;
    };
    let (state, artifact, failure) = finalize(inner, job.id(), input).await;
    job.update(|j| j.finish(state, artifact, failure));
}

async fn finalize(
    inner: &Inner,
    id: JobId,
    input: FinalizeInput,
) -> (JobState, Option<PathBuf>, Option<String>) {
    let FinalizeInput {
        document,
        failure_policy,
        fragments,
        failed_pages,
    } = input;
    let total = document.page_count();

    let failure = (!failed_pages.is_empty()).then(|| {
        let numbers: Vec<String> = failed_pages.iter().map(|i| (i + 1).to_string()).collect();
        format!(
            "{} of {} pages failed: [{}]",
            failed_pages.len(),
            total,
            numbers.join(", ")
        )
    });
    if let Some(summary) = &failure {
        if failure_policy == FailurePolicy::FailClosed || failed_pages.len() == total {
            warn!(job_id = %id, policy = ?failure_policy, "{summary}; no artifact produced");
            return (JobState::Failed, None, failure);
        }
    }

    let dir = inner.config.artifact_dir.clone();
    let assembled = tokio::task::spawn_blocking(move || -> Result<PathBuf, AssemblyError> {
        let mut ordered = Vec::with_capacity(fragments.len());
        for (index, fragment) in fragments.into_iter().enumerate() {
            let fragment = match fragment {
                Some(fragment) => fragment,
                None => composite::placeholder(&document, index).map_err(|e| {
                    AssemblyError::Pdf(format!("placeholder for page {}: {e}", index + 1))
                })?,
            };
            ordered.push(fragment);
        }
        let bytes = assemble::assemble(ordered, total, document.metadata())?;
        assemble::publish(&bytes, &dir, id)
    })
    .await;

    match assembled {
        Ok(Ok(path)) => {
            let state = if failure.is_some() {
                JobState::PartiallyFailed
            } else {
                JobState::Completed
            };
            info!(job_id = %id, state = %state, path = %path.display(), "Artifact published");
            (state, Some(path), failure)
        }
        Ok(Err(e)) => {
            error!(job_id = %id, "Assembly failed: {e}");
            (JobState::Failed, None, Some(e.to_string()))
        }
        Err(e) => {
            error!(job_id = %id, "Assembly task panicked: {e}");
            (
                JobState::Failed,
                None,
                Some(format!("assembly task panicked: {e}")),
            )
        }
    }
}

//! Integration tests for the scheduler and the full page pipeline.
//!
//! Everything runs against [`MockEngine`], so no native libraries are
//! needed. Rasters are rendered at 72 DPI to keep them small; the mock
//! recognizer emits `"page N text"` for page N, which makes ordering and
//! coverage visible in the assembled artifact.

use image::ImageFormat;
use ocrlayer::{
    sample_image, sample_pdf, text_pdf, AdmissionMode, CancelOutcome, EngineSet,
    ExistingTextPolicy, FailurePolicy, JobId, JobState, MockEngine, MockFailure, NoopObserver,
    OcrConfig, OcrConfigBuilder, OcrError, OcrService, PageState, PipelineObserver, Stage,
    SubmitOptions, ValidationError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn base_config(dir: &TempDir, workers: usize) -> OcrConfigBuilder {
    OcrConfig::builder()
        .workers(workers)
        .dpi(72)
        .artifact_dir(dir.path())
        .retry_backoff_ms(5, 20)
        .call_timeout_ms(10_000)
}

fn start(config: OcrConfig, engine: &Arc<MockEngine>) -> OcrService {
    OcrService::with_engines(
        config,
        EngineSet::uniform(Arc::clone(engine)),
        Arc::new(NoopObserver),
    )
    .unwrap()
}

fn start_observed(
    config: OcrConfig,
    engine: &Arc<MockEngine>,
    observer: Arc<dyn PipelineObserver>,
) -> OcrService {
    OcrService::with_engines(config, EngineSet::uniform(Arc::clone(engine)), observer).unwrap()
}

fn expected_text(page: usize) -> String {
    format!("page {page} text")
}

/// Poll `f` every few milliseconds until it holds, or panic after 5s.
async fn eventually(what: &str, mut f: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn page_texts(service: &OcrService, id: JobId) -> Vec<String> {
    service
        .text(id)
        .await
        .unwrap()
        .pages
        .into_iter()
        .map(|p| p.text)
        .collect()
}

/// Tracks how many pages are inside the pipeline at once.
#[derive(Default)]
struct PeakRunning {
    now: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl PipelineObserver for PeakRunning {
    fn on_page_start(&self, _job: JobId, _page: usize, _attempt: u32) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn on_page_end(&self, _job: JobId, _page: usize) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _job: JobId, _page: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Ordering and coverage ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pages_are_assembled_in_order_despite_random_completion() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_random_delay(Duration::from_millis(30)));
    let service = start(base_config(&dir, 4).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(12, Some("Ledger")), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.title.as_deref(), Some("Ledger"));

    let texts = page_texts(&service, id).await;
    let expected: Vec<String> = (1..=12).map(expected_text).collect();
    assert_eq!(texts, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_page_is_recognized_exactly_once() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_random_delay(Duration::from_millis(10)));
    let service = start(base_config(&dir, 4).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(20, None), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);

    for index in 0..20 {
        assert_eq!(engine.recognize_calls(index), 1, "page {}", index + 1);
    }
    assert_eq!(engine.total_rasterize_calls(), 20);
    assert!(status
        .pages
        .iter()
        .all(|p| p.state == PageState::Succeeded && p.attempts == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_stays_within_the_pool_across_jobs() {
    let dir = TempDir::new().unwrap();
    let peak = Arc::new(PeakRunning::default());
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(15)));
    let service = start_observed(base_config(&dir, 3).build().unwrap(), &engine, peak.clone());

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            service
                .submit(sample_pdf(8, None), SubmitOptions::default())
                .await
                .unwrap(),
        );
    }
    for id in ids {
        assert_eq!(service.wait(id).await.unwrap().state, JobState::Completed);
    }

    let peak = peak.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded 3 workers");
    assert!(peak >= 2, "pool never ran pages in parallel (peak {peak})");
    assert_eq!(service.health().pool.running_pages, 0);
    assert_eq!(service.health().pool.queue_in_use, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerunning_a_document_gives_the_same_text() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_random_delay(Duration::from_millis(10)));
    let service = start(base_config(&dir, 4).build().unwrap(), &engine);
    let bytes = sample_pdf(6, None);

    let first = service
        .submit(bytes.clone(), SubmitOptions::default())
        .await
        .unwrap();
    service.wait(first).await.unwrap();
    let second = service.submit(bytes, SubmitOptions::default()).await.unwrap();
    service.wait(second).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(
        service.text(first).await.unwrap().extracted_text,
        service.text(second).await.unwrap().extracted_text
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_page_document_completes() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(3, None), SubmitOptions::default().languages("eng"))
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.page_count, 3);
    assert_eq!(status.progress.succeeded, 3);
    assert!(status.failed_pages.is_empty());
    assert!(status.error.is_none());

    let pdf = service.result(id).await.unwrap();
    assert!(pdf.starts_with(b"%PDF-"));
    let text = service.text(id).await.unwrap();
    assert_eq!(text.extracted_text, "page 1 text page 2 text page 3 text");
    assert_eq!(text.pages[2].page, 3);
}

// ── Input kinds ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pages_with_text_are_kept_without_recognition() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let id = service
        .submit(text_pdf(&["Invoice", ""]), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert!(status.pages[0].kept_original);
    assert_eq!(status.pages[0].state, PageState::Succeeded);
    assert!(!status.pages[1].kept_original);
    assert_eq!(engine.recognize_calls(0), 0);
    assert_eq!(engine.recognize_calls(1), 1);

    let texts = page_texts(&service, id).await;
    assert!(texts[0].contains("Invoice"), "{texts:?}");
    assert_eq!(texts[1], expected_text(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_ocr_recognizes_pages_with_text() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let id = service
        .submit(
            text_pdf(&["Invoice", "Receipt"]),
            SubmitOptions::default().existing_text(ExistingTextPolicy::Ocr),
        )
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert!(status.pages.iter().all(|page| !page.kept_original));
    assert_eq!(engine.total_recognize_calls(), 2);
    assert_eq!(
        page_texts(&service, id).await,
        vec![expected_text(1), expected_text(2)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn image_upload_becomes_a_searchable_page() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let id = service
        .submit(sample_image(300, 400, ImageFormat::Png), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.page_count, 1);
    assert_eq!(page_texts(&service, id).await, vec![expected_text(1)]);
}

// ── Retries and failure policies ─────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_failures_are_retried_until_success() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_failure(1, MockFailure::TransientTimes(2)));
    let service = start(base_config(&dir, 2).max_retries(3).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(3, None), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(engine.recognize_calls(1), 3);
    assert_eq!(status.pages[1].attempts, 3);
    assert_eq!(page_texts(&service, id).await[1], expected_text(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_retries_fail_the_job_when_fail_closed() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_failure(0, MockFailure::AlwaysTransient));
    let config = base_config(&dir, 2)
        .max_retries(2)
        .failure_policy(FailurePolicy::FailClosed)
        .build()
        .unwrap();
    let service = start(config, &engine);

    let id = service
        .submit(sample_pdf(3, None), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(engine.recognize_calls(0), 3);
    assert_eq!(status.failed_page_numbers(), vec![1]);
    assert_eq!(status.failed_pages[0].kind, "engine");
    assert!(status.error.as_deref().unwrap().contains("1 of 3 pages failed"));

    assert!(matches!(
        service.result(id).await,
        Err(OcrError::NoArtifact {
            state: JobState::Failed,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_retries_keep_the_page_without_text_when_best_effort() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_failure(0, MockFailure::AlwaysTransient));
    let service = start(base_config(&dir, 2).max_retries(2).build().unwrap(), &engine);

    let options = SubmitOptions::default().failure_policy(FailurePolicy::BestEffort);
    let id = service.submit(sample_pdf(3, None), options).await.unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::PartiallyFailed);
    assert_eq!(engine.recognize_calls(0), 3);
    assert_eq!(status.failed_page_numbers(), vec![1]);

    let texts = page_texts(&service, id).await;
    assert_eq!(texts, vec![String::new(), expected_text(2), expected_text(3)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_pages_with_one_failing_raster_partially_fail_after_retries() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(
        MockEngine::new()
            .with_random_delay(Duration::from_millis(5))
            .with_raster_failure(16, MockFailure::AlwaysTransient),
    );
    let config = base_config(&dir, 4)
        .max_retries(2)
        .failure_policy(FailurePolicy::BestEffort)
        .build()
        .unwrap();
    let service = start(config, &engine);

    let id = service
        .submit(sample_pdf(50, None), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::PartiallyFailed);
    assert_eq!(status.failed_page_numbers(), vec![17]);
    assert_eq!(status.progress.succeeded, 49);
    assert_eq!(status.pages[16].state, PageState::Failed);
    assert_eq!(status.pages[16].attempts, 3);
    assert!(
        status.failed_pages[0].error.starts_with("rasterize"),
        "got: {}",
        status.failed_pages[0].error
    );
    assert_eq!(engine.stage_calls(Stage::Rasterize, 16), 3);
    assert_eq!(engine.recognize_calls(16), 0);

    let texts = page_texts(&service, id).await;
    assert_eq!(texts.len(), 50);
    for (i, text) in texts.iter().enumerate() {
        if i == 16 {
            assert!(text.is_empty());
        } else {
            assert_eq!(text, &expected_text(i + 1));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_failures_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_failure(1, MockFailure::Permanent));
    let config = base_config(&dir, 2)
        .max_retries(3)
        .failure_policy(FailurePolicy::BestEffort)
        .build()
        .unwrap();
    let service = start(config, &engine);

    let id = service
        .submit(sample_pdf(3, None), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::PartiallyFailed);
    assert_eq!(status.failed_page_numbers(), vec![2]);
    assert_eq!(status.pages[1].attempts, 1);
    assert_eq!(engine.recognize_calls(1), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_page_times_out_and_is_retried() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(
        MockEngine::new().with_failure(0, MockFailure::Hang(Duration::from_millis(300))),
    );
    let config = base_config(&dir, 2)
        .call_timeout_ms(50)
        .max_retries(1)
        .build()
        .unwrap();
    let service = start(config, &engine);

    let id = service
        .submit(sample_pdf(2, None), SubmitOptions::default())
        .await
        .unwrap();
    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.failed_pages[0].kind, "timeout");
    assert_eq!(status.pages[0].attempts, 2);
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_lets_running_pages_finish_and_skips_queued_ones() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(200)));
    let service = start(base_config(&dir, 5).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(10, None), SubmitOptions::default())
        .await
        .unwrap();
    eventually("five pages running", || service.health().pool.running_pages == 5).await;

    let outcome = service.cancel(id).unwrap();
    assert_eq!(outcome, CancelOutcome::Draining { running: 5 });
    assert_eq!(service.cancel(id).unwrap(), CancelOutcome::AlreadyRequested);

    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Cancelled);
    assert!(status.cancel_requested);
    assert_eq!(engine.total_rasterize_calls(), 5);
    assert_eq!(engine.total_recognize_calls(), 5);
    assert_eq!(status.progress.queued, 5);
    assert!(matches!(
        service.result(id).await,
        Err(OcrError::NoArtifact {
            state: JobState::Cancelled,
            ..
        })
    ));
    eventually("slots returned", || service.health().pool.queue_in_use == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_after_two_pages_starts_no_more_than_the_pool() {
    let dir = TempDir::new().unwrap();
    let peak = Arc::new(PeakRunning::default());
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(60)));
    let service = start_observed(base_config(&dir, 2).build().unwrap(), &engine, peak.clone());

    let id = service
        .submit(sample_pdf(10, None), SubmitOptions::default())
        .await
        .unwrap();
    eventually("two pages complete", || peak.completed.load(Ordering::SeqCst) >= 2).await;
    service.cancel(id).unwrap();

    let status = service.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Cancelled);
    let started = engine.total_rasterize_calls();
    assert!(started <= 2 + 2, "{started} pages started after cancel");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_a_finished_job_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(2, None), SubmitOptions::default())
        .await
        .unwrap();
    service.wait(id).await.unwrap();
    assert_eq!(
        service.cancel(id).unwrap(),
        CancelOutcome::AlreadyFinished(JobState::Completed)
    );
    assert!(service.result(id).await.is_ok());
}

// ── Submission and admission ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_input_creates_no_job() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let err = service
        .submit(b"this is not a pdf".to_vec(), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OcrError::Validation(ValidationError::Malformed { .. })
    ));
    assert_eq!(service.health().jobs.active(), 0);
    assert_eq!(service.health().pool.queue_in_use, 0);
    assert_eq!(engine.total_rasterize_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsupported_language_is_rejected_at_submission() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let config = base_config(&dir, 2)
        .supported_languages(["eng", "deu"])
        .build()
        .unwrap();
    let service = start(config, &engine);

    let err = service
        .submit(sample_pdf(1, None), SubmitOptions::default().languages("pan+eng"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OcrError::Validation(ValidationError::UnsupportedLanguage { ref code, .. }) if code == "pan"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_rejects_until_slots_come_back() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(40)));
    let config = base_config(&dir, 1)
        .queue_capacity(10)
        .admission(AdmissionMode::Reject, 0)
        .build()
        .unwrap();
    let service = start(config, &engine);

    let first = service
        .submit(sample_pdf(8, None), SubmitOptions::default())
        .await
        .unwrap();
    let err = service
        .submit(sample_pdf(5, None), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OcrError::ResourceExhausted {
            requested: 5,
            capacity: 10,
            ..
        }
    ));

    service.wait(first).await.unwrap();
    eventually("slots returned", || service.health().pool.queue_in_use == 0).await;
    let second = service
        .submit(sample_pdf(5, None), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(service.wait(second).await.unwrap().state, JobState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiting_admission_succeeds_once_capacity_frees() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(20)));
    let config = base_config(&dir, 2)
        .queue_capacity(4)
        .admission(AdmissionMode::Wait, 5_000)
        .build()
        .unwrap();
    let service = start(config, &engine);

    let first = service
        .submit(sample_pdf(4, None), SubmitOptions::default())
        .await
        .unwrap();
    let second = service
        .submit(sample_pdf(3, None), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(service.wait(first).await.unwrap().state, JobState::Completed);
    assert_eq!(service.wait(second).await.unwrap().state, JobState::Completed);
}

// ── Shutdown and retention ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_active_jobs_then_refuses_new_ones() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(20)));
    let service = start(base_config(&dir, 2).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(4, None), SubmitOptions::default())
        .await
        .unwrap();
    service.shutdown(Duration::from_secs(10)).await;

    assert_eq!(service.status(id).unwrap().state, JobState::Completed);
    assert!(!service.health().pool.accepting);
    assert!(matches!(
        service
            .submit(sample_pdf(1, None), SubmitOptions::default())
            .await,
        Err(OcrError::ShuttingDown)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_jobs_still_running_after_grace() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(150)));
    let service = start(base_config(&dir, 1).build().unwrap(), &engine);

    let id = service
        .submit(sample_pdf(6, None), SubmitOptions::default())
        .await
        .unwrap();
    eventually("first page running", || service.health().pool.running_pages == 1).await;
    service.shutdown(Duration::from_millis(20)).await;

    let status = service.status(id).unwrap();
    assert_eq!(status.state, JobState::Cancelled);
    assert!(engine.total_rasterize_calls() < 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_jobs_are_swept_with_their_artifacts() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let config = base_config(&dir, 2).retention_secs(0).build().unwrap();
    let service = start(config, &engine);

    let id = service
        .submit(sample_pdf(2, None), SubmitOptions::default())
        .await
        .unwrap();
    service.wait(id).await.unwrap();
    let path = service.artifact_path(id).unwrap();
    assert!(path.exists());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.sweep(), 1);
    assert!(matches!(
        service.status(id),
        Err(OcrError::JobNotFound { .. })
    ));
    assert!(!path.exists());
}

// ── One-shot entry point ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ocr_bytes_returns_the_searchable_pdf() {
    let config = OcrConfig::builder()
        .engine(ocrlayer::EngineKind::Mock)
        .dpi(72)
        .build()
        .unwrap();
    let output = ocrlayer::ocr_bytes(sample_pdf(2, None), SubmitOptions::default(), config)
        .await
        .unwrap();
    assert_eq!(output.status.state, JobState::Completed);
    let pages = ocrlayer::pipeline::assemble::text_layer(&output.pdf).unwrap();
    assert_eq!(pages, vec![expected_text(1), expected_text(2)]);
}

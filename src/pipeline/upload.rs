//! Upload stage: re-host embedded images and rewrite their references.
//!
//! The only parallel stage. Upload latency dominates the run's wall-clock
//! time, so image tasks fan out across a bounded worker pool; everything
//! else in the pipeline stays sequential. Concurrency is capped by two
//! semaphores — one for uploads, one for the remote-image download
//! pre-step — so network pressure is independent of how many files or
//! references a run contains. Every upload additionally passes through
//! the shared [`RateLimiter`] when QPS throttling is on.
//!
//! Failure granularity is per image, reporting granularity per file: a
//! failed image leaves its reference untouched and marks the owning file
//! failed, while the file's other references still get rewritten. The
//! rewrite itself happens exactly once per file, after all of that file's
//! tasks resolve, and commits atomically — concurrent tasks never
//! interleave writes into one Markdown file, and an abort never leaves a
//! half-rewritten file.

use crate::cancel::CancelToken;
use crate::error::{FileError, PipelineError};
use crate::limiter::RateLimiter;
use crate::report::{FailedFile, Stage, StageResult};
use crate::runlog::{RunEvent, RunLog};
use crate::uploader::Uploader;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

static RE_IMAGE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"!\[[^\]]*\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).unwrap());

/// Shared state of one upload stage invocation.
///
/// Built once per run and reused across files (and, in interleaved mode,
/// across per-file invocations) so the semaphores and limiter keep their
/// global meaning.
#[derive(Clone)]
pub struct UploadContext {
    pub uploader: Arc<dyn Uploader>,
    pub limiter: Option<Arc<RateLimiter>>,
    upload_slots: Arc<Semaphore>,
    download_slots: Arc<Semaphore>,
    upload_workers: usize,
    download_workers: usize,
    skip_prefixes: Vec<String>,
    http: reqwest::Client,
}

impl UploadContext {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        limiter: Option<Arc<RateLimiter>>,
        upload_workers: usize,
        download_workers: usize,
        skip_prefixes: Vec<String>,
    ) -> Self {
        let upload_workers = upload_workers.max(1);
        let download_workers = download_workers.max(1);
        Self {
            uploader,
            limiter,
            upload_slots: Arc::new(Semaphore::new(upload_workers)),
            download_slots: Arc::new(Semaphore::new(download_workers)),
            upload_workers,
            download_workers,
            skip_prefixes,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("default reqwest client"),
        }
    }

    fn is_skipped(&self, target: &str) -> bool {
        self.skip_prefixes.iter().any(|p| target.starts_with(p))
    }

    fn is_remote(target: &str) -> bool {
        target.starts_with("http://") || target.starts_with("https://")
    }
}

/// Run the upload stage over the canonical tree under `dir`.
pub async fn run(
    dir: &Path,
    ctx: &UploadContext,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<StageResult, PipelineError> {
    let files = super::discover_markdown(dir).map_err(|source| PipelineError::ScanFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    info!(
        "Step 3: processing images in {} files via '{}'",
        files.len(),
        ctx.uploader.name()
    );
    log.emit(RunEvent::StageStarted {
        stage: Stage::Upload,
        files: files.len(),
    });

    // Files run concurrently; the semaphores bound actual network
    // concurrency, so file-level parallelism past the total slot count
    // would only add idle tasks.
    let file_concurrency = ctx.upload_workers + ctx.download_workers;

    let mut outcomes: Vec<(usize, String, Option<String>)> =
        stream::iter(files.iter().enumerate().map(|(index, file)| async move {
            let outcome = process_file(file, ctx, cancel).await?;
            Ok::<_, PipelineError>((index, file.display().to_string(), outcome))
        }))
        .buffer_unordered(file_concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;

    // Restore discovery order for deterministic reporting.
    outcomes.sort_by_key(|(index, _, _)| *index);

    let mut success = Vec::new();
    let mut failed = Vec::new();
    for (_, file, error) in outcomes {
        log.emit(RunEvent::FileFinished {
            stage: Stage::Upload,
            file: file.clone(),
            error: error.clone(),
        });
        match error {
            None => success.push(file),
            Some(error) => failed.push(FailedFile { file, error }),
        }
    }

    Ok(StageResult::finish(success, failed, None))
}

/// Process one Markdown file: upload its images, rewrite once.
///
/// `Ok(None)` means every reference resolved; `Ok(Some(desc))` carries the
/// aggregated per-file failure description. `Err` is reserved for run
/// aborts.
async fn process_file(
    file: &Path,
    ctx: &UploadContext,
    cancel: &CancelToken,
) -> Result<Option<String>, PipelineError> {
    let file_name = file.display().to_string();
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            return Ok(Some(
                FileError::Rewrite {
                    file: file_name,
                    detail: format!("cannot read: {e}"),
                }
                .to_string(),
            ))
        }
    };

    let targets: Vec<String> = scan_refs(&text)
        .into_iter()
        .filter(|t| !ctx.is_skipped(t))
        .collect();
    if targets.is_empty() {
        // Nothing referenced (or everything already remote) is success.
        return Ok(None);
    }
    debug!("{file_name}: {} image references to re-host", targets.len());

    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let file_name_ref = &file_name;
    let results: Vec<(String, Result<String, FileError>)> =
        futures::future::join_all(targets.into_iter().map(|target| async move {
            let result = resolve_one(&target, base_dir, file_name_ref, ctx, cancel).await;
            (target, result)
        }))
        .await;

    if cancel.is_cancelled() {
        // Drop all outcomes: the file stays exactly as it was.
        return Err(PipelineError::Aborted);
    }

    let mut replacements: HashMap<String, String> = HashMap::new();
    let mut errors: Vec<String> = Vec::new();
    for (target, result) in results {
        match result {
            Ok(url) => {
                replacements.insert(target, url);
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    if !replacements.is_empty() {
        let rewritten = rewrite_refs(&text, &replacements);
        if let Err(e) = commit(file, &rewritten) {
            errors.push(e.to_string());
        }
    }

    if errors.is_empty() {
        Ok(None)
    } else {
        Ok(Some(errors.join("; ")))
    }
}

/// Resolve one reference to its hosted URL: optional download pre-step,
/// worker-slot acquisition, QPS gate, upload.
async fn resolve_one(
    target: &str,
    base_dir: &Path,
    owning_file: &str,
    ctx: &UploadContext,
    cancel: &CancelToken,
) -> Result<String, FileError> {
    let aborted = || FileError::Upload {
        file: owning_file.to_string(),
        image: target.to_string(),
        detail: "run aborted".into(),
    };

    // Remote references that are not skip-listed get re-hosted: fetch to a
    // temp file first, bounded by the download pool.
    let _download_guard;
    let local_path;
    if UploadContext::is_remote(target) {
        let permit = tokio::select! {
            p = ctx.download_slots.acquire() => p.expect("download semaphore never closed"),
            _ = cancel.cancelled() => return Err(aborted()),
        };
        let dir = tempfile::tempdir().map_err(|e| FileError::Download {
            file: owning_file.to_string(),
            url: target.to_string(),
            detail: format!("tempdir: {e}"),
        })?;
        let path = dir.path().join(remote_filename(target));
        let fetched = tokio::select! {
            r = fetch(&ctx.http, target, &path) => r,
            _ = cancel.cancelled() => return Err(aborted()),
        };
        drop(permit);
        fetched.map_err(|detail| FileError::Download {
            file: owning_file.to_string(),
            url: target.to_string(),
            detail,
        })?;
        local_path = path;
        _download_guard = Some(dir);
    } else {
        let candidate = base_dir.join(target);
        if !candidate.is_file() {
            return Err(FileError::Upload {
                file: owning_file.to_string(),
                image: target.to_string(),
                detail: "referenced file does not exist".into(),
            });
        }
        local_path = candidate;
        _download_guard = None;
    }

    let _permit = tokio::select! {
        p = ctx.upload_slots.acquire() => p.expect("upload semaphore never closed"),
        _ = cancel.cancelled() => return Err(aborted()),
    };

    if let Some(ref limiter) = ctx.limiter {
        limiter.acquire(cancel).await.map_err(|_| aborted())?;
    }

    let uploaded = tokio::select! {
        r = ctx.uploader.upload(&local_path) => r,
        _ = cancel.cancelled() => return Err(aborted()),
    };

    uploaded.map_err(|e| FileError::Upload {
        file: owning_file.to_string(),
        image: target.to_string(),
        detail: e.cause,
    })
}

async fn fetch(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("body read failed: {e}"))?;
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| format!("write failed: {e}"))
}

fn remote_filename(url: &str) -> String {
    url.split('/')
        .next_back()
        .map(|s| s.split(['?', '#']).next().unwrap_or(s))
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .to_string()
}

/// Unique image-reference targets in order of first appearance.
pub(crate) fn scan_refs(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in RE_IMAGE_REF.captures_iter(text) {
        let target = caps[1].to_string();
        if !seen.contains(&target) {
            seen.push(target);
        }
    }
    seen
}

/// Replace resolved targets inside their `](...)` spans, leaving all other
/// content — including unresolved references — byte-identical.
pub(crate) fn rewrite_refs(text: &str, replacements: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (target, url) in replacements {
        out = out.replace(&format!("]({target})"), &format!("]({url})"));
        out = out.replace(&format!("]({target} "), &format!("]({url} "));
    }
    out
}

/// Atomic per-file commit: temp file in the same directory, then rename.
fn commit(path: &Path, content: &str) -> Result<(), FileError> {
    let file = path.display().to_string();
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, content).map_err(|e| FileError::Rewrite {
        file: file.clone(),
        detail: format!("cannot write '{}': {e}", tmp.display()),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        FileError::Rewrite {
            file,
            detail: format!("cannot replace original: {e}"),
        }
    })
}

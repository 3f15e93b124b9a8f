//! Pipeline orchestration: stage sequencing, mode dispatch, finalization.
//!
//! The orchestrator owns the state machine over the three stages. In
//! batch mode each selected stage runs to completion across every file
//! before the next begins, and a stage that records any failure gates the
//! rest of the run (`failed at step N`). In interleaved mode each file
//! runs all its selected stages — against an isolated temporary copy —
//! before the next file starts, so one file's late-stage failure never
//! blocks the others.
//!
//! Whatever happens — clean finish, gated failure, fatal error, abort —
//! the run log is finalized exactly once and the summary files land on
//! disk before control returns to the caller.

use crate::cancel::CancelToken;
use crate::chunker::{Chunker, HeadingChunker};
use crate::config::{JobConfig, RunMode};
use crate::converter::Converter;
use crate::error::PipelineError;
use crate::limiter::RateLimiter;
use crate::pipeline::upload::UploadContext;
use crate::pipeline::{convert, split, upload};
use crate::report::{FailedFile, RunSummary, Stage, StageResult};
use crate::runlog::{RunEvent, RunLog};
use crate::settings::UploaderSettings;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

/// One configured, not-yet-started pipeline run.
///
/// Construction builds every collaborator (uploader, limiter, run log) so
/// configuration problems surface before any file is touched. Subscribe
/// to progress *before* calling [`Pipeline::run`]; the run consumes the
/// pipeline because the sealed [`RunSummary`] can only be produced once.
pub struct Pipeline {
    job: JobConfig,
    converter: Converter,
    chunker: Arc<dyn Chunker>,
    upload_ctx: Option<UploadContext>,
    log: Option<RunLog>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Build collaborators and open the run log.
    pub fn new(job: JobConfig) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&job.output_dir).map_err(|source| {
            PipelineError::OutputDirFailed {
                path: job.output_dir.clone(),
                source,
            }
        })?;

        let log = RunLog::new(&job.output_dir)?;

        let upload_ctx = if job.stages.contains(Stage::Upload) {
            let uploader = match &job.uploader_instance {
                Some(uploader) => Arc::clone(uploader),
                None => {
                    let kind = job.uploader.as_ref().ok_or_else(|| {
                        PipelineError::InvalidConfig(
                            "the upload stage is selected but no uploader is configured".into(),
                        )
                    })?;
                    let settings = UploaderSettings::load(job.settings_path.as_deref())?;
                    kind.build(&settings)?
                }
            };
            Some(UploadContext::new(
                uploader,
                RateLimiter::from_qps(job.qps),
                job.upload_workers,
                job.download_workers,
                job.skip_prefixes.clone(),
            ))
        } else {
            None
        };

        let converter = Converter::new(job.converter.clone());
        let chunker: Arc<dyn Chunker> = Arc::new(HeadingChunker::new(job.max_chunk_chars));

        Ok(Self {
            job,
            converter,
            chunker,
            upload_ctx,
            log: Some(log),
            cancel: CancelToken::new(),
        })
    }

    /// Substitute the chunk-boundary function.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Token that aborts the run when fired (e.g. from a ctrl-c handler).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.log.as_ref().expect("log present until run").subscribe()
    }

    /// The same events as [`Pipeline::subscribe`], as a `Stream`.
    pub fn event_stream(&self) -> BroadcastStream<RunEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Execute the run. Always finalizes the run log; returns the sealed
    /// summary on any non-fatal outcome (including gated stage failures).
    pub async fn run(mut self) -> Result<RunSummary, PipelineError> {
        let mut log = self.log.take().expect("run called once");
        info!("Starting run: {:?}", self.job);

        match self.execute(&mut log).await {
            Ok(status) => log.finalize(status),
            Err(e) => {
                let status = match &e {
                    PipelineError::Aborted => "aborted".to_string(),
                    other => format!("failed with error: {other}"),
                };
                // The fatal error is what the caller needs to see; a
                // secondary finalize failure is logged and dropped.
                if let Err(log_err) = log.finalize(status) {
                    warn!("finalize failed after fatal error: {log_err}");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, log: &mut RunLog) -> Result<String, PipelineError> {
        let interleaved =
            self.job.mode == RunMode::Interleaved && self.job.stages.contains(Stage::Convert);
        if self.job.mode == RunMode::Interleaved && !interleaved {
            // Without a convert stage there is no per-file conversion to
            // interleave behind; the stages degenerate to a batch run.
            warn!("interleaved mode without step 1 selected; running as batch");
        }

        if interleaved {
            self.run_interleaved(log).await
        } else {
            self.run_batch(log).await
        }
    }

    // ── Batch mode ───────────────────────────────────────────────────────

    async fn run_batch(&self, log: &mut RunLog) -> Result<String, PipelineError> {
        let out = &self.job.output_dir;

        for stage in Stage::ALL {
            if !self.job.stages.contains(stage) {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Aborted);
            }

            let result = match stage {
                Stage::Convert => {
                    let files = convert::discover_sources(&self.job.input_dir)?;
                    info!("Discovered {} source documents", files.len());
                    convert::run_batch(&self.converter, &files, out, log, &self.cancel).await?
                }
                Stage::Split => {
                    split::run(out, self.chunker.as_ref(), log, &self.cancel).await?
                }
                Stage::Upload => {
                    let ctx = self
                        .upload_ctx
                        .as_ref()
                        .expect("upload context built for selected upload stage");
                    upload::run(out, ctx, log, &self.cancel).await?
                }
            };

            let completed = result.is_completed();
            log.record_stage(stage, result);
            if !completed {
                return Ok(format!("failed at step {}", stage.number()));
            }
        }

        Ok(format!(
            "completed steps: {}",
            self.job.stages.numbers_string()
        ))
    }

    // ── Interleaved mode ─────────────────────────────────────────────────

    async fn run_interleaved(&self, log: &mut RunLog) -> Result<String, PipelineError> {
        let out = &self.job.output_dir;
        let files = convert::discover_sources(&self.job.input_dir)?;
        info!(
            "Discovered {} source documents (interleaved mode)",
            files.len()
        );
        log.emit(RunEvent::StageStarted {
            stage: Stage::Convert,
            files: files.len(),
        });

        let mut acc = InterleavedAccumulator::default();

        for file in &files {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Aborted);
            }

            let file_name = file.display().to_string();
            let canonical_md = match self.converter.convert(file, out, &self.cancel).await {
                Ok(path) => path,
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        return Err(PipelineError::Aborted);
                    }
                    log.emit(RunEvent::FileFinished {
                        stage: Stage::Convert,
                        file: file_name,
                        error: Some(e.to_string()),
                    });
                    acc.convert_failed.push(FailedFile::from(&e));
                    continue;
                }
            };
            log.emit(RunEvent::FileFinished {
                stage: Stage::Convert,
                file: file_name.clone(),
                error: None,
            });

            let stem_dir = canonical_md
                .parent()
                .expect("canonical markdown lives in a stem directory")
                .to_path_buf();

            match self.post_stages_on_copy(&stem_dir, log).await? {
                Ok(post) => {
                    acc.merge(post);
                    acc.convert_success.push(file_name);
                }
                Err(install_error) => {
                    // The processed copy could not replace the canonical
                    // output, so the file's conversion result is unusable.
                    acc.convert_failed.push(FailedFile {
                        file: file_name,
                        error: install_error,
                    });
                }
            }
        }

        log.record_stage(
            Stage::Convert,
            StageResult::finish(acc.convert_success, acc.convert_failed, None),
        );
        if self.job.stages.contains(Stage::Split) {
            log.record_stage(
                Stage::Split,
                StageResult::finish(acc.split_success, acc.split_failed, None),
            );
        }
        if self.job.stages.contains(Stage::Upload) {
            log.record_stage(
                Stage::Upload,
                StageResult::finish(acc.upload_success, acc.upload_failed, None),
            );
        }

        Ok("completed with individual processing".into())
    }

    /// Run the selected later stages against an isolated copy of one
    /// file's canonical directory, then swap the processed copy in.
    ///
    /// Outer `Err` aborts the run; inner `Err(String)` means the swap
    /// failed and the file must be counted against the convert stage.
    async fn post_stages_on_copy(
        &self,
        stem_dir: &Path,
        log: &RunLog,
    ) -> Result<Result<PostStageOutcome, String>, PipelineError> {
        let mut outcome = PostStageOutcome::default();
        let wants_split = self.job.stages.contains(Stage::Split);
        let wants_upload = self.job.stages.contains(Stage::Upload);
        if !wants_split && !wants_upload {
            return Ok(Ok(outcome));
        }

        let out = &self.job.output_dir;
        let temp = match tempfile::Builder::new()
            .prefix(".ragprep-work-")
            .tempdir_in(out)
        {
            Ok(temp) => temp,
            Err(e) => return Ok(Err(format!("cannot create working copy: {e}"))),
        };
        let stem_name = stem_dir
            .file_name()
            .expect("stem directory has a name")
            .to_os_string();
        let work_dir = temp.path().join(&stem_name);
        if let Err(e) = copy_dir_recursive(stem_dir, &work_dir) {
            return Ok(Err(format!("cannot populate working copy: {e}")));
        }

        let mut split_ok = true;
        if wants_split {
            let result = split::run(temp.path(), self.chunker.as_ref(), log, &self.cancel).await?;
            split_ok = result.is_completed();
            outcome.absorb_split(remap_paths(result, temp.path(), out));
        }

        // Stage gating holds per file: a failed split means this file's
        // upload stage never runs (other files are unaffected).
        if wants_upload && split_ok {
            let ctx = self
                .upload_ctx
                .as_ref()
                .expect("upload context built for selected upload stage");
            let result = upload::run(temp.path(), ctx, log, &self.cancel).await?;
            outcome.absorb_upload(remap_paths(result, temp.path(), out));
        }

        // Each stage commits its rewrites atomically, so the working copy
        // is consistent even when failures were recorded; swap it in.
        if let Err(e) = std::fs::remove_dir_all(stem_dir) {
            return Ok(Err(format!("cannot clear canonical output: {e}")));
        }
        if let Err(e) = copy_dir_recursive(&work_dir, stem_dir) {
            return Ok(Err(format!("cannot install processed copy: {e}")));
        }

        Ok(Ok(outcome))
    }
}

/// Per-stage tallies accumulated across an interleaved run.
#[derive(Default)]
struct InterleavedAccumulator {
    convert_success: Vec<String>,
    convert_failed: Vec<FailedFile>,
    split_success: Vec<String>,
    split_failed: Vec<FailedFile>,
    upload_success: Vec<String>,
    upload_failed: Vec<FailedFile>,
}

impl InterleavedAccumulator {
    fn merge(&mut self, post: PostStageOutcome) {
        self.split_success.extend(post.split_success);
        self.split_failed.extend(post.split_failed);
        self.upload_success.extend(post.upload_success);
        self.upload_failed.extend(post.upload_failed);
    }
}

/// One file's later-stage results, with paths remapped out of the
/// temporary working directory.
#[derive(Default)]
struct PostStageOutcome {
    split_success: Vec<String>,
    split_failed: Vec<FailedFile>,
    upload_success: Vec<String>,
    upload_failed: Vec<FailedFile>,
}

impl PostStageOutcome {
    fn absorb_split(&mut self, result: StageResult) {
        self.split_success.extend(result.success);
        self.split_failed.extend(result.failed);
    }

    fn absorb_upload(&mut self, result: StageResult) {
        self.upload_success.extend(result.success);
        self.upload_failed.extend(result.failed);
    }
}

/// Rewrite working-copy paths in a stage result so reports name the
/// canonical locations the user knows.
fn remap_paths(mut result: StageResult, temp_root: &Path, out_root: &Path) -> StageResult {
    let from = temp_root.display().to_string();
    let to = out_root.display().to_string();
    for s in &mut result.success {
        *s = s.replace(&from, &to);
    }
    for f in &mut result.failed {
        f.file = f.file.replace(&from, &to);
        f.error = f.error.replace(&from, &to);
    }
    result
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Convenience entry point: build and run a pipeline in one call.
pub async fn run_job(job: JobConfig) -> Result<RunSummary, PipelineError> {
    Pipeline::new(job)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_dir_recursive_copies_nested_trees() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("images")).unwrap();
        std::fs::write(src.join("doc.md"), "text").unwrap();
        std::fs::write(src.join("images/a.png"), "png").unwrap();

        let dst = dir.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(std::fs::read_to_string(dst.join("doc.md")).unwrap(), "text");
        assert!(dst.join("images/a.png").is_file());
    }

    #[test]
    fn remap_paths_rewrites_temp_prefixes() {
        let result = StageResult::finish(
            vec!["/out/.tmp123/doc/doc.md".into()],
            vec![FailedFile {
                file: "/out/.tmp123/other/other.md".into(),
                error: "upload of '/out/.tmp123/other/images/x.png' failed".into(),
            }],
            None,
        );
        let remapped = remap_paths(
            result,
            Path::new("/out/.tmp123"),
            Path::new("/out"),
        );
        assert_eq!(remapped.success[0], "/out/doc/doc.md");
        assert_eq!(remapped.failed[0].file, "/out/other/other.md");
        assert!(remapped.failed[0].error.contains("/out/other/images/x.png"));
    }
}

//! Split stage: insert chunk-boundary markers into each Markdown file.
//!
//! The chunker is a pure function, so this executor's whole job is I/O
//! discipline: read, compute boundaries, rewrite in place atomically
//! (temp file + rename), never drop a byte of content. Zero boundaries is
//! a perfectly fine outcome — a short file is one chunk.

use crate::cancel::CancelToken;
use crate::chunker::{insert_markers, Chunker};
use crate::error::{FileError, PipelineError};
use crate::report::{FailedFile, Stage, StageResult};
use crate::runlog::{RunEvent, RunLog};
use std::path::Path;
use tracing::info;

use super::discover_markdown;

/// Run the split stage over the canonical tree under `dir`.
pub async fn run(
    dir: &Path,
    chunker: &dyn Chunker,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<StageResult, PipelineError> {
    let files = discover_markdown(dir).map_err(|source| PipelineError::ScanFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    info!("Step 2: splitting {} markdown files", files.len());
    log.emit(RunEvent::StageStarted {
        stage: Stage::Split,
        files: files.len(),
    });

    let mut success = Vec::new();
    let mut failed = Vec::new();

    for file in &files {
        if cancel.is_cancelled() {
            return Err(PipelineError::Aborted);
        }

        match split_file(file, chunker) {
            Ok(chunks) => {
                success.push(file.display().to_string());
                log.emit(RunEvent::FileFinished {
                    stage: Stage::Split,
                    file: format!("{} ({chunks} chunks)", file.display()),
                    error: None,
                });
            }
            Err(e) => {
                log.emit(RunEvent::FileFinished {
                    stage: Stage::Split,
                    file: file.display().to_string(),
                    error: Some(e.to_string()),
                });
                failed.push(FailedFile::from(&e));
            }
        }
    }

    Ok(StageResult::finish(success, failed, None))
}

/// Split one file in place. Returns the resulting chunk count.
pub fn split_file(path: &Path, chunker: &dyn Chunker) -> Result<usize, FileError> {
    let file = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| FileError::Split {
        file: file.clone(),
        detail: format!("cannot read: {e}"),
    })?;

    let boundaries = chunker.boundaries(&text);
    if boundaries.is_empty() {
        return Ok(1);
    }

    let rewritten = insert_markers(&text, &boundaries);

    // Commit atomically so an interrupted run never leaves a
    // half-written Markdown file behind.
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, &rewritten).map_err(|e| FileError::Split {
        file: file.clone(),
        detail: format!("cannot write '{}': {e}", tmp.display()),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        FileError::Split {
            file,
            detail: format!("cannot replace original: {e}"),
        }
    })?;

    Ok(boundaries.len() + 1)
}

//! Convert stage: drive the external converter over each source document.
//!
//! Conversion runs strictly sequentially — the external tools are
//! OCR-heavy and already saturate the host per invocation, so overlapping
//! them buys contention, not throughput. One document's failure is
//! recorded and the batch moves on; only an external abort stops the
//! loop early.

use crate::cancel::CancelToken;
use crate::converter::Converter;
use crate::error::PipelineError;
use crate::report::{FailedFile, Stage, StageResult};
use crate::runlog::{RunEvent, RunLog};
use std::path::{Path, PathBuf};
use tracing::info;

use super::has_extension;

/// Discover source PDFs directly under `input_dir`, in stable
/// lexicographic order. That order fixes per-file processing, report
/// ordering, and (in interleaved mode) the order later stages see files.
pub fn discover_sources(input_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !input_dir.is_dir() {
        return Err(PipelineError::InputDirNotFound {
            path: input_dir.to_path_buf(),
        });
    }
    let entries = std::fs::read_dir(input_dir).map_err(|source| PipelineError::ScanFailed {
        path: input_dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, "pdf"))
        .collect();
    files.sort();
    Ok(files)
}

/// Run the convert stage over the whole file set (batch mode).
pub async fn run_batch(
    converter: &Converter,
    files: &[PathBuf],
    output_dir: &Path,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<StageResult, PipelineError> {
    info!(
        "Step 1: converting {} documents with {}",
        files.len(),
        converter.kind().name()
    );
    log.emit(RunEvent::StageStarted {
        stage: Stage::Convert,
        files: files.len(),
    });

    let mut success = Vec::new();
    let mut failed = Vec::new();

    for file in files {
        if cancel.is_cancelled() {
            return Err(PipelineError::Aborted);
        }

        match converter.convert(file, output_dir, cancel).await {
            Ok(_canonical) => {
                success.push(file.display().to_string());
                log.emit(RunEvent::FileFinished {
                    stage: Stage::Convert,
                    file: file.display().to_string(),
                    error: None,
                });
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Aborted);
                }
                log.emit(RunEvent::FileFinished {
                    stage: Stage::Convert,
                    file: file.display().to_string(),
                    error: Some(e.to_string()),
                });
                failed.push(FailedFile::from(&e));
            }
        }
    }

    Ok(StageResult::finish(success, failed, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{ConverterKind, OutputLayout};
    use tempfile::tempdir;

    fn script_converter(script: &str) -> Converter {
        Converter::new(ConverterKind::Custom {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            layout: OutputLayout::Flat,
        })
    }

    #[test]
    fn discovery_is_sorted_and_pdf_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), "x").unwrap();
        std::fs::write(dir.path().join("a.pdf"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let files = discover_sources(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn missing_input_dir_is_fatal() {
        let err = discover_sources(Path::new("/no/such/dir")).unwrap_err();
        assert!(matches!(err, PipelineError::InputDirNotFound { .. }));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            std::fs::write(input.join(name), "%PDF-1.4").unwrap();
        }

        // Succeeds for everything except b.pdf.
        let converter = script_converter(
            r#"case "{input}" in *b.pdf) exit 1;; esac
               stem=$(basename "{input}" .pdf)
               mkdir -p "{output}/$stem"
               printf 'converted\n' > "{output}/$stem/$stem.md""#,
        );

        let log = RunLog::new(&output).unwrap();
        let files = discover_sources(&input).unwrap();
        let result = run_batch(&converter, &files, &output, &log, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.success.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].file.ends_with("b.pdf"));
        assert!(!result.is_completed());
        assert!(output.join("a/a.md").is_file());
        assert!(output.join("c/c.md").is_file());
    }

    #[tokio::test]
    async fn empty_input_set_completes() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out");
        std::fs::create_dir_all(&output).unwrap();
        let log = RunLog::new(&output).unwrap();

        let converter = script_converter("exit 0");
        let result = run_batch(&converter, &[], &output, &log, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.is_completed());
        assert!(result.success.is_empty());
    }
}

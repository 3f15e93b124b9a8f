//! Per-run logging and result accumulation.
//!
//! Every run constructs its own [`RunLog`] bound to the run's output
//! directory — there is no process-wide logging singleton, so two runs in
//! one process never interleave their records. A run log owns three
//! things:
//!
//! * the line log `logs/process_{ts}.log` (plus mirrored `tracing` events
//!   for whatever subscriber the host application installed);
//! * the in-memory [`RunSummary`], appended to as stages record results
//!   and sealed by [`RunLog::finalize`], which consumes the log — there
//!   is no way to record into a finalized summary;
//! * a broadcast channel of [`RunEvent`]s. Consoles, UIs, and tests
//!   subscribe instead of polling; the pipeline never knows who listens.
//!
//! Finalize writes `summary_{ts}.json` (machine-readable) and
//! `summary_{ts}.txt` (human-readable) exactly once per run.

use crate::error::PipelineError;
use crate::report::{RunSummary, Stage, StageResult, StageStatus, StepReports};
use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Progress events published while a run executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A stage began over `files` file units.
    StageStarted { stage: Stage, files: usize },
    /// One file unit finished a stage; `error` is set on failure.
    FileFinished {
        stage: Stage,
        file: String,
        error: Option<String>,
    },
    /// A stage's result was recorded.
    StageFinished {
        stage: Stage,
        status: StageStatus,
        success: usize,
        failed: usize,
    },
    /// The run is over; the summary files have been written.
    Finalized { overall_status: String },
}

/// Run-scoped log and summary accumulator.
pub struct RunLog {
    log_dir: PathBuf,
    timestamp: String,
    line_log: Mutex<std::fs::File>,
    summary: RunSummary,
    events: broadcast::Sender<RunEvent>,
}

impl RunLog {
    /// Create `{output_dir}/logs/` and open this run's line log.
    pub fn new(output_dir: &Path) -> Result<Self, PipelineError> {
        let log_dir = output_dir.join("logs");
        std::fs::create_dir_all(&log_dir).map_err(|source| PipelineError::OutputDirFailed {
            path: log_dir.clone(),
            source,
        })?;

        let now = Local::now();
        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
        let log_path = log_dir.join(format!("process_{timestamp}.log"));
        let line_log =
            std::fs::File::create(&log_path).map_err(|source| PipelineError::LogWriteFailed {
                path: log_path,
                source,
            })?;

        let (events, _) = broadcast::channel(64);

        Ok(Self {
            log_dir,
            timestamp,
            line_log: Mutex::new(line_log),
            summary: RunSummary {
                start_time: now.to_rfc3339(),
                end_time: None,
                steps: StepReports::default(),
                overall_status: "pending".into(),
            },
            events,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Subscribe to run events. Any number of consumers may listen; a slow
    /// consumer only loses its own backlog, never the run's records.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Publish an event and mirror it into the line log.
    pub fn emit(&self, event: RunEvent) {
        match &event {
            RunEvent::StageStarted { stage, files } => {
                self.line(format!("Step {stage} started over {files} files"));
            }
            RunEvent::FileFinished { stage, file, error } => match error {
                None => self.line(format!("{stage}: {file} ok")),
                Some(e) => self.warn_line(format!("{stage}: {file} failed: {e}")),
            },
            RunEvent::StageFinished { .. } | RunEvent::Finalized { .. } => {}
        }
        // Errors only mean "no subscribers"; the run does not care.
        let _ = self.events.send(event);
    }

    /// Fold one stage result into the summary and log the tally.
    pub fn record_stage(&mut self, stage: Stage, result: StageResult) {
        info!(
            "Step {stage}: {} succeeded, {} failed",
            result.success.len(),
            result.failed.len()
        );
        self.line(format!("Step {stage} finished"));
        self.line(format!("Success: {} files", result.success.len()));
        self.line(format!("Failed: {} files", result.failed.len()));
        if !result.failed.is_empty() {
            self.warn_line(format!("Failed files in {stage}:"));
            for f in &result.failed {
                self.warn_line(format!("  - {}: {}", f.file, f.error));
            }
        }

        let _ = self.events.send(RunEvent::StageFinished {
            stage,
            status: result.status,
            success: result.success.len(),
            failed: result.failed.len(),
        });
        self.summary.steps.set(stage, result);
    }

    /// Seal the summary and write the JSON and text reports.
    ///
    /// Consuming `self` is what enforces the append-only invariant: once
    /// finalized, no further stage can be recorded.
    pub fn finalize(mut self, overall_status: impl Into<String>) -> Result<RunSummary, PipelineError> {
        let overall_status = overall_status.into();
        self.summary.end_time = Some(Local::now().to_rfc3339());
        self.summary.overall_status = overall_status.clone();
        self.line(format!("Run finalized: {overall_status}"));

        let json_path = self.log_dir.join(format!("summary_{}.json", self.timestamp));
        let json = serde_json::to_string_pretty(&self.summary)
            .map_err(|e| PipelineError::Internal(format!("summary serialisation: {e}")))?;
        std::fs::write(&json_path, json).map_err(|source| PipelineError::LogWriteFailed {
            path: json_path,
            source,
        })?;

        let txt_path = self.log_dir.join(format!("summary_{}.txt", self.timestamp));
        std::fs::write(&txt_path, readable_summary(&self.summary)).map_err(|source| {
            PipelineError::LogWriteFailed {
                path: txt_path,
                source,
            }
        })?;

        let _ = self.events.send(RunEvent::Finalized { overall_status });
        Ok(self.summary)
    }

    fn line(&self, msg: String) {
        self.write_line("INFO", &msg);
    }

    fn warn_line(&self, msg: String) {
        warn!("{msg}");
        self.write_line("WARNING", &msg);
    }

    fn write_line(&self, level: &str, msg: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = self
            .line_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A failed log line must not fail the run it is reporting on.
        let _ = writeln!(file, "{stamp} - {level} - {msg}");
    }
}

/// Render the human-readable `summary_{ts}.txt`.
fn readable_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("Processing summary\n");
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");
    out.push_str(&format!("Start time: {}\n", summary.start_time));
    out.push_str(&format!(
        "End time: {}\n",
        summary.end_time.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!("Overall status: {}\n\n", summary.overall_status));

    for stage in Stage::ALL {
        let result = summary.steps.get(stage);
        out.push_str(&format!("\n{stage} step result:\n"));
        out.push_str(&"-".repeat(30));
        out.push('\n');
        out.push_str(&format!("Status: {}\n", result.status));
        out.push_str(&format!("Succeeded files: {}\n", result.success.len()));
        out.push_str(&format!("Failed files: {}\n", result.failed.len()));

        if !result.failed.is_empty() {
            out.push_str("\nFailed files:\n");
            for f in &result.failed {
                out.push_str(&format!("  - {}: {}\n", f.file, f.error));
            }
        }
        if let Some(ref e) = result.error {
            out.push_str(&format!("\nError: {e}\n"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FailedFile;
    use tempfile::tempdir;

    fn finished(success: &[&str], failed: &[(&str, &str)]) -> StageResult {
        StageResult::finish(
            success.iter().map(|s| s.to_string()).collect(),
            failed
                .iter()
                .map(|(f, e)| FailedFile {
                    file: f.to_string(),
                    error: e.to_string(),
                })
                .collect(),
            None,
        )
    }

    #[test]
    fn creates_log_dir_and_line_log() {
        let dir = tempdir().unwrap();
        let log = RunLog::new(dir.path()).unwrap();
        let log_path = log
            .log_dir()
            .join(format!("process_{}.log", log.timestamp()));
        assert!(log_path.is_file());
    }

    #[test]
    fn finalize_writes_json_and_txt_once() {
        let dir = tempdir().unwrap();
        let mut log = RunLog::new(dir.path()).unwrap();
        let ts = log.timestamp().to_string();

        log.record_stage(Stage::Convert, finished(&["a.pdf"], &[("b.pdf", "boom")]));
        let summary = log.finalize("failed at step 1").unwrap();

        assert_eq!(summary.overall_status, "failed at step 1");
        assert!(summary.end_time.is_some());

        let json_path = dir.path().join(format!("logs/summary_{ts}.json"));
        let txt_path = dir.path().join(format!("logs/summary_{ts}.txt"));
        assert!(json_path.is_file());
        assert!(txt_path.is_file());

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(parsed["overall_status"], "failed at step 1");
        assert_eq!(parsed["steps"]["pdf_to_md"]["status"], "failed");
        assert_eq!(parsed["steps"]["split_md"]["status"], "pending");
        assert_eq!(parsed["steps"]["pdf_to_md"]["failed"][0]["file"], "b.pdf");

        let txt = std::fs::read_to_string(txt_path).unwrap();
        assert!(txt.contains("failed at step 1"));
        assert!(txt.contains("b.pdf"));
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let dir = tempdir().unwrap();
        let mut log = RunLog::new(dir.path()).unwrap();
        let mut rx = log.subscribe();

        log.emit(RunEvent::StageStarted {
            stage: Stage::Convert,
            files: 2,
        });
        log.record_stage(Stage::Convert, finished(&["a.pdf", "b.pdf"], &[]));

        match rx.recv().await.unwrap() {
            RunEvent::StageStarted { stage, files } => {
                assert_eq!(stage, Stage::Convert);
                assert_eq!(files, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            RunEvent::StageFinished {
                status, success, ..
            } => {
                assert_eq!(status, StageStatus::Completed);
                assert_eq!(success, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let dir = tempdir().unwrap();
        let log = RunLog::new(dir.path()).unwrap();
        log.emit(RunEvent::FileFinished {
            stage: Stage::Upload,
            file: "x.md".into(),
            error: Some("nope".into()),
        });
    }
}

//! Result types shared by the stage executors and the run log.
//!
//! A stage executor produces exactly one [`StageResult`] per invocation;
//! the orchestrator hands it to [`crate::runlog::RunLog`], which folds it
//! into the run's [`RunSummary`]. All types serialise to the summary JSON
//! shape written under `{output_dir}/logs/`.

use crate::error::FileError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three pipeline stages, in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Stage 1: run the external converter over each source document.
    Convert,
    /// Stage 2: insert chunk-boundary markers into each Markdown file.
    Split,
    /// Stage 3: re-host embedded images and rewrite their references.
    Upload,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Convert, Stage::Split, Stage::Upload];

    /// 1-based step number as used in CLI flags and status strings.
    pub fn number(self) -> u8 {
        match self {
            Stage::Convert => 1,
            Stage::Split => 2,
            Stage::Upload => 3,
        }
    }

    /// Key of this stage's entry in the summary JSON.
    pub fn key(self) -> &'static str {
        match self {
            Stage::Convert => "pdf_to_md",
            Stage::Split => "split_md",
            Stage::Upload => "process_images",
        }
    }

    pub fn from_number(n: u8) -> Option<Stage> {
        match n {
            1 => Some(Stage::Convert),
            2 => Some(Stage::Split),
            3 => Some(Stage::Upload),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Terminal status of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Stage has not run (not selected, or gated off by an earlier failure).
    #[default]
    Pending,
    /// Stage ran and its failed set is empty.
    Completed,
    /// Stage ran and recorded at least one failure.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::Pending => "pending",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        })
    }
}

/// One failed file unit with its error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub file: String,
    pub error: String,
}

impl From<&FileError> for FailedFile {
    fn from(e: &FileError) -> Self {
        Self {
            file: e.file().to_string(),
            error: e.to_string(),
        }
    }
}

/// The outcome of one stage invocation. Immutable once produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageResult {
    pub status: StageStatus,
    pub success: Vec<String>,
    pub failed: Vec<FailedFile>,
    /// Stage-level error outside the per-file loop (setup failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// Seal a finished stage: `Completed` iff nothing failed.
    ///
    /// This is the only constructor for a ran stage, which is what keeps
    /// the "`Completed` with non-empty failed set" state unrepresentable.
    pub fn finish(success: Vec<String>, failed: Vec<FailedFile>, error: Option<String>) -> Self {
        let status = if failed.is_empty() && error.is_none() {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };
        Self {
            status,
            success,
            failed,
            error,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// The per-run summary owned by [`crate::runlog::RunLog`].
///
/// Serialises to `summary_{ts}.json`: all three step entries are always
/// present, `pending` when a stage was skipped or never reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub start_time: String,
    pub end_time: Option<String>,
    pub steps: StepReports,
    pub overall_status: String,
}

/// Fixed three-step report block of the summary JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepReports {
    pub pdf_to_md: StageResult,
    pub split_md: StageResult,
    pub process_images: StageResult,
}

impl StepReports {
    pub fn get(&self, stage: Stage) -> &StageResult {
        match stage {
            Stage::Convert => &self.pdf_to_md,
            Stage::Split => &self.split_md,
            Stage::Upload => &self.process_images,
        }
    }

    pub fn set(&mut self, stage: Stage, result: StageResult) {
        match stage {
            Stage::Convert => self.pdf_to_md = result,
            Stage::Split => self.split_md = result,
            Stage::Upload => self.process_images = result,
        }
    }
}

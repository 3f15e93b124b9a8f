//! Error types for the ragprep library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot proceed at all (missing
//!   input directory, unusable uploader configuration, I/O setup failure,
//!   external abort). Returned as `Err(PipelineError)` from
//!   [`crate::orchestrator::Pipeline::run`] after the run log has been
//!   finalized.
//!
//! * [`FileError`] — **Non-fatal**: a single file (or a single image inside
//!   a file) failed while the rest of the set is fine. Recorded in the
//!   owning stage's [`crate::report::StageResult`] so callers can inspect
//!   partial success rather than losing the whole batch to one bad file.
//!
//! A stage that recorded any [`FileError`] is itself a non-fatal `Failed`
//! result; it gates later stages but never unwinds the stage loop.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ragprep library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::report::StageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input directory was not found or is not a directory.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputDirNotFound { path: PathBuf },

    /// Could not create or write inside the output directory.
    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not scan the input directory for source documents.
    #[error("Failed to scan '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or settings validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The upload stage was requested but no uploader could be built.
    #[error("Uploader '{kind}' is not configured.\n{hint}")]
    UploaderNotConfigured { kind: String, hint: String },

    /// Settings file was named explicitly but could not be read.
    #[error("Failed to read settings file '{path}': {source}")]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file exists but is not valid JSON.
    #[error("Settings file '{path}' is not valid JSON: {source}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Run-control errors ────────────────────────────────────────────────
    /// The run was cancelled from outside (signal, caller-side stop).
    #[error("Run aborted")]
    Aborted,

    /// Could not write the run log or summary files.
    #[error("Failed to write run log '{path}': {source}")]
    LogWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file unit (or one image inside it).
///
/// Stored in the failed set of a [`crate::report::StageResult`].
/// The stage continues with the remaining files.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// External converter failed for one document.
    #[error("{file}: conversion failed: {detail}")]
    Convert { file: String, detail: String },

    /// Converter exited non-zero.
    #[error("{file}: converter exited with status {code}")]
    ConverterExit { file: String, code: i32 },

    /// The produced output could not be normalized into the canonical layout.
    #[error("{file}: canonical layout failed: {detail}")]
    Canonicalize { file: String, detail: String },

    /// One Markdown file could not be split.
    #[error("{file}: split failed: {detail}")]
    Split { file: String, detail: String },

    /// One image inside a Markdown file could not be uploaded.
    #[error("{file}: upload of '{image}' failed: {detail}")]
    Upload {
        file: String,
        image: String,
        detail: String,
    },

    /// A remote image reference could not be fetched for re-hosting.
    #[error("{file}: download of '{url}' failed: {detail}")]
    Download {
        file: String,
        url: String,
        detail: String,
    },

    /// The owning Markdown file could not be read or rewritten.
    #[error("{file}: rewrite failed: {detail}")]
    Rewrite { file: String, detail: String },
}

impl FileError {
    /// The file unit this error belongs to.
    pub fn file(&self) -> &str {
        match self {
            FileError::Convert { file, .. }
            | FileError::ConverterExit { file, .. }
            | FileError::Canonicalize { file, .. }
            | FileError::Split { file, .. }
            | FileError::Upload { file, .. }
            | FileError::Download { file, .. }
            | FileError::Rewrite { file, .. } => file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_exit_display() {
        let e = FileError::ConverterExit {
            file: "report.pdf".into(),
            code: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("report.pdf"), "got: {msg}");
        assert!(msg.contains("status 3"), "got: {msg}");
    }

    #[test]
    fn upload_error_names_both_file_and_image() {
        let e = FileError::Upload {
            file: "paper/paper.md".into(),
            image: "images/fig1.png".into(),
            detail: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("paper/paper.md"));
        assert!(msg.contains("images/fig1.png"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn file_accessor_matches_variant() {
        let e = FileError::Split {
            file: "a.md".into(),
            detail: "bad utf-8".into(),
        };
        assert_eq!(e.file(), "a.md");
    }

    #[test]
    fn uploader_not_configured_includes_hint() {
        let e = PipelineError::UploaderNotConfigured {
            kind: "picgo".into(),
            hint: "Set --picgo-endpoint or add a 'picgo' section to config.json.".into(),
        };
        assert!(e.to_string().contains("picgo"));
        assert!(e.to_string().contains("config.json"));
    }
}

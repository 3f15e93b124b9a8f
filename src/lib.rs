//! # ragprep
//!
//! One-step preprocessing of PDF document collections for RAG ingestion.
//!
//! ## Why this crate?
//!
//! Getting a folder of PDFs ready for a retrieval pipeline is three
//! chores glued together: run an OCR converter over every file, split the
//! resulting Markdown into addressable chunks, and move the extracted
//! images somewhere a retrieval frontend can actually serve them from.
//! Doing that by hand means babysitting partial failures — one corrupt
//! PDF, one refused upload — across hundreds of files. This crate is the
//! glue done properly: per-file failure tracking, stage gating, bounded
//! upload concurrency with QPS throttling, and a machine-readable summary
//! of every run.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input_dir/*.pdf
//!  │
//!  ├─ 1. Convert  external tool (marker / mineru) per document,
//!  │              normalized into {out}/{stem}/{stem}.md + images/
//!  ├─ 2. Split    chunk-boundary markers inserted in place
//!  └─ 3. Upload   images re-hosted via a pluggable backend,
//!                 references rewritten to the returned URLs
//! ```
//!
//! Stages run either **batch** (each stage across all files, failures
//! gate the next stage) or **interleaved** (all stages per file on an
//! isolated working copy; one file's failure never blocks another).
//! Every run writes `logs/summary_{ts}.json` and a human-readable
//! companion, win or lose.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragprep::{JobConfig, Pipeline, StageSet, UploaderKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let job = JobConfig::builder()
//!         .input_dir("papers/")
//!         .output_dir("out/")
//!         .stages(StageSet::all())
//!         .uploader(UploaderKind::PicGo { endpoint: None })
//!         .qps(5)
//!         .build()?;
//!
//!     let summary = Pipeline::new(job)?.run().await?;
//!     println!("{}", summary.overall_status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ragprep` binary (clap + anyhow + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ragprep = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod converter;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod runlog;
pub mod settings;
pub mod uploader;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use chunker::{Chunker, HeadingChunker, SPLIT_MARKER};
pub use config::{JobConfig, JobConfigBuilder, RunMode, StageSet};
pub use converter::{Converter, ConverterKind, OutputLayout};
pub use error::{FileError, PipelineError};
pub use limiter::RateLimiter;
pub use orchestrator::{run_job, Pipeline};
pub use report::{RunSummary, Stage, StageResult, StageStatus};
pub use runlog::{RunEvent, RunLog};
pub use settings::UploaderSettings;
pub use uploader::{EndpointUploader, PicGoUploader, UploadError, Uploader, UploaderKind};

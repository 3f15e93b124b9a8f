//! Run configuration.
//!
//! Everything a run needs is collected into one immutable [`JobConfig`],
//! built through [`JobConfigBuilder`]. One struct makes it trivial to
//! share a job across components, log it, and diff two runs to see why
//! their outputs differ.
//!
//! # Design choice: builder over constructor
//! The job surface keeps growing (worker pools, skip prefixes, chunk
//! sizing); a positional constructor would break on every addition. The
//! builder lets callers set what they care about and lean on defaults for
//! the rest.

use crate::converter::ConverterKind;
use crate::error::PipelineError;
use crate::report::Stage;
use crate::uploader::{Uploader, UploaderKind};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Which stages a run executes. Order is always Convert → Split → Upload
/// among the selected ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet {
    convert: bool,
    split: bool,
    upload: bool,
}

impl StageSet {
    /// All three stages (the default run).
    pub fn all() -> Self {
        Self {
            convert: true,
            split: true,
            upload: true,
        }
    }

    /// Parse CLI-style step numbers (`--steps 1 3`).
    pub fn from_numbers(numbers: &[u8]) -> Result<Self, PipelineError> {
        if numbers.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one step must be selected".into(),
            ));
        }
        let mut set = Self {
            convert: false,
            split: false,
            upload: false,
        };
        for &n in numbers {
            match Stage::from_number(n) {
                Some(Stage::Convert) => set.convert = true,
                Some(Stage::Split) => set.split = true,
                Some(Stage::Upload) => set.upload = true,
                None => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "unknown step {n}; valid steps are 1, 2, 3"
                    )))
                }
            }
        }
        Ok(set)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        match stage {
            Stage::Convert => self.convert,
            Stage::Split => self.split,
            Stage::Upload => self.upload,
        }
    }

    /// Selected stages in execution order.
    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(|s| self.contains(*s))
    }

    /// `"1, 2, 3"` — the shape used in the final run status string.
    pub fn numbers_string(&self) -> String {
        self.iter()
            .map(|s| s.number().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Batch: each stage runs across the whole file set before the next
/// begins. Interleaved: every selected stage runs for one file before the
/// pipeline moves to the next file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Batch,
    Interleaved,
}

/// Immutable description of one pipeline run.
#[derive(Clone)]
pub struct JobConfig {
    /// Directory scanned (non-recursively) for source PDFs.
    pub input_dir: PathBuf,

    /// Root of the canonical output tree; also hosts `logs/`.
    pub output_dir: PathBuf,

    /// Stages to execute.
    pub stages: StageSet,

    /// Batch vs interleaved execution.
    pub mode: RunMode,

    /// External converter to drive in stage 1.
    pub converter: ConverterKind,

    /// Upload backend to build for stage 3. `None` is valid only when the
    /// upload stage is not selected.
    pub uploader: Option<UploaderKind>,

    /// Pre-built uploader. Takes precedence over `uploader`; the seam for
    /// tests and for callers with custom backends.
    pub uploader_instance: Option<Arc<dyn Uploader>>,

    /// Explicit settings-file path; default search locations otherwise.
    pub settings_path: Option<PathBuf>,

    /// Max upload acquisitions per rolling second. 0 disables throttling.
    pub qps: u32,

    /// Concurrent upload calls. Default: 2.
    ///
    /// Relay endpoints handle little parallelism; two in-flight uploads
    /// already hide most of the per-call latency.
    pub upload_workers: usize,

    /// Concurrent remote-image downloads in the re-hosting pre-step. Default: 3.
    pub download_workers: usize,

    /// Image references starting with any of these are left untouched.
    pub skip_prefixes: Vec<String>,

    /// Soft chunk-size cap handed to the default chunker.
    pub max_chunk_chars: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            stages: StageSet::all(),
            mode: RunMode::Batch,
            converter: ConverterKind::Marker,
            uploader: None,
            uploader_instance: None,
            settings_path: None,
            qps: 0,
            upload_workers: 2,
            download_workers: 3,
            skip_prefixes: vec!["https://".into(), "http://".into()],
            max_chunk_chars: 4000,
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("stages", &self.stages)
            .field("mode", &self.mode)
            .field("converter", &self.converter)
            .field("uploader", &self.uploader)
            .field(
                "uploader_instance",
                &self.uploader_instance.as_ref().map(|_| "<dyn Uploader>"),
            )
            .field("qps", &self.qps)
            .field("upload_workers", &self.upload_workers)
            .field("download_workers", &self.download_workers)
            .finish()
    }
}

impl JobConfig {
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`JobConfig`].
#[derive(Debug)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn stages(mut self, stages: StageSet) -> Self {
        self.config.stages = stages;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn converter(mut self, kind: ConverterKind) -> Self {
        self.config.converter = kind;
        self
    }

    pub fn uploader(mut self, kind: UploaderKind) -> Self {
        self.config.uploader = Some(kind);
        self
    }

    pub fn uploader_instance(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.config.uploader_instance = Some(uploader);
        self
    }

    pub fn settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.settings_path = Some(path.into());
        self
    }

    pub fn qps(mut self, qps: u32) -> Self {
        self.config.qps = qps;
        self
    }

    pub fn upload_workers(mut self, n: usize) -> Self {
        self.config.upload_workers = n.max(1);
        self
    }

    pub fn download_workers(mut self, n: usize) -> Self {
        self.config.download_workers = n.max(1);
        self
    }

    pub fn skip_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.config.skip_prefixes = prefixes;
        self
    }

    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n.max(1);
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<JobConfig, PipelineError> {
        let c = &self.config;
        if c.input_dir.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig("input_dir is required".into()));
        }
        if c.output_dir.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig("output_dir is required".into()));
        }
        if c.stages.iter().next().is_none() {
            return Err(PipelineError::InvalidConfig(
                "at least one stage must be selected".into(),
            ));
        }
        let wants_upload = c.stages.contains(Stage::Upload);
        if wants_upload && c.uploader.is_none() && c.uploader_instance.is_none() {
            return Err(PipelineError::InvalidConfig(
                "the upload stage is selected but no uploader is configured".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_set_parses_and_orders() {
        let set = StageSet::from_numbers(&[3, 1]).unwrap();
        let stages: Vec<Stage> = set.iter().collect();
        assert_eq!(stages, vec![Stage::Convert, Stage::Upload]);
        assert_eq!(set.numbers_string(), "1, 3");
        assert!(!set.contains(Stage::Split));
    }

    #[test]
    fn stage_set_rejects_unknown_and_empty() {
        assert!(StageSet::from_numbers(&[4]).is_err());
        assert!(StageSet::from_numbers(&[]).is_err());
    }

    #[test]
    fn duplicate_numbers_collapse() {
        let set = StageSet::from_numbers(&[2, 2, 2]).unwrap();
        assert_eq!(set.numbers_string(), "2");
    }

    #[test]
    fn build_requires_directories() {
        let err = JobConfig::builder().build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn upload_stage_requires_an_uploader() {
        let err = JobConfig::builder()
            .input_dir("/in")
            .output_dir("/out")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no uploader"), "got: {err}");
    }

    #[test]
    fn convert_only_run_needs_no_uploader() {
        let config = JobConfig::builder()
            .input_dir("/in")
            .output_dir("/out")
            .stages(StageSet::from_numbers(&[1, 2]).unwrap())
            .build()
            .unwrap();
        assert_eq!(config.mode, RunMode::Batch);
        assert!(config.uploader.is_none());
    }

    #[test]
    fn worker_counts_are_clamped() {
        let config = JobConfig::builder()
            .input_dir("/in")
            .output_dir("/out")
            .stages(StageSet::from_numbers(&[1]).unwrap())
            .upload_workers(0)
            .download_workers(0)
            .build()
            .unwrap();
        assert_eq!(config.upload_workers, 1);
        assert_eq!(config.download_workers, 1);
    }
}

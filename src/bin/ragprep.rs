//! CLI binary for ragprep.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `JobConfig`, renders run events as terminal progress, and prints the
//! final summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ragprep::{
    ConverterKind, JobConfig, Pipeline, RunEvent, Stage, StageSet, StageStatus, UploaderKind,
    UploaderSettings,
};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full pipeline: convert, split, upload via local PicGo
  ragprep -i papers/ -o out/

  # Convert and split only
  ragprep -i papers/ -o out/ --steps 1 2

  # Re-run image processing on an existing output tree, throttled
  ragprep -i papers/ -o out/ --steps 3 --qps 5

  # MinerU converter, process each file fully before the next
  ragprep -i papers/ -o out/ --converter mineru --process-each

  # Generic endpoint backend instead of PicGo
  ragprep -i papers/ -o out/ --uploader endpoint \
      --endpoint-url https://img.example.com/store

  # Write a settings template for backend credentials
  ragprep --create-config

EXTERNAL CONVERTERS:
  marker   marker_single <pdf> --output_dir <out> --output_format markdown --force_ocr
  mineru   magic-pdf -p <pdf> -o <out> -m ocr

  The selected tool must be on PATH. Exit code 0 is the only success
  signal ragprep relies on; tool output is captured into the run log.

OUTPUT LAYOUT:
  out/<stem>/<stem>.md        converted (and split) Markdown
  out/<stem>/images/          extracted images
  out/logs/process_<ts>.log   line log of this run
  out/logs/summary_<ts>.json  machine-readable run summary
  out/logs/summary_<ts>.txt   human-readable run summary

SETTINGS FILE:
  Backend credentials are read from ./config.json or ~/.ragprep/config.json
  (see --create-config). Command-line flags always win over the file.
"#;

/// Convert, split, and image-process PDF collections for RAG ingestion.
#[derive(Parser, Debug)]
#[command(
    name = "ragprep",
    version,
    about = "One-step PDF preprocessing for RAG: convert to Markdown, split, re-host images",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the source PDF files.
    #[arg(short, long, env = "RAGPREP_INPUT_DIR")]
    input_dir: Option<PathBuf>,

    /// Directory for converted output (created if missing).
    #[arg(short, long, env = "RAGPREP_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Steps to run (1: convert, 2: split, 3: images). Default: all.
    #[arg(long, num_args = 1..=3, value_parser = clap::value_parser!(u8).range(1..=3))]
    steps: Option<Vec<u8>>,

    /// PDF-to-Markdown converter.
    #[arg(long, value_enum, default_value = "marker", env = "RAGPREP_CONVERTER")]
    converter: ConverterArg,

    /// Image upload backend.
    #[arg(long, value_enum, default_value = "picgo", env = "RAGPREP_UPLOADER")]
    uploader: UploaderArg,

    /// PicGo server endpoint.
    #[arg(long, env = "RAGPREP_PICGO_ENDPOINT")]
    picgo_endpoint: Option<String>,

    /// Upload URL for the generic endpoint backend.
    #[arg(long, env = "RAGPREP_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Public base URL the uploaded images are served from.
    #[arg(long, env = "RAGPREP_ENDPOINT_PUBLIC_BASE")]
    endpoint_public_base: Option<String>,

    /// Bearer token for the generic endpoint backend.
    #[arg(long, env = "RAGPREP_ENDPOINT_TOKEN", hide_env_values = true)]
    endpoint_token: Option<String>,

    /// Settings file path (default: ./config.json, then ~/.ragprep/config.json).
    #[arg(long, env = "RAGPREP_CONFIG")]
    config: Option<PathBuf>,

    /// Write a settings template to ./config.json and exit.
    #[arg(long)]
    create_config: bool,

    /// Max upload requests per second (0 = unlimited).
    #[arg(long, env = "RAGPREP_QPS", default_value_t = 0)]
    qps: u32,

    /// Process each PDF through all selected steps immediately after its
    /// conversion, instead of running steps batch-wise.
    #[arg(long, env = "RAGPREP_PROCESS_EACH")]
    process_each: bool,

    /// Concurrent image uploads.
    #[arg(long, env = "RAGPREP_UPLOAD_WORKERS", default_value_t = 2)]
    upload_workers: usize,

    /// Concurrent remote-image downloads.
    #[arg(long, env = "RAGPREP_DOWNLOAD_WORKERS", default_value_t = 3)]
    download_workers: usize,

    /// Soft chunk size (characters) for the split step.
    #[arg(long, env = "RAGPREP_MAX_CHUNK_CHARS", default_value_t = 4000)]
    max_chunk_chars: usize,

    /// Disable the progress display.
    #[arg(long, env = "RAGPREP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RAGPREP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RAGPREP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ConverterArg {
    Marker,
    Mineru,
}

impl From<ConverterArg> for ConverterKind {
    fn from(v: ConverterArg) -> Self {
        match v {
            ConverterArg::Marker => ConverterKind::Marker,
            ConverterArg::Mineru => ConverterKind::MinerU,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum UploaderArg {
    Picgo,
    Endpoint,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress display is the primary feedback channel; keep library
    // logs at error level unless the user asks for more.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Settings template mode ───────────────────────────────────────────
    if cli.create_config {
        let path = PathBuf::from("config.json");
        UploaderSettings::write_template(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("{} Wrote settings template to {}", green("✔"), path.display());
        return Ok(());
    }

    // ── Build job ────────────────────────────────────────────────────────
    let job = build_job(&cli)?;
    let pipeline = Pipeline::new(job).context("failed to initialise pipeline")?;

    // Ctrl-C aborts the run: in-flight converters are killed, upload
    // workers drain, and the summary still gets written.
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Aborting…", red("✘"));
            cancel.cancel();
        }
    });

    let progress = if show_progress {
        Some(tokio::spawn(render_progress(pipeline.subscribe())))
    } else {
        None
    };

    let summary = pipeline.run().await.context("run failed")?;

    if let Some(progress) = progress {
        // The Finalized event ends the renderer; never hang on it.
        let _ = tokio::time::timeout(Duration::from_secs(1), progress).await;
    }

    // ── Final report ─────────────────────────────────────────────────────
    let failed = summary.overall_status.starts_with("failed");
    if !cli.quiet {
        let mark = if failed { red("✘") } else { green("✔") };
        eprintln!("\n{mark} {}", bold(&summary.overall_status));
        for stage in Stage::ALL {
            let step = summary.steps.get(stage);
            if step.status == StageStatus::Pending {
                continue;
            }
            eprintln!(
                "   {}  {} ok, {} failed",
                dim(stage.key()),
                step.success.len(),
                step.failed.len()
            );
        }
        if let Some(out) = &cli.output_dir {
            eprintln!("   {}", dim(&format!("summary: {}/logs/", out.display())));
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to a `JobConfig`.
fn build_job(cli: &Cli) -> Result<JobConfig> {
    let input_dir = cli
        .input_dir
        .clone()
        .context("--input-dir is required (see --help)")?;
    let output_dir = cli
        .output_dir
        .clone()
        .context("--output-dir is required (see --help)")?;

    let stages = match &cli.steps {
        Some(steps) => StageSet::from_numbers(steps)?,
        None => StageSet::all(),
    };

    let uploader = match cli.uploader {
        UploaderArg::Picgo => UploaderKind::PicGo {
            endpoint: cli.picgo_endpoint.clone(),
        },
        UploaderArg::Endpoint => UploaderKind::Endpoint {
            upload_url: cli.endpoint_url.clone(),
            public_base: cli.endpoint_public_base.clone(),
            auth_token: cli.endpoint_token.clone(),
        },
    };

    let mut builder = JobConfig::builder()
        .input_dir(input_dir)
        .output_dir(output_dir)
        .stages(stages)
        .converter(cli.converter.clone().into())
        .uploader(uploader)
        .qps(cli.qps)
        .upload_workers(cli.upload_workers)
        .download_workers(cli.download_workers)
        .max_chunk_chars(cli.max_chunk_chars);

    if cli.process_each {
        builder = builder.mode(ragprep::RunMode::Interleaved);
    }
    if let Some(ref path) = cli.config {
        builder = builder.settings_path(path);
    }

    Ok(builder.build()?)
}

/// Render run events as an indicatif progress display.
async fn render_progress(mut events: tokio::sync::broadcast::Receiver<RunEvent>) {
    let mut bar: Option<ProgressBar> = None;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            // Lagged: skip ahead; Closed: run is over.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match event {
            RunEvent::StageStarted { stage, files } => {
                if let Some(old) = bar.take() {
                    old.finish_and_clear();
                }
                let style = ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ");

                let new = ProgressBar::new(files as u64);
                new.set_style(style);
                new.set_prefix(format!("Step {} ({})", stage.number(), stage.key()));
                new.enable_steady_tick(Duration::from_millis(80));
                bar = Some(new);
            }
            RunEvent::FileFinished { file, error, .. } => {
                if let Some(ref bar) = bar {
                    match error {
                        None => bar.println(format!("  {} {}", green("✓"), file)),
                        Some(e) => bar.println(format!("  {} {}  {}", red("✗"), file, red(&e))),
                    }
                    bar.inc(1);
                }
            }
            RunEvent::StageFinished {
                stage,
                status,
                success,
                failed,
            } => {
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
                let mark = match status {
                    StageStatus::Completed => green("✔"),
                    StageStatus::Failed => red("✘"),
                    StageStatus::Pending => cyan("·"),
                };
                eprintln!(
                    "{mark} Step {} ({}): {} ok, {} failed",
                    stage.number(),
                    stage.key(),
                    success,
                    failed
                );
            }
            RunEvent::Finalized { .. } => {
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
                break;
            }
        }
    }
}

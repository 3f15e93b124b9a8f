//! External document-to-Markdown converters.
//!
//! Converters are opaque external processes: ragprep hands them a source
//! file and an output directory, and judges success purely by exit code.
//! What differs between tools is the *shape* of what they leave behind —
//! `marker_single` writes the Markdown next to its images in the document
//! directory, while `magic-pdf` nests everything under an `ocr/`
//! subdirectory. [`canonicalize_layout`] folds both conventions into the
//! one shape the rest of the pipeline relies on:
//!
//! ```text
//! {output_dir}/{stem}/{stem}.md
//! {output_dir}/{stem}/images/*
//! ```
//!
//! Canonicalization is atomic from the caller's point of view: either the
//! canonical layout exists afterwards, or the error is reported and any
//! rename already performed has been rolled back.

use crate::cancel::CancelToken;
use crate::error::FileError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Where a converter tool places its output relative to `{output_dir}/{stem}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLayout {
    /// Markdown (and loose image files) directly in the stem directory.
    Flat,
    /// Everything under an intermediate subdirectory, e.g. `ocr/`.
    Nested { subdir: String },
}

/// Which external converter to run.
#[derive(Debug, Clone)]
pub enum ConverterKind {
    /// `marker_single <input> --output_dir <out> --output_format markdown --force_ocr`
    Marker,
    /// `magic-pdf -p <input> -o <out> -m ocr`
    MinerU,
    /// Site-local converter; `{input}` and `{output}` placeholders in
    /// `args` are expanded per invocation. Also the test seam.
    Custom {
        program: String,
        args: Vec<String>,
        layout: OutputLayout,
    },
}

impl ConverterKind {
    pub fn name(&self) -> &str {
        match self {
            ConverterKind::Marker => "marker",
            ConverterKind::MinerU => "mineru",
            ConverterKind::Custom { program, .. } => program,
        }
    }

    pub fn layout(&self) -> OutputLayout {
        match self {
            ConverterKind::Marker => OutputLayout::Flat,
            ConverterKind::MinerU => OutputLayout::Nested {
                subdir: "ocr".into(),
            },
            ConverterKind::Custom { layout, .. } => layout.clone(),
        }
    }

    /// Expand the command template for one invocation.
    fn command(&self, input: &Path, output_dir: &Path) -> (String, Vec<String>) {
        let input = input.to_string_lossy().into_owned();
        let out = output_dir.to_string_lossy().into_owned();
        match self {
            ConverterKind::Marker => (
                "marker_single".into(),
                vec![
                    input,
                    "--output_dir".into(),
                    out,
                    "--output_format".into(),
                    "markdown".into(),
                    "--force_ocr".into(),
                ],
            ),
            ConverterKind::MinerU => (
                "magic-pdf".into(),
                vec!["-p".into(), input, "-o".into(), out, "-m".into(), "ocr".into()],
            ),
            ConverterKind::Custom { program, args, .. } => (
                program.clone(),
                args.iter()
                    .map(|a| a.replace("{input}", &input).replace("{output}", &out))
                    .collect(),
            ),
        }
    }
}

/// Adapter driving one [`ConverterKind`] and normalizing its output.
#[derive(Debug, Clone)]
pub struct Converter {
    kind: ConverterKind,
}

impl Converter {
    pub fn new(kind: ConverterKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &ConverterKind {
        &self.kind
    }

    /// Convert one source document and canonicalize its output directory.
    ///
    /// Returns the canonical Markdown path on success. All failure modes
    /// (spawn error, non-zero exit, layout normalization) are per-file
    /// [`FileError`]s; the caller decides whether the batch continues.
    pub async fn convert(
        &self,
        source: &Path,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf, FileError> {
        let file = source.display().to_string();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| FileError::Convert {
                file: file.clone(),
                detail: "source has no file stem".into(),
            })?;

        let stem_dir = output_dir.join(&stem);
        if let ConverterKind::MinerU = self.kind {
            // magic-pdf expects the per-document directory to exist.
            std::fs::create_dir_all(&stem_dir).map_err(|e| FileError::Convert {
                file: file.clone(),
                detail: format!("failed to create '{}': {e}", stem_dir.display()),
            })?;
        }

        let (program, args) = self.kind.command(source, output_dir);
        debug!("Running converter: {} {:?}", program, args);

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FileError::Convert {
                file: file.clone(),
                detail: format!("failed to spawn '{program}': {e}"),
            })?;

        // Dropping the in-flight future on cancel kills the child
        // (kill_on_drop) so an abort never leaves an orphan OCR process.
        let output = tokio::select! {
            out = child.wait_with_output() => out.map_err(|e| FileError::Convert {
                file: file.clone(),
                detail: format!("failed to wait for '{program}': {e}"),
            })?,
            _ = cancel.cancelled() => {
                return Err(FileError::Convert {
                    file,
                    detail: "run aborted".into(),
                });
            }
        };

        if !output.stdout.is_empty() {
            debug!("{program} stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            debug!("{program} stderr: {}", String::from_utf8_lossy(&output.stderr));
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("{file}: '{program}' exited with status {code}");
            return Err(FileError::ConverterExit { file, code });
        }

        canonicalize_layout(&stem_dir, &stem, &self.kind.layout())
            .map_err(|detail| FileError::Canonicalize { file, detail })?;

        Ok(stem_dir.join(format!("{stem}.md")))
    }
}

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Normalize a converter's output into the canonical per-document shape.
///
/// Idempotent: running it on an already-canonical directory changes
/// nothing. On partial failure every rename already performed is undone
/// before the error is returned.
pub fn canonicalize_layout(
    stem_dir: &Path,
    stem: &str,
    layout: &OutputLayout,
) -> Result<(), String> {
    let md = stem_dir.join(format!("{stem}.md"));
    let images = stem_dir.join("images");

    match layout {
        OutputLayout::Flat => {
            if !md.is_file() {
                return Err(format!("expected '{}' was not produced", md.display()));
            }
            if !images.is_dir() {
                std::fs::create_dir(&images)
                    .map_err(|e| format!("failed to create '{}': {e}", images.display()))?;
            }
            gather_loose_images(stem_dir, &images)
        }
        OutputLayout::Nested { subdir } => {
            let nested = stem_dir.join(subdir);
            if !nested.is_dir() {
                // Already canonical (re-run) or the tool produced nothing.
                if md.is_file() {
                    return Ok(());
                }
                return Err(format!(
                    "neither '{}' nor '{}' exists",
                    md.display(),
                    nested.display()
                ));
            }

            let nested_md = nested.join(format!("{stem}.md"));
            std::fs::rename(&nested_md, &md)
                .map_err(|e| format!("failed to move '{}': {e}", nested_md.display()))?;

            let nested_images = nested.join("images");
            if nested_images.is_dir() {
                if let Err(e) = std::fs::rename(&nested_images, &images) {
                    // Roll the Markdown move back so no half-renamed
                    // state is left behind.
                    let _ = std::fs::rename(&md, &nested_md);
                    return Err(format!(
                        "failed to move '{}': {e}",
                        nested_images.display()
                    ));
                }
            } else if !images.is_dir() {
                std::fs::create_dir(&images)
                    .map_err(|e| format!("failed to create '{}': {e}", images.display()))?;
            }

            std::fs::remove_dir_all(&nested)
                .map_err(|e| format!("failed to remove '{}': {e}", nested.display()))?;
            Ok(())
        }
    }
}

/// Move loose image files in the stem directory into `images/`,
/// rolling back the moves already made if one fails.
fn gather_loose_images(stem_dir: &Path, images: &Path) -> Result<(), String> {
    let entries = std::fs::read_dir(stem_dir)
        .map_err(|e| format!("failed to scan '{}': {e}", stem_dir.display()))?;

    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let dest = images.join(path.file_name().expect("file has a name"));
        if let Err(e) = std::fs::rename(&path, &dest) {
            for (orig, new) in moved.into_iter().rev() {
                let _ = std::fs::rename(&new, &orig);
            }
            return Err(format!("failed to move '{}': {e}", path.display()));
        }
        moved.push((path, dest));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn nested_layout_is_canonicalized() {
        let dir = tempdir().unwrap();
        let stem_dir = dir.path().join("doc");
        touch(&stem_dir.join("ocr/doc.md"));
        touch(&stem_dir.join("ocr/images/fig1.png"));

        canonicalize_layout(&stem_dir, "doc", &OutputLayout::Nested { subdir: "ocr".into() })
            .unwrap();

        assert!(stem_dir.join("doc.md").is_file());
        assert!(stem_dir.join("images/fig1.png").is_file());
        assert!(!stem_dir.join("ocr").exists());
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let dir = tempdir().unwrap();
        let stem_dir = dir.path().join("doc");
        touch(&stem_dir.join("ocr/doc.md"));
        touch(&stem_dir.join("ocr/images/fig1.png"));

        let layout = OutputLayout::Nested { subdir: "ocr".into() };
        canonicalize_layout(&stem_dir, "doc", &layout).unwrap();
        canonicalize_layout(&stem_dir, "doc", &layout).unwrap();

        assert!(stem_dir.join("doc.md").is_file());
        assert!(stem_dir.join("images/fig1.png").is_file());
        // No duplicate nested directory appears on the second run.
        assert!(!stem_dir.join("ocr").exists());
    }

    #[test]
    fn nested_without_markdown_reports_failure() {
        let dir = tempdir().unwrap();
        let stem_dir = dir.path().join("doc");
        std::fs::create_dir_all(stem_dir.join("ocr")).unwrap();

        let err = canonicalize_layout(&stem_dir, "doc", &OutputLayout::Nested {
            subdir: "ocr".into(),
        })
        .unwrap_err();
        assert!(err.contains("doc.md"), "got: {err}");
        // Nothing was half-moved.
        assert!(!stem_dir.join("doc.md").exists());
    }

    #[test]
    fn flat_layout_gathers_loose_images() {
        let dir = tempdir().unwrap();
        let stem_dir = dir.path().join("doc");
        touch(&stem_dir.join("doc.md"));
        touch(&stem_dir.join("page_0.png"));
        touch(&stem_dir.join("page_1.JPG"));

        canonicalize_layout(&stem_dir, "doc", &OutputLayout::Flat).unwrap();

        assert!(stem_dir.join("images/page_0.png").is_file());
        assert!(stem_dir.join("images/page_1.JPG").is_file());
        assert!(!stem_dir.join("page_0.png").exists());
        // The Markdown file itself stays put.
        assert!(stem_dir.join("doc.md").is_file());
    }

    #[test]
    fn flat_layout_without_markdown_reports_failure() {
        let dir = tempdir().unwrap();
        let stem_dir = dir.path().join("doc");
        std::fs::create_dir_all(&stem_dir).unwrap();

        assert!(canonicalize_layout(&stem_dir, "doc", &OutputLayout::Flat).is_err());
    }

    #[tokio::test]
    async fn custom_converter_runs_and_canonicalizes() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let src = dir.path().join("doc.pdf");
        std::fs::write(&src, b"%PDF-1.4").unwrap();

        // Stand-in converter: writes the canonical flat layout via shell.
        let converter = Converter::new(ConverterKind::Custom {
            program: "/bin/sh".into(),
            args: vec![
                "-c".into(),
                "mkdir -p {output}/doc && printf 'hello\\n' > {output}/doc/doc.md".into(),
            ],
            layout: OutputLayout::Flat,
        });

        let md = converter
            .convert(&src, &out, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(md, out.join("doc/doc.md"));
        assert!(md.is_file());
        assert!(out.join("doc/images").is_dir());
    }

    #[tokio::test]
    async fn failing_converter_reports_exit_status() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let src = dir.path().join("doc.pdf");
        std::fs::write(&src, b"%PDF-1.4").unwrap();

        let converter = Converter::new(ConverterKind::Custom {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "exit 7".into()],
            layout: OutputLayout::Flat,
        });

        let err = converter
            .convert(&src, &out, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::ConverterExit { code: 7, .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_per_file_error() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("doc.pdf");
        std::fs::write(&src, b"%PDF-1.4").unwrap();

        let converter = Converter::new(ConverterKind::Custom {
            program: "/definitely/not/a/binary".into(),
            args: vec![],
            layout: OutputLayout::Flat,
        });

        let err = converter
            .convert(&src, dir.path(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Convert { .. }));
    }
}

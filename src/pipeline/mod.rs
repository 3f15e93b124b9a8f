//! Stage executors.
//!
//! Each submodule runs exactly one pipeline stage over a set of file
//! units and produces one [`crate::report::StageResult`]. Executors catch
//! failures at the smallest granularity (one file, one image), record
//! them, and keep going — deciding whether a failed stage stops the run
//! is the orchestrator's job, not theirs.
//!
//! ## Data Flow
//!
//! ```text
//! input_dir ──▶ convert ──▶ split ──▶ upload
//! (*.pdf)    (external   (marker    (worker pool +
//!             process)    insert)    rate limiter)
//! ```
//!
//! 1. [`convert`] — drive the external converter per document, normalize
//!    into the canonical `{stem}/{stem}.md` + `{stem}/images/` layout
//! 2. [`split`]   — insert chunk-boundary markers; sequential, CPU-light
//! 3. [`upload`]  — the only parallel stage: bounded worker pools over the
//!    image references, QPS-limited, atomic per-file rewrites

pub mod convert;
pub mod split;
pub mod upload;

use std::path::{Path, PathBuf};

/// Discover the Markdown files of a canonical output tree.
///
/// Covers the canonical one-level shape: `*.md` directly in `dir` plus
/// `{stem}/{stem}.md` one directory down. No deeper recursion — anything
/// below that is converter-internal and not ours to rewrite.
pub(crate) fn discover_markdown(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, "md") {
            found.push(path);
        } else if path.is_dir() {
            if let Some(stem) = path.file_name().and_then(|n| n.to_str()) {
                let candidate = path.join(format!("{stem}.md"));
                if candidate.is_file() {
                    found.push(candidate);
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn discovery_covers_the_canonical_shape() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("top.md"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("doc/images")).unwrap();
        std::fs::write(dir.path().join("doc/doc.md"), "x").unwrap();
        // Wrong name inside a stem dir is not canonical output.
        std::fs::write(dir.path().join("doc/other.md"), "x").unwrap();
        // Deeper nesting is converter-internal.
        std::fs::create_dir_all(dir.path().join("doc/deep")).unwrap();
        std::fs::write(dir.path().join("doc/deep/deep.md"), "x").unwrap();

        let found = discover_markdown(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["doc/doc.md".to_string(), "top.md".to_string()]);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_extension(Path::new("a.MD"), "md"));
        assert!(!has_extension(Path::new("a.txt"), "md"));
        assert!(!has_extension(Path::new("md"), "md"));
    }
}

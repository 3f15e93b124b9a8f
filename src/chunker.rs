//! Chunk-boundary discovery for Markdown files.
//!
//! The split stage treats chunking as a pure function: text in, ordered
//! boundary offsets out. [`Chunker`] is the seam; the pipeline ships one
//! implementation ([`HeadingChunker`]) and callers can substitute their
//! own (semantic, token-budgeted, …) without touching the stage executor.
//!
//! Boundaries are byte offsets at line starts. The executor inserts the
//! split marker *at* each boundary and never removes a byte of the
//! original content, so the rewrite is reversible by deleting marker
//! lines.

/// A pure `text → ordered chunk boundaries` function.
pub trait Chunker: Send + Sync {
    /// Return strictly ascending byte offsets, each at the start of a line,
    /// none at offset 0 or past the end. An empty vec means "one chunk".
    fn boundaries(&self, text: &str) -> Vec<usize>;
}

/// Boundary marker inserted between chunks, compatible with downstream
/// splitters that consume the marker convention.
pub const SPLIT_MARKER: &str = "=+=+=+=+=+=+=+=+=";

/// Default chunker: break at ATX headings, and at paragraph gaps once a
/// segment has grown past `max_chars`.
///
/// Headings inside fenced code blocks are ignored — a `# comment` in a
/// shell listing is not a section break.
#[derive(Debug, Clone)]
pub struct HeadingChunker {
    /// Soft segment-size cap; a paragraph gap after this many bytes
    /// becomes a boundary even without a heading.
    pub max_chars: usize,
}

impl Default for HeadingChunker {
    fn default() -> Self {
        Self { max_chars: 4000 }
    }
}

impl HeadingChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

fn is_atx_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    (1..=6).contains(&hashes) && matches!(line.as_bytes().get(hashes), Some(b' ') | Some(b'\t'))
}

impl Chunker for HeadingChunker {
    fn boundaries(&self, text: &str) -> Vec<usize> {
        let mut boundaries = Vec::new();
        let mut offset = 0usize;
        let mut last_boundary = 0usize;
        let mut in_fence = false;
        // Set after an oversized segment hits a blank line; the next
        // non-blank line start becomes the boundary.
        let mut pending_gap_break = false;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_end_matches(['\n', '\r']);

            if trimmed.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }

            if !in_fence && offset > 0 {
                if is_atx_heading(trimmed) {
                    if offset > last_boundary {
                        boundaries.push(offset);
                        last_boundary = offset;
                    }
                    pending_gap_break = false;
                } else if pending_gap_break && !trimmed.is_empty() {
                    boundaries.push(offset);
                    last_boundary = offset;
                    pending_gap_break = false;
                } else if trimmed.is_empty() && offset - last_boundary > self.max_chars {
                    pending_gap_break = true;
                }
            }

            offset += line.len();
        }

        boundaries
    }
}

/// Rewrite `text` with [`SPLIT_MARKER`] lines inserted at `boundaries`.
///
/// Offsets that are not line starts (or are out of range) are skipped
/// rather than corrupting the content; every original byte survives.
pub fn insert_markers(text: &str, boundaries: &[usize]) -> String {
    let mut out = String::with_capacity(text.len() + boundaries.len() * (SPLIT_MARKER.len() + 2));
    let mut prev = 0usize;
    for &b in boundaries {
        if b <= prev || b >= text.len() || !text.is_char_boundary(b) {
            continue;
        }
        if text.as_bytes()[b - 1] != b'\n' {
            continue;
        }
        out.push_str(&text[prev..b]);
        out.push_str(SPLIT_MARKER);
        out.push('\n');
        prev = b;
    }
    out.push_str(&text[prev..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_become_boundaries() {
        let text = "# Intro\n\nbody\n\n## Methods\n\nmore body\n";
        let b = HeadingChunker::default().boundaries(text);
        assert_eq!(b.len(), 1);
        assert_eq!(&text[b[0]..b[0] + 10], "## Methods");
    }

    #[test]
    fn leading_heading_is_not_a_boundary() {
        let text = "# Only section\nbody\n";
        assert!(HeadingChunker::default().boundaries(text).is_empty());
    }

    #[test]
    fn hash_inside_code_fence_is_ignored() {
        let text = "intro\n\n```sh\n# not a heading\n```\n\ntail\n";
        assert!(HeadingChunker::default().boundaries(text).is_empty());
    }

    #[test]
    fn oversized_segment_breaks_at_paragraph_gap() {
        let long = "x".repeat(120);
        let text = format!("{long}\n\n{long}\n\nfinal paragraph\n");
        let b = HeadingChunker::new(100).boundaries(&text);
        assert!(!b.is_empty());
        for &offset in &b {
            assert_eq!(text.as_bytes()[offset - 1], b'\n', "boundary on line start");
        }
    }

    #[test]
    fn boundaries_are_strictly_ascending() {
        let text = "# a\nb\n## c\nd\n### e\nf\n";
        let b = HeadingChunker::default().boundaries(text);
        assert!(b.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn insert_markers_preserves_every_original_byte() {
        let text = "# a\nbody\n## b\nmore\n";
        let b = HeadingChunker::default().boundaries(text);
        let rewritten = insert_markers(text, &b);
        let stripped: String = rewritten
            .lines()
            .filter(|l| *l != SPLIT_MARKER)
            .map(|l| format!("{l}\n"))
            .collect();
        assert_eq!(stripped, text);
        assert_eq!(rewritten.matches(SPLIT_MARKER).count(), b.len());
    }

    #[test]
    fn insert_markers_with_no_boundaries_is_identity() {
        let text = "plain text\nno headings\n";
        assert_eq!(insert_markers(text, &[]), text);
    }

    #[test]
    fn insert_markers_skips_bogus_offsets() {
        let text = "ab\ncd\n";
        // 1 is mid-line, 99 is past the end; both must be ignored.
        assert_eq!(insert_markers(text, &[1, 99]), text);
    }
}

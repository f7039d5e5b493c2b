//! Diff preparation for review units.
//!
//! A unit's diff is rendered two ways: the LLM sees each kept line preceded
//! by a single-line comment carrying its new-file line number; fingerprinting
//! hashes the bare kept lines, so line-number drift from cosmetic re-pushes
//! does not change the fingerprint.

use regex_lite::Regex;
use std::sync::OnceLock;
use steward_core::ReviewError;

/// Single-line comment prefix for a file, chosen by extension.
///
/// Files with no known commenter get no line-number comments; the LLM then
/// sees the bare diff.
pub fn line_commenter(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "rs" | "ts" | "tsx" | "js" | "jsx" | "mjs" | "java" | "kt" | "scala" | "go" | "c"
        | "h" | "cpp" | "hpp" | "cs" | "swift" | "dart" | "php" => Some("//"),
        "py" | "rb" | "sh" | "bash" | "yaml" | "yml" | "toml" | "tf" | "pl" | "r" => Some("#"),
        "sql" | "lua" | "hs" | "elm" => Some("--"),
        "lisp" | "clj" | "scm" | "el" => Some(";"),
        _ => None,
    }
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@").expect("static regex"))
}

/// The starting line number (new side) of the first hunk in `diff`.
pub fn parse_hunk_start(diff: &str) -> Option<u32> {
    let caps = hunk_header_re().captures(diff)?;
    caps.get(1)?.as_str().parse().ok()
}

/// A review unit's code, prepared both ways.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCode {
    /// Line-number comments interleaved; what the LLM reviews.
    pub with_lines: String,
    /// Bare kept lines; what fingerprinting hashes.
    pub without_lines: String,
    /// Kept lines with their new-file line numbers, in order.
    lines: Vec<(u32, String)>,
}

impl PreparedCode {
    /// The kept line numbers, for mapping LLM-reported positions.
    pub fn line_numbers(&self) -> Vec<u32> {
        self.lines.iter().map(|(n, _)| *n).collect()
    }

    /// Map a line number the LLM reported to a kept code line.
    ///
    /// When the reported number does not land on a kept line (the LLM
    /// pointed at an injected comment or drifted), the next kept code line
    /// is chosen and the adjustment is logged.
    pub fn nearest_code_line(&self, reported: u32) -> Option<u32> {
        if self.lines.iter().any(|(n, _)| *n == reported) {
            return Some(reported);
        }
        let next = self.lines.iter().map(|(n, _)| *n).find(|n| *n > reported);
        if let Some(next) = next {
            tracing::warn!(reported, chosen = next, "Reported line is not a kept code line, using next");
        }
        next
    }

    /// Up to `radius` kept lines either side of `line`, inclusive, joined
    /// with newlines — the context a violation hash is derived from.
    pub fn context_window(&self, line: u32, radius: usize) -> String {
        let Some(center) = self.lines.iter().position(|(n, _)| *n == line) else {
            return String::new();
        };
        let start = center.saturating_sub(radius);
        let end = (center + radius + 1).min(self.lines.len());
        self.lines[start..end]
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Walk `diff`, dropping removed lines and producing both renderings.
///
/// Fails when no hunk header can be parsed; a diff without a recoverable
/// starting line cannot be line-anchored.
pub fn prepare_code(diff: &str, new_path: &str) -> Result<PreparedCode, ReviewError> {
    if parse_hunk_start(diff).is_none() {
        return Err(ReviewError::BadHunkHeader {
            file: new_path.to_string(),
        });
    }

    let commenter = line_commenter(new_path);
    let mut with_lines = String::new();
    let mut without_lines = String::new();
    let mut lines: Vec<(u32, String)> = Vec::new();

    let mut current_line: Option<u32> = None;
    for raw in diff.lines() {
        if raw.starts_with("@@") {
            current_line = parse_hunk_start(raw);
            continue;
        }
        let Some(line_no) = current_line else {
            // File header noise before the first hunk.
            continue;
        };
        match raw.as_bytes().first() {
            Some(b'-') => continue,
            Some(b'\\') => continue, // "\ No newline at end of file"
            Some(b'+') | Some(b' ') => {
                let content = &raw[1..];
                if let Some(c) = commenter {
                    with_lines.push_str(&format!("{c} {line_no}\n"));
                }
                with_lines.push_str(content);
                with_lines.push('\n');
                without_lines.push_str(content);
                without_lines.push('\n');
                lines.push((line_no, content.to_string()));
                current_line = Some(line_no + 1);
            }
            // Context lines in some diff dialects arrive with no prefix.
            _ => {
                with_lines.push_str(raw);
                with_lines.push('\n');
                without_lines.push_str(raw);
                without_lines.push('\n');
                lines.push((line_no, raw.to_string()));
                current_line = Some(line_no + 1);
            }
        }
    }

    Ok(PreparedCode {
        with_lines,
        without_lines,
        lines,
    })
}

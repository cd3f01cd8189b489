//! Helpers for keeping candidate data out of logs and span attributes.
//!
//! Uploaded filenames and resume text are personal data; log lines carry
//! only the candidate id, the bare file name and short excerpts.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Truncates at a char boundary, marking the cut with `…`.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Reduces an uploaded filename to a safe display name: no directories,
/// no control characters.
pub fn display_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let trimmed = base.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "resume.pdf".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/Downloads/jane_doe_cv.pdf")),
            "jane_doe_cv.pdf"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdefgh", 3), "abc…");
        // Multi-byte characters are never split.
        assert_eq!(truncate_for_log("héllo wörld", 2), "hé…");
    }

    #[test]
    fn test_display_filename() {
        assert_eq!(display_filename("cv.pdf"), "cv.pdf");
        assert_eq!(display_filename("../../etc/passwd"), "passwd");
        assert_eq!(display_filename("C:\\Users\\me\\cv.pdf"), "cv.pdf");
        assert_eq!(display_filename("bad\u{0007}name.pdf"), "badname.pdf");
        assert_eq!(display_filename(".."), "resume.pdf");
        assert_eq!(display_filename(""), "resume.pdf");
    }
}

//! Storage-safe file names and content-type inference.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::text;

const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());
static UNDERSCORE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

/// Strip diacritics, replace anything but letters, digits, `_`, `.` and `-`
/// with `_`, collapse runs, lower-case.
pub fn sanitize_file_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(original);
    let ascii = text::strip_diacritics(base.trim());
    let replaced = NON_WORD.replace_all(&ascii, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let clean = collapsed.to_lowercase();
    if clean.is_empty() || clean == "_" {
        "document".to_string()
    } else {
        clean
    }
}

/// `YYYYMMDD-HHMMSS-<sanitized>`, unique per second per name.
pub fn storage_file_name(original: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), sanitize_file_name(original))
}

/// The declared type unless it is absent or generic; otherwise inferred
/// from the extension.
pub fn effective_content_type(file_name: &str, declared: Option<&str>) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|d| !d.is_empty()) {
        if !declared.eq_ignore_ascii_case(GENERIC_CONTENT_TYPE) {
            return declared.to_string();
        }
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let known = match extension.as_str() {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    };
    match known {
        Some(t) => t.to_string(),
        None => mime_guess::from_ext(&extension)
            .first_raw()
            .unwrap_or(GENERIC_CONTENT_TYPE)
            .to_string(),
    }
}

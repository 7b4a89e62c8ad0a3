//! Utility functions for text cleanup, log truncation, and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - Whitespace collapsing for scraped text (non-breaking spaces included)
//! - String truncation for logging
//! - File system validation for the data directory

use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Collapse every run of whitespace into a single space and trim the ends.
///
/// Scraped text is full of newlines, tabs and non-breaking spaces (`\u{a0}`);
/// all of them count as whitespace here.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(collapse_whitespace("  28\u{a0}November \n 2025 "), "28 November 2025");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes (backing off to a character
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    fs::write(&probe_path, b"").await?;
    let _ = fs::remove_file(&probe_path).await;
    info!("Data directory is writable");
    Ok(())
}

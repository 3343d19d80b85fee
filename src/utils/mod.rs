//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod retry;

use url::Url;

/// Check that a locator is an absolute http(s) URL
pub fn validate_locator(locator: &str) -> Result<Url, String> {
    let parsed = Url::parse(locator.trim()).map_err(|e| e.to_string())?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{other}'")),
    }

    if parsed.host_str().is_none() {
        return Err("no host in URL".to_string());
    }

    Ok(parsed)
}

/// Truncate text to a maximum number of characters
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

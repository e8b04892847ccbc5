//! Small helpers shared across the engine: content hashing and UTF-8-safe
//! truncation for digest/context rendering.

use sha2::{Digest, Sha256};

/// SHA-256 of `input`, rendered as lowercase hex.
// Inline hex rendering to avoid adding a dependency for 8 lines of output.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Truncates `s` to at most `max_chars` characters, appending an ellipsis
/// marker when anything was cut. Counts characters, not bytes, so multi-byte
/// content never panics on a char boundary.
pub fn ellipsize(s: &str, max_chars: usize) -> String {
    const MARKER: char = '…';
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max_chars - 1).collect();
    out.push(MARKER);
    out
}

//! Display name -> runtime-safe session identifier.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Replaces every character outside `[a-z0-9_-]`.
pub const PLACEHOLDER: char = '_';

pub const CONTAINER_PREFIX: &str = "scratch_";

/// Canonical identifier for a human-readable name.
///
/// Decomposes (NFD), drops combining marks, lowercases, then maps every
/// character outside `[a-z0-9_-]` to [`PLACEHOLDER`] one-for-one. Lossy: two
/// distinct names can produce the same identifier. Empty only when the input
/// is empty or made solely of combining marks.
pub fn normalize(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if is_allowed(c) { c } else { PLACEHOLDER })
        .collect()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

pub fn is_normalized(id: &str) -> bool {
    !id.is_empty() && id.chars().all(is_allowed)
}

/// `scratch_<id>_<port>`; kept for operators, metadata lives in labels.
pub fn container_name(session_id: &str, port: u16) -> String {
    format!("{CONTAINER_PREFIX}{session_id}_{port}")
}

/// One durable volume per identifier, shared by every session of that user.
pub fn volume_name(session_id: &str) -> String {
    format!("{CONTAINER_PREFIX}{session_id}")
}

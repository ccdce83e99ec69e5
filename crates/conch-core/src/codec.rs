//! Helpers for the base64 global ids used by the game service
//! (`VnNNb2RlLTE=` is `VsMode-1`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::cmp::Ordering;

/// Numeric suffix of a base64 id, or 0 when the id does not decode to
/// `<Type>-<n>`.
pub fn decode64_index(id: &str) -> i64 {
    let Ok(bytes) = STANDARD.decode(id) else {
        return 0;
    };
    let Ok(text) = String::from_utf8(bytes) else {
        return 0;
    };
    text.rsplit('-')
        .next()
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(0)
}

/// Orders ids by decoded index, falling back to the raw text for ties.
pub fn index_order(a: &str, b: &str) -> Ordering {
    decode64_index(a)
        .cmp(&decode64_index(b))
        .then_with(|| a.cmp(b))
}

/// Last path segment of an image url up to the first `_`, ignoring the query.
pub fn image_hash(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('_').next().unwrap_or(name)
}

//! String helpers for log fields and wire payloads.

use std::sync::LazyLock;

use regex::Regex;

/// CSI / OSC escape sequences emitted by terminal-aware tools.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("static ANSI pattern is valid")
});

/// Truncate to at most `max_bytes` bytes without splitting a character.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate and append `suffix` when the input exceeds `max_bytes`.
///
/// The result, suffix included, never exceeds `max_bytes` unless the suffix
/// alone is longer.
pub fn truncate_with_suffix(s: &str, max_bytes: usize, suffix: &str) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let budget = max_bytes.saturating_sub(suffix.len());
    format!("{}{suffix}", truncate_str(s, budget))
}

/// Remove terminal escape sequences so child-process output is plain text.
pub fn strip_ansi(s: &str) -> String {
    if !s.contains('\x1b') {
        return s.to_owned();
    }
    let stripped = ANSI_RE.replace_all(s, "");
    if !stripped.contains('\x1b') {
        return stripped.into_owned();
    }
    // A sequence cut off mid-way (e.g. at a line break) leaves a bare ESC
    // and its parameters behind.
    let mut out = String::with_capacity(stripped.len());
    let mut in_escape = false;
    for c in stripped.chars() {
        if c == '\x1b' {
            in_escape = true;
            continue;
        }
        if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
                continue;
            }
            if c == '[' || c == ';' || c.is_ascii_digit() {
                continue;
            }
            in_escape = false;
        }
        out.push(c);
    }
    out
}

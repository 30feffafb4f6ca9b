//! Filename templating (spec.md §3 `outtmpl`, invariant I7, edge case L1).
//!
//! Tokens are printf-style `%(key)s`, matching the original's
//! `self.params['outtmpl'] % finfo`, not the `%Y`-style ffmpeg placeholders
//! the teacher's `pipeline-common::expand_filename_template` uses — the
//! token grammar differs, but the char-by-char scan-and-substitute shape and
//! the invalid-character sanitization set are carried over unchanged.

use std::collections::BTreeMap;

/// Characters forbidden in filenames on at least one major OS (original:
/// `sanitize_filename`'s `<>:"/\|?*`).
const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace every invalid filename character with `_`.
pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Expand `%(key)s` tokens in `template` against `values`. Unknown keys are
/// left as literal text (no key errors — this path only ever receives the
/// fixed field set the orchestrator builds). Only the *substituted* values
/// are sanitized (§6: "Unsafe filename characters ... are each replaced by
/// `_` in substituted values") — literal template text (e.g. a `/` the
/// caller wrote to place output under a subdirectory) passes through
/// untouched. If the final result would start with `-` it is prefixed with
/// `_` so it is never mistaken for a flag by a shell or subprocess (I7).
pub fn format_outtmpl(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '%' && chars.get(i + 1) == Some(&'(') {
            if let Some(close) = chars[i + 2..].iter().position(|&c| c == ')') {
                let key_end = i + 2 + close;
                if chars.get(key_end + 1) == Some(&'s') {
                    let key: String = chars[i + 2..key_end].iter().collect();
                    if let Some(value) = values.get(key.as_str()) {
                        result.push_str(&sanitize_filename(value));
                        i = key_end + 2;
                        continue;
                    }
                }
            }
        }
        result.push(chars[i]);
        i += 1;
    }

    if result.starts_with('-') {
        format!("_{result}")
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> BTreeMap<&'static str, String> {
        let mut m = BTreeMap::new();
        m.insert("channel_id", "12345".to_string());
        m.insert("channel_name", "Example Channel".to_string());
        m.insert("date", "2026-07-26".to_string());
        m.insert("time", "120000".to_string());
        m.insert("title", "Title: Live/Stream".to_string());
        m.insert("ext", "ts".to_string());
        m
    }

    #[test]
    fn substitutes_all_known_tokens() {
        let out = format_outtmpl("%(date)s %(title)s (%(channel_name)s).%(ext)s", &fields());
        assert_eq!(out, "2026-07-26 Title_ Live_Stream (Example Channel).ts");
    }

    #[test]
    fn unknown_token_is_left_literal() {
        let out = format_outtmpl("%(nonexistent)s.%(ext)s", &fields());
        assert_eq!(out, "%(nonexistent)s.ts");
    }

    #[test]
    fn leading_dash_after_sanitize_gets_prefixed() {
        let mut values = BTreeMap::new();
        values.insert("title", "-rf".to_string());
        let out = format_outtmpl("%(title)s", &values);
        assert_eq!(out, "_-rf");
    }

    #[test]
    fn sanitizes_invalid_filename_characters() {
        assert_eq!(sanitize_filename("a:b/c\\d|e?f*g\"h<i>j"), "a_b_c_d_e_f_g_h_i_j");
    }
}

// src/fileutil.rs

//! Filesystem-safe name normalization.
//!
//! Workflow IDs come from user-chosen file names and are embedded in history
//! filenames, so they are normalized once and deterministically: lowercased,
//! reserved characters replaced, Windows device names guarded, capped at a
//! safe length.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Maximum length of a normalized name, in characters.
pub const MAX_SAFE_NAME_LEN: usize = 100;

fn reserved_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"[<>:"/\\|!?*.\x00-\x1F]"#).unwrap_or_else(|e| panic!("reserved-char pattern: {e}"))
    })
}

fn reserved_names() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(con|prn|aux|nul|com[0-9]|lpt[0-9])$")
            .unwrap_or_else(|e| panic!("reserved-name pattern: {e}"))
    })
}

/// Produce a filesystem-safe, deterministic identifier from a free-form name.
pub fn safe_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();

    let replaced = reserved_chars().replace_all(&lowered, "_");
    let guarded = reserved_names().replace_all(&replaced, "_${1}_");

    let mapped: String = guarded
        .chars()
        .map(|c| {
            if c != ' ' && !c.is_control() {
                c
            } else {
                '_'
            }
        })
        .collect();

    mapped.chars().take(MAX_SAFE_NAME_LEN).collect()
}

/// Normalized ID for a workflow: the [`safe_name`] of its file stem.
///
/// Accepts a bare name, a file name, or a full path; the directory part and
/// a final extension are stripped first.
pub fn normalized_id(dag_id: &str) -> String {
    let stem = Path::new(dag_id)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(dag_id);
    safe_name(stem)
}

/// Truncate a string to at most `max` characters.
pub fn trunc_string(val: &str, max: usize) -> &str {
    match val.char_indices().nth(max) {
        Some((idx, _)) => &val[..idx],
        None => val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_lowercases_and_replaces() {
        assert_eq!(safe_name("My DAG: nightly/batch"), "my_dag__nightly_batch");
        assert_eq!(safe_name("hello"), "hello");
    }

    #[test]
    fn safe_name_replaces_dots() {
        // Dots would break the dot-separated history filename format.
        assert_eq!(safe_name("etl.daily"), "etl_daily");
    }

    #[test]
    fn safe_name_guards_device_names() {
        assert_eq!(safe_name("CON"), "_con_");
        assert_eq!(safe_name("lpt9"), "_lpt9_");
    }

    #[test]
    fn safe_name_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(safe_name(&long).chars().count(), MAX_SAFE_NAME_LEN);
    }

    #[test]
    fn normalized_id_strips_path_and_extension() {
        assert_eq!(normalized_id("/etc/dagrun/dags/Hello World.yaml"), "hello_world");
        assert_eq!(normalized_id("plain"), "plain");
    }

    #[test]
    fn trunc_string_respects_char_boundaries() {
        assert_eq!(trunc_string("abcdef", 4), "abcd");
        assert_eq!(trunc_string("ab", 4), "ab");
        assert_eq!(trunc_string("héllo", 2), "hé");
    }
}

//! Output path preparation (spec.md §4.6 step 2, original `_prepare_file`).
//!
//! Ensures the parent directory exists and, if the target path is already
//! taken, disambiguates by inserting an incrementing counter. Unlike a
//! naive split on the filename's last dot, the counter is inserted into the
//! *extension unit the caller supplied* (e.g. `info.json`, not `json`), by
//! re-rendering the whole filename template with that unit replaced by
//! `{n}.{ext}` — exactly what the original's `get_unique_name` does by
//! recomputing `_format_outtmpl` with an overridden `ext` on each attempt.

use std::io;
use std::path::PathBuf;

/// Find the first path rendered by `render` that does not already exist,
/// trying `ext` first and then `"{n}.{ext}"` for increasing `n`, and create
/// its parent directory. `render` rebuilds the full (possibly templated)
/// path given the extension unit to substitute for this attempt — it must
/// match the original's `_format_outtmpl(meta, {'ext': extn})` call per
/// attempt, not just a suffix appended to a precomputed name.
pub fn prepare_unique_path(
    mut render: impl FnMut(&str) -> PathBuf,
    ext: &str,
) -> io::Result<PathBuf> {
    let mut n = 0u32;
    let path = loop {
        let extn = if n == 0 {
            ext.to_string()
        } else {
            format!("{n}.{ext}")
        };
        let candidate = render(&extn);
        if !candidate.exists() {
            break candidate;
        }
        n += 1;
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn render_in(dir: &std::path::Path) -> impl FnMut(&str) -> PathBuf + '_ {
        move |extn: &str| dir.join(format!("out.{extn}"))
    }

    #[test]
    fn returns_path_unchanged_when_free() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ts");
        assert_eq!(prepare_unique_path(render_in(dir.path()), "ts").unwrap(), path);
    }

    #[test]
    fn appends_incrementing_counter_on_collision() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("out.ts"), b"existing").unwrap();

        let unique = prepare_unique_path(render_in(dir.path()), "ts").unwrap();
        assert_eq!(unique, dir.path().join("out.1.ts"));

        std::fs::write(&unique, b"existing too").unwrap();
        let unique2 = prepare_unique_path(render_in(dir.path()), "ts").unwrap();
        assert_eq!(unique2, dir.path().join("out.2.ts"));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested/deeper");
        let path = nested.join("out.ts");
        let unique = prepare_unique_path(render_in(&nested), "ts").unwrap();
        assert_eq!(unique, path);
        assert!(nested.is_dir());
    }

    /// The counter must land inside a compound extension unit
    /// (`out.1.info.json`), not before the final dot of the rendered name
    /// (`out.info.1.json`) — the original re-templates with `ext` overridden
    /// to `"{n}.{ext}"` as a single unit.
    #[test]
    fn counter_lands_inside_compound_extension_unit() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("out.info.json"), b"existing").unwrap();

        let unique = prepare_unique_path(render_in(dir.path()), "info.json").unwrap();
        assert_eq!(unique, dir.path().join("out.1.info.json"));
    }
}

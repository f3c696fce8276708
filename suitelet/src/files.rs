//! Test file discovery: glob patterns to an ordered, duplicate-free list of absolute paths.

use std::path::{Component, Path, PathBuf};

use indexmap::IndexSet;

use crate::bridge::protocol::FilePatterns;

/// Where compiled tests live when the driver does not say.
pub const DEFAULT_TEST_GLOB: &str = "out/test/**/*.js";

#[derive(Debug, thiserror::Error)]
#[error("invalid file pattern '{pattern}': {source}")]
pub struct ExpandError {
    pattern: String,
    #[source]
    source: glob::PatternError,
}

/// Expand `patterns` relative to `base_dir` (expected to be absolute).
///
/// Order follows first encounter across the pattern list; a path matched by several
/// patterns appears once. Directories are skipped.
pub fn expand(patterns: &FilePatterns, base_dir: &Path) -> Result<Vec<PathBuf>, ExpandError> {
    let escaped_base = glob::Pattern::escape(&base_dir.to_string_lossy());
    let mut files = IndexSet::new();

    for pattern in patterns.as_slice() {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            Path::new(&escaped_base)
                .join(pattern)
                .to_string_lossy()
                .into_owned()
        };

        let paths = glob::glob(&full).map_err(|source| ExpandError {
            pattern: pattern.clone(),
            source,
        })?;

        let before = files.len();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => {
                    files.insert(normalize(&path));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%pattern, error = %e, "Skipping unreadable path during discovery");
                }
            }
        }
        tracing::debug!(%pattern, matched = files.len() - before, "Expanded file pattern");
    }

    Ok(files.into_iter().collect())
}

/// Fold `.` and `..` lexically so each file has one spelling.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn default_pattern_finds_nested_js() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "out/test/a.test.js");
        let b = touch(dir.path(), "out/test/nested/b.test.js");
        touch(dir.path(), "out/test/readme.md");
        touch(dir.path(), "src/test/a.test.ts");

        let files = expand(&FilePatterns::default(), dir.path()).unwrap();

        assert_eq!(files, vec![a, b]);
        assert!(files.iter().all(|f| f.is_absolute()));
    }

    #[test]
    fn order_follows_patterns_and_duplicates_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "out/a.js");
        let z = touch(dir.path(), "out/z.js");

        let patterns = FilePatterns::Many(vec![
            "out/z.js".to_string(),
            "out/*.js".to_string(),
            "out/a.js".to_string(),
        ]);
        let files = expand(&patterns, dir.path()).unwrap();

        assert_eq!(files, vec![z, a]);
    }

    #[test]
    fn dot_segments_do_not_produce_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "out/test/a.test.js");

        let patterns = FilePatterns::Many(vec![
            "out/test/*.js".to_string(),
            "./out/test/*.js".to_string(),
            "out/test/../test/*.js".to_string(),
        ]);
        let files = expand(&patterns, dir.path()).unwrap();

        assert_eq!(files, vec![a]);
    }

    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(
            normalize(Path::new("/work/out/./test/../unit/b.js")),
            PathBuf::from("/work/out/unit/b.js")
        );
        assert_eq!(normalize(Path::new("/../a.js")), PathBuf::from("/a.js"));
    }

    #[test]
    fn directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out/looks.js")).unwrap();
        let real = touch(dir.path(), "out/real.js");

        let files = expand(&FilePatterns::One("out/*.js".to_string()), dir.path()).unwrap();

        assert_eq!(files, vec![real]);
    }

    #[test]
    fn absolute_patterns_are_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "x/a.js");
        let pattern = format!("{}/x/*.js", dir.path().display());

        let elsewhere = tempfile::tempdir().unwrap();
        let files = expand(&FilePatterns::One(pattern), elsewhere.path()).unwrap();

        assert_eq!(files, vec![a]);
    }

    #[test]
    fn no_matches_is_an_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let files = expand(&FilePatterns::default(), dir.path()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = expand(&FilePatterns::One("out/[.js".to_string()), dir.path()).unwrap_err();
        assert!(err.to_string().contains("out/[.js"));
    }
}

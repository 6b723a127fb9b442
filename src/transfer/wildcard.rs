//! Wildcard expansion for declared outputs.
//!
//! Patterns use POSIX basic pattern matching (`*`, `?`, `[set]`). The
//! pattern is matched beneath the PVC workspace; every hit is reported
//! both as the absolute path the executors saw and as the path relative
//! to `path_prefix`, which is what gets appended to the output URL.

use std::path::{Path, PathBuf};

use crate::errors::{PoiesisError, Result};

/// Whether `path` contains POSIX pattern metacharacters.
pub fn has_wildcards(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// One matched output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardMatch {
    /// Filesystem location beneath the workspace root.
    pub source: PathBuf,
    /// The path as the executor saw it (workspace root stripped).
    pub exec_path: String,
    /// `exec_path` minus `path_prefix`, for URL construction.
    pub relative: String,
}

/// Expand `pattern` (an absolute executor-side path) beneath
/// `workspace_root`. Matched directories are walked; every regular file
/// found becomes a match.
pub fn expand(workspace_root: &Path, pattern: &str, path_prefix: &str) -> Result<Vec<WildcardMatch>> {
    let anchored = workspace_root.join(pattern.trim_start_matches('/'));
    let glob_pattern = anchored.to_string_lossy().to_string();
    let paths = glob::glob(&glob_pattern)
        .map_err(|e| PoiesisError::Validation(format!("invalid wildcard pattern {pattern}: {e}")))?;

    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| PoiesisError::SystemFailure(e.to_string()))?;
        if path.is_dir() {
            collect_files(&path, &mut matches)?;
        } else {
            matches.push(path);
        }
    }
    matches.sort();

    matches
        .into_iter()
        .map(|source| {
            let exec_path = exec_path_of(workspace_root, &source)?;
            let relative = exec_path
                .strip_prefix(path_prefix)
                .unwrap_or(exec_path.as_str())
                .trim_start_matches('/')
                .to_string();
            Ok(WildcardMatch {
                source,
                exec_path,
                relative,
            })
        })
        .collect()
}

/// Translate a workspace file back to the absolute path executors used.
pub fn exec_path_of(workspace_root: &Path, source: &Path) -> Result<String> {
    let relative = source.strip_prefix(workspace_root).map_err(|_| {
        PoiesisError::SystemFailure(format!(
            "{} is outside the workspace {}",
            source.display(),
            workspace_root.display()
        ))
    })?;
    Ok(format!("/{}", relative.to_string_lossy()))
}

fn collect_files(dir: &Path, into: &mut Vec<PathBuf>) -> Result<()> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                into.push(path);
            }
        }
    }
    Ok(())
}

/// Join a (directory) URL with a relative path, normalizing slashes.
pub fn join_url(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), relative.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn wildcard_detection() {
        assert!(has_wildcards("/data/*.txt"));
        assert!(has_wildcards("/data/f?"));
        assert!(has_wildcards("/data/[ab]"));
        assert!(!has_wildcards("/data/plain.txt"));
    }

    #[test]
    fn expands_star_and_strips_prefix() {
        let workspace = tempfile::tempdir().unwrap();
        touch(&workspace.path().join("data/out/a.txt"));
        touch(&workspace.path().join("data/out/b.txt"));
        touch(&workspace.path().join("data/out/c.log"));

        let matches = expand(workspace.path(), "/data/out/*.txt", "/data/out").unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].exec_path, "/data/out/a.txt");
        assert_eq!(matches[0].relative, "a.txt");
        assert_eq!(matches[1].relative, "b.txt");
    }

    #[test]
    fn matched_directories_are_walked() {
        let workspace = tempfile::tempdir().unwrap();
        touch(&workspace.path().join("data/run1/inner/f"));
        touch(&workspace.path().join("data/run2/g"));

        let mut matches = expand(workspace.path(), "/data/run*", "/data").unwrap();
        matches.sort_by(|a, b| a.relative.cmp(&b.relative));
        let relatives: Vec<_> = matches.iter().map(|m| m.relative.as_str()).collect();
        assert_eq!(relatives, vec!["run1/inner/f", "run2/g"]);
    }

    #[test]
    fn question_mark_and_set_patterns() {
        let workspace = tempfile::tempdir().unwrap();
        touch(&workspace.path().join("d/f1"));
        touch(&workspace.path().join("d/f2"));
        touch(&workspace.path().join("d/f10"));

        let matches = expand(workspace.path(), "/d/f?", "/d").unwrap();
        assert_eq!(matches.len(), 2);

        let matches = expand(workspace.path(), "/d/f[1]", "/d").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].relative, "f1");
    }

    #[test]
    fn url_join_normalizes_slashes() {
        assert_eq!(join_url("s3://b/out/", "a.txt"), "s3://b/out/a.txt");
        assert_eq!(join_url("s3://b/out", "a.txt"), "s3://b/out/a.txt");
        assert_eq!(join_url("s3://b/out", "/a.txt"), "s3://b/out/a.txt");
        assert_eq!(join_url("s3://b/out", ""), "s3://b/out");
    }

    // Emitted URL = join(url, strip_prefix(path, path_prefix)).
    #[test]
    fn emitted_urls_follow_prefix_stripping() {
        let workspace = tempfile::tempdir().unwrap();
        touch(&workspace.path().join("data/out/sub/x.bin"));

        let matches = expand(workspace.path(), "/data/out/*", "/data/out").unwrap();
        let urls: Vec<_> = matches
            .iter()
            .map(|m| join_url("s3://bucket/results/", &m.relative))
            .collect();
        assert_eq!(urls, vec!["s3://bucket/results/sub/x.bin"]);
    }
}

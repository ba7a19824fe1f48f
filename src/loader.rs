//! Plain-text document loading.
//!
//! Walks a directory for `.txt` files and turns each into a [`Document`]
//! whose source label is the root-relative path, so citations read the way
//! the corpus is laid out on disk. File-format parsing beyond UTF-8 text is
//! somebody else's job.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::models::Document;

const INCLUDE_GLOBS: &[&str] = &["**/*.txt", "*.txt"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Load every `.txt` file under `root`, sorted by label for deterministic
/// ingestion order. Unreadable or non-UTF-8 files are skipped with a warning.
pub fn load_dir(root: &Path) -> Result<Vec<Document>> {
    if !root.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "document directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(INCLUDE_GLOBS)?;
    let exclude_set = build_globset(EXCLUDE_GLOBS)?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        documents.push(Document::new(rel_str, text));
    }

    documents.sort_by(|a, b| a.source_label.cmp(&b.source_label));
    Ok(documents)
}

/// Load a single file or a whole directory. For a file the label is its
/// file name.
pub fn load_path(path: &Path) -> Result<Vec<Document>> {
    if path.is_dir() {
        return load_dir(path);
    }
    if !path.is_file() {
        return Err(Error::InvalidArgument(format!(
            "no such file or directory: {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)?;
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(vec![Document::new(label, text)])
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| Error::InvalidConfiguration(format!("invalid glob: {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| Error::InvalidConfiguration(format!("invalid glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_dir_finds_txt_recursively_in_label_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("nested/a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("ignored.pdf"), "binaryish").unwrap();

        let documents = load_dir(dir.path()).unwrap();
        let labels: Vec<&str> = documents.iter().map(|d| d.source_label.as_str()).collect();
        assert_eq!(labels, vec!["b.txt", "nested/a.txt"]);
        assert_eq!(documents[0].text, "second");
    }

    #[test]
    fn test_load_dir_missing_root_is_invalid_argument() {
        let err = load_dir(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_load_path_single_file_uses_file_name_label() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "hello").unwrap();

        let documents = load_path(&file).unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].source_label, "notes.txt");
        assert_eq!(documents[0].text, "hello");
    }

    #[test]
    fn test_excluded_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config.txt"), "noise").unwrap();
        std::fs::write(dir.path().join("real.txt"), "signal").unwrap();

        let documents = load_dir(dir.path()).unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].source_label, "real.txt");
    }
}

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the directory that was walked.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    /// Source name recorded for chunks read from this file.
    pub fn source_name(&self) -> String {
        self.absolute_path.to_string_lossy().into_owned()
    }
}

const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

/// Compile an optional `--glob` pattern.
pub fn compile_filter(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    pattern
        .map(|p| {
            Glob::new(p)
                .map(|g| g.compile_matcher())
                .map_err(|e| {
                    Error::Config(format!("invalid glob pattern: {e}"))
                })
        })
        .transpose()
}

/// Resolve one ingest argument into the files it names.
///
/// A file is returned as-is whatever its extension. A directory is walked
/// recursively for `.md` and `.txt` files, skipping hidden entries, and
/// `filter` is applied to paths relative to it.
pub fn discover(
    path: &Path,
    filter: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredFile>> {
    let metadata = std::fs::metadata(path).map_err(|_| Error::NotFound {
        kind: "path",
        name: path.display().to_string(),
    })?;

    if metadata.is_file() {
        let absolute_path = path.canonicalize()?;
        let relative_path = absolute_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| absolute_path.clone());
        return Ok(vec![DiscoveredFile {
            relative_path,
            absolute_path,
        }]);
    }

    let root = path.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&root, &root, &mut results)?;
    if let Some(filter) = filter {
        results.retain(|f| filter.is_match(&f.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let entry_path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &entry_path, results)?;
            continue;
        }

        let absolute_path = if file_type.is_symlink() {
            // Broken links and links to directories are skipped; the latter
            // could loop back into the tree.
            match entry_path.canonicalize() {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => continue,
            }
        } else if file_type.is_file() {
            entry_path.canonicalize()?
        } else {
            continue;
        };

        if !is_supported(&absolute_path) {
            continue;
        }
        let relative_path = entry_path
            .strip_prefix(root)
            .unwrap_or(&entry_path)
            .to_path_buf();
        results.push(DiscoveredFile {
            relative_path,
            absolute_path,
        });
    }

    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

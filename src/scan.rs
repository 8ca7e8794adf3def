//! Input expansion: turn command-line paths into a list of source files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Check if a path has one of the given extensions (case-insensitive).
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Expand `inputs` into source files.
///
/// Files are taken as given if their extension matches; directories are
/// listed (recursively with `recursive`) and filtered by extension. The
/// result keeps first-seen order with duplicates removed.
pub fn collect_inputs(
    inputs: &[PathBuf],
    extensions: &[String],
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for input in inputs {
        if !input.exists() {
            bail!("Input does not exist: {:?}", input);
        }

        if input.is_file() {
            if has_extension(input, extensions) {
                if seen.insert(input.clone()) {
                    files.push(input.clone());
                }
            } else {
                tracing::warn!("Skipping {:?}: not a source file", input);
            }
            continue;
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(input)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("Failed to read directory {:?}", input))?;
            let path = entry.path();
            if entry.file_type().is_file()
                && has_extension(path, extensions)
                && seen.insert(path.to_path_buf())
            {
                files.push(path.to_path_buf());
            }
        }
    }

    tracing::debug!("Collected {} source files", files.len());
    Ok(files)
}

//! Small filesystem helpers

use std::path::Path;

use crate::error::Result;

/// Ensure a directory exists, creating it if necessary
pub(crate) fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Validate that a file has one of the allowed extensions (case-insensitive)
pub(crate) fn has_allowed_extension<S: AsRef<str>>(path: &Path, allowed_extensions: &[S]) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => allowed_extensions
            .iter()
            .any(|e| e.as_ref().trim_start_matches('.').eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// File name component of a path as an owned string
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

use std::path::Path;

/// Empty the processed-output folder before a batch.
///
/// Removes regular files and symlinks; subdirectories and the folder itself
/// are left alone. A missing folder is created. Returns the number of files
/// removed.
pub fn clean_output_dir(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        tracing::debug!(dir = %dir.display(), "Created output folder");
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() || file_type.is_symlink() {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Could not remove stale output");
                }
            }
        }
    }

    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Cleaned output folder");
    }
    Ok(removed)
}

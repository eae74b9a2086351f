use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{bail, Context, Result};

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn sibling_temp_path(path: &Path, parent_dir: &Path) -> PathBuf {
    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("relay");
    let sequence = TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent_dir.join(format!(".{stem}.{}.{sequence}.tmp", std::process::id()))
}

/// Replaces `path` with `content` via a synced sibling temp file and a rename.
///
/// Readers observe either the previous file or the complete new one. The temp
/// file is removed when the rename fails.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create directory {}", parent_dir.display()))?;

    let temp_path = sibling_temp_path(path, parent_dir);
    let mut temp_file = File::create(&temp_path)
        .with_context(|| format!("failed to create {}", temp_path.display()))?;
    temp_file
        .write_all(content.as_bytes())
        .and_then(|()| temp_file.sync_all())
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    drop(temp_file);

    if let Err(error) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error).with_context(|| {
            format!("failed to move {} into {}", temp_path.display(), path.display())
        });
    }
    Ok(())
}

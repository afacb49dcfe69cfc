use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Replace `path` with `contents` without readers ever seeing a partial file.
///
/// Every call stages into its own temp file next to `path`, so concurrent
/// writers (other daemons, the CLI) never share one. Temp files are created
/// `0600` on unix; without `private` the result is widened to `0644`.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8], private: bool) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    let contents = contents.to_vec();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents, private))
        .await
        .context("Atomic write task failed")?
}

fn write_atomic_blocking(path: &Path, contents: &[u8], private: bool) -> anyhow::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory {:?}", parent))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Path has no file name")?;

    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(&parent)
        .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
    staged
        .write_all(contents)
        .and_then(|_| staged.as_file().sync_all())
        .with_context(|| format!("Failed to write {:?}", staged.path()))?;

    #[cfg(unix)]
    if !private {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("Failed to set permissions on {:?}", staged.path()))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    staged
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

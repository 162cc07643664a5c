// Filesystem sink: durably replaces a target file's contents with a save
// body using write-to-temp + rename. The temp file is created next to the
// destination so the rename never crosses filesystems.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Copy exactly `len` bytes from `body` into a private temp file, then
/// rename it over `dest`. A short read is an error. The temp file is
/// removed on every failure path and the destination is left unmodified.
pub async fn commit<R>(len: u64, body: &mut R, dest: &Path) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let tmp_path = temp_path_for(dest);

    if let Err(e) = write_body(len, body, &tmp_path).await {
        remove_temp(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp_path, dest).await {
        remove_temp(&tmp_path).await;
        return Err(e).with_context(|| format!("failed to replace {}", dest.display()));
    }

    debug!("committed {len} bytes to {}", dest.display());
    Ok(())
}

/// Guarantee that `path` and its parent directories exist before the
/// session starts. Failure is fatal for the caller.
pub fn ensure_file_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directories {}", parent.display()))?;
        }
    }

    if !path.exists() {
        std::fs::File::create(path)
            .with_context(|| format!("failed to create file {}", path.display()))?;
        debug!("created {}", path.display());
    }
    Ok(())
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("remate");
    parent.join(format!(".{}.tmp.{}", file_name, std::process::id()))
}

async fn write_body<R>(len: u64, body: &mut R, tmp_path: &Path) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut file = File::create(tmp_path)
        .await
        .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;

    let copied = tokio::io::copy(&mut body.take(len), &mut file)
        .await
        .context("failed to copy save body")?;
    if copied != len {
        bail!("save body ended after {copied} of {len} declared bytes");
    }

    file.sync_all()
        .await
        .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
    Ok(())
}

async fn remove_temp(tmp_path: &Path) {
    if let Err(e) = fs::remove_file(tmp_path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove temp file {}: {e}", tmp_path.display());
        }
    }
}

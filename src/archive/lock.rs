use std::path::{Path, PathBuf};

use anyhow::Context;
use fs4::fs_std::FileExt;

const LOCK_FILE: &str = ".ringarchive.lock";

/// Exclusive advisory lock on an archive root, so two processes never write
/// the same destination paths. Released when dropped.
#[derive(Debug)]
pub struct ArchiveLock {
    path: PathBuf,
    _file: std::fs::File,
}

impl ArchiveLock {
    pub async fn acquire(root: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create archive directory: {}", root.display()))?;

        let path = root.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
                file.try_lock_exclusive().map_err(|_| {
                    anyhow::anyhow!(
                        "Another ringarchive-rs instance is writing to this archive (lock: {})",
                        path.display()
                    )
                })?;
                Ok::<std::fs::File, anyhow::Error>(file)
            }
        })
        .await??;

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

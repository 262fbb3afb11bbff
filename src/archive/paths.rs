use std::path::{Path, PathBuf};

use tokio::fs;

use crate::ring::Event;

/// `created_at` rendering used in archived filenames.
const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

/// Build the archive path for an event:
/// `<root>/<device>/<id>_<YYYY_MM_DD-HH_MM_SS>.mp4`, timestamp in UTC.
///
/// Pure function of `(device_name, id, created_at)`, so every task for the
/// same event lands on the same file.
pub fn destination_path(root: &Path, event: &Event) -> PathBuf {
    let filename = format!(
        "{}_{}.mp4",
        event.id,
        event.created_at.format(TIMESTAMP_FORMAT)
    );
    root.join(clean_component(&event.device_name)).join(filename)
}

/// Temporary path a download is streamed into before the final rename.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Turn a device name into a single safe path component by removing
/// characters that are invalid on common filesystems: `/`, `\`, `:`, `*`,
/// `?`, `"`, `<`, `>`, `|`. Names that reduce to nothing or to dots are
/// replaced so they cannot point at the root or its parent.
pub fn clean_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| c == '.') {
        "unnamed-device".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Maps events to archive paths and reports whether they are already there.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination path and whether a complete file already exists there.
    ///
    /// Missing parent directories are created first, so downloads never see
    /// a missing-directory error. Only the final path counts; a leftover
    /// `.part` file is not an archived event.
    pub async fn resolve(&self, event: &Event) -> std::io::Result<(PathBuf, bool)> {
        let path = destination_path(&self.root, event);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let exists = fs::try_exists(&path).await?;
        Ok((path, exists))
    }
}

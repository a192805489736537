//! Watches a browser download folder for finished files.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Suffixes browsers use while a download is still being written.
const IN_PROGRESS_SUFFIXES: &[&str] = &[".crdownload", ".part", ".tmp"];

#[derive(Debug, Clone)]
pub struct DownloadWatcher {
    dir: PathBuf,
    claimed: HashSet<PathBuf>,
}

impl DownloadWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            claimed: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Completed files in the folder that no earlier wait has returned.
    pub fn unclaimed(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("cannot read downloads folder {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || self.claimed.contains(&path) || is_in_progress(&path) {
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }

    /// Waits for the next finished download and claims it so a later wait
    /// does not return the same file.
    pub async fn wait_for_new(&mut self, timeout: Duration) -> Result<PathBuf> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(path) = self.unclaimed()?.into_iter().next() {
                info!("Download finished: {}", path.display());
                self.claimed.insert(path.clone());
                return Ok(path);
            }
            if Instant::now() >= deadline {
                bail!(
                    "no download finished in {} within {:?}",
                    self.dir.display(),
                    timeout
                );
            }
            debug!("Waiting for a download in {}", self.dir.display());
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Renames a claimed file to `<name>_<YYYYmmdd_HHMMSS>.<ext>` in the same
    /// folder. Files without an extension are saved as `.zip`.
    pub fn save_as(&mut self, path: &Path, name: &str, now: DateTime<Local>) -> Result<PathBuf> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("zip");
        let target = self
            .dir
            .join(format!("{}_{}.{}", name, now.format("%Y%m%d_%H%M%S"), ext));
        std::fs::rename(path, &target).with_context(|| {
            format!("failed to rename {} to {}", path.display(), target.display())
        })?;
        self.claimed.remove(path);
        self.claimed.insert(target.clone());
        Ok(target)
    }
}

fn is_in_progress(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.starts_with('.') || IN_PROGRESS_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn waits_until_partial_file_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let partial = folder.join("site.zip.crdownload");
            std::fs::write(&partial, b"PK").unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::rename(&partial, folder.join("site.zip")).unwrap();
        });

        let mut watcher = DownloadWatcher::new(dir.path());
        let path = watcher.wait_for_new(Duration::from_secs(5)).await.unwrap();
        writer.await.unwrap();
        assert_eq!(path, dir.path().join("site.zip"));
    }

    #[tokio::test]
    async fn claimed_files_are_not_returned_twice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.zip"), b"PK").unwrap();

        let mut watcher = DownloadWatcher::new(dir.path());
        watcher.wait_for_new(Duration::from_secs(1)).await.unwrap();
        let err = watcher
            .wait_for_new(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no download finished"));
    }

    #[tokio::test]
    async fn save_as_renames_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export"), b"PK").unwrap();

        let mut watcher = DownloadWatcher::new(dir.path());
        let path = watcher.wait_for_new(Duration::from_secs(1)).await.unwrap();
        let now = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let saved = watcher.save_as(&path, "my_site", now).unwrap();

        assert_eq!(saved, dir.path().join("my_site_20250304_050607.zip"));
        assert!(saved.exists());
        assert!(watcher.unclaimed().unwrap().is_empty());
    }

    #[test]
    fn in_progress_names_are_skipped() {
        assert!(is_in_progress(Path::new("/d/x.zip.crdownload")));
        assert!(is_in_progress(Path::new("/d/x.zip.part")));
        assert!(is_in_progress(Path::new("/d/.com.google.Chrome.abc")));
        assert!(!is_in_progress(Path::new("/d/x.zip")));
    }
}

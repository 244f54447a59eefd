use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Deletes files before their directories; entries that vanish underneath
/// (concurrent writers, other cleaners) count as deleted.
fn remove_tree_once(root: &Path) -> io::Result<()> {
    if !root.exists() {
        return Ok(());
    }
    let mut first_error = None;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.io_error().map(|io| io.kind()) != Some(io::ErrorKind::NotFound) {
                    first_error.get_or_insert(io::Error::other(e.to_string()));
                }
                continue;
            }
        };
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        if let Err(e) = result
            && e.kind() != io::ErrorKind::NotFound
        {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) if root.exists() => Err(e),
        _ => Ok(()),
    }
}

/// Removes `root` recursively, retrying with a linear backoff
/// (`backoff × attempt`). Returns true once nothing is left.
pub async fn remove_tree_with_retries(root: &Path, attempts: u32, backoff: Duration) -> bool {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let target = root.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || remove_tree_once(&target)).await;
        match outcome {
            Ok(Ok(())) if !root.exists() => return true,
            Ok(Ok(())) => debug!("{} reappeared during delete", root.display()),
            Ok(Err(e)) => debug!(
                "Delete attempt {attempt}/{attempts} for {} failed: {e}",
                root.display()
            ),
            Err(e) => debug!("Delete task for {} panicked: {e}", root.display()),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff * attempt).await;
        }
    }
    warn!("Leftovers remain under {}", root.display());
    false
}

/// Deletes every child of `root`, then recreates it empty. Returns the
/// children that could not be removed.
pub async fn reset_directory(root: &Path, attempts: u32, backoff: Duration) -> Vec<PathBuf> {
    let mut leftovers = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let child = entry.path();
            let removed = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                remove_tree_with_retries(&child, attempts, backoff).await
            } else {
                std::fs::remove_file(&child).is_ok() || !child.exists()
            };
            if !removed {
                leftovers.push(child);
            }
        }
    }
    if let Err(e) = std::fs::create_dir_all(root) {
        warn!("Unable to recreate {}: {e}", root.display());
    }
    leftovers
}

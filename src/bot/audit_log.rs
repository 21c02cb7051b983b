// src/bot/audit_log.rs - Append-only log of every distinct username seen by the relay

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One username per line, original casing. The in-memory mirror holds the
/// lowercase form of every line, so dedupe is case-insensitive.
pub struct UsernameAuditLog {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl UsernameAuditLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Open the log and seed the mirror from any existing file
    pub async fn open<P: AsRef<Path>>(path: P) -> Self {
        let log = Self::new(path);
        match log.preload().await {
            Ok(count) => info!("Username log {} has {} entries", log.path.display(), count),
            Err(e) => debug!("Username log not preloaded: {:#}", e),
        }
        log
    }

    async fn preload(&self) -> Result<usize> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read username log: {}", self.path.display()))?;
        let mut seen = self.seen.lock().await;
        for line in content.lines() {
            let name = line.trim();
            if !name.is_empty() {
                seen.insert(name.to_lowercase());
            }
        }
        Ok(seen.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `name` if no case-insensitive match was logged before.
    ///
    /// The membership check and the append happen under one lock, so
    /// concurrent calls for the same new name append exactly once. Returns
    /// whether a line was written. On a write error the mirror is left
    /// untouched and a later call retries.
    pub async fn record(&self, name: &str) -> Result<bool> {
        let key = name.trim();
        if key.is_empty() {
            return Ok(false);
        }
        let norm = key.to_lowercase();

        let mut seen = self.seen.lock().await;
        if seen.contains(&norm) {
            return Ok(false);
        }

        self.append_line(key).await?;
        seen.insert(norm);
        debug!("Logged new username '{}'", key);
        Ok(true)
    }

    async fn append_line(&self, name: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open username log: {}", self.path.display()))?;
        file.write_all(format!("{}\n", name).as_bytes())
            .await
            .with_context(|| format!("Failed to append to username log: {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.seen.lock().await.contains(&name.trim().to_lowercase())
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_same_name_any_case_logged_once() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("logs").join("usernames.log");
        let log = UsernameAuditLog::open(&path).await;

        assert!(log.record("  Alice ").await.unwrap());
        assert!(!log.record("alice").await.unwrap());
        assert!(!log.record("ALICE").await.unwrap());

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "Alice\n");
    }

    #[tokio::test]
    async fn test_blank_names_are_ignored() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("usernames.log");
        let log = UsernameAuditLog::open(&path).await;

        assert!(!log.record("   ").await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_preload_seeds_mirror() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("usernames.log");
        fs::write(&path, "Bob\n\n  carol \n").await.unwrap();

        let log = UsernameAuditLog::open(&path).await;
        assert_eq!(log.len().await, 2);
        assert!(!log.record("BOB").await.unwrap());
        assert!(log.record("Dave").await.unwrap());

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "Bob\n\n  carol \nDave\n");
    }

    #[tokio::test]
    async fn test_concurrent_records_append_once() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("usernames.log");
        let log = Arc::new(UsernameAuditLog::open(&path).await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let log = Arc::clone(&log);
            let name = if i % 2 == 0 { "Racer" } else { "racer" };
            handles.push(tokio::spawn(async move { log.record(name).await.unwrap() }));
        }

        let mut written = 0;
        for handle in handles {
            if handle.await.unwrap() {
                written += 1;
            }
        }

        assert_eq!(written, 1);
        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let temp_dir = tempdir().unwrap();
        // the log path is a directory, so opening it for append fails
        let log = UsernameAuditLog::new(temp_dir.path());

        assert!(log.record("Alice").await.is_err());
        assert!(!log.contains("alice").await);
    }
}

//! Content-addressed, write-once storage for files uploaded through the HTTP emulator.
//!
//! Every stored file is named by the hex sha256 of its contents, so concurrent uploads of
//! identical bytes collapse to a single no-op write rather than a race. Files are marked
//! read-only after the write completes (`0o444` on Unix; a no-op elsewhere).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub struct Quarantine {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub sha256: String,
    pub size: u64,
    pub stored_path: PathBuf,
}

impl Quarantine {
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Writes `content` under its content hash, preserving `original_filename`'s extension for
    /// operator readability. If a file with the same hash and extension already exists, this is
    /// a no-op (the existing file is already exactly these bytes, by construction).
    pub async fn store(&self, content: &[u8], original_filename: &str) -> anyhow::Result<StoredFile> {
        let sha256 = hex::encode(Sha256::digest(content));
        let ext = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let stored_name = format!("{sha256}.{ext}");
        let stored_path = self.root.join(&stored_name);

        if tokio::fs::metadata(&stored_path).await.is_ok() {
            return Ok(StoredFile {
                sha256,
                size: content.len() as u64,
                stored_path,
            });
        }

        let tmp_path = self.root.join(format!("{stored_name}.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, content).await?;
        set_readonly(&tmp_path).await?;

        match tokio::fs::rename(&tmp_path, &stored_path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lost the race to a concurrent writer of the same bytes; discard ours.
                let _ = tokio::fs::remove_file(&tmp_path).await;
            }
            Err(error) => return Err(error.into()),
        }

        Ok(StoredFile {
            sha256,
            size: content.len() as u64,
            stored_path,
        })
    }
}

#[cfg(unix)]
async fn set_readonly(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o444);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_readonly(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_content_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::open(dir.path()).await.unwrap();

        let a = quarantine.store(b"hello world", "note.txt").await.unwrap();
        let b = quarantine.store(b"hello world", "note.txt").await.unwrap();

        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.stored_path, b.stored_path);
    }

    #[tokio::test]
    async fn different_content_hashes_differently() {
        let dir = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::open(dir.path()).await.unwrap();

        let a = quarantine.store(b"alpha", "a.txt").await.unwrap();
        let b = quarantine.store(b"beta", "b.txt").await.unwrap();

        assert_ne!(a.sha256, b.sha256);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stored_file_is_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::open(dir.path()).await.unwrap();
        let stored = quarantine.store(b"payload", "x.bin").await.unwrap();

        let perms = tokio::fs::metadata(&stored.stored_path).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o444);
    }
}

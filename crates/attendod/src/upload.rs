use std::path::{Path, PathBuf};

/// An uploaded image parked on disk for the lifetime of one request.
///
/// The file is removed when the value is dropped, whichever way the
/// request ends, including a write that fails halfway.
pub struct TempUpload {
    path: PathBuf,
    original_name: String,
}

impl TempUpload {
    pub async fn write(
        dir: &Path,
        original_name: Option<&str>,
        bytes: &[u8],
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let upload = Self {
            path: dir.join(uuid::Uuid::new_v4().simple().to_string()),
            original_name: original_name
                .filter(|n| !n.is_empty())
                .unwrap_or("upload.jpg")
                .to_string(),
        };
        upload.fill(bytes).await?;
        tracing::debug!(path = %upload.path.display(), bytes = bytes.len(), "stored upload");
        Ok(upload)
    }

    async fn fill(&self, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(&self.path, bytes).await
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove upload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let upload = TempUpload::write(dir.path(), Some("me.jpg"), b"abc").await.unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(upload.read().await.unwrap(), b"abc");
        assert_eq!(upload.original_name(), "me.jpg");
        drop(upload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_creates_missing_dir_and_defaults_name() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("uploads");
        let upload = TempUpload::write(&nested, None, b"x").await.unwrap();
        assert!(upload.path().starts_with(&nested));
        assert_eq!(upload.original_name(), "upload.jpg");
    }

    #[tokio::test]
    async fn test_dir_that_is_a_file_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("uploads");
        std::fs::write(&blocker, b"").unwrap();
        assert!(TempUpload::write(&blocker, None, b"x").await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    /// A write that fails after the file exists (disk full) still leaves
    /// nothing behind.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_partial_write_is_removed() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let upload = TempUpload {
            path: dir.path().join("full"),
            original_name: "upload.jpg".to_string(),
        };
        std::os::unix::fs::symlink("/dev/full", &upload.path).unwrap();

        let err = upload.fill(&[0u8; 4096]).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(28)); // ENOSPC
        drop(upload);
        assert!(is_empty(dir.path()));
    }

    #[test]
    fn test_drop_without_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        drop(TempUpload {
            path: dir.path().join("never-written"),
            original_name: String::new(),
        });
        assert!(is_empty(dir.path()));
    }
}

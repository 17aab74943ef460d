//! The underlying file system stand-in: authoritative source of bytes on a
//! cache miss. This is specified in spec §6 as an external collaborator; the
//! trait is the contract, `LocalUfs` is a minimal implementation (a plain
//! directory tree) good enough to exercise the paging logic without a real
//! object-store dependency.

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::errors::UfsError;

/// Returns positioned input streams for UFS URIs (spec: "UFS stream cache").
#[async_trait]
pub trait UfsReader: Send + Sync {
    /// Reads up to `len` bytes starting at `offset` from `ufs_path`. May
    /// return fewer bytes than `len` at end-of-file.
    async fn read_range(&self, ufs_path: &str, offset: u64, len: u64) -> Result<Bytes, UfsError>;

    async fn stat_len(&self, ufs_path: &str) -> Result<u64, UfsError>;
}

/// Reads from a directory tree on local disk, treating `ufs_path` as a
/// relative path under `root`.
pub struct LocalUfs {
    root: Utf8PathBuf,
}

impl LocalUfs {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, ufs_path: &str) -> Utf8PathBuf {
        self.root.join(ufs_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl UfsReader for LocalUfs {
    async fn read_range(&self, ufs_path: &str, offset: u64, len: u64) -> Result<Bytes, UfsError> {
        let path = self.resolve(ufs_path);
        let mut f = tokio::fs::File::open(path.as_std_path())
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => UfsError::NotFound(ufs_path.to_string()),
                _ => UfsError::Io(e),
            })?;
        f.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        let mut total = 0usize;
        loop {
            let n = f.read(&mut buf[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        buf.truncate(total);
        Ok(Bytes::from(buf))
    }

    async fn stat_len(&self, ufs_path: &str) -> Result<u64, UfsError> {
        let path = self.resolve(ufs_path);
        let meta = tokio::fs::metadata(path.as_std_path())
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => UfsError::NotFound(ufs_path.to_string()),
                _ => UfsError::Io(e),
            })?;
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_range_from_a_local_file() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        tokio::fs::write(root.join("x"), b"0123456789").await.unwrap();
        let ufs = LocalUfs::new(root);

        let got = ufs.read_range("x", 2, 4).await.unwrap();
        assert_eq!(&got[..], b"2345");
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let ufs = LocalUfs::new(root);
        let err = ufs.read_range("missing", 0, 1).await.unwrap_err();
        assert!(matches!(err, UfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn stat_len_reports_file_size() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        tokio::fs::write(root.join("y"), b"abcde").await.unwrap();
        let ufs = LocalUfs::new(root);
        assert_eq!(ufs.stat_len("y").await.unwrap(), 5);
    }
}

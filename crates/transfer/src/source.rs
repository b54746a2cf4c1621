//! Byte sources for part uploads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chunklift_model::ByteRange;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::TransferError;

/// Read-only view of the file being uploaded.
///
/// The engine never mutates the source; it only pulls the byte range of
/// each part as that part is dispatched.
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Reads exactly the bytes in `range`.
    async fn read_range(&self, range: &ByteRange) -> Result<Bytes, TransferError>;

    /// Total size of the source in bytes.
    fn total_bytes(&self) -> u64;
}

/// File-backed source using seek + exact reads, one open per range.
///
/// The size recorded at open time is re-checked on every read; a file
/// that grew or shrank mid-session is a session-fatal source error.
pub struct FileSource {
    path: PathBuf,
    total_bytes: u64,
}

impl FileSource {
    /// Opens the source and records its current size.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| TransferError::SourceRead(format!("{}: {e}", path.display())))?;
        if metadata.is_dir() {
            return Err(TransferError::SourceRead(format!(
                "{}: is a directory",
                path.display()
            )));
        }
        Ok(Self {
            path,
            total_bytes: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    async fn read_range(&self, range: &ByteRange) -> Result<Bytes, TransferError> {
        let source_err =
            |e: std::io::Error| TransferError::SourceRead(format!("{}: {e}", self.path.display()));

        let mut file = tokio::fs::File::open(&self.path).await.map_err(source_err)?;
        let metadata = file.metadata().await.map_err(source_err)?;
        if metadata.len() != self.total_bytes {
            return Err(TransferError::SourceRead(format!(
                "{}: size changed from {} to {} during upload",
                self.path.display(),
                self.total_bytes,
                metadata.len()
            )));
        }

        file.seek(std::io::SeekFrom::Start(range.start))
            .await
            .map_err(source_err)?;
        let mut buf = vec![0u8; range.len() as usize];
        file.read_exact(&mut buf).await.map_err(source_err)?;
        Ok(Bytes::from(buf))
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// In-memory source, mainly for tests and small payloads.
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    async fn read_range(&self, range: &ByteRange) -> Result<Bytes, TransferError> {
        let start = range.start as usize;
        let end = range.end as usize;
        if end > self.data.len() || start > end {
            return Err(TransferError::SourceRead(format!(
                "range {}..{} out of bounds for {} bytes",
                range.start,
                range.end,
                self.data.len()
            )));
        }
        Ok(self.data.slice(start..end))
    }

    fn total_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_source_reads_exact_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &payload).unwrap();

        let source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.total_bytes(), 1000);

        let head = source.read_range(&ByteRange::new(0, 10)).await.unwrap();
        assert_eq!(&head[..], &payload[..10]);
        let tail = source.read_range(&ByteRange::new(990, 1000)).await.unwrap();
        assert_eq!(&tail[..], &payload[990..]);
    }

    #[tokio::test]
    async fn file_source_detects_size_change() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 100]).unwrap();

        let source = FileSource::open(&path).await.unwrap();
        std::fs::write(&path, vec![7u8; 50]).unwrap();

        let err = source.read_range(&ByteRange::new(0, 10)).await.unwrap_err();
        assert!(matches!(err, TransferError::SourceRead(_)));
    }

    #[tokio::test]
    async fn file_source_rejects_missing_and_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(FileSource::open(tmp.path().join("nope.bin")).await.is_err());
        assert!(FileSource::open(tmp.path()).await.is_err());
    }

    #[tokio::test]
    async fn bytes_source_bounds() {
        let source = BytesSource::new(vec![1u8, 2, 3, 4]);
        let mid = source.read_range(&ByteRange::new(1, 3)).await.unwrap();
        assert_eq!(&mid[..], &[2, 3]);
        assert!(source.read_range(&ByteRange::new(2, 9)).await.is_err());
    }
}

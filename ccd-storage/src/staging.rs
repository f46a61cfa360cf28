use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::bucket::remote_path;
use crate::driver::ByteStream;

/// Chunk size of staged file uploads
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Local scratch area holding staged uploads, mirroring the storage path hierarchy
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the staging file for a storage path
    pub fn path_for(&self, storage_path: &str) -> PathBuf {
        self.root.join(remote_path(storage_path))
    }

    /// Opens the staging file for `storage_path`, creating it if needed.
    ///
    /// With `append` the cursor is positioned at the end of existing content,
    /// otherwise the file is truncated. Returns the file, its location and the
    /// current length.
    pub async fn open(
        &self,
        storage_path: &str,
        append: bool,
    ) -> std::io::Result<(File, PathBuf, u64)> {
        let path = self.path_for(storage_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let offset = if append {
            file.seek(SeekFrom::End(0)).await?
        } else {
            file.set_len(0).await?;
            0
        };

        debug!(path = %path.display(), append, offset, "Opened staging file");
        Ok((file, path, offset))
    }
}

/// Removes a staging file, tolerating one that is already gone.
pub async fn remove_staged(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Streams the content of `file` from its current position in chunks.
pub fn file_stream(file: File) -> ByteStream {
    futures::stream::try_unfold(file, read_chunk).boxed()
}

async fn read_chunk(mut file: File) -> std::io::Result<Option<(Bytes, File)>> {
    let mut buf = BytesMut::zeroed(UPLOAD_CHUNK_SIZE);
    let n = file.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((buf.freeze(), file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_path_for_mirrors_storage_path() {
        let area = StagingArea::new("/tmp/ccd");
        assert_eq!(
            area.path_for("/docker/registry/v2/repositories/foo/_uploads/id/data"),
            PathBuf::from("/tmp/ccd/docker/registry/v2/repositories/foo/_uploads/id/data")
        );
    }

    #[tokio::test]
    async fn test_open_truncates_or_appends() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let (mut file, path, offset) = area.open("/a/b/data", false).await.unwrap();
        assert_eq!(offset, 0);
        file.write_all(b"hello").await.unwrap();
        file.sync_all().await.unwrap();
        drop(file);

        let (_, _, offset) = area.open("/a/b/data", true).await.unwrap();
        assert_eq!(offset, 5);

        let (_, _, offset) = area.open("/a/b/data", false).await.unwrap();
        assert_eq!(offset, 0);
        assert_eq!(fs::metadata(&path).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_remove_staged_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        remove_staged(&dir.path().join("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_stream_reads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let content: Vec<u8> = (0..(2 * UPLOAD_CHUNK_SIZE + 3)).map(|i| i as u8).collect();
        fs::write(&path, &content).await.unwrap();

        let chunks: Vec<_> = file_stream(File::open(&path).await.unwrap())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), content);
    }
}

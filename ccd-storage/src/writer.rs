use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::digest::digest_reader;
use crate::driver::FileWriter;
use crate::error::{CommitStep, DriverError};
use crate::gateway::EntryGateway;
use crate::metrics::SharedMetrics;
use crate::staging::{file_stream, remove_staged};

/// FileWriter staging content on local disk and publishing it to the remote
/// entry store on commit.
///
/// The remote needs the digest and size of an entry before it accepts any
/// bytes, so content cannot be streamed straight through. Everything written
/// goes to a staging file first; [`commit`](FileWriter::commit) hashes the
/// staged file, creates or updates the entry and uploads the file.
pub struct BufferedCommitWriter {
    file: Option<BufWriter<File>>,
    staging_path: PathBuf,
    size: u64,

    closed: bool,
    committed: bool,
    cancelled: bool,

    gateway: EntryGateway,
    bucket: String,
    path: String,
    metrics: SharedMetrics,
}

impl BufferedCommitWriter {
    /// Creates a writer around an opened staging file
    ///
    /// # Arguments
    /// * `file` - staging file, positioned where new bytes go
    /// * `staging_path` - location of the staging file
    /// * `size` - bytes already present in the staging file
    /// * `gateway` - gateway used on commit
    /// * `bucket` - bucket of the entry
    /// * `path` - storage path of the entry
    pub fn new(
        file: File,
        staging_path: PathBuf,
        size: u64,
        gateway: EntryGateway,
        bucket: String,
        path: String,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            file: Some(BufWriter::new(file)),
            staging_path,
            size,
            closed: false,
            committed: false,
            cancelled: false,
            gateway,
            bucket,
            path,
            metrics,
        }
    }

    /// Location of the staging file
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.committed {
            Err(DriverError::AlreadyCommitted)
        } else if self.cancelled {
            Err(DriverError::AlreadyCancelled)
        } else if self.closed {
            Err(DriverError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn file_mut(&mut self) -> Result<&mut BufWriter<File>, DriverError> {
        self.file.as_mut().ok_or(DriverError::AlreadyClosed)
    }

    /// Flushes buffered bytes and forces the staging file to disk
    async fn sync(&mut self) -> Result<(), DriverError> {
        let file = self.file_mut()?;
        file.flush().await?;
        file.get_mut().sync_all().await?;
        Ok(())
    }

    /// Hashes the staged file from its start
    async fn digest(&mut self) -> Result<(String, u64), DriverError> {
        let file = self.file_mut()?.get_mut();
        file.seek(SeekFrom::Start(0)).await?;
        Ok(digest_reader(file).await?)
    }

    async fn publish(&mut self) -> Result<(), DriverError> {
        self.sync()
            .await
            .map_err(DriverError::commit(CommitStep::Flush))?;

        let (digest, size) = self
            .digest()
            .await
            .map_err(DriverError::commit(CommitStep::Digest))?;

        let entry_id = self
            .gateway
            .create_or_update_entry(&self.bucket, &self.path, &digest, size)
            .await
            .map_err(DriverError::commit(CommitStep::Entry))?;

        let mut upload = File::open(&self.staging_path)
            .await
            .map_err(|e| DriverError::commit(CommitStep::Upload)(e.into()))?;
        upload
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| DriverError::commit(CommitStep::Upload)(e.into()))?;

        self.gateway
            .upload_content(
                &self.bucket,
                &entry_id,
                &digest,
                size,
                file_stream(upload),
            )
            .await
            .map_err(DriverError::commit(CommitStep::Upload))?;

        info!(bucket = %self.bucket, path = %self.path, entry_id = %entry_id, size, "Committed entry");
        Ok(())
    }
}

#[async_trait::async_trait]
impl FileWriter for BufferedCommitWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, DriverError> {
        self.ensure_open()?;
        self.file_mut()?.write_all(buf).await?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::AlreadyClosed);
        }

        self.sync().await?;
        self.file = None;
        self.closed = true;
        debug!(path = %self.path, size = self.size, "Closed writer");
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;

        self.cancelled = true;
        self.closed = true;
        self.file = None;
        debug!(path = %self.path, "Cancelled writer");

        remove_staged(&self.staging_path).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;

        if let Err(err) = self.publish().await {
            warn!(
                bucket = %self.bucket,
                path = %self.path,
                staging_path = %self.staging_path.display(),
                error = %err,
                "Commit failed, keeping staging file"
            );
            self.metrics.commit_failed();
            return Err(err);
        }

        self.committed = true;
        self.closed = true;
        self.file = None;
        self.metrics.commit_succeeded();

        remove_staged(&self.staging_path)
            .await
            .map_err(|e| DriverError::commit(CommitStep::Cleanup)(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::gateway::memory::MemoryEntryClient;
    use crate::staging::StagingArea;

    struct Fixture {
        _dir: tempfile::TempDir,
        area: StagingArea,
        client: Arc<MemoryEntryClient>,
        gateway: EntryGateway,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let client = Arc::new(MemoryEntryClient::new());
        let gateway = EntryGateway::new(client.clone(), 10, SharedMetrics::default());
        Fixture {
            _dir: dir,
            area,
            client,
            gateway,
        }
    }

    async fn open(fx: &Fixture, path: &str, append: bool) -> BufferedCommitWriter {
        let (file, staging_path, size) = fx.area.open(path, append).await.unwrap();
        BufferedCommitWriter::new(
            file,
            staging_path,
            size,
            fx.gateway.clone(),
            "bucket".to_string(),
            path.to_string(),
            SharedMetrics::default(),
        )
    }

    #[tokio::test]
    async fn test_commit_publishes_content() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;

        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(writer.size(), 11);

        writer.commit().await.unwrap();
        assert!(writer.is_committed());
        assert!(!writer.staging_path().exists());

        assert_eq!(&fx.client.content("bucket", "a/data").unwrap()[..], b"hello world");
        let entry = fx.client.entry("bucket", "a/data").unwrap();
        assert_eq!(
            entry.content_hash.as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        assert_eq!(entry.content_size, Some(11));
    }

    #[tokio::test]
    async fn test_terminal_states_are_exclusive() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;
        writer.write(b"x").await.unwrap();
        writer.commit().await.unwrap();

        let mutations = fx.client.mutation_count();
        assert!(matches!(writer.write(b"y").await, Err(DriverError::AlreadyCommitted)));
        assert!(matches!(writer.commit().await, Err(DriverError::AlreadyCommitted)));
        assert!(matches!(writer.cancel().await, Err(DriverError::AlreadyCommitted)));
        assert_eq!(fx.client.mutation_count(), mutations);

        let mut writer = open(&fx, "/b/data", false).await;
        writer.write(b"x").await.unwrap();
        writer.cancel().await.unwrap();
        assert!(writer.is_cancelled());

        assert!(matches!(writer.write(b"y").await, Err(DriverError::AlreadyCancelled)));
        assert!(matches!(writer.commit().await, Err(DriverError::AlreadyCancelled)));
        assert!(matches!(writer.cancel().await, Err(DriverError::AlreadyCancelled)));
        assert!(fx.client.entry("bucket", "b/data").is_none());
    }

    #[tokio::test]
    async fn test_cancel_removes_staging_file() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;
        writer.write(b"abc").await.unwrap();
        let staging = writer.staging_path().to_path_buf();
        assert!(staging.exists());

        writer.cancel().await.unwrap();
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_cancel_tolerates_missing_staging_file() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;
        tokio::fs::remove_file(writer.staging_path()).await.unwrap();

        writer.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_a_local_barrier() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;
        writer.write(b"abc").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(tokio::fs::read(writer.staging_path()).await.unwrap(), b"abc");
        assert_eq!(fx.client.mutation_count(), 0);
        assert!(matches!(writer.close().await, Err(DriverError::AlreadyClosed)));
        assert!(matches!(writer.write(b"d").await, Err(DriverError::AlreadyClosed)));
        assert!(matches!(writer.commit().await, Err(DriverError::AlreadyClosed)));
        assert!(matches!(writer.cancel().await, Err(DriverError::AlreadyClosed)));
        assert_eq!(writer.size(), 3);
    }

    #[tokio::test]
    async fn test_append_after_close() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;
        writer.write(b"first ").await.unwrap();
        writer.close().await.unwrap();

        let mut writer = open(&fx, "/a/data", true).await;
        assert_eq!(writer.size(), 6);
        writer.write(b"second").await.unwrap();
        assert_eq!(writer.size(), 12);
        writer.commit().await.unwrap();

        assert_eq!(
            &fx.client.content("bucket", "a/data").unwrap()[..],
            b"first second"
        );
    }

    #[tokio::test]
    async fn test_upload_hash_mismatch_keeps_writer_open() {
        let fx = fixture();
        let mut writer = open(&fx, "/a/data", false).await;
        writer.write(b"abc").await.unwrap();

        fx.client.corrupt_upload_hash(true);
        let err = writer.commit().await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Commit {
                step: CommitStep::Upload,
                ..
            }
        ));
        assert!(matches!(err.root(), DriverError::IntegrityMismatch { .. }));
        assert!(!writer.is_committed());
        assert!(writer.staging_path().exists());

        fx.client.corrupt_upload_hash(false);
        writer.commit().await.unwrap();
        assert!(writer.is_committed());
        assert_eq!(&fx.client.content("bucket", "a/data").unwrap()[..], b"abc");
    }
}

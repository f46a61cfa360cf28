//! Remote entry gateway.
//!
//! [`EntryClient`] is the minimal transport capability the driver needs from
//! the remote entry store. [`EntryGateway`] wraps a client and turns its
//! replies into [`DriverError`]s; it is the only place talking to the network.

pub mod http;
pub mod memory;

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bucket::{is_under, remote_path};
use crate::driver::ByteStream;
use crate::error::{DriverError, TransportError};
use crate::metrics::SharedMetrics;

/// Content type of entries created and uploaded by the driver
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Response header carrying the digest of uploaded content
pub const UPLOAD_HASH_HEADER: &str = "Upload-Hash";

/// Remote record for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "entryid", default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Body of a create-or-update entry request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub content_hash: String,
    pub content_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Parameters of a diff-entries page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntriesQuery {
    pub path: String,
    pub page: u32,
    pub per_page: u32,
}

/// Outcome of an upload as reported by the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Value of the `Upload-Hash` response header
    pub upload_hash: Option<String>,
}

/// Error body returned by the remote alongside 4xx and 5xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Typed reply of a remote call
pub enum Reply<T> {
    Ok(T),
    NoContent,
    NotFound(String),
    ServerError { status: u16, reason: String },
    Unexpected(u16),
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Ok(_) => write!(f, "Ok"),
            Reply::NoContent => write!(f, "NoContent"),
            Reply::NotFound(reason) => write!(f, "NotFound({:?})", reason),
            Reply::ServerError { status, reason } => {
                write!(f, "ServerError({}, {:?})", status, reason)
            }
            Reply::Unexpected(status) => write!(f, "Unexpected({})", status),
        }
    }
}

/// Transport capability for the remote entry store.
#[async_trait::async_trait]
pub trait EntryClient: Send + Sync {
    async fn get_entry_by_path(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<Reply<Entry>, TransportError>;

    async fn create_or_update_entry_by_path(
        &self,
        bucket: &str,
        path: &str,
        update_if_exists: bool,
        request: &EntryRequest,
    ) -> Result<Reply<Entry>, TransportError>;

    async fn upload_content(
        &self,
        bucket: &str,
        entry_id: &str,
        content_length: u64,
        body: ByteStream,
    ) -> Result<Reply<UploadReceipt>, TransportError>;

    /// Fetches entry content, from `offset` onward when given.
    async fn get_content(
        &self,
        bucket: &str,
        entry_id: &str,
        offset: Option<u64>,
    ) -> Result<Reply<ByteStream>, TransportError>;

    async fn delete_entry(&self, bucket: &str, entry_id: &str)
        -> Result<Reply<()>, TransportError>;

    async fn get_diff_entries(
        &self,
        bucket: &str,
        query: &DiffEntriesQuery,
    ) -> Result<Reply<Vec<Entry>>, TransportError>;
}

/// Facade over an [`EntryClient`] normalizing replies into driver errors
#[derive(Clone)]
pub struct EntryGateway {
    client: Arc<dyn EntryClient>,
    page_size: u32,
    metrics: SharedMetrics,
}

impl EntryGateway {
    pub fn new(client: Arc<dyn EntryClient>, page_size: u32, metrics: SharedMetrics) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
            metrics,
        }
    }

    /// Replaces the metrics collector
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Looks up the entry stored at `path`
    pub async fn get_entry_by_path(&self, bucket: &str, path: &str) -> Result<Entry, DriverError> {
        debug!(bucket, path, "Looking up entry");
        let reply = self
            .client
            .get_entry_by_path(bucket, remote_path(path))
            .await
            .map_err(DriverError::Transport)?;

        match reply {
            Reply::Ok(entry) => Ok(entry),
            Reply::NotFound(_) => {
                warn!(bucket, path, "no entry found");
                Err(DriverError::NotFound {
                    path: path.to_string(),
                })
            }
            other => Err(self.unexpected(other, || {
                format!(
                    "failed to determine entry for bucket: {:?} path: {:?}",
                    bucket, path
                )
            })),
        }
    }

    /// Looks up the entry at `path` and returns its identifier
    pub async fn entry_id_by_path(&self, bucket: &str, path: &str) -> Result<String, DriverError> {
        let entry = self.get_entry_by_path(bucket, path).await?;
        entry_id(entry)
    }

    /// Creates the entry at `path`, or updates it when it exists, returning its identifier
    pub async fn create_or_update_entry(
        &self,
        bucket: &str,
        path: &str,
        digest: &str,
        size: u64,
    ) -> Result<String, DriverError> {
        debug!(bucket, path, digest, size, "Creating or updating entry");
        let request = EntryRequest {
            content_hash: digest.to_string(),
            content_size: size,
            content_type: Some(CONTENT_TYPE_OCTET_STREAM.to_string()),
        };

        let reply = self
            .client
            .create_or_update_entry_by_path(bucket, remote_path(path), true, &request)
            .await
            .map_err(DriverError::Transport)?;

        match reply {
            Reply::Ok(entry) => entry_id(entry),
            other => Err(self.unexpected(other, || "empty response from CCD".to_string())),
        }
    }

    /// Uploads `body` to an entry and checks the digest echoed by the remote
    pub async fn upload_content(
        &self,
        bucket: &str,
        entry_id: &str,
        digest: &str,
        size: u64,
        body: ByteStream,
    ) -> Result<(), DriverError> {
        debug!(bucket, entry_id, size, "Uploading content");
        let reply = self
            .client
            .upload_content(bucket, entry_id, size, body)
            .await
            .map_err(DriverError::Transport)?;

        let receipt = match reply {
            Reply::Ok(receipt) => receipt,
            other => {
                return Err(self.unexpected(other, || {
                    format!("failed to upload content for entry: {:?}", entry_id)
                }))
            }
        };

        let upload_hash = receipt.upload_hash.unwrap_or_default();
        if upload_hash != digest {
            warn!(bucket, entry_id, expected = digest, actual = %upload_hash, "Upload hash mismatch");
            return Err(DriverError::IntegrityMismatch {
                expected: digest.to_string(),
                actual: upload_hash,
            });
        }

        self.metrics.bytes_uploaded(size);
        Ok(())
    }

    /// Fetches the full content of an entry
    pub async fn get_content(
        &self,
        bucket: &str,
        entry_id: &str,
        path: &str,
    ) -> Result<Bytes, DriverError> {
        let stream = self.open_content(bucket, entry_id, path, 0).await?;
        let content = stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(Bytes::from(content))
    }

    /// Opens a stream over the content of an entry, starting at `offset`
    pub async fn open_content(
        &self,
        bucket: &str,
        entry_id: &str,
        path: &str,
        offset: u64,
    ) -> Result<ByteStream, DriverError> {
        debug!(bucket, entry_id, offset, "Fetching content");
        let range = if offset > 0 { Some(offset) } else { None };
        let reply = self
            .client
            .get_content(bucket, entry_id, range)
            .await
            .map_err(DriverError::Transport)?;

        match reply {
            Reply::Ok(stream) => {
                let metrics = self.metrics.clone();
                Ok(stream
                    .inspect_ok(move |chunk| metrics.bytes_downloaded(chunk.len()))
                    .boxed())
            }
            Reply::NotFound(_) => Err(DriverError::NotFound {
                path: path.to_string(),
            }),
            Reply::Unexpected(416) => Err(DriverError::InvalidOffset {
                path: path.to_string(),
                offset,
            }),
            other => Err(self.unexpected(other, || {
                format!("failed to fetch content for entry: {:?}", entry_id)
            })),
        }
    }

    /// Deletes an entry. Only an explicit "no content" reply counts as success.
    pub async fn delete_entry(&self, bucket: &str, entry_id: &str) -> Result<(), DriverError> {
        debug!(bucket, entry_id, "Deleting entry");
        let reply = self
            .client
            .delete_entry(bucket, entry_id)
            .await
            .map_err(DriverError::Transport)?;

        match reply {
            Reply::NoContent => {
                self.metrics.entries_deleted(1);
                Ok(())
            }
            Reply::ServerError { status, reason } => {
                self.metrics.remote_error();
                Err(DriverError::RemoteError { status, reason })
            }
            Reply::Ok(()) => Err(self.unexpected_status(200)),
            Reply::NotFound(_) => Err(self.unexpected_status(404)),
            Reply::Unexpected(status) => Err(self.unexpected_status(status)),
        }
    }

    /// Lists every entry under `path`, walking the diff-entries pages in order
    /// until an empty page comes back.
    pub async fn list_entries(&self, bucket: &str, path: &str) -> Result<Vec<Entry>, DriverError> {
        let prefix = remote_path(path);
        let mut entries = Vec::new();
        let mut page = 1;

        loop {
            let query = DiffEntriesQuery {
                path: prefix.to_string(),
                page,
                per_page: self.page_size,
            };
            debug!(bucket, path = prefix, page, per_page = self.page_size, "Listing entries");

            let reply = self
                .client
                .get_diff_entries(bucket, &query)
                .await
                .map_err(DriverError::Transport)?;

            let batch = match reply {
                Reply::Ok(batch) => batch,
                Reply::NoContent => break,
                Reply::NotFound(_) => {
                    return Err(DriverError::NotFound {
                        path: path.to_string(),
                    })
                }
                other => {
                    return Err(self.unexpected(other, || {
                        format!("failed to list entries for path: {:?}", prefix)
                    }))
                }
            };

            if batch.is_empty() {
                break;
            }

            entries.extend(batch.into_iter().filter(|e| {
                e.path
                    .as_deref()
                    .map(|p| is_under(prefix, remote_path(p)))
                    .unwrap_or(false)
            }));
            page += 1;
        }

        Ok(entries)
    }

    fn unexpected<T>(&self, reply: Reply<T>, describe: impl FnOnce() -> String) -> DriverError {
        match reply {
            Reply::ServerError { status, reason } => {
                self.metrics.remote_error();
                DriverError::RemoteError { status, reason }
            }
            Reply::NotFound(reason) => DriverError::RemoteError {
                status: 404,
                reason,
            },
            Reply::Unexpected(status) => DriverError::RemoteError {
                status,
                reason: describe(),
            },
            Reply::Ok(_) | Reply::NoContent => DriverError::RemoteError {
                status: 200,
                reason: describe(),
            },
        }
    }

    fn unexpected_status(&self, status: u16) -> DriverError {
        DriverError::RemoteError {
            status,
            reason: format!("unexpected response: {}", status),
        }
    }
}

pub(crate) fn entry_id(entry: Entry) -> Result<String, DriverError> {
    entry
        .entry_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DriverError::RemoteError {
            status: 200,
            reason: "failed to determine entry ID".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryEntryClient;
    use super::*;
    use crate::digest::content_digest;

    fn gateway(client: &Arc<MemoryEntryClient>, page_size: u32) -> EntryGateway {
        EntryGateway::new(client.clone(), page_size, SharedMetrics::default())
    }

    fn body(content: &'static [u8]) -> ByteStream {
        futures::stream::once(async move { Ok(Bytes::from_static(content)) }).boxed()
    }

    #[test]
    fn test_entry_json() {
        let entry: Entry = serde_json::from_str(
            r#"{
                "entryid": "7f1c",
                "path": "a/b",
                "content_hash": "5eb63bbbe01eeed093cb22bb8f5acdc3",
                "content_size": 11,
                "content_type": "application/offset+octet-stream",
                "last_modified": "2024-05-01T10:00:00Z",
                "labels": []
            }"#,
        )
        .unwrap();

        assert_eq!(entry.entry_id.as_deref(), Some("7f1c"));
        assert_eq!(entry.path.as_deref(), Some("a/b"));
        assert_eq!(entry.content_size, Some(11));
        assert!(entry.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_upload_and_fetch() {
        let client = Arc::new(MemoryEntryClient::new());
        let gateway = gateway(&client, 10);
        let digest = content_digest(b"hello world");

        let id = gateway
            .create_or_update_entry("bucket", "/a/b", &digest, 11)
            .await
            .unwrap();
        gateway
            .upload_content("bucket", &id, &digest, 11, body(b"hello world"))
            .await
            .unwrap();

        assert_eq!(gateway.entry_id_by_path("bucket", "/a/b").await.unwrap(), id);
        let content = gateway.get_content("bucket", &id, "/a/b").await.unwrap();
        assert_eq!(&content[..], b"hello world");
    }

    #[tokio::test]
    async fn test_upload_hash_mismatch() {
        let client = Arc::new(MemoryEntryClient::new());
        let gateway = gateway(&client, 10);
        let digest = content_digest(b"hello world");
        let id = gateway
            .create_or_update_entry("bucket", "/a/b", &digest, 11)
            .await
            .unwrap();

        client.corrupt_upload_hash(true);
        let err = gateway
            .upload_content("bucket", &id, &digest, 11, body(b"hello world"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::IntegrityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let client = Arc::new(MemoryEntryClient::new());
        let err = gateway(&client, 10)
            .get_entry_by_path("bucket", "/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound { path } if path == "/missing"));
    }

    #[tokio::test]
    async fn test_list_entries_collects_every_page() {
        let client = Arc::new(MemoryEntryClient::new());
        for i in 0..7 {
            client.insert("bucket", &format!("dir/file{}", i), b"x");
        }
        client.insert("bucket", "dirt/other", b"x");

        for page_size in [1, 2, 3, 7, 100] {
            let entries = gateway(&client, page_size)
                .list_entries("bucket", "/dir")
                .await
                .unwrap();
            assert_eq!(entries.len(), 7, "page size {}", page_size);
        }
    }

    #[tokio::test]
    async fn test_list_entries_server_error() {
        let client = Arc::new(MemoryEntryClient::new());
        client.insert("bucket", "dir/file", b"x");
        client.fail_listing("boom");

        let err = gateway(&client, 1)
            .list_entries("bucket", "/dir")
            .await
            .unwrap_err();
        assert!(
            matches!(err, DriverError::RemoteError { status: 500, reason } if reason == "boom")
        );
    }

    #[tokio::test]
    async fn test_open_content_past_end() {
        let client = Arc::new(MemoryEntryClient::new());
        let id = client.insert("bucket", "a", b"abc");

        let err = gateway(&client, 1)
            .open_content("bucket", &id, "/a", 10)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::InvalidOffset { offset: 10, .. }));
    }
}

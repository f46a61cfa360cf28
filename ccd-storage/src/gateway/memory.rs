use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use super::{DiffEntriesQuery, Entry, EntryClient, EntryRequest, Reply, UploadReceipt};
use crate::digest::content_digest;
use crate::driver::ByteStream;
use crate::error::TransportError;

/// Digest reported instead of the real one while upload corruption is enabled
const CORRUPTED_HASH: &str = "00000000000000000000000000000000";

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: Entry,
    content: Bytes,
}

#[derive(Debug, Default)]
struct Faults {
    corrupt_upload_hash: bool,
    failing_deletes: HashSet<String>,
    listing_error: Option<String>,
}

/// In-process entry store speaking the same protocol as the remote service.
///
/// Entries are kept per bucket, ordered by path. Failures can be injected to
/// exercise partial-failure behavior of the driver.
#[derive(Debug, Default)]
pub struct MemoryEntryClient {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredEntry>>>,
    faults: Mutex<Faults>,
    requests: AtomicUsize,
    mutations: AtomicUsize,
}

impl MemoryEntryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entry directly, bypassing the protocol. Returns the entry ID.
    pub fn insert(&self, bucket: &str, path: &str, content: &[u8]) -> String {
        let entry_id = uuid::Uuid::new_v4().to_string();
        let entry = Entry {
            entry_id: Some(entry_id.clone()),
            path: Some(path.to_string()),
            content_hash: Some(content_digest(content)),
            content_size: Some(content.len() as u64),
            content_type: None,
            last_modified: Some(Utc::now()),
        };

        let mut buckets = self.buckets.write().unwrap();
        buckets.entry(bucket.to_string()).or_default().insert(
            path.to_string(),
            StoredEntry {
                entry,
                content: Bytes::copy_from_slice(content),
            },
        );
        entry_id
    }

    /// Stores an entry record as given, without content.
    ///
    /// Lets tests model replies with missing fields.
    pub fn insert_entry(&self, bucket: &str, entry: Entry) {
        let path = entry.path.clone().unwrap_or_default();
        let mut buckets = self.buckets.write().unwrap();
        buckets.entry(bucket.to_string()).or_default().insert(
            path,
            StoredEntry {
                entry,
                content: Bytes::new(),
            },
        );
    }

    /// Content stored at a remote path
    pub fn content(&self, bucket: &str, path: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().unwrap();
        buckets
            .get(bucket)
            .and_then(|entries| entries.get(path))
            .map(|stored| stored.content.clone())
    }

    /// Entry stored at a remote path
    pub fn entry(&self, bucket: &str, path: &str) -> Option<Entry> {
        let buckets = self.buckets.read().unwrap();
        buckets
            .get(bucket)
            .and_then(|entries| entries.get(path))
            .map(|stored| stored.entry.clone())
    }

    /// Number of entries in a bucket
    pub fn entry_count(&self, bucket: &str) -> usize {
        let buckets = self.buckets.read().unwrap();
        buckets.get(bucket).map(|entries| entries.len()).unwrap_or(0)
    }

    /// Reports a wrong `Upload-Hash` for every upload while enabled
    pub fn corrupt_upload_hash(&self, enabled: bool) {
        self.faults.lock().unwrap().corrupt_upload_hash = enabled;
    }

    /// Makes deletion of the entry at the given remote path fail with a server error
    pub fn fail_delete(&self, path: &str) {
        self.faults
            .lock()
            .unwrap()
            .failing_deletes
            .insert(path.to_string());
    }

    /// Makes every diff-entries query fail with a server error
    pub fn fail_listing(&self, reason: &str) {
        self.faults.lock().unwrap().listing_error = Some(reason.to_string());
    }

    /// Number of protocol requests served
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of requests that create, update, upload or delete
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn record(&self, mutation: bool) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if mutation {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn find_by_id<'a>(
        entries: &'a mut BTreeMap<String, StoredEntry>,
        entry_id: &str,
    ) -> Option<&'a mut StoredEntry> {
        entries
            .values_mut()
            .find(|stored| stored.entry.entry_id.as_deref() == Some(entry_id))
    }
}

#[async_trait::async_trait]
impl EntryClient for MemoryEntryClient {
    async fn get_entry_by_path(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<Reply<Entry>, TransportError> {
        self.record(false);
        Ok(match self.entry(bucket, path) {
            Some(entry) => Reply::Ok(entry),
            None => Reply::NotFound("entry not found".to_string()),
        })
    }

    async fn create_or_update_entry_by_path(
        &self,
        bucket: &str,
        path: &str,
        update_if_exists: bool,
        request: &EntryRequest,
    ) -> Result<Reply<Entry>, TransportError> {
        self.record(true);
        let mut buckets = self.buckets.write().unwrap();
        let entries = buckets.entry(bucket.to_string()).or_default();

        if let Some(stored) = entries.get_mut(path) {
            if !update_if_exists {
                return Ok(Reply::Unexpected(409));
            }
            stored.entry.content_hash = Some(request.content_hash.clone());
            stored.entry.content_size = Some(request.content_size);
            stored.entry.content_type = request.content_type.clone();
            stored.entry.last_modified = Some(Utc::now());
            return Ok(Reply::Ok(stored.entry.clone()));
        }

        let entry = Entry {
            entry_id: Some(uuid::Uuid::new_v4().to_string()),
            path: Some(path.to_string()),
            content_hash: Some(request.content_hash.clone()),
            content_size: Some(request.content_size),
            content_type: request.content_type.clone(),
            last_modified: Some(Utc::now()),
        };
        debug!(bucket, path, "Created in-memory entry");
        entries.insert(
            path.to_string(),
            StoredEntry {
                entry: entry.clone(),
                content: Bytes::new(),
            },
        );
        Ok(Reply::Ok(entry))
    }

    async fn upload_content(
        &self,
        bucket: &str,
        entry_id: &str,
        _content_length: u64,
        body: ByteStream,
    ) -> Result<Reply<UploadReceipt>, TransportError> {
        self.record(true);
        let chunks: Vec<Bytes> = body.try_collect().await?;
        let content = Bytes::from(chunks.concat());

        let upload_hash = if self.faults.lock().unwrap().corrupt_upload_hash {
            CORRUPTED_HASH.to_string()
        } else {
            content_digest(&content)
        };

        let mut buckets = self.buckets.write().unwrap();
        let stored = match buckets
            .get_mut(bucket)
            .and_then(|entries| Self::find_by_id(entries, entry_id))
        {
            Some(stored) => stored,
            None => return Ok(Reply::NotFound("entry not found".to_string())),
        };
        stored.content = content;

        Ok(Reply::Ok(UploadReceipt {
            upload_hash: Some(upload_hash),
        }))
    }

    async fn get_content(
        &self,
        bucket: &str,
        entry_id: &str,
        offset: Option<u64>,
    ) -> Result<Reply<ByteStream>, TransportError> {
        self.record(false);
        let mut buckets = self.buckets.write().unwrap();
        let content = match buckets
            .get_mut(bucket)
            .and_then(|entries| Self::find_by_id(entries, entry_id))
        {
            Some(stored) => stored.content.clone(),
            None => return Ok(Reply::NotFound("entry not found".to_string())),
        };

        let offset = offset.unwrap_or(0) as usize;
        if offset > content.len() {
            return Ok(Reply::Unexpected(416));
        }

        let content = content.slice(offset..);
        Ok(Reply::Ok(
            futures::stream::once(async move { Ok(content) }).boxed(),
        ))
    }

    async fn delete_entry(
        &self,
        bucket: &str,
        entry_id: &str,
    ) -> Result<Reply<()>, TransportError> {
        self.record(true);
        let failing = self.faults.lock().unwrap().failing_deletes.clone();

        let mut buckets = self.buckets.write().unwrap();
        let entries = match buckets.get_mut(bucket) {
            Some(entries) => entries,
            None => return Ok(Reply::NotFound("bucket not found".to_string())),
        };

        let path = entries
            .iter()
            .find(|(_, stored)| stored.entry.entry_id.as_deref() == Some(entry_id))
            .map(|(path, _)| path.clone());

        match path {
            Some(path) if failing.contains(&path) => Ok(Reply::ServerError {
                status: 500,
                reason: "injected failure".to_string(),
            }),
            Some(path) => {
                entries.remove(&path);
                Ok(Reply::NoContent)
            }
            None => Ok(Reply::NotFound("entry not found".to_string())),
        }
    }

    async fn get_diff_entries(
        &self,
        bucket: &str,
        query: &DiffEntriesQuery,
    ) -> Result<Reply<Vec<Entry>>, TransportError> {
        self.record(false);
        let listing_error = self.faults.lock().unwrap().listing_error.clone();
        if let Some(reason) = listing_error {
            return Ok(Reply::ServerError {
                status: 500,
                reason,
            });
        }

        let buckets = self.buckets.read().unwrap();
        let entries = match buckets.get(bucket) {
            Some(entries) => entries,
            None => return Ok(Reply::NotFound("bucket not found".to_string())),
        };

        let skip = (query.page.saturating_sub(1) as usize) * query.per_page as usize;
        let page = entries
            .iter()
            .filter(|(path, _)| path.starts_with(&query.path))
            .skip(skip)
            .take(query.per_page as usize)
            .map(|(_, stored)| stored.entry.clone())
            .collect();

        Ok(Reply::Ok(page))
    }
}

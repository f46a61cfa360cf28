//! Storage driver backed by Unity Cloud Content Delivery.
//!
//! Content is addressed by entry ID on the remote side, so most operations
//! first resolve the entry for a path and then act on its identifier.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::bucket::{local_path, resolve_bucket};
use crate::config::{DriverConfig, DriverParameters};
use crate::digest::content_digest;
use crate::driver::{ByteStream, FileInfo, FileWriter, RequestContext, StorageDriver, WalkFn};
use crate::error::DriverError;
use crate::gateway::http::HttpEntryClient;
use crate::gateway::{self, EntryClient, EntryGateway};
use crate::metrics::SharedMetrics;
use crate::staging::StagingArea;
use crate::writer::BufferedCommitWriter;

/// Registration name of the driver
pub const DRIVER_NAME: &str = "ccd";

/// StorageDriver backed by the remote entry store
#[derive(Clone)]
pub struct CcdDriver {
    gateway: EntryGateway,
    staging: StagingArea,
    metrics: SharedMetrics,
}

impl CcdDriver {
    /// Creates a driver talking HTTPS to the configured environment
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        let client = HttpEntryClient::new(config.environment.base_url(), &config.api_key)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    /// Creates a driver on top of an arbitrary entry client
    pub fn with_client(config: DriverConfig, client: Arc<dyn EntryClient>) -> Self {
        let metrics = SharedMetrics::default();
        Self {
            gateway: EntryGateway::new(client, config.page_size, metrics.clone()),
            staging: StagingArea::new(config.root_directory),
            metrics,
        }
    }

    /// Parses generic parameters and creates the driver
    pub fn from_parameters(parameters: &DriverParameters) -> Result<Self, DriverError> {
        Self::new(DriverConfig::from_parameters(parameters)?)
    }

    /// Replaces the metrics collector
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.gateway = self.gateway.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    fn unsupported(method: &'static str) -> DriverError {
        DriverError::Unsupported {
            driver: DRIVER_NAME,
            method,
        }
    }
}

#[async_trait::async_trait]
impl StorageDriver for CcdDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    async fn get_content(&self, ctx: &RequestContext, path: &str) -> Result<Bytes, DriverError> {
        let bucket = resolve_bucket(ctx, path)?;
        let entry_id = self.gateway.entry_id_by_path(&bucket, path).await?;
        self.gateway.get_content(&bucket, &entry_id, path).await
    }

    async fn put_content(
        &self,
        ctx: &RequestContext,
        path: &str,
        content: &[u8],
    ) -> Result<(), DriverError> {
        let bucket = resolve_bucket(ctx, path)?;

        // The remote needs the hash of the content before we upload it.
        let digest = content_digest(content);
        let size = content.len() as u64;

        let entry_id = self
            .gateway
            .create_or_update_entry(&bucket, path, &digest, size)
            .await?;

        let body = Bytes::copy_from_slice(content);
        let body = futures::stream::once(async move { Ok(body) }).boxed();
        self.gateway
            .upload_content(&bucket, &entry_id, &digest, size, body)
            .await
    }

    async fn reader(
        &self,
        ctx: &RequestContext,
        path: &str,
        offset: u64,
    ) -> Result<ByteStream, DriverError> {
        let bucket = resolve_bucket(ctx, path)?;
        let entry_id = self.gateway.entry_id_by_path(&bucket, path).await?;
        self.gateway
            .open_content(&bucket, &entry_id, path, offset)
            .await
    }

    async fn writer(
        &self,
        ctx: &RequestContext,
        path: &str,
        append: bool,
    ) -> Result<Box<dyn FileWriter>, DriverError> {
        let bucket = resolve_bucket(ctx, path)?;
        let (file, staging_path, size) = self.staging.open(path, append).await?;

        Ok(Box::new(BufferedCommitWriter::new(
            file,
            staging_path,
            size,
            self.gateway.clone(),
            bucket,
            path.to_string(),
            self.metrics.clone(),
        )))
    }

    async fn stat(&self, ctx: &RequestContext, path: &str) -> Result<FileInfo, DriverError> {
        let bucket = resolve_bucket(ctx, path)?;
        let entry = self.gateway.get_entry_by_path(&bucket, path).await?;

        let size = entry.content_size.ok_or_else(|| DriverError::RemoteError {
            status: 200,
            reason: "failed to determine entry size".to_string(),
        })?;
        let mod_time = entry.last_modified.ok_or_else(|| DriverError::RemoteError {
            status: 200,
            reason: "failed to determine entry modification time".to_string(),
        })?;

        Ok(FileInfo {
            path: path.to_string(),
            size,
            mod_time,
            is_dir: false,
        })
    }

    async fn list(&self, ctx: &RequestContext, path: &str) -> Result<Vec<String>, DriverError> {
        let bucket = resolve_bucket(ctx, path)?;
        let entries = self.gateway.list_entries(&bucket, path).await?;

        Ok(entries
            .into_iter()
            .filter_map(|e| e.path)
            .map(|p| local_path(&p))
            .collect())
    }

    async fn move_object(
        &self,
        ctx: &RequestContext,
        source: &str,
        dest: &str,
    ) -> Result<(), DriverError> {
        // There is no remote copy or move, so download, upload and delete.
        let content = self.get_content(ctx, source).await?;
        self.put_content(ctx, dest, &content).await?;
        self.delete(ctx, source).await.map_err(|e| {
            warn!(source, dest, error = %e, "Move left source in place");
            e
        })
    }

    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<(), DriverError> {
        let bucket = resolve_bucket(ctx, path)?;

        let entries = match self.gateway.list_entries(&bucket, path).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => {
                debug!(bucket = %bucket, path, "Nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let total = entries.len();
        for (deleted, entry) in entries.into_iter().enumerate() {
            let entry_path = entry.path.clone().unwrap_or_default();
            let entry_id = match gateway::entry_id(entry) {
                Ok(id) => id,
                Err(e) => {
                    warn!(
                        bucket = %bucket,
                        path,
                        entry_path = %entry_path,
                        deleted,
                        "Listed entry has no ID, delete aborted"
                    );
                    return Err(e);
                }
            };
            if let Err(e) = self.gateway.delete_entry(&bucket, &entry_id).await {
                warn!(
                    bucket = %bucket,
                    path,
                    entry_id = %entry_id,
                    deleted,
                    remaining = total - deleted,
                    error = %e,
                    "Delete aborted"
                );
                return Err(e);
            }
        }

        Ok(())
    }

    async fn url_for(
        &self,
        _ctx: &RequestContext,
        _path: &str,
        _options: &DriverParameters,
    ) -> Result<String, DriverError> {
        // Signed CDN URLs need a bucket access token the driver does not hold.
        Err(Self::unsupported("url_for"))
    }

    async fn walk(
        &self,
        _ctx: &RequestContext,
        path: &str,
        _f: WalkFn<'_>,
    ) -> Result<(), DriverError> {
        warn!(path, "walk is not implemented");
        Err(Self::unsupported("walk"))
    }
}

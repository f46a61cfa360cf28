use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::config::DriverParameters;
use crate::error::DriverError;

/// Streaming source of object content
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Visitor invoked by [`StorageDriver::walk`] for every file found.
pub type WalkFn<'a> = &'a mut (dyn FnMut(&FileInfo) -> Result<(), DriverError> + Send);

/// Context variable holding the repository name of the current request
pub const NAME_VAR: &str = "vars.name";

/// Request scoped values supplied by the host
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a context variable
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Sets the repository name of the request
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with_value(NAME_VAR, name)
    }

    /// Gets a context variable, treating empty values as absent
    pub fn string_value(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Repository name of the request, if the host supplied one
    pub fn name(&self) -> Option<&str> {
        self.string_value(NAME_VAR)
    }
}

/// File metadata returned by [`StorageDriver::stat`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

/// StorageDriver is the object storage contract implemented by drivers.
///
/// Paths are absolute, `/` separated and case sensitive. Drivers must be safe
/// for concurrent use across distinct paths.
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    /// Registration name of the driver, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Retrieves the content stored at `path`.
    /// This should primarily be used for small objects.
    async fn get_content(&self, ctx: &RequestContext, path: &str) -> Result<Bytes, DriverError>;

    /// Stores `content` at `path`.
    /// This should primarily be used for small objects.
    async fn put_content(
        &self,
        ctx: &RequestContext,
        path: &str,
        content: &[u8],
    ) -> Result<(), DriverError>;

    /// Opens a stream over the content at `path`, starting at `offset`.
    async fn reader(
        &self,
        ctx: &RequestContext,
        path: &str,
        offset: u64,
    ) -> Result<ByteStream, DriverError>;

    /// Returns a writer which stores content at `path` once committed.
    async fn writer(
        &self,
        ctx: &RequestContext,
        path: &str,
        append: bool,
    ) -> Result<Box<dyn FileWriter>, DriverError>;

    /// Retrieves size and modification time of the object at `path`.
    async fn stat(&self, ctx: &RequestContext, path: &str) -> Result<FileInfo, DriverError>;

    /// Lists the objects stored under `path`.
    async fn list(&self, ctx: &RequestContext, path: &str) -> Result<Vec<String>, DriverError>;

    /// Moves the object at `source` to `dest`, removing the original.
    async fn move_object(
        &self,
        ctx: &RequestContext,
        source: &str,
        dest: &str,
    ) -> Result<(), DriverError>;

    /// Deletes every object stored at `path` and its subpaths.
    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<(), DriverError>;

    /// Returns a URL which may be used to retrieve the content at `path`.
    /// Drivers may answer with [`DriverError::Unsupported`].
    async fn url_for(
        &self,
        ctx: &RequestContext,
        path: &str,
        options: &DriverParameters,
    ) -> Result<String, DriverError>;

    /// Traverses the files under `path`, calling `f` for each one.
    async fn walk(
        &self,
        ctx: &RequestContext,
        path: &str,
        f: WalkFn<'_>,
    ) -> Result<(), DriverError>;
}

/// FileWriter accepts streamed bytes and makes them visible at its path on commit.
///
/// A writer must be driven by a single caller; it is not safe for concurrent use.
#[async_trait::async_trait]
pub trait FileWriter: Send {
    /// Appends `buf` to the pending content.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, DriverError>;

    /// Number of bytes written to this writer, including appended content.
    fn size(&self) -> u64;

    /// Flushes pending bytes to durable local storage and releases the writer.
    async fn close(&mut self) -> Result<(), DriverError>;

    /// Discards everything written to this writer.
    async fn cancel(&mut self) -> Result<(), DriverError>;

    /// Publishes the written content at the writer's path.
    async fn commit(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_name() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.name(), None);

        let ctx = ctx.with_name("");
        assert_eq!(ctx.name(), None);

        let ctx = ctx.with_name("library/ubuntu");
        assert_eq!(ctx.name(), Some("library/ubuntu"));
        assert_eq!(ctx.string_value(NAME_VAR), Some("library/ubuntu"));
    }
}

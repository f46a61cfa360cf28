//! # CCD Storage Driver
//!
//! A blob storage driver that exposes a remote, entry-addressed content
//! delivery service as a flat, path-addressed object store.
//!
//! ## Features
//!
//! - **Path addressing**: storage paths are mapped to remote entries, with the bucket derived
//!   from the request context or from the `repositories/<bucket>` path segment
//! - **Two-phase uploads**: the remote needs the MD5 digest and size before it accepts any
//!   bytes, so writers stage content on local disk and publish it on commit
//! - **Paginated listing**: prefix queries are resolved through the remote diff-entries search
//! - **Pluggable transport**: the adapter talks to an [`EntryClient`]; [`HttpEntryClient`] talks
//!   to the real service, [`MemoryEntryClient`] keeps everything in process
//!
//! ## Example
//!
//! ```no_run
//! use ccd_storage::{DriverParameters, DriverRegistry, RequestContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut params = DriverParameters::new();
//! params.insert("apikey".into(), "secret".into());
//! params.insert("environment".into(), "stage".into());
//!
//! let driver = DriverRegistry::default().create("ccd", &params)?;
//! let ctx = RequestContext::new().with_name("my-bucket");
//!
//! driver.put_content(&ctx, "/docker/registry/v2/repositories/my-bucket/tag", b"v1").await?;
//! let content = driver.get_content(&ctx, "/docker/registry/v2/repositories/my-bucket/tag").await?;
//! assert_eq!(&content[..], b"v1");
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod ccd;
pub mod config;
pub mod digest;
pub mod driver;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod metrics;
pub mod staging;
pub mod writer;

pub use ccd::CcdDriver;
pub use config::{DriverConfig, DriverParameters, Environment};
pub use driver::{ByteStream, FileInfo, FileWriter, RequestContext, StorageDriver, WalkFn};
pub use error::{CommitStep, DriverError};
pub use factory::{DriverConstructor, DriverRegistry};
pub use gateway::{
    http::HttpEntryClient, memory::MemoryEntryClient, Entry, EntryClient, EntryGateway, Reply,
};
pub use metrics::{MetricsCollector, NoOpMetrics, SharedMetrics};
pub use writer::BufferedCommitWriter;

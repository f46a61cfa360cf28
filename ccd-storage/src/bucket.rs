//! Mapping between storage paths, buckets and remote entry paths.
//!
//! Storage paths look like `/docker/registry/v2/repositories/<bucket>/...`.
//! Remote entry paths are the same paths without the leading separator.

use crate::driver::RequestContext;
use crate::error::DriverError;

/// Path segment after which the bucket name follows
const REPOSITORY_ROOT: &str = "repositories";

/// Derives the bucket from the segment following the repository root.
pub fn bucket_from_path(path: &str) -> Result<String, DriverError> {
    let mut segments = path.split('/').skip_while(|s| *s != REPOSITORY_ROOT);

    match (segments.next(), segments.next()) {
        (Some(_), Some(bucket)) if !bucket.is_empty() => Ok(bucket.to_string()),
        _ => Err(DriverError::InvalidPath(path.to_string())),
    }
}

/// Resolves the bucket for an operation on `path`.
///
/// The repository name carried by the request context takes precedence; the
/// path structure is used when the host did not supply one.
pub fn resolve_bucket(ctx: &RequestContext, path: &str) -> Result<String, DriverError> {
    match ctx.name() {
        Some(name) => Ok(name.to_string()),
        None => bucket_from_path(path),
    }
}

/// Remote entry paths never carry the leading separator.
pub fn remote_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Storage path for a remote entry path.
pub fn local_path(remote: &str) -> String {
    format!("/{}", remote_path(remote))
}

/// Whether `entry_path` equals `prefix` or lies below it.
///
/// Both arguments are remote paths. An empty prefix matches everything.
pub fn is_under(prefix: &str, entry_path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }

    match entry_path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

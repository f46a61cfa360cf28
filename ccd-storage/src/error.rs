use std::fmt;
use std::io;

/// Boxed error produced by the network transport.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Sub-step of a writer commit, used to annotate commit failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    /// Flushing buffered bytes and syncing the staging file
    Flush,
    /// Hashing the staged content
    Digest,
    /// Creating or updating the remote entry
    Entry,
    /// Uploading the staged content
    Upload,
    /// Removing the staging file after a successful upload
    Cleanup,
}

impl fmt::Display for CommitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            CommitStep::Flush => "sync file",
            CommitStep::Digest => "file hash",
            CommitStep::Entry => "create/update entry",
            CommitStep::Upload => "upload content",
            CommitStep::Cleanup => "remove staging file",
        };
        f.write_str(step)
    }
}

/// Errors returned by the storage driver
#[derive(Debug)]
pub enum DriverError {
    /// Missing or unknown driver parameter
    InvalidConfiguration(String),
    /// Path does not resolve to a bucket
    InvalidPath(String),
    /// No entry at the path, or nothing listed under it
    NotFound { path: String },
    /// Read offset lies past the end of the content
    InvalidOffset { path: String, offset: u64 },
    /// The remote reported a failure
    RemoteError { status: u16, reason: String },
    /// The digest echoed by the remote differs from the local one
    IntegrityMismatch { expected: String, actual: String },
    /// The operation is not offered by this driver
    Unsupported {
        driver: &'static str,
        method: &'static str,
    },
    AlreadyClosed,
    AlreadyCommitted,
    AlreadyCancelled,
    /// A commit failed in the given step
    Commit {
        step: CommitStep,
        source: Box<DriverError>,
    },
    Io(io::Error),
    Transport(TransportError),
}

impl DriverError {
    /// Returns the innermost error, looking through commit step annotations.
    pub fn root(&self) -> &DriverError {
        match self {
            DriverError::Commit { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error means that nothing exists at the requested path.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), DriverError::NotFound { .. })
    }

    pub(crate) fn commit(step: CommitStep) -> impl FnOnce(DriverError) -> DriverError {
        move |err| DriverError::Commit {
            step,
            source: Box::new(err),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::InvalidConfiguration(msg) => write!(f, "invalid configuration: {}", msg),
            DriverError::InvalidPath(path) => {
                write!(f, "could not parse bucket from path: {:?}", path)
            }
            DriverError::NotFound { path } => write!(f, "path not found: {}", path),
            DriverError::InvalidOffset { path, offset } => {
                write!(f, "invalid offset: {} for path: {}", offset, path)
            }
            DriverError::RemoteError { status, reason } => {
                write!(f, "unexpected error ({}): {:?}", status, reason)
            }
            DriverError::IntegrityMismatch { expected, actual } => write!(
                f,
                "upload hash mismatch: expected {:?} got: {:?}",
                expected, actual
            ),
            DriverError::Unsupported { driver, method } => {
                write!(f, "{}: unsupported method: {}", driver, method)
            }
            DriverError::AlreadyClosed => write!(f, "already closed"),
            DriverError::AlreadyCommitted => write!(f, "already committed"),
            DriverError::AlreadyCancelled => write!(f, "already cancelled"),
            DriverError::Commit { step, source } => write!(f, "{}: {}", step, source),
            DriverError::Io(e) => write!(f, "io error: {}", e),
            DriverError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Commit { source, .. } => Some(source.as_ref()),
            DriverError::Io(e) => Some(e),
            DriverError::Transport(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(e: io::Error) -> Self {
        DriverError::Io(e)
    }
}

use serde::Serialize;
use std::fmt;

use crate::domains::clone_driver::CloneError;
use crate::domains::url_normalizer::NormalizeError;

/// Single tagged error type returned by every public `RepoManager` operation.
///
/// Mirrors the taxonomy in spec §7: leaf components raise their own narrower
/// error enums (`NormalizeError`, `CloneError`) which convert into this one
/// at the point a result crosses into the public API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data")]
pub enum ManagerError {
    InvalidUrl { message: String },
    OptionLike { input: String },
    UnsupportedScheme { scheme: String },
    MissingHost,
    PrivateHost { host: String },
    MalformedUrl { message: String },
    CapacityExhausted { max_repos: usize },
    /// Carries `id` because the entry was already created before the queue
    /// rejected it (spec §4.4): the caller gets both the id and the error,
    /// and can `Status(id)` or retry with the same URL later.
    QueueFull { id: String },
    NotFound { id: String },
    NotReady { id: String },
    Failed { id: String, message: String },
    CloneFailed { message: String },
    FetchFailed { message: String },
    Timeout { elapsed_secs: u64 },
    Io { message: String },
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::InvalidUrl { message } => write!(f, "invalid URL: {message}"),
            ManagerError::OptionLike { input } => {
                write!(f, "URL looks like a command-line option: {input}")
            }
            ManagerError::UnsupportedScheme { scheme } => {
                write!(f, "unsupported URL scheme: {scheme}")
            }
            ManagerError::MissingHost => write!(f, "URL is missing a hostname"),
            ManagerError::PrivateHost { host } => {
                write!(f, "host resolves to a private or loopback address: {host}")
            }
            ManagerError::MalformedUrl { message } => write!(f, "malformed URL: {message}"),
            ManagerError::CapacityExhausted { max_repos } => {
                write!(f, "repository capacity exhausted (max_repos = {max_repos})")
            }
            ManagerError::QueueFull { id } => write!(f, "clone queue full (repository {id} recorded as error)"),
            ManagerError::NotFound { id } => write!(f, "repository not found: {id}"),
            ManagerError::NotReady { id } => write!(f, "repository not ready yet: {id}"),
            ManagerError::Failed { id, message } => {
                write!(f, "repository {id} failed to clone: {message}")
            }
            ManagerError::CloneFailed { message } => write!(f, "clone failed: {message}"),
            ManagerError::FetchFailed { message } => write!(f, "fetch failed: {message}"),
            ManagerError::Timeout { elapsed_secs } => {
                write!(f, "operation timed out after {elapsed_secs}s")
            }
            ManagerError::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

impl std::error::Error for ManagerError {}

impl From<NormalizeError> for ManagerError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Empty => ManagerError::InvalidUrl {
                message: "URL is empty".to_string(),
            },
            NormalizeError::OptionLike { input } => ManagerError::OptionLike { input },
            NormalizeError::UnsupportedScheme { scheme } => {
                ManagerError::UnsupportedScheme { scheme }
            }
            NormalizeError::MissingHost => ManagerError::MissingHost,
            NormalizeError::PrivateHost { host } => ManagerError::PrivateHost { host },
            NormalizeError::Malformed { message } => ManagerError::MalformedUrl { message },
        }
    }
}

impl From<CloneError> for ManagerError {
    fn from(err: CloneError) -> Self {
        match err {
            CloneError::Timeout { elapsed } => ManagerError::Timeout {
                elapsed_secs: elapsed.as_secs(),
            },
            CloneError::Cancelled => ManagerError::CloneFailed {
                message: "clone cancelled".to_string(),
            },
            CloneError::Failed { message } => ManagerError::CloneFailed { message },
            CloneError::Io { message } => ManagerError::Io { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_error_maps_to_tagged_variant() {
        let err: ManagerError = NormalizeError::PrivateHost {
            host: "127.0.0.1".to_string(),
        }
        .into();
        assert!(matches!(err, ManagerError::PrivateHost { .. }));
        assert!(err.to_string().contains("127.0.0.1"));
    }

    #[test]
    fn clone_error_maps_to_tagged_variant() {
        let err: ManagerError = CloneError::Timeout {
            elapsed: std::time::Duration::from_secs(5),
        }
        .into();
        assert!(matches!(err, ManagerError::Timeout { elapsed_secs: 5 }));
    }

    #[test]
    fn serializes_with_tag_and_content() {
        let err = ManagerError::NotFound {
            id: "abc123".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"NotFound\""));
        assert!(json.contains("abc123"));
    }
}

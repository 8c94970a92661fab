//! Common identifier types for data-tree translation.
//!
//! This crate provides the structural identifiers shared by every layer of
//! the translation stack:
//!
//! - [`SchemaPath`]: an ordered sequence of segments locating a node in the
//!   configuration or operational data tree
//! - [`PathSegment`]: one node name with an optional list key
//! - [`KeySelector`]: an exact list key or the `*` wildcard
//!
//! Paths have a textual form used in logs, configuration files and errors:
//!
//! ```
//! use fwd_types::SchemaPath;
//!
//! let path: SchemaPath = "/interfaces/interface[eth0]/ipv4/address[*]".parse().unwrap();
//! assert!(path.is_wildcarded());
//! assert_eq!(path.to_string(), "/interfaces/interface[eth0]/ipv4/address[*]");
//! ```

mod path;

pub use path::{KeySelector, PathSegment, SchemaPath};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid schema path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl ParseError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

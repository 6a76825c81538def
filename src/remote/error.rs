//! Errors raised by [`RemoteHost`](super::RemoteHost).

use thiserror::Error;

use crate::config::ConfigError;
use crate::snapshot::NameError;

/// Errors raised while talking to a replication target.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// An operation was attempted before [`dial`](super::RemoteHost::dial).
    #[error("remote: not connected")]
    NotConnected,
    /// `ssh` could not reach the host or lost the connection.
    #[error("remote: {operation}: {message}")]
    Transport {
        /// Operation being performed.
        operation: &'static str,
        /// Diagnostic reported by `ssh`.
        message: String,
    },
    /// The remote `zsm` exited unsuccessfully.
    #[error(
        "remote: zsm {subcommand}: exit code: {exit_code}{detail}",
        detail = if stderr.is_empty() { String::new() } else { format!(": {stderr}") }
    )]
    Exit {
        /// Remote subcommand that failed.
        subcommand: String,
        /// Exit code reported by the remote process.
        exit_code: i32,
        /// Standard error captured from the remote process.
        stderr: String,
    },
    /// A listing record could not be decoded.
    #[error("remote: decode {record:?}: {source}")]
    Decode {
        /// Offending record.
        record: String,
        /// Underlying decoding failure.
        #[source]
        source: NameError,
    },
    /// The connection settings are invalid.
    #[error("remote: {0}")]
    Config(#[from] ConfigError),
}

//! Gouge errors.

use std::time::Duration;
use thiserror::Error;

/// How the retry layer treats an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request may be resubmitted as is.
    Transient,
    /// Every known node of the endpoint failed.
    AllTargetsUnreachable,
    /// The error ends the request's retry chain.
    Fatal,
}

/// Errors encountered in the driver layer.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The request did not complete within its deadline.
    #[error("request to {node} timed out: {message}")]
    Timeout {
        /// Contact point the request was sent to.
        node: String,
        /// Status message reported by the transport.
        message: String,
    },
    /// The connection was closed while the request was in flight.
    #[error("connection to {node} closed mid-flight: {message}")]
    ConnectionClosed {
        /// Contact point the request was sent to.
        node: String,
        /// Status message reported by the transport.
        message: String,
    },
    /// No node of the endpoint could be reached.
    #[error("all targets of '{endpoint}' unreachable: {message}")]
    AllTargetsUnreachable {
        /// Name of the endpoint.
        endpoint: String,
        /// Last error observed.
        message: String,
    },
    /// Neither the primary nor the fallback endpoint produced a session.
    #[error("no session available (primary: {primary}; fallback: {fallback})")]
    NoSessionAvailable {
        /// Why the primary endpoint failed.
        primary: String,
        /// Why the fallback endpoint failed, or why it was not attempted.
        fallback: String,
    },
    /// The node rejected the request.
    #[error("{node} rejected request: {message}")]
    Server {
        /// Contact point that answered.
        node: String,
        /// Status message reported by the node.
        message: String,
    },
    /// Retry budget ran out on a transient error.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last: Box<DriverError>,
    },
    /// Establishing a connection took longer than allowed.
    #[error("connecting to '{endpoint}' timed out after {timeout:?}")]
    ConnectTimeout {
        /// Name of the endpoint.
        endpoint: String,
        /// Configured connect timeout.
        timeout: Duration,
    },
    /// The session was used after `close()`.
    #[error("session is closed")]
    SessionClosed,
    /// A contact point or credential could not be turned into a request target.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The endpoint bundle could not be loaded.
    #[error("bundle error: {0}")]
    Bundle(String),
}

impl DriverError {
    /// Classify this error for the retry layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Timeout { .. } | DriverError::ConnectionClosed { .. } => {
                ErrorKind::Transient
            }
            DriverError::AllTargetsUnreachable { .. } => ErrorKind::AllTargetsUnreachable,
            _ => ErrorKind::Fatal,
        }
    }

    /// Is the error worth resubmitting the same request for?
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Bundle(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_disconnects_are_transient() {
        let timeout = DriverError::Timeout {
            node: "n1".into(),
            message: "deadline".into(),
        };
        let closed = DriverError::ConnectionClosed {
            node: "n1".into(),
            message: "reset".into(),
        };
        assert!(timeout.is_transient());
        assert!(closed.is_transient());
    }

    #[test]
    fn exhausted_retries_are_fatal() {
        let err = DriverError::RetriesExhausted {
            attempts: 3,
            last: Box::new(DriverError::Timeout {
                node: "n1".into(),
                message: "deadline".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(
            DriverError::AllTargetsUnreachable {
                endpoint: "primary".into(),
                message: "refused".into(),
            }
            .kind(),
            ErrorKind::AllTargetsUnreachable
        );
    }
}

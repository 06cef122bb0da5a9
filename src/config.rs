//! Endpoint configuration.

use crate::errors::DriverError;
use derivative::Derivative;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connectable target: one region or cluster of ChiselStore nodes.
///
/// A run has two of these, primary and fallback. They are built once at
/// startup and never mutated afterwards.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct EndpointConfig {
    /// Name used in logs and diagnostics.
    pub name: String,
    /// gRPC URIs of the nodes, e.g. `http://127.0.0.1:50001`.
    pub contact_points: Vec<String>,
    /// Auth token sent as a bearer credential.
    #[derivative(Debug = "ignore")]
    pub token: Option<String>,
    /// Keyspace every query runs in.
    pub keyspace: Option<String>,
    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Per-request deadline enforced by the transport.
    pub request_timeout: Duration,
}

impl EndpointConfig {
    /// Creates a new endpoint configuration with default timeouts.
    pub fn new<S: Into<String>>(name: S, contact_points: Vec<String>) -> Self {
        Self {
            name: name.into(),
            contact_points,
            token: None,
            keyspace: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Loads the contact points of an endpoint from a bundle file.
    ///
    /// A bundle lists one contact point per line. Blank lines and lines
    /// starting with `#` are ignored. The endpoint is named after the file.
    pub fn from_bundle<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Bundle(format!("{}: {}", path.display(), e)))?;
        let contact_points = parse_bundle(&text);
        if contact_points.is_empty() {
            return Err(DriverError::Bundle(format!(
                "{}: no contact points",
                path.display()
            )));
        }
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, contact_points))
    }

    /// Sets the auth token.
    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the keyspace.
    pub fn with_keyspace<S: Into<String>>(mut self, keyspace: S) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_bundle(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_skips_comments_and_blank_lines() {
        let text = "# us-east\nhttp://127.0.0.1:50001\n\n  http://127.0.0.1:50002  \n#http://old\n";
        assert_eq!(
            parse_bundle(text),
            vec!["http://127.0.0.1:50001", "http://127.0.0.1:50002"]
        );
    }

    #[test]
    fn debug_output_hides_token() {
        let config = EndpointConfig::new("primary", vec!["http://127.0.0.1:50001".into()])
            .with_token("AstraCS:secret");
        let printed = format!("{:?}", config);
        assert!(printed.contains("primary"));
        assert!(!printed.contains("secret"));
    }
}

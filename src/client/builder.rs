//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and connecting [`Client`] instances.
//!
//! # Example
//!
//! ```ignore
//! use socketio_client::Client;
//!
//! let client = Client::builder()
//!     .url("http://localhost:8000")
//!     .query("token", "secret")
//!     .transport("stream")
//!     .factory(TransportKind::Polling, polling)
//!     .factory(TransportKind::Stream, stream)
//!     .connect()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::engine::{ConnectOptions, Connection, DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT};
use crate::error::{Error, Result};
use crate::transport::{TransportFactories, TransportFactory, TransportKind};

use super::core::Client;

// ============================================================================
// Constants
// ============================================================================

/// Default endpoint path.
pub const DEFAULT_PATH: &str = "/socket.io";

/// Default transport preference.
pub const DEFAULT_TRANSPORT: &str = "stream";

/// Default protocol revision sent as `EIO`.
pub const DEFAULT_PROTOCOL_REVISION: u8 = 3;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    /// Server address, with or without scheme.
    url: Option<String>,
    /// Endpoint path joined in front of the URL path.
    path: String,
    /// Extra query pairs.
    query: Vec<(String, String)>,
    /// Headers forwarded to every transport request.
    headers: Vec<(String, String)>,
    /// Transport preference by name.
    transport: String,
    /// Fallback ping interval.
    ping_interval: Duration,
    /// Fallback ping timeout.
    ping_timeout: Duration,
    /// `EIO` query value.
    protocol_revision: u8,
    /// Transport factories.
    factories: TransportFactories,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            url: None,
            path: DEFAULT_PATH.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            transport: DEFAULT_TRANSPORT.to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            protocol_revision: DEFAULT_PROTOCOL_REVISION,
            factories: TransportFactories::new(),
        }
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server address.
    ///
    /// # Arguments
    ///
    /// * `url` - e.g. `"http://localhost:8000"`; `http://` is assumed when
    ///   no scheme is given
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the endpoint path (default `/socket.io`).
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Adds a query pair, replacing an earlier value for the same key.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.query.retain(|(existing, _)| *existing != key);
        self.query.push((key, value.into()));
        self
    }

    /// Adds several query pairs.
    #[must_use]
    pub fn queries<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        pairs
            .into_iter()
            .fold(self, |builder, (key, value)| builder.query(key, value))
    }

    /// Adds a header forwarded with every transport request.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the transport preference: `"polling"`, or `"stream"`
    /// (alias `"websocket"`) to upgrade after the handshake.
    #[inline]
    #[must_use]
    pub fn transport(mut self, name: impl Into<String>) -> Self {
        self.transport = name.into();
        self
    }

    /// Sets the ping interval used when the server does not announce one.
    #[inline]
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the ping timeout used when the server does not announce one.
    #[inline]
    #[must_use]
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the protocol revision sent as `EIO` (default 3).
    #[inline]
    #[must_use]
    pub fn protocol_revision(mut self, revision: u8) -> Self {
        self.protocol_revision = revision;
        self
    }

    /// Registers the factory opening transports of `kind`.
    #[inline]
    #[must_use]
    pub fn factory(mut self, kind: TransportKind, factory: Arc<dyn TransportFactory>) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    /// Validates the configuration into connection options.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no URL is set, its scheme is unusable or a
    ///   ping setting is zero
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::UnsupportedTransport`] if the transport name is unknown or
    ///   a needed factory is missing
    pub fn build(self) -> Result<ConnectOptions> {
        let transport: TransportKind = self.transport.parse()?;
        self.validate_factories(transport)?;
        self.validate_timings()?;
        let url = self.endpoint()?;

        let mut options = ConnectOptions::new(url, transport, self.factories);
        options.headers = self.headers;
        options.ping_interval = self.ping_interval;
        options.ping_timeout = self.ping_timeout;
        Ok(options)
    }

    /// Builds, performs the handshake and starts dispatching.
    ///
    /// # Errors
    ///
    /// Any [`build`](Self::build) error, or [`Error::HandshakeFailed`].
    pub async fn connect(self) -> Result<Client> {
        let options = self.build()?;
        let connection = Connection::open(options).await?;
        Ok(Client::start(connection))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_factories(&self, transport: TransportKind) -> Result<()> {
        self.factories.get(TransportKind::Polling)?;
        if transport == TransportKind::Stream {
            self.factories.get(TransportKind::Stream)?;
        }
        Ok(())
    }

    fn validate_timings(&self) -> Result<()> {
        if self.ping_interval.is_zero() || self.ping_timeout.is_zero() {
            return Err(Error::config(
                "ping interval and ping timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Composes the endpoint URL: scheme, joined path, merged query.
    fn endpoint(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            Error::config(
                "Server URL is required. Use .url() to set it.\n\
                 Example: Client::builder().url(\"http://localhost:8000\")",
            )
        })?;

        let raw = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let mut url = Url::parse(&raw)?;

        let scheme = match url.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => {
                return Err(Error::config(format!("unsupported URL scheme: {other}")));
            }
        };
        if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
            return Err(Error::config(format!("cannot use scheme {scheme} for {raw}")));
        }

        let path = join_path(&self.path, url.path());
        url.set_path(&path);

        let configured = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain([("EIO".to_string(), self.protocol_revision.to_string())]);
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .into_owned()
            .filter(|(key, _)| key != "EIO" && !self.query.iter().any(|(k, _)| k == key))
            .collect();
        pairs.extend(configured);
        url.query_pairs_mut().clear().extend_pairs(pairs);

        Ok(url)
    }
}

/// Joins the endpoint path in front of the URL path; always ends with `/`.
fn join_path(endpoint: &str, url_path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    if !endpoint.is_empty() && endpoint != url_path {
        segments.extend(endpoint.split('/').filter(|s| !s.is_empty()));
    }
    segments.extend(url_path.split('/').filter(|s| !s.is_empty()));

    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}/", segments.join("/"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::MemoryFactory;

    fn with_factories(builder: ClientBuilder) -> ClientBuilder {
        let (polling, _) = MemoryFactory::new(TransportKind::Polling);
        let stream = polling.sibling(TransportKind::Stream);
        builder
            .factory(TransportKind::Polling, Arc::new(polling))
            .factory(TransportKind::Stream, Arc::new(stream))
    }

    #[test]
    fn test_default_settings() {
        let builder = ClientBuilder::new();
        assert!(builder.url.is_none());
        assert_eq!(builder.path, "/socket.io");
        assert_eq!(builder.transport, "stream");
        assert_eq!(builder.ping_interval, Duration::from_secs(25));
        assert_eq!(builder.ping_timeout, Duration::from_secs(60));
        assert_eq!(builder.protocol_revision, 3);
    }

    #[test]
    fn test_build_composes_url() {
        let options = with_factories(ClientBuilder::new())
            .url("localhost:8000")
            .query("token", "abc")
            .build()
            .expect("valid");

        assert_eq!(options.url.scheme(), "http");
        assert_eq!(options.url.path(), "/socket.io/");
        let pairs: Vec<(String, String)> = options.url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("token".to_string(), "abc".to_string())));
        assert!(pairs.contains(&("EIO".to_string(), "3".to_string())));
        assert_eq!(options.transport, TransportKind::Stream);
    }

    #[test]
    fn test_build_merges_existing_query() {
        let options = with_factories(ClientBuilder::new())
            .url("wss://example.com/app?user=root&token=old")
            .query("token", "new")
            .protocol_revision(4)
            .build()
            .expect("valid");

        assert_eq!(options.url.scheme(), "https");
        assert_eq!(options.url.path(), "/socket.io/app/");
        let pairs: Vec<(String, String)> = options.url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("user".to_string(), "root".to_string()),
                ("token".to_string(), "new".to_string()),
                ("EIO".to_string(), "4".to_string()),
            ]
        );
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/socket.io", "/"), "/socket.io/");
        assert_eq!(join_path("/socket.io", "/socket.io"), "/socket.io/");
        assert_eq!(join_path("", "/custom"), "/custom/");
        assert_eq!(join_path("", ""), "/");
    }

    #[test]
    fn test_headers_are_forwarded() {
        let options = with_factories(ClientBuilder::new())
            .url("http://localhost")
            .header("Authorization", "Bearer x")
            .build()
            .expect("valid");
        assert_eq!(
            options.headers,
            vec![("Authorization".to_string(), "Bearer x".to_string())]
        );
    }

    #[test]
    fn test_build_fails_without_url() {
        let err = with_factories(ClientBuilder::new()).build().unwrap_err();
        assert!(err.to_string().contains("URL"));
    }

    #[test]
    fn test_build_rejects_unknown_transport() {
        let err = with_factories(ClientBuilder::new())
            .url("http://localhost")
            .transport("carrier-pigeon")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedTransport { .. }));
    }

    #[test]
    fn test_build_requires_stream_factory() {
        let (polling, _) = MemoryFactory::new(TransportKind::Polling);
        let builder = ClientBuilder::new()
            .url("http://localhost")
            .factory(TransportKind::Polling, Arc::new(polling));

        assert!(matches!(
            builder.clone().build(),
            Err(Error::UnsupportedTransport { .. })
        ));
        assert!(builder.transport("polling").build().is_ok());
    }

    #[test]
    fn test_build_rejects_zero_timings() {
        let err = with_factories(ClientBuilder::new())
            .url("http://localhost")
            .ping_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_rejects_other_schemes() {
        let err = with_factories(ClientBuilder::new())
            .url("ftp://localhost")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}

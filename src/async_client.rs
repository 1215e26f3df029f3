//! Asynchronous RFC 1413 client (requires `tokio` feature).

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::client::{decode_line, parse_response, request_line, target};
use crate::error::{IdentError, Result};
use crate::types::{ConnectionContext, IdentConfig, IdentReply, MAX_RESPONSE_LEN};

/// Asynchronous IDENT client.
///
/// This client requires the `tokio` feature to be enabled.
///
/// # Example
///
/// ```no_run
/// use ident_client::AsyncClient;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), ident_client::IdentError> {
/// let client = AsyncClient::builder()
///     .remote_address("192.0.2.7")
///     .remote_port(6191)
///     .local_port(23)
///     .build();
/// let reply = client.query().await?;
/// println!("User: {}", reply.username());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AsyncClient {
    config: IdentConfig,
}

impl AsyncClient {
    /// Create a new async client with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an async client builder for custom configuration.
    pub fn builder() -> AsyncClientBuilder {
        AsyncClientBuilder::new()
    }

    /// Create an async client from an existing configuration.
    pub fn from_config(config: IdentConfig) -> Self {
        Self { config }
    }

    /// Ask the remote IDENT service who owns the configured connection.
    ///
    /// The whole round trip is bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Client::query`](crate::Client::query), plus
    /// [`IdentError::Timeout`] when the round trip takes too long.
    pub async fn query(&self) -> Result<IdentReply> {
        let (address, remote_port, local_port) = target(&self.config)?;
        let ident_port = self.config.ident_port;
        let timeout = self.config.timeout;

        debug!(address, ident_port, remote_port, local_port, "sending ident query");

        let query_inner = async {
            let mut stream = TcpStream::connect((address, ident_port))
                .await
                .map_err(|source| IdentError::ConnectionFailed {
                    address: format!("{address}:{ident_port}"),
                    source,
                })?;

            stream
                .write_all(request_line(remote_port, local_port).as_bytes())
                .await
                .map_err(IdentError::WriteError)?;
            stream.flush().await.map_err(IdentError::WriteError)?;

            let mut line = Vec::new();
            BufReader::new((&mut stream).take(MAX_RESPONSE_LEN))
                .read_until(b'\n', &mut line)
                .await
                .map_err(IdentError::ReadError)?;

            Ok::<_, IdentError>(decode_line(&line))
        };

        let line = tokio::time::timeout(timeout, query_inner)
            .await
            .map_err(|_| IdentError::Timeout(timeout))??;
        trace!(response = line.trim_end(), "ident response");

        parse_response(&line)
    }

    /// Get the configuration.
    pub fn config(&self) -> &IdentConfig {
        &self.config
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

/// Builder for creating a customized [`AsyncClient`].
#[derive(Debug, Clone, Default)]
pub struct AsyncClientBuilder {
    config: IdentConfig,
}

impl AsyncClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the remote address and both ports from a connection context.
    pub fn context(mut self, context: &ConnectionContext) -> Self {
        if let Some(address) = &context.remote_address {
            self.config.remote_address = Some(address.clone());
        }
        self.config.remote_port = context.remote_port.or(self.config.remote_port);
        self.config.local_port = context.local_port.or(self.config.local_port);
        self
    }

    /// Set the host running the IDENT service.
    pub fn remote_address(mut self, address: impl Into<String>) -> Self {
        self.config.remote_address = Some(address.into());
        self
    }

    /// Set the peer-side port of the connection to identify.
    pub fn remote_port(mut self, port: u16) -> Self {
        self.config.remote_port = Some(port);
        self
    }

    /// Set our side's port of the connection to identify.
    pub fn local_port(mut self, port: u16) -> Self {
        self.config.local_port = Some(port);
        self
    }

    /// Set the IDENT service port.
    pub fn ident_port(mut self, port: u16) -> Self {
        self.config.ident_port = port;
        self
    }

    /// Set the timeout for the whole round trip.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the async client.
    pub fn build(self) -> AsyncClient {
        AsyncClient {
            config: self.config,
        }
    }
}

//! Lazily-queried, cached IDENT lookup.

use std::time::Duration;

use tracing::debug;

use crate::client::run_query;
use crate::types::{ConnectionContext, IdentConfig, IdentReply, DEFAULT_IDENT_PORT, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Default)]
enum CacheState {
    #[default]
    NotQueried,
    Resolved(IdentReply),
    Failed,
}

/// Cached IDENT lookup for a single connection.
///
/// The first call to [`username`](Ident::username) or
/// [`os_type`](Ident::os_type) runs the query; later calls reuse the cached
/// outcome, success or failure, until a setter changes the configuration or
/// [`refresh`](Ident::refresh) is called.
///
/// Failures are reported as `None`. Hosts that don't run identd are the
/// common case, so nothing here returns an error; the cause is logged at
/// `debug` level. Use [`Client::query`](crate::Client::query) for the detail.
///
/// The accessors take `&mut self`, so the check-then-query sequence cannot
/// race. Share an `Ident` between threads behind a `Mutex`.
///
/// # Example
///
/// ```no_run
/// use ident_client::{ConnectionContext, Ident};
///
/// # fn handle(peer: std::net::SocketAddr, local: std::net::SocketAddr) {
/// let mut ident = Ident::with_context(ConnectionContext::from_addrs(peer, local));
/// match ident.username() {
///     Some(user) => println!("connection owned by {user}"),
///     None => println!("no ident"),
/// }
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Ident {
    config: IdentConfig,
    context: Option<ConnectionContext>,
    state: CacheState,
}

impl Ident {
    /// Create an unconfigured lookup. Set the remote address and both ports
    /// before asking for a result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lookup for the connection `remote_address:remote_port` ->
    /// `local_port`.
    pub fn for_connection(remote_address: impl Into<String>, remote_port: u16, local_port: u16) -> Self {
        Self::from_config(IdentConfig {
            remote_address: Some(remote_address.into()),
            remote_port: Some(remote_port),
            local_port: Some(local_port),
            ..IdentConfig::default()
        })
    }

    /// Create a lookup whose connection fields default to `context`.
    pub fn with_context(context: ConnectionContext) -> Self {
        Self {
            config: IdentConfig::from_context(&context),
            context: Some(context),
            state: CacheState::NotQueried,
        }
    }

    /// Create a lookup from an explicit configuration.
    pub fn from_config(config: IdentConfig) -> Self {
        Self {
            config,
            context: None,
            state: CacheState::NotQueried,
        }
    }

    /// Replace the ambient context used by setters given `None`.
    ///
    /// Already-set fields are not touched.
    pub fn set_context(&mut self, context: Option<ConnectionContext>) {
        self.context = context;
        self.invalidate();
    }

    /// Set the remote address, or fall back to the context's peer address.
    pub fn set_remote_address(&mut self, remote_address: Option<&str>) {
        self.config.remote_address = match remote_address {
            Some(address) => Some(address.to_string()),
            None => self.context.as_ref().and_then(|c| c.remote_address.clone()),
        };
        self.invalidate();
    }

    /// Set the remote port, or fall back to the context's peer port.
    pub fn set_remote_port(&mut self, remote_port: Option<u16>) {
        self.config.remote_port =
            remote_port.or_else(|| self.context.as_ref().and_then(|c| c.remote_port));
        self.invalidate();
    }

    /// Set the local port, or fall back to the context's local port.
    pub fn set_local_port(&mut self, local_port: Option<u16>) {
        self.config.local_port =
            local_port.or_else(|| self.context.as_ref().and_then(|c| c.local_port));
        self.invalidate();
    }

    /// Set the IDENT service port (default 113).
    pub fn set_ident_port(&mut self, ident_port: Option<u16>) {
        self.config.ident_port = ident_port.unwrap_or(DEFAULT_IDENT_PORT);
        self.invalidate();
    }

    /// Set the timeout (default 10 seconds).
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.config.timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        self.invalidate();
    }

    /// Username of the connection owner, or `None` if the query failed.
    ///
    /// Empty when the server sent a `USERID` reply without a username.
    pub fn username(&mut self) -> Option<&str> {
        self.reply().map(IdentReply::username)
    }

    /// Operating system type reported by the server, or `None` if the query
    /// failed.
    pub fn os_type(&mut self) -> Option<&str> {
        self.reply().map(IdentReply::os_type)
    }

    /// The full reply, querying first if nothing is cached.
    pub fn reply(&mut self) -> Option<&IdentReply> {
        if matches!(self.state, CacheState::NotQueried) {
            self.query();
        }
        self.cached()
    }

    /// Discard the cached outcome and query again.
    pub fn refresh(&mut self) -> Option<&IdentReply> {
        self.query();
        self.cached()
    }

    /// Whether a query has run since the last configuration change.
    pub fn is_cached(&self) -> bool {
        !matches!(self.state, CacheState::NotQueried)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &IdentConfig {
        &self.config
    }

    /// Get the ambient context, if any.
    pub fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }

    fn cached(&self) -> Option<&IdentReply> {
        match &self.state {
            CacheState::Resolved(reply) => Some(reply),
            CacheState::NotQueried | CacheState::Failed => None,
        }
    }

    fn invalidate(&mut self) {
        self.state = CacheState::NotQueried;
    }

    fn query(&mut self) {
        self.state = match run_query(&self.config) {
            Ok(reply) => CacheState::Resolved(reply),
            Err(e) => {
                debug!(error = %e, "ident query failed");
                CacheState::Failed
            }
        };
    }
}

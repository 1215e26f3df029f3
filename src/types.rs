//! Configuration and reply types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port of the IDENT service.
pub const DEFAULT_IDENT_PORT: u16 = 113;

/// Default timeout for each blocking step of a query.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a response line, in octets (RFC 1413).
pub const MAX_RESPONSE_LEN: u64 = 1000;

/// A parsed `USERID` reply.
///
/// A field is `None` when the server omitted it entirely, which RFC 1413
/// permits. `Some("")` means the field was present but empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentReply {
    /// Operating system type (e.g. "UNIX").
    pub os_type: Option<String>,

    /// User identification of the connection owner.
    pub username: Option<String>,
}

impl IdentReply {
    /// Operating system type, or `""` if the server omitted it.
    pub fn os_type(&self) -> &str {
        self.os_type.as_deref().unwrap_or_default()
    }

    /// Username, or `""` if the server omitted it.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }
}

/// Ambient values of the inbound connection being identified.
///
/// A host application fills this from its own request context (peer address,
/// peer port, local listening port). Unset setters fall back to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    /// Address of the connecting peer.
    pub remote_address: Option<String>,
    /// TCP port on the peer's side.
    pub remote_port: Option<u16>,
    /// TCP port on our side.
    pub local_port: Option<u16>,
}

impl ConnectionContext {
    /// Build a context from a peer and a local socket address.
    pub fn from_addrs(peer: std::net::SocketAddr, local: std::net::SocketAddr) -> Self {
        Self {
            remote_address: Some(peer.ip().to_string()),
            remote_port: Some(peer.port()),
            local_port: Some(local.port()),
        }
    }
}

/// Everything needed to run one IDENT query.
///
/// Deserializable so it can live inside a host application's config file;
/// omitted keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentConfig {
    /// Host running the IDENT service (IP or hostname).
    pub remote_address: Option<String>,
    /// Peer-side port of the connection being identified.
    pub remote_port: Option<u16>,
    /// Our side's port of the connection being identified.
    pub local_port: Option<u16>,
    /// Port of the IDENT service.
    pub ident_port: u16,
    /// Timeout applied to connect, write and read.
    pub timeout: Duration,
}

impl Default for IdentConfig {
    fn default() -> Self {
        Self {
            remote_address: None,
            remote_port: None,
            local_port: None,
            ident_port: DEFAULT_IDENT_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl IdentConfig {
    /// Config whose connection fields come from `context`.
    pub fn from_context(context: &ConnectionContext) -> Self {
        Self {
            remote_address: context.remote_address.clone(),
            remote_port: context.remote_port,
            local_port: context.local_port,
            ..Self::default()
        }
    }
}

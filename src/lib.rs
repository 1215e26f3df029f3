//! # ident-client
//!
//! A Rust client library for the IDENT protocol ([RFC 1413]).
//!
//! Given an inbound TCP connection, an IDENT query asks the service on port
//! 113 of the connecting host which user owns that connection. The answer is
//! advisory: it is only as trustworthy as the remote host.
//!
//! [RFC 1413]: https://www.rfc-editor.org/rfc/rfc1413
//!
//! ## Features
//!
//! - **Cached lookup**: [`Ident`] queries lazily and reports failure as `None`
//! - **Synchronous client**: [`Client`], one query per call with full errors
//! - **Asynchronous client**: Enable the `tokio` feature for [`AsyncClient`]
//! - **Builder pattern**: Flexible client configuration
//!
//! ## Quick Start
//!
//! ### Cached Lookup
//!
//! ```no_run
//! use ident_client::Ident;
//!
//! let mut ident = Ident::for_connection("192.0.2.7", 6191, 23);
//! if let Some(user) = ident.username() {
//!     println!("User: {user}");
//! }
//! println!("OS: {:?}", ident.os_type());
//! ```
//!
//! ### Synchronous Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use ident_client::Client;
//!
//! fn main() -> Result<(), ident_client::IdentError> {
//!     let client = Client::builder()
//!         .remote_address("192.0.2.7")
//!         .remote_port(6191)
//!         .local_port(23)
//!         .timeout(Duration::from_secs(3))
//!         .build();
//!     let reply = client.query()?;
//!
//!     println!("OS: {}", reply.os_type());
//!     println!("User: {}", reply.username());
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Asynchronous Usage (requires `tokio` feature)
//!
//! ```ignore
//! use ident_client::AsyncClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ident_client::IdentError> {
//!     let client = AsyncClient::builder()
//!         .remote_address("192.0.2.7")
//!         .remote_port(6191)
//!         .local_port(23)
//!         .build();
//!     let reply = client.query().await?;
//!
//!     println!("User: {}", reply.username());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! 1. Connect to `remote_address:113`
//! 2. Send `<remote_port>,<local_port>\r\n`
//! 3. Read one line of at most 1000 octets
//! 4. Parse `<port-pair> : USERID : <os-type> : <username>`; anything else,
//!    including `<port-pair> : ERROR : <error-type>`, is a failure

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod error;
mod ident;
mod types;

#[cfg(feature = "tokio")]
mod async_client;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{parse_response, Client, ClientBuilder};
pub use error::{IdentError, Result};
pub use ident::Ident;
pub use types::{
    ConnectionContext, IdentConfig, IdentReply, DEFAULT_IDENT_PORT, DEFAULT_TIMEOUT,
    MAX_RESPONSE_LEN,
};

#[cfg(feature = "tokio")]
pub use async_client::{AsyncClient, AsyncClientBuilder};

/// Convenience function to query with default settings.
///
/// This is equivalent to building a [`Client`] with the three values and
/// calling [`Client::query`].
///
/// # Example
///
/// ```no_run
/// let reply = ident_client::lookup("192.0.2.7", 6191, 23)?;
/// println!("User: {}", reply.username());
/// # Ok::<(), ident_client::IdentError>(())
/// ```
pub fn lookup(remote_address: &str, remote_port: u16, local_port: u16) -> Result<IdentReply> {
    Client::builder()
        .remote_address(remote_address)
        .remote_port(remote_port)
        .local_port(local_port)
        .build()
        .query()
}

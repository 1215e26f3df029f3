//! Synchronous RFC 1413 client.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{IdentError, Result};
use crate::types::{ConnectionContext, IdentConfig, IdentReply, MAX_RESPONSE_LEN};

/// Stateless synchronous IDENT client.
///
/// Every call to [`query`](Client::query) opens a fresh connection, sends one
/// query line, reads one response line and closes the connection again.
///
/// # Example
///
/// ```no_run
/// use ident_client::Client;
///
/// let client = Client::builder()
///     .remote_address("192.0.2.7")
///     .remote_port(6191)
///     .local_port(23)
///     .build();
/// let reply = client.query()?;
/// println!("{} is {}", reply.os_type(), reply.username());
/// # Ok::<(), ident_client::IdentError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Client {
    config: IdentConfig,
}

impl Client {
    /// Create a new client with default settings.
    ///
    /// The remote address and both ports still have to be supplied, so this
    /// is mostly useful through [`Client::builder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client builder for custom configuration.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client from an existing configuration.
    pub fn from_config(config: IdentConfig) -> Self {
        Self { config }
    }

    /// Ask the remote IDENT service who owns the configured connection.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The remote address or one of the ports is not configured
    /// - The address cannot be resolved or connected to
    /// - Writing the query or reading the response fails or times out
    /// - The server answers with an `ERROR` reply or an unparseable line
    pub fn query(&self) -> Result<IdentReply> {
        run_query(&self.config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &IdentConfig {
        &self.config
    }

    /// Get the configured remote address.
    pub fn remote_address(&self) -> Option<&str> {
        self.config.remote_address.as_deref()
    }

    /// Get the configured IDENT service port.
    pub fn ident_port(&self) -> u16 {
        self.config.ident_port
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

/// Builder for creating a customized [`Client`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use ident_client::Client;
///
/// let client = Client::builder()
///     .remote_address("irc.example.net")
///     .remote_port(6191)
///     .local_port(6667)
///     .timeout(Duration::from_secs(3))
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: IdentConfig,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the remote address and both ports from a connection context.
    ///
    /// Fields the context leaves unset keep their current value.
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

    /// Build the client.
    pub fn build(self) -> Client {
        Client {
            config: self.config,
        }
    }
}

/// One full round trip: connect, send the port pair, read and parse a line.
pub(crate) fn run_query(config: &IdentConfig) -> Result<IdentReply> {
    let (address, remote_port, local_port) = target(config)?;
    let ident_port = config.ident_port;
    let timeout = config.timeout;

    debug!(address, ident_port, remote_port, local_port, "sending ident query");

    let deadline = Instant::now() + timeout;
    let stream = connect(address, ident_port, deadline, timeout)?;
    let stream = DeadlineStream { stream, deadline };

    let line = exchange(stream, &request_line(remote_port, local_port), timeout)?;
    trace!(response = line.trim_end(), "ident response");

    parse_response(&line)
}

/// Pull out the fields a query cannot run without.
pub(crate) fn target(config: &IdentConfig) -> Result<(&str, u16, u16)> {
    let address = config
        .remote_address
        .as_deref()
        .ok_or(IdentError::MissingConfig {
            field: "remote_address",
        })?;
    let remote_port = config.remote_port.ok_or(IdentError::MissingConfig {
        field: "remote_port",
    })?;
    let local_port = config.local_port.ok_or(IdentError::MissingConfig {
        field: "local_port",
    })?;
    Ok((address, remote_port, local_port))
}

/// The query line: `<remote_port>,<local_port>\r\n`.
pub(crate) fn request_line(remote_port: u16, local_port: u16) -> String {
    format!("{remote_port},{local_port}\r\n")
}

/// Decode a response line as Latin-1, which maps every octet to a char.
pub(crate) fn decode_line(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Time left until `deadline`, or a `TimedOut` error once it has passed.
fn remaining(deadline: Instant) -> io::Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "ident deadline passed"));
    }
    Ok(left)
}

/// A `TcpStream` whose reads and writes share one deadline.
///
/// Each call re-arms the socket timeout with whatever time is left, so a
/// server trickling bytes cannot stretch the query past the deadline.
struct DeadlineStream {
    stream: TcpStream,
    deadline: Instant,
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(remaining(self.deadline)?))?;
        self.stream.read(buf)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(Some(remaining(self.deadline)?))?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Connect to the first resolved address that accepts before `deadline`.
fn connect(address: &str, port: u16, deadline: Instant, timeout: Duration) -> Result<TcpStream> {
    let addrs = (address, port)
        .to_socket_addrs()
        .map_err(|source| IdentError::Resolve {
            address: address.to_string(),
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        let left = match remaining(deadline) {
            Ok(left) => left,
            Err(e) => {
                last_error = Some(e);
                break;
            }
        };
        match TcpStream::connect_timeout(&addr, left) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "ident connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    let source = last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
    });
    if source.kind() == io::ErrorKind::TimedOut {
        return Err(IdentError::Timeout(timeout));
    }
    Err(IdentError::ConnectionFailed {
        address: format!("{address}:{port}"),
        source,
    })
}

/// Send `request` and read back a single line of at most
/// [`MAX_RESPONSE_LEN`] octets.
///
/// Takes the stream by value so it is closed exactly once when this returns,
/// whichever step fails. I/O that times out is reported as
/// [`IdentError::Timeout`].
pub(crate) fn exchange<S: Read + Write>(
    mut stream: S,
    request: &str,
    timeout: Duration,
) -> Result<String> {
    let timed_out = |e: &io::Error| {
        matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
    };

    stream
        .write_all(request.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| {
            if timed_out(&e) {
                IdentError::Timeout(timeout)
            } else {
                IdentError::WriteError(e)
            }
        })?;

    let mut line = Vec::new();
    BufReader::new(Read::take(&mut stream, MAX_RESPONSE_LEN))
        .read_until(b'\n', &mut line)
        .map_err(|e| {
            if timed_out(&e) {
                IdentError::Timeout(timeout)
            } else {
                IdentError::ReadError(e)
            }
        })?;

    Ok(decode_line(&line))
}

/// Parse a response line from an IDENT server.
///
/// The line is split on `:` into at most four fields, so a username that
/// itself contains colons survives intact. The port pair echoed in the first
/// field is ignored.
///
/// # Example
///
/// ```
/// let reply = ident_client::parse_response("6191, 23 : USERID : UNIX : stjohns\r\n")?;
/// assert_eq!(reply.os_type(), "UNIX");
/// assert_eq!(reply.username(), "stjohns");
/// # Ok::<(), ident_client::IdentError>(())
/// ```
pub fn parse_response(line: &str) -> Result<IdentReply> {
    if trim_field(line).is_empty() {
        return Err(IdentError::EmptyResponse);
    }

    let mut fields = line.splitn(4, ':');
    let _port_pair = fields.next();
    let marker = fields
        .next()
        .map(trim_field)
        .ok_or_else(|| IdentError::MalformedResponse(line.trim_end().to_string()))?;

    if marker.eq_ignore_ascii_case("ERROR") {
        let error = fields.next().map(trim_field).unwrap_or_default();
        return Err(IdentError::ErrorReply {
            error: error.to_string(),
        });
    }
    if !marker.eq_ignore_ascii_case("USERID") {
        return Err(IdentError::MalformedResponse(line.trim_end().to_string()));
    }

    Ok(IdentReply {
        os_type: fields.next().map(|f| trim_field(f).to_string()),
        username: fields.next().map(|f| trim_field(f).to_string()),
    })
}

/// Strip ASCII blanks, CR/LF and NUL; Latin-1 bytes such as 0xA0 are data.
fn trim_field(field: &str) -> &str {
    field.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIdentd;
    use std::cell::Cell;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::rc::Rc;

    struct MockStream {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
        fail_write: bool,
        stall_read: bool,
        drops: Rc<Cell<usize>>,
    }

    impl MockStream {
        fn new(input: &[u8], drops: &Rc<Cell<usize>>) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                written: Vec::new(),
                fail_write: false,
                stall_read: false,
                drops: Rc::clone(drops),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.stall_read {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
            }
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_write {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for MockStream {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn test_parse_success_response() {
        let reply = parse_response("6191,23:USERID:UNIX:stjohns").unwrap();

        assert_eq!(reply.os_type.as_deref(), Some("UNIX"));
        assert_eq!(reply.username.as_deref(), Some("stjohns"));
    }

    #[test]
    fn test_parse_marker_is_case_insensitive() {
        let reply = parse_response("6191,23:userid:UNIX:foo").unwrap();

        assert_eq!(reply.os_type(), "UNIX");
        assert_eq!(reply.username(), "foo");
    }

    #[test]
    fn test_parse_error_reply() {
        let result = parse_response("6191,23:ERROR:UNKNOWN-ERROR");

        match result {
            Err(IdentError::ErrorReply { error }) => assert_eq!(error, "UNKNOWN-ERROR"),
            other => panic!("Expected ErrorReply, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_responses() {
        assert!(matches!(parse_response(""), Err(IdentError::EmptyResponse)));
        assert!(matches!(
            parse_response("no colon here"),
            Err(IdentError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_response("6191,23:NOPE"),
            Err(IdentError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_keeps_colons_in_username() {
        let reply = parse_response("6191,23:USERID:UNIX:foo:bar").unwrap();

        assert_eq!(reply.username(), "foo:bar");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let reply = parse_response("6191,23:USERID: UNIX :  stjohns  \r\n").unwrap();

        assert_eq!(reply.os_type(), "UNIX");
        assert_eq!(reply.username(), "stjohns");
    }

    #[test]
    fn test_parse_omitted_fields() {
        let reply = parse_response("6191,23:USERID").unwrap();
        assert_eq!(reply, IdentReply::default());

        let reply = parse_response("6191,23:USERID:UNIX").unwrap();
        assert_eq!(reply.os_type(), "UNIX");
        assert_eq!(reply.username, None);
    }

    #[test]
    fn test_parse_keeps_latin1_no_break_space() {
        let line = decode_line(b"6191,23:USERID:UNIX:\xa0bob\xa0\r\n");

        let reply = parse_response(&line).unwrap();

        assert_eq!(reply.username(), "\u{a0}bob\u{a0}");
    }

    #[test]
    fn test_request_line() {
        assert_eq!(request_line(6191, 23), "6191,23\r\n");
        assert_eq!(request_line(0, 65535), "0,65535\r\n");
    }

    #[test]
    fn test_decode_line_latin1() {
        assert_eq!(decode_line(b"caf\xe9"), "café");
    }

    #[test]
    fn test_exchange_reads_single_line() {
        let drops = Rc::new(Cell::new(0));
        let stream = MockStream::new(b"6191,23:USERID:UNIX:stjohns\r\nsecond line\r\n", &drops);

        let line = exchange(stream, "6191,23\r\n", crate::DEFAULT_TIMEOUT).unwrap();

        assert_eq!(line, "6191,23:USERID:UNIX:stjohns\r\n");
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_exchange_caps_response_length() {
        let drops = Rc::new(Cell::new(0));
        let stream = MockStream::new(&[b'x'; 4000], &drops);

        let line = exchange(stream, "1,2\r\n", crate::DEFAULT_TIMEOUT).unwrap();

        assert_eq!(line.len(), MAX_RESPONSE_LEN as usize);
    }

    #[test]
    fn test_exchange_write_failure_closes_stream_once() {
        let drops = Rc::new(Cell::new(0));
        let mut stream = MockStream::new(b"6191,23:USERID:UNIX:stjohns\r\n", &drops);
        stream.fail_write = true;

        let result = exchange(stream, "6191,23\r\n", crate::DEFAULT_TIMEOUT);

        assert!(matches!(result, Err(IdentError::WriteError(_))));
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_exchange_read_timeout_maps_to_timeout() {
        let drops = Rc::new(Cell::new(0));
        let mut stream = MockStream::new(b"", &drops);
        stream.stall_read = true;

        let result = exchange(stream, "6191,23\r\n", Duration::from_millis(300));

        assert!(matches!(result, Err(IdentError::Timeout(t)) if t == Duration::from_millis(300)));
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_query_round_trip() {
        let identd = FakeIdentd::serve(vec!["6191 , 23 : USERID : UNIX :stjohns\r\n"]);

        let client = Client::builder()
            .remote_address("127.0.0.1")
            .ident_port(identd.port())
            .remote_port(6191)
            .local_port(23)
            .build();
        let reply = client.query().unwrap();

        assert_eq!(reply.os_type(), "UNIX");
        assert_eq!(reply.username(), "stjohns");
        assert_eq!(identd.requests(), vec!["6191,23\r\n".to_string()]);
    }

    #[test]
    fn test_query_error_reply() {
        let identd = FakeIdentd::serve(vec!["6191,23:ERROR:NO-USER\r\n"]);

        let client = Client::builder()
            .remote_address("127.0.0.1")
            .ident_port(identd.port())
            .remote_port(6191)
            .local_port(23)
            .build();
        let err = client.query().unwrap_err();

        assert!(err.is_protocol_error());
        identd.requests();
    }

    #[test]
    fn test_query_missing_config() {
        let client = Client::builder().remote_address("127.0.0.1").local_port(23).build();

        assert!(matches!(
            client.query(),
            Err(IdentError::MissingConfig { field: "remote_port" })
        ));
    }

    #[test]
    fn test_query_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = Client::builder()
            .remote_address("127.0.0.1")
            .ident_port(port)
            .remote_port(1)
            .local_port(2)
            .build();
        let err = client.query().unwrap_err();

        assert!(!err.is_protocol_error());
    }

    #[test]
    fn test_query_read_timeout() {
        // Accepted by the kernel backlog, but nobody ever answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = Client::builder()
            .remote_address("127.0.0.1")
            .ident_port(port)
            .remote_port(1)
            .local_port(2)
            .timeout(Duration::from_millis(200))
            .build();

        let started = Instant::now();
        let result = client.query();

        assert!(matches!(result, Err(IdentError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn test_query_deadline_covers_trickling_server() {
        let reply = "6191,23:USERID:UNIX:slowpoke\r\n";
        let port = FakeIdentd::trickle(reply, Duration::from_millis(150));

        let client = Client::builder()
            .remote_address("127.0.0.1")
            .ident_port(port)
            .remote_port(6191)
            .local_port(23)
            .timeout(Duration::from_millis(300))
            .build();

        let started = Instant::now();
        let result = client.query();

        assert!(matches!(result, Err(IdentError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    #[ignore = "needs a network that silently drops packets to 10.255.255.1"]
    fn test_query_connect_timeout_is_bounded() {
        let client = Client::builder()
            .remote_address("10.255.255.1")
            .remote_port(1)
            .local_port(2)
            .timeout(Duration::from_millis(300))
            .build();

        let started = Instant::now();
        let result = client.query();

        assert!(matches!(result, Err(IdentError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_client_builder() {
        let context = ConnectionContext {
            remote_address: Some("192.0.2.7".into()),
            remote_port: Some(6191),
            local_port: None,
        };
        let client = Client::builder()
            .local_port(23)
            .context(&context)
            .ident_port(1113)
            .timeout(Duration::from_secs(3))
            .build();

        assert_eq!(client.remote_address(), Some("192.0.2.7"));
        assert_eq!(client.config().remote_port, Some(6191));
        assert_eq!(client.config().local_port, Some(23));
        assert_eq!(client.ident_port(), 1113);
        assert_eq!(client.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_default_client() {
        let client = Client::new();

        assert_eq!(client.remote_address(), None);
        assert_eq!(client.ident_port(), crate::DEFAULT_IDENT_PORT);
        assert_eq!(client.timeout(), crate::DEFAULT_TIMEOUT);
    }
}

//! Loopback IDENT server for tests.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Serves one canned reply per connection, then stops listening.
pub(crate) struct FakeIdentd {
    port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl FakeIdentd {
    /// Accept exactly `replies.len()` connections, answering each in order.
    pub(crate) fn serve(replies: Vec<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for reply in replies {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut request = String::new();
                reader.read_line(&mut request).unwrap();
                reader.get_mut().write_all(reply.as_bytes()).unwrap();
                requests.push(request);
            }
            requests
        });

        Self { port, handle }
    }

    /// Answer a single connection one byte per `delay`, returning the port.
    ///
    /// The server thread is left detached; it stops once the client hangs up.
    pub(crate) fn trickle(reply: &'static str, delay: Duration) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            if reader.read_line(&mut request).is_err() {
                return;
            }
            for byte in reply.as_bytes() {
                if reader.get_mut().write_all(&[*byte]).is_err() {
                    return;
                }
                thread::sleep(delay);
            }
        });

        port
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Wait for every connection to be served and return the query lines.
    pub(crate) fn requests(self) -> Vec<String> {
        self.handle.join().unwrap()
    }
}

//! Shared helpers for integration tests.
//!
//! Tests talk to an in-process mock server on `127.0.0.1:0`; no real Redis is
//! needed. Each mock reads RESP request frames and answers with whatever
//! bytes the test scripts, so replies can be fragmented or malformed at will.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redpipe::{ClientConfig, ReconnectPolicy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Install a subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accept connections forever, running `handler` for each one.
///
/// The handler gets the accepted socket and the 0-based connection number.
/// Returns the listening address and a counter of accepted connections.
pub async fn spawn_server<F, Fut>(handler: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(TcpStream, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handler(socket, n));
        }
    });

    (addr, accepted)
}

/// Config pointing at `addr` with short timeouts and a fast reconnect.
pub fn config_for(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(addr.ip().to_string(), addr.port());
    config.connect_timeout_ms = 1000;
    config.command_timeout_ms = 2000;
    config.reconnect = ReconnectPolicy {
        delay_ms: 50,
        max_attempts: None,
    };
    config
}

/// Reads RESP request frames off a mock-server socket.
pub struct RequestReader {
    socket: TcpStream,
    buf: Vec<u8>,
}

impl RequestReader {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            buf: Vec::new(),
        }
    }

    pub fn socket(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    pub fn into_inner(self) -> TcpStream {
        self.socket
    }

    /// Next request as its argument list, or `None` once the client hangs up.
    pub async fn next(&mut self) -> Option<Vec<Vec<u8>>> {
        loop {
            if let Some((args, used)) = parse_request(&self.buf) {
                self.buf.drain(..used);
                return Some(args);
            }
            let mut chunk = [0u8; 4096];
            let n = self.socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read exactly `n` requests.
    pub async fn take(&mut self, n: usize) -> Vec<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match tokio::time::timeout(Duration::from_secs(5), self.next()).await {
                Ok(Some(args)) => out.push(args),
                _ => break,
            }
        }
        out
    }
}

/// Answer every request on `socket` with `reply(args)` until the client
/// hangs up. An empty reply sends nothing.
pub async fn respond_with<F>(socket: TcpStream, mut reply: F)
where
    F: FnMut(&[Vec<u8>]) -> Vec<u8>,
{
    let mut reader = RequestReader::new(socket);
    while let Some(args) = reader.next().await {
        let out = reply(&args);
        if !out.is_empty() && reader.socket().write_all(&out).await.is_err() {
            return;
        }
    }
}

/// Parse one `*N\r\n$len\r\n...` request; returns the args and bytes used.
pub fn parse_request(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    fn line(buf: &[u8], at: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(at..)?;
        let pos = rest.windows(2).position(|w| w == b"\r\n")?;
        Some((&rest[..pos], at + pos + 2))
    }

    let (header, mut at) = line(buf, 0)?;
    assert_eq!(header.first(), Some(&b'*'), "request must be a multi-bulk");
    let argc: usize = std::str::from_utf8(&header[1..]).ok()?.parse().ok()?;

    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let (len_line, next) = line(buf, at)?;
        assert_eq!(len_line.first(), Some(&b'$'), "argument must be a bulk string");
        let len: usize = std::str::from_utf8(&len_line[1..]).ok()?.parse().ok()?;
        let end = next + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(buf[next..end].to_vec());
        at = end + 2;
    }
    Some((args, at))
}

/// Command name of a parsed request, uppercased.
pub fn name(args: &[Vec<u8>]) -> String {
    String::from_utf8_lossy(&args[0]).to_ascii_uppercase()
}

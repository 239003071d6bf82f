//! Connection driver: one task per connection.
//!
//! The driver owns the socket and the [`Pipeline`]. Callers never touch
//! either; they send [`Request`]s over a channel and wait on their command's
//! future. Writes, reads and the decode loop all run on this task, which is
//! what keeps send order and reply order in lockstep without locks.
//!
//! ```text
//!            connect ok                     transport lost
//! Connecting ─────────► Connected ─────────────────────────► Disconnected
//!     ▲  │ fail                │ close / handles dropped        │
//!     │  ▼                     ▼                                 │ immediate
//! Disconnected ──delay──┐   Closing ──► Closed                   │
//!     ▲                 │                                        │
//!     └─────────────────┴──────────────── Connecting ◄───────────┘
//! ```

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::ClientConfig;
use crate::connection::pipeline::Pipeline;
use crate::error::RedpipeError;
use crate::output::OutputKind;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Close requested; in-flight commands are being failed.
    Closing,
    /// Terminal. The driver task has exited.
    Closed,
}

impl ConnectionState {
    /// Whether commands submitted now can be written.
    pub fn is_writable(self) -> bool {
        self == Self::Connected
    }
}

/// Messages from client handles to the driver.
#[derive(Debug)]
pub enum Request {
    Command(Command),
    Close(oneshot::Sender<()>),
}

/// How a phase of the driver loop ended.
enum Exit {
    /// Close was requested or every handle is gone.
    Close,
    /// The transport failed; reconnect.
    Lost(RedpipeError),
}

pub struct Driver {
    config: ClientConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    state: watch::Sender<ConnectionState>,
    pipeline: Pipeline,
    close_acks: Vec<oneshot::Sender<()>>,
}

impl Driver {
    pub fn new(
        config: ClientConfig,
        requests: mpsc::UnboundedReceiver<Request>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        let pipeline = Pipeline::from_config(&config);
        Self {
            config,
            requests,
            state,
            pipeline,
            close_acks: Vec::new(),
        }
    }

    /// Run until closed, or until the reconnect policy gives up.
    pub async fn run(mut self) {
        let addr = self.config.addr();
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            let stream = match self.connect(&addr).await {
                Ok(stream) => stream,
                Err(Exit::Close) => break,
                Err(Exit::Lost(e)) => {
                    failures += 1;
                    self.set_state(ConnectionState::Disconnected);
                    if !self.config.reconnect.allows(failures) {
                        warn!("giving up on {} after {} failed attempts: {}", addr, failures, e);
                        break;
                    }
                    let delay = self.config.reconnect.delay();
                    warn!(
                        "connect to {} failed (attempt {}): {}; retrying in {:?}",
                        addr, failures, e, delay
                    );
                    if self.idle(delay).await {
                        break;
                    }
                    continue;
                }
            };

            failures = 0;
            info!("connected to {}", addr);
            self.set_state(ConnectionState::Connected);

            match self.serve(stream).await {
                Exit::Close => break,
                Exit::Lost(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let drained = self.pipeline.reset("Reset");
                    warn!(
                        "connection to {} lost: {}; {} in-flight command(s) reset",
                        addr, e, drained
                    );
                }
            }
        }

        self.shutdown();
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("connection state {:?} -> {:?}", prev, next);
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Handle a request that arrived while no socket is usable.
    fn reject(&mut self, request: Option<Request>) -> Option<Exit> {
        match request {
            Some(Request::Command(cmd)) => {
                let state = self.current_state();
                debug!("rejecting {} while {:?}", cmd.name(), state);
                cmd.fail(RedpipeError::NotConnected(format!(
                    "connection is {state:?}"
                )));
                None
            }
            Some(Request::Close(ack)) => {
                self.close_acks.push(ack);
                Some(Exit::Close)
            }
            None => Some(Exit::Close),
        }
    }

    /// One connect attempt, bounded by the connect timeout.
    async fn connect(&mut self, addr: &str) -> std::result::Result<TcpStream, Exit> {
        let timeout = self.config.connect_timeout();
        let attempt = tokio::time::timeout(timeout, TcpStream::connect(addr));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                res = &mut attempt => {
                    return match res {
                        Ok(Ok(stream)) => Ok(stream),
                        Ok(Err(e)) => Err(Exit::Lost(e.into())),
                        Err(_) => Err(Exit::Lost(RedpipeError::Timeout(format!(
                            "connection to {addr} timed out after {timeout:?}"
                        )))),
                    };
                }
                req = self.requests.recv() => {
                    if let Some(exit) = self.reject(req) {
                        return Err(exit);
                    }
                }
            }
        }
    }

    /// Wait out the reconnect delay, rejecting commands meanwhile.
    ///
    /// Returns `true` if the driver should close instead of retrying.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                req = self.requests.recv() => {
                    if self.reject(req).is_some() {
                        return true;
                    }
                }
            }
        }
    }

    /// Pump commands out and replies in until the connection ends.
    async fn serve(&mut self, stream: TcpStream) -> Exit {
        if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
            return Exit::Lost(e.into());
        }
        let (mut reader, mut writer) = stream.into_split();
        let mut outgoing = BytesMut::with_capacity(4096);

        if self.config.db != 0 {
            let db = self.config.db.to_string();
            let select = Command::internal(&["SELECT", db.as_str()], OutputKind::Status);
            self.pipeline.enqueue(select, &mut outgoing);
        }

        loop {
            tokio::select! {
                req = self.requests.recv() => match req {
                    Some(Request::Command(cmd)) => {
                        self.pipeline.enqueue(cmd, &mut outgoing);
                    }
                    Some(Request::Close(ack)) => {
                        self.close_acks.push(ack);
                        self.set_state(ConnectionState::Closing);
                        let _ = writer.shutdown().await;
                        return Exit::Close;
                    }
                    None => {
                        self.set_state(ConnectionState::Closing);
                        let _ = writer.shutdown().await;
                        return Exit::Close;
                    }
                },
                res = writer.write_buf(&mut outgoing), if !outgoing.is_empty() => match res {
                    Ok(0) => return Exit::Lost(write_zero()),
                    Ok(_) => {}
                    Err(e) => return Exit::Lost(e.into()),
                },
                res = self.pipeline.buffer_mut().read_from(&mut reader) => match res {
                    Ok(0) => return Exit::Lost(eof()),
                    Ok(_) => {
                        if let Err(e) = self.pipeline.decode_replies() {
                            error!("closing connection on protocol error: {}", e);
                            return Exit::Lost(e);
                        }
                    }
                    Err(e) => {
                        if matches!(e, RedpipeError::Protocol(_)) {
                            error!("closing connection on protocol error: {}", e);
                        }
                        return Exit::Lost(e);
                    }
                },
            }
        }
    }

    /// Fail everything still pending and publish `Closed`.
    fn shutdown(&mut self) {
        if self.current_state() != ConnectionState::Closing {
            self.set_state(ConnectionState::Closing);
        }
        let drained = self.pipeline.reset("connection closed");
        if drained > 0 {
            warn!("{} in-flight command(s) reset on close", drained);
        }

        self.requests.close();
        self.set_state(ConnectionState::Closed);
        while let Ok(req) = self.requests.try_recv() {
            self.reject(Some(req));
        }
        for ack in self.close_acks.drain(..) {
            let _ = ack.send(());
        }
        info!("connection to {} closed", self.config.addr());
    }
}

fn eof() -> RedpipeError {
    RedpipeError::Connection(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed by server",
    ))
}

fn write_zero() -> RedpipeError {
    RedpipeError::Connection(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        "socket accepted no bytes",
    ))
}

/// Spawn-ready driver plus the handles that talk to it.
pub fn channel(
    config: ClientConfig,
) -> (
    Driver,
    mpsc::UnboundedSender<Request>,
    watch::Receiver<ConnectionState>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    (Driver::new(config, rx, state_tx), tx, state_rx)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::output::Reply;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config_for(addr: std::net::SocketAddr) -> ClientConfig {
        let mut config = ClientConfig::new(addr.ip().to_string(), addr.port());
        config.reconnect = ReconnectPolicy {
            delay_ms: 20,
            max_attempts: Some(2),
        };
        config.connect_timeout_ms = 500;
        config
    }

    async fn wait_for(state: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == want))
            .await
            .expect("state change timed out")
            .expect("driver dropped");
    }

    #[tokio::test]
    async fn serves_pipelined_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            // SET + GET frames: 27 + 20 bytes.
            while seen.len() < 47 {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"+OK\r\n$1\r\nv\r\n").await.unwrap();
            let _ = socket.read(&mut buf).await;
        });

        let (driver, tx, mut state) = channel(config_for(addr));
        let task = tokio::spawn(driver.run());
        wait_for(&mut state, ConnectionState::Connected).await;

        let (set, set_rx) = Command::new(&["SET", "k", "v"], OutputKind::Status);
        let (get, get_rx) = Command::new(&["GET", "k"], OutputKind::Value);
        tx.send(Request::Command(set)).unwrap();
        tx.send(Request::Command(get)).unwrap();

        assert_eq!(set_rx.await.unwrap().unwrap(), Reply::Status("OK".into()));
        assert_eq!(
            get_rx.await.unwrap().unwrap(),
            Reply::Value(Some(bytes::Bytes::from_static(b"v")))
        );

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Request::Close(ack_tx)).unwrap();
        ack_rx.await.unwrap();
        task.await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (driver, tx, mut state) = channel(config_for(addr));
        let task = tokio::spawn(driver.run());
        wait_for(&mut state, ConnectionState::Closed).await;
        task.await.unwrap();

        let (cmd, rx) = Command::new(&["PING"], OutputKind::Status);
        assert!(tx.send(Request::Command(cmd)).is_err());
        drop(rx);
    }

    #[tokio::test]
    async fn dropping_handles_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            while socket.read(&mut buf).await.unwrap_or(0) > 0 {}
        });

        let (driver, tx, mut state) = channel(config_for(addr));
        let task = tokio::spawn(driver.run());
        wait_for(&mut state, ConnectionState::Connected).await;
        drop(tx);
        task.await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Closed);
    }

    #[test]
    fn only_connected_is_writable() {
        assert!(ConnectionState::Connected.is_writable());
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            assert!(!state.is_writable());
        }
    }
}

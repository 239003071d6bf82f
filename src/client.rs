//! Caller-facing client handle.
//!
//! A [`RedisClient`] is a cheap, cloneable handle onto one pipelined
//! connection. Submitting a command encodes it on the caller's thread and
//! hands it to the connection driver; the returned [`RedisFuture`] resolves
//! when the reply at that command's position in the stream has been decoded.
//! Dropping every handle closes the connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::codec::{RedisCodec, Utf8Codec};
use crate::command::{Command, CommandArgs, RedisFuture};
use crate::config::ClientConfig;
use crate::connection::driver::{self, ConnectionState, Request};
use crate::error::{RedpipeError, Result};
use crate::output::{OutputKind, Reply};
use crate::runtime;

pub struct RedisClient<C: RedisCodec = Utf8Codec> {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ConnectionState>,
    codec: Arc<C>,
    config: Arc<ClientConfig>,
}

impl<C: RedisCodec> Clone for RedisClient<C> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            state: self.state.clone(),
            codec: Arc::clone(&self.codec),
            config: Arc::clone(&self.config),
        }
    }
}

impl<C: RedisCodec> std::fmt::Debug for RedisClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("addr", &self.config.addr())
            .field("state", &self.state())
            .finish()
    }
}

impl<C: RedisCodec> RedisClient<C> {
    /// Start the connection driver without waiting for it to connect.
    ///
    /// Runs on the current tokio runtime when there is one, otherwise on the
    /// crate's shared runtime.
    pub fn spawn(config: ClientConfig, codec: C) -> Result<Self> {
        config.validate()?;
        let (driver, requests, state) = driver::channel(config.clone());
        spawn_task(driver.run());
        Ok(Self {
            requests,
            state,
            codec: Arc::new(codec),
            config: Arc::new(config),
        })
    }

    /// Start the driver and wait for the first successful connect.
    ///
    /// On failure the half-built client is dropped, which stops its driver.
    pub async fn connect(config: ClientConfig, codec: C) -> Result<Self> {
        let client = Self::spawn(config, codec)?;
        let timeout = client.config.connect_timeout() + Duration::from_millis(100);
        let addr = client.config.addr();
        match client
            .wait_until(|s| s != ConnectionState::Connecting, timeout)
            .await?
        {
            ConnectionState::Connected => Ok(client),
            state => Err(RedpipeError::NotConnected(format!(
                "could not connect to {addr} (connection is {state:?})"
            ))),
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_writable()
    }

    /// Wait until the connection reaches `target`.
    ///
    /// Fails early if the connection is closed for good.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> Result<()> {
        let reached = self
            .wait_until(|s| s == target || s == ConnectionState::Closed, timeout)
            .await?;
        if reached == target {
            Ok(())
        } else {
            Err(RedpipeError::NotConnected(format!(
                "connection is {reached:?}"
            )))
        }
    }

    async fn wait_until<F>(&self, pred: F, timeout: Duration) -> Result<ConnectionState>
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(timeout, state.wait_for(|s| pred(*s)))
            .await
            .map(|res| res.map(|seen| *seen));
        match reached {
            Ok(Ok(seen)) => Ok(seen),
            // Driver gone; its last published state is final.
            Ok(Err(_)) => Ok(*state.borrow()),
            Err(_) => Err(RedpipeError::Timeout(format!(
                "connection state unchanged after {timeout:?} (currently {:?})",
                *state.borrow()
            ))),
        }
    }

    /// Start building a command whose keys and values use this client's codec.
    pub fn args(&self, name: &str) -> CommandArgs<'_, C> {
        CommandArgs::new(&self.codec, name)
    }

    /// Send a command expecting a reply of shape `kind`.
    pub fn submit(&self, args: CommandArgs<'_, C>, kind: OutputKind) -> RedisFuture<Reply> {
        let (cmd, rx) = args.into_command(kind);
        self.dispatch(cmd, rx)
    }

    /// Send pre-encoded arguments (command name first).
    pub fn submit_raw<A: AsRef<[u8]>>(&self, args: &[A], kind: OutputKind) -> RedisFuture<Reply> {
        let (cmd, rx) = Command::new(args, kind);
        self.dispatch(cmd, rx)
    }

    pub(crate) fn codec_handle(&self) -> Arc<C> {
        Arc::clone(&self.codec)
    }

    fn dispatch(&self, cmd: Command, rx: oneshot::Receiver<Result<Reply>>) -> RedisFuture<Reply> {
        let future = RedisFuture::new(rx, self.config.command_timeout());
        let state = self.state();
        if !state.is_writable() {
            debug!("{} not written, connection is {:?}", cmd.name(), state);
            cmd.fail(RedpipeError::NotConnected(format!(
                "connection is {state:?}"
            )));
            return future;
        }
        if let Err(mpsc::error::SendError(Request::Command(cmd))) =
            self.requests.send(Request::Command(cmd))
        {
            cmd.fail(RedpipeError::NotConnected("connection closed".into()));
        }
        future
    }

    /// Close the connection. In-flight commands fail with a reset error and
    /// later submissions fail with [`RedpipeError::NotConnected`].
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.requests.send(Request::Close(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

fn spawn_task<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            runtime::spawn(future);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

//! Commands and the futures callers wait on.
//!
//! A [`Command`] is the unit the connection driver owns while a request is in
//! flight: the encoded frame, the output it decodes into, and the sending half
//! of a oneshot channel. Completing a command consumes it, so a reply can be
//! delivered at most once. The receiving half lives in a [`RedisFuture`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::codec::RedisCodec;
use crate::error::{RedpipeError, Result};
use crate::output::{CommandOutput, OutputKind, Reply};
use crate::resp::writer::encode_command;
use crate::runtime;

type Completion = oneshot::Sender<Result<Reply>>;

/// One request waiting for its reply.
#[derive(Debug)]
pub struct Command {
    name: String,
    frame: Bytes,
    output: CommandOutput,
    /// `None` for commands the driver issues itself (e.g. `SELECT`).
    completion: Option<Completion>,
}

impl Command {
    /// Build a command and the receiver its result will be delivered to.
    pub fn new<A: AsRef<[u8]>>(
        args: &[A],
        kind: OutputKind,
    ) -> (Self, oneshot::Receiver<Result<Reply>>) {
        let (tx, rx) = oneshot::channel();
        let mut cmd = Self::internal(args, kind);
        cmd.completion = Some(tx);
        (cmd, rx)
    }

    /// A command nobody waits on; errors are only logged.
    pub fn internal<A: AsRef<[u8]>>(args: &[A], kind: OutputKind) -> Self {
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a.as_ref()).to_ascii_uppercase())
            .unwrap_or_default();
        Self {
            name,
            frame: encode_command(args).freeze(),
            output: CommandOutput::new(kind),
            completion: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded request bytes.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    pub fn output_mut(&mut self) -> &mut CommandOutput {
        &mut self.output
    }

    /// True once the caller has dropped or cancelled its future.
    pub fn is_cancelled(&self) -> bool {
        self.completion.as_ref().is_some_and(|tx| tx.is_closed())
    }

    /// Finish the output and deliver the result.
    ///
    /// Returns `false` if the caller was no longer listening.
    pub fn complete(self) -> bool {
        let Self {
            name,
            output,
            completion,
            ..
        } = self;
        deliver(&name, completion, output.finish())
    }

    /// Deliver `error` instead of a reply.
    pub fn fail(self, error: RedpipeError) -> bool {
        deliver(&self.name, self.completion, Err(error))
    }
}

fn deliver(name: &str, completion: Option<Completion>, result: Result<Reply>) -> bool {
    match completion {
        Some(tx) => {
            let delivered = tx.send(result).is_ok();
            if !delivered {
                debug!(command = name, "reply discarded, caller stopped waiting");
            }
            delivered
        }
        None => {
            if let Err(e) = result {
                warn!(command = name, error = %e, "internal command failed");
            }
            true
        }
    }
}

// ── Argument builder ───────────────────────────────────────────────

/// Accumulates command arguments, encoding keys and values with a codec.
pub struct CommandArgs<'a, C: RedisCodec> {
    codec: &'a C,
    args: Vec<Bytes>,
}

impl<'a, C: RedisCodec> CommandArgs<'a, C> {
    pub fn new(codec: &'a C, name: &str) -> Self {
        Self {
            codec,
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    /// Raw argument, sent as-is.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    pub fn key(mut self, key: &C::Key) -> Self {
        self.args.push(self.codec.encode_key(key));
        self
    }

    pub fn value(mut self, value: &C::Value) -> Self {
        self.args.push(self.codec.encode_value(value));
        self
    }

    pub fn int(mut self, n: i64) -> Self {
        let mut buf = itoa::Buffer::new();
        self.args.push(Bytes::copy_from_slice(buf.format(n).as_bytes()));
        self
    }

    pub fn keys<'k, I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = &'k C::Key>,
        C::Key: 'k,
    {
        for key in keys {
            self.args.push(self.codec.encode_key(key));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn as_slice(&self) -> &[Bytes] {
        &self.args
    }

    pub fn into_command(self, kind: OutputKind) -> (Command, oneshot::Receiver<Result<Reply>>) {
        Command::new(&self.args, kind)
    }
}

// ── Futures ────────────────────────────────────────────────────────

type ReplyMap<T> = Box<dyn Fn(Reply) -> Result<T> + Send>;

/// The pending result of a submitted command.
///
/// Awaiting it yields the decoded reply. Dropping it, or calling
/// [`cancel`](Self::cancel), tells the driver the reply is no longer wanted;
/// the request itself is not retracted from the server.
pub struct RedisFuture<T> {
    rx: oneshot::Receiver<Result<Reply>>,
    map: ReplyMap<T>,
    /// Result picked up early by `is_done`.
    early: Option<Result<Reply>>,
    cancelled: bool,
    default_timeout: Duration,
}

impl RedisFuture<Reply> {
    pub fn new(rx: oneshot::Receiver<Result<Reply>>, default_timeout: Duration) -> Self {
        Self {
            rx,
            map: Box::new(Ok::<Reply, RedpipeError>),
            early: None,
            cancelled: false,
            default_timeout,
        }
    }

    /// A future that is already failed with `error`.
    pub fn failed(error: RedpipeError, default_timeout: Duration) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self::new(rx, default_timeout)
    }

    /// Convert the reply with `f` once it arrives.
    pub fn map<T, F>(self, f: F) -> RedisFuture<T>
    where
        F: Fn(Reply) -> Result<T> + Send + 'static,
    {
        RedisFuture {
            rx: self.rx,
            map: Box::new(f),
            early: self.early,
            cancelled: self.cancelled,
            default_timeout: self.default_timeout,
        }
    }
}

impl<T> RedisFuture<T> {
    /// Wait at most `timeout`. On expiry the command stays in the pipeline
    /// and its reply is discarded when it arrives.
    pub async fn await_timeout(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => Err(RedpipeError::Timeout(format!(
                "no reply within {timeout:?}"
            ))),
        }
    }

    /// Wait for the configured command timeout.
    pub async fn wait(self) -> Result<T> {
        let timeout = self.default_timeout;
        self.await_timeout(timeout).await
    }

    /// Block the current thread until the reply arrives or `timeout` expires.
    ///
    /// Must not be called from inside an async context.
    pub fn blocking_wait(self, timeout: Duration) -> Result<T> {
        runtime::block_on(self.await_timeout(timeout))
    }

    /// Stop waiting; the future resolves to [`RedpipeError::Cancelled`].
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.early = None;
        self.rx.close();
    }

    /// True when polling would not block.
    pub fn is_done(&mut self) -> bool {
        if self.cancelled || self.early.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.early = Some(result);
                true
            }
            Err(oneshot::error::TryRecvError::Empty) => false,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.early = Some(Err(dropped()));
                true
            }
        }
    }
}

fn dropped() -> RedpipeError {
    RedpipeError::Reset("command dropped before a reply arrived".into())
}

impl<T> Future for RedisFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.cancelled {
            return Poll::Ready(Err(RedpipeError::Cancelled));
        }
        let result = match this.early.take() {
            Some(result) => result,
            None => match Pin::new(&mut this.rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(result)) => result,
                Poll::Ready(Err(_)) => Err(dropped()),
            },
        };
        Poll::Ready(result.and_then(|reply| (this.map)(reply)))
    }
}

impl<T> std::fmt::Debug for RedisFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFuture")
            .field("cancelled", &self.cancelled)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

//! In-flight command queue and the decode loop.
//!
//! RESP replies carry no request id: the N-th complete reply belongs to the
//! N-th command still queued. The pipeline owns the queue, the receive
//! buffer and the decoder continuation for one connection and is only ever
//! touched by that connection's driver task.

use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{RedpipeError, Result};
use crate::resp::buffer::ReceiveBuffer;
use crate::resp::decoder::RespStateMachine;

pub struct Pipeline {
    queue: VecDeque<Command>,
    buffer: ReceiveBuffer,
    rsm: RespStateMachine,
}

impl Pipeline {
    pub fn new(buffer: ReceiveBuffer) -> Self {
        Self {
            queue: VecDeque::new(),
            buffer,
            rsm: RespStateMachine::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(ReceiveBuffer::new(
            config.read_buffer_capacity,
            config.max_buffer_size,
            config.reclaim_ratio,
        ))
    }

    /// Commands written and still waiting for a reply.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ReceiveBuffer {
        &mut self.buffer
    }

    /// Queue `cmd` and append its frame to `outgoing`.
    ///
    /// A command the caller already gave up on is neither written nor
    /// queued. The one check decides both, so every frame on the wire has
    /// exactly one queue slot. Returns whether it was queued.
    pub fn enqueue(&mut self, cmd: Command, outgoing: &mut BytesMut) -> bool {
        if cmd.is_cancelled() {
            debug!(command = cmd.name(), "skipping cancelled command");
            return false;
        }
        debug!(command = cmd.name(), "sending");
        outgoing.extend_from_slice(cmd.frame());
        self.queue.push_back(cmd);
        true
    }

    /// Append received bytes and decode whatever replies they complete.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize> {
        self.buffer.extend_from_slice(data)?;
        self.decode_replies()
    }

    /// Complete queued commands from buffered bytes, in order.
    ///
    /// Stops at the first incomplete reply; its bytes stay buffered. Returns
    /// the number of commands completed. Bytes that arrive with nothing
    /// queued cannot belong to any command and are a protocol error. A
    /// protocol error leaves the queue as it is; the caller is expected to
    /// [`reset`](Self::reset).
    pub fn decode_replies(&mut self) -> Result<usize> {
        let mut completed = 0;
        let outcome = loop {
            if !self.buffer.is_readable() {
                break Ok(());
            }
            let Some(head) = self.queue.front_mut() else {
                let stray = self.buffer.unread().len();
                warn!(bytes = stray, "received data with no command in flight");
                break Err(RedpipeError::Protocol(format!(
                    "{stray} byte(s) received with no command in flight"
                )));
            };
            match self.rsm.decode(&mut self.buffer, head.output_mut()) {
                Ok(true) => {
                    if let Some(cmd) = self.queue.pop_front() {
                        debug!(command = cmd.name(), "reply complete");
                        cmd.complete();
                    }
                    completed += 1;
                }
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.buffer.reclaim_if_needed();
        outcome.map(|()| completed)
    }

    /// Fail every queued command with a reset error and forget partial input.
    ///
    /// Returns the number of commands drained.
    pub fn reset(&mut self, reason: &str) -> usize {
        let drained = self.queue.len();
        for cmd in self.queue.drain(..) {
            cmd.fail(RedpipeError::Reset(reason.to_string()));
        }
        self.buffer.clear();
        self.rsm.reset();
        drained
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputKind, Reply};
    use crate::resp::writer::encode_command;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    type Rx = oneshot::Receiver<Result<Reply>>;

    fn pipeline() -> Pipeline {
        Pipeline::new(ReceiveBuffer::new(64, 1024 * 1024, 0.8))
    }

    fn submit(p: &mut Pipeline, args: &[&str], kind: OutputKind) -> Rx {
        let (cmd, rx) = Command::new(args, kind);
        let mut out = BytesMut::new();
        assert!(p.enqueue(cmd, &mut out));
        assert_eq!(&out[..], &encode_command(args)[..]);
        rx
    }

    fn value(s: &'static str) -> Reply {
        Reply::Value(Some(Bytes::from_static(s.as_bytes())))
    }

    #[test]
    fn concatenated_replies_resolve_in_order() {
        let mut p = pipeline();
        let mut set = submit(&mut p, &["SET", "k", "v"], OutputKind::Status);
        let mut get = submit(&mut p, &["GET", "k"], OutputKind::Value);

        assert_eq!(p.feed(b"+OK\r\n$1\r\nv\r\n").unwrap(), 2);
        assert!(p.is_empty());
        assert_eq!(set.try_recv().unwrap().unwrap(), Reply::Status("OK".into()));
        assert_eq!(get.try_recv().unwrap().unwrap(), value("v"));
    }

    #[test]
    fn missing_key_is_no_value() {
        let mut p = pipeline();
        let mut get = submit(&mut p, &["GET", "missing"], OutputKind::Value);
        p.feed(b"$-1\r\n").unwrap();
        assert_eq!(get.try_recv().unwrap().unwrap(), Reply::Value(None));
    }

    #[test]
    fn fifo_under_any_fragmentation() {
        let replies: &[u8] = b"+OK\r\n:42\r\n$5\r\nhello\r\n$-1\r\n*2\r\n$1\r\na\r\n$1\r\n1\r\n-ERR nope\r\n";
        let expected = [
            Ok(Reply::Status("OK".into())),
            Ok(Reply::Integer(42)),
            Ok(value("hello")),
            Ok(Reply::Value(None)),
            Ok(Reply::Map(vec![(
                Bytes::from_static(b"a"),
                Bytes::from_static(b"1"),
            )])),
            Err("redis error: ERR nope".to_string()),
        ];
        let kinds = [
            OutputKind::Status,
            OutputKind::Integer,
            OutputKind::Value,
            OutputKind::Value,
            OutputKind::Map,
            OutputKind::Status,
        ];

        for chunk in 1..=replies.len() {
            let mut p = Pipeline::new(ReceiveBuffer::new(8, 1024, 0.8));
            let mut rxs: Vec<Rx> = kinds.iter().map(|&k| submit(&mut p, &["X"], k)).collect();
            for piece in replies.chunks(chunk) {
                p.feed(piece).unwrap();
            }
            assert!(p.is_empty(), "chunk size {chunk}");
            for (rx, want) in rxs.iter_mut().zip(&expected) {
                let got = rx.try_recv().unwrap().map_err(|e| e.to_string());
                assert_eq!(&got, want, "chunk size {chunk}");
            }
        }
    }

    #[test]
    fn partial_reply_waits_for_more() {
        let mut p = pipeline();
        let mut get = submit(&mut p, &["GET", "k"], OutputKind::Value);
        assert_eq!(p.feed(b"$5\r\nhel").unwrap(), 0);
        assert_eq!(p.len(), 1);
        assert!(get.try_recv().is_err());
        assert_eq!(p.feed(b"lo\r\n").unwrap(), 1);
        assert_eq!(get.try_recv().unwrap().unwrap(), value("hello"));
    }

    #[test]
    fn error_reply_keeps_pipeline_going() {
        let mut p = pipeline();
        let mut bad = submit(&mut p, &["INCR", "s"], OutputKind::Integer);
        let mut good = submit(&mut p, &["PING"], OutputKind::Status);
        p.feed(b"-WRONGTYPE Operation against a key\r\n+PONG\r\n").unwrap();
        assert!(bad.try_recv().unwrap().is_err());
        assert_eq!(good.try_recv().unwrap().unwrap(), Reply::Status("PONG".into()));
    }

    #[test]
    fn shape_mismatch_does_not_desync() {
        let mut p = pipeline();
        let mut wrong = submit(&mut p, &["GET", "k"], OutputKind::Integer);
        let mut next = submit(&mut p, &["PING"], OutputKind::Status);
        p.feed(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n+PONG\r\n").unwrap();
        assert!(matches!(
            wrong.try_recv().unwrap(),
            Err(RedpipeError::Type(_))
        ));
        assert_eq!(next.try_recv().unwrap().unwrap(), Reply::Status("PONG".into()));
    }

    #[test]
    fn cancelled_command_is_not_queued() {
        let mut p = pipeline();
        let (cmd, rx) = Command::new(&["GET", "k"], OutputKind::Value);
        drop(rx);
        let mut out = BytesMut::new();
        assert!(!p.enqueue(cmd, &mut out));
        assert!(p.is_empty());
        assert!(out.is_empty(), "a frame was written for an unqueued command");
    }

    #[test]
    fn dropped_after_write_still_owns_its_reply() {
        let mut p = pipeline();
        let mut out = BytesMut::new();
        let (a, a_rx) = Command::new(&["GET", "a"], OutputKind::Value);
        assert!(p.enqueue(a, &mut out));
        // Caller gives up once the frame is already on its way.
        drop(a_rx);
        let (b, mut b_rx) = Command::new(&["GET", "b"], OutputKind::Value);
        assert!(p.enqueue(b, &mut out));

        assert_eq!(&out[..], b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\n");
        assert_eq!(p.feed(b"$1\r\nA\r\n$1\r\nB\r\n").unwrap(), 2);
        assert_eq!(b_rx.try_recv().unwrap().unwrap(), value("B"));
    }

    #[test]
    fn reply_for_abandoned_command_is_discarded() {
        let mut p = pipeline();
        let abandoned = submit(&mut p, &["GET", "a"], OutputKind::Value);
        let mut kept = submit(&mut p, &["GET", "b"], OutputKind::Value);
        drop(abandoned);
        assert_eq!(p.feed(b"$1\r\n1\r\n$1\r\n2\r\n").unwrap(), 2);
        assert_eq!(kept.try_recv().unwrap().unwrap(), value("2"));
    }

    #[test]
    fn reset_drains_every_command() {
        let mut p = pipeline();
        let mut rxs: Vec<Rx> = (0..5)
            .map(|_| submit(&mut p, &["GET", "k"], OutputKind::Value))
            .collect();
        p.feed(b"$3\r\nab").unwrap();

        assert_eq!(p.reset("Reset"), 5);
        assert!(p.is_empty());
        assert!(!p.buffer().is_readable());
        for rx in &mut rxs {
            assert!(rx.try_recv().unwrap().unwrap_err().is_reset());
        }

        // Decoder continuation is gone too.
        let mut fresh = submit(&mut p, &["PING"], OutputKind::Status);
        p.feed(b"+PONG\r\n").unwrap();
        assert_eq!(fresh.try_recv().unwrap().unwrap(), Reply::Status("PONG".into()));
    }

    #[test]
    fn protocol_error_is_returned() {
        let mut p = pipeline();
        let _rx = submit(&mut p, &["PING"], OutputKind::Status);
        assert!(matches!(p.feed(b"?junk\r\n"), Err(RedpipeError::Protocol(_))));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn stray_bytes_with_empty_queue_are_a_protocol_error() {
        let mut p = pipeline();
        assert!(matches!(p.feed(b"+PONG\r\n"), Err(RedpipeError::Protocol(_))));
        p.reset("Reset");

        // After the reset the next command gets its own reply.
        let mut get = submit(&mut p, &["GET", "k"], OutputKind::Value);
        assert_eq!(p.feed(b"$1\r\nv\r\n").unwrap(), 1);
        assert_eq!(get.try_recv().unwrap().unwrap(), value("v"));
        assert!(!p.buffer().is_readable());
    }

    #[test]
    fn surplus_reply_after_queue_drains_is_a_protocol_error() {
        let mut p = pipeline();
        let mut ping = submit(&mut p, &["PING"], OutputKind::Status);
        assert!(matches!(
            p.feed(b"+PONG\r\n+EXTRA\r\n"),
            Err(RedpipeError::Protocol(_))
        ));
        assert_eq!(ping.try_recv().unwrap().unwrap(), Reply::Status("PONG".into()));
    }

    #[test]
    fn reclaim_does_not_change_results() {
        // Tiny buffer so compaction runs between most reads.
        let mut p = Pipeline::new(ReceiveBuffer::new(16, 1024, 0.8));
        let mut rxs: Vec<Rx> = (0..50)
            .map(|_| submit(&mut p, &["INCR", "n"], OutputKind::Integer))
            .collect();
        let mut wire = Vec::new();
        for i in 0..50 {
            wire.extend_from_slice(format!(":{i}\r\n").as_bytes());
        }
        for piece in wire.chunks(3) {
            p.feed(piece).unwrap();
        }
        for (i, rx) in rxs.iter_mut().enumerate() {
            assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Integer(i as i64));
        }
        assert!(p.buffer().read_cursor() < wire.len());
    }
}

//! Resumable RESP2 reply decoder.
//!
//! [`RespStateMachine::decode`] reads as many complete tokens as the
//! [`ReceiveBuffer`] holds and feeds them to a [`CommandOutput`]:
//!
//! - `Ok(true)`: the reply is complete; the output holds its value or error.
//! - `Ok(false)`: more bytes are needed. Nothing past the last complete token
//!   has been consumed, and the machine remembers where it stopped (pending
//!   bulk length, open arrays and their remaining element counts) so the next
//!   call picks up from there.
//! - `Err(Protocol)`: the stream is not valid RESP. A byte stream cannot be
//!   resynchronised, so the caller must drop the connection.

use tracing::trace;

use crate::error::{RedpipeError, Result};
use crate::output::CommandOutput;
use crate::resp::buffer::ReceiveBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Waiting for the type prefix byte.
    Type,
    Status,
    Error,
    Integer,
    BulkLen,
    /// Header consumed; waiting for `len` bytes plus `\r\n`.
    BulkBody(usize),
    ArrayLen,
    /// Open array with elements still to come; its child is above it.
    Array { remaining: usize },
}

#[derive(Debug, Default)]
pub struct RespStateMachine {
    stack: Vec<Step>,
}

impl RespStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a reply is partially decoded.
    pub fn in_progress(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Forget any partial reply.
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// Advance `output` with whatever `buf` holds.
    pub fn decode(&mut self, buf: &mut ReceiveBuffer, output: &mut CommandOutput) -> Result<bool> {
        if self.stack.is_empty() {
            self.stack.push(Step::Type);
        }

        while let Some(&step) = self.stack.last() {
            // Every frame below the top is an open array.
            let depth = self.stack.len() - 1;

            match step {
                Step::Type => {
                    let Some(prefix) = buf.peek_byte() else {
                        return Ok(false);
                    };
                    let next = match prefix {
                        b'+' => Step::Status,
                        b'-' => Step::Error,
                        b':' => Step::Integer,
                        b'$' => Step::BulkLen,
                        b'*' => Step::ArrayLen,
                        other => {
                            return Err(RedpipeError::Protocol(format!(
                                "unknown RESP type byte: 0x{other:02x}"
                            )));
                        }
                    };
                    buf.advance(1);
                    self.replace_top(next);
                }
                Step::Status => {
                    let Some(len) = buf.line_len()? else {
                        return Ok(false);
                    };
                    output.on_status(&buf.unread()[..len], depth);
                    buf.advance(len + 2);
                    self.complete_value();
                }
                Step::Error => {
                    let Some(len) = buf.line_len()? else {
                        return Ok(false);
                    };
                    output.on_error(&buf.unread()[..len], depth);
                    buf.advance(len + 2);
                    self.complete_value();
                }
                Step::Integer => {
                    let Some(value) = read_int_line(buf)? else {
                        return Ok(false);
                    };
                    output.on_integer(value, depth);
                    self.complete_value();
                }
                Step::BulkLen => {
                    let Some(len) = read_int_line(buf)? else {
                        return Ok(false);
                    };
                    match len {
                        -1 => {
                            output.on_bulk(None, depth);
                            self.complete_value();
                        }
                        len if len < 0 => {
                            return Err(RedpipeError::Protocol(format!(
                                "invalid bulk string length: {len}"
                            )));
                        }
                        len => self.replace_top(Step::BulkBody(len as usize)),
                    }
                }
                Step::BulkBody(len) => {
                    let window = buf.unread();
                    if window.len() < len + 2 {
                        return Ok(false);
                    }
                    if window[len] != b'\r' || window[len + 1] != b'\n' {
                        return Err(RedpipeError::Protocol(
                            "bulk string not terminated by \\r\\n".into(),
                        ));
                    }
                    output.on_bulk(Some(&window[..len]), depth);
                    buf.advance(len + 2);
                    self.complete_value();
                }
                Step::ArrayLen => {
                    let Some(count) = read_int_line(buf)? else {
                        return Ok(false);
                    };
                    match count {
                        -1 => {
                            output.on_array(None, depth);
                            self.complete_value();
                        }
                        count if count < 0 => {
                            return Err(RedpipeError::Protocol(format!(
                                "invalid array length: {count}"
                            )));
                        }
                        0 => {
                            output.on_array(Some(0), depth);
                            self.complete_value();
                        }
                        count => {
                            let count = count as usize;
                            output.on_array(Some(count), depth);
                            self.replace_top(Step::Array { remaining: count });
                            self.stack.push(Step::Type);
                        }
                    }
                }
                Step::Array { .. } => {
                    return Err(RedpipeError::Protocol(
                        "decoder lost track of an open array".into(),
                    ));
                }
            }
        }

        trace!("reply complete");
        Ok(true)
    }

    fn replace_top(&mut self, step: Step) {
        if let Some(top) = self.stack.last_mut() {
            *top = step;
        }
    }

    /// Pop the finished value and close every array it completes.
    fn complete_value(&mut self) {
        self.stack.pop();
        while let Some(Step::Array { remaining }) = self.stack.last_mut() {
            *remaining -= 1;
            if *remaining > 0 {
                self.stack.push(Step::Type);
                return;
            }
            self.stack.pop();
        }
    }
}

/// Consume one `<integer>\r\n` line, if it has fully arrived.
fn read_int_line(buf: &mut ReceiveBuffer) -> Result<Option<i64>> {
    let Some(len) = buf.line_len()? else {
        return Ok(None);
    };
    let value = parse_int_from_bytes(&buf.unread()[..len])?;
    buf.advance(len + 2);
    Ok(Some(value))
}

/// Parse an integer from a byte slice (no allocations).
fn parse_int_from_bytes(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Err(RedpipeError::Protocol("empty integer".into()));
    }
    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    if digits.is_empty() {
        return Err(RedpipeError::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative so i64::MIN parses without overflow.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RedpipeError::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| RedpipeError::Protocol("integer overflow".into()))?;
    }

    if negative {
        Ok(n)
    } else {
        n.checked_neg()
            .ok_or_else(|| RedpipeError::Protocol("integer overflow".into()))
    }
}

// ── Tests ──────────────────────────────────────────────────────────

//! Reply accumulators ("outputs").
//!
//! Every command is bound to a [`CommandOutput`] when it is built. The RESP
//! state machine feeds it primitive events (status line, integer, bulk,
//! array header) as tokens arrive, possibly across many socket reads, and
//! the output turns them into one typed [`Reply`] or one error.
//!
//! Events carry the nesting `depth` of the token: `0` for the top-level
//! reply, `1` for elements of a top-level array, and so on.

use bytes::Bytes;
use itoa::Buffer;

use crate::error::{RedpipeError, Result};
use crate::resp::types::RespValue;

/// Reply shape a command expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Simple string such as `OK`.
    Status,
    /// 64-bit integer.
    Integer,
    /// Integer 0/1, or nil.
    Boolean,
    /// One bulk string, or nil.
    Value,
    /// Array of bulk strings, each possibly nil.
    ValueList,
    /// Array of bulk strings decoded as keys.
    KeyList,
    /// Array of alternating key/value bulk strings.
    Map,
    /// Anything; the body is discarded.
    Void,
    /// Anything; kept as a [`RespValue`] tree.
    Raw,
}

/// Final value of a command, before codec decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Integer(i64),
    Boolean(Option<bool>),
    Value(Option<Bytes>),
    Values(Vec<Option<Bytes>>),
    Keys(Vec<Bytes>),
    Map(Vec<(Bytes, Bytes)>),
    Void,
    Raw(RespValue),
}

impl Reply {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Value(_) => "value",
            Self::Values(_) => "values",
            Self::Keys(_) => "keys",
            Self::Map(_) => "map",
            Self::Void => "void",
            Self::Raw(_) => "raw",
        }
    }
}

/// Builds a [`RespValue`] tree for the `Raw` output.
#[derive(Debug, Default)]
struct RawBuilder {
    /// Open arrays: collected elements and how many are still expected.
    open: Vec<(Vec<RespValue>, usize)>,
    root: Option<RespValue>,
}

impl RawBuilder {
    fn push(&mut self, mut value: RespValue) {
        loop {
            let Some((items, remaining)) = self.open.last_mut() else {
                self.root = Some(value);
                return;
            };
            items.push(value);
            *remaining -= 1;
            if *remaining > 0 {
                return;
            }
            // Array is full: close it and push it into its parent.
            let (items, _) = self.open.pop().unwrap_or_default();
            value = RespValue::Array(items);
        }
    }

    fn begin_array(&mut self, len: Option<usize>) {
        match len {
            None => self.push(RespValue::Null),
            Some(0) => self.push(RespValue::Array(Vec::new())),
            Some(n) => self.open.push((Vec::with_capacity(n.min(1024)), n)),
        }
    }
}

#[derive(Debug)]
enum Sink {
    Status(Option<String>),
    Integer(Option<i64>),
    Boolean(Option<Option<bool>>),
    Value(Option<Option<Bytes>>),
    ValueList(Option<Vec<Option<Bytes>>>),
    KeyList(Option<Vec<Bytes>>),
    Map {
        pairs: Option<Vec<(Bytes, Bytes)>>,
        pending_key: Option<Bytes>,
    },
    Void,
    Raw(RawBuilder),
}

/// Accumulator for one command's reply.
#[derive(Debug)]
pub struct CommandOutput {
    sink: Sink,
    error: Option<RedpipeError>,
}

impl CommandOutput {
    pub fn new(kind: OutputKind) -> Self {
        let sink = match kind {
            OutputKind::Status => Sink::Status(None),
            OutputKind::Integer => Sink::Integer(None),
            OutputKind::Boolean => Sink::Boolean(None),
            OutputKind::Value => Sink::Value(None),
            OutputKind::ValueList => Sink::ValueList(None),
            OutputKind::KeyList => Sink::KeyList(None),
            OutputKind::Map => Sink::Map {
                pairs: None,
                pending_key: None,
            },
            OutputKind::Void => Sink::Void,
            OutputKind::Raw => Sink::Raw(RawBuilder::default()),
        };
        Self { sink, error: None }
    }

    pub fn kind(&self) -> OutputKind {
        match self.sink {
            Sink::Status(_) => OutputKind::Status,
            Sink::Integer(_) => OutputKind::Integer,
            Sink::Boolean(_) => OutputKind::Boolean,
            Sink::Value(_) => OutputKind::Value,
            Sink::ValueList(_) => OutputKind::ValueList,
            Sink::KeyList(_) => OutputKind::KeyList,
            Sink::Map { .. } => OutputKind::Map,
            Sink::Void => OutputKind::Void,
            Sink::Raw(_) => OutputKind::Raw,
        }
    }

    /// Record an error; the first one wins.
    pub fn set_error(&mut self, error: RedpipeError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    // ── Decode events ──────────────────────────────────────────────

    pub fn on_status(&mut self, line: &[u8], depth: usize) {
        if self.error.is_some() {
            return;
        }
        let text = String::from_utf8_lossy(line);
        match &mut self.sink {
            Sink::Status(slot) if depth == 0 => *slot = Some(text.into_owned()),
            Sink::Value(slot) if depth == 0 => {
                *slot = Some(Some(Bytes::copy_from_slice(line)));
            }
            Sink::ValueList(Some(items)) if depth == 1 => {
                items.push(Some(Bytes::copy_from_slice(line)));
            }
            Sink::Raw(raw) => raw.push(RespValue::SimpleString(text.into_owned())),
            Sink::Void => {}
            _ => self.mismatch("status", depth),
        }
    }

    /// Top-level errors fail the command; nested ones (e.g. inside EXEC
    /// results) are kept only by the `Raw` output.
    pub fn on_error(&mut self, line: &[u8], depth: usize) {
        let message = String::from_utf8_lossy(line).into_owned();
        match &mut self.sink {
            Sink::Raw(raw) if depth > 0 && self.error.is_none() => {
                raw.push(RespValue::Error(message))
            }
            _ => self.set_error(RedpipeError::redis(message)),
        }
    }

    pub fn on_integer(&mut self, value: i64, depth: usize) {
        if self.error.is_some() {
            return;
        }
        match &mut self.sink {
            Sink::Integer(slot) if depth == 0 => *slot = Some(value),
            Sink::Boolean(slot) if depth == 0 => *slot = Some(Some(value != 0)),
            Sink::ValueList(Some(items)) if depth == 1 => {
                let mut digits = Buffer::new();
                items.push(Some(Bytes::copy_from_slice(digits.format(value).as_bytes())));
            }
            Sink::Raw(raw) => raw.push(RespValue::Integer(value)),
            Sink::Void => {}
            _ => self.mismatch("integer", depth),
        }
    }

    /// A bulk string; `None` is the `$-1` nil, distinct from an empty value.
    pub fn on_bulk(&mut self, data: Option<&[u8]>, depth: usize) {
        if self.error.is_some() {
            return;
        }
        let data = data.map(Bytes::copy_from_slice);
        match &mut self.sink {
            Sink::Value(slot) if depth == 0 => *slot = Some(data),
            Sink::Status(slot) if depth == 0 => match data {
                Some(bytes) => *slot = Some(String::from_utf8_lossy(&bytes).into_owned()),
                None => self.mismatch("nil", depth),
            },
            Sink::Boolean(slot) if depth == 0 && data.is_none() => *slot = Some(None),
            Sink::ValueList(Some(items)) if depth == 1 => items.push(data),
            Sink::KeyList(Some(keys)) if depth == 1 => match data {
                Some(key) => keys.push(key),
                None => self.mismatch("nil", depth),
            },
            Sink::Map {
                pairs: Some(pairs),
                pending_key,
            } if depth == 1 => match (pending_key.take(), data) {
                (None, Some(key)) => *pending_key = Some(key),
                (Some(key), Some(value)) => pairs.push((key, value)),
                (_, None) => self.mismatch("nil", depth),
            },
            Sink::Raw(raw) => raw.push(data.map_or(RespValue::Null, RespValue::BulkString)),
            Sink::Void => {}
            _ => self.mismatch("bulk string", depth),
        }
    }

    /// An array header; `None` is the `*-1` nil array.
    pub fn on_array(&mut self, len: Option<usize>, depth: usize) {
        if self.error.is_some() {
            return;
        }
        match &mut self.sink {
            Sink::ValueList(slot) if depth == 0 => {
                *slot = Some(Vec::with_capacity(len.unwrap_or(0).min(1024)));
            }
            Sink::KeyList(slot) if depth == 0 => {
                *slot = Some(Vec::with_capacity(len.unwrap_or(0).min(1024)));
            }
            Sink::Map { pairs, .. } if depth == 0 => {
                *pairs = Some(Vec::with_capacity(len.unwrap_or(0).min(2048) / 2));
            }
            Sink::Value(slot) if depth == 0 && len.is_none() => *slot = Some(None),
            Sink::Boolean(slot) if depth == 0 && len.is_none() => *slot = Some(None),
            Sink::Raw(raw) => raw.begin_array(len),
            Sink::Void => {}
            _ => self.mismatch("array", depth),
        }
    }

    fn mismatch(&mut self, got: &str, depth: usize) {
        let expected = format!("{:?}", self.kind()).to_lowercase();
        self.set_error(RedpipeError::Type(format!(
            "unexpected {got} at depth {depth} for {expected} output"
        )));
    }

    // ── Completion ─────────────────────────────────────────────────

    /// Consume the accumulator and produce the command's result.
    pub fn finish(self) -> Result<Reply> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let incomplete = |what: &str| RedpipeError::Type(format!("no {what} reply received"));
        match self.sink {
            Sink::Status(value) => value.map(Reply::Status).ok_or_else(|| incomplete("status")),
            Sink::Integer(value) => value.map(Reply::Integer).ok_or_else(|| incomplete("integer")),
            Sink::Boolean(value) => value.map(Reply::Boolean).ok_or_else(|| incomplete("boolean")),
            Sink::Value(value) => value.map(Reply::Value).ok_or_else(|| incomplete("value")),
            Sink::ValueList(items) => {
                items.map(Reply::Values).ok_or_else(|| incomplete("array"))
            }
            Sink::KeyList(keys) => keys.map(Reply::Keys).ok_or_else(|| incomplete("array")),
            Sink::Map { pairs, pending_key } => {
                if pending_key.is_some() {
                    return Err(RedpipeError::Type(
                        "map reply has an odd number of elements".into(),
                    ));
                }
                pairs.map(Reply::Map).ok_or_else(|| incomplete("array"))
            }
            Sink::Void => Ok(Reply::Void),
            Sink::Raw(raw) => raw.root.map(Reply::Raw).ok_or_else(|| incomplete("raw")),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

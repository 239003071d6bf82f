use std::io;

use thiserror::Error;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  RedpipeError
//  ├── Connection      transport failure (connect / read / write)
//  ├── Protocol        malformed RESP frame, fatal for the connection
//  ├── Redis           `-ERR …` reply, the pipeline keeps going
//  ├── Type            reply shape does not fit the bound output
//  ├── Timeout         local wait expired, command not retracted
//  ├── Reset           in flight when the connection went away
//  ├── NotConnected    submitted while not connected
//  ├── Cancelled       caller cancelled the future
//  └── Config          bad configuration / URL

/// Structured Redis error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// EXECABORT Transaction discarded because of previous errors
    ExecAbort,
    /// NOAUTH Authentication required
    NoAuth,
    /// OOM command not allowed when used memory > 'maxmemory'
    Oom,
    /// Any other Redis error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Parse from a Redis error message string (e.g. "WRONGTYPE Operation against…").
    pub fn from_error_msg(msg: &str) -> Self {
        let prefix = msg.split_whitespace().next().unwrap_or("");
        match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "EXECABORT" => Self::ExecAbort,
            "NOAUTH" => Self::NoAuth,
            "OOM" => Self::Oom,
            "" => Self::Other("UNKNOWN".to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

/// All error variants for redpipe.
#[derive(Debug, Error)]
pub enum RedpipeError {
    /// TCP / IO level errors
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    /// RESP protocol parse errors
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Redis returned an error string with structured kind
    #[error("redis error: {message}")]
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
    /// The reply did not match the output the command was built with.
    #[error("type error: {0}")]
    Type(String),
    /// Waiting for the reply timed out
    #[error("timeout: {0}")]
    Timeout(String),
    /// The connection was reset or closed while the command was in flight.
    #[error("connection reset: {0}")]
    Reset(String),
    /// The command was submitted while the connection was not usable.
    #[error("not connected: {0}")]
    NotConnected(String),
    /// The caller cancelled the command before it completed.
    #[error("command cancelled")]
    Cancelled,
    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),
}

impl RedpipeError {
    /// Create a Redis error from a raw error message, auto-parsing the kind.
    pub fn redis(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = RedisErrorKind::from_error_msg(&message);
        Self::Redis { kind, message }
    }

    /// The structured kind when this is a server error reply.
    pub fn redis_kind(&self) -> Option<&RedisErrorKind> {
        match self {
            Self::Redis { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// True when the command was lost to a connection reset.
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Reset(_))
    }

    /// True when the local wait expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, RedpipeError>;

// ── Tests ──────────────────────────────────────────────────────────

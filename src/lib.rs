//! Pipelining Redis client.
//!
//! One TCP connection carries every command. Requests are written back to
//! back without waiting, and replies are matched to commands purely by
//! arrival order. Replies are decoded incrementally as bytes arrive, so a
//! reply split across any number of reads costs no re-parsing.
//!
//! ```ignore
//! use redpipe::{ClientConfig, RedisClient, Utf8Codec};
//!
//! let client = RedisClient::connect(ClientConfig::default(), Utf8Codec).await?;
//! let set = client.set(&"k".into(), &"v".into());
//! let get = client.get(&"k".into());
//! set.await?;
//! assert_eq!(get.await?, Some("v".to_string()));
//! ```

pub mod client;
pub mod codec;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod output;
pub mod resp;
pub mod runtime;

pub use client::RedisClient;
pub use codec::{BytesCodec, RedisCodec, Utf8Codec};
pub use command::{Command, CommandArgs, RedisFuture};
pub use config::{ClientConfig, ReconnectPolicy};
pub use connection::ConnectionState;
pub use error::{RedisErrorKind, RedpipeError, Result};
pub use output::{CommandOutput, OutputKind, Reply};
pub use resp::RespValue;

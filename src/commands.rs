//! Typed command catalog.
//!
//! Each method encodes its arguments through the client's codec, binds the
//! output shape the command replies with, and converts the [`Reply`] into a
//! Rust type. Server error replies surface as [`RedpipeError::Redis`].

use crate::codec::RedisCodec;
use crate::client::RedisClient;
use crate::command::{CommandArgs, RedisFuture};
use crate::error::{RedpipeError, Result};
use crate::output::{OutputKind, Reply};
use crate::resp::types::RespValue;

// ── Reply conversions ──────────────────────────────────────────────

fn unexpected<T>(want: &str, reply: Reply) -> Result<T> {
    Err(RedpipeError::Type(format!(
        "expected {want} reply, got {}",
        reply.type_name()
    )))
}

fn to_ok<C: RedisCodec>(_: &C, reply: Reply) -> Result<()> {
    match reply {
        Reply::Status(s) if s == "OK" => Ok(()),
        Reply::Status(s) => Err(RedpipeError::Type(format!("expected OK, got {s:?}"))),
        other => unexpected("status", other),
    }
}

fn to_status<C: RedisCodec>(_: &C, reply: Reply) -> Result<String> {
    match reply {
        Reply::Status(s) => Ok(s),
        other => unexpected("status", other),
    }
}

fn to_int<C: RedisCodec>(_: &C, reply: Reply) -> Result<i64> {
    match reply {
        Reply::Integer(n) => Ok(n),
        other => unexpected("integer", other),
    }
}

fn to_bool<C: RedisCodec>(_: &C, reply: Reply) -> Result<bool> {
    match reply {
        Reply::Boolean(b) => Ok(b.unwrap_or(false)),
        other => unexpected("boolean", other),
    }
}

fn to_value<C: RedisCodec>(codec: &C, reply: Reply) -> Result<Option<C::Value>> {
    match reply {
        Reply::Value(v) => Ok(v.map(|b| codec.decode_value(&b))),
        other => unexpected("value", other),
    }
}

/// A bulk reply that is never nil (e.g. GETRANGE on a missing key is "").
fn to_present_value<C: RedisCodec>(codec: &C, reply: Reply) -> Result<C::Value> {
    match reply {
        Reply::Value(v) => Ok(codec.decode_value(v.as_deref().unwrap_or_default())),
        other => unexpected("value", other),
    }
}

fn to_values<C: RedisCodec>(codec: &C, reply: Reply) -> Result<Vec<Option<C::Value>>> {
    match reply {
        Reply::Values(items) => Ok(items
            .into_iter()
            .map(|v| v.map(|b| codec.decode_value(&b)))
            .collect()),
        other => unexpected("array", other),
    }
}

/// Array members; nil entries cannot occur for these commands and are skipped.
fn to_members<C: RedisCodec>(codec: &C, reply: Reply) -> Result<Vec<C::Value>> {
    match reply {
        Reply::Values(items) => Ok(items
            .into_iter()
            .flatten()
            .map(|b| codec.decode_value(&b))
            .collect()),
        other => unexpected("array", other),
    }
}

fn to_keys<C: RedisCodec>(codec: &C, reply: Reply) -> Result<Vec<C::Key>> {
    match reply {
        Reply::Keys(keys) => Ok(keys.iter().map(|k| codec.decode_key(k)).collect()),
        other => unexpected("array", other),
    }
}

fn to_map<C: RedisCodec>(codec: &C, reply: Reply) -> Result<Vec<(C::Key, C::Value)>> {
    match reply {
        Reply::Map(pairs) => Ok(pairs
            .iter()
            .map(|(k, v)| (codec.decode_key(k), codec.decode_value(v)))
            .collect()),
        other => unexpected("map", other),
    }
}

fn to_raw(reply: Reply) -> Result<RespValue> {
    match reply {
        Reply::Raw(value) => Ok(value),
        other => unexpected("raw", other),
    }
}

impl<C: RedisCodec> RedisClient<C> {
    fn typed<T, F>(&self, args: CommandArgs<'_, C>, kind: OutputKind, convert: F) -> RedisFuture<T>
    where
        F: Fn(&C, Reply) -> Result<T> + Send + 'static,
    {
        let codec = self.codec_handle();
        self.submit(args, kind).map(move |reply| convert(&*codec, reply))
    }

    /// Send any command and get the reply as a [`RespValue`] tree.
    pub fn execute<A: AsRef<[u8]>>(&self, args: &[A]) -> RedisFuture<RespValue> {
        self.submit_raw(args, OutputKind::Raw).map(to_raw)
    }

    // ── Connection ─────────────────────────────────────────────────

    pub fn ping(&self) -> RedisFuture<String> {
        self.typed(self.args("PING"), OutputKind::Status, to_status::<C>)
    }

    pub fn echo(&self, message: &C::Value) -> RedisFuture<Option<C::Value>> {
        self.typed(self.args("ECHO").value(message), OutputKind::Value, to_value::<C>)
    }

    /// Switch database for this connection. A reconnect goes back to the
    /// configured `db`.
    pub fn select(&self, db: u16) -> RedisFuture<()> {
        self.typed(self.args("SELECT").int(db.into()), OutputKind::Status, to_ok::<C>)
    }

    pub fn dbsize(&self) -> RedisFuture<i64> {
        self.typed(self.args("DBSIZE"), OutputKind::Integer, to_int::<C>)
    }

    pub fn flushdb(&self) -> RedisFuture<()> {
        self.typed(self.args("FLUSHDB"), OutputKind::Status, to_ok::<C>)
    }

    pub fn info(&self, section: Option<&str>) -> RedisFuture<String> {
        let mut args = self.args("INFO");
        if let Some(section) = section {
            args = args.arg(section);
        }
        self.typed(args, OutputKind::Status, to_status::<C>)
    }

    // ── Keys ───────────────────────────────────────────────────────

    pub fn del(&self, keys: &[C::Key]) -> RedisFuture<i64> {
        self.typed(self.args("DEL").keys(keys), OutputKind::Integer, to_int::<C>)
    }

    pub fn unlink(&self, keys: &[C::Key]) -> RedisFuture<i64> {
        self.typed(self.args("UNLINK").keys(keys), OutputKind::Integer, to_int::<C>)
    }

    /// Number of the given keys that exist.
    pub fn exists(&self, keys: &[C::Key]) -> RedisFuture<i64> {
        self.typed(self.args("EXISTS").keys(keys), OutputKind::Integer, to_int::<C>)
    }

    pub fn expire(&self, key: &C::Key, seconds: i64) -> RedisFuture<bool> {
        let args = self.args("EXPIRE").key(key).int(seconds);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    pub fn pexpire(&self, key: &C::Key, millis: i64) -> RedisFuture<bool> {
        let args = self.args("PEXPIRE").key(key).int(millis);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    /// Seconds to live; `-1` without expiry, `-2` if missing.
    pub fn ttl(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("TTL").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn pttl(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("PTTL").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn persist(&self, key: &C::Key) -> RedisFuture<bool> {
        self.typed(self.args("PERSIST").key(key), OutputKind::Boolean, to_bool::<C>)
    }

    pub fn rename(&self, src: &C::Key, dst: &C::Key) -> RedisFuture<()> {
        let args = self.args("RENAME").key(src).key(dst);
        self.typed(args, OutputKind::Status, to_ok::<C>)
    }

    /// `TYPE key`: "string", "list", "none", ...
    pub fn type_of(&self, key: &C::Key) -> RedisFuture<String> {
        self.typed(self.args("TYPE").key(key), OutputKind::Status, to_status::<C>)
    }

    pub fn keys(&self, pattern: &str) -> RedisFuture<Vec<C::Key>> {
        self.typed(self.args("KEYS").arg(pattern), OutputKind::KeyList, to_keys::<C>)
    }

    // ── Strings ────────────────────────────────────────────────────

    pub fn get(&self, key: &C::Key) -> RedisFuture<Option<C::Value>> {
        self.typed(self.args("GET").key(key), OutputKind::Value, to_value::<C>)
    }

    pub fn set(&self, key: &C::Key, value: &C::Value) -> RedisFuture<()> {
        let args = self.args("SET").key(key).value(value);
        self.typed(args, OutputKind::Status, to_ok::<C>)
    }

    pub fn setex(&self, key: &C::Key, seconds: i64, value: &C::Value) -> RedisFuture<()> {
        let args = self.args("SETEX").key(key).int(seconds).value(value);
        self.typed(args, OutputKind::Status, to_ok::<C>)
    }

    pub fn setnx(&self, key: &C::Key, value: &C::Value) -> RedisFuture<bool> {
        let args = self.args("SETNX").key(key).value(value);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    pub fn getset(&self, key: &C::Key, value: &C::Value) -> RedisFuture<Option<C::Value>> {
        let args = self.args("GETSET").key(key).value(value);
        self.typed(args, OutputKind::Value, to_value::<C>)
    }

    pub fn mget(&self, keys: &[C::Key]) -> RedisFuture<Vec<Option<C::Value>>> {
        self.typed(self.args("MGET").keys(keys), OutputKind::ValueList, to_values::<C>)
    }

    pub fn mset(&self, pairs: &[(C::Key, C::Value)]) -> RedisFuture<()> {
        let mut args = self.args("MSET");
        for (key, value) in pairs {
            args = args.key(key).value(value);
        }
        self.typed(args, OutputKind::Status, to_ok::<C>)
    }

    pub fn incr(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("INCR").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn incrby(&self, key: &C::Key, amount: i64) -> RedisFuture<i64> {
        let args = self.args("INCRBY").key(key).int(amount);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn decr(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("DECR").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn decrby(&self, key: &C::Key, amount: i64) -> RedisFuture<i64> {
        let args = self.args("DECRBY").key(key).int(amount);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    /// Length of the string after appending.
    pub fn append(&self, key: &C::Key, value: &C::Value) -> RedisFuture<i64> {
        let args = self.args("APPEND").key(key).value(value);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn strlen(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("STRLEN").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn getrange(&self, key: &C::Key, start: i64, end: i64) -> RedisFuture<C::Value> {
        let args = self.args("GETRANGE").key(key).int(start).int(end);
        self.typed(args, OutputKind::Value, to_present_value::<C>)
    }

    pub fn setrange(&self, key: &C::Key, offset: i64, value: &C::Value) -> RedisFuture<i64> {
        let args = self.args("SETRANGE").key(key).int(offset).value(value);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    // ── Hashes ─────────────────────────────────────────────────────

    pub fn hget(&self, key: &C::Key, field: &C::Key) -> RedisFuture<Option<C::Value>> {
        let args = self.args("HGET").key(key).key(field);
        self.typed(args, OutputKind::Value, to_value::<C>)
    }

    /// `true` if the field is new.
    pub fn hset(&self, key: &C::Key, field: &C::Key, value: &C::Value) -> RedisFuture<bool> {
        let args = self.args("HSET").key(key).key(field).value(value);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    pub fn hsetnx(&self, key: &C::Key, field: &C::Key, value: &C::Value) -> RedisFuture<bool> {
        let args = self.args("HSETNX").key(key).key(field).value(value);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    pub fn hdel(&self, key: &C::Key, fields: &[C::Key]) -> RedisFuture<i64> {
        let args = self.args("HDEL").key(key).keys(fields);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn hexists(&self, key: &C::Key, field: &C::Key) -> RedisFuture<bool> {
        let args = self.args("HEXISTS").key(key).key(field);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    pub fn hlen(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("HLEN").key(key), OutputKind::Integer, to_int::<C>)
    }

    /// Field/value pairs in server order.
    pub fn hgetall(&self, key: &C::Key) -> RedisFuture<Vec<(C::Key, C::Value)>> {
        self.typed(self.args("HGETALL").key(key), OutputKind::Map, to_map::<C>)
    }

    pub fn hincrby(&self, key: &C::Key, field: &C::Key, amount: i64) -> RedisFuture<i64> {
        let args = self.args("HINCRBY").key(key).key(field).int(amount);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn hstrlen(&self, key: &C::Key, field: &C::Key) -> RedisFuture<i64> {
        let args = self.args("HSTRLEN").key(key).key(field);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    // ── Lists ──────────────────────────────────────────────────────

    /// Length of the list after the push.
    pub fn lpush(&self, key: &C::Key, values: &[C::Value]) -> RedisFuture<i64> {
        let mut args = self.args("LPUSH").key(key);
        for value in values {
            args = args.value(value);
        }
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn rpush(&self, key: &C::Key, values: &[C::Value]) -> RedisFuture<i64> {
        let mut args = self.args("RPUSH").key(key);
        for value in values {
            args = args.value(value);
        }
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn lpop(&self, key: &C::Key) -> RedisFuture<Option<C::Value>> {
        self.typed(self.args("LPOP").key(key), OutputKind::Value, to_value::<C>)
    }

    pub fn rpop(&self, key: &C::Key) -> RedisFuture<Option<C::Value>> {
        self.typed(self.args("RPOP").key(key), OutputKind::Value, to_value::<C>)
    }

    pub fn llen(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("LLEN").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn lindex(&self, key: &C::Key, index: i64) -> RedisFuture<Option<C::Value>> {
        let args = self.args("LINDEX").key(key).int(index);
        self.typed(args, OutputKind::Value, to_value::<C>)
    }

    pub fn lrange(&self, key: &C::Key, start: i64, stop: i64) -> RedisFuture<Vec<C::Value>> {
        let args = self.args("LRANGE").key(key).int(start).int(stop);
        self.typed(args, OutputKind::ValueList, to_members::<C>)
    }

    pub fn lrem(&self, key: &C::Key, count: i64, value: &C::Value) -> RedisFuture<i64> {
        let args = self.args("LREM").key(key).int(count).value(value);
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn ltrim(&self, key: &C::Key, start: i64, stop: i64) -> RedisFuture<()> {
        let args = self.args("LTRIM").key(key).int(start).int(stop);
        self.typed(args, OutputKind::Status, to_ok::<C>)
    }

    // ── Sets ───────────────────────────────────────────────────────

    pub fn sadd(&self, key: &C::Key, members: &[C::Value]) -> RedisFuture<i64> {
        let mut args = self.args("SADD").key(key);
        for member in members {
            args = args.value(member);
        }
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn srem(&self, key: &C::Key, members: &[C::Value]) -> RedisFuture<i64> {
        let mut args = self.args("SREM").key(key);
        for member in members {
            args = args.value(member);
        }
        self.typed(args, OutputKind::Integer, to_int::<C>)
    }

    pub fn sismember(&self, key: &C::Key, member: &C::Value) -> RedisFuture<bool> {
        let args = self.args("SISMEMBER").key(key).value(member);
        self.typed(args, OutputKind::Boolean, to_bool::<C>)
    }

    pub fn scard(&self, key: &C::Key) -> RedisFuture<i64> {
        self.typed(self.args("SCARD").key(key), OutputKind::Integer, to_int::<C>)
    }

    pub fn smembers(&self, key: &C::Key) -> RedisFuture<Vec<C::Value>> {
        self.typed(self.args("SMEMBERS").key(key), OutputKind::ValueList, to_members::<C>)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

//! Key/value codecs.
//!
//! A codec turns application keys and values into wire bytes and back.
//! Codecs are shared between the client handle and every future it hands
//! out, so implementations must be stateless (`Send + Sync`).

use bytes::Bytes;

/// Encodes keys and values sent to Redis and decodes them from replies.
///
/// The codec only transforms; it does not validate. Malformed input is the
/// caller's responsibility.
pub trait RedisCodec: Send + Sync + 'static {
    type Key: Send + 'static;
    type Value: Send + 'static;

    fn encode_key(&self, key: &Self::Key) -> Bytes;

    fn encode_value(&self, value: &Self::Value) -> Bytes;

    fn decode_key(&self, bytes: &[u8]) -> Self::Key;

    fn decode_value(&self, bytes: &[u8]) -> Self::Value;
}

/// UTF-8 `String` keys and values.
///
/// Invalid UTF-8 coming back from the server is replaced with U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl RedisCodec for Utf8Codec {
    type Key = String;
    type Value = String;

    fn encode_key(&self, key: &String) -> Bytes {
        Bytes::copy_from_slice(key.as_bytes())
    }

    fn encode_value(&self, value: &String) -> Bytes {
        Bytes::copy_from_slice(value.as_bytes())
    }

    fn decode_key(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn decode_value(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Raw binary keys and values.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl RedisCodec for BytesCodec {
    type Key = Bytes;
    type Value = Bytes;

    fn encode_key(&self, key: &Bytes) -> Bytes {
        key.clone()
    }

    fn encode_value(&self, value: &Bytes) -> Bytes {
        value.clone()
    }

    fn decode_key(&self, bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    fn decode_value(&self, bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }
}

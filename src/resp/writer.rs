//! RESP command serializer.
//!
//! Encodes command arguments into the RESP bulk string array wire format:
//! `*<N>\r\n$<len>\r\narg1\r\n$<len>\r\narg2\r\n…`
//!
//! Requests are never parsed back, so there is no decode counterpart here.

use bytes::{BufMut, BytesMut};
use itoa::Buffer;

/// Upper bound on the bytes a single `*<N>\r\n` / `$<len>\r\n` header needs.
const HEADER_MAX: usize = 1 + 20 + 2;

/// Bytes needed to encode `args`, exact for the payload and generous for headers.
pub fn encoded_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    args.iter()
        .fold(HEADER_MAX, |cap, arg| cap + HEADER_MAX + arg.as_ref().len() + 2)
}

/// Append one command to `out`.
///
/// Each argument is treated as a binary-safe bulk string, in the order given
/// (command name first).
pub fn encode_command_into<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.reserve(encoded_len(args));
    let mut itoa_buf = Buffer::new();

    // *<N>\r\n
    out.put_u8(b'*');
    out.put_slice(itoa_buf.format(args.len()).as_bytes());
    out.put_slice(b"\r\n");

    for arg in args {
        let arg = arg.as_ref();
        // $<len>\r\n<data>\r\n
        out.put_u8(b'$');
        out.put_slice(itoa_buf.format(arg.len()).as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Encode a command (list of arguments) into RESP wire format.
///
/// # Example
/// ```ignore
/// let bytes = encode_command(&[b"SET".as_ref(), b"key", b"value"]);
/// // → *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(encoded_len(args));
    encode_command_into(args, &mut buf);
    buf
}

// ── Tests ──────────────────────────────────────────────────────────

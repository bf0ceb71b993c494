//! RESP Reply Values
//!
//! The wire format is the Redis Serialization Protocol. Every value the
//! server sends (and every request a client frames) is one of five shapes,
//! each introduced by a one-byte prefix and terminated by CRLF:
//!
//! - `+OK\r\n` simple status string
//! - `-ERR message\r\n` error
//! - `:1000\r\n` integer
//! - `$5\r\nhello\r\n` bulk string (`$-1\r\n` is the null bulk)
//! - `*2\r\n...\r\n` array of nested values (`*0\r\n` is the empty array)
//!
//! Bulk strings are length-prefixed and binary safe: `\r` and `\n` are legal
//! inside them. Arrays nest, so a transaction reply is just an array whose
//! elements are the per-command replies rendered by the same serializer.

use bytes::Bytes;
use std::fmt;

/// The CRLF line terminator used throughout the protocol.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes.
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A command line as the engine consumes it: the command name followed by its
/// arguments, all binary-safe.
pub type CmdLine = Vec<Bytes>;

/// A single RESP value, used both for parsed requests and outgoing replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status line, e.g. `+OK`.
    Status(String),

    /// Error line, e.g. `-ERR unknown command`.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe, length-prefixed string.
    Bulk(Bytes),

    /// The null bulk string (`$-1`).
    Null,

    /// Array of nested values; requests arrive as arrays of bulks.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// `+OK`.
    pub fn ok() -> Self {
        RespValue::Status("OK".to_string())
    }

    /// `+PONG`.
    pub fn pong() -> Self {
        RespValue::Status("PONG".to_string())
    }

    /// `+QUEUED`, sent for every command buffered inside MULTI.
    pub fn queued() -> Self {
        RespValue::Status("QUEUED".to_string())
    }

    /// The empty multi-bulk, which doubles as the watch-abort signal on EXEC.
    pub fn empty_array() -> Self {
        RespValue::Array(Vec::new())
    }

    pub fn status(s: impl Into<String>) -> Self {
        RespValue::Status(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::Bulk(data.into())
    }

    /// Bulk when present, null bulk when absent.
    pub fn bulk_or_null(data: Option<Bytes>) -> Self {
        match data {
            Some(b) => RespValue::Bulk(b),
            None => RespValue::Null,
        }
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `ERR unknown command '<name>'`.
    pub fn unknown_command(name: &str) -> Self {
        RespValue::Error(format!("ERR unknown command '{name}'"))
    }

    /// `ERR wrong number of arguments for '<name>' command`.
    pub fn arity_error(name: &str) -> Self {
        RespValue::Error(format!(
            "ERR wrong number of arguments for '{name}' command"
        ))
    }

    /// Renders this value to its wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Renders into an existing buffer; nested arrays recurse through here,
    /// so a transaction reply concatenates its pre-rendered inner replies
    /// under a single `*<n>` header.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.extend_from_slice(b"$-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// True for the `-` shape. Mid-transaction, this is the abort trigger.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Extracts the inner bytes of a bulk or status value.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            RespValue::Bulk(b) => Some(b.clone()),
            RespValue::Status(s) => Some(Bytes::from(s.clone())),
            _ => None,
        }
    }

    /// Interprets a request array as a command line of bulk strings.
    /// Returns `None` for any other shape, including arrays with non-bulk
    /// elements.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        match self {
            RespValue::Array(values) => values
                .into_iter()
                .map(|v| match v {
                    RespValue::Bulk(b) => Some(b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Frames a command line as the multi-bulk request clients send.
    pub fn from_cmd_line(args: &[Bytes]) -> Self {
        RespValue::Array(args.iter().cloned().map(RespValue::Bulk).collect())
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::Status(s) => write!(f, "{s}"),
            RespValue::Error(s) => write!(f, "(error) {s}"),
            RespValue::Integer(n) => write!(f, "(integer) {n}"),
            RespValue::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{s}\""),
                Err(_) => write!(f, "(binary, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::queued().serialize(), b"+QUEUED\r\n");
    }

    #[test]
    fn error_serializes() {
        let e = RespValue::unknown_command("frobnicate");
        assert_eq!(e.serialize(), b"-ERR unknown command 'frobnicate'\r\n");
    }

    #[test]
    fn integer_serializes() {
        assert_eq!(RespValue::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn bulk_serializes() {
        assert_eq!(
            RespValue::bulk(Bytes::from("hello")).serialize(),
            b"$5\r\nhello\r\n"
        );
        // zero-length bulk is legal and distinct from null
        assert_eq!(RespValue::bulk(Bytes::new()).serialize(), b"$0\r\n\r\n");
        assert_eq!(RespValue::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn bulk_is_binary_safe() {
        let v = RespValue::bulk(Bytes::from_static(b"a\r\nb\x00c"));
        assert_eq!(v.serialize(), b"$7\r\na\r\nb\x00c\r\n");
    }

    #[test]
    fn array_serializes() {
        let v = RespValue::array(vec![
            RespValue::bulk(Bytes::from("GET")),
            RespValue::bulk(Bytes::from("name")),
        ]);
        assert_eq!(v.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
        assert_eq!(RespValue::empty_array().serialize(), b"*0\r\n");
    }

    #[test]
    fn array_may_hold_mixed_replies() {
        // the EXEC reply shape: pre-rendered inner replies of any kind
        let v = RespValue::array(vec![
            RespValue::ok(),
            RespValue::integer(2),
            RespValue::Null,
        ]);
        assert_eq!(v.serialize(), b"*3\r\n+OK\r\n:2\r\n$-1\r\n");
    }

    #[test]
    fn cmd_line_round_trip() {
        let args: CmdLine = vec![Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")];
        let framed = RespValue::from_cmd_line(&args);
        assert_eq!(framed.clone().into_cmd_line(), Some(args));
        assert!(RespValue::integer(1).into_cmd_line().is_none());
    }
}

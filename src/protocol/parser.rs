//! Streaming RESP Parser
//!
//! An incremental parser over a byte buffer. The connection loop appends
//! whatever the socket delivers and calls [`RespParser::parse`]; the parser
//! either produces a complete value together with the number of bytes it
//! consumed, reports that the frame is still incomplete, or fails with a
//! typed protocol error. A protocol error does not poison the parser or the
//! stream: the caller discards the offending bytes and keeps going.
//!
//! Request framing follows the server side of RESP:
//!
//! - `*<n>` introduces a multi-bulk of `n` entries; each entry is expected to
//!   be a `$<len>`-prefixed bulk (binary safe, exact-length read), though
//!   single-line entries (`+`, `-`, `:`) are accepted so the same parser can
//!   read transaction replies on the client side.
//! - `$<len>` at top level is a lone bulk string; `$-1` is the null bulk.
//! - `+`, `-`, `:` are single-line values.
//! - Anything else is an inline command: the line is split on whitespace and
//!   emitted as a multi-bulk. Inline parsing is text only; bulk content never
//!   goes through it.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Largest accepted bulk string (512 MB, the Redis limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest accepted multi-bulk element count.
pub const MAX_MULTI_BULK_LEN: usize = 1024 * 1024;

/// Errors raised on malformed framing. All of these surface to the peer as
/// an error reply while the stream itself stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A header or integer line held something other than a decimal number.
    #[error("invalid integer in '{0}'")]
    BadInteger(String),

    /// A `$` header announced an out-of-range length.
    #[error("invalid bulk length {0}")]
    BadBulkLength(i64),

    /// A `*` header announced an out-of-range element count.
    #[error("invalid multibulk length {0}")]
    BadMultiBulkLength(i64),

    /// A length-prefixed body was not terminated by CRLF.
    #[error("expected CRLF after bulk payload")]
    MissingCrlf,

    /// A line was empty where content was required.
    #[error("empty inline command")]
    EmptyInline,

    /// Simple lines must be UTF-8; bulks carry arbitrary bytes instead.
    #[error("invalid UTF-8 in simple line")]
    BadUtf8,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Incremental RESP parser, one per connection.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one complete value from the front of `buf`.
    ///
    /// Returns `Ok(Some((value, consumed)))` on success, `Ok(None)` when the
    /// buffer holds only a partial frame, and `Err` on a protocol violation.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        match buf[0] {
            prefix::ARRAY => self.parse_multi_bulk(buf),
            prefix::BULK => self.parse_lone_bulk(buf),
            prefix::STATUS | prefix::ERROR | prefix::INTEGER => self.parse_simple_line(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// `+...`, `-...` or `:...` terminated by CRLF.
    fn parse_simple_line(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(line_end) = find_crlf(buf) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&buf[1..line_end]).map_err(|_| ParseError::BadUtf8)?;
        let value = match buf[0] {
            prefix::STATUS => RespValue::Status(line.to_string()),
            prefix::ERROR => RespValue::Error(line.to_string()),
            _ => {
                let n: i64 = line
                    .parse()
                    .map_err(|_| ParseError::BadInteger(line.to_string()))?;
                RespValue::Integer(n)
            }
        };
        Ok(Some((value, line_end + 2)))
    }

    /// A top-level `$<len>` bulk string.
    fn parse_lone_bulk(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(line_end) = find_crlf(buf) else {
            return Ok(None);
        };
        let len = parse_decimal(&buf[1..line_end])?;
        if len == -1 {
            return Ok(Some((RespValue::Null, line_end + 2)));
        }
        if len < 0 || len as usize > MAX_BULK_LEN {
            return Err(ParseError::BadBulkLength(len));
        }
        match read_bulk_body(&buf[line_end + 2..], len as usize)? {
            Some((data, body_consumed)) => {
                Ok(Some((RespValue::Bulk(data), line_end + 2 + body_consumed)))
            }
            None => Ok(None),
        }
    }

    /// `*<n>` followed by `n` entries.
    fn parse_multi_bulk(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(line_end) = find_crlf(buf) else {
            return Ok(None);
        };
        let count = parse_decimal(&buf[1..line_end])?;
        if count == -1 {
            return Ok(Some((RespValue::Null, line_end + 2)));
        }
        if count < 0 || count as usize > MAX_MULTI_BULK_LEN {
            return Err(ParseError::BadMultiBulkLength(count));
        }

        let mut consumed = line_end + 2;
        let mut elements = Vec::with_capacity(count as usize);
        while elements.len() < count as usize {
            let rest = &buf[consumed..];
            let Some(entry_end) = find_crlf(rest) else {
                return Ok(None);
            };
            if rest[0] == prefix::BULK {
                let len = parse_decimal(&rest[1..entry_end])?;
                if len == -1 {
                    // null inner bulk
                    elements.push(RespValue::Null);
                    consumed += entry_end + 2;
                    continue;
                }
                if len < 0 || len as usize > MAX_BULK_LEN {
                    return Err(ParseError::BadBulkLength(len));
                }
                match read_bulk_body(&rest[entry_end + 2..], len as usize)? {
                    Some((data, body_consumed)) => {
                        elements.push(RespValue::Bulk(data));
                        consumed += entry_end + 2 + body_consumed;
                    }
                    None => return Ok(None),
                }
            } else {
                // single-line entry: typed when prefixed, raw bytes otherwise
                let entry = match self.parse_simple_line_entry(&rest[..entry_end + 2])? {
                    Some(v) => v,
                    None => RespValue::Bulk(Bytes::copy_from_slice(&rest[..entry_end])),
                };
                elements.push(entry);
                consumed += entry_end + 2;
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }

    fn parse_simple_line_entry(&mut self, line: &[u8]) -> ParseResult<Option<RespValue>> {
        match line.first() {
            Some(&prefix::STATUS) | Some(&prefix::ERROR) | Some(&prefix::INTEGER) => {
                Ok(self.parse_simple_line(line)?.map(|(v, _)| v))
            }
            _ => Ok(None),
        }
    }

    /// Text-only convenience form: a bare line split on whitespace.
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(line_end) = find_crlf(buf) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| ParseError::BadUtf8)?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Err(ParseError::EmptyInline);
        }
        let elements = words
            .into_iter()
            .map(|w| RespValue::Bulk(Bytes::from(w.to_string())))
            .collect();
        Ok(Some((RespValue::Array(elements), line_end + 2)))
    }
}

/// Reads a length-announced bulk body plus its trailing CRLF.
/// Returns the payload and the bytes consumed, or `None` when incomplete.
fn read_bulk_body(buf: &[u8], len: usize) -> ParseResult<Option<(Bytes, usize)>> {
    if buf.len() < len + 2 {
        return Ok(None);
    }
    if &buf[len..len + 2] != CRLF {
        return Err(ParseError::MissingCrlf);
    }
    Ok(Some((Bytes::copy_from_slice(&buf[..len]), len + 2)))
}

/// Parses the decimal payload of a `$`/`*` header.
fn parse_decimal(digits: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::BadInteger(String::from_utf8_lossy(digits).into_owned()))
}

/// Position of the first CRLF, if a full pair is present.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        RespParser::new().parse(input)
    }

    #[test]
    fn parses_simple_lines() {
        let (v, n) = parse_one(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Status("OK".into()));
        assert_eq!(n, 5);

        let (v, _) = parse_one(b"-ERR boom\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Error("ERR boom".into()));

        let (v, _) = parse_one(b":-42\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Integer(-42));
    }

    #[test]
    fn parses_bulk_and_null_bulk() {
        let (v, n) = parse_one(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Bulk(Bytes::from("hello")));
        assert_eq!(n, 11);

        let (v, n) = parse_one(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Null);
        assert_eq!(n, 5);

        let (v, n) = parse_one(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Bulk(Bytes::new()));
        assert_eq!(n, 6);
    }

    #[test]
    fn bulk_of_one_byte() {
        let (v, n) = parse_one(b"$1\r\nx\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Bulk(Bytes::from("x")));
        assert_eq!(n, 7);
    }

    #[test]
    fn bulk_preserves_crlf_and_nul_bytes() {
        let (v, _) = parse_one(b"$7\r\na\r\nb\x00c\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Bulk(Bytes::from_static(b"a\r\nb\x00c")));
    }

    #[test]
    fn parses_multi_bulk_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nx\r\n";
        let (v, n) = parse_one(input).unwrap().unwrap();
        assert_eq!(
            v,
            RespValue::Array(vec![
                RespValue::Bulk(Bytes::from("SET")),
                RespValue::Bulk(Bytes::from("a")),
                RespValue::Bulk(Bytes::from("x")),
            ])
        );
        assert_eq!(n, input.len());
    }

    #[test]
    fn parses_empty_and_null_arrays() {
        let (v, n) = parse_one(b"*0\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Array(vec![]));
        assert_eq!(n, 4);

        let (v, _) = parse_one(b"*-1\r\n").unwrap().unwrap();
        assert_eq!(v, RespValue::Null);
    }

    #[test]
    fn parses_array_with_null_inner_bulk() {
        let (v, _) = parse_one(b"*2\r\n$-1\r\n$1\r\na\r\n").unwrap().unwrap();
        assert_eq!(
            v,
            RespValue::Array(vec![RespValue::Null, RespValue::Bulk(Bytes::from("a"))])
        );
    }

    #[test]
    fn parses_transaction_reply_shape() {
        // what EXEC sends back: statuses and integers inside one array
        let (v, _) = parse_one(b"*2\r\n+OK\r\n:3\r\n").unwrap().unwrap();
        assert_eq!(
            v,
            RespValue::Array(vec![RespValue::Status("OK".into()), RespValue::Integer(3)])
        );
    }

    #[test]
    fn incomplete_frames_ask_for_more() {
        assert_eq!(parse_one(b"+OK").unwrap(), None);
        assert_eq!(parse_one(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_one(b"*2\r\n$3\r\nGET\r\n").unwrap(), None);
        assert_eq!(parse_one(b"*2\r\n$3\r\nGE").unwrap(), None);
    }

    #[test]
    fn inline_command_splits_on_whitespace() {
        let (v, n) = parse_one(b"SET a x\r\n").unwrap().unwrap();
        assert_eq!(
            v,
            RespValue::Array(vec![
                RespValue::Bulk(Bytes::from("SET")),
                RespValue::Bulk(Bytes::from("a")),
                RespValue::Bulk(Bytes::from("x")),
            ])
        );
        assert_eq!(n, 9);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            parse_one(b"*x\r\n"),
            Err(ParseError::BadInteger(_))
        ));
        assert!(matches!(
            parse_one(b":one\r\n"),
            Err(ParseError::BadInteger(_))
        ));
        assert_eq!(parse_one(b"$-2\r\n"), Err(ParseError::BadBulkLength(-2)));
        assert_eq!(
            parse_one(b"*-3\r\n"),
            Err(ParseError::BadMultiBulkLength(-3))
        );
    }

    #[test]
    fn rejects_bulk_without_trailing_crlf() {
        // announced three bytes, but the terminator is overwritten by the
        // next command's header
        assert_eq!(
            parse_one(b"$3\r\nXYZ*1\r\n$4\r\nPING\r\n"),
            Err(ParseError::MissingCrlf)
        );
    }

    #[test]
    fn round_trips_every_reply_shape() {
        let shapes = vec![
            RespValue::ok(),
            RespValue::Error("ERR x".into()),
            RespValue::Integer(0),
            RespValue::Bulk(Bytes::from_static(b"with\r\ninside")),
            RespValue::Bulk(Bytes::new()),
            RespValue::Null,
            RespValue::empty_array(),
            RespValue::Array(vec![
                RespValue::Bulk(Bytes::from("a")),
                RespValue::Null,
                RespValue::Integer(7),
            ]),
        ];
        for shape in shapes {
            let bytes = shape.serialize();
            let (parsed, consumed) = parse_one(&bytes).unwrap().unwrap();
            assert_eq!(parsed, shape);
            assert_eq!(consumed, bytes.len());
        }
    }
}

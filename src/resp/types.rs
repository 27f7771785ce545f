use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result, ServerError};

/// A decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK\r\n
    Status(String),
    /// -ERR message\r\n
    ///
    /// Kept as the raw line; [`Reply::into_result`] classifies it.
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    Bulk(Bytes),
    /// *2\r\n…
    Array(Vec<Reply>),
    /// $-1\r\n
    Null,
    /// *-1\r\n, e.g. an aborted EXEC.
    NullArray,
}

// ── Convenience accessors ──────────────────────────────────────────

impl Reply {
    /// Try to interpret this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Status(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to interpret this value as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(b) => Some(b),
            Self::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to interpret this value as i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to interpret this value as an array (consumes self).
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns true when this value represents null / nil, bulk or array.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::NullArray)
    }

    /// Returns true for `-` error replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Split an error reply off into a classified [`Error::Server`].
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Self::Error(msg) => Err(Error::Server(ServerError::new(msg))),
            other => Ok(other),
        }
    }

    /// Returns the type name as a static string (useful for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::Bulk(_) => "bulk",
            Self::Array(_) => "array",
            Self::Null => "null",
            Self::NullArray => "null array",
        }
    }

    /// Serialize this reply in wire format, appending to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let mut itoa_buf = itoa::Buffer::new();
        match self {
            Self::Status(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Self::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Self::Integer(i) => {
                buf.put_u8(b':');
                buf.extend_from_slice(itoa_buf.format(*i).as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Self::Bulk(data) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(itoa_buf.format(data.len()).as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Self::Array(items) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(itoa_buf.format(items.len()).as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
            Self::Null => buf.extend_from_slice(b"$-1\r\n"),
            Self::NullArray => buf.extend_from_slice(b"*-1\r\n"),
        }
    }

    /// Serialize this reply into a fresh buffer.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Self::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Reply {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

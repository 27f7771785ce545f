//! RESP command serializer.
//!
//! Encodes commands into the bulk string array wire format
//! `*<N>\r\n$<len>\r\narg1\r\n$<len>\r\narg2\r\n…` and appends them to a
//! [`GrowableBuffer`]. The connection driver hands
//! [`ProtocolWriter::pending`] to the socket and acknowledges what the
//! socket took with [`ProtocolWriter::consume`].

use itoa::Buffer;

use crate::command::{Arg, Command};
use crate::error::{Error, Result};
use crate::resp::buffer::GrowableBuffer;

/// Encoder that accumulates commands until the transport drains them.
#[derive(Debug, Default)]
pub struct ProtocolWriter {
    buf: GrowableBuffer,
}

impl ProtocolWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: GrowableBuffer::with_capacity(capacity),
        }
    }

    /// Append one command.
    ///
    /// An unset argument is a usage error; nothing of the command is left in
    /// the buffer in that case.
    pub fn encode(&mut self, cmd: &Command) -> Result<()> {
        let start = self.buf.position();
        let mut itoa_buf = Buffer::new();

        self.buf.put_u8(b'*');
        self.buf.put(itoa_buf.format(cmd.argc()).as_bytes());
        self.buf.put(b"\r\n");
        self.put_bulk(cmd.name().as_bytes());

        for (i, arg) in cmd.arguments().iter().enumerate() {
            match arg {
                Arg::Bytes(b) => self.put_bulk(b),
                Arg::Text(s) => self.put_bulk(s.as_bytes()),
                Arg::Int(n) => {
                    let mut num = Buffer::new();
                    self.put_bulk(num.format(*n).as_bytes());
                }
                Arg::Unset => {
                    self.buf.truncate(start);
                    return Err(Error::Usage(format!(
                        "{}: argument {} is unset",
                        cmd.name(),
                        i + 1
                    )));
                }
            }
        }
        Ok(())
    }

    /// `$<len>\r\n<data>\r\n`
    #[inline]
    fn put_bulk(&mut self, data: &[u8]) {
        let mut itoa_buf = Buffer::new();
        self.buf.put_u8(b'$');
        self.buf.put(itoa_buf.format(data.len()).as_bytes());
        self.buf.put(b"\r\n");
        self.buf.put(data);
        self.buf.put(b"\r\n");
    }

    /// Encoded bytes the transport has not accepted yet.
    pub fn pending(&self) -> &[u8] {
        self.buf.flush_slice()
    }

    pub fn has_pending(&self) -> bool {
        self.buf.has_unflushed()
    }

    /// The transport accepted `n` bytes of [`pending`](Self::pending).
    pub fn consume(&mut self, n: usize) {
        self.buf.acknowledge(n);
    }

    /// Discard everything, flushed or not.
    pub fn reset(&mut self) {
        self.buf.reset();
    }
}

/// Encode raw arguments into a fresh buffer.
///
/// # Example
/// ```ignore
/// let bytes = encode_command(&[b"SET", b"key", b"value"]);
/// // → *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut cap = 1 + 10 + 2; // '*' + max_digits(usize) + \r\n
    for arg in args {
        cap += 1 + 10 + 2 + arg.len() + 2;
    }

    let mut buf = Vec::with_capacity(cap);
    let mut itoa_buf = Buffer::new();

    buf.push(b'*');
    buf.extend_from_slice(itoa_buf.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(itoa_buf.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }

    buf
}

// ── Tests ──────────────────────────────────────────────────────────

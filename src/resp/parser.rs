//! Resumable RESP2 reader.
//!
//! [`ProtocolReader::feed`] consumes bytes from the front of a chunk and
//! returns `Ok(Some(reply))` once a value completes, or `Ok(None)` after the
//! whole chunk has been absorbed without finishing one. Partial progress
//! (half a length prefix, a CR without its LF, part of a bulk payload, some
//! elements of an array) is kept in the reader, so the byte stream can be cut
//! anywhere and the decoded values do not change.
//!
//! Bulk payloads that arrive whole in one chunk are split off the chunk
//! without copying; payloads spread over several chunks are copied once
//! into a buffer sized from the length prefix.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

use crate::error::{Error, Result};
use crate::resp::types::Reply;

/// Largest bulk payload accepted by default (512 MB, the server's own limit).
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Status,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberKind {
    Integer,
    BulkLen,
    ArrayLen,
}

/// Digits seen so far. Accumulated as a negative value so that `i64::MIN`
/// parses without overflow.
#[derive(Debug, Default)]
struct NumberAcc {
    value: i64,
    negative: bool,
    digits: u32,
    cr: bool,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Start,
    Line {
        kind: LineKind,
        line: Vec<u8>,
        cr: bool,
    },
    Number {
        kind: NumberKind,
        acc: NumberAcc,
    },
    Payload {
        data: BytesMut,
        remaining: usize,
    },
    Trailer {
        data: Bytes,
        seen: u8,
    },
    Array {
        remaining: usize,
        items: Vec<Reply>,
        child: Box<ProtocolReader>,
    },
}

enum Step {
    /// Progress was made; keep going with the new state.
    Continue(State),
    /// Input exhausted mid-value.
    Wait(State),
    Done(Reply),
}

/// Incremental decoder for one reply stream.
#[derive(Debug)]
pub struct ProtocolReader {
    state: State,
    max_bulk_len: usize,
}

impl Default for ProtocolReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BULK_LEN)
    }
}

impl ProtocolReader {
    pub fn new(max_bulk_len: usize) -> Self {
        Self {
            state: State::Start,
            max_bulk_len,
        }
    }

    /// Consume bytes from `input` until one reply completes or `input` is
    /// empty.
    ///
    /// Returns `Ok(None)` only when every byte of `input` was absorbed. On
    /// error the reader is back at its initial state; the stream itself is
    /// unusable.
    pub fn feed(&mut self, input: &mut Bytes) -> Result<Option<Reply>> {
        loop {
            let state = std::mem::take(&mut self.state);
            match self.step(state, input)? {
                Step::Continue(next) => self.state = next,
                Step::Wait(next) => {
                    self.state = next;
                    return Ok(None);
                }
                Step::Done(reply) => return Ok(Some(reply)),
            }
        }
    }

    /// Minimum number of further bytes before another call can make
    /// progress. Zero means "unknown, wait for whatever comes".
    pub fn needed(&self) -> usize {
        match &self.state {
            State::Start => 0,
            State::Line { cr, .. } => usize::from(*cr),
            State::Number { acc, .. } => usize::from(acc.cr),
            State::Payload { remaining, .. } => remaining + 2,
            State::Trailer { seen, .. } => 2 - *seen as usize,
            State::Array { child, .. } => child.needed(),
        }
    }

    /// True between values.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Start)
    }

    /// Drop any partial value.
    pub fn reset(&mut self) {
        self.state = State::Start;
    }

    fn step(&self, state: State, input: &mut Bytes) -> Result<Step> {
        match state {
            State::Start => {
                if !input.has_remaining() {
                    return Ok(Step::Wait(State::Start));
                }
                let next = match input.get_u8() {
                    b'+' => line(LineKind::Status),
                    b'-' => line(LineKind::Error),
                    b':' => number(NumberKind::Integer),
                    b'$' => number(NumberKind::BulkLen),
                    b'*' => number(NumberKind::ArrayLen),
                    other => {
                        return Err(Error::Protocol(format!(
                            "unknown RESP type byte: 0x{other:02x}"
                        )))
                    }
                };
                Ok(Step::Continue(next))
            }

            State::Line { kind, mut line, cr } => {
                if cr {
                    if !input.has_remaining() {
                        return Ok(Step::Wait(State::Line { kind, line, cr }));
                    }
                    expect(input.get_u8(), b'\n')?;
                    return Ok(Step::Done(finish_line(kind, line)));
                }
                match memchr(b'\r', input) {
                    Some(i) => {
                        line.extend_from_slice(&input[..i]);
                        input.advance(i + 1);
                        Ok(Step::Continue(State::Line {
                            kind,
                            line,
                            cr: true,
                        }))
                    }
                    None => {
                        line.extend_from_slice(input);
                        input.advance(input.len());
                        Ok(Step::Wait(State::Line { kind, line, cr }))
                    }
                }
            }

            State::Number { kind, mut acc } => {
                while input.has_remaining() {
                    let b = input.get_u8();
                    if acc.cr {
                        expect(b, b'\n')?;
                        return self.finish_number(kind, acc.finish()?);
                    }
                    match b {
                        b'-' if acc.digits == 0 && !acc.negative => acc.negative = true,
                        b'0'..=b'9' => acc.push(b)?,
                        b'\r' if acc.digits > 0 => acc.cr = true,
                        other => {
                            return Err(Error::Protocol(format!(
                                "invalid byte in integer: 0x{other:02x}"
                            )))
                        }
                    }
                }
                Ok(Step::Wait(State::Number { kind, acc }))
            }

            State::Payload {
                mut data,
                mut remaining,
            } => {
                if !input.has_remaining() {
                    return Ok(Step::Wait(State::Payload { data, remaining }));
                }
                if data.is_empty() && input.len() >= remaining {
                    let data = input.split_to(remaining);
                    return Ok(Step::Continue(State::Trailer { data, seen: 0 }));
                }
                if data.is_empty() {
                    data.reserve(remaining);
                }
                let take = remaining.min(input.len());
                data.extend_from_slice(&input[..take]);
                input.advance(take);
                remaining -= take;
                if remaining == 0 {
                    Ok(Step::Continue(State::Trailer {
                        data: data.freeze(),
                        seen: 0,
                    }))
                } else {
                    Ok(Step::Wait(State::Payload { data, remaining }))
                }
            }

            State::Trailer { data, mut seen } => {
                while seen < 2 {
                    if !input.has_remaining() {
                        return Ok(Step::Wait(State::Trailer { data, seen }));
                    }
                    let want = if seen == 0 { b'\r' } else { b'\n' };
                    expect(input.get_u8(), want)?;
                    seen += 1;
                }
                Ok(Step::Done(Reply::Bulk(data)))
            }

            State::Array {
                mut remaining,
                mut items,
                mut child,
            } => loop {
                match child.feed(input)? {
                    Some(item) => {
                        items.push(item);
                        remaining -= 1;
                        if remaining == 0 {
                            return Ok(Step::Done(Reply::Array(items)));
                        }
                    }
                    None => {
                        return Ok(Step::Wait(State::Array {
                            remaining,
                            items,
                            child,
                        }))
                    }
                }
            },
        }
    }

    fn finish_number(&self, kind: NumberKind, n: i64) -> Result<Step> {
        match kind {
            NumberKind::Integer => Ok(Step::Done(Reply::Integer(n))),
            NumberKind::BulkLen => match n {
                -1 => Ok(Step::Done(Reply::Null)),
                0 => Ok(Step::Continue(State::Trailer {
                    data: Bytes::new(),
                    seen: 0,
                })),
                n if n < 0 => Err(Error::Protocol(format!("invalid bulk length {n}"))),
                n if n as u64 > self.max_bulk_len as u64 => Err(Error::Protocol(format!(
                    "bulk length {n} exceeds limit of {}",
                    self.max_bulk_len
                ))),
                n => Ok(Step::Continue(State::Payload {
                    data: BytesMut::new(),
                    remaining: n as usize,
                })),
            },
            NumberKind::ArrayLen => match n {
                -1 => Ok(Step::Done(Reply::NullArray)),
                0 => Ok(Step::Done(Reply::Array(Vec::new()))),
                n if n < 0 => Err(Error::Protocol(format!("invalid array length {n}"))),
                n => {
                    let remaining = usize::try_from(n)
                        .map_err(|_| Error::Protocol(format!("array length {n} too large")))?;
                    Ok(Step::Continue(State::Array {
                        remaining,
                        // Never trust the prefix for the allocation size.
                        items: Vec::with_capacity(remaining.min(1024)),
                        child: Box::new(ProtocolReader::new(self.max_bulk_len)),
                    }))
                }
            },
        }
    }
}

impl NumberAcc {
    #[inline]
    fn push(&mut self, digit: u8) -> Result<()> {
        self.value = self
            .value
            .checked_mul(10)
            .and_then(|v| v.checked_sub((digit - b'0') as i64))
            .ok_or_else(|| Error::Protocol("integer overflow".into()))?;
        self.digits += 1;
        Ok(())
    }

    fn finish(&self) -> Result<i64> {
        if self.negative {
            Ok(self.value)
        } else {
            self.value
                .checked_neg()
                .ok_or_else(|| Error::Protocol("integer overflow".into()))
        }
    }
}

fn line(kind: LineKind) -> State {
    State::Line {
        kind,
        line: Vec::new(),
        cr: false,
    }
}

fn number(kind: NumberKind) -> State {
    State::Number {
        kind,
        acc: NumberAcc::default(),
    }
}

#[inline]
fn expect(got: u8, want: u8) -> Result<()> {
    if got == want {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "expected 0x{want:02x}, got 0x{got:02x}"
        )))
    }
}

fn finish_line(kind: LineKind, line: Vec<u8>) -> Reply {
    let text = match line.as_slice() {
        b"OK" => String::from("OK"),
        b"PONG" => String::from("PONG"),
        _ => String::from_utf8(line)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
    };
    match kind {
        LineKind::Status => Reply::Status(text),
        LineKind::Error => Reply::Error(text),
    }
}

/// Decode one reply from the front of `buf`.
///
/// Returns the reply and the number of bytes it took, or `None` when `buf`
/// holds only part of a value.
pub fn parse_slice(buf: &[u8]) -> Result<Option<(Reply, usize)>> {
    let mut input = Bytes::copy_from_slice(buf);
    let mut reader = ProtocolReader::default();
    Ok(reader
        .feed(&mut input)?
        .map(|reply| (reply, buf.len() - input.len())))
}

// ── Tests ──────────────────────────────────────────────────────────

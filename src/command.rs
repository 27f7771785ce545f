//! Commands as submitted by callers.
//!
//! A [`Command`] is a name plus positional arguments, tagged with
//! [`CommandFlags`] taken from the descriptor table in [`crate::commands`]:
//! the operation class and where its first key lives. Routing and replica
//! selection only ever look at those flags.

use std::borrow::Cow;

use bytes::Bytes;

use crate::commands::{self, KeySpec};
use crate::crc16::hash_slot;

/// One positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Raw bytes, written as-is.
    Bytes(Bytes),
    /// Text, written as its UTF-8 bytes.
    Text(String),
    /// Integer, written in decimal.
    Int(i64),
    /// A missing value. Encoding a command that holds one is a usage error.
    Unset,
}

impl Arg {
    /// The argument's bytes, formatting integers on demand.
    pub fn to_bytes(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            Self::Bytes(b) => Some(Cow::Borrowed(b)),
            Self::Text(s) => Some(Cow::Borrowed(s.as_bytes())),
            Self::Int(i) => Some(Cow::Owned(itoa::Buffer::new().format(*i).as_bytes().to_vec())),
            Self::Unset => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(b))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(b: &[u8; N]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

macro_rules! int_arg {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(i: $t) -> Self {
                Self::Int(i as i64)
            }
        })*
    };
}

int_arg!(i8, i16, i32, i64, u8, u16, u32, isize);

impl From<u64> for Arg {
    fn from(i: u64) -> Self {
        match i64::try_from(i) {
            Ok(i) => Self::Int(i),
            Err(_) => Self::Text(i.to_string()),
        }
    }
}

impl From<usize> for Arg {
    fn from(i: usize) -> Self {
        Self::from(i as u64)
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Self::Text(f.to_string())
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Unset, Into::into)
    }
}

/// Operation class, used for node selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Server/connection management: always the primary.
    Admin,
    /// May be served by a replica, depending on the routing mode.
    Read,
    /// Always the primary.
    Write,
}

/// Routing flags attached to every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFlags {
    pub class: CommandClass,
    pub keys: KeySpec,
}

impl CommandFlags {
    /// Flags for commands missing from the descriptor table.
    pub const UNKNOWN: Self = Self {
        class: CommandClass::Write,
        keys: KeySpec::Index(1),
    };
}

/// A command: name plus arguments. Immutable once handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Arg>,
    flags: CommandFlags,
}

impl Command {
    /// Start a command, taking its flags from the descriptor table.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let flags = commands::lookup(&name)
            .map(|spec| spec.flags())
            .unwrap_or(CommandFlags::UNKNOWN);
        Self {
            name,
            args: Vec::new(),
            flags,
        }
    }

    /// Start a command with explicit flags, bypassing the table.
    pub fn with_flags(name: impl Into<String>, flags: CommandFlags) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            flags,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Positional arguments, not including the name.
    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    /// Argument count on the wire, name included.
    pub fn argc(&self) -> usize {
        self.args.len() + 1
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn class(&self) -> CommandClass {
        self.flags.class
    }

    /// The first key argument, if the command has one.
    pub fn key(&self) -> Option<Cow<'_, [u8]>> {
        let idx = match self.flags.keys {
            KeySpec::None => return None,
            // argv index: 0 is the name
            KeySpec::Index(i) => (i as usize).checked_sub(1)?,
            // EVAL script numkeys key…
            KeySpec::Eval => {
                let numkeys = self.args.get(1)?.to_bytes()?;
                let numkeys: usize = std::str::from_utf8(&numkeys).ok()?.parse().ok()?;
                if numkeys == 0 {
                    return None;
                }
                2
            }
            // XREAD … STREAMS key…
            KeySpec::Streams => {
                let pos = self.args.iter().position(|a| {
                    a.to_bytes()
                        .is_some_and(|b| b.eq_ignore_ascii_case(b"STREAMS"))
                })?;
                pos + 1
            }
        };
        self.args.get(idx)?.to_bytes()
    }

    /// Hash slot of the first key.
    pub fn slot(&self) -> Option<u16> {
        self.key().map(|k| hash_slot(&k))
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.class == CommandClass::Read
    }

    /// Index of the first unset argument, if any.
    pub fn first_unset(&self) -> Option<usize> {
        self.args.iter().position(Arg::is_unset)
    }
}

/// Build a [`Command`] from a name and arguments.
///
/// ```ignore
/// let c = cmd!("SET", "mykey", 42);
/// let c = cmd!("GET", key_var);
/// ```
#[macro_export]
macro_rules! cmd {
    ($name:expr $(, $arg:expr)* $(,)?) => {{
        $crate::command::Command::new($name)$(.arg($arg))*
    }};
}

// ── Tests ──────────────────────────────────────────────────────────

//! Static command descriptor table.
//!
//! Maps a command name to its arity, key positions and operation class, in
//! the shape `COMMAND INFO` reports them. Only the class and the first key
//! position are consulted at runtime; they drive slot routing and replica
//! selection. Names missing from the table get [`CommandFlags::UNKNOWN`].

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::command::{CommandClass, CommandFlags};

/// Where a command's first key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// Keyless; routed to a random slot.
    None,
    /// Fixed argv position (the name is position 0).
    Index(u8),
    /// `EVAL script numkeys key…`: a key at 3 when numkeys > 0.
    Eval,
    /// Keys follow the `STREAMS` token.
    Streams,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Positive: exact argc. Negative: at least `-arity`.
    pub arity: i32,
    pub first_key: i32,
    pub last_key: i32,
    pub step: i32,
    pub class: CommandClass,
    pub movable: Option<KeySpec>,
}

impl CommandSpec {
    pub fn flags(&self) -> CommandFlags {
        let keys = match self.movable {
            Some(spec) => spec,
            None if self.first_key > 0 => KeySpec::Index(self.first_key as u8),
            None => KeySpec::None,
        };
        CommandFlags {
            class: self.class,
            keys,
        }
    }

    /// Whether `argc` (name included) satisfies the arity.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        }
    }
}

use CommandClass::{Admin, Read, Write};

const fn spec(
    name: &'static str,
    arity: i32,
    first_key: i32,
    last_key: i32,
    step: i32,
    class: CommandClass,
) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        first_key,
        last_key,
        step,
        class,
        movable: None,
    }
}

const fn movable(name: &'static str, arity: i32, class: CommandClass, keys: KeySpec) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        first_key: 0,
        last_key: 0,
        step: 0,
        class,
        movable: Some(keys),
    }
}

static TABLE: &[CommandSpec] = &[
    // ── Connection / server ──
    spec("PING", -1, 0, 0, 0, Admin),
    spec("ECHO", 2, 0, 0, 0, Admin),
    spec("AUTH", -2, 0, 0, 0, Admin),
    spec("SELECT", 2, 0, 0, 0, Admin),
    spec("QUIT", -1, 0, 0, 0, Admin),
    spec("HELLO", -1, 0, 0, 0, Admin),
    spec("CLIENT", -2, 0, 0, 0, Admin),
    spec("INFO", -1, 0, 0, 0, Admin),
    spec("CONFIG", -2, 0, 0, 0, Admin),
    spec("DBSIZE", 1, 0, 0, 0, Admin),
    spec("FLUSHDB", -1, 0, 0, 0, Admin),
    spec("FLUSHALL", -1, 0, 0, 0, Admin),
    spec("TIME", 1, 0, 0, 0, Admin),
    spec("LASTSAVE", 1, 0, 0, 0, Admin),
    spec("SAVE", 1, 0, 0, 0, Admin),
    spec("BGSAVE", -1, 0, 0, 0, Admin),
    spec("SLOWLOG", -2, 0, 0, 0, Admin),
    spec("COMMAND", -1, 0, 0, 0, Admin),
    spec("SCRIPT", -2, 0, 0, 0, Admin),
    spec("CLUSTER", -2, 0, 0, 0, Admin),
    spec("READONLY", 1, 0, 0, 0, Admin),
    spec("READWRITE", 1, 0, 0, 0, Admin),
    spec("ASKING", 1, 0, 0, 0, Admin),
    spec("MULTI", 1, 0, 0, 0, Admin),
    spec("EXEC", 1, 0, 0, 0, Admin),
    spec("DISCARD", 1, 0, 0, 0, Admin),
    spec("WATCH", -2, 1, -1, 1, Admin),
    spec("UNWATCH", 1, 0, 0, 0, Admin),
    // ── Pub/sub ──
    spec("PUBLISH", 3, 0, 0, 0, Write),
    spec("SUBSCRIBE", -2, 0, 0, 0, Admin),
    spec("UNSUBSCRIBE", -1, 0, 0, 0, Admin),
    spec("PSUBSCRIBE", -2, 0, 0, 0, Admin),
    spec("PUNSUBSCRIBE", -1, 0, 0, 0, Admin),
    // ── Keyspace ──
    spec("DEL", -2, 1, -1, 1, Write),
    spec("UNLINK", -2, 1, -1, 1, Write),
    spec("EXISTS", -2, 1, -1, 1, Read),
    spec("TYPE", 2, 1, 1, 1, Read),
    spec("EXPIRE", -3, 1, 1, 1, Write),
    spec("PEXPIRE", -3, 1, 1, 1, Write),
    spec("EXPIREAT", -3, 1, 1, 1, Write),
    spec("PERSIST", 2, 1, 1, 1, Write),
    spec("TTL", 2, 1, 1, 1, Read),
    spec("PTTL", 2, 1, 1, 1, Read),
    spec("RENAME", 3, 1, 2, 1, Write),
    spec("RENAMENX", 3, 1, 2, 1, Write),
    spec("DUMP", 2, 1, 1, 1, Read),
    spec("RESTORE", -4, 1, 1, 1, Write),
    spec("KEYS", 2, 0, 0, 0, Read),
    spec("SCAN", -2, 0, 0, 0, Read),
    spec("RANDOMKEY", 1, 0, 0, 0, Read),
    // ── Strings ──
    spec("GET", 2, 1, 1, 1, Read),
    spec("SET", -3, 1, 1, 1, Write),
    spec("SETEX", 4, 1, 1, 1, Write),
    spec("PSETEX", 4, 1, 1, 1, Write),
    spec("SETNX", 3, 1, 1, 1, Write),
    spec("GETSET", 3, 1, 1, 1, Write),
    spec("GETDEL", 2, 1, 1, 1, Write),
    spec("GETRANGE", 4, 1, 1, 1, Read),
    spec("SETRANGE", 4, 1, 1, 1, Write),
    spec("STRLEN", 2, 1, 1, 1, Read),
    spec("APPEND", 3, 1, 1, 1, Write),
    spec("INCR", 2, 1, 1, 1, Write),
    spec("INCRBY", 3, 1, 1, 1, Write),
    spec("INCRBYFLOAT", 3, 1, 1, 1, Write),
    spec("DECR", 2, 1, 1, 1, Write),
    spec("DECRBY", 3, 1, 1, 1, Write),
    spec("MGET", -2, 1, -1, 1, Read),
    spec("MSET", -3, 1, -1, 2, Write),
    spec("MSETNX", -3, 1, -1, 2, Write),
    spec("GETBIT", 3, 1, 1, 1, Read),
    spec("SETBIT", 4, 1, 1, 1, Write),
    spec("BITCOUNT", -2, 1, 1, 1, Read),
    // ── Hashes ──
    spec("HGET", 3, 1, 1, 1, Read),
    spec("HSET", -4, 1, 1, 1, Write),
    spec("HSETNX", 4, 1, 1, 1, Write),
    spec("HMGET", -3, 1, 1, 1, Read),
    spec("HMSET", -4, 1, 1, 1, Write),
    spec("HDEL", -3, 1, 1, 1, Write),
    spec("HLEN", 2, 1, 1, 1, Read),
    spec("HEXISTS", 3, 1, 1, 1, Read),
    spec("HKEYS", 2, 1, 1, 1, Read),
    spec("HVALS", 2, 1, 1, 1, Read),
    spec("HGETALL", 2, 1, 1, 1, Read),
    spec("HINCRBY", 4, 1, 1, 1, Write),
    spec("HSCAN", -3, 1, 1, 1, Read),
    // ── Lists ──
    spec("LPUSH", -3, 1, 1, 1, Write),
    spec("RPUSH", -3, 1, 1, 1, Write),
    spec("LPOP", -2, 1, 1, 1, Write),
    spec("RPOP", -2, 1, 1, 1, Write),
    spec("LLEN", 2, 1, 1, 1, Read),
    spec("LINDEX", 3, 1, 1, 1, Read),
    spec("LRANGE", 4, 1, 1, 1, Read),
    spec("LSET", 4, 1, 1, 1, Write),
    spec("LREM", 4, 1, 1, 1, Write),
    spec("LTRIM", 4, 1, 1, 1, Write),
    spec("BLPOP", -3, 1, -2, 1, Write),
    spec("BRPOP", -3, 1, -2, 1, Write),
    // ── Sets ──
    spec("SADD", -3, 1, 1, 1, Write),
    spec("SREM", -3, 1, 1, 1, Write),
    spec("SPOP", -2, 1, 1, 1, Write),
    spec("SCARD", 2, 1, 1, 1, Read),
    spec("SISMEMBER", 3, 1, 1, 1, Read),
    spec("SMEMBERS", 2, 1, 1, 1, Read),
    spec("SINTER", -2, 1, -1, 1, Read),
    spec("SUNION", -2, 1, -1, 1, Read),
    spec("SDIFF", -2, 1, -1, 1, Read),
    spec("SSCAN", -3, 1, 1, 1, Read),
    // ── Sorted sets ──
    spec("ZADD", -4, 1, 1, 1, Write),
    spec("ZREM", -3, 1, 1, 1, Write),
    spec("ZINCRBY", 4, 1, 1, 1, Write),
    spec("ZCARD", 2, 1, 1, 1, Read),
    spec("ZCOUNT", 4, 1, 1, 1, Read),
    spec("ZSCORE", 3, 1, 1, 1, Read),
    spec("ZRANK", -3, 1, 1, 1, Read),
    spec("ZRANGE", -4, 1, 1, 1, Read),
    spec("ZRANGEBYSCORE", -4, 1, 1, 1, Read),
    spec("ZREVRANGE", -4, 1, 1, 1, Read),
    spec("ZSCAN", -3, 1, 1, 1, Read),
    // ── HyperLogLog ──
    spec("PFADD", -2, 1, 1, 1, Write),
    spec("PFCOUNT", -2, 1, -1, 1, Read),
    // ── Streams ──
    spec("XADD", -5, 1, 1, 1, Write),
    spec("XLEN", 2, 1, 1, 1, Read),
    spec("XRANGE", -4, 1, 1, 1, Read),
    spec("XDEL", -3, 1, 1, 1, Write),
    spec("XACK", -4, 1, 1, 1, Write),
    movable("XREAD", -4, Read, KeySpec::Streams),
    movable("XREADGROUP", -7, Write, KeySpec::Streams),
    // ── Scripting ──
    movable("EVAL", -3, Write, KeySpec::Eval),
    movable("EVALSHA", -3, Write, KeySpec::Eval),
    movable("EVAL_RO", -3, Read, KeySpec::Eval),
    movable("EVALSHA_RO", -3, Read, KeySpec::Eval),
    movable("FCALL", -3, Write, KeySpec::Eval),
    movable("FCALL_RO", -3, Read, KeySpec::Eval),
];

fn index() -> &'static HashMap<&'static str, &'static CommandSpec> {
    static INDEX: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    INDEX.get_or_init(|| TABLE.iter().map(|s| (s.name, s)).collect())
}

/// Look up a command by name, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    if let Some(spec) = index().get(name).copied() {
        return Some(spec);
    }
    index().get(name.to_ascii_uppercase().as_str()).copied()
}

/// Every known command.
pub fn all() -> &'static [CommandSpec] {
    TABLE
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("get").map(|s| s.name), Some("GET"));
        assert_eq!(lookup("GeT").map(|s| s.name), Some("GET"));
        assert!(lookup("NOPE").is_none());
    }

    #[test]
    fn names_are_unique_and_uppercase() {
        assert_eq!(index().len(), TABLE.len());
        for s in TABLE {
            assert_eq!(s.name, s.name.to_ascii_uppercase());
        }
    }

    #[test]
    fn flags_for_fixed_keys() {
        let f = lookup("HSET").unwrap().flags();
        assert_eq!(f.class, CommandClass::Write);
        assert_eq!(f.keys, KeySpec::Index(1));
        assert_eq!(lookup("INFO").unwrap().flags().keys, KeySpec::None);
        assert_eq!(lookup("EVAL").unwrap().flags().keys, KeySpec::Eval);
    }

    #[test]
    fn arity() {
        let get = lookup("GET").unwrap();
        assert!(get.accepts(2));
        assert!(!get.accepts(3));
        let set = lookup("SET").unwrap();
        assert!(set.accepts(3));
        assert!(set.accepts(5));
        assert!(!set.accepts(2));
    }
}

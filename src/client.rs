//! Typed client facade.
//!
//! Every command goes through [`Client::invoke`], which builds a
//! [`Command`] from the descriptor table and hands it to the router. The
//! typed wrappers below are thin shims over it that convert the reply.

use std::collections::HashMap;

use bytes::Bytes;

use crate::command::{Arg, Command};
use crate::config::{ClusterConfig, ConnectionConfig};
use crate::error::{Error, Result};
use crate::resp::types::Reply;
use crate::router::{ClusterRouter, Router, StandaloneRouter};

/// A client over any [`Router`].
#[derive(Debug, Clone)]
pub struct Client<R: Router> {
    router: R,
}

impl Client<StandaloneRouter> {
    /// Connect to a single server.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        Ok(Self::new(StandaloneRouter::connect(config).await?))
    }

    /// Connect using a `redis://` URL.
    pub async fn from_url(url: &str) -> Result<Self> {
        Self::connect(ConnectionConfig::from_url(url)?).await
    }
}

impl Client<ClusterRouter> {
    /// Discover a cluster and connect to its nodes.
    pub async fn connect_cluster(config: ClusterConfig) -> Result<Self> {
        Ok(Self::new(ClusterRouter::connect(config).await?))
    }
}

impl<R: Router> Client<R> {
    pub fn new(router: R) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn into_router(self) -> R {
        self.router
    }

    /// Run any command by name.
    pub async fn invoke<I, A>(&self, name: &str, args: I) -> Result<Reply>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.router.execute(Command::new(name).args(args)).await
    }

    pub async fn execute(&self, cmd: Command) -> Result<Reply> {
        self.router.execute(cmd).await
    }

    /// Run several commands; error replies come back in place.
    pub async fn pipeline(&self, cmds: Vec<Command>) -> Result<Vec<Reply>> {
        self.router.pipeline(cmds).await
    }

    // ── Server ──

    /// `true` when the server answers PONG.
    pub async fn ping(&self) -> Result<bool> {
        let reply = self.invoke("PING", None::<Arg>).await?;
        Ok(reply.as_str() == Some("PONG"))
    }

    pub async fn echo(&self, message: impl Into<Arg>) -> Result<Bytes> {
        let reply = self.invoke("ECHO", [message]).await?;
        into_bytes("ECHO", reply)
    }

    pub async fn dbsize(&self) -> Result<i64> {
        into_int("DBSIZE", self.invoke("DBSIZE", None::<Arg>).await?)
    }

    pub async fn flushdb(&self) -> Result<()> {
        expect_ok("FLUSHDB", self.invoke("FLUSHDB", None::<Arg>).await?)
    }

    pub async fn publish(&self, channel: impl Into<Arg>, message: impl Into<Arg>) -> Result<i64> {
        let cmd = Command::new("PUBLISH").arg(channel).arg(message);
        into_int("PUBLISH", self.execute(cmd).await?)
    }

    // ── Keys and strings ──

    pub async fn get(&self, key: impl Into<Arg>) -> Result<Option<Bytes>> {
        into_opt_bytes("GET", self.invoke("GET", [key]).await?)
    }

    pub async fn set(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> Result<()> {
        let cmd = Command::new("SET").arg(key).arg(value);
        expect_ok("SET", self.execute(cmd).await?)
    }

    /// SET with an expiry in seconds.
    pub async fn set_ex(
        &self,
        key: impl Into<Arg>,
        value: impl Into<Arg>,
        seconds: u64,
    ) -> Result<()> {
        let cmd = Command::new("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds);
        expect_ok("SET", self.execute(cmd).await?)
    }

    /// Returns the number of keys removed.
    pub async fn del<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Arg>,
    {
        into_int("DEL", self.invoke("DEL", keys).await?)
    }

    /// Returns how many of `keys` exist.
    pub async fn exists<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Arg>,
    {
        into_int("EXISTS", self.invoke("EXISTS", keys).await?)
    }

    pub async fn incr(&self, key: impl Into<Arg>) -> Result<i64> {
        into_int("INCR", self.invoke("INCR", [key]).await?)
    }

    pub async fn incr_by(&self, key: impl Into<Arg>, amount: i64) -> Result<i64> {
        let cmd = Command::new("INCRBY").arg(key).arg(amount);
        into_int("INCRBY", self.execute(cmd).await?)
    }

    /// `false` when the key does not exist.
    pub async fn expire(&self, key: impl Into<Arg>, seconds: u64) -> Result<bool> {
        let cmd = Command::new("EXPIRE").arg(key).arg(seconds);
        Ok(into_int("EXPIRE", self.execute(cmd).await?)? == 1)
    }

    /// Remaining time to live in seconds; -1 without expiry, -2 if missing.
    pub async fn ttl(&self, key: impl Into<Arg>) -> Result<i64> {
        into_int("TTL", self.invoke("TTL", [key]).await?)
    }

    /// In a cluster every key must hash to the same slot.
    pub async fn mget<I, K>(&self, keys: I) -> Result<Vec<Option<Bytes>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Arg>,
    {
        into_array("MGET", self.invoke("MGET", keys).await?)?
            .into_iter()
            .map(|item| into_opt_bytes("MGET", item))
            .collect()
    }

    // ── Hashes ──

    /// Returns 1 if the field is new, 0 if it was updated.
    pub async fn hset(
        &self,
        key: impl Into<Arg>,
        field: impl Into<Arg>,
        value: impl Into<Arg>,
    ) -> Result<i64> {
        let cmd = Command::new("HSET").arg(key).arg(field).arg(value);
        into_int("HSET", self.execute(cmd).await?)
    }

    pub async fn hget(&self, key: impl Into<Arg>, field: impl Into<Arg>) -> Result<Option<Bytes>> {
        let cmd = Command::new("HGET").arg(key).arg(field);
        into_opt_bytes("HGET", self.execute(cmd).await?)
    }

    pub async fn hgetall(&self, key: impl Into<Arg>) -> Result<HashMap<Bytes, Bytes>> {
        let items = into_array("HGETALL", self.invoke("HGETALL", [key]).await?)?;
        if items.len() % 2 != 0 {
            return Err(Error::Type("HGETALL: odd number of elements".into()));
        }
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            map.insert(into_bytes("HGETALL", k)?, into_bytes("HGETALL", v)?);
        }
        Ok(map)
    }

    // ── Lists ──

    /// Returns the list length after the push.
    pub async fn lpush<I, V>(&self, key: impl Into<Arg>, values: I) -> Result<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        let cmd = Command::new("LPUSH").arg(key).args(values);
        into_int("LPUSH", self.execute(cmd).await?)
    }

    pub async fn rpush<I, V>(&self, key: impl Into<Arg>, values: I) -> Result<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        let cmd = Command::new("RPUSH").arg(key).args(values);
        into_int("RPUSH", self.execute(cmd).await?)
    }

    pub async fn lrange(&self, key: impl Into<Arg>, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let cmd = Command::new("LRANGE").arg(key).arg(start).arg(stop);
        into_bytes_vec("LRANGE", self.execute(cmd).await?)
    }

    // ── Sets ──

    /// Returns the number of members added.
    pub async fn sadd<I, V>(&self, key: impl Into<Arg>, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Arg>,
    {
        let cmd = Command::new("SADD").arg(key).args(members);
        into_int("SADD", self.execute(cmd).await?)
    }

    pub async fn smembers(&self, key: impl Into<Arg>) -> Result<Vec<Bytes>> {
        into_bytes_vec("SMEMBERS", self.invoke("SMEMBERS", [key]).await?)
    }
}

// ── Reply conversion ──────────────────────────────────────────────

fn unexpected(cmd: &str, expected: &str, got: &Reply) -> Error {
    Error::Type(format!("{cmd}: expected {expected}, got {}", got.type_name()))
}

fn expect_ok(cmd: &str, reply: Reply) -> Result<()> {
    match reply {
        Reply::Status(s) if s == "OK" => Ok(()),
        other => Err(unexpected(cmd, "OK", &other)),
    }
}

fn into_int(cmd: &str, reply: Reply) -> Result<i64> {
    reply
        .as_int()
        .ok_or_else(|| unexpected(cmd, "integer", &reply))
}

fn into_bytes(cmd: &str, reply: Reply) -> Result<Bytes> {
    match reply {
        Reply::Bulk(b) => Ok(b),
        Reply::Status(s) => Ok(Bytes::from(s)),
        other => Err(unexpected(cmd, "bulk string", &other)),
    }
}

fn into_opt_bytes(cmd: &str, reply: Reply) -> Result<Option<Bytes>> {
    match reply {
        Reply::Null | Reply::NullArray => Ok(None),
        other => into_bytes(cmd, other).map(Some),
    }
}

fn into_array(cmd: &str, reply: Reply) -> Result<Vec<Reply>> {
    match reply {
        Reply::Array(items) => Ok(items),
        other => Err(unexpected(cmd, "array", &other)),
    }
}

fn into_bytes_vec(cmd: &str, reply: Reply) -> Result<Vec<Bytes>> {
    into_array(cmd, reply)?
        .into_iter()
        .map(|item| into_bytes(cmd, item))
        .collect()
}

//! Shared helpers for integration tests.
//!
//! Tests run against in-process mock servers: each one decodes incoming
//! commands with the crate's own [`ProtocolReader`], records them, and
//! answers through a handler closure. [`store`] is a handler backed by a
//! small in-memory keyspace; [`cluster_node`] wraps a handler so the node
//! also answers topology queries.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use respline::config::{ClusterConfig, ConnectionConfig};
use respline::resp::{ProtocolReader, Reply};

/// What the mock does with one decoded command.
pub enum Action {
    Reply(Reply),
    /// Written verbatim.
    Raw(Vec<u8>),
    /// Written one byte per write.
    Dribble(Vec<u8>),
    /// Drop the connection without answering.
    Close,
    /// Answer nothing.
    Silent,
}

pub type Handler = Arc<dyn Fn(&[Bytes]) -> Action + Send + Sync>;

pub struct MockServer {
    pub port: u16,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    accepted: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MockServer {
    /// Bind now, serve later; lets cluster nodes learn each other's ports.
    pub async fn bind() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&[Bytes]) -> Action + Send + Sync + 'static,
    {
        let (listener, _) = Self::bind().await;
        Self::serve(listener, handler)
    }

    pub fn serve<F>(listener: TcpListener, handler: F) -> Self
    where
        F: Fn(&[Bytes]) -> Action + Send + Sync + 'static,
    {
        let port = listener.local_addr().unwrap().port();
        let handler: Handler = Arc::new(handler);
        let server = Self {
            port,
            log: Arc::default(),
            accepted: Arc::default(),
            reads: Arc::default(),
        };
        let (log, accepted, reads) = (
            Arc::clone(&server.log),
            Arc::clone(&server.accepted),
            Arc::clone(&server.reads),
        );
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(session(
                    socket,
                    Arc::clone(&handler),
                    Arc::clone(&log),
                    Arc::clone(&reads),
                ));
            }
        });
        server
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            port: self.port,
            reconnect_delay_ms: 10,
            ..ConnectionConfig::default()
        }
    }

    /// Every command received so far, across connections.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().clone()
    }

    /// Command names received so far, uppercased.
    pub fn names(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .map(|c| c[0].to_ascii_uppercase())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| *n == name).count()
    }

    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Socket reads that carried data.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Poll until `name` has been received `n` times.
    pub async fn wait_for(&self, name: &str, n: usize) {
        for _ in 0..200 {
            if self.count(name) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{name} received {} times, wanted {n}", self.count(name));
    }
}

async fn session(
    mut socket: TcpStream,
    handler: Handler,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    reads: Arc<AtomicUsize>,
) {
    socket.set_nodelay(true).ok();
    let mut reader = ProtocolReader::default();
    let mut buf = BytesMut::with_capacity(16 * 1024);
    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        reads.fetch_add(1, Ordering::SeqCst);
        let mut chunk = buf.split().freeze();
        let mut out = BytesMut::new();
        loop {
            let args: Vec<Bytes> = match reader.feed(&mut chunk) {
                Ok(Some(Reply::Array(items))) => items
                    .into_iter()
                    .filter_map(|i| match i {
                        Reply::Bulk(b) => Some(b),
                        _ => None,
                    })
                    .collect(),
                Ok(None) => break,
                Ok(Some(_)) | Err(_) => return,
            };
            log.lock().push(
                args.iter()
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect(),
            );
            match handler(&args) {
                Action::Reply(reply) => reply.write_to(&mut out),
                Action::Raw(bytes) => out.extend_from_slice(&bytes),
                Action::Dribble(bytes) => {
                    if socket.write_all(&out.split()).await.is_err() {
                        return;
                    }
                    for b in bytes {
                        if socket.write_all(&[b]).await.is_err() {
                            return;
                        }
                    }
                }
                Action::Close => {
                    let _ = socket.write_all(&out).await;
                    return;
                }
                Action::Silent => {}
            }
        }
        if !out.is_empty() && socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

// ── Reply helpers ──

pub fn name(args: &[Bytes]) -> String {
    String::from_utf8_lossy(&args[0]).to_ascii_uppercase()
}

pub fn arg(args: &[Bytes], i: usize) -> String {
    args.get(i)
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .unwrap_or_default()
}

pub fn ok() -> Action {
    Action::Reply(Reply::Status("OK".into()))
}

pub fn bulk(data: impl AsRef<[u8]>) -> Action {
    Action::Reply(Reply::Bulk(Bytes::copy_from_slice(data.as_ref())))
}

pub fn int(n: i64) -> Action {
    Action::Reply(Reply::Integer(n))
}

pub fn err(msg: &str) -> Action {
    Action::Reply(Reply::Error(msg.into()))
}

// ── In-memory keyspace ──

enum Value {
    Str(Bytes),
    Hash(Vec<(Bytes, Bytes)>),
    List(VecDeque<Bytes>),
    Set(BTreeSet<Bytes>),
}

#[derive(Default)]
struct Keyspace {
    values: HashMap<Bytes, Value>,
    expiry: HashMap<Bytes, i64>,
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// A handler that keeps data like a real server would, for the commands the
/// typed client wraps.
pub fn store() -> impl Fn(&[Bytes]) -> Action + Send + Sync + 'static {
    let ks = Mutex::new(Keyspace::default());
    move |args: &[Bytes]| {
        let mut ks = ks.lock();
        let key = || args[1].clone();
        match name(args).as_str() {
            "PING" => Action::Reply(Reply::Status("PONG".into())),
            "ECHO" => bulk(&args[1]),
            "QUIT" | "SELECT" | "AUTH" => ok(),
            "DBSIZE" => int(ks.values.len() as i64),
            "FLUSHDB" => {
                *ks = Keyspace::default();
                ok()
            }
            "PUBLISH" => int(0),
            "SET" => {
                ks.values.insert(key(), Value::Str(args[2].clone()));
                ks.expiry.remove(&args[1]);
                if arg(args, 3).eq_ignore_ascii_case("EX") {
                    let secs = arg(args, 4).parse().unwrap_or(0);
                    ks.expiry.insert(key(), secs);
                }
                ok()
            }
            "GET" => match ks.values.get(&args[1]) {
                Some(Value::Str(v)) => bulk(v),
                Some(_) => err(WRONGTYPE),
                None => Action::Reply(Reply::Null),
            },
            "MGET" => Action::Reply(Reply::Array(
                args[1..]
                    .iter()
                    .map(|k| match ks.values.get(k) {
                        Some(Value::Str(v)) => Reply::Bulk(v.clone()),
                        _ => Reply::Null,
                    })
                    .collect(),
            )),
            "DEL" => {
                let n = args[1..]
                    .iter()
                    .filter(|k| ks.values.remove(*k).is_some())
                    .count();
                int(n as i64)
            }
            "EXISTS" => int(args[1..].iter().filter(|k| ks.values.contains_key(*k)).count() as i64),
            "INCR" | "INCRBY" => {
                let by: i64 = if args.len() > 2 {
                    arg(args, 2).parse().unwrap_or(0)
                } else {
                    1
                };
                let current = match ks.values.get(&args[1]) {
                    None => 0,
                    Some(Value::Str(v)) => match std::str::from_utf8(v).ok().and_then(|s| s.parse::<i64>().ok()) {
                        Some(n) => n,
                        None => return err("ERR value is not an integer or out of range"),
                    },
                    Some(_) => return err(WRONGTYPE),
                };
                let next = current + by;
                ks.values
                    .insert(key(), Value::Str(Bytes::from(next.to_string())));
                int(next)
            }
            "EXPIRE" => {
                if !ks.values.contains_key(&args[1]) {
                    return int(0);
                }
                let secs = arg(args, 2).parse().unwrap_or(0);
                ks.expiry.insert(key(), secs);
                int(1)
            }
            "TTL" => match (ks.values.contains_key(&args[1]), ks.expiry.get(&args[1])) {
                (false, _) => int(-2),
                (true, None) => int(-1),
                (true, Some(secs)) => int(*secs),
            },
            "HSET" => {
                let entry = ks
                    .values
                    .entry(key())
                    .or_insert_with(|| Value::Hash(Vec::new()));
                let Value::Hash(fields) = entry else {
                    return err(WRONGTYPE);
                };
                let mut added = 0;
                for pair in args[2..].chunks(2) {
                    let [field, value] = pair else {
                        return err("ERR wrong number of arguments for 'hset' command");
                    };
                    match fields.iter_mut().find(|(f, _)| f == field) {
                        Some((_, v)) => *v = value.clone(),
                        None => {
                            fields.push((field.clone(), value.clone()));
                            added += 1;
                        }
                    }
                }
                int(added)
            }
            "HGET" => match ks.values.get(&args[1]) {
                Some(Value::Hash(fields)) => match fields.iter().find(|(f, _)| *f == args[2]) {
                    Some((_, v)) => bulk(v),
                    None => Action::Reply(Reply::Null),
                },
                Some(_) => err(WRONGTYPE),
                None => Action::Reply(Reply::Null),
            },
            "HGETALL" => match ks.values.get(&args[1]) {
                Some(Value::Hash(fields)) => Action::Reply(Reply::Array(
                    fields
                        .iter()
                        .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                        .collect(),
                )),
                Some(_) => err(WRONGTYPE),
                None => Action::Reply(Reply::Array(Vec::new())),
            },
            cmd @ ("LPUSH" | "RPUSH") => {
                let entry = ks
                    .values
                    .entry(key())
                    .or_insert_with(|| Value::List(VecDeque::new()));
                let Value::List(list) = entry else {
                    return err(WRONGTYPE);
                };
                for v in &args[2..] {
                    if cmd == "LPUSH" {
                        list.push_front(v.clone());
                    } else {
                        list.push_back(v.clone());
                    }
                }
                int(list.len() as i64)
            }
            "LRANGE" => match ks.values.get(&args[1]) {
                Some(Value::List(list)) => {
                    let len = list.len() as i64;
                    let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                    let start = norm(arg(args, 2).parse().unwrap_or(0));
                    let stop = norm(arg(args, 3).parse().unwrap_or(-1)).min(len - 1);
                    Action::Reply(Reply::Array(
                        (start..=stop)
                            .filter_map(|i| list.get(i as usize))
                            .map(|v| Reply::Bulk(v.clone()))
                            .collect(),
                    ))
                }
                Some(_) => err(WRONGTYPE),
                None => Action::Reply(Reply::Array(Vec::new())),
            },
            "SADD" => {
                let entry = ks
                    .values
                    .entry(key())
                    .or_insert_with(|| Value::Set(BTreeSet::new()));
                let Value::Set(set) = entry else {
                    return err(WRONGTYPE);
                };
                int(args[2..].iter().filter(|m| set.insert((*m).clone())).count() as i64)
            }
            "SMEMBERS" => match ks.values.get(&args[1]) {
                Some(Value::Set(set)) => Action::Reply(Reply::Array(
                    set.iter().map(|m| Reply::Bulk(m.clone())).collect(),
                )),
                Some(_) => err(WRONGTYPE),
                None => Action::Reply(Reply::Array(Vec::new())),
            },
            other => err(&format!("ERR unknown command '{other}'")),
        }
    }
}

// ── Cluster ──

/// A `CLUSTER SLOTS` reply. Each range lists node ports, primary first;
/// node ids are `node-<port>`.
pub fn slots_reply(ranges: &[(u16, u16, Vec<u16>)]) -> Reply {
    Reply::Array(
        ranges
            .iter()
            .map(|(start, end, ports)| {
                let mut entry = vec![Reply::Integer(*start as i64), Reply::Integer(*end as i64)];
                entry.extend(ports.iter().map(|p| {
                    Reply::Array(vec![
                        Reply::from("127.0.0.1"),
                        Reply::Integer(*p as i64),
                        Reply::Bulk(Bytes::from(format!("node-{p}"))),
                    ])
                }));
                Reply::Array(entry)
            })
            .collect(),
    )
}

/// Two primaries: `a` owns 0-8191, `b` owns 8192-16383.
pub fn two_node_slots(a: u16, b: u16) -> Reply {
    slots_reply(&[(0, 8191, vec![a]), (8192, 16383, vec![b])])
}

/// Answer topology and connection commands, pass the rest to `inner`.
pub fn cluster_node<F>(slots: Reply, inner: F) -> impl Fn(&[Bytes]) -> Action + Send + Sync + 'static
where
    F: Fn(&[Bytes]) -> Action + Send + Sync + 'static,
{
    move |args: &[Bytes]| match name(args).as_str() {
        "CLUSTER" if arg(args, 1).eq_ignore_ascii_case("SLOTS") => {
            Action::Reply(slots.clone())
        }
        "READONLY" | "ASKING" | "QUIT" => ok(),
        _ => inner(args),
    }
}

pub fn cluster_config(seed_port: u16) -> ClusterConfig {
    ClusterConfig {
        seeds: vec![("127.0.0.1".into(), seed_port)],
        node: ConnectionConfig {
            reconnect_delay_ms: 10,
            ..ConnectionConfig::default()
        },
        rng_seed: Some(1),
        slot_refresh_interval_ms: 0,
        ..ClusterConfig::default()
    }
}

// ── Typed client ──

/// A standalone client over a fresh [`store`].
pub async fn client() -> (MockServer, respline::Client<respline::StandaloneRouter>) {
    let server = MockServer::start(store()).await;
    let client = respline::Client::connect(server.config()).await.unwrap();
    (server, client)
}

//! Cluster topology router.
//!
//! Routes each command to the node that owns its key's hash slot, following
//! MOVED and ASK redirects. The slot table maps all 16384 slots to an
//! ordered node list (primary first) and is replaced wholesale on every
//! discovery; readers clone the current `Arc` and never see a half-built
//! table.
//!
//! Every node gets one pipelined [`Connection`], shared by all the slots it
//! serves and kept across refreshes. Replica connections send READONLY on
//! every (re)connect.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::command::{Command, CommandClass};
use crate::config::{ClusterConfig, ConnectionConfig};
use crate::connection::{check_args, Connection, ConnectionState};
use crate::crc16::SLOT_COUNT;
use crate::error::{Error, Result, ServerError, ServerErrorKind};
use crate::resp::types::Reply;
use crate::router::slots::{parse_cluster_slots, NodeIdentity, SlotRange, SlotTable};
use crate::router::{Router, RoutingMode};

/// Maximum number of MOVED/ASK redirects followed per command.
const MAX_REDIRECTS: usize = 5;

type ReplyFuture = Pin<Box<dyn Future<Output = Result<Reply>> + Send + 'static>>;

/// Commands issued before the first discovery, in issue order.
type Buffered = Vec<(Command, oneshot::Sender<Result<Reply>>)>;

// ── Redirects ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectKind {
    Ask,
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Redirect {
    kind: RedirectKind,
    slot: u16,
    host: String,
    port: u16,
}

/// The redirect carried by an error reply, if any.
fn redirect_of(result: &Result<Reply>) -> Option<Redirect> {
    let Err(Error::Server(e)) = result else {
        return None;
    };
    let (kind, slot, host, port) = match &e.kind {
        ServerErrorKind::Ask { slot, host, port } => (RedirectKind::Ask, slot, host, port),
        ServerErrorKind::Moved { slot, host, port } => (RedirectKind::Moved, slot, host, port),
        _ => return None,
    };
    Some(Redirect {
        kind,
        slot: *slot,
        host: host.clone(),
        port: *port,
    })
}

/// Host part of a "host:port" address.
fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(h, _)| h);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// A "host:port" address as a node identity without an id.
fn node_of(addr: &str) -> Option<NodeIdentity> {
    let port = addr.rsplit_once(':')?.1.parse().ok()?;
    Some(NodeIdentity::new(host_of(addr), port, None))
}

/// Node map key: node id (or address) and whether the connection is a
/// read-only replica connection.
type NodeKey = (String, bool);

// ── ClusterRouter ─────────────────────────────────────────────────

/// Router for a sharded cluster. Clones share the same state.
#[derive(Clone)]
pub struct ClusterRouter {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClusterConfig,
    table: RwLock<Arc<SlotTable<Connection>>>,
    /// Live connections, keyed by node id (or address when only known from
    /// a redirect) and role.
    nodes: Mutex<HashMap<NodeKey, Connection>>,
    rng: Mutex<StdRng>,
    /// `Some` until the first discovery finishes.
    startup: Mutex<Option<Buffered>>,
    /// A MOVED-triggered refresh is in flight.
    refreshing: AtomicBool,
    closed: AtomicBool,
    fatal: Mutex<Option<ServerError>>,
}

impl fmt::Debug for ClusterRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRouter")
            .field("nodes", &self.node_addrs())
            .field("table", &*self.inner.table.read())
            .finish()
    }
}

impl ClusterRouter {
    /// Discover the topology, then return a ready router.
    ///
    /// Tries the seeds in order and fails if none answers `CLUSTER SLOTS`.
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        let router = Self::new(config, false);
        router.inner.refresh().await?;
        router.start_refresher();
        Ok(router)
    }

    /// Return at once and discover in the background.
    ///
    /// Commands issued before the slot table is known are held and routed
    /// in their original order once it is. Must be called within a tokio
    /// runtime.
    pub fn open(config: ClusterConfig) -> Self {
        let router = Self::new(config, true);
        let inner = Arc::clone(&router.inner);
        tokio::spawn(async move {
            let discovered = inner.refresh().await;
            inner.flush_startup(discovered);
        });
        router.start_refresher();
        router
    }

    fn new(config: ClusterConfig, buffer_until_ready: bool) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                table: RwLock::new(Arc::new(SlotTable::empty())),
                nodes: Mutex::new(HashMap::new()),
                rng: Mutex::new(rng),
                startup: Mutex::new(buffer_until_ready.then(Vec::new)),
                refreshing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                fatal: Mutex::new(None),
            }),
        }
    }

    /// Background slot refresh. Holds only a weak reference, so it stops
    /// once every handle is dropped.
    fn start_refresher(&self) {
        let Some(period) = self.inner.config.slot_refresh_interval() else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = inner.refresh().await {
                    warn!(error = %e, "periodic slot refresh failed");
                }
            }
        });
    }

    /// Queue a command on its node and return a future for the reply.
    ///
    /// The command is queued before this returns. Redirects are followed
    /// inside the future.
    pub fn execute(&self, cmd: Command) -> impl Future<Output = Result<Reply>> + Send + 'static {
        self.inner.dispatch(cmd)
    }

    /// Queue a command without waiting for its reply.
    ///
    /// An error reply other than a redirect closes the router: it is logged,
    /// every node connection is terminated, and later commands fail with
    /// [`Error::Unhandled`].
    pub fn send(&self, cmd: Command) -> Result<()> {
        self.inner.check_open()?;
        check_args(&cmd)?;
        let name = cmd.name().to_string();
        let reply = self.inner.dispatch(cmd);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match reply.await {
                Err(Error::Server(e)) => {
                    error!(command = %name, error = %e, "error reply to a command sent without a handler");
                    inner.fail(e);
                }
                Err(e) => debug!(command = %name, error = %e, "command without handler failed"),
                Ok(_) => {}
            }
        });
        Ok(())
    }

    /// The connection a command would be sent to right now.
    pub fn route(&self, cmd: &Command) -> Result<Connection> {
        self.inner
            .route(cmd)
            .map_err(|slot| Error::Cluster(format!("no node serves slot {slot}")))
    }

    /// Send `cmd` to every primary; replies in slot order of the primaries.
    pub async fn all_primaries(&self, cmd: Command) -> Result<Vec<Reply>> {
        self.fan_out(cmd, false).await
    }

    /// Send `cmd` to every node, replicas included.
    pub async fn all_nodes(&self, cmd: Command) -> Result<Vec<Reply>> {
        self.fan_out(cmd, true).await
    }

    /// Send to every target at once and wait for all replies. The first
    /// failure is returned instead; the remaining replies are discarded.
    async fn fan_out(&self, cmd: Command, replicas: bool) -> Result<Vec<Reply>> {
        self.inner.check_open()?;
        check_args(&cmd)?;
        let targets = self.inner.targets(replicas).await?;

        let mut set = JoinSet::new();
        for (i, conn) in targets.iter().enumerate() {
            let reply = conn.execute(cmd.clone());
            set.spawn(async move { (i, reply.await) });
        }

        let mut replies: Vec<Option<Reply>> = vec![None; targets.len()];
        while let Some(joined) = set.join_next().await {
            let (i, reply) =
                joined.map_err(|e| Error::Cluster(format!("fan-out task failed: {e}")))?;
            replies[i] = Some(reply?);
        }
        Ok(replies.into_iter().flatten().collect())
    }

    /// Re-read the topology now.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// Snapshot of the current slot table.
    pub fn slot_table(&self) -> Arc<SlotTable<Connection>> {
        Arc::clone(&*self.inner.table.read())
    }

    /// Addresses of every node with a connection, sorted.
    pub fn node_addrs(&self) -> Vec<String> {
        let mut addrs: Vec<_> = self
            .inner
            .nodes
            .lock()
            .values()
            .map(|c| c.addr().to_string())
            .collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    /// QUIT every node and stop routing.
    pub async fn quit(&self) -> Result<()> {
        let nodes = self.inner.close();
        let mut set = JoinSet::new();
        for conn in nodes {
            set.spawn(async move { conn.quit().await });
        }
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(Error::Cluster(e.to_string()));
                }
                Ok(Ok(())) => {}
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Close every node connection immediately.
    pub fn terminate(&self) {
        for conn in self.inner.close() {
            conn.terminate();
        }
    }
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        if !self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        Err(match &*self.fatal.lock() {
            Some(e) => Error::Unhandled(e.clone()),
            None => Error::Closed,
        })
    }

    /// Mark closed; fail buffered commands and hand back every connection.
    fn close(&self) -> Vec<Connection> {
        self.closed.store(true, Ordering::Release);
        if let Some(buffered) = self.startup.lock().take() {
            for (_, tx) in buffered {
                let _ = tx.send(Err(Error::Closed));
            }
        }
        *self.table.write() = Arc::new(SlotTable::empty());
        self.nodes.lock().drain().map(|(_, c)| c).collect()
    }

    /// An error reply reached a command without a handler.
    fn fail(&self, e: ServerError) {
        *self.fatal.lock() = Some(e);
        for conn in self.close() {
            conn.terminate();
        }
    }

    // ── Dispatch ──

    fn dispatch(self: &Arc<Self>, cmd: Command) -> ReplyFuture {
        if let Err(e) = self.check_open().and_then(|()| check_args(&cmd)) {
            return Box::pin(async move { Err(e) });
        }
        {
            let mut startup = self.startup.lock();
            if let Some(buffered) = startup.as_mut() {
                let (tx, rx) = oneshot::channel();
                buffered.push((cmd, tx));
                return Box::pin(async move { rx.await.unwrap_or_else(|_| Err(Error::Closed)) });
            }
        }
        self.dispatch_routed(cmd)
    }

    /// Route against the current table and queue on the chosen node.
    fn dispatch_routed(self: &Arc<Self>, cmd: Command) -> ReplyFuture {
        let inner = Arc::clone(self);
        match self.route(&cmd) {
            Ok(conn) => {
                let conn = self.usable(conn);
                let first = conn.execute(cmd.clone());
                Box::pin(async move {
                    let result = first.await;
                    inner.follow(cmd, result).await
                })
            }
            // Empty or stale table: discover, then try once more
            Err(_) => Box::pin(async move {
                inner.refresh().await?;
                let conn = inner
                    .route(&cmd)
                    .map_err(|slot| Error::Cluster(format!("no node serves slot {slot}")))?;
                let conn = inner.usable(conn);
                let result = conn.execute(cmd.clone()).await;
                inner.follow(cmd, result).await
            }),
        }
    }

    /// Hand the commands held during startup to their nodes, in order.
    fn flush_startup(self: &Arc<Self>, discovered: Result<()>) {
        let mut startup = self.startup.lock();
        let Some(buffered) = startup.take() else {
            return;
        };
        match discovered {
            Ok(()) => {
                for (cmd, tx) in buffered {
                    let reply = self.dispatch_routed(cmd);
                    tokio::spawn(async move {
                        let _ = tx.send(reply.await);
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, held = buffered.len(), "initial discovery failed");
                let msg = match &e {
                    Error::Cluster(m) => m.clone(),
                    other => other.to_string(),
                };
                for (_, tx) in buffered {
                    let _ = tx.send(Err(Error::Cluster(msg.clone())));
                }
            }
        }
    }

    // ── Routing ──

    /// Pick a connection for `cmd`, or the slot nobody serves.
    fn route(&self, cmd: &Command) -> std::result::Result<Connection, u16> {
        let slot = cmd
            .slot()
            .unwrap_or_else(|| self.rng.lock().gen_range(0..SLOT_COUNT));
        let table = Arc::clone(&*self.table.read());
        let nodes = table.nodes(slot).ok_or(slot)?;
        let idx = self.pick(cmd.class(), nodes.len());
        nodes.get(idx).cloned().ok_or(slot)
    }

    /// Index into a slot's node list. Writes and admin commands take the
    /// primary; reads follow the routing mode.
    fn pick(&self, class: CommandClass, candidates: usize) -> usize {
        if class != CommandClass::Read || candidates < 2 {
            return 0;
        }
        let mode = self.config.routing;
        if mode.contains(RoutingMode::ANY_READS) {
            self.rng.lock().gen_range(0..candidates)
        } else if mode.contains(RoutingMode::REPLICA_READS) {
            self.rng.lock().gen_range(1..candidates)
        } else {
            0
        }
    }

    /// Distinct fan-out targets in slot order.
    async fn targets(&self, replicas: bool) -> Result<Vec<Connection>> {
        let empty = self.table.read().is_empty();
        if empty {
            self.refresh().await?;
        }
        let table = Arc::clone(&*self.table.read());
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for nodes in table.ranges() {
            let take = if replicas { nodes.len() } else { 1 };
            for conn in &nodes[..take] {
                if seen.insert(conn.addr().to_string()) {
                    out.push(self.reopen(conn));
                }
            }
        }
        Ok(out)
    }

    // ── Redirects ──

    /// Retry `cmd` while the reply is a redirect.
    async fn follow(self: &Arc<Self>, cmd: Command, mut result: Result<Reply>) -> Result<Reply> {
        let mut redirects = 0;
        loop {
            let Some(redirect) = redirect_of(&result) else {
                return result;
            };
            if redirects == MAX_REDIRECTS {
                warn!(command = cmd.name(), slot = redirect.slot, "too many redirects");
                return Err(Error::Cluster(format!(
                    "{}: gave up after {MAX_REDIRECTS} redirects (slot {})",
                    cmd.name(),
                    redirect.slot
                )));
            }
            redirects += 1;

            let conn = self.node_at(&redirect.host, redirect.port);
            debug!(
                command = cmd.name(),
                slot = redirect.slot,
                addr = conn.addr(),
                kind = ?redirect.kind,
                "following redirect"
            );
            result = match redirect.kind {
                RedirectKind::Ask => Self::ask(&conn, cmd.clone()).await,
                RedirectKind::Moved => {
                    self.schedule_refresh();
                    conn.execute(cmd.clone()).await
                }
            };
        }
    }

    /// ASKING then the command, pipelined on the target node.
    async fn ask(conn: &Connection, cmd: Command) -> Result<Reply> {
        let mut batch = conn.batch();
        batch.add(Command::new("ASKING")).add(cmd);
        let mut replies = batch.run().await?;
        match replies.pop() {
            Some(reply) => reply.into_result(),
            None => Err(Error::Protocol("no reply after ASKING".into())),
        }
    }

    /// The connection for a redirect target, opened on first use.
    fn node_at(&self, host: &str, port: u16) -> Connection {
        self.connection_to(&NodeIdentity::new(host, port, None), false)
    }

    /// `conn`, or a fresh connection to its node if it has closed for good.
    /// A node that was down during discovery stays in the table with a
    /// closed connection until one of these brings it back.
    fn usable(self: &Arc<Self>, conn: Connection) -> Connection {
        if conn.state() != ConnectionState::Closed {
            return conn;
        }
        self.schedule_refresh();
        self.reopen(&conn)
    }

    fn reopen(&self, conn: &Connection) -> Connection {
        if conn.state() != ConnectionState::Closed {
            return conn.clone();
        }
        match node_of(conn.addr()) {
            Some(node) => self.connection_to(&node, conn.is_read_only()),
            None => conn.clone(),
        }
    }

    /// A live connection to `node` in the given role. A closed one is
    /// replaced under the same key, so the next install keeps the new one.
    fn connection_to(&self, node: &NodeIdentity, replica: bool) -> Connection {
        let addr = node.addr();
        let mut nodes = self.nodes.lock();
        let mut stale = None;
        for (key, conn) in nodes.iter() {
            if conn.addr() != addr || conn.is_read_only() != replica {
                continue;
            }
            if conn.state() != ConnectionState::Closed {
                return conn.clone();
            }
            stale = Some(key.clone());
        }
        let conn = Connection::open(self.node_config(node, replica));
        if stale.is_some() {
            debug!(addr = %addr, replica, "reopening closed node connection");
        }
        nodes.insert(stale.unwrap_or((addr, replica)), conn.clone());
        conn
    }

    /// At most one background refresh in flight.
    fn schedule_refresh(self: &Arc<Self>) {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.refresh().await {
                warn!(error = %e, "scheduled slot refresh failed");
            }
            inner.refreshing.store(false, Ordering::Release);
        });
    }

    // ── Discovery ──

    fn node_config(&self, node: &NodeIdentity, replica: bool) -> ConnectionConfig {
        let mut config = self.config.node.for_node(&node.host, node.port);
        config.read_only = replica;
        config
    }

    /// Ask known primaries, then the seeds, for `CLUSTER SLOTS` and install
    /// the first answer.
    async fn refresh(&self) -> Result<()> {
        let known: Vec<Connection> = {
            let table = Arc::clone(&*self.table.read());
            table
                .ranges()
                .filter_map(|nodes| nodes.first())
                .filter(|c| c.state() != ConnectionState::Closed)
                .cloned()
                .collect()
        };

        let mut last_err = None;
        for conn in known {
            match Self::fetch_slots(&conn).await {
                Ok(ranges) => {
                    self.install(ranges, None);
                    return Ok(());
                }
                Err(e) => {
                    warn!(addr = conn.addr(), error = %e, "slot discovery failed");
                    last_err = Some(e);
                }
            }
        }

        for (host, port) in &self.config.seeds {
            let seed = NodeIdentity::new(host.as_str(), *port, None);
            let conn = match Connection::connect(self.node_config(&seed, false)).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(seed = %seed.addr(), error = %e, "seed unreachable");
                    last_err = Some(e);
                    continue;
                }
            };
            match Self::fetch_slots(&conn).await {
                Ok(ranges) => {
                    self.install(ranges, Some(conn));
                    return Ok(());
                }
                Err(e) => {
                    warn!(seed = %seed.addr(), error = %e, "slot discovery failed");
                    conn.terminate();
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Cluster(format!("topology discovery failed: {e}")),
            None => Error::Cluster("no seed nodes configured".into()),
        })
    }

    async fn fetch_slots(conn: &Connection) -> Result<Vec<SlotRange>> {
        let reply = conn
            .execute(Command::new("CLUSTER").arg("SLOTS"))
            .await?;
        let ranges = parse_cluster_slots(&reply, host_of(conn.addr()))?;
        if ranges.is_empty() {
            return Err(Error::Cluster("CLUSTER SLOTS returned no ranges".into()));
        }
        Ok(ranges)
    }

    /// Build a table from `ranges` and swap it in.
    ///
    /// Connections are reused per node id and role, so a node listed as a
    /// primary in one range and a replica in another gets one connection
    /// for each. Closed connections and nodes no longer listed are retired.
    fn install(&self, ranges: Vec<SlotRange>, mut bootstrap: Option<Connection>) {
        let mut nodes = self.nodes.lock();
        let mut live: HashMap<NodeKey, Connection> = HashMap::new();
        let mut retired = Vec::new();
        let mut spans = Vec::with_capacity(ranges.len());

        for range in &ranges {
            let mut conns = Vec::with_capacity(range.nodes.len());
            for (i, node) in range.nodes.iter().enumerate() {
                let replica = i > 0;
                let key = (node.key(), replica);
                if let Some(conn) = live.get(&key) {
                    conns.push(conn.clone());
                    continue;
                }
                let addr = node.addr();
                let existing = nodes
                    .remove(&key)
                    .or_else(|| nodes.remove(&(addr.clone(), replica)));
                let conn = match existing {
                    Some(c) if c.is_read_only() == replica && c.state() != ConnectionState::Closed => c,
                    other => {
                        retired.extend(other);
                        match bootstrap.take() {
                            Some(b) if !replica && b.addr() == addr => b,
                            b => {
                                bootstrap = b;
                                Connection::open(self.node_config(node, replica))
                            }
                        }
                    }
                };
                live.insert(key, conn.clone());
                conns.push(conn);
            }
            spans.push((range.start, range.end, conns));
        }

        retired.extend(std::mem::replace(&mut *nodes, live).into_values());
        let table = SlotTable::build(spans);
        debug!(
            ranges = ranges.len(),
            nodes = nodes.len(),
            covered = table.covered(),
            "installed slot table"
        );
        *self.table.write() = Arc::new(table);
        drop(nodes);

        if let Some(conn) = bootstrap {
            conn.terminate();
        }
        for conn in retired {
            debug!(addr = conn.addr(), "retiring node connection");
            tokio::spawn(async move {
                let _ = conn.quit().await;
            });
        }
    }
}

impl Router for ClusterRouter {
    async fn execute(&self, cmd: Command) -> Result<Reply> {
        self.inner.dispatch(cmd).await
    }

    /// Every command is queued on its node before any reply is awaited, so
    /// commands sharing a node go out in one write.
    async fn pipeline(&self, cmds: Vec<Command>) -> Result<Vec<Reply>> {
        let pending: Vec<ReplyFuture> = cmds.into_iter().map(|c| self.inner.dispatch(c)).collect();
        let mut out = Vec::with_capacity(pending.len());
        for reply in pending {
            out.push(match reply.await {
                Ok(reply) => reply,
                Err(Error::Server(e)) => Reply::Error(e.message),
                Err(e) => return Err(e),
            });
        }
        Ok(out)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

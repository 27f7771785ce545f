//! Connection configuration and URL parsing.
//!
//! Supports the following URL schemes:
//! - `redis://[user:pass@]host[:port][/db]`  single server
//! - `rediss://[user:pass@]host[:port][/db]`  single server + TLS
//! - `redis+cluster://host[:port][,host[:port]…][/db]`  cluster
//! - `rediss+cluster://host[:port][,host[:port]…][/db]`  cluster + TLS
//!
//! TLS is recognised so that URLs round-trip, but connecting with it set is
//! refused.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::resp::parser::DEFAULT_MAX_BULK_LEN;
use crate::router::RoutingMode;

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Where to connect.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    /// One server.
    Standalone,
    /// Cluster reached through these seed nodes.
    Cluster { nodes: Vec<(String, u16)> },
}

/// Per-connection settings. In cluster mode this is the template every node
/// connection is built from.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Optional username (ACL).
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database index sent with SELECT after connecting.
    pub db: u16,
    pub tls: bool,
    pub topology: Topology,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Largest bulk payload accepted from the server.
    pub max_buffer_size: usize,
    /// Reconnect after losing an established connection.
    pub auto_reconnect: bool,
    /// Pause between reconnect attempts in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Give up after this many consecutive failed attempts (0 = never).
    pub max_reconnect_attempts: u32,
    /// Send READONLY after connecting (replica connections).
    pub read_only: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            tls: false,
            topology: Topology::Standalone,
            connect_timeout_ms: 5000,
            max_buffer_size: DEFAULT_MAX_BULK_LEN,
            auto_reconnect: true,
            reconnect_delay_ms: 100,
            max_reconnect_attempts: 0,
            read_only: false,
        }
    }
}

impl ConnectionConfig {
    /// Parse a URL into a ConnectionConfig.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config = Self::default();

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("invalid URL, missing ://: {url}")))?;

        match scheme {
            "redis" => {}
            "rediss" => config.tls = true,
            "redis+cluster" | "rediss+cluster" => {
                config.tls = scheme == "rediss+cluster";
                parse_cluster_url(&mut config, rest)?;
                return Ok(config);
            }
            _ => return Err(Error::Config(format!("unknown URL scheme: {scheme}"))),
        }

        parse_standalone_url(&mut config, rest)?;
        Ok(config)
    }

    /// "host:port", with IPv6 hosts bracketed.
    pub fn primary_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Same settings, pointed at another node.
    pub fn for_node(&self, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            topology: Topology::Standalone,
            ..self.clone()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Cluster settings: seeds plus the per-node connection template.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Bootstrap nodes tried in order during discovery.
    pub seeds: Vec<(String, u16)>,
    /// Template for every node connection.
    pub node: ConnectionConfig,
    /// Read routing policy; writes always go to the primary.
    pub routing: RoutingMode,
    /// Seed for node tie-breaks and keyless slot picks. `None` seeds from
    /// the OS.
    pub rng_seed: Option<u64>,
    /// Background topology refresh period (0 = off).
    pub slot_refresh_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: vec![("127.0.0.1".to_string(), DEFAULT_PORT)],
            node: ConnectionConfig::default(),
            routing: RoutingMode::PRIMARY,
            rng_seed: None,
            slot_refresh_interval_ms: 30_000,
        }
    }
}

impl ClusterConfig {
    /// Parse a `redis+cluster://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        Self::from_connection(ConnectionConfig::from_url(url)?)
    }

    /// Build from a parsed config whose topology is a cluster.
    pub fn from_connection(config: ConnectionConfig) -> Result<Self> {
        let Topology::Cluster { nodes } = &config.topology else {
            return Err(Error::Config(
                "cluster mode needs a redis+cluster:// URL".into(),
            ));
        };
        Ok(Self {
            seeds: nodes.clone(),
            node: config.for_node(&config.host, config.port),
            ..Self::default()
        })
    }

    pub fn with_routing(mut self, routing: RoutingMode) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn slot_refresh_interval(&self) -> Option<Duration> {
        (self.slot_refresh_interval_ms > 0)
            .then(|| Duration::from_millis(self.slot_refresh_interval_ms))
    }
}

/// Parse `[user:pass@]host[:port][/db]`
fn parse_standalone_url(config: &mut ConnectionConfig, rest: &str) -> Result<()> {
    let (host_part, db_part) = split_path(rest);
    parse_db(config, db_part)?;

    let host_port = if let Some((userinfo, hp)) = host_part.rsplit_once('@') {
        parse_userinfo(config, userinfo);
        hp
    } else {
        host_part
    };

    let (host, port) = parse_host_port(host_port, DEFAULT_PORT)?;
    config.host = host;
    config.port = port;
    Ok(())
}

/// Parse `[user:pass@]host1[:port][,host2[:port]…][/db]`
fn parse_cluster_url(config: &mut ConnectionConfig, rest: &str) -> Result<()> {
    let (host_part, db_part) = split_path(rest);
    parse_db(config, db_part)?;

    let hosts_str = if let Some((userinfo, hp)) = host_part.rsplit_once('@') {
        parse_userinfo(config, userinfo);
        hp
    } else {
        host_part
    };

    let nodes = hosts_str
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(|addr| parse_host_port(addr, DEFAULT_PORT))
        .collect::<Result<Vec<_>>>()?;

    let Some((host, port)) = nodes.first().cloned() else {
        return Err(Error::Config(
            "cluster URL must include at least one node".into(),
        ));
    };

    config.host = host;
    config.port = port;
    config.topology = Topology::Cluster { nodes };
    Ok(())
}

// ── URL parsing helpers ────────────────────────────────────────────

/// Split `rest` into (before_path, Some(path)) or (rest, None).
fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('/') {
        Some((before, after)) if !after.is_empty() => (before, Some(after)),
        Some((before, _)) => (before, None),
        None => (rest, None),
    }
}

fn parse_db(config: &mut ConnectionConfig, db_part: Option<&str>) -> Result<()> {
    if let Some(db_str) = db_part {
        config.db = db_str
            .parse()
            .map_err(|_| Error::Config(format!("invalid db number: {db_str}")))?;
    }
    Ok(())
}

/// Parse `user:pass`, `:pass` or a bare password into config.
fn parse_userinfo(config: &mut ConnectionConfig, userinfo: &str) {
    match userinfo.split_once(':') {
        Some((user, pass)) => {
            if !user.is_empty() {
                config.username = Some(user.to_string());
            }
            if !pass.is_empty() {
                config.password = Some(pass.to_string());
            }
        }
        None if !userinfo.is_empty() => config.password = Some(userinfo.to_string()),
        None => {}
    }
}

/// Parse `host[:port]` or `[ipv6]:port`.
pub(crate) fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16)> {
    let (mut host, port) = if let Some(inner) = s.strip_prefix('[') {
        let close = inner
            .find(']')
            .ok_or_else(|| Error::Config(format!("unclosed IPv6 bracket: {s}")))?;
        let port = match inner[close + 1..].strip_prefix(':') {
            Some(port_str) => port_str
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {port_str}")))?,
            None => default_port,
        };
        (inner[..close].to_string(), port)
    } else if s.matches(':').count() > 1 {
        // bare IPv6, no port
        (s.to_string(), default_port)
    } else if let Some((h, p)) = s.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (s.to_string(), default_port)
    };

    if host.is_empty() {
        host = "127.0.0.1".to_string();
    }
    Ok((host, port))
}

// ── Tests ──────────────────────────────────────────────────────────

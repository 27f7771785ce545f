//! Cluster slot table and `CLUSTER SLOTS` parsing.
//!
//! The table is a flat array of 16384 entries. Every slot of one range
//! shares the same `Arc<[T]>` node list (primary first, then replicas), so
//! a lookup is a single index and a rebuilt table costs one allocation per
//! range.

use std::fmt;
use std::sync::Arc;

use crate::crc16::SLOT_COUNT;
use crate::error::{Error, Result};
use crate::resp::types::Reply;

/// A cluster node as reported by `CLUSTER SLOTS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub host: String,
    pub port: u16,
    /// Cluster-assigned node id; absent on very old servers.
    pub id: Option<String>,
}

impl NodeIdentity {
    pub fn new(host: impl Into<String>, port: u16, id: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            id,
        }
    }

    /// "host:port", with IPv6 hosts bracketed.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Key used to deduplicate connections: the node id when known.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self.addr(),
        }
    }
}

/// One entry of a `CLUSTER SLOTS` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    /// Primary first, then replicas.
    pub nodes: Vec<NodeIdentity>,
}

/// Parse a `CLUSTER SLOTS` reply.
///
/// Each element is `[start, end, [host, port, id], replica…]`. An empty host
/// means "the node you asked", so `queried_host` is substituted. Malformed
/// replica entries are skipped; a malformed range or primary is an error.
pub fn parse_cluster_slots(reply: &Reply, queried_host: &str) -> Result<Vec<SlotRange>> {
    let Reply::Array(entries) = reply else {
        return Err(Error::Cluster(format!(
            "CLUSTER SLOTS: expected array, got {}",
            reply.type_name()
        )));
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let items = match entry {
            Reply::Array(items) if items.len() >= 3 => items,
            _ => return Err(Error::Cluster("CLUSTER SLOTS: malformed range".into())),
        };
        let start = slot_bound(&items[0])?;
        let end = slot_bound(&items[1])?;
        if start > end {
            return Err(Error::Cluster(format!(
                "CLUSTER SLOTS: inverted range {start}-{end}"
            )));
        }

        let mut nodes = Vec::with_capacity(items.len() - 2);
        nodes.push(parse_node(&items[2], queried_host)?);
        nodes.extend(
            items[3..]
                .iter()
                .filter_map(|n| parse_node(n, queried_host).ok()),
        );
        ranges.push(SlotRange { start, end, nodes });
    }
    Ok(ranges)
}

fn slot_bound(v: &Reply) -> Result<u16> {
    v.as_int()
        .and_then(|i| u16::try_from(i).ok())
        .filter(|&s| s < SLOT_COUNT)
        .ok_or_else(|| Error::Cluster("CLUSTER SLOTS: invalid slot number".into()))
}

fn parse_node(v: &Reply, queried_host: &str) -> Result<NodeIdentity> {
    let items = match v {
        Reply::Array(items) if items.len() >= 2 => items,
        _ => return Err(Error::Cluster("CLUSTER SLOTS: malformed node".into())),
    };
    let host = items[0]
        .as_str()
        .ok_or_else(|| Error::Cluster("CLUSTER SLOTS: invalid host".into()))?;
    let port = items[1]
        .as_int()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| Error::Cluster("CLUSTER SLOTS: invalid port".into()))?;
    let id = items.get(2).and_then(Reply::as_str).map(str::to_string);
    let host = if host.is_empty() { queried_host } else { host };
    Ok(NodeIdentity::new(host, port, id))
}

/// Slot → node list. Built whole and never mutated afterwards.
pub struct SlotTable<T> {
    slots: Box<[Option<Arc<[T]>>]>,
}

impl<T> SlotTable<T> {
    /// A table with every slot unset.
    pub fn empty() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| None).collect(),
        }
    }

    /// Build from `(start, end, nodes)` ranges, both bounds inclusive.
    /// Later ranges win where they overlap; empty node lists leave their
    /// slots unset.
    pub fn build<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (u16, u16, Vec<T>)>,
    {
        let mut table = Self::empty();
        for (start, end, nodes) in ranges {
            let end = end.min(SLOT_COUNT - 1);
            if nodes.is_empty() || start > end {
                continue;
            }
            let nodes: Arc<[T]> = nodes.into();
            for slot in &mut table.slots[start as usize..=end as usize] {
                *slot = Some(Arc::clone(&nodes));
            }
        }
        table
    }

    /// Node list for `slot`, primary first.
    pub fn nodes(&self, slot: u16) -> Option<&[T]> {
        self.slots.get(slot as usize)?.as_deref()
    }

    pub fn primary(&self, slot: u16) -> Option<&T> {
        self.nodes(slot)?.first()
    }

    /// Number of slots with a node list.
    pub fn covered(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Each distinct node list once, in slot order.
    pub fn ranges(&self) -> impl Iterator<Item = &[T]> + '_ {
        let mut last: Option<&Arc<[T]>> = None;
        self.slots.iter().filter_map(move |s| {
            let nodes = s.as_ref()?;
            if last.is_some_and(|l| Arc::ptr_eq(l, nodes)) {
                return None;
            }
            last = Some(nodes);
            Some(&**nodes)
        })
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for SlotTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("covered", &self.covered())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

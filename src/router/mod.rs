pub mod cluster;
pub mod slots;
pub mod standalone;

pub use cluster::ClusterRouter;
pub use slots::{NodeIdentity, SlotTable};
pub use standalone::StandaloneRouter;

use std::future::Future;
use std::ops::BitOr;

use crate::command::Command;
use crate::error::Result;
use crate::resp::types::Reply;

/// Common interface for single-node and cluster deployments.
pub trait Router: Send + Sync {
    /// Execute a single command and return its reply.
    fn execute(&self, cmd: Command) -> impl Future<Output = Result<Reply>> + Send;

    /// Execute a batch and return one reply per command, in order.
    ///
    /// Error replies are returned in place as [`Reply::Error`].
    fn pipeline(&self, cmds: Vec<Command>) -> impl Future<Output = Result<Vec<Reply>>> + Send;
}

/// Where read commands may be served. Writes and admin commands always go
/// to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoutingMode(u8);

impl RoutingMode {
    /// Every command goes to the primary.
    pub const PRIMARY: Self = Self(0);
    /// Reads go to a random replica, or the primary if the slot has none.
    pub const REPLICA_READS: Self = Self(0b01);
    /// Reads go to any node serving the slot, primary included.
    pub const ANY_READS: Self = Self(0b10);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RoutingMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

//! Pipelined RESP2 client with cluster slot routing.
//!
//! - [`resp`]: resumable reply decoder and command encoder
//! - [`connection`]: one socket, strict FIFO pipelining, cork and reconnect
//! - [`router`]: standalone and cluster routing behind the [`Router`] trait
//! - [`client`]: typed wrappers over a router

pub mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod crc16;
pub mod error;
pub mod queue;
pub mod resp;
pub mod router;

pub use client::Client;
pub use command::{Arg, Command, CommandClass, CommandFlags};
pub use config::{ClusterConfig, ConnectionConfig, Topology};
pub use connection::{Batch, Connection, ConnectionState};
pub use crc16::hash_slot;
pub use error::{Error, Result, ServerError, ServerErrorKind};
pub use queue::CommandQueue;
pub use resp::{ProtocolReader, ProtocolWriter, Reply};
pub use router::{ClusterRouter, Router, RoutingMode, StandaloneRouter};

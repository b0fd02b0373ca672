//! SetuCluster - replication primitives for single-master compute clusters
//!
//! A cluster here is one master node and N slave nodes running the same
//! application in lockstep. The master performs every non-deterministic
//! operation (device reads, random draws, file I/O) and replicates the raw
//! bytes to all slaves, so that every node computes bit-identical state.
//!
//! The building blocks, bottom up:
//!
//! - [`transport`]: raw byte transports (TCP, in-memory mock)
//! - [`pipe`]: buffered, byte-order-aware streams over a transport
//! - [`packet`]: the reference-counted unit of replication
//! - [`multiplexer`]: role-aware packet fan-out and collective operations
//! - [`multicast`]: the single logical stream written by the master and
//!   read identically by every slave
//! - [`sync`]: checkpointing that keeps per-node child-thread indices equal

pub mod actions;
pub mod config;
pub mod error;
pub mod multicast;
pub mod multiplexer;
pub mod packet;
pub mod pipe;
pub mod sync;
pub mod transport;

pub use config::ClusterConfig;
pub use error::{Error, Result};
pub use multicast::MulticastPipe;
pub use multiplexer::{ChannelId, GatherOp, LocalMultiplexer, Multiplexer, TcpMultiplexer};
pub use packet::Packet;
pub use pipe::{ByteOrder, Pipe, Wire};
pub use sync::{ChildIndexCounter, ThreadSynchronizer};

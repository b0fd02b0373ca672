//! Role-aware packet routing and collective operations
//!
//! A multiplexer represents one node's membership in the cluster: exactly
//! one node is the master, all others are slaves, and the role never
//! changes. Channels carry independent packet streams from the master to
//! every slave; [`Multiplexer::gather`] is the barrier collective the
//! synchronization layer is built on.
//!
//! Cluster membership is static for the lifetime of a multiplexer; there is
//! no join or leave protocol.

use crate::error::Result;
use crate::packet::Packet;

mod local;
mod tcp;

pub use local::LocalMultiplexer;
pub use tcp::TcpMultiplexer;

/// Identifier of one packet stream within a cluster
pub type ChannelId = u16;

/// Reduction applied by [`Multiplexer::gather`]
///
/// The set is closed by the protocol; dispatch is a plain `match`. All
/// operations are commutative and associative, so the result is independent
/// of contribution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOp {
    Max,
    Min,
    Sum,
}

impl GatherOp {
    /// Combine two contributions
    pub fn apply(self, a: u32, b: u32) -> u32 {
        match self {
            GatherOp::Max => a.max(b),
            GatherOp::Min => a.min(b),
            GatherOp::Sum => a.wrapping_add(b),
        }
    }
}

/// One node's handle on the cluster
///
/// All collective operations must be invoked on every node; a missing
/// participant blocks the rest indefinitely. Timeout and failure recovery
/// belong to the surrounding application, not this layer.
pub trait Multiplexer: Send + Sync {
    /// This node's index; the master is always node 0
    fn node_index(&self) -> usize;

    /// Total number of nodes, master included
    fn num_nodes(&self) -> usize;

    /// Whether this node is the cluster master
    fn is_master(&self) -> bool {
        self.node_index() == 0
    }

    /// Allocate the next channel.
    ///
    /// Allocation is ordinal: nodes must open channels in the same order so
    /// that ids correspond 1:1 across the cluster.
    fn open_channel(&self) -> Result<ChannelId>;

    /// Fan a packet out to every slave, in channel order (master only)
    fn send_packet(&self, channel: ChannelId, packet: Packet) -> Result<()>;

    /// Block until the next packet on this channel arrives (slave only)
    fn recv_packet(&self, channel: ChannelId) -> Result<Packet>;

    /// Barrier collective: every node contributes `value`, the master
    /// reduces with `op` and broadcasts the result. Returns the identical
    /// reduced value on every node; a single-node cluster returns `value`.
    fn gather(&self, value: u32, op: GatherOp) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_op_dispatch() {
        assert_eq!(GatherOp::Max.apply(3, 7), 7);
        assert_eq!(GatherOp::Min.apply(3, 7), 3);
        assert_eq!(GatherOp::Sum.apply(3, 7), 10);
    }

    #[test]
    fn test_sum_wraps() {
        assert_eq!(GatherOp::Sum.apply(u32::MAX, 2), 1);
    }
}

//! In-process cluster for co-located nodes and tests
//!
//! Every node lives in the same process (typically one thread per node) and
//! packets move over bounded channels. Semantics are identical to the TCP
//! multiplexer; only the transport differs.

use super::{ChannelId, GatherOp, Multiplexer};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU16, Ordering};

/// Packets buffered per channel before the master blocks on a slow slave
const PACKET_QUEUE_DEPTH: usize = 64;

/// Default number of pre-wired channels per cluster
pub const DEFAULT_MAX_CHANNELS: u16 = 64;

enum Links {
    Master {
        /// Per-channel, per-slave packet senders
        packet_tx: Vec<Vec<Sender<Packet>>>,
        /// Per-slave gather contribution receivers
        gather_rx: Vec<Receiver<u32>>,
        /// Per-slave gather result senders
        result_tx: Vec<Sender<u32>>,
    },
    Slave {
        /// Per-channel packet receivers
        packet_rx: Vec<Receiver<Packet>>,
        gather_tx: Sender<u32>,
        result_rx: Receiver<u32>,
    },
}

/// One node's handle on an in-process cluster
pub struct LocalMultiplexer {
    node_index: usize,
    num_nodes: usize,
    next_channel: AtomicU16,
    max_channels: u16,
    links: Links,
}

impl LocalMultiplexer {
    /// Create a cluster of `num_nodes` nodes with the default channel budget.
    ///
    /// Element 0 of the returned vector is the master; hand each element to
    /// its node's thread.
    pub fn cluster(num_nodes: usize) -> Result<Vec<LocalMultiplexer>> {
        Self::cluster_with_channels(num_nodes, DEFAULT_MAX_CHANNELS)
    }

    /// Create a cluster with an explicit channel budget
    pub fn cluster_with_channels(
        num_nodes: usize,
        max_channels: u16,
    ) -> Result<Vec<LocalMultiplexer>> {
        if num_nodes == 0 {
            return Err(Error::InvalidConfig(
                "cluster needs at least one node".to_string(),
            ));
        }
        let num_slaves = num_nodes - 1;

        // Channels are pre-wired so that ordinal open_channel() calls line
        // up across nodes without any coordination traffic.
        let mut packet_tx: Vec<Vec<Sender<Packet>>> = Vec::with_capacity(max_channels as usize);
        let mut slave_packet_rx: Vec<Vec<Receiver<Packet>>> = vec![Vec::new(); num_slaves];
        for _ in 0..max_channels {
            let mut senders = Vec::with_capacity(num_slaves);
            for rx_set in slave_packet_rx.iter_mut() {
                let (tx, rx) = bounded(PACKET_QUEUE_DEPTH);
                senders.push(tx);
                rx_set.push(rx);
            }
            packet_tx.push(senders);
        }

        let mut gather_rx = Vec::with_capacity(num_slaves);
        let mut result_tx = Vec::with_capacity(num_slaves);
        let mut slave_sync = Vec::with_capacity(num_slaves);
        for _ in 0..num_slaves {
            let (g_tx, g_rx) = bounded(1);
            let (r_tx, r_rx) = bounded(1);
            gather_rx.push(g_rx);
            result_tx.push(r_tx);
            slave_sync.push((g_tx, r_rx));
        }

        let mut nodes = Vec::with_capacity(num_nodes);
        nodes.push(LocalMultiplexer {
            node_index: 0,
            num_nodes,
            next_channel: AtomicU16::new(0),
            max_channels,
            links: Links::Master {
                packet_tx,
                gather_rx,
                result_tx,
            },
        });
        for (slave, ((gather_tx, result_rx), packet_rx)) in
            slave_sync.into_iter().zip(slave_packet_rx).enumerate()
        {
            nodes.push(LocalMultiplexer {
                node_index: slave + 1,
                num_nodes,
                next_channel: AtomicU16::new(0),
                max_channels,
                links: Links::Slave {
                    packet_rx,
                    gather_tx,
                    result_rx,
                },
            });
        }
        Ok(nodes)
    }
}

impl Multiplexer for LocalMultiplexer {
    fn node_index(&self) -> usize {
        self.node_index
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn open_channel(&self) -> Result<ChannelId> {
        let id = self.next_channel.fetch_add(1, Ordering::SeqCst);
        if id >= self.max_channels {
            return Err(Error::ChannelLimit(self.max_channels));
        }
        Ok(id)
    }

    fn send_packet(&self, channel: ChannelId, packet: Packet) -> Result<()> {
        let senders = match &self.links {
            Links::Master { packet_tx, .. } => packet_tx
                .get(channel as usize)
                .ok_or(Error::ChannelLimit(self.max_channels))?,
            Links::Slave { .. } => return Err(Error::SlaveWrite),
        };
        for tx in senders {
            tx.send(packet.clone())
                .map_err(|_| Error::ChannelClosed("slave packet queue"))?;
        }
        Ok(())
    }

    fn recv_packet(&self, channel: ChannelId) -> Result<Packet> {
        let rx = match &self.links {
            Links::Slave { packet_rx, .. } => packet_rx
                .get(channel as usize)
                .ok_or(Error::ChannelLimit(self.max_channels))?,
            Links::Master { .. } => return Err(Error::MasterRead),
        };
        rx.recv().map_err(|_| Error::ChannelClosed("master hung up"))
    }

    fn gather(&self, value: u32, op: GatherOp) -> Result<u32> {
        match &self.links {
            Links::Master {
                gather_rx,
                result_tx,
                ..
            } => {
                let mut reduced = value;
                for rx in gather_rx {
                    let contribution = rx
                        .recv()
                        .map_err(|_| Error::ChannelClosed("gather contribution"))?;
                    reduced = op.apply(reduced, contribution);
                }
                for tx in result_tx {
                    tx.send(reduced)
                        .map_err(|_| Error::ChannelClosed("gather result"))?;
                }
                Ok(reduced)
            }
            Links::Slave {
                gather_tx,
                result_rx,
                ..
            } => {
                gather_tx
                    .send(value)
                    .map_err(|_| Error::ChannelClosed("gather contribution"))?;
                result_rx
                    .recv()
                    .map_err(|_| Error::ChannelClosed("gather result"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_node_gather_is_trivial() {
        let nodes = LocalMultiplexer::cluster(1).unwrap();
        assert!(nodes[0].is_master());
        assert_eq!(nodes[0].gather(17, GatherOp::Max).unwrap(), 17);
    }

    #[test]
    fn test_roles_fixed_at_creation() {
        let nodes = LocalMultiplexer::cluster(3).unwrap();
        assert!(nodes[0].is_master());
        assert!(!nodes[1].is_master());
        assert!(!nodes[2].is_master());
        assert_eq!(nodes[2].node_index(), 2);
        assert_eq!(nodes[2].num_nodes(), 3);
    }

    #[test]
    fn test_slave_cannot_send() {
        let nodes = LocalMultiplexer::cluster(2).unwrap();
        let err = nodes[1].send_packet(0, Packet::from_vec(vec![1])).unwrap_err();
        assert!(matches!(err, Error::SlaveWrite));
    }

    #[test]
    fn test_master_cannot_recv() {
        let nodes = LocalMultiplexer::cluster(2).unwrap();
        let err = nodes[0].recv_packet(0).unwrap_err();
        assert!(matches!(err, Error::MasterRead));
    }

    #[test]
    fn test_channel_budget_enforced() {
        let nodes = LocalMultiplexer::cluster_with_channels(1, 2).unwrap();
        nodes[0].open_channel().unwrap();
        nodes[0].open_channel().unwrap();
        assert!(matches!(
            nodes[0].open_channel().unwrap_err(),
            Error::ChannelLimit(2)
        ));
    }

    #[test]
    fn test_packet_fanout_preserves_order() {
        let mut nodes = LocalMultiplexer::cluster(3).unwrap();
        let slave_b = nodes.pop().unwrap();
        let slave_a = nodes.pop().unwrap();
        let master = nodes.pop().unwrap();
        let channel = master.open_channel().unwrap();
        assert_eq!(slave_a.open_channel().unwrap(), channel);
        assert_eq!(slave_b.open_channel().unwrap(), channel);

        master.send_packet(channel, Packet::from_vec(vec![1])).unwrap();
        master.send_packet(channel, Packet::from_vec(vec![2])).unwrap();

        for slave in [slave_a, slave_b] {
            let handle = thread::spawn(move || {
                let first = slave.recv_packet(channel).unwrap();
                let second = slave.recv_packet(channel).unwrap();
                (first.as_slice().to_vec(), second.as_slice().to_vec())
            });
            let (first, second) = handle.join().unwrap();
            assert_eq!(first, vec![1]);
            assert_eq!(second, vec![2]);
        }
    }
}

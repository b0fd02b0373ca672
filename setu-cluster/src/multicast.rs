//! The single logical stream replicated from the master to every slave
//!
//! Bytes written by the master become readable, in identical order, on
//! every slave. Writes batch into packets of a configured size; an explicit
//! [`MulticastPipe::flush`] ships a partial packet, and callers are expected
//! to flush at their own logical frame boundaries — there is no timer.
//!
//! Typed values travel in host byte order; replication assumes a
//! homogeneous cluster, since its whole point is bit-identical state.
//!
//! A pipe instance is owned by one logical channel. Concurrent `read_data`
//! or `write_data` calls on the same instance require external
//! serialization.

use crate::error::{Error, Result};
use crate::multiplexer::{ChannelId, Multiplexer};
use crate::packet::Packet;
use crate::pipe::{ByteOrder, Wire};
use std::sync::Arc;

/// Default packet size before a full buffer ships on its own
pub const DEFAULT_PACKET_SIZE: usize = 16 * 1024;

/// One replicated byte stream
pub struct MulticastPipe {
    mux: Arc<dyn Multiplexer>,
    channel: ChannelId,
    packet_size: usize,
    /// Master: bytes accumulated toward the next packet
    write_buf: Vec<u8>,
    /// Slave: packet currently being consumed
    current: Option<Packet>,
    /// Slave: consumption cursor into `current`
    packet_pos: usize,
}

impl MulticastPipe {
    /// Open a new replicated stream on the next channel.
    ///
    /// Every node must create its pipes in the same order so channels
    /// correspond across the cluster.
    pub fn new(mux: Arc<dyn Multiplexer>) -> Result<Self> {
        Self::with_packet_size(mux, DEFAULT_PACKET_SIZE)
    }

    /// Open a stream with an explicit packet size
    pub fn with_packet_size(mux: Arc<dyn Multiplexer>, packet_size: usize) -> Result<Self> {
        if packet_size == 0 || packet_size > crate::packet::MAX_PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "packet size {packet_size} out of range"
            )));
        }
        let channel = mux.open_channel()?;
        Ok(Self {
            mux,
            channel,
            packet_size,
            write_buf: Vec::with_capacity(packet_size),
            current: None,
            packet_pos: 0,
        })
    }

    /// Whether this node is the cluster master
    pub fn is_master(&self) -> bool {
        self.mux.is_master()
    }

    /// Channel this pipe occupies
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Append bytes to the replicated stream (master only).
    ///
    /// Full packets ship immediately; a trailing partial packet stays
    /// buffered until the next write fills it or [`flush`](Self::flush).
    pub fn write_data(&mut self, mut data: &[u8]) -> Result<()> {
        if !self.is_master() {
            return Err(Error::SlaveWrite);
        }
        while !data.is_empty() {
            let room = self.packet_size - self.write_buf.len();
            let take = room.min(data.len());
            self.write_buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.write_buf.len() == self.packet_size {
                self.ship()?;
            }
        }
        Ok(())
    }

    /// Fill `dest` from the replicated stream (slave only).
    ///
    /// Blocks for the next packet whenever the current one is exhausted;
    /// a stalled master stalls the caller indefinitely.
    pub fn read_data(&mut self, dest: &mut [u8]) -> Result<()> {
        if self.is_master() {
            return Err(Error::MasterRead);
        }
        let mut filled = 0;
        while filled < dest.len() {
            let packet = match &self.current {
                Some(packet) if self.packet_pos < packet.len() => packet,
                _ => {
                    self.current = Some(self.mux.recv_packet(self.channel)?);
                    self.packet_pos = 0;
                    continue;
                }
            };
            let tail = &packet.as_slice()[self.packet_pos..];
            let take = tail.len().min(dest.len() - filled);
            dest[filled..filled + take].copy_from_slice(&tail[..take]);
            self.packet_pos += take;
            filled += take;
        }
        Ok(())
    }

    /// Ship any partially filled outgoing packet (master); no-op on slaves
    pub fn flush(&mut self) -> Result<()> {
        if self.is_master() {
            self.ship()?;
        }
        Ok(())
    }

    fn ship(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(&mut self.write_buf, Vec::with_capacity(self.packet_size));
        self.mux.send_packet(self.channel, Packet::from_vec(full))
    }

    /// Write one typed value to the stream (master only)
    pub fn write<T: Wire>(&mut self, value: T) -> Result<()> {
        let mut scratch = [0u8; 8];
        value.put(ByteOrder::DontCare, &mut scratch[..T::SIZE]);
        self.write_data(&scratch[..T::SIZE])
    }

    /// Read one typed value from the stream (slave only)
    pub fn read<T: Wire>(&mut self) -> Result<T> {
        let mut scratch = [0u8; 8];
        self.read_data(&mut scratch[..T::SIZE])?;
        Ok(T::get(ByteOrder::DontCare, &scratch[..T::SIZE]))
    }

    /// Replicate one value: the master writes and flushes, every slave
    /// overwrites `value` with the master's copy. The master's value is
    /// never mutated.
    pub fn broadcast<T: Wire>(&mut self, value: &mut T) -> Result<()> {
        if self.is_master() {
            self.write(*value)?;
            self.flush()
        } else {
            *value = self.read()?;
            Ok(())
        }
    }

    /// Element-wise [`broadcast`](Self::broadcast) for a slice
    pub fn broadcast_slice<T: Wire>(&mut self, values: &mut [T]) -> Result<()> {
        if self.is_master() {
            for value in values.iter() {
                self.write(*value)?;
            }
            self.flush()
        } else {
            for slot in values.iter_mut() {
                *slot = self.read()?;
            }
            Ok(())
        }
    }
}

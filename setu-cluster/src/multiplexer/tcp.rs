//! TCP multiplexer for distributed clusters
//!
//! The master binds a listener and accepts exactly `num_slaves` connections;
//! each slave connects to the master's address. Frames travel over a
//! [`Pipe`] in network byte order:
//!
//! ```text
//! ┌──────────┬───────────────┬──────────────┬─────────────────┐
//! │ kind: u8 │ channel: u16  │ length: u32  │ payload (bytes) │
//! └──────────┴───────────────┴──────────────┴─────────────────┘
//! ```
//!
//! A reader thread per connection demuxes inbound frames into per-channel
//! queues (slave side) or the gather contribution queue (master side).
//! TCP's ordering makes dropped or duplicated packets impossible by
//! construction; an oversized or unknown frame closes the connection.

use super::{ChannelId, GatherOp, Multiplexer};
use crate::error::{Error, Result};
use crate::packet::{Packet, MAX_PACKET_SIZE};
use crate::pipe::{ByteOrder, Pipe};
use crate::transport::{TcpTransport, Transport};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::net::{TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

const KIND_PACKET: u8 = 0;
const KIND_GATHER: u8 = 1;
const KIND_RESULT: u8 = 2;
const KIND_HELLO: u8 = 3;

/// Packets buffered per channel before the reader thread applies backpressure
const PACKET_QUEUE_DEPTH: usize = 64;

/// Default number of pre-wired channels per cluster
pub const DEFAULT_MAX_CHANNELS: u16 = 64;

struct SlaveLink {
    writer: Mutex<Pipe>,
    socket: TcpTransport,
    reader: Option<JoinHandle<()>>,
}

enum Links {
    Master {
        slaves: Vec<SlaveLink>,
        gather_rx: Vec<Receiver<u32>>,
    },
    Slave {
        writer: Mutex<Pipe>,
        socket: TcpTransport,
        packet_rx: Vec<Receiver<Packet>>,
        result_rx: Receiver<u32>,
        reader: Option<JoinHandle<()>>,
    },
}

/// One node's handle on a TCP cluster
pub struct TcpMultiplexer {
    node_index: usize,
    num_nodes: usize,
    next_channel: AtomicU16,
    max_channels: u16,
    links: Links,
}

impl TcpMultiplexer {
    /// Create the master side: bind and wait for every slave to connect.
    ///
    /// Slave indices follow accept order. Membership is fixed once this
    /// returns; there is no re-forming.
    pub fn master<A: ToSocketAddrs>(listen: A, num_slaves: usize) -> Result<Self> {
        Self::master_with_channels(listen, num_slaves, DEFAULT_MAX_CHANNELS)
    }

    /// Master side with an explicit channel budget
    pub fn master_with_channels<A: ToSocketAddrs>(
        listen: A,
        num_slaves: usize,
        max_channels: u16,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen)?;
        Self::master_from_listener(listener, num_slaves, max_channels)
    }

    /// Master side over an already bound listener (lets the caller learn an
    /// ephemeral port before the accept phase blocks)
    pub fn master_from_listener(
        listener: TcpListener,
        num_slaves: usize,
        max_channels: u16,
    ) -> Result<Self> {
        log::info!(
            "cluster master listening on {}, waiting for {} slave(s)",
            listener.local_addr()?,
            num_slaves
        );

        let num_nodes = num_slaves + 1;
        let mut slaves = Vec::with_capacity(num_slaves);
        let mut gather_rx = Vec::with_capacity(num_slaves);
        for slave_index in 0..num_slaves {
            let (stream, addr) = listener.accept()?;
            let socket = TcpTransport::from_stream(stream)?;
            let read_side = socket.try_clone()?;
            let mut writer = frame_pipe(socket.try_clone()?);

            // Hello tells the slave its identity before any traffic flows
            writer.write(KIND_HELLO)?;
            writer.write(0u16)?;
            writer.write(6u32)?;
            writer.write((slave_index + 1) as u16)?;
            writer.write(num_nodes as u16)?;
            writer.write(max_channels)?;
            writer.flush()?;

            let (tx, rx) = bounded(1);
            gather_rx.push(rx);
            let reader = thread::Builder::new()
                .name(format!("setu-master-rx-{slave_index}"))
                .spawn(move || master_reader_loop(frame_pipe(read_side), tx))?;

            log::info!("slave {} connected from {}", slave_index + 1, addr);
            slaves.push(SlaveLink {
                writer: Mutex::new(writer),
                socket,
                reader: Some(reader),
            });
        }

        Ok(Self {
            node_index: 0,
            num_nodes,
            next_channel: AtomicU16::new(0),
            max_channels,
            links: Links::Master { slaves, gather_rx },
        })
    }

    /// Create a slave side: connect to the master and learn this node's
    /// index from the hello frame.
    pub fn slave<A: ToSocketAddrs>(master: A) -> Result<Self> {
        let socket = TcpTransport::connect(master)?;
        let mut read_pipe = frame_pipe(socket.try_clone()?);
        let writer = frame_pipe(socket.try_clone()?);

        let (kind, channel, len) = read_frame_header(&mut read_pipe)?;
        if kind != KIND_HELLO || channel != 0 || len != 6 {
            return Err(Error::InvalidFrame(format!(
                "expected hello, got kind {kind} channel {channel} len {len}"
            )));
        }
        let node_index = read_pipe.read::<u16>()? as usize;
        let num_nodes = read_pipe.read::<u16>()? as usize;
        let max_channels = read_pipe.read::<u16>()?;
        log::info!(
            "joined cluster as node {} of {}",
            node_index,
            num_nodes
        );

        let mut packet_tx = Vec::with_capacity(max_channels as usize);
        let mut packet_rx = Vec::with_capacity(max_channels as usize);
        for _ in 0..max_channels {
            let (tx, rx) = bounded(PACKET_QUEUE_DEPTH);
            packet_tx.push(tx);
            packet_rx.push(rx);
        }
        let (result_tx, result_rx) = bounded(1);

        let reader = thread::Builder::new()
            .name("setu-slave-rx".to_string())
            .spawn(move || slave_reader_loop(read_pipe, packet_tx, result_tx))?;

        Ok(Self {
            node_index,
            num_nodes,
            next_channel: AtomicU16::new(0),
            max_channels,
            links: Links::Slave {
                writer: Mutex::new(writer),
                socket,
                packet_rx,
                result_rx,
                reader: Some(reader),
            },
        })
    }
}

fn frame_pipe(transport: TcpTransport) -> Pipe {
    let mut pipe = Pipe::new(Box::new(transport));
    pipe.set_byte_order(ByteOrder::BigEndian);
    pipe
}

fn read_frame_header(pipe: &mut Pipe) -> Result<(u8, u16, u32)> {
    let kind = pipe.read::<u8>()?;
    let channel = pipe.read::<u16>()?;
    let len = pipe.read::<u32>()?;
    if len as usize > MAX_PACKET_SIZE {
        return Err(Error::InvalidFrame(format!("frame of {len} bytes")));
    }
    Ok((kind, channel, len))
}

fn master_reader_loop(mut pipe: Pipe, gather_tx: Sender<u32>) {
    loop {
        let value = match read_gather_contribution(&mut pipe) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("master reader exiting: {e}");
                return;
            }
        };
        if gather_tx.send(value).is_err() {
            return;
        }
    }
}

fn read_gather_contribution(pipe: &mut Pipe) -> Result<u32> {
    let (kind, _channel, len) = read_frame_header(pipe)?;
    if kind != KIND_GATHER || len != 4 {
        return Err(Error::InvalidFrame(format!(
            "unexpected frame kind {kind} from slave"
        )));
    }
    pipe.read::<u32>()
}

fn slave_reader_loop(mut pipe: Pipe, packet_tx: Vec<Sender<Packet>>, result_tx: Sender<u32>) {
    loop {
        if let Err(e) = slave_read_one(&mut pipe, &packet_tx, &result_tx) {
            log::debug!("slave reader exiting: {e}");
            return;
        }
    }
}

fn slave_read_one(
    pipe: &mut Pipe,
    packet_tx: &[Sender<Packet>],
    result_tx: &Sender<u32>,
) -> Result<()> {
    let (kind, channel, len) = read_frame_header(pipe)?;
    match kind {
        KIND_PACKET => {
            let mut payload = vec![0u8; len as usize];
            pipe.read_raw(&mut payload)?;
            let tx = packet_tx
                .get(channel as usize)
                .ok_or_else(|| Error::InvalidFrame(format!("unknown channel {channel}")))?;
            tx.send(Packet::from_vec(payload))
                .map_err(|_| Error::ChannelClosed("packet queue"))
        }
        KIND_RESULT => {
            if len != 4 {
                return Err(Error::InvalidFrame(format!("result frame of {len} bytes")));
            }
            let value = pipe.read::<u32>()?;
            result_tx
                .send(value)
                .map_err(|_| Error::ChannelClosed("gather result"))
        }
        other => Err(Error::InvalidFrame(format!("unknown frame kind {other}"))),
    }
}

fn write_frame(pipe: &mut Pipe, kind: u8, channel: u16, payload: &[u8]) -> Result<()> {
    pipe.write(kind)?;
    pipe.write(channel)?;
    pipe.write(payload.len() as u32)?;
    pipe.write_raw(payload)?;
    pipe.flush()
}

impl Multiplexer for TcpMultiplexer {
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
        let slaves = match &self.links {
            Links::Master { slaves, .. } => slaves,
            Links::Slave { .. } => return Err(Error::SlaveWrite),
        };
        if channel >= self.max_channels {
            return Err(Error::ChannelLimit(self.max_channels));
        }
        for link in slaves {
            let mut writer = link
                .writer
                .lock()
                .map_err(|_| Error::MutexPoisoned("slave writer"))?;
            write_frame(&mut writer, KIND_PACKET, channel, packet.as_slice())?;
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
            Links::Master { slaves, gather_rx } => {
                let mut reduced = value;
                for rx in gather_rx {
                    let contribution = rx
                        .recv()
                        .map_err(|_| Error::ChannelClosed("gather contribution"))?;
                    reduced = op.apply(reduced, contribution);
                }
                let mut payload = [0u8; 4];
                payload.copy_from_slice(&reduced.to_be_bytes());
                for link in slaves {
                    let mut writer = link
                        .writer
                        .lock()
                        .map_err(|_| Error::MutexPoisoned("slave writer"))?;
                    write_frame(&mut writer, KIND_RESULT, 0, &payload)?;
                }
                Ok(reduced)
            }
            Links::Slave {
                writer, result_rx, ..
            } => {
                {
                    let mut writer = writer
                        .lock()
                        .map_err(|_| Error::MutexPoisoned("master writer"))?;
                    write_frame(&mut writer, KIND_GATHER, 0, &value.to_be_bytes())?;
                }
                result_rx
                    .recv()
                    .map_err(|_| Error::ChannelClosed("gather result"))
            }
        }
    }
}

impl Drop for TcpMultiplexer {
    fn drop(&mut self) {
        match &mut self.links {
            Links::Master { slaves, .. } => {
                for link in slaves.iter_mut() {
                    let _ = link.socket.shutdown();
                    if let Some(reader) = link.reader.take() {
                        let _ = reader.join();
                    }
                }
            }
            Links::Slave { socket, reader, .. } => {
                let _ = socket.shutdown();
                if let Some(reader) = reader.take() {
                    let _ = reader.join();
                }
            }
        }
    }
}

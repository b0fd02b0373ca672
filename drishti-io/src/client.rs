//! Blocking device client
//!
//! Mirrors the server's session state machine on the local side: calls that
//! are not valid in the current state fail with [`Error::InvalidState`]
//! before anything touches the wire, so a buggy caller cannot desynchronize
//! the protocol.

use crate::error::{Error, Result};
use crate::protocol::{DeviceLayout, DeviceState, MessageId, PROTOCOL_VERSION};
use log::debug;
use setu_cluster::transport::TcpTransport;
use setu_cluster::{ByteOrder, Pipe};
use std::net::ToSocketAddrs;
use std::time::Duration;

/// What a streaming client receives next
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// One device state pushed by the server
    Packet(DeviceState),
    /// The server acknowledged the stop request; no further packet follows
    /// and the client is back in the active state
    StreamStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Connected,
    Active,
    Streaming,
}

impl ClientState {
    fn name(self) -> &'static str {
        match self {
            ClientState::Connected => "connected",
            ClientState::Active => "active",
            ClientState::Streaming => "streaming",
        }
    }
}

/// Blocking client for a device server
pub struct DeviceClient {
    pipe: Pipe,
    socket: TcpTransport,
    layout: DeviceLayout,
    state: ClientState,
}

impl DeviceClient {
    /// Connect and run the version handshake.
    ///
    /// Fails with [`Error::VersionMismatch`] if the server speaks a
    /// different protocol version.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = TcpTransport::connect(addr)?;
        let mut pipe = Pipe::new(Box::new(socket.try_clone()?));
        pipe.set_byte_order(ByteOrder::LittleEndian);

        MessageId::ConnectRequest.write_to(&mut pipe)?;
        pipe.write(PROTOCOL_VERSION)?;
        pipe.flush()?;

        let reply = MessageId::read_from(&mut pipe)?;
        if reply != MessageId::ConnectReply {
            return Err(Error::Protocol(format!(
                "expected ConnectReply, got {:?}",
                reply
            )));
        }
        let server_version: u32 = pipe.read()?;
        let layout = DeviceLayout::read_from(&mut pipe)?;
        if server_version != PROTOCOL_VERSION {
            return Err(Error::VersionMismatch {
                ours: PROTOCOL_VERSION,
                peer: server_version,
            });
        }
        debug!(
            "Connected to device server: {} trackers, {} buttons, {} valuators",
            layout.num_trackers, layout.num_buttons, layout.num_valuators
        );

        Ok(Self {
            pipe,
            socket,
            layout,
            state: ClientState::Connected,
        })
    }

    /// Layout received from the server at connect time
    pub fn layout(&self) -> DeviceLayout {
        self.layout
    }

    /// Set the receive timeout, `None` for blocking reads
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }

    fn require(&self, expected: ClientState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                operation,
                state: self.state.name(),
            });
        }
        Ok(())
    }

    /// Ask the server to start sampling devices
    pub fn activate(&mut self) -> Result<()> {
        self.require(ClientState::Connected, "activate")?;
        MessageId::ActivateRequest.write_to(&mut self.pipe)?;
        self.pipe.flush()?;
        self.state = ClientState::Active;
        Ok(())
    }

    /// Ask the server to stop sampling devices
    pub fn deactivate(&mut self) -> Result<()> {
        self.require(ClientState::Active, "deactivate")?;
        MessageId::DeactivateRequest.write_to(&mut self.pipe)?;
        self.pipe.flush()?;
        self.state = ClientState::Connected;
        Ok(())
    }

    /// Request and wait for one device state packet
    pub fn request_packet(&mut self) -> Result<DeviceState> {
        self.require(ClientState::Active, "request a packet")?;
        MessageId::PacketRequest.write_to(&mut self.pipe)?;
        self.pipe.flush()?;

        let reply = MessageId::read_from(&mut self.pipe)?;
        if reply != MessageId::PacketReply {
            return Err(Error::Protocol(format!(
                "expected PacketReply, got {:?}",
                reply
            )));
        }
        DeviceState::read_from(&mut self.pipe, self.layout)
    }

    /// Ask the server to push packets as states are published
    pub fn start_stream(&mut self) -> Result<()> {
        self.require(ClientState::Active, "start streaming")?;
        MessageId::StartStreamRequest.write_to(&mut self.pipe)?;
        self.pipe.flush()?;
        self.state = ClientState::Streaming;
        Ok(())
    }

    /// Wait for the next streamed message.
    ///
    /// Returns [`StreamMessage::StreamStopped`] once the server acknowledges
    /// a [`stop_stream`](Self::stop_stream); after that the client is active
    /// again and `recv_stream` is no longer valid.
    pub fn recv_stream(&mut self) -> Result<StreamMessage> {
        self.require(ClientState::Streaming, "receive from the stream")?;
        match MessageId::read_from(&mut self.pipe)? {
            MessageId::PacketReply => {
                let state = DeviceState::read_from(&mut self.pipe, self.layout)?;
                Ok(StreamMessage::Packet(state))
            }
            MessageId::StopStreamReply => {
                self.state = ClientState::Active;
                Ok(StreamMessage::StreamStopped)
            }
            other => Err(Error::Protocol(format!(
                "unexpected {:?} while streaming",
                other
            ))),
        }
    }

    /// Ask the server to end the stream.
    ///
    /// The client stays in the streaming state until
    /// [`recv_stream`](Self::recv_stream) returns
    /// [`StreamMessage::StreamStopped`]; packets already in flight arrive
    /// before it.
    pub fn stop_stream(&mut self) -> Result<()> {
        self.require(ClientState::Streaming, "stop streaming")?;
        MessageId::StopStreamRequest.write_to(&mut self.pipe)?;
        self.pipe.flush()?;
        Ok(())
    }

    /// Orderly teardown; valid in any state, consumes the client
    pub fn disconnect(mut self) -> Result<()> {
        MessageId::DisconnectRequest.write_to(&mut self.pipe)?;
        self.pipe.flush()?;
        Ok(())
    }
}

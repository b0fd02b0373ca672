//! Wire protocol: message tags, handshake, and state marshalling
//!
//! Every exchange starts with a 16-bit message tag. The connect handshake
//! carries a protocol version and the device layout; after that the client
//! drives the session through request/reply pairs or an unsolicited packet
//! stream. All scalars travel through a little-endian [`Pipe`] so mixed-
//! endian hosts interoperate.

use crate::error::{Error, Result};
use setu_cluster::Pipe;

/// Protocol version spoken by this crate.
///
/// Sent by the client in CONNECT_REQUEST and echoed by the server in
/// CONNECT_REPLY; either side drops the connection on a mismatch.
pub const PROTOCOL_VERSION: u32 = 2;

/// Message tags, one per protocol exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageId {
    /// Client -> server: version handshake
    ConnectRequest = 0,
    /// Server -> client: version + device layout
    ConnectReply = 1,
    /// Client -> server: orderly teardown, valid in any state
    DisconnectRequest = 2,
    /// Client -> server: begin sampling devices
    ActivateRequest = 3,
    /// Client -> server: stop sampling devices
    DeactivateRequest = 4,
    /// Client -> server: send one state packet
    PacketRequest = 5,
    /// Server -> client: one device state packet
    PacketReply = 6,
    /// Client -> server: push packets without being asked
    StartStreamRequest = 7,
    /// Client -> server: stop pushing packets
    StopStreamRequest = 8,
    /// Server -> client: stream has ended; no PacketReply follows
    StopStreamReply = 9,
}

impl MessageId {
    /// Wire encoding of the tag
    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Write the tag to a pipe (not flushed)
    pub fn write_to(self, pipe: &mut Pipe) -> Result<()> {
        pipe.write(self.tag())?;
        Ok(())
    }

    /// Read the next tag from a pipe
    pub fn read_from(pipe: &mut Pipe) -> Result<Self> {
        let tag: u16 = pipe.read()?;
        Self::try_from(tag)
    }
}

impl TryFrom<u16> for MessageId {
    type Error = Error;

    fn try_from(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(MessageId::ConnectRequest),
            1 => Ok(MessageId::ConnectReply),
            2 => Ok(MessageId::DisconnectRequest),
            3 => Ok(MessageId::ActivateRequest),
            4 => Ok(MessageId::DeactivateRequest),
            5 => Ok(MessageId::PacketRequest),
            6 => Ok(MessageId::PacketReply),
            7 => Ok(MessageId::StartStreamRequest),
            8 => Ok(MessageId::StopStreamRequest),
            9 => Ok(MessageId::StopStreamReply),
            other => Err(Error::UnknownMessage(other)),
        }
    }
}

/// Number of trackers, buttons, and valuators the server exposes.
///
/// Fixed for the lifetime of a server; clients size their state buffers
/// from the copy received in CONNECT_REPLY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    pub num_trackers: u32,
    pub num_buttons: u32,
    pub num_valuators: u32,
}

impl DeviceLayout {
    pub fn write_to(&self, pipe: &mut Pipe) -> Result<()> {
        pipe.write(self.num_trackers)?;
        pipe.write(self.num_buttons)?;
        pipe.write(self.num_valuators)?;
        Ok(())
    }

    pub fn read_from(pipe: &mut Pipe) -> Result<Self> {
        Ok(Self {
            num_trackers: pipe.read()?,
            num_buttons: pipe.read()?,
            num_valuators: pipe.read()?,
        })
    }
}

/// Pose and motion of one tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerState {
    /// Position in meters
    pub position: [f32; 3],
    /// Orientation as a unit quaternion (x, y, z, w)
    pub orientation: [f32; 4],
    /// Linear velocity in meters per second
    pub linear_velocity: [f32; 3],
    /// Angular velocity in radians per second
    pub angular_velocity: [f32; 3],
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            linear_velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
        }
    }
}

impl TrackerState {
    fn write_to(&self, pipe: &mut Pipe) -> Result<()> {
        pipe.write_slice(&self.position)?;
        pipe.write_slice(&self.orientation)?;
        pipe.write_slice(&self.linear_velocity)?;
        pipe.write_slice(&self.angular_velocity)?;
        Ok(())
    }

    fn read_from(pipe: &mut Pipe) -> Result<Self> {
        let mut state = Self::default();
        pipe.read_slice(&mut state.position)?;
        pipe.read_slice(&mut state.orientation)?;
        pipe.read_slice(&mut state.linear_velocity)?;
        pipe.read_slice(&mut state.angular_velocity)?;
        Ok(state)
    }
}

/// One complete device snapshot, the payload of PACKET_REPLY.
///
/// Vector lengths always match the layout negotiated at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Sample time in microseconds since the Unix epoch
    pub timestamp_us: u64,
    pub trackers: Vec<TrackerState>,
    pub buttons: Vec<bool>,
    pub valuators: Vec<f32>,
}

impl DeviceState {
    /// An all-zero state sized for the given layout
    pub fn empty(layout: DeviceLayout) -> Self {
        Self {
            timestamp_us: 0,
            trackers: vec![TrackerState::default(); layout.num_trackers as usize],
            buttons: vec![false; layout.num_buttons as usize],
            valuators: vec![0.0; layout.num_valuators as usize],
        }
    }

    pub fn write_to(&self, pipe: &mut Pipe) -> Result<()> {
        pipe.write(self.timestamp_us)?;
        for tracker in &self.trackers {
            tracker.write_to(pipe)?;
        }
        for &button in &self.buttons {
            pipe.write(u8::from(button))?;
        }
        pipe.write_slice(&self.valuators)?;
        Ok(())
    }

    /// Read a state sized by `layout`
    pub fn read_from(pipe: &mut Pipe, layout: DeviceLayout) -> Result<Self> {
        let mut state = Self::empty(layout);
        state.timestamp_us = pipe.read()?;
        for tracker in state.trackers.iter_mut() {
            *tracker = TrackerState::read_from(pipe)?;
        }
        for button in state.buttons.iter_mut() {
            *button = pipe.read::<u8>()? != 0;
        }
        pipe.read_slice(&mut state.valuators)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use setu_cluster::transport::MockTransport;
    use setu_cluster::ByteOrder;

    fn wire_pipe() -> (Pipe, MockTransport) {
        let mock = MockTransport::new();
        let mut pipe = Pipe::new(Box::new(mock.clone()));
        pipe.set_byte_order(ByteOrder::LittleEndian);
        (pipe, mock)
    }

    #[test]
    fn test_tag_roundtrip() {
        let (mut pipe, mock) = wire_pipe();
        MessageId::StopStreamReply.write_to(&mut pipe).unwrap();
        pipe.flush().unwrap();
        mock.inject_read(&mock.get_written());
        assert_eq!(
            MessageId::read_from(&mut pipe).unwrap(),
            MessageId::StopStreamReply
        );
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let (mut pipe, mock) = wire_pipe();
        mock.inject_read(&0xBEEFu16.to_le_bytes());
        match MessageId::read_from(&mut pipe) {
            Err(Error::UnknownMessage(0xBEEF)) => {}
            other => panic!("expected UnknownMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_layout_roundtrip() {
        let (mut pipe, mock) = wire_pipe();
        let layout = DeviceLayout {
            num_trackers: 2,
            num_buttons: 5,
            num_valuators: 3,
        };
        layout.write_to(&mut pipe).unwrap();
        pipe.flush().unwrap();
        mock.inject_read(&mock.get_written());
        assert_eq!(DeviceLayout::read_from(&mut pipe).unwrap(), layout);
    }

    #[test]
    fn test_device_state_roundtrip() {
        let layout = DeviceLayout {
            num_trackers: 2,
            num_buttons: 3,
            num_valuators: 2,
        };
        let mut state = DeviceState::empty(layout);
        state.timestamp_us = 1_234_567;
        state.trackers[0].position = [1.0, -2.0, 0.5];
        state.trackers[1].orientation = [0.0, 0.7071, 0.0, 0.7071];
        state.trackers[1].angular_velocity = [0.1, 0.0, -0.1];
        state.buttons[1] = true;
        state.valuators = vec![-0.25, 1.0];

        let (mut pipe, mock) = wire_pipe();
        state.write_to(&mut pipe).unwrap();
        pipe.flush().unwrap();
        mock.inject_read(&mock.get_written());
        assert_eq!(DeviceState::read_from(&mut pipe, layout).unwrap(), state);
    }
}

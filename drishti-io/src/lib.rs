//! DrishtiIO - tracking device service
//!
//! A daemon reads positional tracking hardware (head trackers, wands,
//! button and valuator devices) and serves live state to client processes
//! over TCP, either one packet per request or as an unsolicited stream.
//! Cluster render nodes are ordinary clients; their master replicates what
//! it receives through `setu-cluster`.
//!
//! ## Components
//!
//! - [`protocol`]: message tags, version handshake, state marshalling
//! - [`server`]: connection state machine and streaming fan-out
//! - [`client`]: blocking client
//! - [`source`]: device sample sources (mock included)

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod source;

pub use client::{DeviceClient, StreamMessage};
pub use config::DaemonConfig;
pub use error::{Error, Result};
pub use protocol::{DeviceLayout, DeviceState, MessageId, TrackerState, PROTOCOL_VERSION};
pub use server::{DeviceServer, ServerHandle};
pub use source::{DeviceSource, MockSource};

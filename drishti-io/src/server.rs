//! Device server: accept loop, per-session state machine, stream fan-out
//!
//! Each accepted connection gets its own named session thread. A session
//! walks Connected -> Active -> Streaming under client control; any message
//! that is not valid in the current state closes the connection. While a
//! session streams, a dedicated streamer thread forwards published states;
//! the STOPSTREAM_REPLY is written only after that thread has exited, so a
//! client never sees a packet after the stop acknowledgement.

use crate::error::{Error, Result};
use crate::protocol::{DeviceLayout, DeviceState, MessageId, PROTOCOL_VERSION};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use setu_cluster::actions::ActionQueue;
use setu_cluster::transport::TcpTransport;
use setu_cluster::{ByteOrder, Pipe};
use std::collections::HashMap;
use std::net::{TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Published states queued per streaming session before packets are dropped
const STREAM_QUEUE_DEPTH: usize = 64;

/// How often a blocked session read rechecks the shutdown flag
const SESSION_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Accept loop poll interval
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP server for one device daemon
pub struct DeviceServer {
    listener: TcpListener,
    shared: Arc<ServerShared>,
}

/// Cloneable publishing handle, used by the sampling thread
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    layout: DeviceLayout,
    latest: Mutex<DeviceState>,
    streams: Mutex<HashMap<u64, Sender<DeviceState>>>,
    next_session_id: AtomicU64,
    running: AtomicBool,
    // Session ids whose threads have exited, joined on the accept loop's
    // next cycle
    finished: ActionQueue<u64>,
}

impl ServerShared {
    /// Store the newest state and fan it out to every streaming session.
    ///
    /// A session whose queue is full misses this state (it will get a newer
    /// one); a session whose receiver is gone is unregistered.
    fn publish(&self, state: DeviceState) {
        {
            let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
            *latest = state.clone();
        }
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.retain(|id, tx| match tx.try_send(state.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Session {} stream queue full, dropping state", id);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn latest_snapshot(&self) -> DeviceState {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn register_stream(&self, id: u64, tx: Sender<DeviceState>) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.insert(id, tx);
    }

    fn unregister_stream(&self, id: u64) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.remove(&id);
    }
}

impl DeviceServer {
    /// Bind the server socket; the layout is fixed for the server's lifetime
    pub fn bind<A: ToSocketAddrs>(addr: A, layout: DeviceLayout) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(
            "Device server listening on {} ({} trackers, {} buttons, {} valuators)",
            listener.local_addr()?,
            layout.num_trackers,
            layout.num_buttons,
            layout.num_valuators
        );
        Ok(Self {
            listener,
            shared: Arc::new(ServerShared {
                layout,
                latest: Mutex::new(DeviceState::empty(layout)),
                streams: Mutex::new(HashMap::new()),
                next_session_id: AtomicU64::new(0),
                running: AtomicBool::new(true),
                finished: ActionQueue::new(),
            }),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle for publishing states from another thread
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Publish a new device state to request/reply and streaming clients
    pub fn publish(&self, state: DeviceState) {
        self.shared.publish(state);
    }

    /// Ask the accept loop and all sessions to wind down
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Accept connections until [`stop`](Self::stop) is called.
    ///
    /// Runs on the calling thread; session threads are joined here as they
    /// finish and once more on the way out.
    pub fn run(&self) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        let mut sessions: HashMap<u64, JoinHandle<()>> = HashMap::new();

        while self.shared.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = self.shared.next_session_id.fetch_add(1, Ordering::SeqCst);
                    info!("Session {} connected from {}", id, peer);
                    let shared = Arc::clone(&self.shared);
                    let handle = thread::Builder::new()
                        .name(format!("drishti-session-{}", id))
                        .spawn(move || {
                            match Session::start(id, shared.clone(), stream) {
                                Ok(session) => session.run(),
                                Err(e) => warn!("Session {} setup failed: {}", id, e),
                            }
                            shared.finished.defer(id);
                        })?;
                    sessions.insert(id, handle);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(Error::Io(e)),
            }

            self.shared.finished.process(|id| {
                if let Some(handle) = sessions.remove(&id) {
                    if handle.join().is_err() {
                        warn!("Session {} thread panicked", id);
                    }
                }
            });
        }

        for (id, handle) in sessions {
            if handle.join().is_err() {
                warn!("Session {} thread panicked", id);
            }
        }
        info!("Device server stopped");
        Ok(())
    }
}

impl ServerHandle {
    /// Publish a new device state to request/reply and streaming clients
    pub fn publish(&self, state: DeviceState) {
        self.shared.publish(state);
    }

    /// Ask the server to wind down
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Whether the server is still accepting and serving
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    Active,
    Streaming,
}

struct Session {
    id: u64,
    shared: Arc<ServerShared>,
    reader: Pipe,
    writer: Arc<Mutex<Pipe>>,
    state: SessionState,
    streamer: Option<JoinHandle<()>>,
}

impl Session {
    fn start(id: u64, shared: Arc<ServerShared>, stream: std::net::TcpStream) -> Result<Self> {
        let read_half = TcpTransport::from_stream(stream)?;
        let write_half = read_half.try_clone()?;
        read_half.set_read_timeout(Some(SESSION_READ_TIMEOUT))?;

        let mut reader = Pipe::new(Box::new(read_half));
        reader.set_byte_order(ByteOrder::LittleEndian);
        let mut writer = Pipe::new(Box::new(write_half));
        writer.set_byte_order(ByteOrder::LittleEndian);

        Ok(Self {
            id,
            shared,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            state: SessionState::Connected,
            streamer: None,
        })
    }

    fn run(mut self) {
        match self.serve() {
            Ok(()) => info!("Session {} closed", self.id),
            Err(Error::Pipe(setu_cluster::Error::Io(ref e)))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                info!("Session {} peer disconnected", self.id)
            }
            Err(e) => warn!("Session {} closed with error: {}", self.id, e),
        }
        self.teardown();
    }

    fn serve(&mut self) -> Result<()> {
        // A shutdown while waiting for the handshake ends the session
        // without ever entering the request loop
        if !self.handshake()? {
            return Ok(());
        }

        loop {
            let msg = match self.next_message()? {
                Some(msg) => msg,
                None => {
                    if !self.shared.running.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    continue;
                }
            };

            match (self.state, msg) {
                (_, MessageId::DisconnectRequest) => {
                    debug!("Session {} disconnect requested", self.id);
                    return Ok(());
                }
                (SessionState::Connected, MessageId::ActivateRequest) => {
                    self.state = SessionState::Active;
                }
                (SessionState::Active, MessageId::DeactivateRequest) => {
                    self.state = SessionState::Connected;
                }
                (SessionState::Active, MessageId::PacketRequest) => {
                    self.send_packet()?;
                }
                (SessionState::Active, MessageId::StartStreamRequest) => {
                    self.start_stream()?;
                }
                (SessionState::Streaming, MessageId::StopStreamRequest) => {
                    self.stop_stream()?;
                }
                (state, msg) => {
                    return Err(Error::Protocol(format!(
                        "{:?} not valid in {:?} state",
                        msg, state
                    )));
                }
            }
        }
    }

    /// Version exchange. The reply always carries the server's version and
    /// layout, so a mismatched client learns what the server speaks before
    /// the connection drops.
    ///
    /// Returns `false` when the server shut down before a ConnectRequest
    /// arrived; no later message may be served on this connection.
    fn handshake(&mut self) -> Result<bool> {
        let msg = loop {
            match self.next_message()? {
                Some(msg) => break msg,
                None => {
                    if !self.shared.running.load(Ordering::SeqCst) {
                        return Ok(false);
                    }
                }
            }
        };
        if msg != MessageId::ConnectRequest {
            return Err(Error::Protocol(format!(
                "expected ConnectRequest, got {:?}",
                msg
            )));
        }
        let client_version: u32 = self.reader.read()?;

        {
            let mut pipe = self.writer.lock().unwrap_or_else(|e| e.into_inner());
            MessageId::ConnectReply.write_to(&mut pipe)?;
            pipe.write(PROTOCOL_VERSION)?;
            self.shared.layout.write_to(&mut pipe)?;
            pipe.flush()?;
        }

        if client_version != PROTOCOL_VERSION {
            return Err(Error::VersionMismatch {
                ours: PROTOCOL_VERSION,
                peer: client_version,
            });
        }
        Ok(true)
    }

    /// Read the next tag, `None` on an idle timeout.
    ///
    /// A timeout mid-tag is safe to retry: a failed pipe read consumes
    /// nothing, so the next call resumes at the same stream position.
    fn next_message(&mut self) -> Result<Option<MessageId>> {
        match MessageId::read_from(&mut self.reader) {
            Ok(msg) => Ok(Some(msg)),
            Err(Error::Pipe(setu_cluster::Error::Timeout)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn send_packet(&mut self) -> Result<()> {
        let state = self.shared.latest_snapshot();
        let mut pipe = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        MessageId::PacketReply.write_to(&mut pipe)?;
        state.write_to(&mut pipe)?;
        pipe.flush()?;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        let (tx, rx) = bounded::<DeviceState>(STREAM_QUEUE_DEPTH);
        self.shared.register_stream(self.id, tx);

        let writer = Arc::clone(&self.writer);
        let id = self.id;
        self.streamer = Some(
            thread::Builder::new()
                .name(format!("drishti-stream-{}", id))
                .spawn(move || stream_loop(id, writer, rx))?,
        );
        self.state = SessionState::Streaming;
        debug!("Session {} streaming", self.id);
        Ok(())
    }

    /// Unregister from the fan-out, wait for the streamer to drain and
    /// exit, then acknowledge. The join ensures no PacketReply can follow
    /// the StopStreamReply.
    fn stop_stream(&mut self) -> Result<()> {
        self.shared.unregister_stream(self.id);
        if let Some(handle) = self.streamer.take() {
            if handle.join().is_err() {
                warn!("Session {} streamer panicked", self.id);
            }
        }

        let mut pipe = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        MessageId::StopStreamReply.write_to(&mut pipe)?;
        pipe.flush()?;
        self.state = SessionState::Active;
        debug!("Session {} stream stopped", self.id);
        Ok(())
    }

    fn teardown(&mut self) {
        self.shared.unregister_stream(self.id);
        if let Some(handle) = self.streamer.take() {
            if handle.join().is_err() {
                warn!("Session {} streamer panicked", self.id);
            }
        }
    }
}

fn stream_loop(id: u64, writer: Arc<Mutex<Pipe>>, rx: Receiver<DeviceState>) {
    while let Ok(state) = rx.recv() {
        let result = (|| -> Result<()> {
            let mut pipe = writer.lock().unwrap_or_else(|e| e.into_inner());
            MessageId::PacketReply.write_to(&mut pipe)?;
            state.write_to(&mut pipe)?;
            pipe.flush()?;
            Ok(())
        })();
        if let Err(e) = result {
            debug!("Session {} stream write failed: {}", id, e);
            break;
        }
    }
}

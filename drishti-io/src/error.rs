//! Error types for DrishtiIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// DrishtiIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from the underlying pipe layer
    #[error("Pipe error: {0}")]
    Pipe(#[from] setu_cluster::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer violated the protocol state machine
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tag on the wire does not name any message
    #[error("Unknown message tag {0:#06x}")]
    UnknownMessage(u16),

    /// Peer speaks an incompatible protocol version
    #[error("Protocol version mismatch: ours {ours}, peer {peer}")]
    VersionMismatch { ours: u32, peer: u32 },

    /// Operation not valid in the client's current connection state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Configuration parse error
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration encode error
    #[error("Configuration encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// A shared lock was poisoned by a panicking thread
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

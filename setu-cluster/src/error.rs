//! Error types for the cluster replication layer

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster layer error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Read or write did not complete within the transport timeout
    #[error("Communication timeout")]
    Timeout,

    /// A peer channel was closed while an operation was in flight
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Malformed frame received from a peer
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Write attempted through a slave-side multicast pipe
    #[error("Slaves cannot originate multicast data")]
    SlaveWrite,

    /// Replicated-data read attempted on the master
    #[error("The master does not read multicast data")]
    MasterRead,

    /// No more multiplexer channels can be opened
    #[error("Channel limit reached ({0} channels)")]
    ChannelLimit(u16),

    /// Configuration parse error
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration encode error
    #[error("Configuration encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A shared lock was poisoned by a panicking thread
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

//! Transport layer for I/O abstraction

use crate::error::Result;

mod mock;
mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

/// Transport trait for raw byte communication with a peer
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    ///
    /// A return of zero means the peer closed the connection.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0) // Default implementation
    }
}

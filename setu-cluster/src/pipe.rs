//! Buffered, byte-order-aware stream over a [`Transport`]
//!
//! A [`Pipe`] carries an ordered byte stream with independent read and write
//! positions. Multi-byte values go through the typed [`Pipe::read`] /
//! [`Pipe::write`] accessors, which apply a byte swap iff the pipe's
//! negotiated byte order differs from the host's. Raw bulk transfers bypass
//! swapping entirely.

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default size for the read and write buffers
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Smallest buffer size a resize request can produce
pub const MIN_BUFFER_SIZE: usize = 64;

/// Largest buffer size a resize request can produce
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Negotiated byte order of a pipe
///
/// `DontCare` means host order: no swapping on either end. Endpoints that
/// may talk to foreign-order peers negotiate `LittleEndian` or `BigEndian`
/// during their handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    DontCare,
    LittleEndian,
    BigEndian,
}

/// Fixed-size scalar values that can travel through a pipe's typed accessors
pub trait Wire: Copy {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Encode into `out[..Self::SIZE]` in the given byte order
    fn put(self, order: ByteOrder, out: &mut [u8]);

    /// Decode from `src[..Self::SIZE]` in the given byte order
    fn get(order: ByteOrder, src: &[u8]) -> Self;
}

macro_rules! impl_wire {
    ($($t:ty),* $(,)?) => {$(
        impl Wire for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn put(self, order: ByteOrder, out: &mut [u8]) {
                let bytes = match order {
                    ByteOrder::DontCare => self.to_ne_bytes(),
                    ByteOrder::LittleEndian => self.to_le_bytes(),
                    ByteOrder::BigEndian => self.to_be_bytes(),
                };
                out[..Self::SIZE].copy_from_slice(&bytes);
            }

            fn get(order: ByteOrder, src: &[u8]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$t>()];
                bytes.copy_from_slice(&src[..Self::SIZE]);
                match order {
                    ByteOrder::DontCare => <$t>::from_ne_bytes(bytes),
                    ByteOrder::LittleEndian => <$t>::from_le_bytes(bytes),
                    ByteOrder::BigEndian => <$t>::from_be_bytes(bytes),
                }
            }
        }
    )*};
}

impl_wire!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Buffered byte stream over a transport
pub struct Pipe {
    transport: Box<dyn Transport>,
    order: ByteOrder,
    read_buf: Vec<u8>,
    read_start: usize,
    read_end: usize,
    write_buf: Vec<u8>,
    write_capacity: usize,
}

impl Pipe {
    /// Create a pipe with default buffer sizes and host byte order
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            order: ByteOrder::DontCare,
            read_buf: vec![0u8; DEFAULT_BUFFER_SIZE],
            read_start: 0,
            read_end: 0,
            write_buf: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            write_capacity: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the negotiated byte order for typed accessors
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Current negotiated byte order
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Current read buffer size
    pub fn read_buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    /// Request a new read buffer size; returns the size actually chosen.
    ///
    /// The request is advisory: it is clamped to the supported range, and
    /// ignored while buffered data is pending (shrinking under unread bytes
    /// would drop them).
    pub fn resize_read_buffer(&mut self, requested: usize) -> usize {
        if self.read_start != self.read_end {
            return self.read_buf.len();
        }
        let actual = requested.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.read_buf = vec![0u8; actual];
        self.read_start = 0;
        self.read_end = 0;
        actual
    }

    /// Request a new write buffer capacity; returns the size actually chosen
    pub fn resize_write_buffer(&mut self, requested: usize) -> usize {
        let actual = requested.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.write_capacity = actual;
        actual
    }

    /// Read exactly `dest.len()` bytes, blocking until satisfied.
    ///
    /// No byte swapping is applied. A failed read consumes nothing: bytes
    /// already copied out are returned to the read buffer, so after a
    /// [`Error::Timeout`] the same read can be retried and resumes from the
    /// unchanged stream position.
    pub fn read_raw(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < dest.len() {
            if self.read_start == self.read_end {
                // Large remainders skip the buffer to avoid double copying
                let remaining = dest.len() - filled;
                let into_dest = remaining >= self.read_buf.len();
                let n = if into_dest {
                    self.transport.read(&mut dest[filled..])
                } else {
                    self.transport.read(&mut self.read_buf)
                };
                let n = match n {
                    Ok(0) => {
                        self.unread(&dest[..filled]);
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "transport closed mid-read",
                        )));
                    }
                    Ok(n) => n,
                    Err(e) => {
                        self.unread(&dest[..filled]);
                        return Err(e);
                    }
                };
                if into_dest {
                    filled += n;
                    continue;
                }
                self.read_start = 0;
                self.read_end = n;
            }
            let take = (self.read_end - self.read_start).min(dest.len() - filled);
            dest[filled..filled + take]
                .copy_from_slice(&self.read_buf[self.read_start..self.read_start + take]);
            self.read_start += take;
            filled += take;
        }
        Ok(())
    }

    /// Return already-consumed bytes to the front of the read buffer.
    ///
    /// Only called when the buffer is drained, so nothing is overwritten;
    /// the buffer grows if a bulk read consumed more than it holds.
    fn unread(&mut self, consumed: &[u8]) {
        if consumed.is_empty() {
            return;
        }
        if self.read_buf.len() < consumed.len() {
            self.read_buf = vec![0u8; consumed.len()];
        }
        self.read_buf[..consumed.len()].copy_from_slice(consumed);
        self.read_start = 0;
        self.read_end = consumed.len();
    }

    /// Append `src` to the outgoing stream.
    ///
    /// Bytes accumulate in the write buffer and are pushed to the transport
    /// when the buffer fills or on [`flush`](Self::flush). No byte swapping
    /// is applied.
    pub fn write_raw(&mut self, src: &[u8]) -> Result<()> {
        self.write_buf.extend_from_slice(src);
        if self.write_buf.len() >= self.write_capacity {
            self.drain_write_buffer()?;
        }
        Ok(())
    }

    /// Push all buffered writes to the transport and flush it
    pub fn flush(&mut self) -> Result<()> {
        self.drain_write_buffer()?;
        self.transport.flush()
    }

    fn drain_write_buffer(&mut self) -> Result<()> {
        let mut written = 0;
        while written < self.write_buf.len() {
            let n = self.transport.write(&self.write_buf[written..])?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "transport refused write",
                )));
            }
            written += n;
        }
        self.write_buf.clear();
        Ok(())
    }

    /// Read one typed value, swapping per the negotiated byte order
    pub fn read<T: Wire>(&mut self) -> Result<T> {
        let mut scratch = [0u8; 8];
        self.read_raw(&mut scratch[..T::SIZE])?;
        Ok(T::get(self.order, &scratch[..T::SIZE]))
    }

    /// Write one typed value, swapping per the negotiated byte order
    pub fn write<T: Wire>(&mut self, value: T) -> Result<()> {
        let mut scratch = [0u8; 8];
        value.put(self.order, &mut scratch[..T::SIZE]);
        self.write_raw(&scratch[..T::SIZE])
    }

    /// Read a slice of typed values, element-wise
    pub fn read_slice<T: Wire>(&mut self, dest: &mut [T]) -> Result<()> {
        for slot in dest.iter_mut() {
            *slot = self.read()?;
        }
        Ok(())
    }

    /// Write a slice of typed values, element-wise
    pub fn write_slice<T: Wire>(&mut self, values: &[T]) -> Result<()> {
        for value in values {
            self.write(*value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn pipe_pair() -> (Pipe, MockTransport) {
        let mock = MockTransport::new();
        (Pipe::new(Box::new(mock.clone())), mock)
    }

    #[test]
    fn test_typed_roundtrip_host_order() {
        let (mut pipe, mock) = pipe_pair();
        pipe.write(0x1234u16).unwrap();
        pipe.write(-7i32).unwrap();
        pipe.write(1.5f64).unwrap();
        pipe.flush().unwrap();

        mock.inject_read(&mock.get_written());
        assert_eq!(pipe.read::<u16>().unwrap(), 0x1234);
        assert_eq!(pipe.read::<i32>().unwrap(), -7);
        assert_eq!(pipe.read::<f64>().unwrap(), 1.5);
    }

    #[test]
    fn test_big_endian_encoding() {
        let (mut pipe, mock) = pipe_pair();
        pipe.set_byte_order(ByteOrder::BigEndian);
        pipe.write(0x0102_0304u32).unwrap();
        pipe.flush().unwrap();
        assert_eq!(mock.get_written(), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_little_endian_encoding() {
        let (mut pipe, mock) = pipe_pair();
        pipe.set_byte_order(ByteOrder::LittleEndian);
        pipe.write(0x0102_0304u32).unwrap();
        pipe.flush().unwrap();
        assert_eq!(mock.get_written(), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_foreign_order_decode() {
        let (mut pipe, mock) = pipe_pair();
        pipe.set_byte_order(ByteOrder::BigEndian);
        mock.inject_read(&[0x00, 0x2A]);
        assert_eq!(pipe.read::<u16>().unwrap(), 42);
    }

    #[test]
    fn test_raw_passthrough() {
        let (mut pipe, mock) = pipe_pair();
        pipe.write_raw(b"hello").unwrap();
        pipe.flush().unwrap();
        assert_eq!(mock.get_written(), b"hello");

        mock.inject_read(b"world");
        let mut buf = [0u8; 5];
        pipe.read_raw(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_read_past_eof_fails() {
        let (mut pipe, mock) = pipe_pair();
        mock.inject_read(&[0x01]);
        let mut buf = [0u8; 4];
        assert!(pipe.read_raw(&mut buf).is_err());
    }

    #[test]
    fn test_slice_roundtrip() {
        let (mut pipe, mock) = pipe_pair();
        let values = [1.0f32, -2.5, 3.25];
        pipe.write_slice(&values).unwrap();
        pipe.flush().unwrap();

        mock.inject_read(&mock.get_written());
        let mut out = [0.0f32; 3];
        pipe.read_slice(&mut out).unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn test_timeout_mid_value_is_restartable() {
        // A tag split across two transport reads with a timeout between
        // them must not desync the stream: the retry sees the whole value.
        let (mut pipe, mock) = pipe_pair();
        pipe.set_byte_order(ByteOrder::BigEndian);
        mock.inject_read(&[0x01]);
        mock.inject_timeout();
        mock.inject_read(&[0x02]);

        assert!(matches!(pipe.read::<u16>(), Err(Error::Timeout)));
        assert_eq!(pipe.read::<u16>().unwrap(), 0x0102);
    }

    #[test]
    fn test_timeout_mid_bulk_read_is_restartable() {
        let (mut pipe, mock) = pipe_pair();
        pipe.resize_read_buffer(MIN_BUFFER_SIZE);
        let payload: Vec<u8> = (0..100).collect();
        mock.inject_read(&payload[..40]);
        mock.inject_timeout();
        mock.inject_read(&payload[40..]);

        let mut dest = [0u8; 100];
        assert!(matches!(pipe.read_raw(&mut dest), Err(Error::Timeout)));
        pipe.read_raw(&mut dest).unwrap();
        assert_eq!(dest[..], payload[..]);
    }

    #[test]
    fn test_resize_is_advisory() {
        let (mut pipe, _mock) = pipe_pair();
        assert_eq!(pipe.resize_read_buffer(16), MIN_BUFFER_SIZE);
        assert_eq!(pipe.resize_read_buffer(usize::MAX), MAX_BUFFER_SIZE);
        assert_eq!(pipe.read_buffer_size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_resize_deferred_while_data_pending() {
        let (mut pipe, mock) = pipe_pair();
        mock.inject_read(&[1, 2, 3, 4]);
        let mut b = [0u8; 1];
        pipe.read_raw(&mut b).unwrap();
        // Remaining bytes sit in the read buffer; resize must not drop them
        let size = pipe.resize_read_buffer(256);
        assert_eq!(size, DEFAULT_BUFFER_SIZE);
        let mut rest = [0u8; 3];
        pipe.read_raw(&mut rest).unwrap();
        assert_eq!(rest, [2, 3, 4]);
    }
}

//! The atomic unit of replication
//!
//! A packet is an immutable, reference-counted byte buffer. The master
//! builds one, the multiplexer fans it out, and any number of slave-side
//! readers hold the same contents concurrently as read-only data.

use std::ops::Deref;
use std::sync::Arc;

/// Largest payload a single packet may carry
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Immutable shared byte buffer
#[derive(Debug, Clone)]
pub struct Packet {
    data: Arc<[u8]>,
}

impl Packet {
    /// Take ownership of a byte vector as a packet
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the packet carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl Deref for Packet {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_storage() {
        let a = Packet::from_vec(vec![1, 2, 3]);
        let b = a.clone();
        assert_eq!(a.as_slice().as_ptr(), b.as_slice().as_ptr());
        assert_eq!(b.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_len_and_empty() {
        assert!(Packet::from_vec(Vec::new()).is_empty());
        assert_eq!(Packet::from_vec(vec![0; 10]).len(), 10);
    }
}

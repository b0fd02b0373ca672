//! Mock transport for testing
//!
//! Reads follow a script: injected data chunks interleaved with timeout
//! markers, so tests can reproduce a peer that delivers a value across
//! several reads or stalls mid-value. An exhausted script reads as a
//! closed connection.

use super::Transport;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum ReadStep {
    Data(Vec<u8>),
    Timeout,
}

/// Mock transport for unit testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    script: VecDeque<ReadStep>,
    write_buffer: Vec<u8>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                script: VecDeque::new(),
                write_buffer: Vec::new(),
            })),
        }
    }

    /// Inject data to be read.
    ///
    /// Consecutive injections merge into one chunk; a chunk boundary only
    /// exists across an [`inject_timeout`](Self::inject_timeout) marker.
    pub fn inject_read(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ReadStep::Data(chunk)) = inner.script.back_mut() {
            chunk.extend_from_slice(data);
            return;
        }
        inner.script.push_back(ReadStep::Data(data.to_vec()));
    }

    /// Make the next read fail with a timeout once
    pub fn inject_timeout(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.script.push_back(ReadStep::Timeout);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.write_buffer.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.write_buffer.clear();
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.script.pop_front() {
            Some(ReadStep::Data(mut chunk)) => {
                let take = chunk.len().min(buffer.len());
                buffer[..take].copy_from_slice(&chunk[..take]);
                if take < chunk.len() {
                    chunk.drain(..take);
                    inner.script.push_front(ReadStep::Data(chunk));
                }
                Ok(take)
            }
            Some(ReadStep::Timeout) => Err(Error::Timeout),
            None => Ok(0),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.write_buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .script
            .iter()
            .map(|step| match step {
                ReadStep::Data(chunk) => chunk.len(),
                ReadStep::Timeout => 0,
            })
            .sum())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

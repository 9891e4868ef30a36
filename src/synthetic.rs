use crate::Transport;
use std::{
    io::{Read, Result, Write},
    sync::{Arc, Mutex, PoisonError},
};

/// Synthetic represents a simple transport that contains fixed content.
/// This is exclusively useful for testing, in which the entire request
/// is available immediately and the response is captured in memory.
///
/// The captured output is shared, so a test can keep an
/// [`output handle`](Synthetic::output_handle) while the transport
/// itself is boxed up and moved into the machinery under test.
#[derive(Debug, Default)]
pub struct Synthetic {
    input: Vec<u8>,
    read: usize,
    output: Arc<Mutex<Vec<u8>>>,
}

/// A shared view of everything a [`Synthetic`] transport has been
/// asked to write.
#[derive(Debug, Clone, Default)]
pub struct SyntheticOutput(Arc<Mutex<Vec<u8>>>);

impl SyntheticOutput {
    /// The captured bytes, cloned out.
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The captured bytes as a lossy string.
    pub fn string(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

impl Synthetic {
    /// Construct a synthetic transport that will yield `input` to reads.
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into(),
            read: 0,
            output: Arc::default(),
        }
    }

    /// A shared handle to everything written to this transport.
    pub fn output_handle(&self) -> SyntheticOutput {
        SyntheticOutput(Arc::clone(&self.output))
    }
}

impl From<&str> for Synthetic {
    fn from(input: &str) -> Self {
        Self::new(input.as_bytes().to_vec())
    }
}

impl Read for Synthetic {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.input[self.read..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.read += len;
        Ok(len)
    }
}

impl Write for Synthetic {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Transport for Synthetic {}

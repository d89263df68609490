//! Shared output sink for rendered blocks.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Handle, RuntimeFlavor};

/// Destination shared by all watch tasks. Each block is written and flushed
/// under a single lock acquisition so blocks from different kinds never interleave.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self { inner: Arc::new(Mutex::new(Box::new(writer))) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// In-memory sink plus a handle to read back what was written.
    pub fn memory() -> (Self, MemoryBuffer) {
        let buf = MemoryBuffer::default();
        (Self::new(buf.clone()), buf)
    }

    pub fn write_block(&self, block: &str) -> io::Result<()> {
        let mut w = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        w.write_all(block.as_bytes())?;
        w.flush()
    }

    /// [`write_block`](Self::write_block) for callers running inside a tokio task.
    /// On a multi-thread runtime the write goes through `block_in_place`, so a
    /// slow stdout reader parks only this task's worker and the runtime moves
    /// the other watch tasks elsewhere.
    pub fn write_block_in_task(&self, block: &str) -> io::Result<()> {
        match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| self.write_block(block)),
            _ => self.write_block(block),
        }
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer(Arc<Mutex<Vec<u8>>>);

impl MemoryBuffer {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for MemoryBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

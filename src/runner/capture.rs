//! Bounded output capture

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8192;

/// Captured bytes of one stream
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// More bytes arrived than the cap allowed
    pub truncated: bool,
}

impl Captured {
    pub fn into_lossy_string(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.bytes).into_owned(), self.truncated)
    }
}

/// Capture shared between a reader task and the code waiting on it
///
/// Whatever arrived stays readable even if the reader task is aborted.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Captured>>);

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take everything captured so far
    pub fn take(&self) -> Captured {
        std::mem::take(&mut *self.lock())
    }

    fn push(&self, chunk: &[u8], cap: usize) {
        let mut captured = self.lock();
        let room = cap.saturating_sub(captured.bytes.len());
        if chunk.len() > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Read `reader` to EOF into `buffer`, keeping at most `cap` bytes
///
/// Bytes past the cap are drained and dropped so the writer never blocks on
/// a full pipe. Read errors end the capture with what was collected.
pub async fn read_capped<R>(mut reader: R, cap: usize, buffer: CaptureBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buffer.push(&buf[..n], cap);
    }
}

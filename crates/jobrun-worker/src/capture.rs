//! Capped capture of a child's output streams.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jobrun_core::output::cap_bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for readers once the process is gone. Grandchildren that
/// inherited the pipe can keep it open indefinitely.
pub(crate) const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
struct Buffer {
    kept: Vec<u8>,
    total: usize,
}

/// One stream being read in the background.
///
/// Bytes beyond `cap` are counted and dropped, so memory stays bounded no
/// matter how much the child writes.
#[derive(Debug)]
pub(crate) struct Capture {
    stream: &'static str,
    cap: usize,
    buffer: Arc<Mutex<Buffer>>,
    reader: JoinHandle<()>,
}

impl Capture {
    pub(crate) fn spawn<R>(stream: &'static str, source: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Buffer {
            kept: Vec::new(),
            total: 0,
        }));
        let reader = tokio::spawn(read_capped(source, cap, buffer.clone()));
        Self {
            stream,
            cap,
            buffer,
            reader,
        }
    }

    /// Wait (bounded) for the reader to hit EOF and render what was kept.
    pub(crate) async fn finish(mut self) -> Option<String> {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut self.reader)
            .await
            .is_err()
        {
            warn!(stream = self.stream, "Output still open after process exit, abandoning reader");
            self.reader.abort();
        }

        let buffer = lock(&self.buffer);
        if buffer.total > self.cap {
            debug!(
                stream = self.stream,
                total = buffer.total,
                cap = self.cap,
                "Output exceeded capture limit"
            );
        }
        cap_bytes(&buffer.kept, buffer.total, self.cap)
    }
}

async fn read_capped<R>(mut source: R, cap: usize, buffer: Arc<Mutex<Buffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match source.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut buffer = lock(&buffer);
                let room = cap.saturating_sub(buffer.kept.len());
                let keep = room.min(n);
                buffer.kept.extend_from_slice(&chunk[..keep]);
                buffer.total += n;
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading child output");
                break;
            }
        }
    }
}

fn lock(buffer: &Mutex<Buffer>) -> MutexGuard<'_, Buffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

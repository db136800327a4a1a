use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, ZipWriter};

use crate::destination::normalize_entry_name;
use crate::fetcher::{ByteStream, FetchError};

/// Deflate level used for every entry.
pub const COMPRESSION_LEVEL: i64 = 9;

/// One piece of archive output. An `Err` means the archive was aborted and
/// the consumer must treat everything received so far as invalid.
pub type ArchiveChunk = Result<Bytes, io::Error>;

/// Errors raised while writing the archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("zip encoding failed: {0}")]
    Zip(#[from] ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("archive consumer disconnected")]
    Disconnected,
}

/// Totals for a finished archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Create a bounded channel carrying archive output.
///
/// `capacity` is the number of chunks that may be queued before the writer
/// suspends; it is what bounds memory when the consumer is slow.
pub fn archive_channel(capacity: usize) -> (ArchiveSink, ArchiveReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ArchiveSink { tx }, ArchiveReceiver { rx })
}

/// Sending half of the archive output channel.
#[derive(Debug, Clone)]
pub struct ArchiveSink {
    tx: mpsc::Sender<ArchiveChunk>,
}

impl ArchiveSink {
    async fn send(&self, chunk: ArchiveChunk) -> Result<(), ArchiveError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| ArchiveError::Disconnected)
    }

    /// Resolves once the receiving half has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the archive output channel.
#[derive(Debug)]
pub struct ArchiveReceiver {
    rx: mpsc::Receiver<ArchiveChunk>,
}

impl ArchiveReceiver {
    pub async fn recv(&mut self) -> Option<ArchiveChunk> {
        self.rx.recv().await
    }

    /// Adapt into a `Stream`, e.g. for use as a response body.
    pub fn into_stream(self) -> impl Stream<Item = ArchiveChunk> + Send + 'static {
        futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
    }

    /// Drain the channel, failing on the first aborted chunk.
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.recv().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// Directory inside the archive that holds every entry: the bundle
/// filename without its final extension. Empty names produce no root.
pub fn archive_root(filename: &str) -> Option<String> {
    let stem = match filename.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !ext.contains('/') => stem,
        _ => filename,
    };
    let root = normalize_entry_name(stem);
    (!root.is_empty()).then_some(root)
}

/// In-memory buffer the zip encoder writes into; drained after every write.
#[derive(Clone, Default)]
struct Spool(Arc<Mutex<Vec<u8>>>);

impl Spool {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streaming ZIP encoder bound to an [`ArchiveSink`].
///
/// Entries are written strictly one after another. Compressed output is
/// forwarded to the sink as soon as the encoder produces it, so nothing
/// larger than one source chunk is ever held in memory. The archive is only
/// valid once [`finalize`](Self::finalize) has written the central directory.
pub struct ArchiveWriter {
    zip: ZipWriter<StreamWriter<Spool>>,
    spool: Spool,
    sink: ArchiveSink,
    root: Option<String>,
    options: SimpleFileOptions,
    summary: ArchiveSummary,
}

impl ArchiveWriter {
    pub fn new(sink: ArchiveSink, root: Option<String>) -> Self {
        let spool = Spool::default();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(COMPRESSION_LEVEL))
            .unix_permissions(0o644);

        Self {
            zip: ZipWriter::new_stream(spool.clone()),
            spool,
            sink,
            root,
            options,
            summary: ArchiveSummary::default(),
        }
    }

    /// Full entry name, including the root directory if there is one.
    pub fn entry_name(&self, name: &str) -> String {
        match &self.root {
            Some(root) => format!("{root}/{name}"),
            None => name.to_owned(),
        }
    }

    /// Bytes handed to the sink so far.
    pub fn bytes_out(&self) -> u64 {
        self.summary.bytes_out
    }

    /// Compress `payload` into the archive under `name`, draining it fully.
    ///
    /// Returns the number of uncompressed bytes written. Stops early with
    /// [`ArchiveError::Disconnected`] if the consumer goes away while the
    /// payload is still being read.
    pub async fn append_entry(
        &mut self,
        name: &str,
        mut payload: ByteStream,
    ) -> Result<u64, ArchiveError> {
        let entry_name = self.entry_name(name);
        self.zip.start_file(entry_name.as_str(), self.options)?;
        self.flush().await?;

        let sink = self.sink.clone();
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(ArchiveError::Disconnected),
                next = payload.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    self.zip.write_all(&chunk)?;
                    written += chunk.len() as u64;
                    self.flush().await?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        self.summary.entries += 1;
        self.summary.bytes_in += written;
        Ok(written)
    }

    /// Write the central directory and close the output.
    pub async fn finalize(mut self) -> Result<ArchiveSummary, ArchiveError> {
        let zip = std::mem::replace(&mut self.zip, ZipWriter::new_stream(Spool::default()));
        zip.finish()?;
        self.flush().await?;
        Ok(self.summary)
    }

    /// Give up on the archive without writing a trailer.
    ///
    /// If output has already reached the sink, an error chunk is sent so the
    /// consumer sees a truncated archive rather than a short valid one. If
    /// nothing was sent, the sink is simply closed and the caller reports the
    /// failure instead.
    pub async fn abort(self, reason: impl fmt::Display) {
        if self.summary.bytes_out > 0 {
            let error = io::Error::other(format!("archive aborted: {reason}"));
            // A closed sink already means the consumer is gone.
            let _ = self.sink.send(Err(error)).await;
        }
    }

    async fn flush(&mut self) -> Result<(), ArchiveError> {
        let pending = self.spool.take();
        if pending.is_empty() {
            return Ok(());
        }
        self.summary.bytes_out += pending.len() as u64;
        self.sink.send(Ok(Bytes::from(pending))).await
    }
}

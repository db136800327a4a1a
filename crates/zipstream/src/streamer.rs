use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, error, info, warn};
use url::Url;

use crate::archive::{
    ArchiveError, ArchiveReceiver, ArchiveSink, ArchiveSummary, ArchiveWriter, archive_channel,
    archive_root,
};
use crate::bundle::FileReference;
use crate::destination::resolve_destinations;
use crate::fetcher::{ByteStream, FetchError, Fetcher};
use crate::registry::{FetcherRegistry, UnsupportedProtocol};

pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Tuning for the streaming pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Sources opened ahead of the one currently being written.
    pub fetch_concurrency: usize,
    /// Archive chunks queued before the writer waits for the consumer.
    pub channel_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Errors that end a bundle stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    UnsupportedProtocol(#[from] UnsupportedProtocol),

    #[error("invalid source '{uri}': {reason}")]
    InvalidSource { uri: String, reason: String },

    #[error("failed to fetch '{uri}' for entry '{destination}': {error}")]
    Fetch {
        destination: String,
        uri: String,
        #[source]
        error: FetchError,
    },

    #[error("archive error: {0}")]
    Archive(#[source] ArchiveError),

    #[error("archive consumer disconnected")]
    Disconnected,
}

impl StreamError {
    /// True when the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProtocol(_) | Self::InvalidSource { .. }
        )
    }
}

/// One entry that passed resolution, paired with the fetcher that will open it.
#[derive(Clone)]
pub struct PreparedEntry {
    pub destination: String,
    pub source: Url,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for PreparedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedEntry")
            .field("destination", &self.destination)
            .field("source", &self.source.as_str())
            .field("fetcher", &self.fetcher.label())
            .finish()
    }
}

/// A bundle whose entries are deduplicated and whose sources all have a
/// fetcher willing to open them. Nothing has been fetched yet.
#[derive(Debug, Clone)]
pub struct PreparedBundle {
    pub filename: String,
    pub root: Option<String>,
    pub entries: Vec<PreparedEntry>,
}

impl PreparedBundle {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turns a file list into a streamed ZIP archive.
#[derive(Debug, Clone)]
pub struct BundleStreamer {
    registry: Arc<FetcherRegistry>,
    options: StreamOptions,
}

impl BundleStreamer {
    pub fn new(registry: FetcherRegistry) -> Self {
        Self::with_options(registry, StreamOptions::default())
    }

    pub fn with_options(registry: FetcherRegistry, options: StreamOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            options,
        }
    }

    pub fn registry(&self) -> &FetcherRegistry {
        &self.registry
    }

    pub fn options(&self) -> StreamOptions {
        self.options
    }

    /// Deduplicate destinations and resolve a fetcher for every source.
    ///
    /// All entries are checked before any is opened, so a bad scheme or a
    /// rejected host anywhere in the list fails here, before output starts.
    pub fn prepare(
        &self,
        filename: &str,
        files: &[FileReference],
    ) -> Result<PreparedBundle, StreamError> {
        let mut entries = Vec::new();

        for resolved in resolve_destinations(files) {
            let source = parse_source(&resolved.source)?;
            if resolved.destination.is_empty() {
                return Err(StreamError::InvalidSource {
                    uri: resolved.source,
                    reason: "no entry name can be derived from it".to_owned(),
                });
            }

            let fetcher = self.registry.resolve(&source)?;
            fetcher
                .check(&source)
                .map_err(|e| StreamError::InvalidSource {
                    uri: resolved.source.clone(),
                    reason: e.to_string(),
                })?;

            entries.push(PreparedEntry {
                destination: resolved.destination,
                source,
                fetcher,
            });
        }

        Ok(PreparedBundle {
            filename: filename.to_owned(),
            root: archive_root(filename),
            entries,
        })
    }

    /// Write the prepared bundle into `sink`, entry by entry, then finalize.
    ///
    /// Each open runs on its own task, and up to `fetch_concurrency` of them
    /// run ahead of the entry being written; the archive still receives them
    /// in prepared order. The first failure
    /// aborts the archive and drops every open source stream.
    pub async fn stream(
        &self,
        prepared: PreparedBundle,
        sink: ArchiveSink,
    ) -> Result<ArchiveSummary, StreamError> {
        let PreparedBundle {
            filename,
            root,
            entries,
        } = prepared;
        let total = entries.len();
        let watch = sink.clone();
        let mut writer = ArchiveWriter::new(sink, root);

        let depth = self.options.fetch_concurrency.max(1);
        let mut queued = entries.into_iter();
        let mut ahead: VecDeque<PendingOpen> =
            queued.by_ref().take(depth).map(open_ahead).collect();

        while let Some((entry, open)) = ahead.pop_front() {
            // Keep the look-ahead full while this entry is written.
            if let Some(next) = queued.next() {
                ahead.push_back(open_ahead(next));
            }

            let opened = tokio::select! {
                biased;
                _ = watch.closed() => None,
                opened = open => Some(opened),
            };

            let payload = match opened {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => Err(FetchError::transport(
                    &entry.source,
                    format!("open task failed: {e}"),
                )),
                None => {
                    drop(ahead);
                    warn!(%filename, "consumer went away while opening sources");
                    writer.abort(StreamError::Disconnected).await;
                    return Err(StreamError::Disconnected);
                }
            };

            debug!(
                destination = %entry.destination,
                source = %entry.source,
                fetcher = entry.fetcher.label(),
                "appending entry"
            );

            let appended = match payload {
                Ok(payload) => writer.append_entry(&entry.destination, payload).await,
                Err(e) => Err(ArchiveError::Fetch(e)),
            };

            let written = match appended {
                Ok(written) => written,
                Err(e) => {
                    drop(ahead);
                    let failure = entry_failure(&entry, e);
                    match &failure {
                        StreamError::Disconnected => {
                            warn!(%filename, destination = %entry.destination, "consumer disconnected mid-stream");
                        }
                        _ => {
                            error!(
                                %filename,
                                destination = %entry.destination,
                                source = %entry.source,
                                error = %failure,
                                "aborting archive"
                            );
                        }
                    }
                    writer.abort(&failure).await;
                    return Err(failure);
                }
            };

            debug!(destination = %entry.destination, written, "entry written");
        }

        let summary = writer.finalize().await.map_err(|e| match e {
            ArchiveError::Disconnected => StreamError::Disconnected,
            other => StreamError::Archive(other),
        })?;

        info!(
            %filename,
            entries = summary.entries,
            expected = total,
            bytes_in = summary.bytes_in,
            bytes_out = summary.bytes_out,
            "bundle streamed"
        );
        Ok(summary)
    }

    /// Run [`stream`](Self::stream) on a background task, inside the current
    /// span, and hand back the receiving end of its output.
    pub fn spawn(
        &self,
        prepared: PreparedBundle,
    ) -> (
        ArchiveReceiver,
        JoinHandle<Result<ArchiveSummary, StreamError>>,
    ) {
        let (sink, receiver) = archive_channel(self.options.channel_capacity);
        let streamer = self.clone();
        let handle = tokio::spawn(
            async move { streamer.stream(prepared, sink).await }.instrument(tracing::Span::current()),
        );
        (receiver, handle)
    }
}

/// A source whose open is running on its own task. Dropping it cancels the
/// open, or closes the stream if the open already finished.
type PendingOpen = (PreparedEntry, AbortOnDropHandle<Result<ByteStream, FetchError>>);

fn open_ahead(entry: PreparedEntry) -> PendingOpen {
    let fetcher = entry.fetcher.clone();
    let source = entry.source.clone();
    let task = tokio::spawn(
        async move { fetcher.open(&source).await }.instrument(tracing::Span::current()),
    );
    (entry, AbortOnDropHandle::new(task))
}

fn parse_source(source: &str) -> Result<Url, StreamError> {
    let invalid = |reason: &str| StreamError::InvalidSource {
        uri: source.to_owned(),
        reason: reason.to_owned(),
    };

    let url = Url::parse(source).map_err(|e| invalid(&e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("missing host or path"));
    }
    Ok(url)
}

fn entry_failure(entry: &PreparedEntry, error: ArchiveError) -> StreamError {
    match error {
        ArchiveError::Disconnected => StreamError::Disconnected,
        ArchiveError::Fetch(error) => StreamError::Fetch {
            destination: entry.destination.clone(),
            uri: entry.source.to_string(),
            error,
        },
        other => StreamError::Archive(other),
    }
}

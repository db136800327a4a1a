pub mod archive;
pub mod bundle;
pub mod destination;
pub mod fetcher;
pub mod registry;
pub mod store;
pub mod streamer;

pub use archive::{
    ArchiveChunk, ArchiveError, ArchiveReceiver, ArchiveSink, ArchiveSummary, ArchiveWriter,
    archive_channel, archive_root,
};
pub use bundle::{Bundle, BundleId, FileReference, epoch_secs_now, expiration_from_now};
pub use destination::{ResolvedEntry, derive_destination, normalize_entry_name, resolve_destinations};
pub use fetcher::{ByteStream, FetchError, Fetcher};
pub use registry::{FetcherRegistry, UnsupportedProtocol};
pub use store::{BundleStore, NewBundle, StoreError};
pub use streamer::{BundleStreamer, PreparedBundle, PreparedEntry, StreamError, StreamOptions};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

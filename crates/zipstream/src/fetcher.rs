use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use url::Url;

/// Errors that can occur when opening or reading a source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("source not found: {uri}")]
    NotFound { uri: String },

    #[error("refusing to fetch from IP address host: {host}")]
    IpAddressHost { host: String },

    #[error("invalid source '{uri}': {reason}")]
    InvalidSource { uri: String, reason: String },

    #[error("transport error fetching {uri}: {message}")]
    Transport { uri: String, message: String },
}

impl FetchError {
    pub fn not_found(source: &Url) -> Self {
        Self::NotFound {
            uri: source.to_string(),
        }
    }

    pub fn transport(source: &Url, message: impl Into<String>) -> Self {
        Self::Transport {
            uri: source.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(source: &Url, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            uri: source.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before any I/O, caused by the URI itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::IpAddressHost { .. } | Self::InvalidSource { .. })
    }
}

/// A readable stream of source bytes. Dropping it cancels the transfer.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// A protocol-specific backend that can stream a source URI.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable label identifying this backend.
    fn label(&self) -> &str;

    /// Reject sources this backend will never open, without doing any I/O.
    fn check(&self, _source: &Url) -> Result<(), FetchError> {
        Ok(())
    }

    /// Open a byte stream for the source.
    async fn open(&self, source: &Url) -> Result<ByteStream, FetchError>;
}

#[async_trait::async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn check(&self, source: &Url) -> Result<(), FetchError> {
        (**self).check(source)
    }

    async fn open(&self, source: &Url) -> Result<ByteStream, FetchError> {
        (**self).open(source).await
    }
}

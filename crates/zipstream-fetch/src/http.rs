use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::redirect::{Attempt, Policy};
use url::Url;
use zipstream::{ByteStream, FetchError, Fetcher};

use crate::guard::{ensure_named_host, literal_ip_host};

const USER_AGENT: &str = "zipstream";

/// Redirects followed before the request fails.
pub const MAX_REDIRECTS: usize = 10;

/// Streams plain HTTP(S) sources.
///
/// Literal IP hosts are refused up front and on every redirect hop, so a
/// user-supplied URI cannot be used to reach internal addresses by number.
pub struct HttpFetcher {
    client: reqwest::Client,
    label: String,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_label("http")
    }

    pub fn with_label(label: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::custom(follow_named_hosts))
            .build()?;

        Ok(Self {
            client,
            label: label.into(),
        })
    }
}

fn follow_named_hosts(attempt: Attempt) -> reqwest::redirect::Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        attempt.error("too many redirects")
    } else if let Some(host) = literal_ip_host(attempt.url()) {
        attempt.error(format!("redirect to IP address host {host} refused"))
    } else {
        attempt.follow()
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    fn label(&self) -> &str {
        &self.label
    }

    fn check(&self, source: &Url) -> Result<(), FetchError> {
        ensure_named_host(source)
    }

    async fn open(&self, source: &Url) -> Result<ByteStream, FetchError> {
        ensure_named_host(source)?;

        let response = self
            .client
            .get(source.clone())
            .send()
            .await
            .map_err(|e| FetchError::transport(source, format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::not_found(source));
        }
        if !status.is_success() {
            return Err(FetchError::transport(source, format!("HTTP {status}")));
        }

        tracing::debug!(%source, %status, "http source opened");

        let uri = source.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| FetchError::Transport {
                    uri: uri.clone(),
                    message: format!("failed to read body: {e}"),
                })
            })
            .boxed())
    }
}

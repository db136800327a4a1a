use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use url::Url;

use crate::bundle::{Bundle, BundleId, FileReference, expiration_from_now};
use crate::fetcher::{ByteStream, FetchError, Fetcher};
use crate::store::{BundleStore, NewBundle, StoreError};

enum Behavior {
    Serve(Vec<Bytes>),
    FailAfter(Vec<Bytes>, FetchError),
    HangAfter(Vec<Bytes>),
}

/// Counts source streams that have been opened and not yet dropped.
#[derive(Debug, Clone, Default)]
pub struct LiveStreams(Arc<AtomicUsize>);

impl LiveStreams {
    pub fn current(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn track(&self) -> LiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        LiveGuard(self.0.clone())
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory fetcher for testing. Serves canned payloads keyed by source URI.
pub struct InMemoryFetcher {
    label: String,
    sources: HashMap<String, Behavior>,
    delays: HashMap<String, (u32, Duration)>,
    pacing: HashMap<String, Duration>,
    rejected_hosts: HashSet<String>,
    live: LiveStreams,
    opened: Arc<Mutex<Vec<String>>>,
}

impl InMemoryFetcher {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sources: HashMap::new(),
            delays: HashMap::new(),
            pacing: HashMap::new(),
            rejected_hosts: HashSet::new(),
            live: LiveStreams::default(),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `content` as a single chunk.
    pub fn add(&mut self, source: &str, content: impl Into<Bytes>) {
        self.add_chunks(source, vec![content.into()]);
    }

    pub fn add_chunks(&mut self, source: &str, chunks: Vec<Bytes>) {
        self.sources.insert(source.to_owned(), Behavior::Serve(chunks));
    }

    /// Yield `chunks`, then fail with `error`.
    pub fn fail_after(&mut self, source: &str, chunks: Vec<Bytes>, error: FetchError) {
        self.sources
            .insert(source.to_owned(), Behavior::FailAfter(chunks, error));
    }

    /// Yield `chunks`, then never produce anything again.
    pub fn hang_after(&mut self, source: &str, chunks: Vec<Bytes>) {
        self.sources
            .insert(source.to_owned(), Behavior::HangAfter(chunks));
    }

    /// Wait `delay` before opening `source`.
    pub fn delay(&mut self, source: &str, delay: Duration) {
        self.open_in_steps(source, 1, delay);
    }

    /// Open `source` in `steps` separate waits of `step` each, the way a
    /// real open resolves, connects and reads headers one after another.
    pub fn open_in_steps(&mut self, source: &str, steps: u32, step: Duration) {
        self.delays.insert(source.to_owned(), (steps, step));
    }

    /// Wait `interval` before yielding each chunk of `source`.
    pub fn pace(&mut self, source: &str, interval: Duration) {
        self.pacing.insert(source.to_owned(), interval);
    }

    /// Fail `check` for sources on `host`.
    pub fn reject_host(&mut self, host: &str) {
        self.rejected_hosts.insert(host.to_owned());
    }

    pub fn live_streams(&self) -> LiveStreams {
        self.live.clone()
    }

    /// Sources opened so far, in the order `open` was called.
    pub fn opened(&self) -> Arc<Mutex<Vec<String>>> {
        self.opened.clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for InMemoryFetcher {
    fn label(&self) -> &str {
        &self.label
    }

    fn check(&self, source: &Url) -> Result<(), FetchError> {
        match source.host_str() {
            Some(host) if self.rejected_hosts.contains(host) => Err(FetchError::IpAddressHost {
                host: host.to_owned(),
            }),
            _ => Ok(()),
        }
    }

    async fn open(&self, source: &Url) -> Result<ByteStream, FetchError> {
        self.check(source)?;
        self.opened.lock().unwrap().push(source.to_string());

        if let Some(&(steps, step)) = self.delays.get(source.as_str()) {
            for _ in 0..steps {
                tokio::time::sleep(step).await;
            }
        }

        let items = |chunks: &[Bytes]| -> Vec<Result<Bytes, FetchError>> {
            chunks.iter().cloned().map(Ok).collect()
        };

        let body: ByteStream = match self.sources.get(source.as_str()) {
            None => return Err(FetchError::not_found(source)),
            Some(Behavior::Serve(chunks)) => stream::iter(items(chunks)).boxed(),
            Some(Behavior::FailAfter(chunks, error)) => stream::iter(items(chunks))
                .chain(stream::once(futures::future::ready(Err(error.clone()))))
                .boxed(),
            Some(Behavior::HangAfter(chunks)) => stream::iter(items(chunks))
                .chain(stream::pending())
                .boxed(),
        };

        let body = match self.pacing.get(source.as_str()).copied() {
            Some(interval) => body
                .then(move |item| async move {
                    tokio::time::sleep(interval).await;
                    item
                })
                .boxed(),
            None => body,
        };

        let guard = self.live.track();
        Ok(body
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }
}

/// In-memory bundle store for testing. Ids and secrets are sequential.
pub struct InMemoryBundleStore {
    lifetime: Duration,
    bundles: Mutex<HashMap<BundleId, Bundle>>,
    next: AtomicUsize,
}

impl InMemoryBundleStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            bundles: Mutex::new(HashMap::new()),
            next: AtomicUsize::new(1),
        }
    }

    /// Store a record exactly as given, bypassing id generation.
    pub fn insert(&self, bundle: Bundle) {
        self.bundles.lock().unwrap().insert(bundle.id.clone(), bundle);
    }

    pub fn len(&self) -> usize {
        self.bundles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn authorized(
        bundles: &HashMap<BundleId, Bundle>,
        id: &BundleId,
        secret: Option<&str>,
    ) -> Result<Bundle, StoreError> {
        let bundle = bundles.get(id).ok_or(StoreError::NotFound)?;
        if bundle.is_expired(crate::bundle::epoch_secs_now()) {
            return Err(StoreError::NotFound);
        }
        match secret {
            Some(secret) if secret != bundle.secret => Err(StoreError::NotFound),
            _ => Ok(bundle.clone()),
        }
    }
}

impl Default for InMemoryBundleStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(7 * 24 * 60 * 60))
    }
}

#[async_trait::async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn create(&self, bundle: NewBundle) -> Result<Bundle, StoreError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let created = Bundle {
            id: BundleId::new(format!("bundle-{n}")),
            secret: format!("secret-{n}"),
            filename: bundle.filename,
            files: bundle.files,
            expiration_date: expiration_from_now(self.lifetime),
        };
        self.insert(created.clone());
        Ok(created)
    }

    async fn read(&self, id: &BundleId, secret: Option<&str>) -> Result<Bundle, StoreError> {
        let bundles = self.bundles.lock().unwrap();
        Self::authorized(&bundles, id, secret)
    }

    async fn update(
        &self,
        id: &BundleId,
        secret: &str,
        files: Vec<FileReference>,
    ) -> Result<Bundle, StoreError> {
        let mut bundles = self.bundles.lock().unwrap();
        let mut bundle = Self::authorized(&bundles, id, Some(secret))?;
        bundle.files.extend(files);
        bundles.insert(id.clone(), bundle.clone());
        Ok(bundle)
    }

    async fn delete(&self, id: &BundleId, secret: &str) -> Result<Bundle, StoreError> {
        let mut bundles = self.bundles.lock().unwrap();
        let bundle = Self::authorized(&bundles, id, Some(secret))?;
        bundles.remove(id);
        Ok(bundle)
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut bundles = self.bundles.lock().unwrap();
        let before = bundles.len();
        bundles.retain(|_, bundle| !bundle.is_expired(now));
        Ok(before - bundles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    async fn collect(stream: ByteStream) -> Vec<Result<Bytes, FetchError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn serves_added_content() {
        let mut fetcher = InMemoryFetcher::new("test");
        fetcher.add("store://b/a.txt", "hello");

        let items = collect(fetcher.open(&url("store://b/a.txt")).await.unwrap()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let fetcher = InMemoryFetcher::new("test");
        let err = fetcher.open(&url("store://b/none")).await.err().unwrap();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn live_streams_drop_to_zero() {
        let mut fetcher = InMemoryFetcher::new("test");
        fetcher.add("store://b/a.txt", "hello");
        let live = fetcher.live_streams();

        let stream = fetcher.open(&url("store://b/a.txt")).await.unwrap();
        assert_eq!(live.current(), 1);
        drop(stream);
        assert_eq!(live.current(), 0);
    }

    #[tokio::test]
    async fn store_round_trip_with_secret() {
        let store = InMemoryBundleStore::default();
        let created = store
            .create(NewBundle {
                filename: "b.zip".into(),
                files: vec![],
            })
            .await
            .unwrap();

        assert!(store.read(&created.id, None).await.is_ok());
        assert!(store.read(&created.id, Some(&created.secret)).await.is_ok());
        assert!(matches!(
            store.read(&created.id, Some("wrong")).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn purge_removes_expired_records() {
        let store = InMemoryBundleStore::default();
        store.insert(Bundle {
            id: BundleId::new("old"),
            secret: "s".into(),
            filename: String::new(),
            files: vec![],
            expiration_date: 10,
        });

        assert_eq!(store.purge_expired(11).await.unwrap(), 1);
        assert!(store.is_empty());
    }
}

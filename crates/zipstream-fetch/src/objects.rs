use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{GetOptions, ObjectStore};
use url::Url;
use zipstream::{ByteStream, FetchError, Fetcher};

use crate::guard::ensure_named_host;

/// Builds the client for one bucket.
pub type ClientFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn ObjectStore>, object_store::Error> + Send + Sync>;

/// Connection settings for an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint, for S3-compatible services other than AWS.
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_owned(),
            endpoint: None,
            allow_http: false,
        }
    }
}

/// Streams `<scheme>://<bucket>/<key>` sources from an object store.
///
/// One client is built per bucket on first use and reused afterwards.
pub struct ObjectStoreFetcher {
    label: String,
    factory: ClientFactory,
    clients: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreFetcher {
    /// S3 backend. Credentials come from the environment.
    pub fn s3(settings: S3Settings) -> Self {
        Self::with_factory("s3", move |bucket| {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(&settings.region)
                .with_allow_http(settings.allow_http);

            if let Some(endpoint) = &settings.endpoint {
                builder = builder.with_endpoint(endpoint);
            }

            Ok(Arc::new(builder.build()?) as Arc<dyn ObjectStore>)
        })
    }

    pub fn with_factory<F>(label: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn ObjectStore>, object_store::Error> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            factory: Arc::new(factory),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Serve every bucket from the same store.
    pub fn shared(label: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self::with_factory(label, move |_| Ok(store.clone()))
    }

    fn client(&self, source: &Url, bucket: &str) -> Result<Arc<dyn ObjectStore>, FetchError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }

        let client = (self.factory)(bucket).map_err(|e| {
            FetchError::transport(source, format!("failed to create client for bucket {bucket}: {e}"))
        })?;
        clients.insert(bucket.to_owned(), client.clone());
        Ok(client)
    }
}

/// Translate an object store error into the shared fetch taxonomy.
fn map_store_error(uri: &str, error: object_store::Error) -> FetchError {
    match error {
        object_store::Error::NotFound { .. } => FetchError::NotFound {
            uri: uri.to_owned(),
        },
        other => FetchError::Transport {
            uri: uri.to_owned(),
            message: other.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl Fetcher for ObjectStoreFetcher {
    fn label(&self) -> &str {
        &self.label
    }

    fn check(&self, source: &Url) -> Result<(), FetchError> {
        ensure_named_host(source)?;
        if source.path().trim_start_matches('/').is_empty() {
            return Err(FetchError::invalid(source, "missing object key"));
        }
        Ok(())
    }

    async fn open(&self, source: &Url) -> Result<ByteStream, FetchError> {
        self.check(source)?;

        let bucket = source.host_str().unwrap_or_default();
        let key = Path::from_url_path(source.path())
            .map_err(|e| FetchError::invalid(source, format!("invalid object key: {e}")))?;
        let client = self.client(source, bucket)?;

        let uri = source.to_string();
        let result = client
            .get_opts(&key, GetOptions::default())
            .await
            .map_err(|e| map_store_error(&uri, e))?;

        tracing::debug!(%source, size = result.meta.size, "object opened");

        Ok(result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| map_store_error(&uri, e)))
            .boxed())
    }
}

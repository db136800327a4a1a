use std::io::{Cursor, Read};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use zipstream::test_support::{InMemoryBundleStore, InMemoryFetcher};
use zipstream::{Bundle, BundleId, BundleStore, BundleStreamer, FetcherRegistry, epoch_secs_now};
use zipstream_fetch::HttpFetcher;
use zipstream_server::{AppState, Environment, serve};

struct TestServer {
    base: String,
    store: Arc<InMemoryBundleStore>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

fn sample_fetcher() -> InMemoryFetcher {
    let mut fetcher = InMemoryFetcher::new("s3");
    fetcher.add("s3://bucket-a/path/to/foo.jpg", "A stream of data");
    fetcher.add("s3://bucket-b/bar.gif", "Another stream");
    fetcher
}

fn sample_files() -> Value {
    json!([
        { "source": "s3://bucket-a/path/to/foo.jpg", "destination": "foo.jpg" },
        { "source": "s3://bucket-b/bar.gif" },
    ])
}

async fn start_with(registry: FetcherRegistry, environment: Environment) -> TestServer {
    let store = Arc::new(InMemoryBundleStore::default());
    let state = AppState::new(store.clone(), BundleStreamer::new(registry), environment);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state, std::future::pending()));

    TestServer {
        base: format!("http://{addr}"),
        store,
        client: reqwest::Client::new(),
    }
}

async fn start(fetcher: InMemoryFetcher) -> TestServer {
    let registry = FetcherRegistry::new().with("s3", Arc::new(fetcher));
    start_with(registry, Environment::Test).await
}

fn archive_entries(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut content = String::new();
            file.read_to_string(&mut content).unwrap();
            (file.name().to_owned(), content)
        })
        .collect()
}

async fn create(server: &TestServer, body: Value) -> Value {
    let response = server
        .client
        .post(server.url("/"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

#[tokio::test]
async fn health_check_says_ok() {
    let server = start(sample_fetcher()).await;
    let response = server.client.get(server.url("/health-check")).send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn unknown_routes_and_methods_are_404() {
    let server = start(sample_fetcher()).await;

    for response in [
        server.client.get(server.url("/a/b/c")).send().await.unwrap(),
        server.client.get(server.url("/")).send().await.unwrap(),
        server.client.patch(server.url("/some-id")).send().await.unwrap(),
    ] {
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "message": "Not Found" }));
    }
}

#[tokio::test]
async fn create_returns_bundle_with_identity() {
    let server = start(sample_fetcher()).await;
    let bundle = create(
        &server,
        json!({ "filename": "my-awesome-bundle.zip", "id": "ignored" }),
    )
    .await;

    assert_ne!(bundle["id"], "ignored");
    assert!(bundle["secret"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(bundle["filename"], "my-awesome-bundle.zip");
    assert_eq!(bundle["files"], json!([]));
    assert!(bundle["expirationDate"].as_i64().unwrap() > epoch_secs_now());
}

#[tokio::test]
async fn create_validates_body() {
    let server = start(sample_fetcher()).await;
    let cases = [
        (json!({}), "\"filename\" is required"),
        (json!({ "filename": "asdf.zip", "files": 1 }), "\"files\" must be an array"),
        (json!({ "filename": "asdf.zip", "files": [{}] }), "\"source\" is required"),
    ];

    for (body, message) in cases {
        let response = server
            .client
            .post(server.url("/"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "message": message }));
    }
}

#[tokio::test]
async fn read_requires_matching_secret() {
    let server = start(sample_fetcher()).await;
    let bundle = create(&server, json!({ "filename": "b.zip", "files": sample_files() })).await;
    let id = bundle["id"].as_str().unwrap();
    let secret = bundle["secret"].as_str().unwrap();

    let response = server
        .client
        .get(server.url(&format!("/{id}/{secret}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), bundle);

    let response = server
        .client
        .get(server.url(&format!("/{id}/wrong-secret")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn update_appends_files() {
    let server = start(sample_fetcher()).await;
    let bundle = create(&server, json!({ "filename": "b.zip" })).await;
    let id = bundle["id"].as_str().unwrap();
    let secret = bundle["secret"].as_str().unwrap();

    for source in ["s3://bucket-a/one.txt", "s3://bucket-a/two.txt"] {
        let response = server
            .client
            .put(server.url(&format!("/{id}/{secret}")))
            .json(&json!({ "files": [{ "src": source }] }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let stored = server
        .store
        .read(&BundleId::new(id), None)
        .await
        .unwrap();
    let sources: Vec<&str> = stored.files.iter().map(|f| f.source.as_str()).collect();
    assert_eq!(sources, vec!["s3://bucket-a/one.txt", "s3://bucket-a/two.txt"]);
}

#[tokio::test]
async fn update_requires_files() {
    let server = start(sample_fetcher()).await;
    let bundle = create(&server, json!({ "filename": "b.zip" })).await;
    let id = bundle["id"].as_str().unwrap();
    let secret = bundle["secret"].as_str().unwrap();

    let response = server
        .client
        .put(server.url(&format!("/{id}/{secret}")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn delete_removes_bundle() {
    let server = start(sample_fetcher()).await;
    let bundle = create(&server, json!({ "filename": "b.zip" })).await;
    let id = bundle["id"].as_str().unwrap();
    let secret = bundle["secret"].as_str().unwrap();

    let response = server
        .client
        .delete(server.url(&format!("/{id}/{secret}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), bundle);

    let response = server
        .client
        .get(server.url(&format!("/{id}/{secret}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn download_streams_zip_by_id() {
    let server = start(sample_fetcher()).await;
    let bundle = create(
        &server,
        json!({ "filename": "my-awesome-bundle.zip", "files": sample_files() }),
    )
    .await;

    let response = server
        .client
        .get(server.url(&format!("/{}", bundle["id"].as_str().unwrap())))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"my-awesome-bundle.zip\""
    );

    let bytes = response.bytes().await.unwrap();
    assert_eq!(
        archive_entries(&bytes),
        vec![
            ("my-awesome-bundle/foo.jpg".to_owned(), "A stream of data".to_owned()),
            ("my-awesome-bundle/bar.gif".to_owned(), "Another stream".to_owned()),
        ]
    );
}

#[tokio::test]
async fn download_of_unknown_bundle_is_404() {
    let server = start(sample_fetcher()).await;
    let response = server.client.get(server.url("/no-such-bundle")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn expired_bundle_is_404() {
    let server = start(sample_fetcher()).await;
    server.store.insert(Bundle {
        id: BundleId::new("old"),
        secret: "s".into(),
        filename: "old.zip".into(),
        files: vec![],
        expiration_date: epoch_secs_now() - 10,
    });

    let response = server.client.get(server.url("/old/s")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let response = server.client.get(server.url("/old")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn ad_hoc_download_streams_zip() {
    let server = start(sample_fetcher()).await;
    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "files": sample_files() }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-disposition"], "attachment");

    let bytes = response.bytes().await.unwrap();
    assert!(bytes.starts_with(b"PK\x03\x04"));
    let names: Vec<String> = archive_entries(&bytes).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["foo.jpg", "bar.gif"]);
}

#[tokio::test]
async fn duplicate_destinations_are_archived_once() {
    let server = start(sample_fetcher()).await;
    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "files": [
            { "source": "s3://bucket-a/path/to/foo.jpg", "destination": "foo.jpg" },
            { "source": "s3://bucket-b/foo.jpg" },
        ] }))
        .send()
        .await
        .unwrap();

    let bytes = response.bytes().await.unwrap();
    assert_eq!(
        archive_entries(&bytes),
        vec![("foo.jpg".to_owned(), "A stream of data".to_owned())]
    );
}

#[tokio::test]
async fn unsupported_protocol_is_400() {
    let server = start(sample_fetcher()).await;
    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "filename": "b.zip", "files": [
            { "source": "s3://bucket-a/path/to/foo.jpg" },
            { "source": "ftp://files.example.com/a.txt" },
        ] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Protocol 'ftp' not supported." }));
}

#[tokio::test]
async fn ip_address_source_is_400() {
    let registry = FetcherRegistry::new().with("https", Arc::new(HttpFetcher::new().unwrap()));
    let server = start_with(registry, Environment::Test).await;

    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "files": [{ "source": "https://169.254.169.254/latest/meta-data" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn missing_first_source_is_clean_500() {
    let server = start(sample_fetcher()).await;
    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "files": [{ "source": "s3://bucket-a/missing.txt" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Internal Server Error" }));
}

#[tokio::test]
async fn development_exposes_error_detail() {
    let registry = FetcherRegistry::new().with("s3", Arc::new(sample_fetcher()));
    let server = start_with(registry, Environment::Development).await;

    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "files": [{ "source": "s3://bucket-a/missing.txt" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Internal Server Error");
    assert!(body["detail"].as_str().unwrap().contains("missing.txt"));
}

#[tokio::test]
async fn missing_later_source_truncates_download() {
    let server = start(sample_fetcher()).await;
    let response = server
        .client
        .post(server.url("/bundle"))
        .json(&json!({ "files": [
            { "source": "s3://bucket-a/path/to/foo.jpg" },
            { "source": "s3://bucket-a/missing.txt" },
        ] }))
        .send()
        .await;

    // The connection is cut once the failure is reached. With payloads this
    // small that can happen before the response head is flushed.
    let Ok(response) = response else {
        return;
    };
    assert_eq!(response.status(), 200);
    match response.bytes().await {
        Err(_) => {}
        Ok(bytes) => assert!(zip::ZipArchive::new(Cursor::new(bytes.to_vec())).is_err()),
    }
}

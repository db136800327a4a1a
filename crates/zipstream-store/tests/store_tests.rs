use std::time::Duration;

use zipstream::{BundleId, BundleStore, FileReference, NewBundle, StoreError, epoch_secs_now};
use zipstream_store::SqliteBundleStore;

const WEEK: Duration = Duration::from_secs(10080 * 60);

fn create_store() -> SqliteBundleStore {
    SqliteBundleStore::open_in_memory(WEEK).unwrap()
}

fn new_bundle(filename: &str, sources: &[&str]) -> NewBundle {
    NewBundle {
        filename: filename.to_owned(),
        files: sources.iter().map(|s| FileReference::new(*s)).collect(),
    }
}

#[tokio::test]
async fn create_assigns_identity_and_expiration() {
    let store = create_store();
    let before = epoch_secs_now();

    let bundle = store
        .create(new_bundle("my-awesome-bundle.zip", &["s3://b/a.txt"]))
        .await
        .unwrap();

    assert_eq!(bundle.id.as_str().len(), 36);
    assert_eq!(bundle.secret.len(), 36);
    assert_ne!(bundle.id.as_str(), bundle.secret);
    assert_eq!(bundle.filename, "my-awesome-bundle.zip");
    assert!(bundle.expiration_date >= before + WEEK.as_secs() as i64);
}

#[tokio::test]
async fn ids_are_unique() {
    let store = create_store();
    let a = store.create(new_bundle("a.zip", &[])).await.unwrap();
    let b = store.create(new_bundle("b.zip", &[])).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.secret, b.secret);
}

#[tokio::test]
async fn read_round_trips_files_in_order() {
    let store = create_store();
    let created = store
        .create(NewBundle {
            filename: "b.zip".into(),
            files: vec![
                FileReference::new("s3://b/one.txt").with_destination("1.txt"),
                FileReference::new("https://example.com/two.txt"),
            ],
        })
        .await
        .unwrap();

    let read = store.read(&created.id, None).await.unwrap();
    assert_eq!(read, created);
}

#[tokio::test]
async fn read_with_secret_checks_it() {
    let store = create_store();
    let created = store.create(new_bundle("b.zip", &[])).await.unwrap();

    assert!(store.read(&created.id, Some(&created.secret)).await.is_ok());
    assert!(matches!(
        store.read(&created.id, Some("not-the-secret")).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn unknown_id_and_wrong_secret_look_the_same() {
    let store = create_store();
    let created = store.create(new_bundle("b.zip", &[])).await.unwrap();

    let missing = store
        .read(&BundleId::new("no-such-id"), Some("whatever"))
        .await
        .unwrap_err();
    let mismatch = store
        .read(&created.id, Some("whatever"))
        .await
        .unwrap_err();

    assert_eq!(missing.to_string(), mismatch.to_string());
}

#[tokio::test]
async fn update_appends_files() {
    let store = create_store();
    let created = store
        .create(new_bundle("b.zip", &["s3://b/first.txt"]))
        .await
        .unwrap();

    let updated = store
        .update(
            &created.id,
            &created.secret,
            vec![FileReference::new("s3://b/second.txt")],
        )
        .await
        .unwrap();

    let sources: Vec<&str> = updated.files.iter().map(|f| f.source.as_str()).collect();
    assert_eq!(sources, vec!["s3://b/first.txt", "s3://b/second.txt"]);
    assert_eq!(store.read(&created.id, None).await.unwrap(), updated);
}

#[tokio::test]
async fn update_with_wrong_secret_changes_nothing() {
    let store = create_store();
    let created = store
        .create(new_bundle("b.zip", &["s3://b/first.txt"]))
        .await
        .unwrap();

    let result = store
        .update(&created.id, "wrong", vec![FileReference::new("s3://b/x.txt")])
        .await;

    assert!(matches!(result, Err(StoreError::NotFound)));
    assert_eq!(store.read(&created.id, None).await.unwrap().files.len(), 1);
}

#[tokio::test]
async fn delete_returns_record_and_removes_it() {
    let store = create_store();
    let created = store.create(new_bundle("b.zip", &["s3://b/a"])).await.unwrap();

    let deleted = store.delete(&created.id, &created.secret).await.unwrap();
    assert_eq!(deleted, created);
    assert!(matches!(
        store.read(&created.id, None).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn delete_with_wrong_secret_keeps_record() {
    let store = create_store();
    let created = store.create(new_bundle("b.zip", &[])).await.unwrap();

    assert!(matches!(
        store.delete(&created.id, "wrong").await,
        Err(StoreError::NotFound)
    ));
    assert!(store.read(&created.id, None).await.is_ok());
}

#[tokio::test]
async fn purge_keeps_live_bundles() {
    let store = create_store();
    store.create(new_bundle("b.zip", &[])).await.unwrap();

    assert_eq!(store.purge_expired(epoch_secs_now()).await.unwrap(), 0);
}

#[tokio::test]
async fn zero_lifetime_bundles_expire_immediately() {
    let store = SqliteBundleStore::open_in_memory(Duration::ZERO).unwrap();
    let created = store.create(new_bundle("b.zip", &[])).await.unwrap();

    assert!(matches!(
        store.read(&created.id, None).await,
        Err(StoreError::NotFound)
    ));
    assert_eq!(store.purge_expired(epoch_secs_now()).await.unwrap(), 1);
}

#[tokio::test]
async fn file_backed_store_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("zipstream-store-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bundles.db");
    let _ = std::fs::remove_file(&path);

    let created = {
        let store = SqliteBundleStore::open(&path, WEEK).unwrap();
        store.create(new_bundle("kept.zip", &["s3://b/a"])).await.unwrap()
    };

    let reopened = SqliteBundleStore::open(&path, WEEK).unwrap();
    assert_eq!(reopened.read(&created.id, None).await.unwrap(), created);

    std::fs::remove_dir_all(&dir).unwrap();
}

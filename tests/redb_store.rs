#![cfg(feature = "backend-redb")]

use std::sync::Arc;

use nearmatch::{
    BackendConfig, CharNgrams, CompressionConfig, InMemoryBackend, RedbBackend, SimilarityStore,
    StorageLevel, StoreConfig, Tokenizer,
};
use tempfile::TempDir;

fn trigrams() -> Arc<dyn Tokenizer> {
    Arc::new(CharNgrams::new(3))
}

#[tokio::test(flavor = "multi_thread")]
async fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.redb");

    {
        let store = SimilarityStore::create(
            StoreConfig::new(0.5).with_storage_level(StorageLevel::Document),
            trigrams(),
            Arc::new(RedbBackend::open(&path).unwrap()),
        )
        .await
        .unwrap();
        store.insert("oatmeal cookie", Some(1), None, None).await.unwrap();
        store
            .insert("oatmeal raisin cookie", Some(2), Some("baking"), None)
            .await
            .unwrap();
    }

    let store =
        SimilarityStore::load_from_storage(trigrams(), Arc::new(RedbBackend::open(&path).unwrap()))
            .await
            .unwrap();
    assert_eq!(store.storage_level(), StorageLevel::Document);
    assert_eq!(
        store.query_top_n("oatmeal cookie", 1, true).await.unwrap(),
        vec![(1, 1.0)]
    );
    assert_eq!(
        store.get_document(2).await.unwrap().document(),
        Some("oatmeal raisin cookie")
    );
    assert!(store
        .query_exact("oatmeal raisin cookie", "baking")
        .await
        .unwrap()
        .contains(&2));
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_on_redb() {
    let dir = TempDir::new().unwrap();
    let backend = BackendConfig::redb(dir.path().join("rm.redb").to_string_lossy())
        .build()
        .unwrap();
    let store = SimilarityStore::create(
        StoreConfig::default().with_storage_level(StorageLevel::Fingerprint),
        trigrams(),
        backend,
    )
    .await
    .unwrap();

    store.insert("to be removed", Some(5), None, None).await.unwrap();
    store.remove_by_id(5).await.unwrap();
    assert!(store.query("to be removed").await.unwrap().is_empty());
    assert!(store.remove_by_id(5).await.unwrap_err().is_not_found());
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_moves_between_backends() {
    let dir = TempDir::new().unwrap();
    let source = SimilarityStore::create(
        StoreConfig::new(0.5).with_storage_level(StorageLevel::Fingerprint),
        trigrams(),
        Arc::new(RedbBackend::open(dir.path().join("src.redb")).unwrap()),
    )
    .await
    .unwrap();
    source.insert("oatmeal cookie", Some(1), None, None).await.unwrap();

    let bytes = source.to_bytes(&CompressionConfig::default()).await.unwrap();
    let restored =
        SimilarityStore::from_bytes(&bytes, trigrams(), Arc::new(InMemoryBackend::new()))
            .await
            .unwrap();
    assert_eq!(
        restored.query_top_n("oatmeal cookie", 1, true).await.unwrap(),
        vec![(1, 1.0)]
    );
}

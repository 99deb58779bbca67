use turnstone::handle::{HandleManager, InMemoryHandleManager, UNRESOLVED_TARGET};

#[tokio::test(flavor = "multi_thread")]
async fn created_handles_carry_the_configured_prefix() {
    let manager = InMemoryHandleManager::new("123456");
    let handle = manager.create(None).await.expect("create");

    let (prefix, suffix) = handle.split_once('/').expect("prefix separator");
    assert_eq!(prefix, "123456");
    assert!(!suffix.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn handles_without_url_resolve_to_the_placeholder() {
    let manager = InMemoryHandleManager::new("123456");
    let handle = manager.create(None).await.expect("create");

    let resolved = manager.resolve(&handle).await.expect("resolve");
    assert_eq!(resolved, UNRESOLVED_TARGET);
}

#[tokio::test(flavor = "multi_thread")]
async fn handles_bind_to_the_given_url() {
    let manager = InMemoryHandleManager::new("123456");
    let handle = manager
        .create(Some("http://backend.example/records/1"))
        .await
        .expect("create");

    let resolved = manager.resolve(&handle).await.expect("resolve");
    assert_eq!(resolved, "http://backend.example/records/1");
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_rebinds_an_existing_handle() {
    let manager = InMemoryHandleManager::new("123456");
    let handle = manager.create(None).await.expect("create");

    let edited = manager
        .edit(&handle, "http://backend.example/records/2")
        .await
        .expect("edit");
    assert_eq!(edited, handle);

    let resolved = manager.resolve(&handle).await.expect("resolve");
    assert_eq!(resolved, "http://backend.example/records/2");
}

#[tokio::test(flavor = "multi_thread")]
async fn editing_an_unknown_handle_fails() {
    let manager = InMemoryHandleManager::new("123456");
    let err = manager
        .edit("123456/absent", "http://backend.example/")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown handle"));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolving_an_unknown_handle_yields_nothing() {
    let manager = InMemoryHandleManager::new("123456");
    assert!(manager.resolve("123456/absent").await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn every_created_handle_is_distinct() {
    let manager = InMemoryHandleManager::new("123456");
    let first = manager.create(None).await.expect("create first");
    let second = manager.create(None).await.expect("create second");
    assert_ne!(first, second);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|(_, url)| url == UNRESOLVED_TARGET));
}

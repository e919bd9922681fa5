//! Contract tests for `CapabilityStore`.
//!
//! Every backend runs the same scenarios. Any conforming implementation must
//! pass these.

use std::sync::Arc;

use capctl_state::{
    CapabilityStore, FsCapabilityStore, MemoryCapabilityStore, StorageError,
    SurrealCapabilityStore,
};

async fn backends() -> Vec<(&'static str, Arc<dyn CapabilityStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsCapabilityStore::new(dir.path()).unwrap();
    vec![
        ("memory", Arc::new(MemoryCapabilityStore::new()), None),
        ("fs", Arc::new(fs), Some(dir)),
        (
            "surreal",
            Arc::new(SurrealCapabilityStore::setup_db().await.unwrap()),
            None,
        ),
    ]
}

#[tokio::test]
async fn get_after_put_returns_last_write() {
    for (name, store, _guard) in backends().await {
        store
            .put("capability/svc-a", serde_json::json!({"rev": 1}))
            .await
            .unwrap();
        store
            .put("capability/svc-a", serde_json::json!({"rev": 2}))
            .await
            .unwrap();
        let got = store.get("capability/svc-a").await.unwrap();
        assert_eq!(got, serde_json::json!({"rev": 2}), "backend {name}");
    }
}

#[tokio::test]
async fn get_missing_is_not_found() {
    for (name, store, _guard) in backends().await {
        let err = store.get("capability/nope").await.unwrap_err();
        assert!(
            matches!(err, StorageError::NotFound { .. }),
            "backend {name}: {err}"
        );
        assert!(!store.contains("capability/nope").await.unwrap());
    }
}

#[tokio::test]
async fn delete_removes_and_is_idempotent() {
    for (name, store, _guard) in backends().await {
        store
            .put("budget/team-x", serde_json::json!({"total": 1000.0}))
            .await
            .unwrap();
        store.delete("budget/team-x").await.unwrap();
        store.delete("budget/team-x").await.unwrap();
        assert!(!store.contains("budget/team-x").await.unwrap(), "backend {name}");
    }
}

#[tokio::test]
async fn list_by_prefix_is_sorted_and_scoped() {
    for (name, store, _guard) in backends().await {
        for key in ["execution/b", "execution/a", "capability/a", "execution-archive/z"] {
            store.put(key, serde_json::json!({"key": key})).await.unwrap();
        }
        let listed = store.list_by_prefix("execution/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["execution/a", "execution/b"], "backend {name}");
        assert_eq!(listed[0].value, serde_json::json!({"key": "execution/a"}));
    }
}

//! Trait contract tests for BaselineStore.
//!
//! Every backend must behave identically; each contract runs against both
//! the in-memory fake and the file-backed store.

use apiprobe_store::fakes::MemoryBaselineStore;
use apiprobe_store::{BaselineStore, FsBaselineStore, RegressionBaseline, StoreError};

fn backends() -> (tempfile::TempDir, Vec<Box<dyn BaselineStore>>) {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = FsBaselineStore::open(dir.path().join("baselines.json")).unwrap();
    (
        dir,
        vec![Box::new(MemoryBaselineStore::new()), Box::new(fs_store)],
    )
}

#[tokio::test]
async fn get_absent_returns_none() {
    let (_dir, stores) = backends();
    for store in &stores {
        assert!(store.get("regression-missing").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn set_then_get_round_trip() {
    let (_dir, stores) = backends();
    for store in &stores {
        store
            .set(RegressionBaseline::new("regression-michael", Some("US".into()), 5))
            .await
            .unwrap();
        let got = store.get("regression-michael").await.unwrap().unwrap();
        assert_eq!(got.top_prediction_id.as_deref(), Some("US"));
        assert_eq!(got.prediction_count, 5);
    }
}

#[tokio::test]
async fn set_is_last_writer_wins() {
    let (_dir, stores) = backends();
    for store in &stores {
        store
            .set(RegressionBaseline::new("regression-michael", Some("US".into()), 5))
            .await
            .unwrap();
        store
            .set(RegressionBaseline::new("regression-michael", Some("GB".into()), 4))
            .await
            .unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1, "at most one baseline per probe id");
        assert_eq!(all[0].top_prediction_id.as_deref(), Some("GB"));
    }
}

#[tokio::test]
async fn insert_if_absent_keeps_existing() {
    let (_dir, stores) = backends();
    for store in &stores {
        assert!(store
            .insert_if_absent(RegressionBaseline::new("regression-a", Some("US".into()), 2))
            .await
            .unwrap());
        assert!(!store
            .insert_if_absent(RegressionBaseline::new("regression-a", Some("FR".into()), 9))
            .await
            .unwrap());
        let got = store.get("regression-a").await.unwrap().unwrap();
        assert_eq!(got.top_prediction_id.as_deref(), Some("US"));
    }
}

#[tokio::test]
async fn list_is_ordered_by_probe_id() {
    let (_dir, stores) = backends();
    for store in &stores {
        for id in ["regression-c", "regression-a", "regression-b"] {
            store
                .set(RegressionBaseline::new(id, None, 0))
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.probe_id)
            .collect();
        assert_eq!(ids, vec!["regression-a", "regression-b", "regression-c"]);
    }
}

#[tokio::test]
async fn invalid_baseline_is_rejected() {
    let (_dir, stores) = backends();
    for store in &stores {
        let err = store
            .set(RegressionBaseline::new("", None, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBaseline { .. }));
        assert!(store.list().await.unwrap().is_empty());
    }
}

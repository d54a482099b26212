//! Integration tests for persisting the response cache between invocations

use std::fs;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use html5_cf::cache::{
    service_plans_key, services_key, CacheSession, CachedValue, ResponseCache, SnapshotFile,
};
use html5_cf::config::CACHE_TIMEOUT_SECS;
use html5_cf::data::{Service, ServicePlan};

fn plans() -> Vec<ServicePlan> {
    vec![
        ServicePlan {
            name: "app-host".to_string(),
            guid: "p1".to_string(),
        },
        ServicePlan {
            name: "app-runtime".to_string(),
            guid: "p2".to_string(),
        },
    ]
}

fn snapshot(dir: &TempDir) -> SnapshotFile {
    SnapshotFile::new(
        dir.path().join(".cf/plugins/html5-plugin-config.json"),
        CACHE_TIMEOUT_SECS,
    )
}

#[test]
fn test_saved_entries_are_loaded_by_next_session() {
    let dir = TempDir::new().unwrap();

    let session = CacheSession::open(snapshot(&dir), true).unwrap();
    session
        .cache()
        .set(service_plans_key("abc"), CachedValue::ServicePlans(plans()));
    session.close().unwrap();

    let session = CacheSession::open(snapshot(&dir), true).unwrap();
    assert_eq!(session.cache().service_plans("abc"), Some(plans()));
    assert_eq!(session.cache().len(), 1);
}

#[test]
fn test_stale_snapshot_is_ignored_but_other_settings_survive() {
    let dir = TempDir::new().unwrap();
    let file = snapshot(&dir);
    fs::create_dir_all(file.path().parent().unwrap()).unwrap();
    let stale = Utc::now().timestamp() - CACHE_TIMEOUT_SECS - 60;
    fs::write(
        file.path(),
        json!({
            "Cache": {"GetServicePlans:abc": [{"name": "old", "guid": "o"}]},
            "Timestamp": {"LastUpdated": stale},
            "Other": {"keep": true}
        })
        .to_string(),
    )
    .unwrap();

    let cache = ResponseCache::new();
    assert_eq!(file.load_into(&cache).unwrap(), 0);
    assert!(cache.get(&service_plans_key("abc")).is_none());

    cache.set(
        services_key(),
        CachedValue::Services(vec![Service {
            name: "destination".to_string(),
            guid: "d".to_string(),
        }]),
    );
    file.save_from(&cache).unwrap();

    let saved: Value = serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
    assert_eq!(saved["Other"], json!({"keep": true}));
    assert!(saved["Cache"].get("GetServicePlans:abc").is_none());
    assert_eq!(saved["Cache"]["GetServices:"][0]["name"], "destination");
    assert!(saved["Timestamp"]["LastUpdated"].as_i64().unwrap() > stale);
}

#[test]
fn test_disabled_cache_clears_persisted_entries() {
    let dir = TempDir::new().unwrap();

    let session = CacheSession::open(snapshot(&dir), true).unwrap();
    session
        .cache()
        .set(service_plans_key("abc"), CachedValue::ServicePlans(plans()));
    session.close().unwrap();

    let session = CacheSession::open(snapshot(&dir), false).unwrap();
    assert!(!session.is_persistent());
    assert!(session.cache().is_empty());
    session.close().unwrap();

    let session = CacheSession::open(snapshot(&dir), true).unwrap();
    assert!(session.cache().is_empty());
}

#[test]
fn test_corrupt_snapshot_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let file = snapshot(&dir);
    fs::create_dir_all(file.path().parent().unwrap()).unwrap();
    fs::write(file.path(), "{not json").unwrap();

    assert!(CacheSession::open(file, true).is_err());
}

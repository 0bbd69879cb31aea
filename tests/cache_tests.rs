//! Integration tests for the tiered payload cache over real blob stores.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};
use uuid::Uuid;

use payload_tier::blob::{BlobStore, CompressedBlobStore, FsBlobStore, InMemoryBlobStore};
use payload_tier::cache::payload::{PayloadRegistration, Tier};
use payload_tier::cache::tier_manager::{TierManager, TierStores};
use payload_tier::config::Config;
use payload_tier::metrics::Metrics;
use payload_tier::telemetry::TelemetryLog;
use payload_tier::tenant::{QuotaStore, SubscriptionTier, TenantQuota};
use payload_tier::Error;

struct FsFixture {
    _dir: tempfile::TempDir,
    manager: TierManager,
    cold: Arc<FsBlobStore>,
    ssd_raw: Arc<FsBlobStore>,
}

async fn fs_fixture(memory_capacity: u64) -> FsFixture {
    let dir = tempfile::tempdir().unwrap();
    let cold = Arc::new(FsBlobStore::new(dir.path().join("cold")).await.unwrap());
    let ssd_raw = Arc::new(FsBlobStore::new(dir.path().join("ssd")).await.unwrap());
    let ssd: Arc<dyn BlobStore> = Arc::new(CompressedBlobStore::new(ssd_raw.clone(), 3));

    let mut config = Config::default();
    config.tiers.memory_capacity_bytes = memory_capacity;
    let manager = TierManager::new(
        &config,
        TierStores {
            ssd,
            cold: cold.clone(),
        },
        Arc::new(TelemetryLog::new()),
        Arc::new(QuotaStore::new()),
        Arc::new(Metrics::new().unwrap()),
    );
    FsFixture {
        _dir: dir,
        manager,
        cold,
        ssd_raw,
    }
}

async fn publish(f: &FsFixture, id: &str, model: &str, layer: u32, data: Vec<u8>) {
    let size = data.len() as u64;
    let location = f.cold.store(Bytes::from(data)).await.unwrap();
    f.manager.register_payload(
        PayloadRegistration {
            id: id.to_string(),
            owner_model_id: model.to_string(),
            layer_index: Some(layer),
            size_bytes: size,
            blob_location: location,
        },
        Utc::now(),
    );
}

#[tokio::test]
async fn test_payload_lifecycle_across_tiers() {
    let f = fs_fixture(10_000).await;
    let layer: Vec<u8> = (0..6_000u32).map(|i| (i % 16) as u8).collect();
    publish(&f, "llama/0", "llama", 0, layer.clone()).await;
    publish(&f, "llama/1", "llama", 1, vec![3u8; 6_000]).await;
    assert_eq!(f.manager.tier_of("llama/0"), Some(Tier::Cold));

    let request = Uuid::new_v4();
    let first = f.manager.access_payload("llama/0", "t", request, Utc::now()).await.unwrap();
    assert!(!first.hit);
    assert_eq!(first.served_from, Tier::Cold);
    assert_eq!(&first.data[..], &layer[..]);
    assert_eq!(f.manager.tier_of("llama/0"), Some(Tier::Memory));

    // Placing the second layer pushes the first out to SSD.
    f.manager.access_payload("llama/1", "t", request, Utc::now()).await.unwrap();
    assert_eq!(f.manager.tier_of("llama/0"), Some(Tier::Ssd));
    assert_eq!(f.manager.tier_of("llama/1"), Some(Tier::Memory));
    assert!(f.ssd_raw.stats().total_bytes_written.load(std::sync::atomic::Ordering::Relaxed) > 0);

    // Coming back from the warm copy yields the original bytes.
    let again = f
        .manager
        .access_payload("llama/0", "t", request, Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(again.served_from, Tier::Ssd);
    assert_eq!(&again.data[..], &layer[..]);
}

#[tokio::test]
async fn test_remove_model_clears_entries() {
    let f = fs_fixture(100_000).await;
    for layer in 0..3 {
        publish(&f, &format!("bert/{layer}"), "bert", layer, vec![9u8; 1_000]).await;
    }
    publish(&f, "other/0", "other", 0, vec![1u8; 1_000]).await;
    f.manager.promote("bert/0", Tier::Ssd, Utc::now()).await.unwrap();

    assert_eq!(f.manager.remove_model("bert").await, 3);
    assert_eq!(f.manager.len(), 1);
    assert!(matches!(f.manager.get("bert/0"), Err(Error::NotFound(_))));
}

fn memory_fixture() -> (TierManager, Arc<InMemoryBlobStore>, Arc<QuotaStore>) {
    let cold = Arc::new(InMemoryBlobStore::new());
    let quotas = Arc::new(QuotaStore::new());
    let manager = TierManager::new(
        &Config::default(),
        TierStores {
            ssd: Arc::new(InMemoryBlobStore::new()),
            cold: cold.clone(),
        },
        Arc::new(TelemetryLog::new()),
        quotas.clone(),
        Arc::new(Metrics::new().unwrap()),
    );
    (manager, cold, quotas)
}

fn seed(manager: &TierManager, cold: &InMemoryBlobStore, id: &str, model: &str, layer: u32) {
    let location = payload_tier::blob::BlobLocation::new(format!("origin:{id}"));
    cold.insert(location.clone(), vec![0u8; 64]);
    manager.register_payload(
        PayloadRegistration {
            id: id.to_string(),
            owner_model_id: model.to_string(),
            layer_index: Some(layer),
            size_bytes: 64,
            blob_location: location,
        },
        Utc::now(),
    );
}

#[tokio::test]
async fn test_cold_storage_outage_surfaces_backend_error() {
    let (manager, cold, _) = memory_fixture();
    seed(&manager, &cold, "p", "m", 0);
    cold.set_offline(true);

    let err = manager
        .access_payload("p", "t", Uuid::new_v4(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable(_)));
    assert_eq!(manager.tier_of("p"), Some(Tier::Cold));

    cold.set_offline(false);
    let ok = manager.access_payload("p", "t", Uuid::new_v4(), Utc::now()).await.unwrap();
    assert_eq!(ok.served_from, Tier::Cold);
}

#[tokio::test]
async fn test_tenant_preload_follows_subscription() {
    let (manager, cold, quotas) = memory_fixture();
    for layer in 0..2 {
        seed(&manager, &cold, &format!("m/{layer}"), "m", layer);
    }
    seed(&manager, &cold, "pinned-doc", "docs", 0);

    let mut standard = TenantQuota::new("std", SubscriptionTier::Standard, 5, 5);
    standard.reserved_payload_ids = vec!["pinned-doc".to_string()];
    quotas.set("std", standard);
    quotas.set("free", TenantQuota::new("free", SubscriptionTier::Free, 5, 5));

    // The standard tenant has been using model "m".
    manager.access_payload("m/0", "std", Uuid::new_v4(), Utc::now()).await.unwrap();

    let report = manager.preload_tenant("std", Utc::now()).await.unwrap();
    assert_eq!(report.requested, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(manager.tier_of("pinned-doc"), Some(Tier::Ssd));
    assert_eq!(manager.tier_of("m/1"), Some(Tier::Ssd));
    // Already resident; preload never demotes.
    assert_eq!(manager.tier_of("m/0"), Some(Tier::Memory));

    let report = manager.preload_tenant("free", Utc::now()).await.unwrap();
    assert_eq!(report.requested, 0);

    assert!(matches!(
        manager.preload_tenant("nobody", Utc::now()).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_scheduled_preload_warms_popular_payloads() {
    let (manager, cold, _) = memory_fixture();
    seed(&manager, &cold, "popular", "m", 0);
    seed(&manager, &cold, "idle", "m", 1);

    let now = Utc::now();
    for _ in 0..3 {
        manager.access_payload("popular", "t", Uuid::new_v4(), now).await.unwrap();
    }

    let report = manager.preload_scheduled(now + Duration::minutes(1)).await;
    assert_eq!(report.requested, 1);
    assert_eq!(manager.tier_of("popular"), Some(Tier::Memory));
    assert_eq!(manager.tier_of("idle"), Some(Tier::Cold));
}

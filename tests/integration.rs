//! Integration tests.
//!
//! The multi-instance contention tests run entirely in-process: several
//! `Scheduler` instances share one cloned `MemoryHistoryStore`, which is
//! the same coordination topology as separate hosts sharing a collection.
//!
//! The NATS-backed tests require a running server and are `#[ignore]`d:
//!
//!   NATS_TEST_URL=nats://localhost:4222 cargo test --test integration -- --include-ignored

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use cronlock::mocks::MemoryHistoryStore;
use cronlock::{
    CronOptions, HistoryPatch, HistoryRecord, HistoryStore, InsertOutcome, IntervalUnit,
    JobConfig, NatsHistoryStore, Schedule, Scheduler,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

fn unique_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{prefix}-{ts}")
}

fn every_second() -> Schedule {
    Schedule::Interval {
        every: 1,
        unit: IntervalUnit::Seconds,
        aligned: false,
    }
}

fn options(collection: &str) -> CronOptions {
    CronOptions {
        collection_name: collection.to_string(),
        utc: true,
        ..CronOptions::default()
    }
}

fn counting_job(name: &str, counter: Arc<AtomicU32>) -> JobConfig {
    JobConfig::new(name, every_second(), move |_at, _name| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    })
}

// ── In-process multi-instance coordination ───────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn three_instances_execute_each_firing_exactly_once() {
    init_tracing();
    let store = MemoryHistoryStore::new();
    let collection = unique_id("contention");
    let total = Arc::new(AtomicU32::new(0));

    let schedulers: Vec<Scheduler<MemoryHistoryStore>> = (0..3)
        .map(|_| Scheduler::new(store.clone(), options(&collection)))
        .collect();
    for sched in &schedulers {
        sched
            .add(counting_job("contended", Arc::clone(&total)))
            .await
            .unwrap();
        sched.start().await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    for sched in &schedulers {
        sched.stop();
    }
    // Let any firing that raced the stop finish.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let executions = total.load(Ordering::SeqCst);
    let records = store.records_for("contended");
    assert!(executions > 0, "at least one firing must have run");
    assert_eq!(
        executions as usize,
        records.len(),
        "one execution per unique intended instant, never more"
    );

    // Every lease key is distinct at second precision.
    let mut intents: Vec<i64> = records.iter().map(|r| r.intended_at.timestamp()).collect();
    intents.sort_unstable();
    intents.dedup();
    assert_eq!(intents.len(), records.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn non_persistent_jobs_run_on_every_instance() {
    init_tracing();
    let store = MemoryHistoryStore::new();
    let collection = unique_id("nopersist");

    let counters: Vec<Arc<AtomicU32>> = (0..3).map(|_| Arc::new(AtomicU32::new(0))).collect();
    let schedulers: Vec<Scheduler<MemoryHistoryStore>> = (0..3)
        .map(|_| Scheduler::new(store.clone(), options(&collection)))
        .collect();
    for (sched, counter) in schedulers.iter().zip(&counters) {
        sched
            .add(counting_job("local", Arc::clone(counter)).persist(false))
            .await
            .unwrap();
        sched.start().await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    for sched in &schedulers {
        sched.stop();
    }

    for (i, counter) in counters.iter().enumerate() {
        assert!(
            counter.load(Ordering::SeqCst) >= 1,
            "instance {i} must run the job locally"
        );
    }
    assert_eq!(store.record_count(), 0, "no history for persist=false jobs");
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joining_instance_shares_the_lease_space() {
    init_tracing();
    let store = MemoryHistoryStore::new();
    let collection = unique_id("latejoin");
    let total = Arc::new(AtomicU32::new(0));

    let first = Scheduler::new(store.clone(), options(&collection));
    first
        .add(counting_job("shared", Arc::clone(&total)))
        .await
        .unwrap();
    first.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let second = Scheduler::new(store.clone(), options(&collection));
    second
        .add(counting_job("shared", Arc::clone(&total)))
        .await
        .unwrap();
    second.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_800)).await;
    first.stop();
    second.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        total.load(Ordering::SeqCst) as usize,
        store.records_for("shared").len()
    );
}

// ── NATS-backed store ────────────────────────────────────────────────────────

fn test_url() -> String {
    std::env::var("NATS_TEST_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

async fn connect_store(collection: &str) -> NatsHistoryStore {
    let nats = async_nats::connect(test_url())
        .await
        .expect("Failed to connect to NATS — is NATS_TEST_URL set and NATS running?");
    let js = async_nats::jetstream::new(nats);
    NatsHistoryStore::connect(&js, collection, Some(Duration::from_secs(600)))
        .await
        .expect("Failed to create history bucket")
}

fn record(name: &str, id: &str, intended_secs: i64) -> HistoryRecord {
    HistoryRecord {
        id: id.to_string(),
        name: name.to_string(),
        intended_at: Utc.timestamp_opt(intended_secs, 0).unwrap(),
        started_at: Utc::now(),
        finished_at: None,
        result: None,
        error: None,
    }
}

#[tokio::test]
#[ignore = "requires NATS at NATS_TEST_URL"]
async fn nats_insert_is_unique_per_firing() {
    let store = connect_store(&unique_id("cronlockTest")).await;
    let name = unique_id("job");
    let intended = Utc::now().timestamp();

    let first = store
        .insert_history(record(&name, "a", intended))
        .await
        .unwrap();
    assert!(matches!(first, InsertOutcome::Inserted(_)));

    let second = store
        .insert_history(record(&name, "b", intended))
        .await
        .unwrap();
    assert_eq!(second, InsertOutcome::Duplicate);

    let third = store
        .insert_history(record(&name, "c", intended + 1))
        .await
        .unwrap();
    assert!(matches!(third, InsertOutcome::Inserted(_)));
}

#[tokio::test]
#[ignore = "requires NATS at NATS_TEST_URL"]
async fn nats_update_and_find_recent_roundtrip() {
    let store = connect_store(&unique_id("cronlockTest")).await;
    let name = unique_id("job");
    let intended = Utc::now().timestamp();

    let outcome = store
        .insert_history(record(&name, "a", intended))
        .await
        .unwrap();
    let InsertOutcome::Inserted(id) = outcome else {
        panic!("insert must win on a fresh bucket");
    };

    store
        .update_history(
            id,
            HistoryPatch {
                finished_at: Some(Utc::now()),
                result: Some(serde_json::json!({ "rows": 3 })),
                error: None,
            },
        )
        .await
        .unwrap();

    let rows = store.find_recent(name.clone(), 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, name);
    assert!(rows[0].finished_at.is_some());
    assert_eq!(rows[0].result, Some(serde_json::json!({ "rows": 3 })));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires NATS at NATS_TEST_URL"]
async fn nats_contention_between_two_schedulers() {
    let collection = unique_id("cronlockTest");
    let store_a = connect_store(&collection).await;
    let store_b = connect_store(&collection).await;
    let total = Arc::new(AtomicU32::new(0));
    let job_name = unique_id("contended");

    let a = Scheduler::new(store_a.clone(), options(&collection));
    let b = Scheduler::new(store_b, options(&collection));
    // Names embed into KV keys; the uniquifier uses '-' only.
    a.add(counting_job(&job_name, Arc::clone(&total)))
        .await
        .unwrap();
    b.add(counting_job(&job_name, Arc::clone(&total)))
        .await
        .unwrap();
    a.start().await.unwrap();
    b.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    a.stop();
    b.stop();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let rows = store_a.find_recent(job_name, 100).await.unwrap();
    assert!(total.load(Ordering::SeqCst) > 0);
    assert_eq!(total.load(Ordering::SeqCst) as usize, rows.len());
}

//! End-to-end completion detection through the public Tracker API.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use fanin_core::app::{RetryPolicy, TrackerBuilder, TrackerConfig};
use fanin_core::domain::{ErrorKind, JobId, TaskHandle, TrackerError};
use fanin_core::impls::InMemoryJobStore;
use fanin_core::ports::{Clock, FixedClock, IdGenerator, StoreError};
use fanin_core::Tracker;
use ulid::Ulid;

const NS: &str = "faas_job";

struct Fixture {
    tracker: Tracker,
    store: InMemoryJobStore,
    clock: Arc<FixedClock>,
}

fn fixture_with(retry: RetryPolicy) -> Fixture {
    let store = InMemoryJobStore::new();
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let tracker = TrackerBuilder::new(TrackerConfig::new(NS).with_retry(retry))
        .store(store.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Fixture {
        tracker,
        store,
        clock,
    }
}

fn fixture() -> Fixture {
    fixture_with(RetryPolicy::default())
}

/// 激しい競合でもリトライを使い切らない設定
fn contention_tolerant() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1_000,
        base_delay: Duration::from_millis(1),
        multiplier: 1.5,
        max_delay: Duration::from_millis(20),
    }
}

/// 別プロセスに渡した handle のコピー
fn smuggled_copy(handle: &TaskHandle) -> TaskHandle {
    serde_json::from_value(serde_json::to_value(handle).unwrap()).unwrap()
}

async fn wait_until_complete(tracker: &Tracker, job_id: JobId) {
    for _ in 0..500 {
        if tracker.status(job_id).await.unwrap().is_complete {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not complete");
}

#[tokio::test]
async fn single_task_without_fan_out() {
    let fx = fixture();
    let root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();
    assert_eq!(root.weight().value(), Some(2));

    let status = fx.tracker.detach(root).await.unwrap();
    assert_eq!(status.total_tasks, 1);
    assert_eq!(status.ended_tasks, 1);
    assert!(status.is_complete);

    let record = fx.tracker.record(job_id).await.unwrap();
    assert!(record.active_weight.is_zero());
    assert_eq!(record.end_date, Some(fx.clock.epoch_seconds()));
}

#[tokio::test]
async fn one_level_of_fan_out() {
    let fx = fixture();
    let mut root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();

    let first = fx.tracker.attach_child(root.spawn_child()).await.unwrap();
    let second = fx.tracker.attach_child(root.spawn_child()).await.unwrap();
    assert_eq!(first.weight().value(), Some(4));
    assert_eq!(second.weight().value(), Some(8));

    let status = fx.tracker.detach(root).await.unwrap();
    assert_eq!(status.total_tasks, 3);
    assert_eq!(status.ended_tasks, 1);
    assert!(!status.is_complete);
    let record = fx.tracker.record(job_id).await.unwrap();
    assert_eq!(record.active_weight.to_u128(), Some(12));
    assert_eq!(record.weight_exponent, 3);

    assert!(!fx.tracker.detach(first).await.unwrap().is_complete);
    let status = fx.tracker.detach(second).await.unwrap();
    assert_eq!(status.ended_tasks, 3);
    assert!(status.is_complete);
    let record = fx.tracker.record(job_id).await.unwrap();
    assert!(record.active_weight.is_zero());
}

#[tokio::test]
async fn child_finishing_before_parent_does_not_complete_job() {
    let fx = fixture();
    let mut root = fx.tracker.attach_root().await.unwrap();

    let child = fx.tracker.attach_child(root.spawn_child()).await.unwrap();
    let status = fx.tracker.detach(child).await.unwrap();
    // total_tasks はまだ 1 のまま。ended == total だが root の重み 2 が残っている
    assert_eq!(status.total_tasks, 1);
    assert_eq!(status.ended_tasks, 1);
    assert!(!status.is_complete);

    let status = fx.tracker.detach(root).await.unwrap();
    assert_eq!(status.total_tasks, 2);
    assert_eq!(status.ended_tasks, 2);
    assert!(status.is_complete);
}

#[tokio::test]
async fn parent_exits_before_child_attaches() {
    let fx = fixture();
    let mut root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();
    let message = root.spawn_child();

    // 子メッセージを publish した直後に親が終了する
    let status = fx.tracker.detach(root).await.unwrap();
    assert_eq!(status.total_tasks, 2);
    assert_eq!(status.ended_tasks, 1);
    assert!(!status.is_complete);
    let record = fx.tracker.record(job_id).await.unwrap();
    assert!(record.active_weight.is_zero());
    assert_eq!(record.end_date, None);

    let child = fx.tracker.attach_child(message).await.unwrap();
    assert_eq!(child.weight().value(), Some(4));
    let status = fx.tracker.detach(child).await.unwrap();
    assert_eq!(status.total_tasks, 2);
    assert_eq!(status.ended_tasks, 2);
    assert!(status.is_complete);
}

#[tokio::test]
async fn overflowing_child_count_leaves_record_usable() {
    let fx = fixture();
    let root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();
    let before = fx.tracker.record(job_id).await.unwrap();

    let forged: TaskHandle = serde_json::from_value(serde_json::json!({
        "job_id": job_id.to_string(),
        "weight": 1,
        "spawned_children": u64::MAX,
    }))
    .unwrap();
    let err = fx.tracker.detach(forged).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::CorruptHandle { job_id: id, spawned_children: u64::MAX } if id == job_id
    ));
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(fx.tracker.record(job_id).await.unwrap(), before);

    assert!(fx.tracker.detach(root).await.unwrap().is_complete);
}

#[tokio::test]
async fn double_detach_fails_with_weight_underflow() {
    let fx = fixture();
    let mut root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();
    let child = fx.tracker.attach_child(root.spawn_child()).await.unwrap();
    let copy = smuggled_copy(&child);

    fx.tracker.detach(child).await.unwrap();
    let before = fx.tracker.record(job_id).await.unwrap();

    let err = fx.tracker.detach(copy).await.unwrap_err();
    assert!(matches!(err, TrackerError::WeightUnderflow { job_id: id, .. } if id == job_id));
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(fx.tracker.record(job_id).await.unwrap(), before);

    assert!(fx.tracker.detach(root).await.unwrap().is_complete);
}

#[tokio::test]
async fn completed_job_is_never_mutated_again() {
    let fx = fixture();
    let root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();
    let copy = smuggled_copy(&root);
    fx.tracker.detach(root).await.unwrap();
    let completed = fx.tracker.record(job_id).await.unwrap();

    fx.clock.advance(chrono::Duration::seconds(60));
    assert!(matches!(
        fx.tracker.attach_child(job_id).await,
        Err(TrackerError::JobAlreadyComplete(id)) if id == job_id
    ));
    assert!(matches!(
        fx.tracker.detach(copy).await,
        Err(TrackerError::WeightUnderflow { .. })
    ));

    // 何度読んでも同じ
    for _ in 0..3 {
        assert_eq!(fx.tracker.record(job_id).await.unwrap(), completed);
    }
    let raw = fx.store.raw_document(NS, job_id).await.unwrap();
    assert_eq!(fx.store.raw_document(NS, job_id).await.unwrap(), raw);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let fx = fixture();
    let missing = JobId::from_ulid(Ulid::new());

    assert!(matches!(
        fx.tracker.attach_child(missing).await,
        Err(TrackerError::JobNotFound(id)) if id == missing
    ));
    assert!(matches!(
        fx.tracker.status(missing).await,
        Err(TrackerError::JobNotFound(_))
    ));

    let stray: TaskHandle = serde_json::from_value(serde_json::json!({
        "job_id": missing.to_string(),
        "weight": 1,
        "spawned_children": 0,
    }))
    .unwrap();
    assert!(matches!(
        fx.tracker.detach(stray).await,
        Err(TrackerError::JobNotFound(_))
    ));
    assert_eq!(fx.store.len(NS).await, 0);
}

/// 常に同じ id を返す生成器
struct StuckIds(JobId);

impl IdGenerator for StuckIds {
    fn generate_job_id(&self) -> JobId {
        self.0
    }
}

#[tokio::test]
async fn id_collision_never_overwrites() {
    let store = InMemoryJobStore::new();
    let id = JobId::from_ulid(Ulid::new());
    let tracker = TrackerBuilder::new(TrackerConfig::new(NS))
        .store(store.clone())
        .id_generator(StuckIds(id))
        .build()
        .unwrap();

    let mut first = tracker.attach_root().await.unwrap();
    let _child = tracker.attach_child(first.spawn_child()).await.unwrap();
    let before = tracker.record(id).await.unwrap();

    let err = tracker.attach_root().await.unwrap_err();
    assert!(matches!(err, TrackerError::DuplicateJob(dup) if dup == id));
    assert!(err.is_retryable());
    assert_eq!(tracker.record(id).await.unwrap(), before);
}

#[tokio::test]
async fn transient_conflicts_are_retried() {
    let fx = fixture_with(RetryPolicy::immediate(3));
    let root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();

    fx.store.fail_next_commits(2);
    let status = fx.tracker.detach(root).await.unwrap();
    assert!(status.is_complete);
    assert_eq!(fx.tracker.record(job_id).await.unwrap().ended_tasks, 1);
}

#[tokio::test]
async fn exhausted_retries_surface_transaction_failed() {
    let fx = fixture_with(RetryPolicy::immediate(3));
    let root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();

    fx.store.fail_next_commits(3);
    let err = fx.tracker.attach_child(job_id).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::TransactionFailed { attempts: 3, source: StoreError::Conflict, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    // 何も commit されていない
    assert_eq!(fx.tracker.record(job_id).await.unwrap().weight_exponent, 1);

    fx.store.fail_next_commits(3);
    assert!(matches!(
        fx.tracker.attach_root().await,
        Err(TrackerError::TransactionFailed { .. })
    ));
    assert_eq!(fx.store.len(NS).await, 1);
}

#[tokio::test]
async fn corrupt_record_is_not_retried() {
    let fx = fixture_with(RetryPolicy::immediate(5));
    let root = fx.tracker.attach_root().await.unwrap();
    fx.store
        .put_raw_document(NS, root.job_id(), b"{\"job_id\": 1}".to_vec())
        .await;

    assert!(matches!(
        fx.tracker.detach(root).await,
        Err(TrackerError::Store(StoreError::Codec(_)))
    ));
}

#[tokio::test]
async fn successive_children_get_strictly_increasing_weights() {
    let fx = fixture();
    let root = fx.tracker.attach_root().await.unwrap();
    let mut previous = root.weight();
    for _ in 0..150 {
        let child = fx.tracker.attach_child(root.job_id()).await.unwrap();
        assert!(child.weight() > previous);
        assert_eq!(child.weight().exponent(), previous.exponent() + 1);
        previous = child.weight();
    }
    // 2^151 は u128 に収まらないが、重みはそのまま扱える
    assert_eq!(previous.value(), None);
    let record = fx.tracker.record(root.job_id()).await.unwrap();
    assert_eq!(record.active_weight.outstanding().len(), 151);
}

#[tokio::test]
async fn run_detaches_on_every_exit_path() {
    let fx = fixture();

    let (child_job, status) = fx
        .tracker
        .run(None, async |task| task.spawn_child())
        .await
        .unwrap();
    assert_eq!(status.total_tasks, 2);
    assert!(!status.is_complete);

    let (out, status) = fx
        .tracker
        .run(Some(child_job), async |_task| Err::<(), &str>("handler failed"))
        .await
        .unwrap();
    assert_eq!(out, Err("handler failed"));
    assert!(status.is_complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_guard_detaches_in_background() {
    let fx = fixture();
    let guard = fx.tracker.enter(None).await.unwrap();
    let job_id = guard.job_id();
    drop(guard);

    wait_until_complete(&fx.tracker, job_id).await;
    assert_eq!(fx.tracker.status(job_id).await.unwrap().ended_tasks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn guard_tracks_children_across_tasks() {
    let fx = fixture();
    let mut root = fx.tracker.enter(None).await.unwrap();
    let job_id = root.job_id();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let child_job = root.spawn_child();
        let tracker = fx.tracker.clone();
        workers.push(tokio::spawn(async move {
            let child = tracker.enter(Some(child_job)).await.unwrap();
            child.finish().await.unwrap()
        }));
    }
    assert_eq!(root.spawned_children(), 4);

    for worker in workers {
        assert!(!worker.await.unwrap().is_complete);
    }
    let status = root.finish().await.unwrap();
    assert_eq!(status.total_tasks, 5);
    assert!(status.is_complete);
    assert!(fx.tracker.record(job_id).await.unwrap().end_date.is_some());
}

struct TreeStats {
    completions: AtomicU32,
    premature: AtomicBool,
}

/// 各タスクは子を起動したら子を待たずに自分だけ終わる（FaaS の非同期呼び出しと同じ）
fn work(
    tracker: Tracker,
    mut handle: TaskHandle,
    depth: u32,
    fanout: u32,
    stats: Arc<TreeStats>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if depth > 0 {
            for _ in 0..fanout {
                let job_id = handle.spawn_child();
                let tracker = tracker.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let child = tracker.attach_child(job_id).await.unwrap();
                    work(tracker, child, depth - 1, fanout, stats).await;
                });
            }
        }
        tokio::task::yield_now().await;

        // 自分がまだ detach していないので、完了に見えてはいけない
        if tracker.status(handle.job_id()).await.unwrap().is_complete {
            stats.premature.store(true, Ordering::SeqCst);
        }
        let status = tracker.detach(handle).await.unwrap();
        if status.is_complete {
            stats.completions.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fan_out_tree_completes_exactly_once() {
    let fx = fixture_with(contention_tolerant());
    let stats = Arc::new(TreeStats {
        completions: AtomicU32::new(0),
        premature: AtomicBool::new(false),
    });

    let root = fx.tracker.attach_root().await.unwrap();
    let job_id = root.job_id();
    work(fx.tracker.clone(), root, 3, 3, stats.clone()).await;

    wait_until_complete(&fx.tracker, job_id).await;
    for _ in 0..100 {
        if stats.completions.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let record = fx.tracker.record(job_id).await.unwrap();
    // 1 + 3 + 9 + 27
    assert_eq!(record.total_tasks, 40);
    assert_eq!(record.ended_tasks, 40);
    assert_eq!(record.weight_exponent, 40);
    assert!(record.active_weight.is_zero());
    assert_eq!(stats.completions.load(Ordering::SeqCst), 1);
    assert!(!stats.premature.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_jobs_do_not_interfere() {
    let fx = fixture_with(contention_tolerant());
    let mut jobs = Vec::new();
    for _ in 0..5 {
        let tracker = fx.tracker.clone();
        jobs.push(tokio::spawn(async move {
            let mut root = tracker.attach_root().await.unwrap();
            let job_id = root.job_id();
            let mut children = Vec::new();
            for _ in 0..3 {
                children.push(tracker.attach_child(root.spawn_child()).await.unwrap());
            }
            tracker.detach(root).await.unwrap();
            let mut last = None;
            for child in children {
                last = Some(tracker.detach(child).await.unwrap());
            }
            (job_id, last.unwrap())
        }));
    }
    for job in jobs {
        let (job_id, status) = job.await.unwrap();
        assert_eq!(status.job_id, job_id);
        assert_eq!(status.total_tasks, 4);
        assert!(status.is_complete);
    }
    assert_eq!(fx.store.len(NS).await, 5);
}

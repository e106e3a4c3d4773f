use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use leaky_core::{BucketError, BucketOptions, LeakyBucket};
use leaky_kernel::Kernel;
use serde_json::json;
use tempfile::tempdir;
use tokio::time::sleep;

/// Each handle opens its own kernel, like separate client processes would.
fn handle(dir: &Path, opts: BucketOptions) -> LeakyBucket<Kernel> {
    let kernel = Kernel::open(dir).expect("open kernel");
    LeakyBucket::new(Arc::new(kernel), opts).expect("valid options")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_prime_yields_single_row() {
    let dir = tempdir().unwrap();
    let handles: Vec<_> = (0..16)
        .map(|_| Arc::new(handle(dir.path(), BucketOptions::named("race"))))
        .collect();
    let tasks = handles
        .iter()
        .cloned()
        .map(|h| tokio::spawn(async move { h.prime().await }));
    for res in join_all(tasks).await {
        res.expect("join").expect("prime succeeds for every handle");
    }
    let kernel = Kernel::open(dir.path()).unwrap();
    assert_eq!(kernel.bucket_row_count("race").unwrap(), 1);
}

#[tokio::test]
async fn fifo_and_lifo_orders() {
    let dir = tempdir().unwrap();
    let b = handle(dir.path(), BucketOptions::named("order"));
    b.push(vec![json!("a"), json!("b"), json!("c")]).await.unwrap();
    assert_eq!(b.shift().await.unwrap(), Some(json!("a")));
    assert_eq!(b.pop().await.unwrap(), Some(json!("c")));
    assert_eq!(b.pop().await.unwrap(), Some(json!("b")));
    assert_eq!(b.pop().await.unwrap(), None);
}

#[tokio::test]
async fn limit_rejects_then_refills() {
    let dir = tempdir().unwrap();
    let b = handle(dir.path(), BucketOptions::named("refill").with_limit(1));
    b.push_one("m1").await.unwrap();
    match b.push_one("overflow").await {
        Err(BucketError::Overflow { limit, batch, .. }) => {
            assert_eq!(limit, 1);
            assert_eq!(batch, 1);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
    assert_eq!(b.shift().await.unwrap(), Some(json!("m1")));
    b.push_one("m2").await.unwrap();
    assert_eq!(b.shift().await.unwrap(), Some(json!("m2")));
}

#[tokio::test]
async fn interval_spaces_out_releases() {
    let dir = tempdir().unwrap();
    let b = handle(
        dir.path(),
        BucketOptions::named("interval").with_interval(Duration::from_millis(100)),
    );
    b.push(vec![json!(1), json!(2)]).await.unwrap();
    assert_eq!(b.shift().await.unwrap(), None);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(b.shift().await.unwrap(), Some(json!(1)));
    assert_eq!(b.shift().await.unwrap(), None);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(b.shift().await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn two_handles_see_each_other() {
    let dir = tempdir().unwrap();
    let one = handle(dir.path(), BucketOptions::named("two-insts"));
    one.push_one("m1").await.unwrap();
    let two = handle(dir.path(), BucketOptions::named("two-insts"));
    assert_eq!(two.shift().await.unwrap(), Some(json!("m1")));
    two.push_one("m2").await.unwrap();
    assert_eq!(one.shift().await.unwrap(), Some(json!("m2")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_traffic_keeps_count_equal_to_items() {
    let dir = tempdir().unwrap();
    let limit = 40u64;
    let producers = (0..4).map(|p| {
        let h = handle(dir.path(), BucketOptions::named("busy").with_limit(limit));
        tokio::spawn(async move {
            let mut accepted = 0u64;
            for i in 0..15 {
                match h.push_one(json!([p, i])).await {
                    Ok(_) => accepted += 1,
                    Err(e) if e.is_overflow() => {}
                    Err(e) => panic!("push failed: {e}"),
                }
            }
            accepted
        })
    });
    let consumers = (0..2).map(|_| {
        let h = handle(dir.path(), BucketOptions::named("busy").with_limit(limit));
        tokio::spawn(async move {
            let mut taken = 0u64;
            for _ in 0..15 {
                if h.pop().await.expect("pop").is_some() {
                    taken += 1;
                }
            }
            taken
        })
    });
    let pushed: u64 = join_all(producers).await.into_iter().map(|r| r.unwrap()).sum();
    let popped: u64 = join_all(consumers).await.into_iter().map(|r| r.unwrap()).sum();

    let kernel = Kernel::open(dir.path()).unwrap();
    let rec = kernel.get_bucket("busy").unwrap().expect("record");
    assert!(rec.is_consistent());
    assert_eq!(rec.count, pushed - popped);
    assert!(rec.count <= limit);
    assert_eq!(kernel.bucket_row_count("busy").unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_kernels_release_one_item_per_interval() {
    let dir = tempdir().unwrap();
    let opts = BucketOptions::named("paced").with_interval(Duration::from_millis(300));
    let handles: Vec<_> = (0..12)
        .map(|_| Arc::new(handle(dir.path(), opts.clone())))
        .collect();
    handles[0]
        .push((0..20).map(|i| json!(i)).collect())
        .await
        .unwrap();

    for round in 0..2 {
        sleep(Duration::from_millis(350)).await;
        let shifts = handles
            .iter()
            .cloned()
            .map(|h| tokio::spawn(async move { h.shift().await }));
        let released: Vec<_> = join_all(shifts)
            .await
            .into_iter()
            .filter_map(|r| r.expect("join").expect("shift"))
            .collect();
        assert_eq!(released, vec![json!(round)], "round {round}");
    }
    let kernel = Kernel::open(dir.path()).unwrap();
    assert_eq!(kernel.get_bucket("paced").unwrap().unwrap().count, 18);
}

#[tokio::test]
async fn mixed_payload_types_survive_storage() {
    let dir = tempdir().unwrap();
    let b = handle(dir.path(), BucketOptions::named("types"));
    let items = vec![
        json!("a string"),
        json!(3.14159),
        json!(null),
        json!(true),
        json!(["zero", 1]),
        json!({"name": "one complex object", "prop": {"arr": [1, [2, 3]]}}),
    ];
    b.push(items.clone()).await.unwrap();
    for expected in items {
        assert_eq!(b.shift().await.unwrap(), Some(expected));
    }
    let snap = b.snapshot().await.unwrap().unwrap();
    assert_eq!(snap.count, 0);
}

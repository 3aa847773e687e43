/// Connection Pool Concurrency Tests
///
/// Verifies the size bound and registry uniqueness under concurrent access
mod common;

use common::{registry, FakeFactory};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uripool::PoolError;

const BUDGET: Duration = Duration::from_secs(1);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_creates_one_pool() {
    let factory = FakeFactory::exclusive();
    let registry = registry(&factory, 4, 60_000);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.pool_for("tcp://fresh:80") })
        })
        .collect();

    let pools: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(registry.len(), 1);
    for pool in &pools[1..] {
        assert!(Arc::ptr_eq(&pools[0], pool));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrowers_never_exceed_pool_size() {
    let factory = FakeFactory::slow(false, Duration::from_millis(5));
    let registry = registry(&factory, 3, 60_000);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let exhausted = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..40)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let exhausted = Arc::clone(&exhausted);
            tokio::spawn(async move {
                match registry.borrow("tcp://bounded:80", BUDGET, false).await {
                    Ok(token) => {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        registry.restore(token).await.unwrap();
                    }
                    Err(PoolError::PoolExhausted { .. }) => {
                        exhausted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => panic!("unexpected borrow error: {e}"),
                }
            })
        })
        .collect();

    for task in join_all(tasks).await {
        task.unwrap();
    }

    assert!(factory.created() <= 3, "created {}", factory.created());
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(exhausted.load(Ordering::SeqCst) > 0);

    let status = registry
        .pool_for("tcp://bounded:80")
        .status(Instant::now())
        .await;
    assert!(status.live <= 3);
    assert_eq!(status.outstanding, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusive_connection_has_at_most_one_lease() {
    let factory = FakeFactory::exclusive();
    let registry = registry(&factory, 1, 60_000);
    let holders = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let holders = Arc::clone(&holders);
            tokio::spawn(async move {
                for _ in 0..10 {
                    if let Ok(token) = registry.borrow("tcp://single:80", BUDGET, false).await {
                        assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::task::yield_now().await;
                        holders.fetch_sub(1, Ordering::SeqCst);
                        registry.restore(token).await.unwrap();
                    }
                }
            })
        })
        .collect();

    for task in join_all(tasks).await {
        task.unwrap();
    }
    assert_eq!(factory.created(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeps_never_close_borrowed_connections() {
    let factory = FakeFactory::multiplexed();
    let registry = registry(&factory, 2, 20);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..20 {
                    if let Ok(token) = registry.borrow("h2://churn:443", BUDGET, true).await {
                        assert!(!token.handle().transport.is_closed());
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        assert!(
                            !token.handle().transport.is_closed(),
                            "connection closed while leased"
                        );
                        registry.restore(token).await.unwrap();
                    }
                }
            })
        })
        .collect();

    let sweeper = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            for _ in 0..50 {
                for pool in registry.pools() {
                    pool.sweep(Instant::now()).await.unwrap();
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    for task in join_all(tasks).await {
        task.unwrap();
    }
    sweeper.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore] // Stress test - run with --ignored
async fn pool_borrow_restore_stress() {
    let factory = FakeFactory::slow(false, Duration::from_micros(200));
    let registry = registry(&factory, 16, 60_000);
    let destinations = ["tcp://a:1", "tcp://b:2", "tcp://c:3", "tcp://d:4"];

    let start = Instant::now();
    let tasks: Vec<_> = (0..2000)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let uri = destinations[i % destinations.len()];
            tokio::spawn(async move {
                let token = registry.borrow(uri, BUDGET, false).await?;
                tokio::time::sleep(Duration::from_micros(100)).await;
                registry.restore(token).await?;
                Ok::<_, PoolError>(())
            })
        })
        .collect();

    let mut completed = 0;
    for task in join_all(tasks).await {
        if matches!(task, Ok(Ok(()))) {
            completed += 1;
        }
    }

    let elapsed = start.elapsed();
    println!("=== Borrow/Restore Cycle Test ===");
    println!("Completed: {}", completed);
    println!("Elapsed: {:?}", elapsed);
    println!("{}", registry.metrics().summary());

    assert!(factory.created() <= 16 * destinations.len());
    for snap in registry.metrics().snapshots() {
        assert_eq!(snap.active_count, 0);
    }
}

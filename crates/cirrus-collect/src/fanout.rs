//! Bounded fan-out with deterministic fan-in.
//!
//! [`parallel_map`] runs one task per item, at most `max_concurrency` at a
//! time, and streams results into a channel. The channel closes exactly once,
//! after every worker has finished, so a consumer draining it sees each
//! result once and then `None`.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::error;

pub fn parallel_map<T, R, F, Fut>(
    items: Vec<T>,
    max_concurrency: usize,
    worker: F,
) -> mpsc::Receiver<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(items.len().max(1));
    let limit = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let worker = Arc::new(worker);

    tokio::spawn(async move {
        let mut workers = JoinSet::new();
        for item in items {
            let Ok(permit) = limit.clone().acquire_owned().await else {
                break;
            };
            let tx = tx.clone();
            let worker = worker.clone();
            workers.spawn(async move {
                let out = worker(item).await;
                drop(permit);
                // Receiver may be gone if the consumer stopped early.
                let _ = tx.send(out).await;
            });
        }
        // Every sender clone now lives in a worker; the channel closes when
        // the last one finishes.
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "fan-out worker panicked, result dropped");
                }
            }
        }
    });

    rx
}

/// Drain a fan-out channel until it closes.
pub async fn collect_all<R>(mut rx: mpsc::Receiver<R>) -> Vec<R> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    out
}

/// Drain a fan-out of batches into one flat list.
pub async fn collect_flat<R>(rx: mpsc::Receiver<Vec<R>>) -> Vec<R> {
    collect_all(rx).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_yields_exactly_k_items() {
        for k in [0usize, 1, 50] {
            let items: Vec<usize> = (0..k).collect();
            let rx = parallel_map(items, 4, |i| async move { i * 2 });
            let out = collect_all(rx).await;
            assert_eq!(out.len(), k);
            let unique: HashSet<usize> = out.iter().copied().collect();
            assert_eq!(unique.len(), k);
            assert!(out.iter().all(|v| v % 2 == 0));
        }
    }

    #[tokio::test]
    async fn test_respects_concurrency_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let rx = parallel_map((0..20).collect(), 3, {
            let active = active.clone();
            let peak = peak.clone();
            move |i: u32| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            }
        });
        assert_eq!(collect_all(rx).await.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_progresses() {
        let rx = parallel_map(vec![1, 2, 3], 0, |i| async move { i });
        let mut out = collect_all(rx).await;
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_panicking_worker_does_not_block_close() {
        let rx = parallel_map(vec![1, 2, 3, 4], 2, |i: i32| async move {
            if i == 3 {
                panic!("boom");
            }
            i
        });
        let mut out = collect_all(rx).await;
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_collect_flat() {
        let rx = parallel_map(vec![1usize, 2, 3], 2, |n| async move { vec![n; n] });
        assert_eq!(collect_flat(rx).await.len(), 6);
    }
}

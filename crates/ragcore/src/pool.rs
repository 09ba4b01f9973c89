//! Bounded connection pool.
//!
//! A FIFO-fair bounded pool of chunk-store handles. Acquisition carries the
//! request deadline: a waiter that times out gives up its place without
//! disturbing the order of waiters behind it, since `tokio::sync::mpsc` is
//! itself FIFO.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::error::CoreError;

/// A handle checked back into the pool on drop.
pub struct PooledHandle<T> {
    inner: Option<T>,
    release: mpsc::Sender<T>,
}

impl<T> std::ops::Deref for PooledHandle<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner.as_ref().expect("handle taken exactly once")
    }
}

impl<T> Drop for PooledHandle<T> {
    fn drop(&mut self) {
        if let Some(v) = self.inner.take() {
            // A full channel here means the pool was already at capacity,
            // which cannot happen since every outstanding handle came from
            // exactly one `acquire`. `try_send` only fails if the receiver
            // was dropped (pool torn down), which is fine to ignore.
            let _ = self.release.try_send(v);
        }
    }
}

/// Bounded, FIFO-fair pool of `T` handles.
pub struct Pool<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T: Send + 'static> Pool<T> {
    /// Build a pool from a fixed set of pre-constructed handles. Size is
    /// the recommended `workers * 2`, upper-bounded by the store's max
    /// connections.
    pub fn new(handles: Vec<T>) -> Self {
        let (tx, rx) = mpsc::channel(handles.len().max(1));
        for h in handles {
            // Channel capacity == handle count, so this never blocks.
            let _ = tx.try_send(h);
        }
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Acquire a handle, waiting FIFO for one to free up. Respects the
    /// caller's deadline.
    pub async fn acquire(&self, deadline: Duration) -> Result<PooledHandle<T>, CoreError> {
        let mut rx = self.rx.lock().await;
        match timeout(deadline, rx.recv()).await {
            Ok(Some(handle)) => Ok(PooledHandle {
                inner: Some(handle),
                release: self.tx.clone(),
            }),
            Ok(None) => Err(CoreError::StoreUnavailable(
                "connection pool closed".into(),
            )),
            Err(_) => Err(CoreError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_round_trips() {
        let pool = Pool::new(vec![1u32, 2, 3]);
        let a = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert!(*a == 1 || *a == 2 || *a == 3);
        drop(a);
        // Releasing makes the handle available again.
        let b = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let c = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let d = pool.acquire(Duration::from_millis(100)).await.unwrap();
        drop((b, c, d));
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = Pool::new(vec![1u32]);
        let _held = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, CoreError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let pool = Arc::new(Pool::new(vec![1u32]));
        let held = pool.acquire(Duration::from_secs(5)).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        let p1 = pool.clone();
        let t1 = order_tx.clone();
        let h1 = tokio::spawn(async move {
            let _g = p1.acquire(Duration::from_secs(5)).await.unwrap();
            t1.send(1).unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let p2 = pool.clone();
        let t2 = order_tx.clone();
        let h2 = tokio::spawn(async move {
            let _g = p2.acquire(Duration::from_secs(5)).await.unwrap();
            t2.send(2).unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        h1.await.unwrap();
        h2.await.unwrap();

        assert_eq!(order_rx.recv().await, Some(1));
        assert_eq!(order_rx.recv().await, Some(2));
    }
}

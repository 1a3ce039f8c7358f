// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection Pool (spec §4.B): a bounded pool of reusable terminal
//! adapters with health probes and borrow/return semantics. A
//! concurrency-limiter only — it performs no result buffering.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{ErrorCode, MsgdError};
use crate::terminal::Terminal;

/// An adapter on loan from the pool. Returning it (dropping this guard)
/// releases the permit; a probe failure recorded via [`AdapterLease::discard`]
/// causes the pool to discard the adapter instead of returning it to the
/// idle set, and a fresh one is lazily built on the next `acquire`.
pub struct AdapterLease<T> {
    adapter: Arc<T>,
    pool: Arc<PoolInner<T>>,
    _permit: tokio::sync::OwnedSemaphorePermit,
    healthy: bool,
}

impl<T> AdapterLease<T> {
    /// Mark this adapter as failing its health probe; it will be discarded
    /// and lazily replaced rather than returned to the idle set.
    pub fn discard(&mut self) {
        self.healthy = false;
    }
}

impl<T> Deref for AdapterLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.adapter
    }
}

impl<T> Drop for AdapterLease<T> {
    fn drop(&mut self) {
        if self.healthy {
            self.pool.idle.lock().unwrap_or_else(|e| e.into_inner()).push(Arc::clone(&self.adapter));
        } else {
            self.pool.discarded.fetch_add(1, Ordering::Relaxed);
            warn!("terminal adapter discarded after failed health probe");
        }
    }
}

struct PoolInner<T> {
    idle: std::sync::Mutex<Vec<Arc<T>>>,
    discarded: AtomicUsize,
    max_size: usize,
}

/// Bounded pool over `min_size..=max_size` adapters built by `factory`.
///
/// Every field is `Arc`-backed, so cloning a `ConnectionPool` yields another
/// handle onto the same idle set and semaphore rather than a second pool —
/// this is how the Daemon and the Monitoring Engine share one pool instance
/// while each holding it by value (spec §3: "the Daemon exclusively owns
/// ... the Pool", read as one shared pool handle created once at startup).
pub struct ConnectionPool<T> {
    inner: Arc<PoolInner<T>>,
    semaphore: Arc<Semaphore>,
    factory: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), semaphore: Arc::clone(&self.semaphore), factory: Arc::clone(&self.factory) }
    }
}

impl<T: Terminal + 'static> ConnectionPool<T> {
    /// Build a pool pre-populated with `min_size` adapters, capped at
    /// `max_size` concurrent leases.
    pub fn new(min_size: usize, max_size: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let max_size = max_size.max(min_size).max(1);
        let idle: Vec<Arc<T>> = (0..min_size).map(|_| Arc::new(factory())).collect();
        Self {
            inner: Arc::new(PoolInner { idle: std::sync::Mutex::new(idle), discarded: AtomicUsize::new(0), max_size }),
            semaphore: Arc::new(Semaphore::new(max_size)),
            factory: Arc::new(factory),
        }
    }

    /// Acquire an adapter, waiting FIFO up to `timeout` for a free permit.
    pub async fn acquire(&self, timeout: Duration) -> Result<AdapterLease<T>, MsgdError> {
        let permit = tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned())
            .await
            .map_err(|_| MsgdError::new(ErrorCode::PoolExhausted, "timed out waiting for a pooled adapter"))?
            .map_err(|_| MsgdError::new(ErrorCode::PoolExhausted, "pool semaphore closed"))?;

        let adapter = {
            let mut idle = self.inner.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.pop()
        }
        .unwrap_or_else(|| Arc::new((self.factory)()));

        Ok(AdapterLease { adapter, pool: Arc::clone(&self.inner), _permit: permit, healthy: true })
    }

    /// Number of adapters discarded after a failed health probe, for stats.
    pub fn discarded_count(&self) -> usize {
        self.inner.discarded.load(Ordering::Relaxed)
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;

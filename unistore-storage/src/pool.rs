//! A small blocking-connection pool.
//!
//! Both drivers are synchronous. Each adapter owns one pool; a semaphore
//! bounds concurrent checkouts to the pool size, and every checked-out
//! connection is used on a `spawn_blocking` thread so no async worker is
//! ever blocked on the store.

use crate::error::{StorageError, StorageResult};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tracing::warn;

pub struct ConnectionPool<C> {
    name: &'static str,
    idle: Mutex<Vec<C>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Builds a pool from already-opened connections.
    pub fn new(name: &'static str, connections: Vec<C>) -> StorageResult<Arc<Self>> {
        if connections.is_empty() {
            return Err(StorageError::Pool(format!("{name}: pool needs at least one connection")));
        }
        let size = connections.len();
        Ok(Arc::new(Self {
            name,
            idle: Mutex::new(connections),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `f` with exclusive use of one connection.
    ///
    /// The blocking task keeps running if the caller's future is dropped,
    /// so a write abandoned on timeout may still commit.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> StorageResult<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Pool(format!("{}: pool closed", self.name)))?;

        let pool = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut conn = pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop()
                .ok_or_else(|| StorageError::Pool(format!("{}: no idle connection", pool.name)))?;

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f(&mut conn)));
            pool.idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conn);

            match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(pool = pool.name, "storage operation panicked");
                    Err(StorageError::TaskFailed(format!("{}: operation panicked", pool.name)))
                }
            }
        });

        task.await
            .map_err(|e| StorageError::TaskFailed(e.to_string()))?
    }

    /// Closes the pool: pending and future checkouts fail.
    pub fn close(&self) {
        self.permits.close();
    }
}

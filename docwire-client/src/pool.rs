//! Connection pooling.
//!
//! A [`Pool`] hands out connections built by a factory and takes them back
//! when the lease ends. Connections are not health-checked on return: a
//! connection that hit an error has already closed its socket and reconnects
//! on its next write.

use crate::config::{ConnectionConfig, PoolConfig};
use crate::connection::Connection;
use crate::error::ClientError;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Factory = Box<dyn Fn() -> Connection + Send + Sync>;

struct PoolInner {
    factory: Factory,
    idle: Mutex<Vec<Connection>>,
    /// Caps live connections when `max_size` is set.
    permits: Option<Arc<Semaphore>>,
    created: AtomicUsize,
    closed: AtomicBool,
}

/// A shared pool of connections. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates an unbounded pool.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Connection + Send + Sync + 'static,
    {
        Self::with_config(factory, PoolConfig::default())
    }

    pub fn with_config<F>(factory: F, config: PoolConfig) -> Self
    where
        F: Fn() -> Connection + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                factory: Box::new(factory),
                idle: Mutex::new(Vec::new()),
                permits: config.max_size.map(|n| Arc::new(Semaphore::new(n))),
                created: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a pool whose connections all use `config`.
    pub fn from_config(config: ConnectionConfig, pool: PoolConfig) -> Self {
        Self::with_config(move || Connection::new(config.clone()), pool)
    }

    /// Leases a connection, reusing an idle one when available.
    ///
    /// With a `max_size`, waits until a lease is returned. The connection
    /// goes back to the pool when the [`PooledConnection`] is dropped.
    pub async fn lease(&self) -> Result<PooledConnection, ClientError> {
        if self.is_closed() {
            return Err(ClientError::PoolClosed);
        }

        let permit = match &self.inner.permits {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ClientError::PoolClosed)?,
            ),
            None => None,
        };

        let idle = self.inner.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let n = self.inner.created.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!("Pool creating connection #{}", n);
                (self.inner.factory)()
            }
        };

        Ok(PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Closes the pool. Idle connections are dropped, leases in flight are
    /// dropped when returned, and further leases fail with
    /// [`ClientError::PoolClosed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sem) = &self.inner.permits {
            sem.close();
        }
        let idle = std::mem::take(&mut *self.inner.idle.lock());
        tracing::debug!("Pool closed, dropping {} idle connections", idle.len());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of connections waiting to be leased.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Number of connections the factory has built.
    pub fn created_count(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }

    fn release(&self, conn: Connection) {
        if self.is_closed() {
            return;
        }
        self.inner.idle.lock().push(conn);
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle_count())
            .field("created", &self.created_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A leased connection, returned to its pool on drop.
pub struct PooledConnection {
    pool: Pool,
    // `None` only during drop
    conn: Option<Connection>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish()
    }
}

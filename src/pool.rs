//! A pooled [`ConnectionProvider`] built on deadpool.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deadpool::managed::{Manager, Metrics, Object, RecycleError};
use tokio::task;
use tokio::time::timeout;

use crate::compiler::Statement;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionProvider, Executor};
use crate::error::{RepositoryError, Result};
use crate::metrics::SharedRegistrar;
use crate::value::Row;

/// Opens raw connections for the pool; implemented by database drivers.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection + 'static;

    fn connect(&self, config: &PoolConfig) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// A driver connection tracked by the pool.
pub struct PooledConnection<C> {
    inner: C,
    id: u64,
    created_at: Instant,
    statement_count: AtomicU64,
    needs_rollback: bool,
}

impl<C: Connection> PooledConnection<C> {
    pub fn new(inner: C, id: u64) -> Self {
        Self {
            inner,
            id,
            created_at: Instant::now(),
            statement_count: AtomicU64::new(0),
            needs_rollback: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn statement_count(&self) -> u64 {
        self.statement_count.load(Ordering::Relaxed)
    }

    fn touch(&mut self) {
        self.statement_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("statement_count", &self.statement_count)
            .field("needs_rollback", &self.needs_rollback)
            .finish()
    }
}

impl<C: Connection> Executor for PooledConnection<C> {
    async fn execute(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<u64> {
        self.touch();
        self.inner.execute(statement, timeout).await
    }

    async fn fetch_all(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        self.touch();
        self.inner.fetch_all(statement, timeout).await
    }

    async fn fetch_multiple(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Row>>> {
        self.touch();
        self.inner.fetch_multiple(statement, timeout).await
    }

    fn fetch<'e>(
        &'e mut self,
        statement: Statement,
        timeout: Option<Duration>,
    ) -> futures::stream::BoxStream<'e, Result<Row>> {
        self.touch();
        self.inner.fetch(statement, timeout)
    }
}

impl<C: Connection> Connection for PooledConnection<C> {
    async fn begin(&mut self) -> Result<()> {
        self.inner.begin().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await?;
        self.needs_rollback = false;
        Ok(())
    }

    fn abandon(&mut self) {
        self.needs_rollback = true;
        self.inner.abandon();
    }

    async fn ping(&mut self) -> Result<()> {
        self.inner.ping().await
    }
}

pub struct PoolConnectionManager<F> {
    factory: F,
    config: Arc<PoolConfig>,
    next_connection_id: AtomicU64,
    is_shutting_down: Arc<AtomicBool>,
    metrics: Option<SharedRegistrar>,
}

impl<F> fmt::Debug for PoolConnectionManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnectionManager")
            .field("config", &self.config)
            .field("next_connection_id", &self.next_connection_id)
            .field("is_shutting_down", &self.is_shutting_down)
            .finish()
    }
}

impl<F: ConnectionFactory> PoolConnectionManager<F> {
    pub fn new(factory: F, config: Arc<PoolConfig>, metrics: Option<SharedRegistrar>) -> Self {
        Self {
            factory,
            config,
            next_connection_id: AtomicU64::new(1),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    pub fn initiate_shutdown(&self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        log::info!("Connection manager shutdown in progress");
    }

    fn record_health_check(&self, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_int_counter_vec_mut("repository_connection_health_checks_total", &[status]);
        }
    }
}

impl<F: ConnectionFactory> Manager for PoolConnectionManager<F> {
    type Type = PooledConnection<F::Connection>;
    type Error = RepositoryError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return Err(RepositoryError::ShuttingDown);
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        log::debug!("Creating new connection [id: {}]", connection_id);

        let validation_timeout = self.config.connect_timeout();

        let validation = match timeout(validation_timeout, async {
            let mut connection = self.factory.connect(&self.config).await?;
            connection.ping().await?;
            Ok::<_, RepositoryError>(connection)
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout),
        };

        match validation {
            Ok(connection) => {
                log::debug!(
                    "Connection established: [id: {}] in {:?}",
                    connection_id,
                    start.elapsed()
                );
                Ok(PooledConnection::new(connection, connection_id))
            }
            Err(e) => {
                log::error!("Failed to validate connection (id: {}): {}", connection_id, e);
                Err(e)
            }
        }
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &Metrics,
    ) -> Result<(), RecycleError<Self::Error>> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return Err(RecycleError::Message("Shutting down".into()));
        }

        if let Some(max_lifetime) = self.config.max_lifetime() {
            if conn.age() >= max_lifetime {
                log::debug!(
                    "Retiring connection [id: {}] after {:?}",
                    conn.id(),
                    conn.age()
                );
                return Err(RecycleError::Message("Connection expired".into()));
            }
        }

        if conn.needs_rollback {
            log::debug!("Rolling back abandoned transaction on connection [id: {}]", conn.id());
            conn.rollback().await.map_err(RecycleError::Backend)?;
        }

        let validation_timeout = self.config.connect_timeout();

        match timeout(validation_timeout, conn.ping()).await {
            Ok(Ok(())) => {
                self.record_health_check("success");
                Ok(())
            }
            Ok(Err(e)) => {
                log::warn!("Connection [id: {}] health check failed: {}", conn.id(), e);
                self.record_health_check("failure");
                Err(RecycleError::Message(
                    format!("Health check failed: {}", e).into(),
                ))
            }
            Err(_) => {
                log::warn!(
                    "Connection [id: {}] health check timed out after: {:?}",
                    conn.id(),
                    validation_timeout
                );
                self.record_health_check("timeout");
                Err(RecycleError::Message("Health check timed out".into()))
            }
        }
    }
}

pub type Pool<F> = deadpool::managed::Pool<PoolConnectionManager<F>>;
pub type PoolObject<F> = Object<PoolConnectionManager<F>>;

/// Connection provider backed by a deadpool pool of driver connections.
pub struct ConnectionPool<F: ConnectionFactory> {
    pool: Pool<F>,
    config: Arc<PoolConfig>,
    metrics: Option<SharedRegistrar>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig, metrics: Option<SharedRegistrar>) -> Result<Self> {
        let config = Arc::new(config);
        let manager = PoolConnectionManager::new(factory, config.clone(), metrics.clone());

        let pool = deadpool::managed::Pool::<PoolConnectionManager<F>>::builder(manager)
            .max_size(config.max_connections as usize)
            .build()
            .map_err(|e| RepositoryError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            config,
            metrics,
        })
    }

    /// Opens up to `count` connections ahead of use. Failures are logged, not returned.
    pub async fn warm_up(&self, count: usize) -> usize {
        let count = count.min(self.config.max_connections as usize);
        log::info!("Warming up {} pooled connections", count);

        let handles: Vec<_> = (0..count)
            .map(|i| {
                let pool = self.pool.clone();
                task::spawn(async move {
                    match pool.get().await {
                        Ok(_) => {
                            log::debug!("Warm-up connection {} initialized successfully", i);
                            true
                        }
                        Err(e) => {
                            log::error!("Failed to get warm-up connection {}: {}", i, e);
                            false
                        }
                    }
                })
            })
            .collect();

        let mut warmed = 0;
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(true) => warmed += 1,
                Ok(false) => {}
                Err(e) => log::error!("Warm-up task {} panicked: {}", i, e),
            }
        }

        log::info!("Connection pool warm-up complete: {}/{} successful", warmed, count);
        warmed
    }

    pub async fn get_connection(&self) -> Result<PoolObject<F>> {
        let start = Instant::now();
        let timeout_duration = self.config.connect_timeout();

        let outcome = match timeout(timeout_duration, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                log::warn!("Failed to get connection from pool: {}", e);
                Err(RepositoryError::from(e))
            }
            Err(_) => {
                log::warn!(
                    "Timed out waiting for connection after {:?}",
                    timeout_duration
                );
                Err(RepositoryError::Timeout)
            }
        };

        let status = match &outcome {
            Ok(_) => "success",
            Err(RepositoryError::Timeout) => "timeout",
            Err(_) => "failure",
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_int_counter_vec_mut("repository_connection_acquisition_total", &[status]);
            metrics.set_gauge_vec_mut(
                "repository_connection_acquisition_seconds",
                &[status],
                start.elapsed().as_secs_f64(),
            );
        }

        if outcome.is_ok() {
            log::debug!("Connection acquired in {:?}", start.elapsed());
        }
        outcome
    }

    pub fn status(&self) -> deadpool::Status {
        self.pool.status()
    }

    /// Stops handing out connections and waits up to `drain_timeout` for
    /// borrowed ones to come back before closing the pool.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        log::info!("Initiating graceful shutdown of connection pool");
        self.pool.manager().initiate_shutdown();

        let drain_start = Instant::now();
        loop {
            let status = self.pool.status();
            let in_use = status.size.saturating_sub(status.available);

            if in_use == 0 {
                log::info!("All connections returned to pool, proceeding with shutdown");
                break;
            }

            if drain_start.elapsed() > drain_timeout {
                log::warn!(
                    "Shutdown drain timeout exceeded, {} connections still in use",
                    in_use
                );
                break;
            }

            log::info!("Waiting for {} connections to be returned to pool", in_use);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.pool.close();
        log::info!("Connection pool shutdown complete");
    }
}

impl<F: ConnectionFactory> ConnectionProvider for ConnectionPool<F> {
    type Connection = PoolObject<F>;

    async fn create_connection(&self) -> Result<Self::Connection> {
        self.get_connection().await
    }
}

impl<F: ConnectionFactory> Executor for PoolObject<F> {
    async fn execute(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<u64> {
        (**self).execute(statement, timeout).await
    }

    async fn fetch_all(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        (**self).fetch_all(statement, timeout).await
    }

    async fn fetch_multiple(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Row>>> {
        (**self).fetch_multiple(statement, timeout).await
    }

    fn fetch<'e>(
        &'e mut self,
        statement: Statement,
        timeout: Option<Duration>,
    ) -> futures::stream::BoxStream<'e, Result<Row>> {
        (**self).fetch(statement, timeout)
    }
}

impl<F: ConnectionFactory> Connection for PoolObject<F> {
    async fn begin(&mut self) -> Result<()> {
        (**self).begin().await
    }

    async fn commit(&mut self) -> Result<()> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        (**self).rollback().await
    }

    fn abandon(&mut self) {
        (**self).abandon()
    }

    async fn ping(&mut self) -> Result<()> {
        (**self).ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;

    #[derive(Clone, Default)]
    struct Counters {
        opened: Arc<AtomicU64>,
        rollbacks: Arc<AtomicU64>,
        statements: Arc<AtomicU64>,
    }

    struct TestFactory {
        counters: Counters,
    }

    struct TestConnection {
        counters: Counters,
    }

    impl ConnectionFactory for TestFactory {
        type Connection = TestConnection;

        async fn connect(&self, _: &PoolConfig) -> Result<TestConnection> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(TestConnection {
                counters: self.counters.clone(),
            })
        }
    }

    impl Executor for TestConnection {
        async fn execute(&mut self, _: &Statement, _: Option<Duration>) -> Result<u64> {
            self.counters.statements.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        async fn fetch_all(&mut self, _: &Statement, _: Option<Duration>) -> Result<Vec<Row>> {
            self.counters.statements.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn fetch_multiple(
            &mut self,
            _: &Statement,
            _: Option<Duration>,
        ) -> Result<Vec<Vec<Row>>> {
            Ok(Vec::new())
        }
    }

    impl Connection for TestConnection {
        async fn begin(&mut self) -> Result<()> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abandon(&mut self) {}

        async fn ping(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn pool(max_connections: u32) -> (ConnectionPool<TestFactory>, Counters) {
        let counters = Counters::default();
        let factory = TestFactory {
            counters: counters.clone(),
        };
        let config = PoolConfig::new("sqlite::memory:", 1, max_connections);
        let pool = ConnectionPool::new(factory, config, None).unwrap();
        (pool, counters)
    }

    #[tokio::test]
    async fn expired_connections_are_replaced() {
        let counters = Counters::default();
        let factory = TestFactory {
            counters: counters.clone(),
        };
        let config = PoolConfig {
            max_lifetime_seconds: Some(0),
            ..PoolConfig::new("sqlite::memory:", 1, 1)
        };
        let pool = ConnectionPool::new(factory, config, None).unwrap();

        let first_id = pool.get_connection().await.unwrap().id();
        let conn = pool.get_connection().await.unwrap();

        assert_ne!(conn.id(), first_id);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().size, 1);
    }

    #[tokio::test]
    async fn reuses_released_connections() {
        let (pool, counters) = pool(2);

        let first_id = {
            let mut conn = pool.get_connection().await.unwrap();
            conn.execute(&Statement::new("SELECT 1"), None).await.unwrap();
            assert_eq!(conn.statement_count(), 1);
            conn.id()
        };
        let conn = pool.get_connection().await.unwrap();

        assert_eq!(conn.id(), first_id);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().size, 1);
    }

    #[tokio::test]
    async fn abandoned_transaction_is_rolled_back_on_recycle() {
        let (pool, counters) = pool(1);

        let tx = Transaction::begin(pool.get_connection().await.unwrap())
            .await
            .unwrap();
        drop(tx);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 0);

        let conn = pool.get_connection().await.unwrap();
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
        assert!(!conn.needs_rollback);
    }

    #[tokio::test]
    async fn acquisition_times_out_when_exhausted() {
        let (pool, _) = pool(1);

        let _held = pool.get_connection().await.unwrap();
        let err = pool.get_connection().await.unwrap_err();

        assert!(matches!(err, RepositoryError::Timeout));
    }

    #[tokio::test]
    async fn shutdown_closes_the_pool() {
        let (pool, _) = pool(1);
        assert_eq!(pool.warm_up(4).await, 1);

        pool.shutdown(Duration::from_millis(200)).await;
        let err = pool.get_connection().await.unwrap_err();

        assert!(matches!(err, RepositoryError::ShuttingDown));
    }
}

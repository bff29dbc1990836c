//! Connection pool for session-carrying WebSocket connections.
//!
//! The pool owns every idle connection and lends at most one connection to
//! each synthesis stream through a [`PooledConnection`] lease. Connections are
//! retired before they reach `max_session_duration`, either when they would be
//! handed out or by the optional background reaper. The pool never retries a
//! failed connect; retry policy belongs to the caller.
//!
//! # Example
//! ```rust,no_run
//! # async fn example() -> Result<(), minimax_tts::core::tts::TTSError> {
//! use minimax_tts::core::tts::minimax::{ConnectionPool, MinimaxConnector, PoolConfig, SynthesisOptions};
//! use std::time::Duration;
//!
//! let connector = MinimaxConnector::new(SynthesisOptions::new("sk-...", "group"));
//! let pool = ConnectionPool::new(connector, PoolConfig::default());
//!
//! let lease = pool.acquire(Duration::from_secs(10)).await?;
//! // ... drive a stream over the connection ...
//! pool.release(lease).await;
//! pool.close_all().await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::{PoolConfig, SynthesisOptions};
use super::session::SessionConnection;
use crate::core::tts::base::{TTSError, TTSResult};

// =============================================================================
// Connector
// =============================================================================

/// Creates, probes and closes the connections a pool manages.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a connection that is ready to carry tokens (handshake included).
    async fn connect(&self) -> TTSResult<Self::Connection>;

    /// Close gracefully, sending an explicit termination when the protocol has one.
    async fn close(&self, connection: Self::Connection) -> TTSResult<()>;

    /// Liveness check that never waits. It may consume frames the peer sent
    /// while the connection sat idle, such as a close.
    fn is_usable(&self, connection: &mut Self::Connection) -> bool;
}

/// Connector for MiniMax sessions.
///
/// Reads the current options snapshot on every connect, so sessions opened
/// after an options update use the new parameters.
#[derive(Clone)]
pub struct MinimaxConnector {
    options: Arc<RwLock<Arc<SynthesisOptions>>>,
}

impl MinimaxConnector {
    pub fn new(options: SynthesisOptions) -> Self {
        Self {
            options: Arc::new(RwLock::new(Arc::new(options))),
        }
    }

    pub fn options(&self) -> Arc<SynthesisOptions> {
        Arc::clone(&self.options.read())
    }

    pub fn set_options(&self, options: SynthesisOptions) {
        *self.options.write() = Arc::new(options);
    }
}

#[async_trait]
impl Connector for MinimaxConnector {
    type Connection = SessionConnection;

    async fn connect(&self) -> TTSResult<SessionConnection> {
        let options = self.options();
        SessionConnection::open(&options).await
    }

    async fn close(&self, connection: SessionConnection) -> TTSResult<()> {
        connection.close().await
    }

    fn is_usable(&self, connection: &mut SessionConnection) -> bool {
        connection.check_alive()
    }
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Connections opened successfully
    pub created: AtomicU64,
    /// Acquires served from the idle set
    pub reused: AtomicU64,
    /// Connections retired for age or invalidation
    pub retired: AtomicU64,
    /// Leases closed instead of returned
    pub discarded: AtomicU64,
    pub connect_failures: AtomicU64,
}

impl PoolMetrics {
    pub fn summary(&self) -> String {
        format!(
            "Connections - Created: {}, Reused: {}, Retired: {}, Discarded: {}, Connect failures: {}",
            self.created.load(Ordering::Relaxed),
            self.reused.load(Ordering::Relaxed),
            self.retired.load(Ordering::Relaxed),
            self.discarded.load(Ordering::Relaxed),
            self.connect_failures.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// Pool
// =============================================================================

struct IdleEntry<T> {
    connection: T,
    created_at: Instant,
    last_refreshed: Instant,
    generation: u64,
}

struct PoolState<T> {
    idle: VecDeque<IdleEntry<T>>,
    generation: u64,
    closed: bool,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Connection>>,
    metrics: PoolMetrics,
}

impl<C: Connector> PoolInner<C> {
    fn is_expired(&self, created_at: Instant) -> bool {
        created_at.elapsed() >= self.config.max_session_duration
    }

    /// Close connections outside the pool lock, logging failures.
    async fn close_connections(&self, connections: Vec<C::Connection>) {
        for connection in connections {
            if let Err(e) = self.connector.close(connection).await {
                warn!("Failed to close pooled connection: {e}");
            }
        }
    }

    fn close_in_background(self: &Arc<Self>, connections: Vec<C::Connection>) {
        if connections.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.close_connections(connections).await;
        });
    }

    /// Remove idle connections that are expired, closed by the peer or from an
    /// older generation.
    fn take_retired(&self, state: &mut PoolState<C::Connection>) -> Vec<C::Connection> {
        let generation = state.generation;
        let mut retired = Vec::new();
        let mut kept = VecDeque::with_capacity(state.idle.len());
        for mut entry in state.idle.drain(..) {
            if entry.generation != generation
                || self.is_expired(entry.created_at)
                || !self.connector.is_usable(&mut entry.connection)
            {
                retired.push(entry.connection);
            } else {
                kept.push_back(entry);
            }
        }
        state.idle = kept;
        if !retired.is_empty() {
            self.metrics
                .retired
                .fetch_add(retired.len() as u64, Ordering::Relaxed);
        }
        retired
    }
}

/// Shared handle to a pool; clones refer to the same connections.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    generation: 0,
                    closed: false,
                }),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Lend a usable connection, reusing an idle one when it is still young
    /// enough, otherwise opening a new one within `timeout`.
    ///
    /// Connect and handshake failures surface as connection errors; running out
    /// of time surfaces as [`TTSError::TimeoutError`].
    pub async fn acquire(&self, timeout: Duration) -> TTSResult<PooledConnection<C>> {
        let (reusable, retired) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TTSError::ConnectionFailed(
                    "Connection pool is closed".to_string(),
                ));
            }
            let retired = self.inner.take_retired(&mut state);
            // Most recently released first
            (state.idle.pop_back(), retired)
        };
        self.inner.close_in_background(retired);

        if let Some(entry) = reusable {
            self.inner.metrics.reused.fetch_add(1, Ordering::Relaxed);
            let last_refreshed = if self.inner.config.mark_refreshed_on_get {
                Instant::now()
            } else {
                entry.last_refreshed
            };
            debug!(
                "Reusing pooled connection (age {:?})",
                entry.created_at.elapsed()
            );
            return Ok(PooledConnection {
                connection: Some(entry.connection),
                created_at: entry.created_at,
                last_refreshed,
                generation: entry.generation,
                pool: Arc::clone(&self.inner),
            });
        }

        let (created_at, generation, connection) = self.open_connection(timeout).await?;
        Ok(PooledConnection {
            connection: Some(connection),
            created_at,
            last_refreshed: Instant::now(),
            generation,
            pool: Arc::clone(&self.inner),
        })
    }

    async fn open_connection(
        &self,
        timeout: Duration,
    ) -> TTSResult<(Instant, u64, C::Connection)> {
        let generation = self.inner.state.lock().generation;
        let created_at = Instant::now();

        let connection = match tokio::time::timeout(timeout, self.inner.connector.connect()).await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                self.inner
                    .metrics
                    .connect_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Failed to open connection: {e}");
                return Err(e);
            }
            Err(_) => {
                self.inner
                    .metrics
                    .connect_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Connection attempt timed out after {timeout:?}");
                return Err(TTSError::TimeoutError(format!(
                    "Connection not ready within {timeout:?}"
                )));
            }
        };

        if self.is_closed() {
            self.inner.close_connections(vec![connection]).await;
            return Err(TTSError::ConnectionFailed(
                "Connection pool closed while connecting".to_string(),
            ));
        }

        self.inner.metrics.created.fetch_add(1, Ordering::Relaxed);
        debug!("Opened new connection in {:?}", created_at.elapsed());
        Ok((created_at, generation, connection))
    }

    /// Return a lease to the idle set (or close it if it is no longer fit).
    pub async fn release(&self, lease: PooledConnection<C>) {
        lease.release().await
    }

    /// Close a lease instead of returning it.
    pub async fn discard(&self, lease: PooledConnection<C>) {
        lease.discard().await
    }

    /// Open one connection in the background if none is idle.
    pub fn prewarm(&self, timeout: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            if pool.idle_count() > 0 || pool.is_closed() {
                return;
            }
            match pool.open_connection(timeout).await {
                Ok((created_at, generation, connection)) => {
                    let rejected = {
                        let mut state = pool.inner.state.lock();
                        if state.closed || state.generation != generation {
                            Some(connection)
                        } else {
                            state.idle.push_back(IdleEntry {
                                connection,
                                created_at,
                                last_refreshed: created_at,
                                generation,
                            });
                            None
                        }
                    };
                    match rejected {
                        Some(connection) => pool.inner.close_connections(vec![connection]).await,
                        None => info!("Prewarmed one connection"),
                    }
                }
                Err(e) => warn!("Prewarm failed: {e}"),
            }
        })
    }

    /// Retire every idle connection; leases currently out are closed on release.
    pub async fn invalidate(&self) {
        let retired: Vec<C::Connection> = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.idle.drain(..).map(|entry| entry.connection).collect()
        };
        if !retired.is_empty() {
            self.inner
                .metrics
                .retired
                .fetch_add(retired.len() as u64, Ordering::Relaxed);
            debug!("Invalidated {} idle connection(s)", retired.len());
        }
        self.inner.close_connections(retired).await;
    }

    /// Close idle connections that have reached their age limit.
    pub async fn retire_expired(&self) -> usize {
        let retired = {
            let mut state = self.inner.state.lock();
            self.inner.take_retired(&mut state)
        };
        let count = retired.len();
        self.inner.close_connections(retired).await;
        count
    }

    /// Periodically retire expired idle connections until the pool closes.
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let pool = ConnectionPool { inner };
                if pool.is_closed() {
                    break;
                }
                let retired = pool.retire_expired().await;
                if retired > 0 {
                    debug!("Reaper retired {retired} connection(s)");
                }
            }
        })
    }

    /// Close every idle connection and refuse further acquires.
    ///
    /// Close failures are logged, never propagated.
    pub async fn close_all(&self) {
        let connections: Vec<C::Connection> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.idle.drain(..).map(|entry| entry.connection).collect()
        };
        info!("Closing {} pooled connection(s)", connections.len());
        self.inner.close_connections(connections).await;
    }
}

// =============================================================================
// Lease
// =============================================================================

/// Exclusive loan of one pooled connection.
///
/// Consume it with [`release`](Self::release) or [`discard`](Self::discard).
/// Dropping it without either closes the connection in the background.
pub struct PooledConnection<C: Connector> {
    connection: Option<C::Connection>,
    created_at: Instant,
    last_refreshed: Instant,
    generation: u64,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> PooledConnection<C> {
    /// The borrowed connection.
    pub fn connection_mut(&mut self) -> TTSResult<&mut C::Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| TTSError::InternalError("connection already returned".to_string()))
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_refreshed(&self) -> Instant {
        self.last_refreshed
    }

    pub async fn release(mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);

        let rejected = {
            let mut state = pool.state.lock();
            let reason = if state.closed {
                Some("pool closed")
            } else if state.generation != self.generation {
                Some("options changed")
            } else if !pool.connector.is_usable(&mut connection) {
                Some("connection closed")
            } else if pool.is_expired(self.created_at) {
                Some("age limit reached")
            } else if state.idle.len() >= pool.config.max_idle {
                Some("idle set full")
            } else {
                None
            };

            match reason {
                Some(reason) => Some((reason, connection)),
                None => {
                    state.idle.push_back(IdleEntry {
                        connection,
                        created_at: self.created_at,
                        last_refreshed: self.last_refreshed,
                        generation: self.generation,
                    });
                    None
                }
            }
        };

        if let Some((reason, connection)) = rejected {
            debug!("Closing released connection: {reason}");
            pool.metrics.retired.fetch_add(1, Ordering::Relaxed);
            pool.close_connections(vec![connection]).await;
        }
    }

    pub async fn discard(mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            self.pool.close_connections(vec![connection]).await;
        }
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            if tokio::runtime::Handle::try_current().is_ok() {
                self.pool.close_in_background(vec![connection]);
            }
        }
    }
}

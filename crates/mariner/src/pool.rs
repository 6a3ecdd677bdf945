//! Connection pooling and the named pool registry.
//!
//! A pool owns a bounded table of connections guarded by one lock.
//! Acquisition never blocks: it probes idle connections for liveness under
//! the lock and hands out the one idle the longest, or fails immediately
//! when none is available. Pools are registered by name; `connect` with
//! pooling options resolves the pool through the registry, creating it on
//! first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use mariner_core::{
    ConnectConfig, Error, MAX_POOL_NAME_LEN, MAX_POOL_SIZE, PoolErrorKind, PoolOptions, Result,
    SessionConnector,
};

use crate::connection::Connection;

struct PoolEntry {
    conn: Arc<Connection>,
    in_use: bool,
    last_used: Instant,
}

struct PoolState {
    entries: Vec<PoolEntry>,
    connect_config: Option<ConnectConfig>,
    reset_on_release: bool,
    closed: bool,
}

/// A bounded pool of connections, registered under a unique name.
pub struct ConnectionPool {
    name: String,
    capacity: usize,
    connector: Arc<dyn SessionConnector>,
    state: Mutex<PoolState>,
    registry: Weak<PoolRegistry>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of this pool.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured maximum number of pooled connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections currently in the pool.
    pub fn connection_count(&self) -> usize {
        self.state().entries.len()
    }

    /// Whether released connections get their session state reset.
    pub fn reset_on_release(&self) -> bool {
        self.state().reset_on_release
    }

    /// Enable or disable reset-on-release.
    pub fn set_reset_on_release(&self, enabled: bool) {
        self.state().reset_on_release = enabled;
    }

    /// Replace the stored connection configuration.
    ///
    /// No connections are created; use [`ConnectionPool::add_connection`]
    /// to fill the pool.
    pub fn set_config(&self, config: ConnectConfig) {
        self.state().connect_config = Some(config);
    }

    /// Add a connection to the pool.
    ///
    /// Without an explicit connection a new one is opened from the stored
    /// configuration. Fails when the pool has no configuration or no free
    /// slot.
    pub fn add_connection(self: &Arc<Self>, conn: Option<Arc<Connection>>) -> Result<()> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::pool(
                PoolErrorKind::Closed,
                format!("Pool '{}' is closed", self.name),
            ));
        }
        if state.connect_config.is_none() {
            return Err(Error::pool(
                PoolErrorKind::NoConfig,
                format!("Couldn't get configuration for pool '{}'", self.name),
            ));
        }
        if state.entries.len() >= self.capacity {
            return Err(Error::pool(
                PoolErrorKind::Capacity,
                format!(
                    "Can't add connection to pool '{}': no free slot available ({})",
                    self.name,
                    state.entries.len()
                ),
            ));
        }
        let conn = match conn {
            Some(conn) => conn,
            None => {
                let config = state.connect_config.clone().ok_or_else(|| {
                    Error::pool(
                        PoolErrorKind::NoConfig,
                        format!("Couldn't get configuration for pool '{}'", self.name),
                    )
                })?;
                Arc::new(Connection::connect(self.connector.as_ref(), &config)?)
            }
        };
        conn.attach_pool(self);
        state.entries.push(PoolEntry {
            conn,
            in_use: false,
            last_used: Instant::now(),
        });
        Ok(())
    }

    /// Acquire an idle connection.
    ///
    /// Idle connections are pinged under the pool lock; dead ones are
    /// discarded on discovery. Among the live ones the connection idle the
    /// longest wins, which keeps every pooled connection cycling ahead of
    /// server-side idle timeouts. Exhaustion is an immediate error, never
    /// a wait.
    pub fn get_connection(&self) -> Result<Arc<Connection>> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::pool(
                PoolErrorKind::Closed,
                format!("Pool '{}' is closed", self.name),
            ));
        }
        let now = Instant::now();
        let mut best: Option<usize> = None;
        let mut best_idle = Duration::ZERO;
        let mut index = 0;
        while index < state.entries.len() {
            if state.entries[index].in_use {
                index += 1;
                continue;
            }
            match state.entries[index].conn.ping() {
                Ok(()) => {
                    let idle = now.saturating_duration_since(state.entries[index].last_used);
                    if best.is_none() || idle > best_idle {
                        best = Some(index);
                        best_idle = idle;
                    }
                    index += 1;
                }
                Err(_) => {
                    // found dead at acquisition time; drop it from the table
                    tracing::warn!(pool = %self.name, "discarding dead idle connection");
                    let entry = state.entries.remove(index);
                    entry.conn.detach_pool();
                    let _ = entry.conn.really_close();
                }
            }
        }
        match best {
            Some(index) => {
                state.entries[index].in_use = true;
                tracing::trace!(pool = %self.name, idle_ms = best_idle.as_millis() as u64, "connection acquired");
                Ok(Arc::clone(&state.entries[index].conn))
            }
            None => Err(Error::pool(
                PoolErrorKind::Exhausted,
                format!("No connection available in pool '{}'", self.name),
            )),
        }
    }

    /// Return a connection to the pool; called by `Connection::close` for
    /// pooled connections.
    pub(crate) fn release(&self, conn: &Connection) -> Result<()> {
        let mut state = self.state();
        let Some(position) = state
            .entries
            .iter()
            .position(|entry| std::ptr::eq(Arc::as_ptr(&entry.conn), conn))
        else {
            // already evicted from the table; nothing to return it to
            drop(state);
            return conn.really_close();
        };
        if state.reset_on_release {
            if let Err(err) = conn.reset() {
                // a connection that cannot reset is unusable
                tracing::warn!(pool = %self.name, error = %err, "reset on release failed, discarding connection");
                let entry = state.entries.remove(position);
                entry.conn.detach_pool();
                let _ = entry.conn.really_close();
                return Err(err);
            }
        }
        let entry = &mut state.entries[position];
        entry.in_use = false;
        entry.last_used = Instant::now();
        tracing::trace!(pool = %self.name, "connection released");
        Ok(())
    }

    /// Close the pool and every member connection.
    ///
    /// Per-connection close failures are logged and skipped. The pool's
    /// registry entry is removed; the pool is unusable afterwards.
    pub fn close(&self) {
        let entries = {
            let mut state = self.state();
            state.closed = true;
            std::mem::take(&mut state.entries)
        };
        for entry in entries {
            entry.conn.detach_pool();
            if let Err(err) = entry.conn.really_close() {
                tracing::warn!(pool = %self.name, error = %err, "closing pooled connection failed");
            }
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.name);
        }
        tracing::debug!(pool = %self.name, "pool closed");
    }
}

/// Registry mapping pool names to pools.
///
/// An explicit service object with its own lock; a process-wide default
/// instance backs the `connect` convenience path.
pub struct PoolRegistry {
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// The process-wide default registry.
    pub fn global() -> &'static Arc<PoolRegistry> {
        static GLOBAL: OnceLock<Arc<PoolRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(PoolRegistry::new)
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<String, Arc<ConnectionPool>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a pool.
    ///
    /// When connection configuration is given the pool is filled eagerly;
    /// any failure during the fill closes every connection opened so far
    /// and leaves the name unregistered.
    pub fn create_pool(
        self: &Arc<Self>,
        options: &PoolOptions,
        config: Option<ConnectConfig>,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<Arc<ConnectionPool>> {
        if options.name.is_empty() {
            return Err(Error::programming("No pool name specified"));
        }
        if options.name.len() > MAX_POOL_NAME_LEN {
            return Err(Error::programming(format!(
                "Pool name is limited to {} characters",
                MAX_POOL_NAME_LEN
            )));
        }
        if options.size == 0 || options.size > MAX_POOL_SIZE {
            return Err(Error::programming(format!(
                "Pool size must be in range of 1 and {}",
                MAX_POOL_SIZE
            )));
        }
        if self.pools().contains_key(&options.name) {
            return Err(Error::programming(format!(
                "Pool '{}' already exists",
                options.name
            )));
        }

        let fill = config.is_some();
        let pool = Arc::new(ConnectionPool {
            name: options.name.clone(),
            capacity: options.size,
            connector,
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                connect_config: config,
                reset_on_release: options.reset_connection,
                closed: false,
            }),
            registry: Arc::downgrade(self),
        });

        if fill {
            for _ in 0..pool.capacity {
                if let Err(err) = pool.add_connection(None) {
                    // unwind: no partially-filled pool is ever registered
                    pool.close();
                    return Err(err);
                }
            }
            tracing::debug!(pool = %pool.name, size = pool.capacity, "pool filled");
        }

        let mut pools = self.pools();
        if pools.contains_key(&options.name) {
            // lost a create race for the same name
            drop(pools);
            pool.close();
            return Err(Error::programming(format!(
                "Pool '{}' already exists",
                options.name
            )));
        }
        pools.insert(options.name.clone(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Look up a pool by name.
    pub fn get(&self, name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools().get(name).cloned()
    }

    /// Whether a pool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.pools().contains_key(name)
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.pools().len()
    }

    /// Whether no pools are registered.
    pub fn is_empty(&self) -> bool {
        self.pools().is_empty()
    }

    pub(crate) fn remove(&self, name: &str) {
        self.pools().remove(name);
    }
}

/// Open a connection, pooled when pooling options are given.
///
/// With pooling options the pool is resolved in the process-wide
/// registry, created and filled on first use, and the connection is
/// acquired from it. Without them a standalone connection is opened.
pub fn connect(
    config: ConnectConfig,
    pool: Option<PoolOptions>,
    connector: Arc<dyn SessionConnector>,
) -> Result<Arc<Connection>> {
    match pool {
        Some(options) => {
            let registry = PoolRegistry::global();
            if let Some(pool) = registry.get(&options.name) {
                return pool.get_connection();
            }
            match registry.create_pool(&options, Some(config), connector) {
                Ok(pool) => pool.get_connection(),
                // a concurrent creator won the name; use its pool
                Err(err) => match registry.get(&options.name) {
                    Some(pool) => pool.get_connection(),
                    None => Err(err),
                },
            }
        }
        None => Ok(Arc::new(Connection::connect(connector.as_ref(), &config)?)),
    }
}

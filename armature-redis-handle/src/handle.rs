//! A single Redis connection with an observable lifecycle.

use parking_lot::{Mutex, RwLock};
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{RedisConfig, RedisError, Result};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

/// Keys deleted per SCAN batch when wiping a namespace.
const SCAN_BATCH: usize = 256;

/// Connectivity state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; the initial state, and the state while waiting to
    /// reconnect after a failed connect or a lost connection.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Socket established, readiness check pending.
    Connected,
    /// Accepting commands.
    Ready,
    /// Closed by the owner. Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle notification emitted by a handle.
#[derive(Debug, Clone)]
pub enum HandleEvent {
    /// The socket is connected.
    Connect,
    /// The readiness check passed; commands are accepted.
    Ready,
    /// A connection-level failure outside of any caller's command.
    Error(RedisError),
}

/// One connection to one Redis instance.
///
/// Construction never blocks: [`RedisHandle::connect`] starts the connect in
/// the background and progress is reported through [`RedisHandle::subscribe`].
/// There is no offline queue, so commands fail with [`RedisError::NotReady`]
/// until the handle reaches [`ConnectionState::Ready`].
///
/// A failed connect, or a command finding the connection gone, sends the
/// handle back to [`ConnectionState::Disconnected`] and a supervisor task
/// reconnects with exponential backoff until [`RedisHandle::close`].
pub struct RedisHandle {
    name: String,
    config: RedisConfig,
    state: RwLock<ConnectionState>,
    conn: RwLock<Option<LiveConnection>>,
    generation: AtomicU64,
    lost: Arc<Notify>,
    events: broadcast::Sender<HandleEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The current connection, tagged so that failures on an older connection
/// cannot tear down its replacement.
#[derive(Clone)]
struct LiveConnection {
    generation: u64,
    conn: MultiplexedConnection,
}

impl RedisHandle {
    /// Create a disconnected handle. The handle is named after its address.
    pub fn new(config: RedisConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            name: config.address(),
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            conn: RwLock::new(None),
            generation: AtomicU64::new(0),
            lost: Arc::new(Notify::new()),
            events,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Start connecting in the background.
    ///
    /// With `keepalive` set and a configured interval, a ping task also runs
    /// for the lifetime of the handle. Must be called within a Tokio runtime.
    pub fn connect(self: &Arc<Self>, keepalive: bool) {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Connecting;
        }

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Self::supervise(
            Arc::downgrade(self),
            Arc::clone(&self.lost),
        )));

        if keepalive && let Some(interval) = self.config.keepalive_interval {
            tasks.push(tokio::spawn(Self::keepalive(Arc::downgrade(self), interval)));
        }
    }

    /// Name identifying this handle (`host:port`, plus `/db` when set).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection options.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Current connectivity state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Receive lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HandleEvent> {
        self.events.subscribe()
    }

    /// Close the connection. Idempotent; later commands fail with
    /// [`RedisError::Closed`].
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        self.conn.write().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(backend = %self.name, "Redis connection closed");
    }

    /// GET a value.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run("GET", cmd).await
    }

    /// SET a value, with `EX` when `ttl_secs` is given.
    pub async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        let _: () = self.run("SET", cmd).await?;
        Ok(())
    }

    /// DEL a key. Returns whether it existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.run("DEL", cmd).await?;
        Ok(removed > 0)
    }

    /// EXPIRE a key. Returns whether the key existed.
    pub async fn expire(&self, key: &str, secs: u64) -> Result<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(secs);
        self.run("EXPIRE", cmd).await
    }

    /// KEYS matching a glob pattern.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("KEYS");
        cmd.arg(pattern);
        self.run("KEYS", cmd).await
    }

    /// Delete every key matching a glob pattern, walking the keyspace with SCAN.
    pub async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) = self.run("SCAN", scan).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let removed: u64 = self.run("DEL", del).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(backend = %self.name, pattern, deleted, "Deleted matching keys");
        Ok(deleted)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != ConnectionState::Closed {
            debug!(backend = %self.name, from = %*state, to = %next, "Connection state change");
            *state = next;
        }
    }

    fn emit(&self, event: HandleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn connection(&self, command: &'static str) -> Result<LiveConnection> {
        match self.state() {
            ConnectionState::Closed => Err(RedisError::Closed(command)),
            ConnectionState::Ready => self
                .conn
                .read()
                .clone()
                .ok_or(RedisError::NotReady(command)),
            _ => Err(RedisError::NotReady(command)),
        }
    }

    async fn run<T: FromRedisValue>(&self, command: &'static str, cmd: Cmd) -> Result<T> {
        let LiveConnection {
            generation,
            mut conn,
        } = self.connection(command)?;

        let result = match timeout(self.config.command_timeout, cmd.query_async(&mut conn)).await
        {
            Ok(result) => result.map_err(RedisError::from),
            Err(_) => Err(RedisError::Timeout),
        };

        if let Err(err) = &result
            && err.is_connection_error()
        {
            warn!(backend = %self.name, command, error = %err, "Redis command lost its connection");
            self.emit(HandleEvent::Error(err.clone()));
            self.connection_lost(generation);
        }

        result
    }

    /// Drop the connection of `generation` if it is still the live one and
    /// wake the supervisor.
    fn connection_lost(&self, generation: u64) {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Ready {
                return;
            }
            let mut conn = self.conn.write();
            if conn.as_ref().map(|live| live.generation) != Some(generation) {
                return;
            }
            conn.take();
            debug!(backend = %self.name, "Connection lost");
            *state = ConnectionState::Disconnected;
        }
        self.lost.notify_one();
    }

    /// Connect, then reconnect whenever the connection is lost, until the
    /// handle is closed or dropped.
    async fn supervise(handle: Weak<Self>, lost: Arc<Notify>) {
        let mut attempt: u32 = 0;

        loop {
            let backoff = {
                let Some(handle) = handle.upgrade() else {
                    return;
                };
                if handle.state() == ConnectionState::Closed {
                    return;
                }
                if handle.establish().await {
                    attempt = 0;
                    None
                } else {
                    attempt = attempt.saturating_add(1);
                    Some(handle.config.reconnect_backoff(attempt))
                }
            };

            match backoff {
                Some(delay) => {
                    debug!(attempt, ?delay, "Reconnecting to Redis after backoff");
                    tokio::time::sleep(delay).await;
                }
                None => lost.notified().await,
            }
        }
    }

    /// One connect attempt. Returns whether the handle became ready.
    async fn establish(&self) -> bool {
        self.set_state(ConnectionState::Connecting);
        info!(backend = %self.name, "Connecting to Redis");

        let connected = timeout(self.config.connection_timeout, self.open_connection()).await;
        let mut conn = match connected {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => return self.connect_failed(err),
            Err(_) => return self.connect_failed(RedisError::Timeout),
        };

        if self.state() == ConnectionState::Closed {
            return false;
        }
        self.set_state(ConnectionState::Connected);
        self.emit(HandleEvent::Connect);

        let ping = redis::cmd("PING");
        let ready: std::result::Result<redis::RedisResult<String>, _> =
            timeout(self.config.connection_timeout, ping.query_async(&mut conn)).await;
        match ready {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return self.connect_failed(err.into()),
            Err(_) => return self.connect_failed(RedisError::Timeout),
        }

        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return false;
            }
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            *self.conn.write() = Some(LiveConnection { generation, conn });
            *state = ConnectionState::Ready;
        }
        info!(backend = %self.name, "Redis connection ready");
        self.emit(HandleEvent::Ready);
        true
    }

    async fn open_connection(&self) -> Result<MultiplexedConnection> {
        let client = redis::Client::open(self.config.connection_url()?)
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        if let Some(name) = &self.config.connection_name {
            let mut setname = redis::cmd("CLIENT");
            setname.arg("SETNAME").arg(name);
            let _: () = setname.query_async(&mut conn).await?;
        }

        Ok(conn)
    }

    fn connect_failed(&self, err: RedisError) -> bool {
        warn!(backend = %self.name, error = %err, "Redis connection failed");
        self.conn.write().take();
        self.set_state(ConnectionState::Disconnected);
        self.emit(HandleEvent::Error(err));
        false
    }

    async fn keepalive(handle: Weak<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(handle) = handle.upgrade() else {
                return;
            };
            match handle.state() {
                ConnectionState::Closed => return,
                ConnectionState::Ready => {
                    let ping: Result<String> = handle.run("PING", redis::cmd("PING")).await;
                    if let Err(err) = ping {
                        debug!(backend = %handle.name, error = %err, "Keepalive ping failed");
                        if !err.is_connection_error() {
                            handle.emit(HandleEvent::Error(err));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl fmt::Debug for RedisHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for RedisHandle {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

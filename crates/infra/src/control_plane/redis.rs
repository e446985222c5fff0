//! Redis-backed control-plane store (optional).
//!
//! One connection is held open and reused across calls, since the monitor
//! polls its entry every few milliseconds. Values are never cached: every call
//! is a round trip to the server. A command that fails drops the connection
//! and the next call reconnects. Failed commands are not retried, because a
//! lost reply to `SET NX` would make a retry misreport the claim.
//!
//! The atomic primitives map onto `SET NX`, `SET XX` and a small Lua script.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use redis::{Commands, Connection, RedisResult};
use tracing::{debug, instrument, warn};

use super::{ControlPlaneError, ControlPlaneStore};

/// Atomically overwrite KEYS[1] with ARGV[2] when it currently equals ARGV[1].
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Redis control-plane store.
pub struct RedisControlPlane {
    client: redis::Client,
    namespace: Option<String>,
    conn: Mutex<Option<Connection>>,
}

impl fmt::Debug for RedisControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisControlPlane")
            .field("client", &self.client)
            .field("namespace", &self.namespace)
            .field("connected", &self.conn.try_lock().map(|c| c.is_some()).ok())
            .finish()
    }
}

impl RedisControlPlane {
    /// Create a store for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// No connection is opened until the first command.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, ControlPlaneError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ControlPlaneError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            namespace: None,
            conn: Mutex::new(None),
        })
    }

    /// Prefix every key with `namespace:` (shared Redis instances).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` on the shared connection, opening it first if needed.
    fn with_connection<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T, ControlPlaneError> {
        let mut slot = self.slot();

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let conn = self
                    .client
                    .get_connection()
                    .map_err(|e| ControlPlaneError::Connection(e.to_string()))?;
                debug!("control-plane connection opened");
                conn
            }
        };

        match f(&mut conn) {
            Ok(value) => {
                *slot = Some(conn);
                Ok(value)
            }
            Err(e) => {
                warn!(op, error = %e, "control-plane command failed; dropping connection");
                Err(ControlPlaneError::Command(format!("{op} failed: {e}")))
            }
        }
    }
}

impl ControlPlaneStore for RedisControlPlane {
    fn get(&self, key: &str) -> Result<Option<String>, ControlPlaneError> {
        let key = self.key(key);
        self.with_connection("GET", |conn| conn.get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ControlPlaneError> {
        let key = self.key(key);
        self.with_connection("SET", |conn| conn.set(key, value))
    }

    fn has(&self, key: &str) -> Result<bool, ControlPlaneError> {
        let key = self.key(key);
        self.with_connection("EXISTS", |conn| conn.exists(key))
    }

    #[instrument(skip(self), err)]
    fn delete(&self, key: &str) -> Result<bool, ControlPlaneError> {
        let key = self.key(key);
        let removed: i64 = self.with_connection("DEL", |conn| conn.del(key))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), err)]
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError> {
        let key = self.key(key);
        // SET .. NX replies OK when written and nil otherwise.
        let reply: Option<String> = self.with_connection("SET NX", |conn| {
            redis::cmd("SET").arg(key).arg(value).arg("NX").query(conn)
        })?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self), err)]
    fn replace(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError> {
        let key = self.key(key);
        let reply: Option<String> = self.with_connection("SET XX", |conn| {
            redis::cmd("SET").arg(key).arg(value).arg("XX").query(conn)
        })?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self), err)]
    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError> {
        let key = self.key(key);
        let swapped: i64 = self.with_connection("compare-and-swap script", |conn| {
            redis::Script::new(COMPARE_AND_SWAP_SCRIPT)
                .key(key)
                .arg(expected)
                .arg(value)
                .invoke(conn)
        })?;
        Ok(swapped == 1)
    }
}

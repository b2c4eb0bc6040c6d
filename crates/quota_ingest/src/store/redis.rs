//! RedisJSON + RediSearch implementation of the document store.

use super::{DocumentStore, IndexField, IndexKind};
use crate::config::ServiceConfig;
use crate::error::FeedError;
use redis::{Client, Connection};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Document store over a Redis instance with the JSON and Search modules.
///
/// The connection is established lazily on first use and re-established
/// after I/O failures. All calls arrive from the single consumer thread, so
/// one connection behind a mutex is the whole pool.
pub struct RedisJsonStore {
    client: Client,
    conn: Mutex<Option<Connection>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for RedisJsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJsonStore")
            .field("client", &self.client)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RedisJsonStore {
    /// Builds the store from configuration without connecting yet.
    pub fn new(cfg: &ServiceConfig) -> Result<Self, FeedError> {
        let url = connection_url(cfg);
        let client = Client::open(url.as_str())
            .map_err(|e| FeedError::ConnectionFailed(format!("invalid store url: {e}")))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            connect_timeout: cfg.redis_wait_timeout(),
        })
    }

    /// Runs `f` against the live connection, connecting first if needed.
    /// A connection-level failure drops the cached handle so the next call
    /// reconnects.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, FeedError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let conn = self
                .client
                .get_connection_with_timeout(self.connect_timeout)
                .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
            info!("connected to document store");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(FeedError::Unexpected(
                "connection slot empty after connect".into(),
            ));
        };

        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    warn!(error = %e, "store connection lost, will reconnect");
                    *guard = None;
                    return Err(FeedError::ConnectionFailed(e.to_string()));
                }
                Err(FeedError::CommandFailed(e.to_string()))
            }
        }
    }
}

impl DocumentStore for RedisJsonStore {
    fn get_json(&self, key: &str, path: &str) -> Result<String, FeedError> {
        let reply: Option<String> = self.with_conn(|conn| {
            redis::cmd("JSON.GET").arg(key).arg(path).query(conn)
        })?;
        reply.ok_or_else(|| FeedError::KeyNotFound(key.to_string()))
    }

    fn set_json(&self, key: &str, path: &str, json: &str) -> Result<(), FeedError> {
        self.with_conn(|conn| {
            redis::cmd("JSON.SET").arg(key).arg(path).arg(json).query(conn)
        })
    }

    fn del(&self, key: &str) -> Result<(), FeedError> {
        self.with_conn(|conn| redis::cmd("DEL").arg(key).query(conn))
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>, FeedError> {
        self.with_conn(|conn| redis::cmd("KEYS").arg(pattern).query(conn))
    }

    fn create_index(
        &self,
        name: &str,
        prefix: &str,
        schema: &[IndexField],
    ) -> Result<(), FeedError> {
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("FT.CREATE");
            cmd.arg(name)
                .arg("ON")
                .arg("JSON")
                .arg("PREFIX")
                .arg(1)
                .arg(prefix)
                .arg("SCHEMA");
            for field in schema {
                cmd.arg(field.json_path).arg("AS").arg(field.alias);
                match field.kind {
                    IndexKind::Text => cmd.arg("TEXT"),
                    IndexKind::Tag => cmd.arg("TAG"),
                };
            }
            cmd.query(conn)
        })
    }

    fn drop_index(&self, name: &str) -> Result<(), FeedError> {
        self.with_conn(|conn| redis::cmd("FT.DROPINDEX").arg(name).query(conn))
    }
}

/// Normalizes the configured endpoint into a `redis://` URL, folding in the
/// optional password when the URL does not already carry credentials.
fn connection_url(cfg: &ServiceConfig) -> String {
    let base = if cfg.redis_url.contains("://") {
        cfg.redis_url.clone()
    } else {
        format!("redis://{}", cfg.redis_url)
    };
    match cfg.redis_password.as_deref() {
        Some(password) if !password.is_empty() && !base.contains('@') => {
            match base.strip_prefix("redis://") {
                Some(rest) => format!("redis://:{password}@{rest}"),
                None => base,
            }
        }
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(url: &str, password: Option<&str>) -> ServiceConfig {
        ServiceConfig {
            redis_url: url.to_string(),
            server_port: 9516,
            socket_timeout_ms: 5000,
            redis_pool_size: 10,
            redis_wait_timeout_ms: 100,
            redis_password: password.map(String::from),
        }
    }

    #[test]
    fn test_bare_host_port_gets_scheme() {
        assert_eq!(
            connection_url(&cfg("127.0.0.1:6379", None)),
            "redis://127.0.0.1:6379"
        );
    }

    #[test]
    fn test_existing_scheme_untouched() {
        assert_eq!(
            connection_url(&cfg("redis://cache.internal:6380", None)),
            "redis://cache.internal:6380"
        );
    }

    #[test]
    fn test_password_folded_into_url() {
        assert_eq!(
            connection_url(&cfg("127.0.0.1:6379", Some("hunter2"))),
            "redis://:hunter2@127.0.0.1:6379"
        );
        // Credentials already present win over the config password.
        assert_eq!(
            connection_url(&cfg("redis://user:pw@host:6379", Some("hunter2"))),
            "redis://user:pw@host:6379"
        );
    }

    #[test]
    fn test_new_rejects_garbage_url() {
        let err = RedisJsonStore::new(&cfg("not a url at all", None)).unwrap_err();
        assert!(matches!(err, FeedError::ConnectionFailed(_)));
        assert!(err.is_fatal());
    }
}

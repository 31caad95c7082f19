//! Database session layer for hive-server
//!
//! A [`SessionProvider`] owns the connection pool and hands out one
//! [`DbSession`] per request. A session holds a pooled connection and
//! returns it when dropped, so release happens on every exit path of the
//! handler that acquired it.
//!
//! Sessions never open a transaction and never create schema: the indexer
//! owns `hive_blocks`, this server only reads it.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, ServerError};

const LAST_BLOCK_QUERY: &str = "SELECT COALESCE(MAX(num), 0)::BIGINT FROM hive_blocks";

/// A request-scoped handle on the indexer database.
#[async_trait]
pub trait DbSession: Send {
    /// Highest block number ingested by the indexer, `0` when none.
    async fn last_block(&mut self) -> Result<i64>;
}

/// Abstraction for session backends. The pool is built once; sessions are
/// checked out per request.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session(&self) -> Result<Box<dyn DbSession>>;

    /// Release pooled resources. Called once at shutdown.
    async fn close(&self);
}

/// PostgreSQL-backed provider.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Build the pool from configuration. The URL is parsed here, so a
    /// malformed `DATABASE_URL` fails before the server starts listening;
    /// connections themselves are opened on first checkout.
    pub fn open(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect_lazy(&config.database.url)
            .map_err(|e| ServerError::DatabaseError(format!("Failed to open database: {}", e)))?;

        info!(
            max_connections = config.database.max_connections,
            "database pool configured"
        );

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionProvider for Database {
    async fn session(&self) -> Result<Box<dyn DbSession>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ServerError::DatabaseError(format!("Failed to acquire session: {}", e)))?;

        Ok(Box::new(PgSession { conn }))
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("database pool closed");
    }
}

struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl DbSession for PgSession {
    async fn last_block(&mut self) -> Result<i64> {
        let num: i64 = sqlx::query_scalar(LAST_BLOCK_QUERY)
            .fetch_one(&mut *self.conn)
            .await?;
        debug!(last_block = num, "queried hive_blocks head");
        Ok(num)
    }
}

/// In-memory provider for tests. Tracks open sessions so release can be
/// asserted.
#[derive(Clone)]
pub struct InMemoryDatabase {
    last_block: Arc<AtomicI64>,
    fail: Arc<AtomicBool>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryDatabase {
    pub fn new(last_block: i64) -> Self {
        Self {
            last_block: Arc::new(AtomicI64::new(last_block)),
            fail: Arc::new(AtomicBool::new(false)),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_last_block(&self, num: i64) {
        self.last_block.store(num, Ordering::SeqCst);
    }

    /// Make every subsequent query fail with a database error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sessions currently checked out and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for InMemoryDatabase {
    async fn session(&self) -> Result<Box<dyn DbSession>> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            db: self.clone(),
        }))
    }

    async fn close(&self) {}
}

struct InMemorySession {
    db: InMemoryDatabase,
}

#[async_trait]
impl DbSession for InMemorySession {
    async fn last_block(&mut self) -> Result<i64> {
        if self.db.fail.load(Ordering::SeqCst) {
            return Err(ServerError::DatabaseError(
                "relation \"hive_blocks\" is unavailable".to_string(),
            ));
        }
        Ok(self.db.last_block.load(Ordering::SeqCst))
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.db.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

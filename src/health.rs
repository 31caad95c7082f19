//! Indexer health check
//!
//! Compares the highest block ingested into the local database with the
//! upstream node's last irreversible block. The gateway is healthy while the
//! indexer trails by no more than `limits.max_block_num_diff` blocks.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::AppState;
use crate::error::{Result, ServerError};
use crate::json;

/// Block heights read from both sides, one query each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub last_db_block: i64,
    pub last_irreversible_block: i64,
}

impl ChainHead {
    /// How far the indexer trails the upstream node. Negative when the
    /// database is ahead of what upstream reports as irreversible.
    pub fn diff(&self) -> Result<i64> {
        self.last_irreversible_block
            .checked_sub(self.last_db_block)
            .ok_or_else(|| {
                ServerError::InternalError(format!(
                    "block difference overflows: {} - {}",
                    self.last_irreversible_block, self.last_db_block
                ))
            })
    }
}

/// Body of a successful `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(with = "json::safe_int")]
    pub last_db_block: i64,
    #[serde(with = "json::safe_int")]
    pub last_irreversible_block: i64,
    #[serde(with = "json::safe_int")]
    pub diff: i64,
    #[serde(with = "json::timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Read both heights. The session is checked out first and held until the
/// function returns, whichever way it returns.
pub async fn read_chain_head(state: &AppState) -> Result<ChainHead> {
    let mut session = state.db.session().await?;

    let last_irreversible_block = state.node.last_irreversible_block_num().await?;
    let last_db_block = session.last_block().await?;

    Ok(ChainHead {
        last_db_block,
        last_irreversible_block,
    })
}

/// Apply the lag threshold. Only `diff > max_block_num_diff` fails.
pub fn evaluate(head: ChainHead, max_block_num_diff: i64) -> Result<HealthStatus> {
    let diff = head.diff()?;

    if diff > max_block_num_diff {
        return Err(ServerError::BlockLag {
            last_irreversible_block: head.last_irreversible_block,
            last_db_block: head.last_db_block,
            diff,
            max_block_num_diff,
        });
    }

    Ok(HealthStatus {
        last_db_block: head.last_db_block,
        last_irreversible_block: head.last_irreversible_block,
        diff,
        timestamp: Utc::now(),
    })
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthStatus>> {
    let head = read_chain_head(&state).await?;

    let result = evaluate(head, state.config.limits.max_block_num_diff);
    if let Err(ServerError::BlockLag { diff, .. }) = &result {
        warn!(
            last_db_block = head.last_db_block,
            last_irreversible_block = head.last_irreversible_block,
            diff = *diff,
            "indexer is lagging"
        );
    }

    let status = result?;
    Ok(Json(status))
}

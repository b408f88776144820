//! # Work Claiming
//!
//! Hands periods and lotes to exactly one worker at a time, across any
//! number of processes sharing the store.
//!
//! ## Claim Statement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE contingency_periods                                             │
//! │     SET processing = 1, claimed_at = now                                │
//! │   WHERE id IN (SELECT id FROM contingency_periods                       │
//! │                 WHERE status IN (..) AND processing = 0                 │
//! │                 ORDER BY created_at LIMIT n)                            │
//! │  RETURNING *                                                            │
//! │                                                                         │
//! │  Worker A ──► claims rows 1..n     (holds the write lock briefly)      │
//! │  Worker B ──► sees processing = 1 on those rows, claims the next ones  │
//! │                                                                         │
//! │  Nobody waits on a claimed row; claimed rows simply drop out of the    │
//! │  candidate set.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A worker that dies mid-unit leaves `processing = 1` behind; the stale
//! sweep releases such rows once `claimed_at` is older than the cutoff.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::error::DbResult;
use fesv_core::{ContingencyPeriod, Lote, LoteStatus, PeriodStatus};

/// Rows released by [`WorkerClaimer::release_stale_claims`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleClaimSweep {
    pub periods: u64,
    pub lotes: u64,
}

/// Cross-process claimer for periods and lotes.
#[derive(Debug, Clone)]
pub struct WorkerClaimer {
    pool: SqlitePool,
}

impl WorkerClaimer {
    pub fn new(pool: SqlitePool) -> Self {
        WorkerClaimer { pool }
    }

    /// Claims up to `limit` unclaimed periods in the given statuses.
    pub async fn claim_periods(
        &self,
        statuses: &[PeriodStatus],
        limit: i64,
    ) -> DbResult<Vec<ContingencyPeriod>> {
        if statuses.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE contingency_periods SET processing = 1, claimed_at = ",
        );
        qb.push_bind(Utc::now());
        qb.push(
            " WHERE id IN (SELECT id FROM contingency_periods WHERE processing = 0 AND status IN (",
        );
        let mut candidates = qb.separated(", ");
        for status in statuses {
            candidates.push_bind(*status);
        }
        candidates.push_unseparated(") ORDER BY created_at ASC LIMIT ");
        candidates.push_bind_unseparated(limit);
        candidates.push_unseparated(") RETURNING *");

        let mut claimed = qb
            .build_query_as::<ContingencyPeriod>()
            .fetch_all(&self.pool)
            .await?;
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed contingency periods");
        }
        Ok(claimed)
    }

    pub async fn release_period(&self, id: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE contingency_periods SET processing = 0, claimed_at = NULL WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claims up to `limit` unclaimed lotes in the given statuses.
    pub async fn claim_lotes(&self, statuses: &[LoteStatus], limit: i64) -> DbResult<Vec<Lote>> {
        if statuses.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE lotes SET processing = 1, claimed_at = ");
        qb.push_bind(Utc::now());
        qb.push(" WHERE id IN (SELECT id FROM lotes WHERE processing = 0 AND status IN (");
        let mut candidates = qb.separated(", ");
        for status in statuses {
            candidates.push_bind(*status);
        }
        candidates.push_unseparated(") ORDER BY created_at ASC LIMIT ");
        candidates.push_bind_unseparated(limit);
        candidates.push_unseparated(") RETURNING *");

        let mut claimed = qb.build_query_as::<Lote>().fetch_all(&self.pool).await?;
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed lotes");
        }
        Ok(claimed)
    }

    pub async fn release_lote(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE lotes SET processing = 0, claimed_at = NULL WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Releases claims taken before `older_than`.
    pub async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> DbResult<StaleClaimSweep> {
        let periods = sqlx::query(
            r#"
            UPDATE contingency_periods SET processing = 0, claimed_at = NULL
            WHERE processing = 1 AND (claimed_at IS NULL OR claimed_at < ?1)
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let lotes = sqlx::query(
            r#"
            UPDATE lotes SET processing = 0, claimed_at = NULL
            WHERE processing = 1 AND (claimed_at IS NULL OR claimed_at < ?1)
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let sweep = StaleClaimSweep { periods, lotes };
        if sweep != StaleClaimSweep::default() {
            warn!(
                periods = sweep.periods,
                lotes = sweep.lotes,
                "Released stale claims"
            );
        }
        Ok(sweep)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

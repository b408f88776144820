//! # Period Repository
//!
//! Contingency period lifecycle.
//!
//! ## Period Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Period Lifecycle                                  │
//! │                                                                         │
//! │  1. FIND OR CREATE (first failure of an outage)                        │
//! │     └── status = active, f_inicio/h_inicio = local now                 │
//! │     └── later failures in the same scope join this period              │
//! │                                                                         │
//! │  2. CLOSE (authority reachable again)                                  │
//! │     └── f_fin/h_fin = local now, status = reporting                    │
//! │     └── no-op when the period is no longer active                      │
//! │                                                                         │
//! │  3. COMPLETE (every document terminal)                                 │
//! │     └── status = completed                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The partial unique index `idx_periods_one_active` guarantees at most one
//! active period per (company, establishment, point of sale, ambiente), no
//! matter how many processes race on the first failure.

use chrono::{NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{new_id, retry_with_new_id};
use crate::error::{DbError, DbResult};
use fesv_core::{ContingencyPeriod, PeriodScope, TipoContingencia};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Repository for contingency periods.
#[derive(Debug, Clone)]
pub struct PeriodRepository {
    pool: SqlitePool,
    max_id_attempts: u32,
}

impl PeriodRepository {
    pub fn new(pool: SqlitePool, max_id_attempts: u32) -> Self {
        PeriodRepository {
            pool,
            max_id_attempts,
        }
    }

    /// Returns the active period for `scope`, creating it when none exists.
    ///
    /// An existing period is returned unchanged: the classification of the
    /// first failure of an outage wins.
    pub async fn find_or_create_active(
        &self,
        scope: &PeriodScope,
        tipo: TipoContingencia,
        motivo: &str,
        local_now: NaiveDateTime,
    ) -> DbResult<ContingencyPeriod> {
        let mut tx = self.pool.begin().await?;
        let period =
            find_or_create_active_in(&mut tx, scope, tipo, motivo, local_now, self.max_id_attempts)
                .await?;
        tx.commit().await?;
        Ok(period)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ContingencyPeriod>> {
        let period =
            sqlx::query_as::<_, ContingencyPeriod>("SELECT * FROM contingency_periods WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(period)
    }

    /// The active period of a scope, if any.
    pub async fn active_for_scope(&self, scope: &PeriodScope) -> DbResult<Option<ContingencyPeriod>> {
        let mut conn = self.pool.acquire().await?;
        active_for_scope_in(&mut conn, scope).await
    }

    /// Closes an active period and moves it to reporting.
    ///
    /// Returns `false` (and changes nothing) when the period is not active,
    /// so a second close keeps the original end stamp.
    pub async fn close(&self, id: &str, local_now: NaiveDateTime) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE contingency_periods SET
                f_fin = ?2,
                h_fin = ?3,
                status = 'reporting',
                updated_at = ?4
            WHERE id = ?1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(local_now.format(DATE_FORMAT).to_string())
        .bind(local_now.format(TIME_FORMAT).to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let closed = result.rows_affected() > 0;
        if closed {
            info!(period_id = %id, "Contingency period closed");
        } else {
            debug!(period_id = %id, "Period not active, close skipped");
        }
        Ok(closed)
    }

    /// Marks a period as completed once the caller has confirmed every
    /// document is terminal. Returns false if it was already completed.
    pub async fn complete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE contingency_periods SET
                status = 'completed',
                updated_at = ?2
            WHERE id = ?1 AND status <> 'completed'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let completed = result.rows_affected() > 0;
        if completed {
            info!(period_id = %id, "Contingency period completed");
        }
        Ok(completed)
    }

    /// True when no document of the period is outside {procesado, rechazado}.
    pub async fn check_completion(&self, id: &str) -> DbResult<bool> {
        let open: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM documents
            WHERE contingency_period_id = ?1
              AND transmission_status NOT IN ('procesado', 'rechazado')
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(open == 0)
    }
}

/// Find-or-create on the caller's transaction.
///
/// Writes first so the transaction holds the write lock before it reads.
pub async fn find_or_create_active_in(
    conn: &mut SqliteConnection,
    scope: &PeriodScope,
    tipo: TipoContingencia,
    motivo: &str,
    local_now: NaiveDateTime,
    max_id_attempts: u32,
) -> DbResult<ContingencyPeriod> {
    let mut attempt = 1;
    loop {
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO contingency_periods (
                id, company_id, establishment_id, point_of_sale_id, ambiente,
                f_inicio, h_inicio, tipo_contingencia, motivo_contingencia,
                status, processing, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', 0, ?10, ?10)
            ON CONFLICT (company_id, establishment_id, point_of_sale_id, ambiente)
                WHERE status = 'active' DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(&scope.company_id)
        .bind(&scope.establishment_id)
        .bind(&scope.point_of_sale_id)
        .bind(scope.ambiente)
        .bind(local_now.format(DATE_FORMAT).to_string())
        .bind(local_now.format(TIME_FORMAT).to_string())
        .bind(tipo)
        .bind(motivo)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(DbError::from);

        match inserted {
            Ok(result) => {
                if result.rows_affected() > 0 {
                    info!(
                        company_id = %scope.company_id,
                        point_of_sale_id = %scope.point_of_sale_id,
                        ambiente = %scope.ambiente,
                        tipo_contingencia = tipo.code(),
                        "Contingency period opened"
                    );
                }
                break;
            }
            Err(err) if retry_with_new_id(&err, "contingency_period", attempt, max_id_attempts) => {
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }

    active_for_scope_in(conn, scope).await?.ok_or_else(|| {
        DbError::Internal(format!(
            "no active period for point of sale {} after insert",
            scope.point_of_sale_id
        ))
    })
}

/// Reads a period on the caller's transaction.
pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<ContingencyPeriod>> {
    let period =
        sqlx::query_as::<_, ContingencyPeriod>("SELECT * FROM contingency_periods WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(period)
}

async fn active_for_scope_in(
    conn: &mut SqliteConnection,
    scope: &PeriodScope,
) -> DbResult<Option<ContingencyPeriod>> {
    let period = sqlx::query_as::<_, ContingencyPeriod>(
        r#"
        SELECT * FROM contingency_periods
        WHERE company_id = ?1
          AND establishment_id = ?2
          AND point_of_sale_id = ?3
          AND ambiente = ?4
          AND status = 'active'
        "#,
    )
    .bind(&scope.company_id)
    .bind(&scope.establishment_id)
    .bind(&scope.point_of_sale_id)
    .bind(scope.ambiente)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(period)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::repository::test_support::{memory_db, seed_outlet, Outlet};
    use fesv_core::{Ambiente, PeriodScope, PeriodStatus, TipoContingencia};

    use super::*;

    fn local(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn scope(outlet: &Outlet) -> PeriodScope {
        PeriodScope {
            company_id: outlet.company.id.clone(),
            establishment_id: outlet.establishment.id.clone(),
            point_of_sale_id: outlet.point_of_sale.id.clone(),
            ambiente: Ambiente::Test,
        }
    }

    #[tokio::test]
    async fn test_first_failure_classification_wins() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let periods = db.periods();

        let first = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::AuthorityDown, "timeout", local(10, 0, 0))
            .await
            .unwrap();
        let second = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::PowerOutage, "power", local(10, 5, 0))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.tipo_contingencia, TipoContingencia::AuthorityDown);
        assert_eq!(second.f_inicio, "2025-03-15");
        assert_eq!(second.h_inicio, "10:00:00");
        assert_eq!(second.status, PeriodStatus::Active);
    }

    #[tokio::test]
    async fn test_other_ambiente_gets_its_own_period() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let mut production = scope(&outlet);
        production.ambiente = Ambiente::Production;

        let test = db
            .periods()
            .find_or_create_active(&scope(&outlet), TipoContingencia::AuthorityDown, "x", local(9, 0, 0))
            .await
            .unwrap();
        let prod = db
            .periods()
            .find_or_create_active(&production, TipoContingencia::AuthorityDown, "x", local(9, 0, 0))
            .await
            .unwrap();

        assert_ne!(test.id, prod.id);
        assert_eq!(prod.ambiente, Ambiente::Production);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let periods = db.periods();
        let period = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::AuthorityDown, "x", local(8, 0, 0))
            .await
            .unwrap();

        assert!(periods.close(&period.id, local(9, 30, 15)).await.unwrap());
        assert!(!periods.close(&period.id, local(11, 0, 0)).await.unwrap());

        let closed = periods.get(&period.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PeriodStatus::Reporting);
        assert_eq!(closed.f_fin.as_deref(), Some("2025-03-15"));
        assert_eq!(closed.h_fin.as_deref(), Some("09:30:15"));
        assert!(closed.is_closed());
    }

    #[tokio::test]
    async fn test_closed_period_frees_scope_for_a_new_one() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let periods = db.periods();
        let first = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::AuthorityDown, "x", local(8, 0, 0))
            .await
            .unwrap();
        periods.close(&first.id, local(9, 0, 0)).await.unwrap();

        let second = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::InternetOutage, "y", local(12, 0, 0))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.tipo_contingencia, TipoContingencia::InternetOutage);
    }

    #[tokio::test]
    async fn test_complete_from_any_open_status() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let periods = db.periods();

        // An active period with nothing open completes directly.
        let active = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::AuthorityDown, "x", local(8, 0, 0))
            .await
            .unwrap();
        assert!(periods.check_completion(&active.id).await.unwrap());
        assert!(periods.complete(&active.id).await.unwrap());
        assert_eq!(
            periods.get(&active.id).await.unwrap().unwrap().status,
            PeriodStatus::Completed
        );
        assert!(!periods.complete(&active.id).await.unwrap());

        // So does a reporting one.
        let reporting = periods
            .find_or_create_active(&scope(&outlet), TipoContingencia::AuthorityDown, "x", local(10, 0, 0))
            .await
            .unwrap();
        assert_ne!(reporting.id, active.id);
        periods.close(&reporting.id, local(11, 0, 0)).await.unwrap();
        assert!(periods.complete(&reporting.id).await.unwrap());
        assert_eq!(
            periods.get(&reporting.id).await.unwrap().unwrap().status,
            PeriodStatus::Completed
        );
    }
}

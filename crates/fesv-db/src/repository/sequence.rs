//! # Sequence Repository
//!
//! Per-(point of sale, tipo DTE) counters behind the numero de control.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  INSERT INTO sequence_counters (.., last_sequence) VALUES (.., 1)       │
//! │  ON CONFLICT (point_of_sale_id, tipo_dte)                               │
//! │      DO UPDATE SET last_sequence = last_sequence + 1                    │
//! │  RETURNING last_sequence                                                │
//! │                                                                         │
//! │  • one statement: read and increment can't interleave                   │
//! │  • takes the database write lock, so concurrent allocators on any       │
//! │    connection or process queue behind each other                       │
//! │  • inside a caller's transaction a rollback returns the number          │
//! │    (gaps are acceptable, duplicates never happen)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use fesv_core::validation::validate_outlet_code;
use fesv_core::NumeroControl;

/// Repository for numero de control sequences.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Allocates the next sequence for a (point of sale, tipo DTE) pair.
    ///
    /// The first call for a pair returns 1.
    pub async fn next_sequence(&self, point_of_sale_id: &str, tipo_dte: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        next_sequence_in(&mut conn, point_of_sale_id, tipo_dte).await
    }

    /// Allocates a sequence and formats the full numero de control.
    ///
    /// Fails with a validation error (and releases the number) when the
    /// establishment or point-of-sale code is missing.
    pub async fn allocate_numero_control(
        &self,
        point_of_sale_id: &str,
        tipo_dte: &str,
    ) -> DbResult<NumeroControl> {
        let mut tx = self.pool.begin().await?;

        let sequence = next_sequence_in(&mut tx, point_of_sale_id, tipo_dte).await?;

        let codes: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT e.cod_establecimiento, p.cod_punto_venta
            FROM points_of_sale p
            JOIN establishments e ON e.id = p.establishment_id
            WHERE p.id = ?1
            "#,
        )
        .bind(point_of_sale_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (cod_establecimiento, cod_punto_venta) =
            codes.ok_or_else(|| DbError::not_found("PointOfSale", point_of_sale_id))?;

        let cod_establecimiento =
            validate_outlet_code("cod_establecimiento", cod_establecimiento.as_deref())?;
        let cod_punto_venta = validate_outlet_code("cod_punto_venta", cod_punto_venta.as_deref())?;
        let numero = NumeroControl::new(tipo_dte, cod_establecimiento, cod_punto_venta, sequence)?;

        tx.commit().await?;

        debug!(
            point_of_sale_id = %point_of_sale_id,
            numero_control = %numero,
            "Allocated numero de control"
        );
        Ok(numero)
    }

    /// Last allocated sequence, or 0 when nothing was allocated yet.
    pub async fn current(&self, point_of_sale_id: &str, tipo_dte: &str) -> DbResult<i64> {
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT last_sequence FROM sequence_counters WHERE point_of_sale_id = ?1 AND tipo_dte = ?2",
        )
        .bind(point_of_sale_id)
        .bind(tipo_dte)
        .fetch_optional(&self.pool)
        .await?;

        Ok(current.unwrap_or(0))
    }
}

/// Allocates the next sequence on the caller's connection or transaction.
pub async fn next_sequence_in(
    conn: &mut SqliteConnection,
    point_of_sale_id: &str,
    tipo_dte: &str,
) -> DbResult<i64> {
    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sequence_counters (point_of_sale_id, tipo_dte, last_sequence, updated_at)
        VALUES (?1, ?2, 1, ?3)
        ON CONFLICT (point_of_sale_id, tipo_dte) DO UPDATE SET
            last_sequence = last_sequence + 1,
            updated_at = excluded.updated_at
        RETURNING last_sequence
        "#,
    )
    .bind(point_of_sale_id)
    .bind(tipo_dte)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    Ok(sequence)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::repository::test_support::{memory_db, seed_outlet};
    use crate::{Database, DbConfig, DbError};

    #[tokio::test]
    async fn test_sequences_start_at_one_per_pair() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let pos = &outlet.point_of_sale.id;
        let seq = db.sequences();

        assert_eq!(seq.current(pos, "01").await.unwrap(), 0);
        assert_eq!(seq.next_sequence(pos, "01").await.unwrap(), 1);
        assert_eq!(seq.next_sequence(pos, "01").await.unwrap(), 2);
        assert_eq!(seq.next_sequence(pos, "03").await.unwrap(), 1);
        assert_eq!(seq.current(pos, "01").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rolled_back_allocation_is_released() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let pos = &outlet.point_of_sale.id;

        {
            let mut tx = db.pool().begin().await.unwrap();
            let n = super::next_sequence_in(&mut tx, pos, "01").await.unwrap();
            assert_eq!(n, 1);
            tx.rollback().await.unwrap();
        }

        assert_eq!(db.sequences().next_sequence(pos, "01").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_allocate_numero_control_format() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;

        let numero = db
            .sequences()
            .allocate_numero_control(&outlet.point_of_sale.id, "01")
            .await
            .unwrap();
        assert_eq!(numero.to_string(), "DTE-01-M001P001-000000000000001");
    }

    #[tokio::test]
    async fn test_allocate_without_pos_code_fails_and_keeps_counter() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let pos = &outlet.point_of_sale.id;
        db.outlets().set_point_of_sale_code(pos, None).await.unwrap();

        let err = db
            .sequences()
            .allocate_numero_control(pos, "01")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(db.sequences().current(pos, "01").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocators_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequences.db");

        let db = Database::new(DbConfig::new(&path).max_connections(8))
            .await
            .unwrap();
        let outlet = seed_outlet(&db).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let pos = outlet.point_of_sale.id.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..25 {
                    seen.push(db.sequences().next_sequence(&pos, "01").await.unwrap());
                }
                seen
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for n in handle.await.unwrap() {
                assert!(all.insert(n), "duplicate sequence {n}");
            }
        }

        assert_eq!(all.len(), 200);
        assert_eq!(all.iter().copied().max(), Some(200));
        assert_eq!(all.iter().copied().min(), Some(1));
    }
}

//! # Outlet Repository
//!
//! Companies, establishments and points of sale: the emitter data an event
//! carries and the codes a numero de control is built from.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::{new_id, retry_with_new_id};
use crate::error::DbResult;
use fesv_core::{Company, EmitterInfo, Establishment, PointOfSale};

#[derive(Debug, Clone)]
pub struct NewCompany {
    pub nit: String,
    pub nombre: String,
    pub nombre_comercial: Option<String>,
    pub telefono: String,
    pub correo: String,
}

#[derive(Debug, Clone)]
pub struct NewEstablishment {
    pub company_id: String,
    pub tipo_establecimiento: String,
    pub cod_establecimiento: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPointOfSale {
    pub establishment_id: String,
    pub cod_punto_venta: Option<String>,
}

/// Repository for emitter and outlet rows.
#[derive(Debug, Clone)]
pub struct OutletRepository {
    pool: SqlitePool,
    max_id_attempts: u32,
}

impl OutletRepository {
    pub fn new(pool: SqlitePool, max_id_attempts: u32) -> Self {
        OutletRepository {
            pool,
            max_id_attempts,
        }
    }

    pub async fn create_company(&self, company: &NewCompany) -> DbResult<Company> {
        let mut attempt = 1;
        loop {
            let result: DbResult<Company> = sqlx::query_as::<_, Company>(
                r#"
                INSERT INTO companies (id, nit, nombre, nombre_comercial, telefono, correo, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                RETURNING *
                "#,
            )
            .bind(new_id())
            .bind(&company.nit)
            .bind(&company.nombre)
            .bind(&company.nombre_comercial)
            .bind(&company.telefono)
            .bind(&company.correo)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into);

            match result {
                Err(err) if retry_with_new_id(&err, "company", attempt, self.max_id_attempts) => {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn create_establishment(
        &self,
        establishment: &NewEstablishment,
    ) -> DbResult<Establishment> {
        let mut attempt = 1;
        loop {
            let result: DbResult<Establishment> = sqlx::query_as::<_, Establishment>(
                r#"
                INSERT INTO establishments (id, company_id, tipo_establecimiento, cod_establecimiento, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                RETURNING *
                "#,
            )
            .bind(new_id())
            .bind(&establishment.company_id)
            .bind(&establishment.tipo_establecimiento)
            .bind(&establishment.cod_establecimiento)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into);

            match result {
                Err(err)
                    if retry_with_new_id(&err, "establishment", attempt, self.max_id_attempts) =>
                {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn create_point_of_sale(&self, pos: &NewPointOfSale) -> DbResult<PointOfSale> {
        let mut attempt = 1;
        loop {
            let result: DbResult<PointOfSale> = sqlx::query_as::<_, PointOfSale>(
                r#"
                INSERT INTO points_of_sale (id, establishment_id, cod_punto_venta, created_at)
                VALUES (?1, ?2, ?3, ?4)
                RETURNING *
                "#,
            )
            .bind(new_id())
            .bind(&pos.establishment_id)
            .bind(&pos.cod_punto_venta)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into);

            match result {
                Err(err)
                    if retry_with_new_id(&err, "point_of_sale", attempt, self.max_id_attempts) =>
                {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Sets or clears the authority-assigned establishment code.
    pub async fn set_establishment_code(&self, id: &str, code: Option<&str>) -> DbResult<()> {
        debug!(establishment_id = %id, ?code, "Updating establishment code");
        sqlx::query("UPDATE establishments SET cod_establecimiento = ?1 WHERE id = ?2")
            .bind(code)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sets or clears the authority-assigned point-of-sale code.
    pub async fn set_point_of_sale_code(&self, id: &str, code: Option<&str>) -> DbResult<()> {
        debug!(point_of_sale_id = %id, ?code, "Updating point of sale code");
        sqlx::query("UPDATE points_of_sale SET cod_punto_venta = ?1 WHERE id = ?2")
            .bind(code)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn company(&self, id: &str) -> DbResult<Option<Company>> {
        let company = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(company)
    }

    /// Emitter block for an event: company data joined with the outlet codes.
    ///
    /// Returns `None` when the establishment or point of sale is unknown or
    /// they don't belong together. Missing codes come back as `None` fields.
    pub async fn emitter_info(
        &self,
        establishment_id: &str,
        point_of_sale_id: &str,
    ) -> DbResult<Option<EmitterInfo>> {
        let info = sqlx::query_as::<_, EmitterInfo>(
            r#"
            SELECT
                c.nit,
                c.nombre,
                c.nombre_comercial,
                c.telefono,
                c.correo,
                e.tipo_establecimiento,
                e.cod_establecimiento,
                p.cod_punto_venta
            FROM establishments e
            JOIN companies c ON c.id = e.company_id
            JOIN points_of_sale p ON p.establishment_id = e.id
            WHERE e.id = ?1 AND p.id = ?2
            "#,
        )
        .bind(establishment_id)
        .bind(point_of_sale_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(info)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::repository::test_support::{memory_db, seed_outlet};

    #[tokio::test]
    async fn test_emitter_info_joins_codes() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;

        let info = db
            .outlets()
            .emitter_info(&outlet.establishment.id, &outlet.point_of_sale.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(info.nit, "0614-120390-102-5");
        assert_eq!(info.tipo_establecimiento, "02");
        assert_eq!(info.cod_establecimiento.as_deref(), Some("M001"));
        assert_eq!(info.cod_punto_venta.as_deref(), Some("P001"));
    }

    #[tokio::test]
    async fn test_emitter_info_reports_missing_code_as_none() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        db.outlets()
            .set_point_of_sale_code(&outlet.point_of_sale.id, None)
            .await
            .unwrap();

        let info = db
            .outlets()
            .emitter_info(&outlet.establishment.id, &outlet.point_of_sale.id)
            .await
            .unwrap()
            .unwrap();
        assert!(info.cod_punto_venta.is_none());
    }

    #[tokio::test]
    async fn test_emitter_info_unknown_outlet() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;

        let info = db
            .outlets()
            .emitter_info(&outlet.establishment.id, "NOPE")
            .await
            .unwrap();
        assert!(info.is_none());
    }
}

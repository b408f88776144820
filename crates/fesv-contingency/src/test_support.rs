//! Shared fixtures for unit tests.

use chrono::{TimeZone, Utc};

use fesv_core::{Company, Document, Establishment, NewDocument, PointOfSale};
use fesv_db::{Database, DbConfig, NewCompany, NewEstablishment, NewPointOfSale};

use crate::clock::LocalClock;

pub struct Outlet {
    pub company: Company,
    pub establishment: Establishment,
    pub point_of_sale: PointOfSale,
}

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// 2025-03-15 08:00:00 in San Salvador.
pub fn morning_clock() -> LocalClock {
    LocalClock::fixed(
        chrono_tz::America::El_Salvador,
        Utc.with_ymd_and_hms(2025, 3, 15, 14, 0, 0).unwrap(),
    )
}

pub async fn seed_outlet(db: &Database) -> Outlet {
    let outlets = db.outlets();
    let company = outlets
        .create_company(&NewCompany {
            nit: "0614-120390-102-5".to_string(),
            nombre: "Comercial El Roble S.A. de C.V.".to_string(),
            nombre_comercial: Some("El Roble".to_string()),
            telefono: "22223333".to_string(),
            correo: "facturas@elroble.sv".to_string(),
        })
        .await
        .unwrap();
    let establishment = outlets
        .create_establishment(&NewEstablishment {
            company_id: company.id.clone(),
            tipo_establecimiento: "02".to_string(),
            cod_establecimiento: Some("M001".to_string()),
        })
        .await
        .unwrap();
    let point_of_sale = outlets
        .create_point_of_sale(&NewPointOfSale {
            establishment_id: establishment.id.clone(),
            cod_punto_venta: Some("P001".to_string()),
        })
        .await
        .unwrap();

    Outlet {
        company,
        establishment,
        point_of_sale,
    }
}

/// A finalized factura (`01`) with a freshly allocated numero de control.
pub async fn finalized_document(db: &Database, outlet: &Outlet) -> Document {
    let numero = db
        .sequences()
        .allocate_numero_control(&outlet.point_of_sale.id, "01")
        .await
        .unwrap();

    db.documents()
        .insert(&NewDocument {
            company_id: outlet.company.id.clone(),
            establishment_id: outlet.establishment.id.clone(),
            point_of_sale_id: outlet.point_of_sale.id.clone(),
            codigo_generacion: fesv_core::new_generation_code(),
            numero_control: numero.to_string(),
            tipo_dte: "01".to_string(),
            fecha_emision: "2025-03-15".to_string(),
            finalized_at: Utc::now(),
        })
        .await
        .unwrap()
}

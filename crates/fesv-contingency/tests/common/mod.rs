//! Fakes and seeding shared by the scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use fesv_contingency::{
    AuthorityClient, AuthorityError, AuthorityGateway, ContingencyConfig, ContingencyWorker,
    ContingencyWorkerHandle, CredentialError, CredentialStore, Credentials, Signer, SignerError,
};
use fesv_core::authority::{BatchReceipt, BatchResult, DocumentRecord, DocumentResult, EventReceipt};
use fesv_core::event::{ContingencyEventPayload, LoteEnvelope};
use fesv_core::{Ambiente, Company, Document, Establishment, NewDocument, PointOfSale};
use fesv_db::{Database, DbConfig, NewCompany, NewEstablishment, NewPointOfSale};

pub const COMPANY_NIT: &str = "0614-120390-102-5";
const SIGNED_PREFIX: &str = "signed:";

// =============================================================================
// Signer
// =============================================================================

/// Signs by prefixing the payload. Can be switched off.
pub struct FakeSigner {
    online: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeSigner {
    pub fn online() -> Arc<Self> {
        Arc::new(FakeSigner {
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn offline() -> Arc<Self> {
        let signer = Self::online();
        signer.set_online(false);
        signer
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, _: &Credentials, payload: &str) -> Result<String, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(SignerError::Unavailable("firmador offline".into()));
        }
        Ok(format!("{SIGNED_PREFIX}{payload}"))
    }
}

// =============================================================================
// Authority
// =============================================================================

/// In-memory tax authority.
///
/// Events get `event_estado`. Polls answer with every verdict registered
/// through [`FakeAuthority::will_process`] / [`FakeAuthority::will_reject`];
/// verdicts for documents outside the polled lote simply match nothing.
pub struct FakeAuthority {
    online: AtomicBool,
    event_estado: Mutex<String>,
    procesados: Mutex<Vec<DocumentResult>>,
    rechazados: Mutex<Vec<DocumentResult>>,
    ledger: Mutex<HashMap<String, DocumentRecord>>,
    pub events: Mutex<Vec<String>>,
    pub batches: Mutex<Vec<LoteEnvelope>>,
    pub logins: AtomicUsize,
    lote_seq: AtomicUsize,
}

impl FakeAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeAuthority {
            online: AtomicBool::new(true),
            event_estado: Mutex::new("RECIBIDO".to_string()),
            procesados: Mutex::new(Vec::new()),
            rechazados: Mutex::new(Vec::new()),
            ledger: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            lote_seq: AtomicUsize::new(0),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_event_estado(&self, estado: &str) {
        *self.event_estado.lock().unwrap() = estado.to_string();
    }

    pub fn will_process(&self, codigo_generacion: &str, fh_procesamiento: &str) {
        self.procesados.lock().unwrap().push(DocumentResult {
            estado: "PROCESADO".to_string(),
            codigo_generacion: codigo_generacion.to_string(),
            sello_recibido: Some(format!("SELLO-{codigo_generacion}")),
            fh_procesamiento: Some(fh_procesamiento.to_string()),
            ..Default::default()
        });
    }

    pub fn will_reject(&self, codigo_generacion: &str, descripcion: &str) {
        self.rechazados.lock().unwrap().push(DocumentResult {
            estado: "RECHAZADO".to_string(),
            codigo_generacion: codigo_generacion.to_string(),
            codigo_msg: Some("004".to_string()),
            descripcion_msg: Some(descripcion.to_string()),
            observaciones: vec![descripcion.to_string()],
            ..Default::default()
        });
    }

    /// Sets the canonical record returned by `query_document`.
    pub fn record(&self, record: DocumentRecord) {
        self.ledger
            .lock()
            .unwrap()
            .insert(record.codigo_generacion.clone(), record);
    }

    /// Event payloads received so far, unwrapped from their signature.
    pub fn submitted_events(&self) -> Vec<ContingencyEventPayload> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|signed| {
                let json = signed.strip_prefix(SIGNED_PREFIX).unwrap();
                serde_json::from_str(json).unwrap()
            })
            .collect()
    }

    fn check_online(&self) -> Result<(), AuthorityError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthorityError::Unavailable("connection refused".into()))
        }
    }
}

#[async_trait]
impl AuthorityClient for FakeAuthority {
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AuthorityError> {
        self.check_online()?;
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(format!("token-{}", credentials.nit))
    }

    async fn submit_event(
        &self,
        _token: &str,
        _ambiente: Ambiente,
        signed_event: &str,
    ) -> Result<EventReceipt, AuthorityError> {
        self.check_online()?;
        self.events.lock().unwrap().push(signed_event.to_string());
        let estado = self.event_estado.lock().unwrap().clone();
        Ok(EventReceipt {
            sello_recibido: (estado == "RECIBIDO").then(|| "SELLO-EVENTO".to_string()),
            estado,
            ..Default::default()
        })
    }

    async fn submit_batch(
        &self,
        _token: &str,
        envelope: &LoteEnvelope,
    ) -> Result<BatchReceipt, AuthorityError> {
        self.check_online()?;
        self.batches.lock().unwrap().push(envelope.clone());
        let seq = self.lote_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BatchReceipt {
            estado: "RECIBIDO".to_string(),
            id_envio: envelope.id_envio.clone(),
            codigo_lote: format!("LOTE-{seq:04}"),
            ..Default::default()
        })
    }

    async fn poll_batch(&self, _token: &str, _codigo_lote: &str) -> Result<BatchResult, AuthorityError> {
        self.check_online()?;
        Ok(BatchResult {
            procesados: self.procesados.lock().unwrap().clone(),
            rechazados: self.rechazados.lock().unwrap().clone(),
        })
    }

    async fn query_document(
        &self,
        _token: &str,
        _nit: &str,
        _tipo_dte: &str,
        codigo_generacion: &str,
    ) -> Result<DocumentRecord, AuthorityError> {
        self.check_online()?;
        self.ledger
            .lock()
            .unwrap()
            .get(codigo_generacion)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound {
                codigo_generacion: codigo_generacion.to_string(),
            })
    }
}

pub struct StaticCredentials;

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credentials(&self, _company_id: &str) -> Result<Credentials, CredentialError> {
        Ok(Credentials {
            nit: "06141203901025".to_string(),
            password: "hacienda-pass".to_string(),
        })
    }
}

// =============================================================================
// Engine Wiring
// =============================================================================

/// Gateway that gives up on an unreachable authority within milliseconds.
pub fn gateway(authority: Arc<FakeAuthority>) -> AuthorityGateway {
    AuthorityGateway::new(authority, Arc::new(StaticCredentials)).with_backoff(
        Duration::from_millis(1),
        Duration::from_millis(2),
        Duration::from_millis(10),
    )
}

pub fn worker(
    db: &Database,
    authority: Arc<FakeAuthority>,
    signer: Arc<FakeSigner>,
    config: &ContingencyConfig,
) -> (ContingencyWorker, ContingencyWorkerHandle) {
    ContingencyWorker::new(db.clone(), gateway(authority), signer, config).unwrap()
}

// =============================================================================
// Seeding
// =============================================================================

pub struct Outlet {
    pub company: Company,
    pub establishment: Establishment,
    pub point_of_sale: PointOfSale,
}

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// File-backed database for tests that need several connections.
pub async fn file_db(dir: &tempfile::TempDir) -> Database {
    Database::new(DbConfig::new(dir.path().join("contingency.db")).max_connections(8))
        .await
        .unwrap()
}

pub async fn seed_company(db: &Database) -> Company {
    db.outlets()
        .create_company(&NewCompany {
            nit: COMPANY_NIT.to_string(),
            nombre: "Comercial El Roble S.A. de C.V.".to_string(),
            nombre_comercial: Some("El Roble".to_string()),
            telefono: "22223333".to_string(),
            correo: "facturas@elroble.sv".to_string(),
        })
        .await
        .unwrap()
}

pub async fn seed_outlet_for(db: &Database, company: &Company, cod_punto_venta: &str) -> Outlet {
    let outlets = db.outlets();
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
            cod_punto_venta: Some(cod_punto_venta.to_string()),
        })
        .await
        .unwrap();

    Outlet {
        company: company.clone(),
        establishment,
        point_of_sale,
    }
}

pub async fn seed_outlet(db: &Database) -> Outlet {
    let company = seed_company(db).await;
    seed_outlet_for(db, &company, "P001").await
}

/// A finalized factura with a freshly allocated numero de control.
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
            fecha_emision: Utc::now().format("%Y-%m-%d").to_string(),
            finalized_at: Utc::now(),
        })
        .await
        .unwrap()
}

pub fn unsigned_payload(doc: &Document) -> String {
    serde_json::json!({
        "identificacion": {
            "codigoGeneracion": doc.codigo_generacion,
            "numeroControl": doc.numero_control,
            "tipoDte": doc.tipo_dte,
        }
    })
    .to_string()
}

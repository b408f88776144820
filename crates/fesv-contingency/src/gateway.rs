//! # Authority Gateway
//!
//! Wraps an [`AuthorityClient`] and a [`CredentialStore`] with per-call
//! deadlines and bounded authentication retry.
//!
//! ## Authentication Retry
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  authenticate ──► Ok(token) ─────────────────────────────► return      │
//! │       │                                                                 │
//! │       ├──► Unavailable / Timeout ──► wait (500ms, 1s, 2s, ... ≤ max)   │
//! │       │                               └── elapsed > max_elapsed ──► Err │
//! │       │                                                                 │
//! │       └──► Unauthorized / Rejected ──────────────────────────► Err      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tokens are not cached here; a caching [`AuthorityClient`] can be supplied
//! by the host.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use fesv_core::authority::{BatchReceipt, BatchResult, DocumentRecord, EventReceipt};
use fesv_core::event::LoteEnvelope;
use fesv_core::Ambiente;

use crate::collaborators::{AuthorityClient, AuthorityError, CredentialError, CredentialStore, Credentials};
use crate::config::ContingencyConfig;
use crate::error::ContingencyResult;

#[derive(Clone)]
pub struct AuthorityGateway {
    client: Arc<dyn AuthorityClient>,
    credentials: Arc<dyn CredentialStore>,
    request_timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_elapsed: Duration,
}

impl AuthorityGateway {
    pub fn new(client: Arc<dyn AuthorityClient>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::from_config(client, credentials, &ContingencyConfig::default())
    }

    pub fn from_config(
        client: Arc<dyn AuthorityClient>,
        credentials: Arc<dyn CredentialStore>,
        config: &ContingencyConfig,
    ) -> Self {
        AuthorityGateway {
            client,
            credentials,
            request_timeout: config.request_timeout(),
            initial_backoff: Duration::from_millis(config.authority.auth_initial_backoff_ms),
            max_backoff: Duration::from_secs(config.authority.auth_max_backoff_secs),
            max_elapsed: Duration::from_secs(config.authority.auth_max_elapsed_secs),
        }
    }

    /// Overrides the deadline of every authority call.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration, max_elapsed: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    // =========================================================================
    // Credentials and Authentication
    // =========================================================================

    pub async fn credentials(&self, company_id: &str) -> ContingencyResult<Credentials> {
        match timeout(self.request_timeout, self.credentials.credentials(company_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CredentialError::Unavailable(format!(
                "lookup for company {company_id} timed out after {:?}",
                self.request_timeout
            ))
            .into()),
        }
    }

    /// Loads the company's credentials and authenticates, retrying transient
    /// failures with exponential backoff.
    pub async fn authenticate(&self, company_id: &str) -> ContingencyResult<String> {
        let credentials = self.credentials(company_id).await?;
        let token = self.authenticate_with(&credentials).await?;
        Ok(token)
    }

    pub async fn authenticate_with(&self, credentials: &Credentials) -> Result<String, AuthorityError> {
        let mut backoff = self.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.call(self.client.authenticate(credentials)).await {
                Ok(token) => {
                    if attempt > 1 {
                        info!(attempt, nit = %credentials.nit, "Authenticated after retries");
                    }
                    return Ok(token);
                }
                Err(e) if e.is_transient() => match backoff.next_backoff() {
                    Some(wait) => {
                        debug!(?wait, attempt, error = %e, "Authentication failed, backing off");
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        warn!(attempt, error = %e, "Authentication retries exhausted");
                        return Err(e);
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "Authentication rejected");
                    return Err(e);
                }
            }
        }
    }

    // =========================================================================
    // Authority Calls
    // =========================================================================

    pub async fn submit_event(
        &self,
        token: &str,
        ambiente: Ambiente,
        signed_event: &str,
    ) -> Result<EventReceipt, AuthorityError> {
        self.call(self.client.submit_event(token, ambiente, signed_event))
            .await
    }

    pub async fn submit_batch(
        &self,
        token: &str,
        envelope: &LoteEnvelope,
    ) -> Result<BatchReceipt, AuthorityError> {
        self.call(self.client.submit_batch(token, envelope)).await
    }

    pub async fn poll_batch(&self, token: &str, codigo_lote: &str) -> Result<BatchResult, AuthorityError> {
        self.call(self.client.poll_batch(token, codigo_lote)).await
    }

    pub async fn query_document(
        &self,
        token: &str,
        nit: &str,
        tipo_dte: &str,
        codigo_generacion: &str,
    ) -> Result<DocumentRecord, AuthorityError> {
        self.call(
            self.client
                .query_document(token, nit, tipo_dte, codigo_generacion),
        )
        .await
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, AuthorityError>
    where
        F: Future<Output = Result<T, AuthorityError>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AuthorityError::Timeout(self.request_timeout)),
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

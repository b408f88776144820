//! # External Collaborators
//!
//! The engine never talks HTTP itself. The signing service, the tax
//! authority's API and the secret store are reached through these traits so
//! the host process decides transport, token caching and secret backends.
//!
//! ```text
//! ┌──────────────────┐    sign(credentials, unsigned)     ┌──────────────┐
//! │                  │ ─────────────────────────────────► │   Signer     │
//! │                  │                                    └──────────────┘
//! │  fesv-contingency│    authenticate / submit_event     ┌──────────────┐
//! │                  │ ─── submit_batch / poll_batch ───► │ Authority-   │
//! │                  │     query_document                 │ Client       │
//! │                  │                                    └──────────────┘
//! │                  │    credentials(company_id)         ┌──────────────┐
//! │                  │ ─────────────────────────────────► │ Credential-  │
//! └──────────────────┘                                    │ Store        │
//!                                                         └──────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use fesv_core::authority::{BatchReceipt, BatchResult, DocumentRecord, EventReceipt};
use fesv_core::event::LoteEnvelope;
use fesv_core::{Ambiente, FailureKind};

// =============================================================================
// Credentials
// =============================================================================

/// Taxpayer credentials used for signing and authority authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub nit: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("nit", &self.nit)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by an [`AuthorityClient`].
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Credentials were refused. Retrying with the same credentials is useless.
    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    /// The queried document does not exist at the authority.
    #[error("DTE {codigo_generacion} not found at the authority")]
    NotFound { codigo_generacion: String },

    /// Network failure or 5xx.
    #[error("Authority unavailable: {0}")]
    Unavailable(String),

    #[error("Authority request timed out after {0:?}")]
    Timeout(Duration),

    /// The authority answered but refused the request.
    #[error("Authority rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid authority response: {0}")]
    InvalidResponse(String),
}

impl AuthorityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthorityError::Unavailable(_) | AuthorityError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthorityError::NotFound { .. })
    }

    /// How the submission pipeline should classify this failure when it
    /// queues a document.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AuthorityError::Unauthorized(_) => FailureKind::HaciendaAuthFailed,
            AuthorityError::Unavailable(_) | AuthorityError::Timeout(_) => {
                FailureKind::HaciendaTimeout
            }
            AuthorityError::NotFound { .. }
            | AuthorityError::Rejected(_)
            | AuthorityError::InvalidResponse(_) => FailureKind::HaciendaRejected,
        }
    }
}

/// Failures reported by a [`Signer`].
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signing service unavailable: {0}")]
    Unavailable(String),

    #[error("Signing timed out after {0:?}")]
    Timeout(Duration),

    /// The signer refused the document (bad certificate, malformed JSON).
    #[error("Signing rejected: {0}")]
    Rejected(String),
}

impl SignerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SignerError::Unavailable(_) | SignerError::Timeout(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::FirmadorFailed
    }
}

/// Failures reported by a [`CredentialStore`].
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credentials stored for company {company_id}")]
    Missing { company_id: String },

    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

impl CredentialError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CredentialError::Unavailable(_))
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Document signing service (firmador).
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs a JSON document, returning the compact JWS.
    async fn sign(&self, credentials: &Credentials, unsigned: &str) -> Result<String, SignerError>;
}

/// Tax authority HTTP client.
///
/// Implementations own the wire format; the engine only sees DTOs.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Exchanges credentials for a bearer token.
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AuthorityError>;

    /// Submits a signed evento de contingencia.
    async fn submit_event(
        &self,
        token: &str,
        ambiente: Ambiente,
        signed_event: &str,
    ) -> Result<EventReceipt, AuthorityError>;

    /// Submits a lote of signed documents.
    async fn submit_batch(
        &self,
        token: &str,
        envelope: &LoteEnvelope,
    ) -> Result<BatchReceipt, AuthorityError>;

    /// Per-document verdicts of a submitted lote.
    async fn poll_batch(&self, token: &str, codigo_lote: &str)
        -> Result<BatchResult, AuthorityError>;

    /// The authority's record of one document.
    ///
    /// Must return [`AuthorityError::NotFound`] when the authority does not
    /// know the document, never a generic error.
    async fn query_document(
        &self,
        token: &str,
        nit: &str,
        tipo_dte: &str,
        codigo_generacion: &str,
    ) -> Result<DocumentRecord, AuthorityError>;
}

/// Secret storage for taxpayer credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, company_id: &str) -> Result<Credentials, CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            nit: "06141203901025".into(),
            password: "s3cret".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("06141203901025"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn test_authority_failure_kinds() {
        assert_eq!(
            AuthorityError::Unauthorized("401".into()).failure_kind(),
            FailureKind::HaciendaAuthFailed
        );
        assert_eq!(
            AuthorityError::Timeout(Duration::from_secs(30)).failure_kind(),
            FailureKind::HaciendaTimeout
        );
        assert_eq!(
            AuthorityError::Rejected("schema".into()).failure_kind(),
            FailureKind::HaciendaRejected
        );
        assert_eq!(
            SignerError::Unavailable("down".into()).failure_kind(),
            FailureKind::FirmadorFailed
        );
    }

    #[test]
    fn test_not_found_is_distinct() {
        let err = AuthorityError::NotFound {
            codigo_generacion: "ABC".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert!(!AuthorityError::Unavailable("x".into()).is_not_found());
    }
}

//! Persistence and collaborator seams consumed by the engine.
//!
//! All I/O is non-blocking: trait methods return `Send` futures so the engine
//! can be driven concurrently for different applications. Implementations may
//! simply use `async fn`.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::certificate::{Certificate, CertificateStatus};
use super::domain::{
    Application, ApplicationId, ApplicationState, CertificateId, PaymentPhaseKind,
};

/// Storage abstraction for the application aggregate.
///
/// `update` carries the version the caller loaded; a stale version must fail
/// with `RepositoryError::VersionConflict` so that concurrent commands against
/// the same application are linearized.
pub trait ApplicationRepository: Send + Sync {
    fn insert(
        &self,
        application: Application,
    ) -> impl Future<Output = Result<Application, RepositoryError>> + Send;

    fn update(
        &self,
        application: Application,
        expected_version: u64,
    ) -> impl Future<Output = Result<Application, RepositoryError>> + Send;

    fn fetch(
        &self,
        id: &ApplicationId,
    ) -> impl Future<Output = Result<Option<Application>, RepositoryError>> + Send;

    fn owned_by(
        &self,
        farmer_id: &str,
    ) -> impl Future<Output = Result<Vec<Application>, RepositoryError>> + Send;

    fn in_state(
        &self,
        state: ApplicationState,
    ) -> impl Future<Output = Result<Vec<Application>, RepositoryError>> + Send;

    /// Applications whose current-state deadline has lapsed.
    fn deadline_passed(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Application>, RepositoryError>> + Send;
}

/// Storage abstraction for issued certificates.
pub trait CertificateStore: Send + Sync {
    fn insert(
        &self,
        certificate: Certificate,
    ) -> impl Future<Output = Result<Certificate, RepositoryError>> + Send;

    /// Replace a stored certificate, guarded by the status the caller read.
    /// A stored status other than `expected_status` must fail with
    /// `RepositoryError::StatusConflict` so concurrent status changes on the
    /// same certificate are linearized.
    fn update(
        &self,
        certificate: Certificate,
        expected_status: CertificateStatus,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn fetch(
        &self,
        id: &CertificateId,
    ) -> impl Future<Output = Result<Option<Certificate>, RepositoryError>> + Send;

    fn find_by_number(
        &self,
        certificate_number: &str,
    ) -> impl Future<Output = Result<Option<Certificate>, RepositoryError>> + Send;

    /// Active certificates whose expiry date falls within `days` of `now`.
    fn expiring_within(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> impl Future<Output = Result<Vec<Certificate>, RepositoryError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("stale aggregate version: expected {expected}, stored {stored}")]
    VersionConflict { expected: u64, stored: u64 },
    #[error("certificate status changed: expected {expected}, stored {stored}")]
    StatusConflict {
        expected: &'static str,
        stored: &'static str,
    },
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Scopes for the yearly sequence counters behind the persisted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    Application,
    Certificate,
    Audit,
}

/// Atomic increment scoped by `(kind, year)`, backed by the persistence layer.
pub trait SequenceCounter: Send + Sync {
    fn next(
        &self,
        kind: SequenceKind,
        year: i32,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Invoice creation request sent to the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub application_number: String,
    pub phase: PaymentPhaseKind,
    pub amount_thb: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub payment_url: String,
}

/// Gateway-side settlement status of an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    Pending,
    Settled { transaction_id: String },
}

pub trait PaymentGateway: Send + Sync {
    fn create_invoice(
        &self,
        request: InvoiceRequest,
    ) -> impl Future<Output = Result<Invoice, CollaboratorError>> + Send;

    fn get_status(
        &self,
        invoice_id: &str,
    ) -> impl Future<Output = Result<GatewayPaymentStatus, CollaboratorError>> + Send;
}

/// Domain events published after a state change is durable. Delivery is
/// at-least-once; consumers must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ApplicationSubmitted {
        application_number: String,
        farmer_id: String,
    },
    RevisionRequested {
        application_number: String,
        attempt: u32,
        reasons: Vec<String>,
    },
    PaymentRequested {
        application_number: String,
        phase: PaymentPhaseKind,
        amount_thb: u32,
        invoice_id: String,
    },
    PaymentConfirmed {
        application_number: String,
        phase: PaymentPhaseKind,
        transaction_id: String,
    },
    InspectionScheduled {
        application_number: String,
        inspector_id: String,
        scheduled_at: DateTime<Utc>,
    },
    AuditAutoCancelled {
        application_number: String,
        audit_number: String,
        critical_failures: usize,
    },
    ApplicationRejected {
        application_number: String,
        reason: String,
    },
    CertificateIssued {
        application_number: String,
        certificate_number: String,
    },
    CertificateRenewed {
        certificate_number: String,
        new_certificate_number: String,
    },
}

/// Outbound notification seam (e-mail, dashboards, line bots).
pub trait EventPublisher: Send + Sync {
    fn publish(
        &self,
        event: DomainEvent,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

pub trait QrService: Send + Sync {
    /// Encode the verification payload, returning an opaque rendering handle.
    fn encode(
        &self,
        payload: &str,
    ) -> impl Future<Output = Result<String, CollaboratorError>> + Send;
}

pub trait PdfService: Send + Sync {
    fn render(
        &self,
        certificate: &Certificate,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

/// Collaborator failures are non-fatal: the engine logs them and reconciles
/// out of band. They never roll back a committed state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator transport unavailable: {0}")]
    Transport(String),
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}

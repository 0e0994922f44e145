//! GACP certification lifecycle: application intake, two-phase payment gates,
//! field-audit scoring, and certificate issuance.
//!
//! The aggregate is the [`domain::Application`]; every mutation flows through
//! the [`engine::WorkflowEngine`], which consults the pure
//! [`state_machine`] for legality before persisting with an optimistic
//! version check.

pub mod audit;
pub mod certificate;
pub mod domain;
pub mod engine;
pub mod memory;
pub mod repository;
pub mod router;
pub mod state_machine;

#[cfg(test)]
mod tests;

pub use audit::{
    calculate_category_score, verdict_for, AuditVerdict, ChecklistAnswer, ChecklistResponse,
    FieldAuditRecord, CRITICAL_FAIL_LIMIT, PASSING_SCORE,
};
pub use certificate::{
    check_renewal_eligibility, verify, Certificate, CertificateIssuer, CertificateStatus,
    RenewalEligibility, VerificationOutcome, DEFAULT_VALIDITY_MONTHS, RENEWAL_WINDOW_DAYS,
};
pub use domain::{
    Actor, Application, ApplicationId, ApplicationState, CertificateId, DocumentCategory,
    DocumentDescriptor, FarmProfile, PaymentPhase, PaymentPhaseKind, PaymentStatus, Role,
};
pub use engine::{EligibilityError, EngineError, SweepReport, WorkflowEngine, WorkflowStatusView};
pub use repository::{
    ApplicationRepository, CertificateStore, CollaboratorError, DomainEvent, EventPublisher,
    GatewayPaymentStatus, Invoice, InvoiceRequest, PaymentGateway, PdfService, QrService,
    RepositoryError, SequenceCounter, SequenceKind,
};
pub use router::certification_router;
pub use state_machine::{
    next_states, transition_table, validate_transition, TransitionContext, TransitionError,
};

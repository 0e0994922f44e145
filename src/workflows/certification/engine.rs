//! The workflow engine orchestrating the certification lifecycle.
//!
//! Every command follows the same pattern: load the aggregate, authorize the
//! requested transition through the state machine, mutate, persist with an
//! optimistic version check, then emit side effects. The engine is the only
//! component that mutates persisted state; collaborator failures after the
//! write never roll back the transition.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CertificationConfig;

use super::audit::{count_major_fails, AuditVerdict, ChecklistResponse, FieldAuditRecord};
use super::audit::format_audit_number;
use super::certificate::{
    check_renewal_eligibility, verify, Certificate, CertificateIssuer, CertificateStatus,
    IssueError, RenewalEligibility, RenewalError, VerificationOutcome,
};
use super::domain::{
    Actor, Application, ApplicationId, ApplicationState, DocumentDescriptor, FarmProfile,
    InspectionRecord, PaymentPhase, PaymentPhaseKind, PaymentStatus, RejectionRecord, Role,
};
use super::repository::{
    ApplicationRepository, CertificateStore, DomainEvent, EventPublisher, GatewayPaymentStatus,
    Invoice, InvoiceRequest, PaymentGateway, PdfService, QrService, RepositoryError,
    SequenceCounter, SequenceKind,
};
use super::state_machine::{self, TransitionContext, TransitionError};

/// Deterministic ineligibility conditions (renewal windows, unpaid phases).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EligibilityError {
    #[error("no {phase} invoice exists for this application")]
    InvoiceMissing { phase: &'static str },
    #[error("the {phase} invoice is already settled")]
    InvoiceAlreadySettled { phase: &'static str },
    #[error("payment gateway has not settled invoice {invoice_id}")]
    GatewayUnsettled { invoice_id: String },
    #[error("certificate is not yet in the renewal window ({days_until_window} days early)")]
    RenewalNotYetEligible { days_until_window: i64 },
    #[error("certificate expired {days_overdue} days ago and can no longer be renewed")]
    RenewalAlreadyExpired { days_overdue: i64 },
    #[error("only an active certificate can be renewed (status is {status})")]
    CertificateNotActive { status: &'static str },
}

/// Typed failure surfaced to callers. Collaborator errors are absent on
/// purpose: they are logged and reconciled asynchronously, never returned.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid command: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error(transparent)]
    NotEligible(#[from] EligibilityError),
    #[error("the application was modified concurrently; reload and retry")]
    ConcurrentModification,
    #[error("record not found")]
    NotFound,
    #[error("persistence failure: {0}")]
    Persistence(RepositoryError),
}

impl EngineError {
    /// Stable machine-readable discriminator for API payloads.
    pub const fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::NotEligible(_) => "not_eligible",
            EngineError::ConcurrentModification => "concurrent_modification",
            EngineError::NotFound => "not_found",
            EngineError::Persistence(_) => "persistence_error",
        }
    }

    /// Whether the caller may retry with fresh aggregate state.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrentModification | EngineError::Persistence(_)
        )
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { .. } | RepositoryError::StatusConflict { .. } => {
                EngineError::ConcurrentModification
            }
            RepositoryError::NotFound => EngineError::NotFound,
            other => EngineError::Persistence(other),
        }
    }
}

impl From<RenewalError> for EngineError {
    fn from(err: RenewalError) -> Self {
        match err {
            RenewalError::NotYetEligible { days_until_window } => {
                EngineError::NotEligible(EligibilityError::RenewalNotYetEligible {
                    days_until_window,
                })
            }
            RenewalError::AlreadyExpired { days_overdue } => {
                EngineError::NotEligible(EligibilityError::RenewalAlreadyExpired { days_overdue })
            }
            RenewalError::NotActive { status } => {
                EngineError::NotEligible(EligibilityError::CertificateNotActive { status })
            }
            RenewalError::Persistence(err) => err.into(),
        }
    }
}

impl From<IssueError> for EngineError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::Persistence(err) => err.into(),
        }
    }
}

/// Read model for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatusView {
    pub application_id: ApplicationId,
    pub application_number: String,
    pub state: &'static str,
    pub next_states: Vec<&'static str>,
    pub progress_percent: u8,
    pub expires_at: Option<DateTime<Utc>>,
    pub can_edit: bool,
    pub payment_required: bool,
    pub revision_count: u32,
}

/// Counts from one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub applications_expired: usize,
    pub certificates_expired: usize,
}

/// Orchestrator for all lifecycle commands.
pub struct WorkflowEngine<R, C, S, G, E, Q, P> {
    repository: Arc<R>,
    certificates: Arc<C>,
    sequences: Arc<S>,
    payments: Arc<G>,
    events: Arc<E>,
    issuer: CertificateIssuer<S, Q, P>,
    config: CertificationConfig,
}

impl<R, C, S, G, E, Q, P> WorkflowEngine<R, C, S, G, E, Q, P>
where
    R: ApplicationRepository,
    C: CertificateStore,
    S: SequenceCounter,
    G: PaymentGateway,
    E: EventPublisher,
    Q: QrService,
    P: PdfService,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<R>,
        certificates: Arc<C>,
        sequences: Arc<S>,
        payments: Arc<G>,
        events: Arc<E>,
        qr: Arc<Q>,
        pdf: Arc<P>,
        config: CertificationConfig,
    ) -> Self {
        let issuer = CertificateIssuer::new(
            sequences.clone(),
            qr,
            pdf,
            config.verify_base_url.clone(),
        );
        Self {
            repository,
            certificates,
            sequences,
            payments,
            events,
            issuer,
            config,
        }
    }

    /// Open a new application in `Draft` for the given farmer.
    pub async fn create_application(
        &self,
        farmer_id: &str,
        farm: FarmProfile,
        documents: Vec<DocumentDescriptor>,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let year = now.year();
        let sequence = self.sequences.next(SequenceKind::Application, year).await?;
        let application_number = format!("GACP-{year}-{sequence:06}");

        // The application number is unique and immutable, so it doubles as
        // the aggregate identifier.
        let application = Application::new(
            ApplicationId(application_number.clone()),
            application_number,
            farmer_id,
            farm,
            documents,
            now,
        );

        let stored = self.repository.insert(application).await?;
        info!(application = %stored.application_number, farmer = farmer_id, "application created");
        Ok(stored)
    }

    /// Farmer submits the dossier for review, from `Draft` or after a
    /// revision request.
    pub async fn submit_application(
        &self,
        id: &ApplicationId,
        actor: &Actor,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;
        self.ensure_owner(&application, actor)?;

        transition(
            &mut application,
            ApplicationState::Submitted,
            actor,
            &TransitionContext::empty(),
            Some("application submitted for review".to_string()),
            now,
        )?;

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::ApplicationSubmitted {
            application_number: stored.application_number.clone(),
            farmer_id: stored.farmer_id.clone(),
        })
        .await;
        Ok(stored)
    }

    /// Reviewer picks up a submitted dossier.
    pub async fn begin_review(
        &self,
        id: &ApplicationId,
        actor: &Actor,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;
        transition(
            &mut application,
            ApplicationState::UnderReview,
            actor,
            &TransitionContext::empty(),
            Some("document review started".to_string()),
            now,
        )?;
        let expected = application.version;
        Ok(self.repository.update(application, expected).await?)
    }

    /// Reviewer approves the dossier; the phase 1 invoice is created and the
    /// application waits at the payment gate.
    ///
    /// Accepts an application still in `Submitted` by stepping it through
    /// `UnderReview` first, so callers that skip the explicit pick-up do not
    /// need two round trips.
    pub async fn approve_for_payment(
        &self,
        id: &ApplicationId,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        if application.state == ApplicationState::Submitted {
            transition(
                &mut application,
                ApplicationState::UnderReview,
                actor,
                &TransitionContext::empty(),
                Some("document review started".to_string()),
                now,
            )?;
        }

        state_machine::validate_transition(
            &application,
            ApplicationState::PaymentPending,
            actor.role,
            &TransitionContext::empty(),
        )?;

        let invoice = self
            .open_invoice(&application, PaymentPhaseKind::Phase1, self.config.phase1_fee_thb)
            .await;
        application.payment_phase1 = Some(PaymentPhase {
            kind: PaymentPhaseKind::Phase1,
            amount_thb: self.config.phase1_fee_thb,
            status: PaymentStatus::Pending,
            invoice_id: invoice.invoice_id.clone(),
            due_at: now + Duration::days(self.config.phase1_due_days),
            paid_at: None,
            transaction_id: None,
        });

        application.enter_state(
            ApplicationState::PaymentPending,
            actor,
            notes.or_else(|| Some("documents approved; phase 1 fee due".to_string())),
            now,
        );

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::PaymentRequested {
            application_number: stored.application_number.clone(),
            phase: PaymentPhaseKind::Phase1,
            amount_thb: self.config.phase1_fee_thb,
            invoice_id: invoice.invoice_id,
        })
        .await;
        Ok(stored)
    }

    /// Reviewer sends the dossier back to the farmer. Exceeding the revision
    /// limit auto-rejects instead.
    pub async fn request_revision(
        &self,
        id: &ApplicationId,
        actor: &Actor,
        reasons: Vec<String>,
        notes: Option<String>,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        if application.revision_count >= self.config.max_revision_attempts {
            return self
                .apply_rejection(
                    application,
                    actor,
                    "maximum revision attempts exceeded".to_string(),
                    true,
                    now,
                )
                .await;
        }

        state_machine::validate_transition(
            &application,
            ApplicationState::RevisionRequired,
            actor.role,
            &TransitionContext::empty(),
        )?;

        application.revision_count += 1;
        let attempt = application.revision_count;
        application.enter_state(
            ApplicationState::RevisionRequired,
            actor,
            notes.or_else(|| {
                Some(format!(
                    "revision requested ({attempt}/{})",
                    self.config.max_revision_attempts
                ))
            }),
            now,
        );

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::RevisionRequested {
            application_number: stored.application_number.clone(),
            attempt,
            reasons,
        })
        .await;
        Ok(stored)
    }

    /// Webhook-driven settlement of a fee invoice. Exactly one of two racing
    /// confirmations can win the version check; the loser must reload.
    pub async fn confirm_payment(
        &self,
        id: &ApplicationId,
        phase: PaymentPhaseKind,
        payment_reference: &str,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        let invoice_id = match application.payment(phase) {
            None => {
                return Err(EligibilityError::InvoiceMissing {
                    phase: phase.label(),
                }
                .into())
            }
            Some(record) if record.is_paid() => {
                return Err(EligibilityError::InvoiceAlreadySettled {
                    phase: phase.label(),
                }
                .into())
            }
            Some(record) => record.invoice_id.clone(),
        };

        // Cross-check the gateway; an unreachable gateway is reconciled out
        // of band and the webhook reference is trusted in the meantime.
        let transaction_id = match self.payments.get_status(&invoice_id).await {
            Ok(GatewayPaymentStatus::Settled { transaction_id }) => transaction_id,
            Ok(GatewayPaymentStatus::Pending) => {
                return Err(EligibilityError::GatewayUnsettled { invoice_id }.into());
            }
            Err(err) => {
                warn!(%invoice_id, error = %err, "payment gateway status lookup failed");
                payment_reference.to_string()
            }
        };

        let target = match phase {
            PaymentPhaseKind::Phase1 => ApplicationState::PaymentVerified,
            PaymentPhaseKind::Phase2 => ApplicationState::Phase2PaymentVerified,
        };
        let actor = Actor::system();
        state_machine::validate_transition(
            &application,
            target,
            actor.role,
            &TransitionContext::with_payment_reference(payment_reference),
        )?;

        if let Some(record) = application.payment_mut(phase) {
            record.status = PaymentStatus::Paid;
            record.paid_at = Some(now);
            record.transaction_id = Some(transaction_id.clone());
        }
        application.enter_state(
            target,
            &actor,
            Some(format!("{} fee confirmed ({transaction_id})", phase.label())),
            now,
        );

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::PaymentConfirmed {
            application_number: stored.application_number.clone(),
            phase,
            transaction_id,
        })
        .await;
        Ok(stored)
    }

    /// Inspector books the on-site audit.
    pub async fn schedule_inspection(
        &self,
        id: &ApplicationId,
        actor: &Actor,
        scheduled_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        state_machine::validate_transition(
            &application,
            ApplicationState::InspectionScheduled,
            actor.role,
            &TransitionContext::empty(),
        )?;

        application.inspection = Some(InspectionRecord {
            inspector_id: actor.id.clone(),
            scheduled_at,
            completed_at: None,
            notes,
        });
        application.enter_state(
            ApplicationState::InspectionScheduled,
            actor,
            Some(format!("inspection scheduled for {scheduled_at}")),
            now,
        );

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::InspectionScheduled {
            application_number: stored.application_number.clone(),
            inspector_id: actor.id.clone(),
            scheduled_at,
        })
        .await;
        Ok(stored)
    }

    /// Inspector submits the checklist; the audit record is scored and closed
    /// in one step. A failing or auto-cancelled audit rejects the application
    /// immediately, regardless of the aggregate score in the auto-cancel case.
    pub async fn complete_inspection(
        &self,
        id: &ApplicationId,
        actor: &Actor,
        responses: Vec<ChecklistResponse>,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        state_machine::validate_transition(
            &application,
            ApplicationState::InspectionCompleted,
            actor.role,
            &TransitionContext::empty(),
        )?;

        let year = now.year();
        let sequence = self.sequences.next(SequenceKind::Audit, year).await?;
        let opened_at = application
            .inspection
            .as_ref()
            .map(|record| record.scheduled_at)
            .unwrap_or(now);
        let audit = FieldAuditRecord::closed(
            format_audit_number(year, sequence),
            actor.id.clone(),
            responses,
            opened_at,
            now,
        );
        let verdict = audit.verdict;
        let score = audit.category_score;
        let audit_number = audit.audit_number.clone();
        let critical_failures = count_major_fails(&audit.responses);

        if let Some(inspection) = application.inspection.as_mut() {
            inspection.completed_at = Some(now);
        }
        application.audit = Some(audit);
        application.enter_state(
            ApplicationState::InspectionCompleted,
            actor,
            Some(format!(
                "inspection completed: verdict {}, score {score:.1}",
                verdict.label()
            )),
            now,
        );

        let mut events = Vec::new();
        match verdict {
            AuditVerdict::Pass => {}
            AuditVerdict::Fail | AuditVerdict::AutoCancel => {
                let reason = match verdict {
                    AuditVerdict::AutoCancel => format!(
                        "field audit auto-cancelled: {critical_failures} critical failures"
                    ),
                    _ => format!("field audit failed with score {score:.1}"),
                };
                if verdict == AuditVerdict::AutoCancel {
                    events.push(DomainEvent::AuditAutoCancelled {
                        application_number: application.application_number.clone(),
                        audit_number,
                        critical_failures,
                    });
                }
                state_machine::validate_transition(
                    &application,
                    ApplicationState::Rejected,
                    actor.role,
                    &TransitionContext::empty(),
                )?;
                application.rejection = Some(RejectionRecord {
                    rejected_by: actor.id.clone(),
                    rejected_at: now,
                    reason: reason.clone(),
                    stage: application.state,
                    auto_rejection: true,
                });
                application.enter_state(
                    ApplicationState::Rejected,
                    actor,
                    Some(reason.clone()),
                    now,
                );
                events.push(DomainEvent::ApplicationRejected {
                    application_number: application.application_number.clone(),
                    reason,
                });
            }
        }

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        for event in events {
            self.publish(event).await;
        }
        Ok(stored)
    }

    /// Bill the field-inspection fee after a passing audit.
    pub async fn request_phase2_payment(
        &self,
        id: &ApplicationId,
        actor: &Actor,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        state_machine::validate_transition(
            &application,
            ApplicationState::Phase2PaymentPending,
            actor.role,
            &TransitionContext::empty(),
        )?;

        let invoice = self
            .open_invoice(&application, PaymentPhaseKind::Phase2, self.config.phase2_fee_thb)
            .await;
        application.payment_phase2 = Some(PaymentPhase {
            kind: PaymentPhaseKind::Phase2,
            amount_thb: self.config.phase2_fee_thb,
            status: PaymentStatus::Pending,
            invoice_id: invoice.invoice_id.clone(),
            due_at: now + Duration::days(self.config.phase2_due_days),
            paid_at: None,
            transaction_id: None,
        });
        application.enter_state(
            ApplicationState::Phase2PaymentPending,
            actor,
            Some("phase 2 fee due".to_string()),
            now,
        );

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::PaymentRequested {
            application_number: stored.application_number.clone(),
            phase: PaymentPhaseKind::Phase2,
            amount_thb: self.config.phase2_fee_thb,
            invoice_id: invoice.invoice_id,
        })
        .await;
        Ok(stored)
    }

    /// Admin grants final approval; the certificate is issued and the
    /// application reaches its successful terminal state in one durable write.
    pub async fn final_approval(
        &self,
        id: &ApplicationId,
        actor: &Actor,
        signature: &str,
        notes: Option<String>,
    ) -> Result<(Application, Certificate), EngineError> {
        let now = Utc::now();
        let mut application = self.load(id).await?;

        transition(
            &mut application,
            ApplicationState::Approved,
            actor,
            &TransitionContext::with_approver_signature(signature),
            notes.or_else(|| Some("approved for certificate issuance".to_string())),
            now,
        )?;

        let certificate = self
            .issuer
            .generate(&application, &actor.id, self.config.validity_months, now)
            .await?;
        application.certificate_id = Some(certificate.id.clone());

        transition(
            &mut application,
            ApplicationState::CertificateIssued,
            &Actor::system(),
            &TransitionContext::empty(),
            Some(format!("certificate {} issued", certificate.certificate_number)),
            now,
        )?;

        // The version-checked aggregate update is the commit point; the
        // certificate is stored only once this application owns the win.
        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        let certificate = self.certificates.insert(certificate).await?;
        self.publish(DomainEvent::CertificateIssued {
            application_number: stored.application_number.clone(),
            certificate_number: certificate.certificate_number.clone(),
        })
        .await;
        Ok((stored, certificate))
    }

    /// DTAM staff rejects an application at any non-terminal stage.
    pub async fn reject_application(
        &self,
        id: &ApplicationId,
        actor: &Actor,
        reason: String,
    ) -> Result<Application, EngineError> {
        let now = Utc::now();
        let application = self.load(id).await?;
        self.apply_rejection(application, actor, reason, false, now)
            .await
    }

    /// Renew an active certificate inside the 90-day pre-expiry window.
    pub async fn renew_certificate(
        &self,
        certificate_number: &str,
        actor: &Actor,
        validity_months: Option<u32>,
    ) -> Result<Certificate, EngineError> {
        let now = Utc::now();
        let existing = self
            .certificates
            .find_by_number(certificate_number)
            .await?
            .ok_or(EngineError::NotFound)?;

        let months = validity_months.unwrap_or(self.config.validity_months);
        let (superseded, successor) = self.issuer.renew(&existing, &actor.id, months, now).await?;

        // Only the caller that flips the existing record from Active to
        // Renewed may store a successor.
        self.certificates
            .update(superseded, CertificateStatus::Active)
            .await?;
        let successor = self.certificates.insert(successor).await?;

        info!(
            certificate = certificate_number,
            successor = %successor.certificate_number,
            "certificate renewed"
        );
        self.publish(DomainEvent::CertificateRenewed {
            certificate_number: certificate_number.to_string(),
            new_certificate_number: successor.certificate_number.clone(),
        })
        .await;
        Ok(successor)
    }

    /// Read-only renewal window check.
    pub async fn renewal_eligibility(
        &self,
        certificate_number: &str,
    ) -> Result<RenewalEligibility, EngineError> {
        let certificate = self
            .certificates
            .find_by_number(certificate_number)
            .await?
            .ok_or(EngineError::NotFound)?;
        Ok(check_renewal_eligibility(&certificate, Utc::now()))
    }

    /// Public verification lookup; unknown numbers report invalid rather
    /// than erroring, so the endpoint leaks nothing.
    pub async fn verify_certificate(
        &self,
        certificate_number: &str,
        code: &str,
    ) -> Result<VerificationOutcome, EngineError> {
        match self
            .certificates
            .find_by_number(certificate_number)
            .await?
        {
            Some(certificate) => Ok(verify(&certificate, code, Utc::now())),
            None => Ok(VerificationOutcome::unknown()),
        }
    }

    pub async fn get(&self, id: &ApplicationId) -> Result<Application, EngineError> {
        self.load(id).await
    }

    /// Aggregate status for API responses and dashboards.
    pub async fn workflow_status(
        &self,
        id: &ApplicationId,
    ) -> Result<WorkflowStatusView, EngineError> {
        let application = self.load(id).await?;
        let state = application.state;
        Ok(WorkflowStatusView {
            application_id: application.id.clone(),
            application_number: application.application_number.clone(),
            state: state.label(),
            next_states: state_machine::next_states(state)
                .into_iter()
                .map(ApplicationState::label)
                .collect(),
            progress_percent: progress_percent(state),
            expires_at: application.expires_at,
            can_edit: matches!(
                state,
                ApplicationState::Draft | ApplicationState::RevisionRequired
            ),
            payment_required: matches!(
                state,
                ApplicationState::PaymentPending | ApplicationState::Phase2PaymentPending
            ),
            revision_count: application.revision_count,
        })
    }

    /// Expire applications whose state deadline lapsed and certificates past
    /// their expiry date. Driven by an external periodic trigger; each expiry
    /// is an ordinary transition, and version conflicts are skipped so a
    /// racing command wins.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let actor = Actor::system();

        for mut application in self.repository.deadline_passed(now).await? {
            if state_machine::validate_transition(
                &application,
                ApplicationState::Expired,
                actor.role,
                &TransitionContext::empty(),
            )
            .is_err()
            {
                continue;
            }

            for kind in [PaymentPhaseKind::Phase1, PaymentPhaseKind::Phase2] {
                if let Some(record) = application.payment_mut(kind) {
                    if record.is_overdue(now) {
                        record.status = PaymentStatus::Expired;
                    }
                }
            }
            application.enter_state(
                ApplicationState::Expired,
                &actor,
                Some("state deadline lapsed".to_string()),
                now,
            );

            let expected = application.version;
            match self.repository.update(application, expected).await {
                Ok(_) => report.applications_expired += 1,
                Err(RepositoryError::VersionConflict { .. }) => {
                    // A concurrent command advanced the aggregate first.
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        for mut certificate in self.certificates.expiring_within(now, 0).await? {
            if certificate.status != CertificateStatus::Active {
                continue;
            }
            certificate.status = CertificateStatus::Expired;
            match self
                .certificates
                .update(certificate, CertificateStatus::Active)
                .await
            {
                Ok(()) => report.certificates_expired += 1,
                Err(RepositoryError::StatusConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(report)
    }

    async fn load(&self, id: &ApplicationId) -> Result<Application, EngineError> {
        self.repository
            .fetch(id)
            .await?
            .ok_or(EngineError::NotFound)
    }

    fn ensure_owner(&self, application: &Application, actor: &Actor) -> Result<(), EngineError> {
        if actor.role == Role::Farmer && actor.id != application.farmer_id {
            return Err(EngineError::Validation(
                "only the owning farmer may act on this application".to_string(),
            ));
        }
        Ok(())
    }

    async fn apply_rejection(
        &self,
        mut application: Application,
        actor: &Actor,
        reason: String,
        auto_rejection: bool,
        now: DateTime<Utc>,
    ) -> Result<Application, EngineError> {
        state_machine::validate_transition(
            &application,
            ApplicationState::Rejected,
            actor.role,
            &TransitionContext::empty(),
        )?;

        application.rejection = Some(RejectionRecord {
            rejected_by: actor.id.clone(),
            rejected_at: now,
            reason: reason.clone(),
            stage: application.state,
            auto_rejection,
        });
        application.enter_state(ApplicationState::Rejected, actor, Some(reason.clone()), now);

        let expected = application.version;
        let stored = self.repository.update(application, expected).await?;
        self.publish(DomainEvent::ApplicationRejected {
            application_number: stored.application_number.clone(),
            reason,
        })
        .await;
        Ok(stored)
    }

    /// Invoice creation is best effort: a gateway outage falls back to a
    /// locally derived invoice id and billing is reconciled out of band.
    async fn open_invoice(
        &self,
        application: &Application,
        phase: PaymentPhaseKind,
        amount_thb: u32,
    ) -> Invoice {
        let request = InvoiceRequest {
            application_number: application.application_number.clone(),
            phase,
            amount_thb,
            description: format!(
                "GACP certification {} fee - {}",
                phase.label(),
                application.application_number
            ),
        };
        match self.payments.create_invoice(request).await {
            Ok(invoice) => invoice,
            Err(err) => {
                warn!(
                    application = %application.application_number,
                    phase = phase.label(),
                    error = %err,
                    "invoice creation failed; falling back to local invoice id"
                );
                Invoice {
                    invoice_id: format!(
                        "INV-{}-{}",
                        application.application_number,
                        phase.label()
                    ),
                    payment_url: String::new(),
                }
            }
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.events.publish(event).await {
            warn!(error = %err, "event publisher failed; delivery reconciled out of band");
        }
    }
}

/// Validate, then record the state change on the aggregate.
fn transition(
    application: &mut Application,
    to_state: ApplicationState,
    actor: &Actor,
    context: &TransitionContext<'_>,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    state_machine::validate_transition(application, to_state, actor.role, context)?;
    let from = application.state;
    application.enter_state(to_state, actor, notes, now);
    info!(
        application = %application.application_number,
        from = from.label(),
        to = to_state.label(),
        actor = actor.role.label(),
        "state transition"
    );
    Ok(())
}

/// Coarse completion estimate shown to applicants.
fn progress_percent(state: ApplicationState) -> u8 {
    match state {
        ApplicationState::Draft => 5,
        ApplicationState::Submitted => 10,
        ApplicationState::RevisionRequired => 15,
        ApplicationState::UnderReview => 20,
        ApplicationState::PaymentPending => 30,
        ApplicationState::PaymentVerified => 40,
        ApplicationState::InspectionScheduled => 50,
        ApplicationState::InspectionCompleted => 60,
        ApplicationState::Phase2PaymentPending => 70,
        ApplicationState::Phase2PaymentVerified => 80,
        ApplicationState::Approved => 90,
        ApplicationState::CertificateIssued => 100,
        ApplicationState::Rejected | ApplicationState::Expired => 0,
    }
}

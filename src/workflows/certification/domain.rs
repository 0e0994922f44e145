use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::FieldAuditRecord;

/// Identifier wrapper for certification applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier wrapper for issued certificates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId(pub String);

/// Actor resolved by the authentication layer before a command reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// The synthetic actor used for webhook- and sweep-driven transitions.
    pub fn system() -> Self {
        Self::new("system", Role::System)
    }
}

/// Roles allowed to drive lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Farmer,
    DtamReviewer,
    DtamInspector,
    DtamAdmin,
    System,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Farmer => "FARMER",
            Role::DtamReviewer => "DTAM_REVIEWER",
            Role::DtamInspector => "DTAM_INSPECTOR",
            Role::DtamAdmin => "DTAM_ADMIN",
            Role::System => "SYSTEM",
        }
    }

    /// DTAM staff roles may reject an application at any non-terminal stage.
    pub const fn is_staff(self) -> bool {
        matches!(
            self,
            Role::DtamReviewer | Role::DtamInspector | Role::DtamAdmin
        )
    }
}

/// Legal status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    Draft,
    Submitted,
    UnderReview,
    RevisionRequired,
    PaymentPending,
    PaymentVerified,
    InspectionScheduled,
    InspectionCompleted,
    Phase2PaymentPending,
    Phase2PaymentVerified,
    Approved,
    CertificateIssued,
    Rejected,
    Expired,
}

impl ApplicationState {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationState::Draft => "draft",
            ApplicationState::Submitted => "submitted",
            ApplicationState::UnderReview => "under_review",
            ApplicationState::RevisionRequired => "revision_required",
            ApplicationState::PaymentPending => "payment_pending",
            ApplicationState::PaymentVerified => "payment_verified",
            ApplicationState::InspectionScheduled => "inspection_scheduled",
            ApplicationState::InspectionCompleted => "inspection_completed",
            ApplicationState::Phase2PaymentPending => "phase2_payment_pending",
            ApplicationState::Phase2PaymentVerified => "phase2_payment_verified",
            ApplicationState::Approved => "approved",
            ApplicationState::CertificateIssued => "certificate_issued",
            ApplicationState::Rejected => "rejected",
            ApplicationState::Expired => "expired",
        }
    }

    /// Terminal states never transition again, except `CertificateIssued`,
    /// which the expiry sweep may still move to `Expired`.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationState::CertificateIssued
                | ApplicationState::Rejected
                | ApplicationState::Expired
        )
    }

    /// Days an application may sit in this state before the sweep expires it.
    pub const fn timeout_days(self) -> Option<i64> {
        match self {
            ApplicationState::Draft => Some(30),
            ApplicationState::Submitted => Some(3),
            ApplicationState::UnderReview => Some(14),
            ApplicationState::RevisionRequired => Some(30),
            ApplicationState::PaymentPending => Some(7),
            ApplicationState::PaymentVerified => Some(14),
            ApplicationState::InspectionScheduled => Some(30),
            ApplicationState::InspectionCompleted => Some(7),
            ApplicationState::Phase2PaymentPending => Some(14),
            ApplicationState::Phase2PaymentVerified => Some(14),
            ApplicationState::Approved => Some(1),
            ApplicationState::CertificateIssued
            | ApplicationState::Rejected
            | ApplicationState::Expired => None,
        }
    }

    pub const fn all() -> &'static [ApplicationState] {
        &[
            ApplicationState::Draft,
            ApplicationState::Submitted,
            ApplicationState::UnderReview,
            ApplicationState::RevisionRequired,
            ApplicationState::PaymentPending,
            ApplicationState::PaymentVerified,
            ApplicationState::InspectionScheduled,
            ApplicationState::InspectionCompleted,
            ApplicationState::Phase2PaymentPending,
            ApplicationState::Phase2PaymentVerified,
            ApplicationState::Approved,
            ApplicationState::CertificateIssued,
            ApplicationState::Rejected,
            ApplicationState::Expired,
        ]
    }
}

/// The two fee gates of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPhaseKind {
    Phase1,
    Phase2,
}

impl PaymentPhaseKind {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentPhaseKind::Phase1 => "phase1",
            PaymentPhaseKind::Phase2 => "phase2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
}

/// One fee invoice attached to the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPhase {
    pub kind: PaymentPhaseKind,
    pub amount_thb: u32,
    pub status: PaymentStatus,
    pub invoice_id: String,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
}

impl PaymentPhase {
    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && self.due_at < now
    }
}

/// Scheduling metadata for the on-site audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub inspector_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Append-only audit-trail entry written on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub actor_id: String,
    pub actor_role: Role,
    pub state: ApplicationState,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Recorded when an application reaches `Rejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub rejected_by: String,
    pub rejected_at: DateTime<Utc>,
    pub reason: String,
    /// State the application held when it was rejected.
    pub stage: ApplicationState,
    pub auto_rejection: bool,
}

/// Snapshot of the farm taken at application time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmProfile {
    pub farm_name: String,
    pub owner_name: String,
    pub province: String,
    pub crop: String,
    pub area_rai: f32,
}

/// Metadata for an uploaded dossier document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub name: String,
    pub category: DocumentCategory,
    pub storage_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    LandDeed,
    WaterTestReport,
    CultivationPlan,
    Identification,
    Misc,
}

/// The central aggregate. Mutated exclusively through `WorkflowEngine`
/// commands and never hard-deleted; terminal states preserve the trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub application_number: String,
    pub farmer_id: String,
    pub farm: FarmProfile,
    pub documents: Vec<DocumentDescriptor>,
    pub state: ApplicationState,
    /// Optimistic-lock token; bumped by the repository on every update.
    pub version: u64,
    pub payment_phase1: Option<PaymentPhase>,
    pub payment_phase2: Option<PaymentPhase>,
    pub inspection: Option<InspectionRecord>,
    pub audit: Option<FieldAuditRecord>,
    pub review_history: Vec<HistoryEntry>,
    pub revision_count: u32,
    pub rejection: Option<RejectionRecord>,
    pub certificate_id: Option<CertificateId>,
    /// Deadline for the current state, driven by `ApplicationState::timeout_days`.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(
        id: ApplicationId,
        application_number: String,
        farmer_id: impl Into<String>,
        farm: FarmProfile,
        documents: Vec<DocumentDescriptor>,
        now: DateTime<Utc>,
    ) -> Self {
        let farmer_id = farmer_id.into();
        let expires_at = ApplicationState::Draft
            .timeout_days()
            .map(|days| now + chrono::Duration::days(days));

        Self {
            id,
            application_number,
            farmer_id: farmer_id.clone(),
            farm,
            documents,
            state: ApplicationState::Draft,
            version: 0,
            payment_phase1: None,
            payment_phase2: None,
            inspection: None,
            audit: None,
            review_history: vec![HistoryEntry {
                actor_id: farmer_id,
                actor_role: Role::Farmer,
                state: ApplicationState::Draft,
                at: now,
                notes: Some("application created".to_string()),
            }],
            revision_count: 0,
            rejection: None,
            certificate_id: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn payment(&self, kind: PaymentPhaseKind) -> Option<&PaymentPhase> {
        match kind {
            PaymentPhaseKind::Phase1 => self.payment_phase1.as_ref(),
            PaymentPhaseKind::Phase2 => self.payment_phase2.as_ref(),
        }
    }

    pub fn payment_mut(&mut self, kind: PaymentPhaseKind) -> Option<&mut PaymentPhase> {
        match kind {
            PaymentPhaseKind::Phase1 => self.payment_phase1.as_mut(),
            PaymentPhaseKind::Phase2 => self.payment_phase2.as_mut(),
        }
    }

    pub fn phase1_paid(&self) -> bool {
        self.payment_phase1
            .as_ref()
            .is_some_and(PaymentPhase::is_paid)
    }

    pub fn phase2_paid(&self) -> bool {
        self.payment_phase2
            .as_ref()
            .is_some_and(PaymentPhase::is_paid)
    }

    /// Whether the state deadline has lapsed.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && self.expires_at.is_some_and(|deadline| deadline < now)
    }

    /// Record the entry into `state`, refreshing the deadline and trail.
    pub(crate) fn enter_state(
        &mut self,
        state: ApplicationState,
        actor: &Actor,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.state = state;
        self.expires_at = state
            .timeout_days()
            .map(|days| now + chrono::Duration::days(days));
        self.review_history.push(HistoryEntry {
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            state,
            at: now,
            notes,
        });
        self.updated_at = now;
    }
}

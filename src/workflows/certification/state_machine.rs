//! Legal-move validation for the application lifecycle.
//!
//! Every permitted transition is an entry in a declarative edge table keyed
//! by `(from, to)` and tagged with the roles allowed to drive it, followed by
//! named guard predicates. Edges not enumerated are illegal; the check fails
//! closed. The module is pure: it returns a decision and never mutates the
//! aggregate.

use thiserror::Error;

use super::audit::AuditVerdict;
use super::domain::{Application, ApplicationState, Role};

/// Command-scoped facts that cannot be read off the aggregate itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub payment_reference: Option<&'a str>,
    pub approver_signature: Option<&'a str>,
}

impl<'a> TransitionContext<'a> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_payment_reference(reference: &'a str) -> Self {
        Self {
            payment_reference: Some(reference),
            ..Self::default()
        }
    }

    pub fn with_approver_signature(signature: &'a str) -> Self {
        Self {
            approver_signature: Some(signature),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot transition from {from} to {to}")]
    UnknownEdge {
        from: &'static str,
        to: &'static str,
    },
    #[error("role {role} may not move an application from {from} to {to}")]
    RoleNotPermitted {
        role: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("required documents must be uploaded before submission")]
    MissingDocuments,
    #[error("a payment reference is required to verify a fee payment")]
    MissingPaymentReference,
    #[error("the phase 1 fee must be settled before the phase 2 fee")]
    Phase1Unpaid,
    #[error("a closed field audit with a passing verdict is required for approval")]
    AuditNotPassed,
    #[error("an approver signature is required for final approval")]
    MissingApproverSignature,
}

struct Edge {
    from: ApplicationState,
    to: ApplicationState,
    roles: &'static [Role],
}

/// The enumerable legal-move set. Rejection and expiry are blanket rules
/// handled in `validate_transition` rather than rows here: any DTAM role may
/// reject a non-terminal application, and only the system expires one.
static EDGES: &[Edge] = &[
    Edge {
        from: ApplicationState::Draft,
        to: ApplicationState::Submitted,
        roles: &[Role::Farmer],
    },
    Edge {
        from: ApplicationState::RevisionRequired,
        to: ApplicationState::Submitted,
        roles: &[Role::Farmer],
    },
    Edge {
        from: ApplicationState::Submitted,
        to: ApplicationState::UnderReview,
        roles: &[Role::DtamReviewer, Role::DtamAdmin, Role::System],
    },
    Edge {
        from: ApplicationState::UnderReview,
        to: ApplicationState::PaymentPending,
        roles: &[Role::DtamReviewer, Role::DtamAdmin],
    },
    Edge {
        from: ApplicationState::UnderReview,
        to: ApplicationState::RevisionRequired,
        roles: &[Role::DtamReviewer, Role::DtamAdmin],
    },
    Edge {
        from: ApplicationState::PaymentPending,
        to: ApplicationState::PaymentVerified,
        roles: &[Role::System],
    },
    Edge {
        from: ApplicationState::PaymentVerified,
        to: ApplicationState::InspectionScheduled,
        roles: &[Role::DtamInspector, Role::DtamAdmin],
    },
    Edge {
        from: ApplicationState::InspectionScheduled,
        to: ApplicationState::InspectionCompleted,
        roles: &[Role::DtamInspector],
    },
    Edge {
        from: ApplicationState::InspectionCompleted,
        to: ApplicationState::Phase2PaymentPending,
        roles: &[Role::DtamReviewer, Role::DtamAdmin, Role::System],
    },
    Edge {
        from: ApplicationState::InspectionCompleted,
        to: ApplicationState::Approved,
        roles: &[Role::DtamAdmin],
    },
    Edge {
        from: ApplicationState::Phase2PaymentPending,
        to: ApplicationState::Phase2PaymentVerified,
        roles: &[Role::System],
    },
    Edge {
        from: ApplicationState::Phase2PaymentVerified,
        to: ApplicationState::InspectionScheduled,
        roles: &[Role::DtamInspector, Role::DtamAdmin],
    },
    Edge {
        from: ApplicationState::Phase2PaymentVerified,
        to: ApplicationState::Approved,
        roles: &[Role::DtamAdmin],
    },
    Edge {
        from: ApplicationState::Approved,
        to: ApplicationState::CertificateIssued,
        roles: &[Role::System],
    },
];

/// Decide whether moving `application` to `to_state` is legal for `role`.
pub fn validate_transition(
    application: &Application,
    to_state: ApplicationState,
    role: Role,
    context: &TransitionContext<'_>,
) -> Result<(), TransitionError> {
    let from = application.state;

    match to_state {
        // Only the sweep expires applications; Rejected and Expired stay put.
        ApplicationState::Expired => {
            if matches!(
                from,
                ApplicationState::Rejected | ApplicationState::Expired
            ) {
                return Err(unknown_edge(from, to_state));
            }
            if role != Role::System {
                return Err(role_not_permitted(role, from, to_state));
            }
            return Ok(());
        }
        // Any DTAM role may reject an application that is not yet terminal.
        ApplicationState::Rejected => {
            if from.is_terminal() {
                return Err(unknown_edge(from, to_state));
            }
            if !(role.is_staff() || role == Role::System) {
                return Err(role_not_permitted(role, from, to_state));
            }
            return Ok(());
        }
        _ => {}
    }

    let edge = EDGES
        .iter()
        .find(|edge| edge.from == from && edge.to == to_state)
        .ok_or_else(|| unknown_edge(from, to_state))?;

    if !edge.roles.contains(&role) {
        return Err(role_not_permitted(role, from, to_state));
    }

    check_guards(application, to_state, context)
}

/// Guard predicates checked after the edge and role checks.
fn check_guards(
    application: &Application,
    to_state: ApplicationState,
    context: &TransitionContext<'_>,
) -> Result<(), TransitionError> {
    match to_state {
        ApplicationState::Submitted => {
            if application.documents.is_empty() {
                return Err(TransitionError::MissingDocuments);
            }
        }
        ApplicationState::PaymentVerified => {
            if context.payment_reference.is_none() {
                return Err(TransitionError::MissingPaymentReference);
            }
        }
        ApplicationState::Phase2PaymentVerified => {
            if context.payment_reference.is_none() {
                return Err(TransitionError::MissingPaymentReference);
            }
            if !application.phase1_paid() {
                return Err(TransitionError::Phase1Unpaid);
            }
        }
        ApplicationState::Approved => {
            let passed = application
                .audit
                .as_ref()
                .is_some_and(|audit| audit.verdict == AuditVerdict::Pass);
            if !passed {
                return Err(TransitionError::AuditNotPassed);
            }
            if context.approver_signature.is_none() {
                return Err(TransitionError::MissingApproverSignature);
            }
        }
        _ => {}
    }

    Ok(())
}

/// States reachable from `from` for any role, blanket rules included.
pub fn next_states(from: ApplicationState) -> Vec<ApplicationState> {
    let mut states: Vec<ApplicationState> = EDGES
        .iter()
        .filter(|edge| edge.from == from)
        .map(|edge| edge.to)
        .collect();

    if !from.is_terminal() {
        states.push(ApplicationState::Rejected);
        states.push(ApplicationState::Expired);
    } else if from == ApplicationState::CertificateIssued {
        states.push(ApplicationState::Expired);
    }

    states
}

/// The explicit rows of the edge table, for summaries and exhaustive tests.
pub fn transition_table() -> impl Iterator<Item = (ApplicationState, ApplicationState, &'static [Role])>
{
    EDGES.iter().map(|edge| (edge.from, edge.to, edge.roles))
}

fn unknown_edge(from: ApplicationState, to: ApplicationState) -> TransitionError {
    TransitionError::UnknownEdge {
        from: from.label(),
        to: to.label(),
    }
}

fn role_not_permitted(role: Role, from: ApplicationState, to: ApplicationState) -> TransitionError {
    TransitionError::RoleNotPermitted {
        role: role.label(),
        from: from.label(),
        to: to.label(),
    }
}

use super::common::*;

use chrono::Utc;

use crate::workflows::certification::audit::FieldAuditRecord;
use crate::workflows::certification::domain::{ApplicationState, PaymentPhase, PaymentPhaseKind, PaymentStatus, Role};
use crate::workflows::certification::state_machine::{
    next_states, transition_table, validate_transition, TransitionContext, TransitionError,
};

fn paid_phase(kind: PaymentPhaseKind) -> PaymentPhase {
    let now = Utc::now();
    PaymentPhase {
        kind,
        amount_thb: 5_000,
        status: PaymentStatus::Paid,
        invoice_id: "GW-GACP-2026-000042-phase1".to_string(),
        due_at: now,
        paid_at: Some(now),
        transaction_id: Some("TXN-1".to_string()),
    }
}

#[test]
fn farmer_submits_a_draft_with_documents() {
    let application = application_in(ApplicationState::Draft);
    let result = validate_transition(
        &application,
        ApplicationState::Submitted,
        Role::Farmer,
        &TransitionContext::empty(),
    );
    assert_eq!(result, Ok(()));
}

#[test]
fn submission_requires_documents() {
    let mut application = application_in(ApplicationState::Draft);
    application.documents.clear();
    let result = validate_transition(
        &application,
        ApplicationState::Submitted,
        Role::Farmer,
        &TransitionContext::empty(),
    );
    assert_eq!(result, Err(TransitionError::MissingDocuments));
}

#[test]
fn farmer_cannot_begin_review() {
    let application = application_in(ApplicationState::Submitted);
    let result = validate_transition(
        &application,
        ApplicationState::UnderReview,
        Role::Farmer,
        &TransitionContext::empty(),
    );
    assert!(matches!(
        result,
        Err(TransitionError::RoleNotPermitted { role: "FARMER", .. })
    ));
}

#[test]
fn draft_cannot_jump_to_approval() {
    let application = application_in(ApplicationState::Draft);
    let result = validate_transition(
        &application,
        ApplicationState::Approved,
        Role::DtamAdmin,
        &TransitionContext::with_approver_signature("sig"),
    );
    assert!(matches!(result, Err(TransitionError::UnknownEdge { .. })));
}

#[test]
fn payment_verification_requires_a_reference() {
    let application = application_in(ApplicationState::PaymentPending);
    let result = validate_transition(
        &application,
        ApplicationState::PaymentVerified,
        Role::System,
        &TransitionContext::empty(),
    );
    assert_eq!(result, Err(TransitionError::MissingPaymentReference));

    let result = validate_transition(
        &application,
        ApplicationState::PaymentVerified,
        Role::System,
        &TransitionContext::with_payment_reference("BANK-REF"),
    );
    assert_eq!(result, Ok(()));
}

#[test]
fn phase2_verification_requires_settled_phase1() {
    let mut application = application_in(ApplicationState::Phase2PaymentPending);
    let context = TransitionContext::with_payment_reference("BANK-REF");

    let result = validate_transition(
        &application,
        ApplicationState::Phase2PaymentVerified,
        Role::System,
        &context,
    );
    assert_eq!(result, Err(TransitionError::Phase1Unpaid));

    application.payment_phase1 = Some(paid_phase(PaymentPhaseKind::Phase1));
    let result = validate_transition(
        &application,
        ApplicationState::Phase2PaymentVerified,
        Role::System,
        &context,
    );
    assert_eq!(result, Ok(()));
}

#[test]
fn approval_requires_passing_audit_and_signature() {
    let mut application = application_in(ApplicationState::InspectionCompleted);
    let context = TransitionContext::with_approver_signature("somsak.dtam");

    let result = validate_transition(
        &application,
        ApplicationState::Approved,
        Role::DtamAdmin,
        &context,
    );
    assert_eq!(result, Err(TransitionError::AuditNotPassed));

    let now = Utc::now();
    application.audit = Some(FieldAuditRecord::closed(
        "FA-2026-000001".to_string(),
        "inspector-001",
        passing_responses(),
        now,
        now,
    ));

    let result = validate_transition(
        &application,
        ApplicationState::Approved,
        Role::DtamAdmin,
        &TransitionContext::empty(),
    );
    assert_eq!(result, Err(TransitionError::MissingApproverSignature));

    let result = validate_transition(
        &application,
        ApplicationState::Approved,
        Role::DtamAdmin,
        &context,
    );
    assert_eq!(result, Ok(()));

    let result = validate_transition(
        &application,
        ApplicationState::Approved,
        Role::DtamReviewer,
        &context,
    );
    assert!(matches!(
        result,
        Err(TransitionError::RoleNotPermitted { .. })
    ));
}

#[test]
fn staff_may_reject_any_non_terminal_state() {
    for state in ApplicationState::all() {
        let application = application_in(*state);
        let result = validate_transition(
            &application,
            ApplicationState::Rejected,
            Role::DtamReviewer,
            &TransitionContext::empty(),
        );
        if state.is_terminal() {
            assert!(
                matches!(result, Err(TransitionError::UnknownEdge { .. })),
                "terminal state {} must not be rejectable",
                state.label()
            );
        } else {
            assert_eq!(result, Ok(()), "state {} should be rejectable", state.label());
        }
    }
}

#[test]
fn farmer_may_not_reject() {
    let application = application_in(ApplicationState::UnderReview);
    let result = validate_transition(
        &application,
        ApplicationState::Rejected,
        Role::Farmer,
        &TransitionContext::empty(),
    );
    assert!(matches!(
        result,
        Err(TransitionError::RoleNotPermitted { .. })
    ));
}

#[test]
fn only_the_system_expires_applications() {
    let application = application_in(ApplicationState::PaymentPending);
    let result = validate_transition(
        &application,
        ApplicationState::Expired,
        Role::DtamAdmin,
        &TransitionContext::empty(),
    );
    assert!(matches!(
        result,
        Err(TransitionError::RoleNotPermitted { .. })
    ));

    let result = validate_transition(
        &application,
        ApplicationState::Expired,
        Role::System,
        &TransitionContext::empty(),
    );
    assert_eq!(result, Ok(()));
}

#[test]
fn rejected_and_expired_stay_put() {
    for state in [ApplicationState::Rejected, ApplicationState::Expired] {
        let application = application_in(state);
        let result = validate_transition(
            &application,
            ApplicationState::Expired,
            Role::System,
            &TransitionContext::empty(),
        );
        assert!(matches!(result, Err(TransitionError::UnknownEdge { .. })));
    }
}

#[test]
fn issued_certificates_can_still_expire() {
    let application = application_in(ApplicationState::CertificateIssued);
    let result = validate_transition(
        &application,
        ApplicationState::Expired,
        Role::System,
        &TransitionContext::empty(),
    );
    assert_eq!(result, Ok(()));
}

#[test]
fn unlisted_edges_fail_closed() {
    for from in ApplicationState::all() {
        let reachable = next_states(*from);
        for to in ApplicationState::all() {
            if reachable.contains(to) {
                continue;
            }
            let application = application_in(*from);
            let result = validate_transition(
                &application,
                *to,
                Role::System,
                &TransitionContext::empty(),
            );
            assert!(
                result.is_err(),
                "edge {} -> {} should be illegal",
                from.label(),
                to.label()
            );
        }
    }
}

#[test]
fn next_states_cover_the_happy_path() {
    let from_draft = next_states(ApplicationState::Draft);
    assert!(from_draft.contains(&ApplicationState::Submitted));
    assert!(from_draft.contains(&ApplicationState::Rejected));
    assert!(from_draft.contains(&ApplicationState::Expired));

    let from_completed = next_states(ApplicationState::InspectionCompleted);
    assert!(from_completed.contains(&ApplicationState::Phase2PaymentPending));
    assert!(from_completed.contains(&ApplicationState::Approved));

    assert!(next_states(ApplicationState::Rejected).is_empty());
}

#[test]
fn every_edge_names_at_least_one_role() {
    for (from, to, roles) in transition_table() {
        assert!(
            !roles.is_empty(),
            "edge {} -> {} has no permitted roles",
            from.label(),
            to.label()
        );
    }
}

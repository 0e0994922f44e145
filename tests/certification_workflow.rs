use std::sync::Arc;

use chrono::{Months, Utc};

use gacp_certify::config::CertificationConfig;
use gacp_certify::workflows::certification::memory::{
    InMemoryApplicationRepository, InMemoryCertificateStore, InMemorySequences, InlineQrService,
    MockPaymentGateway, NoopPdfService, RecordingEventPublisher,
};
use gacp_certify::workflows::certification::{
    Actor, ApplicationState, AuditVerdict, CertificateStatus, CertificateStore, ChecklistAnswer,
    ChecklistResponse, DocumentCategory, DocumentDescriptor, DomainEvent, EngineError, FarmProfile,
    PaymentPhaseKind, Role, WorkflowEngine,
};

type Engine = WorkflowEngine<
    InMemoryApplicationRepository,
    InMemoryCertificateStore,
    InMemorySequences,
    MockPaymentGateway,
    RecordingEventPublisher,
    InlineQrService,
    NoopPdfService,
>;

fn build_engine() -> (Arc<Engine>, Arc<InMemoryCertificateStore>, Arc<RecordingEventPublisher>) {
    let certificates = Arc::new(InMemoryCertificateStore::new());
    let events = Arc::new(RecordingEventPublisher::new());
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryApplicationRepository::new()),
        certificates.clone(),
        Arc::new(InMemorySequences::new()),
        Arc::new(MockPaymentGateway::new()),
        events.clone(),
        Arc::new(InlineQrService),
        Arc::new(NoopPdfService),
        CertificationConfig::default(),
    ));
    (engine, certificates, events)
}

fn farm() -> FarmProfile {
    FarmProfile {
        farm_name: "Baan Rai Herbal Collective".to_string(),
        owner_name: "Wanpen K.".to_string(),
        province: "Nan".to_string(),
        crop: "Black galingale".to_string(),
        area_rai: 8.0,
    }
}

fn documents() -> Vec<DocumentDescriptor> {
    vec![
        DocumentDescriptor {
            name: "Land deed".to_string(),
            category: DocumentCategory::LandDeed,
            storage_key: "uploads/nan/land-deed.pdf".to_string(),
        },
        DocumentDescriptor {
            name: "Cultivation plan".to_string(),
            category: DocumentCategory::CultivationPlan,
            storage_key: "uploads/nan/cultivation-plan.pdf".to_string(),
        },
    ]
}

fn checklist(passes: usize, critical_fails: usize) -> Vec<ChecklistResponse> {
    let mut responses: Vec<ChecklistResponse> = (1..=passes)
        .map(|item| ChecklistResponse {
            item_code: format!("GACP-{item:02}"),
            answer: ChecklistAnswer::Pass,
            is_critical: item <= 3,
        })
        .collect();
    for item in 1..=critical_fails {
        responses.push(ChecklistResponse {
            item_code: format!("GACP-C{item:02}"),
            answer: ChecklistAnswer::Fail,
            is_critical: true,
        });
    }
    responses
}

#[tokio::test]
async fn lifecycle_runs_from_draft_to_certificate_issued() {
    let (engine, certificates, events) = build_engine();
    let farmer = Actor::new("farmer-100", Role::Farmer);
    let reviewer = Actor::new("reviewer-100", Role::DtamReviewer);
    let inspector = Actor::new("inspector-100", Role::DtamInspector);
    let admin = Actor::new("admin-100", Role::DtamAdmin);

    let application = engine
        .create_application(&farmer.id, farm(), documents())
        .await
        .expect("create succeeds");
    let id = application.id.clone();

    engine
        .submit_application(&id, &farmer)
        .await
        .expect("submit succeeds");
    engine
        .approve_for_payment(&id, &reviewer, Some("dossier complete".to_string()))
        .await
        .expect("review approval succeeds");
    engine
        .confirm_payment(&id, PaymentPhaseKind::Phase1, "KTB-20260829-0001")
        .await
        .expect("phase 1 settles");
    engine
        .schedule_inspection(&id, &inspector, Utc::now(), None)
        .await
        .expect("scheduling succeeds");
    engine
        .complete_inspection(&id, &inspector, checklist(12, 0))
        .await
        .expect("inspection passes");
    engine
        .request_phase2_payment(&id, &reviewer)
        .await
        .expect("phase 2 billed");
    engine
        .confirm_payment(&id, PaymentPhaseKind::Phase2, "KTB-20260829-0002")
        .await
        .expect("phase 2 settles");

    let (application, certificate) = engine
        .final_approval(&id, &admin, "director.dtam", None)
        .await
        .expect("final approval succeeds");

    assert_eq!(application.state, ApplicationState::CertificateIssued);
    assert!(application.phase1_paid() && application.phase2_paid());
    assert_eq!(certificate.status, CertificateStatus::Active);
    assert_eq!(
        certificate.expiry_date,
        certificate
            .issued_date
            .checked_add_months(Months::new(36))
            .expect("in range")
    );

    let stored = certificates
        .find_by_number(&certificate.certificate_number)
        .await
        .expect("lookup succeeds")
        .expect("certificate persisted");
    assert_eq!(stored.application_number, application.application_number);

    let outcome = engine
        .verify_certificate(&certificate.certificate_number, &certificate.verification_code)
        .await
        .expect("verification succeeds");
    assert!(outcome.valid);

    let published = events.events();
    let kinds: Vec<&str> = published
        .iter()
        .map(|event| match event {
            DomainEvent::ApplicationSubmitted { .. } => "submitted",
            DomainEvent::PaymentRequested { .. } => "payment_requested",
            DomainEvent::PaymentConfirmed { .. } => "payment_confirmed",
            DomainEvent::InspectionScheduled { .. } => "inspection_scheduled",
            DomainEvent::CertificateIssued { .. } => "certificate_issued",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "submitted",
            "payment_requested",
            "payment_confirmed",
            "inspection_scheduled",
            "payment_requested",
            "payment_confirmed",
            "certificate_issued",
        ]
    );
}

#[tokio::test]
async fn three_critical_failures_cancel_a_high_scoring_audit() {
    let (engine, _, events) = build_engine();
    let farmer = Actor::new("farmer-200", Role::Farmer);
    let reviewer = Actor::new("reviewer-200", Role::DtamReviewer);
    let inspector = Actor::new("inspector-200", Role::DtamInspector);

    let application = engine
        .create_application(&farmer.id, farm(), documents())
        .await
        .expect("create succeeds");
    let id = application.id.clone();

    engine
        .submit_application(&id, &farmer)
        .await
        .expect("submit succeeds");
    engine
        .approve_for_payment(&id, &reviewer, None)
        .await
        .expect("review approval succeeds");
    engine
        .confirm_payment(&id, PaymentPhaseKind::Phase1, "KTB-20260829-0003")
        .await
        .expect("phase 1 settles");
    engine
        .schedule_inspection(&id, &inspector, Utc::now(), None)
        .await
        .expect("scheduling succeeds");

    // 27 passes against 3 critical failures scores exactly 90%.
    let application = engine
        .complete_inspection(&id, &inspector, checklist(27, 3))
        .await
        .expect("completion succeeds");

    assert_eq!(application.state, ApplicationState::Rejected);
    assert_eq!(
        application.audit.as_ref().map(|audit| audit.verdict),
        Some(AuditVerdict::AutoCancel)
    );
    assert!(application
        .rejection
        .as_ref()
        .is_some_and(|rejection| rejection.auto_rejection));
    assert!(events
        .events()
        .iter()
        .any(|event| matches!(event, DomainEvent::AuditAutoCancelled { .. })));
}

#[tokio::test]
async fn racing_confirmations_settle_exactly_once() {
    let (engine, _, _) = build_engine();
    let farmer = Actor::new("farmer-300", Role::Farmer);
    let reviewer = Actor::new("reviewer-300", Role::DtamReviewer);

    let application = engine
        .create_application(&farmer.id, farm(), documents())
        .await
        .expect("create succeeds");
    let id = application.id.clone();

    engine
        .submit_application(&id, &farmer)
        .await
        .expect("submit succeeds");
    engine
        .approve_for_payment(&id, &reviewer, None)
        .await
        .expect("review approval succeeds");

    let (first, second) = tokio::join!(
        engine.confirm_payment(&id, PaymentPhaseKind::Phase1, "KTB-20260829-0004"),
        engine.confirm_payment(&id, PaymentPhaseKind::Phase1, "KTB-20260829-0004"),
    );

    let succeeded = [&first, &second]
        .iter()
        .filter(|result| result.is_ok())
        .count();
    assert_eq!(succeeded, 1, "exactly one confirmation may win");

    let loser = if first.is_ok() { second } else { first };
    assert!(matches!(
        loser,
        Err(EngineError::ConcurrentModification | EngineError::NotEligible(_))
    ));

    let stored = engine.get(&id).await.expect("fetch succeeds");
    assert_eq!(stored.state, ApplicationState::PaymentVerified);
    assert!(stored.phase1_paid());
}

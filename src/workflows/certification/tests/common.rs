use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::CertificationConfig;
use crate::workflows::certification::audit::{ChecklistAnswer, ChecklistResponse};
use crate::workflows::certification::certificate::{Certificate, CertificateStatus};
use crate::workflows::certification::domain::{
    Actor, Application, ApplicationId, ApplicationState, CertificateId, DocumentCategory,
    DocumentDescriptor, FarmProfile, Role,
};
use crate::workflows::certification::engine::WorkflowEngine;
use crate::workflows::certification::memory::{
    InMemoryApplicationRepository, InMemoryCertificateStore, InMemorySequences, InlineQrService,
    MockPaymentGateway, NoopPdfService, RecordingEventPublisher,
};

pub(super) type TestEngine = WorkflowEngine<
    InMemoryApplicationRepository,
    InMemoryCertificateStore,
    InMemorySequences,
    MockPaymentGateway,
    RecordingEventPublisher,
    InlineQrService,
    NoopPdfService,
>;

pub(super) struct TestHarness {
    pub(super) engine: Arc<TestEngine>,
    pub(super) repository: Arc<InMemoryApplicationRepository>,
    pub(super) certificates: Arc<InMemoryCertificateStore>,
    pub(super) gateway: Arc<MockPaymentGateway>,
    pub(super) events: Arc<RecordingEventPublisher>,
}

pub(super) fn build_harness() -> TestHarness {
    let repository = Arc::new(InMemoryApplicationRepository::new());
    let certificates = Arc::new(InMemoryCertificateStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let events = Arc::new(RecordingEventPublisher::new());
    let engine = Arc::new(WorkflowEngine::new(
        repository.clone(),
        certificates.clone(),
        Arc::new(InMemorySequences::new()),
        gateway.clone(),
        events.clone(),
        Arc::new(InlineQrService),
        Arc::new(NoopPdfService),
        CertificationConfig::default(),
    ));
    TestHarness {
        engine,
        repository,
        certificates,
        gateway,
        events,
    }
}

pub(super) fn farmer() -> Actor {
    Actor::new("farmer-001", Role::Farmer)
}

pub(super) fn reviewer() -> Actor {
    Actor::new("reviewer-001", Role::DtamReviewer)
}

pub(super) fn inspector() -> Actor {
    Actor::new("inspector-001", Role::DtamInspector)
}

pub(super) fn admin() -> Actor {
    Actor::new("admin-001", Role::DtamAdmin)
}

pub(super) fn farm() -> FarmProfile {
    FarmProfile {
        farm_name: "Baan Suan Herb Farm".to_string(),
        owner_name: "Somchai J.".to_string(),
        province: "Chiang Mai".to_string(),
        crop: "Turmeric".to_string(),
        area_rai: 12.5,
    }
}

pub(super) fn documents() -> Vec<DocumentDescriptor> {
    vec![
        DocumentDescriptor {
            name: "Land deed".to_string(),
            category: DocumentCategory::LandDeed,
            storage_key: "uploads/land-deed.pdf".to_string(),
        },
        DocumentDescriptor {
            name: "Water test report".to_string(),
            category: DocumentCategory::WaterTestReport,
            storage_key: "uploads/water-test.pdf".to_string(),
        },
    ]
}

/// An aggregate placed directly into `state`, bypassing the engine.
pub(super) fn application_in(state: ApplicationState) -> Application {
    let now = Utc::now();
    let mut application = Application::new(
        ApplicationId("GACP-2026-000042".to_string()),
        "GACP-2026-000042".to_string(),
        "farmer-001",
        farm(),
        documents(),
        now,
    );
    application.state = state;
    application
}

pub(super) fn response(
    item_code: &str,
    answer: ChecklistAnswer,
    is_critical: bool,
) -> ChecklistResponse {
    ChecklistResponse {
        item_code: item_code.to_string(),
        answer,
        is_critical,
    }
}

/// Ten passes, three of them on critical items.
pub(super) fn passing_responses() -> Vec<ChecklistResponse> {
    (1..=10)
        .map(|item| {
            response(
                &format!("GACP-{item:02}"),
                ChecklistAnswer::Pass,
                item <= 3,
            )
        })
        .collect()
}

/// A stored certificate expiring `days_to_expiry` days from now.
pub(super) fn certificate_expiring_in(days_to_expiry: i64) -> Certificate {
    let now = Utc::now();
    certificate_with(now, now + Duration::days(days_to_expiry))
}

pub(super) fn certificate_with(
    issued_date: DateTime<Utc>,
    expiry_date: DateTime<Utc>,
) -> Certificate {
    Certificate {
        id: CertificateId("GACP-CERT-2026-000007".to_string()),
        certificate_number: "GACP-CERT-2026-000007".to_string(),
        verification_code: "0123456789ABCDEF0123456789ABCDEF".to_string(),
        application_id: ApplicationId("GACP-2026-000042".to_string()),
        application_number: "GACP-2026-000042".to_string(),
        farmer_id: "farmer-001".to_string(),
        farm_name: "Baan Suan Herb Farm".to_string(),
        issued_by: "admin-001".to_string(),
        issued_date,
        expiry_date,
        validity_months: 36,
        status: CertificateStatus::Active,
        renewal: None,
        original_certificate_id: None,
        qr_payload: "https://gacp-certify.go.th/verify/GACP-CERT-2026-000007?code=0123456789ABCDEF0123456789ABCDEF".to_string(),
        pdf_generated: true,
    }
}

/// Drive a fresh application through the engine up to a passed inspection.
pub(super) async fn to_inspection_completed(harness: &TestHarness) -> ApplicationId {
    let application = harness
        .engine
        .create_application("farmer-001", farm(), documents())
        .await
        .expect("create succeeds");
    let id = application.id.clone();

    harness
        .engine
        .submit_application(&id, &farmer())
        .await
        .expect("submit succeeds");
    harness
        .engine
        .approve_for_payment(&id, &reviewer(), None)
        .await
        .expect("review approval succeeds");
    harness
        .engine
        .confirm_payment(
            &id,
            crate::workflows::certification::domain::PaymentPhaseKind::Phase1,
            "BANK-REF-0001",
        )
        .await
        .expect("phase 1 confirmation succeeds");
    harness
        .engine
        .schedule_inspection(&id, &inspector(), Utc::now(), None)
        .await
        .expect("scheduling succeeds");
    harness
        .engine
        .complete_inspection(&id, &inspector(), passing_responses())
        .await
        .expect("inspection succeeds");

    id
}

//! In-memory adapters backing the engine in tests and local serving.
//!
//! Each adapter is a mutex-guarded map; locks are only held across
//! synchronous map operations, never across await points.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::certificate::{Certificate, CertificateStatus};
use super::domain::{Application, ApplicationId, ApplicationState, CertificateId};
use super::repository::{
    ApplicationRepository, CertificateStore, CollaboratorError, DomainEvent, EventPublisher,
    GatewayPaymentStatus, Invoice, InvoiceRequest, PaymentGateway, PdfService, QrService,
    RepositoryError, SequenceCounter, SequenceKind,
};

/// Version-checked application storage.
#[derive(Default)]
pub struct InMemoryApplicationRepository {
    records: Mutex<HashMap<ApplicationId, Application>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApplicationRepository for InMemoryApplicationRepository {
    async fn insert(&self, mut application: Application) -> Result<Application, RepositoryError> {
        let mut records = self.records.lock().expect("repository mutex poisoned");
        if records.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        application.version = 1;
        records.insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn update(
        &self,
        mut application: Application,
        expected_version: u64,
    ) -> Result<Application, RepositoryError> {
        let mut records = self.records.lock().expect("repository mutex poisoned");
        let stored = records
            .get(&application.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                stored: stored.version,
            });
        }
        application.version = expected_version + 1;
        records.insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records.get(id).cloned())
    }

    async fn owned_by(&self, farmer_id: &str) -> Result<Vec<Application>, RepositoryError> {
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records
            .values()
            .filter(|application| application.farmer_id == farmer_id)
            .cloned()
            .collect())
    }

    async fn in_state(
        &self,
        state: ApplicationState,
    ) -> Result<Vec<Application>, RepositoryError> {
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records
            .values()
            .filter(|application| application.state == state)
            .cloned()
            .collect())
    }

    async fn deadline_passed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Application>, RepositoryError> {
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records
            .values()
            .filter(|application| application.deadline_passed(now))
            .cloned()
            .collect())
    }
}

/// Certificate storage keyed by certificate number.
#[derive(Default)]
pub struct InMemoryCertificateStore {
    records: Mutex<HashMap<CertificateId, Certificate>>,
}

impl InMemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStore for InMemoryCertificateStore {
    async fn insert(&self, certificate: Certificate) -> Result<Certificate, RepositoryError> {
        let mut records = self.records.lock().expect("repository mutex poisoned");
        if records.contains_key(&certificate.id) {
            return Err(RepositoryError::Conflict);
        }
        records.insert(certificate.id.clone(), certificate.clone());
        Ok(certificate)
    }

    async fn update(
        &self,
        certificate: Certificate,
        expected_status: CertificateStatus,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().expect("repository mutex poisoned");
        let stored = records
            .get(&certificate.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.status != expected_status {
            return Err(RepositoryError::StatusConflict {
                expected: expected_status.label(),
                stored: stored.status.label(),
            });
        }
        records.insert(certificate.id.clone(), certificate);
        Ok(())
    }

    async fn fetch(&self, id: &CertificateId) -> Result<Option<Certificate>, RepositoryError> {
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records.get(id).cloned())
    }

    async fn find_by_number(
        &self,
        certificate_number: &str,
    ) -> Result<Option<Certificate>, RepositoryError> {
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records
            .values()
            .find(|certificate| certificate.certificate_number == certificate_number)
            .cloned())
    }

    async fn expiring_within(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<Certificate>, RepositoryError> {
        let cutoff = now + Duration::days(days);
        let records = self.records.lock().expect("repository mutex poisoned");
        Ok(records
            .values()
            .filter(|certificate| certificate.expiry_date <= cutoff)
            .cloned()
            .collect())
    }
}

/// Yearly counters scoped by `(kind, year)`.
#[derive(Default)]
pub struct InMemorySequences {
    counters: Mutex<HashMap<(SequenceKind, i32), u64>>,
}

impl InMemorySequences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceCounter for InMemorySequences {
    async fn next(&self, kind: SequenceKind, year: i32) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.lock().expect("sequence mutex poisoned");
        let counter = counters.entry((kind, year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Gateway stub that settles every invoice it created, unless held.
#[derive(Default)]
pub struct MockPaymentGateway {
    invoices: Mutex<HashMap<String, InvoiceRequest>>,
    held: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the given invoice unsettled until released.
    pub fn hold(&self, invoice_id: &str) {
        self.held
            .lock()
            .expect("gateway lock poisoned")
            .push(invoice_id.to_string());
    }

    pub fn release(&self, invoice_id: &str) {
        self.held
            .lock()
            .expect("gateway lock poisoned")
            .retain(|held| held != invoice_id);
    }

    /// Simulate a gateway outage for both invoice creation and lookups.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl PaymentGateway for MockPaymentGateway {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Transport(
                "gateway unreachable".to_string(),
            ));
        }
        let invoice_id = format!(
            "GW-{}-{}",
            request.application_number,
            request.phase.label()
        );
        self.invoices
            .lock()
            .expect("gateway lock poisoned")
            .insert(invoice_id.clone(), request);
        Ok(Invoice {
            payment_url: format!("https://pay.example/{invoice_id}"),
            invoice_id,
        })
    }

    async fn get_status(&self, invoice_id: &str) -> Result<GatewayPaymentStatus, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Transport(
                "gateway unreachable".to_string(),
            ));
        }
        if self
            .held
            .lock()
            .expect("gateway lock poisoned")
            .iter()
            .any(|held| held == invoice_id)
        {
            return Ok(GatewayPaymentStatus::Pending);
        }
        let known = self
            .invoices
            .lock()
            .expect("gateway lock poisoned")
            .contains_key(invoice_id);
        if known {
            Ok(GatewayPaymentStatus::Settled {
                transaction_id: format!("TXN-{invoice_id}"),
            })
        } else {
            Err(CollaboratorError::Rejected(format!(
                "unknown invoice {invoice_id}"
            )))
        }
    }
}

/// Captures published events for assertions.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().expect("event lock poisoned").clone()
    }
}

impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), CollaboratorError> {
        self.events.lock().expect("event lock poisoned").push(event);
        Ok(())
    }
}

/// Forwards each event to the log stream. Fits the serve path, where no
/// consumer drains a queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventPublisher;

impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), CollaboratorError> {
        match serde_json::to_string(&event) {
            Ok(body) => {
                info!(event = %body, "domain event");
                Ok(())
            }
            Err(err) => Err(CollaboratorError::Rejected(err.to_string())),
        }
    }
}

/// Returns the payload unchanged as the rendering handle.
#[derive(Default)]
pub struct InlineQrService;

impl QrService for InlineQrService {
    async fn encode(&self, payload: &str) -> Result<String, CollaboratorError> {
        Ok(payload.to_string())
    }
}

/// Pretends every render succeeded.
#[derive(Default)]
pub struct NoopPdfService;

impl PdfService for NoopPdfService {
    async fn render(&self, _certificate: &Certificate) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

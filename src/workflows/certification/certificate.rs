//! Certificate issuance, renewal, and verification.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::domain::{Application, ApplicationId, CertificateId};
use super::repository::{
    CollaboratorError, PdfService, QrService, RepositoryError, SequenceCounter, SequenceKind,
};

/// Default certificate validity.
pub const DEFAULT_VALIDITY_MONTHS: u32 = 36;

/// Renewal is only possible this many days before expiry.
pub const RENEWAL_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Active,
    Renewed,
    Expired,
    Revoked,
}

impl CertificateStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CertificateStatus::Active => "active",
            CertificateStatus::Renewed => "renewed",
            CertificateStatus::Expired => "expired",
            CertificateStatus::Revoked => "revoked",
        }
    }
}

/// Link from a superseded certificate to its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalInfo {
    pub new_certificate_id: CertificateId,
    pub renewed_at: DateTime<Utc>,
    pub renewed_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub certificate_number: String,
    pub verification_code: String,
    pub application_id: ApplicationId,
    pub application_number: String,
    pub farmer_id: String,
    pub farm_name: String,
    pub issued_by: String,
    pub issued_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub validity_months: u32,
    pub status: CertificateStatus,
    pub renewal: Option<RenewalInfo>,
    /// Set on successors created by renewal, linking back to the lineage.
    pub original_certificate_id: Option<CertificateId>,
    pub qr_payload: String,
    pub pdf_generated: bool,
}

/// Signed days between `now` and the certificate's expiry; negative once past.
pub fn days_until_expiry(certificate: &Certificate, now: DateTime<Utc>) -> i64 {
    (certificate.expiry_date - now).num_days()
}

/// Outcome of the read-only renewal eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "eligibility", rename_all = "snake_case")]
pub enum RenewalEligibility {
    Eligible { days_remaining: i64 },
    NotYetEligible { days_until_window: i64 },
    AlreadyExpired { days_overdue: i64 },
    NotActive { status: &'static str },
}

impl RenewalEligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, RenewalEligibility::Eligible { .. })
    }
}

/// Pure predicate callers may consult before attempting a renewal.
pub fn check_renewal_eligibility(
    certificate: &Certificate,
    now: DateTime<Utc>,
) -> RenewalEligibility {
    if certificate.status != CertificateStatus::Active {
        return RenewalEligibility::NotActive {
            status: certificate.status.label(),
        };
    }

    let days = days_until_expiry(certificate, now);
    if days < 0 {
        RenewalEligibility::AlreadyExpired { days_overdue: -days }
    } else if days > RENEWAL_WINDOW_DAYS {
        RenewalEligibility::NotYetEligible {
            days_until_window: days - RENEWAL_WINDOW_DAYS,
        }
    } else {
        RenewalEligibility::Eligible { days_remaining: days }
    }
}

/// Result of a public verification lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub status: &'static str,
    pub reason: Option<String>,
}

impl VerificationOutcome {
    pub fn unknown() -> Self {
        Self {
            valid: false,
            status: "unknown",
            reason: Some("no certificate with that number".to_string()),
        }
    }
}

/// Check a presented verification code against a stored certificate.
pub fn verify(certificate: &Certificate, code: &str, now: DateTime<Utc>) -> VerificationOutcome {
    if certificate.verification_code != code {
        return VerificationOutcome {
            valid: false,
            status: certificate.status.label(),
            reason: Some("verification code mismatch".to_string()),
        };
    }

    if certificate.status != CertificateStatus::Active {
        return VerificationOutcome {
            valid: false,
            status: certificate.status.label(),
            reason: Some(format!("certificate is {}", certificate.status.label())),
        };
    }

    if days_until_expiry(certificate, now) < 0 {
        return VerificationOutcome {
            valid: false,
            status: certificate.status.label(),
            reason: Some("certificate has passed its expiry date".to_string()),
        };
    }

    VerificationOutcome {
        valid: true,
        status: certificate.status.label(),
        reason: None,
    }
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("certificate is not yet in the renewal window ({days_until_window} days early)")]
    NotYetEligible { days_until_window: i64 },
    #[error("certificate expired {days_overdue} days ago and can no longer be renewed")]
    AlreadyExpired { days_overdue: i64 },
    #[error("only an active certificate can be renewed (status is {status})")]
    NotActive { status: &'static str },
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

/// Stateless numbering and entity factory for certificates.
///
/// QR and PDF rendering are delegated to collaborators; the certificate
/// entity is valid independent of their success.
pub struct CertificateIssuer<S, Q, P> {
    sequences: Arc<S>,
    qr: Arc<Q>,
    pdf: Arc<P>,
    verify_base_url: String,
}

impl<S, Q, P> CertificateIssuer<S, Q, P>
where
    S: SequenceCounter,
    Q: QrService,
    P: PdfService,
{
    pub fn new(sequences: Arc<S>, qr: Arc<Q>, pdf: Arc<P>, verify_base_url: String) -> Self {
        Self {
            sequences,
            qr,
            pdf,
            verify_base_url,
        }
    }

    /// Build a fresh certificate for an approved application.
    ///
    /// The engine enforces the `Approved` state before calling.
    pub async fn generate(
        &self,
        application: &Application,
        issued_by: &str,
        validity_months: u32,
        now: DateTime<Utc>,
    ) -> Result<Certificate, IssueError> {
        let certificate = self
            .build(
                application.id.clone(),
                application.application_number.clone(),
                application.farmer_id.clone(),
                application.farm.farm_name.clone(),
                issued_by,
                validity_months,
                None,
                now,
            )
            .await?;
        Ok(certificate)
    }

    /// Supersede an active certificate within the pre-expiry window.
    ///
    /// Returns the superseded certificate (now `Renewed`, pointing at its
    /// successor) and the freshly issued successor.
    pub async fn renew(
        &self,
        existing: &Certificate,
        renewed_by: &str,
        validity_months: u32,
        now: DateTime<Utc>,
    ) -> Result<(Certificate, Certificate), RenewalError> {
        match check_renewal_eligibility(existing, now) {
            RenewalEligibility::Eligible { .. } => {}
            RenewalEligibility::NotYetEligible { days_until_window } => {
                return Err(RenewalError::NotYetEligible { days_until_window });
            }
            RenewalEligibility::AlreadyExpired { days_overdue } => {
                return Err(RenewalError::AlreadyExpired { days_overdue });
            }
            RenewalEligibility::NotActive { status } => {
                return Err(RenewalError::NotActive { status });
            }
        }

        let lineage_root = existing
            .original_certificate_id
            .clone()
            .unwrap_or_else(|| existing.id.clone());

        let successor = self
            .build(
                existing.application_id.clone(),
                existing.application_number.clone(),
                existing.farmer_id.clone(),
                existing.farm_name.clone(),
                renewed_by,
                validity_months,
                Some(lineage_root),
                now,
            )
            .await?;

        let mut superseded = existing.clone();
        superseded.status = CertificateStatus::Renewed;
        superseded.renewal = Some(RenewalInfo {
            new_certificate_id: successor.id.clone(),
            renewed_at: now,
            renewed_by: renewed_by.to_string(),
        });

        Ok((superseded, successor))
    }

    #[allow(clippy::too_many_arguments)]
    async fn build(
        &self,
        application_id: ApplicationId,
        application_number: String,
        farmer_id: String,
        farm_name: String,
        issued_by: &str,
        validity_months: u32,
        original_certificate_id: Option<CertificateId>,
        now: DateTime<Utc>,
    ) -> Result<Certificate, RepositoryError> {
        let year = now.year();
        let sequence = self.sequences.next(SequenceKind::Certificate, year).await?;
        let certificate_number = format_certificate_number(year, sequence);
        let verification_code = generate_verification_code();
        let qr_payload = format!(
            "{}/verify/{certificate_number}?code={verification_code}",
            self.verify_base_url
        );

        let expiry_date = now
            .checked_add_months(Months::new(validity_months))
            .unwrap_or(now);

        let mut certificate = Certificate {
            id: CertificateId(certificate_number.clone()),
            certificate_number,
            verification_code,
            application_id,
            application_number,
            farmer_id,
            farm_name,
            issued_by: issued_by.to_string(),
            issued_date: now,
            expiry_date,
            validity_months,
            status: CertificateStatus::Active,
            renewal: None,
            original_certificate_id,
            qr_payload,
            pdf_generated: false,
        };

        // Rendering is best effort; failures are reconciled out of band.
        if let Err(err) = self.qr.encode(&certificate.qr_payload).await {
            warn_collaborator("qr", &certificate.certificate_number, &err);
        }
        match self.pdf.render(&certificate).await {
            Ok(()) => certificate.pdf_generated = true,
            Err(err) => warn_collaborator("pdf", &certificate.certificate_number, &err),
        }

        Ok(certificate)
    }
}

fn warn_collaborator(service: &str, certificate_number: &str, err: &CollaboratorError) {
    warn!(%certificate_number, service, error = %err, "certificate rendering collaborator failed");
}

/// Certificate numbers follow `GACP-CERT-<year>-<6-digit sequence>`.
pub fn format_certificate_number(year: i32, sequence: u64) -> String {
    format!("GACP-CERT-{year}-{sequence:06}")
}

/// Opaque random token checked on public verification lookups.
fn generate_verification_code() -> String {
    format!("{:032X}", rand::random::<u128>())
}

use super::common::*;

use std::sync::Arc;

use chrono::{Datelike, Duration, Months, Utc};

use crate::workflows::certification::certificate::{
    check_renewal_eligibility, days_until_expiry, verify, CertificateIssuer, CertificateStatus,
    RenewalEligibility, RenewalError,
};
use crate::workflows::certification::domain::ApplicationState;
use crate::workflows::certification::memory::{InMemorySequences, InlineQrService, NoopPdfService};

fn issuer() -> CertificateIssuer<InMemorySequences, InlineQrService, NoopPdfService> {
    CertificateIssuer::new(
        Arc::new(InMemorySequences::new()),
        Arc::new(InlineQrService),
        Arc::new(NoopPdfService),
        "https://gacp-certify.go.th".to_string(),
    )
}

fn expiring_in(now: chrono::DateTime<Utc>, days: i64) -> crate::workflows::certification::Certificate {
    certificate_with(now - Duration::days(30), now + Duration::days(days))
}

#[test]
fn renewal_window_opens_ninety_days_before_expiry() {
    let now = Utc::now();

    assert_eq!(
        check_renewal_eligibility(&expiring_in(now, 45), now),
        RenewalEligibility::Eligible { days_remaining: 45 }
    );
    assert_eq!(
        check_renewal_eligibility(&expiring_in(now, 90), now),
        RenewalEligibility::Eligible { days_remaining: 90 }
    );
    assert_eq!(
        check_renewal_eligibility(&expiring_in(now, 120), now),
        RenewalEligibility::NotYetEligible {
            days_until_window: 30
        }
    );
    assert_eq!(
        check_renewal_eligibility(&expiring_in(now, -2), now),
        RenewalEligibility::AlreadyExpired { days_overdue: 2 }
    );
}

#[test]
fn only_active_certificates_are_renewable() {
    let now = Utc::now();
    let mut certificate = expiring_in(now, 45);
    certificate.status = CertificateStatus::Revoked;

    assert_eq!(
        check_renewal_eligibility(&certificate, now),
        RenewalEligibility::NotActive { status: "revoked" }
    );
}

#[test]
fn verification_checks_code_status_and_expiry() {
    let now = Utc::now();
    let certificate = expiring_in(now, 200);

    let outcome = verify(&certificate, &certificate.verification_code, now);
    assert!(outcome.valid);
    assert_eq!(outcome.status, "active");
    assert!(outcome.reason.is_none());

    let outcome = verify(&certificate, "WRONG-CODE", now);
    assert!(!outcome.valid);

    let mut revoked = certificate.clone();
    revoked.status = CertificateStatus::Revoked;
    let outcome = verify(&revoked, &revoked.verification_code, now);
    assert!(!outcome.valid);
    assert_eq!(outcome.status, "revoked");

    let lapsed = expiring_in(now, -1);
    let outcome = verify(&lapsed, &lapsed.verification_code, now);
    assert!(!outcome.valid);
}

#[tokio::test]
async fn generated_certificates_carry_number_expiry_and_qr() {
    let issuer = issuer();
    let now = Utc::now();
    let application = application_in(ApplicationState::Approved);

    let certificate = issuer
        .generate(&application, "admin-001", 36, now)
        .await
        .expect("issuance succeeds");

    assert_eq!(
        certificate.certificate_number,
        format!("GACP-CERT-{}-000001", now.year())
    );
    assert_eq!(certificate.application_number, application.application_number);
    assert_eq!(certificate.status, CertificateStatus::Active);
    assert_eq!(certificate.validity_months, 36);
    assert_eq!(
        certificate.expiry_date,
        now.checked_add_months(Months::new(36)).expect("in range")
    );
    assert_eq!(certificate.verification_code.len(), 32);
    assert!(certificate
        .qr_payload
        .contains(&certificate.certificate_number));
    assert!(certificate
        .qr_payload
        .contains(&certificate.verification_code));
    assert!(certificate.pdf_generated);
    assert!(certificate.original_certificate_id.is_none());
}

#[tokio::test]
async fn renewal_supersedes_and_preserves_lineage() {
    let issuer = issuer();
    let now = Utc::now();
    let existing = expiring_in(now, 30);

    let (superseded, successor) = issuer
        .renew(&existing, "admin-002", 36, now)
        .await
        .expect("renewal succeeds");

    assert_eq!(superseded.status, CertificateStatus::Renewed);
    let info = superseded.renewal.expect("renewal info recorded");
    assert_eq!(info.new_certificate_id, successor.id);
    assert_eq!(info.renewed_by, "admin-002");

    assert_eq!(successor.status, CertificateStatus::Active);
    assert_ne!(successor.certificate_number, existing.certificate_number);
    assert_ne!(successor.verification_code, existing.verification_code);
    assert_eq!(
        successor.original_certificate_id,
        Some(existing.id.clone())
    );
    assert_eq!(days_until_expiry(&successor, now), (now.checked_add_months(Months::new(36)).expect("in range") - now).num_days());

    // Renewing the successor keeps pointing at the lineage root.
    let mut mid_window = successor.clone();
    mid_window.expiry_date = now + Duration::days(10);
    let (_, third) = issuer
        .renew(&mid_window, "admin-002", 36, now)
        .await
        .expect("second renewal succeeds");
    assert_eq!(third.original_certificate_id, Some(existing.id));
}

#[tokio::test]
async fn renewal_outside_the_window_is_refused() {
    let issuer = issuer();
    let now = Utc::now();

    let err = issuer
        .renew(&expiring_in(now, 120), "admin-001", 36, now)
        .await
        .expect_err("too early");
    assert!(matches!(
        err,
        RenewalError::NotYetEligible {
            days_until_window: 30
        }
    ));

    let err = issuer
        .renew(&expiring_in(now, -5), "admin-001", 36, now)
        .await
        .expect_err("already expired");
    assert!(matches!(err, RenewalError::AlreadyExpired { .. }));

    let mut revoked = expiring_in(now, 45);
    revoked.status = CertificateStatus::Revoked;
    let err = issuer
        .renew(&revoked, "admin-001", 36, now)
        .await
        .expect_err("not active");
    assert!(matches!(err, RenewalError::NotActive { status: "revoked" }));
}

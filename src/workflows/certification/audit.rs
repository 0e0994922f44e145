//! Field-audit checklist scoring.
//!
//! The on-site audit produces a list of checklist responses. The category
//! score counts only items that were actually examined (`Na` answers are
//! excluded), and the 3-strikes rule disqualifies the audit outright when
//! three or more critical items fail, regardless of the aggregate score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum category score (inclusive) for a passing audit.
pub const PASSING_SCORE: f64 = 90.0;

/// Critical failures at or above this count auto-cancel the audit.
pub const CRITICAL_FAIL_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecklistAnswer {
    Pass,
    Fail,
    Na,
}

/// One answered checklist item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistResponse {
    pub item_code: String,
    pub answer: ChecklistAnswer,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditVerdict {
    Pass,
    Fail,
    AutoCancel,
}

impl AuditVerdict {
    pub const fn label(self) -> &'static str {
        match self {
            AuditVerdict::Pass => "PASS",
            AuditVerdict::Fail => "FAIL",
            AuditVerdict::AutoCancel => "AUTO_CANCEL",
        }
    }
}

/// Closed record of one on-site audit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAuditRecord {
    pub audit_number: String,
    pub inspector_id: String,
    pub responses: Vec<ChecklistResponse>,
    pub category_score: f64,
    pub verdict: AuditVerdict,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl FieldAuditRecord {
    /// Score the responses and close the record in one step.
    pub fn closed(
        audit_number: String,
        inspector_id: impl Into<String>,
        responses: Vec<ChecklistResponse>,
        opened_at: DateTime<Utc>,
        closed_at: DateTime<Utc>,
    ) -> Self {
        let category_score = calculate_category_score(&responses);
        let verdict = verdict_for(&responses);

        Self {
            audit_number,
            inspector_id: inspector_id.into(),
            responses,
            category_score,
            verdict,
            opened_at,
            closed_at,
        }
    }
}

/// Percentage of examined items that passed.
///
/// `Na` responses are excluded from the denominator. A checklist with no
/// examined items scores 100.0: nothing inspected failed, so the percentage
/// gate cannot be the grounds for blocking (the 3-strikes rule is checked
/// separately and still applies).
pub fn calculate_category_score(responses: &[ChecklistResponse]) -> f64 {
    let examined = responses
        .iter()
        .filter(|r| r.answer != ChecklistAnswer::Na)
        .count();
    if examined == 0 {
        return 100.0;
    }

    let passed = responses
        .iter()
        .filter(|r| r.answer == ChecklistAnswer::Pass)
        .count();
    (passed as f64 / examined as f64) * 100.0
}

/// Inclusive 90% threshold; 89.999 fails.
pub fn is_passing_score(score: f64) -> bool {
    score >= PASSING_SCORE
}

/// Count of failed items marked critical.
pub fn count_major_fails(responses: &[ChecklistResponse]) -> usize {
    responses
        .iter()
        .filter(|r| r.answer == ChecklistAnswer::Fail && r.is_critical)
        .count()
}

/// The 3-strikes rule, independent of the aggregate score.
pub fn should_auto_cancel(responses: &[ChecklistResponse]) -> bool {
    count_major_fails(responses) >= CRITICAL_FAIL_LIMIT
}

/// Verdict precedence: auto-cancel, then the score gate.
pub fn verdict_for(responses: &[ChecklistResponse]) -> AuditVerdict {
    if should_auto_cancel(responses) {
        AuditVerdict::AutoCancel
    } else if is_passing_score(calculate_category_score(responses)) {
        AuditVerdict::Pass
    } else {
        AuditVerdict::Fail
    }
}

/// Audit numbers follow `FA-<year>-<6-digit sequence>`, with the sequence
/// supplied by the persistence-backed counter.
pub fn format_audit_number(year: i32, sequence: u64) -> String {
    format!("FA-{year}-{sequence:06}")
}

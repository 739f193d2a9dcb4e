pub mod application;
pub mod loan;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActorId, LoanStatus};

pub use application::{LoanApplication, NewApplication, UnderwritingInputs};
pub use loan::{ApprovalRequest, ApprovedTerms, Disbursement, DisbursementRequest, Loan, LoanTerms};

/// audit entry for a single status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: LoanStatus,
    pub to: LoanStatus,
    pub actor: ActorId,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// the complete transition table; nothing outside it is reachable
pub fn can_transition(from: LoanStatus, to: LoanStatus) -> bool {
    use LoanStatus::*;
    matches!(
        (from, to),
        (Applied, UnderReview)
            | (UnderReview, Approved)
            | (UnderReview, Rejected)
            | (Approved, Disbursed)
            | (Disbursed, Closed)
            | (Disbursed, Defaulted)
            | (Applied, Cancelled)
            | (UnderReview, Cancelled)
            | (Approved, Cancelled)
    )
}

/// a disbursed loan whose final due date plus grace has passed with money still owed.
///
/// Only the predicate lives here; an external scheduler decides when to ask.
pub fn is_default_eligible(loan: &Loan, now: DateTime<Utc>) -> bool {
    if loan.status != LoanStatus::Disbursed || !loan.outstanding_balance.is_positive() {
        return false;
    }
    match &loan.terms {
        Some(terms) => now > terms.final_due_date() + Duration::days(terms.grace_period_days as i64),
        None => false,
    }
}

pub mod amortization;
pub mod reconciliation;
pub mod waterfall;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::types::{ActorId, LoanId, PaymentId, PaymentMethod, PaymentStatus, TenantId};

pub use amortization::{Installment, Installments, RepaymentSchedule, ScheduleTerms};
pub use reconciliation::{ReconciliationOutcome, Reconciler};
pub use waterfall::{InstallmentState, PaymentWaterfall, Statement, StatementLine, WaterfallComponent};

/// payment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// repeated keys for the same loan return the original payment
    pub idempotency_key: Option<String>,
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LoanError::validation(format!("payment amount must be positive, got {}", self.amount)));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(LoanError::validation("idempotency key cannot be blank"));
            }
        }
        Ok(())
    }
}

/// a ledger entry; final once completed or failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub idempotency_key: Option<String>,
    /// part that reduced the outstanding balance
    pub applied_amount: Money,
    /// part held as credit
    pub credit_amount: Money,
    pub recorded_by: ActorId,
    pub recorded_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Payment {
    pub fn pending(
        tenant_id: TenantId,
        loan_id: LoanId,
        request: PaymentRequest,
        recorded_by: ActorId,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            loan_id,
            amount: request.amount,
            paid_at: request.paid_at,
            status: PaymentStatus::Pending,
            method: request.method,
            reference: request.reference,
            idempotency_key: request.idempotency_key,
            applied_amount: Money::ZERO,
            credit_amount: Money::ZERO,
            recorded_by,
            recorded_at,
            completed_at: None,
            failure_reason: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status != PaymentStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.is_final() {
            return Err(LoanError::PaymentImmutable { id: self.id });
        }
        Ok(())
    }

    pub(crate) fn complete(&mut self, applied: Money, credited: Money, at: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        self.status = PaymentStatus::Completed;
        self.applied_amount = applied;
        self.credit_amount = credited;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, reason: &str, at: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        if reason.trim().is_empty() {
            return Err(LoanError::validation("a failure reason is required"));
        }
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.completed_at = Some(at);
        Ok(())
    }
}

/// sum of completed payments in a ledger
pub fn completed_total<'a>(ledger: impl IntoIterator<Item = &'a Payment>) -> Money {
    ledger.into_iter().filter(|p| p.is_completed()).map(|p| p.amount).sum()
}

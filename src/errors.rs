use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{LoanStatus, Permission, TenantId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoanError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: LoanStatus,
        to: LoanStatus,
    },

    #[error("insufficient principal: principal {principal}, advance deductions {deductions}")]
    InsufficientPrincipal {
        principal: Money,
        deductions: Money,
    },

    #[error("invalid schedule: {message}")]
    InvalidSchedule {
        message: String,
    },

    #[error("overpayment: outstanding {outstanding}, attempted {attempted}")]
    Overpayment {
        outstanding: Money,
        attempted: Money,
    },

    #[error("cash override required for collector {collector} on {for_date}")]
    CashOverrideRequired {
        collector: Uuid,
        for_date: NaiveDate,
    },

    #[error("a valid cash override already exists: {existing}")]
    DuplicateOverride {
        existing: Uuid,
    },

    #[error("reconciliation invariant violated on loan {loan_id}: cached {cached}, derived {derived}")]
    ReconciliationInvariantViolation {
        loan_id: Uuid,
        cached: Money,
        derived: Money,
    },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: Uuid,
    },

    #[error("missing permission: {permission:?}")]
    Unauthorized {
        permission: Permission,
    },

    #[error("record belongs to tenant {record}, caller is tenant {caller}")]
    TenantMismatch {
        caller: TenantId,
        record: TenantId,
    },

    #[error("concurrent modification of {entity} {id}: expected version {expected}, found {found}")]
    ConcurrentModification {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("system asset cannot be modified: {name}")]
    ProtectedAsset {
        name: String,
    },

    #[error("product {id} is referenced by an active loan")]
    ProductInUse {
        id: Uuid,
    },

    #[error("payment {id} is final and cannot change")]
    PaymentImmutable {
        id: Uuid,
    },
}

impl LoanError {
    pub fn validation(message: impl Into<String>) -> Self {
        LoanError::Validation {
            message: message.into(),
        }
    }

    /// data corruption; the affected loan must not be mutated further
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoanError::ReconciliationInvariantViolation { .. })
    }

    /// safe for the caller to reload and try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoanError::ConcurrentModification { .. })
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;

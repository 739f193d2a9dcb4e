use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TenantId = Uuid;
pub type LoanId = Uuid;
pub type ProductId = Uuid;
pub type PaymentId = Uuid;
pub type OverrideId = Uuid;
pub type CustomerId = Uuid;
pub type CollectorId = Uuid;
pub type ActorId = Uuid;

/// loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// application submitted, not yet validated
    Applied,
    /// validated against the product, waiting for an approver
    UnderReview,
    /// terms fixed, funds not yet released
    Approved,
    /// funds released, repayments running
    Disbursed,
    /// fully repaid
    Closed,
    /// past final due date plus grace with balance outstanding
    Defaulted,
    Rejected,
    Cancelled,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Closed | LoanStatus::Defaulted | LoanStatus::Rejected | LoanStatus::Cancelled
        )
    }

    /// states from which a customer or agent may still cancel
    pub fn is_pre_disbursement(&self) -> bool {
        matches!(
            self,
            LoanStatus::Applied | LoanStatus::UnderReview | LoanStatus::Approved
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// how interest is spread over the installments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestMethod {
    /// `principal * rate * termDays / 365`, divided evenly
    Flat,
    /// charged per installment on the principal still outstanding
    ReducingBalance,
}

/// which customers may borrow under a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    All,
    Selected(BTreeSet<CustomerId>),
}

impl Availability {
    pub fn admits(&self, customer: &CustomerId) -> bool {
        match self {
            Availability::All => true,
            Availability::Selected(customers) => customers.contains(customer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisbursementMethod {
    Cash,
    MobileMoney,
    BankTransfer,
}

/// cash-day actions gated by the overdue-cash block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashAction {
    IssueFloat,
    Disbursement,
}

/// capabilities an authenticated principal may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    ManageProducts,
    CreateApplication,
    ApproveLoan,
    DisburseLoan,
    CancelLoan,
    RecordPayment,
    ViewLoan,
    MarkDefault,
    GrantCashOverride,
    RevokeCashOverride,
    ViewCashOverride,
}

/// authenticated caller as resolved by the outer auth layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub actor_id: ActorId,
    pub tenant_id: TenantId,
    pub permissions: BTreeSet<Permission>,
}

impl Principal {
    pub fn new(actor_id: ActorId, tenant_id: TenantId, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            actor_id,
            tenant_id,
            permissions: permissions.into_iter().collect(),
        }
    }

    /// principal holding every permission
    pub fn superuser(actor_id: ActorId, tenant_id: TenantId) -> Self {
        use Permission::*;
        Self::new(
            actor_id,
            tenant_id,
            [
                ManageProducts,
                CreateApplication,
                ApproveLoan,
                DisburseLoan,
                CancelLoan,
                RecordPayment,
                ViewLoan,
                MarkDefault,
                GrantCashOverride,
                RevokeCashOverride,
                ViewCashOverride,
            ],
        )
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability() {
        let chosen = Uuid::new_v4();
        let other = Uuid::new_v4();
        let selected = Availability::Selected([chosen].into_iter().collect());

        assert!(Availability::All.admits(&other));
        assert!(selected.admits(&chosen));
        assert!(!selected.admits(&other));
    }

    #[test]
    fn test_status_groups() {
        assert!(LoanStatus::Approved.is_pre_disbursement());
        assert!(!LoanStatus::Disbursed.is_pre_disbursement());
        assert!(LoanStatus::Cancelled.is_terminal());
        assert!(!LoanStatus::Disbursed.is_terminal());
    }

    #[test]
    fn test_principal_permissions() {
        let p = Principal::new(Uuid::new_v4(), Uuid::new_v4(), [Permission::ViewLoan]);
        assert!(p.has(Permission::ViewLoan));
        assert!(!p.has(Permission::ApproveLoan));
    }
}

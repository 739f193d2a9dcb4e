/// serialization support for loans and schedules
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::Result;
use crate::lifecycle::{Loan, TransitionRecord};
use crate::payments::{Installment, RepaymentSchedule, Statement};
use crate::types::{CustomerId, DisbursementMethod, InterestMethod, LoanId, LoanStatus, ProductId, TenantId};

/// serializable view of a loan
#[derive(Debug, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub application: ApplicationView,
    pub financial: Option<FinancialView>,
    pub disbursement: Option<DisbursementView>,
    pub repayment: Option<RepaymentView>,
    pub transitions: Vec<TransitionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationView {
    pub requested_amount: Money,
    pub requested_term_days: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinancialView {
    pub principal: Money,
    pub interest_rate: Rate,
    pub term_days: u32,
    pub interest_method: Option<InterestMethod>,
    pub total_due: Option<Money>,
    pub amount_paid: Money,
    pub credit_balance: Money,
    pub outstanding_balance: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisbursementView {
    pub method: DisbursementMethod,
    pub reference: String,
    pub disbursed_at: DateTime<Utc>,
    pub net_disbursed: Money,
    pub deducted_in_advance: Money,
    pub final_due_date: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepaymentView {
    pub total_paid: Money,
    pub total_outstanding: Money,
    pub overdue_amount: Money,
    pub overdue_installments: u32,
    pub next_due_date: Option<DateTime<Utc>>,
}

impl LoanView {
    pub fn from_loan(loan: &Loan, statement: Option<&Statement>) -> Result<Self> {
        let total_due = match &loan.terms {
            Some(_) => Some(loan.total_due()?),
            None => None,
        };

        let financial = loan.approved.as_ref().map(|approved| FinancialView {
            principal: approved.amount,
            interest_rate: approved.interest_rate,
            term_days: approved.term_days,
            interest_method: loan.terms.as_ref().map(|t| t.schedule.interest_method),
            total_due,
            amount_paid: loan.amount_paid,
            credit_balance: loan.credit_balance,
            outstanding_balance: loan.outstanding_balance,
        });

        let disbursement = match (&loan.disbursement, &loan.terms) {
            (Some(d), Some(terms)) => Some(DisbursementView {
                method: d.method.clone(),
                reference: d.reference.clone(),
                disbursed_at: d.disbursed_at,
                net_disbursed: d.net_amount,
                deducted_in_advance: terms.breakdown.deducted_in_advance,
                final_due_date: terms.final_due_date(),
            }),
            _ => None,
        };

        Ok(LoanView {
            id: loan.id,
            tenant_id: loan.tenant_id,
            customer_id: loan.customer_id,
            product_id: loan.product_id,
            status: loan.status,
            created_at: loan.created_at,
            updated_at: loan.updated_at,
            application: ApplicationView {
                requested_amount: loan.application.requested_amount,
                requested_term_days: loan.application.requested_term_days,
                submitted_at: loan.application.submitted_at,
            },
            financial,
            disbursement,
            repayment: statement.map(|s| RepaymentView {
                total_paid: s.total_paid,
                total_outstanding: s.total_outstanding,
                overdue_amount: s.overdue_amount,
                overdue_installments: s.overdue_installments,
                next_due_date: s.next_due_date,
            }),
            transitions: loan.transitions.clone(),
        })
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// serializable repayment plan
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleView {
    pub loan_id: LoanId,
    pub installments: Vec<Installment>,
    pub total_principal: Money,
    pub total_interest: Money,
    pub total_fees: Money,
    pub total_due: Money,
}

impl ScheduleView {
    pub fn new(loan_id: LoanId, schedule: &RepaymentSchedule) -> Self {
        ScheduleView {
            loan_id,
            installments: schedule.installments(),
            total_principal: schedule.total_principal(),
            total_interest: schedule.total_interest(),
            total_fees: schedule.total_fees(),
            total_due: schedule.total_due(),
        }
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::ScheduleTerms;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn test_schedule_view_json() {
        let terms = ScheduleTerms::new(
            Money::from_major(10_000),
            Rate::from_percentage(24),
            30,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            InterestMethod::Flat,
            4,
        );
        let schedule = RepaymentSchedule::generate(terms).unwrap();
        let view = ScheduleView::new(Uuid::new_v4(), &schedule);

        let json = view.to_json_pretty().unwrap();
        assert!(json.contains("\"total_due\": \"10197.26\""));
        assert_eq!(view.installments.len(), 4);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;

use super::amortization::{Installment, RepaymentSchedule};

/// parts of an installment a payment can cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterfallComponent {
    Fee,
    Interest,
    Principal,
}

/// order in which money is applied inside each installment.
///
/// Installments themselves are always covered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWaterfall {
    order: [WaterfallComponent; 3],
}

impl Default for PaymentWaterfall {
    fn default() -> Self {
        Self::standard()
    }
}

impl PaymentWaterfall {
    /// standard waterfall: fees -> interest -> principal
    pub fn standard() -> Self {
        Self {
            order: [WaterfallComponent::Fee, WaterfallComponent::Interest, WaterfallComponent::Principal],
        }
    }

    /// spread `applied` (money that reduced the balance) over the schedule
    pub fn allocate(&self, schedule: &RepaymentSchedule, applied: Money, now: DateTime<Utc>) -> Statement {
        let mut remaining = applied.max(Money::ZERO);
        let mut lines = Vec::with_capacity(schedule.len());

        for installment in schedule {
            let mut line = StatementLine {
                paid_fee: Money::ZERO,
                paid_interest: Money::ZERO,
                paid_principal: Money::ZERO,
                outstanding: installment.amount_due(),
                state: InstallmentState::Upcoming,
                installment,
            };

            for component in self.order {
                if remaining.is_zero() {
                    break;
                }
                let (owed, paid) = match component {
                    WaterfallComponent::Fee => (line.installment.fee, &mut line.paid_fee),
                    WaterfallComponent::Interest => (line.installment.interest, &mut line.paid_interest),
                    WaterfallComponent::Principal => (line.installment.principal, &mut line.paid_principal),
                };
                let payment = remaining.min(owed);
                *paid = payment;
                remaining -= payment;
            }

            line.outstanding = line.installment.amount_due() - line.paid();
            line.state = InstallmentState::classify(&line, now);
            lines.push(line);
        }

        Statement::from_lines(lines, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentState {
    Paid,
    PartiallyPaid,
    Upcoming,
    Overdue,
}

impl InstallmentState {
    fn classify(line: &StatementLine, now: DateTime<Utc>) -> Self {
        if line.outstanding.is_zero() {
            InstallmentState::Paid
        } else if line.installment.due_date < now {
            InstallmentState::Overdue
        } else if line.paid().is_positive() {
            InstallmentState::PartiallyPaid
        } else {
            InstallmentState::Upcoming
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub installment: Installment,
    pub paid_fee: Money,
    pub paid_interest: Money,
    pub paid_principal: Money,
    pub outstanding: Money,
    pub state: InstallmentState,
}

impl StatementLine {
    pub fn paid(&self) -> Money {
        self.paid_fee + self.paid_interest + self.paid_principal
    }
}

/// schedule with payments laid over it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub lines: Vec<StatementLine>,
    pub total_due: Money,
    pub total_paid: Money,
    pub total_outstanding: Money,
    pub overdue_amount: Money,
    pub overdue_installments: u32,
    pub next_due_date: Option<DateTime<Utc>>,
    pub as_of: DateTime<Utc>,
}

impl Statement {
    fn from_lines(lines: Vec<StatementLine>, as_of: DateTime<Utc>) -> Self {
        let overdue: Vec<&StatementLine> = lines
            .iter()
            .filter(|l| l.state == InstallmentState::Overdue)
            .collect();

        Self {
            total_due: lines.iter().map(|l| l.installment.amount_due()).sum(),
            total_paid: lines.iter().map(|l| l.paid()).sum(),
            total_outstanding: lines.iter().map(|l| l.outstanding).sum(),
            overdue_amount: overdue.iter().map(|l| l.outstanding).sum(),
            overdue_installments: overdue.len() as u32,
            next_due_date: lines
                .iter()
                .find(|l| !l.outstanding.is_zero() && l.installment.due_date >= as_of)
                .map(|l| l.installment.due_date),
            as_of,
            lines,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.total_outstanding.is_zero()
    }
}

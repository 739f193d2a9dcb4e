//! Applying completed payments to a loan.
//!
//! The cached balances on `Loan` are updated incrementally, then the same
//! figures are derived again from the frozen terms and the payment ledger. Any
//! difference is data corruption and surfaces as
//! `LoanError::ReconciliationInvariantViolation`; nothing is corrected silently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::lifecycle::Loan;
use crate::types::{ActorId, LoanStatus, PaymentId};

use super::{completed_total, Payment};

/// balances computed from terms and ledger alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedBalance {
    pub total_due: Money,
    pub amount_paid: Money,
    pub outstanding: Money,
    pub credit: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub payment_id: PaymentId,
    pub applied: Money,
    pub credited: Money,
    pub outstanding_before: Money,
    pub outstanding_after: Money,
    pub closed: bool,
}

pub struct Reconciler;

impl Reconciler {
    pub fn derive<'a>(loan: &Loan, ledger: impl IntoIterator<Item = &'a Payment>) -> Result<DerivedBalance> {
        let total_due = loan.total_due()?;
        let amount_paid = completed_total(ledger.into_iter().filter(|p| p.loan_id == loan.id));
        Ok(DerivedBalance {
            total_due,
            amount_paid,
            outstanding: total_due.saturating_sub(amount_paid),
            credit: amount_paid.saturating_sub(total_due),
        })
    }

    /// check the cached balances against the ledger without changing anything
    pub fn verify<'a>(loan: &Loan, ledger: impl IntoIterator<Item = &'a Payment>) -> Result<DerivedBalance> {
        let derived = Self::derive(loan, ledger)?;
        Self::compare(loan, &derived)?;
        Ok(derived)
    }

    /// apply a pending payment, closing the loan when nothing is left owing.
    ///
    /// `ledger` holds the loan's other payments. Both `loan` and `payment` are
    /// left untouched unless every check passes.
    pub fn apply(
        loan: &mut Loan,
        payment: &mut Payment,
        ledger: &[Payment],
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        if loan.status != LoanStatus::Disbursed {
            return Err(LoanError::validation(format!(
                "loan {} does not accept payments while {}",
                loan.id, loan.status
            )));
        }
        if payment.loan_id != loan.id || payment.tenant_id != loan.tenant_id {
            return Err(LoanError::validation("payment does not belong to this loan"));
        }
        if !payment.amount.is_positive() {
            return Err(LoanError::validation("payment amount must be positive"));
        }

        let others: Vec<&Payment> = ledger.iter().filter(|p| p.id != payment.id).collect();
        Self::verify(loan, others.iter().copied())?;

        let allow_overpayment = loan.terms.as_ref().map_or(false, |t| t.allow_overpayment);
        let outstanding_before = loan.outstanding_balance;
        let applied = payment.amount.min(outstanding_before);
        let credited = payment.amount - applied;
        if credited.is_positive() && !allow_overpayment {
            return Err(LoanError::Overpayment {
                outstanding: outstanding_before,
                attempted: payment.amount,
            });
        }

        let mut next_payment = payment.clone();
        next_payment.complete(applied, credited, now)?;

        let mut next_loan = loan.clone();
        next_loan.amount_paid += payment.amount;
        next_loan.credit_balance += credited;
        next_loan.outstanding_balance = outstanding_before - applied;
        next_loan.updated_at = now;

        // recompute from scratch and hold the incremental figures to it
        Self::verify(&next_loan, others.iter().copied().chain(std::iter::once(&next_payment)))?;

        let closed = next_loan.outstanding_balance.is_zero();
        if closed {
            next_loan.transition(LoanStatus::Closed, actor, now, Some("repaid in full".to_string()))?;
        }

        info!(
            loan_id = %loan.id,
            payment_id = %payment.id,
            applied = %applied,
            credited = %credited,
            outstanding = %next_loan.outstanding_balance,
            "payment reconciled"
        );

        *loan = next_loan;
        *payment = next_payment;

        Ok(ReconciliationOutcome {
            payment_id: payment.id,
            applied,
            credited,
            outstanding_before,
            outstanding_after: loan.outstanding_balance,
            closed,
        })
    }

    fn compare(loan: &Loan, derived: &DerivedBalance) -> Result<()> {
        let mismatch = [
            (loan.outstanding_balance, derived.outstanding),
            (loan.amount_paid, derived.amount_paid),
            (loan.credit_balance, derived.credit),
        ]
        .into_iter()
        .find(|(cached, derived)| cached != derived);

        if let Some((cached, derived)) = mismatch {
            error!(
                loan_id = %loan.id,
                tenant_id = %loan.tenant_id,
                cached = %cached,
                derived = %derived,
                "reconciliation invariant violated"
            );
            return Err(LoanError::ReconciliationInvariantViolation {
                loan_id: loan.id,
                cached,
                derived,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, FeeRule, LoanProduct};
    use crate::decimal::Rate;
    use crate::lifecycle::{ApprovalRequest, DisbursementRequest, LoanApplication, NewApplication};
    use crate::payments::PaymentRequest;
    use crate::types::{DisbursementMethod, PaymentMethod};
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use uuid::Uuid;

    pub(super) fn disbursed_loan(allow_overpayment: bool, time: &SafeTimeProvider) -> Loan {
        let tenant = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let engine = EngineConfig::default();
        let mut product = LoanProduct::daily_micro_loan(tenant, time.now());
        product.fee_schedule.platform_fee = FeeRule::None;
        product.fee_schedule.processing_fee = FeeRule::None;
        product.allow_overpayment = allow_overpayment;

        let mut loan = Loan::new(
            tenant,
            LoanApplication::from_request(
                NewApplication {
                    customer_id: Uuid::new_v4(),
                    product_id: product.id,
                    requested_amount: Money::from_major(10_000),
                    requested_term_days: 30,
                    underwriting: None,
                },
                actor,
                time.now(),
            ),
        );
        loan.submit_for_review(actor, time.now()).unwrap();
        loan.approve(
            &ApprovalRequest {
                approved_amount: Money::from_major(10_000),
                approved_term_days: 30,
                interest_rate: Rate::from_percentage(24),
            },
            &product,
            &engine,
            actor,
            time.now(),
        )
        .unwrap();
        loan.disburse(
            &DisbursementRequest {
                method: DisbursementMethod::BankTransfer,
                reference: "TRX-1".to_string(),
                collector_id: None,
            },
            &product,
            &engine,
            actor,
            time.now(),
        )
        .unwrap();
        loan
    }

    pub(super) fn pending(loan: &Loan, amount: Money, time: &SafeTimeProvider) -> Payment {
        Payment::pending(
            loan.tenant_id,
            loan.id,
            PaymentRequest {
                amount,
                paid_at: time.now(),
                method: PaymentMethod::MobileMoney,
                reference: None,
                idempotency_key: None,
            },
            Uuid::new_v4(),
            time.now(),
        )
    }

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
    }

    #[test]
    fn test_partial_then_final_payment_closes() {
        let time = time();
        let mut loan = disbursed_loan(false, &time);
        let total = loan.total_due().unwrap();
        assert_eq!(total, Money::from_str_exact("10197.26").unwrap());

        let mut ledger = Vec::new();
        let mut first = pending(&loan, Money::from_major(4_000), &time);
        let outcome = Reconciler::apply(&mut loan, &mut first, &ledger, Uuid::new_v4(), time.now()).unwrap();
        assert!(!outcome.closed);
        assert_eq!(loan.outstanding_balance, total - Money::from_major(4_000));
        ledger.push(first);

        let mut last = pending(&loan, loan.outstanding_balance, &time);
        let outcome = Reconciler::apply(&mut loan, &mut last, &ledger, Uuid::new_v4(), time.now()).unwrap();
        assert!(outcome.closed);
        assert_eq!(loan.status, LoanStatus::Closed);
        assert_eq!(loan.outstanding_balance, Money::ZERO);
        assert_eq!(loan.amount_paid, total);
        ledger.push(last);

        assert!(Reconciler::verify(&loan, &ledger).is_ok());
    }

    #[test]
    fn test_overpayment_rejected_without_permission() {
        let time = time();
        let mut loan = disbursed_loan(false, &time);
        let before = loan.clone();
        let mut payment = pending(&loan, Money::from_major(20_000), &time);

        let result = Reconciler::apply(&mut loan, &mut payment, &[], Uuid::new_v4(), time.now());
        assert!(matches!(result, Err(LoanError::Overpayment { .. })));
        assert_eq!(loan, before);
        assert!(!payment.is_final());
    }

    #[test]
    fn test_overpayment_recorded_as_credit() {
        let time = time();
        let mut loan = disbursed_loan(true, &time);
        let total = loan.total_due().unwrap();
        let mut payment = pending(&loan, total + Money::from_major(50), &time);

        let outcome = Reconciler::apply(&mut loan, &mut payment, &[], Uuid::new_v4(), time.now()).unwrap();
        assert!(outcome.closed);
        assert_eq!(outcome.applied, total);
        assert_eq!(outcome.credited, Money::from_major(50));
        assert_eq!(loan.credit_balance, Money::from_major(50));
        assert_eq!(payment.credit_amount, Money::from_major(50));
        assert!(Reconciler::verify(&loan, [&payment]).is_ok());
    }

    #[test]
    fn test_stale_cache_is_fatal() {
        let time = time();
        let mut loan = disbursed_loan(false, &time);
        loan.outstanding_balance -= Money::CENT;
        let before = loan.clone();
        let mut payment = pending(&loan, Money::from_major(100), &time);

        let err = Reconciler::apply(&mut loan, &mut payment, &[], Uuid::new_v4(), time.now()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(loan, before);
    }

    #[test]
    fn test_closed_loan_refuses_payments() {
        let time = time();
        let mut loan = disbursed_loan(false, &time);
        let mut payment = pending(&loan, loan.outstanding_balance, &time);
        Reconciler::apply(&mut loan, &mut payment, &[], Uuid::new_v4(), time.now()).unwrap();

        let mut again = pending(&loan, Money::from_major(1), &time);
        let ledger = vec![payment];
        assert!(matches!(
            Reconciler::apply(&mut loan, &mut again, &ledger, Uuid::new_v4(), time.now()),
            Err(LoanError::Validation { .. })
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::tests::{disbursed_loan, pending};
    use super::*;
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use proptest::prelude::*;
    use uuid::Uuid;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn payments_summing_to_total_due_close_the_loan(
            weights in proptest::collection::vec(1u32..100u32, 1..8),
        ) {
            let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
            let mut loan = disbursed_loan(false, &time);
            let total = loan.total_due().unwrap();

            // cut the total into weighted parts; the last part takes the remainder
            let weight_sum: u32 = weights.iter().sum();
            let mut parts: Vec<Money> = weights
                .iter()
                .map(|w| Money::from_minor(total.to_minor() * *w as i64 / weight_sum as i64))
                .collect();
            let head: Money = parts[..parts.len() - 1].iter().sum();
            if let Some(tail) = parts.last_mut() {
                *tail = total - head;
            }

            let mut ledger = Vec::new();
            for part in parts.into_iter().filter(|p| p.is_positive()) {
                let mut payment = pending(&loan, part, &time);
                Reconciler::apply(&mut loan, &mut payment, &ledger, Uuid::new_v4(), time.now()).unwrap();
                ledger.push(payment);
            }

            prop_assert_eq!(loan.status, LoanStatus::Closed);
            prop_assert_eq!(loan.outstanding_balance, Money::ZERO);
            prop_assert_eq!(loan.amount_paid, completed_total(&ledger));
        }
    }
}

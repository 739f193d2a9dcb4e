use std::iter::FusedIterator;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::InterestMethod;

/// one due-date line of a repayment plan; computed, never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based
    pub sequence: u32,
    pub due_date: DateTime<Utc>,
    /// days after disbursement
    pub day_offset: u32,
    pub principal: Money,
    pub interest: Money,
    pub fee: Money,
    /// running total of everything due up to and including this installment
    pub cumulative_due: Money,
}

impl Installment {
    pub fn amount_due(&self) -> Money {
        self.principal + self.interest + self.fee
    }
}

/// inputs the schedule is a pure function of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTerms {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_days: u32,
    pub disbursement_date: DateTime<Utc>,
    pub interest_method: InterestMethod,
    pub installments: u32,
    /// fees collected through installments rather than at disbursement
    pub scheduled_fees: Money,
    /// interest was taken out of the principal at disbursement
    pub interest_prepaid: bool,
}

impl ScheduleTerms {
    pub fn new(
        principal: Money,
        annual_rate: Rate,
        term_days: u32,
        disbursement_date: DateTime<Utc>,
        interest_method: InterestMethod,
        installments: u32,
    ) -> Self {
        Self {
            principal,
            annual_rate,
            term_days,
            disbursement_date,
            interest_method,
            installments,
            scheduled_fees: Money::ZERO,
            interest_prepaid: false,
        }
    }

    pub fn with_scheduled_fees(mut self, fees: Money) -> Self {
        self.scheduled_fees = fees;
        self
    }

    pub fn with_prepaid_interest(mut self, prepaid: bool) -> Self {
        self.interest_prepaid = prepaid;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.principal.is_positive() {
            return Err(LoanError::InvalidSchedule {
                message: format!("principal must be positive, got {}", self.principal),
            });
        }
        if self.installments == 0 {
            return Err(LoanError::InvalidSchedule {
                message: "at least one installment is required".to_string(),
            });
        }
        if self.term_days < self.installments {
            return Err(LoanError::InvalidSchedule {
                message: format!(
                    "term of {} days cannot hold {} installments",
                    self.term_days, self.installments
                ),
            });
        }
        if self.annual_rate.is_negative() {
            return Err(LoanError::InvalidSchedule {
                message: format!("interest rate cannot be negative, got {}", self.annual_rate),
            });
        }
        if self.scheduled_fees.is_negative() {
            return Err(LoanError::InvalidSchedule {
                message: "scheduled fees cannot be negative".to_string(),
            });
        }
        Ok(())
    }

    /// total interest these terms charge, whether collected up front or not
    pub fn interest_charge(&self) -> Money {
        match self.interest_method {
            InterestMethod::Flat => self.principal.simple_interest(self.annual_rate, self.term_days),
            InterestMethod::ReducingBalance => {
                let (share, last) = self.principal.even_share(self.installments);
                let mut remaining = self.principal;
                let mut previous = 0;
                let mut total = Money::ZERO;
                for seq in 1..=self.installments {
                    let offset = day_offset(self.term_days, self.installments, seq);
                    total += remaining.simple_interest(self.annual_rate, offset.saturating_sub(previous));
                    remaining -= if seq == self.installments { last } else { share };
                    previous = offset;
                }
                total
            }
        }
    }
}

/// days from disbursement to installment `seq`.
///
/// Offsets are proportional to `term_days` rounded half-up, so the last one is
/// always exactly `term_days` and rounding never drifts past the term.
pub fn day_offset(term_days: u32, installments: u32, seq: u32) -> u32 {
    if seq >= installments {
        return term_days;
    }
    let scaled = term_days as u64 * seq as u64;
    ((scaled + installments as u64 / 2) / installments as u64) as u32
}

/// deterministic repayment plan for a set of terms.
///
/// Holds only the terms and the per-installment shares; installments are
/// produced lazily by `iter()`, which can be restarted any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepaymentSchedule {
    terms: ScheduleTerms,
    principal_share: (Money, Money),
    flat_interest_share: (Money, Money),
    fee_share: (Money, Money),
}

impl RepaymentSchedule {
    pub fn generate(terms: ScheduleTerms) -> Result<Self> {
        terms.validate()?;

        let n = terms.installments;
        let flat_interest = match (terms.interest_method, terms.interest_prepaid) {
            (InterestMethod::Flat, false) => terms.interest_charge(),
            _ => Money::ZERO,
        };

        debug!(
            principal = %terms.principal,
            term_days = terms.term_days,
            installments = n,
            method = ?terms.interest_method,
            "generating repayment schedule"
        );

        Ok(Self {
            terms,
            principal_share: terms.principal.even_share(n),
            flat_interest_share: flat_interest.even_share(n),
            fee_share: terms.scheduled_fees.even_share(n),
        })
    }

    pub fn terms(&self) -> &ScheduleTerms {
        &self.terms
    }

    pub fn iter(&self) -> Installments<'_> {
        Installments {
            schedule: self,
            next_seq: 1,
            remaining_principal: self.terms.principal,
            previous_offset: 0,
            cumulative_due: Money::ZERO,
        }
    }

    pub fn installments(&self) -> Vec<Installment> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.terms.installments as usize
    }

    pub fn is_empty(&self) -> bool {
        self.terms.installments == 0
    }

    pub fn total_principal(&self) -> Money {
        self.iter().map(|i| i.principal).sum()
    }

    pub fn total_interest(&self) -> Money {
        self.iter().map(|i| i.interest).sum()
    }

    pub fn total_fees(&self) -> Money {
        self.iter().map(|i| i.fee).sum()
    }

    /// everything payable through the installments
    pub fn total_due(&self) -> Money {
        self.iter().last().map(|i| i.cumulative_due).unwrap_or(Money::ZERO)
    }

    pub fn final_due_date(&self) -> DateTime<Utc> {
        self.terms.disbursement_date + Duration::days(self.terms.term_days as i64)
    }

    fn pick(share: (Money, Money), is_last: bool) -> Money {
        if is_last {
            share.1
        } else {
            share.0
        }
    }
}

impl<'a> IntoIterator for &'a RepaymentSchedule {
    type Item = Installment;
    type IntoIter = Installments<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// lazy installment iterator over a `RepaymentSchedule`
#[derive(Debug, Clone)]
pub struct Installments<'a> {
    schedule: &'a RepaymentSchedule,
    next_seq: u32,
    remaining_principal: Money,
    previous_offset: u32,
    cumulative_due: Money,
}

impl Iterator for Installments<'_> {
    type Item = Installment;

    fn next(&mut self) -> Option<Installment> {
        let terms = &self.schedule.terms;
        if self.next_seq > terms.installments {
            return None;
        }

        let seq = self.next_seq;
        let is_last = seq == terms.installments;
        let offset = day_offset(terms.term_days, terms.installments, seq);

        let principal = RepaymentSchedule::pick(self.schedule.principal_share, is_last);
        let interest = match (terms.interest_prepaid, terms.interest_method) {
            (true, _) => Money::ZERO,
            (false, InterestMethod::Flat) => RepaymentSchedule::pick(self.schedule.flat_interest_share, is_last),
            (false, InterestMethod::ReducingBalance) => self
                .remaining_principal
                .simple_interest(terms.annual_rate, offset - self.previous_offset),
        };
        let fee = RepaymentSchedule::pick(self.schedule.fee_share, is_last);

        self.cumulative_due += principal + interest + fee;
        self.remaining_principal -= principal;
        self.previous_offset = offset;
        self.next_seq += 1;

        Some(Installment {
            sequence: seq,
            due_date: terms.disbursement_date + Duration::days(offset as i64),
            day_offset: offset,
            principal,
            interest,
            fee,
            cumulative_due: self.cumulative_due,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.schedule.terms.installments + 1).saturating_sub(self.next_seq) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Installments<'_> {}

impl FusedIterator for Installments<'_> {}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn principal_components_sum_to_principal(
            cents in 100i64..100_000_000i64,
            rate_bps in 0u32..10_000u32,
            installments in 1u32..52u32,
            extra_days in 0u32..365u32,
            reducing in any::<bool>(),
        ) {
            let method = if reducing { InterestMethod::ReducingBalance } else { InterestMethod::Flat };
            let terms = ScheduleTerms::new(
                Money::from_minor(cents),
                Rate::from_bps(rate_bps),
                installments + extra_days,
                Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
                method,
                installments,
            );
            let schedule = RepaymentSchedule::generate(terms).unwrap();

            prop_assert_eq!(schedule.total_principal(), Money::from_minor(cents));
            prop_assert!(schedule.iter().all(|i| !i.principal.is_negative()));
            prop_assert_eq!(schedule.total_interest(), terms.interest_charge());
        }

        #[test]
        fn due_dates_strictly_increase_and_end_on_term(
            term_days in 1u32..400u32,
            installments in 1u32..60u32,
        ) {
            prop_assume!(term_days >= installments);
            let offsets: Vec<u32> = (1..=installments)
                .map(|seq| day_offset(term_days, installments, seq))
                .collect();

            prop_assert!(offsets.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(offsets[0] >= 1);
            prop_assert_eq!(*offsets.last().unwrap(), term_days);
        }

        #[test]
        fn schedule_is_deterministic(
            cents in 100i64..10_000_000i64,
            installments in 1u32..24u32,
        ) {
            let terms = ScheduleTerms::new(
                Money::from_minor(cents),
                Rate::from_percentage(24),
                installments * 7,
                Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
                InterestMethod::ReducingBalance,
                installments,
            );
            let a = RepaymentSchedule::generate(terms).unwrap().installments();
            let b = RepaymentSchedule::generate(terms).unwrap().installments();
            prop_assert_eq!(
                serde_json::to_string(&a).unwrap(),
                serde_json::to_string(&b).unwrap()
            );
        }
    }
}

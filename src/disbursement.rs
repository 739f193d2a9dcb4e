//! Fee and net-disbursement calculation.
//!
//! The three advance-deduction flags are orthogonal. `DeductionPlan` turns them
//! into one explicit `Collection` per charge so the calculator never branches on
//! raw booleans: a charge is either taken out of the principal at disbursement
//! or left payable through the repayment schedule, never both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DeductionFlags, LoanProduct};
use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::payments::amortization::ScheduleTerms;

/// a charge that can be collected up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charge {
    PlatformFee,
    ProcessingFee,
    Interest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collection {
    /// subtracted from the principal before release
    InAdvance,
    /// carried by the installments
    ThroughSchedule,
}

impl Collection {
    fn from_flag(deduct: bool) -> Self {
        if deduct {
            Collection::InAdvance
        } else {
            Collection::ThroughSchedule
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionPlan {
    pub platform_fee: Collection,
    pub processing_fee: Collection,
    pub interest: Collection,
}

impl From<DeductionFlags> for DeductionPlan {
    fn from(flags: DeductionFlags) -> Self {
        Self {
            platform_fee: Collection::from_flag(flags.deduct_platform_fee_in_advance),
            processing_fee: Collection::from_flag(flags.deduct_processing_fee_in_advance),
            interest: Collection::from_flag(flags.deduct_interest_in_advance),
        }
    }
}

impl DeductionPlan {
    pub fn effects(&self) -> [(Charge, Collection); 3] {
        [
            (Charge::PlatformFee, self.platform_fee),
            (Charge::ProcessingFee, self.processing_fee),
            (Charge::Interest, self.interest),
        ]
    }
}

/// amounts charged on a loan before deciding how each is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charges {
    pub platform_fee: Money,
    pub processing_fee: Money,
    pub total_interest: Money,
}

impl Charges {
    pub fn amount(&self, charge: Charge) -> Money {
        match charge {
            Charge::PlatformFee => self.platform_fee,
            Charge::ProcessingFee => self.processing_fee,
            Charge::Interest => self.total_interest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionLine {
    pub charge: Charge,
    pub amount: Money,
    pub collection: Collection,
}

/// fixed at disbursement and stored with the loan terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementBreakdown {
    pub principal: Money,
    pub charges: Charges,
    pub plan: DeductionPlan,
    pub lines: Vec<DeductionLine>,
    pub deducted_in_advance: Money,
    pub net_disbursed: Money,
}

impl DisbursementBreakdown {
    /// fees left for the installments to collect
    pub fn scheduled_fees(&self) -> Money {
        self.lines
            .iter()
            .filter(|l| l.charge != Charge::Interest && l.collection == Collection::ThroughSchedule)
            .map(|l| l.amount)
            .sum()
    }

    pub fn interest_prepaid(&self) -> bool {
        self.plan.interest == Collection::InAdvance
    }
}

pub struct DisbursementCalculator;

impl DisbursementCalculator {
    /// `net = principal - every charge the plan collects in advance`
    pub fn calculate(flags: DeductionFlags, principal: Money, charges: Charges) -> Result<DisbursementBreakdown> {
        if !principal.is_positive() {
            return Err(LoanError::validation("principal must be positive"));
        }
        let plan = DeductionPlan::from(flags);

        let lines: Vec<DeductionLine> = plan
            .effects()
            .iter()
            .map(|&(charge, collection)| DeductionLine {
                charge,
                amount: charges.amount(charge),
                collection,
            })
            .collect();

        if lines.iter().any(|l| l.amount.is_negative()) {
            return Err(LoanError::validation("charges cannot be negative"));
        }

        let deducted_in_advance: Money = lines
            .iter()
            .filter(|l| l.collection == Collection::InAdvance)
            .map(|l| l.amount)
            .sum();

        let net_disbursed = principal - deducted_in_advance;
        if !net_disbursed.is_positive() {
            return Err(LoanError::InsufficientPrincipal {
                principal,
                deductions: deducted_in_advance,
            });
        }

        Ok(DisbursementBreakdown {
            principal,
            charges,
            plan,
            lines,
            deducted_in_advance,
            net_disbursed,
        })
    }

    /// price a loan under a product and derive the schedule terms to freeze with it
    pub fn for_product(
        product: &LoanProduct,
        principal: Money,
        annual_rate: Rate,
        term_days: u32,
        installments: u32,
        disbursement_date: DateTime<Utc>,
    ) -> Result<(DisbursementBreakdown, ScheduleTerms)> {
        let base = ScheduleTerms::new(
            principal,
            annual_rate,
            term_days,
            disbursement_date,
            product.interest_method,
            installments,
        );
        base.validate()?;

        let charges = Charges {
            platform_fee: product.fee_schedule.platform_fee.amount_for(principal),
            processing_fee: product.fee_schedule.processing_fee.amount_for(principal),
            total_interest: base.interest_charge(),
        };
        let breakdown = Self::calculate(product.deductions, principal, charges)?;

        let terms = base
            .with_scheduled_fees(breakdown.scheduled_fees())
            .with_prepaid_interest(breakdown.interest_prepaid());

        Ok((breakdown, terms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeeRule;
    use crate::payments::amortization::RepaymentSchedule;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn flags(platform: bool, processing: bool, interest: bool) -> DeductionFlags {
        DeductionFlags {
            deduct_platform_fee_in_advance: platform,
            deduct_processing_fee_in_advance: processing,
            deduct_interest_in_advance: interest,
        }
    }

    fn charges() -> Charges {
        Charges {
            platform_fee: Money::from_major(50),
            processing_fee: Money::from_major(100),
            total_interest: Money::from_major(200),
        }
    }

    #[test]
    fn test_processing_fee_deducted_in_advance() {
        let breakdown = DisbursementCalculator::calculate(
            flags(false, true, false),
            Money::from_major(5_000),
            Charges {
                platform_fee: Money::ZERO,
                processing_fee: Money::from_major(100),
                total_interest: Money::ZERO,
            },
        )
        .unwrap();

        assert_eq!(breakdown.net_disbursed, Money::from_major(4_900));
        assert_eq!(breakdown.deducted_in_advance, Money::from_major(100));
        assert_eq!(breakdown.scheduled_fees(), Money::ZERO);
        assert!(!breakdown.interest_prepaid());
    }

    #[test]
    fn test_flags_are_independent() {
        let principal = Money::from_major(1_000);

        let none = DisbursementCalculator::calculate(flags(false, false, false), principal, charges()).unwrap();
        assert_eq!(none.net_disbursed, principal);
        assert_eq!(none.scheduled_fees(), Money::from_major(150));

        let platform = DisbursementCalculator::calculate(flags(true, false, false), principal, charges()).unwrap();
        assert_eq!(platform.net_disbursed, Money::from_major(950));
        assert_eq!(platform.scheduled_fees(), Money::from_major(100));

        let interest = DisbursementCalculator::calculate(flags(false, false, true), principal, charges()).unwrap();
        assert_eq!(interest.net_disbursed, Money::from_major(800));
        assert!(interest.interest_prepaid());

        let all = DisbursementCalculator::calculate(flags(true, true, true), principal, charges()).unwrap();
        assert_eq!(all.net_disbursed, Money::from_major(650));
        assert_eq!(all.scheduled_fees(), Money::ZERO);
    }

    #[test]
    fn test_insufficient_principal() {
        let result = DisbursementCalculator::calculate(flags(true, true, true), Money::from_major(350), charges());
        assert_eq!(
            result,
            Err(LoanError::InsufficientPrincipal {
                principal: Money::from_major(350),
                deductions: Money::from_major(350),
            })
        );
    }

    #[test]
    fn test_fee_deducted_in_advance_is_not_charged_again_in_schedule() {
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
        let mut product = LoanProduct::daily_micro_loan(Uuid::new_v4(), start);
        product.fee_schedule.platform_fee = FeeRule::None;
        product.fee_schedule.processing_fee = FeeRule::Flat(Money::from_major(100));
        product.deductions = flags(false, true, false);

        let (breakdown, terms) = DisbursementCalculator::for_product(
            &product,
            Money::from_major(5_000),
            Rate::from_percentage(24),
            28,
            4,
            start,
        )
        .unwrap();

        assert_eq!(breakdown.net_disbursed, Money::from_major(4_900));
        // the 100 is recovered through the full 5000 principal, not as a schedule fee
        assert_eq!(terms.scheduled_fees, Money::ZERO);

        let schedule = RepaymentSchedule::generate(terms).unwrap();
        assert_eq!(schedule.total_principal(), Money::from_major(5_000));
        assert_eq!(schedule.total_interest(), breakdown.charges.total_interest);
    }

    #[test]
    fn test_undeducted_fee_moves_to_schedule() {
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
        let mut product = LoanProduct::daily_micro_loan(Uuid::new_v4(), start);
        product.fee_schedule.platform_fee = FeeRule::None;
        product.fee_schedule.processing_fee = FeeRule::Flat(Money::from_major(100));
        product.deductions = flags(false, false, false);

        let (breakdown, terms) = DisbursementCalculator::for_product(
            &product,
            Money::from_major(5_000),
            Rate::from_percentage(24),
            28,
            4,
            start,
        )
        .unwrap();

        assert_eq!(breakdown.net_disbursed, Money::from_major(5_000));
        let schedule = RepaymentSchedule::generate(terms).unwrap();
        assert_eq!(schedule.total_fees(), Money::from_major(100));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn net_plus_advance_deductions_equals_principal(
            principal_cents in 10_000i64..100_000_000i64,
            platform_cents in 0i64..500_000i64,
            processing_cents in 0i64..500_000i64,
            interest_cents in 0i64..2_000_000i64,
            platform in any::<bool>(),
            processing in any::<bool>(),
            interest in any::<bool>(),
        ) {
            let flags = DeductionFlags {
                deduct_platform_fee_in_advance: platform,
                deduct_processing_fee_in_advance: processing,
                deduct_interest_in_advance: interest,
            };
            let charges = Charges {
                platform_fee: Money::from_minor(platform_cents),
                processing_fee: Money::from_minor(processing_cents),
                total_interest: Money::from_minor(interest_cents),
            };
            let principal = Money::from_minor(principal_cents);

            match DisbursementCalculator::calculate(flags, principal, charges) {
                Ok(breakdown) => {
                    let advance: Money = breakdown
                        .lines
                        .iter()
                        .filter(|l| l.collection == Collection::InAdvance)
                        .map(|l| l.amount)
                        .sum();
                    prop_assert_eq!(breakdown.net_disbursed + advance, principal);
                    prop_assert!(breakdown.net_disbursed.is_positive());

                    // every charge is collected exactly once
                    let scheduled_interest = if breakdown.interest_prepaid() { Money::ZERO } else { charges.total_interest };
                    prop_assert_eq!(
                        advance + breakdown.scheduled_fees() + scheduled_interest,
                        charges.platform_fee + charges.processing_fee + charges.total_interest
                    );
                }
                Err(LoanError::InsufficientPrincipal { deductions, .. }) => {
                    prop_assert!(deductions >= principal);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}

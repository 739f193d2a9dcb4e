use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::{Availability, InterestMethod, ProductId, TenantId};

/// engine-wide defaults, loadable from json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_grace_period_days: u32,
    pub default_installments: u32,
    pub max_override_duration_hours: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_grace_period_days: 7,
            default_installments: 4,
            max_override_duration_hours: 48,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| LoanError::validation(format!("engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_installments == 0 {
            return Err(LoanError::validation("default_installments must be at least 1"));
        }
        if self.max_override_duration_hours == 0 {
            return Err(LoanError::validation("max_override_duration_hours must be at least 1"));
        }
        Ok(())
    }
}

/// a single fee, fixed or proportional to the approved principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeRule {
    None,
    Flat(Money),
    /// percent of principal, e.g. 2 for 2%
    PercentOfPrincipal(Decimal),
}

impl FeeRule {
    pub fn amount_for(&self, principal: Money) -> Money {
        match self {
            FeeRule::None => Money::ZERO,
            FeeRule::Flat(amount) => *amount,
            FeeRule::PercentOfPrincipal(pct) => principal.percentage(*pct),
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        let bad = match self {
            FeeRule::None => false,
            FeeRule::Flat(amount) => amount.is_negative(),
            FeeRule::PercentOfPrincipal(pct) => *pct < Decimal::ZERO || *pct >= dec!(100),
        };
        if bad {
            return Err(LoanError::validation(format!("{} is out of range", label)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub platform_fee: FeeRule,
    pub processing_fee: FeeRule,
}

/// which components are taken out of the principal at disbursement.
///
/// The three flags are orthogonal; see `disbursement::DeductionPlan` for their effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeductionFlags {
    pub deduct_platform_fee_in_advance: bool,
    pub deduct_processing_fee_in_advance: bool,
    pub deduct_interest_in_advance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRange {
    pub min_days: u32,
    pub max_days: u32,
}

impl TermRange {
    pub fn contains(&self, days: u32) -> bool {
        days >= self.min_days && days <= self.max_days
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: Money,
    pub max: Money,
}

impl AmountRange {
    pub fn contains(&self, amount: Money) -> bool {
        amount >= self.min && amount <= self.max
    }
}

/// loan product, owned by one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanProduct {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub name: String,
    pub interest_rate: Rate,
    pub interest_method: InterestMethod,
    pub term_days: TermRange,
    pub amount_range: AmountRange,
    /// `None` falls back to `EngineConfig::default_installments`
    pub installment_count: Option<u32>,
    pub fee_schedule: FeeSchedule,
    pub deductions: DeductionFlags,
    pub availability: Availability,
    /// `None` falls back to `EngineConfig::default_grace_period_days`
    pub grace_period_days: Option<u32>,
    /// accept payments beyond the total due and hold the excess as credit
    pub allow_overpayment: bool,
    /// tenant-seeded product that cannot be renamed, changed or retired
    pub is_system_asset: bool,
    pub retired: bool,
    pub created_at: DateTime<Utc>,
}

impl LoanProduct {
    /// short-term daily micro loan: flat 24% annual, platform fee taken up front
    pub fn daily_micro_loan(tenant_id: TenantId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: "Daily Micro Loan".to_string(),
            interest_rate: Rate::from_percentage(24),
            interest_method: InterestMethod::Flat,
            term_days: TermRange { min_days: 7, max_days: 90 },
            amount_range: AmountRange {
                min: Money::from_major(500),
                max: Money::from_major(50_000),
            },
            installment_count: Some(4),
            fee_schedule: FeeSchedule {
                platform_fee: FeeRule::PercentOfPrincipal(dec!(1)),
                processing_fee: FeeRule::Flat(Money::from_major(100)),
            },
            deductions: DeductionFlags {
                deduct_platform_fee_in_advance: true,
                deduct_processing_fee_in_advance: false,
                deduct_interest_in_advance: false,
            },
            availability: Availability::All,
            grace_period_days: None,
            allow_overpayment: false,
            is_system_asset: false,
            retired: false,
            created_at,
        }
    }

    /// weekly group loan: reducing balance, interest and fees collected at disbursement
    pub fn weekly_group_loan(tenant_id: TenantId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: "Weekly Group Loan".to_string(),
            interest_rate: Rate::from_percentage(30),
            interest_method: InterestMethod::ReducingBalance,
            term_days: TermRange { min_days: 28, max_days: 182 },
            amount_range: AmountRange {
                min: Money::from_major(1_000),
                max: Money::from_major(200_000),
            },
            installment_count: Some(12),
            fee_schedule: FeeSchedule {
                platform_fee: FeeRule::Flat(Money::from_major(250)),
                processing_fee: FeeRule::PercentOfPrincipal(dec!(2)),
            },
            deductions: DeductionFlags {
                deduct_platform_fee_in_advance: true,
                deduct_processing_fee_in_advance: true,
                deduct_interest_in_advance: true,
            },
            availability: Availability::All,
            grace_period_days: Some(14),
            allow_overpayment: true,
            is_system_asset: false,
            retired: false,
            created_at,
        }
    }

    pub fn installments(&self, engine: &EngineConfig) -> u32 {
        self.installment_count.unwrap_or(engine.default_installments)
    }

    pub fn grace_period(&self, engine: &EngineConfig) -> u32 {
        self.grace_period_days.unwrap_or(engine.default_grace_period_days)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoanError::validation("product name is required"));
        }
        if self.interest_rate.is_negative() {
            return Err(LoanError::validation("interest rate cannot be negative"));
        }
        if self.term_days.min_days == 0 || self.term_days.min_days > self.term_days.max_days {
            return Err(LoanError::validation("term day range is invalid"));
        }
        if !self.amount_range.min.is_positive() || self.amount_range.min > self.amount_range.max {
            return Err(LoanError::validation("amount range is invalid"));
        }
        if self.installment_count == Some(0) {
            return Err(LoanError::validation("installment count must be at least 1"));
        }
        if let Availability::Selected(customers) = &self.availability {
            if customers.is_empty() {
                return Err(LoanError::validation("selected availability needs at least one customer"));
            }
        }
        self.fee_schedule.platform_fee.validate("platform fee")?;
        self.fee_schedule.processing_fee.validate("processing fee")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        assert!(LoanProduct::daily_micro_loan(tenant, now).validate().is_ok());
        assert!(LoanProduct::weekly_group_loan(tenant, now).validate().is_ok());
    }

    #[test]
    fn test_fee_rules() {
        let principal = Money::from_major(5_000);
        assert_eq!(FeeRule::None.amount_for(principal), Money::ZERO);
        assert_eq!(FeeRule::Flat(Money::from_major(100)).amount_for(principal), Money::from_major(100));
        assert_eq!(FeeRule::PercentOfPrincipal(dec!(1.5)).amount_for(principal), Money::from_major(75));
    }

    #[test]
    fn test_invalid_product_rejected() {
        let mut product = LoanProduct::daily_micro_loan(Uuid::new_v4(), Utc::now());
        product.term_days = TermRange { min_days: 30, max_days: 7 };
        assert!(product.validate().is_err());

        let mut product = LoanProduct::daily_micro_loan(Uuid::new_v4(), Utc::now());
        product.availability = Availability::Selected(Default::default());
        assert!(product.validate().is_err());

        let mut product = LoanProduct::daily_micro_loan(Uuid::new_v4(), Utc::now());
        product.fee_schedule.processing_fee = FeeRule::PercentOfPrincipal(dec!(120));
        assert!(product.validate().is_err());
    }

    #[test]
    fn test_product_falls_back_to_engine_defaults() {
        let engine = EngineConfig::default();
        let daily = LoanProduct::daily_micro_loan(Uuid::new_v4(), Utc::now());
        assert_eq!(daily.grace_period(&engine), 7);
        assert_eq!(daily.installments(&engine), 4);

        let weekly = LoanProduct::weekly_group_loan(Uuid::new_v4(), Utc::now());
        assert_eq!(weekly.grace_period(&engine), 14);
        assert_eq!(weekly.installments(&engine), 12);
    }

    #[test]
    fn test_engine_config_from_json() {
        let config = EngineConfig::from_json_str(r#"{"default_grace_period_days": 3}"#).unwrap();
        assert_eq!(config.default_grace_period_days, 3);
        assert_eq!(config.default_installments, 4);

        assert!(EngineConfig::from_json_str(r#"{"default_installments": 0}"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}

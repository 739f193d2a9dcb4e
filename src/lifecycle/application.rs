use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LoanProduct;
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::types::{ActorId, CustomerId, ProductId};

/// optional underwriting data captured with an application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderwritingInputs {
    pub credit_score: Option<u32>,
    pub monthly_income: Option<Money>,
    pub employment: Option<String>,
    pub collateral: Option<String>,
}

/// application as submitted by a customer or agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplication {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub requested_amount: Money,
    pub requested_term_days: u32,
    pub underwriting: Option<UnderwritingInputs>,
}

impl NewApplication {
    /// business rules against the product; the transport layer is not trusted
    pub fn validate_against(&self, product: &LoanProduct) -> Result<()> {
        if product.id != self.product_id {
            return Err(LoanError::validation("application references a different product"));
        }
        if product.retired {
            return Err(LoanError::validation(format!("product {} is retired", product.name)));
        }
        if !self.requested_amount.is_positive() {
            return Err(LoanError::validation("requested amount must be positive"));
        }
        if !product.amount_range.contains(self.requested_amount) {
            return Err(LoanError::validation(format!(
                "requested amount {} outside product range {} - {}",
                self.requested_amount, product.amount_range.min, product.amount_range.max
            )));
        }
        if !product.term_days.contains(self.requested_term_days) {
            return Err(LoanError::validation(format!(
                "requested term {} days outside product range {} - {}",
                self.requested_term_days, product.term_days.min_days, product.term_days.max_days
            )));
        }
        if !product.availability.admits(&self.customer_id) {
            return Err(LoanError::validation(format!(
                "customer {} is not eligible for product {}",
                self.customer_id, product.name
            )));
        }
        if let Some(inputs) = &self.underwriting {
            if inputs.monthly_income.map_or(false, |m| m.is_negative()) {
                return Err(LoanError::validation("monthly income cannot be negative"));
            }
        }
        Ok(())
    }
}

/// application as held by the loan aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub requested_amount: Money,
    pub requested_term_days: u32,
    pub underwriting: Option<UnderwritingInputs>,
    pub submitted_by: ActorId,
    pub submitted_at: DateTime<Utc>,
}

impl LoanApplication {
    pub fn from_request(request: NewApplication, submitted_by: ActorId, submitted_at: DateTime<Utc>) -> Self {
        Self {
            customer_id: request.customer_id,
            product_id: request.product_id,
            requested_amount: request.requested_amount,
            requested_term_days: request.requested_term_days,
            underwriting: request.underwriting,
            submitted_by,
            submitted_at,
        }
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::{EngineConfig, LoanProduct};
use crate::decimal::{Money, Rate};
use crate::disbursement::{DisbursementBreakdown, DisbursementCalculator};
use crate::errors::{LoanError, Result};
use crate::payments::amortization::{RepaymentSchedule, ScheduleTerms};
use crate::types::{ActorId, CollectorId, CustomerId, DisbursementMethod, LoanId, LoanStatus, ProductId, TenantId};

use super::application::LoanApplication;
use super::{can_transition, is_default_eligible, TransitionRecord};

/// approver decision for a loan under review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approved_amount: Money,
    pub approved_term_days: u32,
    pub interest_rate: Rate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedTerms {
    pub amount: Money,
    pub term_days: u32,
    pub interest_rate: Rate,
    pub approved_by: ActorId,
    pub approved_at: DateTime<Utc>,
}

/// everything fixed at disbursement; the schedule is regenerated from this
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub schedule: ScheduleTerms,
    pub breakdown: DisbursementBreakdown,
    pub grace_period_days: u32,
    pub allow_overpayment: bool,
}

impl LoanTerms {
    pub fn final_due_date(&self) -> DateTime<Utc> {
        self.schedule.disbursement_date + Duration::days(self.schedule.term_days as i64)
    }

    pub fn repayment_schedule(&self) -> Result<RepaymentSchedule> {
        RepaymentSchedule::generate(self.schedule)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub method: DisbursementMethod,
    /// external transfer or receipt reference; repeats are treated as retries
    pub reference: String,
    /// collector handing over cash, subject to the overdue-cash block
    pub collector_id: Option<CollectorId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbursement {
    pub method: DisbursementMethod,
    pub reference: String,
    pub collector_id: Option<CollectorId>,
    pub net_amount: Money,
    pub disbursed_by: ActorId,
    pub disbursed_at: DateTime<Utc>,
}

/// loan aggregate, from application to a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub status: LoanStatus,
    pub application: LoanApplication,
    pub approved: Option<ApprovedTerms>,
    pub terms: Option<LoanTerms>,
    pub disbursement: Option<Disbursement>,

    /// sum of completed payments, credit included
    pub amount_paid: Money,
    /// overpay held on account
    pub credit_balance: Money,
    /// cached; must always equal the value derived from terms and the ledger
    pub outstanding_balance: Money,

    pub version: u64,
    pub transitions: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// new loan in `Applied`
    pub fn new(tenant_id: TenantId, application: LoanApplication) -> Self {
        let now = application.submitted_at;
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            customer_id: application.customer_id,
            product_id: application.product_id,
            status: LoanStatus::Applied,
            application,
            approved: None,
            terms: None,
            disbursement: None,
            amount_paid: Money::ZERO,
            credit_balance: Money::ZERO,
            outstanding_balance: Money::ZERO,
            version: 0,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn transition(
        &mut self,
        to: LoanStatus,
        actor: ActorId,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<()> {
        self.ensure_transition(to)?;
        self.transitions.push(TransitionRecord {
            from: self.status,
            to,
            actor,
            at,
            reason,
        });
        info!(loan_id = %self.id, from = %self.status, to = %to, "loan transitioned");
        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    fn ensure_transition(&self, to: LoanStatus) -> Result<()> {
        if can_transition(self.status, to) {
            Ok(())
        } else {
            Err(LoanError::InvalidTransition { from: self.status, to })
        }
    }

    /// validated application moves straight to review
    pub fn submit_for_review(&mut self, actor: ActorId, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::UnderReview, actor, at, None)
    }

    pub fn approve(
        &mut self,
        request: &ApprovalRequest,
        product: &LoanProduct,
        engine: &EngineConfig,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_transition(LoanStatus::Approved)?;

        if product.id != self.product_id {
            return Err(LoanError::validation("approval product does not match the application"));
        }
        if product.retired {
            return Err(LoanError::validation(format!("product {} is retired", product.name)));
        }
        if !request.approved_amount.is_positive() {
            return Err(LoanError::validation("approved amount must be positive"));
        }
        if request.approved_amount > self.application.requested_amount {
            return Err(LoanError::validation(format!(
                "approved amount {} exceeds requested amount {}",
                request.approved_amount, self.application.requested_amount
            )));
        }
        if request.approved_amount > product.amount_range.max {
            return Err(LoanError::validation(format!(
                "approved amount {} exceeds product maximum {}",
                request.approved_amount, product.amount_range.max
            )));
        }
        if !product.term_days.contains(request.approved_term_days) {
            return Err(LoanError::validation(format!(
                "approved term {} days outside product range {} - {}",
                request.approved_term_days, product.term_days.min_days, product.term_days.max_days
            )));
        }
        if request.interest_rate.is_negative() {
            return Err(LoanError::validation("interest rate cannot be negative"));
        }

        // pricing depends on amounts and term only, so an unworkable loan fails here
        DisbursementCalculator::for_product(
            product,
            request.approved_amount,
            request.interest_rate,
            request.approved_term_days,
            product.installments(engine),
            at,
        )?;

        self.approved = Some(ApprovedTerms {
            amount: request.approved_amount,
            term_days: request.approved_term_days,
            interest_rate: request.interest_rate,
            approved_by: actor,
            approved_at: at,
        });
        self.transition(LoanStatus::Approved, actor, at, None)
    }

    pub fn reject(&mut self, reason: &str, actor: ActorId, at: DateTime<Utc>) -> Result<()> {
        self.ensure_transition(LoanStatus::Rejected)?;
        if reason.trim().is_empty() {
            return Err(LoanError::validation("a rejection reason is required"));
        }
        self.transition(LoanStatus::Rejected, actor, at, Some(reason.to_string()))
    }

    pub fn cancel(&mut self, reason: Option<&str>, actor: ActorId, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::Cancelled, actor, at, reason.map(str::to_string))
    }

    /// fix the net amount and freeze the schedule parameters
    pub fn disburse(
        &mut self,
        request: &DisbursementRequest,
        product: &LoanProduct,
        engine: &EngineConfig,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_transition(LoanStatus::Disbursed)?;

        if request.reference.trim().is_empty() {
            return Err(LoanError::validation("a disbursement reference is required"));
        }
        if product.id != self.product_id {
            return Err(LoanError::validation("disbursement product does not match the loan"));
        }
        let approved = self
            .approved
            .as_ref()
            .ok_or_else(|| LoanError::validation("approved loan has no approved terms"))?;

        let (breakdown, schedule_terms) = DisbursementCalculator::for_product(
            product,
            approved.amount,
            approved.interest_rate,
            approved.term_days,
            product.installments(engine),
            at,
        )?;
        let schedule = RepaymentSchedule::generate(schedule_terms)?;

        self.outstanding_balance = schedule.total_due();
        self.disbursement = Some(Disbursement {
            method: request.method.clone(),
            reference: request.reference.clone(),
            collector_id: request.collector_id,
            net_amount: breakdown.net_disbursed,
            disbursed_by: actor,
            disbursed_at: at,
        });
        self.terms = Some(LoanTerms {
            schedule: schedule_terms,
            breakdown,
            grace_period_days: product.grace_period(engine),
            allow_overpayment: product.allow_overpayment,
        });
        self.transition(LoanStatus::Disbursed, actor, at, None)
    }

    pub fn mark_defaulted(&mut self, actor: ActorId, at: DateTime<Utc>) -> Result<()> {
        self.ensure_transition(LoanStatus::Defaulted)?;
        if !is_default_eligible(self, at) {
            return Err(LoanError::validation(
                "loan is not past its final due date and grace period with a balance outstanding",
            ));
        }
        self.transition(LoanStatus::Defaulted, actor, at, None)
    }

    pub fn is_disbursed_with(&self, reference: &str) -> bool {
        self.disbursement.as_ref().map_or(false, |d| d.reference == reference)
    }

    /// approved or disbursed loans pin their product
    pub fn is_active(&self) -> bool {
        matches!(self.status, LoanStatus::Approved | LoanStatus::Disbursed)
    }

    pub fn schedule(&self) -> Result<RepaymentSchedule> {
        self.terms
            .as_ref()
            .ok_or_else(|| LoanError::validation(format!("loan {} has no schedule before disbursement", self.id)))?
            .repayment_schedule()
    }

    /// everything the borrower owes through the schedule
    pub fn total_due(&self) -> Result<Money> {
        Ok(self.schedule()?.total_due())
    }

    pub fn net_disbursed(&self) -> Option<Money> {
        self.disbursement.as_ref().map(|d| d.net_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeeRule;
    use crate::lifecycle::application::NewApplication;
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn setup() -> (LoanProduct, Loan, SafeTimeProvider) {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()));
        let tenant = Uuid::new_v4();
        let mut product = LoanProduct::daily_micro_loan(tenant, time.now());
        product.fee_schedule.platform_fee = FeeRule::None;
        product.fee_schedule.processing_fee = FeeRule::Flat(Money::from_major(100));
        product.deductions.deduct_platform_fee_in_advance = false;
        product.deductions.deduct_processing_fee_in_advance = true;

        let application = LoanApplication::from_request(
            NewApplication {
                customer_id: Uuid::new_v4(),
                product_id: product.id,
                requested_amount: Money::from_major(5_000),
                requested_term_days: 30,
                underwriting: None,
            },
            Uuid::new_v4(),
            time.now(),
        );
        (product, Loan::new(tenant, application), time)
    }

    fn approval() -> ApprovalRequest {
        ApprovalRequest {
            approved_amount: Money::from_major(5_000),
            approved_term_days: 30,
            interest_rate: Rate::from_percentage(24),
        }
    }

    fn cash_request() -> DisbursementRequest {
        DisbursementRequest {
            method: DisbursementMethod::MobileMoney,
            reference: "MM-0001".to_string(),
            collector_id: None,
        }
    }

    #[test]
    fn test_happy_path_to_disbursed() {
        let (product, mut loan, time) = setup();
        let engine = EngineConfig::default();
        let actor = Uuid::new_v4();

        loan.submit_for_review(actor, time.now()).unwrap();
        loan.approve(&approval(), &product, &engine, actor, time.now()).unwrap();
        assert_eq!(loan.status, LoanStatus::Approved);

        time.test_control().unwrap().advance(Duration::days(1));
        loan.disburse(&cash_request(), &product, &engine, actor, time.now()).unwrap();

        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.net_disbursed(), Some(Money::from_major(4_900)));
        assert_eq!(loan.outstanding_balance, loan.total_due().unwrap());
        assert_eq!(loan.transitions.len(), 3);
        assert_eq!(loan.transitions[2].at, time.now());

        let terms = loan.terms.as_ref().unwrap();
        assert_eq!(terms.final_due_date(), time.now() + Duration::days(30));
        assert_eq!(terms.grace_period_days, 7);
    }

    #[test]
    fn test_approval_rules() {
        let (product, mut loan, time) = setup();
        let engine = EngineConfig::default();
        let actor = Uuid::new_v4();

        // approving straight from Applied skips review
        assert_eq!(
            loan.approve(&approval(), &product, &engine, actor, time.now()),
            Err(LoanError::InvalidTransition {
                from: LoanStatus::Applied,
                to: LoanStatus::Approved,
            })
        );

        loan.submit_for_review(actor, time.now()).unwrap();
        let mut over = approval();
        over.approved_amount = Money::from_major(6_000);
        assert!(matches!(
            loan.approve(&over, &product, &engine, actor, time.now()),
            Err(LoanError::Validation { .. })
        ));
        assert_eq!(loan.status, LoanStatus::UnderReview);
        assert!(loan.approved.is_none());
    }

    #[test]
    fn test_reject_requires_reason() {
        let (_, mut loan, time) = setup();
        let actor = Uuid::new_v4();
        loan.submit_for_review(actor, time.now()).unwrap();

        assert!(loan.reject("  ", actor, time.now()).is_err());
        loan.reject("income not verified", actor, time.now()).unwrap();
        assert_eq!(loan.status, LoanStatus::Rejected);
        assert_eq!(loan.transitions.last().unwrap().reason.as_deref(), Some("income not verified"));
    }

    #[test]
    fn test_cancel_only_before_disbursement() {
        let (product, mut loan, time) = setup();
        let engine = EngineConfig::default();
        let actor = Uuid::new_v4();

        loan.submit_for_review(actor, time.now()).unwrap();
        loan.approve(&approval(), &product, &engine, actor, time.now()).unwrap();
        loan.disburse(&cash_request(), &product, &engine, actor, time.now()).unwrap();

        assert_eq!(
            loan.cancel(Some("changed mind"), actor, time.now()),
            Err(LoanError::InvalidTransition {
                from: LoanStatus::Disbursed,
                to: LoanStatus::Cancelled,
            })
        );
    }

    #[test]
    fn test_default_eligibility_waits_for_grace() {
        let (product, mut loan, time) = setup();
        let engine = EngineConfig::default();
        let actor = Uuid::new_v4();

        loan.submit_for_review(actor, time.now()).unwrap();
        loan.approve(&approval(), &product, &engine, actor, time.now()).unwrap();
        loan.disburse(&cash_request(), &product, &engine, actor, time.now()).unwrap();

        let control = time.test_control().unwrap();
        control.advance(Duration::days(37));
        assert!(!is_default_eligible(&loan, time.now()));
        assert!(loan.mark_defaulted(actor, time.now()).is_err());

        control.advance(Duration::hours(1));
        assert!(is_default_eligible(&loan, time.now()));
        loan.mark_defaulted(actor, time.now()).unwrap();
        assert_eq!(loan.status, LoanStatus::Defaulted);
    }

    #[test]
    fn test_schedule_unavailable_before_disbursement() {
        let (_, loan, _) = setup();
        assert!(loan.schedule().is_err());
    }
}

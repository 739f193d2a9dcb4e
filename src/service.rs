//! Tenant-scoped facade over the engine components.
//!
//! Every operation checks a permission on the caller, reads only from the
//! caller's tenant partition and commits each loan mutation with an optimistic
//! version check. Nothing is retried here; `ConcurrentModification` goes back
//! to the caller.

use std::sync::Arc;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use tracing::{info, instrument, warn};

use crate::catalog::ProductCatalog;
use crate::config::{EngineConfig, LoanProduct};
use crate::errors::{LoanError, Result};
use crate::events::{Event, EventSink};
use crate::lifecycle::{self, ApprovalRequest, DisbursementRequest, Loan, LoanApplication, NewApplication};
use crate::overrides::{CashDayPolicy, CashOverride, CashOverrideAuthorizer, GrantRequest, RevokeOutcome, RevokeRequest};
use crate::payments::{Installment, Payment, PaymentRequest, PaymentWaterfall, Reconciler, Statement};
use crate::store::{LoanStore, OverrideStore, ProductStore};
use crate::types::{
    CashAction, CollectorId, LoanId, LoanStatus, OverrideId, PaymentId, Permission, Principal, ProductId, TenantId,
};
use crate::views::{LoanView, ScheduleView};

/// result of recording or completing a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub loan: Loan,
    /// the idempotency key matched an earlier payment; nothing was applied
    pub replayed: bool,
}

pub struct LoanService {
    config: EngineConfig,
    catalog: ProductCatalog,
    loans: Arc<dyn LoanStore>,
    authorizer: CashOverrideAuthorizer,
    cash_policy: Arc<dyn CashDayPolicy>,
    events: Arc<dyn EventSink>,
}

impl LoanService {
    pub fn new<S>(
        config: EngineConfig,
        store: Arc<S>,
        cash_policy: Arc<dyn CashDayPolicy>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self>
    where
        S: ProductStore + LoanStore + OverrideStore + 'static,
    {
        config.validate()?;
        let products: Arc<dyn ProductStore> = store.clone();
        let loans: Arc<dyn LoanStore> = store.clone();
        let overrides: Arc<dyn OverrideStore> = store;
        Ok(Self {
            authorizer: CashOverrideAuthorizer::new(overrides, &config),
            catalog: ProductCatalog::new(products, loans.clone()),
            loans,
            cash_policy,
            events,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn authorize(principal: &Principal, permission: Permission) -> Result<()> {
        if !principal.has(permission) {
            warn!(actor = %principal.actor_id, permission = ?permission, "permission denied");
            return Err(LoanError::Unauthorized { permission });
        }
        Ok(())
    }

    fn ensure_tenant(principal: &Principal, record: TenantId) -> Result<()> {
        if principal.tenant_id != record {
            warn!(caller = %principal.tenant_id, record = %record, "cross-tenant access refused");
            return Err(LoanError::TenantMismatch {
                caller: principal.tenant_id,
                record,
            });
        }
        Ok(())
    }

    fn load_loan(&self, principal: &Principal, loan_id: LoanId) -> Result<Loan> {
        let loan = self.loans.get_loan(principal.tenant_id, loan_id)?;
        Self::ensure_tenant(principal, loan.tenant_id)?;
        Ok(loan)
    }

    fn load_product(&self, principal: &Principal, product_id: ProductId) -> Result<LoanProduct> {
        let product = self.catalog.get(principal.tenant_id, product_id)?;
        Self::ensure_tenant(principal, product.tenant_id)?;
        Ok(product)
    }

    /// store the loan at `expected_version + 1` and announce transitions made since `since`
    fn commit(&self, loan: Loan, expected_version: u64, since: usize, payment: Option<Payment>) -> Result<Loan> {
        let committed = self.loans.update_loan(loan.tenant_id, loan, expected_version, payment)?;
        self.publish_transitions(&committed, since);
        Ok(committed)
    }

    fn publish_transitions(&self, loan: &Loan, since: usize) {
        for record in loan.transitions.iter().skip(since) {
            self.events.publish(Event::LoanTransitioned {
                tenant_id: loan.tenant_id,
                loan_id: loan.id,
                actor: record.actor,
                from: record.from,
                to: record.to,
                reason: record.reason.clone(),
                timestamp: record.at,
            });
        }
    }

    fn report_fatal(&self, loan: &Loan, err: &LoanError, time: &SafeTimeProvider) {
        if let LoanError::ReconciliationInvariantViolation { cached, derived, .. } = err {
            self.events.publish(Event::ReconciliationFailed {
                tenant_id: loan.tenant_id,
                loan_id: loan.id,
                cached: *cached,
                derived: *derived,
                timestamp: time.now(),
            });
        }
    }

    // applications and lifecycle

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, product_id = %request.product_id))]
    pub fn create_application(
        &self,
        principal: &Principal,
        request: NewApplication,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        Self::authorize(principal, Permission::CreateApplication)?;
        let product = self.load_product(principal, request.product_id)?;
        request.validate_against(&product)?;

        let now = time.now();
        let mut loan = Loan::new(
            principal.tenant_id,
            LoanApplication::from_request(request, principal.actor_id, now),
        );
        loan.submit_for_review(principal.actor_id, now)?;

        self.loans.insert_loan(principal.tenant_id, loan.clone())?;
        self.publish_transitions(&loan, 0);
        info!(loan_id = %loan.id, amount = %loan.application.requested_amount, "application accepted for review");
        Ok(loan)
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn approve(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        request: ApprovalRequest,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        Self::authorize(principal, Permission::ApproveLoan)?;
        let mut loan = self.load_loan(principal, loan_id)?;
        let product = self.load_product(principal, loan.product_id)?;
        let (version, since) = (loan.version, loan.transitions.len());

        loan.approve(&request, &product, &self.config, principal.actor_id, time.now())?;
        self.commit(loan, version, since, None)
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn reject(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        reason: &str,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        Self::authorize(principal, Permission::ApproveLoan)?;
        let mut loan = self.load_loan(principal, loan_id)?;
        let (version, since) = (loan.version, loan.transitions.len());

        loan.reject(reason, principal.actor_id, time.now())?;
        self.commit(loan, version, since, None)
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn cancel(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        reason: Option<&str>,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        Self::authorize(principal, Permission::CancelLoan)?;
        let mut loan = self.load_loan(principal, loan_id)?;
        let (version, since) = (loan.version, loan.transitions.len());

        loan.cancel(reason, principal.actor_id, time.now())?;
        self.commit(loan, version, since, None)
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn disburse(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        request: DisbursementRequest,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        Self::authorize(principal, Permission::DisburseLoan)?;
        let mut loan = self.load_loan(principal, loan_id)?;

        if loan.is_disbursed_with(&request.reference) {
            info!(reference = %request.reference, "disbursement already recorded");
            return Ok(loan);
        }

        if !lifecycle::can_transition(loan.status, LoanStatus::Disbursed) {
            return Err(LoanError::InvalidTransition {
                from: loan.status,
                to: LoanStatus::Disbursed,
            });
        }

        let now = time.now();
        if let Some(collector) = request.collector_id {
            self.ensure_cash_allowed(principal.tenant_id, collector, CashAction::Disbursement, time)?;
        }

        let product = self.load_product(principal, loan.product_id)?;
        let (version, since) = (loan.version, loan.transitions.len());
        loan.disburse(&request, &product, &self.config, principal.actor_id, now)?;
        let loan = self.commit(loan, version, since, None)?;

        info!(
            net_disbursed = %loan.net_disbursed().unwrap_or_default(),
            outstanding = %loan.outstanding_balance,
            "loan disbursed"
        );
        Ok(loan)
    }

    /// fails with `CashOverrideRequired` when the collector is blocked and no override covers the action
    fn ensure_cash_allowed(
        &self,
        tenant_id: TenantId,
        collector: CollectorId,
        action: CashAction,
        time: &SafeTimeProvider,
    ) -> Result<()> {
        let now = time.now();
        let Some(for_date) = self.cash_policy.blocked_day(tenant_id, collector, now) else {
            return Ok(());
        };
        if self.authorizer.is_permitted(tenant_id, collector, for_date, action, now)? {
            info!(collector_id = %collector, for_date = %for_date, action = ?action, "cash block bypassed by override");
            return Ok(());
        }
        warn!(collector_id = %collector, for_date = %for_date, action = ?action, "cash action blocked, override required");
        Err(LoanError::CashOverrideRequired { collector, for_date })
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn mark_defaulted(&self, principal: &Principal, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Loan> {
        Self::authorize(principal, Permission::MarkDefault)?;
        let mut loan = self.load_loan(principal, loan_id)?;
        let (version, since) = (loan.version, loan.transitions.len());

        loan.mark_defaulted(principal.actor_id, time.now())?;
        self.commit(loan, version, since, None)
    }

    /// predicate for the external default scheduler
    pub fn is_default_eligible(&self, principal: &Principal, loan_id: LoanId, time: &SafeTimeProvider) -> Result<bool> {
        Self::authorize(principal, Permission::ViewLoan)?;
        let loan = self.load_loan(principal, loan_id)?;
        Ok(lifecycle::is_default_eligible(&loan, time.now()))
    }

    // payments

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn record_payment(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        request: PaymentRequest,
        time: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        Self::authorize(principal, Permission::RecordPayment)?;
        request.validate()?;
        let loan = self.load_loan(principal, loan_id)?;

        if let Some(replay) = self.replay(principal, &loan, &request)? {
            return Ok(replay);
        }

        let payment = Payment::pending(principal.tenant_id, loan.id, request, principal.actor_id, time.now());
        self.settle(principal, loan, payment, time)
    }

    fn replay(&self, principal: &Principal, loan: &Loan, request: &PaymentRequest) -> Result<Option<PaymentReceipt>> {
        let Some(key) = request.idempotency_key.as_deref() else {
            return Ok(None);
        };
        let Some(existing) = self.loans.find_payment_by_key(principal.tenant_id, loan.id, key)? else {
            return Ok(None);
        };
        if existing.amount != request.amount {
            return Err(LoanError::validation(format!(
                "idempotency key {} was used for a payment of {}",
                key, existing.amount
            )));
        }
        info!(payment_id = %existing.id, key = %key, "payment replayed from idempotency key");
        Ok(Some(PaymentReceipt {
            payment: existing,
            loan: loan.clone(),
            replayed: true,
        }))
    }

    fn settle(
        &self,
        principal: &Principal,
        mut loan: Loan,
        mut payment: Payment,
        time: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        let ledger = self.loans.payments_for(principal.tenant_id, loan.id)?;
        let (version, since) = (loan.version, loan.transitions.len());

        let outcome = Reconciler::apply(&mut loan, &mut payment, &ledger, principal.actor_id, time.now())
            .map_err(|e| {
                self.report_fatal(&loan, &e, time);
                e
            })?;

        let loan = self.commit(loan, version, since, Some(payment.clone()))?;
        self.events.publish(Event::PaymentRecorded {
            tenant_id: loan.tenant_id,
            loan_id: loan.id,
            payment_id: payment.id,
            actor: principal.actor_id,
            amount: payment.amount,
            applied: outcome.applied,
            credited: outcome.credited,
            outstanding_before: outcome.outstanding_before,
            outstanding_after: outcome.outstanding_after,
            timestamp: time.now(),
        });

        Ok(PaymentReceipt {
            payment,
            loan,
            replayed: false,
        })
    }

    /// record a payment that settles later; the balance is untouched until completion
    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn register_pending_payment(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        request: PaymentRequest,
        time: &SafeTimeProvider,
    ) -> Result<Payment> {
        Self::authorize(principal, Permission::RecordPayment)?;
        request.validate()?;
        let loan = self.load_loan(principal, loan_id)?;
        if loan.status != LoanStatus::Disbursed {
            return Err(LoanError::validation(format!(
                "loan {} does not accept payments while {}",
                loan.id, loan.status
            )));
        }

        let payment = Payment::pending(principal.tenant_id, loan.id, request, principal.actor_id, time.now());
        self.loans.insert_payment(principal.tenant_id, payment)
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, payment_id = %payment_id))]
    pub fn complete_payment(
        &self,
        principal: &Principal,
        payment_id: PaymentId,
        time: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        Self::authorize(principal, Permission::RecordPayment)?;
        let payment = self.loans.get_payment(principal.tenant_id, payment_id)?;
        Self::ensure_tenant(principal, payment.tenant_id)?;
        if payment.is_final() {
            return Err(LoanError::PaymentImmutable { id: payment.id });
        }
        let loan = self.load_loan(principal, payment.loan_id)?;
        self.settle(principal, loan, payment, time)
    }

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, payment_id = %payment_id))]
    pub fn fail_payment(
        &self,
        principal: &Principal,
        payment_id: PaymentId,
        reason: &str,
        time: &SafeTimeProvider,
    ) -> Result<Payment> {
        Self::authorize(principal, Permission::RecordPayment)?;
        let mut payment = self.loans.get_payment(principal.tenant_id, payment_id)?;
        Self::ensure_tenant(principal, payment.tenant_id)?;

        payment.fail(reason, time.now())?;
        self.loans.update_payment(principal.tenant_id, payment.clone())?;
        self.events.publish(Event::PaymentFailed {
            tenant_id: payment.tenant_id,
            loan_id: payment.loan_id,
            payment_id: payment.id,
            actor: principal.actor_id,
            amount: payment.amount,
            reason: reason.to_string(),
            timestamp: time.now(),
        });
        info!(reason = %reason, "payment failed");
        Ok(payment)
    }

    pub fn payments(&self, principal: &Principal, loan_id: LoanId) -> Result<Vec<Payment>> {
        Self::authorize(principal, Permission::ViewLoan)?;
        let loan = self.load_loan(principal, loan_id)?;
        self.loans.payments_for(principal.tenant_id, loan.id)
    }

    // reads

    pub fn get_loan(&self, principal: &Principal, loan_id: LoanId) -> Result<Loan> {
        Self::authorize(principal, Permission::ViewLoan)?;
        self.load_loan(principal, loan_id)
    }

    /// recomputed from the frozen terms on every call
    pub fn get_schedule(&self, principal: &Principal, loan_id: LoanId) -> Result<Vec<Installment>> {
        Self::authorize(principal, Permission::ViewLoan)?;
        Ok(self.load_loan(principal, loan_id)?.schedule()?.installments())
    }

    pub fn schedule_view(&self, principal: &Principal, loan_id: LoanId) -> Result<ScheduleView> {
        Self::authorize(principal, Permission::ViewLoan)?;
        let loan = self.load_loan(principal, loan_id)?;
        Ok(ScheduleView::new(loan.id, &loan.schedule()?))
    }

    /// schedule with payments applied oldest installment first
    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, loan_id = %loan_id))]
    pub fn get_statement(&self, principal: &Principal, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Statement> {
        Self::authorize(principal, Permission::ViewLoan)?;
        let loan = self.load_loan(principal, loan_id)?;
        self.statement_for(principal, &loan, time)
    }

    fn statement_for(&self, principal: &Principal, loan: &Loan, time: &SafeTimeProvider) -> Result<Statement> {
        let ledger = self.loans.payments_for(principal.tenant_id, loan.id)?;
        Reconciler::verify(loan, &ledger).map_err(|e| {
            self.report_fatal(loan, &e, time);
            e
        })?;
        let schedule = loan.schedule()?;
        Ok(PaymentWaterfall::standard().allocate(&schedule, loan.amount_paid - loan.credit_balance, time.now()))
    }

    pub fn loan_view(&self, principal: &Principal, loan_id: LoanId, time: &SafeTimeProvider) -> Result<LoanView> {
        Self::authorize(principal, Permission::ViewLoan)?;
        let loan = self.load_loan(principal, loan_id)?;
        let statement = match loan.terms {
            Some(_) => Some(self.statement_for(principal, &loan, time)?),
            None => None,
        };
        LoanView::from_loan(&loan, statement.as_ref())
    }

    // cash overrides

    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, collector_id = %request.collector_id))]
    pub fn grant_override(
        &self,
        principal: &Principal,
        request: GrantRequest,
        time: &SafeTimeProvider,
    ) -> Result<CashOverride> {
        Self::authorize(principal, Permission::GrantCashOverride)?;
        let now = time.now();
        let granted = self.authorizer.grant(principal.tenant_id, principal.actor_id, request, now)?;

        self.events.publish(Event::OverrideGranted {
            tenant_id: granted.tenant_id,
            override_id: granted.id,
            collector_id: granted.collector_id,
            for_date: granted.for_date,
            actor: principal.actor_id,
            allow_issue_float: granted.allow_issue_float,
            allow_disbursement: granted.allow_disbursement,
            expires_at: granted.expires_at,
            timestamp: now,
        });
        Ok(granted)
    }

    /// idempotent; a repeat leaves the first revocation in place and emits nothing
    #[instrument(skip_all, fields(tenant_id = %principal.tenant_id, override_id = %override_id))]
    pub fn revoke_override(
        &self,
        principal: &Principal,
        override_id: OverrideId,
        request: RevokeRequest,
        time: &SafeTimeProvider,
    ) -> Result<CashOverride> {
        Self::authorize(principal, Permission::RevokeCashOverride)?;
        let now = time.now();
        let outcome = self
            .authorizer
            .revoke(principal.tenant_id, override_id, principal.actor_id, &request.reason, now)?;

        if let RevokeOutcome::Revoked(ov) = &outcome {
            self.events.publish(Event::OverrideRevoked {
                tenant_id: ov.tenant_id,
                override_id: ov.id,
                collector_id: ov.collector_id,
                for_date: ov.for_date,
                actor: principal.actor_id,
                reason: request.reason.clone(),
                timestamp: now,
            });
        }
        Ok(outcome.into_override())
    }

    pub fn is_permitted(
        &self,
        principal: &Principal,
        collector_id: CollectorId,
        for_date: NaiveDate,
        action: CashAction,
        time: &SafeTimeProvider,
    ) -> Result<bool> {
        Self::authorize(principal, Permission::ViewCashOverride)?;
        self.authorizer
            .is_permitted(principal.tenant_id, collector_id, for_date, action, time.now())
    }

    /// gate for the float-issuance workflow
    pub fn ensure_float_allowed(
        &self,
        principal: &Principal,
        collector_id: CollectorId,
        time: &SafeTimeProvider,
    ) -> Result<()> {
        Self::authorize(principal, Permission::ViewCashOverride)?;
        self.ensure_cash_allowed(principal.tenant_id, collector_id, CashAction::IssueFloat, time)
    }

    // product catalog

    pub fn register_product(&self, principal: &Principal, product: LoanProduct) -> Result<LoanProduct> {
        Self::authorize(principal, Permission::ManageProducts)?;
        Self::ensure_tenant(principal, product.tenant_id)?;
        self.catalog.register(principal.tenant_id, product)
    }

    pub fn update_product(&self, principal: &Principal, product: LoanProduct) -> Result<LoanProduct> {
        Self::authorize(principal, Permission::ManageProducts)?;
        Self::ensure_tenant(principal, product.tenant_id)?;
        self.catalog.update(principal.tenant_id, product)
    }

    pub fn rename_product(&self, principal: &Principal, product_id: ProductId, name: &str) -> Result<LoanProduct> {
        Self::authorize(principal, Permission::ManageProducts)?;
        self.catalog.rename(principal.tenant_id, product_id, name)
    }

    pub fn retire_product(&self, principal: &Principal, product_id: ProductId) -> Result<LoanProduct> {
        Self::authorize(principal, Permission::ManageProducts)?;
        self.catalog.retire(principal.tenant_id, product_id)
    }

    pub fn list_products(&self, principal: &Principal) -> Result<Vec<LoanProduct>> {
        Self::authorize(principal, Permission::ViewLoan)?;
        self.catalog.list(principal.tenant_id)
    }

    /// tenant provisioning hook; seeded products are system assets
    pub fn seed_system_product(&self, principal: &Principal, product: LoanProduct) -> Result<LoanProduct> {
        Self::authorize(principal, Permission::ManageProducts)?;
        Self::ensure_tenant(principal, product.tenant_id)?;
        self.catalog.seed_system_product(principal.tenant_id, product)
    }
}

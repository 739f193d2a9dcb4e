//! Outbound persistence interface and the in-memory reference store.
//!
//! Every method takes the tenant first and only ever looks inside that
//! tenant's partition.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::LoanProduct;
use crate::errors::{LoanError, Result};
use crate::lifecycle::Loan;
use crate::overrides::{CashOverride, Revocation, RevokeOutcome};
use crate::payments::Payment;
use crate::types::{CollectorId, LoanId, OverrideId, PaymentId, ProductId, TenantId};

pub trait ProductStore: Send + Sync {
    fn insert_product(&self, tenant_id: TenantId, product: LoanProduct) -> Result<()>;
    fn get_product(&self, tenant_id: TenantId, id: ProductId) -> Result<LoanProduct>;
    /// replace an existing product
    fn save_product(&self, tenant_id: TenantId, product: LoanProduct) -> Result<()>;
    fn list_products(&self, tenant_id: TenantId) -> Result<Vec<LoanProduct>>;
}

pub trait LoanStore: Send + Sync {
    fn insert_loan(&self, tenant_id: TenantId, loan: Loan) -> Result<()>;
    fn get_loan(&self, tenant_id: TenantId, id: LoanId) -> Result<Loan>;

    /// commit `loan` and, optionally, a payment in one step.
    ///
    /// Fails with `ConcurrentModification` when the stored version is not
    /// `expected_version`; on success the stored version is `expected_version + 1`.
    fn update_loan(
        &self,
        tenant_id: TenantId,
        loan: Loan,
        expected_version: u64,
        payment: Option<Payment>,
    ) -> Result<Loan>;

    fn loans_for_product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Vec<Loan>>;

    /// insert a pending payment; a known idempotency key returns the stored payment instead
    fn insert_payment(&self, tenant_id: TenantId, payment: Payment) -> Result<Payment>;
    fn get_payment(&self, tenant_id: TenantId, id: PaymentId) -> Result<Payment>;
    /// settle a pending payment that does not touch the loan
    fn update_payment(&self, tenant_id: TenantId, payment: Payment) -> Result<()>;
    /// ledger order
    fn payments_for(&self, tenant_id: TenantId, loan_id: LoanId) -> Result<Vec<Payment>>;
    fn find_payment_by_key(&self, tenant_id: TenantId, loan_id: LoanId, key: &str) -> Result<Option<Payment>>;
}

pub trait OverrideStore: Send + Sync {
    /// insert unless an override valid at `now` already holds the same slot
    fn insert_if_vacant(&self, tenant_id: TenantId, ov: CashOverride, now: DateTime<Utc>) -> Result<()>;
    fn overrides_for(
        &self,
        tenant_id: TenantId,
        collector_id: CollectorId,
        for_date: NaiveDate,
    ) -> Result<Vec<CashOverride>>;
    /// set the revocation once; later calls report the first one
    fn revoke_override(&self, tenant_id: TenantId, id: OverrideId, revocation: Revocation) -> Result<RevokeOutcome>;
}

#[derive(Debug, Default)]
struct Partition {
    products: HashMap<ProductId, LoanProduct>,
    loans: HashMap<LoanId, Loan>,
    payments: Vec<Payment>,
    overrides: Vec<CashOverride>,
}

/// tenant-partitioned maps behind one mutex
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tenants: Mutex<HashMap<TenantId, Partition>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TenantId, Partition>> {
        self.tenants.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// the only path that creates a tenant partition
    fn with_partition<R>(&self, tenant_id: TenantId, f: impl FnOnce(&mut Partition) -> Result<R>) -> Result<R> {
        let mut tenants = self.lock();
        f(tenants.entry(tenant_id).or_default())
    }

    /// writes to records that must already exist; an unknown tenant sees an empty partition
    fn with_existing<R>(&self, tenant_id: TenantId, f: impl FnOnce(&mut Partition) -> Result<R>) -> Result<R> {
        let mut tenants = self.lock();
        match tenants.get_mut(&tenant_id) {
            Some(partition) => f(partition),
            None => f(&mut Partition::default()),
        }
    }

    fn read_partition<R>(&self, tenant_id: TenantId, f: impl FnOnce(&Partition) -> Result<R>) -> Result<R> {
        let tenants = self.lock();
        match tenants.get(&tenant_id) {
            Some(partition) => f(partition),
            None => f(&Partition::default()),
        }
    }
}

fn ensure_owner(caller: TenantId, record: TenantId) -> Result<()> {
    if caller != record {
        return Err(LoanError::TenantMismatch { caller, record });
    }
    Ok(())
}

impl ProductStore for InMemoryStore {
    fn insert_product(&self, tenant_id: TenantId, product: LoanProduct) -> Result<()> {
        ensure_owner(tenant_id, product.tenant_id)?;
        self.with_partition(tenant_id, |p| {
            if p.products.contains_key(&product.id) {
                return Err(LoanError::validation(format!("product {} already exists", product.id)));
            }
            p.products.insert(product.id, product);
            Ok(())
        })
    }

    fn get_product(&self, tenant_id: TenantId, id: ProductId) -> Result<LoanProduct> {
        self.read_partition(tenant_id, |p| {
            p.products
                .get(&id)
                .cloned()
                .ok_or(LoanError::NotFound { entity: "product", id })
        })
    }

    fn save_product(&self, tenant_id: TenantId, product: LoanProduct) -> Result<()> {
        ensure_owner(tenant_id, product.tenant_id)?;
        self.with_existing(tenant_id, |p| match p.products.get_mut(&product.id) {
            Some(stored) => {
                *stored = product;
                Ok(())
            }
            None => Err(LoanError::NotFound {
                entity: "product",
                id: product.id,
            }),
        })
    }

    fn list_products(&self, tenant_id: TenantId) -> Result<Vec<LoanProduct>> {
        self.read_partition(tenant_id, |p| {
            let mut products: Vec<LoanProduct> = p.products.values().cloned().collect();
            products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
            Ok(products)
        })
    }
}

impl LoanStore for InMemoryStore {
    fn insert_loan(&self, tenant_id: TenantId, loan: Loan) -> Result<()> {
        ensure_owner(tenant_id, loan.tenant_id)?;
        self.with_partition(tenant_id, |p| {
            if p.loans.contains_key(&loan.id) {
                return Err(LoanError::validation(format!("loan {} already exists", loan.id)));
            }
            p.loans.insert(loan.id, loan);
            Ok(())
        })
    }

    fn get_loan(&self, tenant_id: TenantId, id: LoanId) -> Result<Loan> {
        self.read_partition(tenant_id, |p| {
            p.loans.get(&id).cloned().ok_or(LoanError::NotFound { entity: "loan", id })
        })
    }

    fn update_loan(
        &self,
        tenant_id: TenantId,
        mut loan: Loan,
        expected_version: u64,
        payment: Option<Payment>,
    ) -> Result<Loan> {
        ensure_owner(tenant_id, loan.tenant_id)?;
        self.with_existing(tenant_id, |p| {
            let stored = p.loans.get(&loan.id).ok_or(LoanError::NotFound {
                entity: "loan",
                id: loan.id,
            })?;
            if stored.version != expected_version {
                return Err(LoanError::ConcurrentModification {
                    entity: "loan",
                    id: loan.id,
                    expected: expected_version,
                    found: stored.version,
                });
            }

            if let Some(payment) = payment {
                ensure_owner(tenant_id, payment.tenant_id)?;
                if payment.loan_id != loan.id {
                    return Err(LoanError::validation("payment does not belong to this loan"));
                }
                upsert_payment(&mut p.payments, payment)?;
            }

            loan.version = expected_version + 1;
            p.loans.insert(loan.id, loan.clone());
            Ok(loan)
        })
    }

    fn loans_for_product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Vec<Loan>> {
        self.read_partition(tenant_id, |p| {
            Ok(p.loans
                .values()
                .filter(|l| l.product_id == product_id)
                .cloned()
                .collect())
        })
    }

    fn insert_payment(&self, tenant_id: TenantId, payment: Payment) -> Result<Payment> {
        ensure_owner(tenant_id, payment.tenant_id)?;
        self.with_existing(tenant_id, |p| {
            if !p.loans.contains_key(&payment.loan_id) {
                return Err(LoanError::NotFound {
                    entity: "loan",
                    id: payment.loan_id,
                });
            }
            if let Some(existing) = find_by_key(&p.payments, &payment) {
                return Ok(existing.clone());
            }
            if p.payments.iter().any(|stored| stored.id == payment.id) {
                return Err(LoanError::validation(format!("payment {} already exists", payment.id)));
            }
            p.payments.push(payment.clone());
            Ok(payment)
        })
    }

    fn get_payment(&self, tenant_id: TenantId, id: PaymentId) -> Result<Payment> {
        self.read_partition(tenant_id, |p| {
            p.payments
                .iter()
                .find(|stored| stored.id == id)
                .cloned()
                .ok_or(LoanError::NotFound { entity: "payment", id })
        })
    }

    fn update_payment(&self, tenant_id: TenantId, payment: Payment) -> Result<()> {
        ensure_owner(tenant_id, payment.tenant_id)?;
        self.with_existing(tenant_id, |p| {
            if !p.payments.iter().any(|stored| stored.id == payment.id) {
                return Err(LoanError::NotFound {
                    entity: "payment",
                    id: payment.id,
                });
            }
            upsert_payment(&mut p.payments, payment)
        })
    }

    fn payments_for(&self, tenant_id: TenantId, loan_id: LoanId) -> Result<Vec<Payment>> {
        self.read_partition(tenant_id, |p| {
            Ok(p.payments
                .iter()
                .filter(|stored| stored.loan_id == loan_id)
                .cloned()
                .collect())
        })
    }

    fn find_payment_by_key(&self, tenant_id: TenantId, loan_id: LoanId, key: &str) -> Result<Option<Payment>> {
        self.read_partition(tenant_id, |p| {
            Ok(p.payments
                .iter()
                .find(|stored| stored.loan_id == loan_id && stored.idempotency_key.as_deref() == Some(key))
                .cloned())
        })
    }
}

fn find_by_key<'a>(ledger: &'a [Payment], payment: &Payment) -> Option<&'a Payment> {
    let key = payment.idempotency_key.as_deref()?;
    ledger
        .iter()
        .find(|stored| stored.loan_id == payment.loan_id && stored.idempotency_key.as_deref() == Some(key))
}

/// final payments never change; keys stay unique per loan
fn upsert_payment(ledger: &mut Vec<Payment>, payment: Payment) -> Result<()> {
    if let Some(stored) = ledger.iter_mut().find(|stored| stored.id == payment.id) {
        if stored.is_final() {
            return Err(LoanError::PaymentImmutable { id: stored.id });
        }
        *stored = payment;
        return Ok(());
    }
    if find_by_key(ledger, &payment).is_some() {
        return Err(LoanError::validation("idempotency key already used for this loan"));
    }
    ledger.push(payment);
    Ok(())
}

impl OverrideStore for InMemoryStore {
    fn insert_if_vacant(&self, tenant_id: TenantId, ov: CashOverride, now: DateTime<Utc>) -> Result<()> {
        ensure_owner(tenant_id, ov.tenant_id)?;
        self.with_partition(tenant_id, |p| {
            if let Some(existing) = p
                .overrides
                .iter()
                .find(|stored| stored.same_slot(tenant_id, ov.collector_id, ov.for_date) && stored.is_valid_at(now))
            {
                return Err(LoanError::DuplicateOverride { existing: existing.id });
            }
            p.overrides.push(ov);
            Ok(())
        })
    }

    fn overrides_for(
        &self,
        tenant_id: TenantId,
        collector_id: CollectorId,
        for_date: NaiveDate,
    ) -> Result<Vec<CashOverride>> {
        self.read_partition(tenant_id, |p| {
            Ok(p.overrides
                .iter()
                .filter(|stored| stored.same_slot(tenant_id, collector_id, for_date))
                .cloned()
                .collect())
        })
    }

    fn revoke_override(&self, tenant_id: TenantId, id: OverrideId, revocation: Revocation) -> Result<RevokeOutcome> {
        self.with_existing(tenant_id, |p| {
            let stored = p
                .overrides
                .iter_mut()
                .find(|stored| stored.id == id)
                .ok_or(LoanError::NotFound {
                    entity: "cash override",
                    id,
                })?;
            if stored.is_revoked() {
                return Ok(RevokeOutcome::AlreadyRevoked(stored.clone()));
            }
            stored.revocation = Some(revocation);
            Ok(RevokeOutcome::Revoked(stored.clone()))
        })
    }
}

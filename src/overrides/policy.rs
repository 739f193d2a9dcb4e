use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{CollectorId, TenantId};

/// the external overdue-cash rule, as seen by the engine
pub trait CashDayPolicy: Send + Sync {
    /// overdue cash day currently blocking the collector, if any
    fn blocked_day(&self, tenant_id: TenantId, collector_id: CollectorId, now: DateTime<Utc>) -> Option<NaiveDate>;
}

/// never blocks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCashBlock;

impl CashDayPolicy for NoCashBlock {
    fn blocked_day(&self, _: TenantId, _: CollectorId, _: DateTime<Utc>) -> Option<NaiveDate> {
        None
    }
}

/// explicit list of blocked collectors, fed by whatever tracks unreconciled cash
#[derive(Debug, Default)]
pub struct FixedCashBlock {
    blocked: Mutex<HashMap<(TenantId, CollectorId), NaiveDate>>,
}

impl FixedCashBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, tenant_id: TenantId, collector_id: CollectorId, overdue_day: NaiveDate) {
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((tenant_id, collector_id), overdue_day);
    }

    pub fn clear(&self, tenant_id: TenantId, collector_id: CollectorId) {
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(tenant_id, collector_id));
    }
}

impl CashDayPolicy for FixedCashBlock {
    fn blocked_day(&self, tenant_id: TenantId, collector_id: CollectorId, _: DateTime<Utc>) -> Option<NaiveDate> {
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(tenant_id, collector_id))
            .copied()
    }
}

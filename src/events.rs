use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{ActorId, CollectorId, LoanId, LoanStatus, OverrideId, PaymentId, TenantId};

/// immutable facts emitted for the audit and notification collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    LoanTransitioned {
        tenant_id: TenantId,
        loan_id: LoanId,
        actor: ActorId,
        from: LoanStatus,
        to: LoanStatus,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentRecorded {
        tenant_id: TenantId,
        loan_id: LoanId,
        payment_id: PaymentId,
        actor: ActorId,
        amount: Money,
        applied: Money,
        credited: Money,
        outstanding_before: Money,
        outstanding_after: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentFailed {
        tenant_id: TenantId,
        loan_id: LoanId,
        payment_id: PaymentId,
        actor: ActorId,
        amount: Money,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ReconciliationFailed {
        tenant_id: TenantId,
        loan_id: LoanId,
        cached: Money,
        derived: Money,
        timestamp: DateTime<Utc>,
    },

    // cash override events
    OverrideGranted {
        tenant_id: TenantId,
        override_id: OverrideId,
        collector_id: CollectorId,
        for_date: NaiveDate,
        actor: ActorId,
        allow_issue_float: bool,
        allow_disbursement: bool,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    OverrideRevoked {
        tenant_id: TenantId,
        override_id: OverrideId,
        collector_id: CollectorId,
        for_date: NaiveDate,
        actor: ActorId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            Event::LoanTransitioned { tenant_id, .. }
            | Event::PaymentRecorded { tenant_id, .. }
            | Event::PaymentFailed { tenant_id, .. }
            | Event::ReconciliationFailed { tenant_id, .. }
            | Event::OverrideGranted { tenant_id, .. }
            | Event::OverrideRevoked { tenant_id, .. } => *tenant_id,
        }
    }
}

/// fire-and-forget outlet for events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Mutex<Vec<Event>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: Event) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// copy of everything collected so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventStore {
    fn publish(&self, event: Event) {
        self.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_store_collects_and_drains() {
        let store = EventStore::new();
        let tenant = Uuid::new_v4();
        store.publish(Event::LoanTransitioned {
            tenant_id: tenant,
            loan_id: Uuid::new_v4(),
            actor: Uuid::new_v4(),
            from: LoanStatus::Applied,
            to: LoanStatus::UnderReview,
            reason: None,
            timestamp: Utc::now(),
        });

        assert_eq!(store.len(), 1);
        assert_eq!(store.events()[0].tenant_id(), tenant);

        let drained = store.take_events();
        assert_eq!(drained.len(), 1);
        assert!(store.is_empty());
    }
}

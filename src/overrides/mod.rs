pub mod authorizer;
pub mod policy;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActorId, CashAction, CollectorId, OverrideId, TenantId};

pub use authorizer::{CashOverrideAuthorizer, RevokeOutcome};
pub use policy::{CashDayPolicy, FixedCashBlock, NoCashBlock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: ActorId,
    pub reason: String,
}

/// time-boxed exception to the overdue-cash block for one collector and day.
///
/// Rows are never deleted; an expired or revoked override is simply inert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashOverride {
    pub id: OverrideId,
    pub tenant_id: TenantId,
    pub collector_id: CollectorId,
    /// the overdue cash day being excused
    pub for_date: NaiveDate,
    pub created_by: ActorId,
    pub reason: String,
    pub allow_issue_float: bool,
    pub allow_disbursement: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revocation: Option<Revocation>,
}

impl CashOverride {
    pub fn new(tenant_id: TenantId, created_by: ActorId, request: GrantRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            collector_id: request.collector_id,
            for_date: request.for_date,
            created_by,
            reason: request.reason,
            allow_issue_float: request.allow_issue_float,
            allow_disbursement: request.allow_disbursement,
            created_at,
            expires_at: request.expires_at,
            revocation: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }

    /// not revoked and `now` strictly before expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && now < self.expires_at
    }

    pub fn allows(&self, action: CashAction) -> bool {
        match action {
            CashAction::IssueFloat => self.allow_issue_float,
            CashAction::Disbursement => self.allow_disbursement,
        }
    }

    pub fn same_slot(&self, tenant_id: TenantId, collector_id: CollectorId, for_date: NaiveDate) -> bool {
        self.tenant_id == tenant_id && self.collector_id == collector_id && self.for_date == for_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub collector_id: CollectorId,
    pub for_date: NaiveDate,
    pub reason: String,
    pub allow_issue_float: bool,
    pub allow_disbursement: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeRequest {
    pub reason: String,
}

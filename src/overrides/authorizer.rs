use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::errors::{LoanError, Result};
use crate::store::OverrideStore;
use crate::types::{ActorId, CashAction, CollectorId, OverrideId, TenantId};

use super::{CashOverride, GrantRequest, Revocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked(CashOverride),
    /// repeat call; the original revocation stands
    AlreadyRevoked(CashOverride),
}

impl RevokeOutcome {
    pub fn into_override(self) -> CashOverride {
        match self {
            RevokeOutcome::Revoked(ov) | RevokeOutcome::AlreadyRevoked(ov) => ov,
        }
    }
}

/// grants, checks and revokes cash overrides; independent of loan state
#[derive(Clone)]
pub struct CashOverrideAuthorizer {
    store: Arc<dyn OverrideStore>,
    max_duration: Duration,
}

impl CashOverrideAuthorizer {
    pub fn new(store: Arc<dyn OverrideStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            max_duration: Duration::hours(config.max_override_duration_hours as i64),
        }
    }

    pub fn grant(
        &self,
        tenant_id: TenantId,
        created_by: ActorId,
        request: GrantRequest,
        now: DateTime<Utc>,
    ) -> Result<CashOverride> {
        if request.reason.trim().is_empty() {
            return Err(LoanError::validation("an override reason is required"));
        }
        if !request.allow_issue_float && !request.allow_disbursement {
            return Err(LoanError::validation("an override must allow at least one cash action"));
        }
        if request.expires_at <= now {
            return Err(LoanError::validation(format!(
                "override expiry {} is not in the future",
                request.expires_at
            )));
        }
        if request.expires_at - now > self.max_duration {
            return Err(LoanError::validation(format!(
                "override may last at most {} hours",
                self.max_duration.num_hours()
            )));
        }

        let candidate = CashOverride::new(tenant_id, created_by, request, now);
        match self.store.insert_if_vacant(tenant_id, candidate.clone(), now) {
            Ok(()) => {
                info!(
                    tenant_id = %tenant_id,
                    override_id = %candidate.id,
                    collector_id = %candidate.collector_id,
                    for_date = %candidate.for_date,
                    expires_at = %candidate.expires_at,
                    "cash override granted"
                );
                Ok(candidate)
            }
            Err(e @ LoanError::DuplicateOverride { .. }) => {
                warn!(
                    tenant_id = %tenant_id,
                    collector_id = %candidate.collector_id,
                    for_date = %candidate.for_date,
                    "duplicate cash override refused"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// the override currently in force for the slot, if any
    pub fn active_override(
        &self,
        tenant_id: TenantId,
        collector_id: CollectorId,
        for_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<CashOverride>> {
        Ok(self
            .store
            .overrides_for(tenant_id, collector_id, for_date)?
            .into_iter()
            .find(|ov| ov.is_valid_at(now)))
    }

    pub fn is_permitted(
        &self,
        tenant_id: TenantId,
        collector_id: CollectorId,
        for_date: NaiveDate,
        action: CashAction,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .active_override(tenant_id, collector_id, for_date, now)?
            .map_or(false, |ov| ov.allows(action)))
    }

    /// idempotent; unknown ids are `NotFound`
    pub fn revoke(
        &self,
        tenant_id: TenantId,
        override_id: OverrideId,
        revoked_by: ActorId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RevokeOutcome> {
        if reason.trim().is_empty() {
            return Err(LoanError::validation("a revocation reason is required"));
        }
        let outcome = self.store.revoke_override(
            tenant_id,
            override_id,
            Revocation {
                revoked_at: now,
                revoked_by,
                reason: reason.to_string(),
            },
        )?;
        if let RevokeOutcome::Revoked(ov) = &outcome {
            info!(tenant_id = %tenant_id, override_id = %ov.id, "cash override revoked");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use uuid::Uuid;

    fn authorizer() -> CashOverrideAuthorizer {
        CashOverrideAuthorizer::new(Arc::new(InMemoryStore::new()), &EngineConfig::default())
    }

    fn request(collector: CollectorId, expires_at: DateTime<Utc>) -> GrantRequest {
        GrantRequest {
            collector_id: collector,
            for_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            reason: "bank closed before deposit".to_string(),
            allow_issue_float: true,
            allow_disbursement: true,
            expires_at,
        }
    }

    #[test]
    fn test_permission_ends_at_expiry() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap()));
        let control = time.test_control().unwrap();
        let auth = authorizer();
        let tenant = Uuid::new_v4();
        let collector = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let expires = Utc.with_ymd_and_hms(2025, 1, 11, 6, 0, 0).unwrap();

        auth.grant(tenant, Uuid::new_v4(), request(collector, expires), time.now()).unwrap();

        control.advance(Duration::hours(9) + Duration::minutes(59));
        assert!(auth.is_permitted(tenant, collector, day, CashAction::Disbursement, time.now()).unwrap());

        control.advance(Duration::minutes(2));
        assert!(!auth.is_permitted(tenant, collector, day, CashAction::Disbursement, time.now()).unwrap());
    }

    #[test]
    fn test_duplicate_grant_until_revoked() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap();
        let auth = authorizer();
        let tenant = Uuid::new_v4();
        let collector = Uuid::new_v4();
        let expires = now + Duration::hours(10);

        let first = auth.grant(tenant, Uuid::new_v4(), request(collector, expires), now).unwrap();
        assert_eq!(
            auth.grant(tenant, Uuid::new_v4(), request(collector, expires), now),
            Err(LoanError::DuplicateOverride { existing: first.id })
        );

        auth.revoke(tenant, first.id, Uuid::new_v4(), "supervisor withdrew", now).unwrap();
        assert!(auth.grant(tenant, Uuid::new_v4(), request(collector, expires), now).is_ok());
    }

    #[test]
    fn test_expired_override_frees_the_slot() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap();
        let auth = authorizer();
        let tenant = Uuid::new_v4();
        let collector = Uuid::new_v4();

        auth.grant(tenant, Uuid::new_v4(), request(collector, now + Duration::hours(1)), now).unwrap();
        let later = now + Duration::hours(2);
        assert!(auth
            .grant(tenant, Uuid::new_v4(), request(collector, later + Duration::hours(1)), later)
            .is_ok());
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap();
        let auth = authorizer();
        let tenant = Uuid::new_v4();
        let ov = auth
            .grant(tenant, Uuid::new_v4(), request(Uuid::new_v4(), now + Duration::hours(4)), now)
            .unwrap();

        let first = auth.revoke(tenant, ov.id, Uuid::new_v4(), "withdrawn", now).unwrap();
        assert!(matches!(first, RevokeOutcome::Revoked(_)));

        let later = now + Duration::minutes(5);
        let second = auth.revoke(tenant, ov.id, Uuid::new_v4(), "again", later).unwrap();
        match second {
            RevokeOutcome::AlreadyRevoked(stored) => {
                let revocation = stored.revocation.unwrap();
                assert_eq!(revocation.revoked_at, now);
                assert_eq!(revocation.reason, "withdrawn");
            }
            other => panic!("expected AlreadyRevoked, got {:?}", other),
        }

        let unknown = Uuid::new_v4();
        assert_eq!(
            auth.revoke(tenant, unknown, Uuid::new_v4(), "withdrawn", now),
            Err(LoanError::NotFound {
                entity: "cash override",
                id: unknown,
            })
        );
    }

    #[test]
    fn test_grant_validation() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap();
        let auth = authorizer();
        let tenant = Uuid::new_v4();
        let collector = Uuid::new_v4();

        assert!(auth.grant(tenant, Uuid::new_v4(), request(collector, now), now).is_err());
        assert!(auth
            .grant(tenant, Uuid::new_v4(), request(collector, now + Duration::hours(49)), now)
            .is_err());

        let mut nothing_allowed = request(collector, now + Duration::hours(2));
        nothing_allowed.allow_issue_float = false;
        nothing_allowed.allow_disbursement = false;
        assert!(auth.grant(tenant, Uuid::new_v4(), nothing_allowed, now).is_err());

        let mut no_reason = request(collector, now + Duration::hours(2));
        no_reason.reason = String::new();
        assert!(auth.grant(tenant, Uuid::new_v4(), no_reason, now).is_err());
    }

    #[test]
    fn test_flags_are_respected() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap();
        let auth = authorizer();
        let tenant = Uuid::new_v4();
        let collector = Uuid::new_v4();
        let mut float_only = request(collector, now + Duration::hours(2));
        float_only.allow_disbursement = false;
        let day = float_only.for_date;

        auth.grant(tenant, Uuid::new_v4(), float_only, now).unwrap();
        assert!(auth.is_permitted(tenant, collector, day, CashAction::IssueFloat, now).unwrap());
        assert!(!auth.is_permitted(tenant, collector, day, CashAction::Disbursement, now).unwrap());

        // other tenants never see it
        assert!(!auth.is_permitted(Uuid::new_v4(), collector, day, CashAction::IssueFloat, now).unwrap());
    }
}

/// cash override - unblocking a collector with unreconciled cash
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use microloan_rs::{
    CashAction, EngineConfig, EventStore, FixedCashBlock, GrantRequest, InMemoryStore, LoanService, Principal,
    RevokeRequest, SafeTimeProvider, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 10, 18, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let cash = Arc::new(FixedCashBlock::new());
    let service = LoanService::new(
        EngineConfig::default(),
        Arc::new(InMemoryStore::new()),
        cash.clone(),
        Arc::new(EventStore::new()),
    )?;

    let tenant = Uuid::new_v4();
    let supervisor = Principal::superuser(Uuid::new_v4(), tenant);
    let collector = Uuid::new_v4();
    let overdue_day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();

    cash.block(tenant, collector, overdue_day);
    println!("float before override: {:?}", service.ensure_float_allowed(&supervisor, collector, &time));

    let granted = service.grant_override(
        &supervisor,
        GrantRequest {
            collector_id: collector,
            for_date: overdue_day,
            reason: "bank closed before deposit".to_string(),
            allow_issue_float: true,
            allow_disbursement: false,
            expires_at: Utc.with_ymd_and_hms(2025, 1, 11, 6, 0, 0).unwrap(),
        },
        &time,
    )?;
    println!("override {} granted until {}", granted.id, granted.expires_at);

    for step in [Duration::hours(11) + Duration::minutes(59), Duration::minutes(2)] {
        controller.advance(step);
        let permitted = service.is_permitted(&supervisor, collector, overdue_day, CashAction::IssueFloat, &time)?;
        println!("{} float permitted: {}", time.now().format("%Y-%m-%d %H:%M"), permitted);
    }

    // an expired override frees the slot for a new grant
    let second = service.grant_override(
        &supervisor,
        GrantRequest {
            collector_id: collector,
            for_date: overdue_day,
            reason: "deposit delayed again".to_string(),
            allow_issue_float: true,
            allow_disbursement: true,
            expires_at: time.now() + Duration::hours(4),
        },
        &time,
    )?;
    let revoked = service.revoke_override(
        &supervisor,
        second.id,
        RevokeRequest {
            reason: "cash banked".to_string(),
        },
        &time,
    )?;
    println!("second override revoked: {}", revoked.is_revoked());

    Ok(())
}

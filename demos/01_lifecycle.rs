/// lifecycle - application through approval, disbursement and repayment
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use microloan_rs::lifecycle::{ApprovalRequest, DisbursementRequest, NewApplication};
use microloan_rs::{
    DisbursementMethod, EngineConfig, EventStore, InMemoryStore, LoanProduct, LoanService, Money, NoCashBlock,
    PaymentMethod, PaymentRequest, Principal, Rate, SafeTimeProvider, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== loan lifecycle ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let events = Arc::new(EventStore::new());
    let service = LoanService::new(
        EngineConfig::default(),
        Arc::new(InMemoryStore::new()),
        Arc::new(NoCashBlock),
        events.clone(),
    )?;

    let tenant = Uuid::new_v4();
    let officer = Principal::superuser(Uuid::new_v4(), tenant);
    let product = service.seed_system_product(&officer, LoanProduct::daily_micro_loan(tenant, time.now()))?;

    // 1. application
    let loan = service.create_application(
        &officer,
        NewApplication {
            customer_id: Uuid::new_v4(),
            product_id: product.id,
            requested_amount: Money::from_major(8_000),
            requested_term_days: 28,
            underwriting: None,
        },
        &time,
    )?;
    println!("1. applied: {} ({})", loan.id, loan.status);

    // 2. approval, a little below the requested amount
    let loan = service.approve(
        &officer,
        loan.id,
        ApprovalRequest {
            approved_amount: Money::from_major(7_500),
            approved_term_days: 28,
            interest_rate: Rate::from_percentage(24),
        },
        &time,
    )?;
    println!("2. approved: {}", loan.status);

    // 3. disbursement
    let loan = service.disburse(
        &officer,
        loan.id,
        DisbursementRequest {
            method: DisbursementMethod::MobileMoney,
            reference: "MM-20250303-0042".to_string(),
            collector_id: None,
        },
        &time,
    )?;
    println!(
        "3. disbursed: net {} against a balance of {}",
        loan.net_disbursed().unwrap_or_default(),
        loan.outstanding_balance
    );

    // 4. pay each installment on its due date
    for installment in service.get_schedule(&officer, loan.id)? {
        controller.advance(installment.due_date - time.now());
        let receipt = service.record_payment(
            &officer,
            loan.id,
            PaymentRequest {
                amount: installment.amount_due(),
                paid_at: time.now(),
                method: PaymentMethod::MobileMoney,
                reference: None,
                idempotency_key: Some(format!("inst-{}", installment.sequence)),
            },
            &time,
        )?;
        println!(
            "   {} paid {} -> outstanding {} ({})",
            time.now().format("%Y-%m-%d"),
            installment.amount_due(),
            receipt.loan.outstanding_balance,
            receipt.loan.status
        );
    }

    controller.advance(Duration::days(1));
    println!("\n{}", service.loan_view(&officer, loan.id, &time)?.to_json_pretty()?);
    println!("\n{} events recorded", events.len());

    Ok(())
}

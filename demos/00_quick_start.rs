/// quick start - price a loan and print its repayment plan
use chrono::{TimeZone, Utc};
use microloan_rs::{InterestMethod, Money, Rate, RepaymentSchedule, ScheduleTerms};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 10,000 over 30 days at 24% flat, four installments
    let terms = ScheduleTerms::new(
        Money::from_major(10_000),
        Rate::from_percentage(24),
        30,
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        InterestMethod::Flat,
        4,
    );
    let schedule = RepaymentSchedule::generate(terms)?;

    for installment in schedule.iter() {
        println!(
            "#{} day {:>2} {}  principal {:>9}  interest {:>7}  due {:>9}",
            installment.sequence,
            installment.day_offset,
            installment.due_date.format("%Y-%m-%d"),
            installment.principal,
            installment.interest,
            installment.amount_due(),
        );
    }
    println!("total due: {}", schedule.total_due());

    Ok(())
}

/// advance deductions - how each flag changes the cash handed over
use microloan_rs::disbursement::Charges;
use microloan_rs::{DeductionFlags, DisbursementCalculator, Money};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let principal = Money::from_major(5_000);
    let charges = Charges {
        platform_fee: Money::from_major(50),
        processing_fee: Money::from_major(100),
        total_interest: Money::from_str_exact("98.63")?,
    };

    for bits in 0..8u8 {
        let flags = DeductionFlags {
            deduct_platform_fee_in_advance: bits & 1 != 0,
            deduct_processing_fee_in_advance: bits & 2 != 0,
            deduct_interest_in_advance: bits & 4 != 0,
        };
        let breakdown = DisbursementCalculator::calculate(flags, principal, charges)?;
        println!(
            "platform {:<5} processing {:<5} interest {:<5} => deducted {:>7}  net {:>8}  scheduled fees {:>6}",
            flags.deduct_platform_fee_in_advance,
            flags.deduct_processing_fee_in_advance,
            flags.deduct_interest_in_advance,
            breakdown.deducted_in_advance,
            breakdown.net_disbursed,
            breakdown.scheduled_fees(),
        );
    }

    // deductions swallowing the principal are refused
    let heavy = Charges {
        platform_fee: Money::from_major(40),
        processing_fee: Money::from_major(60),
        total_interest: Money::ZERO,
    };
    let flags = DeductionFlags {
        deduct_platform_fee_in_advance: true,
        deduct_processing_fee_in_advance: true,
        deduct_interest_in_advance: false,
    };
    match DisbursementCalculator::calculate(flags, Money::from_major(100), heavy) {
        Ok(b) => println!("\nunexpected net {}", b.net_disbursed),
        Err(e) => println!("\nrefused: {}", e),
    }

    Ok(())
}

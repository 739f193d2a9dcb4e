pub mod catalog;
pub mod config;
pub mod decimal;
pub mod disbursement;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod overrides;
pub mod payments;
pub mod service;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use catalog::ProductCatalog;
pub use config::{DeductionFlags, EngineConfig, FeeRule, FeeSchedule, LoanProduct};
pub use decimal::{Money, Rate};
pub use disbursement::{DeductionPlan, DisbursementBreakdown, DisbursementCalculator};
pub use errors::{LoanError, Result};
pub use events::{Event, EventSink, EventStore};
pub use lifecycle::{ApprovalRequest, DisbursementRequest, Loan, NewApplication, TransitionRecord};
pub use overrides::{
    CashDayPolicy, CashOverride, CashOverrideAuthorizer, FixedCashBlock, GrantRequest, NoCashBlock, RevokeRequest,
};
pub use payments::{
    Installment, Payment, PaymentRequest, PaymentWaterfall, Reconciler, RepaymentSchedule, ScheduleTerms, Statement,
};
pub use service::{LoanService, PaymentReceipt};
pub use store::{InMemoryStore, LoanStore, OverrideStore, ProductStore};
pub use types::{
    CashAction, DisbursementMethod, InterestMethod, LoanStatus, PaymentMethod, PaymentStatus, Permission, Principal,
};
pub use views::{LoanView, ScheduleView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

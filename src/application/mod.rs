// Application layer: use cases on top of the ledger store.
// The service facade is the entry point; recorder, notifier and settlement
// hold the logic it runs inside transaction scopes.

pub mod dispatch;
pub mod error;
pub mod notifier;
pub mod recorder;
pub mod reporting;
pub mod service;
pub mod settlement;

pub use dispatch::{
    BudgetAlert, DispatchError, FriendAlert, LogDispatcher, MessageDispatcher, OutboundMessage,
};
pub use error::*;
pub use notifier::{BudgetCheck, PendingNotification};
pub use recorder::{ExpenseData, ExpenseUpdate, RecordOutcome};
pub use reporting::{
    CashFlowPeriod, CashFlowReport, CategoryReport, CategorySummary, Granularity, SummaryPeriod,
    SummaryRange,
};
pub use service::{GroupExpense, GroupExpenseEntry, LedgerService};
pub use settlement::{ConfirmedSettlement, SettlementEngine, SettlementResult};

//! Cost accounting for remote calls.
//!
//! [`PriceTable`] turns token usage into money; [`BudgetLedger`] accumulates it
//! and enforces the hard ceiling with a check-then-commit step, so a rejected
//! event never leaves a partial mutation behind.

mod ledger;
mod pricing;

pub use ledger::{BudgetLedger, LedgerSnapshot, ModelUsage};
pub use pricing::{PriceTable, TokenUsage, CACHE_READ_MULTIPLIER, CACHE_WRITE_MULTIPLIER};

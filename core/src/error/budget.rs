use thiserror::Error;

/// Raised when recording usage would push cumulative spend past the ceiling.
///
/// The ledger is left untouched whenever this is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    #[error(
        "budget exceeded: cost {attempted:.4} would raise total from {current:.4} to {projected:.4} (limit {limit:.4})"
    )]
    Exceeded {
        current: f64,
        attempted: f64,
        projected: f64,
        limit: f64,
    },
}

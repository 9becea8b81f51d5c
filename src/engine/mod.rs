//! The transaction processor.
//!
//! [`Ledger`] owns one run: it applies transactions in order, asks the
//! selected heuristic which claims each draw consumes, and hands back the
//! flows completed along the way. [`boundary`] deals with the window edges.

pub mod boundary;
pub mod ledger;
pub mod summary;

pub use boundary::{infer_starting_balances, StartingBalances};
pub use ledger::Ledger;
pub use summary::RunSummary;

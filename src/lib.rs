//! # money-flows
//!
//! Follow-the-money engine: decomposes a time-ordered transaction ledger
//! into flows, the paths individual amounts of money take from the moment
//! they enter the system to the moment they leave it.
//!
//! Money is never created or destroyed along the way, and no unit of money
//! is ever attributed to two flows. Where the ledger cannot say which money
//! left an account, an allocation heuristic decides.
//!
//! ## Architecture
//!
//! - **core** — Accounts, transactions, claims and their provenance arena, flows
//! - **allocation** — The three heuristics: no-tracking, greedy (LIFO), well-mixed
//! - **engine** — The per-run ledger, window boundaries, run summary
//! - **io** — CSV transaction reader and flow writer
//! - **config** — Run configuration and its validation
//! - **simulation** — Random feasible ledgers for testing and benchmarking

pub mod allocation;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod io;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::allocation::AllocationPolicy;
    pub use crate::config::{RunConfig, StartingBalanceMode};
    pub use crate::core::account_id::AccountId;
    pub use crate::core::flow::{Flow, FlowTag};
    pub use crate::core::transaction::{Category, FeeConvention, Transaction};
    pub use crate::engine::{infer_starting_balances, Ledger, RunSummary, StartingBalances};
    pub use crate::error::{AccountingError, FlowError, Issue};
    pub use crate::io::{FlowWriter, TransactionReader};
}

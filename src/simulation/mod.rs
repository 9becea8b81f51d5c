pub mod ledger_gen;

pub use ledger_gen::{generate_random_ledger, to_input_records, LedgerConfig};

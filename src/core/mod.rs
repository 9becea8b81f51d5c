pub mod account;
pub mod account_id;
pub mod claim;
pub mod flow;
pub mod transaction;

use rust_decimal::Decimal;

/// Tolerance for balance comparisons (1e-8 currency units).
pub const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

//! Random ledgers for tests, benchmarks and the `generate` command.
//!
//! Generated streams are feasible under the sender-pays convention: no
//! account is ever debited more than it holds, so a run over them needs no
//! inference at all.

use crate::core::account_id::AccountId;
use crate::core::transaction::{Category, Transaction};
use crate::io::reader::InputRecord;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Shape of a generated ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub account_count: usize,
    pub transaction_count: usize,
    /// Probability that a step is a deposit.
    pub deposit_share: f64,
    /// Probability that a step is a withdrawal.
    pub withdraw_share: f64,
    /// Probability that a step is an uncategorized movement.
    pub system_share: f64,
    pub min_deposit: Decimal,
    pub max_deposit: Decimal,
    /// Fee charged on transfers and withdrawals, as a share of the amount.
    pub fee_rate: Decimal,
    pub start: NaiveDateTime,
    /// Largest gap between consecutive transactions, in minutes.
    pub max_gap_minutes: i64,
    pub seed: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            account_count: 10,
            transaction_count: 100,
            deposit_share: 0.3,
            withdraw_share: 0.2,
            system_share: 0.0,
            min_deposit: dec!(10),
            max_deposit: dec!(1000),
            fee_rate: dec!(0.01),
            start: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            max_gap_minutes: 180,
            seed: 42,
        }
    }
}

/// Account that deposits come from and withdrawals go to.
pub const OUTSIDE: &str = "EXTERNAL";

/// Generate a time-ordered, feasible transaction stream.
pub fn generate_random_ledger(config: &LedgerConfig) -> Vec<Transaction> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let accounts: Vec<AccountId> = (0..config.account_count.max(1))
        .map(|i| AccountId::new(format!("ACCT-{:03}", i)))
        .collect();
    let outside = AccountId::new(OUTSIDE);
    let mut balances = vec![Decimal::ZERO; accounts.len()];
    let mut clock = config.start;
    let mut transactions = Vec::with_capacity(config.transaction_count);

    for n in 0..config.transaction_count {
        clock += Duration::minutes(rng.gen_range(0..=config.max_gap_minutes.max(0)));
        let id = format!("TXN-{:06}", n);
        let roll: f64 = rng.gen();
        let from = rng.gen_range(0..accounts.len());

        let spendable = balances[from] > dec!(1);
        if roll < config.deposit_share || !spendable {
            let amount = random_amount(&mut rng, config.min_deposit, config.max_deposit);
            let to = rng.gen_range(0..accounts.len());
            balances[to] += amount;
            transactions.push(Transaction::new(
                id,
                outside.clone(),
                accounts[to].clone(),
                clock,
                amount,
                Category::Deposit,
            ));
            continue;
        }

        let share = Decimal::from_f64_retain(rng.gen_range(0.05..1.0)).unwrap_or(Decimal::ONE);
        let amount = (balances[from] * share / (Decimal::ONE + config.fee_rate))
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let fee = (amount * config.fee_rate).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if amount <= Decimal::ZERO {
            continue;
        }
        balances[from] -= amount + fee;

        let (target, category, txn_type) = if roll < config.deposit_share + config.withdraw_share {
            (outside.clone(), Category::Withdraw, "withdraw")
        } else {
            let mut to = rng.gen_range(0..accounts.len());
            if accounts.len() > 1 {
                while to == from {
                    to = rng.gen_range(0..accounts.len());
                }
            }
            balances[to] += amount;
            let system = roll >= 1.0 - config.system_share;
            if system {
                (accounts[to].clone(), Category::System, "fee_sweep")
            } else {
                (accounts[to].clone(), Category::Transfer, "transfer")
            }
        };

        transactions.push(
            Transaction::new(id, accounts[from].clone(), target, clock, amount, category)
                .with_type(txn_type)
                .with_fee(fee),
        );
    }

    transactions
}

fn random_amount(rng: &mut StdRng, min: Decimal, max: Decimal) -> Decimal {
    let min_f64: f64 = min.to_string().parse().unwrap_or(10.0);
    let max_f64: f64 = max.to_string().parse().unwrap_or(1000.0);
    let value = if max_f64 > min_f64 {
        rng.gen_range(min_f64..max_f64)
    } else {
        min_f64
    };
    Decimal::from_f64_retain(value).unwrap_or(min).round_dp(2)
}

/// Rows for writing a generated ledger back out as CSV.
pub fn to_input_records(transactions: &[Transaction], timestamp_format: &str) -> Vec<InputRecord> {
    transactions
        .iter()
        .map(|txn| InputRecord {
            txn_id: txn.id().to_string(),
            src_id: txn.source().to_string(),
            tgt_id: txn.target().to_string(),
            timestamp: txn.timestamp().format(timestamp_format).to_string(),
            txn_type: txn.txn_type().to_string(),
            amt: txn.amount().to_string(),
            rev: Some(txn.fee().to_string()),
            src_balance: None,
            tgt_balance: None,
        })
        .collect()
}

//! Basic flow tracing example.
//!
//! Follows a handful of payments from the deposits that funded them to the
//! withdrawals that took them out, under the greedy (LIFO) heuristic.

use chrono::{NaiveDate, NaiveDateTime};
use money_flows::allocation::AllocationPolicy;
use money_flows::config::RunConfig;
use money_flows::core::account_id::AccountId;
use money_flows::core::flow::Flow;
use money_flows::core::transaction::{Category, Transaction};
use money_flows::engine::Ledger;
use rust_decimal_macros::dec;

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .unwrap_or_default()
}

fn show(flow: &Flow) {
    let accounts: Vec<&str> = flow.account_ids().iter().map(|a| a.as_str()).collect();
    println!(
        "  {:>8} ({:>5.1}% of {})  {}  {:?}  {:.1}h  [{} -> {}]",
        flow.amount().round_dp(2),
        flow.frac_root() * dec!(100),
        flow.txn_ids()[0],
        accounts.join(" → "),
        flow.txn_ids(),
        flow.duration(),
        flow.beginning(),
        flow.end(),
    );
}

fn main() {
    println!("╔══════════════════════════════════════════╗");
    println!("║  money-flows: Basic Flow Tracing Example ║");
    println!("╚══════════════════════════════════════════╝\n");

    let bank = AccountId::new("BANK");
    let alice = AccountId::new("alice");
    let bob = AccountId::new("bob");
    let carol = AccountId::new("carol");

    let ledger_rows = vec![
        Transaction::new("D1", bank.clone(), alice.clone(), at(1, 9), dec!(100), Category::Deposit),
        Transaction::new("D2", bank.clone(), alice.clone(), at(1, 11), dec!(50), Category::Deposit),
        Transaction::new("T1", alice.clone(), bob.clone(), at(1, 14), dec!(80), Category::Transfer)
            .with_fee(dec!(1)),
        Transaction::new("T2", bob.clone(), carol.clone(), at(2, 10), dec!(30), Category::Transfer),
        Transaction::new("W1", bob.clone(), bank.clone(), at(2, 16), dec!(40), Category::Withdraw),
        Transaction::new("W2", carol.clone(), bank.clone(), at(3, 9), dec!(30), Category::Withdraw),
    ];

    // --- Scenario 1: Observed withdrawals only ---
    println!("━━━ Scenario 1: Greedy, no inference ━━━\n");
    for txn in &ledger_rows {
        println!("  {}", txn);
    }
    println!();

    let mut ledger = match Ledger::new(RunConfig::default().with_heuristic(AllocationPolicy::Greedy)) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return;
        }
    };
    println!("Flows:");
    let summary = ledger.run(ledger_rows.iter().cloned().map(Ok), |flow| {
        show(flow);
        Ok(())
    });
    match summary {
        Ok(summary) => println!("\n{}", summary),
        Err(e) => eprintln!("run failed: {}", e),
    }

    // --- Scenario 2: Flushing what is left ---
    println!("━━━ Scenario 2: Greedy, inferred close-out ━━━\n");
    println!("Balances still held at the end leave through inferred withdrawals.\n");

    let config = RunConfig::default()
        .with_heuristic(AllocationPolicy::Greedy)
        .with_infer(true);
    let mut ledger = match Ledger::new(config) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return;
        }
    };
    println!("Flows:");
    if let Err(e) = ledger.run(ledger_rows.iter().cloned().map(Ok), |flow| {
        show(flow);
        Ok(())
    }) {
        eprintln!("run failed: {}", e);
    }

    println!("\n━━━ Final Balances ━━━\n");
    for account in ledger.accounts() {
        println!(
            "  {:<10} {:>10}  tracked {:>10}",
            account.id(),
            account.balance(),
            account.tracked_total()
        );
    }
}

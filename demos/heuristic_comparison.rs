//! Heuristic comparison example.
//!
//! Runs the same generated ledger through every allocation heuristic and
//! compares the shape of the flows each one produces.

use money_flows::allocation::AllocationPolicy;
use money_flows::config::RunConfig;
use money_flows::engine::Ledger;
use money_flows::simulation::ledger_gen::{generate_random_ledger, LedgerConfig};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Default)]
struct FlowStats {
    flows: u64,
    total: Decimal,
    hops: u64,
    longest: usize,
    hours: f64,
}

impl FlowStats {
    fn mean_hops(&self) -> f64 {
        if self.flows == 0 {
            0.0
        } else {
            self.hops as f64 / self.flows as f64
        }
    }

    fn mean_hours(&self) -> f64 {
        if self.flows == 0 {
            0.0
        } else {
            self.hours / self.flows as f64
        }
    }
}

fn main() {
    println!("╔═══════════════════════════════════════════════╗");
    println!("║  money-flows: Heuristic Comparison            ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    let generator = LedgerConfig {
        account_count: 25,
        transaction_count: 2_000,
        system_share: 0.02,
        ..Default::default()
    };
    let txns = generate_random_ledger(&generator);
    let entered: Decimal = txns.iter().filter(|t| t.is_entry()).map(|t| t.amount()).sum();

    println!("Ledger: {} transactions across {} accounts", txns.len(), generator.account_count);
    println!("Money entered: {}\n", entered.round_dp(2));

    println!("━━━ Flows per Heuristic ━━━\n");
    println!(
        "  {:<12} {:>7} {:>14} {:>10} {:>8} {:>10}",
        "heuristic", "flows", "amount", "mean hops", "longest", "mean hrs"
    );

    let mut summaries = Vec::new();
    for policy in AllocationPolicy::ALL {
        let config = RunConfig::default().with_heuristic(policy).with_infer(true);
        let mut ledger = match Ledger::new(config) {
            Ok(ledger) => ledger,
            Err(e) => {
                eprintln!("invalid configuration: {}", e);
                return;
            }
        };

        let mut stats = FlowStats::default();
        let result = ledger.run(txns.iter().cloned().map(Ok), |flow| {
            stats.flows += 1;
            stats.total += flow.amount();
            stats.hops += flow.txn_ids().len() as u64;
            stats.longest = stats.longest.max(flow.txn_ids().len());
            stats.hours += flow.duration();
            Ok(())
        });
        match result {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                eprintln!("{} run failed: {}", policy, e);
                continue;
            }
        }

        println!(
            "  {:<12} {:>7} {:>14} {:>10.2} {:>8} {:>10.1}",
            policy.as_str(),
            stats.flows,
            stats.total.round_dp(2),
            stats.mean_hops(),
            stats.longest,
            stats.mean_hours()
        );
    }

    println!("\n━━━ Untracked Money ━━━\n");
    for summary in &summaries {
        let drained = summary.system_drained + summary.resolution_loss;
        let share = if entered.is_zero() {
            0.0
        } else {
            (drained / entered).to_f64().unwrap_or(0.0) * 100.0
        };
        println!(
            "  {:<12} materialized {:>12}  lost {:>10} ({:.3}%)",
            summary.heuristic.as_str(),
            (summary.existing_materialized + summary.untracked_materialized).round_dp(2),
            drained.round_dp(2),
            share
        );
    }

    println!("\n━━━ Full Summaries ━━━\n");
    for summary in &summaries {
        println!("{}", summary);
    }
}

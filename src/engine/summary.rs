use crate::allocation::AllocationPolicy;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Per-run accounting totals.
///
/// Amounts are in currency units; every amount that stops being tracked
/// without becoming a flow is accounted for in one of the buckets below.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub heuristic: AllocationPolicy,
    pub transactions_processed: u64,
    pub transactions_outside_window: u64,
    pub transactions_out_of_order: u64,
    pub issues: u64,
    pub flows_emitted: u64,
    /// Credited to targets by observed deposits.
    pub deposited: Decimal,
    /// Debited from sources by observed withdrawals.
    pub withdrawn: Decimal,
    pub inferred_deposits: Decimal,
    pub inferred_withdrawals: Decimal,
    /// Untracked balance made visible as `existing` pseudo deposits.
    pub existing_materialized: Decimal,
    /// Untracked balance rooted directly on an outgoing transaction.
    pub untracked_materialized: Decimal,
    /// Tracked money that left through `system` transactions.
    pub system_drained: Decimal,
    /// Tracked money flushed by the time cutoff.
    pub cutoff_flushed: Decimal,
    /// Open claims dropped at close-out when inference is off.
    pub discarded_at_close: Decimal,
    /// Fragments smaller than the resolution limit.
    pub resolution_loss: Decimal,
}

impl RunSummary {
    pub fn new(heuristic: AllocationPolicy) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            heuristic,
            transactions_processed: 0,
            transactions_outside_window: 0,
            transactions_out_of_order: 0,
            issues: 0,
            flows_emitted: 0,
            deposited: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
            inferred_deposits: Decimal::ZERO,
            inferred_withdrawals: Decimal::ZERO,
            existing_materialized: Decimal::ZERO,
            untracked_materialized: Decimal::ZERO,
            system_drained: Decimal::ZERO,
            cutoff_flushed: Decimal::ZERO,
            discarded_at_close: Decimal::ZERO,
            resolution_loss: Decimal::ZERO,
        }
    }

    /// Money that entered tracking: observed deposits plus everything the
    /// boundary layer made visible.
    pub fn total_in(&self) -> Decimal {
        self.deposited + self.inferred_deposits + self.existing_materialized + self.untracked_materialized
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ({}) ===", self.heuristic)?;
        writeln!(f, "Run ID:               {}", self.run_id)?;
        writeln!(f, "Transactions:         {}", self.transactions_processed)?;
        writeln!(f, "Outside window:       {}", self.transactions_outside_window)?;
        writeln!(f, "Out of order:         {}", self.transactions_out_of_order)?;
        writeln!(f, "Issues:               {}", self.issues)?;
        writeln!(f, "Flows emitted:        {}", self.flows_emitted)?;
        writeln!(f, "Deposited:            {}", self.deposited)?;
        writeln!(f, "Withdrawn:            {}", self.withdrawn)?;
        writeln!(f, "Inferred deposits:    {}", self.inferred_deposits)?;
        writeln!(f, "Inferred withdrawals: {}", self.inferred_withdrawals)?;
        writeln!(f, "Existing balance:     {}", self.existing_materialized)?;
        writeln!(f, "Untracked roots:      {}", self.untracked_materialized)?;
        writeln!(f, "System drained:       {}", self.system_drained)?;
        writeln!(f, "Cutoff flushed:       {}", self.cutoff_flushed)?;
        writeln!(f, "Discarded at close:   {}", self.discarded_at_close)?;
        write!(f, "Resolution loss:      {}", self.resolution_loss)
    }
}

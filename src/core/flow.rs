use crate::core::account_id::AccountId;
use crate::core::claim::Recorded;
use crate::core::transaction::{Category, Origin};
use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept for amounts in emitted records.
const AMOUNT_DP: u32 = 8;

/// How a flow began or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowTag {
    /// Entered through an observed deposit.
    Deposit,
    /// Synthesized by the boundary layer: a shortfall deposit or a close-out withdrawal.
    Inferred,
    /// Balance already in the account, made visible as a pseudo deposit.
    Existing,
    /// Balance whose provenance was never observed.
    Untracked,
    /// Left through an observed withdrawal.
    Withdraw,
    /// Forced out of tracking by the time cutoff.
    Cutoff,
}

impl FlowTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowTag::Deposit => "deposit",
            FlowTag::Inferred => "inferred",
            FlowTag::Existing => "existing",
            FlowTag::Untracked => "untracked",
            FlowTag::Withdraw => "withdraw",
            FlowTag::Cutoff => "cutoff",
        }
    }

    fn beginning_of(root: &Recorded) -> Self {
        let txn = root.transaction();
        if !txn.is_entry() {
            return FlowTag::Untracked;
        }
        match txn.origin() {
            Origin::Inferred => FlowTag::Inferred,
            Origin::Existing => FlowTag::Existing,
            Origin::Observed => FlowTag::Deposit,
        }
    }
}

impl fmt::Display for FlowTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the walked chain terminates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Terminus {
    /// The leaf's transaction carries the money out of the system.
    Exit(FlowTag),
    /// The money is still in the leaf's account and stops being tracked at `at`.
    Flush { tag: FlowTag, at: NaiveDateTime },
}

/// A completed trajectory of money from its entry to its exit.
///
/// Built once by [`crate::core::claim::ClaimArena::follow_back`] and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    timestamp: NaiveDateTime,
    amount: Decimal,
    frac_root: Decimal,
    length: u32,
    length_wrev: Decimal,
    duration: f64,
    account_ids: Vec<AccountId>,
    txn_ids: Vec<String>,
    txn_types: Vec<String>,
    durations: Vec<f64>,
    rev_fracs: Vec<f64>,
    hop_amounts: Vec<Decimal>,
    beginning: FlowTag,
    end: FlowTag,
    last_seen: NaiveDateTime,
}

impl Flow {
    /// Start a flow at its root transaction with `gross` drawn into it.
    pub(crate) fn seed(root: &Recorded, gross: Decimal) -> Self {
        let txn = root.transaction();
        let frac_root = if root.debit() == Decimal::ZERO {
            Decimal::ONE
        } else {
            gross / root.debit()
        };

        let mut account_ids = Vec::new();
        if !txn.is_entry() {
            account_ids.push(txn.source().clone());
        }
        account_ids.push(txn.target().clone());

        let mut flow = Self {
            timestamp: txn.timestamp(),
            amount: gross,
            frac_root,
            length: 0,
            length_wrev: Decimal::ZERO,
            duration: 0.0,
            account_ids,
            txn_ids: vec![txn.id().to_string()],
            txn_types: vec![txn.txn_type().to_string()],
            durations: Vec::new(),
            rev_fracs: vec![to_f64(root.fee_fraction())],
            hop_amounts: vec![gross],
            beginning: FlowTag::beginning_of(root),
            end: FlowTag::Untracked,
            last_seen: txn.timestamp(),
        };
        flow.count_transfer(root, gross);
        flow
    }

    /// Append the next hop, with `gross` of this flow drawn into it.
    pub(crate) fn extend(&mut self, hop: &Recorded, gross: Decimal) {
        let txn = hop.transaction();
        self.durations.push(hours_between(self.last_seen, txn.timestamp()));
        self.last_seen = txn.timestamp();
        self.txn_ids.push(txn.id().to_string());
        self.txn_types.push(txn.txn_type().to_string());
        self.account_ids.push(txn.target().clone());
        self.rev_fracs.push(to_f64(hop.fee_fraction()));
        self.hop_amounts.push(gross);
        self.count_transfer(hop, gross);
    }

    pub(crate) fn finish(mut self, terminus: Terminus) -> Self {
        match terminus {
            Terminus::Exit(tag) => {
                // The exit transaction's target is outside the system.
                self.account_ids.pop();
                self.duration = hours_between(self.timestamp, self.last_seen);
                self.end = tag;
            }
            Terminus::Flush { tag, at } => {
                self.durations.push(hours_between(self.last_seen, at));
                self.duration = hours_between(self.timestamp, at);
                self.end = tag;
            }
        }
        self
    }

    fn count_transfer(&mut self, hop: &Recorded, gross: Decimal) {
        let txn = hop.transaction();
        if txn.category() == Category::Transfer && txn.origin() == Origin::Observed {
            self.length += 1;
            if self.amount > Decimal::ZERO {
                self.length_wrev += gross / self.amount;
            }
        }
    }

    // --- Accessors ---

    /// Timestamp of the root transaction.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Amount at entry, fees included.
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Fraction of the root transaction this flow accounts for.
    pub fn frac_root(&self) -> Decimal {
        self.frac_root
    }

    /// Number of observed transfers between entry and exit.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Transfers weighted by the share of the entry amount still present at each.
    pub fn length_wrev(&self) -> Decimal {
        self.length_wrev
    }

    /// Hours from entry to exit (or flush).
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn account_ids(&self) -> &[AccountId] {
        &self.account_ids
    }

    pub fn txn_ids(&self) -> &[String] {
        &self.txn_ids
    }

    pub fn txn_types(&self) -> &[String] {
        &self.txn_types
    }

    /// Hours spent between consecutive hops.
    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    /// Fee fraction taken at each hop.
    pub fn rev_fracs(&self) -> &[f64] {
        &self.rev_fracs
    }

    /// Amount of this flow drawn into each hop, fees included.
    pub fn hop_amounts(&self) -> &[Decimal] {
        &self.hop_amounts
    }

    pub fn beginning(&self) -> FlowTag {
        self.beginning
    }

    pub fn end(&self) -> FlowTag {
        self.end
    }

    /// Flatten into the output row shape.
    pub fn to_record(&self, timestamp_format: &str) -> Result<FlowRecord, serde_json::Error> {
        let accounts: Vec<&str> = self.account_ids.iter().map(|a| a.as_str()).collect();
        Ok(FlowRecord {
            flow_timestamp: self.timestamp.format(timestamp_format).to_string(),
            flow_amt: self.amount.round_dp(AMOUNT_DP).normalize(),
            flow_frac_root: to_f64(self.frac_root),
            flow_length: self.length,
            flow_length_wrev: to_f64(self.length_wrev),
            flow_duration: self.duration,
            flow_acct_ids: serde_json::to_string(&accounts)?,
            flow_txn_ids: serde_json::to_string(&self.txn_ids)?,
            flow_txn_types: serde_json::to_string(&self.txn_types)?,
            flow_durations: serde_json::to_string(&self.durations)?,
            flow_rev_fracs: serde_json::to_string(&self.rev_fracs)?,
            flow_categs: serde_json::to_string(&[self.beginning, self.end])?,
        })
    }
}

/// One row of the flow output consumed by downstream aggregation.
///
/// List-valued columns hold JSON arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_timestamp: String,
    pub flow_amt: Decimal,
    pub flow_frac_root: f64,
    pub flow_length: u32,
    pub flow_length_wrev: f64,
    pub flow_duration: f64,
    #[serde(rename = "flow_acct_IDs")]
    pub flow_acct_ids: String,
    #[serde(rename = "flow_txn_IDs")]
    pub flow_txn_ids: String,
    pub flow_txn_types: String,
    pub flow_durations: String,
    pub flow_rev_fracs: String,
    pub flow_categs: String,
}

fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

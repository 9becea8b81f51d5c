//! The edges of the observation window.
//!
//! Nothing the ledger sees explains money that was already in an account
//! when the window opened, or money still sitting there when it closes.
//! This module decides what to do about both: starting balances are
//! inferred before the run, shortfalls are covered by inferred deposits,
//! untracked remainders are made visible, and at the end every account is
//! either flushed through a synthetic withdrawal or has its claims discarded.

use super::ledger::{account_entry, Ledger};
use crate::config::{RunConfig, StartingBalanceMode};
use crate::core::account_id::AccountId;
use crate::core::claim::{Claim, TxnRef};
use crate::core::flow::{Flow, FlowTag, Terminus};
use crate::core::transaction::{Category, Transaction};
use crate::core::BALANCE_EPSILON;
use crate::error::AccountingError;
use chrono::{Duration, NaiveDateTime};
use log::{debug, info};
use rust_decimal::Decimal;
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Untracked balance present in each account when the window opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartingBalances(BTreeMap<AccountId, Decimal>);

impl StartingBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting balance of `account`, zero when unknown.
    pub fn get(&self, account: &AccountId) -> Decimal {
        self.0.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn insert(&mut self, account: AccountId, balance: Decimal) {
        self.0.insert(account, balance);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &Decimal)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> Decimal {
        self.0.values().copied().sum()
    }
}

impl FromIterator<(AccountId, Decimal)> for StartingBalances {
    fn from_iter<T: IntoIterator<Item = (AccountId, Decimal)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Default)]
struct Replay {
    running: Decimal,
    lowest: Decimal,
    anchored: Option<Decimal>,
}

impl Replay {
    fn apply(&mut self, delta: Decimal, observed_after: Option<Decimal>) {
        self.running += delta;
        self.lowest = self.lowest.min(self.running);
        if self.anchored.is_none() {
            self.anchored = observed_after.map(|balance| balance - self.running);
        }
    }
}

/// Replay a transaction stream to find each account's balance at the start
/// of the window.
///
/// The first balance column seen for an account pins its starting balance
/// exactly. Accounts without one get, in [`StartingBalanceMode::Infer`],
/// the smallest balance that keeps them from ever going negative, and zero
/// otherwise. Only transactions inside the configured window count.
pub fn infer_starting_balances<I, T>(transactions: I, config: &RunConfig) -> StartingBalances
where
    I: IntoIterator<Item = T>,
    T: Borrow<Transaction>,
{
    if config.starting_balance == StartingBalanceMode::None {
        return StartingBalances::new();
    }

    let mut replays: BTreeMap<AccountId, Replay> = BTreeMap::new();
    for txn in transactions {
        let txn = txn.borrow();
        let at = txn.timestamp();
        if config.time_begin.is_some_and(|begin| at < begin)
            || config.time_end.is_some_and(|end| at > end)
        {
            continue;
        }

        let convention = config.fee_convention;
        if txn.category() != Category::Deposit {
            replays
                .entry(txn.source().clone())
                .or_default()
                .apply(-convention.debit(txn.amount(), txn.fee()), txn.source_balance());
        }
        if txn.category() != Category::Withdraw {
            replays
                .entry(txn.target().clone())
                .or_default()
                .apply(convention.credit(txn.amount(), txn.fee()), txn.target_balance());
        }
    }

    let inferring = config.starting_balance == StartingBalanceMode::Infer;
    replays
        .into_iter()
        .filter_map(|(account, replay)| {
            let start = match replay.anchored {
                Some(start) => start.max(Decimal::ZERO),
                None if inferring => -replay.lowest,
                None => Decimal::ZERO,
            };
            (start > Decimal::ZERO).then_some((account, start))
        })
        .collect()
}

/// Per-run counters for synthetic transaction ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticIds {
    deposits: u64,
    existing: u64,
    withdrawals: u64,
}

impl SyntheticIds {
    fn next_deposit(&mut self) -> String {
        self.deposits += 1;
        format!("inferred-deposit-{}", self.deposits)
    }

    fn next_existing(&mut self) -> String {
        self.existing += 1;
        format!("existing-{}", self.existing)
    }

    fn next_withdrawal(&mut self) -> String {
        self.withdrawals += 1;
        format!("inferred-withdraw-{}", self.withdrawals)
    }
}

fn cutoff_span(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

impl Ledger {
    /// Make sure `account` can be debited `debit`.
    ///
    /// With inference on, a shortfall is covered by an inferred deposit
    /// dated at the window start and placed under every other claim.
    pub(super) fn ensure_funds(
        &mut self,
        account: &AccountId,
        debit: Decimal,
        now: NaiveDateTime,
    ) -> Result<(), AccountingError> {
        let policy = self.policy;
        let infer = self.config.infer;
        let holder = account_entry(&mut self.accounts, &self.starting, account);
        if holder.has_sufficient_balance(debit) {
            return Ok(());
        }
        if !infer {
            return Err(AccountingError::InsufficientTrackedFunds {
                account: account.clone(),
                requested: debit,
                available: holder.balance(),
            });
        }

        let shortfall = debit - holder.balance();
        let dated = self.window_begin.unwrap_or(now);
        let handle = self.arena.record(Transaction::inferred_deposit(
            self.synthetic.next_deposit(),
            account.clone(),
            dated,
            shortfall,
        ));
        debug!("inferred deposit of {} into {}", shortfall, account);

        let holder = account_entry(&mut self.accounts, &self.starting, account);
        if policy.retains_claims() && shortfall >= self.config.resolution_limit {
            holder.deposit_oldest(&mut self.arena, handle, shortfall);
        } else {
            holder.credit_untracked(shortfall);
        }
        self.summary.inferred_deposits += shortfall;
        Ok(())
    }

    /// Turn the untracked part of a draw into a claim continuing through
    /// `handle`, or account for it as resolution loss when too small.
    ///
    /// With inference on (and a tracking heuristic) the money is first
    /// rooted on an `existing` pseudo deposit so the flow shows where it sat.
    pub(super) fn materialize_untracked(&mut self, handle: TxnRef, untracked: Decimal) -> Option<Claim> {
        if untracked <= Decimal::ZERO {
            return None;
        }
        let resolution = self.config.resolution_limit;
        let carried = self.arena.transaction(handle).pass_through(untracked);
        if untracked < resolution || carried < resolution {
            self.summary.resolution_loss += untracked;
            return None;
        }

        let id = if self.config.infer && self.policy.retains_claims() {
            let outgoing = self.arena.transaction(handle).transaction();
            let (account, now) = (outgoing.source().clone(), outgoing.timestamp());
            let dated = self.window_begin.unwrap_or(now);
            let pseudo = self.arena.record(Transaction::existing_balance(
                self.synthetic.next_existing(),
                account,
                dated,
                untracked,
            ));
            let root = self.arena.root(pseudo);
            self.summary.existing_materialized += untracked;
            self.arena.extend(root, handle)
        } else {
            self.summary.untracked_materialized += untracked;
            self.arena.root(handle)
        };
        Some(Claim::new(id, carried))
    }

    /// Flush claims of `account` whose chain is older than the cutoff at `now`.
    pub(super) fn expire(&mut self, account: &AccountId, now: NaiveDateTime, flows: &mut Vec<Flow>) {
        let Some(hours) = self.config.time_cutoff else {
            return;
        };
        let Some(holder) = self.accounts.get_mut(account) else {
            return;
        };
        let span = cutoff_span(hours);
        let Some(horizon) = now.checked_sub_signed(span) else {
            return;
        };
        let expired = holder.take_expired(&self.arena, horizon);
        for claim in expired {
            let rooted = self.arena.rooted_at(claim.id());
            let at = rooted.checked_add_signed(span).unwrap_or(now);
            self.summary.cutoff_flushed += claim.amount();
            flows.push(self.arena.follow_back(
                claim.id(),
                claim.amount(),
                Terminus::Flush {
                    tag: FlowTag::Cutoff,
                    at,
                },
            ));
        }
    }

    /// Resolve every account at the end of the window, in account id order.
    ///
    /// With inference on, each non-empty account is emptied by an inferred
    /// withdrawal processed like any other, so all its money ends up in
    /// flows tagged `inferred`. Otherwise the open claims are discarded and
    /// the money is only reported in the run summary.
    pub fn close_out(&mut self) -> Result<Vec<Flow>, AccountingError> {
        let Some(at) = self.config.time_end.or(self.clock) else {
            return Ok(Vec::new());
        };

        let mut flows = Vec::new();
        let ids: Vec<AccountId> = self.accounts.keys().cloned().collect();
        for id in ids {
            self.expire(&id, at, &mut flows);
            let Some(holder) = self.accounts.get_mut(&id) else {
                continue;
            };
            // already emitted by cutoff flows
            holder.release_flushed();

            if !self.config.infer {
                let discarded: Decimal = holder.take_claims().iter().map(|c| c.amount()).sum();
                self.summary.discarded_at_close += discarded;
                continue;
            }

            let balance = holder.balance();
            if balance <= BALANCE_EPSILON {
                let residue: Decimal = holder.take_claims().iter().map(|c| c.amount()).sum();
                self.summary.resolution_loss += residue;
                continue;
            }
            let withdrawal =
                Transaction::inferred_withdrawal(self.synthetic.next_withdrawal(), id.clone(), at, balance);
            self.withdraw(withdrawal, FlowTag::Inferred, &mut flows)?;
        }

        info!(
            "closed out {} accounts at {}: {} flows",
            self.accounts.len(),
            at,
            flows.len()
        );
        self.summary.flows_emitted += flows.len() as u64;
        Ok(flows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationPolicy;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn txn(id: &str, src: &str, tgt: &str, day: u32, amount: Decimal, category: Category) -> Transaction {
        Transaction::new(id, AccountId::new(src), AccountId::new(tgt), at(day, 0), amount, category)
    }

    #[test]
    fn test_starting_balances_inferred_from_shortfall() {
        let stream = vec![
            txn("T1", "A", "B", 1, dec!(30), Category::Transfer),
            txn("D1", "bank", "A", 2, dec!(100), Category::Deposit),
            txn("T2", "A", "B", 3, dec!(50), Category::Transfer),
            txn("W1", "B", "bank", 4, dec!(90), Category::Withdraw),
        ];
        let config = RunConfig::default().with_starting_balance(StartingBalanceMode::Infer);
        let starting = infer_starting_balances(&stream, &config);

        assert_eq!(starting.get(&AccountId::new("A")), dec!(30));
        assert_eq!(starting.get(&AccountId::new("B")), dec!(10));
        assert_eq!(starting.get(&AccountId::new("bank")), Decimal::ZERO);
        assert_eq!(starting.len(), 2);
    }

    #[test]
    fn test_starting_balances_from_column() {
        let stream = vec![
            txn("T1", "A", "B", 1, dec!(30), Category::Transfer).with_balances(Some(dec!(70)), None),
            txn("T2", "C", "B", 2, dec!(5), Category::Transfer),
        ];
        let config = RunConfig::default().with_starting_balance(StartingBalanceMode::ReadFromColumn);
        let starting = infer_starting_balances(&stream, &config);

        assert_eq!(starting.get(&AccountId::new("A")), dec!(100));
        // no column and no inference: C starts empty even though it overdraws
        assert_eq!(starting.get(&AccountId::new("C")), Decimal::ZERO);

        let config = config.with_starting_balance(StartingBalanceMode::Infer);
        let starting = infer_starting_balances(&stream, &config);
        assert_eq!(starting.get(&AccountId::new("A")), dec!(100));
        assert_eq!(starting.get(&AccountId::new("C")), dec!(5));
    }

    #[test]
    fn test_mode_none_is_empty() {
        let stream = vec![txn("T1", "A", "B", 1, dec!(30), Category::Transfer)];
        let starting = infer_starting_balances(&stream, &RunConfig::default());
        assert!(starting.is_empty());
    }

    #[test]
    fn test_inferred_deposit_covers_shortfall() {
        let config = RunConfig::default().with_infer(true);
        let mut ledger = Ledger::new(config).unwrap();
        ledger.process(txn("D1", "bank", "A", 2, dec!(20), Category::Deposit)).unwrap();
        let flows = ledger
            .process(txn("W1", "A", "bank", 3, dec!(50), Category::Withdraw))
            .unwrap();

        assert_eq!(ledger.summary().inferred_deposits, dec!(30));
        assert_eq!(flows.len(), 2);
        // LIFO: the observed deposit leaves first, the inferred one sits underneath
        assert_eq!(flows[0].beginning(), FlowTag::Inferred);
        assert_eq!(flows[0].txn_ids(), ["inferred-deposit-1", "W1"]);
        assert_eq!(flows[0].timestamp(), at(2, 0));
        assert_eq!(flows[1].beginning(), FlowTag::Deposit);
    }

    #[test]
    fn test_existing_balance_materialized_when_inferring() {
        let config = RunConfig::default().with_infer(true);
        let mut ledger = Ledger::new(config)
            .unwrap()
            .with_starting_balances(StartingBalances::from_iter([(AccountId::new("A"), dec!(40))]));
        ledger.process(txn("T1", "A", "B", 1, dec!(40), Category::Transfer)).unwrap();
        let flows = ledger
            .process(txn("W1", "B", "bank", 2, dec!(40), Category::Withdraw))
            .unwrap();

        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].beginning(), FlowTag::Existing);
        assert_eq!(flows[0].txn_ids(), ["existing-1", "T1", "W1"]);
        assert_eq!(ledger.summary().existing_materialized, dec!(40));
    }

    #[test]
    fn test_close_out_with_inference() {
        let config = RunConfig::default().with_infer(true);
        let mut ledger = Ledger::new(config).unwrap();
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger.process(txn("T1", "A", "B", 2, dec!(40), Category::Transfer)).unwrap();

        let flows = ledger.close_out().unwrap();
        assert_eq!(flows.len(), 2);
        assert!(flows.iter().all(|f| f.end() == FlowTag::Inferred));
        let total: Decimal = flows.iter().map(|f| f.amount()).sum();
        assert_eq!(total, dec!(100));
        assert_eq!(flows[0].txn_ids(), ["D1", "inferred-withdraw-1"]);
        assert_eq!(flows[1].txn_ids(), ["D1", "T1", "inferred-withdraw-2"]);
        assert!(ledger.accounts().all(|a| a.balance() == Decimal::ZERO));
    }

    #[test]
    fn test_close_out_without_inference_discards() {
        let mut ledger = Ledger::new(RunConfig::default()).unwrap();
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger.process(txn("W1", "A", "bank", 2, dec!(25), Category::Withdraw)).unwrap();

        let flows = ledger.close_out().unwrap();
        assert!(flows.is_empty());
        assert_eq!(ledger.summary().discarded_at_close, dec!(75));
        let a = ledger.account(&AccountId::new("A")).unwrap();
        assert!(a.claims().is_empty());
        assert_eq!(a.balance(), dec!(75));
    }

    #[test]
    fn test_cutoff_flushes_old_claims() {
        let config = RunConfig::default().with_cutoff(24.0);
        let mut ledger = Ledger::new(config).unwrap();
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger.process(txn("D2", "bank", "A", 3, dec!(10), Category::Deposit)).unwrap();
        let flows = ledger
            .process(txn("W1", "A", "bank", 3, dec!(60), Category::Withdraw))
            .unwrap();

        let cutoff: Vec<_> = flows.iter().filter(|f| f.end() == FlowTag::Cutoff).collect();
        assert_eq!(cutoff.len(), 1);
        assert_eq!(cutoff[0].amount(), dec!(100));
        assert_eq!(cutoff[0].duration(), 24.0);

        // D1 was already emitted: the withdrawal takes D2, the rest comes
        // out of the flushed money without a second flow
        let withdrawn: Vec<_> = flows.iter().filter(|f| f.end() == FlowTag::Withdraw).collect();
        assert_eq!(withdrawn.len(), 1);
        assert_eq!(withdrawn[0].txn_ids(), ["D2", "W1"]);
        assert_eq!(ledger.summary().cutoff_flushed, dec!(100));
        assert_eq!(ledger.summary().untracked_materialized, Decimal::ZERO);
    }

    #[test]
    fn test_cutoff_then_inferred_close_out_conserves_deposits() {
        let config = RunConfig::default().with_cutoff(24.0).with_infer(true);
        let mut ledger = Ledger::new(config).unwrap();
        let stream = vec![
            txn("D1", "bank", "A", 1, dec!(100), Category::Deposit),
            txn("D2", "bank", "A", 3, dec!(10), Category::Deposit),
            txn("W1", "A", "bank", 3, dec!(60), Category::Withdraw),
        ];
        let mut flows = Vec::new();
        ledger
            .run(stream.into_iter().map(Ok), |f| {
                flows.push(f.clone());
                Ok(())
            })
            .unwrap();

        let total: Decimal = flows.iter().map(|f| f.amount()).sum();
        assert_eq!(total, dec!(110));
        assert_eq!(flows.len(), 2);
        assert!(flows.iter().all(|f| f.beginning() == FlowTag::Deposit));
        assert_eq!(ledger.summary().existing_materialized, Decimal::ZERO);
        assert_eq!(ledger.summary().inferred_withdrawals, Decimal::ZERO);
        assert!(ledger.accounts().all(|a| a.balance() == Decimal::ZERO));
    }

    #[test]
    fn test_cutoff_then_plain_close_out_emits_nothing_twice() {
        let mut ledger = Ledger::new(RunConfig::default().with_cutoff(24.0)).unwrap();
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger.process(txn("D2", "bank", "A", 3, dec!(10), Category::Deposit)).unwrap();
        let mut flows = ledger
            .process(txn("W1", "A", "bank", 3, dec!(60), Category::Withdraw))
            .unwrap();
        flows.extend(ledger.close_out().unwrap());

        let total: Decimal = flows.iter().map(|f| f.amount()).sum();
        assert_eq!(total, dec!(110));
        assert!(flows.iter().all(|f| f.beginning() == FlowTag::Deposit));
    }

    #[test]
    fn test_no_tracking_close_out_is_single_transaction() {
        let config = RunConfig::default()
            .with_heuristic(AllocationPolicy::NoTracking)
            .with_infer(true);
        let mut ledger = Ledger::new(config).unwrap();
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();

        let flows = ledger.close_out().unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].txn_ids(), ["inferred-withdraw-1"]);
        assert_eq!(flows[0].beginning(), FlowTag::Untracked);
        assert_eq!(flows[0].end(), FlowTag::Inferred);
    }

    #[test]
    fn test_synthetic_ids_restart_after_reset() {
        let mut ids = SyntheticIds::default();
        assert_eq!(ids.next_deposit(), "inferred-deposit-1");
        assert_eq!(ids.next_deposit(), "inferred-deposit-2");
        assert_eq!(ids.next_existing(), "existing-1");
        assert_eq!(SyntheticIds::default(), SyntheticIds::default());
    }
}

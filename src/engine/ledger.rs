use super::boundary::{StartingBalances, SyntheticIds};
use super::summary::RunSummary;
use crate::allocation::{AllocationPolicy, Extension};
use crate::config::{ConfigError, RunConfig};
use crate::core::account::Account;
use crate::core::account_id::AccountId;
use crate::core::claim::{ClaimArena, TxnRef};
use crate::core::flow::{Flow, FlowTag, Terminus};
use crate::core::transaction::{Category, Transaction};
use crate::error::{AccountingError, FlowError, Issue};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// The per-run state machine: accounts, the claim arena and the run's totals.
///
/// Transactions are applied strictly in the order they are handed in. Each
/// one either completes fully or, on an accounting error, leaves the ledger
/// as it was before the transaction.
///
/// # Examples
///
/// ```
/// use money_flows::config::RunConfig;
/// use money_flows::core::account_id::AccountId;
/// use money_flows::core::transaction::{Category, Transaction};
/// use money_flows::engine::Ledger;
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
///
/// let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let (bank, a, b) = (AccountId::new("bank"), AccountId::new("A"), AccountId::new("B"));
///
/// let mut ledger = Ledger::new(RunConfig::default()).unwrap();
/// ledger.process(Transaction::new("D1", bank.clone(), a.clone(), day(1), dec!(100), Category::Deposit)).unwrap();
/// ledger.process(Transaction::new("T1", a.clone(), b.clone(), day(2), dec!(60), Category::Transfer)).unwrap();
/// let flows = ledger
///     .process(Transaction::new("W1", b.clone(), bank.clone(), day(3), dec!(60), Category::Withdraw))
///     .unwrap();
///
/// assert_eq!(flows.len(), 1);
/// assert_eq!(flows[0].amount(), dec!(60));
/// assert_eq!(flows[0].txn_ids(), ["D1", "T1", "W1"]);
/// ```
#[derive(Debug)]
pub struct Ledger {
    pub(super) config: RunConfig,
    pub(super) policy: AllocationPolicy,
    pub(super) arena: ClaimArena,
    pub(super) accounts: BTreeMap<AccountId, Account>,
    pub(super) starting: StartingBalances,
    pub(super) summary: RunSummary,
    pub(super) issues: Vec<Issue>,
    /// Latest timestamp processed so far.
    pub(super) clock: Option<NaiveDateTime>,
    pub(super) window_begin: Option<NaiveDateTime>,
    pub(super) synthetic: SyntheticIds,
}

impl Ledger {
    /// A ledger running the first heuristic of `config`.
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.primary_heuristic();
        Ok(Self {
            arena: ClaimArena::new(config.fee_convention),
            window_begin: config.time_begin,
            summary: RunSummary::new(policy),
            policy,
            config,
            accounts: BTreeMap::new(),
            starting: StartingBalances::default(),
            issues: Vec::new(),
            clock: None,
            synthetic: SyntheticIds::default(),
        })
    }

    /// Seed accounts with untracked starting balances.
    pub fn with_starting_balances(mut self, starting: StartingBalances) -> Self {
        self.starting = starting;
        self.accounts.clear();
        self
    }

    /// Apply one transaction and return the flows it completed.
    pub fn process(&mut self, txn: Transaction) -> Result<Vec<Flow>, AccountingError> {
        let at = txn.timestamp();
        if !self.in_window(at) {
            debug!("{} at {} is outside the time window, skipping", txn.id(), at);
            self.summary.transactions_outside_window += 1;
            return Ok(Vec::new());
        }

        if let Some(clock) = self.clock {
            if at < clock {
                warn!("{} at {} arrived after {}; processing out of order", txn.id(), at, clock);
                self.summary.transactions_out_of_order += 1;
            }
        }
        self.clock = Some(self.clock.map_or(at, |clock| clock.max(at)));
        self.window_begin.get_or_insert(at);

        if txn.category() != Category::Deposit {
            let debit = self.config.fee_convention.debit(txn.amount(), txn.fee());
            self.ensure_funds(txn.source(), debit, at)?;
        }

        debug!("processing {}", txn);
        let mut flows = Vec::new();
        match txn.category() {
            Category::Deposit => self.deposit(txn),
            Category::Transfer => self.transfer(txn, &mut flows)?,
            Category::Withdraw => self.withdraw(txn, FlowTag::Withdraw, &mut flows)?,
            Category::System => self.system(txn, &mut flows)?,
        }

        self.summary.transactions_processed += 1;
        self.summary.flows_emitted += flows.len() as u64;
        Ok(flows)
    }

    /// Drive a whole stream through the ledger, then close it out.
    ///
    /// Malformed records are logged and recorded as issues. Accounting errors
    /// are recorded and the transaction skipped, unless the run is strict, in
    /// which case the first one aborts the run.
    pub fn run<I, F>(&mut self, records: I, mut emit: F) -> Result<RunSummary, FlowError>
    where
        I: IntoIterator<Item = Result<Transaction, Issue>>,
        F: FnMut(&Flow) -> Result<(), FlowError>,
    {
        info!("run {} started with heuristic {}", self.summary.run_id, self.policy);

        for record in records {
            let txn = match record {
                Ok(txn) => txn,
                Err(issue) => {
                    self.record_issue(issue);
                    continue;
                }
            };
            let raw = txn.to_string();
            match self.process(txn) {
                Ok(flows) => {
                    for flow in &flows {
                        emit(flow)?;
                    }
                }
                Err(err) if self.config.strict => return Err(err.into()),
                Err(err) => self.record_issue(Issue::accounting(raw, &err)),
            }
        }

        match self.close_out() {
            Ok(flows) => {
                for flow in &flows {
                    emit(flow)?;
                }
            }
            Err(err) if self.config.strict => return Err(err.into()),
            Err(err) => self.record_issue(Issue::accounting("close-out", &err)),
        }

        info!(
            "run {} finished: {} transactions, {} flows, {} issues",
            self.summary.run_id,
            self.summary.transactions_processed,
            self.summary.flows_emitted,
            self.summary.issues
        );
        Ok(self.summary.clone())
    }

    /// Back to the state right after construction: starting balances only,
    /// no claims, no flows, a fresh run id.
    pub fn reset(&mut self) {
        self.arena.clear();
        for account in self.accounts.values_mut() {
            account.reset();
        }
        self.summary = RunSummary::new(self.policy);
        self.issues.clear();
        self.clock = None;
        self.window_begin = self.config.time_begin;
        self.synthetic = SyntheticIds::default();
    }

    fn deposit(&mut self, txn: Transaction) {
        let target = txn.target().clone();
        let handle = self.arena.record(txn);
        let credit = self.arena.transaction(handle).credit();
        self.summary.deposited += credit;

        let tracked = self.policy.retains_claims() && credit >= self.config.resolution_limit;
        let account = account_entry(&mut self.accounts, &self.starting, &target);
        if tracked {
            account.deposit(&mut self.arena, handle, credit);
        } else {
            account.credit_untracked(credit);
        }
    }

    fn transfer(&mut self, txn: Transaction, flows: &mut Vec<Flow>) -> Result<(), AccountingError> {
        let (source, target) = (txn.source().clone(), txn.target().clone());
        let handle = self.arena.record(txn);
        let Extension {
            mut children,
            untracked,
            ..
        } = self.draw(&source, handle, flows)?;

        if self.policy.retains_claims() {
            if let Some(claim) = self.materialize_untracked(handle, untracked) {
                // Untracked money is older than anything tracked in the source.
                children.insert(0, claim);
            }
        }

        let credit = self.arena.transaction(handle).credit();
        account_entry(&mut self.accounts, &self.starting, &target).add_claims(children, credit);
        Ok(())
    }

    /// Money leaving the system. `end` tags every flow completed here.
    pub(super) fn withdraw(
        &mut self,
        txn: Transaction,
        end: FlowTag,
        flows: &mut Vec<Flow>,
    ) -> Result<(), AccountingError> {
        let source = txn.source().clone();
        let handle = self.arena.record(txn);
        let Extension {
            mut children,
            untracked,
            ..
        } = self.draw(&source, handle, flows)?;

        if let Some(claim) = self.materialize_untracked(handle, untracked) {
            children.insert(0, claim);
        }

        let debit = self.arena.transaction(handle).debit();
        match end {
            FlowTag::Inferred => self.summary.inferred_withdrawals += debit,
            _ => self.summary.withdrawn += debit,
        }

        flows.extend(
            children
                .iter()
                .map(|leaf| self.arena.follow_back(leaf.id(), leaf.amount(), Terminus::Exit(end))),
        );
        Ok(())
    }

    /// Movement outside the tracked boundary: tracked money is drained from
    /// the source, the target receives untracked money.
    fn system(&mut self, txn: Transaction, flows: &mut Vec<Flow>) -> Result<(), AccountingError> {
        let (source, target) = (txn.source().clone(), txn.target().clone());
        let handle = self.arena.record(txn);
        let extension = self.draw(&source, handle, flows)?;

        // children arrive in the target's terms; count what left the source
        let recorded = self.arena.transaction(handle);
        let drained: Decimal = extension.children.iter().map(|c| recorded.gross(c.amount())).sum();
        self.summary.system_drained += drained;

        let credit = self.arena.transaction(handle).credit();
        account_entry(&mut self.accounts, &self.starting, &target).credit_untracked(credit);
        Ok(())
    }

    /// Flush expired claims of `source`, then consume its claims for `handle`.
    fn draw(
        &mut self,
        source: &AccountId,
        handle: TxnRef,
        flows: &mut Vec<Flow>,
    ) -> Result<Extension, AccountingError> {
        let now = self.arena.transaction(handle).transaction().timestamp();
        self.expire(source, now, flows);

        let account = account_entry(&mut self.accounts, &self.starting, source);
        let extension =
            account.extend_claims(&mut self.arena, self.policy, handle, self.config.resolution_limit)?;
        self.summary.resolution_loss += extension.dropped;
        Ok(extension)
    }

    fn in_window(&self, at: NaiveDateTime) -> bool {
        self.config.time_begin.map_or(true, |begin| at >= begin)
            && self.config.time_end.map_or(true, |end| at <= end)
    }

    fn record_issue(&mut self, issue: Issue) {
        warn!("{}", issue);
        self.summary.issues += 1;
        self.issues.push(issue);
    }

    // --- Accessors ---

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Records skipped during this run.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// All accounts seen so far, in id order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn arena(&self) -> &ClaimArena {
        &self.arena
    }

    pub fn starting_balances(&self) -> &StartingBalances {
        &self.starting
    }
}

/// The account for `id`, created with its starting balance on first use.
pub(super) fn account_entry<'a>(
    accounts: &'a mut BTreeMap<AccountId, Account>,
    starting: &StartingBalances,
    id: &AccountId,
) -> &'a mut Account {
    accounts
        .entry(id.clone())
        .or_insert_with(|| Account::with_starting_balance(id.clone(), starting.get(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::FeeConvention;
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

    fn ledger(policy: AllocationPolicy) -> Ledger {
        Ledger::new(RunConfig::default().with_heuristic(policy)).unwrap()
    }

    #[test]
    fn test_deposit_creates_root_claim() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        let flows = ledger
            .process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit))
            .unwrap();

        assert!(flows.is_empty());
        let a = ledger.account(&AccountId::new("A")).unwrap();
        assert_eq!(a.balance(), dec!(100));
        assert_eq!(a.tracked_total(), dec!(100));
        assert!(ledger.account(&AccountId::new("bank")).is_none());
    }

    #[test]
    fn test_transfer_with_fee() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger
            .process(txn("T1", "A", "B", 2, dec!(50), Category::Transfer).with_fee(dec!(2)))
            .unwrap();

        let a = ledger.account(&AccountId::new("A")).unwrap();
        let b = ledger.account(&AccountId::new("B")).unwrap();
        assert_eq!(a.balance(), dec!(48));
        assert_eq!(a.tracked_total(), dec!(48));
        assert_eq!(b.balance(), dec!(50));
        assert_eq!(b.tracked_total(), dec!(50));
    }

    #[test]
    fn test_withdraw_emits_flow_with_fees_at_entry() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger
            .process(txn("T1", "A", "B", 2, dec!(50), Category::Transfer).with_fee(dec!(2)))
            .unwrap();
        let flows = ledger
            .process(txn("W1", "B", "bank", 3, dec!(50), Category::Withdraw))
            .unwrap();

        assert_eq!(flows.len(), 1);
        let flow = &flows[0];
        assert_eq!(flow.amount(), dec!(52));
        assert_eq!(flow.txn_ids(), ["D1", "T1", "W1"]);
        assert_eq!(flow.beginning(), FlowTag::Deposit);
        assert_eq!(flow.end(), FlowTag::Withdraw);
        assert_eq!(ledger.summary().flows_emitted, 1);
        assert_eq!(ledger.summary().withdrawn, dec!(50));
    }

    #[test]
    fn test_insufficient_funds_is_typed_and_leaves_state() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        ledger.process(txn("D1", "bank", "A", 1, dec!(10), Category::Deposit)).unwrap();

        let err = ledger
            .process(txn("T1", "A", "B", 2, dec!(50), Category::Transfer))
            .unwrap_err();
        assert!(matches!(err, AccountingError::InsufficientTrackedFunds { .. }));

        let a = ledger.account(&AccountId::new("A")).unwrap();
        assert_eq!(a.balance(), dec!(10));
        assert_eq!(a.tracked_total(), dec!(10));
        assert!(ledger.account(&AccountId::new("B")).is_none());
    }

    #[test]
    fn test_system_drains_tracking() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger.process(txn("S1", "A", "B", 2, dec!(40), Category::System)).unwrap();

        let b = ledger.account(&AccountId::new("B")).unwrap();
        assert_eq!(b.balance(), dec!(40));
        assert_eq!(b.tracked_total(), Decimal::ZERO);
        assert_eq!(ledger.summary().system_drained, dec!(40));
    }

    #[test]
    fn test_system_drain_counts_source_side_with_fee() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger
            .process(txn("S1", "A", "B", 2, dec!(40), Category::System).with_fee(dec!(10)))
            .unwrap();

        assert_eq!(ledger.summary().system_drained, dec!(50));
        assert_eq!(ledger.account(&AccountId::new("A")).unwrap().balance(), dec!(50));
        assert_eq!(ledger.account(&AccountId::new("B")).unwrap().balance(), dec!(40));
    }

    #[test]
    fn test_untracked_remainder_rooted_on_withdrawal() {
        let mut ledger = ledger(AllocationPolicy::Greedy)
            .with_starting_balances(StartingBalances::from_iter([(AccountId::new("A"), dec!(30))]));
        ledger.process(txn("D1", "bank", "A", 1, dec!(20), Category::Deposit)).unwrap();
        let flows = ledger
            .process(txn("W1", "A", "bank", 2, dec!(50), Category::Withdraw))
            .unwrap();

        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].beginning(), FlowTag::Untracked);
        assert_eq!(flows[0].amount(), dec!(30));
        assert_eq!(flows[0].txn_ids(), ["W1"]);
        assert_eq!(flows[1].beginning(), FlowTag::Deposit);
        assert_eq!(flows[1].amount(), dec!(20));
        assert_eq!(ledger.summary().untracked_materialized, dec!(30));
    }

    #[test]
    fn test_window_skips_and_counts() {
        let config = RunConfig::default().with_window(Some(at(2, 0)), Some(at(3, 0)));
        let mut ledger = Ledger::new(config).unwrap();
        ledger.process(txn("D0", "bank", "A", 1, dec!(5), Category::Deposit)).unwrap();
        ledger.process(txn("D1", "bank", "A", 2, dec!(10), Category::Deposit)).unwrap();
        ledger.process(txn("D2", "bank", "A", 4, dec!(20), Category::Deposit)).unwrap();

        assert_eq!(ledger.summary().transactions_outside_window, 2);
        assert_eq!(ledger.summary().transactions_processed, 1);
        assert_eq!(ledger.account(&AccountId::new("A")).unwrap().balance(), dec!(10));
    }

    #[test]
    fn test_out_of_order_is_counted_and_processed() {
        let mut ledger = ledger(AllocationPolicy::Greedy);
        ledger.process(txn("D1", "bank", "A", 5, dec!(10), Category::Deposit)).unwrap();
        ledger.process(txn("D2", "bank", "A", 2, dec!(10), Category::Deposit)).unwrap();

        assert_eq!(ledger.summary().transactions_out_of_order, 1);
        assert_eq!(ledger.account(&AccountId::new("A")).unwrap().balance(), dec!(20));
    }

    #[test]
    fn test_no_tracking_keeps_no_claims() {
        let mut ledger = ledger(AllocationPolicy::NoTracking);
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger.process(txn("T1", "A", "B", 2, dec!(60), Category::Transfer)).unwrap();
        let flows = ledger
            .process(txn("W1", "B", "bank", 3, dec!(60), Category::Withdraw))
            .unwrap();

        assert!(ledger.accounts().all(|a| a.claims().is_empty()));
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].txn_ids(), ["W1"]);
        assert_eq!(flows[0].amount(), dec!(60));
    }

    #[test]
    fn test_recipient_pays_convention() {
        let config = RunConfig::default().with_fee_convention(FeeConvention::RecipientPays);
        let mut ledger = Ledger::new(config).unwrap();
        ledger.process(txn("D1", "bank", "A", 1, dec!(100), Category::Deposit)).unwrap();
        ledger
            .process(txn("T1", "A", "B", 2, dec!(100), Category::Transfer).with_fee(dec!(10)))
            .unwrap();

        assert_eq!(ledger.account(&AccountId::new("A")).unwrap().balance(), Decimal::ZERO);
        assert_eq!(ledger.account(&AccountId::new("B")).unwrap().tracked_total(), dec!(90));
    }
}

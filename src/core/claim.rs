//! Provenance chains.
//!
//! Every claim ever created lives in a [`ClaimArena`] as an immutable link
//! back to the claim it was split from, so the chain is a DAG that only grows
//! backward in time. Accounts hold the mutable part, `(ClaimId, amount)`, in
//! their own open-claim stacks.

use crate::core::flow::{Flow, Terminus};
use crate::core::transaction::{FeeConvention, Transaction};
use crate::core::BALANCE_EPSILON;
use crate::error::AccountingError;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::fmt;

/// Handle of a provenance link inside a [`ClaimArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClaimId(u32);

impl ClaimId {
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of a transaction recorded in a [`ClaimArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnRef(u32);

impl TxnRef {
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A transaction together with its debit and credit under the run's fee convention.
#[derive(Debug, Clone)]
pub struct Recorded {
    transaction: Transaction,
    debit: Decimal,
    credit: Decimal,
}

impl Recorded {
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Amount drawn from the source account.
    pub fn debit(&self) -> Decimal {
        self.debit
    }

    /// Amount landing in the target account.
    pub fn credit(&self) -> Decimal {
        self.credit
    }

    /// Share of the debit lost to fees on this hop.
    pub fn fee_fraction(&self) -> Decimal {
        if self.debit == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.debit - self.credit) / self.debit
    }

    /// Amount that arrives at the target for `consumed` drawn from the source.
    pub fn pass_through(&self, consumed: Decimal) -> Decimal {
        if self.debit == Decimal::ZERO {
            return Decimal::ZERO;
        }
        consumed * self.credit / self.debit
    }

    /// Amount drawn from the source for `credited` arriving at the target.
    pub fn gross(&self, credited: Decimal) -> Decimal {
        if self.credit == Decimal::ZERO {
            return credited;
        }
        credited * self.debit / self.credit
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    transaction: TxnRef,
    prior: Option<ClaimId>,
    rooted_at: NaiveDateTime,
}

/// An open fragment of money sitting in an account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Claim {
    id: ClaimId,
    amount: Decimal,
}

impl Claim {
    pub fn new(id: ClaimId, amount: Decimal) -> Self {
        Self { id, amount }
    }

    pub fn id(&self) -> ClaimId {
        self.id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Release part of this claim. The amount can only go down.
    pub fn decrement(&mut self, amount: Decimal) -> Result<(), AccountingError> {
        if amount > self.amount + BALANCE_EPSILON {
            return Err(AccountingError::ClaimOverdraw {
                claim: self.id,
                requested: amount,
                available: self.amount,
            });
        }
        self.amount = (self.amount - amount).max(Decimal::ZERO);
        Ok(())
    }
}

/// Owner of every recorded transaction and provenance link of one run.
///
/// Nothing is reclaimed mid-run; [`ClaimArena::clear`] tears the whole
/// arena down between runs.
#[derive(Debug, Clone, Default)]
pub struct ClaimArena {
    convention: FeeConvention,
    transactions: Vec<Recorded>,
    links: Vec<Link>,
}

impl ClaimArena {
    pub fn new(convention: FeeConvention) -> Self {
        Self {
            convention,
            transactions: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn convention(&self) -> FeeConvention {
        self.convention
    }

    /// Record a transaction, resolving its debit and credit.
    pub fn record(&mut self, transaction: Transaction) -> TxnRef {
        let debit = self
            .convention
            .debit(transaction.amount(), transaction.fee());
        let credit = self
            .convention
            .credit(transaction.amount(), transaction.fee());
        let handle = TxnRef(self.transactions.len() as u32);
        self.transactions.push(Recorded {
            transaction,
            debit,
            credit,
        });
        handle
    }

    pub fn transaction(&self, handle: TxnRef) -> &Recorded {
        &self.transactions[handle.0 as usize]
    }

    /// Start a new chain at `transaction`.
    pub fn root(&mut self, transaction: TxnRef) -> ClaimId {
        let rooted_at = self.transaction(transaction).transaction().timestamp();
        self.push_link(Link {
            transaction,
            prior: None,
            rooted_at,
        })
    }

    /// Continue the chain of `prior` through `transaction`.
    pub fn extend(&mut self, prior: ClaimId, transaction: TxnRef) -> ClaimId {
        let rooted_at = self.link(prior).rooted_at;
        self.push_link(Link {
            transaction,
            prior: Some(prior),
            rooted_at,
        })
    }

    pub fn prior(&self, id: ClaimId) -> Option<ClaimId> {
        self.link(id).prior
    }

    /// The transaction that brought this claim into its account.
    pub fn transaction_of(&self, id: ClaimId) -> &Recorded {
        self.transaction(self.link(id).transaction)
    }

    /// Timestamp of the chain's root transaction.
    pub fn rooted_at(&self, id: ClaimId) -> NaiveDateTime {
        self.link(id).rooted_at
    }

    /// Number of links ever created in this run.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
        self.links.clear();
    }

    /// Reconstruct the path taken by `amount` of the leaf claim.
    ///
    /// `amount` is in the leaf's own terms (what arrived through its
    /// transaction). Each step back converts it to the amount drawn upstream,
    /// fees included, so the flow's amount is what entered at the root.
    /// Pure with respect to the chain; nothing is decremented here.
    pub fn follow_back(&self, leaf: ClaimId, amount: Decimal, terminus: Terminus) -> Flow {
        let mut chain = Vec::new();
        let mut cursor = Some(leaf);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.prior(id);
        }

        let mut grosses = Vec::with_capacity(chain.len());
        let mut credited = amount;
        for id in &chain {
            let gross = self.transaction_of(*id).gross(credited);
            grosses.push(gross);
            credited = gross;
        }

        chain.reverse();
        grosses.reverse();

        let mut flow = Flow::seed(self.transaction_of(chain[0]), grosses[0]);
        for (id, gross) in chain.iter().zip(&grosses).skip(1) {
            flow.extend(self.transaction_of(*id), *gross);
        }
        flow.finish(terminus)
    }

    fn link(&self, id: ClaimId) -> &Link {
        &self.links[id.0 as usize]
    }

    fn push_link(&mut self, link: Link) -> ClaimId {
        let id = ClaimId(self.links.len() as u32);
        self.links.push(link);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account_id::AccountId;
    use crate::core::flow::FlowTag;
    use crate::core::transaction::Category;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn txn(id: &str, src: &str, tgt: &str, hour: u32, amount: Decimal, category: Category) -> Transaction {
        Transaction::new(id, AccountId::new(src), AccountId::new(tgt), at(hour), amount, category)
    }

    #[test]
    fn test_claim_decrement() {
        let mut claim = Claim::new(ClaimId::from_index(0), dec!(10));
        claim.decrement(dec!(4)).unwrap();
        assert_eq!(claim.amount(), dec!(6));

        let err = claim.decrement(dec!(7)).unwrap_err();
        assert!(matches!(err, AccountingError::ClaimOverdraw { .. }));
        assert_eq!(claim.amount(), dec!(6));
    }

    #[test]
    fn test_record_resolves_fees() {
        let mut arena = ClaimArena::new(FeeConvention::SenderPays);
        let t = arena.record(txn("T1", "A", "B", 1, dec!(100), Category::Transfer).with_fee(dec!(25)));
        let rec = arena.transaction(t);
        assert_eq!(rec.debit(), dec!(125));
        assert_eq!(rec.credit(), dec!(100));
        assert_eq!(rec.fee_fraction(), dec!(0.2));
        assert_eq!(rec.pass_through(dec!(50)), dec!(40));
        assert_eq!(rec.gross(dec!(40)), dec!(50));
    }

    #[test]
    fn test_chain_links() {
        let mut arena = ClaimArena::new(FeeConvention::SenderPays);
        let dep = arena.record(txn("D1", "X", "A", 1, dec!(100), Category::Deposit));
        let tr = arena.record(txn("T1", "A", "B", 3, dec!(60), Category::Transfer));

        let root = arena.root(dep);
        let child = arena.extend(root, tr);

        assert_eq!(arena.prior(root), None);
        assert_eq!(arena.prior(child), Some(root));
        assert_eq!(arena.rooted_at(child), at(1));
        assert_eq!(arena.transaction_of(child).transaction().id(), "T1");
        assert_eq!(arena.len(), 2);

        arena.clear();
        assert!(arena.is_empty());
        assert_eq!(arena.transaction_count(), 0);
    }

    #[test]
    fn test_follow_back_deposit_transfer_withdraw() {
        let mut arena = ClaimArena::new(FeeConvention::SenderPays);
        let dep = arena.record(txn("D1", "X", "A", 1, dec!(100), Category::Deposit));
        let tr = arena.record(txn("T1", "A", "B", 3, dec!(60), Category::Transfer));
        let wd = arena.record(txn("W1", "B", "Y", 6, dec!(60), Category::Withdraw));

        let root = arena.root(dep);
        let mid = arena.extend(root, tr);
        let leaf = arena.extend(mid, wd);

        let flow = arena.follow_back(leaf, dec!(60), Terminus::Exit(FlowTag::Withdraw));
        assert_eq!(flow.amount(), dec!(60));
        assert_eq!(flow.frac_root(), dec!(0.6));
        assert_eq!(flow.length(), 1);
        assert_eq!(flow.txn_ids(), &["D1", "T1", "W1"]);
        assert_eq!(
            flow.account_ids(),
            &[AccountId::new("A"), AccountId::new("B")]
        );
        assert_eq!(flow.durations(), &[2.0, 3.0]);
        assert_eq!(flow.duration(), 5.0);
        assert_eq!(flow.beginning(), FlowTag::Deposit);
        assert_eq!(flow.end(), FlowTag::Withdraw);
    }

    #[test]
    fn test_follow_back_grosses_up_fees() {
        let mut arena = ClaimArena::new(FeeConvention::SenderPays);
        let dep = arena.record(txn("D1", "X", "A", 1, dec!(200), Category::Deposit).with_fee(dec!(50)));
        let tr = arena.record(txn("T1", "A", "B", 2, dec!(100), Category::Transfer).with_fee(dec!(25)));
        let wd = arena.record(txn("W1", "B", "Y", 3, dec!(100), Category::Withdraw));

        let root = arena.root(dep);
        let mid = arena.extend(root, tr);
        let leaf = arena.extend(mid, wd);

        // 100 withdrawn from B needed 125 from A, which entered as 125 of a 250 deposit.
        let flow = arena.follow_back(leaf, dec!(100), Terminus::Exit(FlowTag::Withdraw));
        assert_eq!(flow.amount(), dec!(156.25));
        assert_eq!(flow.frac_root(), dec!(0.625));
        assert_eq!(flow.hop_amounts(), &[dec!(156.25), dec!(125), dec!(100)]);
        let fracs = flow.rev_fracs();
        assert_relative_eq!(fracs[0], 0.2);
        assert_relative_eq!(fracs[1], 0.2);
        assert_relative_eq!(fracs[2], 0.0);
    }

    #[test]
    fn test_follow_back_flush_keeps_resting_account() {
        let mut arena = ClaimArena::new(FeeConvention::SenderPays);
        let dep = arena.record(txn("D1", "X", "A", 1, dec!(10), Category::Deposit));
        let root = arena.root(dep);

        let flow = arena.follow_back(
            root,
            dec!(10),
            Terminus::Flush {
                tag: FlowTag::Cutoff,
                at: at(5),
            },
        );
        assert_eq!(flow.account_ids(), &[AccountId::new("A")]);
        assert_eq!(flow.durations(), &[4.0]);
        assert_eq!(flow.end(), FlowTag::Cutoff);
    }
}

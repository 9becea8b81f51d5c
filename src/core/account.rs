use crate::allocation::{AllocationPolicy, Extension};
use crate::core::account_id::AccountId;
use crate::core::claim::{Claim, ClaimArena, TxnRef};
use crate::core::BALANCE_EPSILON;
use crate::error::AccountingError;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// A ledger account: a raw balance plus the open claims that explain part of it.
///
/// The open claims are an ordered stack, most recent last. Their total
/// (the tracked balance) never exceeds the raw balance; the difference is
/// untracked money whose provenance was never observed.
///
/// Money whose claims were flushed by the time cutoff stays in the raw
/// balance but sits in a separate reserve: it has already been emitted, so
/// draws consume it silently instead of materializing it again.
#[derive(Debug, Clone)]
pub struct Account {
    id: AccountId,
    balance: Decimal,
    starting_balance: Decimal,
    claims: Vec<Claim>,
    flushed: Decimal,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Self::with_starting_balance(id, Decimal::ZERO)
    }

    /// An account holding `starting` of untracked money at the window start.
    pub fn with_starting_balance(id: AccountId, starting: Decimal) -> Self {
        Self {
            id,
            balance: starting,
            starting_balance: starting,
            claims: Vec::new(),
            flushed: Decimal::ZERO,
        }
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn starting_balance(&self) -> Decimal {
        self.starting_balance
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Sum of all open claims.
    pub fn tracked_total(&self) -> Decimal {
        self.claims.iter().map(|c| c.amount()).sum()
    }

    /// Part of the raw balance already emitted by cutoff flows.
    pub fn flushed(&self) -> Decimal {
        self.flushed
    }

    /// Raw balance not explained by any open claim nor already flushed.
    pub fn untracked_total(&self) -> Decimal {
        (self.balance - self.flushed - self.tracked_total()).max(Decimal::ZERO)
    }

    /// Money arriving from outside through `transaction`: one new root claim.
    pub fn deposit(&mut self, arena: &mut ClaimArena, transaction: TxnRef, amount: Decimal) {
        let id = arena.root(transaction);
        self.claims.push(Claim::new(id, amount));
        self.balance += amount;
    }

    /// Place a root claim for money that was already here before anything else,
    /// at the bottom of the stack.
    pub fn deposit_oldest(&mut self, arena: &mut ClaimArena, transaction: TxnRef, amount: Decimal) {
        let id = arena.root(transaction);
        self.claims.insert(0, Claim::new(id, amount));
        self.balance += amount;
    }

    /// Raise the raw balance without tracking where the money came from.
    pub fn credit_untracked(&mut self, amount: Decimal) {
        self.balance += amount;
    }

    pub fn has_sufficient_balance(&self, amount: Decimal) -> bool {
        self.balance + BALANCE_EPSILON >= amount
    }

    /// Receive claims extended through an incoming transaction worth `credit`.
    ///
    /// `credit` also covers any part of the transfer that arrived untracked.
    pub fn add_claims(&mut self, claims: Vec<Claim>, credit: Decimal) {
        self.claims.extend(claims);
        self.balance += credit;
    }

    /// Draw the debit of `transaction` from this account.
    ///
    /// The policy decides which open claims are consumed; the returned
    /// extension holds the child claims continuing through `transaction`
    /// (in the target's terms) and the untracked part of the debit.
    /// Debits below `resolution` only move the raw balance.
    pub fn extend_claims(
        &mut self,
        arena: &mut ClaimArena,
        policy: AllocationPolicy,
        transaction: TxnRef,
        resolution: Decimal,
    ) -> Result<Extension, AccountingError> {
        let debit = arena.transaction(transaction).debit();
        if !self.has_sufficient_balance(debit) {
            return Err(AccountingError::InsufficientTrackedFunds {
                account: self.id.clone(),
                requested: debit,
                available: self.balance,
            });
        }
        let tracked = self.tracked_total();
        if tracked > self.balance + BALANCE_EPSILON {
            return Err(AccountingError::TrackedExceedsBalance {
                account: self.id.clone(),
                tracked,
                balance: self.balance,
            });
        }

        if debit < resolution {
            let from_flushed = debit.min(self.flushed);
            self.flushed -= from_flushed;
            self.balance = (self.balance - debit).max(Decimal::ZERO);
            let dropped = self.trim_to_balance(resolution)?;
            return Ok(Extension {
                dropped,
                ..Extension::default()
            });
        }

        let mut extension =
            policy.extend(&mut self.claims, self.balance, arena, transaction, resolution)?;
        let from_flushed = extension.untracked.min(self.flushed);
        self.flushed -= from_flushed;
        extension.untracked -= from_flushed;
        self.balance = (self.balance - debit).max(Decimal::ZERO);
        self.flushed = self.flushed.min(self.balance);
        Ok(extension)
    }

    /// Remove and return every open claim whose chain started before `cutoff`.
    ///
    /// Their money moves into the flushed reserve.
    pub fn take_expired(&mut self, arena: &ClaimArena, cutoff: NaiveDateTime) -> Vec<Claim> {
        let (expired, kept): (Vec<Claim>, Vec<Claim>) = std::mem::take(&mut self.claims)
            .into_iter()
            .partition(|c| arena.rooted_at(c.id()) < cutoff);
        self.claims = kept;
        self.flushed += expired.iter().map(|c| c.amount()).sum::<Decimal>();
        expired
    }

    /// Drop the flushed reserve from the raw balance and return its size.
    pub fn release_flushed(&mut self) -> Decimal {
        let released = self.flushed;
        self.balance = (self.balance - released).max(Decimal::ZERO);
        self.flushed = Decimal::ZERO;
        released
    }

    /// Remove and return all open claims; the raw balance is untouched.
    pub fn take_claims(&mut self) -> Vec<Claim> {
        std::mem::take(&mut self.claims)
    }

    /// Back to the starting balance with no open claims.
    pub fn reset(&mut self) {
        self.balance = self.starting_balance;
        self.claims.clear();
        self.flushed = Decimal::ZERO;
    }

    /// Shave the most recent claims until the tracked total fits the balance
    /// left beside the flushed reserve.
    fn trim_to_balance(&mut self, resolution: Decimal) -> Result<Decimal, AccountingError> {
        let mut excess = self.tracked_total() + self.flushed - self.balance;
        let mut dropped = Decimal::ZERO;
        while excess > Decimal::ZERO {
            let Some(top) = self.claims.last_mut() else {
                break;
            };
            let take = excess.min(top.amount());
            top.decrement(take)?;
            excess -= take;
            dropped += take;
            if top.amount() < resolution {
                dropped += top.amount();
                self.claims.pop();
            }
        }
        Ok(dropped)
    }
}

use crate::core::account_id::AccountId;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a transaction plays relative to the tracked system.
///
/// The mapping from raw `txn_type` strings to a category is supplied by
/// configuration (see [`crate::config::CategoryMap`]), never guessed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Money enters the system at the target account.
    Deposit,
    /// Money moves between two tracked accounts.
    Transfer,
    /// Money leaves the system from the source account.
    Withdraw,
    /// Internal movement outside the tracked boundary.
    System,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Deposit => "deposit",
            Category::Transfer => "transfer",
            Category::Withdraw => "withdraw",
            Category::System => "system",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Category::Deposit),
            "transfer" => Ok(Category::Transfer),
            "withdraw" => Ok(Category::Withdraw),
            "system" => Ok(Category::System),
            other => Err(format!("unknown transaction category '{other}'")),
        }
    }
}

/// Where a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Read from the input stream.
    Observed,
    /// Synthesized to cover a shortfall or to flush the window.
    Inferred,
    /// Synthesized to make untracked balance visible as a flow root.
    Existing,
}

/// Who bears a transaction's fee.
///
/// Resolves a transaction into the amount debited from its source and the
/// amount credited to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeeConvention {
    #[default]
    SenderPays,
    RecipientPays,
    Split,
}

impl FeeConvention {
    /// Amount leaving the source account.
    pub fn debit(&self, amount: Decimal, fee: Decimal) -> Decimal {
        match self {
            FeeConvention::SenderPays => amount + fee,
            FeeConvention::RecipientPays => amount,
            FeeConvention::Split => amount + fee / Decimal::TWO,
        }
    }

    /// Amount arriving at the target account.
    pub fn credit(&self, amount: Decimal, fee: Decimal) -> Decimal {
        let credit = match self {
            FeeConvention::SenderPays => amount,
            FeeConvention::RecipientPays => amount - fee,
            FeeConvention::Split => amount - fee / Decimal::TWO,
        };
        credit.max(Decimal::ZERO)
    }
}

impl FromStr for FeeConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender-pays" => Ok(FeeConvention::SenderPays),
            "recipient-pays" => Ok(FeeConvention::RecipientPays),
            "split" => Ok(FeeConvention::Split),
            other => Err(format!("unknown fee convention '{other}'")),
        }
    }
}

/// A single movement of money between two accounts.
///
/// Transactions are immutable once created. The ledger records each one in
/// its claim arena, where it is referenced (never owned) by every claim it
/// establishes.
///
/// # Examples
///
/// ```
/// use money_flows::core::account_id::AccountId;
/// use money_flows::core::transaction::{Category, Transaction};
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
///
/// let at = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
/// let txn = Transaction::new(
///     "T1",
///     AccountId::new("A"),
///     AccountId::new("B"),
///     at,
///     dec!(100),
///     Category::Transfer,
/// )
/// .with_fee(dec!(2));
///
/// assert_eq!(txn.fee_ratio(), dec!(0.02));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    source: AccountId,
    target: AccountId,
    timestamp: NaiveDateTime,
    txn_type: String,
    amount: Decimal,
    fee: Decimal,
    category: Category,
    origin: Origin,
    /// Source balance after this transaction, when the input carries it.
    source_balance: Option<Decimal>,
    /// Target balance after this transaction, when the input carries it.
    target_balance: Option<Decimal>,
}

impl Transaction {
    /// Create an observed transaction with no fee.
    ///
    /// # Panics
    ///
    /// Panics if `amount` is negative.
    pub fn new(
        id: impl Into<String>,
        source: AccountId,
        target: AccountId,
        timestamp: NaiveDateTime,
        amount: Decimal,
        category: Category,
    ) -> Self {
        assert!(
            amount >= Decimal::ZERO,
            "Transaction amount must not be negative, got {}",
            amount
        );
        Self {
            id: id.into(),
            source,
            target,
            timestamp,
            txn_type: category.as_str().to_string(),
            amount,
            fee: Decimal::ZERO,
            category,
            origin: Origin::Observed,
            source_balance: None,
            target_balance: None,
        }
    }

    /// Deposit synthesized to cover a shortfall, dated at the window start.
    pub fn inferred_deposit(
        id: impl Into<String>,
        account: AccountId,
        timestamp: NaiveDateTime,
        amount: Decimal,
    ) -> Self {
        Self::new(id, AccountId::boundary(), account, timestamp, amount, Category::Deposit)
            .with_type("inferred_deposit")
            .with_origin(Origin::Inferred)
    }

    /// Pseudo deposit standing in for untracked balance already present.
    pub fn existing_balance(
        id: impl Into<String>,
        account: AccountId,
        timestamp: NaiveDateTime,
        amount: Decimal,
    ) -> Self {
        Self::new(id, AccountId::boundary(), account, timestamp, amount, Category::Deposit)
            .with_type("existing_balance")
            .with_origin(Origin::Existing)
    }

    /// Withdrawal synthesized to flush an account at the end of the window.
    pub fn inferred_withdrawal(
        id: impl Into<String>,
        account: AccountId,
        timestamp: NaiveDateTime,
        amount: Decimal,
    ) -> Self {
        Self::new(id, account, AccountId::boundary(), timestamp, amount, Category::Withdraw)
            .with_type("inferred_withdraw")
            .with_origin(Origin::Inferred)
    }

    /// Set the fee (revenue) charged on this transaction.
    ///
    /// # Panics
    ///
    /// Panics if `fee` is negative.
    pub fn with_fee(mut self, fee: Decimal) -> Self {
        assert!(fee >= Decimal::ZERO, "Transaction fee must not be negative, got {}", fee);
        self.fee = fee;
        self
    }

    /// Set the raw transaction type string.
    pub fn with_type(mut self, txn_type: impl Into<String>) -> Self {
        self.txn_type = txn_type.into();
        self
    }

    /// Attach post-transaction balances read from the input.
    pub fn with_balances(mut self, source: Option<Decimal>, target: Option<Decimal>) -> Self {
        self.source_balance = source;
        self.target_balance = target;
        self
    }

    fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    // --- Accessors ---

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &AccountId {
        &self.source
    }

    pub fn target(&self) -> &AccountId {
        &self.target
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn txn_type(&self) -> &str {
        &self.txn_type
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn fee(&self) -> Decimal {
        self.fee
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn source_balance(&self) -> Option<Decimal> {
        self.source_balance
    }

    pub fn target_balance(&self) -> Option<Decimal> {
        self.target_balance
    }

    /// Fee per unit of principal, fixed at creation.
    pub fn fee_ratio(&self) -> Decimal {
        if self.amount == Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.fee / self.amount
    }

    /// True for deposits, observed or synthetic: the money came from outside.
    pub fn is_entry(&self) -> bool {
        self.category == Category::Deposit
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {} amt={} fee={} at {} [{}]",
            self.id,
            self.category,
            self.source,
            self.target,
            self.amount,
            self.fee,
            self.timestamp,
            self.txn_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn sample_transfer() -> Transaction {
        Transaction::new(
            "T1",
            AccountId::new("A"),
            AccountId::new("B"),
            at(),
            dec!(100),
            Category::Transfer,
        )
        .with_fee(dec!(4))
    }

    #[test]
    fn test_transaction_creation() {
        let txn = sample_transfer();
        assert_eq!(txn.id(), "T1");
        assert_eq!(txn.source().as_str(), "A");
        assert_eq!(txn.target().as_str(), "B");
        assert_eq!(txn.txn_type(), "transfer");
        assert_eq!(txn.origin(), Origin::Observed);
        assert_eq!(txn.fee_ratio(), dec!(0.04));
    }

    #[test]
    #[should_panic(expected = "must not be negative")]
    fn test_transaction_negative_amount() {
        Transaction::new(
            "T1",
            AccountId::new("A"),
            AccountId::new("B"),
            at(),
            dec!(-1),
            Category::Transfer,
        );
    }

    #[test]
    fn test_zero_amount_fee_ratio() {
        let txn = Transaction::new(
            "T0",
            AccountId::new("A"),
            AccountId::new("B"),
            at(),
            Decimal::ZERO,
            Category::Transfer,
        );
        assert_eq!(txn.fee_ratio(), Decimal::ZERO);
    }

    #[test]
    fn test_fee_conventions() {
        let (amount, fee) = (dec!(100), dec!(4));
        assert_eq!(FeeConvention::SenderPays.debit(amount, fee), dec!(104));
        assert_eq!(FeeConvention::SenderPays.credit(amount, fee), dec!(100));
        assert_eq!(FeeConvention::RecipientPays.debit(amount, fee), dec!(100));
        assert_eq!(FeeConvention::RecipientPays.credit(amount, fee), dec!(96));
        assert_eq!(FeeConvention::Split.debit(amount, fee), dec!(102));
        assert_eq!(FeeConvention::Split.credit(amount, fee), dec!(98));
        assert_eq!(FeeConvention::RecipientPays.credit(dec!(1), dec!(5)), Decimal::ZERO);
    }

    #[test]
    fn test_synthetic_transactions() {
        let dep = Transaction::inferred_deposit("inferred-deposit-1", AccountId::new("A"), at(), dec!(5));
        assert!(dep.is_entry());
        assert_eq!(dep.origin(), Origin::Inferred);
        assert!(dep.source().is_boundary());

        let wd = Transaction::inferred_withdrawal("inferred-withdraw-1", AccountId::new("A"), at(), dec!(5));
        assert_eq!(wd.category(), Category::Withdraw);
        assert!(wd.target().is_boundary());

        let existing = Transaction::existing_balance("existing-1", AccountId::new("A"), at(), dec!(5));
        assert_eq!(existing.origin(), Origin::Existing);
        assert_eq!(existing.txn_type(), "existing_balance");
    }

    #[test]
    fn test_parse_category_and_convention() {
        assert_eq!("withdraw".parse::<Category>().unwrap(), Category::Withdraw);
        assert!("cash".parse::<Category>().is_err());
        assert_eq!("split".parse::<FeeConvention>().unwrap(), FeeConvention::Split);
    }
}

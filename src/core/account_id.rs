use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the account that stands for everything outside the tracked
/// system: the far leg of deposits, withdrawals and synthetic transactions.
const BOUNDARY_ID: &str = "(boundary)";

/// Unique identifier for an account in the payment system.
///
/// Accounts are created lazily the first time any transaction references
/// them, so the identifier is the only thing the ledger needs up front.
///
/// # Examples
///
/// ```
/// use money_flows::core::account_id::AccountId;
///
/// let alice = AccountId::new("ACCT-0001");
/// let bob = AccountId::new("ACCT-0002");
/// assert_ne!(alice, bob);
/// assert!(AccountId::boundary().is_boundary());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The pseudo-account on the outside leg of synthetic transactions.
    pub fn boundary() -> Self {
        Self(BOUNDARY_ID.to_string())
    }

    pub fn is_boundary(&self) -> bool {
        self.0 == BOUNDARY_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

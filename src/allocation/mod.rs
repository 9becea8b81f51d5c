//! Allocation heuristics.
//!
//! When money leaves an account, something has to decide which of the
//! account's open claims it was. The three policies here are a closed set
//! chosen once per ledger:
//!
//! - **no-tracking**: ignore claims; every draw is untracked money.
//! - **greedy**: last in, first out.
//! - **well-mixed**: every open claim contributes in proportion to its size.
//!
//! All policies share one contract: the claims drawn plus the untracked
//! remainder add up to the transaction's debit, and nothing smaller than the
//! resolution limit is carried forward.

mod greedy;
mod no_tracking;
mod well_mixed;

use crate::core::claim::{Claim, ClaimArena, TxnRef};
use crate::error::AccountingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of drawing one transaction's debit from an account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extension {
    /// Claims continuing through the transaction, amounts in the target's terms.
    pub children: Vec<Claim>,
    /// Part of the debit not covered by any open claim (source terms).
    pub untracked: Decimal,
    /// Tracked money discarded because it fell below the resolution limit.
    pub dropped: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPolicy {
    NoTracking,
    Greedy,
    WellMixed,
}

impl AllocationPolicy {
    pub const ALL: [AllocationPolicy; 3] = [
        AllocationPolicy::NoTracking,
        AllocationPolicy::Greedy,
        AllocationPolicy::WellMixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationPolicy::NoTracking => "no-tracking",
            AllocationPolicy::Greedy => "greedy",
            AllocationPolicy::WellMixed => "well-mixed",
        }
    }

    /// Whether accounts keep open claims under this policy.
    pub fn retains_claims(&self) -> bool {
        !matches!(self, AllocationPolicy::NoTracking)
    }

    /// Consume open claims for the debit of `transaction`.
    ///
    /// `balance` is the account's raw balance before the draw.
    pub fn extend(
        &self,
        claims: &mut Vec<Claim>,
        balance: Decimal,
        arena: &mut ClaimArena,
        transaction: TxnRef,
        resolution: Decimal,
    ) -> Result<Extension, AccountingError> {
        match self {
            AllocationPolicy::NoTracking => Ok(no_tracking::extend(arena, transaction)),
            AllocationPolicy::Greedy => greedy::extend(claims, arena, transaction, resolution),
            AllocationPolicy::WellMixed => {
                well_mixed::extend(claims, balance, arena, transaction, resolution)
            }
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-tracking" => Ok(AllocationPolicy::NoTracking),
            "greedy" => Ok(AllocationPolicy::Greedy),
            "well-mixed" => Ok(AllocationPolicy::WellMixed),
            other => Err(format!(
                "unknown heuristic '{other}' (expected no-tracking, greedy or well-mixed)"
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        for policy in AllocationPolicy::ALL {
            assert_eq!(policy.as_str().parse::<AllocationPolicy>().unwrap(), policy);
        }
        assert!("fifo".parse::<AllocationPolicy>().is_err());
    }

    #[test]
    fn test_retains_claims() {
        assert!(!AllocationPolicy::NoTracking.retains_claims());
        assert!(AllocationPolicy::Greedy.retains_claims());
        assert!(AllocationPolicy::WellMixed.retains_claims());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&AllocationPolicy::WellMixed).unwrap();
        assert_eq!(json, "\"well-mixed\"");
    }
}

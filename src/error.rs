//! Error taxonomy shared across the crate.
//!
//! Three families are kept apart so callers can treat them differently:
//! per-row parse failures are recovered and logged, accounting failures are
//! typed so a run can choose to skip or abort, and configuration failures are
//! fatal before the first transaction is read.

use crate::config::ConfigError;
use crate::core::account_id::AccountId;
use crate::core::claim::ClaimId;
use crate::io::reader::ParseError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Violations of the ledger's money invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccountingError {
    #[error("account {account} cannot extend {requested}: only {available} available")]
    InsufficientTrackedFunds {
        account: AccountId,
        requested: Decimal,
        available: Decimal,
    },
    #[error("claim {claim} cannot release {requested}: only {available} held")]
    ClaimOverdraw {
        claim: ClaimId,
        requested: Decimal,
        available: Decimal,
    },
    #[error("account {account} tracks {tracked} in claims but only holds {balance}")]
    TrackedExceedsBalance {
        account: AccountId,
        tracked: Decimal,
        balance: Decimal,
    },
}

/// Umbrella error for library operations.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Accounting(#[from] AccountingError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Malformed,
    Accounting,
}

/// One entry of a run's issues log: a record that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// Line number of the record in its source, when known.
    pub position: Option<u64>,
    pub raw: String,
    pub message: String,
}

impl Issue {
    pub fn malformed(position: Option<u64>, raw: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Malformed,
            position,
            raw: raw.into(),
            message: message.into(),
        }
    }

    pub fn accounting(raw: impl Into<String>, error: &AccountingError) -> Self {
        Self {
            kind: IssueKind::Accounting,
            position: None,
            raw: raw.into(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            IssueKind::Malformed => "malformed record",
            IssueKind::Accounting => "accounting failure",
        };
        match self.position {
            Some(line) => write!(f, "{kind} at line {line}: {} [{}]", self.message, self.raw),
            None => write!(f, "{kind}: {} [{}]", self.message, self.raw),
        }
    }
}

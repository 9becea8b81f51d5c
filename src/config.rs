//! Run configuration.
//!
//! A [`RunConfig`] is built once, validated, and then passed by reference to
//! every ledger it configures. Nothing here is global: two runs with
//! different configurations can live side by side.

use crate::allocation::AllocationPolicy;
use crate::core::transaction::{Category, FeeConvention};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default timestamp layout of the input and output CSV files.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest accepted `time_cutoff`, in hours (about a thousand years).
pub const MAX_CUTOFF_HOURS: f64 = 8_766_000.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("at least one heuristic must be selected")]
    NoHeuristics,
    #[error("resolution_limit must be positive, got {0}")]
    InvalidResolution(Decimal),
    #[error("time_cutoff must be positive and at most {max} hours, got {0}", max = MAX_CUTOFF_HOURS)]
    InvalidCutoff(f64),
    #[error("time window is inverted: begin {begin} is after end {end}")]
    InvertedWindow {
        begin: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("txn_type '{txn_type}' is mapped to both {first} and {second}")]
    DuplicateTxnType {
        txn_type: String,
        first: Category,
        second: Category,
    },
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// How starting balances are established before the first transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartingBalanceMode {
    /// Every account starts empty.
    #[default]
    None,
    /// The smallest balance that keeps every account non-negative.
    Infer,
    /// Derived from the balance columns of the input.
    ReadFromColumn,
}

impl FromStr for StartingBalanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(StartingBalanceMode::None),
            "infer" => Ok(StartingBalanceMode::Infer),
            "read-from-column" => Ok(StartingBalanceMode::ReadFromColumn),
            other => Err(format!("unknown starting-balance mode '{other}'")),
        }
    }
}

/// Mapping from raw `txn_type` strings to categories.
///
/// Types that appear in no list are treated as [`Category::System`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryMap {
    pub deposit: Vec<String>,
    pub transfer: Vec<String>,
    pub withdraw: Vec<String>,
    pub system: Vec<String>,
}

impl Default for CategoryMap {
    fn default() -> Self {
        Self {
            deposit: vec!["deposit".into()],
            transfer: vec!["transfer".into()],
            withdraw: vec!["withdraw".into(), "withdrawal".into()],
            system: Vec::new(),
        }
    }
}

impl CategoryMap {
    /// Category of a raw transaction type.
    pub fn lookup(&self, txn_type: &str) -> Category {
        self.entries()
            .find(|(name, _)| *name == txn_type)
            .map(|(_, category)| category)
            .unwrap_or(Category::System)
    }

    fn entries(&self) -> impl Iterator<Item = (&str, Category)> {
        [
            (&self.deposit, Category::Deposit),
            (&self.transfer, Category::Transfer),
            (&self.withdraw, Category::Withdraw),
            (&self.system, Category::System),
        ]
        .into_iter()
        .flat_map(|(names, category)| names.iter().map(move |n| (n.as_str(), category)))
    }

    /// A type may appear in at most one list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: BTreeMap<&str, Category> = BTreeMap::new();
        for (name, category) in self.entries() {
            if let Some(first) = seen.insert(name, category) {
                return Err(ConfigError::DuplicateTxnType {
                    txn_type: name.to_string(),
                    first,
                    second: category,
                });
            }
        }
        Ok(())
    }
}

/// Everything a ledger needs to know about one run.
///
/// # Examples
///
/// ```
/// use money_flows::allocation::AllocationPolicy;
/// use money_flows::config::RunConfig;
///
/// let config = RunConfig::default()
///     .with_heuristic(AllocationPolicy::WellMixed)
///     .with_infer(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Heuristics to run, one independent ledger each.
    pub heuristics: Vec<AllocationPolicy>,
    /// Smallest amount worth tracking.
    pub resolution_limit: Decimal,
    /// Maximum age of a tracked claim in hours before it is flushed.
    pub time_cutoff: Option<f64>,
    /// Materialize inferred deposits, existing balances and close-out withdrawals.
    pub infer: bool,
    pub starting_balance: StartingBalanceMode,
    pub fee_convention: FeeConvention,
    /// Transactions before this instant are skipped.
    pub time_begin: Option<NaiveDateTime>,
    /// Transactions after this instant are skipped.
    pub time_end: Option<NaiveDateTime>,
    pub timestamp_format: String,
    pub categories: CategoryMap,
    /// Abort on the first accounting error instead of skipping the transaction.
    pub strict: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            heuristics: vec![AllocationPolicy::Greedy],
            resolution_limit: dec!(0.01),
            time_cutoff: None,
            infer: false,
            starting_balance: StartingBalanceMode::None,
            fee_convention: FeeConvention::SenderPays,
            time_begin: None,
            time_end: None,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            categories: CategoryMap::default(),
            strict: false,
        }
    }
}

impl RunConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heuristics.is_empty() {
            return Err(ConfigError::NoHeuristics);
        }
        if self.resolution_limit <= Decimal::ZERO {
            return Err(ConfigError::InvalidResolution(self.resolution_limit));
        }
        if let Some(cutoff) = self.time_cutoff {
            if !(cutoff.is_finite() && cutoff > 0.0 && cutoff <= MAX_CUTOFF_HOURS) {
                return Err(ConfigError::InvalidCutoff(cutoff));
            }
        }
        if let (Some(begin), Some(end)) = (self.time_begin, self.time_end) {
            if begin > end {
                return Err(ConfigError::InvertedWindow { begin, end });
            }
        }
        if self.timestamp_format.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "timestamp_format",
                message: "must not be empty".into(),
            });
        }
        self.categories.validate()
    }

    /// Copy of this configuration running a single heuristic.
    pub fn for_heuristic(&self, policy: AllocationPolicy) -> Self {
        Self {
            heuristics: vec![policy],
            ..self.clone()
        }
    }

    /// The heuristic a single ledger runs: the first one selected.
    pub fn primary_heuristic(&self) -> AllocationPolicy {
        self.heuristics
            .first()
            .copied()
            .unwrap_or(AllocationPolicy::Greedy)
    }

    pub fn with_heuristic(mut self, policy: AllocationPolicy) -> Self {
        self.heuristics = vec![policy];
        self
    }

    pub fn with_infer(mut self, infer: bool) -> Self {
        self.infer = infer;
        self
    }

    pub fn with_resolution(mut self, resolution: Decimal) -> Self {
        self.resolution_limit = resolution;
        self
    }

    pub fn with_cutoff(mut self, hours: f64) -> Self {
        self.time_cutoff = Some(hours);
        self
    }

    pub fn with_starting_balance(mut self, mode: StartingBalanceMode) -> Self {
        self.starting_balance = mode;
        self
    }

    pub fn with_fee_convention(mut self, convention: FeeConvention) -> Self {
        self.fee_convention = convention;
        self
    }

    pub fn with_window(mut self, begin: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.time_begin = begin;
        self.time_end = end;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_default_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_heuristic(), AllocationPolicy::Greedy);
        assert_eq!(config.resolution_limit, dec!(0.01));
    }

    #[test]
    fn test_category_lookup() {
        let map = CategoryMap::default();
        assert_eq!(map.lookup("deposit"), Category::Deposit);
        assert_eq!(map.lookup("withdrawal"), Category::Withdraw);
        assert_eq!(map.lookup("interest"), Category::System);
    }

    #[test]
    fn test_duplicate_mapping_rejected() {
        let mut config = RunConfig::default();
        config.categories.transfer.push("deposit".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateTxnType { first: Category::Deposit, second: Category::Transfer, .. }
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RunConfig::default().with_resolution(Decimal::ZERO).validate(),
            Err(ConfigError::InvalidResolution(_))
        ));
        assert!(matches!(
            RunConfig::default().with_cutoff(-1.0).validate(),
            Err(ConfigError::InvalidCutoff(_))
        ));
        assert!(matches!(
            RunConfig::default().with_cutoff(1e300).validate(),
            Err(ConfigError::InvalidCutoff(_))
        ));
        assert!(RunConfig::default().with_cutoff(MAX_CUTOFF_HOURS).validate().is_ok());

        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(matches!(
            RunConfig::default().with_window(Some(day(5)), Some(day(1))).validate(),
            Err(ConfigError::InvertedWindow { .. })
        ));

        let mut empty = RunConfig::default();
        empty.heuristics.clear();
        assert!(matches!(empty.validate(), Err(ConfigError::NoHeuristics)));
    }

    #[test]
    fn test_from_json_partial() {
        let config = RunConfig::from_json(
            r#"{
                "heuristics": ["greedy", "well-mixed"],
                "resolution_limit": "0.5",
                "infer": true,
                "starting_balance": "read-from-column",
                "fee_convention": "split",
                "time_begin": "2024-01-01T00:00:00",
                "categories": { "transfer": ["transfer", "p2p"] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.heuristics, vec![AllocationPolicy::Greedy, AllocationPolicy::WellMixed]);
        assert_eq!(config.resolution_limit, dec!(0.5));
        assert!(config.infer);
        assert_eq!(config.starting_balance, StartingBalanceMode::ReadFromColumn);
        assert_eq!(config.fee_convention, FeeConvention::Split);
        assert!(config.time_begin.is_some());
        assert_eq!(config.categories.lookup("p2p"), Category::Transfer);
        // untouched lists keep their defaults
        assert_eq!(config.categories.lookup("withdrawal"), Category::Withdraw);
        assert_eq!(config.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
    }

    #[test]
    fn test_unknown_heuristic_is_a_json_error() {
        let err = RunConfig::from_json(r#"{ "heuristics": ["fifo"] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_for_heuristic() {
        let config = RunConfig::default().with_infer(true);
        let single = config.for_heuristic(AllocationPolicy::NoTracking);
        assert_eq!(single.heuristics, vec![AllocationPolicy::NoTracking]);
        assert!(single.infer);
    }
}

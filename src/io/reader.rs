//! CSV input.
//!
//! Every row becomes either a [`Transaction`] or an [`Issue`] describing why
//! it was rejected, so one bad row never stops the stream.

use crate::config::{CategoryMap, RunConfig};
use crate::core::account_id::AccountId;
use crate::core::transaction::Transaction;
use crate::error::{FlowError, Issue};
use chrono::NaiveDateTime;
use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Largest magnitude accepted in any amount or balance column. Keeps every
/// running balance of a run far from `Decimal`'s overflow point.
pub const MAX_AMOUNT: Decimal = dec!(1_000_000_000_000_000_000);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("missing value for {0}")]
    MissingField(&'static str),
    #[error("invalid amount in {field}: '{value}'")]
    InvalidAmount { field: &'static str, value: String },
    #[error("negative amount in {field}: {value}")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("amount in {field} exceeds {max}: {value}")]
    AmountOutOfRange {
        field: &'static str,
        value: Decimal,
        max: Decimal,
    },
    #[error("timestamp '{value}' does not match format '{format}'")]
    InvalidTimestamp { value: String, format: String },
    #[error("{0}")]
    Row(String),
}

/// One row of the input ledger, as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    #[serde(rename = "txn_ID")]
    pub txn_id: String,
    #[serde(rename = "src_ID")]
    pub src_id: String,
    #[serde(rename = "tgt_ID")]
    pub tgt_id: String,
    pub timestamp: String,
    pub txn_type: String,
    pub amt: String,
    #[serde(default, alias = "fee")]
    pub rev: Option<String>,
    #[serde(default)]
    pub src_balance: Option<String>,
    #[serde(default)]
    pub tgt_balance: Option<String>,
}

impl InputRecord {
    /// Validate the row and classify it with `categories`.
    pub fn into_transaction(
        self,
        categories: &CategoryMap,
        timestamp_format: &str,
    ) -> Result<Transaction, ParseError> {
        let txn_id = required("txn_ID", &self.txn_id)?;
        let source = required("src_ID", &self.src_id)?;
        let target = required("tgt_ID", &self.tgt_id)?;
        let raw_timestamp = required("timestamp", &self.timestamp)?;
        let timestamp = NaiveDateTime::parse_from_str(raw_timestamp, timestamp_format).map_err(|_| {
            ParseError::InvalidTimestamp {
                value: raw_timestamp.to_string(),
                format: timestamp_format.to_string(),
            }
        })?;

        let amount = amount("amt", required("amt", &self.amt)?)?;
        let fee = optional_amount("rev", self.rev.as_deref())?.unwrap_or(Decimal::ZERO);
        let debit = amount.checked_add(fee).unwrap_or(Decimal::MAX);
        if debit > MAX_AMOUNT {
            return Err(ParseError::AmountOutOfRange {
                field: "amt",
                value: debit,
                max: MAX_AMOUNT,
            });
        }
        let source_balance = optional_balance("src_balance", self.src_balance.as_deref())?;
        let target_balance = optional_balance("tgt_balance", self.tgt_balance.as_deref())?;

        let txn_type = self.txn_type.trim();
        Ok(Transaction::new(
            txn_id,
            AccountId::new(source),
            AccountId::new(target),
            timestamp,
            amount,
            categories.lookup(txn_type),
        )
        .with_type(txn_type)
        .with_fee(fee)
        .with_balances(source_balance, target_balance))
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::MissingField(field));
    }
    Ok(value)
}

fn decimal(field: &'static str, value: &str) -> Result<Decimal, ParseError> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| ParseError::InvalidAmount {
            field,
            value: value.to_string(),
        })
}

fn amount(field: &'static str, value: &str) -> Result<Decimal, ParseError> {
    let parsed = bounded(field, decimal(field, value)?)?;
    if parsed < Decimal::ZERO {
        return Err(ParseError::NegativeAmount { field, value: parsed });
    }
    Ok(parsed)
}

fn optional_amount(field: &'static str, value: Option<&str>) -> Result<Option<Decimal>, ParseError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => amount(field, v).map(Some),
    }
}

fn optional_balance(field: &'static str, value: Option<&str>) -> Result<Option<Decimal>, ParseError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => bounded(field, decimal(field, v)?).map(Some),
    }
}

fn bounded(field: &'static str, value: Decimal) -> Result<Decimal, ParseError> {
    if value.abs() > MAX_AMOUNT {
        return Err(ParseError::AmountOutOfRange {
            field,
            value,
            max: MAX_AMOUNT,
        });
    }
    Ok(value)
}

/// Streams transactions out of a CSV source.
pub struct TransactionReader<R> {
    reader: Reader<R>,
    headers: StringRecord,
    categories: CategoryMap,
    timestamp_format: String,
    exhausted: bool,
}

impl TransactionReader<File> {
    pub fn from_path(path: impl AsRef<Path>, config: &RunConfig) -> Result<Self, FlowError> {
        let file = File::open(path)?;
        Self::from_reader(file, config)
    }
}

impl<R: io::Read> TransactionReader<R> {
    pub fn from_reader(rdr: R, config: &RunConfig) -> Result<Self, FlowError> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(rdr);
        let headers = reader.headers()?.clone();
        Ok(Self {
            reader,
            headers,
            categories: config.categories.clone(),
            timestamp_format: config.timestamp_format.clone(),
            exhausted: false,
        })
    }

    fn parse(&self, record: &StringRecord) -> Result<Transaction, Issue> {
        let position = record.position().map(|p| p.line());
        let raw = record.iter().collect::<Vec<_>>().join(",");
        record
            .deserialize::<InputRecord>(Some(&self.headers))
            .map_err(|err| ParseError::Row(err.to_string()))
            .and_then(|input| input.into_transaction(&self.categories, &self.timestamp_format))
            .map_err(|err| Issue::malformed(position, raw, err.to_string()))
    }
}

impl<R: io::Read> Iterator for TransactionReader<R> {
    type Item = Result<Transaction, Issue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let mut record = StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(true) => Some(self.parse(&record)),
            Ok(false) => {
                self.exhausted = true;
                None
            }
            Err(err) => {
                if err.is_io_error() {
                    self.exhausted = true;
                }
                let position = err.position().map(|p| p.line());
                Some(Err(Issue::malformed(position, "", err.to_string())))
            }
        }
    }
}

//! CSV output: one row per flow, and a separate issues log.

use crate::core::flow::Flow;
use crate::error::{FlowError, Issue};
use csv::Writer;
use std::fs::File;
use std::io;
use std::path::Path;

/// Writes flows as CSV rows in the order they are handed in.
pub struct FlowWriter<W: io::Write> {
    writer: Writer<W>,
    timestamp_format: String,
    written: u64,
}

impl FlowWriter<File> {
    pub fn from_path(path: impl AsRef<Path>, timestamp_format: &str) -> Result<Self, FlowError> {
        Ok(Self::from_writer(File::create(path)?, timestamp_format))
    }
}

impl<W: io::Write> FlowWriter<W> {
    pub fn from_writer(wtr: W, timestamp_format: &str) -> Self {
        Self {
            writer: Writer::from_writer(wtr),
            timestamp_format: timestamp_format.to_string(),
            written: 0,
        }
    }

    pub fn write(&mut self, flow: &Flow) -> Result<(), FlowError> {
        self.writer.serialize(flow.to_record(&self.timestamp_format)?)?;
        self.written += 1;
        Ok(())
    }

    /// Number of rows written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), FlowError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, FlowError> {
        self.writer
            .into_inner()
            .map_err(|err| FlowError::Io(err.into_error()))
    }
}

/// Write a run's issues log.
pub fn write_issues<W: io::Write>(wtr: W, issues: &[Issue]) -> Result<(), FlowError> {
    let mut writer = Writer::from_writer(wtr);
    for issue in issues {
        writer.serialize(issue)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account_id::AccountId;
    use crate::core::claim::ClaimArena;
    use crate::core::flow::{FlowTag, Terminus};
    use crate::core::transaction::{Category, FeeConvention, Transaction};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        let mut arena = ClaimArena::new(FeeConvention::SenderPays);
        let wd = arena.record(Transaction::new(
            "W1",
            AccountId::new("A"),
            AccountId::new("bank"),
            at,
            dec!(12.5),
            Category::Withdraw,
        ));
        let root = arena.root(wd);
        let flow = arena.follow_back(root, dec!(12.5), Terminus::Exit(FlowTag::Withdraw));

        let mut writer = FlowWriter::from_writer(Vec::new(), "%Y-%m-%d %H:%M:%S");
        writer.write(&flow).unwrap();
        assert_eq!(writer.written(), 1);

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "flow_timestamp,flow_amt,flow_frac_root,flow_length,flow_length_wrev,flow_duration,\
             flow_acct_IDs,flow_txn_IDs,flow_txn_types,flow_durations,flow_rev_fracs,flow_categs"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2024-03-01 08:00:00,12.5,1.0,0,0.0,0.0,"));
        assert!(row.contains(r#""[""untracked"",""withdraw""]""#));
    }

    #[test]
    fn test_issues_log() {
        let issues = vec![Issue::malformed(Some(3), "X1,,", "missing value for src_ID")];
        let mut out = Vec::new();
        write_issues(&mut out, &issues).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("kind,position,raw,message\n"));
        assert!(text.contains("malformed,3,\"X1,,\",missing value for src_ID"));
    }
}

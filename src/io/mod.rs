pub mod reader;
pub mod writer;

pub use reader::{InputRecord, ParseError, TransactionReader};
pub use writer::{write_issues, FlowWriter};

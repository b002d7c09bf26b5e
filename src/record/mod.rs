//! Record shapes flowing through the pipeline.
//!
//! A [`RawRecord`] is one tokenized data line. [`transform::classify`] turns
//! it into a [`Classification`], and only [`FilteredRecord`]s reach storage.

mod amount;
pub mod transform;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ValidationError;

pub use amount::Amount;
pub use transform::{QUALIFYING_DROP_PERCENT, classify, drop_percentage};

/// Column names of the balance extract, in file order.
pub const DI319_COLUMNS: [&str; 12] = [
    "periode",
    "main_branch",
    "branch",
    "cif",
    "norek",
    "type",
    "nama",
    "pn_pengelola",
    "balance",
    "aval_balance",
    "avg_balance",
    "open_date",
];

/// Column positions within a [`RawRecord`].
pub(crate) mod col {
    pub const PERIODE: usize = 0;
    pub const MAIN_BRANCH: usize = 1;
    pub const BRANCH: usize = 2;
    pub const CIF: usize = 3;
    pub const NOREK: usize = 4;
    pub const TYPE: usize = 5;
    pub const NAMA: usize = 6;
    pub const PN_PENGELOLA: usize = 7;
    pub const BALANCE: usize = 8;
    pub const AVAL_BALANCE: usize = 9;
    pub const AVG_BALANCE: usize = 10;
    pub const OPEN_DATE: usize = 11;
}

/// One tokenized data line, fields untrimmed and in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based data line number (header excluded).
    pub line: u64,
    pub fields: Vec<String>,
}

impl RawRecord {
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    /// Field at `index`, trimmed. Missing trailing fields read as empty.
    pub(crate) fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(|f| f.trim()).unwrap_or("")
    }
}

/// A typed record whose balance dropped at least [`QUALIFYING_DROP_PERCENT`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredRecord {
    pub line: u64,
    pub periode: NaiveDate,
    pub main_branch: String,
    pub branch: String,
    pub cif: String,
    pub norek: String,
    #[serde(rename = "type")]
    pub account_type: String,
    pub nama: String,
    pub pn_pengelola: String,
    pub balance: Amount,
    pub aval_balance: String,
    pub avg_balance: Amount,
    pub open_date: NaiveDate,
    pub drop_percentage: f64,
}

/// Outcome of validating and filtering one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Qualifies(Box<FilteredRecord>),
    DoesNotQualify,
    Invalid(ValidationError),
}

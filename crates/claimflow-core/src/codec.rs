//! Delimited Record Codec
//!
//! Converts between comma-delimited claim rows and typed [`ClaimRecord`]s.
//!
//! ## Format
//!
//! ```text
//! PolicyNumber,PetId,ClaimId,CustomerName,ClaimAmount,DateOfLoss,ClaimDate,Status,Description
//! POL-1,6f1c...,C1,Jane Doe,125.50,2024-01-02,2024-01-05,Submitted,"Vet visit, x-ray"
//! ```
//!
//! - First row is the header; columns are matched by name (case-insensitive),
//!   so column order in the source does not matter
//! - Fields containing a comma, quote or line break are double-quoted and
//!   embedded quotes are doubled (RFC 4180)
//! - `TermNumber`, `ApprovedAmount` and `Veterinarian` are optional columns
//!
//! ## Splitting
//!
//! [`RecordSplitter`] turns a byte stream into complete records. It tracks
//! quote state across input chunks, so a quoted line break never ends a
//! record and records can straddle network reads.

use crate::error::{Error, Result};
use crate::record::{
    format_amount_cents, format_timestamp, parse_amount_cents, parse_timestamp, ClaimRecord,
    EntityId,
};
use std::borrow::Cow;

/// Column names in the order the codec writes them.
pub const CANONICAL_COLUMNS: [&str; 12] = [
    "PolicyNumber",
    "PetId",
    "ClaimId",
    "CustomerName",
    "ClaimAmount",
    "DateOfLoss",
    "ClaimDate",
    "Status",
    "Description",
    "TermNumber",
    "ApprovedAmount",
    "Veterinarian",
];

/// Positions of known columns within a source header.
#[derive(Debug, Clone, Default)]
struct ColumnIndex {
    policy_number: usize,
    pet_id: usize,
    claim_id: usize,
    customer_name: usize,
    claim_amount: usize,
    date_of_loss: usize,
    claim_date: usize,
    status: usize,
    description: usize,
    term_number: Option<usize>,
    approved_amount: Option<usize>,
    veterinarian: Option<usize>,
}

/// Parsed header row of a claims file.
///
/// The header is read once per source and reused to decode every row
/// (and re-emitted verbatim at the top of every chunk).
#[derive(Debug, Clone)]
pub struct Header {
    columns: Vec<String>,
    index: ColumnIndex,
}

impl Header {
    /// Parse and validate a header line.
    ///
    /// # Errors
    ///
    /// - `EmptySource`: The line is blank
    /// - `MissingColumn`: A required column is absent
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_start_matches('\u{feff}');
        if line.trim().is_empty() {
            return Err(Error::EmptySource);
        }

        let columns: Vec<String> = split_fields(line)?
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let find = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));
        let require = |name: &'static str| find(name).ok_or(Error::MissingColumn(name));

        let index = ColumnIndex {
            policy_number: require("PolicyNumber")?,
            pet_id: require("PetId")?,
            claim_id: require("ClaimId")?,
            customer_name: require("CustomerName")?,
            claim_amount: require("ClaimAmount")?,
            date_of_loss: require("DateOfLoss")?,
            claim_date: require("ClaimDate")?,
            status: require("Status")?,
            description: require("Description")?,
            term_number: find("TermNumber"),
            approved_amount: find("ApprovedAmount"),
            veterinarian: find("Veterinarian"),
        };

        Ok(Self { columns, index })
    }

    /// Header with every canonical column, in canonical order.
    pub fn canonical() -> Self {
        let line = CANONICAL_COLUMNS.join(",");
        // Canonical columns always satisfy the required set
        match Self::parse(&line) {
            Ok(header) => header,
            Err(_) => unreachable!("canonical header is valid"),
        }
    }

    /// Number of columns in the header.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The header re-encoded as a delimited line (no terminator).
    pub fn to_line(&self) -> String {
        join_fields(self.columns.iter())
    }

    /// Decode one data row against this header.
    ///
    /// # Errors
    ///
    /// Row-level errors only (`FieldCount`, `InvalidField`, `UnterminatedQuote`);
    /// callers skip the row and count it as failed.
    pub fn decode(&self, row: &str) -> Result<ClaimRecord> {
        let fields = split_fields(row)?;
        if fields.len() != self.columns.len() {
            return Err(Error::FieldCount {
                expected: self.columns.len(),
                found: fields.len(),
            });
        }

        let ix = &self.index;
        let text = |i: usize| fields[i].trim().to_string();
        let optional = |i: Option<usize>| {
            i.map(|i| fields[i].trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let pet_id: EntityId = fields[ix.pet_id]
            .parse()
            .map_err(|_| Error::InvalidField {
                column: "PetId",
                value: fields[ix.pet_id].clone(),
            })?;

        let claim_id = text(ix.claim_id);
        if claim_id.is_empty() {
            return Err(Error::InvalidField {
                column: "ClaimId",
                value: claim_id,
            });
        }

        let term_number = match optional(ix.term_number) {
            Some(raw) => Some(raw.parse::<i32>().map_err(|_| Error::InvalidField {
                column: "TermNumber",
                value: raw.clone(),
            })?),
            None => None,
        };
        let approved_amount_cents = match optional(ix.approved_amount) {
            Some(raw) => Some(parse_amount_cents("ApprovedAmount", &raw)?),
            None => None,
        };

        Ok(ClaimRecord {
            policy_number: text(ix.policy_number),
            pet_id,
            claim_id,
            customer_name: text(ix.customer_name),
            claim_amount_cents: parse_amount_cents("ClaimAmount", &fields[ix.claim_amount])?,
            date_of_loss: parse_timestamp("DateOfLoss", &fields[ix.date_of_loss])?,
            claim_date: parse_timestamp("ClaimDate", &fields[ix.claim_date])?,
            status: text(ix.status),
            description: fields[ix.description].clone(),
            term_number,
            approved_amount_cents,
            veterinarian: optional(ix.veterinarian),
        })
    }
}

/// Encode a record as a delimited row in [`CANONICAL_COLUMNS`] order.
pub fn encode_record(record: &ClaimRecord) -> String {
    let fields = [
        record.policy_number.clone(),
        record.pet_id.to_string(),
        record.claim_id.clone(),
        record.customer_name.clone(),
        format_amount_cents(record.claim_amount_cents),
        format_timestamp(&record.date_of_loss),
        format_timestamp(&record.claim_date),
        record.status.clone(),
        record.description.clone(),
        record.term_number.map(|t| t.to_string()).unwrap_or_default(),
        record
            .approved_amount_cents
            .map(format_amount_cents)
            .unwrap_or_default(),
        record.veterinarian.clone().unwrap_or_default(),
    ];
    join_fields(fields.iter())
}

/// Split one record into its fields, removing quoting.
pub fn split_fields(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::UnterminatedQuote);
    }
    fields.push(field);
    Ok(fields)
}

/// Quote a field if it contains a delimiter, quote or line break.
pub fn escape_field(s: &str) -> Cow<'_, str> {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(s)
    }
}

/// Join fields into one delimited record.
pub fn join_fields<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_field(field.as_ref()));
    }
    line
}

/// A record cut from a byte stream by [`RecordSplitter`].
///
/// Rows that are not valid UTF-8 keep their original bytes so they can be
/// stored unchanged and reported as malformed when decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    Text(String),
    Invalid(Vec<u8>),
}

impl RawRecord {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => RawRecord::Text(text),
            Err(e) => RawRecord::Invalid(e.into_bytes()),
        }
    }

    /// The record as text, or `InvalidEncoding` for non-UTF-8 bytes.
    pub fn as_text(&self) -> Result<&str> {
        match self {
            RawRecord::Text(text) => Ok(text),
            RawRecord::Invalid(bytes) => Err(Error::InvalidEncoding {
                offset: std::str::from_utf8(bytes)
                    .err()
                    .map_or(0, |e| e.valid_up_to()),
            }),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            RawRecord::Text(text) => Ok(text),
            invalid => invalid.as_text().map(str::to_owned),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawRecord::Text(text) => text.as_bytes(),
            RawRecord::Invalid(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for RawRecord {
    fn from(text: String) -> Self {
        RawRecord::Text(text)
    }
}

impl From<&str> for RawRecord {
    fn from(text: &str) -> Self {
        RawRecord::Text(text.to_string())
    }
}

impl PartialEq<&str> for RawRecord {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, RawRecord::Text(text) if text == other)
    }
}

/// Incremental, quote-aware splitter from bytes to complete records.
///
/// # Examples
///
/// ```ignore
/// let mut splitter = RecordSplitter::new();
/// let mut records = Vec::new();
/// splitter.push(b"a,\"b\nc\"\nd,e", &mut records);
/// assert_eq!(records, vec!["a,\"b\nc\""]);
/// assert_eq!(splitter.finish(), Some(RawRecord::from("d,e")));
/// ```
#[derive(Debug, Default)]
pub struct RecordSplitter {
    buf: Vec<u8>,
    in_quotes: bool,
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, appending every completed record to `out`.
    ///
    /// Blank lines are dropped and a trailing `\r` is stripped.
    pub fn push(&mut self, data: &[u8], out: &mut Vec<RawRecord>) {
        for &b in data {
            match b {
                b'"' => {
                    self.in_quotes = !self.in_quotes;
                    self.buf.push(b);
                }
                b'\n' if !self.in_quotes => self.emit(out),
                _ => self.buf.push(b),
            }
        }
    }

    /// Flush the trailing record (input without a final newline).
    ///
    /// An unterminated quoted field is returned as-is; decoding it reports
    /// `UnterminatedQuote` for that row only.
    pub fn finish(mut self) -> Option<RawRecord> {
        let mut out = Vec::with_capacity(1);
        self.emit(&mut out);
        out.pop()
    }

    fn emit(&mut self, out: &mut Vec<RawRecord>) {
        let mut bytes = std::mem::take(&mut self.buf);
        self.in_quotes = false;
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }
        out.push(RawRecord::from_bytes(bytes));
    }
}

//! Best-effort parsing of payment details out of OCR text.
//!
//! Screenshots from UPI apps don't share a layout, so every field is a
//! heuristic. Admins review (and can override) whatever comes out of here
//! before a payment is approved.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Labelled transaction reference, e.g. "UPI Ref: 412345678901" or "UTR No. ABC123456789".
///
/// Candidates must also contain a digit, checked in `find_transaction_id`.
/// An all-letter token after a label is a word, so "UTR: ABCDEFGHIJKL" yields nothing.
static LABELLED_TXN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:upi|txn|utr|ref|transaction|id|no)\b(?:\s*(?:ref|id|no|transaction)\b)?[\s:.#-]*([A-Za-z0-9]{12,})",
    )
    .expect("labelled transaction pattern")
});

/// Bare 12-digit run, the shape of a UPI RRN.
static BARE_TXN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{12})\b").expect("bare transaction pattern"));

static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:amount|total|paid|inr|rs)\b\.?|₹)[\s:]*(?:(?:rs\.?|inr|₹)\s*)?(\d[\d,]*(?:\.\d+)?)",
    )
    .expect("amount pattern")
});

static UPI_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z0-9._-]{2,}@[A-Za-z][A-Za-z0-9]+)").expect("upi id pattern")
});

/// Fields pulled out of a payment screenshot. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    pub upi_id: Option<String>,
    pub raw_text: String,
}

impl ExtractedFields {
    /// True when nothing useful was recognised.
    pub fn is_empty(&self) -> bool {
        self.transaction_id.is_none() && self.amount.is_none() && self.upi_id.is_none()
    }
}

/// Parse OCR output into candidate transaction id, amount and payer UPI id.
pub fn extract_fields(text: &str) -> ExtractedFields {
    ExtractedFields {
        transaction_id: find_transaction_id(text),
        amount: find_amount(text),
        upi_id: find_upi_id(text),
        raw_text: text.to_string(),
    }
}

fn find_transaction_id(text: &str) -> Option<String> {
    // A pure-letter token after a label is a word ("successfully"), not a reference
    let labelled = LABELLED_TXN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()));

    labelled
        .or_else(|| BARE_TXN.captures(text).and_then(|caps| caps.get(1)).map(|m| m.as_str()))
        .map(|s| s.to_string())
}

fn find_amount(text: &str) -> Option<f64> {
    AMOUNT
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| parse_amount(m.as_str()))
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn find_upi_id(text: &str) -> Option<String> {
    UPI_ID
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find(|m| !continues_as_domain(&text[m.end()..]))
        .map(|m| m.as_str().to_string())
}

/// An email address keeps going after the handle ("@example.com"); a UPI id does not.
fn continues_as_domain(rest: &str) -> bool {
    let mut chars = rest.chars();
    chars.next() == Some('.') && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
}

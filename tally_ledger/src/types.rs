//! Wire types for the ledger's JSON API.
//!
//! All money amounts are integer minor units (cents); money spent is
//! negative, money received positive.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Money account ("Checking", "Cash").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub balance_minor: i64,
    #[serde(default)]
    pub closed: bool,
}

/// Spending category within the budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// A transaction already recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub payee: Option<String>,
    pub amount_minor: i64,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A transaction about to be posted. A missing account means the
/// budget's default account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub date: NaiveDate,
    pub payee: String,
    pub amount_minor: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Render minor units as a decimal amount: `-1299` becomes `-12.99`.
#[must_use]
pub fn format_minor(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_render_with_two_decimals() {
        assert_eq!(format_minor(-1299), "-12.99");
        assert_eq!(format_minor(500), "5.00");
        assert_eq!(format_minor(-5), "-0.05");
        assert_eq!(format_minor(0), "0.00");
    }

    #[test]
    fn new_transaction_omits_absent_fields() {
        let new = NewTransaction {
            account_id: None,
            date: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
            payee: "Cafe".to_string(),
            amount_minor: -450,
            category_id: None,
            note: None,
        };
        let json = serde_json::to_value(&new).expect("serializes");
        assert_eq!(json["payee"], "Cafe");
        assert_eq!(json["amount_minor"], -450);
        assert!(json.get("account_id").is_none());
        assert!(json.get("category_id").is_none());
    }

    #[test]
    fn transaction_tolerates_missing_optionals() {
        let raw = r#"{"id": "t1", "date": "2025-03-01", "amount_minor": -450}"#;
        let parsed: Transaction = serde_json::from_str(raw).expect("parses");
        assert_eq!(parsed.payee, None);
        assert_eq!(parsed.category_id, None);
    }
}

//! Row-level validation of voucher uploads.
//!
//! Every row is checked against the user and task snapshots in a fixed order
//! and the first failing rule decides the row's single error. Validation
//! never touches the code sequence; codes are allocated afterwards for the
//! rows that pass.

use crate::vouchers::directory::{TaskDirectory, UserDirectory};
use crate::vouchers::sheet::SheetRow;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("Invalid muid: {0}")]
    UnknownMuid(String),
    #[error("Invalid task hashtag: {0}")]
    UnknownHashtag(String),
    #[error("Karma cannot be 0")]
    ZeroKarma,
    #[error("Month and week cannot be empty")]
    MissingPeriod,
}

/// A row that resolved against the lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRow {
    pub line: u64,
    pub muid: String,
    pub hashtag: String,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub full_name: String,
    pub email: String,
    /// Karma cell as uploaded; typed by the batch check.
    pub karma: String,
    pub month: String,
    pub week: String,
}

/// The original row plus the reason it was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    #[serde(flatten)]
    pub row: SheetRow,
    pub error: String,
}

impl RejectedRow {
    /// An uploaded `error` column is replaced by the rejection reason.
    pub fn new(mut row: SheetRow, error: RowError) -> Self {
        row.fields.remove("error");
        Self {
            row,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportRow {
    Pending(SheetRow),
    Valid(ValidatedRow),
    Invalid(RejectedRow),
}

impl ImportRow {
    /// Resolve a pending row. Rows that are already classified are returned as-is.
    pub fn validate(self, users: &UserDirectory, tasks: &TaskDirectory) -> ImportRow {
        match self {
            ImportRow::Pending(row) => match classify(row, users, tasks) {
                Ok(valid) => ImportRow::Valid(valid),
                Err(rejected) => ImportRow::Invalid(rejected),
            },
            classified => classified,
        }
    }
}

fn classify(
    row: SheetRow,
    users: &UserDirectory,
    tasks: &TaskDirectory,
) -> Result<ValidatedRow, RejectedRow> {
    check_row(&row, users, tasks).map_err(|error| RejectedRow::new(row, error))
}

fn check_row(
    row: &SheetRow,
    users: &UserDirectory,
    tasks: &TaskDirectory,
) -> Result<ValidatedRow, RowError> {
    let muid = row.get("muid").unwrap_or_default();
    let user = users
        .get(muid)
        .ok_or_else(|| RowError::UnknownMuid(muid.to_string()))?;

    let hashtag = row.get("hashtag").unwrap_or_default();
    let task_id = tasks
        .get(hashtag)
        .ok_or_else(|| RowError::UnknownHashtag(hashtag.to_string()))?;

    let karma = row.get("karma").unwrap_or_default();
    if is_zero(karma) {
        return Err(RowError::ZeroKarma);
    }

    let (Some(month), Some(week)) = (row.get("month"), row.get("week")) else {
        return Err(RowError::MissingPeriod);
    };

    Ok(ValidatedRow {
        line: row.line,
        muid: muid.to_string(),
        hashtag: hashtag.to_string(),
        user_id: user.id,
        task_id,
        full_name: user.full_name(),
        email: user.email.clone(),
        karma: karma.to_string(),
        month: month.to_string(),
        week: week.to_string(),
    })
}

fn is_zero(karma: &str) -> bool {
    karma.parse::<f64>().map(|value| value == 0.0).unwrap_or(false)
}

/// Rows split by outcome, each side in upload order.
#[derive(Debug, Default)]
pub struct RowPartition {
    pub valid: Vec<ValidatedRow>,
    pub rejected: Vec<RejectedRow>,
}

pub fn validate_rows(
    rows: Vec<SheetRow>,
    users: &UserDirectory,
    tasks: &TaskDirectory,
) -> RowPartition {
    let mut partition = RowPartition::default();
    for row in rows {
        let mut row = ImportRow::Pending(row);
        loop {
            match row {
                ImportRow::Pending(_) => row = row.validate(users, tasks),
                ImportRow::Valid(valid) => {
                    partition.valid.push(valid);
                    break;
                }
                ImportRow::Invalid(rejected) => {
                    partition.rejected.push(rejected);
                    break;
                }
            }
        }
    }
    partition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vouchers::directory::{TaskLookup, UserLookup};
    use std::collections::BTreeMap;

    fn lookups() -> (UserDirectory, TaskDirectory) {
        let users = UserDirectory::new(vec![UserLookup {
            id: Uuid::from_u128(1),
            muid: "a@x".into(),
            email: "a@example.com".into(),
            first_name: "Asha".into(),
            last_name: Some("Nair".into()),
        }]);
        let tasks = TaskDirectory::new(vec![TaskLookup {
            id: Uuid::from_u128(2),
            hashtag: "#t1".into(),
        }]);
        (users, tasks)
    }

    fn row(cells: &[(&str, &str)]) -> SheetRow {
        let fields: BTreeMap<String, String> = cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SheetRow::new(2, fields)
    }

    fn single_error(cells: &[(&str, &str)]) -> String {
        let (users, tasks) = lookups();
        match ImportRow::Pending(row(cells)).validate(&users, &tasks) {
            ImportRow::Invalid(rejected) => rejected.error,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn valid_row_is_enriched() {
        let (users, tasks) = lookups();
        let cells = [
            ("muid", "a@x"),
            ("karma", "10"),
            ("hashtag", "#t1"),
            ("month", "1"),
            ("week", "2"),
        ];
        let ImportRow::Valid(valid) = ImportRow::Pending(row(&cells)).validate(&users, &tasks)
        else {
            panic!("row should validate");
        };
        assert_eq!(valid.user_id, Uuid::from_u128(1));
        assert_eq!(valid.task_id, Uuid::from_u128(2));
        assert_eq!(valid.full_name, "Asha Nair");
        assert_eq!(valid.email, "a@example.com");
        assert_eq!(valid.karma, "10");
        assert_eq!((valid.month.as_str(), valid.week.as_str()), ("1", "2"));
    }

    #[test]
    fn unknown_muid_wins_over_every_other_failure() {
        let error = single_error(&[
            ("muid", "ghost@x"),
            ("karma", "0"),
            ("hashtag", "#nope"),
            ("month", ""),
            ("week", ""),
        ]);
        assert_eq!(error, "Invalid muid: ghost@x");
    }

    #[test]
    fn unknown_hashtag_reported_before_karma_and_period() {
        let error = single_error(&[
            ("muid", "a@x"),
            ("karma", "0"),
            ("hashtag", "#nope"),
            ("month", ""),
            ("week", "1"),
        ]);
        assert_eq!(error, "Invalid task hashtag: #nope");
    }

    #[test]
    fn zero_karma_reported_before_missing_period() {
        for zero in ["0", "0.0", "-0"] {
            let error = single_error(&[
                ("muid", "a@x"),
                ("karma", zero),
                ("hashtag", "#t1"),
                ("month", ""),
                ("week", ""),
            ]);
            assert_eq!(error, "Karma cannot be 0");
        }
    }

    #[test]
    fn missing_month_or_week_rejected() {
        let error = single_error(&[
            ("muid", "a@x"),
            ("karma", "5"),
            ("hashtag", "#t1"),
            ("month", "3"),
            ("week", " "),
        ]);
        assert_eq!(error, "Month and week cannot be empty");
    }

    #[test]
    fn rejected_row_keeps_original_cells() {
        let (users, tasks) = lookups();
        let partition = validate_rows(
            vec![row(&[("muid", "ghost@x"), ("karma", "4"), ("extra", "kept")])],
            &users,
            &tasks,
        );
        assert!(partition.valid.is_empty());
        let json = serde_json::to_value(&partition.rejected[0]).unwrap();
        assert_eq!(json["muid"], "ghost@x");
        assert_eq!(json["extra"], "kept");
        assert_eq!(json["error"], "Invalid muid: ghost@x");
    }

    #[test]
    fn uploaded_error_column_is_replaced_by_the_rejection() {
        let (users, tasks) = lookups();
        let partition = validate_rows(
            vec![row(&[("error", "stale note"), ("muid", "ghost@x")])],
            &users,
            &tasks,
        );
        let json = serde_json::to_string(&partition.rejected[0]).unwrap();
        assert_eq!(json.matches("\"error\"").count(), 1);
        assert_eq!(json, r#"{"muid":"ghost@x","error":"Invalid muid: ghost@x"}"#);
    }

    #[test]
    fn partition_keeps_upload_order_on_both_sides() {
        let (users, tasks) = lookups();
        let good = |line| {
            let mut valid = row(&[
                ("muid", "a@x"),
                ("karma", "3"),
                ("hashtag", "#t1"),
                ("month", "1"),
                ("week", "1"),
            ]);
            valid.line = line;
            valid
        };
        let partition = validate_rows(
            vec![
                good(2),
                row(&[("muid", "ghost@x")]),
                good(4),
                row(&[("muid", "a@x"), ("hashtag", "#nope")]),
            ],
            &users,
            &tasks,
        );
        let lines: Vec<u64> = partition.valid.iter().map(|valid| valid.line).collect();
        assert_eq!(lines, vec![2, 4]);
        let errors: Vec<&str> = partition
            .rejected
            .iter()
            .map(|rejected| rejected.error.as_str())
            .collect();
        assert_eq!(errors, vec!["Invalid muid: ghost@x", "Invalid task hashtag: #nope"]);
    }

    #[test]
    fn non_numeric_karma_is_left_for_the_batch_check() {
        let (users, tasks) = lookups();
        let partition = validate_rows(
            vec![row(&[
                ("muid", "a@x"),
                ("karma", "ten"),
                ("hashtag", "#t1"),
                ("month", "1"),
                ("week", "1"),
            ])],
            &users,
            &tasks,
        );
        assert_eq!(partition.valid.len(), 1);
        assert_eq!(partition.valid[0].karma, "ten");
    }
}

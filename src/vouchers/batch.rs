//! Voucher drafts and the batch-wide field check that runs before insert.

use crate::vouchers::code::CodeAllocator;
use crate::vouchers::validate::ValidatedRow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MONTH_MAX_CHARS: usize = 10;
pub const WEEK_MAX_CHARS: usize = 2;

/// A validated row with its generated identity and audit fields.
#[derive(Debug, Clone, PartialEq)]
pub struct VoucherDraft {
    pub line: u64,
    pub id: Uuid,
    pub code: String,
    pub muid: String,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub karma: String,
    pub month: String,
    pub week: String,
    pub claimed: bool,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A draft whose fields passed the batch check and can be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVoucher {
    pub id: Uuid,
    pub code: String,
    pub muid: String,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub karma: i32,
    pub month: String,
    pub week: String,
    pub claimed: bool,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Allocate one code per validated row, in upload order.
pub fn draft_vouchers(
    rows: Vec<ValidatedRow>,
    allocator: &mut CodeAllocator,
    actor: Uuid,
    now: DateTime<Utc>,
) -> Vec<VoucherDraft> {
    rows.into_iter()
        .map(|row| VoucherDraft {
            line: row.line,
            id: Uuid::new_v4(),
            code: allocator.next_code(),
            muid: row.muid,
            user_id: row.user_id,
            task_id: row.task_id,
            karma: row.karma,
            month: row.month,
            week: row.week,
            claimed: false,
            created_by: actor,
            updated_by: actor,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

/// Field errors for one draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftErrors {
    pub line: u64,
    pub muid: String,
    pub code: String,
    pub errors: BTreeMap<String, Vec<String>>,
}

/// Every draft that failed the batch check. Any entry blocks the whole insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchValidationErrors {
    pub batch_errors: Vec<DraftErrors>,
}

/// Whole-number karma that fits the column: `"10"` and `"10.0"` both read as 10.
pub fn parse_karma(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<i32>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite()
        && value.fract() == 0.0
        && value >= f64::from(i32::MIN)
        && value <= f64::from(i32::MAX)
    {
        Some(value as i32)
    } else {
        None
    }
}

fn max_length_error(limit: usize) -> String {
    format!("Ensure this field has no more than {limit} characters.")
}

fn draft_errors(draft: &VoucherDraft) -> BTreeMap<String, Vec<String>> {
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if parse_karma(&draft.karma).is_none() {
        errors
            .entry("karma".into())
            .or_default()
            .push("A valid integer is required.".into());
    }
    if draft.month.chars().count() > MONTH_MAX_CHARS {
        errors
            .entry("month".into())
            .or_default()
            .push(max_length_error(MONTH_MAX_CHARS));
    }
    if draft.week.chars().count() > WEEK_MAX_CHARS {
        errors
            .entry("week".into())
            .or_default()
            .push(max_length_error(WEEK_MAX_CHARS));
    }
    errors
}

/// Type every draft, or report all field errors without converting any.
pub fn check_batch(drafts: Vec<VoucherDraft>) -> Result<Vec<NewVoucher>, BatchValidationErrors> {
    let failures: Vec<DraftErrors> = drafts
        .iter()
        .filter_map(|draft| {
            let errors = draft_errors(draft);
            (!errors.is_empty()).then(|| DraftErrors {
                line: draft.line,
                muid: draft.muid.clone(),
                code: draft.code.clone(),
                errors,
            })
        })
        .collect();

    if !failures.is_empty() {
        return Err(BatchValidationErrors {
            batch_errors: failures,
        });
    }

    Ok(drafts
        .into_iter()
        .filter_map(|draft| {
            let karma = parse_karma(&draft.karma)?;
            Some(NewVoucher {
                id: draft.id,
                code: draft.code,
                muid: draft.muid,
                user_id: draft.user_id,
                task_id: draft.task_id,
                karma,
                month: draft.month,
                week: draft.week,
                claimed: draft.claimed,
                created_by: draft.created_by,
                updated_by: draft.updated_by,
                created_at: draft.created_at,
                updated_at: draft.updated_at,
            })
        })
        .collect())
}

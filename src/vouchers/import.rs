//! Bulk voucher import.
//!
//! One request runs the whole pipeline in order:
//! `ReceiveFile → ParseRows → ValidateHeaders → BulkFetchLookups → ValidateRows
//! → GenerateCodes → PersistBatch → DispatchNotifications → BuildReport`.
//! Requests rejected before `PersistBatch` leave no trace; a failed
//! `PersistBatch` leaves nothing committed.

use crate::vouchers::batch::{BatchValidationErrors, check_batch, draft_vouchers};
use crate::vouchers::code::CodeAllocator;
use crate::vouchers::directory::{TaskDirectory, UserDirectory};
use crate::vouchers::notify::{DispatchFailure, NotificationDispatcher, NotifyError};
use crate::vouchers::sheet::{REQUIRED_COLUMNS, SheetError, SheetRow, read_sheet};
use crate::vouchers::store::{PersistError, PersistedVoucher, VoucherStore};
use crate::vouchers::validate::{RejectedRow, validate_rows};
use chrono::Utc;
use log::{debug, info, warn};
use rocket_db_pools::sqlx;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    ReceiveFile,
    ParseRows,
    ValidateHeaders,
    BulkFetchLookups,
    ValidateRows,
    GenerateCodes,
    PersistBatch,
    DispatchNotifications,
    BuildReport,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::ReceiveFile => "receive_file",
            ImportStage::ParseRows => "parse_rows",
            ImportStage::ValidateHeaders => "validate_headers",
            ImportStage::BulkFetchLookups => "bulk_fetch_lookups",
            ImportStage::ValidateRows => "validate_rows",
            ImportStage::GenerateCodes => "generate_codes",
            ImportStage::PersistBatch => "persist_batch",
            ImportStage::DispatchNotifications => "dispatch_notifications",
            ImportStage::BuildReport => "build_report",
        };
        f.write_str(name)
    }
}

/// Per-voucher summary returned for committed rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SuccessRow {
    pub muid: String,
    pub code: String,
    /// Owner's full name.
    pub user: String,
    /// Task hashtag.
    pub task: String,
    pub karma: i32,
    pub month: String,
    pub week: String,
}

/// One entry of the `Failed` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FailedEntry {
    Row(RejectedRow),
    Batch(BatchValidationErrors),
    Notification(DispatchFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    #[serde(rename = "Success")]
    pub success: Vec<SuccessRow>,
    #[serde(rename = "Failed")]
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File not found.")]
    MissingFile,
    #[error("Unable to read csv file: {0}")]
    Unreadable(#[from] SheetError),
    #[error("Empty csv file.")]
    EmptyFile,
    #[error("{0} does not exist in the file.")]
    MissingColumn(&'static str),
    /// Typed checks failed for at least one voucher; nothing was written.
    #[error("Invalid voucher data. Nothing was imported.")]
    InvalidBatch { report: ImportReport },
    #[error("Something went wrong. Please try again.")]
    PersistenceAborted(PersistError),
    /// Vouchers are committed but a notification failed under fail-fast.
    #[error("Vouchers were created but sending notifications failed: {0}")]
    Notification(NotifyError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    RowRejected(String),
}

/// A single voucher entered by hand.
#[derive(Debug, Clone)]
pub struct SingleVoucher {
    pub muid: String,
    pub hashtag: String,
    pub karma: String,
    pub month: String,
    pub week: String,
}

pub struct VoucherImporter<'a> {
    store: &'a dyn VoucherStore,
    dispatcher: &'a NotificationDispatcher,
}

fn stage(stage: ImportStage, detail: impl fmt::Display) {
    debug!("voucher import [{stage}]: {detail}");
}

fn distinct(rows: &[SheetRow], column: &str) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(column))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn success_rows(persisted: &[PersistedVoucher], users: &UserDirectory) -> Vec<SuccessRow> {
    persisted
        .iter()
        .map(|voucher| SuccessRow {
            muid: voucher.muid.clone(),
            code: voucher.code.clone(),
            user: users
                .get(&voucher.muid)
                .map(|user| user.full_name())
                .unwrap_or_default(),
            task: voucher.hashtag.clone(),
            karma: voucher.karma,
            month: voucher.month.clone(),
            week: voucher.week.clone(),
        })
        .collect()
}

impl<'a> VoucherImporter<'a> {
    pub fn new(store: &'a dyn VoucherStore, dispatcher: &'a NotificationDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Run a full import of `upload` on behalf of `actor`.
    pub async fn run(&self, upload: Option<&[u8]>, actor: Uuid) -> Result<ImportReport, ImportError> {
        let bytes = upload.ok_or(ImportError::MissingFile)?;
        stage(ImportStage::ReceiveFile, format_args!("{} bytes", bytes.len()));

        let sheet = read_sheet(bytes)?;
        stage(ImportStage::ParseRows, format_args!("{} rows", sheet.rows.len()));
        if sheet.is_empty() {
            return Err(ImportError::EmptyFile);
        }

        if let Some(column) = sheet.missing_column(&REQUIRED_COLUMNS) {
            return Err(ImportError::MissingColumn(column));
        }
        stage(ImportStage::ValidateHeaders, "all required columns present");

        let muids = distinct(&sheet.rows, "muid");
        let hashtags = distinct(&sheet.rows, "hashtag");
        let users = UserDirectory::new(self.store.users_by_muid(&muids).await?);
        let tasks = TaskDirectory::new(self.store.tasks_by_hashtag(&hashtags).await?);
        stage(
            ImportStage::BulkFetchLookups,
            format_args!("{} users, {} tasks", users.len(), tasks.len()),
        );

        let partition = validate_rows(sheet.rows, &users, &tasks);
        stage(
            ImportStage::ValidateRows,
            format_args!(
                "{} valid, {} rejected",
                partition.valid.len(),
                partition.rejected.len()
            ),
        );

        let mut report = ImportReport {
            success: Vec::new(),
            failed: partition
                .rejected
                .into_iter()
                .map(FailedEntry::Row)
                .collect(),
        };

        if partition.valid.is_empty() {
            info!(
                "voucher import: no valid rows, {} rejected",
                report.failed.len()
            );
            stage(ImportStage::BuildReport, "nothing to persist");
            return Ok(report);
        }

        let mut allocator = CodeAllocator::new(self.store.existing_codes().await?);
        let drafts = draft_vouchers(partition.valid, &mut allocator, actor, Utc::now());
        stage(
            ImportStage::GenerateCodes,
            format_args!("{} codes, last ordinal {}", drafts.len(), allocator.ordinal()),
        );

        let batch = match check_batch(drafts) {
            Ok(batch) => batch,
            Err(errors) => {
                warn!(
                    "voucher import: {} vouchers failed typed checks, nothing persisted",
                    errors.batch_errors.len()
                );
                report.failed.push(FailedEntry::Batch(errors));
                return Err(ImportError::InvalidBatch { report });
            }
        };

        let mut persisted = self
            .store
            .insert_verified(&batch)
            .await
            .map_err(ImportError::PersistenceAborted)?;
        stage(
            ImportStage::PersistBatch,
            format_args!("{} vouchers committed", persisted.len()),
        );

        // Read-back order is not guaranteed; report in upload order.
        let position: BTreeMap<&str, usize> = batch
            .iter()
            .enumerate()
            .map(|(index, voucher)| (voucher.code.as_str(), index))
            .collect();
        persisted.sort_by_key(|voucher| {
            position
                .get(voucher.code.as_str())
                .copied()
                .unwrap_or(usize::MAX)
        });

        let outcome = self
            .dispatcher
            .dispatch(&persisted, &users)
            .await
            .map_err(ImportError::Notification)?;
        stage(
            ImportStage::DispatchNotifications,
            format_args!(
                "{} sent, {} failed ({})",
                outcome.sent,
                outcome.failures.len(),
                self.dispatcher.policy()
            ),
        );

        report.success = success_rows(&persisted, &users);
        report
            .failed
            .extend(outcome.failures.into_iter().map(FailedEntry::Notification));
        stage(
            ImportStage::BuildReport,
            format_args!(
                "{} succeeded, {} failed",
                report.success.len(),
                report.failed.len()
            ),
        );
        info!(
            "voucher import finished: {} succeeded, {} failed",
            report.success.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Create one voucher with the same checks and code sequence as an
    /// import. No notification is sent.
    pub async fn create_single(
        &self,
        voucher: SingleVoucher,
        actor: Uuid,
    ) -> Result<SuccessRow, ImportError> {
        let fields = BTreeMap::from([
            ("muid".to_string(), voucher.muid),
            ("hashtag".to_string(), voucher.hashtag),
            ("karma".to_string(), voucher.karma),
            ("month".to_string(), voucher.month),
            ("week".to_string(), voucher.week),
        ]);
        let row = SheetRow::new(1, fields);

        let muids = distinct(std::slice::from_ref(&row), "muid");
        let hashtags = distinct(std::slice::from_ref(&row), "hashtag");
        let users = UserDirectory::new(self.store.users_by_muid(&muids).await?);
        let tasks = TaskDirectory::new(self.store.tasks_by_hashtag(&hashtags).await?);

        let mut partition = validate_rows(vec![row], &users, &tasks);
        if let Some(rejected) = partition.rejected.pop() {
            return Err(ImportError::RowRejected(rejected.error));
        }

        let mut allocator = CodeAllocator::new(self.store.existing_codes().await?);
        let drafts = draft_vouchers(partition.valid, &mut allocator, actor, Utc::now());
        let batch = check_batch(drafts).map_err(|errors| ImportError::InvalidBatch {
            report: ImportReport {
                success: Vec::new(),
                failed: vec![FailedEntry::Batch(errors)],
            },
        })?;

        let persisted = self
            .store
            .insert_verified(&batch)
            .await
            .map_err(ImportError::PersistenceAborted)?;

        success_rows(&persisted, &users)
            .pop()
            .ok_or(ImportError::PersistenceAborted(PersistError::CountMismatch {
                expected: 1,
                found: 0,
            }))
    }
}

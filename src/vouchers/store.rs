//! Voucher persistence.
//!
//! The import pipeline talks to storage only through [`VoucherStore`]. The
//! Postgres implementation inserts a whole batch inside one transaction and
//! reads it back by code before committing; a short read-back or a code
//! collision rolls everything back.

use crate::vouchers::batch::NewVoucher;
use crate::vouchers::directory::{TaskLookup, UserLookup};
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

/// A voucher as read back from storage after insert.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PersistedVoucher {
    pub code: String,
    pub muid: String,
    pub month: String,
    pub week: String,
    pub karma: i32,
    pub hashtag: String,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("expected {expected} vouchers after insert but found {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("voucher code collision: {0}")]
    CodeConflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PersistError {
    fn from_insert(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err
                    .code()
                    .map(|code| code == UNIQUE_VIOLATION)
                    .unwrap_or(false) =>
            {
                PersistError::CodeConflict(db_err.message().to_string())
            }
            _ => PersistError::Database(err),
        }
    }
}

#[rocket::async_trait]
pub trait VoucherStore: Send + Sync {
    /// Users whose muid is in `muids`.
    async fn users_by_muid(&self, muids: &[String]) -> Result<Vec<UserLookup>, sqlx::Error>;

    /// Tasks whose hashtag is in `hashtags`.
    async fn tasks_by_hashtag(&self, hashtags: &[String]) -> Result<Vec<TaskLookup>, sqlx::Error>;

    /// Every voucher code currently stored.
    async fn existing_codes(&self) -> Result<HashSet<String>, sqlx::Error>;

    /// Insert `batch` atomically and return the rows confirmed present.
    ///
    /// Either every voucher is committed or none is.
    async fn insert_verified(
        &self,
        batch: &[NewVoucher],
    ) -> Result<Vec<PersistedVoucher>, PersistError>;
}

/// Columnar copy of a batch for `UNNEST` binding. All vectors share one length.
#[derive(Default)]
struct VoucherColumns {
    ids: Vec<Uuid>,
    codes: Vec<String>,
    user_ids: Vec<Uuid>,
    task_ids: Vec<Uuid>,
    karma: Vec<i32>,
    months: Vec<String>,
    weeks: Vec<String>,
    claimed: Vec<bool>,
    created_by: Vec<Uuid>,
    updated_by: Vec<Uuid>,
    created_at: Vec<DateTime<Utc>>,
    updated_at: Vec<DateTime<Utc>>,
}

impl From<&[NewVoucher]> for VoucherColumns {
    fn from(batch: &[NewVoucher]) -> Self {
        let mut columns = VoucherColumns::default();
        for voucher in batch {
            columns.ids.push(voucher.id);
            columns.codes.push(voucher.code.clone());
            columns.user_ids.push(voucher.user_id);
            columns.task_ids.push(voucher.task_id);
            columns.karma.push(voucher.karma);
            columns.months.push(voucher.month.clone());
            columns.weeks.push(voucher.week.clone());
            columns.claimed.push(voucher.claimed);
            columns.created_by.push(voucher.created_by);
            columns.updated_by.push(voucher.updated_by);
            columns.created_at.push(voucher.created_at);
            columns.updated_at.push(voucher.updated_at);
        }
        columns
    }
}

#[derive(Clone)]
pub struct PgVoucherStore {
    pool: PgPool,
}

impl PgVoucherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl VoucherStore for PgVoucherStore {
    async fn users_by_muid(&self, muids: &[String]) -> Result<Vec<UserLookup>, sqlx::Error> {
        if muids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, UserLookup>(
            "SELECT id, muid, email, first_name, last_name FROM users WHERE muid = ANY($1)",
        )
        .bind(muids)
        .fetch_all(&self.pool)
        .await
    }

    async fn tasks_by_hashtag(&self, hashtags: &[String]) -> Result<Vec<TaskLookup>, sqlx::Error> {
        if hashtags.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, TaskLookup>(
            "SELECT id, hashtag FROM task_list WHERE hashtag = ANY($1)",
        )
        .bind(hashtags)
        .fetch_all(&self.pool)
        .await
    }

    async fn existing_codes(&self) -> Result<HashSet<String>, sqlx::Error> {
        let codes: Vec<String> = sqlx::query_scalar("SELECT code FROM voucher_log")
            .fetch_all(&self.pool)
            .await?;
        Ok(codes.into_iter().collect())
    }

    async fn insert_verified(
        &self,
        batch: &[NewVoucher],
    ) -> Result<Vec<PersistedVoucher>, PersistError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let columns = VoucherColumns::from(batch);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO voucher_log (
                id, code, user_id, task_id, karma, month, week, claimed,
                created_by, updated_by, created_at, updated_at
               )
               SELECT * FROM UNNEST(
                   $1::uuid[],
                   $2::text[],
                   $3::uuid[],
                   $4::uuid[],
                   $5::int[],
                   $6::text[],
                   $7::text[],
                   $8::bool[],
                   $9::uuid[],
                   $10::uuid[],
                   $11::timestamptz[],
                   $12::timestamptz[]
               )"#,
        )
        .bind(&columns.ids)
        .bind(&columns.codes)
        .bind(&columns.user_ids)
        .bind(&columns.task_ids)
        .bind(&columns.karma)
        .bind(&columns.months)
        .bind(&columns.weeks)
        .bind(&columns.claimed)
        .bind(&columns.created_by)
        .bind(&columns.updated_by)
        .bind(&columns.created_at)
        .bind(&columns.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(PersistError::from_insert)?;

        let persisted = sqlx::query_as::<_, PersistedVoucher>(
            r#"SELECT v.code, u.muid, v.month, v.week, v.karma, t.hashtag
               FROM voucher_log v
               JOIN users u ON u.id = v.user_id
               JOIN task_list t ON t.id = v.task_id
               WHERE v.code = ANY($1)"#,
        )
        .bind(&columns.codes)
        .fetch_all(&mut *tx)
        .await?;

        if persisted.len() != batch.len() {
            tx.rollback().await?;
            log::warn!(
                "voucher insert rolled back: expected {} rows, read back {}",
                batch.len(),
                persisted.len()
            );
            return Err(PersistError::CountMismatch {
                expected: batch.len(),
                found: persisted.len(),
            });
        }

        tx.commit().await?;
        log::debug!("committed {} vouchers", persisted.len());
        Ok(persisted)
    }
}

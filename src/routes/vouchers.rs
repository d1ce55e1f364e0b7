//! Karma voucher dashboard endpoints.
//!
//! Every handler requires a voucher manager (`Admins`, `Fellow` or
//! `Associate`). The import and export handlers deal in multipart uploads
//! and CSV downloads, so they are mounted outside the OpenAPI route list.

use crate::auth::RequireVoucherManager;
use crate::error::ApiError;
use crate::models::{
    ApiResponse, CreateVoucherRequest, PaginatedData, Pagination, UpdateVoucherRequest,
    VoucherLogView,
};
use crate::routes::params::VoucherListParams;
use crate::vouchers::batch::{MONTH_MAX_CHARS, WEEK_MAX_CHARS};
use crate::vouchers::export::{EXPORT_FILE_NAME, vouchers_to_csv};
use crate::vouchers::import::{ImportReport, SingleVoucher, SuccessRow};
use crate::vouchers::VoucherServices;
use chrono::Utc;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::tokio::io::AsyncReadExt;
use rocket::{Responder, State};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::openapi;
use uuid::Uuid;

const VOUCHER_SELECT: &str = r#"
    SELECT v.id, v.code,
           concat_ws(' ', u.first_name, u.last_name) AS "user",
           u.muid, t.title AS task, t.hashtag,
           v.karma, v.month, v.week, v.claimed,
           concat_ws(' ', cb.first_name, cb.last_name) AS created_by, v.created_at,
           concat_ws(' ', ub.first_name, ub.last_name) AS updated_by, v.updated_at
    FROM voucher_log v
    JOIN users u ON u.id = v.user_id
    JOIN task_list t ON t.id = v.task_id
    JOIN users cb ON cb.id = v.created_by
    JOIN users ub ON ub.id = v.updated_by"#;

const VOUCHER_COUNT: &str = r#"
    SELECT COUNT(*)
    FROM voucher_log v
    JOIN users u ON u.id = v.user_id
    JOIN task_list t ON t.id = v.task_id
    JOIN users cb ON cb.id = v.created_by
    JOIN users ub ON ub.id = v.updated_by"#;

const VOUCHER_SEARCH: &str = r#"
    WHERE $1::text IS NULL
       OR u.first_name ILIKE '%' || $1 || '%'
       OR u.last_name ILIKE '%' || $1 || '%'
       OR t.title ILIKE '%' || $1 || '%'
       OR v.karma::text ILIKE '%' || $1 || '%'
       OR v.month ILIKE '%' || $1 || '%'
       OR v.week ILIKE '%' || $1 || '%'
       OR v.claimed::text ILIKE '%' || $1 || '%'
       OR ub.first_name ILIKE '%' || $1 || '%'
       OR ub.last_name ILIKE '%' || $1 || '%'
       OR cb.first_name ILIKE '%' || $1 || '%'
       OR cb.last_name ILIKE '%' || $1 || '%'"#;

#[derive(FromForm)]
pub struct VoucherUpload<'r> {
    pub voucher_log: Option<TempFile<'r>>,
}

#[derive(Responder)]
#[response(content_type = "text/csv")]
pub struct CsvDownload {
    body: Vec<u8>,
    disposition: Header<'static>,
}

impl CsvDownload {
    fn attachment(body: Vec<u8>, file_name: &str) -> Self {
        Self {
            body,
            disposition: Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{file_name}\""),
            ),
        }
    }
}

async fn read_upload(file: &TempFile<'_>) -> Result<Vec<u8>, ApiError> {
    let reader = file
        .open()
        .await
        .map_err(|err| ApiError::InternalError(format!("failed to open upload: {err}")))?;
    rocket::tokio::pin!(reader);

    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|err| ApiError::InternalError(format!("failed to read upload: {err}")))?;
    Ok(bytes)
}

/// Import vouchers from a CSV upload in the `voucher_log` multipart field.
#[post("/dashboard/karma-voucher/import", data = "<upload>")]
pub async fn import_vouchers(
    upload: Form<VoucherUpload<'_>>,
    services: &State<VoucherServices>,
    manager: RequireVoucherManager,
) -> Result<Json<ApiResponse<ImportReport>>, ApiError> {
    let bytes = match upload.voucher_log.as_ref() {
        Some(file) => Some(read_upload(file).await?),
        None => None,
    };

    log::info!(
        "voucher import requested by {} ({} bytes)",
        manager.0.muid,
        bytes.as_ref().map(Vec::len).unwrap_or(0)
    );

    let report = services
        .importer()
        .run(bytes.as_deref(), manager.0.id)
        .await?;

    Ok(Json(ApiResponse::success(report)))
}

/// List vouchers with search, sorting and pagination.
#[openapi(tag = "Karma Vouchers")]
#[get("/dashboard/karma-voucher?<params..>")]
pub async fn list_vouchers(
    pool: &State<PgPool>,
    params: Option<VoucherListParams>,
    _manager: RequireVoucherManager,
) -> Result<Json<ApiResponse<PaginatedData<VoucherLogView>>>, ApiError> {
    let params = params.unwrap_or_default();
    let search = params.normalized_search();
    let (sort_field, sort_order) = params.sort();

    let count: i64 = sqlx::query_scalar(&format!("{VOUCHER_COUNT} {VOUCHER_SEARCH}"))
        .bind(search.as_deref())
        .fetch_one(pool.inner())
        .await?;

    let query = format!(
        "{VOUCHER_SELECT} {VOUCHER_SEARCH} ORDER BY {} {}, v.id LIMIT $2 OFFSET $3",
        sort_field.sql_column(),
        sort_order.sql_keyword()
    );
    let data: Vec<VoucherLogView> = sqlx::query_as(&query)
        .bind(search.as_deref())
        .bind(params.per_page())
        .bind(params.offset())
        .fetch_all(pool.inner())
        .await?;

    Ok(Json(ApiResponse::success(PaginatedData {
        data,
        pagination: Pagination::new(count, params.page(), params.per_page()),
    })))
}

/// Create a single voucher. The code comes from the shared voucher sequence.
#[openapi(tag = "Karma Vouchers")]
#[post("/dashboard/karma-voucher", data = "<request>")]
pub async fn create_voucher(
    request: Json<CreateVoucherRequest>,
    services: &State<VoucherServices>,
    manager: RequireVoucherManager,
) -> Result<Json<ApiResponse<SuccessRow>>, ApiError> {
    let request = request.into_inner();
    let created = services
        .importer()
        .create_single(
            SingleVoucher {
                muid: request.muid,
                hashtag: request.hashtag,
                karma: request.karma.to_string(),
                month: request.month,
                week: request.week,
            },
            manager.0.id,
        )
        .await?;

    log::info!("voucher {} created by {}", created.code, manager.0.muid);
    Ok(Json(ApiResponse::success_with_message(
        "Voucher created successfully",
        created,
    )))
}

fn check_update(request: &UpdateVoucherRequest) -> Result<(), ApiError> {
    if request.karma == Some(0) {
        return Err(ApiError::BadRequest("Karma cannot be 0".into()));
    }
    for (field, value, limit) in [
        ("month", &request.month, MONTH_MAX_CHARS),
        ("week", &request.week, WEEK_MAX_CHARS),
    ] {
        if let Some(value) = value {
            if value.trim().is_empty() {
                return Err(ApiError::BadRequest("Month and week cannot be empty".into()));
            }
            if value.chars().count() > limit {
                return Err(ApiError::BadRequest(format!(
                    "{field}: Ensure this field has no more than {limit} characters."
                )));
            }
        }
    }
    Ok(())
}

/// Update karma, period, claim status or task of a voucher.
#[openapi(tag = "Karma Vouchers")]
#[patch("/dashboard/karma-voucher/<voucher_id>", data = "<request>")]
pub async fn update_voucher(
    voucher_id: Uuid,
    request: Json<UpdateVoucherRequest>,
    pool: &State<PgPool>,
    manager: RequireVoucherManager,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let request = request.into_inner();
    check_update(&request)?;

    let task_id: Option<Uuid> = match request.hashtag.as_deref().map(str::trim) {
        Some(hashtag) => Some(
            sqlx::query_scalar("SELECT id FROM task_list WHERE hashtag = $1")
                .bind(hashtag)
                .fetch_optional(pool.inner())
                .await?
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("Invalid task hashtag: {hashtag}"))
                })?,
        ),
        None => None,
    };

    let updated = sqlx::query(
        r#"UPDATE voucher_log
           SET karma = COALESCE($2, karma),
               month = COALESCE($3, month),
               week = COALESCE($4, week),
               claimed = COALESCE($5, claimed),
               task_id = COALESCE($6, task_id),
               updated_by = $7,
               updated_at = $8
           WHERE id = $1"#,
    )
    .bind(voucher_id)
    .bind(request.karma)
    .bind(request.month.as_deref().map(str::trim))
    .bind(request.week.as_deref().map(str::trim))
    .bind(request.claimed)
    .bind(task_id)
    .bind(manager.0.id)
    .bind(Utc::now())
    .execute(pool.inner())
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Invalid Voucher".into()));
    }

    Ok(Json(ApiResponse::success_with_message(
        "Voucher updated successfully",
        serde_json::json!({}),
    )))
}

/// Delete a voucher.
#[openapi(tag = "Karma Vouchers")]
#[delete("/dashboard/karma-voucher/<voucher_id>")]
pub async fn delete_voucher(
    voucher_id: Uuid,
    pool: &State<PgPool>,
    manager: RequireVoucherManager,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let deleted = sqlx::query("DELETE FROM voucher_log WHERE id = $1")
        .bind(voucher_id)
        .execute(pool.inner())
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::BadRequest("Invalid Voucher".into()));
    }

    log::info!("voucher {} deleted by {}", voucher_id, manager.0.muid);
    Ok(Json(ApiResponse::success_with_message(
        "Voucher successfully deleted",
        serde_json::json!({}),
    )))
}

/// Download every voucher as `Voucher Log.csv`.
#[get("/dashboard/karma-voucher/export")]
pub async fn export_vouchers(
    pool: &State<PgPool>,
    _manager: RequireVoucherManager,
) -> Result<CsvDownload, ApiError> {
    let vouchers: Vec<VoucherLogView> =
        sqlx::query_as(&format!("{VOUCHER_SELECT} ORDER BY v.created_at DESC, v.id"))
            .fetch_all(pool.inner())
            .await?;

    let body = vouchers_to_csv(&vouchers)
        .map_err(|err| ApiError::InternalError(format!("failed to write csv: {err}")))?;
    Ok(CsvDownload::attachment(body, EXPORT_FILE_NAME))
}

/// Routes that cannot be described in the OpenAPI document.
pub fn file_routes() -> Vec<rocket::Route> {
    routes![import_vouchers, export_vouchers]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_rejects_zero_karma_and_long_periods() {
        let zero = UpdateVoucherRequest {
            karma: Some(0),
            ..Default::default()
        };
        assert!(matches!(check_update(&zero), Err(ApiError::BadRequest(msg)) if msg == "Karma cannot be 0"));

        let long_week = UpdateVoucherRequest {
            week: Some("123".into()),
            ..Default::default()
        };
        assert!(matches!(
            check_update(&long_week),
            Err(ApiError::BadRequest(msg)) if msg.starts_with("week:")
        ));

        let fine = UpdateVoucherRequest {
            karma: Some(15),
            month: Some("March".into()),
            claimed: Some(true),
            ..Default::default()
        };
        assert!(check_update(&fine).is_ok());
    }
}

use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ===== Response Envelope =====

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResponseMessage {
    pub general: Vec<String>,
}

/// Envelope wrapping every JSON response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub has_error: bool,
    pub status_code: u16,
    pub message: ResponseMessage,
    pub response: T,
}

impl<T> ApiResponse<T> {
    pub fn success(response: T) -> Self {
        Self {
            has_error: false,
            status_code: Status::Ok.code,
            message: ResponseMessage::default(),
            response,
        }
    }

    pub fn success_with_message(message: impl Into<String>, response: T) -> Self {
        Self {
            message: ResponseMessage {
                general: vec![message.into()],
            },
            ..Self::success(response)
        }
    }

    pub fn failure(status: Status, message: impl Into<String>, response: T) -> Self {
        Self {
            has_error: true,
            status_code: status.code,
            message: ResponseMessage {
                general: vec![message.into()],
            },
            response,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub count: i64,
    pub total_pages: i64,
    pub is_next: bool,
    pub is_prev: bool,
    pub next_page: Option<i64>,
}

impl Pagination {
    pub fn new(count: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if count == 0 {
            0
        } else {
            (count + per_page - 1) / per_page
        };
        let is_next = page < total_pages;
        Self {
            count,
            total_pages,
            is_next,
            is_prev: page > 1,
            next_page: is_next.then_some(page + 1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedData<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

// ===== Voucher Models =====

/// Voucher row as listed and exported.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct VoucherLogView {
    pub id: Uuid,
    pub code: String,
    pub user: String,
    pub muid: String,
    pub task: String,
    pub hashtag: String,
    pub karma: i32,
    pub month: String,
    pub week: String,
    pub claimed: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateVoucherRequest {
    pub muid: String,
    pub hashtag: String,
    pub karma: i32,
    pub month: String,
    pub week: String,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UpdateVoucherRequest {
    pub karma: Option<i32>,
    pub month: Option<String>,
    pub week: Option<String>,
    pub claimed: Option<bool>,
    /// Reassign the voucher to the task with this hashtag.
    pub hashtag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthStatus {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_reports_neighbours() {
        let first = Pagination::new(45, 1, 20);
        assert_eq!(first.total_pages, 3);
        assert!(first.is_next);
        assert!(!first.is_prev);
        assert_eq!(first.next_page, Some(2));

        let last = Pagination::new(45, 3, 20);
        assert!(!last.is_next);
        assert!(last.is_prev);
        assert_eq!(last.next_page, None);

        let empty = Pagination::new(0, 1, 20);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.is_next);
    }

    #[test]
    fn envelope_uses_camel_case_keys() {
        let body = serde_json::to_value(ApiResponse::success_with_message(
            "Voucher created successfully",
            serde_json::json!({}),
        ))
        .unwrap();
        assert_eq!(body["hasError"], false);
        assert_eq!(body["statusCode"], 200);
        assert_eq!(body["message"]["general"][0], "Voucher created successfully");
    }
}

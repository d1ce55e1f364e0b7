//! Query parameters for the voucher list endpoint.
//!
//! Names follow the dashboard's query contract (`pageIndex`, `perPage`,
//! `search`, `sortBy`) and derive `JsonSchema` so they show up in the
//! generated OpenAPI document.

use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

const fn default_page() -> i64 {
    1
}

const fn default_per_page() -> i64 {
    10
}

const MAX_PER_PAGE: i64 = 100;

/// Sort direction for list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Render the sort order as a SQL keyword.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Columns the voucher list can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoucherSortField {
    User,
    Code,
    Karma,
    Claimed,
    Task,
    Week,
    Month,
    UpdatedBy,
    UpdatedAt,
    #[default]
    CreatedAt,
}

impl VoucherSortField {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "user" => VoucherSortField::User,
            "code" => VoucherSortField::Code,
            "karma" => VoucherSortField::Karma,
            "claimed" => VoucherSortField::Claimed,
            "task" => VoucherSortField::Task,
            "week" => VoucherSortField::Week,
            "month" => VoucherSortField::Month,
            "updated_by" => VoucherSortField::UpdatedBy,
            "updated_at" => VoucherSortField::UpdatedAt,
            "created_at" => VoucherSortField::CreatedAt,
            _ => return None,
        })
    }

    /// Qualified column used in `ORDER BY`.
    pub fn sql_column(self) -> &'static str {
        match self {
            VoucherSortField::User => "u.first_name",
            VoucherSortField::Code => "v.code",
            VoucherSortField::Karma => "v.karma",
            VoucherSortField::Claimed => "v.claimed",
            VoucherSortField::Task => "t.title",
            VoucherSortField::Week => "v.week",
            VoucherSortField::Month => "v.month",
            VoucherSortField::UpdatedBy => "ub.first_name",
            VoucherSortField::UpdatedAt => "v.updated_at",
            VoucherSortField::CreatedAt => "v.created_at",
        }
    }
}

/// Query parameters accepted by the voucher list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoucherListParams {
    /// One-based page index (defaults to 1).
    #[field(name = "pageIndex", default = 1)]
    #[serde(default = "default_page")]
    pub page_index: i64,
    /// Items per page (defaults to 10, maximum 100).
    #[field(name = "perPage", default = 10)]
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    /// Case-insensitive search over names, task title, karma, month, week and claim status.
    pub search: Option<String>,
    /// Sort key; a leading `-` sorts descending. Unknown keys fall back to newest first.
    #[field(name = "sortBy")]
    pub sort_by: Option<String>,
}

impl Default for VoucherListParams {
    fn default() -> Self {
        Self {
            page_index: default_page(),
            per_page: default_per_page(),
            search: None,
            sort_by: None,
        }
    }
}

impl VoucherListParams {
    pub fn page(&self) -> i64 {
        self.page_index.max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }

    pub fn normalized_search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_string)
    }

    pub fn sort(&self) -> (VoucherSortField, SortOrder) {
        let Some(raw) = self.sort_by.as_deref().map(str::trim) else {
            return (VoucherSortField::default(), SortOrder::Desc);
        };
        let (key, order) = match raw.strip_prefix('-') {
            Some(key) => (key, SortOrder::Desc),
            None => (raw, SortOrder::Asc),
        };
        match VoucherSortField::from_key(key) {
            Some(field) => (field, order),
            None => (VoucherSortField::default(), SortOrder::Desc),
        }
    }
}

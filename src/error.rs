use crate::models::ApiResponse;
use crate::vouchers::import::{GENERIC_FAILURE, ImportError};
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_db_pools::sqlx;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::util::add_schema_response;
use serde_json::Value;
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    DatabaseError(sqlx::Error),
    NotFound(String),
    BadRequest(String),
    /// Request refused with a structured payload in `response`.
    Rejected { message: String, detail: Value },
    InternalError(String),
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, message, detail) = match self {
            ApiError::DatabaseError(e) => {
                log::error!("database error: {}", e);
                (Status::InternalServerError, GENERIC_FAILURE.to_string(), Value::Null)
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                (Status::NotFound, msg, Value::Null)
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, msg, Value::Null)
            }
            ApiError::Rejected { message, detail } => {
                log::debug!("rejected: {}", message);
                (Status::BadRequest, message, detail)
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, msg, Value::Null)
            }
        };

        let detail = if detail.is_null() {
            Value::Object(Default::default())
        } else {
            detail
        };
        let body = ApiResponse::failure(status, message, detail);
        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"hasError":true,"statusCode":500,"message":{"general":["Failed to serialize error"]},"response":{}}"#
                .to_string()
        });

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        let schema = generator.json_schema::<ApiResponse<Value>>();
        for status in [400, 401, 403, 404, 500] {
            add_schema_response(&mut responses, status, "application/json", schema.clone())?;
        }
        Ok(responses)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::DatabaseError(err),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::MissingFile
            | ImportError::EmptyFile
            | ImportError::MissingColumn(_)
            | ImportError::Unreadable(_)
            | ImportError::RowRejected(_) => ApiError::BadRequest(err.to_string()),
            ImportError::InvalidBatch { ref report } => ApiError::Rejected {
                message: err.to_string(),
                detail: serde_json::to_value(report).unwrap_or(Value::Null),
            },
            ImportError::PersistenceAborted(cause) => {
                log::error!("voucher import aborted: {}", cause);
                ApiError::InternalError(GENERIC_FAILURE.to_string())
            }
            ImportError::Notification(cause) => ApiError::InternalError(format!(
                "Vouchers were created but sending notifications failed: {cause}"
            )),
            ImportError::Database(cause) => ApiError::DatabaseError(cause),
        }
    }
}

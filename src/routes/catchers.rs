//! Error catchers rendering Rocket's own failures in the JSON envelope.

use crate::models::ApiResponse;
use rocket::http::Status;
use rocket::serde::json::{Json, Value, json};
use rocket::{Catcher, Request};

fn envelope(status: Status, message: &str) -> (Status, Json<ApiResponse<Value>>) {
    (status, Json(ApiResponse::failure(status, message, json!({}))))
}

#[catch(400)]
fn bad_request(_: &Request<'_>) -> (Status, Json<ApiResponse<Value>>) {
    envelope(Status::BadRequest, "Malformed request.")
}

#[catch(401)]
fn unauthorized(_: &Request<'_>) -> (Status, Json<ApiResponse<Value>>) {
    envelope(Status::Unauthorized, "Authentication credentials were not provided or are invalid.")
}

#[catch(403)]
fn forbidden(_: &Request<'_>) -> (Status, Json<ApiResponse<Value>>) {
    envelope(Status::Forbidden, "You do not have permission to perform this action.")
}

#[catch(404)]
fn not_found(_: &Request<'_>) -> (Status, Json<ApiResponse<Value>>) {
    envelope(Status::NotFound, "Not found.")
}

#[catch(422)]
fn unprocessable(_: &Request<'_>) -> (Status, Json<ApiResponse<Value>>) {
    envelope(Status::UnprocessableEntity, "Invalid request body.")
}

#[catch(500)]
fn internal_error(_: &Request<'_>) -> (Status, Json<ApiResponse<Value>>) {
    envelope(Status::InternalServerError, "Something went wrong. Please try again.")
}

pub fn catchers() -> Vec<Catcher> {
    catchers![bad_request, unauthorized, forbidden, not_found, unprocessable, internal_error]
}

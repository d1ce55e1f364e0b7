//! HTTP route handlers.
//!
//! JSON endpoints are annotated with `#[openapi]` so `rocket_okapi` can derive
//! an OpenAPI document; file upload and download endpoints are mounted
//! separately through [`vouchers::file_routes`].

pub mod catchers;
pub mod health;
pub mod params;
pub mod vouchers;

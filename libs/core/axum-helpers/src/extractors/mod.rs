//! Custom extractors for Axum handlers.
//!
//! Both extractors reject with [`AppError`](crate::errors::AppError), so a
//! malformed body produces the same JSON `ErrorResponse` as every other error.

pub mod json_body;
pub mod validated_json;

pub use json_body::JsonBody;
pub use validated_json::ValidatedJson;

//! JSON extractor with automatic validation using the validator crate.

use crate::errors::AppError;
use axum::extract::{FromRequest, Json, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON extractor with automatic validation.
///
/// Validates the request body using the `validator` crate's `Validate` trait.
/// Parse failures become [`AppError::JsonExtractorRejection`] and rule
/// violations become [`AppError::ValidationError`], both answered with `400`.
///
/// # Example
/// ```ignore
/// use axum::Router;
/// use axum::routing::post;
/// use axum_helpers::extractors::ValidatedJson;
/// use serde::Deserialize;
/// use validator::Validate;
///
/// #[derive(Deserialize, Validate)]
/// struct BatchRequest {
///     #[validate(length(min = 1, max = 100))]
///     events: Vec<serde_json::Value>,
/// }
///
/// async fn submit(ValidatedJson(batch): ValidatedJson<BatchRequest>) -> String {
///     format!("{} events", batch.events.len())
/// }
///
/// let app = Router::new().route("/events/batch", post(submit));
/// ```
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(data) = Json::<T>::from_request(req, state).await?;
        data.validate()?;
        Ok(ValidatedJson(data))
    }
}

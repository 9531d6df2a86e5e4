use crate::error::ValidationError;
use crate::event::{Event, EventType};
use std::str::FromStr;
use strum::VariantNames;

/// Check that an event is well-formed enough to process.
///
/// `type` must be one of the recognized [`EventType`] values and `source` must
/// be non-blank. The first offending field is reported.
pub fn validate(event: &Event) -> Result<(), ValidationError> {
    if event.event_type.trim().is_empty() {
        return Err(ValidationError::new("type", "is required"));
    }
    if EventType::from_str(&event.event_type).is_err() {
        return Err(ValidationError::new(
            "type",
            format!(
                "'{}' is not one of: {}",
                event.event_type,
                EventType::VARIANTS.join(", ")
            ),
        ));
    }
    if event.source.trim().is_empty() {
        return Err(ValidationError::new("source", "is required"));
    }
    Ok(())
}

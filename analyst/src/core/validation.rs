//! Validation verdict decoding.
//!
//! The validator is asked whether the accumulated results answer the user's
//! request. Its response must never be trusted optimistically: anything
//! without a recognizable `status` field defaults to `incomplete`, so
//! ambiguous output can trigger another cycle but never a silent success.

use serde_json::Value;

use crate::core::types::ValidationResult;

/// Reason attached when the validator response carries no usable verdict.
pub const AMBIGUOUS_VERDICT_REASON: &str =
    "validator response did not contain a recognizable status";

/// Decode a validator response, defaulting to `incomplete` on anything that
/// is not a well-formed verdict.
pub fn decode_validation(value: &Value) -> ValidationResult {
    match serde_json::from_value::<ValidationResult>(value.clone()) {
        Ok(result) => result,
        Err(_) => ValidationResult::Incomplete {
            reason: AMBIGUOUS_VERDICT_REASON.to_string(),
        },
    }
}

pub mod documents;
pub mod itineraries;
pub mod status;
pub mod trips;
pub mod webhooks;

pub use documents::*;
pub use itineraries::*;
pub use status::*;
pub use trips::*;
pub use webhooks::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

/// Helper function to create consistent JSON error responses
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "errors": message
        })),
    )
}

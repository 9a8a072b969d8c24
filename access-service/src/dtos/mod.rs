pub mod admin;
pub mod groups;
pub mod oauth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Cannot remove the last admin of a group")]
    pub error: String,
}

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::groups::WebhookResponse;
use crate::models::WebhookEnvelope;
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::ProvisionOutcome;
use crate::AppState;

/// Contract platform event for a target service provider
///
/// The body is only parsed once its `X-Hub-Signature-256` has been verified.
#[utoipa::path(
    post,
    path = "/webhooks/{service_provider_id}",
    params(
        ("service_provider_id" = Uuid, Path, description = "Provider the contract grants access to"),
        ("X-Hub-Signature-256" = String, Header, description = "sha256=<hex hmac of the raw body>")
    ),
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Provisioned or ignored", body = WebhookResponse),
        (status = 400, description = "Malformed payload", body = crate::dtos::ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = crate::dtos::ErrorResponse),
        (status = 403, description = "Unsupported event type", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Unknown service provider", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Contract matches several groups", body = crate::dtos::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn receive_contract_event(
    State(state): State<AppState>,
    Path(service_provider_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        WEBHOOK_EVENTS_TOTAL.with_label_values(&["rejected"]).inc();
        AppError::BadRequest(anyhow::anyhow!("Malformed webhook payload: {}", e))
    })?;

    let response = match state.contracts.handle(service_provider_id, &envelope).await? {
        ProvisionOutcome::Ignored { reason } => WebhookResponse {
            status: "Ignored".to_string(),
            message: reason,
            data: json!({ "event": envelope.event, "event_id": envelope.event_id }),
        },
        ProvisionOutcome::Provisioned {
            group_id,
            group_created,
            grant_created,
        } => WebhookResponse {
            status: "Success".to_string(),
            message: if group_created {
                "Group provisioned".to_string()
            } else {
                "Group already provisioned for this contract".to_string()
            },
            data: json!({
                "group_id": group_id,
                "group_created": group_created,
                "grant_created": grant_created,
                "event_id": envelope.event_id,
            }),
        },
    };

    Ok(Json(response))
}

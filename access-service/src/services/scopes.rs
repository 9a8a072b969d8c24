//! Per (service provider, group) access grants.

use crate::models::{Actor, AuditAction, NewAuditEvent, ScopeGrant, ScopeGrantInput};
use crate::services::store::StoreTx;
use crate::services::ServiceError;
use uuid::Uuid;

/// Create or overwrite the grant of `service_provider_id` on `group_id`
/// inside the caller's transaction, and record it. Last write wins.
///
/// Returns the stored grant and whether it was created.
pub async fn update_or_create(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    service_provider_id: Uuid,
    group_id: Uuid,
    input: ScopeGrantInput,
) -> Result<(ScopeGrant, bool), ServiceError> {
    let grant = input.into_grant(service_provider_id, group_id);
    let created = tx.upsert_scope_grant(&grant).await?;

    let action = if created {
        AuditAction::ScopeGrantCreated
    } else {
        AuditAction::ScopeGrantUpdated
    };
    let event = NewAuditEvent::new(actor, action, format!("{}:{}", service_provider_id, group_id))
        .group(group_id)
        .service_provider(service_provider_id)
        .snapshot(&grant);
    tx.insert_audit_event(&event.into_event()).await?;

    tracing::info!(
        service_provider_id = %service_provider_id,
        group_id = %group_id,
        created = created,
        "Scope grant written"
    );

    Ok((grant, created))
}

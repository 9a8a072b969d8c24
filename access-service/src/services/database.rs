//! PostgreSQL store.

use crate::models::{
    AuditEvent, AuditFilter, Group, GroupMembership, GroupRole, MemberView, Organization,
    ScopeGrant, ServiceAccount, ServiceProvider, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{AccessStore, StoreTx};
use crate::services::ServiceError;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const GROUP_COLUMNS: &str = "g.id, g.name, g.organization_id, g.created_at";
const USER_COLUMNS: &str = "id, email, sub, verified, created_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "access-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AccessStore for Database {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError> {
        let tx = self.pool.begin().await.map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

/// One open PostgreSQL transaction. Rolled back by sqlx when dropped.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn find_user_by_subject(&mut self, sub: &str) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE sub = $1",
            USER_COLUMNS
        ))
        .bind(sub)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn insert_user(&mut self, user: &User) -> Result<(), ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_user"])
            .start_timer();

        sqlx::query(
            "INSERT INTO users (id, email, sub, verified, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.sub)
        .bind(user.verified)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, sub), fields(user_id = %user_id))]
    async fn bind_subject_if_unset(
        &mut self,
        user_id: Uuid,
        sub: &str,
    ) -> Result<bool, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["bind_subject"])
            .start_timer();

        // Exactly one concurrent caller sees rows_affected = 1.
        let result = sqlx::query(
            "UPDATE users SET sub = $2, verified = TRUE WHERE id = $1 AND sub IS NULL",
        )
        .bind(user_id)
        .bind(sub)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_organization(&mut self, id: Uuid) -> Result<Option<Organization>, ServiceError> {
        let organization = sqlx::query_as::<_, Organization>(
            "SELECT id, siret, name, created_at FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(organization)
    }

    async fn find_organization_by_siret(
        &mut self,
        siret: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        let organization = sqlx::query_as::<_, Organization>(
            "SELECT id, siret, name, created_at FROM organizations WHERE siret = $1",
        )
        .bind(siret)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(organization)
    }

    async fn insert_organization(
        &mut self,
        organization: &Organization,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO organizations (id, siret, name, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(organization.id)
        .bind(&organization.siret)
        .bind(&organization.name)
        .bind(organization.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_organization_name(&mut self, id: Uuid, name: &str) -> Result<(), ServiceError> {
        sqlx::query("UPDATE organizations SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_group(&mut self, id: Uuid) -> Result<Option<Group>, ServiceError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            "SELECT {} FROM groups g WHERE g.id = $1",
            GROUP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(group)
    }

    #[instrument(skip(self, group), fields(group_id = %group.id))]
    async fn insert_group(&mut self, group: &Group) -> Result<(), ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_group"])
            .start_timer();

        sqlx::query(
            "INSERT INTO groups (id, name, organization_id, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(group.organization_id)
        .bind(group.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_group(&mut self, id: Uuid) -> Result<bool, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["delete_group"])
            .start_timer();

        // Memberships and scope grants cascade.
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_groups_for_provider(
        &mut self,
        service_provider_id: Uuid,
    ) -> Result<Vec<Group>, ServiceError> {
        let groups = sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {} FROM groups g
            JOIN scope_grants sg ON sg.group_id = g.id
            WHERE sg.service_provider_id = $1
            ORDER BY g.created_at, g.id
            "#,
            GROUP_COLUMNS
        ))
        .bind(service_provider_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(groups)
    }

    async fn list_groups_for_user(&mut self, user_id: Uuid) -> Result<Vec<Group>, ServiceError> {
        let groups = sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {} FROM groups g
            JOIN group_memberships gm ON gm.group_id = g.id
            WHERE gm.user_id = $1
            ORDER BY g.created_at, g.id
            "#,
            GROUP_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(groups)
    }

    #[instrument(skip(self), fields(service_provider_id = %service_provider_id))]
    async fn find_groups_by_contract(
        &mut self,
        service_provider_id: Uuid,
        contract_description: &str,
    ) -> Result<Vec<Group>, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["find_groups_by_contract"])
            .start_timer();

        let groups = sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {} FROM groups g
            JOIN scope_grants sg ON sg.group_id = g.id
            WHERE sg.service_provider_id = $1 AND sg.contract_description = $2
            ORDER BY g.created_at, g.id
            "#,
            GROUP_COLUMNS
        ))
        .bind(service_provider_id)
        .bind(contract_description)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(groups)
    }

    #[instrument(skip(self))]
    async fn lock_memberships(
        &mut self,
        group_id: Uuid,
    ) -> Result<Vec<GroupMembership>, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["lock_memberships"])
            .start_timer();

        let memberships = sqlx::query_as::<_, GroupMembership>(
            r#"
            SELECT group_id, user_id, role_id, created_at
            FROM group_memberships
            WHERE group_id = $1
            ORDER BY user_id
            FOR UPDATE
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(memberships)
    }

    async fn find_membership(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupMembership>, ServiceError> {
        let membership = sqlx::query_as::<_, GroupMembership>(
            r#"
            SELECT group_id, user_id, role_id, created_at
            FROM group_memberships
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(membership)
    }

    async fn insert_membership(
        &mut self,
        membership: &GroupMembership,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO group_memberships (group_id, user_id, role_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(membership.group_id)
        .bind(membership.user_id)
        .bind(membership.role_id)
        .bind(membership.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_membership_role(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        role: GroupRole,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE group_memberships SET role_id = $3 WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role.id())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_membership(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM group_memberships WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_members(&mut self, group_id: Uuid) -> Result<Vec<MemberView>, ServiceError> {
        let members = sqlx::query_as::<_, MemberView>(
            r#"
            SELECT u.id AS user_id, u.email, u.verified, gm.role_id
            FROM group_memberships gm
            JOIN users u ON u.id = gm.user_id
            WHERE gm.group_id = $1
            ORDER BY gm.role_id, u.email
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(members)
    }

    async fn find_scope_grant(
        &mut self,
        service_provider_id: Uuid,
        group_id: Uuid,
    ) -> Result<Option<ScopeGrant>, ServiceError> {
        let grant = sqlx::query_as::<_, ScopeGrant>(
            r#"
            SELECT service_provider_id, group_id, scopes, contract_description, contract_url, updated_at
            FROM scope_grants
            WHERE service_provider_id = $1 AND group_id = $2
            "#,
        )
        .bind(service_provider_id)
        .bind(group_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(grant)
    }

    #[instrument(skip(self, grant), fields(
        service_provider_id = %grant.service_provider_id,
        group_id = %grant.group_id
    ))]
    async fn upsert_scope_grant(&mut self, grant: &ScopeGrant) -> Result<bool, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_scope_grant"])
            .start_timer();

        // xmax is 0 only for a freshly inserted row version.
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO scope_grants
                (service_provider_id, group_id, scopes, contract_description, contract_url, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (service_provider_id, group_id) DO UPDATE SET
                scopes = EXCLUDED.scopes,
                contract_description = EXCLUDED.contract_description,
                contract_url = EXCLUDED.contract_url,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(grant.service_provider_id)
        .bind(grant.group_id)
        .bind(&grant.scopes)
        .bind(&grant.contract_description)
        .bind(&grant.contract_url)
        .bind(grant.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(inserted)
    }

    async fn list_scope_grants(&mut self, group_id: Uuid) -> Result<Vec<ScopeGrant>, ServiceError> {
        let grants = sqlx::query_as::<_, ScopeGrant>(
            r#"
            SELECT service_provider_id, group_id, scopes, contract_description, contract_url, updated_at
            FROM scope_grants
            WHERE group_id = $1
            ORDER BY updated_at
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(grants)
    }

    async fn find_service_provider(
        &mut self,
        id: Uuid,
    ) -> Result<Option<ServiceProvider>, ServiceError> {
        let provider = sqlx::query_as::<_, ServiceProvider>(
            "SELECT id, name, oidc_client_id, created_at FROM service_providers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(provider)
    }

    async fn find_service_provider_by_client_id(
        &mut self,
        oidc_client_id: &str,
    ) -> Result<Option<ServiceProvider>, ServiceError> {
        let provider = sqlx::query_as::<_, ServiceProvider>(
            r#"
            SELECT id, name, oidc_client_id, created_at
            FROM service_providers
            WHERE oidc_client_id = $1
            "#,
        )
        .bind(oidc_client_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(provider)
    }

    async fn insert_service_provider(
        &mut self,
        provider: &ServiceProvider,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO service_providers (id, name, oidc_client_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(provider.id)
        .bind(&provider.name)
        .bind(&provider.oidc_client_id)
        .bind(provider.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_service_account_by_client_id(
        &mut self,
        client_id: &str,
    ) -> Result<Option<ServiceAccount>, ServiceError> {
        let account = sqlx::query_as::<_, ServiceAccount>(
            r#"
            SELECT id, service_provider_id, client_id, secret_hash, active, created_at
            FROM service_accounts
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn insert_service_account(
        &mut self,
        account: &ServiceAccount,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO service_accounts
                (id, service_provider_id, client_id, secret_hash, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(account.service_provider_id)
        .bind(&account.client_id)
        .bind(&account.secret_hash)
        .bind(account.active)
        .bind(account.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_audit_event(&mut self, event: &AuditEvent) -> Result<(), ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_audit_event"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO audit_events
                (id, actor_kind, actor_id, action, resource_type, resource_id,
                 group_id, user_id, service_provider_id, new_values, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(&event.actor_kind)
        .bind(&event.actor_id)
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(event.group_id)
        .bind(event.user_id)
        .bind(event.service_provider_id)
        .bind(&event.new_values)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_audit_events(
        &mut self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, actor_kind, actor_id, action, resource_type, resource_id,
                   group_id, user_id, service_provider_id, new_values, created_at
            FROM audit_events
            WHERE ($1::uuid IS NULL OR group_id = $1)
              AND ($2::uuid IS NULL OR user_id = $2)
              AND ($3::uuid IS NULL OR service_provider_id = $3)
            ORDER BY created_at DESC, id
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.group_id)
        .bind(filter.user_id)
        .bind(filter.service_provider_id)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(events)
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.commit().await.map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }
}

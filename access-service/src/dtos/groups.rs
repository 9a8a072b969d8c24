use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Group, GroupRole, MemberView, Organization, ScopeGrant, ScopeGrantInput};
use crate::services::{GroupDetail, PairingOutcome};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 255, message = "Group name is required"))]
    #[schema(example = "Portail RH")]
    pub name: String,

    #[validate(length(min = 14, max = 20, message = "SIRET must have 14 digits"))]
    #[schema(example = "21920023500014")]
    pub organization_siret: String,

    #[validate(email(message = "Invalid admin email"))]
    #[schema(example = "alice@example.fr")]
    pub admin_email: String,

    /// Scopes granted to the calling provider on the new group.
    #[serde(default)]
    #[schema(example = json!(["openid", "profile"]))]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub contract_description: Option<String>,

    #[serde(default)]
    pub contract_url: Option<String>,

    /// Added as members. The admin email is skipped.
    #[serde(default)]
    pub extra_members: Vec<String>,
}

impl CreateGroupRequest {
    pub fn grant_input(&self) -> ScopeGrantInput {
        ScopeGrantInput {
            scopes: self.scopes.clone(),
            contract_description: self.contract_description.clone().unwrap_or_default(),
            contract_url: self.contract_url.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GroupDetailResponse {
    pub group: Group,
    pub organization: Option<Organization>,
    pub members: Vec<MemberView>,
    pub scope_grants: Vec<ScopeGrant>,
}

impl From<GroupDetail> for GroupDetailResponse {
    fn from(detail: GroupDetail) -> Self {
        Self {
            group: detail.group,
            organization: detail.organization,
            members: detail.members,
            scope_grants: detail.scope_grants,
        }
    }
}

/// Exactly one of `email` and `user_id` must be given.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddMemberRequest {
    #[validate(email(message = "Invalid email"))]
    #[schema(example = "bob@example.fr")]
    pub email: Option<String>,

    pub user_id: Option<Uuid>,

    #[serde(default = "default_member_role")]
    pub role: GroupRole,
}

fn default_member_role() -> GroupRole {
    GroupRole::Member
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRoleRequest {
    pub role: GroupRole,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PutScopesRequest {
    #[schema(example = json!(["openid", "profile"]))]
    pub scopes: Vec<String>,

    #[validate(length(min = 1, max = 255, message = "contract_description is required"))]
    #[schema(example = "9001")]
    pub contract_description: String,

    #[validate(length(max = 2048))]
    #[serde(default)]
    #[schema(example = "https://contracts.example/9001")]
    pub contract_url: String,
}

impl From<PutScopesRequest> for ScopeGrantInput {
    fn from(req: PutScopesRequest) -> Self {
        ScopeGrantInput {
            scopes: req.scopes,
            contract_description: req.contract_description,
            contract_url: req.contract_url,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PairRequest {
    #[validate(email(message = "Invalid email"))]
    #[schema(example = "alice@example.fr")]
    pub email: String,

    #[validate(length(min = 1, max = 255, message = "sub is required"))]
    #[schema(example = "f3b1c2d4-6f0e-4a8a-9c55-3f1e0d7c2a10")]
    pub sub: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PairingResponse {
    pub email: String,
    pub sub: String,
    #[schema(example = "paired")]
    pub status: String,
}

impl PairingResponse {
    pub fn new(email: String, sub: String, outcome: Option<PairingOutcome>) -> Self {
        let status = match outcome {
            Some(PairingOutcome::Paired) => "paired",
            Some(PairingOutcome::AlreadyPaired) | None => "already_paired",
        };
        Self {
            email,
            sub,
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    #[schema(example = "Success")]
    pub status: String,
    pub message: String,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

pub mod actor;
pub mod audit_event;
pub mod contract;
pub mod group;
pub mod membership;
pub mod organization;
pub mod role;
pub mod scope_grant;
pub mod service_account;
pub mod service_provider;
pub mod user;

pub use actor::Actor;
pub use audit_event::{AuditAction, AuditEvent, AuditFilter, NewAuditEvent};
pub use contract::{ContractData, WebhookEnvelope};
pub use group::Group;
pub use membership::{GroupMembership, MemberView};
pub use organization::{Organization, Siret};
pub use role::GroupRole;
pub use scope_grant::{ScopeGrant, ScopeGrantInput};
pub use service_account::ServiceAccount;
pub use service_provider::{ServiceProvider, WEBHOOK_PROVIDER_ID};
pub use user::{normalize_email, User};

//! Engines and the ports they run against.

pub mod admin;
pub mod contracts;
pub mod credentials;
mod database;
pub mod email;
pub mod error;
pub mod groups;
pub mod identity_provider;
pub mod jobs;
mod jwt;
mod memory;
pub mod metrics;
pub mod oauth_state;
pub mod pairing;
pub mod registry;
pub mod scopes;
pub mod store;

pub use admin::{AdminService, IssuedCredentials};
pub use contracts::{ContractEngine, ProvisionOutcome};
pub use credentials::{CredentialVerifier, SIGNATURE_HEADER};
pub use database::Database;
pub use email::{EmailService, Notification, Notifier, RecordingNotifier};
pub use error::ServiceError;
pub use groups::{GroupDetail, GroupEngine, MemberRef, NewGroup};
pub use identity_provider::{
    HttpIdentityProvider, IdentityProvider, Introspection, StaticIdentityProvider, UserInfo,
};
pub use jobs::BackgroundJobs;
pub use jwt::{JwtService, ServiceAccountClaims, TokenResponse};
pub use memory::{InMemoryStore, StaleLookup};
pub use oauth_state::{StateError, StateSigner};
pub use pairing::{PairingLedger, PairingOutcome};
pub use registry::{HttpOrganizationRegistry, OrganizationRegistry, StaticOrganizationRegistry};
pub use store::{AccessStore, StoreTx};

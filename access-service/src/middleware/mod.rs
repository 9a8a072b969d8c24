pub mod admin;
pub mod auth;

pub use admin::admin_auth_middleware;
pub use auth::{
    end_user_auth_middleware, service_account_auth_middleware, webhook_auth_middleware,
    CurrentActor,
};

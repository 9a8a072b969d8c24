//! HTTP handlers. Each resolves one actor (or none) and calls one engine
//! operation.

pub mod admin;
pub mod audit;
pub mod groups;
pub mod login;
pub mod members;
pub mod metrics;
pub mod oauth;
pub mod pairing;
pub mod scopes;
pub mod webhook;

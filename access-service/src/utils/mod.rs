pub mod secret;
pub mod validation;

pub use secret::{hash_secret, random_token, verify_secret, ClientSecret};
pub use validation::ValidatedJson;

use uuid::Uuid;

/// The caller a request was authenticated as.
///
/// Resolved once by the route family's authentication middleware and passed
/// explicitly to every engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Machine client of a service provider, authenticated by a bearer JWT.
    ServiceAccount {
        service_provider_id: Uuid,
        service_account_id: Uuid,
    },
    /// Person authenticated by an identity-provider access token.
    EndUser {
        acting_subject: String,
        email: Option<String>,
        service_provider_id: Uuid,
    },
    /// Signed webhook delivery from the contract platform.
    Webhook,
}

impl Actor {
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::ServiceAccount { .. } => "service_account",
            Actor::EndUser { .. } => "end_user",
            Actor::Webhook => "webhook",
        }
    }

    /// Stable identifier recorded in audit entries.
    pub fn actor_id(&self) -> String {
        match self {
            Actor::ServiceAccount {
                service_account_id, ..
            } => service_account_id.to_string(),
            Actor::EndUser { acting_subject, .. } => acting_subject.clone(),
            Actor::Webhook => super::WEBHOOK_PROVIDER_ID.to_string(),
        }
    }

    pub fn service_provider_id(&self) -> Uuid {
        match self {
            Actor::ServiceAccount {
                service_provider_id,
                ..
            }
            | Actor::EndUser {
                service_provider_id,
                ..
            } => *service_provider_id,
            Actor::Webhook => super::WEBHOOK_PROVIDER_ID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WEBHOOK_PROVIDER_ID;

    #[test]
    fn test_actor_identity() {
        let sp = Uuid::new_v4();
        let sa = Uuid::new_v4();
        let actor = Actor::ServiceAccount {
            service_provider_id: sp,
            service_account_id: sa,
        };
        assert_eq!(actor.kind(), "service_account");
        assert_eq!(actor.actor_id(), sa.to_string());
        assert_eq!(actor.service_provider_id(), sp);

        let user = Actor::EndUser {
            acting_subject: "sub-1".to_string(),
            email: None,
            service_provider_id: sp,
        };
        assert_eq!(user.actor_id(), "sub-1");

        assert_eq!(Actor::Webhook.service_provider_id(), WEBHOOK_PROVIDER_ID);
    }
}

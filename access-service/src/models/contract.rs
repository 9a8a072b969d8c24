//! Webhook payloads emitted by the contract platform.

use serde::Deserialize;

pub const AUTHORIZATION_REQUEST_MODEL: &str = "authorization_request";

/// State of a contract that triggers provisioning.
pub const VALIDATED_STATE: &str = "validated";

pub const KNOWN_EVENTS: &[&str] = &[
    "create",
    "update",
    "submit",
    "approve",
    "refuse",
    "request_changes",
    "revoke",
    "archive",
    "reopen",
];

/// Outer event. `data` stays untyped until the event is known to provision.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub fired_at: Option<i64>,
    pub model_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebhookEnvelope {
    pub fn is_supported(&self) -> bool {
        self.model_type == AUTHORIZATION_REQUEST_MODEL && KNOWN_EVENTS.contains(&self.event.as_str())
    }

    pub fn state(&self) -> Option<&str> {
        self.data.get("state").and_then(|s| s.as_str())
    }

    pub fn is_validated(&self) -> bool {
        self.state() == Some(VALIDATED_STATE)
    }

    pub fn contract(&self) -> Result<ContractData, serde_json::Error> {
        ContractData::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractData {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub state: String,
    pub intitule: String,
    #[serde(default)]
    pub url: Option<String>,
    pub organization: ContractOrganization,
    pub applicant: ContractApplicant,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractOrganization {
    pub siret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractApplicant {
    pub email: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for contract id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event: &str, model_type: &str, state: &str) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "event": event,
            "event_id": "evt-1",
            "fired_at": 1700000000,
            "model_type": model_type,
            "data": {
                "id": 9001,
                "state": state,
                "intitule": "Portail RH",
                "organization": { "siret": "21920023500014" },
                "applicant": { "email": "alice@example.fr" },
                "scopes": ["openid", "profile"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_supported_events() {
        assert!(envelope("approve", "authorization_request", "validated").is_supported());
        assert!(!envelope("approve", "habilitation", "validated").is_supported());
        assert!(!envelope("delete", "authorization_request", "validated").is_supported());
    }

    #[test]
    fn test_contract_parsing_accepts_numeric_id() {
        let envelope = envelope("approve", "authorization_request", "validated");
        assert!(envelope.is_validated());
        let contract = envelope.contract().unwrap();
        assert_eq!(contract.id, "9001");
        assert!(contract.url.is_none());
        assert_eq!(contract.scopes, vec!["openid", "profile"]);
    }

    #[test]
    fn test_not_validated() {
        assert!(!envelope("submit", "authorization_request", "submitted").is_validated());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel emitted in place of secret material by redacting serializers.
pub const REDACTED: &str = "[REDACTED]";

/// The account the server is currently operating under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Account {
    ApiKey {},
    #[serde(rename_all = "camelCase")]
    Chatgpt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<String>,
    },
    #[serde(untagged)]
    Unknown(Value),
}

/// Credential material submitted to `account/login/start`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LoginMethod {
    #[serde(rename_all = "camelCase")]
    ApiKey { api_key: String },
    Chatgpt {},
    #[serde(untagged)]
    Unknown(Value),
}

impl LoginMethod {
    /// A copy safe to log or echo: secret fields are replaced with
    /// [`REDACTED`] while the discriminator stays intact.
    pub fn redacted(&self) -> LoginMethod {
        match self {
            LoginMethod::ApiKey { .. } => LoginMethod::ApiKey {
                api_key: REDACTED.to_string(),
            },
            other => other.clone(),
        }
    }
}

/// Rate limit snapshot pushed via `account/rateLimits/updated`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<RateLimitWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<RateLimitWindow>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    #[serde(default)]
    pub used_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_in_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redaction_keeps_discriminator() {
        let method = LoginMethod::ApiKey {
            api_key: "sk-live-1234".to_string(),
        };
        let redacted = method.redacted();
        let encoded = serde_json::to_value(&redacted).expect("encode");
        assert_eq!(
            encoded,
            json!({ "type": "apiKey", "apiKey": "[REDACTED]" })
        );

        let plain = serde_json::to_value(&method).expect("encode");
        assert_eq!(plain.get("apiKey"), Some(&json!("sk-live-1234")));
        assert_eq!(plain.get("type"), Some(&json!("apiKey")));
    }

    #[test]
    fn chatgpt_redaction_is_identity() {
        let method = LoginMethod::Chatgpt {};
        assert_eq!(method.redacted(), method);
    }

    #[test]
    fn unknown_account_round_trips() {
        let raw = json!({ "type": "enterpriseSso", "tenant": "acme" });
        let account: Account = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(serde_json::to_value(&account).expect("encode"), raw);
    }
}

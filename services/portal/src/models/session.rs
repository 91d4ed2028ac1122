//! Server-side session state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything the portal keeps for one browser client.
///
/// Serialized as JSON into the session store under `session:<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    pub user_id: Option<i64>,
    pub user_role: Option<String>,
    /// CSRF tokens keyed by `csrf_token` or `csrf_token_<namespace>`
    #[serde(default)]
    pub csrf_tokens: HashMap<String, String>,
    #[serde(default)]
    pub flash: Vec<FlashMessage>,
    /// URI requested before the login redirect
    pub intended_url: Option<String>,
    /// Top-level keys this version does not know, including the admin
    /// markers older versions of the portal wrote
    #[serde(flatten)]
    pub legacy_flags: HashMap<String, serde_json::Value>,
    /// Database verdict on "is this user an admin", cached during maintenance
    pub admin_verified: Option<bool>,
    pub error_report: Option<ErrorReport>,
}

impl SessionData {
    pub fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    /// Forget the authenticated user, keeping unrelated state
    pub fn clear_identity(&mut self) {
        self.user_id = None;
        self.user_role = None;
        self.admin_verified = None;
        self.legacy_flags.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Error,
    Success,
    Info,
}

/// Outcome message shown once on the next rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub text: String,
}

/// Details of an unhandled failure, kept for the debug error page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub reference: String,
    pub kind: String,
    pub message: String,
    pub uri: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reference: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            message: message.into(),
            uri: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_old_payloads_without_new_fields_still_load() {
        let raw = r#"{"user_id": 5, "user_role": "client", "intended_url": null,
                      "admin_verified": null, "error_report": null}"#;
        let data: SessionData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.user_id, Some(5));
        assert!(data.csrf_tokens.is_empty());
        assert!(data.flash.is_empty());
    }

    #[test]
    fn test_unknown_top_level_keys_are_kept() {
        let raw = r#"{"user_id": 9, "user_role": "client", "is_admin": true,
                      "user_type": "admin"}"#;
        let data: SessionData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.user_id, Some(9));
        assert_eq!(data.legacy_flags.get("is_admin"), Some(&serde_json::json!(true)));
        assert_eq!(data.legacy_flags.get("user_type"), Some(&serde_json::json!("admin")));
        assert!(!data.legacy_flags.contains_key("user_role"));

        // Written back at the top level, not nested
        let stored = serde_json::to_value(&data).unwrap();
        assert_eq!(stored["is_admin"], serde_json::json!(true));
        assert!(stored.get("legacy_flags").is_none());
    }

    #[test]
    fn test_clear_identity_keeps_tokens() {
        let mut data = SessionData {
            user_id: Some(1),
            user_role: Some("admin".into()),
            admin_verified: Some(true),
            ..Default::default()
        };
        data.csrf_tokens.insert("csrf_token".into(), "abc".into());
        data.legacy_flags.insert("is_admin".into(), serde_json::json!(true));

        data.clear_identity();

        assert!(!data.is_logged_in());
        assert!(data.legacy_flags.is_empty());
        assert_eq!(data.admin_verified, None);
        assert_eq!(data.csrf_tokens.len(), 1);
    }
}

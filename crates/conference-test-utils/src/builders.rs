//! Builder patterns for test data construction
//!
//! Provides fluent APIs for conference requests, both as the typed
//! `NewConference` and as the JSON body the HTTP API accepts.

use common::secret::SecretString;
use conference_service::models::{ConferenceSettings, NewConference};
use serde_json::{json, Value};

/// Builder for conference creation requests
///
/// # Example
/// ```rust,ignore
/// let request = ConferenceBuilder::new()
///     .titled("Standup")
///     .capacity(2)
///     .with_password("hunter22")
///     .build();
/// ```
pub struct ConferenceBuilder {
    title: String,
    max_participants: Option<u32>,
    settings: Option<ConferenceSettings>,
    password: Option<String>,
}

impl ConferenceBuilder {
    /// Create a builder with a default title and no overrides
    pub fn new() -> Self {
        Self {
            title: "Test conference".to_string(),
            max_participants: None,
            settings: None,
            password: None,
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Set the participant limit
    pub fn capacity(mut self, max_participants: u32) -> Self {
        self.max_participants = Some(max_participants);
        self
    }

    pub fn with_settings(mut self, settings: ConferenceSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Build the typed request
    pub fn build(self) -> NewConference {
        NewConference {
            title: self.title,
            max_participants: self.max_participants,
            settings: self.settings,
            password: self.password.map(SecretString::from),
            ..NewConference::default()
        }
    }

    /// Build the request as an HTTP body
    pub fn json(self) -> Value {
        let mut body = json!({ "title": self.title });
        if let Some(max) = self.max_participants {
            body["max_participants"] = json!(max);
        }
        if let Some(settings) = self.settings {
            body["settings"] = serde_json::to_value(settings).expect("settings serialize");
        }
        if let Some(password) = self.password {
            body["password"] = json!(password);
        }
        body
    }
}

impl Default for ConferenceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    #[test]
    fn test_builder_sets_fields() {
        let request = ConferenceBuilder::new()
            .titled("Standup")
            .capacity(3)
            .with_password("hunter22")
            .build();

        assert_eq!(request.title, "Standup");
        assert_eq!(request.max_participants, Some(3));
        assert_eq!(
            request.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("hunter22".to_string())
        );
    }

    #[test]
    fn test_json_omits_unset_fields() {
        let body = ConferenceBuilder::new().titled("Open").json();

        assert_eq!(body["title"], "Open");
        assert!(body.get("max_participants").is_none());
        assert!(body.get("password").is_none());
    }
}

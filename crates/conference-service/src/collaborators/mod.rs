//! External collaborators consulted by the coordinator.
//!
//! Authentication and calendar integration live outside this service; the
//! coordinator only needs the narrow questions these traits answer. Calls
//! are made before a conference lock is taken, never while holding one.

use crate::errors::ConferenceError;
use crate::models::CalendarEvent;
use async_trait::async_trait;
use common::types::{ConferenceId, UserId};

/// Role required to schedule conferences.
pub const ROLE_CREATE_CONFERENCE: &str = "conference:create";

/// Answers authority questions about users.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `user` holds host authority over `conference` beyond the
    /// conference's own `host_id` (for example an organization admin).
    async fn is_host(
        &self,
        user: &UserId,
        conference: ConferenceId,
    ) -> Result<bool, ConferenceError>;

    /// Whether `user` may perform `action`.
    async fn has_role(&self, user: &UserId, action: &str) -> Result<bool, ConferenceError>;
}

/// Grants every role and no delegated host authority.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn is_host(
        &self,
        _user: &UserId,
        _conference: ConferenceId,
    ) -> Result<bool, ConferenceError> {
        Ok(false)
    }

    async fn has_role(&self, _user: &UserId, _action: &str) -> Result<bool, ConferenceError> {
        Ok(true)
    }
}

/// Source of calendar events used to seed conferences.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Fetch an event; `None` if it does not exist.
    async fn fetch_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, ConferenceError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all_authorizer() {
        let authorizer = AllowAllAuthorizer;
        let user = UserId::new("anyone");

        assert!(authorizer
            .has_role(&user, ROLE_CREATE_CONFERENCE)
            .await
            .unwrap());
        assert!(!authorizer.is_host(&user, ConferenceId::new()).await.unwrap());
    }
}

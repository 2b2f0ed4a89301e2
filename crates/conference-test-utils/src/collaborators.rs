//! Scripted collaborator doubles.

use async_trait::async_trait;
use common::types::{ConferenceId, UserId};
use conference_service::collaborators::{Authorizer, CalendarSource};
use conference_service::errors::ConferenceError;
use conference_service::models::CalendarEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Authorizer with a fixed set of delegated hosts and denied creators.
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
    delegated_hosts: Mutex<HashSet<UserId>>,
    denied: Mutex<HashSet<UserId>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `user` host authority over every conference.
    pub fn with_delegated_host(self, user: &str) -> Self {
        self.delegated_hosts
            .lock()
            .unwrap()
            .insert(UserId::new(user));
        self
    }

    /// Deny `user` every role.
    pub fn with_denied(self, user: &str) -> Self {
        self.denied.lock().unwrap().insert(UserId::new(user));
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_host(
        &self,
        user: &UserId,
        _conference: ConferenceId,
    ) -> Result<bool, ConferenceError> {
        Ok(self.delegated_hosts.lock().unwrap().contains(user))
    }

    async fn has_role(&self, user: &UserId, _action: &str) -> Result<bool, ConferenceError> {
        Ok(!self.denied.lock().unwrap().contains(user))
    }
}

/// Calendar backed by a map of events.
#[derive(Debug, Default)]
pub struct StaticCalendar {
    events: HashMap<String, CalendarEvent>,
}

impl StaticCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: CalendarEvent) -> Self {
        self.events.insert(event.event_id.clone(), event);
        self
    }
}

#[async_trait]
impl CalendarSource for StaticCalendar {
    async fn fetch_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, ConferenceError> {
        Ok(self.events.get(event_id).cloned())
    }
}

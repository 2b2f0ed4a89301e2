//! # Conference Test Utilities
//!
//! Shared test utilities for the conference coordinator.
//!
//! This crate provides:
//! - `TestHarness` - a coordinator plus its HTTP router, driven in-process
//! - `builders` - fluent conference requests, typed or as JSON bodies
//! - `collaborators` - scripted `Authorizer` and `CalendarSource` doubles
//! - `repositories` - a repository whose writes can be made to fail
//! - `events` - helpers for reading peer event channels
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conference_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let harness = TestHarness::new();
//!     let conference = harness.live_conference(all_features()).await;
//!     let alice = harness.join(conference, "alice").await;
//!
//!     let (status, body) = harness
//!         .get(&format!("/api/v1/conferences/{conference}"), Some(HOST))
//!         .await;
//!     assert_eq!(status, 200);
//!     Ok(())
//! }
//! ```

pub mod builders;
pub mod collaborators;
pub mod events;
pub mod harness;
pub mod repositories;

pub use builders::ConferenceBuilder;
pub use collaborators::{StaticAuthorizer, StaticCalendar};
pub use events::{drain, drain_envelopes};
pub use harness::{all_features, test_config, TestHarness, HOST};
pub use repositories::FailingRepository;

//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for
//! conference passwords, the reconnect binding secret and store URLs that may
//! carry credentials.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! struct deriving `Debug` that holds one is safe to log. Secrets are
//! zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinAttempt {
//!     display_name: String,
//!     password: SecretString,
//! }
//!
//! let attempt = JoinAttempt {
//!     display_name: "alice".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! // Debug output redacts the password
//! assert!(!format!("{attempt:?}").contains("hunter2"));
//!
//! // Access requires an explicit call
//! let password: &str = attempt.password.expose_secret();
//! # assert_eq!(password, "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

//! Reconnect binding tokens and peer id generation.
//!
//! A participant whose transport drops may re-attach within the grace
//! period by presenting the token issued at join (or at its last
//! reconnect):
//!
//! - **Key derivation**: `HKDF-SHA256(master_secret, salt=conference_id, info="conference-reconnect")`
//! - **Token**: `nonce "." HMAC-SHA256(conference_key, participant_id || nonce)`, hex encoded
//! - **Validation**: `ring::hmac::verify` (constant time)
//!
//! The session remembers the nonce of the last issued token, so every token
//! is single-use: a successful reconnect rotates it.

use crate::errors::ConferenceError;
use common::types::{ConferenceId, ParticipantId, PeerId};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{hkdf, hmac};

const HKDF_INFO: &[u8] = b"conference-reconnect";

/// Issued reconnect token together with the nonce it was bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectToken {
    /// Opaque token handed to the client.
    pub token: String,
    /// Nonce the session stores to enforce single use.
    pub nonce: String,
}

/// Generates and validates reconnect tokens.
pub struct ReconnectTokenManager {
    master_secret: Vec<u8>,
    rng: SystemRandom,
}

impl std::fmt::Debug for ReconnectTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectTokenManager")
            .field("master_secret", &"[REDACTED]")
            .finish()
    }
}

impl ReconnectTokenManager {
    /// Create a manager from a master secret of at least 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Config` if the secret is too short.
    pub fn new(master_secret: Vec<u8>) -> Result<Self, ConferenceError> {
        if master_secret.len() < 32 {
            return Err(ConferenceError::Config(
                "Reconnect secret must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self {
            master_secret,
            rng: SystemRandom::new(),
        })
    }

    /// Issue a fresh token for a participant.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Internal` if the OS random source fails.
    pub fn issue(
        &self,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<ReconnectToken, ConferenceError> {
        let nonce = hex::encode(random_bytes::<16>(&self.rng)?);
        let key = self.conference_key(conference_id)?;
        let tag = hmac::sign(&key, signed_message(participant_id, &nonce).as_bytes());

        Ok(ReconnectToken {
            token: format!("{nonce}.{}", hex::encode(tag.as_ref())),
            nonce,
        })
    }

    /// Validate `token` against the nonce the session expects.
    ///
    /// Returns false for malformed tokens, foreign conferences, other
    /// participants, and nonces that were already rotated away.
    #[must_use]
    pub fn validate(
        &self,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        expected_nonce: &str,
        token: &str,
    ) -> bool {
        let Some((nonce, tag_hex)) = token.split_once('.') else {
            return false;
        };
        if nonce != expected_nonce {
            return false;
        }
        let Ok(tag) = hex::decode(tag_hex) else {
            return false;
        };
        let Ok(key) = self.conference_key(conference_id) else {
            return false;
        };
        hmac::verify(&key, signed_message(participant_id, nonce).as_bytes(), &tag).is_ok()
    }

    /// Generate a peer id: 16 random bytes, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Internal` if the OS random source fails.
    pub fn generate_peer_id(&self) -> Result<PeerId, ConferenceError> {
        Ok(PeerId::from(
            hex::encode(random_bytes::<16>(&self.rng)?).as_str(),
        ))
    }

    fn conference_key(&self, conference_id: ConferenceId) -> Result<hmac::Key, ConferenceError> {
        let salt_input = conference_id.to_string();
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt_input.as_bytes());
        let prk = salt.extract(&self.master_secret);
        let okm = prk
            .expand(&[HKDF_INFO], hmac::HMAC_SHA256)
            .map_err(|_| ConferenceError::Internal("HKDF expand failed".to_string()))?;
        Ok(hmac::Key::from(okm))
    }
}

fn signed_message(participant_id: ParticipantId, nonce: &str) -> String {
    format!("{participant_id}{nonce}")
}

fn random_bytes<const N: usize>(rng: &SystemRandom) -> Result<[u8; N], ConferenceError> {
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes)
        .map_err(|_| ConferenceError::Internal("CSPRNG failure".to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_manager() -> ReconnectTokenManager {
        ReconnectTokenManager::new(vec![0u8; 32]).unwrap()
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            ReconnectTokenManager::new(vec![0u8; 31]),
            Err(ConferenceError::Config(_))
        ));
    }

    #[test]
    fn test_issued_token_validates() {
        let manager = test_manager();
        let conference = ConferenceId::new();
        let participant = ParticipantId::new();

        let issued = manager.issue(conference, participant).unwrap();
        assert_eq!(issued.nonce.len(), 32);
        assert!(manager.validate(conference, participant, &issued.nonce, &issued.token));
    }

    #[test]
    fn test_token_bound_to_conference_and_participant() {
        let manager = test_manager();
        let conference = ConferenceId::new();
        let participant = ParticipantId::new();
        let issued = manager.issue(conference, participant).unwrap();

        assert!(!manager.validate(
            ConferenceId::new(),
            participant,
            &issued.nonce,
            &issued.token
        ));
        assert!(!manager.validate(
            conference,
            ParticipantId::new(),
            &issued.nonce,
            &issued.token
        ));
    }

    #[test]
    fn test_rotated_token_rejected() {
        let manager = test_manager();
        let conference = ConferenceId::new();
        let participant = ParticipantId::new();

        let first = manager.issue(conference, participant).unwrap();
        let second = manager.issue(conference, participant).unwrap();

        assert!(!manager.validate(conference, participant, &second.nonce, &first.token));
        assert!(manager.validate(conference, participant, &second.nonce, &second.token));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let manager = test_manager();
        let conference = ConferenceId::new();
        let participant = ParticipantId::new();
        let issued = manager.issue(conference, participant).unwrap();

        for bad in ["", "no-dot", &format!("{}.zz", issued.nonce), &issued.nonce] {
            assert!(!manager.validate(conference, participant, &issued.nonce, bad));
        }
    }

    #[test]
    fn test_different_secrets_produce_different_tokens() {
        let a = test_manager();
        let b = ReconnectTokenManager::new(vec![1u8; 32]).unwrap();
        let conference = ConferenceId::new();
        let participant = ParticipantId::new();

        let issued = a.issue(conference, participant).unwrap();
        assert!(!b.validate(conference, participant, &issued.nonce, &issued.token));
    }

    #[test]
    fn test_peer_ids_are_unique_hex() {
        let manager = test_manager();
        let a = manager.generate_peer_id().unwrap();
        let b = manager.generate_peer_id().unwrap();

        assert_eq!(a.as_str().len(), 32);
        assert!(hex::decode(a.as_str()).is_ok());
        assert_ne!(a, b);
    }
}

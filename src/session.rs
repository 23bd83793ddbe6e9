//! Ephemeral session keys and their validity windows.

use chrono::Utc;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::account::{AddressDeriver, SmartAccountRef};
use crate::config::{DEFAULT_SESSION_SKEW_SECS, DEFAULT_SESSION_WINDOW_SECS};
use crate::error::{DelegationError, Error};
use crate::primitives::{Address, decode_hex, encode_hex};
use crate::signer::address_from_verifying_key;

/// Namespace under which session smart accounts are derived.
const SESSION_NAMESPACE: &str = "session";

/// An ephemeral key pair with a bounded validity window.
///
/// Minted once per session and never mutated; a new session needs a new
/// key. The private key is part of the persisted package by design: the
/// package is a capability token for whoever redeems the delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    /// Hex-encoded secp256k1 private key.
    pub private_key: String,
    /// EVM address of the key.
    pub public_address: Address,
    /// Unix timestamp from which the key is valid.
    pub valid_after: u64,
    /// Unix timestamp at which the key expires.
    pub valid_until: u64,
}

impl SessionKey {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.valid_until
    }

    /// Seconds of validity left, zero once expired.
    pub fn remaining(&self, now: u64) -> u64 {
        self.valid_until.saturating_sub(now)
    }

    /// Client-side window check, performed before any network submission.
    pub fn ensure_active(&self, now: u64) -> Result<(), DelegationError> {
        if self.is_expired(now) {
            return Err(DelegationError::Expired {
                valid_until: self.valid_until,
                now,
            });
        }
        if now < self.valid_after {
            return Err(DelegationError::NotYetValid {
                valid_after: self.valid_after,
                now,
            });
        }
        Ok(())
    }

    /// Rehydrate the signing key from the stored material.
    pub fn signing_key(&self) -> Result<SigningKey, DelegationError> {
        let bytes =
            decode_hex(&self.private_key).map_err(|e| DelegationError::InvalidKey(e.to_string()))?;
        SigningKey::from_slice(&bytes).map_err(|e| DelegationError::InvalidKey(e.to_string()))
    }
}

/// Mints fresh session keys and their counterfactual session accounts.
#[derive(Debug, Clone, Copy)]
pub struct SessionKeyFactory {
    deriver: AddressDeriver,
    window_secs: u64,
    skew_secs: u64,
}

impl SessionKeyFactory {
    pub fn new(deriver: AddressDeriver, window_secs: u64, skew_secs: u64) -> Self {
        Self {
            deriver,
            window_secs,
            skew_secs,
        }
    }

    pub fn with_defaults(deriver: AddressDeriver) -> Self {
        Self::new(deriver, DEFAULT_SESSION_WINDOW_SECS, DEFAULT_SESSION_SKEW_SECS)
    }

    /// Generate a fresh key from OS entropy, never derived from an existing
    /// secret, and derive the session's own counterfactual account from it.
    pub fn create_session(&self) -> Result<(SessionKey, SmartAccountRef), Error> {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_address = address_from_verifying_key(signing_key.verifying_key());

        let now = Utc::now().timestamp() as u64;
        let valid_until = now + self.window_secs;
        // Pre-skewed so minor clock drift between us and the validating
        // contract cannot reject a freshly minted key.
        let valid_after = valid_until - self.window_secs - self.skew_secs;

        let session_key = SessionKey {
            private_key: encode_hex(&signing_key.to_bytes()),
            public_address,
            valid_after,
            valid_until,
        };
        let account_address = self.deriver.derive(public_address, SESSION_NAMESPACE)?;
        let account = SmartAccountRef::counterfactual(account_address, public_address);

        tracing::info!(
            session = %public_address,
            account = %account_address,
            valid_until,
            "created session key"
        );
        Ok((session_key, account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> SessionKeyFactory {
        let deriver = AddressDeriver::new(
            "0x9406cc6185a346906296840746125a0e44976454"
                .parse()
                .expect("valid factory"),
        );
        SessionKeyFactory::with_defaults(deriver)
    }

    #[test]
    fn window_invariant_holds() {
        let (key, _) = factory().create_session().expect("creates");
        let now = Utc::now().timestamp() as u64;

        assert!(key.valid_after < key.valid_until);
        assert!(key.valid_until <= key.valid_after + DEFAULT_SESSION_WINDOW_SECS + DEFAULT_SESSION_SKEW_SECS);
        assert!(key.valid_until > now);
    }

    #[test]
    fn fresh_keys_are_distinct() {
        let (a, account_a) = factory().create_session().expect("creates");
        let (b, account_b) = factory().create_session().expect("creates");

        assert_ne!(a.private_key, b.private_key);
        assert_ne!(a.public_address, b.public_address);
        assert_ne!(account_a.address, account_b.address);
    }

    #[test]
    fn session_account_is_owned_by_the_session_key() {
        let (key, account) = factory().create_session().expect("creates");
        assert_eq!(account.owner, key.public_address);
        assert!(account.is_counterfactual);
    }

    #[test]
    fn stored_key_material_rehydrates() {
        let (key, _) = factory().create_session().expect("creates");
        let signing_key = key.signing_key().expect("rehydrates");
        assert_eq!(
            address_from_verifying_key(signing_key.verifying_key()),
            key.public_address
        );
    }

    #[test]
    fn window_checks_are_client_side() {
        let (mut key, _) = factory().create_session().expect("creates");
        let now = Utc::now().timestamp() as u64;
        assert!(key.ensure_active(now).is_ok());
        assert!(key.remaining(now) > 0);

        key.valid_until = now - 1;
        assert!(key.is_expired(now));
        assert_eq!(key.remaining(now), 0);
        assert!(matches!(
            key.ensure_active(now),
            Err(DelegationError::Expired { .. })
        ));
    }
}

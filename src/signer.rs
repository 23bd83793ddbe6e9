//! Signing capability for delegator accounts.
//!
//! The pipeline only needs an abstract [`Signer`]: something that owns key
//! material for a smart-account owner and can sign a 32-byte digest. The
//! default [`LocalKeySigner`] holds a secp256k1 key in memory; remote or
//! hardware-backed signers plug in behind the same trait. Signing never
//! requires the account to be deployed.

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sha3::{Digest, Keccak256};

use crate::error::DelegationError;
use crate::primitives::{Address, B256, Bytes, decode_hex};

/// Abstract signing capability bound to one owner key.
#[async_trait]
pub trait Signer: Send + Sync {
    /// EVM address of the owner key.
    fn address(&self) -> Address;

    /// Produce a 65-byte recoverable signature over a 32-byte digest.
    async fn sign_digest(&self, digest: B256) -> Result<Bytes, DelegationError>;
}

/// In-process signer over a secp256k1 private key.
pub struct LocalKeySigner {
    key: SigningKey,
    address: Address,
}

impl LocalKeySigner {
    /// Load from a hex-encoded private key, e.g. the configured owner key.
    pub fn from_secret_hex(secret: &SecretString) -> Result<Self, DelegationError> {
        let bytes = decode_hex(secret.expose_secret())
            .map_err(|e| DelegationError::InvalidKey(e.to_string()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| DelegationError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(key))
    }

    /// Generate a throwaway signer from OS entropy.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = address_from_verifying_key(key.verifying_key());
        Self { key, address }
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output.
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: B256) -> Result<Bytes, DelegationError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|e| DelegationError::Signature(e.to_string()))?;

        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(27 + recovery_id.to_byte());
        Ok(Bytes(out))
    }
}

/// Derive the EVM address of a verifying key (keccak of the uncompressed
/// public key, last 20 bytes).
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let mut hasher = Keccak256::new();
    hasher.update(&encoded.as_bytes()[1..]);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

/// Recover the signer address from a 65-byte signature over a digest.
pub fn recover_address(digest: B256, signature: &[u8]) -> Result<Address, DelegationError> {
    if signature.len() != 65 {
        return Err(DelegationError::Signature(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }

    let sig = EcdsaSignature::try_from(&signature[..64])
        .map_err(|e| DelegationError::Signature(format!("invalid ECDSA signature bytes: {e}")))?;
    let recovery_id = normalize_recovery_id(signature[64])?;
    let verifying_key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recovery_id)
        .map_err(|e| DelegationError::Signature(format!("failed recovering signer: {e}")))?;
    Ok(address_from_verifying_key(&verifying_key))
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, DelegationError> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => {
            return Err(DelegationError::Signature(
                "signature recovery id must be 0/1 or 27/28".to_string(),
            ));
        }
    };
    RecoveryId::try_from(id)
        .map_err(|_| DelegationError::Signature("signature recovery id is invalid".to_string()))
}

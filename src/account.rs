//! Counterfactual smart-account references, address derivation, and the
//! idempotent deployment gate.

use serde::{Deserialize, Serialize};

use crate::chain::ChainReader;
use crate::error::{AccountError, Result};
use crate::primitives::{Address, keccak256};
use crate::relay::Call;
use crate::runner::SponsoredOperationRunner;

/// Reference to a smart account that may or may not be deployed yet.
///
/// The address is a deterministic function of owner and namespace and never
/// changes; `is_counterfactual` flips to `false` exactly once, when the
/// deployment gate observes code at the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartAccountRef {
    pub address: Address,
    pub owner: Address,
    pub is_counterfactual: bool,
}

impl SmartAccountRef {
    pub fn counterfactual(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            is_counterfactual: true,
        }
    }

    pub(crate) fn mark_deployed(&mut self) {
        self.is_counterfactual = false;
    }
}

/// Deterministic, salted account-address derivation.
///
/// Mirrors CREATE2: the address is the last 20 bytes of
/// `keccak256(0xff ‖ factory ‖ salt ‖ keccak256(owner))`, where the salt is
/// the keccak hash of a human-readable namespace string. Every component
/// must hash the namespace the same way or derived addresses silently
/// diverge.
#[derive(Debug, Clone, Copy)]
pub struct AddressDeriver {
    factory: Address,
}

impl AddressDeriver {
    pub fn new(factory: Address) -> Self {
        Self { factory }
    }

    /// Pure derivation; same inputs always produce the same address,
    /// independent of deployment state.
    pub fn derive(&self, owner: Address, namespace: &str) -> std::result::Result<Address, AccountError> {
        if namespace.is_empty() {
            return Err(AccountError::EmptyNamespace);
        }
        if owner.is_zero() {
            return Err(AccountError::ZeroOwner);
        }

        let salt = keccak256(namespace.as_bytes());
        let owner_hash = keccak256(owner.as_bytes());

        let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
        preimage.push(0xff);
        preimage.extend_from_slice(self.factory.as_bytes());
        preimage.extend_from_slice(salt.as_bytes());
        preimage.extend_from_slice(owner_hash.as_bytes());

        let digest = keccak256(&preimage);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[12..]);
        Ok(Address(out))
    }
}

/// Idempotent check-and-deploy for counterfactual accounts.
pub struct DeploymentGate<'a> {
    reader: &'a dyn ChainReader,
}

impl<'a> DeploymentGate<'a> {
    pub fn new(reader: &'a dyn ChainReader) -> Self {
        Self { reader }
    }

    /// Ensure the account has code on-chain, deploying via a no-op
    /// sponsored operation if needed. Returns whether a deployment was
    /// performed.
    ///
    /// The check-then-act is not atomic against external deployers, so the
    /// code presence is re-checked immediately before submitting; a second
    /// call on an already-deployed address performs no on-chain action.
    pub async fn ensure_deployed(
        &self,
        account: &mut SmartAccountRef,
        runner: &SponsoredOperationRunner<'_>,
    ) -> Result<bool> {
        if self.has_code(account.address).await? {
            tracing::debug!(address = %account.address, "account already deployed");
            account.mark_deployed();
            return Ok(false);
        }

        let nonce = runner.next_nonce(account.address).await?;

        // Re-check right before submitting: another actor may have deployed
        // the same address while the nonce read was in flight.
        if self.has_code(account.address).await? {
            account.mark_deployed();
            return Ok(false);
        }

        tracing::info!(address = %account.address, "deploying counterfactual account");
        let receipt = runner
            .run(account.address, &[Call::noop()], nonce)
            .await?;
        tracing::info!(
            address = %account.address,
            tx = %receipt.transaction_hash,
            "account deployed"
        );

        account.mark_deployed();
        Ok(true)
    }

    async fn has_code(&self, address: Address) -> Result<bool> {
        let code = self.reader.get_code(address).await?;
        Ok(!code.is_empty())
    }
}

//! Scoped delegations: construction, canonical hashing, signing.
//!
//! A delegation authorizes one delegate account to invoke an explicit
//! allow-list of (target, selector) pairs on behalf of a delegator account.
//! The allow-lists are independent: a call is authorized when its target is
//! in `targets` AND its selector is in `selectors` (cross-product, not
//! pairwise). The signed form binds the delegator's owner key to a
//! canonical EIP-712-equivalent encoding; the byte layout is versioned
//! through the typed-data domain, so a consumer-side shape change fails
//! signature verification instead of miscomputing.

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::DelegationError;
use crate::primitives::{
    Address, B256, Bytes, Selector, keccak256, word_from_address, word_from_selector,
};
use crate::signer::{Signer, recover_address};

/// Authority hash marking a root delegation (not re-delegated).
pub const ROOT_AUTHORITY: B256 = B256([0xff; 32]);

/// Canonical ERC-1271 validation signature, appended to the scope when the
/// delegate must be able to prove signatures against the delegator.
pub const ERC1271_SIGNATURE: &str = "isValidSignature(bytes32,bytes)";

/// An additional machine-checkable restriction beyond the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caveat {
    pub enforcer: Address,
    pub terms: Bytes,
}

/// A scoped authorization, inert until signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationScope {
    pub delegator: Address,
    pub delegate: Address,
    /// Sorted, deduplicated target allow-list.
    pub targets: Vec<Address>,
    /// Sorted, deduplicated selector allow-list.
    pub selectors: Vec<Selector>,
    pub caveats: Vec<Caveat>,
}

impl DelegationScope {
    /// Cross-product membership check.
    pub fn allows(&self, target: Address, selector: Selector) -> bool {
        self.targets.binary_search(&target).is_ok()
            && self.selectors.binary_search(&selector).is_ok()
    }
}

/// Builds a [`DelegationScope`] from canonical function signatures.
///
/// Every function the delegate will ever call through the delegation must
/// be allowed up front; selectors are derived by hashing the canonical
/// signature, never pasted in from ABI fragments.
#[derive(Debug, Clone)]
pub struct DelegationBuilder {
    delegator: Address,
    delegate: Address,
    targets: Vec<Address>,
    selectors: Vec<Selector>,
    caveats: Vec<Caveat>,
}

impl DelegationBuilder {
    pub fn new(delegator: Address, delegate: Address) -> Self {
        Self {
            delegator,
            delegate,
            targets: Vec::new(),
            selectors: Vec::new(),
            caveats: Vec::new(),
        }
    }

    /// Allow calls to `target` with the selector of `signature`.
    pub fn allow_call(mut self, target: Address, signature: &str) -> Self {
        self.targets.push(target);
        self.selectors.push(Selector::from_signature(signature));
        self
    }

    /// Allow ERC-1271 signature validation against the delegator itself.
    pub fn allow_erc1271(self) -> Self {
        let delegator = self.delegator;
        self.allow_call(delegator, ERC1271_SIGNATURE)
    }

    pub fn with_caveat(mut self, caveat: Caveat) -> Self {
        self.caveats.push(caveat);
        self
    }

    /// Validate and freeze the scope. Missing delegator, delegate, or an
    /// empty allow-list are fatal input errors.
    pub fn build(mut self) -> Result<DelegationScope, DelegationError> {
        if self.delegator.is_zero() {
            return Err(DelegationError::MissingField("delegator"));
        }
        if self.delegate.is_zero() {
            return Err(DelegationError::MissingField("delegate"));
        }
        if self.targets.is_empty() || self.selectors.is_empty() {
            return Err(DelegationError::EmptyScope);
        }

        self.targets.sort();
        self.targets.dedup();
        self.selectors.sort();
        self.selectors.dedup();

        Ok(DelegationScope {
            delegator: self.delegator,
            delegate: self.delegate,
            targets: self.targets,
            selectors: self.selectors,
            caveats: self.caveats,
        })
    }
}

/// Typed-data domain binding a delegation to one chain and one delegation
/// manager contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationDomain {
    pub chain_id: u64,
    pub verifying_contract: Address,
}

const DOMAIN_NAME: &str = "SessionDelegation";
const DOMAIN_VERSION: &str = "1";

impl DelegationDomain {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            chain_id,
            verifying_contract,
        }
    }

    fn separator(&self) -> B256 {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );
        let mut preimage = Vec::with_capacity(5 * 32);
        preimage.extend_from_slice(type_hash.as_bytes());
        preimage.extend_from_slice(keccak256(DOMAIN_NAME.as_bytes()).as_bytes());
        preimage.extend_from_slice(keccak256(DOMAIN_VERSION.as_bytes()).as_bytes());
        preimage.extend_from_slice(&u64_word(self.chain_id));
        preimage.extend_from_slice(&word_from_address(self.verifying_contract));
        keccak256(&preimage)
    }

    /// The digest the delegator's owner key signs.
    pub fn digest(&self, scope: &DelegationScope, authority: B256, salt: B256) -> B256 {
        let type_hash = keccak256(
            b"Delegation(address delegator,address delegate,bytes32 authority,bytes32 scopeHash,bytes32 caveatsHash,bytes32 salt)",
        );
        let mut preimage = Vec::with_capacity(7 * 32);
        preimage.extend_from_slice(type_hash.as_bytes());
        preimage.extend_from_slice(&word_from_address(scope.delegator));
        preimage.extend_from_slice(&word_from_address(scope.delegate));
        preimage.extend_from_slice(authority.as_bytes());
        preimage.extend_from_slice(scope_hash(scope).as_bytes());
        preimage.extend_from_slice(caveats_hash(&scope.caveats).as_bytes());
        preimage.extend_from_slice(salt.as_bytes());
        let struct_hash = keccak256(&preimage);

        let mut outer = Vec::with_capacity(2 + 2 * 32);
        outer.extend_from_slice(&[0x19, 0x01]);
        outer.extend_from_slice(self.separator().as_bytes());
        outer.extend_from_slice(struct_hash.as_bytes());
        keccak256(&outer)
    }
}

fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn scope_hash(scope: &DelegationScope) -> B256 {
    let mut targets = Vec::with_capacity(scope.targets.len() * 32);
    for target in &scope.targets {
        targets.extend_from_slice(&word_from_address(*target));
    }
    let mut selectors = Vec::with_capacity(scope.selectors.len() * 32);
    for selector in &scope.selectors {
        selectors.extend_from_slice(&word_from_selector(*selector));
    }

    let mut preimage = Vec::with_capacity(2 * 32);
    preimage.extend_from_slice(keccak256(&targets).as_bytes());
    preimage.extend_from_slice(keccak256(&selectors).as_bytes());
    keccak256(&preimage)
}

fn caveats_hash(caveats: &[Caveat]) -> B256 {
    let mut preimage = Vec::with_capacity(caveats.len() * 32);
    for caveat in caveats {
        let mut inner = Vec::with_capacity(2 * 32);
        inner.extend_from_slice(&word_from_address(caveat.enforcer));
        inner.extend_from_slice(keccak256(caveat.terms.as_slice()).as_bytes());
        preimage.extend_from_slice(keccak256(&inner).as_bytes());
    }
    keccak256(&preimage)
}

/// A scope plus the signature binding the delegator to it. Immutable once
/// created; this is the artifact downstream redemption consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDelegation {
    pub scope: DelegationScope,
    pub authority: B256,
    pub salt: B256,
    pub signature: Bytes,
}

impl SignedDelegation {
    /// Recompute the canonical digest and recover the signer address.
    pub fn recover_signer(&self, domain: &DelegationDomain) -> Result<Address, DelegationError> {
        let digest = domain.digest(&self.scope, self.authority, self.salt);
        recover_address(digest, self.signature.as_slice())
    }

    /// Check the stored signature against an expected owner address.
    pub fn verify(
        &self,
        domain: &DelegationDomain,
        expected_owner: Address,
    ) -> Result<(), DelegationError> {
        let recovered = self.recover_signer(domain)?;
        if recovered != expected_owner {
            return Err(DelegationError::SignerMismatch {
                expected: expected_owner,
                recovered,
            });
        }
        Ok(())
    }
}

/// Signs delegation scopes with the delegator account's owner key.
#[derive(Debug, Clone, Copy)]
pub struct DelegationSigner {
    domain: DelegationDomain,
}

impl DelegationSigner {
    pub fn new(domain: DelegationDomain) -> Self {
        Self { domain }
    }

    /// Sign the scope and self-verify by recovery before trusting the
    /// result. Signing is off-chain; the delegator account does not need
    /// to be deployed.
    pub async fn sign(
        &self,
        scope: DelegationScope,
        signer: &dyn Signer,
    ) -> Result<SignedDelegation, DelegationError> {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        let salt = B256(salt);

        let digest = self.domain.digest(&scope, ROOT_AUTHORITY, salt);
        let signature = signer.sign_digest(digest).await?;

        let recovered = recover_address(digest, signature.as_slice())?;
        if recovered != signer.address() {
            return Err(DelegationError::SignerMismatch {
                expected: signer.address(),
                recovered,
            });
        }

        tracing::info!(
            delegator = %scope.delegator,
            delegate = %scope.delegate,
            targets = scope.targets.len(),
            selectors = scope.selectors.len(),
            "signed delegation"
        );
        Ok(SignedDelegation {
            scope,
            authority: ROOT_AUTHORITY,
            salt,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalKeySigner;

    fn addr(last: u8) -> Address {
        let mut out = [0u8; 20];
        out[19] = last;
        Address(out)
    }

    fn scope() -> DelegationScope {
        DelegationBuilder::new(addr(1), addr(2))
            .allow_call(addr(3), "submitValidationResponse(bytes32,uint8,bytes)")
            .allow_call(addr(3), "getValidationStatus(bytes32)")
            .allow_erc1271()
            .build()
            .expect("builds")
    }

    #[test]
    fn scope_is_a_cross_product() {
        let scope = scope();
        let respond = Selector::from_signature("submitValidationResponse(bytes32,uint8,bytes)");
        let sanity = Selector::from_signature("getValidationStatus(bytes32)");

        // Both selectors are allowed on both targets, even though each was
        // registered against only one of them.
        assert!(scope.allows(addr(3), respond));
        assert!(scope.allows(addr(3), sanity));
        assert!(scope.allows(addr(1), respond));

        assert!(!scope.allows(addr(9), respond));
        assert!(!scope.allows(addr(3), Selector::from_signature("transfer(address,uint256)")));
    }

    #[test]
    fn erc1271_adds_the_delegator_target() {
        let scope = scope();
        assert!(scope.targets.contains(&addr(1)));
        assert!(
            scope
                .selectors
                .contains(&Selector::from_signature(ERC1271_SIGNATURE))
        );
    }

    #[test]
    fn builder_rejects_missing_fields() {
        assert!(matches!(
            DelegationBuilder::new(Address::ZERO, addr(2))
                .allow_call(addr(3), "f()")
                .build(),
            Err(DelegationError::MissingField("delegator"))
        ));
        assert!(matches!(
            DelegationBuilder::new(addr(1), Address::ZERO)
                .allow_call(addr(3), "f()")
                .build(),
            Err(DelegationError::MissingField("delegate"))
        ));
        assert!(matches!(
            DelegationBuilder::new(addr(1), addr(2)).build(),
            Err(DelegationError::EmptyScope)
        ));
    }

    #[test]
    fn digest_is_deterministic_and_input_sensitive() {
        let domain = DelegationDomain::new(84532, addr(7));
        let salt = B256::repeat(0x11);

        let a = domain.digest(&scope(), ROOT_AUTHORITY, salt);
        let b = domain.digest(&scope(), ROOT_AUTHORITY, salt);
        assert_eq!(a, b);

        let other_salt = domain.digest(&scope(), ROOT_AUTHORITY, B256::repeat(0x22));
        assert_ne!(a, other_salt);

        let other_domain = DelegationDomain::new(1, addr(7));
        assert_ne!(a, other_domain.digest(&scope(), ROOT_AUTHORITY, salt));
    }

    #[tokio::test]
    async fn sign_produces_a_verifiable_delegation() {
        let signer = LocalKeySigner::random();
        let domain = DelegationDomain::new(84532, addr(7));

        let signed = DelegationSigner::new(domain)
            .sign(scope(), &signer)
            .await
            .expect("signs");

        assert_eq!(signed.authority, ROOT_AUTHORITY);
        signed.verify(&domain, signer.address()).expect("verifies");

        let stranger = LocalKeySigner::random();
        assert!(matches!(
            signed.verify(&domain, stranger.address()),
            Err(DelegationError::SignerMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn verification_fails_under_a_different_domain() {
        let signer = LocalKeySigner::random();
        let domain = DelegationDomain::new(84532, addr(7));
        let signed = DelegationSigner::new(domain)
            .sign(scope(), &signer)
            .await
            .expect("signs");

        let other = DelegationDomain::new(84532, addr(8));
        assert!(signed.verify(&other, signer.address()).is_err());
    }

    #[test]
    fn signed_delegation_round_trips_through_json() {
        let signed = SignedDelegation {
            scope: scope(),
            authority: ROOT_AUTHORITY,
            salt: B256::repeat(0x33),
            signature: Bytes(vec![0xab; 65]),
        };
        let encoded = serde_json::to_string(&signed).expect("serializes");
        let decoded: SignedDelegation = serde_json::from_str(&encoded).expect("deserializes");
        assert_eq!(decoded, signed);
    }
}

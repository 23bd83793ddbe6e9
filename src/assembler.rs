//! End-to-end session package assembly.
//!
//! One forward-only pipeline: derive and deploy the agent account, mint a
//! session key and deploy its account, build and sign the delegation,
//! prove it redeemable with a self-test, optionally register the session
//! as the agent's operator, and emit the portable [`SessionPackage`].
//! There is no rollback; every sub-operation is idempotent and
//! independently re-driveable, so a failed build is resumed by re-running
//! it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::{AddressDeriver, DeploymentGate, SmartAccountRef};
use crate::chain::ChainReader;
use crate::config::ChainProfile;
use crate::delegation::{
    DelegationBuilder, DelegationDomain, DelegationSigner, SignedDelegation,
};
use crate::error::{AssemblyError, DelegationError, Error, RelayError, Result};
use crate::primitives::{Address, Selector, word_from_address};
use crate::redeem::{RedemptionEncoder, encode_simple_call};
use crate::relay::{Call, Relay};
use crate::runner::SponsoredOperationRunner;
use crate::session::{SessionKey, SessionKeyFactory};
use crate::signer::Signer;

/// Canonical signature of the registry's operator approval call.
const APPROVE_OPERATOR_SIGNATURE: &str = "approveOperator(address)";

/// Pipeline states, in execution order. Reported on failure so callers can
/// decide resume-vs-discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Init,
    AgentDeployed,
    SessionCreated,
    SessionDeployed,
    Delegated,
    SelfTested,
    OperatorApproved,
    Assembled,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::AgentDeployed => "agent_deployed",
            Self::SessionCreated => "session_created",
            Self::SessionDeployed => "session_deployed",
            Self::Delegated => "delegated",
            Self::SelfTested => "self_tested",
            Self::OperatorApproved => "operator_approved",
            Self::Assembled => "assembled",
        };
        f.write_str(name)
    }
}

/// The durable artifact of a successful assembly.
///
/// A capability token: anyone holding it can redeem the delegation within
/// its validity window. Never mutated; a changed scope requires a new
/// package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPackage {
    pub agent_id: u64,
    pub chain_id: u64,
    pub agent_account_address: Address,
    pub session_account_address: Address,
    pub allowed_selector: Selector,
    pub session_key: SessionKey,
    pub entry_point: Address,
    pub relay_url: String,
    pub signed_delegation: SignedDelegation,
}

impl SessionPackage {
    pub fn is_expired(&self, now: u64) -> bool {
        self.session_key.is_expired(now)
    }

    /// Re-verify the stored delegation signature against the agent owner,
    /// so a deserialized package is validated before use.
    pub fn verify(
        &self,
        delegation_manager: Address,
        expected_owner: Address,
    ) -> std::result::Result<(), DelegationError> {
        let domain = DelegationDomain::new(self.chain_id, delegation_manager);
        self.signed_delegation.verify(&domain, expected_owner)
    }
}

/// Orchestrates components into one sequential assembly flow.
///
/// All collaborators are constructor-injected; the assembler owns no
/// global state and performs no persistence. Independent builds may run
/// concurrently, but a single sender's nonce sequence must never be shared
/// across builds.
pub struct SessionPackageAssembler<'a> {
    profile: &'a ChainProfile,
    reader: &'a dyn ChainReader,
    relay: &'a dyn Relay,
    signer: &'a dyn Signer,
}

impl<'a> SessionPackageAssembler<'a> {
    pub fn new(
        profile: &'a ChainProfile,
        reader: &'a dyn ChainReader,
        relay: &'a dyn Relay,
        signer: &'a dyn Signer,
    ) -> Self {
        Self {
            profile,
            reader,
            relay,
            signer,
        }
    }

    /// Drive the full pipeline for one agent and emit its package.
    pub async fn assemble(&self, agent_id: u64, agent_name: &str) -> Result<SessionPackage> {
        let profile = self.profile;
        let runner = SponsoredOperationRunner::new(
            self.relay,
            self.reader,
            profile.entry_point,
            profile.receipt_timeout,
        );
        let gate = DeploymentGate::new(self.reader);
        let deriver = AddressDeriver::new(profile.account_factory);

        let mut state = BuildState::Init;
        tracing::info!(agent_id, agent_name, "assembling session package");

        // Agent account: derive, then make sure it exists on-chain.
        let owner = self.signer.address();
        let agent_address = deriver
            .derive(owner, agent_name)
            .map_err(|e| halt(state, e))?;
        let mut agent_account = SmartAccountRef::counterfactual(agent_address, owner);
        gate.ensure_deployed(&mut agent_account, &runner)
            .await
            .map_err(|e| halt(state, e))?;
        state = advance(state, BuildState::AgentDeployed);

        // Fresh session key and its counterfactual account.
        let factory = SessionKeyFactory::new(
            deriver,
            profile.session_window.as_secs(),
            profile.session_skew.as_secs(),
        );
        let (session_key, mut session_account) =
            factory.create_session().map_err(|e| halt(state, e))?;
        state = advance(state, BuildState::SessionCreated);

        gate.ensure_deployed(&mut session_account, &runner)
            .await
            .map_err(|e| halt(state, e))?;
        state = advance(state, BuildState::SessionDeployed);

        // Scope and sign: business call, sanity read, ERC-1271 on the
        // delegator. The full allow-list is decided here, up front.
        let scope = DelegationBuilder::new(agent_account.address, session_account.address)
            .allow_call(profile.validation_registry, &profile.response_signature)
            .allow_call(profile.validation_registry, &profile.sanity_signature)
            .allow_erc1271()
            .build()
            .map_err(|e| halt(state, e))?;
        let domain = DelegationDomain::new(profile.chain_id, profile.delegation_manager);
        let signed_delegation = DelegationSigner::new(domain)
            .sign(scope, self.signer)
            .await
            .map_err(|e| halt(state, e))?;
        state = advance(state, BuildState::Delegated);

        // Mandatory self-test: redeem the delegation against the sanity
        // read, executed as the session account. A package that cannot be
        // redeemed is worse than no package.
        self.self_test(&runner, &signed_delegation, &session_key, session_account.address)
            .await
            .map_err(|e| halt(state, e))?;
        state = advance(state, BuildState::SelfTested);

        if profile.approve_operator {
            self.approve_operator(&runner, agent_account.address, session_account.address)
                .await
                .map_err(|e| halt(state, e))?;
            state = advance(state, BuildState::OperatorApproved);
        }

        let package = SessionPackage {
            agent_id,
            chain_id: profile.chain_id,
            agent_account_address: agent_account.address,
            session_account_address: session_account.address,
            allowed_selector: Selector::from_signature(&profile.response_signature),
            session_key,
            entry_point: profile.entry_point,
            relay_url: profile.relay_url.to_string(),
            signed_delegation,
        };
        state = advance(state, BuildState::Assembled);
        tracing::info!(agent_id, state = %state, "session package assembled");
        Ok(package)
    }

    async fn self_test(
        &self,
        runner: &SponsoredOperationRunner<'_>,
        delegation: &SignedDelegation,
        session_key: &SessionKey,
        session_address: Address,
    ) -> Result<()> {
        let sanity_data = encode_simple_call(
            &self.profile.sanity_signature,
            &zero_args(&self.profile.sanity_signature),
        );
        let sanity_call = Call {
            to: self.profile.validation_registry,
            value: 0,
            data: sanity_data,
        };
        let redemption = RedemptionEncoder::new().encode(delegation, session_key, &[sanity_call])?;

        let redeem_call = Call {
            to: self.profile.delegation_manager,
            value: 0,
            data: redemption,
        };
        let nonce = runner.next_nonce(session_address).await?;
        match runner.run(session_address, &[redeem_call], nonce).await {
            Ok(receipt) => {
                tracing::info!(tx = %receipt.transaction_hash, "self-test redemption confirmed");
                Ok(())
            }
            // Nonce and pending-deployment races do not invalidate the
            // delegation; the eventual state is still correct once the
            // race resolves. Anything else, timeouts and transport
            // failures included, leaves the package without redemption
            // evidence and must not be swallowed.
            Err(Error::Relay(RelayError::Rejected { reason, message }))
                if reason.is_transient() =>
            {
                tracing::warn!(%message, ?reason, "self-test hit a redemption race, continuing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn approve_operator(
        &self,
        runner: &SponsoredOperationRunner<'_>,
        agent_address: Address,
        session_address: Address,
    ) -> Result<()> {
        let data = encode_simple_call(
            APPROVE_OPERATOR_SIGNATURE,
            &[word_from_address(session_address)],
        );
        let approve_call = Call {
            to: self.profile.validation_registry,
            value: 0,
            data,
        };

        // Read back the agent's nonce after the earlier operations rather
        // than reusing a value fetched before they confirmed.
        let nonce = runner.next_nonce(agent_address).await?;
        let receipt = runner.run(agent_address, &[approve_call], nonce).await?;
        tracing::info!(
            operator = %session_address,
            tx = %receipt.transaction_hash,
            "session approved as operator"
        );
        Ok(())
    }
}

fn halt(state: BuildState, source: impl Into<Error>) -> Error {
    AssemblyError::halted(state, source).into()
}

fn advance(from: BuildState, to: BuildState) -> BuildState {
    debug_assert!(from < to, "pipeline is forward-only");
    tracing::info!(state = %to, "pipeline advanced");
    to
}

/// One zero word per parameter of a canonical signature, for probe calls.
fn zero_args(signature: &str) -> Vec<[u8; 32]> {
    let params = signature
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .unwrap_or("");
    if params.is_empty() {
        Vec::new()
    } else {
        vec![[0u8; 32]; params.split(',').count()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{DelegationBuilder, ROOT_AUTHORITY};
    use crate::primitives::{B256, Bytes};

    fn addr(last: u8) -> Address {
        let mut out = [0u8; 20];
        out[19] = last;
        Address(out)
    }

    fn package() -> SessionPackage {
        let scope = DelegationBuilder::new(addr(1), addr(2))
            .allow_call(addr(3), "getValidationStatus(bytes32)")
            .build()
            .expect("builds");
        SessionPackage {
            agent_id: 7,
            chain_id: 84532,
            agent_account_address: addr(1),
            session_account_address: addr(2),
            allowed_selector: Selector::from_signature(
                "submitValidationResponse(bytes32,uint8,bytes)",
            ),
            session_key: SessionKey {
                private_key: format!("0x{}", "11".repeat(32)),
                public_address: addr(9),
                valid_after: 1_000,
                valid_until: 2_000,
            },
            entry_point: addr(4),
            relay_url: "https://bundler.example.org/rpc".to_string(),
            signed_delegation: SignedDelegation {
                scope,
                authority: ROOT_AUTHORITY,
                salt: B256::repeat(0x55),
                signature: Bytes(vec![0xab; 65]),
            },
        }
    }

    #[test]
    fn build_states_are_ordered_and_snake_cased() {
        assert!(BuildState::Init < BuildState::AgentDeployed);
        assert!(BuildState::OperatorApproved < BuildState::Assembled);
        assert_eq!(BuildState::SessionDeployed.to_string(), "session_deployed");
        assert_eq!(
            serde_json::to_string(&BuildState::SelfTested).expect("serializes"),
            "\"self_tested\""
        );
    }

    #[test]
    fn package_round_trips_through_json() {
        let package = package();
        let encoded = serde_json::to_string_pretty(&package).expect("serializes");
        let decoded: SessionPackage = serde_json::from_str(&encoded).expect("deserializes");
        assert_eq!(decoded, package);

        // Persisted field names are the de facto file format.
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");
        assert!(value.get("agentAccountAddress").is_some());
        assert!(value.get("sessionKey").is_some());
        assert!(value["sessionKey"].get("validUntil").is_some());
        assert!(value.get("signedDelegation").is_some());
    }

    #[test]
    fn package_expiry_follows_the_session_key() {
        let package = package();
        assert!(!package.is_expired(1_500));
        assert!(package.is_expired(2_000));
    }

    #[test]
    fn zero_args_counts_parameters() {
        assert_eq!(zero_args("owner()").len(), 0);
        assert_eq!(zero_args("getValidationStatus(bytes32)").len(), 1);
        assert_eq!(
            zero_args("submitValidationResponse(bytes32,uint8,bytes)").len(),
            3
        );
    }
}

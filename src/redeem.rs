//! Redemption encoding: the on-chain proof that a call is authorized.
//!
//! The encoder produces the calldata the delegate (session) account sends
//! to the delegation manager: the signed delegation plus the intended
//! sub-calls. Scope and validity-window checks run client-side, before
//! anything touches the network, so an unauthorized or expired redemption
//! never reaches the relay.

use chrono::Utc;

use crate::delegation::SignedDelegation;
use crate::error::DelegationError;
use crate::primitives::{
    Bytes, Selector, word_from_address, word_from_selector, word_from_u128,
};
use crate::relay::Call;
use crate::session::SessionKey;

/// Canonical signature of the delegation manager's redemption entry point.
pub const REDEEM_SIGNATURE: &str = "redeemDelegations(bytes,bytes32,bytes)";

/// Execution mode word for a single sub-call.
const EXEC_MODE_SINGLE: [u8; 32] = [0u8; 32];

/// Execution mode word for a batch of sub-calls (first byte 0x01).
const EXEC_MODE_BATCH: [u8; 32] = {
    let mut word = [0u8; 32];
    word[0] = 0x01;
    word
};

/// Encodes redemption calldata for a signed delegation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedemptionEncoder;

impl RedemptionEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a redemption of `delegation` executing `calls`, redeemed by
    /// the session holding `session_key`.
    pub fn encode(
        &self,
        delegation: &SignedDelegation,
        session_key: &SessionKey,
        calls: &[Call],
    ) -> Result<Bytes, DelegationError> {
        self.encode_at(delegation, session_key, calls, Utc::now().timestamp() as u64)
    }

    /// Same as [`encode`](Self::encode) with an explicit clock, the actual
    /// enforcement point for the validity window.
    pub fn encode_at(
        &self,
        delegation: &SignedDelegation,
        session_key: &SessionKey,
        calls: &[Call],
        now: u64,
    ) -> Result<Bytes, DelegationError> {
        session_key.ensure_active(now)?;

        if calls.is_empty() {
            return Err(DelegationError::EmptyScope);
        }
        for call in calls {
            let selector = Selector::from_calldata(call.data.as_slice())
                .ok_or(DelegationError::MissingSelector)?;
            if !delegation.scope.allows(call.to, selector) {
                return Err(DelegationError::ScopeViolation {
                    target: call.to,
                    selector,
                });
            }
        }

        let context = permission_context(delegation);
        let executions = encode_executions(calls);
        let mode = if calls.len() > 1 {
            EXEC_MODE_BATCH
        } else {
            EXEC_MODE_SINGLE
        };

        Ok(encode_redeem_call(&context, mode, &executions))
    }
}

/// Serialize the signed delegation into the opaque context the delegation
/// manager consumes: identities, authority, salt, the length-prefixed
/// allow-lists and caveats, then the signature. Every input to the signed
/// digest travels in the payload, so the consumer can recompute the digest
/// and enforce the allow-list without out-of-band data. The layout is
/// versioned through the typed-data domain: a shape change on the consumer
/// side alters the domain hash and fails signature verification loudly
/// rather than miscomputing.
fn permission_context(delegation: &SignedDelegation) -> Vec<u8> {
    let scope = &delegation.scope;
    let mut out = Vec::new();
    out.extend_from_slice(scope.delegator.as_bytes());
    out.extend_from_slice(scope.delegate.as_bytes());
    out.extend_from_slice(delegation.authority.as_bytes());
    out.extend_from_slice(delegation.salt.as_bytes());

    out.extend_from_slice(&word_from_u128(scope.targets.len() as u128));
    for target in &scope.targets {
        out.extend_from_slice(&word_from_address(*target));
    }
    out.extend_from_slice(&word_from_u128(scope.selectors.len() as u128));
    for selector in &scope.selectors {
        out.extend_from_slice(&word_from_selector(*selector));
    }
    out.extend_from_slice(&word_from_u128(scope.caveats.len() as u128));
    for caveat in &scope.caveats {
        out.extend_from_slice(&word_from_address(caveat.enforcer));
        out.extend_from_slice(&word_from_u128(caveat.terms.len() as u128));
        out.extend_from_slice(caveat.terms.as_slice());
    }

    out.extend_from_slice(delegation.signature.as_slice());
    out
}

/// Pack the intended sub-calls: `to(20) ‖ value(32) ‖ len(32) ‖ data` each.
fn encode_executions(calls: &[Call]) -> Vec<u8> {
    let mut out = Vec::new();
    for call in calls {
        out.extend_from_slice(call.to.as_bytes());
        out.extend_from_slice(&word_from_u128(call.value));
        out.extend_from_slice(&word_from_u128(call.data.len() as u128));
        out.extend_from_slice(call.data.as_slice());
    }
    out
}

/// Outer ABI frame: `redeemDelegations(bytes,bytes32,bytes)`.
fn encode_redeem_call(context: &[u8], mode: [u8; 32], executions: &[u8]) -> Bytes {
    let selector = Selector::from_signature(REDEEM_SIGNATURE);

    let context_offset = 3 * 32;
    let executions_offset = context_offset + 32 + padded_len(context.len());

    let mut out = Vec::new();
    out.extend_from_slice(&selector.0);
    out.extend_from_slice(&word_from_u128(context_offset as u128));
    out.extend_from_slice(&mode);
    out.extend_from_slice(&word_from_u128(executions_offset as u128));

    out.extend_from_slice(&word_from_u128(context.len() as u128));
    out.extend_from_slice(context);
    out.resize(out.len() + pad_amount(context.len()), 0);

    out.extend_from_slice(&word_from_u128(executions.len() as u128));
    out.extend_from_slice(executions);
    out.resize(out.len() + pad_amount(executions.len()), 0);

    Bytes(out)
}

fn padded_len(len: usize) -> usize {
    len + pad_amount(len)
}

fn pad_amount(len: usize) -> usize {
    (32 - len % 32) % 32
}

/// ABI-encode a call with static 32-byte-word arguments only.
pub fn encode_simple_call(signature: &str, args: &[[u8; 32]]) -> Bytes {
    let selector = Selector::from_signature(signature);
    let mut out = Vec::with_capacity(4 + args.len() * 32);
    out.extend_from_slice(&selector.0);
    for arg in args {
        out.extend_from_slice(arg);
    }
    Bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{Caveat, DelegationBuilder, ROOT_AUTHORITY, SignedDelegation};
    use crate::primitives::{Address, B256};

    fn addr(last: u8) -> Address {
        let mut out = [0u8; 20];
        out[19] = last;
        Address(out)
    }

    fn delegation() -> SignedDelegation {
        let scope = DelegationBuilder::new(addr(1), addr(2))
            .allow_call(addr(3), "getValidationStatus(bytes32)")
            .build()
            .expect("builds");
        SignedDelegation {
            scope,
            authority: ROOT_AUTHORITY,
            salt: B256::repeat(0x44),
            signature: Bytes(vec![0xcd; 65]),
        }
    }

    fn active_key() -> SessionKey {
        SessionKey {
            private_key: format!("0x{}", "11".repeat(32)),
            public_address: addr(9),
            valid_after: 1_000,
            valid_until: 2_000,
        }
    }

    fn sanity_call() -> Call {
        Call {
            to: addr(3),
            value: 0,
            data: encode_simple_call("getValidationStatus(bytes32)", &[[0u8; 32]]),
        }
    }

    #[test]
    fn encodes_an_in_scope_call() {
        let encoded = RedemptionEncoder::new()
            .encode_at(&delegation(), &active_key(), &[sanity_call()], 1_500)
            .expect("encodes");

        assert_eq!(
            Selector::from_calldata(encoded.as_slice()),
            Some(Selector::from_signature(REDEEM_SIGNATURE))
        );
        // Single call uses the single execution mode word.
        assert!(encoded.as_slice()[4 + 32..4 + 64].iter().all(|b| *b == 0));
        // Word-aligned payload after the selector.
        assert!((encoded.len() - 4).is_multiple_of(32));
    }

    #[test]
    fn rejects_out_of_scope_target_and_selector() {
        let encoder = RedemptionEncoder::new();

        let wrong_target = Call {
            to: addr(8),
            ..sanity_call()
        };
        assert!(matches!(
            encoder.encode_at(&delegation(), &active_key(), &[wrong_target], 1_500),
            Err(DelegationError::ScopeViolation { .. })
        ));

        let wrong_selector = Call {
            to: addr(3),
            value: 0,
            data: encode_simple_call("transfer(address,uint256)", &[[0u8; 32]]),
        };
        assert!(matches!(
            encoder.encode_at(&delegation(), &active_key(), &[wrong_selector], 1_500),
            Err(DelegationError::ScopeViolation { .. })
        ));
    }

    #[test]
    fn rejects_expired_and_not_yet_valid_keys_before_encoding() {
        let encoder = RedemptionEncoder::new();
        assert!(matches!(
            encoder.encode_at(&delegation(), &active_key(), &[sanity_call()], 2_000),
            Err(DelegationError::Expired { .. })
        ));
        assert!(matches!(
            encoder.encode_at(&delegation(), &active_key(), &[sanity_call()], 500),
            Err(DelegationError::NotYetValid { .. })
        ));
    }

    #[test]
    fn rejects_selectorless_calldata() {
        let call = Call {
            to: addr(3),
            value: 0,
            data: Bytes(vec![0x01, 0x02]),
        };
        assert!(matches!(
            RedemptionEncoder::new().encode_at(&delegation(), &active_key(), &[call], 1_500),
            Err(DelegationError::MissingSelector)
        ));
    }

    #[test]
    fn redemption_context_carries_the_full_scope() {
        let scope = DelegationBuilder::new(addr(1), addr(2))
            .allow_call(addr(3), "getValidationStatus(bytes32)")
            .with_caveat(Caveat {
                enforcer: addr(6),
                terms: Bytes(vec![0x11, 0x22]),
            })
            .build()
            .expect("builds");
        let delegation = SignedDelegation {
            scope,
            authority: ROOT_AUTHORITY,
            salt: B256::repeat(0x44),
            signature: Bytes(vec![0xcd; 65]),
        };

        let encoded = RedemptionEncoder::new()
            .encode_at(&delegation, &active_key(), &[sanity_call()], 1_500)
            .expect("encodes");
        let payload = encoded.as_slice();

        fn contains(haystack: &[u8], needle: &[u8]) -> bool {
            haystack.windows(needle.len()).any(|window| window == needle)
        }

        // Everything hashed into the signed digest travels in the payload:
        // the allow-lists, the caveats, and the signature itself.
        assert!(contains(payload, &word_from_address(addr(3))));
        assert!(contains(
            payload,
            &word_from_selector(Selector::from_signature("getValidationStatus(bytes32)"))
        ));
        assert!(contains(payload, &word_from_address(addr(6))));
        assert!(contains(payload, delegation.signature.as_slice()));
    }

    #[test]
    fn batch_redemptions_use_the_batch_mode_word() {
        let calls = [sanity_call(), sanity_call()];
        let encoded = RedemptionEncoder::new()
            .encode_at(&delegation(), &active_key(), &calls, 1_500)
            .expect("encodes");
        assert_eq!(encoded.as_slice()[4 + 32], 0x01);
    }
}

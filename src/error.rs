//! Error types for sessionkit.
//!
//! Every failure carries an explicit transient-vs-fatal classification via
//! [`Error::is_transient`]: transient errors are safe to retry with the same
//! input, fatal ones indicate a malformed operation or bad configuration.
//! Classification is decided once, at the boundary that observed the
//! failure, and carried on the value from then on.

use std::time::Duration;

use crate::assembler::BuildState;
use crate::primitives::{Address, Selector};

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Delegation error: {0}")]
    Delegation(#[from] DelegationError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),
}

impl Error {
    /// Whether retrying the same call can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Config(_) | Self::Account(_) | Self::Delegation(_) => false,
            Self::Chain(err) => err.is_transient(),
            Self::Relay(err) => err.is_transient(),
            Self::Assembly(AssemblyError::Halted { source, .. }) => source.is_transient(),
        }
    }
}

/// Configuration-related errors. Always fatal; raised before any network
/// call is attempted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Account derivation input errors. Fatal; never retried.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Namespace string must not be empty")]
    EmptyNamespace,

    #[error("Owner address must not be the zero address")]
    ZeroOwner,
}

/// Chain read errors (JSON-RPC node).
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC call {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed RPC response for {method}: {message}")]
    MalformedResponse { method: String, message: String },
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        // Node reads are idempotent; transport failures are worth retrying,
        // malformed payloads and call reverts are not.
        matches!(self, Self::Http(_))
    }
}

/// Why a relay refused an operation. Structured so callers never have to
/// string-match on error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The sender's nonce was stale or already consumed (AA25-class).
    InvalidNonce,
    /// The sender account has no code yet and deployment is still pending
    /// (AA20-class).
    PendingDeployment,
    /// Any other validation or simulation failure.
    Other,
}

impl RejectReason {
    /// Nonce and deployment races resolve on their own once the prior
    /// operation lands; everything else needs a changed operation.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::InvalidNonce | Self::PendingDeployment)
    }
}

/// Relay (bundler) errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Fee estimation failed: {message}")]
    FeeEstimation { message: String },

    #[error("Relay rejected operation ({reason:?}): {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("Operation reverted on-chain: {message}")]
    Reverted { message: String },

    #[error("No receipt after {waited:?}")]
    ReceiptTimeout { waited: Duration },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed relay response: {0}")]
    MalformedResponse(String),
}

impl RelayError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ReceiptTimeout { .. } | Self::Http(_) => true,
            Self::Rejected { reason, .. } => reason.is_transient(),
            Self::FeeEstimation { .. } | Self::Reverted { .. } | Self::MalformedResponse(_) => {
                false
            }
        }
    }
}

/// Delegation construction, signing, and redemption errors. All fatal:
/// a delegation that fails these checks must never be handed out.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("Delegation scope is missing its {0}")]
    MissingField(&'static str),

    #[error("Delegation scope has an empty allow-list")]
    EmptyScope,

    #[error("Call to {target} with selector {selector} is outside the delegation scope")]
    ScopeViolation { target: Address, selector: Selector },

    #[error("Call data is shorter than a function selector")]
    MissingSelector,

    #[error("Session key expired at {valid_until} (now {now})")]
    Expired { valid_until: u64, now: u64 },

    #[error("Session key is not yet valid until {valid_after} (now {now})")]
    NotYetValid { valid_after: u64, now: u64 },

    #[error("Recovered signer {recovered} does not match delegator owner {expected}")]
    SignerMismatch {
        expected: Address,
        recovered: Address,
    },

    #[error("Signature operation failed: {0}")]
    Signature(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Assembly pipeline errors. The last completed state is reported so a
/// caller can decide whether to resume or discard.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("assembly halted after {state}: {source}")]
    Halted {
        state: BuildState,
        #[source]
        source: Box<Error>,
    },
}

impl AssemblyError {
    pub fn halted(state: BuildState, source: impl Into<Error>) -> Self {
        Self::Halted {
            state,
            source: Box::new(source.into()),
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_and_deployment_rejections_are_transient() {
        let err = Error::from(RelayError::Rejected {
            reason: RejectReason::InvalidNonce,
            message: "AA25 invalid account nonce".to_string(),
        });
        assert!(err.is_transient());

        let err = Error::from(RelayError::Rejected {
            reason: RejectReason::PendingDeployment,
            message: "AA20 account not deployed".to_string(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn other_rejections_and_reverts_are_fatal() {
        let err = Error::from(RelayError::Rejected {
            reason: RejectReason::Other,
            message: "signature validation failed".to_string(),
        });
        assert!(!err.is_transient());

        let err = Error::from(RelayError::Reverted {
            message: "execution reverted".to_string(),
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn timeouts_are_transient_config_is_not() {
        let err = Error::from(RelayError::ReceiptTimeout {
            waited: Duration::from_secs(20),
        });
        assert!(err.is_transient());

        let err = Error::from(ConfigError::MissingRequired {
            key: "SESSIONKIT_RPC_URL".to_string(),
            hint: "set the chain RPC endpoint".to_string(),
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn halted_assembly_inherits_source_classification() {
        let transient = AssemblyError::halted(
            BuildState::Delegated,
            RelayError::ReceiptTimeout {
                waited: Duration::from_secs(20),
            },
        );
        assert!(Error::from(transient).is_transient());

        let fatal =
            AssemblyError::halted(BuildState::SessionCreated, DelegationError::EmptyScope);
        let err = Error::from(fatal);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("session_created"));
    }
}

//! Configuration for sessionkit.
//!
//! Everything the pipeline needs is resolved once, up front, into a single
//! [`ChainProfile`], so a misconfigured chain fails before the first network
//! call instead of partway through a multi-step flow. Resolution priority:
//! env var > default. `.env` is loaded via dotenvy before reading.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::ConfigError;
use crate::primitives::Address;

/// Default session validity window (30 minutes).
pub const DEFAULT_SESSION_WINDOW_SECS: u64 = 30 * 60;

/// Default pre-skew subtracted from `valid_after` to absorb clock drift.
pub const DEFAULT_SESSION_SKEW_SECS: u64 = 60;

/// Default budget for awaiting an operation receipt.
pub const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 20_000;

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_MS: u64 = 500;

/// Canonical signature of the validation-response submission call.
pub const DEFAULT_RESPONSE_SIGNATURE: &str = "submitValidationResponse(bytes32,uint8,bytes)";

/// Canonical signature of the read-only sanity call used by the self-test.
pub const DEFAULT_SANITY_SIGNATURE: &str = "getValidationStatus(bytes32)";

/// Resolved per-chain configuration, passed down the pipeline by value.
///
/// Selector-bearing fields hold canonical function signatures, not raw
/// selector literals; the 4-byte selectors are always derived by hashing.
#[derive(Debug, Clone)]
pub struct ChainProfile {
    pub chain_id: u64,
    pub rpc_url: Url,
    pub relay_url: Url,
    /// ERC-4337 entry point the relay submits through.
    pub entry_point: Address,
    /// Counterfactual account factory used for address derivation.
    pub account_factory: Address,
    /// Delegation manager contract; verifying contract of the signed
    /// delegation's typed-data domain.
    pub delegation_manager: Address,
    /// Validation registry: business target of the delegation scope.
    pub validation_registry: Address,
    /// Canonical signature of the business call the session may make.
    pub response_signature: String,
    /// Canonical signature of the sanity read used by the self-test.
    pub sanity_signature: String,
    /// Whether to register the session account as the agent's operator
    /// after a successful self-test.
    pub approve_operator: bool,
    pub session_window: Duration,
    pub session_skew: Duration,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Hex-encoded private key of the agent account owner.
    pub owner_key: SecretString,
}

impl ChainProfile {
    /// Resolve the profile from `SESSIONKIT_*` environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let chain_id = require_parsed_env::<u64>(
            "SESSIONKIT_CHAIN_ID",
            "numeric chain id of the target network",
        )?;
        let rpc_url = require_url_env("SESSIONKIT_RPC_URL", "JSON-RPC endpoint of a chain node")?;
        let relay_url = require_url_env(
            "SESSIONKIT_RELAY_URL",
            "JSON-RPC endpoint of an ERC-4337 bundler",
        )?;

        let entry_point = require_address_env(
            "SESSIONKIT_ENTRY_POINT",
            "address of the ERC-4337 entry point",
        )?;
        let account_factory = require_address_env(
            "SESSIONKIT_ACCOUNT_FACTORY",
            "address of the smart-account factory",
        )?;
        let delegation_manager = require_address_env(
            "SESSIONKIT_DELEGATION_MANAGER",
            "address of the delegation manager contract",
        )?;
        let validation_registry = require_address_env(
            "SESSIONKIT_VALIDATION_REGISTRY",
            "address of the validation registry",
        )?;

        let response_signature = optional_env("SESSIONKIT_RESPONSE_SIGNATURE")
            .unwrap_or_else(|| DEFAULT_RESPONSE_SIGNATURE.to_string());
        let sanity_signature = optional_env("SESSIONKIT_SANITY_SIGNATURE")
            .unwrap_or_else(|| DEFAULT_SANITY_SIGNATURE.to_string());
        validate_signature("SESSIONKIT_RESPONSE_SIGNATURE", &response_signature)?;
        validate_signature("SESSIONKIT_SANITY_SIGNATURE", &sanity_signature)?;

        let approve_operator = optional_parsed_env::<bool>("SESSIONKIT_APPROVE_OPERATOR")?
            .unwrap_or(true);

        let session_window_secs = optional_parsed_env::<u64>("SESSIONKIT_SESSION_WINDOW_SECS")?
            .unwrap_or(DEFAULT_SESSION_WINDOW_SECS);
        if session_window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSIONKIT_SESSION_WINDOW_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        let session_skew_secs = optional_parsed_env::<u64>("SESSIONKIT_SESSION_SKEW_SECS")?
            .unwrap_or(DEFAULT_SESSION_SKEW_SECS);

        let receipt_timeout_ms = optional_parsed_env::<u64>("SESSIONKIT_RECEIPT_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT_MS);
        if receipt_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSIONKIT_RECEIPT_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        let receipt_poll_ms = optional_parsed_env::<u64>("SESSIONKIT_RECEIPT_POLL_MS")?
            .unwrap_or(DEFAULT_RECEIPT_POLL_MS);
        if receipt_poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSIONKIT_RECEIPT_POLL_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let owner_key = SecretString::from(require_env(
            "SESSIONKIT_OWNER_KEY",
            "hex-encoded private key of the agent account owner",
        )?);

        Ok(Self {
            chain_id,
            rpc_url,
            relay_url,
            entry_point,
            account_factory,
            delegation_manager,
            validation_registry,
            response_signature,
            sanity_signature,
            approve_operator,
            session_window: Duration::from_secs(session_window_secs),
            session_skew: Duration::from_secs(session_skew_secs),
            receipt_timeout: Duration::from_millis(receipt_timeout_ms),
            receipt_poll_interval: Duration::from_millis(receipt_poll_ms),
            owner_key,
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn require_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

fn optional_parsed_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

fn require_parsed_env<T: FromStr>(key: &str, hint: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = require_env(key, hint)?;
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn require_address_env(key: &str, hint: &str) -> Result<Address, ConfigError> {
    let raw = require_env(key, hint)?;
    raw.parse::<Address>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn require_url_env(key: &str, hint: &str) -> Result<Url, ConfigError> {
    let raw = require_env(key, hint)?;
    Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn validate_signature(key: &str, signature: &str) -> Result<(), ConfigError> {
    let well_formed = signature
        .split_once('(')
        .is_some_and(|(name, rest)| !name.is_empty() && rest.ends_with(')'));
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{signature}' is not a canonical function signature"),
        })
    }
}

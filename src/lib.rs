//! Delegated session authorization for ERC-4337 smart accounts.
//!
//! `sessionkit` provisions agents with short-lived, narrowly scoped
//! authority: an owner-controlled agent account delegates a small
//! allow-list of calls to an ephemeral session key, and the session then
//! acts on-chain through sponsored operations without ever holding the
//! owner's key or any gas funds.
//!
//! The main entry point is [`SessionPackageAssembler`], which drives the
//! full pipeline and emits a portable [`SessionPackage`]. The lower
//! layers it composes are usable on their own:
//!
//! - [`account`]: counterfactual address derivation and deployment.
//! - [`session`]: ephemeral key minting and validity windows.
//! - [`delegation`]: scoped delegations, typed-data hashing, signing.
//! - [`redeem`]: redemption calldata with client-side scope checks.
//! - [`relay`] / [`runner`]: sponsored operation submission and receipts.
//!
//! Chain-specific parameters come from [`ChainProfile`], resolved from
//! `SESSIONKIT_*` environment variables.

pub mod account;
pub mod assembler;
pub mod chain;
pub mod config;
pub mod delegation;
pub mod error;
pub mod primitives;
pub mod redeem;
pub mod relay;
pub mod runner;
pub mod session;
pub mod signer;

pub use account::{AddressDeriver, DeploymentGate, SmartAccountRef};
pub use assembler::{BuildState, SessionPackage, SessionPackageAssembler};
pub use chain::{ChainReader, HttpChainReader};
pub use config::ChainProfile;
pub use delegation::{
    DelegationBuilder, DelegationDomain, DelegationScope, DelegationSigner, SignedDelegation,
};
pub use error::{Error, Result};
pub use primitives::{Address, B256, Bytes, Selector};
pub use redeem::RedemptionEncoder;
pub use relay::{Call, FeeParams, HttpRelay, OperationHandle, Receipt, Relay, RelayOperation};
pub use runner::SponsoredOperationRunner;
pub use session::{SessionKey, SessionKeyFactory};
pub use signer::{LocalKeySigner, Signer};

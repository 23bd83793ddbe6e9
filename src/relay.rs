//! Relay (bundler) capability.
//!
//! The relay accepts a prepared operation, sponsors its gas, and submits it
//! through the entry point. Consumed through the narrow [`Relay`] trait:
//! fee estimation, submission, and bounded receipt polling. The submission
//! path is at-least-once; a failure after partial delivery must be assumed
//! possibly-applied.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use url::Url;

use crate::error::{RejectReason, RelayError};
use crate::primitives::{
    Address, B256, Bytes, Selector, parse_quantity, quantity, word_from_address, word_from_u128,
};

// Sponsored operations carry fixed execution-gas headroom; the relay's
// paymaster covers the actual cost.
const DEFAULT_CALL_GAS_LIMIT: u128 = 1_000_000;
const DEFAULT_VERIFICATION_GAS_LIMIT: u128 = 500_000;
const DEFAULT_PRE_VERIFICATION_GAS: u128 = 100_000;

/// One sub-call inside an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    pub value: u128,
    pub data: Bytes,
}

impl Call {
    /// A no-op call against the zero address, used to trigger first-time
    /// account deployment.
    pub fn noop() -> Self {
        Self {
            to: Address::ZERO,
            value: 0,
            data: Bytes::new(),
        }
    }
}

/// Gas pricing fetched from the relay's oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// One prepared operation; transient, exists for one submit/await cycle.
#[derive(Debug, Clone)]
pub struct RelayOperation {
    pub sender: Address,
    pub calls: Vec<Call>,
    pub fee: FeeParams,
    pub nonce: u128,
}

/// Opaque handle returned by submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationHandle(pub B256);

/// Terminal confirmation of an operation.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub operation_hash: B256,
    pub transaction_hash: B256,
    pub gas_used: u64,
}

/// Relay capability: estimate, submit, await.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn estimate_fee(&self) -> Result<FeeParams, RelayError>;

    async fn submit(&self, operation: &RelayOperation) -> Result<OperationHandle, RelayError>;

    /// Poll until a terminal receipt or the budget runs out. Timing out is
    /// a distinguishable, retryable failure: the operation may still land.
    async fn await_receipt(
        &self,
        handle: OperationHandle,
        budget: Duration,
    ) -> Result<Receipt, RelayError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct GasPriceTier {
    #[serde(rename = "maxFeePerGas")]
    max_fee_per_gas: String,
    #[serde(rename = "maxPriorityFeePerGas")]
    max_priority_fee_per_gas: String,
}

#[derive(Debug, Deserialize)]
struct GasPriceResult {
    fast: GasPriceTier,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOpReceiptResult {
    user_op_hash: String,
    success: bool,
    #[serde(default)]
    reason: Option<String>,
    actual_gas_used: String,
    receipt: InnerReceipt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InnerReceipt {
    transaction_hash: String,
}

/// ERC-4337 bundler client.
pub struct HttpRelay {
    client: reqwest::Client,
    url: Url,
    entry_point: Address,
    poll_interval: Duration,
}

impl HttpRelay {
    pub fn new(url: Url, entry_point: Address, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            entry_point,
            poll_interval,
        }
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RelayError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response: RpcResponse = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RelayError::Rejected {
                reason: classify_rejection(&error.message),
                message: format!("{} (code {})", error.message, error.code),
            });
        }
        response
            .result
            .ok_or_else(|| RelayError::MalformedResponse(format!("{method}: empty response")))
    }
}

/// Translate the bundler's standardized AAxx failure tokens into the typed
/// taxonomy, once, at the wire boundary.
fn classify_rejection(message: &str) -> RejectReason {
    if message.contains("AA25") {
        RejectReason::InvalidNonce
    } else if message.contains("AA20") {
        RejectReason::PendingDeployment
    } else {
        RejectReason::Other
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn estimate_fee(&self) -> Result<FeeParams, RelayError> {
        let value = self
            .rpc("pimlico_getUserOperationGasPrice", serde_json::json!([]))
            .await
            .map_err(|e| match e {
                RelayError::Http(e) => RelayError::Http(e),
                other => RelayError::FeeEstimation {
                    message: other.to_string(),
                },
            })?;

        let tiers: GasPriceResult = serde_json::from_value(value)
            .map_err(|e| RelayError::MalformedResponse(format!("gas price oracle: {e}")))?;
        let max_fee_per_gas = parse_quantity(&tiers.fast.max_fee_per_gas)
            .map_err(|e| RelayError::MalformedResponse(format!("maxFeePerGas: {e}")))?;
        let max_priority_fee_per_gas = parse_quantity(&tiers.fast.max_priority_fee_per_gas)
            .map_err(|e| RelayError::MalformedResponse(format!("maxPriorityFeePerGas: {e}")))?;

        Ok(FeeParams {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn submit(&self, operation: &RelayOperation) -> Result<OperationHandle, RelayError> {
        let call_data = encode_execute_batch(&operation.calls);
        let user_op = serde_json::json!({
            "sender": operation.sender.to_string(),
            "nonce": quantity(operation.nonce),
            "initCode": "0x",
            "callData": call_data.to_string(),
            "callGasLimit": quantity(DEFAULT_CALL_GAS_LIMIT),
            "verificationGasLimit": quantity(DEFAULT_VERIFICATION_GAS_LIMIT),
            "preVerificationGas": quantity(DEFAULT_PRE_VERIFICATION_GAS),
            "maxFeePerGas": quantity(operation.fee.max_fee_per_gas),
            "maxPriorityFeePerGas": quantity(operation.fee.max_priority_fee_per_gas),
            "paymasterAndData": "0x",
            "signature": "0x",
        });

        tracing::debug!(
            sender = %operation.sender,
            nonce = operation.nonce,
            calls = operation.calls.len(),
            "submitting sponsored operation"
        );

        let value = self
            .rpc(
                "eth_sendUserOperation",
                serde_json::json!([user_op, self.entry_point.to_string()]),
            )
            .await?;
        let hash = value
            .as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| {
                RelayError::MalformedResponse(format!("expected operation hash, got {value}"))
            })?;
        Ok(OperationHandle(hash))
    }

    async fn await_receipt(
        &self,
        handle: OperationHandle,
        budget: Duration,
    ) -> Result<Receipt, RelayError> {
        let started = Instant::now();
        loop {
            let value = self
                .rpc(
                    "eth_getUserOperationReceipt",
                    serde_json::json!([handle.0.to_string()]),
                )
                .await?;

            if !value.is_null() {
                let parsed: UserOpReceiptResult = serde_json::from_value(value)
                    .map_err(|e| RelayError::MalformedResponse(format!("receipt: {e}")))?;
                if !parsed.success {
                    return Err(RelayError::Reverted {
                        message: parsed
                            .reason
                            .unwrap_or_else(|| "no revert reason".to_string()),
                    });
                }
                return Ok(Receipt {
                    operation_hash: parsed.user_op_hash.parse().map_err(|e| {
                        RelayError::MalformedResponse(format!("userOpHash: {e}"))
                    })?,
                    transaction_hash: parsed.receipt.transaction_hash.parse().map_err(|e| {
                        RelayError::MalformedResponse(format!("transactionHash: {e}"))
                    })?,
                    gas_used: parse_quantity(&parsed.actual_gas_used)
                        .map_err(|e| RelayError::MalformedResponse(format!("actualGasUsed: {e}")))?
                        as u64,
                });
            }

            if started.elapsed() >= budget {
                return Err(RelayError::ReceiptTimeout {
                    waited: started.elapsed(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// ABI-encode `executeBatch(address[],uint256[],bytes[])` for the smart
/// account's batch entry point.
pub fn encode_execute_batch(calls: &[Call]) -> Bytes {
    let selector = Selector::from_signature("executeBatch(address[],uint256[],bytes[])");
    let n = calls.len();

    // Head: offsets of the three dynamic arrays, relative to the start of
    // the argument section.
    let targets_offset = 3 * 32;
    let values_offset = targets_offset + 32 + n * 32;
    let datas_offset = values_offset + 32 + n * 32;

    let mut out = Vec::new();
    out.extend_from_slice(&selector.0);
    out.extend_from_slice(&word_from_u128(targets_offset as u128));
    out.extend_from_slice(&word_from_u128(values_offset as u128));
    out.extend_from_slice(&word_from_u128(datas_offset as u128));

    out.extend_from_slice(&word_from_u128(n as u128));
    for call in calls {
        out.extend_from_slice(&word_from_address(call.to));
    }

    out.extend_from_slice(&word_from_u128(n as u128));
    for call in calls {
        out.extend_from_slice(&word_from_u128(call.value));
    }

    // bytes[]: element offsets are relative to the start of the array
    // content, after its own length word.
    out.extend_from_slice(&word_from_u128(n as u128));
    let mut element_offset = n * 32;
    for call in calls {
        out.extend_from_slice(&word_from_u128(element_offset as u128));
        element_offset += 32 + padded_len(call.data.len());
    }
    for call in calls {
        out.extend_from_slice(&word_from_u128(call.data.len() as u128));
        out.extend_from_slice(call.data.as_slice());
        out.resize(out.len() + pad_amount(call.data.len()), 0);
    }

    Bytes(out)
}

fn padded_len(len: usize) -> usize {
    len + pad_amount(len)
}

fn pad_amount(len: usize) -> usize {
    (32 - len % 32) % 32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_standard_bundler_failures() {
        assert_eq!(
            classify_rejection("AA25 invalid account nonce"),
            RejectReason::InvalidNonce
        );
        assert_eq!(
            classify_rejection("AA20 account not deployed"),
            RejectReason::PendingDeployment
        );
        assert_eq!(
            classify_rejection("AA24 signature error"),
            RejectReason::Other
        );
    }

    #[test]
    fn execute_batch_encodes_heads_and_tails() {
        let target_a: Address = "0x00000000000000000000000000000000000000aa"
            .parse()
            .expect("address");
        let target_b: Address = "0x00000000000000000000000000000000000000bb"
            .parse()
            .expect("address");
        let calls = [
            Call {
                to: target_a,
                value: 1,
                data: Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
            },
            Call {
                to: target_b,
                value: 0,
                data: Bytes::new(),
            },
        ];

        let encoded = encode_execute_batch(&calls);
        let body = &encoded.as_slice()[4..];

        assert_eq!(
            Selector::from_calldata(encoded.as_slice()),
            Some(Selector::from_signature(
                "executeBatch(address[],uint256[],bytes[])"
            ))
        );

        fn read_word(body: &[u8], index: usize) -> u128 {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&body[index * 32 + 16..(index + 1) * 32]);
            u128::from_be_bytes(raw)
        }

        // Three head offsets.
        assert_eq!(read_word(body, 0), 96);
        assert_eq!(read_word(body, 1), 96 + 32 + 64);
        assert_eq!(read_word(body, 2), 96 + 2 * (32 + 64));

        // address[] tail: length then the two targets.
        let targets = &body[96..];
        assert_eq!(targets[31], 2);
        assert_eq!(targets[32 + 31], 0xaa);
        assert_eq!(targets[64 + 31], 0xbb);

        // bytes[] tail: length, element offsets, then each element.
        let datas = &body[96 + 2 * (32 + 64)..];
        assert_eq!(datas[31], 2);
        assert_eq!(datas[32 + 31], 64); // first element after two offset words
        assert_eq!(datas[64 + 31], 64 + 32 + 32); // second after padded first
        assert_eq!(datas[96 + 31], 4); // first element length
        assert_eq!(&datas[128..132], &[0xde, 0xad, 0xbe, 0xef]);

        // Whole payload is word-aligned.
        assert!(body.len().is_multiple_of(32));
    }

    #[test]
    fn noop_call_targets_zero_address_with_empty_data() {
        let call = Call::noop();
        assert!(call.to.is_zero());
        assert_eq!(call.value, 0);
        assert!(call.data.is_empty());
    }
}

//! Chain read capability.
//!
//! [`ChainReader`] is the narrow read-side interface the pipeline needs:
//! bytecode presence, contract calls, and entry-point nonce reads.
//! [`HttpChainReader`] speaks plain JSON-RPC over reqwest.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ChainError;
use crate::primitives::{
    Address, Bytes, Selector, word_from_address, word_from_u128,
};

/// Read-only view of chain state.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Bytecode at an address; empty when the account is counterfactual.
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

    /// Execute a read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Current entry-point nonce for a sender (key segment zero).
    async fn get_nonce(&self, entry_point: Address, sender: Address) -> Result<u128, ChainError>;
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

/// JSON-RPC chain reader.
pub struct HttpChainReader {
    client: reqwest::Client,
    url: Url,
}

impl HttpChainReader {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainError> {
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
            return Err(ChainError::Rpc {
                method: method.to_string(),
                message: format!("code {}: {}", error.code, error.message),
            });
        }
        response.result.ok_or_else(|| ChainError::MalformedResponse {
            method: method.to_string(),
            message: "neither result nor error present".to_string(),
        })
    }

    async fn rpc_bytes(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Bytes, ChainError> {
        let value = self.rpc(method, params).await?;
        let raw = value.as_str().ok_or_else(|| ChainError::MalformedResponse {
            method: method.to_string(),
            message: format!("expected hex string, got {value}"),
        })?;
        raw.parse().map_err(|e| ChainError::MalformedResponse {
            method: method.to_string(),
            message: format!("{e}"),
        })
    }
}

#[async_trait]
impl ChainReader for HttpChainReader {
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        self.rpc_bytes(
            "eth_getCode",
            serde_json::json!([address.to_string(), "latest"]),
        )
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.rpc_bytes(
            "eth_call",
            serde_json::json!([
                { "to": to.to_string(), "data": data.to_string() },
                "latest"
            ]),
        )
        .await
    }

    async fn get_nonce(&self, entry_point: Address, sender: Address) -> Result<u128, ChainError> {
        let data = encode_get_nonce(sender);
        let returned = self.call(entry_point, data).await?;
        decode_nonce(&returned).ok_or_else(|| ChainError::MalformedResponse {
            method: "eth_call".to_string(),
            message: format!(
                "getNonce returned {} bytes, expected a 32-byte word",
                returned.len()
            ),
        })
    }
}

/// ABI-encode `getNonce(address,uint192)` on the entry point, key zero.
pub fn encode_get_nonce(sender: Address) -> Bytes {
    let selector = Selector::from_signature("getNonce(address,uint192)");
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&selector.0);
    data.extend_from_slice(&word_from_address(sender));
    data.extend_from_slice(&word_from_u128(0));
    Bytes(data)
}

/// Decode the 32-byte nonce word into its sequence portion.
pub fn decode_nonce(returned: &Bytes) -> Option<u128> {
    if returned.len() != 32 {
        return None;
    }
    let mut seq = [0u8; 16];
    seq.copy_from_slice(&returned.as_slice()[16..]);
    Some(u128::from_be_bytes(seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_nonce_calldata_carries_selector_and_sender() {
        let sender: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
            .parse()
            .expect("valid address");
        let data = encode_get_nonce(sender);

        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(
            Selector::from_calldata(data.as_slice()),
            Some(Selector::from_signature("getNonce(address,uint192)"))
        );
        assert_eq!(&data.as_slice()[16..36], sender.as_bytes());
        // Key segment is fixed at zero.
        assert!(data.as_slice()[36..].iter().all(|b| *b == 0));
    }

    #[test]
    fn nonce_decoding_reads_the_sequence_word() {
        let mut word = vec![0u8; 32];
        word[31] = 7;
        assert_eq!(decode_nonce(&Bytes(word)), Some(7));

        assert_eq!(decode_nonce(&Bytes(vec![0u8; 16])), None);
        assert_eq!(decode_nonce(&Bytes::new()), None);
    }
}

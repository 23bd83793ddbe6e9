//! Drives one sponsored operation from pricing to terminal receipt.

use std::time::Duration;

use crate::chain::ChainReader;
use crate::error::Result;
use crate::primitives::Address;
use crate::relay::{Call, Receipt, Relay, RelayOperation};

/// Builds, prices, submits, and awaits confirmation of relay operations.
///
/// Nonce discipline: the runner never guesses. Callers chaining multiple
/// operations against the same sender must fetch the confirmed nonce via
/// [`next_nonce`](Self::next_nonce) after each run and thread it into the
/// next; an implicit lookup per call risks reusing a stale value while a
/// prior operation is still pending.
pub struct SponsoredOperationRunner<'a> {
    relay: &'a dyn Relay,
    reader: &'a dyn ChainReader,
    entry_point: Address,
    receipt_budget: Duration,
}

impl<'a> SponsoredOperationRunner<'a> {
    pub fn new(
        relay: &'a dyn Relay,
        reader: &'a dyn ChainReader,
        entry_point: Address,
        receipt_budget: Duration,
    ) -> Self {
        Self {
            relay,
            reader,
            entry_point,
            receipt_budget,
        }
    }

    /// Strictly ordered: fee fetch, submit, bounded await.
    pub async fn run(&self, sender: Address, calls: &[Call], nonce: u128) -> Result<Receipt> {
        let fee = self.relay.estimate_fee().await?;
        tracing::debug!(
            sender = %sender,
            nonce,
            max_fee = fee.max_fee_per_gas,
            "priced sponsored operation"
        );

        let operation = RelayOperation {
            sender,
            calls: calls.to_vec(),
            fee,
            nonce,
        };
        let handle = self.relay.submit(&operation).await?;
        let receipt = self.relay.await_receipt(handle, self.receipt_budget).await?;

        tracing::info!(
            sender = %sender,
            op = %receipt.operation_hash,
            tx = %receipt.transaction_hash,
            gas = receipt.gas_used,
            "sponsored operation confirmed"
        );
        Ok(receipt)
    }

    /// Read the sender's current entry-point nonce.
    pub async fn next_nonce(&self, sender: Address) -> Result<u128> {
        Ok(self.reader.get_nonce(self.entry_point, sender).await?)
    }
}

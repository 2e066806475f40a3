//! On-chain USDC settlement.
//!
//! One executor per configured EVM chain, each holding a provider wired to
//! the singleton signing key. The transfer path:
//! validate the destination, check the executor balance, call ERC-20
//! `transfer`, wait for confirmations.
//!
//! Errors are classified for the retry loop in [`crate::worker`]:
//! validation problems and insufficient funds are terminal, everything else
//! (RPC timeouts, nonce races, mempool rejections) is transient and retried
//! with backoff.

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use apitoll_types::address::WalletAddress;
use apitoll_types::chain::Chain;
use apitoll_types::money::TokenAmount;

sol! {
    #[sol(rpc)]
    interface IUsdc {
        function transfer(address to, uint256 value) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
    }
}

/// How a failed transfer should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Malformed input; never retried.
    Validation,
    /// The executor wallet cannot cover the transfer; never retried.
    InsufficientFunds,
    /// RPC or mempool trouble; retried with backoff.
    Transient,
}

#[derive(Debug, thiserror::Error)]
#[error("{class:?}: {message}")]
pub struct TransferError {
    pub class: FailureClass,
    pub message: String,
}

impl TransferError {
    fn validation(message: impl Into<String>) -> Self {
        TransferError {
            class: FailureClass::Validation,
            message: message.into(),
        }
    }

    fn classify(message: String) -> Self {
        let lowered = message.to_lowercase();
        let class = if lowered.contains("insufficient funds")
            || lowered.contains("transfer amount exceeds balance")
        {
            FailureClass::InsufficientFunds
        } else {
            FailureClass::Transient
        };
        TransferError { class, message }
    }
}

/// A settled transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// USDC executor for one EVM chain.
pub struct EvmExecutor {
    chain: Chain,
    provider: DynProvider,
    usdc_address: Address,
    executor_address: Address,
    confirmations: u64,
    receipt_timeout: Duration,
}

impl EvmExecutor {
    /// Connects an executor for `chain` over `rpc_url` with the signing key.
    pub fn connect(
        chain: Chain,
        rpc_url: Url,
        signer: PrivateKeySigner,
        confirmations: u64,
        receipt_timeout: Duration,
    ) -> Result<Self, TransferError> {
        let usdc_address = chain
            .usdc()
            .address
            .parse::<Address>()
            .map_err(|_| TransferError::validation("bad USDC deployment address"))?;
        let executor_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url)
            .erased();
        Ok(EvmExecutor {
            chain,
            provider,
            usdc_address,
            executor_address,
            confirmations,
            receipt_timeout,
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Transfers `amount` of USDC to `destination` and waits for
    /// confirmations.
    pub async fn transfer(
        &self,
        destination: &WalletAddress,
        amount: TokenAmount,
    ) -> Result<TransferOutcome, TransferError> {
        let to = destination
            .as_evm()
            .ok_or_else(|| TransferError::validation("destination is not an EVM address"))?;
        let to = Address::try_from(to)
            .map_err(|_| TransferError::validation("destination address is malformed"))?;
        if to == Address::ZERO {
            return Err(TransferError::validation("destination is the zero address"));
        }
        if amount.is_zero() {
            return Err(TransferError::validation("amount must be positive"));
        }

        let contract = IUsdc::new(self.usdc_address, self.provider.clone());

        let balance = contract
            .balanceOf(self.executor_address)
            .call()
            .await
            .map_err(|e| TransferError::classify(e.to_string()))?;
        if balance < U256::from(amount.as_u64()) {
            return Err(TransferError {
                class: FailureClass::InsufficientFunds,
                message: format!(
                    "executor balance {balance} below transfer amount {amount}"
                ),
            });
        }

        let pending = contract
            .transfer(to, U256::from(amount.as_u64()))
            .send()
            .await
            .map_err(|e| TransferError::classify(e.to_string()))?;
        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| TransferError::classify(e.to_string()))?;

        Ok(TransferOutcome {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            block_number: receipt.block_number,
        })
    }

    /// Polls an already-submitted transaction (recovery path) until it has
    /// the required confirmations or the timeout elapses.
    pub async fn await_confirmation(
        &self,
        tx_hash: &str,
    ) -> Result<TransferOutcome, TransferError> {
        let hash = tx_hash
            .parse::<B256>()
            .map_err(|_| TransferError::validation("malformed transaction hash"))?;
        let deadline = tokio::time::Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| TransferError::classify(e.to_string()))?;
            if let Some(receipt) = receipt {
                if let Some(mined_in) = receipt.block_number {
                    let head = self
                        .provider
                        .get_block_number()
                        .await
                        .map_err(|e| TransferError::classify(e.to_string()))?;
                    if head + 1 >= mined_in + self.confirmations {
                        return Ok(TransferOutcome {
                            tx_hash: tx_hash.to_string(),
                            block_number: Some(mined_in),
                        });
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TransferError::classify(format!(
                    "transaction {tx_hash} unconfirmed after {:?}",
                    self.receipt_timeout
                )));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Checks whether an ERC-3009 authorization nonce was already consumed.
    pub async fn authorization_used(
        &self,
        authorizer: &WalletAddress,
        nonce: [u8; 32],
    ) -> Result<bool, TransferError> {
        let authorizer = authorizer
            .as_evm()
            .ok_or_else(|| TransferError::validation("authorizer is not an EVM address"))?;
        let authorizer = Address::try_from(authorizer)
            .map_err(|_| TransferError::validation("authorizer address is malformed"))?;
        let contract = IUsdc::new(self.usdc_address, self.provider.clone());
        contract
            .authorizationState(authorizer, B256::from(nonce))
            .call()
            .await
            .map_err(|e| TransferError::classify(e.to_string()))
    }
}

/// The executors this facilitator can settle with, by chain.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Chain, EvmExecutor>,
}

impl ExecutorRegistry {
    pub fn register(&mut self, executor: EvmExecutor) {
        self.executors.insert(executor.chain(), executor);
    }

    pub fn for_chain(&self, chain: Chain) -> Option<&EvmExecutor> {
        self.executors.get(&chain)
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_insufficient_funds_as_terminal() {
        let err = TransferError::classify("server returned: insufficient funds for gas".into());
        assert_eq!(err.class, FailureClass::InsufficientFunds);
        let err =
            TransferError::classify("execution reverted: transfer amount exceeds balance".into());
        assert_eq!(err.class, FailureClass::InsufficientFunds);
    }

    #[test]
    fn classifies_rpc_trouble_as_transient() {
        for message in [
            "request timed out",
            "nonce too low",
            "replacement transaction underpriced",
            "connection reset by peer",
        ] {
            let err = TransferError::classify(message.into());
            assert_eq!(err.class, FailureClass::Transient, "{message}");
        }
    }

    #[test]
    fn validation_errors_are_terminal() {
        let err = TransferError::validation("destination is the zero address");
        assert_eq!(err.class, FailureClass::Validation);
    }
}

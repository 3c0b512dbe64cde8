//! The wallet provider seam.
//!
//! A [`Wallet`] is whatever holds the user's keys and talks to the network
//! on their behalf: a browser extension bridged into Rust, or the
//! [`crate::LocalWallet`] used by the command line driver. The session only
//! needs the handful of EIP-1193 requests modelled here.
use alloy::primitives::Address;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// EIP-1193 code for a request the user declined.
pub const USER_REJECTED: i64 = 4001;
/// EIP-3326 code for a `wallet_switchEthereumChain` to a chain the wallet
/// doesn't know.
pub const UNRECOGNIZED_CHAIN: i64 = 4902;

/// An error answered by the wallet provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("wallet error {code}: {message}")]
pub struct WalletError {
    /// Provider error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

impl WalletError {
    /// Creates a new [`WalletError`].
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Whether the wallet refused a switch because it doesn't know the
    /// chain. Only then is registering the chain worth trying.
    #[must_use]
    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN
    }

    /// Whether the user declined the request.
    #[must_use]
    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED
    }
}

/// Native currency description used when registering a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCurrency {
    /// Currency name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Decimal places.
    pub decimals: u8,
}

/// Parameters of `wallet_addEthereumChain` (EIP-3085).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Numeric chain id.
    pub chain_id: u64,
    /// Display name of the chain.
    pub chain_name: String,
    /// RPC endpoints, first one preferred.
    pub rpc_urls: Vec<String>,
    /// Gas currency of the chain.
    pub native_currency: NativeCurrency,
}

impl ChainParams {
    /// The local Ganache development chain (`0x539`).
    #[must_use]
    pub fn ganache() -> Self {
        Self::local(1337, "http://127.0.0.1:8545")
    }

    /// A local development chain with ETH as its currency.
    pub fn local(chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            chain_name: "Local Ganache".to_owned(),
            rpc_urls: vec![rpc_url.into()],
            native_currency: NativeCurrency {
                name: "Ethereum".to_owned(),
                symbol: "ETH".to_owned(),
                decimals: 18,
            },
        }
    }

    /// Chain id the way wallets expect it, e.g. `0x539`.
    #[must_use]
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }
}

/// Requests the session makes to the wallet provider.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Accounts already authorized for this client, without prompting the
    /// user (`eth_accounts`). Empty when nothing was authorized yet.
    ///
    /// # Errors
    ///
    /// * [`WalletError`] - If the provider fails to answer.
    async fn accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Asks the user to authorize accounts (`eth_requestAccounts`).
    ///
    /// # Errors
    ///
    /// * [`WalletError`] - If the user declines or the provider fails.
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Chain the wallet is currently connected to (`eth_chainId`).
    ///
    /// # Errors
    ///
    /// * [`WalletError`] - If the provider fails to answer.
    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// Switches the wallet to `chain_id` (`wallet_switchEthereumChain`).
    ///
    /// # Errors
    ///
    /// * [`WalletError`] - With [`UNRECOGNIZED_CHAIN`] when the wallet
    ///   doesn't know the chain, or any other provider failure.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    /// Registers a chain with the wallet (`wallet_addEthereumChain`).
    ///
    /// # Errors
    ///
    /// * [`WalletError`] - If the user declines or the provider fails.
    async fn add_chain(&self, params: &ChainParams) -> Result<(), WalletError>;

    /// Subscribes to `accountsChanged` notifications. An empty list means the
    /// wallet disconnected.
    fn subscribe(&self) -> broadcast::Receiver<Vec<Address>>;
}

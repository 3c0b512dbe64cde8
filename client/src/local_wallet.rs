//! A [`Wallet`] over private keys held in memory.
//!
//! Behaves the way an injected browser wallet does towards the session: it
//! has a selected account, it must be asked before it hands accounts out
//! and it announces account changes.
//!
//! Its keys sign for one node, so it is bound to that node's chain. It
//! answers `4902` when asked to switch anywhere else, and refuses to
//! register other chains, since it could not actually move there.
use std::{
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use eyre::{bail, Context};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::wallet::{ChainParams, Wallet, WalletError, UNRECOGNIZED_CHAIN};

/// JSON-RPC code for invalid request parameters.
const INVALID_PARAMS: i64 = -32602;
/// EIP-1193 code for a provider not connected to the requested chain.
const CHAIN_DISCONNECTED: i64 = 4901;

#[derive(Debug)]
struct State {
    authorized: bool,
    selected: usize,
}

/// Wallet holding one or more local signers.
///
/// Clones share the selected account and the subscribers.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    signers: Arc<[PrivateKeySigner]>,
    chain_id: u64,
    state: Arc<Mutex<State>>,
    changes: broadcast::Sender<Vec<Address>>,
}

impl LocalWallet {
    /// Creates a wallet from hex-encoded private keys for a node on
    /// `chain_id`. The first key is selected.
    ///
    /// # Errors
    ///
    /// May fail if `keys` is empty or a key doesn't parse.
    pub fn from_private_keys<S: AsRef<str>>(
        keys: &[S],
        chain_id: u64,
    ) -> eyre::Result<Self> {
        if keys.is_empty() {
            bail!("at least one private key is required");
        }
        let signers = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                PrivateKeySigner::from_str(key.as_ref().trim())
                    .wrap_err(format!("invalid private key #{i}"))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        let (changes, _) = broadcast::channel(16);
        Ok(Self {
            signers: signers.into(),
            chain_id,
            state: Arc::new(Mutex::new(State { authorized: false, selected: 0 })),
            changes,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every address this wallet can sign for, in key order.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.signers.iter().map(PrivateKeySigner::address).collect()
    }

    /// All signers as an [`EthereumWallet`], the selected one as default.
    #[must_use]
    pub fn ethereum_wallet(&self) -> EthereumWallet {
        let selected = self.lock().selected;
        let mut wallet = EthereumWallet::new(self.signers[selected].clone());
        for signer in self.signers.iter() {
            wallet.register_signer(signer.clone());
        }
        wallet
    }

    /// A provider at `rpc_url` that signs with this wallet's keys.
    ///
    /// # Errors
    ///
    /// May fail if `rpc_url` is not a valid URL.
    pub fn provider(&self, rpc_url: &str) -> eyre::Result<impl Provider + Clone> {
        let url = rpc_url.parse().wrap_err(format!("invalid rpc url {rpc_url}"))?;
        Ok(ProviderBuilder::new().wallet(self.ethereum_wallet()).connect_http(url))
    }

    /// Makes the key at `index` the selected account and, once authorized,
    /// announces the change.
    ///
    /// # Errors
    ///
    /// * [`WalletError`] - If there's no key at `index`.
    pub fn select_account(&self, index: usize) -> Result<(), WalletError> {
        if index >= self.signers.len() {
            return Err(WalletError::new(
                INVALID_PARAMS,
                format!("no account #{index}"),
            ));
        }
        let (authorized, accounts) = {
            let mut state = self.lock();
            state.selected = index;
            (state.authorized, self.visible(&state))
        };
        info!(index, "account selected");
        if authorized {
            self.announce(accounts);
        }
        Ok(())
    }

    /// Revokes the authorization and announces that no account is
    /// available.
    pub fn disconnect(&self) {
        self.lock().authorized = false;
        info!("wallet disconnected");
        self.announce(Vec::new());
    }

    /// Accounts a client may see: the selected one first.
    fn visible(&self, state: &State) -> Vec<Address> {
        if !state.authorized {
            return Vec::new();
        }
        let mut accounts = self.addresses();
        accounts.rotate_left(state.selected);
        accounts
    }

    fn announce(&self, accounts: Vec<Address>) {
        if self.changes.send(accounts).is_err() {
            debug!("account change dropped, no subscribers");
        }
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        let state = self.lock();
        Ok(self.visible(&state))
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        let mut state = self.lock();
        state.authorized = true;
        Ok(self.visible(&state))
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        if chain_id != self.chain_id {
            return Err(WalletError::new(
                UNRECOGNIZED_CHAIN,
                format!("Unrecognized chain ID {chain_id:#x}"),
            ));
        }
        Ok(())
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), WalletError> {
        if params.chain_id != self.chain_id {
            warn!(
                requested = params.chain_id,
                node = self.chain_id,
                "refusing to add a chain the node is not on"
            );
            return Err(WalletError::new(
                CHAIN_DISCONNECTED,
                format!(
                    "node is on chain {:#x}, cannot reach {}",
                    self.chain_id, params.chain_name
                ),
            ));
        }
        info!(
            chain_id = params.chain_id,
            name = %params.chain_name,
            "chain already active"
        );
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<Address>> {
        self.changes.subscribe()
    }
}

//! Typed access to the voting and token contracts.
//!
//! [`ChainBackend`] is the raw contract surface; [`crate::AlloyBackend`]
//! implements it over an `alloy` provider. [`ChainClient`] puts the wallet
//! next to it and enforces the rules every call has to follow: the wallet
//! must be on the expected network, and writes need a signer.
use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    error::{CallError, Error, Result},
    session::Account,
    tracker::OperationKey,
    wallet::{ChainParams, Wallet},
};

/// A proposal as returned by `getProposals()`, before it gets its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProposal {
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Votes received so far.
    pub vote_count: U256,
}

/// Return values of `declareWinner()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWinner {
    /// Id of the leading proposal.
    pub id: U256,
    /// Its title, blank while no winner exists.
    pub title: String,
    /// Its vote count.
    pub vote_count: U256,
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// `token.approve(spender, amount)`.
    Approve {
        /// Account allowed to spend.
        spender: Address,
        /// Exact allowance to set.
        amount: U256,
    },
    /// `voting.createProposal(title, description)`.
    CreateProposal {
        /// Proposal title.
        title: String,
        /// Proposal description.
        description: String,
    },
    /// `voting.vote(proposalId)`.
    Vote {
        /// Proposal voted for.
        proposal_id: u64,
    },
}

impl Mutation {
    /// Operation this call belongs to.
    #[must_use]
    pub fn key(&self) -> OperationKey {
        match self {
            Self::Approve { .. } => OperationKey::Approve,
            Self::CreateProposal { .. } => OperationKey::CreateProposal,
            Self::Vote { .. } => OperationKey::Vote,
        }
    }
}

/// A broadcast transaction that has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    /// Operation that sent it.
    pub key: OperationKey,
    /// Transaction hash.
    pub hash: TxHash,
}

/// Summary of a successful receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Block that included the transaction.
    pub block_number: Option<u64>,
    /// Gas consumed.
    pub gas_used: u64,
}

/// The contract surface the session consumes.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// `voting.admin()`.
    async fn admin(&self) -> Result<Address, CallError>;

    /// `voting.getProposals()`, in contract order.
    async fn proposals(&self) -> Result<Vec<RawProposal>, CallError>;

    /// `voting.hasVoted(proposalId, voter)`.
    async fn has_voted(
        &self,
        proposal_id: u64,
        voter: Address,
    ) -> Result<bool, CallError>;

    /// `voting.declareWinner()`, evaluated as a read.
    async fn winner(&self) -> Result<RawWinner, CallError>;

    /// `token.allowance(owner, spender)`.
    async fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<U256, CallError>;

    /// Signs `mutation` as `from` and broadcasts it.
    async fn send(
        &self,
        from: Address,
        mutation: &Mutation,
    ) -> Result<TxHash, CallError>;

    /// Waits until `tx` is included. A reverted receipt is an error.
    async fn confirm(&self, tx: TxHash) -> Result<Confirmation, CallError>;
}

/// Outcome of [`ChainClient::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Account the wallet handed out.
    pub account: Account,
    /// Whether the wallet ended up on the expected network.
    pub network_ok: bool,
    /// Chain the wallet is on.
    pub chain_id: u64,
}

/// A wallet plus contract access, bound to one expected network.
#[derive(Debug)]
pub struct ChainClient<W, B> {
    wallet: Option<W>,
    backend: B,
    network: ChainParams,
}

impl<W: Wallet, B: ChainBackend> ChainClient<W, B> {
    /// Creates a client. `wallet` is `None` when no provider is installed.
    pub fn new(wallet: Option<W>, backend: B, network: ChainParams) -> Self {
        Self { wallet, backend, network }
    }

    /// The installed wallet.
    ///
    /// # Errors
    ///
    /// * [`Error::NotInstalled`] - If there is none.
    pub fn wallet(&self) -> Result<&W> {
        self.wallet.as_ref().ok_or(Error::NotInstalled)
    }

    /// The contract backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The network this client requires.
    pub fn network(&self) -> &ChainParams {
        &self.network
    }

    /// Makes sure the wallet is on the expected chain.
    ///
    /// Tries an in-place switch first. Only when the wallet answers that it
    /// doesn't know the chain is the chain registered; any other switch
    /// failure is returned as is.
    ///
    /// # Errors
    ///
    /// * [`Error::NotInstalled`] - If there is no wallet.
    /// * [`Error::WrongNetwork`] - If the chain could not be registered or
    ///   the wallet still reports another chain afterwards.
    /// * [`Error::Wallet`] - If the switch failed for another reason.
    pub async fn ensure_network(&self) -> Result<()> {
        let wallet = self.wallet()?;
        let expected = self.network.chain_id;
        let actual = wallet.chain_id().await?;
        if actual == expected {
            return Ok(());
        }

        info!(
            expected = %self.network.chain_id_hex(),
            actual = %format!("{actual:#x}"),
            "switching network"
        );
        match wallet.switch_chain(expected).await {
            Ok(()) => {}
            Err(err) if err.is_unrecognized_chain() => {
                info!(chain = %self.network.chain_name, "registering network");
                if let Err(err) = wallet.add_chain(&self.network).await {
                    warn!(%err, "network registration failed");
                    return Err(Error::WrongNetwork { expected, actual });
                }
            }
            Err(err) => return Err(err.into()),
        }

        let actual = wallet.chain_id().await?;
        if actual == expected {
            Ok(())
        } else {
            Err(Error::WrongNetwork { expected, actual })
        }
    }

    /// Asks the wallet for an account after bringing it to the expected
    /// network. A wallet left on the wrong network still connects, with
    /// [`Connection::network_ok`] unset.
    ///
    /// # Errors
    ///
    /// * [`Error::NotInstalled`] - If there is no wallet.
    /// * [`Error::NotConnected`] - If the wallet authorized no account.
    /// * [`Error::Wallet`] - If the user declined or the wallet failed.
    pub async fn connect(&self) -> Result<Connection> {
        let wallet = self.wallet()?;
        let network_ok = match self.ensure_network().await {
            Ok(()) => true,
            Err(Error::WrongNetwork { .. }) => false,
            Err(err) => return Err(err),
        };

        let accounts = wallet.request_accounts().await?;
        let account = accounts
            .first()
            .copied()
            .map(Account::new)
            .ok_or(Error::NotConnected)?;
        let chain_id = wallet.chain_id().await?;
        Ok(Connection { account, network_ok, chain_id })
    }

    /// Accounts the wallet already authorized, without prompting.
    ///
    /// # Errors
    ///
    /// * [`Error::NotInstalled`] - If there is no wallet.
    /// * [`Error::Wallet`] - If the wallet failed to answer.
    pub async fn authorized_accounts(&self) -> Result<Vec<Address>> {
        Ok(self.wallet()?.accounts().await?)
    }

    /// Reads the contract admin.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadFailed`] - If the read failed.
    pub async fn admin(&self) -> Result<Address> {
        self.backend.admin().await.map_err(Error::ReadFailed)
    }

    /// Reads all proposals in contract order.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadFailed`] - If the read failed.
    pub async fn proposals(&self) -> Result<Vec<RawProposal>> {
        self.backend.proposals().await.map_err(Error::ReadFailed)
    }

    /// Reads whether `voter` voted for `proposal_id`.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadFailed`] - If the read failed.
    pub async fn has_voted(
        &self,
        proposal_id: u64,
        voter: Account,
    ) -> Result<bool> {
        self.backend
            .has_voted(proposal_id, voter.address())
            .await
            .map_err(Error::ReadFailed)
    }

    /// Reads the contract's current winner.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadFailed`] - If the read failed.
    pub async fn winner(&self) -> Result<RawWinner> {
        self.backend.winner().await.map_err(Error::ReadFailed)
    }

    /// Reads how much `spender` may spend on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadFailed`] - If the read failed.
    pub async fn allowance(
        &self,
        owner: Account,
        spender: Address,
    ) -> Result<U256> {
        self.backend
            .allowance(owner.address(), spender)
            .await
            .map_err(Error::ReadFailed)
    }

    /// Signs and broadcasts `mutation` as `signer`.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - If there is no signer.
    /// * [`Error::TransactionFailed`] - If the wallet declined or the node
    ///   refused the transaction.
    pub async fn send(
        &self,
        signer: Option<Account>,
        mutation: Mutation,
    ) -> Result<TransactionHandle> {
        let signer = signer.ok_or(Error::NotConnected)?;
        let key = mutation.key();
        debug!(%key, from = %signer, "sending transaction");
        let hash = self
            .backend
            .send(signer.address(), &mutation)
            .await
            .map_err(|err| Error::transaction(key, &err))?;
        Ok(TransactionHandle { key, hash })
    }

    /// Waits for the transaction behind `handle` to be included.
    ///
    /// # Errors
    ///
    /// * [`CallError`] - If it reverted or the receipt couldn't be fetched.
    pub async fn confirm(
        &self,
        handle: TransactionHandle,
    ) -> Result<Confirmation, CallError> {
        self.backend.confirm(handle.hash).await
    }
}

//! [`ChainBackend`] over an `alloy` provider.
use alloy::{
    network::ReceiptResponse,
    primitives::{Address, TxHash, U256},
    providers::{PendingTransactionBuilder, Provider},
    sol_types::{decode_revert_reason, Revert, SolError},
};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    abi::{IErc20, IVoting},
    chain::{ChainBackend, Confirmation, Mutation, RawProposal, RawWinner},
    error::CallError,
    wallet::USER_REJECTED,
};

/// JSON-RPC error code nodes use for a reverted call.
const EXECUTION_REVERTED: i64 = 3;

/// Voting and token contracts reached through provider `P`.
///
/// Writes are sent with `from` set to the signing account, so `P` must be
/// able to sign for it, e.g. a provider built with a wallet filler.
#[derive(Debug, Clone)]
pub struct AlloyBackend<P> {
    provider: P,
    voting: Address,
    token: Address,
}

impl<P: Provider> AlloyBackend<P> {
    /// Creates a backend for the contracts at `voting` and `token`.
    pub fn new(provider: P, voting: Address, token: Address) -> Self {
        Self { provider, voting, token }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn voting(&self) -> IVoting::IVotingInstance<&P> {
        IVoting::new(self.voting, &self.provider)
    }

    fn token(&self) -> IErc20::IErc20Instance<&P> {
        IErc20::new(self.token, &self.provider)
    }
}

#[async_trait]
impl<P: Provider> ChainBackend for AlloyBackend<P> {
    async fn admin(&self) -> Result<Address, CallError> {
        self.voting().admin().call().await.map_err(call_error)
    }

    async fn proposals(&self) -> Result<Vec<RawProposal>, CallError> {
        let proposals =
            self.voting().getProposals().call().await.map_err(call_error)?;
        Ok(proposals
            .into_iter()
            .map(|p| RawProposal {
                title: p.title,
                description: p.description,
                vote_count: p.voteCount,
            })
            .collect())
    }

    async fn has_voted(
        &self,
        proposal_id: u64,
        voter: Address,
    ) -> Result<bool, CallError> {
        self.voting()
            .hasVoted(U256::from(proposal_id), voter)
            .call()
            .await
            .map_err(call_error)
    }

    async fn winner(&self) -> Result<RawWinner, CallError> {
        let winner =
            self.voting().declareWinner().call().await.map_err(call_error)?;
        Ok(RawWinner {
            id: winner.winnerId,
            title: winner.title,
            vote_count: winner.voteCount,
        })
    }

    async fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<U256, CallError> {
        self.token().allowance(owner, spender).call().await.map_err(call_error)
    }

    async fn send(
        &self,
        from: Address,
        mutation: &Mutation,
    ) -> Result<TxHash, CallError> {
        let pending = match mutation {
            Mutation::Approve { spender, amount } => {
                self.token().approve(*spender, *amount).from(from).send().await
            }
            Mutation::CreateProposal { title, description } => {
                self.voting()
                    .createProposal(title.clone(), description.clone())
                    .from(from)
                    .send()
                    .await
            }
            Mutation::Vote { proposal_id } => {
                self.voting()
                    .vote(U256::from(*proposal_id))
                    .from(from)
                    .send()
                    .await
            }
        }
        .map_err(call_error)?;
        Ok(*pending.tx_hash())
    }

    async fn confirm(&self, tx: TxHash) -> Result<Confirmation, CallError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx)
            .get_receipt()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        debug!(%tx, status = receipt.status(), "receipt received");

        // The receipt carries no reason, only the status bit.
        if !receipt.status() {
            return Err(CallError::Reverted(None));
        }
        Ok(Confirmation {
            tx_hash: receipt.transaction_hash(),
            block_number: receipt.block_number(),
            gas_used: receipt.gas_used(),
        })
    }
}

/// Maps a failed contract call to a [`CallError`], keeping the revert reason
/// when the node returned one.
fn call_error(err: alloy::contract::Error) -> CallError {
    let alloy::contract::Error::TransportError(ref e) = err else {
        return CallError::Transport(err.to_string());
    };
    //  ErrorResp(
    //      ErrorPayload {
    //          code: 3,
    //          message: "execution reverted: Already voted",
    //          data: Some(RawValue("0x08c379a0...")),
    //      },
    //  )
    match e.as_error_resp() {
        Some(payload) => {
            let data = payload.as_revert_data().map(|data| data.to_vec());
            classify(payload.code, &payload.message, data.as_deref())
        }
        None => CallError::Transport(err.to_string()),
    }
}

/// Classifies a JSON-RPC error by its `code`, `message` and revert `data`.
pub(crate) fn classify(
    code: i64,
    message: &str,
    data: Option<&[u8]>,
) -> CallError {
    if code == USER_REJECTED {
        return CallError::Rejected;
    }
    if let Some(data) = data {
        let reason = Revert::abi_decode(data)
            .ok()
            .map(|revert| revert.reason)
            .or_else(|| reason_in(message))
            .or_else(|| decode_revert_reason(data));
        return CallError::Reverted(reason);
    }
    if code == EXECUTION_REVERTED || message.contains("revert") {
        return CallError::Reverted(reason_in(message));
    }
    CallError::Transport(format!("{code}: {message}"))
}

/// Reason embedded in a node's revert message, e.g. `execution reverted:
/// Already voted` or `VM Exception while processing transaction: revert
/// Already voted`.
fn reason_in(message: &str) -> Option<String> {
    let rest = ["reverted:", "reverted", "revert"]
        .iter()
        .find_map(|marker| message.split_once(marker).map(|(_, rest)| rest))?;
    let reason = rest.trim_start_matches(':').trim();
    (!reason.is_empty()).then(|| reason.to_owned())
}

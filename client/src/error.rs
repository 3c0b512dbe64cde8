//! Error types for the ballot client.
//!
//! [`CallError`] describes a single failed contract interaction as reported
//! by the backend. [`Error`] is what orchestration operations return; it says
//! which step failed so the caller can tell the user what to do next.
use std::time::Duration;

use alloy::primitives::U256;
use thiserror::Error;

use crate::{tracker::OperationKey, wallet::WalletError};

/// A failed read or write against one of the remote contracts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The signer refused to authorize the request (EIP-1193 code `4001`).
    #[error("request rejected by the signer")]
    Rejected,
    /// The call executed and reverted.
    #[error("execution reverted{}", reason_suffix(.0))]
    Reverted(Option<String>),
    /// The call never produced an answer, e.g. the node was unreachable.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call answered with a value the client can't represent.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CallError {
    /// Revert reason or signer message worth showing to a user, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Rejected => Some("rejected by the signer".to_owned()),
            Self::Reverted(reason) => reason.clone(),
            Self::Transport(_) | Self::Malformed(_) => None,
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// Errors surfaced by the ballot session.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No wallet provider is available. Not recoverable within a session.
    #[error("no wallet provider installed")]
    NotInstalled,
    /// The wallet is connected to another network and could neither switch
    /// nor register the expected one.
    #[error("wrong network: expected chain {expected:#x}, wallet is on {actual:#x}")]
    WrongNetwork {
        /// Chain id the session requires.
        expected: u64,
        /// Chain id the wallet reported.
        actual: u64,
    },
    /// A mutating action was attempted without a connected account.
    #[error("no account connected")]
    NotConnected,
    /// The account is not the contract admin.
    #[error("only the contract admin can do this")]
    NotAdmin,
    /// The token approval needed before a fee-bearing call did not go
    /// through.
    #[error("token allowance could not be granted: {0}")]
    AllowanceFailed(Box<Error>),
    /// A submitted transaction was rejected or reverted.
    #[error("{key} transaction failed{}", reason_suffix(.reason))]
    TransactionFailed {
        /// Operation the transaction belonged to.
        key: OperationKey,
        /// Revert reason, when the node reported one.
        reason: Option<String>,
    },
    /// The transaction was not confirmed within the configured bound.
    #[error("{key} transaction not confirmed after {after:?}")]
    TimedOut {
        /// Operation the transaction belonged to.
        key: OperationKey,
        /// Configured confirmation timeout.
        after: Duration,
    },
    /// Another operation with the same key is still in flight.
    #[error("{0} is already in progress")]
    Busy(OperationKey),
    /// A read against the chain failed.
    #[error("chain read failed: {0}")]
    ReadFailed(#[source] CallError),
    /// The account already voted for this proposal.
    #[error("already voted for proposal {0}")]
    AlreadyVoted(u64),
    /// No proposal with this id is known to the session.
    #[error("unknown proposal {0}")]
    UnknownProposal(u64),
    /// Input rejected before reaching the chain.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The wallet provider returned an error.
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl Error {
    /// Wraps a failure of the approval step.
    #[must_use]
    pub fn allowance(inner: Error) -> Self {
        Self::AllowanceFailed(Box::new(inner))
    }

    /// Builds a [`Error::TransactionFailed`] out of a backend failure.
    #[must_use]
    pub fn transaction(key: OperationKey, err: &CallError) -> Self {
        Self::TransactionFailed { key, reason: err.reason() }
    }
}

/// Shorthand for results of ballot operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Formats a base-unit token amount with 18 decimals, e.g. `10.0`.
///
/// Falls back to the raw integer if the amount can't be formatted.
#[must_use]
pub fn format_tokens(amount: U256) -> String {
    alloy::primitives::utils::format_units(amount, 18)
        .unwrap_or_else(|_| amount.to_string())
}

#[cfg(test)]
mod tests {
    use alloy::primitives::uint;

    use super::*;

    #[test]
    fn reverted_display_includes_reason() {
        let err = CallError::Reverted(Some("Already voted".to_owned()));
        assert_eq!("execution reverted: Already voted", err.to_string());

        let err = CallError::Reverted(None);
        assert_eq!("execution reverted", err.to_string());
    }

    #[test]
    fn transaction_failed_carries_reason() {
        let err = Error::transaction(
            OperationKey::Vote,
            &CallError::Reverted(Some("closed".to_owned())),
        );
        assert_eq!("vote transaction failed: closed", err.to_string());

        let err = Error::transaction(
            OperationKey::Approve,
            &CallError::Transport("connection reset".to_owned()),
        );
        assert!(matches!(
            err,
            Error::TransactionFailed { key: OperationKey::Approve, reason: None }
        ));
    }

    #[test]
    fn wrong_network_renders_hex_chain_ids() {
        let err = Error::WrongNetwork { expected: 1337, actual: 1 };
        assert_eq!(
            "wrong network: expected chain 0x539, wallet is on 0x1",
            err.to_string()
        );
    }

    #[test]
    fn formats_token_amounts() {
        assert_eq!(
            "10.000000000000000000",
            format_tokens(uint!(10_000_000_000_000_000_000_U256))
        );
    }
}

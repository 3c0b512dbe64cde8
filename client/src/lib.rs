/*!
# Ballot client

Client-side orchestration for an on-chain ballot: a voting contract that
charges an ERC-20 fee for new proposals, and the wallet that signs for the
user.

The crate keeps one [`VotingSession`] per user. It

- connects a [`Wallet`] and keeps it on the expected network,
- approves the proposal fee before creating a proposal, and only as much as
  needed,
- tracks every transaction under an [`OperationKey`], rejecting a second
  operation while one with the same key is in flight,
- reloads proposals and the user's votes after every confirmed change, and
  drops everything it knew when the account changes.

## Usage

```ignore
use ballot_client::{AlloyBackend, Config, LocalWallet, VotingSession};

let config = Config::from_env()?;
let wallet = LocalWallet::from_private_keys(&keys, config.network.chain_id)?;
let provider = wallet.provider(&config.network.rpc_urls[0])?;
let backend = AlloyBackend::new(provider, config.voting, config.token);

let session = VotingSession::new(config, Some(wallet), backend);
session.connect().await?;
session.vote(0).await?;
```

Progress is published as [`Event`]s, see [`VotingSession::subscribe`].
*/

#![allow(clippy::module_name_repetitions)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod abi;
pub mod allowance;
pub mod backend;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod local_wallet;
pub mod reconciler;
pub mod session;
pub mod tracker;
pub mod wallet;

#[cfg(test)]
mod mock;

pub use allowance::{ensure_allowance, AllowanceOutcome};
pub use backend::AlloyBackend;
pub use chain::{ChainBackend, ChainClient, Confirmation, Connection, Mutation};
pub use config::Config;
pub use coordinator::{AccountListener, VotingSession};
pub use error::{format_tokens, CallError, Error, Result};
pub use events::{Event, EventBus, Level, Notice, TxStatus};
pub use local_wallet::LocalWallet;
pub use session::{Account, Phase, Proposal, SessionSnapshot, Winner};
pub use tracker::{OperationKey, Tracker};
pub use wallet::{ChainParams, Wallet, WalletError};

//! Session state: who is connected and what the client believes about the
//! chain on their behalf.
//!
//! All of it lives in one [`SessionState`] owned by
//! [`crate::VotingSession`], which mutates it only through the transitions
//! below. Every account change bumps the [`SessionState::epoch`], so work
//! started for a previous account can recognize it is stale.
use std::{collections::BTreeSet, fmt};

use alloy::primitives::{Address, U256};

use crate::tracker::OperationKey;

/// A connected chain account.
///
/// Equality is on the 20 address bytes, so two textual forms that differ
/// only by letter case are the same account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Account(Address);

impl Account {
    /// Wraps an address.
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self(address)
    }

    /// The underlying address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.0
    }

    /// Abbreviated form for display, e.g. `0x5fbd...0aa3`.
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Display for Account {
    /// Lowercase hex, the normalized form used for comparisons in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<Address> for Account {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

/// A proposal as stored by the voting contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Position in the contract's proposal array.
    pub id: u64,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Votes received so far.
    pub vote_count: U256,
}

/// Outcome of the contract's winner computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    /// Id of the winning proposal.
    pub id: u64,
    /// Title of the winning proposal.
    pub title: String,
    /// Votes the winner received.
    pub vote_count: U256,
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No account.
    #[default]
    Disconnected,
    /// Waiting for the wallet to hand out an account.
    Connecting,
    /// Pulling proposals, votes or the winner from the chain.
    Refreshing,
    /// Connected and nothing in flight.
    Idle,
    /// A mutating operation is in flight.
    Pending(OperationKey),
}

/// Mutable session state. Only [`crate::VotingSession`] holds one.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) phase: Phase,
    pub(crate) account: Option<Account>,
    pub(crate) is_admin: bool,
    pub(crate) network_ok: bool,
    pub(crate) proposals: Vec<Proposal>,
    pub(crate) voted: BTreeSet<u64>,
    /// Votes this session saw confirmed. A failed check never drops them.
    pub(crate) confirmed_votes: BTreeSet<u64>,
    pub(crate) winner: Option<Winner>,
    /// Chain the wallet last reported.
    pub(crate) chain_id: Option<u64>,
    pub(crate) epoch: u64,
}

impl SessionState {
    /// Forgets the account and everything derived from it.
    pub(crate) fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = Self { epoch, ..Self::default() };
    }

    /// Switches to `account`, dropping all state that belonged to the
    /// previous one. The admin flag is re-derived by the caller.
    pub(crate) fn switch_account(&mut self, account: Account) {
        let (network_ok, chain_id) = (self.network_ok, self.chain_id);
        self.reset();
        self.account = Some(account);
        self.network_ok = network_ok;
        self.chain_id = chain_id;
        self.phase = Phase::Idle;
    }

    /// Whether `epoch` still names the current account.
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            account: self.account,
            is_admin: self.is_admin,
            network_ok: self.network_ok,
            proposals: self.proposals.clone(),
            voted: self.voted.clone(),
            winner: self.winner.clone(),
            chain_id: self.chain_id,
        }
    }
}

/// A consistent, owned copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    /// Lifecycle phase.
    pub phase: Phase,
    /// Connected account, if any.
    pub account: Option<Account>,
    /// Whether `account` is the contract admin.
    pub is_admin: bool,
    /// Whether the wallet is on the expected network.
    pub network_ok: bool,
    /// Proposals in contract order.
    pub proposals: Vec<Proposal>,
    /// Proposals `account` voted for.
    pub voted: BTreeSet<u64>,
    /// Declared winner, if one was read.
    pub winner: Option<Winner>,
    /// Chain the wallet last reported.
    pub chain_id: Option<u64>,
}

impl SessionSnapshot {
    /// Whether the connected account voted for `proposal_id`.
    #[must_use]
    pub fn has_voted(&self, proposal_id: u64) -> bool {
        self.voted.contains(&proposal_id)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, uint};

    use super::*;

    const ALICE: Address = address!("A11CEacF9aa32246d767FCCD72e02d6bCbcC375d");
    const BOB: Address = address!("B0B0cB49ec2e96DF5F5fFB081acaE66A2cBBc2e2");

    #[test]
    fn accounts_compare_by_address_not_text() {
        let lower: Address = "0xa11ceacf9aa32246d767fccd72e02d6bcbcc375d"
            .parse()
            .expect("should parse lowercase address");
        assert_eq!(Account::new(ALICE), Account::new(lower));
        assert_eq!(
            "0xa11ceacf9aa32246d767fccd72e02d6bcbcc375d",
            Account::new(ALICE).to_string()
        );
    }

    #[test]
    fn short_form() {
        assert_eq!("0xa11c...375d", Account::new(ALICE).short());
    }

    #[test]
    fn switching_account_clears_derived_state() {
        let mut state = SessionState {
            phase: Phase::Idle,
            account: Some(Account::new(ALICE)),
            is_admin: true,
            network_ok: true,
            proposals: vec![Proposal {
                id: 0,
                title: "T".to_owned(),
                description: "D".to_owned(),
                vote_count: uint!(1_U256),
            }],
            voted: BTreeSet::from([0]),
            confirmed_votes: BTreeSet::from([0]),
            winner: Some(Winner {
                id: 0,
                title: "T".to_owned(),
                vote_count: uint!(1_U256),
            }),
            chain_id: Some(1337),
            epoch: 3,
        };

        state.switch_account(Account::new(BOB));

        assert_eq!(Some(Account::new(BOB)), state.account);
        assert!(!state.is_admin);
        assert!(state.network_ok);
        assert!(state.proposals.is_empty());
        assert!(state.voted.is_empty());
        assert!(state.confirmed_votes.is_empty());
        assert_eq!(None, state.winner);
        assert_eq!(4, state.epoch);
        assert!(!state.is_current(3));
    }

    #[test]
    fn reset_is_a_hard_reset() {
        let mut state = SessionState {
            account: Some(Account::new(ALICE)),
            is_admin: true,
            network_ok: true,
            voted: BTreeSet::from([1, 2]),
            ..SessionState::default()
        };
        state.reset();

        assert_eq!(SessionSnapshot::default(), state.snapshot());
        assert_eq!(1, state.epoch);
    }
}

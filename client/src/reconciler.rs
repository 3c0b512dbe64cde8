//! Pulls proposals, vote status and the winner from the chain.
//!
//! These functions only read. Merging their results into the session is
//! left to [`crate::VotingSession`], which discards them if the account
//! changed while they ran.
use std::collections::BTreeSet;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    chain::{ChainBackend, ChainClient},
    error::{CallError, Error, Result},
    session::{Account, Proposal, Winner},
    wallet::Wallet,
};

/// Reads every proposal in one call. The position in the contract's array
/// becomes the id; nothing is reordered or deduplicated.
///
/// # Errors
///
/// * [`crate::Error::ReadFailed`] - If the read failed.
pub async fn refresh_proposals<W: Wallet, B: ChainBackend>(
    client: &ChainClient<W, B>,
) -> Result<Vec<Proposal>> {
    let raw = client.proposals().await?;
    debug!(count = raw.len(), "fetched proposals");
    Ok(raw
        .into_iter()
        .zip(0u64..)
        .map(|(p, id)| Proposal {
            id,
            title: p.title,
            description: p.description,
            vote_count: p.vote_count,
        })
        .collect())
}

/// Result of checking which proposals an account voted for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteScan {
    /// Proposals the chain says the account voted for.
    pub voted: BTreeSet<u64>,
    /// Proposals whose check failed.
    pub unknown: BTreeSet<u64>,
}

impl VoteScan {
    /// Combines the scan with what was known before it.
    ///
    /// A proposal whose check failed keeps its previous membership, since a
    /// vote can't be taken back; it is never newly added. `confirmed` holds
    /// votes backed by a receipt, which always stay.
    #[must_use]
    pub fn merge(
        self,
        previous: &BTreeSet<u64>,
        confirmed: &BTreeSet<u64>,
    ) -> BTreeSet<u64> {
        let mut voted = self.voted;
        voted.extend(self.unknown.intersection(previous));
        voted.extend(confirmed);
        voted
    }
}

/// Checks `voter`'s vote on each proposal, one read per proposal, all
/// issued at once.
///
/// A failed check doesn't stop the others; its id lands in
/// [`VoteScan::unknown`].
pub async fn refresh_voted_set<W: Wallet, B: ChainBackend>(
    client: &ChainClient<W, B>,
    voter: Account,
    proposals: &[Proposal],
) -> VoteScan {
    let checks = proposals.iter().map(|p| async move {
        (p.id, client.has_voted(p.id, voter).await)
    });

    let mut scan = VoteScan::default();
    for (id, outcome) in join_all(checks).await {
        match outcome {
            Ok(true) => {
                scan.voted.insert(id);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(proposal = id, %err, "vote status check failed");
                scan.unknown.insert(id);
            }
        }
    }
    scan
}

/// Reads the contract's winner. A blank title means no winner yet.
///
/// # Errors
///
/// * [`crate::Error::ReadFailed`] - If the read failed or the winner id
///   doesn't fit a proposal index.
pub async fn refresh_winner<W: Wallet, B: ChainBackend>(
    client: &ChainClient<W, B>,
) -> Result<Option<Winner>> {
    let raw = client.winner().await?;
    if raw.title.trim().is_empty() {
        debug!("no winner declared yet");
        return Ok(None);
    }
    let id = u64::try_from(raw.id).map_err(|_| {
        Error::ReadFailed(CallError::Malformed(format!(
            "winner id {} is not a proposal index",
            raw.id
        )))
    })?;
    Ok(Some(Winner {
        id,
        title: raw.title,
        vote_count: raw.vote_count,
    }))
}

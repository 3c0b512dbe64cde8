//! Token allowance ahead of fee-bearing calls.
use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use crate::{
    chain::{ChainBackend, ChainClient, Confirmation, Mutation},
    error::{Error, Result},
    session::Account,
    tracker::{OperationKey, Tracker},
    wallet::Wallet,
};

/// How [`ensure_allowance`] satisfied the requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceOutcome {
    /// The existing allowance already covered the amount. Nothing was sent.
    Sufficient,
    /// An approval for exactly the required amount was confirmed.
    Approved(Confirmation),
}

/// Makes sure `spender` may spend at least `required` base units of the
/// owner's tokens.
///
/// If the current allowance covers `required`, returns without writing.
/// Otherwise approves exactly `required` (not an unlimited amount, not the
/// difference) and waits for that approval to be confirmed.
///
/// # Errors
///
/// * [`Error::ReadFailed`] - If the current allowance couldn't be read.
/// * [`Error::Busy`] - If another approval is in flight.
/// * [`Error::AllowanceFailed`] - If the approval was rejected, reverted or
///   timed out. The fee-bearing call must not go ahead.
pub async fn ensure_allowance<W: Wallet, B: ChainBackend>(
    client: &ChainClient<W, B>,
    tracker: &Tracker,
    owner: Account,
    spender: Address,
    required: U256,
) -> Result<AllowanceOutcome> {
    let current = client.allowance(owner, spender).await?;
    if current >= required {
        debug!(%owner, %spender, %current, %required, "allowance sufficient");
        return Ok(AllowanceOutcome::Sufficient);
    }

    info!(%owner, %spender, %current, %required, "approving tokens");
    let op = tracker.begin(OperationKey::Approve)?;
    let approval = Mutation::Approve { spender, amount: required };
    let confirmation = op
        .track(client.send(Some(owner), approval), |handle| {
            client.confirm(handle)
        })
        .await
        .map_err(Error::allowance)?;
    Ok(AllowanceOutcome::Approved(confirmation))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::uint;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        events::EventBus,
        mock::{MockChain, MockWallet, ALICE, FEE, VOTING},
        wallet::ChainParams,
    };

    fn client(chain: MockChain) -> ChainClient<MockWallet, MockChain> {
        ChainClient::new(
            Some(MockWallet::new(vec![ALICE], 1337)),
            chain,
            ChainParams::ganache(),
        )
    }

    fn tracker() -> Tracker {
        Tracker::new(EventBus::default(), None)
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("should build runtime")
            .block_on(future)
    }

    proptest! {
        #[test]
        fn sufficient_allowance_sends_nothing(
            required in any::<u128>(),
            surplus in any::<u64>(),
        ) {
            let required = U256::from(required);
            let current = required + U256::from(surplus);
            let chain = MockChain::new(ALICE).with_allowance(ALICE, VOTING, current);
            let client = client(chain.clone());

            let outcome = block_on(ensure_allowance(
                &client, &tracker(), Account::new(ALICE), VOTING, required,
            ))
            .expect("should succeed");

            prop_assert_eq!(AllowanceOutcome::Sufficient, outcome);
            prop_assert!(chain.sent().is_empty());
        }

        #[test]
        fn insufficient_allowance_approves_exactly_required(
            current in any::<u64>(),
            shortfall in 1u64..,
        ) {
            let current = U256::from(current);
            let required = current + U256::from(shortfall);
            let chain = MockChain::new(ALICE).with_allowance(ALICE, VOTING, current);
            let client = client(chain.clone());

            let outcome = block_on(ensure_allowance(
                &client, &tracker(), Account::new(ALICE), VOTING, required,
            ))
            .expect("should approve");

            prop_assert!(matches!(outcome, AllowanceOutcome::Approved(_)));
            prop_assert_eq!(
                vec![(ALICE, Mutation::Approve { spender: VOTING, amount: required })],
                chain.sent()
            );
            // Confirmed before returning: the allowance is already in place.
            prop_assert_eq!(required, chain.allowance_of(ALICE, VOTING));
        }
    }

    #[tokio::test]
    async fn fee_approval_from_zero() {
        let chain = MockChain::new(ALICE);
        let client = client(chain.clone());

        ensure_allowance(&client, &tracker(), Account::new(ALICE), VOTING, FEE)
            .await
            .expect("should approve");

        assert_eq!(uint!(10_000_000_000_000_000_000_U256), chain.allowance_of(ALICE, VOTING));
        assert_eq!(1, chain.sent().len());
    }

    #[tokio::test]
    async fn rejected_approval_is_allowance_failed() {
        let chain = MockChain::new(ALICE).rejecting_sends();
        let client = client(chain);

        let err = ensure_allowance(
            &client,
            &tracker(),
            Account::new(ALICE),
            VOTING,
            FEE,
        )
        .await
        .expect_err("should fail");
        let Error::AllowanceFailed(inner) = err else {
            panic!("expected an allowance failure, got {err:?}");
        };
        assert!(matches!(
            *inner,
            Error::TransactionFailed { key: OperationKey::Approve, .. }
        ));
    }

    #[tokio::test]
    async fn reverted_approval_is_allowance_failed() {
        let chain = MockChain::new(ALICE).reverting(OperationKey::Approve);
        let client = client(chain.clone());

        let err = ensure_allowance(&client, &tracker(), Account::new(ALICE), VOTING, FEE)
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::AllowanceFailed(_)));
        assert_eq!(U256::ZERO, chain.allowance_of(ALICE, VOTING));
    }

    #[tokio::test]
    async fn unreadable_allowance_is_read_failed() {
        let chain = MockChain::new(ALICE);
        chain.set_failing_reads(true);
        let client = client(chain.clone());

        let err = ensure_allowance(&client, &tracker(), Account::new(ALICE), VOTING, FEE)
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::ReadFailed(_)));
        assert!(chain.sent().is_empty());
    }
}

//! The voting session: one connected account and everything derived from it.
//!
//! [`VotingSession`] owns the session state and is the only thing that
//! changes it. Reads are issued without holding the state lock; their results
//! are applied under the write lock, and only if the account they were
//! started for is still the current one.
use std::sync::{Arc, Weak};

use alloy::primitives::Address;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        RwLock,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    allowance::{ensure_allowance, AllowanceOutcome},
    chain::{ChainBackend, ChainClient, Confirmation, Connection, Mutation},
    config::Config,
    error::{format_tokens, Error, Result},
    events::{Event, EventBus, Level},
    reconciler::{refresh_proposals, refresh_voted_set, refresh_winner},
    session::{Account, Phase, SessionSnapshot, SessionState, Winner},
    tracker::{OperationKey, Tracker},
    wallet::Wallet,
};

/// What a mutating operation needs to know about the session when it starts.
#[derive(Debug, Clone, Copy)]
struct Ready {
    account: Account,
    epoch: u64,
    is_admin: bool,
}

/// A voting session over wallet `W` and contracts `B`.
#[derive(Debug)]
pub struct VotingSession<W, B> {
    config: Config,
    client: ChainClient<W, B>,
    state: RwLock<SessionState>,
    tracker: Tracker,
    events: EventBus,
}

impl<W: Wallet, B: ChainBackend> VotingSession<W, B> {
    /// Creates a disconnected session. `wallet` is `None` when no provider
    /// is installed; every wallet operation then fails with
    /// [`Error::NotInstalled`].
    pub fn new(config: Config, wallet: Option<W>, backend: B) -> Self {
        let events = EventBus::default();
        let tracker = Tracker::new(events.clone(), config.tx_timeout);
        let client = ChainClient::new(wallet, backend, config.network.clone());
        Self { config, client, state: RwLock::default(), tracker, events }
    }

    /// Returns a receiver for status updates and notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The configuration the session runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wallet and contract access.
    pub fn client(&self) -> &ChainClient<W, B> {
        &self.client
    }

    /// In-flight operations and their last transaction status.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// A consistent copy of the session state.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.state.read().await.snapshot();
        if snapshot.account.is_some() {
            if let Some(key) = self.tracker.in_flight() {
                snapshot.phase = Phase::Pending(key);
            }
        }
        snapshot
    }

    /// The connected account, if any.
    pub async fn current_account(&self) -> Option<Account> {
        self.state.read().await.account
    }

    /// Whether the connected account is the contract admin.
    pub async fn is_admin(&self) -> bool {
        self.state.read().await.is_admin
    }

    /// Picks up an account the wallet already authorized, without prompting
    /// the user. Returns `None` if there is no wallet or no such account.
    ///
    /// The network is checked but not switched.
    ///
    /// # Errors
    ///
    /// * [`Error::Wallet`] - If the wallet failed to answer.
    /// * [`Error::ReadFailed`] - If loading the account's state failed.
    pub async fn restore(&self) -> Result<Option<Account>> {
        let result = self.restore_inner().await;
        self.conclude(None, result)
    }

    async fn restore_inner(&self) -> Result<Option<Account>> {
        let accounts = match self.client.authorized_accounts().await {
            Ok(accounts) => accounts,
            Err(Error::NotInstalled) => {
                debug!("no wallet installed, nothing to restore");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let Some(&first) = accounts.first() else {
            debug!("no authorized account to restore");
            return Ok(None);
        };

        let account = Account::new(first);
        let epoch = {
            let mut state = self.state.write().await;
            state.switch_account(account);
            state.epoch
        };
        self.observe_network(epoch).await?;
        info!(%account, "restored session");

        self.sync(account, epoch).await?;
        Ok(Some(account))
    }

    /// Asks the wallet for an account, bringing it to the expected network
    /// first, and loads that account's state.
    ///
    /// A wallet that stays on the wrong network still connects; mutations
    /// then fail with [`Error::WrongNetwork`] until the network is fixed.
    ///
    /// # Errors
    ///
    /// * [`Error::NotInstalled`] - If there is no wallet.
    /// * [`Error::NotConnected`] - If the wallet authorized no account.
    /// * [`Error::Wallet`] - If the user declined.
    /// * [`Error::ReadFailed`] - If loading the account's state failed.
    pub async fn connect(&self) -> Result<Connection> {
        let result = self.connect_inner().await;
        self.conclude(None, result)
    }

    async fn connect_inner(&self) -> Result<Connection> {
        {
            let mut state = self.state.write().await;
            if state.account.is_none() {
                state.phase = Phase::Connecting;
            }
        }

        let connection = match self.client.connect().await {
            Ok(connection) => connection,
            Err(err) => {
                let mut state = self.state.write().await;
                if state.account.is_none() {
                    state.phase = Phase::Disconnected;
                }
                return Err(err);
            }
        };

        let Connection { account, network_ok, chain_id } = connection;
        let epoch = {
            let mut state = self.state.write().await;
            if state.account != Some(account) {
                state.switch_account(account);
            }
            state.network_ok = network_ok;
            state.chain_id = Some(chain_id);
            state.epoch
        };
        info!(%account, network_ok, "connected");

        if !network_ok {
            let err = Error::WrongNetwork {
                expected: self.config.network.chain_id,
                actual: chain_id,
            };
            self.events.notify(Level::Error, None, err.to_string());
        }

        self.sync(account, epoch).await?;
        self.events.notify(
            Level::Success,
            None,
            format!("Connected as {}", account.short()),
        );
        Ok(connection)
    }

    /// Forgets the account and everything derived from it.
    pub async fn disconnect(&self) {
        self.state.write().await.reset();
        info!("disconnected");
        self.events.notify(Level::Info, None, "Wallet disconnected");
    }

    /// Applies an account change reported by the wallet.
    ///
    /// No accounts means the wallet disconnected. Otherwise the first
    /// account becomes current, everything derived from the previous one is
    /// dropped in the same step, and the new account's state is loaded. If
    /// the first account is already current, only its admin flag is
    /// derived again.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadFailed`] - If loading the account's state failed.
    pub async fn on_accounts_changed(&self, accounts: Vec<Address>) -> Result<()> {
        let result = self.on_accounts_changed_inner(&accounts).await;
        self.conclude(None, result)
    }

    async fn on_accounts_changed_inner(&self, accounts: &[Address]) -> Result<()> {
        let Some(&first) = accounts.first() else {
            self.disconnect().await;
            return Ok(());
        };

        let account = Account::new(first);
        let (epoch, unchanged) = {
            let mut state = self.state.write().await;
            let unchanged = state.account == Some(account);
            if !unchanged {
                state.switch_account(account);
            }
            (state.epoch, unchanged)
        };
        if unchanged {
            debug!(%account, "account unchanged, checking admin");
            return self.refresh_admin(account, epoch).await;
        }
        info!(%account, "account changed");
        self.events.notify(
            Level::Info,
            None,
            format!("Switched to {}", account.short()),
        );

        let network = self.observe_network(epoch).await;
        let synced = self.sync(account, epoch).await;
        network.and(synced)
    }

    /// Reloads proposals and the connected account's votes.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - If no account is connected.
    /// * [`Error::ReadFailed`] - If the proposals couldn't be read. The
    ///   previous state is kept.
    pub async fn refresh(&self) -> Result<()> {
        let result = match self.current().await {
            Ok((account, epoch)) => self.refresh_inner(account, epoch).await,
            Err(err) => Err(err),
        };
        self.conclude(None, result)
    }

    /// Reloads the contract's winner.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - If no account is connected.
    /// * [`Error::ReadFailed`] - If the winner couldn't be read.
    pub async fn refresh_winner(&self) -> Result<Option<Winner>> {
        let result = match self.current().await {
            Ok((_, epoch)) => self.refresh_winner_inner(epoch).await,
            Err(err) => Err(err),
        };
        self.conclude(None, result)
    }

    /// Creates a proposal, paying the proposal fee.
    ///
    /// Title and description are trimmed. If the voting contract may not yet
    /// spend the fee, an approval for exactly the fee is confirmed first.
    /// Proposals are reloaded before this returns.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidInput`] - If title or description is blank.
    /// * [`Error::NotConnected`] - If no account is connected.
    /// * [`Error::WrongNetwork`] - If the wallet is on another network.
    /// * [`Error::NotAdmin`] - If the account is not the admin.
    /// * [`Error::Busy`] - If a proposal creation is already in flight.
    /// * [`Error::AllowanceFailed`] - If the fee approval didn't go through.
    ///   No proposal is submitted then.
    /// * [`Error::TransactionFailed`] - If the creation was rejected or
    ///   reverted.
    /// * [`Error::TimedOut`] - If a confirmation took too long.
    /// * [`Error::ReadFailed`] - If reloading failed after confirmation.
    pub async fn create_proposal(
        &self,
        title: &str,
        description: &str,
    ) -> Result<Confirmation> {
        let result = self.create_proposal_inner(title, description).await;
        self.conclude(Some(OperationKey::CreateProposal), result)
    }

    async fn create_proposal_inner(
        &self,
        title: &str,
        description: &str,
    ) -> Result<Confirmation> {
        let title = title.trim();
        let description = description.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title must not be blank"));
        }
        if description.is_empty() {
            return Err(Error::InvalidInput("description must not be blank"));
        }

        let ready = self.ready().await?;
        if !ready.is_admin {
            return Err(Error::NotAdmin);
        }
        let op = self.tracker.begin(OperationKey::CreateProposal)?;

        let fee = self.config.proposal_fee;
        let outcome = ensure_allowance(
            &self.client,
            &self.tracker,
            ready.account,
            self.config.voting,
            fee,
        )
        .await?;
        if let AllowanceOutcome::Approved(_) = outcome {
            self.events.notify(
                Level::Success,
                Some(OperationKey::Approve),
                format!("Approved {} tokens for the proposal fee", format_tokens(fee)),
            );
        }

        let creation = Mutation::CreateProposal {
            title: title.to_owned(),
            description: description.to_owned(),
        };
        let confirmation = op
            .track(self.client.send(Some(ready.account), creation), |handle| {
                self.client.confirm(handle)
            })
            .await?;

        self.refresh_inner(ready.account, ready.epoch).await?;
        self.events.notify(
            Level::Success,
            Some(OperationKey::CreateProposal),
            format!("Proposal \"{title}\" created"),
        );
        Ok(confirmation)
    }

    /// Votes for `proposal_id` and reloads proposals and votes.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - If no account is connected.
    /// * [`Error::WrongNetwork`] - If the wallet is on another network.
    /// * [`Error::AlreadyVoted`] - If the account already voted for it. No
    ///   transaction is sent.
    /// * [`Error::UnknownProposal`] - If no such proposal was loaded.
    /// * [`Error::Busy`] - If a vote is already in flight.
    /// * [`Error::TransactionFailed`] - If the vote was rejected or reverted.
    /// * [`Error::TimedOut`] - If the confirmation took too long.
    /// * [`Error::ReadFailed`] - If reloading failed after confirmation. The
    ///   vote itself stands.
    pub async fn vote(&self, proposal_id: u64) -> Result<Confirmation> {
        let result = self.vote_inner(proposal_id).await;
        self.conclude(Some(OperationKey::Vote), result)
    }

    async fn vote_inner(&self, proposal_id: u64) -> Result<Confirmation> {
        let ready = self.ready().await?;
        {
            let state = self.state.read().await;
            if state.voted.contains(&proposal_id) {
                return Err(Error::AlreadyVoted(proposal_id));
            }
            if !state.proposals.iter().any(|p| p.id == proposal_id) {
                return Err(Error::UnknownProposal(proposal_id));
            }
        }
        let op = self.tracker.begin(OperationKey::Vote)?;

        let ballot = Mutation::Vote { proposal_id };
        let confirmation = op
            .track(self.client.send(Some(ready.account), ballot), |handle| {
                self.client.confirm(handle)
            })
            .await?;

        {
            let mut state = self.state.write().await;
            if state.is_current(ready.epoch) {
                state.voted.insert(proposal_id);
                state.confirmed_votes.insert(proposal_id);
            }
        }

        self.refresh_inner(ready.account, ready.epoch).await?;
        self.events.notify(
            Level::Success,
            Some(OperationKey::Vote),
            format!("Vote for proposal {proposal_id} recorded"),
        );
        Ok(confirmation)
    }

    /// Reads the contract's winner computation and stores the result.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - If no account is connected.
    /// * [`Error::WrongNetwork`] - If the wallet is on another network.
    /// * [`Error::NotAdmin`] - If the account is not the admin.
    /// * [`Error::Busy`] - If a winner lookup is already in flight.
    /// * [`Error::ReadFailed`] - If the read failed.
    pub async fn declare_winner(&self) -> Result<Option<Winner>> {
        let result = self.declare_winner_inner().await;
        self.conclude(Some(OperationKey::DeclareWinner), result)
    }

    async fn declare_winner_inner(&self) -> Result<Option<Winner>> {
        let ready = self.ready().await?;
        if !ready.is_admin {
            return Err(Error::NotAdmin);
        }
        let _op = self.tracker.begin(OperationKey::DeclareWinner)?;

        let winner = self.refresh_winner_inner(ready.epoch).await?;
        let message = match &winner {
            Some(w) => format!("Winner: \"{}\" with {} votes", w.title, w.vote_count),
            None => "No winner yet".to_owned(),
        };
        self.events.notify(Level::Success, Some(OperationKey::DeclareWinner), message);
        Ok(winner)
    }

    /// Reloads the admin flag, proposals, votes and the winner for `account`.
    /// Every part is attempted; the first failure is returned.
    async fn sync(&self, account: Account, epoch: u64) -> Result<()> {
        let admin = self.refresh_admin(account, epoch).await;
        let proposals = self.refresh_inner(account, epoch).await;
        let winner = self.refresh_winner_inner(epoch).await;
        admin.and(proposals).and(winner.map(drop))
    }

    /// Records the wallet's chain without switching it.
    async fn observe_network(&self, epoch: u64) -> Result<()> {
        let chain_id = self.client.wallet()?.chain_id().await?;
        let mut state = self.state.write().await;
        if state.is_current(epoch) {
            state.network_ok = chain_id == self.config.network.chain_id;
            state.chain_id = Some(chain_id);
            debug!(chain_id, network_ok = state.network_ok, "network observed");
        }
        Ok(())
    }

    async fn refresh_admin(&self, account: Account, epoch: u64) -> Result<()> {
        let admin = self.client.admin().await?;
        let mut state = self.state.write().await;
        if state.is_current(epoch) {
            state.is_admin = admin == account.address();
            debug!(%account, is_admin = state.is_admin, "admin flag derived");
        }
        Ok(())
    }

    async fn refresh_inner(&self, account: Account, epoch: u64) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.is_current(epoch) {
                return Ok(());
            }
            state.phase = Phase::Refreshing;
        }

        let fetched = match refresh_proposals(&self.client).await {
            Ok(proposals) => {
                let scan = refresh_voted_set(&self.client, account, &proposals).await;
                Ok((proposals, scan))
            }
            Err(err) => Err(err),
        };

        let mut state = self.state.write().await;
        if !state.is_current(epoch) {
            debug!(%account, "discarding refresh for previous account");
            return Ok(());
        }
        state.phase = Phase::Idle;
        let (proposals, scan) = fetched?;
        state.voted = scan.merge(&state.voted, &state.confirmed_votes);
        state.proposals = proposals;
        debug!(
            %account,
            proposals = state.proposals.len(),
            voted = state.voted.len(),
            "refreshed"
        );
        Ok(())
    }

    async fn refresh_winner_inner(&self, epoch: u64) -> Result<Option<Winner>> {
        let winner = refresh_winner(&self.client).await?;
        let mut state = self.state.write().await;
        if state.is_current(epoch) {
            state.winner.clone_from(&winner);
        }
        Ok(winner)
    }

    /// The connected account and its epoch.
    async fn current(&self) -> Result<(Account, u64)> {
        let state = self.state.read().await;
        let account = state.account.ok_or(Error::NotConnected)?;
        Ok((account, state.epoch))
    }

    /// Checks that a mutation may start: an account is connected and the
    /// wallet is on the expected network, switching it there if needed.
    async fn ready(&self) -> Result<Ready> {
        let (ready, network_ok) = {
            let state = self.state.read().await;
            let account = state.account.ok_or(Error::NotConnected)?;
            let ready = Ready { account, epoch: state.epoch, is_admin: state.is_admin };
            (ready, state.network_ok)
        };

        if !network_ok {
            self.client.ensure_network().await?;
            let mut state = self.state.write().await;
            if state.is_current(ready.epoch) {
                state.network_ok = true;
                state.chain_id = Some(self.config.network.chain_id);
            }
        }
        Ok(ready)
    }

    /// Publishes a failed operation as an error notice.
    fn conclude<T>(&self, key: Option<OperationKey>, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            warn!(key = ?key, %err, "operation failed");
            self.events.notify(Level::Error, key, err.to_string());
        }
        result
    }
}

impl<W, B> VotingSession<W, B>
where
    W: Wallet + 'static,
    B: ChainBackend + 'static,
{
    /// Applies the wallet's account changes as they happen, until the
    /// returned listener is dropped or the session goes away.
    ///
    /// # Errors
    ///
    /// * [`Error::NotInstalled`] - If there is no wallet.
    pub fn listen(self: &Arc<Self>) -> Result<AccountListener> {
        let changes = self.client.wallet()?.subscribe();
        let session = Arc::downgrade(self);
        let task = tokio::spawn(follow_accounts(session, changes));
        debug!("listening for account changes");
        Ok(AccountListener { task })
    }
}

async fn follow_accounts<W, B>(
    session: Weak<VotingSession<W, B>>,
    mut changes: broadcast::Receiver<Vec<Address>>,
) where
    W: Wallet + 'static,
    B: ChainBackend + 'static,
{
    loop {
        let accounts = match changes.recv().await {
            Ok(accounts) => Some(accounts),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed account changes, asking the wallet");
                None
            }
            Err(RecvError::Closed) => break,
        };
        let Some(session) = session.upgrade() else { break };

        let accounts = match accounts {
            Some(accounts) => accounts,
            None => match session.client.authorized_accounts().await {
                Ok(accounts) => accounts,
                Err(err) => {
                    warn!(%err, "failed to read accounts");
                    continue;
                }
            },
        };
        // Failures are already published as notices.
        let _ = session.on_accounts_changed(accounts).await;
    }
    debug!("account listener stopped");
}

/// Keeps a session following the wallet's account changes. Dropping it
/// stops the listener.
#[derive(Debug)]
#[must_use = "the listener stops as soon as this is dropped"]
pub struct AccountListener {
    task: JoinHandle<()>,
}

impl Drop for AccountListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

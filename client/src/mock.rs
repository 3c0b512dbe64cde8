//! In-memory wallet and contracts for unit tests.
//!
//! [`MockChain`] behaves like the deployed voting and token contracts: votes
//! are one per account, creating a proposal is admin-only and spends the
//! proposal fee from the admin's allowance. Clones share state, so a test
//! can keep a handle after moving one into a session.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use alloy::primitives::{address, uint, Address, TxHash, B256, U256};
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use crate::{
    chain::{ChainBackend, Confirmation, Mutation, RawProposal, RawWinner},
    error::CallError,
    tracker::OperationKey,
    wallet::{ChainParams, Wallet, WalletError, UNRECOGNIZED_CHAIN, USER_REJECTED},
};

pub(crate) const ALICE: Address = address!("A11CEacF9aa32246d767FCCD72e02d6bCbcC375d");
pub(crate) const BOB: Address = address!("B0B0cB49ec2e96DF5F5fFB081acaE66A2cBBc2e2");
pub(crate) const VOTING: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub(crate) const TOKEN: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
pub(crate) const FEE: U256 = uint!(10_000_000_000_000_000_000_U256);

#[derive(Debug, Default)]
struct ChainState {
    admin: Address,
    proposals: Vec<RawProposal>,
    votes: HashSet<(u64, Address)>,
    allowances: HashMap<(Address, Address), U256>,
    winner: Option<RawWinner>,
    sent: Vec<(Address, Mutation)>,
    queued: HashMap<TxHash, (Address, Mutation)>,
    reads: usize,
    reject_sends: bool,
    reverting: HashSet<OperationKey>,
    stalling: bool,
    failing_reads: bool,
    failing_has_voted: HashSet<u64>,
    gate: Option<Arc<Notify>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub(crate) fn new(admin: Address) -> Self {
        let chain = Self::default();
        chain.lock().admin = admin;
        chain
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("mock chain lock poisoned")
    }

    pub(crate) fn with_proposals(self, proposals: &[(&str, &str)]) -> Self {
        self.lock().proposals.extend(proposals.iter().map(|(t, d)| {
            RawProposal {
                title: (*t).to_owned(),
                description: (*d).to_owned(),
                vote_count: U256::ZERO,
            }
        }));
        self
    }

    pub(crate) fn with_vote(self, proposal_id: u64, voter: Address) -> Self {
        {
            let mut state = self.lock();
            state.votes.insert((proposal_id, voter));
            let index = usize::try_from(proposal_id).expect("small id");
            state.proposals[index].vote_count += U256::from(1);
        }
        self
    }

    pub(crate) fn with_allowance(
        self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Self {
        self.lock().allowances.insert((owner, spender), amount);
        self
    }

    pub(crate) fn with_winner(self, id: u64, title: &str, votes: u64) -> Self {
        self.lock().winner = Some(RawWinner {
            id: U256::from(id),
            title: title.to_owned(),
            vote_count: U256::from(votes),
        });
        self
    }

    pub(crate) fn rejecting_sends(self) -> Self {
        self.lock().reject_sends = true;
        self
    }

    pub(crate) fn reverting(self, key: OperationKey) -> Self {
        self.lock().reverting.insert(key);
        self
    }

    pub(crate) fn stalling(self) -> Self {
        self.lock().stalling = true;
        self
    }

    pub(crate) fn failing_has_voted(self, proposal_id: u64) -> Self {
        self.lock().failing_has_voted.insert(proposal_id);
        self
    }

    /// Confirmations wait until [`MockChain::release`] is called.
    pub(crate) fn gated(self) -> Self {
        self.lock().gate = Some(Arc::new(Notify::new()));
        self
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.lock().gate {
            gate.notify_one();
        }
    }

    pub(crate) fn set_winner_id(&self, id: U256) {
        if let Some(winner) = &mut self.lock().winner {
            winner.id = id;
        }
    }

    pub(crate) fn set_admin(&self, admin: Address) {
        self.lock().admin = admin;
    }

    pub(crate) fn set_failing_reads(&self, failing: bool) {
        self.lock().failing_reads = failing;
    }

    pub(crate) fn sent(&self) -> Vec<(Address, Mutation)> {
        self.lock().sent.clone()
    }

    pub(crate) fn reads(&self) -> usize {
        self.lock().reads
    }

    pub(crate) fn allowance_of(&self, owner: Address, spender: Address) -> U256 {
        self.lock().allowances.get(&(owner, spender)).copied().unwrap_or_default()
    }

    pub(crate) fn vote_count(&self, proposal_id: u64) -> U256 {
        let index = usize::try_from(proposal_id).expect("small id");
        self.lock().proposals[index].vote_count
    }

    fn read(&self) -> Result<MutexGuard<'_, ChainState>, CallError> {
        let mut state = self.lock();
        state.reads += 1;
        if state.failing_reads {
            return Err(CallError::Transport("connection refused".to_owned()));
        }
        Ok(state)
    }

    fn apply(
        state: &mut ChainState,
        from: Address,
        mutation: &Mutation,
    ) -> Result<(), CallError> {
        let revert = |reason: &str| Err(CallError::Reverted(Some(reason.to_owned())));
        if state.reverting.contains(&mutation.key()) {
            return revert("forced revert");
        }
        match mutation {
            Mutation::Approve { spender, amount } => {
                state.allowances.insert((from, *spender), *amount);
            }
            Mutation::CreateProposal { title, description } => {
                if from != state.admin {
                    return revert("Only admin can call this");
                }
                let allowance = state
                    .allowances
                    .get(&(from, VOTING))
                    .copied()
                    .unwrap_or_default();
                if allowance < FEE {
                    return revert("ERC20: insufficient allowance");
                }
                state.allowances.insert((from, VOTING), allowance - FEE);
                state.proposals.push(RawProposal {
                    title: title.clone(),
                    description: description.clone(),
                    vote_count: U256::ZERO,
                });
            }
            Mutation::Vote { proposal_id } => {
                let Ok(index) = usize::try_from(*proposal_id) else {
                    return revert("Invalid proposal");
                };
                if index >= state.proposals.len() {
                    return revert("Invalid proposal");
                }
                if !state.votes.insert((*proposal_id, from)) {
                    return revert("Already voted");
                }
                state.proposals[index].vote_count += U256::from(1);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainBackend for MockChain {
    async fn admin(&self) -> Result<Address, CallError> {
        Ok(self.read()?.admin)
    }

    async fn proposals(&self) -> Result<Vec<RawProposal>, CallError> {
        Ok(self.read()?.proposals.clone())
    }

    async fn has_voted(
        &self,
        proposal_id: u64,
        voter: Address,
    ) -> Result<bool, CallError> {
        let state = self.read()?;
        if state.failing_has_voted.contains(&proposal_id) {
            return Err(CallError::Transport("timeout".to_owned()));
        }
        Ok(state.votes.contains(&(proposal_id, voter)))
    }

    async fn winner(&self) -> Result<RawWinner, CallError> {
        let state = self.read()?;
        Ok(state.winner.clone().unwrap_or(RawWinner {
            id: U256::ZERO,
            title: String::new(),
            vote_count: U256::ZERO,
        }))
    }

    async fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<U256, CallError> {
        let state = self.read()?;
        Ok(state.allowances.get(&(owner, spender)).copied().unwrap_or_default())
    }

    async fn send(
        &self,
        from: Address,
        mutation: &Mutation,
    ) -> Result<TxHash, CallError> {
        let mut state = self.lock();
        if state.reject_sends {
            return Err(CallError::Rejected);
        }
        state.sent.push((from, mutation.clone()));
        let nonce = u8::try_from(state.sent.len()).expect("few transactions");
        let hash = B256::repeat_byte(nonce);
        state.queued.insert(hash, (from, mutation.clone()));
        Ok(hash)
    }

    async fn confirm(&self, tx: TxHash) -> Result<Confirmation, CallError> {
        let (stalling, gate) = {
            let state = self.lock();
            (state.stalling, state.gate.clone())
        };
        if stalling {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.lock();
        let (from, mutation) = state
            .queued
            .remove(&tx)
            .ok_or_else(|| CallError::Transport("unknown transaction".to_owned()))?;
        Self::apply(&mut state, from, &mutation)?;
        Ok(Confirmation { tx_hash: tx, block_number: Some(1), gas_used: 21_000 })
    }
}

#[derive(Debug)]
struct WalletState {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: u64,
    known: Vec<u64>,
    registered: Vec<ChainParams>,
    fail_registration: bool,
    switch_error: Option<WalletError>,
    requests: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockWallet {
    state: Arc<Mutex<WalletState>>,
    events: broadcast::Sender<Vec<Address>>,
}

impl MockWallet {
    pub(crate) fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(WalletState {
                accounts,
                authorized: true,
                chain_id,
                known: vec![chain_id],
                registered: Vec::new(),
                fail_registration: false,
                switch_error: None,
                requests: Vec::new(),
            })),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().expect("mock wallet lock poisoned")
    }

    fn log(&self, request: &str) -> MutexGuard<'_, WalletState> {
        let mut state = self.lock();
        state.requests.push(request.to_owned());
        state
    }

    pub(crate) fn knowing(self, chain_id: u64) -> Self {
        self.lock().known.push(chain_id);
        self
    }

    pub(crate) fn failing_registration(self) -> Self {
        self.lock().fail_registration = true;
        self
    }

    pub(crate) fn failing_switch(self, err: WalletError) -> Self {
        self.lock().switch_error = Some(err);
        self
    }

    pub(crate) fn unauthorized(self) -> Self {
        self.lock().authorized = false;
        self
    }

    /// Simulates the user switching or disconnecting accounts.
    pub(crate) fn emit(&self, accounts: Vec<Address>) {
        self.lock().accounts.clone_from(&accounts);
        let _ = self.events.send(accounts);
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub(crate) fn registered(&self) -> Vec<ChainParams> {
        self.lock().registered.clone()
    }

    pub(crate) fn current_chain(&self) -> u64 {
        self.lock().chain_id
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        let state = self.log("eth_accounts");
        Ok(if state.authorized { state.accounts.clone() } else { Vec::new() })
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        let mut state = self.log("eth_requestAccounts");
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.log("eth_chainId").chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let mut state = self.log("wallet_switchEthereumChain");
        if let Some(err) = state.switch_error.clone() {
            return Err(err);
        }
        if !state.known.contains(&chain_id) {
            return Err(WalletError::new(
                UNRECOGNIZED_CHAIN,
                format!("Unrecognized chain ID {chain_id:#x}"),
            ));
        }
        state.chain_id = chain_id;
        Ok(())
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), WalletError> {
        let mut state = self.log("wallet_addEthereumChain");
        if state.fail_registration {
            return Err(WalletError::new(USER_REJECTED, "User rejected the request."));
        }
        state.registered.push(params.clone());
        state.known.push(params.chain_id);
        state.chain_id = params.chain_id;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<Address>> {
        self.events.subscribe()
    }
}

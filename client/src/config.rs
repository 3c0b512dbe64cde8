//! Session configuration.
//!
//! Contract addresses and the proposal fee are deployment facts, so they are
//! read from the environment rather than compiled in.
use std::time::Duration;

use alloy::primitives::{
    utils::{parse_units, ParseUnits},
    Address, U256,
};
use eyre::{bail, Context, ContextCompat};

use crate::wallet::ChainParams;

/// Address of the voting contract.
pub const VOTING_ADDRESS_ENV_VAR_NAME: &str = "VOTING_CONTRACT_ADDRESS";
/// Address of the fee token contract.
pub const TOKEN_ADDRESS_ENV_VAR_NAME: &str = "TOKEN_ADDRESS";
/// Proposal fee in whole tokens, e.g. `10` or `2.5`.
pub const PROPOSAL_FEE_ENV_VAR_NAME: &str = "PROPOSAL_FEE";
/// RPC endpoint advertised when registering the chain with a wallet.
pub const RPC_URL_ENV_VAR_NAME: &str = "RPC_URL";
/// Expected chain id, decimal or `0x`-prefixed.
pub const CHAIN_ID_ENV_VAR_NAME: &str = "CHAIN_ID";
/// Confirmation timeout in seconds, `0` waits forever.
pub const TX_TIMEOUT_ENV_VAR_NAME: &str = "TX_TIMEOUT_SECS";

/// Decimals of the fee token.
pub const TOKEN_DECIMALS: u8 = 18;
/// Fee charged for creating a proposal, in whole tokens.
pub const DEFAULT_PROPOSAL_FEE: &str = "10";
/// How long a transaction may stay unconfirmed by default.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a session needs to know about the deployment it talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Voting contract address. Also the spender of the proposal fee.
    pub voting: Address,
    /// Fee token contract address.
    pub token: Address,
    /// Proposal fee in token base units.
    pub proposal_fee: U256,
    /// The network the session must run on.
    pub network: ChainParams,
    /// Upper bound on waiting for a confirmation. `None` waits forever.
    pub tx_timeout: Option<Duration>,
}

impl Config {
    /// Configuration for a local Ganache deployment with default fee and
    /// timeout.
    #[must_use]
    pub fn new(voting: Address, token: Address) -> Self {
        Self {
            voting,
            token,
            proposal_fee: U256::from(10u64)
                * U256::from(10u64).pow(U256::from(TOKEN_DECIMALS)),
            network: ChainParams::ganache(),
            tx_timeout: Some(DEFAULT_TX_TIMEOUT),
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// May fail if a required variable is missing or any variable doesn't
    /// parse.
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// May fail if a required variable is missing or any variable doesn't
    /// parse.
    pub fn from_lookup<F>(lookup: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> eyre::Result<String> {
            lookup(name).with_context(|| format!("failed to load {name}"))
        };

        let voting = parse_address(&required(VOTING_ADDRESS_ENV_VAR_NAME)?)
            .wrap_err(format!("invalid {VOTING_ADDRESS_ENV_VAR_NAME}"))?;
        let token = parse_address(&required(TOKEN_ADDRESS_ENV_VAR_NAME)?)
            .wrap_err(format!("invalid {TOKEN_ADDRESS_ENV_VAR_NAME}"))?;

        let fee = lookup(PROPOSAL_FEE_ENV_VAR_NAME)
            .unwrap_or_else(|| DEFAULT_PROPOSAL_FEE.to_owned());
        let proposal_fee = parse_fee(&fee)
            .wrap_err(format!("invalid {PROPOSAL_FEE_ENV_VAR_NAME}"))?;

        let chain_id = match lookup(CHAIN_ID_ENV_VAR_NAME) {
            Some(raw) => parse_chain_id(&raw)
                .wrap_err(format!("invalid {CHAIN_ID_ENV_VAR_NAME}"))?,
            None => ChainParams::ganache().chain_id,
        };
        let network = match lookup(RPC_URL_ENV_VAR_NAME) {
            Some(url) => ChainParams::local(chain_id, url),
            None => ChainParams { chain_id, ..ChainParams::ganache() },
        };

        let tx_timeout = match lookup(TX_TIMEOUT_ENV_VAR_NAME) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .wrap_err(format!("invalid {TX_TIMEOUT_ENV_VAR_NAME}"))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(DEFAULT_TX_TIMEOUT),
        };

        Ok(Self { voting, token, proposal_fee, network, tx_timeout })
    }
}

fn parse_address(raw: &str) -> eyre::Result<Address> {
    Ok(raw.trim().parse::<Address>()?)
}

/// Converts a decimal token amount into base units.
///
/// # Errors
///
/// May fail if `raw` is not a decimal number, is negative or has more than
/// [`TOKEN_DECIMALS`] fractional digits.
pub fn parse_fee(raw: &str) -> eyre::Result<U256> {
    match parse_units(raw.trim(), TOKEN_DECIMALS)? {
        ParseUnits::U256(amount) => Ok(amount),
        ParseUnits::I256(_) => bail!("fee must not be negative"),
    }
}

fn parse_chain_id(raw: &str) -> eyre::Result<u64> {
    let raw = raw.trim();
    let id = match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => raw.parse()?,
    };
    Ok(id)
}

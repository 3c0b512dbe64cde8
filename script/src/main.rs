//! Command line driver for the ballot client.
//!
//! Signs with local private keys and talks to the node at `RPC_URL`. See
//! [`ballot_client::config`] for the contract settings read from the
//! environment.
use alloy::providers::{Provider, ProviderBuilder};
use ballot_client::{
    format_tokens, AlloyBackend, Config, Event, Level, LocalWallet, Notice,
    TxStatus, VotingSession,
};
use clap::{Parser, Subcommand};
use eyre::{Context, ContextCompat};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Comma separated hex private keys.
    #[arg(
        long,
        env = "PRIVATE_KEYS",
        value_delimiter = ',',
        hide_env_values = true,
        required = true
    )]
    private_keys: Vec<String>,

    /// Index of the key to act as.
    #[arg(short, long, default_value_t = 0)]
    account: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List proposals, marking the ones voted for.
    Proposals,
    /// Vote for a proposal.
    Vote {
        /// Proposal id.
        id: u64,
    },
    /// Create a proposal, paying the proposal fee. Admin only.
    Create {
        /// Proposal title.
        title: String,
        /// Proposal description.
        description: String,
    },
    /// Show the proposal with the most votes. Admin only.
    Winner,
    /// Show account, network and fee.
    Status,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let rpc_url = config
        .network
        .rpc_urls
        .first()
        .cloned()
        .context("no rpc url configured")?;

    let node_chain = ProviderBuilder::new()
        .connect_http(rpc_url.parse().wrap_err("invalid rpc url")?)
        .get_chain_id()
        .await
        .wrap_err(format!("failed to reach {rpc_url}"))?;
    info!(chain_id = node_chain, %rpc_url, "node reachable");

    let wallet = LocalWallet::from_private_keys(&cli.private_keys, node_chain)?;
    wallet.select_account(cli.account)?;
    let backend =
        AlloyBackend::new(wallet.provider(&rpc_url)?, config.voting, config.token);
    let session = VotingSession::new(config, Some(wallet), backend);

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let outcome = run(&session, cli.command).await;

    // Closing the channel lets the printer drain what is left.
    drop(session);
    printer.await?;
    outcome
}

async fn run<P: Provider>(
    session: &VotingSession<LocalWallet, AlloyBackend<P>>,
    command: Command,
) -> eyre::Result<()> {
    let connection = session.connect().await?;
    eyre::ensure!(
        connection.network_ok,
        "wallet is on chain {:#x}, expected {}",
        connection.chain_id,
        session.config().network.chain_id_hex()
    );

    match command {
        Command::Proposals => {
            let snapshot = session.snapshot().await;
            if snapshot.proposals.is_empty() {
                println!("no proposals yet");
            }
            for p in &snapshot.proposals {
                let mark = if snapshot.has_voted(p.id) { "*" } else { " " };
                println!("{mark} #{} {} ({} votes)", p.id, p.title, p.vote_count);
                println!("      {}", p.description);
            }
        }
        Command::Vote { id } => {
            let confirmation = session.vote(id).await?;
            println!("voted in block {:?}", confirmation.block_number);
        }
        Command::Create { title, description } => {
            let confirmation = session.create_proposal(&title, &description).await?;
            println!("created in block {:?}", confirmation.block_number);
        }
        Command::Winner => match session.declare_winner().await? {
            Some(w) => println!("#{} {} with {} votes", w.id, w.title, w.vote_count),
            None => println!("no winner yet"),
        },
        Command::Status => {
            let snapshot = session.snapshot().await;
            if let Some(account) = snapshot.account {
                println!("account:  {account}");
            }
            println!("admin:    {}", snapshot.is_admin);
            println!("network:  {}", session.config().network.chain_name);
            println!("fee:      {} tokens", format_tokens(session.config().proposal_fee));
            println!("voted:    {:?}", snapshot.voted);
        }
    }
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Status { key, status } => match status {
            TxStatus::Submitted(tx) => eprintln!("[{key}] submitted {tx}"),
            TxStatus::Confirmed(tx) => eprintln!("[{key}] confirmed {tx}"),
            TxStatus::Failed(reason) => eprintln!("[{key}] failed: {reason}"),
        },
        Event::Notice(Notice { level, message, .. }) => {
            let tag = match level {
                Level::Success => "ok",
                Level::Info => "info",
                Level::Error => "error",
            };
            eprintln!("{tag}: {message}");
        }
    }
}

//! Watch a game account for live updates from the command line.
//!
//! Example:
//! cargo run --example watch -- \
//!   --program-id <PROGRAM> --game-id 01HZX3V9K2M4N6P8Q0R2S4T6V8

use anyhow::Result;
use clap::Parser;
use skirmish_client::{
    pda, AccountKind, Commitment, Pairing, RpcClient, StateStore, SubscriptionHub,
};
use skirmish_types::{AccountRecord, Address, Game, IdToken};
use url::Url;

#[derive(Parser)]
struct Args {
    /// HTTP JSON-RPC endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8899")]
    rpc_url: String,
    /// WebSocket notification endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:8900")]
    ws_url: String,
    /// Program id, base-58.
    #[arg(long)]
    program_id: String,
    /// Game identifier token (26 characters).
    #[arg(long)]
    game_id: String,
    /// Use finalized commitment instead of confirmed.
    #[arg(long)]
    finalized: bool,
    /// Also print a wallet pairing link against this connect endpoint.
    #[arg(long)]
    wallet_connect_url: Option<Url>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let program_id: Address = args.program_id.parse()?;
    let game_id: IdToken = args.game_id.parse()?;
    let commitment = if args.finalized {
        Commitment::Finalized
    } else {
        Commitment::Confirmed
    };

    let (game_address, bump) = pda::game_address(&program_id, &game_id)?;
    println!("game account: {game_address} (bump {bump})");

    if let Some(connect_url) = args.wallet_connect_url {
        let mut pairing = Pairing::new("watch-example".to_string());
        let link = pairing.connect_link(&skirmish_client::ConnectLink {
            base: connect_url,
            app_url: Url::parse("https://skirmish.example")?,
            redirect: Url::parse("skirmish://wallet-callback")?,
            cluster: "mainnet-beta".to_string(),
        })?;
        println!("wallet pairing link: {link}");
    }

    let rpc = RpcClient::new(&args.rpc_url, commitment)?;
    match rpc.get_account(&game_address).await? {
        Some(bytes) => {
            let game = Game::decode(&bytes)?;
            println!(
                "current state: {} active / {} completed rounds, version {}",
                game.active_rounds.len(),
                game.completed_rounds.len(),
                game.version
            );
        }
        None => println!("game account not found yet"),
    }

    let (hub, events) = SubscriptionHub::connect(Url::parse(&args.ws_url)?, commitment);
    let store = StateStore::new(hub, events);
    let mut watch = store.watch(AccountKind::Game, game_address).await?;
    println!("watching for changes (ctrl-c to stop)");
    loop {
        match watch.changed().await? {
            Some(AccountRecord::Game(game)) => {
                println!(
                    "update: {} active rounds ({}), {} completed",
                    game.active_rounds.len(),
                    game.active_rounds
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    game.completed_rounds.len()
                );
            }
            other => println!("update: {other:?}"),
        }
    }
}

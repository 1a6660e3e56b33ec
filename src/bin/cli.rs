use std::path::PathBuf;
use std::time::Duration;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ctt_arena::game::{plan_airdrop, PriceSimulator};
use ctt_arena::model::{Direction, User};
use ctt_arena::sdk::{self, RemoteApi, SyncOutcome};
use ctt_arena::GameConfig;
use serde::Serialize;

#[derive(Parser)]
#[command(author, version, about = "Play CTT Arena from the terminal", long_about = None)]
struct Cli {
    #[arg(short, long, env = "CTT_DATA_DIR", default_value = "data")]
    data_dir: String,

    /// Game rules file (JSON).
    #[arg(long, env = "CTT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    Register {
        email: String,
        username: String,
        #[arg(long)]
        wallet: Option<String>,
    },
    /// Show a user after reconciling with the backend.
    Profile { email: String },
    /// Open a betting round.
    Round {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        price: f64,
    },
    Rounds,
    Bet { email: String, round: String, direction: Direction, amount: i64 },
    Predict { email: String, round: String, direction: Direction },
    Settle { round: String, price: f64 },
    /// Play one round against the simulated price.
    Play {
        email: String,
        direction: Direction,
        amount: i64,
        #[arg(long, default_value_t = 100.0)]
        start_price: f64,
        #[arg(long, default_value_t = 0.01)]
        volatility: f64,
        #[arg(long, default_value_t = 10)]
        ticks: u32,
        #[arg(long, default_value_t = 200)]
        tick_ms: u64,
    },
    Rankings {
        #[arg(short, long)]
        limit: Option<usize>,
        /// Keep polling and print this many refreshes.
        #[arg(long)]
        watch: Option<usize>,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Push every local user to the backend.
    Sync,
    Airdrop {
        pool: f64,
        #[arg(long, default_value_t = 1)]
        min_points: i64,
        /// Ask the backend instead of using local users.
        #[arg(long)]
        remote: bool,
    },
    AdminUsers {
        #[arg(long)]
        delete: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Synced(_) => println!("synced"),
        SyncOutcome::LocalOnly => println!("saved locally (no backend configured)"),
        SyncOutcome::Failed(reason) => println!("saved locally, backend push failed: {}", reason),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = GameConfig::load(cli.config.as_deref())?;
    let store = sdk::new_with_config(&cli.data_dir, config).await?;
    let rounds = store.rounds();

    match cli.command {
        Commands::Register { email, username, wallet } => {
            let user = store.register(&email, &username, wallet).await?;
            print_json(&user)?;
        }
        Commands::Profile { email } => {
            let user = store.load_user(&email).await?;
            print_json(&user)?;
            let bets = rounds.user_bets(&user.id).await?;
            println!("{} bets on record", bets.len());
            for bet in bets.iter().take(10) {
                println!("  {} {:?} {} -> {:?} ({})", bet.round_id, bet.direction, bet.amount, bet.status, bet.payout);
            }
        }
        Commands::Round { symbol, price } => {
            let round = rounds.open_round(symbol.as_deref(), price).await?;
            print_json(&round)?;
        }
        Commands::Rounds => {
            print_json(&rounds.open_rounds().await?)?;
        }
        Commands::Bet { email, round, direction, amount } => {
            let user = local_user(&store, &email).await?;
            let (bet, user) = rounds.place_bet(&user.id, &round, direction, amount).await?;
            print_json(&bet)?;
            report(&store.push_user(&user).await);
        }
        Commands::Predict { email, round, direction } => {
            let user = local_user(&store, &email).await?;
            print_json(&rounds.predict(&user.id, &round, direction).await?)?;
        }
        Commands::Settle { round, price } => {
            let settlement = rounds.settle_round(&round, price).await?;
            println!("Round {} closed {:?}", settlement.round.id, settlement.outcome());
            for outcome in store.push_users(&settlement.users).await {
                report(&outcome);
            }
        }
        Commands::Play { email, direction, amount, start_price, volatility, ticks, tick_ms } => {
            let user = local_user(&store, &email).await?;
            let round = rounds.open_round(None, start_price).await?;
            rounds.place_bet(&user.id, &round.id, direction, amount).await?;
            println!("Bet {} CTT on {:?} at {:.2}", amount, direction, round.start_price);

            let ticker = PriceSimulator::new(start_price, volatility).spawn(Duration::from_millis(tick_ms));
            let mut prices = ticker.subscribe();
            for _ in 0..ticks {
                prices.changed().await.context("price feed stopped")?;
                println!("  {:.2}", *prices.borrow());
            }
            let end_price = ticker.latest();
            drop(ticker);

            let settlement = rounds.settle_round(&round.id, end_price).await?;
            match settlement.bets.first() {
                Some(bet) => println!("Closed at {:.2}: {:?}, payout {}", end_price, bet.status, bet.payout),
                None => println!("Closed at {:.2}", end_price),
            }
            for outcome in store.push_users(&settlement.users).await {
                report(&outcome);
            }
        }
        Commands::Rankings { limit, watch, interval_secs } => match watch {
            None => print_json(&store.rankings(limit).await?)?,
            Some(refreshes) => {
                let poller = store.poll_rankings(Duration::from_secs(interval_secs.max(1)), limit);
                let mut updates = poller.subscribe();
                for _ in 0..refreshes {
                    updates.changed().await.context("rankings poller stopped")?;
                    let snapshot = updates.borrow().clone();
                    if let Some(snapshot) = snapshot {
                        print_json(&snapshot)?;
                    }
                }
            }
        },
        Commands::Sync => {
            let summary = store.sync_all().await?;
            println!("synced {}, failed {}, local only {}", summary.synced, summary.failed, summary.local_only);
        }
        Commands::Airdrop { pool, min_points, remote } => {
            let plan = if remote {
                let Some(client) = store.remote() else { bail!("CTT_SERVER_URL is not set") };
                client.admin_airdrop(pool, min_points).await?
            } else {
                let users = store.local().table::<User>().list().await?;
                plan_airdrop(&users, pool, min_points)?
            };
            print_json(&plan)?;
        }
        Commands::AdminUsers { delete } => {
            let Some(client) = store.remote() else { bail!("CTT_SERVER_URL is not set") };
            if let Some(id) = delete {
                client.admin_delete_user(&id).await?;
                println!("deleted {}", id);
            } else {
                print_json(&client.admin_users().await?)?;
            }
        }
    }

    store.flush().await?;
    Ok(())
}

async fn local_user(store: &sdk::SyncedStore, email: &str) -> anyhow::Result<User> {
    store.find_local(email).await?
        .with_context(|| format!("no local user {}, run `register` first", email))
}

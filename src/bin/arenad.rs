use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use ctt_arena::engine::MemStore;
use ctt_arena::model::User;
use ctt_arena::server::{Backend, Router};
use ctt_arena::{EntityStore, GameConfig};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "CTT Arena backend", long_about = None)]
struct Args {
    #[arg(short, long, env = "CTT_DATA_DIR", default_value = "data")]
    data_dir: String,

    #[arg(short, long, env = "CTT_PORT", default_value = "7002")]
    port: String,

    /// Token required in the x-admin-token header for /admin routes.
    #[arg(long, env = "CTT_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Game rules file (JSON).
    #[arg(long, env = "CTT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = ctt_arena::server::router::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = GameConfig::load(args.config.as_deref())?;
    let store = Arc::new(MemStore::open(&args.data_dir)?);
    let backend = Arc::new(Backend::new(store.clone(), config, args.admin_token.clone()));
    let router = Router::with_max_connections(backend, args.max_connections);

    if args.admin_token.is_none() {
        log::warn!("No admin token configured: /admin routes are open");
    }

    println!("Starting CTT Arena backend...");
    println!("Store loaded. {} users on record.", store.table::<User>().list().await?.len());
    println!("Listening on :{} (HTTP)", args.port);

    tokio::select! {
        res = router.listen(&args.port) => {
            if let Err(e) = res {
                eprintln!("HTTP server failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            println!("\nShutdown signal received. Finalizing disk writes...");
            store.wait().await;
            println!("Persistence complete. Exiting.");
        }
    }

    Ok(())
}

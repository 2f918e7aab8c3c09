use std::sync::Arc;

use clap::Parser;
use thoughtspace_relay::{router, RelayConfig, Room};
use thoughtspace_sqlite::SqliteLogStore;
use tracing_subscriber::EnvFilter;

/// Run a thoughtspace Relay: push/pull/hydrate over WebSocket, backed by an embedded store.
#[derive(Parser, Debug)]
#[command(name = "thoughtspace-relay")]
struct Cli {
    /// Path to a TOML config file overriding the defaults in §6.
    #[arg(long)]
    config: Option<String>,

    /// Address to bind the HTTP/WebSocket listener on; overrides `bind_addr` from config.
    #[arg(long)]
    bind: Option<String>,

    /// Path to the sqlite database file; `:memory:` if omitted, matching `database_path`.
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("thoughtspace_relay=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = RelayConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(database) = cli.database {
        config.database_path = Some(database);
    }

    let store = match &config.database_path {
        Some(path) => SqliteLogStore::open(path)?,
        None => SqliteLogStore::open_in_memory()?,
    };

    let bind_addr = config.bind_addr.clone();
    let room = Arc::new(Room::new(store, config));
    let app = router(room);

    tracing::info!(%bind_addr, "thoughtspace relay listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

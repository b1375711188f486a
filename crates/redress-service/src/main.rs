use clap::{Parser, ValueEnum};
use redress_core::StoreConfig;
use redress_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "redressd", version, about = "Redress complaint-management REST service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
    /// Persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "REDRESS_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for complaint/audit persistence.
    #[arg(long, env = "REDRESS_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "REDRESS_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// JSON file mapping bearer tokens to actors.
    #[arg(long, env = "REDRESS_CREDENTIALS")]
    credentials: Option<PathBuf>,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StoreConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StoreConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StoreConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StoreConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "redress_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let store = resolve_storage(&cli)?;
    info!("storage backend: {}", store.label());

    let config = ServiceConfig {
        store,
        credentials_path: cli.credentials,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("redress-service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

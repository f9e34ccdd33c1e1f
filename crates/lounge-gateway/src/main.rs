use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use lounge_core::config::LoungeConfig;
use lounge_core::types::UserRole;
use lounge_store::{SqliteChatStore, SqliteUserDirectory};
use tracing::info;

mod app;
mod auth;
mod http;
mod ws;

#[derive(Parser)]
#[command(name = "lounge-gateway")]
#[command(version)]
#[command(about = "Real-time broadcast hub for the community chat")]
struct Cli {
    /// Path to lounge.toml (default: $LOUNGE_CONFIG, then ~/.lounge/lounge.toml)
    #[arg(long, short)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server (the default)
    Serve,
    /// Create a chat user and print its bearer token
    AddUser {
        username: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value_t = 1)]
        level: u32,
        #[arg(long)]
        admin: bool,
    },
    /// Register a catalog video that messages can mention
    AddVideo {
        title: String,
        #[arg(long, default_value = "")]
        thumbnail: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lounge_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > LOUNGE_CONFIG env > ~/.lounge/lounge.toml
    let config_path = cli.config.or_else(|| std::env::var("LOUNGE_CONFIG").ok());
    let config = LoungeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        LoungeConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    lounge_store::init_db(&db)?;
    info!("database migrations complete");

    // chat store and user directory share one connection
    let db = Arc::new(Mutex::new(db));
    let chat = Arc::new(SqliteChatStore::new(db.clone()));
    let users = Arc::new(SqliteUserDirectory::new(db));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, chat, users).await,
        Commands::AddUser {
            username,
            display_name,
            level,
            admin,
        } => {
            let role = if admin { UserRole::Admin } else { UserRole::User };
            let token = uuid::Uuid::new_v4().simple().to_string();
            let display_name = display_name.unwrap_or_else(|| username.clone());
            let user = users.create_user(&username, &display_name, level, role, &token)?;
            println!("user:  {} ({})", user.info.username, user.id());
            println!("token: {token}");
            Ok(())
        }
        Commands::AddVideo { title, thumbnail } => {
            let video = chat.add_video(&title, &thumbnail)?;
            println!("video: {} [{}] {}", video.id, video.code, video.title);
            Ok(())
        }
    }
}

async fn serve(
    config: LoungeConfig,
    chat: Arc<SqliteChatStore>,
    users: Arc<SqliteUserDirectory>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;

    let hub = ws::hub::Hub::spawn(config.hub.control_capacity);
    let state = Arc::new(app::AppState::new(config, hub, chat, users));
    let router = app::build_router(state);

    info!("Lounge gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Create parent directory for a file path if it doesn't exist.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

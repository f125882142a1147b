//! Confab application binary - composition root.
//!
//! Ties together all Confab crates into a single executable:
//! 1. Load configuration from TOML, then apply env vars and CLI flags
//! 2. Open local storage (SQLite) or point at a remote `confab serve`
//! 3. `serve`: run the sessions/messages REST API
//! 4. `chat`: run the terminal chat on top of the orchestrator
//! 5. `sessions`: list stored sessions

mod cli;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use confab_api::auth::resolve_token;
use confab_api::state::AppState;
use confab_chat::{ChatDeps, ChatOrchestrator, HttpModelClient, HttpPersistence, ModelClient, ScriptedModel};
use confab_core::config::ConfabConfig;
use confab_core::persistence::PersistenceService;
use confab_core::types::SessionId;
use confab_storage::{Database, SqliteStore};
use confab_whisper::Transcriber;

use cli::{expand_home, CliArgs, Command};

/// Delay between deltas of the offline model, so streaming stays visible.
const OFFLINE_DELTA_DELAY: Duration = Duration::from_millis(30);

/// Resolve the data directory and make sure it exists.
fn prepare_data_dir(config: &ConfabConfig) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    Ok(data_dir)
}

fn open_database(config: &ConfabConfig, data_dir: &std::path::Path) -> Result<Database, Box<dyn std::error::Error>> {
    let db_path = data_dir.join(&config.storage.database_file);
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    Ok(db)
}

async fn serve(config: ConfabConfig) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = prepare_data_dir(&config)?;
    let db = open_database(&config, &data_dir)?;
    let token = resolve_token(&config.api, &data_dir)?;
    tracing::info!(
        token_file = %data_dir.join(&config.api.token_file).display(),
        "API token ready"
    );

    let state = AppState::new(config.clone(), db, token);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutting down");
    };

    if let Err(e) = confab_api::start_server(&config, state, shutdown).await {
        tracing::error!(error = %e, "API server stopped");
        tracing::error!("Try: confab serve --port {}", config.general.port.saturating_add(1));
        return Err(e.into());
    }
    Ok(())
}

async fn chat(
    config: ConfabConfig,
    session: Option<String>,
    remote: Option<String>,
    offline: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = prepare_data_dir(&config)?;

    // Persistence: a remote API when one is named, else the local database.
    let persistence: Arc<dyn PersistenceService> =
        match remote.or_else(|| config.storage.remote_url.clone()) {
            Some(url) => {
                let token = resolve_token(&config.api, &data_dir)?;
                tracing::info!(url = %url, "Persisting through remote API");
                Arc::new(HttpPersistence::new(url, token))
            }
            None => {
                let db = Arc::new(open_database(&config, &data_dir)?);
                Arc::new(SqliteStore::new(db, config.api.user_id.clone()))
            }
        };

    let mut model = config.model.clone();
    let model_client: Arc<dyn ModelClient> = if offline {
        model.model = "scripted".to_string();
        Arc::new(ScriptedModel::new().with_delay(OFFLINE_DELTA_DELAY))
    } else {
        Arc::new(HttpModelClient::new(config.model.clone()))
    };
    tracing::info!(model = %model.model, "Model selected");

    let transcriber = Transcriber::from_config(
        &config.voice,
        &config.model.openai_base_url,
        config.model.openai_api_key.as_deref(),
    )?;

    let session_id = session
        .map(|raw| raw.parse::<SessionId>())
        .transpose()
        .map_err(|e| format!("Invalid session id: {}", e))?;

    let deps = ChatDeps {
        persistence,
        model_client,
        transcriber,
        model,
        sample_rate: config.voice.sample_rate,
    };
    let orchestrator = ChatOrchestrator::open(deps, session_id).await;
    repl::run(orchestrator).await
}

fn list_sessions(config: &ConfabConfig) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = prepare_data_dir(config)?;
    let db = Arc::new(open_database(config, &data_dir)?);
    let store = SqliteStore::new(db, config.api.user_id.clone());

    let sessions = store.list_sessions()?;
    if sessions.is_empty() {
        println!("No sessions yet.");
    }
    for session in sessions {
        println!(
            "{}  {}  {}",
            session.id,
            session.created_at.format("%Y-%m-%d %H:%M"),
            session.title
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ConfabConfig::load_or_default(&config_file);
    args.apply_overrides(&mut config);

    // Tracing. Logs go to stderr so they do not interleave with chat output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Confab v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    match args.command {
        Command::Serve { .. } => serve(config).await,
        Command::Chat {
            session,
            remote,
            offline,
            ..
        } => chat(config, session, remote, offline).await,
        Command::Sessions => list_sessions(&config),
    }
}

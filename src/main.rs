use std::sync::Arc;

use secrecy::ExposeSecret;

use lifeos_onboard::channels::{Channel, TelegramChannel};
use lifeos_onboard::config::{BotConfig, StoreLocation};
use lifeos_onboard::dispatcher::Dispatcher;
use lifeos_onboard::onboarding::{
    DbSessionStore, KeywordClassifier, MemorySessionStore, OnboardingDeps, OnboardingManager,
    ProfileRouteState, SessionStore, profile_routes,
};
use lifeos_onboard::store::{Database, LibSqlBackend, ProfileStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC...");
        eprintln!("  export STORE_URL=./data/onboard.db");
        std::process::exit(1);
    });

    eprintln!("🤖 LifeOS onboarding v{}", env!("CARGO_PKG_VERSION"));

    // ── Store ────────────────────────────────────────────────────────────
    let backend = match &config.store.location {
        StoreLocation::Local(path) => {
            eprintln!("   Store: {}", path.display());
            LibSqlBackend::new_local(path).await
        }
        StoreLocation::Remote { url, auth_token } => {
            eprintln!("   Store: {url}");
            LibSqlBackend::new_remote(url, auth_token.expose_secret()).await
        }
    };
    let db: Arc<dyn Database> = Arc::new(backend.unwrap_or_else(|e| {
        eprintln!("Error: Failed to open store: {e}");
        std::process::exit(1);
    }));

    let profiles = ProfileStore::new(
        Arc::clone(&db),
        config.store.upsert_strategy,
        config.store.retry,
    );
    eprintln!(
        "   Upsert: {} ({} attempts)",
        profiles.strategy(),
        config.store.retry.max_attempts
    );

    let sessions: Arc<dyn SessionStore> = if config.store.durable_sessions {
        eprintln!("   Sessions: durable");
        Arc::new(DbSessionStore::new(Arc::clone(&db)))
    } else {
        eprintln!("   Sessions: in-memory");
        Arc::new(MemorySessionStore::new())
    };

    // ── HTTP API ─────────────────────────────────────────────────────────
    if let Some(port) = config.http_port {
        let app = profile_routes(ProfileRouteState {
            profiles: profiles.clone(),
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        eprintln!("   HTTP API: http://0.0.0.0:{port}/healthz");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "HTTP server stopped");
            }
        });
    }

    // ── Conversation engine ──────────────────────────────────────────────
    let manager = Arc::new(OnboardingManager::new(OnboardingDeps {
        profiles,
        sessions,
        classifier: Arc::new(KeywordClassifier),
        flow: config.flow.clone(),
    }));

    // ── Telegram ─────────────────────────────────────────────────────────
    let telegram = TelegramChannel::new(
        config.telegram.bot_token.clone(),
        config.telegram.allowed_users.clone(),
    );
    eprintln!(
        "   Telegram: allowed {}",
        if config.telegram.allowed_users.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else {
            config.telegram.allowed_users.join(", ")
        }
    );
    if let Err(e) = telegram.health_check().await {
        tracing::warn!(error = %e, "Telegram health check failed; polling anyway");
    }

    Dispatcher::new(manager, Arc::new(telegram), config.worker_idle_timeout)
        .run()
        .await?;

    Ok(())
}

//! SPV Distributions Service
//! Mission: Allocate SPV proceeds, collect sign-off and reconcile every investor payout
//!
//! Usage:
//!   distributiond --config distribution.toml --bind 0.0.0.0:3000
//!
//! Environment:
//!   DISTRIBUTION_CONFIG_PATH - TOML config file (default: distribution.toml)
//!   BIND_ADDR, DB_PATH, JWT_SECRET, NOTIFY_WEBHOOK_URL - override config values
//!   RUST_LOG - tracing filter

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spv_distributions::{
    api::create_router,
    auth::JwtHandler,
    config::AppConfig,
    distribution::{
        DistributionLedger, DistributionService, LogNotifier, NotificationDispatcher, Notifier,
        WebhookNotifier,
    },
};

#[derive(Parser, Debug)]
#[command(name = "distributiond")]
#[command(about = "SPV proceeds distribution service")]
struct Args {
    /// TOML config file
    #[arg(long, env = "DISTRIBUTION_CONFIG_PATH", default_value = "distribution.toml")]
    config: String,

    /// Listen address, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let args = Args::parse();
    let mut config = AppConfig::from_path_with_env(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    info!("🚀 SPV Distributions service starting");
    if config.uses_dev_secret() {
        warn!("🔐 JWT_SECRET not set, using the development secret");
    }

    let ledger = Arc::new(
        DistributionLedger::new(&config.database.path)
            .with_context(|| format!("open ledger at {}", config.database.path))?,
    );
    info!("📒 Distribution ledger at: {}", config.database.path);

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => {
            info!("📣 Notifications → {}", url);
            Arc::new(WebhookNotifier::new(
                url.clone(),
                config.notifications.timeout(),
            )?)
        }
        None => {
            info!("📣 Notifications → log only");
            Arc::new(LogNotifier)
        }
    };

    let service = Arc::new(DistributionService::new(
        ledger,
        NotificationDispatcher::new(notifier),
    ));
    let jwt_handler = Arc::new(
        JwtHandler::new(config.auth.jwt_secret.clone())
            .with_expiration_hours(config.auth.token_ttl_hours),
    );

    let app = create_router(service, jwt_handler)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.server.bind_addr))?;
    info!("🎯 API server listening on {}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Initialize tracing with enhanced observability
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spv_distributions=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when started from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

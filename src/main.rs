use std::sync::Arc;

use ledger_bot::channels::TelegramTransport;
use ledger_bot::config::AppConfig;
use ledger_bot::extract::create_extractor;
use ledger_bot::ingest::IngestionController;
use ledger_bot::store::{Database, LibSqlBackend};
use ledger_bot::webhook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("💸 ledger-bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook/telegram", config.port);
    eprintln!("   Health:  http://0.0.0.0:{}/healthz", config.port);
    eprintln!("   Default currency: {}", config.default_currency);

    // ── Database ─────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {e}",
                    config.db_path.display()
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Transport ────────────────────────────────────────────────────
    let transport = Arc::new(TelegramTransport::new(config.telegram_bot_token.clone()));
    if let Err(e) = transport.health_check().await {
        tracing::warn!(error = %e, "Telegram getMe failed at startup");
    }

    // ── Extractor ────────────────────────────────────────────────────
    let extractor = create_extractor(&config)?;
    eprintln!("   Parser: {}", extractor.name());

    // ── Controller + server ──────────────────────────────────────────
    let controller = Arc::new(IngestionController::new(
        db,
        extractor,
        transport,
        config.default_currency.clone(),
    ));

    let app = webhook::routes(controller);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}

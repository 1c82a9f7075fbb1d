use std::sync::Arc;

use anyhow::Context;
use brand_onboard::api::{AppServices, app};
use brand_onboard::automation::{AutomationBootstrapper, HttpAutomationBackend};
use brand_onboard::backend::HttpRegistrationBackend;
use brand_onboard::config::AppConfig;
use brand_onboard::registration::{CompliancePolicies, StepOrchestrator};
use brand_onboard::store::{LibSqlBackend, RegistrationStore};
use brand_onboard::webhooks::WebhookIngestor;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("Brand Onboard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}", config.port);
    eprintln!("   Webhooks: {}/webhooks/registration", config.public_base_url);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RegistrationStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Backends ─────────────────────────────────────────────────────────
    let registration_backend = Arc::new(HttpRegistrationBackend::new(
        config.registration.base_url.clone(),
        config.registration.account_sid.clone(),
        config.registration.auth_token.clone(),
        config.saga.call_timeout,
    )?);
    let automation_backend = Arc::new(HttpAutomationBackend::new(
        config.automation.base_url.clone(),
        config.automation.api_key.clone(),
        config.saga.call_timeout,
    )?);

    // ── Services ─────────────────────────────────────────────────────────
    let orchestrator = Arc::new(StepOrchestrator::new(
        Arc::clone(&store),
        registration_backend,
        CompliancePolicies::from(&config.registration),
        config.campaign.clone(),
        config.saga.clone(),
    ));
    let ingestor = Arc::new(WebhookIngestor::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator),
    ));
    let automation = Arc::new(AutomationBootstrapper::new(
        Arc::clone(&store),
        automation_backend,
        config.automation.name_prefix.clone(),
        config.public_base_url.clone(),
        config.saga.call_timeout,
    ));

    let router = app(AppServices {
        orchestrator,
        ingestor,
        automation,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Onboarding server started");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "brand-onboard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

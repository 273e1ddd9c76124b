mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod pricing;
mod reminder;
mod routes;
mod sms;

use std::sync::Arc;

use crate::{
    config::Config,
    models::AppState,
    reminder::{PgReminderStore, ReminderDispatcher},
    sms::SemaphoreGateway,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    let gateway = Arc::new(SemaphoreGateway::new(&cfg.sms)?);
    let store = Arc::new(PgReminderStore::new(pool.clone()));
    let dispatcher = Arc::new(ReminderDispatcher::new(
        store,
        gateway,
        cfg.clinic.name.clone(),
        cfg.clinic.utc_offset_hours,
    ));

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        clinic: cfg.clinic.clone(),
        dispatcher: dispatcher.clone(),
        legacy_unknown_items: cfg.legacy_unknown_items,
    };

    // Internal timer sweep; an external scheduler hitting
    // POST /cron/send-reminders works the same way.
    if let Some(minutes) = cfg.reminder_sweep_minutes {
        let sweeper = dispatcher.clone();
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(minutes * 60));
            loop {
                tick.tick().await;
                match sweeper.sweep().await {
                    Ok(outcome) => tracing::info!(
                        sent = outcome.sent_count,
                        failed = outcome.failed_count,
                        "reminder sweep finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "reminder sweep failed"),
                }
            }
        });
    }

    // Allow browser clients (the dashboard frontends) to call the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

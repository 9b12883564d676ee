use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use salon_booking_api as api;
use api::services::{
    gateway::{http::HttpGateway, PaymentGateway},
    notifications::{HttpNotifier, Notifier, TracingNotifier},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(HttpGateway::from_config(&cfg).context("failed to build gateway client")?);

    let notifier: Arc<dyn Notifier> = match cfg.notification_url.as_deref() {
        Some(url) => match HttpNotifier::new(url) {
            Ok(notifier) => {
                info!(url, "Booking notices delivered over HTTP");
                Arc::new(notifier)
            }
            Err(e) => {
                warn!(error = %e, "Notification client unavailable; logging notices instead");
                Arc::new(TracingNotifier)
            }
        },
        None => {
            info!("notification_url not configured; logging notices instead");
            Arc::new(TracingNotifier)
        }
    };

    let services = api::handlers::AppServices::new(
        db.clone(),
        &cfg,
        gateway,
        notifier,
        Some(event_sender),
    );
    services
        .fee_settings
        .clone()
        .spawn_refresh(cfg.fee_settings_ttl().max(Duration::from_secs(30)));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    let app = api::build_router(api::AppState::new(db, cfg, services));

    info!("salon-booking-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

use axum::http::HeaderValue;
use ornata_api::{
    app_router,
    cache::InMemoryCache,
    clients::{carrier::HttpCarrierClient, payment_gateway::HttpPaymentGateway},
    config,
    db,
    events::{self, reconciliation, EventSender},
    handlers::AppServices,
    services::{catalog::PassthroughCatalog, notifications::LogNotifier},
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    info!(environment = %cfg.environment, "Starting ornata-api");

    let db = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
    if cfg.auto_migrate {
        db::run_migrations(&db).await?;
    } else {
        db::check_connection(&db).await?;
    }

    // Domain event plumbing.
    let (event_tx, event_rx) = mpsc::channel(1000);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(events::process_events(event_rx));
    let shipment_updates = events::shipment_update_channel(64);

    // Replays settlement confirmations that hit a transport failure.
    reconciliation::start_worker(db.clone());

    let gateway = Arc::new(HttpPaymentGateway::new(cfg.gateway.clone()));
    let carrier = Arc::new(HttpCarrierClient::new(cfg.carrier.clone())?);
    let services = AppServices::new(
        db.clone(),
        &cfg,
        gateway,
        carrier,
        Arc::new(InMemoryCache::new()),
        Arc::new(PassthroughCatalog),
        Arc::new(LogNotifier),
        event_sender.clone(),
        shipment_updates.clone(),
    );

    let cors_layer = match cfg.cors_allowed_origins.as_deref() {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => {
            if !cfg.is_development() {
                warn!("No CORS origins configured; falling back to permissive CORS");
            }
            CorsLayer::permissive()
        }
    };

    let host = cfg.host.clone();
    let port = cfg.port;
    let state = AppState {
        db,
        config: Arc::new(cfg),
        event_sender,
        services,
        shipment_updates,
    };

    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("ornata-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

use std::sync::Arc;

use auxbattle::{
    api,
    auth::AdminGate,
    config::Config,
    db::Database,
    links::LinkPolicy,
    metrics,
    notifier::{BroadcastNotifier, Directory},
    service::{self, AuxBattleService, ServiceConfig},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_metrics();

    let config = Config::load();
    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let directory = Arc::new(Directory::new());
    let notifier = Arc::new(BroadcastNotifier::new(directory.clone()));
    let links = Arc::new(LinkPolicy::new(&config.accepted_link_hosts));
    tracing::info!("Accepting submissions from {}", links.hosts().join(", "));

    let (service, timers) = AuxBattleService::new(
        db,
        ServiceConfig {
            engine: config.engine_config(),
            save_retries: config.save_retries,
        },
        links,
        notifier.clone(),
        directory,
    );

    // Route fired deadlines back into their sessions
    service::spawn_timer_worker(service.clone(), timers);

    match service.restore_sessions().await {
        Ok(n) => tracing::info!("Restored {n} sessions"),
        Err(e) => tracing::error!("Failed to restore sessions: {e}"),
    }

    if config.local_mode {
        tracing::warn!("Local mode: admin routes are open to everyone");
    } else if config.admin_token.is_none() {
        tracing::warn!("AUX_ADMIN_TOKEN is not set: admin routes are disabled");
    }
    let gate = AdminGate::new(config.admin_token.clone(), config.local_mode);

    let app = api::app(service, notifier, gate);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Aux Battle listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

//! Admission Control Service
//!
//! This is the main entry point for the admission control service.
//! It wires the stores, the request gate, and the alert engine together,
//! spawns the periodic abuse-detection sweep, and starts the web server.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{debug, error, info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;

use admission_control_service::api::{self, ApiState};
use admission_control_service::config::load_config;
use admission_control_service::core::credentials::{self, Credential};
use admission_control_service::core::{
    ActivityLog, AlertEngine, AnomalyDetector, BlockStore, CounterStore, CredentialStore,
    InMemoryActivityLog, InMemoryBlockStore, InMemoryCounterStore, InMemoryCredentialStore,
    InMemoryUserStore, LogNotificationSink, NotificationSink, Permission, RateLimiter,
    RedisBlockStore, RedisCounterStore, RequestGate, UserStore, WebhookNotificationSink,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting admission control service...");

    // Load configuration
    let config = load_config().context("failed to load configuration")?;
    let config = Arc::new(config);

    // Install the Prometheus recorder; /metrics renders from this handle
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    // Shared-state backends: in-process by default, Redis when configured
    let (blocks, counters): (Arc<dyn BlockStore>, Arc<dyn CounterStore>) = if config.redis.enabled {
        let client = redis::Client::open(config.redis.url.as_str())
            .context("failed to create Redis client")?;
        info!("using Redis-backed block cache and rate counters");
        (
            Arc::new(RedisBlockStore::new(client.clone())),
            Arc::new(RedisCounterStore::new(client)),
        )
    } else {
        (
            Arc::new(InMemoryBlockStore::new()),
            Arc::new(InMemoryCounterStore::new()),
        )
    };

    // Collaborator stores
    let credential_store = Arc::new(InMemoryCredentialStore::new());
    seed_bootstrap_admin(&credential_store, &config).await;
    let credentials: Arc<dyn CredentialStore> = credential_store;
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let activity_log: Arc<dyn ActivityLog> = Arc::new(InMemoryActivityLog::default());

    let notifier: Arc<dyn NotificationSink> = match &config.alerts.webhook_url {
        Some(url) => Arc::new(WebhookNotificationSink::new(
            url.clone(),
            config.alerts.webhook_token.clone(),
        )),
        None => Arc::new(LogNotificationSink),
    };

    // Alert engine, request gate, detector
    let engine = Arc::new(AlertEngine::new(
        Arc::clone(&blocks),
        users,
        notifier,
        config.alerts.clone(),
    ));
    let gate = Arc::new(RequestGate::new(
        credentials,
        Arc::clone(&blocks),
        RateLimiter::new(counters),
    ));
    let detector = Arc::new(AnomalyDetector::new(
        Arc::clone(&activity_log),
        Arc::clone(&blocks),
        Arc::clone(&engine),
        config.detection.clone(),
    ));

    // Periodic detection sweep, off the request path
    {
        let detector = Arc::clone(&detector);
        let every = Duration::from_secs(config.detection.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match detector.sweep().await {
                    Ok(report) => debug!(
                        "detection sweep: {} ips examined, {} flagged, {} blocked",
                        report.examined_ips, report.flagged, report.blocked
                    ),
                    Err(e) => error!("detection sweep failed: {}", e),
                }
            }
        });
    }

    let state = web::Data::new(ApiState {
        engine: Arc::clone(&engine),
    });
    let prometheus = web::Data::new(prometheus);
    let bind_addr = (config.server.host.clone(), config.server.port);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(prometheus.clone())
            .configure(api::public_routes)
            .service(api::alert_scope(
                Arc::clone(&gate),
                Arc::clone(&activity_log),
            ))
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}

/// Seed the configured admin credential so the alert surface is reachable on
/// a fresh deployment.
async fn seed_bootstrap_admin(
    store: &InMemoryCredentialStore,
    config: &admission_control_service::models::Config,
) {
    let key = match &config.gate.bootstrap_admin_key {
        Some(key) => key.clone(),
        None => return,
    };
    if !credentials::is_valid_key_format(&key) {
        warn!("GATE_BOOTSTRAP_ADMIN_KEY does not match the key format; skipping seed");
        return;
    }
    store
        .insert(Credential::new(
            key,
            uuid::Uuid::new_v4(),
            vec![Permission::Admin],
            config.rate_limit.as_tier(),
        ))
        .await;
    info!("seeded bootstrap admin credential");
}

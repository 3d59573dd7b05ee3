//! WAF Gateway
//!
//! This is the main entry point for the gateway. It wires the stores,
//! detection components and background workers together and starts the
//! HTTP server: the `/api/v1` scope serves the admin surface, everything
//! else falls through to the inspection pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;

use waf_gateway::api::{self, ApiState};
use waf_gateway::config;
use waf_gateway::core::{
    AttackLogger, DnsController, DomainLifecycle, LogBroker, MlClient, PolicyCache, ProxyState,
    RateLimiter, RuleService, StatsBuffer,
};
use waf_gateway::storage::intent::RedisIntentStore;
use waf_gateway::storage::resolver::SqliteResolverStore;
use waf_gateway::storage::{IntentStore, ResolverStore};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting WAF gateway...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;

    // Intent store (Redis)
    let redis_client = redis::Client::open(config.redis.url.as_str())
        .context("Failed to create Redis client")?;
    let intent: Arc<dyn IntentStore> = Arc::new(RedisIntentStore::new(redis_client));

    // Resolver store (SQLite, PowerDNS-compatible layout)
    if let Some(parent) = Path::new(&config.resolver_db.path).parent() {
        std::fs::create_dir_all(parent).context("Failed to create resolver database directory")?;
    }
    let resolver: Arc<dyn ResolverStore> = Arc::new(
        SqliteResolverStore::open(&config.resolver_db.path)
            .context("Failed to open resolver database")?,
    );

    // Policy cache, loaded immediately on startup
    let cache = Arc::new(PolicyCache::new(
        Arc::clone(&intent),
        config.server.admin_host.clone(),
        config.waf.default_rule_enabled,
    ));
    if let Err(e) = cache.reload().await {
        log::error!("Initial policy cache load failed (serving empty cache): {}", e);
    }

    // Detection components
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let ml = MlClient::new(&config.waf.ml_url, config.waf.ml_timeout_ms);

    // Stats buffer with its background flusher
    let stats = Arc::new(StatsBuffer::new());
    stats.start_flusher(Arc::clone(&intent));

    // Attack log sink: async persistence + live fan-out
    let broker = Arc::new(LogBroker::new());
    let logger = Arc::new(AttackLogger::new(Arc::clone(&intent), Arc::clone(&broker)));

    // DNS control plane
    let dns = Arc::new(DnsController::new(
        Arc::clone(&intent),
        Arc::clone(&resolver),
        config.waf.public_ip.clone(),
        config.dns.waf_record_ttl,
    ));
    let lifecycle = Arc::new(DomainLifecycle::new(
        Arc::clone(&intent),
        Arc::clone(&dns),
        Arc::clone(&cache),
        config.dns.clone(),
    ));
    let rules = Arc::new(RuleService::new(Arc::clone(&intent), Arc::clone(&cache)));

    // Request pipeline state with the RPM ticker
    let proxy = Arc::new(ProxyState::new(
        Arc::clone(&cache),
        limiter,
        ml,
        config.waf.clone(),
        Arc::clone(&intent),
        Arc::clone(&stats),
        Arc::clone(&logger),
    ));
    proxy.start_rpm_ticker();

    let api_state = web::Data::new(ApiState {
        lifecycle,
        dns,
        rules,
        logger,
        broker,
        cache,
        proxy: Arc::clone(&proxy),
    });
    let proxy_data = web::Data::from(proxy);

    let bind_addr = (config.server.host.clone(), config.server.port);
    info!("Listening on {}:{}", bind_addr.0, bind_addr.1);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(api_state.clone())
            .app_data(proxy_data.clone())
            .configure(api::config)
            .default_service(web::route().to(waf_gateway::core::pipeline::handle))
    })
    .client_request_timeout(Duration::from_secs(config.server.client_timeout_secs))
    .keep_alive(Duration::from_secs(config.server.keep_alive_secs))
    .bind(bind_addr)
    .context("Failed to bind listener")?
    .run()
    .await
    .context("Server terminated with an error")
}

//! Admin API surface for the WAF gateway.
//!
//! These handlers are thin glue over the core services. Authentication is
//! terminated upstream; the authenticated tenant arrives as the
//! `X-Tenant-Id` header and every operation is scoped to it.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::attack_log::LogBroker;
use crate::core::dns_controller::{DnsController, RecordInput};
use crate::core::domain_lifecycle::DomainLifecycle;
use crate::core::pipeline::ProxyState;
use crate::core::policy_cache::PolicyCache;
use crate::core::rule_service::{PolicyInput, RuleInput, RuleService};
use crate::core::AttackLogger;
use crate::error::{ServiceError, ServiceResult};

const TENANT_HEADER: &str = "X-Tenant-Id";
const DEFAULT_LOG_LIMIT: usize = 50;

pub struct ApiState {
    pub lifecycle: Arc<DomainLifecycle>,
    pub dns: Arc<DnsController>,
    pub rules: Arc<RuleService>,
    pub logger: Arc<AttackLogger>,
    pub broker: Arc<LogBroker>,
    pub cache: Arc<PolicyCache>,
    pub proxy: Arc<ProxyState>,
}

/// API configuration function for Actix-web.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health)))
            .service(web::resource("/system/status").route(web::get().to(system_status)))
            .service(
                web::resource("/domains")
                    .route(web::get().to(list_domains))
                    .route(web::post().to(create_domain)),
            )
            .service(web::resource("/domains/{id}").route(web::delete().to(delete_domain)))
            .service(web::resource("/domains/{id}/verify").route(web::post().to(verify_domain)))
            .service(web::resource("/domains/{id}/proxy").route(web::post().to(toggle_proxy)))
            .service(
                web::resource("/dns/records")
                    .route(web::get().to(list_records))
                    .route(web::post().to(add_record)),
            )
            .service(web::resource("/dns/records/{id}").route(web::delete().to(delete_record)))
            .service(web::resource("/rules/policy").route(web::post().to(set_policy)))
            .service(
                web::resource("/rules")
                    .route(web::get().to(list_rules))
                    .route(web::post().to(create_rule)),
            )
            .service(
                web::resource("/rules/{id}")
                    .route(web::put().to(update_rule))
                    .route(web::delete().to(delete_rule)),
            )
            .service(web::resource("/logs").route(web::get().to(recent_logs)))
            .service(web::resource("/logs/stream").route(web::get().to(stream_logs))),
    );
}

fn tenant_id(req: &HttpRequest) -> ServiceResult<String> {
    req.headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ServiceError::Unauthorized)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn system_status(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "rpm": state.proxy.rpm(),
        "active_hosts": state.cache.host_count(),
    }))
}

// --- Domains ---

#[derive(Debug, Deserialize)]
struct DomainInput {
    name: String,
}

async fn list_domains(
    req: HttpRequest,
    state: web::Data<ApiState>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let domains = state.lifecycle.list_domains(&tenant).await?;
    Ok(HttpResponse::Ok().json(domains))
}

async fn create_domain(
    req: HttpRequest,
    state: web::Data<ApiState>,
    input: web::Json<DomainInput>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let domain = state.lifecycle.create_domain(&tenant, &input.name).await?;
    Ok(HttpResponse::Created().json(domain))
}

async fn delete_domain(
    req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    state.lifecycle.delete_domain(&tenant, &path).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn verify_domain(
    req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let domain = state.lifecycle.verify_domain(&tenant, &path).await?;
    Ok(HttpResponse::Ok().json(domain))
}

#[derive(Debug, Deserialize)]
struct ProxyToggleInput {
    enabled: bool,
}

async fn toggle_proxy(
    req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
    input: web::Json<ProxyToggleInput>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    state.dns.toggle_proxy(&tenant, &path, input.enabled).await?;
    reload_cache(&state).await;
    Ok(HttpResponse::Ok().json(json!({ "proxy_enabled": input.enabled })))
}

// --- DNS records ---

#[derive(Debug, Deserialize)]
struct RecordsQuery {
    domain_id: String,
}

async fn list_records(
    req: HttpRequest,
    state: web::Data<ApiState>,
    query: web::Query<RecordsQuery>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let records = state.dns.list_records(&tenant, &query.domain_id).await?;
    Ok(HttpResponse::Ok().json(records))
}

async fn add_record(
    req: HttpRequest,
    state: web::Data<ApiState>,
    input: web::Json<RecordInput>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let record = state.dns.add_record(&tenant, input.into_inner()).await?;
    reload_cache(&state).await;
    Ok(HttpResponse::Created().json(record))
}

async fn delete_record(
    req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    state.dns.delete_record(&tenant, &path).await?;
    reload_cache(&state).await;
    Ok(HttpResponse::NoContent().finish())
}

// --- Rules & policies ---

async fn list_rules(req: HttpRequest, state: web::Data<ApiState>) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let rules = state.rules.list_rules(&tenant).await?;
    Ok(HttpResponse::Ok().json(rules))
}

async fn create_rule(
    req: HttpRequest,
    state: web::Data<ApiState>,
    input: web::Json<RuleInput>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let rule = state.rules.create_rule(&tenant, input.into_inner()).await?;
    Ok(HttpResponse::Created().json(rule))
}

async fn update_rule(
    req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
    input: web::Json<RuleInput>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let rule = state
        .rules
        .update_rule(&tenant, &path, input.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(rule))
}

async fn delete_rule(
    req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    state.rules.delete_rule(&tenant, &path).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn set_policy(
    req: HttpRequest,
    state: web::Data<ApiState>,
    input: web::Json<PolicyInput>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let policy = state.rules.set_policy(&tenant, input.into_inner()).await?;
    Ok(HttpResponse::Ok().json(policy))
}

// --- Logs ---

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn recent_logs(
    req: HttpRequest,
    state: web::Data<ApiState>,
    query: web::Query<LogsQuery>,
) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let logs = state.logger.recent(limit).await?;
    // The log list is shared storage; scope it to the caller.
    let own: Vec<_> = logs.into_iter().filter(|l| l.tenant_id == tenant).collect();
    Ok(HttpResponse::Ok().json(own))
}

struct SubscriptionGuard {
    broker: Arc<LogBroker>,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

/// Live event stream (SSE). The subscription is dropped with the
/// connection, which unsubscribes from the broker.
async fn stream_logs(req: HttpRequest, state: web::Data<ApiState>) -> ServiceResult<HttpResponse> {
    let tenant = tenant_id(&req)?;
    let (id, rx) = state.broker.subscribe();
    let guard = SubscriptionGuard {
        broker: Arc::clone(&state.broker),
        id,
    };

    let events = stream::unfold((rx, guard, tenant), |(mut rx, guard, tenant)| async move {
        loop {
            match rx.recv().await {
                Some(entry) if entry.tenant_id == tenant => {
                    let data = serde_json::to_string(&entry).unwrap_or_default();
                    let frame = web::Bytes::from(format!("data: {}\n\n", data));
                    return Some((Ok::<_, std::io::Error>(frame), (rx, guard, tenant)));
                }
                Some(_) => continue,
                None => return None,
            }
        }
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(events))
}

async fn reload_cache(state: &web::Data<ApiState>) {
    if let Err(e) = state.cache.reload().await {
        log::error!("Policy cache reload failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AttackLogger, DnsController, DomainLifecycle, MlClient, ProxyState, RateLimiter,
        RuleService, StatsBuffer,
    };
    use crate::models::{DnsConfig, RateLimitConfig, WafConfig};
    use crate::storage::memory::{MemoryIntentStore, MemoryResolverStore};
    use crate::storage::{IntentStore, ResolverStore};
    use actix_web::{test, App};

    fn api_state() -> web::Data<ApiState> {
        let intent = Arc::new(MemoryIntentStore::new()) as Arc<dyn IntentStore>;
        let resolver = Arc::new(MemoryResolverStore::new()) as Arc<dyn ResolverStore>;

        let cache = Arc::new(PolicyCache::new(
            Arc::clone(&intent),
            "admin.example".to_string(),
            true,
        ));
        let dns = Arc::new(DnsController::new(
            Arc::clone(&intent),
            resolver,
            "192.0.2.53".to_string(),
            300,
        ));
        let lifecycle = Arc::new(DomainLifecycle::new(
            Arc::clone(&intent),
            Arc::clone(&dns),
            Arc::clone(&cache),
            DnsConfig {
                ns_pool: vec!["jade".to_string(), "onyx".to_string()],
                ns_suffix: ".ns.waf-gateway.net".to_string(),
                waf_record_ttl: 300,
                rdap_base_url: "https://rdap.org/domain".to_string(),
                rdap_timeout_secs: 15,
            },
        ));
        let rules = Arc::new(RuleService::new(Arc::clone(&intent), Arc::clone(&cache)));
        let broker = Arc::new(LogBroker::new());
        let logger = Arc::new(AttackLogger::new(Arc::clone(&intent), Arc::clone(&broker)));
        let waf = WafConfig {
            public_ip: "192.0.2.53".to_string(),
            default_origin: "http://127.0.0.1:9".to_string(),
            ml_url: String::new(),
            ml_timeout_ms: 200,
            block_score: 15,
            hybrid_score: 10,
            ml_block_confidence: 0.80,
            ml_monitor_confidence: 0.65,
            ml_hybrid_confidence: 0.40,
            ml_tag_confidence: 0.60,
            max_body_bytes: 1024,
            default_rule_enabled: true,
        };
        let proxy = Arc::new(ProxyState::new(
            Arc::clone(&cache),
            Arc::new(RateLimiter::new(&RateLimitConfig {
                limit: 100,
                window_seconds: 60,
            })),
            MlClient::new("", 200),
            waf,
            Arc::clone(&intent),
            Arc::new(StatsBuffer::new()),
            Arc::clone(&logger),
        ));

        web::Data::new(ApiState {
            lifecycle,
            dns,
            rules,
            logger,
            broker,
            cache,
            proxy,
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(App::new().app_data(api_state()).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn missing_tenant_header_is_forbidden() {
        let app = test::init_service(App::new().app_data(api_state()).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/v1/domains").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn domain_creation_roundtrip() {
        let app = test::init_service(App::new().app_data(api_state()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/domains")
            .insert_header((TENANT_HEADER, "t1"))
            .set_json(json!({ "name": "example.com" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri("/api/v1/domains")
            .insert_header((TENANT_HEADER, "t1"))
            .to_request();
        let domains: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0]["name"], "example.com");
        assert_eq!(domains[0]["status"], "pending_verification");
    }
}

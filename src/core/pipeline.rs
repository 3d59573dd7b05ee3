//! The request pipeline: host resolution, rate limiting, rule and ML
//! scoring, verdict, then proxy or block.
//!
//! The hot path only reads the in-memory policy cache; the single storage
//! read (the origin record) happens after the verdict, on the forwarding
//! leg. Every verdict on a configured host emits exactly one log event
//! before the response is written, so a client disconnect cannot lose a
//! Block record.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::core::analytics::StatsBuffer;
use crate::core::attack_log::AttackLogger;
use crate::core::decision::{decide, DecisionThresholds, Source, Verdict};
use crate::core::ml_client::{MlClient, MlVerdict};
use crate::core::policy_cache::PolicyCache;
use crate::core::rate_limiter::RateLimiter;
use crate::core::rule_engine::{check_request, Inspection};
use crate::models::{AttackLog, FullRequest, WafConfig};
use crate::storage::{with_deadline, IntentStore};
use crate::utils;

pub const UNCONFIGURED_PAGE: &str = include_str!("../../pages/404.html");
pub const BAD_GATEWAY_PAGE: &str = include_str!("../../pages/502.html");

const ORIGIN_LOOKUP_DEADLINE_SECS: u64 = 2;

/// Everything the proxy entrypoint needs, shared across workers.
pub struct ProxyState {
    pub cache: Arc<PolicyCache>,
    pub limiter: Arc<RateLimiter>,
    pub ml: MlClient,
    pub stats: Arc<StatsBuffer>,
    pub logger: Arc<AttackLogger>,
    waf: WafConfig,
    thresholds: DecisionThresholds,
    intent: Arc<dyn IntentStore>,
    upstream: reqwest::Client,
    request_count: AtomicU64,
    rpm: AtomicU64,
}

impl ProxyState {
    pub fn new(
        cache: Arc<PolicyCache>,
        limiter: Arc<RateLimiter>,
        ml: MlClient,
        waf: WafConfig,
        intent: Arc<dyn IntentStore>,
        stats: Arc<StatsBuffer>,
        logger: Arc<AttackLogger>,
    ) -> Self {
        // Self-signed origins are allowed; the hop to the backend is
        // inside the tenant's trust boundary.
        let upstream = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_else(|e| {
                log::error!("Upstream client builder failed ({}); using defaults", e);
                reqwest::Client::new()
            });

        Self {
            thresholds: DecisionThresholds::from(&waf),
            cache,
            limiter,
            ml,
            stats,
            logger,
            waf,
            intent,
            upstream,
            request_count: AtomicU64::new(0),
            rpm: AtomicU64::new(0),
        }
    }

    pub fn rpm(&self) -> u64 {
        self.rpm.load(Ordering::Relaxed)
    }

    /// Swaps the raw request counter into the RPM gauge once a minute.
    pub fn start_rpm_ticker(self: &Arc<Self>) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                let count = state.request_count.swap(0, Ordering::Relaxed);
                state.rpm.store(count, Ordering::Relaxed);
            }
        });
    }
}

/// Entry point for all non-admin traffic.
pub async fn handle(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<ProxyState>,
) -> HttpResponse {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(utils::host_without_port)
        .unwrap_or_default();

    let body = match read_body(payload, state.waf.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let Some((entry, rules)) = state.cache.lookup(&host) else {
        log::warn!("Request for unconfigured host '{}'", host);
        return HttpResponse::NotFound()
            .content_type("text/html; charset=utf-8")
            .body(UNCONFIGURED_PAGE);
    };

    let xff = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok());
    let peer = req.peer_addr().map(|addr| addr.to_string());
    let client_ip = utils::client_ip(xff, peer.as_deref());

    let rate_limited = state.limiter.is_limited(&client_ip);

    let path = req.path().to_string();
    let query = req.query_string().to_string();
    let body_text = String::from_utf8_lossy(&body).into_owned();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let headers_map: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let inspection = Inspection {
        method: req.method().to_string(),
        user_agent,
        combined: Inspection::combined_payload(&path, &query, &body_text),
        param_count: count_query_params(&query),
        body_length: body.len(),
        rate_limited,
    };

    let rule_verdict = check_request(&inspection, &rules);

    // The scorer only runs when the rules alone cannot already decide.
    let ml = if !rule_verdict.hard_block && rule_verdict.score < state.waf.block_score {
        let path_and_query = if query.is_empty() {
            path.clone()
        } else {
            format!("{}?{}", path, query)
        };
        state.ml.score(&path_and_query, &body, &headers_map).await
    } else {
        MlVerdict::default()
    };

    let (verdict, reason, source) = decide(
        rule_verdict.score,
        rule_verdict.hard_block,
        ml.is_anomaly,
        ml.confidence,
        &state.thresholds,
    );

    let mut tags = rule_verdict.tags.clone();
    if !ml.attack_type.is_empty()
        && ml.attack_type != "Normal"
        && (ml.is_anomaly || ml.confidence > state.waf.ml_tag_confidence)
    {
        tags.push(ml.attack_type.clone());
    }
    let trigger_payload = if matches!(source, Source::MlEngine | Source::Hybrid)
        && !ml.trigger_content.is_empty()
    {
        ml.trigger_content.clone()
    } else {
        rule_verdict.trigger_payload.clone()
    };

    state.stats.track(
        &entry.domain_id,
        verdict != Verdict::Allow,
        verdict == Verdict::Block,
    );

    state.logger.emit(AttackLog {
        id: Uuid::new_v4().to_string(),
        tenant_id: entry.tenant_id.clone(),
        domain_id: entry.domain_id.clone(),
        timestamp: Utc::now(),
        client_ip: client_ip.clone(),
        request_path: path.clone(),
        reason: reason.to_string(),
        source: source.as_str().to_string(),
        tags,
        action: verdict.action_label().to_string(),
        rule_score: rule_verdict.score,
        ml_confidence: ml.confidence,
        request: FullRequest {
            method: inspection.method.clone(),
            url: req.uri().to_string(),
            headers: headers_map,
            body: body_text,
        },
        trigger_payload,
    });

    match verdict {
        Verdict::Block => {
            log::warn!(
                "Blocked {} on {} ({}, source {})",
                client_ip,
                host,
                reason,
                source.as_str()
            );
            HttpResponse::Forbidden().body(format!("WAF Blocked: {}", reason))
        }
        Verdict::Monitor | Verdict::Allow => forward(&req, body, &host, &client_ip, &state).await,
    }
}

/// Buffers the request body up to the configured cap; 413 on overflow.
async fn read_body(mut payload: web::Payload, cap: usize) -> Result<web::Bytes, HttpResponse> {
    let mut buf = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("Request body read failed: {}", e);
                return Err(HttpResponse::BadRequest().body("Malformed request body"));
            }
        };
        if buf.len() + chunk.len() > cap {
            return Err(HttpResponse::PayloadTooLarge().body("Request body too large"));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn count_query_params(query: &str) -> usize {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split('=').next().unwrap_or(pair))
        .collect::<HashSet<_>>()
        .len()
}

/// Target base URL: the host's origin record when one exists, the
/// configured default otherwise.
async fn origin_url(state: &ProxyState, host: &str) -> String {
    let lookup = with_deadline(ORIGIN_LOOKUP_DEADLINE_SECS, state.intent.find_origin_record(host));
    match lookup.await {
        Ok(Some(record)) => {
            if record.content.starts_with("http") {
                record.content
            } else if record.origin_ssl {
                format!("https://{}", record.content)
            } else {
                format!("http://{}", record.content)
            }
        }
        Ok(None) => state.waf.default_origin.clone(),
        Err(e) => {
            log::error!("Origin lookup failed for {}: {}", host, e);
            state.waf.default_origin.clone()
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

async fn forward(
    req: &HttpRequest,
    body: web::Bytes,
    host: &str,
    client_ip: &str,
    state: &ProxyState,
) -> HttpResponse {
    let base = origin_url(state, host).await;
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", base.trim_end_matches('/'), path_and_query);

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut builder = state.upstream.request(method, &url);
    for (name, value) in req.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            builder = builder.header(name.as_str(), v);
        }
    }
    builder = builder
        .header("X-Forwarded-Host", host)
        .header("X-Forwarded-Proto", "https")
        .header("X-Real-IP", client_ip)
        .body(body.to_vec());

    match builder.send().await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = HttpResponse::build(status);
            for (name, value) in upstream.headers() {
                if is_hop_by_hop(name.as_str()) {
                    continue;
                }
                response.insert_header((name.as_str(), value.as_bytes()));
            }
            response.streaming(upstream.bytes_stream().map(|chunk| {
                chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            }))
        }
        Err(e) => {
            log::error!("Proxy upstream error for {}: {}", host, e);
            HttpResponse::BadGateway()
                .content_type("text/html; charset=utf-8")
                .body(BAD_GATEWAY_PAGE)
        }
    }
}

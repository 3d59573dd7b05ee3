//! Client for the external anomaly scorer.
//!
//! The ML tier is best-effort: the request is serialized to the scorer's
//! JSON contract and posted with a strict timeout, and any failure (network,
//! timeout, non-2xx, decode) degrades to the zero verdict so the rule
//! engine stays authoritative.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    path: &'a str,
    body: &'a str,
    length: usize,
    headers: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    is_anomaly: bool,
    anomaly_score: f64,
    #[serde(default)]
    attack_type: String,
    #[serde(default)]
    trigger_content: String,
}

/// Outcome of one scoring call. `Default` is the degraded "no opinion"
/// verdict.
#[derive(Debug, Clone, Default)]
pub struct MlVerdict {
    pub is_anomaly: bool,
    pub confidence: f64,
    pub attack_type: String,
    pub trigger_content: String,
}

pub struct MlClient {
    client: Client,
    /// None when no scorer is configured; the tier is skipped entirely.
    url: Option<String>,
    timeout: Duration,
}

impl MlClient {
    pub fn new(url: &str, timeout_ms: u64) -> Self {
        Self {
            client: Client::new(),
            url: if url.is_empty() {
                None
            } else {
                Some(url.to_string())
            },
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Scores one request. Never fails; see the module docs.
    pub async fn score(
        &self,
        path_and_query: &str,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> MlVerdict {
        let url = match &self.url {
            Some(url) => url,
            None => return MlVerdict::default(),
        };

        let body_str = String::from_utf8_lossy(body);
        let payload = ScoreRequest {
            path: path_and_query,
            body: &body_str,
            length: body.len(),
            headers,
        };

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                log::debug!("ML scorer returned status {}", resp.status());
                return MlVerdict::default();
            }
            Err(e) => {
                log::debug!("ML scorer unreachable: {}", e);
                return MlVerdict::default();
            }
        };

        match response.json::<ScoreResponse>().await {
            Ok(score) => MlVerdict {
                is_anomaly: score.is_anomaly,
                confidence: score.anomaly_score,
                attack_type: score.attack_type,
                trigger_content: score.trigger_content,
            },
            Err(e) => {
                log::debug!("ML scorer response unparseable: {}", e);
                MlVerdict::default()
            }
        }
    }
}

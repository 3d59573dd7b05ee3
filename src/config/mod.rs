//! Configuration loading for the WAF gateway.
//!
//! Settings are layered: compiled defaults, then the TOML file named by
//! `CONFIG_FILE` (default `config/default.toml`), then environment
//! variables (`SERVER__PORT=8443` style).

use std::env;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};

use crate::models::Config;

/// Load configuration from defaults, file and environment variables.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__"))
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.client_timeout_secs", 15)?
        .set_default("server.keep_alive_secs", 90)?
        .set_default("server.admin_host", "admin.waf-gateway.local")?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("resolver_db.path", "data/pdns.sqlite3")?
        // Rate limiting defaults
        .set_default("rate_limit.limit", 100)?
        .set_default("rate_limit.window_seconds", 60)?
        // WAF defaults
        .set_default("waf.public_ip", "127.0.0.1")?
        .set_default("waf.default_origin", "http://127.0.0.1:3000")?
        .set_default("waf.ml_url", "")?
        .set_default("waf.ml_timeout_ms", 800)?
        .set_default("waf.block_score", 15)?
        .set_default("waf.hybrid_score", 10)?
        .set_default("waf.ml_block_confidence", 0.80)?
        .set_default("waf.ml_monitor_confidence", 0.65)?
        .set_default("waf.ml_hybrid_confidence", 0.40)?
        .set_default("waf.ml_tag_confidence", 0.60)?
        .set_default("waf.max_body_bytes", 1_048_576)?
        .set_default("waf.default_rule_enabled", true)?
        // DNS defaults
        .set_default(
            "dns.ns_pool",
            vec![
                "jade", "onyx", "opal", "ruby", "topaz", "beryl", "coral", "amber", "pearl",
                "agate", "flint",
            ],
        )?
        .set_default("dns.ns_suffix", ".ns.waf-gateway.net")?
        .set_default("dns.waf_record_ttl", 300)?
        .set_default("dns.rdap_base_url", "https://rdap.org/domain")?
        .set_default("dns.rdap_timeout_secs", 15)?
        .build()?;

    config.try_deserialize()
}

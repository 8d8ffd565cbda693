use serde::{Deserialize, Serialize};

use crate::core::alert_engine::AlertConfig;
use crate::core::anomaly_detector::DetectionConfig;
use crate::core::rate_limiter::RateLimitTier;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Use Redis-backed block cache and rate counters instead of the
    /// in-process defaults
    pub enabled: bool,
    /// Redis connection URL
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Rate limit configuration: the default tier applied to credentials issued
/// without an explicit tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Points per minute
    pub per_minute: u32,
    /// Points per hour
    pub per_hour: u32,
    /// Points per day
    pub per_day: u32,
}

impl RateLimitConfig {
    pub fn as_tier(&self) -> RateLimitTier {
        RateLimitTier {
            per_minute: self.per_minute,
            per_hour: self.per_hour,
            per_day: self.per_day,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let tier = RateLimitTier::default();
        Self {
            per_minute: tier.per_minute,
            per_hour: tier.per_hour,
            per_day: tier.per_day,
        }
    }
}

/// Request gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Reject requests presenting no API key
    pub require_api_key: bool,
    /// Admin credential seeded at startup so the alert surface is reachable
    /// on a fresh deployment
    pub bootstrap_admin_key: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            bootstrap_admin_key: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Default rate-limit tier
    pub rate_limit: RateLimitConfig,
    /// Request gate configuration
    pub gate: GateConfig,
    /// Abuse detection configuration
    pub detection: DetectionConfig,
    /// Alert engine configuration
    pub alerts: AlertConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        let mut config = Config::default();
        if let Ok(host) = std::env::var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("SERVER_PORT") {
            config.server.port = port.parse()?;
        }
        if let Ok(enabled) = std::env::var("REDIS_ENABLED") {
            config.redis.enabled = enabled.parse()?;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = url;
        }
        if let Ok(limit) = std::env::var("RATE_LIMIT_PER_MINUTE") {
            config.rate_limit.per_minute = limit.parse()?;
        }
        if let Ok(limit) = std::env::var("RATE_LIMIT_PER_HOUR") {
            config.rate_limit.per_hour = limit.parse()?;
        }
        if let Ok(limit) = std::env::var("RATE_LIMIT_PER_DAY") {
            config.rate_limit.per_day = limit.parse()?;
        }
        if let Ok(required) = std::env::var("GATE_REQUIRE_API_KEY") {
            config.gate.require_api_key = required.parse()?;
        }
        if let Ok(key) = std::env::var("GATE_BOOTSTRAP_ADMIN_KEY") {
            config.gate.bootstrap_admin_key = Some(key);
        }
        if let Ok(window) = std::env::var("DETECTION_WINDOW_SECS") {
            config.detection.window_seconds = window.parse()?;
        }
        if let Ok(interval) = std::env::var("DETECTION_SWEEP_INTERVAL_SECS") {
            config.detection.sweep_interval_seconds = interval.parse()?;
        }
        if let Ok(ttl) = std::env::var("ALERT_BLOCK_TTL_SECS") {
            config.alerts.block_ttl_seconds = ttl.parse()?;
        }
        if let Ok(url) = std::env::var("ALERT_WEBHOOK_URL") {
            config.alerts.webhook_url = Some(url);
        }
        Ok(config)
    }
}

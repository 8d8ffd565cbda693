//! Abusive-traffic detection for the admission control service.
//!
//! The detector runs on a periodic sweep, off the request path. Each sweep
//! aggregates recent request outcomes per source IP and compares the
//! aggregates against two bars: crossing the first marks the IP suspicious
//! and raises a security alert; crossing the stricter second bar additionally
//! writes a block-cache entry directly. The direct block is an independent
//! containment path alongside the alert engine's own action pipeline, so a
//! severe offender is contained even if alert handling lags.

use log::{debug, error, info};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::activity_log::{ActivityLog, ActivityLogError, RequestOutcome};
use crate::core::alert_engine::{AlertEngine, AlertType, NewAlert, Severity};
use crate::core::block_cache::{BlockEntry, BlockStore, BlockStoreError};

/// Errors that can occur during a detection sweep
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("activity log error: {0}")]
    Log(#[from] ActivityLogError),
    #[error("block cache error: {0}")]
    Block(#[from] BlockStoreError),
}

/// Detection thresholds and windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Trailing aggregation window in seconds
    pub window_seconds: u64,
    /// Sweep cadence in seconds
    pub sweep_interval_seconds: u64,
    /// Requests per window marking an IP suspicious
    pub request_count_threshold: u64,
    /// Error-rate fraction marking an IP suspicious
    pub error_rate_threshold: f64,
    /// Distinct endpoints per window marking an IP suspicious
    pub endpoint_spread_threshold: usize,
    /// Requests per window triggering a direct block
    pub hard_request_count_threshold: u64,
    /// Error-rate fraction triggering a direct block
    pub hard_error_rate_threshold: f64,
    /// TTL of a direct block, in seconds
    pub block_ttl_seconds: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            sweep_interval_seconds: 60,
            request_count_threshold: 100,
            error_rate_threshold: 0.5,
            endpoint_spread_threshold: 20,
            hard_request_count_threshold: 200,
            hard_error_rate_threshold: 0.8,
            block_ttl_seconds: 900,
        }
    }
}

/// Per-IP aggregate over the trailing window
#[derive(Debug, Clone)]
pub struct IpTrafficSummary {
    pub source_ip: String,
    pub request_count: u64,
    pub error_rate: f64,
    pub distinct_endpoints: usize,
}

/// What one sweep did
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub examined_ips: usize,
    pub flagged: usize,
    pub blocked: usize,
}

/// Periodic abuse detector
pub struct AnomalyDetector {
    log: Arc<dyn ActivityLog>,
    blocks: Arc<dyn BlockStore>,
    alerts: Arc<AlertEngine>,
    config: DetectionConfig,
}

impl AnomalyDetector {
    pub fn new(
        log: Arc<dyn ActivityLog>,
        blocks: Arc<dyn BlockStore>,
        alerts: Arc<AlertEngine>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            log,
            blocks,
            alerts,
            config,
        }
    }

    /// Aggregate the trailing window and escalate every suspicious IP.
    ///
    /// Alert-creation failures for one IP are logged and do not stop the rest
    /// of the sweep.
    pub async fn sweep(&self) -> Result<SweepReport, DetectionError> {
        let window = Duration::from_secs(self.config.window_seconds);
        let outcomes = self.log.recent(window).await?;
        let summaries = aggregate_by_ip(&outcomes);

        let mut report = SweepReport {
            examined_ips: summaries.len(),
            ..SweepReport::default()
        };

        for summary in summaries {
            if !self.is_suspicious(&summary) {
                continue;
            }
            report.flagged += 1;
            counter!("detector_flagged_total", 1);

            let hard = summary.request_count > self.config.hard_request_count_threshold
                || summary.error_rate > self.config.hard_error_rate_threshold;

            info!(
                "suspicious traffic from {}: {} requests, {:.2} error rate, {} endpoints",
                summary.source_ip, summary.request_count, summary.error_rate, summary.distinct_endpoints
            );

            let mut new = NewAlert::new(
                AlertType::SuspiciousActivity,
                if hard { Severity::High } else { Severity::Medium },
            );
            new.source_ip = Some(summary.source_ip.clone());
            new.confidence = self.confidence(&summary, hard);
            new.description = format!(
                "{} requests, {:.0}% errors, {} distinct endpoints within {}s",
                summary.request_count,
                summary.error_rate * 100.0,
                summary.distinct_endpoints,
                self.config.window_seconds
            );
            if let Err(e) = self.alerts.create(new).await {
                error!("alert creation for {} failed: {}", summary.source_ip, e);
            }

            if hard {
                let entry = BlockEntry::new(
                    "suspicious_activity",
                    Duration::from_secs(self.config.block_ttl_seconds),
                    None,
                );
                self.blocks.set(&summary.source_ip, entry).await?;
                report.blocked += 1;
                counter!("detector_blocked_total", 1);
            }
        }

        debug!(
            "sweep examined {} ips, flagged {}, blocked {}",
            report.examined_ips, report.flagged, report.blocked
        );
        Ok(report)
    }

    fn is_suspicious(&self, summary: &IpTrafficSummary) -> bool {
        summary.request_count > self.config.request_count_threshold
            || summary.error_rate > self.config.error_rate_threshold
            || summary.distinct_endpoints > self.config.endpoint_spread_threshold
    }

    /// Confidence grows with the number of crossed thresholds.
    fn confidence(&self, summary: &IpTrafficSummary, hard: bool) -> u8 {
        let mut score = 40u8;
        if summary.request_count > self.config.request_count_threshold {
            score += 15;
        }
        if summary.error_rate > self.config.error_rate_threshold {
            score += 15;
        }
        if summary.distinct_endpoints > self.config.endpoint_spread_threshold {
            score += 15;
        }
        if hard {
            score += 15;
        }
        score.min(100)
    }
}

/// Group outcomes by source IP and compute the per-IP aggregates.
fn aggregate_by_ip(outcomes: &[RequestOutcome]) -> Vec<IpTrafficSummary> {
    let mut by_ip: HashMap<&str, (u64, u64, HashSet<&str>)> = HashMap::new();
    for outcome in outcomes {
        let entry = by_ip.entry(outcome.source_ip.as_str()).or_default();
        entry.0 += 1;
        if outcome.status >= 400 {
            entry.1 += 1;
        }
        entry.2.insert(outcome.endpoint.as_str());
    }

    by_ip
        .into_iter()
        .map(|(ip, (count, errors, endpoints))| IpTrafficSummary {
            source_ip: ip.to_string(),
            request_count: count,
            error_rate: if count == 0 { 0.0 } else { errors as f64 / count as f64 },
            distinct_endpoints: endpoints.len(),
        })
        .collect()
}

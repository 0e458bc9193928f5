//! Baseline-relative anomaly detection and shadow-ban risk.
//!
//! All checks here are pure: they compare one observed sample against an
//! account's baseline statistics and report what looks wrong. The router
//! feeds them from its feedback path and consumes the verdicts during
//! candidate filtering.

use serde::{Deserialize, Serialize};

/// Summary statistics over recent successful operations for one account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Baseline {
    /// Samples folded into the averages.
    pub sample_count: u64,
    /// Running mean latency.
    pub avg_latency_ms: f64,
    /// 95th percentile latency over the recent window.
    pub p95_latency_ms: f64,
}

impl Baseline {
    /// Fold one latency sample into the running mean.
    pub fn observe(&mut self, latency_ms: f64) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / n;
    }
}

/// One observed sample fed into the detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalySample {
    /// Observed latency; zero when the call failed before timing.
    pub latency_ms: f64,
    /// Error rate over the account's recent history, 0-1.
    pub error_rate: f64,
    /// Timeouts observed in this sample.
    pub timeout_count: u32,
}

/// Kind of detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Timeout,
    LatencySpike,
    P95Degradation,
    HighErrorRate,
}

/// A detected anomaly with its magnitude.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    /// What was detected.
    pub kind: AnomalyKind,
    /// Observed-to-baseline ratio, or the raw rate for error anomalies.
    pub magnitude: f64,
    /// Human-readable description.
    pub detail: String,
}

/// Detection thresholds.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Baseline samples required before latency checks fire.
    pub min_samples: u64,
    /// Spike threshold relative to the average.
    pub latency_multiplier: f64,
    /// Spike threshold relative to the p95.
    pub p95_multiplier: f64,
    /// Error-rate threshold; clamped into [0, 1] at evaluation.
    pub error_rate_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            latency_multiplier: 2.0,
            p95_multiplier: 2.0,
            error_rate_threshold: 0.10,
        }
    }
}

/// Pure anomaly checks over a baseline and a current sample.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Latency spike relative to the baseline average.
    ///
    /// Silent until the baseline has accumulated `min_samples`.
    pub fn check_latency_spike(&self, baseline: &Baseline, current_ms: f64) -> Option<Anomaly> {
        if baseline.sample_count < self.config.min_samples || baseline.avg_latency_ms <= 0.0 {
            return None;
        }
        let ratio = current_ms / baseline.avg_latency_ms;
        (ratio > self.config.latency_multiplier).then(|| Anomaly {
            kind: AnomalyKind::LatencySpike,
            magnitude: ratio,
            detail: format!(
                "latency {current_ms:.0}ms is {ratio:.1}x the {:.0}ms average",
                baseline.avg_latency_ms
            ),
        })
    }

    /// Latency spike relative to the baseline p95.
    pub fn check_p95(&self, baseline: &Baseline, current_ms: f64) -> Option<Anomaly> {
        if baseline.sample_count < self.config.min_samples || baseline.p95_latency_ms <= 0.0 {
            return None;
        }
        let ratio = current_ms / baseline.p95_latency_ms;
        (ratio > self.config.p95_multiplier).then(|| Anomaly {
            kind: AnomalyKind::P95Degradation,
            magnitude: ratio,
            detail: format!(
                "latency {current_ms:.0}ms is {ratio:.1}x the {:.0}ms p95",
                baseline.p95_latency_ms
            ),
        })
    }

    /// Error rate above the configured threshold.
    pub fn check_error_rate(&self, error_rate: f64) -> Option<Anomaly> {
        let threshold = self.config.error_rate_threshold.clamp(0.0, 1.0);
        (error_rate > threshold).then(|| Anomaly {
            kind: AnomalyKind::HighErrorRate,
            magnitude: error_rate,
            detail: format!("error rate {error_rate:.2} exceeds {threshold:.2}"),
        })
    }

    /// Any observed timeout is anomalous on its own.
    pub fn check_timeout(&self, timeout_count: u32) -> Option<Anomaly> {
        (timeout_count > 0).then(|| Anomaly {
            kind: AnomalyKind::Timeout,
            magnitude: timeout_count as f64,
            detail: format!("{timeout_count} timeout(s) observed"),
        })
    }

    /// Run every check against the sample.
    ///
    /// Timeouts short-circuit: a timed-out sample carries no usable latency,
    /// so the latency and error checks are skipped for it.
    pub fn detect(&self, baseline: &Baseline, sample: &AnomalySample) -> Vec<Anomaly> {
        if let Some(timeout) = self.check_timeout(sample.timeout_count) {
            return vec![timeout];
        }

        let mut anomalies = Vec::new();
        anomalies.extend(self.check_latency_spike(baseline, sample.latency_ms));
        anomalies.extend(self.check_p95(baseline, sample.latency_ms));
        anomalies.extend(self.check_error_rate(sample.error_rate));
        anomalies
    }
}

/// Heuristic classification of an account's apparent degradation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ShadowBanRisk {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl ShadowBanRisk {
    /// Step the risk down one level, clamping at `Low`.
    pub fn downgrade(self) -> Self {
        match self {
            Self::Critical => Self::High,
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    /// Whether routing should treat the account as shadow-banned.
    pub fn is_shadow_banned(self) -> bool {
        self >= Self::High
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ShadowBanRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify shadow-ban risk from an account's recent behavior.
///
/// With fewer than 10 samples the verdict is downgraded one step: too little
/// evidence to act on the raw signal.
pub fn assess_shadow_ban_risk(
    consecutive_errors: u32,
    error_rate: f64,
    latency_degradation: f64,
    sample_count: u64,
) -> ShadowBanRisk {
    let risk = if consecutive_errors >= 10 || error_rate >= 0.5 {
        ShadowBanRisk::Critical
    } else if consecutive_errors >= 5 || error_rate >= 0.25 || latency_degradation >= 3.0 {
        ShadowBanRisk::High
    } else if consecutive_errors >= 3 || error_rate >= 0.10 || latency_degradation >= 2.0 {
        ShadowBanRisk::Medium
    } else {
        ShadowBanRisk::Low
    };

    if sample_count < 10 {
        risk.downgrade()
    } else {
        risk
    }
}

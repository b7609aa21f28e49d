use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// A single backend target for a service, as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Endpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Health status an endpoint can be in. `Unknown` is treated as healthy for
/// selection purposes until the health checker has observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Per-endpoint health state, mutated only by the health checker.
///
/// Counters and status are independent atomics rather than a lock: the
/// health checker is the sole writer per endpoint, and readers (the load
/// balancer) only need the current status on the request hot path.
#[derive(Debug)]
pub struct HealthState {
    consecutive_success: AtomicU32,
    consecutive_fail: AtomicU32,
    status: AtomicU8,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            consecutive_success: AtomicU32::new(0),
            consecutive_fail: AtomicU32::new(0),
            status: AtomicU8::new(HealthStatus::Unknown as u8),
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_selectable(&self) -> bool {
        !matches!(self.status(), HealthStatus::Unhealthy)
    }

    /// Record a probe outcome and apply the transition rules: a status flip
    /// requires `threshold` consecutive same-direction outcomes, and any
    /// opposing outcome resets the other counter to zero.
    pub fn record(&self, success: bool, healthy_threshold: u32, unhealthy_threshold: u32) {
        if success {
            self.consecutive_fail.store(0, Ordering::Release);
            let n = self.consecutive_success.fetch_add(1, Ordering::AcqRel) + 1;
            if n >= healthy_threshold && self.status() != HealthStatus::Healthy {
                self.status.store(HealthStatus::Healthy as u8, Ordering::Release);
                self.consecutive_success.store(0, Ordering::Release);
            }
        } else {
            self.consecutive_success.store(0, Ordering::Release);
            let n = self.consecutive_fail.fetch_add(1, Ordering::AcqRel) + 1;
            if n >= unhealthy_threshold && self.status() != HealthStatus::Unhealthy {
                self.status.store(HealthStatus::Unhealthy as u8, Ordering::Release);
                self.consecutive_fail.store(0, Ordering::Release);
            }
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Load-balancer selection policy for a service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LbAlgorithm {
    RoundRobin,
    Weighted,
    Consistent,
    Random,
}

impl Default for LbAlgorithm {
    fn default() -> Self {
        LbAlgorithm::RoundRobin
    }
}

/// Active health-check configuration for an `http` service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hc_path")]
    pub path: String,
    #[serde(default = "default_hc_interval")]
    pub interval: String,
    #[serde(default = "default_hc_timeout")]
    pub timeout: String,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

fn default_hc_path() -> String {
    "/".into()
}
fn default_hc_interval() -> String {
    "10s".into()
}
fn default_hc_timeout() -> String {
    "3s".into()
}
fn default_healthy_threshold() -> u32 {
    2
}
fn default_unhealthy_threshold() -> u32 {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_hc_path(),
            interval: default_hc_interval(),
            timeout: default_hc_timeout(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

/// Parse a "5s"/"500ms" style duration string as required by config
/// validation (bare numbers without a unit suffix are rejected).
pub fn parse_duration_suffixed(raw: &str) -> Result<std::time::Duration, String> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        let n: u64 = ms.parse().map_err(|_| format!("invalid duration: {raw}"))?;
        return Ok(std::time::Duration::from_millis(n));
    }
    if let Some(s) = raw.strip_suffix('s') {
        let n: f64 = s.parse().map_err(|_| format!("invalid duration: {raw}"))?;
        return Ok(std::time::Duration::from_secs_f64(n));
    }
    Err(format!("duration must be suffixed with 's' or 'ms': {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_selectable() {
        let hs = HealthState::new();
        assert_eq!(hs.status(), HealthStatus::Unknown);
        assert!(hs.is_selectable());
    }

    #[test]
    fn flips_to_unhealthy_after_threshold_failures() {
        let hs = HealthState::new();
        hs.record(false, 2, 3);
        hs.record(false, 2, 3);
        assert!(hs.is_selectable());
        hs.record(false, 2, 3);
        assert_eq!(hs.status(), HealthStatus::Unhealthy);
        assert!(!hs.is_selectable());
    }

    #[test]
    fn single_opposing_result_resets_counter() {
        let hs = HealthState::new();
        hs.record(false, 2, 3);
        hs.record(false, 2, 3);
        hs.record(true, 2, 3); // resets fail counter
        hs.record(false, 2, 3);
        hs.record(false, 2, 3);
        // only 2 consecutive fails since the reset — not yet unhealthy
        assert!(hs.is_selectable());
    }

    #[test]
    fn recovers_after_healthy_threshold() {
        let hs = HealthState::new();
        hs.record(false, 2, 1);
        assert_eq!(hs.status(), HealthStatus::Unhealthy);
        hs.record(true, 2, 1);
        assert_eq!(hs.status(), HealthStatus::Unhealthy);
        hs.record(true, 2, 1);
        assert_eq!(hs.status(), HealthStatus::Healthy);
    }

    #[test]
    fn duration_requires_suffix() {
        assert!(parse_duration_suffixed("5").is_err());
        assert_eq!(parse_duration_suffixed("5s").unwrap().as_secs(), 5);
        assert_eq!(parse_duration_suffixed("250ms").unwrap().as_millis(), 250);
    }
}

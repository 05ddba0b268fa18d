use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::Status;

/// Engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds per interval unit
    pub interval_length: i64,
    /// Upper bound, in seconds, for spreading first checks
    pub max_check_spread: i64,
    pub enable_flap_detection: bool,
    pub flap_history: usize,
    pub low_flap_threshold: f64,
    pub high_flap_threshold: f64,
    /// Force impacted entities into the impact states below
    pub enable_impact_state_change: bool,
    pub host_impact_state: Status,
    pub service_impact_state: Status,
    /// Seconds added to every freshness threshold
    pub additional_freshness_latency: i64,
    /// Seconds after which a dependency's last result is too old to trust
    pub cached_check_horizon: i64,
    pub check_timeout: u64,
    pub notification_timeout: u64,
    pub event_handler_timeout: u64,
    pub execute_checks: bool,
    pub enable_notifications: bool,
    pub enable_event_handlers: bool,
    pub check_freshness: bool,
    /// Audit entries kept in memory
    pub audit_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_length: 60,
            max_check_spread: 300,
            enable_flap_detection: true,
            flap_history: 20,
            low_flap_threshold: 25.0,
            high_flap_threshold: 50.0,
            enable_impact_state_change: true,
            host_impact_state: Status::Unreachable,
            service_impact_state: Status::Unknown,
            additional_freshness_latency: 15,
            cached_check_horizon: 15,
            check_timeout: 60,
            notification_timeout: 30,
            event_handler_timeout: 30,
            execute_checks: true,
            enable_notifications: true,
            enable_event_handlers: true,
            check_freshness: true,
            audit_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults
    /// VIGIL_INTERVAL_LENGTH=60
    /// VIGIL_MAX_CHECK_SPREAD=300
    /// VIGIL_FLAP_HISTORY=20
    /// VIGIL_LOW_FLAP_THRESHOLD=25
    /// VIGIL_HIGH_FLAP_THRESHOLD=50
    /// VIGIL_ENABLE_FLAP_DETECTION=true
    /// VIGIL_IMPACT_STATE_CHANGE=true
    /// VIGIL_HOST_IMPACT_STATE=unreachable
    /// VIGIL_SERVICE_IMPACT_STATE=unknown
    /// VIGIL_FRESHNESS_LATENCY=15
    /// VIGIL_CACHED_CHECK_HORIZON=15
    /// VIGIL_CHECK_TIMEOUT=60
    /// VIGIL_NOTIFICATION_TIMEOUT=30
    /// VIGIL_EVENT_HANDLER_TIMEOUT=30
    /// VIGIL_EXECUTE_CHECKS=true
    /// VIGIL_ENABLE_NOTIFICATIONS=true
    /// VIGIL_ENABLE_EVENT_HANDLERS=true
    /// VIGIL_CHECK_FRESHNESS=true
    /// VIGIL_AUDIT_CAPACITY=1000
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let env = Env(&lookup);

        Self {
            interval_length: env.parse("VIGIL_INTERVAL_LENGTH", d.interval_length),
            max_check_spread: env.parse("VIGIL_MAX_CHECK_SPREAD", d.max_check_spread),
            enable_flap_detection: env.flag("VIGIL_ENABLE_FLAP_DETECTION", d.enable_flap_detection),
            flap_history: env.parse("VIGIL_FLAP_HISTORY", d.flap_history),
            low_flap_threshold: env.parse("VIGIL_LOW_FLAP_THRESHOLD", d.low_flap_threshold),
            high_flap_threshold: env.parse("VIGIL_HIGH_FLAP_THRESHOLD", d.high_flap_threshold),
            enable_impact_state_change: env.flag("VIGIL_IMPACT_STATE_CHANGE", d.enable_impact_state_change),
            host_impact_state: env.status("VIGIL_HOST_IMPACT_STATE", d.host_impact_state),
            service_impact_state: env.status("VIGIL_SERVICE_IMPACT_STATE", d.service_impact_state),
            additional_freshness_latency: env.parse("VIGIL_FRESHNESS_LATENCY", d.additional_freshness_latency),
            cached_check_horizon: env.parse("VIGIL_CACHED_CHECK_HORIZON", d.cached_check_horizon),
            check_timeout: env.parse("VIGIL_CHECK_TIMEOUT", d.check_timeout),
            notification_timeout: env.parse("VIGIL_NOTIFICATION_TIMEOUT", d.notification_timeout),
            event_handler_timeout: env.parse("VIGIL_EVENT_HANDLER_TIMEOUT", d.event_handler_timeout),
            execute_checks: env.flag("VIGIL_EXECUTE_CHECKS", d.execute_checks),
            enable_notifications: env.flag("VIGIL_ENABLE_NOTIFICATIONS", d.enable_notifications),
            enable_event_handlers: env.flag("VIGIL_ENABLE_EVENT_HANDLERS", d.enable_event_handlers),
            check_freshness: env.flag("VIGIL_CHECK_FRESHNESS", d.check_freshness),
            audit_capacity: env.parse("VIGIL_AUDIT_CAPACITY", d.audit_capacity),
        }
    }

    pub fn impact_policy(&self) -> crate::graph::ImpactPolicy {
        crate::graph::ImpactPolicy {
            change_state: self.enable_impact_state_change,
            host_state: self.host_impact_state,
            service_state: self.service_impact_state,
        }
    }
}

/// Typed reads over a key/value source
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        (self.0)(key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(default)
    }

    fn status(&self, key: &str, default: Status) -> Status {
        (self.0)(key)
            .and_then(|v| serde_json::from_value(serde_json::Value::String(v.to_lowercase())).ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_env() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.interval_length, 60);
        assert_eq!(config.flap_history, 20);
        assert_eq!(config.host_impact_state, Status::Unreachable);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VIGIL_INTERVAL_LENGTH", "10"),
            ("VIGIL_HIGH_FLAP_THRESHOLD", "40.5"),
            ("VIGIL_ENABLE_NOTIFICATIONS", "false"),
            ("VIGIL_SERVICE_IMPACT_STATE", "CRITICAL"),
            ("VIGIL_FLAP_HISTORY", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.interval_length, 10);
        assert_eq!(config.high_flap_threshold, 40.5);
        assert!(!config.enable_notifications);
        assert_eq!(config.service_impact_state, Status::Critical);
        assert_eq!(config.flap_history, 20);
    }
}

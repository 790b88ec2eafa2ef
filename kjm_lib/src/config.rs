use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Kubernetes,
    /// in-process fake cluster, nothing is executed
    Memory,
}

/// every field has a default, durations are given in seconds
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    pub namespace: String,
    pub launch_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// terminal workloads older than this are deleted by the cleanup loop
    pub stale_threshold_secs: u64,
    /// workloads that never progressed are deleted once older than this
    pub orphan_cutoff_secs: u64,
    pub backoff_limit: i32,
    pub ttl_seconds_after_finished: i32,
    pub management_label_key: String,
    pub management_label_value: String,
    pub record_id_label_key: String,
    pub config_mount_path: String,
    pub container_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Kubernetes,
            namespace: "default".to_string(),
            launch_interval_secs: 30,
            monitor_interval_secs: 15,
            cleanup_interval_secs: 5 * 60,
            stale_threshold_secs: 2 * 60 * 60,
            orphan_cutoff_secs: 24 * 60 * 60,
            backoff_limit: 3,
            ttl_seconds_after_finished: 300,
            management_label_key: "managed-by".to_string(),
            management_label_value: "k8s-job-manager".to_string(),
            record_id_label_key: "job-id".to_string(),
            config_mount_path: "/config".to_string(),
            container_name: "job-container".to_string(),
        }
    }
}

fn age_limit(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let intervals = [
            ("launch_interval_secs", self.launch_interval_secs),
            ("monitor_interval_secs", self.monitor_interval_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(EngineError::Validation(format!("{} must be positive", name)));
        }
        let age_limits = [
            ("stale_threshold_secs", self.stale_threshold_secs),
            ("orphan_cutoff_secs", self.orphan_cutoff_secs),
        ];
        if let Some((name, _)) = age_limits.iter().find(|(_, secs)| age_limit(*secs).is_none()) {
            return Err(EngineError::Validation(format!("{} is out of range", name)));
        }
        if self.namespace.trim().is_empty() {
            return Err(EngineError::Validation("namespace must not be empty".into()));
        }
        if self.management_label_key.is_empty() || self.record_id_label_key.is_empty() {
            return Err(EngineError::Validation("label keys must not be empty".into()));
        }
        if self.management_label_key == self.record_id_label_key {
            return Err(EngineError::Validation(
                "management and record id label keys must differ".into(),
            ));
        }
        if self.backoff_limit < 0 || self.ttl_seconds_after_finished < 0 {
            return Err(EngineError::Validation(
                "backoff_limit and ttl_seconds_after_finished must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// label selector matching every resource owned by this engine
    pub fn management_selector(&self) -> String {
        format!("{}={}", self.management_label_key, self.management_label_value)
    }

    pub fn launch_interval(&self) -> Duration {
        Duration::from_secs(self.launch_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// saturates at the largest duration for values `validate` rejects
    pub fn stale_threshold(&self) -> chrono::Duration {
        age_limit(self.stale_threshold_secs).unwrap_or(chrono::Duration::MAX)
    }

    pub fn orphan_cutoff(&self) -> chrono::Duration {
        age_limit(self.orphan_cutoff_secs).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod test {
    use super::{BackendKind, EngineConfig};

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"backend":"memory","monitor_interval_secs":5}"#).unwrap();
        assert_eq!(BackendKind::Memory, config.backend);
        assert_eq!(5, config.monitor_interval_secs);
        assert_eq!(30, config.launch_interval_secs);
        assert_eq!("managed-by=k8s-job-manager", config.management_selector());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = EngineConfig {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clashing_label_keys_rejected() {
        let config = EngineConfig {
            record_id_label_key: "managed-by".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_age_limits_rejected() {
        let config = EngineConfig {
            stale_threshold_secs: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(chrono::Duration::MAX, config.stale_threshold());

        let config = EngineConfig {
            orphan_cutoff_secs: i64::MAX as u64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(chrono::Duration::MAX, config.orphan_cutoff());

        let config = EngineConfig {
            orphan_cutoff_secs: 10 * 365 * 24 * 60 * 60,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(chrono::Duration::days(3650), config.orphan_cutoff());
    }
}

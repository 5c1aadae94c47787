//! Layered configuration: compiled-in defaults, an optional TOML file, then
//! environment variable overrides (`RELAY_*`). Parsed once at startup into an
//! immutable [`AppConfig`] and threaded through every component via `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{codes, CoreError, ErrorCategory};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_id: String,
    pub kafka_brokers: String,
    pub dispatch_topic: String,
    pub dispatch_partitions: i32,
    pub dlq_topic: String,
    pub consumer_group_id: String,
    pub client_id: String,
    pub etcd_endpoints: Vec<String>,
    pub etcd_key_prefix: String,
    pub leader_lease_ttl_secs: i64,
    pub leader_poll_interval_ms: u64,
    pub idle_processor_minutes: u64,
    pub mailbox_capacity: usize,
    pub max_inflight_per_partition: usize,
    pub max_inflight_global: usize,
    pub stress_mode: bool,
    pub stress_user_count: usize,
    pub shadow_file_path: PathBuf,
    pub http_bind_addr: String,
    pub log_format: LogFormat,
    pub log_level: String,
    pub vendor_base_url: String,
    pub vendor_corp_id: String,
    pub vendor_corp_secret: String,
    pub vendor_sync_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: "default".to_string(),
            kafka_brokers: "localhost:9092".to_string(),
            dispatch_topic: "relay.dispatch".to_string(),
            dispatch_partitions: 32,
            dlq_topic: "relay.dispatch.dlq".to_string(),
            consumer_group_id: "relay-consumer".to_string(),
            client_id: "relay".to_string(),
            etcd_endpoints: vec!["http://localhost:2379".to_string()],
            etcd_key_prefix: "/relay/".to_string(),
            leader_lease_ttl_secs: 15,
            leader_poll_interval_ms: 100,
            idle_processor_minutes: 30,
            mailbox_capacity: 100,
            max_inflight_per_partition: 256,
            max_inflight_global: 4096,
            stress_mode: false,
            stress_user_count: 1000,
            shadow_file_path: PathBuf::from("relay-cursor-shadow.json"),
            http_bind_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            vendor_base_url: "https://qyapi.weixin.qq.com".to_string(),
            vendor_corp_id: String::new(),
            vendor_corp_secret: String::new(),
            vendor_sync_limit: 1000,
        }
    }
}

impl AppConfig {
    pub fn leader_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.leader_lease_ttl_secs.max(1) as u64)
    }

    pub fn leader_renew_interval(&self) -> Duration {
        self.leader_lease_ttl() / 3
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_processor_minutes * 60)
    }

    /// Load defaults, overlay an optional TOML file, then overlay `RELAY_*`
    /// environment variables. Fails fast on the first malformed value.
    pub fn load(file_path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = AppConfig::default();

        if let Some(path) = file_path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|err| {
                    CoreError::new(
                        codes::CONFIG_PARSE,
                        ErrorCategory::Invalid,
                        format!("reading config file {}: {err}", path.display()),
                    )
                })?;
                let from_file: AppConfig = toml::from_str(&text).map_err(|err| {
                    CoreError::new(
                        codes::CONFIG_PARSE,
                        ErrorCategory::Invalid,
                        format!("parsing config file {}: {err}", path.display()),
                    )
                })?;
                config = from_file;
            }
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), CoreError> {
        macro_rules! override_string {
            ($field:ident, $env:literal) => {
                if let Ok(value) = std::env::var($env) {
                    self.$field = value;
                }
            };
        }
        macro_rules! override_parsed {
            ($field:ident, $env:literal) => {
                if let Ok(value) = std::env::var($env) {
                    self.$field = value.parse().map_err(|_| {
                        CoreError::new(
                            codes::CONFIG_PARSE,
                            ErrorCategory::Invalid,
                            format!("{} must be a valid {}", $env, stringify!($field)),
                        )
                    })?;
                }
            };
        }

        override_string!(app_id, "RELAY_APP_ID");
        override_string!(kafka_brokers, "RELAY_KAFKA_BROKERS");
        override_string!(dispatch_topic, "RELAY_DISPATCH_TOPIC");
        override_string!(dlq_topic, "RELAY_DLQ_TOPIC");
        override_string!(consumer_group_id, "RELAY_CONSUMER_GROUP_ID");
        override_string!(client_id, "RELAY_CLIENT_ID");
        override_string!(etcd_key_prefix, "RELAY_ETCD_KEY_PREFIX");
        override_string!(http_bind_addr, "RELAY_HTTP_BIND_ADDR");
        override_string!(log_level, "RELAY_LOG_LEVEL");
        override_string!(vendor_base_url, "RELAY_VENDOR_BASE_URL");
        override_string!(vendor_corp_id, "RELAY_VENDOR_CORP_ID");
        override_string!(vendor_corp_secret, "RELAY_VENDOR_CORP_SECRET");

        if let Ok(value) = std::env::var("RELAY_ETCD_ENDPOINTS") {
            self.etcd_endpoints = value.split(',').map(|s| s.trim().to_string()).collect();
        }

        override_parsed!(dispatch_partitions, "RELAY_DISPATCH_PARTITIONS");
        override_parsed!(leader_lease_ttl_secs, "RELAY_LEADER_LEASE_TTL_SECS");
        override_parsed!(leader_poll_interval_ms, "RELAY_LEADER_POLL_INTERVAL_MS");
        override_parsed!(idle_processor_minutes, "RELAY_IDLE_PROCESSOR_MINUTES");
        override_parsed!(mailbox_capacity, "RELAY_MAILBOX_CAPACITY");
        override_parsed!(max_inflight_per_partition, "RELAY_MAX_INFLIGHT_PER_PARTITION");
        override_parsed!(max_inflight_global, "RELAY_MAX_INFLIGHT_GLOBAL");
        override_parsed!(stress_mode, "RELAY_STRESS_MODE");
        override_parsed!(stress_user_count, "RELAY_STRESS_USER_COUNT");
        override_parsed!(vendor_sync_limit, "RELAY_VENDOR_SYNC_LIMIT");

        if let Ok(value) = std::env::var("RELAY_SHADOW_FILE_PATH") {
            self.shadow_file_path = PathBuf::from(value);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = AppConfig::default();
        assert_eq!(config.leader_lease_ttl(), Duration::from_secs(15));
        assert_eq!(config.leader_renew_interval(), Duration::from_secs(5));
    }

    #[test]
    fn missing_file_falls_back_to_defaults_plus_env() {
        std::env::set_var("RELAY_APP_ID", "wecom-shard-3");
        let config = AppConfig::load(Some(Path::new("/nonexistent/relay.toml"))).unwrap();
        assert_eq!(config.app_id, "wecom-shard-3");
        std::env::remove_var("RELAY_APP_ID");
    }

    #[test]
    fn malformed_env_override_fails_fast() {
        std::env::set_var("RELAY_LEADER_LEASE_TTL_SECS", "not-a-number");
        let result = AppConfig::load(None);
        std::env::remove_var("RELAY_LEADER_LEASE_TTL_SECS");
        assert!(result.is_err());
    }
}

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::resolve::ResolutionMode;

const DEFAULT_MODE: ResolutionMode = ResolutionMode::Geometric;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MQTT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_TOPIC_PREFIX: &str = "perception/pointing";
const DEFAULT_MQTT_CLIENT_ID: &str = "resolverd";

#[derive(Debug, Deserialize, Default)]
struct ResolverdConfigFile {
    mode: Option<String>,
    filter: Option<FilterConfigFile>,
    wait_timeout_secs: Option<u64>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    enabled: Option<bool>,
    class_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
    allow_remote: Option<bool>,
}

/// resolverd configuration: optional JSON file named by `POINTING_CONFIG`,
/// env-var overrides on top, then validation.
#[derive(Debug, Clone)]
pub struct ResolverdConfig {
    pub mode: ResolutionMode,
    pub filter_enabled: bool,
    pub class_filter: Option<String>,
    pub wait_timeout: Duration,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub topic_prefix: String,
    pub client_id: String,
    pub allow_remote: bool,
}

impl ResolverdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POINTING_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ResolverdConfigFile) -> Result<Self> {
        let mode = match file.mode {
            Some(raw) => raw.parse()?,
            None => DEFAULT_MODE,
        };
        let filter_enabled = file
            .filter
            .as_ref()
            .and_then(|filter| filter.enabled)
            .unwrap_or(false);
        let class_filter = file.filter.and_then(|filter| filter.class_name);
        let wait_timeout =
            Duration::from_secs(file.wait_timeout_secs.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS));
        let mqtt = MqttSettings {
            broker_addr: file
                .mqtt
                .as_ref()
                .and_then(|mqtt| mqtt.broker_addr.clone())
                .unwrap_or_else(|| DEFAULT_MQTT_BROKER_ADDR.to_string()),
            topic_prefix: file
                .mqtt
                .as_ref()
                .and_then(|mqtt| mqtt.topic_prefix.clone())
                .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
            client_id: file
                .mqtt
                .as_ref()
                .and_then(|mqtt| mqtt.client_id.clone())
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            allow_remote: file
                .mqtt
                .and_then(|mqtt| mqtt.allow_remote)
                .unwrap_or(false),
        };
        Ok(Self {
            mode,
            filter_enabled,
            class_filter,
            wait_timeout,
            mqtt,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var("POINTING_MODE") {
            if !mode.trim().is_empty() {
                self.mode = mode.parse()?;
            }
        }
        if let Ok(enabled) = std::env::var("POINTING_FILTER_ENABLED") {
            self.filter_enabled = parse_bool("POINTING_FILTER_ENABLED", &enabled)?;
        }
        if let Ok(class_name) = std::env::var("POINTING_CLASS_FILTER") {
            if !class_name.trim().is_empty() {
                self.class_filter = Some(class_name.trim().to_string());
            }
        }
        if let Ok(timeout) = std::env::var("POINTING_WAIT_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("POINTING_WAIT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.wait_timeout = Duration::from_secs(seconds);
        }
        if let Ok(addr) = std::env::var("POINTING_MQTT_BROKER_ADDR") {
            if !addr.trim().is_empty() {
                self.mqtt.broker_addr = addr;
            }
        }
        if let Ok(prefix) = std::env::var("POINTING_TOPIC_PREFIX") {
            if !prefix.trim().is_empty() {
                self.mqtt.topic_prefix = prefix;
            }
        }
        if let Ok(allow) = std::env::var("POINTING_ALLOW_REMOTE_MQTT") {
            self.mqtt.allow_remote = parse_bool("POINTING_ALLOW_REMOTE_MQTT", &allow)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.wait_timeout.as_secs() == 0 {
            return Err(anyhow!("wait_timeout_secs must be greater than zero"));
        }
        if self.filter_enabled {
            match &self.class_filter {
                Some(class_name) if !class_name.trim().is_empty() => {}
                _ => {
                    return Err(anyhow!(
                        "filter is enabled but no class_name is configured"
                    ))
                }
            }
        }
        let prefix = self.mqtt.topic_prefix.trim_matches('/').to_string();
        if prefix.is_empty() {
            return Err(anyhow!("mqtt topic_prefix must not be empty"));
        }
        if prefix.chars().any(|c| matches!(c, '#' | '+' | ' ')) {
            return Err(anyhow!(
                "mqtt topic_prefix must not contain wildcards or spaces: {:?}",
                prefix
            ));
        }
        self.mqtt.topic_prefix = prefix;
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("mqtt client_id must not be empty"));
        }
        Ok(())
    }

    /// The class filter the resolver should apply, honoring the enable flag.
    pub fn effective_class_filter(&self) -> Option<String> {
        if self.filter_enabled {
            self.class_filter.clone()
        } else {
            None
        }
    }

    pub fn context_config(&self) -> crate::context::ContextConfig {
        crate::context::ContextConfig {
            mode: self.mode,
            class_filter: self.effective_class_filter(),
            wait_timeout: self.wait_timeout,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got {:?}", name, other)),
    }
}

fn read_config_file(path: &Path) -> Result<ResolverdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

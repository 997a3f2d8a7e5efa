use crate::store::QueueScope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "BRIDGE_";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// Controller firmware is hardcoded to this port.
pub const LEGACY_PORT: u16 = 80;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub protocol: ProtocolConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: LEGACY_PORT,
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub clients: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub requested_indices: Vec<i32>,
    pub new_version: String,
    pub queue_scope: QueueScope,
    pub reject_out_of_range: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            requested_indices: vec![613, 607, 615, 590, 349, 350, 351, 352, 363, 425, 426, 920],
            new_version: "no".to_string(),
            queue_scope: QueueScope::PerClient,
            reject_out_of_range: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8081,
            token: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        match fs::read_to_string(&config_path) {
            Ok(raw) => config = toml::from_str::<Config>(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Server settings
        if let Ok(val) = env::var(format!("{}SERVER_HOST", ENV_PREFIX)) {
            self.server.host = val;
        }
        if let Ok(val) = env::var(format!("{}SERVER_PORT", ENV_PREFIX)) {
            self.server.port = val
                .parse()
                .map_err(|_| format!("invalid {}SERVER_PORT: {val}", ENV_PREFIX))?;
        }
        if let Ok(val) = env::var(format!("{}READ_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.server.read_timeout_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}WRITE_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.server.write_timeout_ms = ms;
            }
        }

        // Auth settings
        if let Ok(val) = env::var(format!("{}AUTH_ENABLED", ENV_PREFIX)) {
            self.auth.enabled = val
                .parse()
                .map_err(|_| format!("invalid {}AUTH_ENABLED: {val}", ENV_PREFIX))?;
        }
        if let Ok(val) = env::var(format!("{}CLIENT_CREDENTIALS", ENV_PREFIX)) {
            let clients = parse_client_credentials(&val);
            if !clients.is_empty() {
                self.auth.clients = clients;
            }
        }

        // Logging
        if let Ok(val) = env::var(format!("{}LOG_LEVEL", ENV_PREFIX)) {
            self.logging.level = val;
        }

        // Protocol
        if let Ok(val) = env::var(format!("{}QUEUE_SCOPE", ENV_PREFIX)) {
            self.protocol.queue_scope = match val.trim() {
                "global" => QueueScope::Global,
                "per_client" => QueueScope::PerClient,
                other => return Err(format!("invalid {}QUEUE_SCOPE: {other}", ENV_PREFIX).into()),
            };
        }

        // Admin surface
        if let Ok(val) = env::var(format!("{}ADMIN_ENABLED", ENV_PREFIX)) {
            self.admin.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var(format!("{}ADMIN_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.admin.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}ADMIN_TOKEN", ENV_PREFIX)) {
            self.admin.token = Some(val);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        if self.server.host.trim().is_empty() {
            return Err("server.host must be set".into());
        }
        if self.server.read_timeout_ms == 0 || self.server.write_timeout_ms == 0 {
            return Err("server timeouts must be positive".into());
        }
        if self.server.max_body_bytes == 0 {
            return Err("server.max_body_bytes must be non-zero".into());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(format!(
                "logging.level must be one of {}, got {}",
                LOG_LEVELS.join(", "),
                self.logging.level
            )
            .into());
        }
        if self.admin.enabled {
            if self.admin.port == 0 {
                return Err("admin.port must be non-zero".into());
            }
            if self.admin.token.as_deref().unwrap_or("").trim().is_empty() {
                return Err("admin.token is required when admin.enabled = true".into());
            }
        }
        Ok(())
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port != LEGACY_PORT {
            warnings.push(format!(
                "server.port is {}; controllers are hardcoded to port {}",
                self.server.port, LEGACY_PORT
            ));
        }
        if self.auth.enabled && self.auth.clients.is_empty() {
            warnings.push("auth is enabled without credentials; every request gets 401".to_string());
        }
        warnings
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

// "client1:key1,client2:key2"
pub fn parse_client_credentials(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (id, key) = pair.trim().split_once(':')?;
            let (id, key) = (id.trim(), key.trim());
            if id.is_empty() || key.is_empty() {
                tracing::warn!(pair = %pair.trim(), "ignoring malformed client credential");
                return None;
            }
            Some((id.to_string(), key.to_string()))
        })
        .collect()
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    PathBuf::from(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.server.port, LEGACY_PORT);
        assert_eq!(parsed.protocol.queue_scope, QueueScope::PerClient);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [protocol]
            queue_scope = "global"

            [auth]
            enabled = true
            clients = { "0123" = "secret" }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.read_timeout_ms, 10_000);
        assert_eq!(cfg.protocol.queue_scope, QueueScope::Global);
        assert_eq!(cfg.protocol.new_version, "no");
        assert_eq!(cfg.auth.clients.get("0123").map(String::as_str), Some("secret"));
    }

    #[test]
    fn validate_rejects_zero_port_and_timeouts() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
        cfg.server.port = 80;
        cfg.server.read_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_log_level() {
        let mut cfg = Config::default();
        cfg.logging.level = "verbose".to_string();
        assert!(cfg.validate().is_err());
        cfg.logging.level = "DEBUG".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_requires_admin_token_when_enabled() {
        let mut cfg = Config::default();
        cfg.admin.enabled = true;
        assert!(cfg.validate().is_err());
        cfg.admin.token = Some("  ".to_string());
        assert!(cfg.validate().is_err());
        cfg.admin.token = Some("s3cret".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn warns_on_non_legacy_port_and_empty_credentials() {
        let mut cfg = Config::default();
        assert!(cfg.warnings().is_empty());
        cfg.server.port = 8080;
        cfg.auth.enabled = true;
        assert_eq!(cfg.warnings().len(), 2);
    }

    #[test]
    fn parses_credential_list() {
        let clients = parse_client_credentials("a:1, b:2 ,bad, c:, :d, e:x:y");
        assert_eq!(clients.len(), 3);
        assert_eq!(clients["a"], "1");
        assert_eq!(clients["b"], "2");
        assert_eq!(clients["e"], "x:y");
    }
}

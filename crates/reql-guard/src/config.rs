use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;
use ws_gateway::framing::DEFAULT_MAX_QUERY_BYTES;
use ws_gateway::{BackendConfig, GatewayConfig, LoggingMode, TlsOptions};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default = "default_http_path")]
    pub http_path: String,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default = "default_whitelist_file")]
    pub whitelist_file: PathBuf,
    #[serde(default)]
    pub unsafely_allow_any_query: bool,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            http_path: default_http_path(),
            backend: BackendSection::default(),
            whitelist_file: default_whitelist_file(),
            unsafely_allow_any_query: false,
            session: SessionSection::default(),
            logging: LoggingConfig::default(),
            max_query_bytes: default_max_query_bytes(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    /// Base64-encoded credential for the backend handshake.
    #[serde(default)]
    pub auth_key: String,
    #[serde(default)]
    pub tls: TlsSection,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            auth_key: String::new(),
            tls: TlsSection::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TlsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Empty,
    UrlParams,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub mode: SessionMode,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub mode: LoggingMode,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            mode: LoggingMode::default(),
            audit_log_path: default_audit_path(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8015".to_string()
}

fn default_http_path() -> String {
    "/".to_string()
}

fn default_whitelist_file() -> PathBuf {
    PathBuf::from("whitelist.yaml")
}

fn default_backend_host() -> String {
    "localhost".to_string()
}

fn default_backend_port() -> u16 {
    28015
}

fn default_max_query_bytes() -> usize {
    DEFAULT_MAX_QUERY_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

impl Config {
    /// Point the backend at `host:port`; `[v6]:port` is accepted too.
    pub fn set_backend(&mut self, addr: &str) -> anyhow::Result<()> {
        let (host, port) = addr
            .rsplit_once(':')
            .with_context(|| format!("backend address '{addr}' must be host:port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            bail!("backend address '{addr}' has an empty host");
        }
        self.backend.port = port
            .parse()
            .with_context(|| format!("invalid backend port in '{addr}'"))?;
        self.backend.host = host.to_string();
        Ok(())
    }

    pub fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        let listen_addr: SocketAddr = self
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.listen_addr))?;
        if !self.http_path.starts_with('/') {
            bail!("http_path '{}' must start with '/'", self.http_path);
        }
        let auth_key = BASE64
            .decode(self.backend.auth_key.trim())
            .context("backend.auth_key is not valid base64")?;
        let tls = self.backend.tls.enabled.then(|| TlsOptions {
            ca_file: self.backend.tls.ca_file.clone(),
            server_name: self.backend.tls.server_name.clone(),
        });

        Ok(GatewayConfig {
            listen_addr,
            http_path: self.http_path.clone(),
            backend: BackendConfig {
                host: self.backend.host.clone(),
                port: self.backend.port,
                auth_key,
                tls,
            },
            max_query_bytes: self.max_query_bytes,
            logging: self.logging.mode,
        })
    }
}

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let config = load(Path::new("/nonexistent/reql-guard.yaml")).unwrap();
        assert_eq!(config.http_path, "/");
        assert_eq!(config.backend.port, 28015);
        assert_eq!(config.session.mode, SessionMode::Empty);
        assert_eq!(config.logging.mode, LoggingMode::All);
        assert!(!config.unsafely_allow_any_query);
        assert_eq!(config.max_query_bytes, DEFAULT_MAX_QUERY_BYTES);
    }

    #[test]
    fn full_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
listen_addr: "0.0.0.0:9000"
http_path: /reql
backend:
  host: db.internal
  port: 28016
  auth_key: aHVudGVyMg==
  tls:
    enabled: true
    server_name: rethink.example.com
whitelist_file: /etc/reql-guard/whitelist.yaml
session:
  mode: url_params
logging:
  level: debug
  mode: denied
max_query_bytes: 4096
"#
        )
        .unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.session.mode, SessionMode::UrlParams);
        assert_eq!(config.logging.mode, LoggingMode::Denied);
        assert_eq!(config.logging.level, "debug");

        let gateway = config.gateway_config().unwrap();
        assert_eq!(gateway.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(gateway.http_path, "/reql");
        assert_eq!(gateway.backend.host, "db.internal");
        assert_eq!(gateway.backend.port, 28016);
        assert_eq!(gateway.backend.auth_key, b"hunter2");
        let tls = gateway.backend.tls.unwrap();
        assert_eq!(tls.server_name.as_deref(), Some("rethink.example.com"));
        assert!(tls.ca_file.is_none());
        assert_eq!(gateway.max_query_bytes, 4096);
    }

    #[test]
    fn tls_is_off_unless_enabled() {
        let mut config = Config::default();
        config.backend.tls.server_name = Some("ignored".into());
        assert!(config.gateway_config().unwrap().backend.tls.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.backend.auth_key = "not base64!".into();
        assert!(config.gateway_config().is_err());

        let mut config = Config::default();
        config.listen_addr = "nowhere".into();
        assert!(config.gateway_config().is_err());

        let mut config = Config::default();
        config.http_path = "reql".into();
        assert!(config.gateway_config().is_err());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "session:\n  mode: cookies\n").unwrap();
        let err = load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn backend_override() {
        let mut config = Config::default();
        config.set_backend("10.0.0.5:28020").unwrap();
        assert_eq!(config.backend.host, "10.0.0.5");
        assert_eq!(config.backend.port, 28020);

        config.set_backend("[::1]:28015").unwrap();
        assert_eq!(config.backend.host, "::1");

        assert!(config.set_backend("db.internal").is_err());
        assert!(config.set_backend(":28015").is_err());
        assert!(config.set_backend("db:http").is_err());
    }
}

//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! No secrets live in the TOML: the broker's only secret input is the
//! user's password on the login route, which never touches config.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub gateway: GatewayConfig,
    pub credentials: CredentialsConfig,
}

/// Broker service settings
#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    /// The broker's own web origin, used to reject its own messages
    pub origin: String,
    /// The broker's client id at the authorization server
    pub client_id: String,
    /// Where a cached-auth login check navigates without a client flow
    pub default_redirect_uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Authorization-server connection settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Credential store settings
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub path: PathBuf,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn require_http_url(name: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        require_http_url("broker.origin", &config.broker.origin)?;
        require_http_url(
            "broker.default_redirect_uri",
            &config.broker.default_redirect_uri,
        )?;
        require_http_url("gateway.base_url", &config.gateway.base_url)?;

        if config.broker.client_id.is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if config.gateway.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.broker.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("sso-broker.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[broker]
listen_addr = "127.0.0.1:8080"
origin = "https://sso.example.com"
client_id = "sso-broker"
default_redirect_uri = "https://portal.example.com"

[gateway]
base_url = "https://auth.example.com"

[credentials]
path = "/var/lib/sso-broker/credentials.json"
"#
    }

    fn write_config(dir_name: &str, contents: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_valid_config() {
        let (dir, path) = write_config("sso-broker-test-valid", valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.broker.origin, "https://sso.example.com");
        assert_eq!(config.broker.client_id, "sso-broker");
        assert_eq!(config.gateway.base_url, "https://auth.example.com");
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(config.broker.max_connections, 1000);
        assert_eq!(
            config.credentials.path,
            PathBuf::from("/var/lib/sso-broker/credentials.json")
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let (dir, path) = write_config("sso-broker-test-invalid", "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_schemeless_urls_rejected() {
        for (dir_name, bad) in [
            (
                "sso-broker-test-bad-origin",
                valid_toml().replace("https://sso.example.com", "sso.example.com"),
            ),
            (
                "sso-broker-test-bad-gateway",
                valid_toml().replace("https://auth.example.com", "auth.example.com"),
            ),
            (
                "sso-broker-test-bad-redirect",
                valid_toml().replace("https://portal.example.com", "portal.example.com"),
            ),
        ] {
            let (dir, path) = write_config(dir_name, &bad);
            let result = Config::load(&path);
            assert!(result.is_err(), "schemeless URL must be rejected: {bad}");
            let err = format!("{}", result.unwrap_err());
            assert!(
                err.contains("must start with http"),
                "error message should explain the issue, got: {err}"
            );
            std::fs::remove_dir_all(&dir).unwrap();
        }
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let (dir, path) = write_config(
            "sso-broker-test-empty-client",
            &valid_toml().replace("sso-broker", ""),
        );
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let with_timeout = valid_toml().replace(
            "base_url = \"https://auth.example.com\"",
            "base_url = \"https://auth.example.com\"\ntimeout_secs = 0",
        );
        let (dir, path) = write_config("sso-broker-test-zero-timeout", &with_timeout);
        assert!(
            Config::load(&path).is_err(),
            "timeout_secs = 0 must be rejected"
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let with_max = valid_toml().replace(
            "client_id = \"sso-broker\"",
            "client_id = \"sso-broker\"\nmax_connections = 0",
        );
        let (dir, path) = write_config("sso-broker-test-zero-maxconn", &with_max);
        assert!(
            Config::load(&path).is_err(),
            "max_connections = 0 must be rejected"
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_custom_timeout_and_max_connections() {
        let custom = valid_toml()
            .replace(
                "base_url = \"https://auth.example.com\"",
                "base_url = \"https://auth.example.com\"\ntimeout_secs = 5",
            )
            .replace(
                "client_id = \"sso-broker\"",
                "client_id = \"sso-broker\"\nmax_connections = 250",
            );
        let (dir, path) = write_config("sso-broker-test-custom", &custom);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway.timeout_secs, 5);
        assert_eq!(config.broker.max_connections, 250);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("sso-broker.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}

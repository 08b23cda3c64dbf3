use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the dev proxy and build step
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Dev server listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Reverse proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Live reload settings
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Production build settings
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Dev server port (default: 8080). The port is fixed: if it is already
    /// in use, startup fails instead of falling back to another port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// URL prefix under which bundled assets are served (default: /assets).
    /// Requests under this prefix are always handled locally, never proxied.
    #[serde(default = "default_asset_base")]
    pub asset_base: String,

    /// Directory the dev server serves assets from (default: src)
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Backend origin that non-asset requests are forwarded to
    /// (default: http://localhost:8081)
    #[serde(default = "default_proxy_target")]
    pub target: String,

    /// Delay in milliseconds before the 502 retry page reloads itself
    /// (default: 100)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum idle connections kept to the backend (default: 10)
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,

    /// Idle backend connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReloadConfig {
    /// Filesystem paths to watch for changes. A file path watches exactly
    /// that file; a directory path watches it recursively. Typically this
    /// is the backend's compiled binary.
    #[serde(default)]
    pub watch: Vec<PathBuf>,

    /// Delay in milliseconds between a change and the reload signal
    /// (default: 0). Gives the backend time to finish restarting before
    /// the reloaded page hits the proxy.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Entry points: a single source path, or a map of logical output name
    /// to source path.
    pub entry: Option<EntryPoints>,

    /// Output directory for production bundles (default: dist)
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Emit manifest.json mapping logical entry names to hashed output
    /// filenames (default: true)
    #[serde(default = "default_true")]
    pub manifest: bool,
}

/// Build entry configuration: one implicit entry or a named map
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum EntryPoints {
    /// A single entry; its source path doubles as the logical name
    Single(String),
    /// Logical output name -> source path. BTreeMap keeps manifest key
    /// order stable.
    Named(BTreeMap<String, String>),
}

impl EntryPoints {
    /// Flatten into (logical name, source path) pairs
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            EntryPoints::Single(src) => vec![(src.clone(), src.clone())],
            EntryPoints::Named(map) => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntryPoints::Single(_) => 1,
            EntryPoints::Named(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            EntryPoints::Single(_) => false,
            EntryPoints::Named(map) => map.is_empty(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_asset_base() -> String {
    "/assets".to_string()
}

fn default_asset_root() -> PathBuf {
    PathBuf::from("src")
}

fn default_proxy_target() -> String {
    "http://localhost:8081".to_string()
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_pool_max_idle() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind_address(),
            asset_base: default_asset_base(),
            asset_root: default_asset_root(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target: default_proxy_target(),
            retry_delay_ms: default_retry_delay_ms(),
            pool_max_idle: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            entry: None,
            out_dir: default_out_dir(),
            manifest: default_true(),
        }
    }
}

impl ServerConfig {
    /// Socket address the dev server binds to
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| {
                anyhow::anyhow!("Invalid bind address '{}:{}': {}", self.bind, self.port, e)
            })
    }

    /// Asset base prefix without a trailing slash
    pub fn asset_base(&self) -> &str {
        self.asset_base.trim_end_matches('/')
    }
}

impl ProxyConfig {
    /// Parsed backend origin URI
    pub fn target_uri(&self) -> anyhow::Result<hyper::Uri> {
        let uri: hyper::Uri = self
            .target
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid proxy target '{}': {}", self.target, e))?;
        if uri.authority().is_none() {
            anyhow::bail!("Proxy target '{}' has no host", self.target);
        }
        Ok(uri)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl ReloadConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration, reporting every problem at once
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be nonzero".to_string());
        }

        let base = self.server.asset_base();
        if !base.starts_with('/') || base.len() < 2 {
            errors.push(format!(
                "server.asset_base '{}' must be a path prefix like /assets",
                self.server.asset_base
            ));
        }

        match self.proxy.target.parse::<hyper::Uri>() {
            Ok(uri) => {
                if uri.scheme_str() != Some("http") {
                    errors.push(format!(
                        "proxy.target '{}' must be an http:// origin",
                        self.proxy.target
                    ));
                } else if uri.authority().is_none() {
                    errors.push(format!("proxy.target '{}' has no host", self.proxy.target));
                }
            }
            Err(e) => {
                errors.push(format!(
                    "proxy.target '{}' is not a valid URI: {}",
                    self.proxy.target, e
                ));
            }
        }

        if let Some(ref entry) = self.build.entry {
            if entry.is_empty() {
                errors.push("build.entry map is empty".to_string());
            }
            for (name, src) in entry.entries() {
                if name.is_empty() || src.is_empty() {
                    errors.push("build.entry names and paths must be non-empty".to_string());
                }
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 8080
bind = "127.0.0.1"
asset_base = "/assets"
asset_root = "src"

[proxy]
target = "http://localhost:8081"
retry_delay_ms = 100

[reload]
watch = ["../bin/web-app"]
delay_ms = 250

[build]
entry = { "js/main.js" = "src/js/main.js", "css/main.css" = "src/css/main.css" }
out_dir = "dist"
manifest = true
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.asset_base(), "/assets");
        assert_eq!(config.proxy.target, "http://localhost:8081");
        assert_eq!(config.reload.delay_ms, 250);
        assert_eq!(config.reload.watch.len(), 1);
        let entry = config.build.entry.as_ref().unwrap();
        assert_eq!(entry.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.asset_base, "/assets");
        assert_eq!(config.server.asset_root, PathBuf::from("src"));
        assert_eq!(config.proxy.target, "http://localhost:8081");
        assert_eq!(config.proxy.retry_delay_ms, 100);
        assert_eq!(config.reload.delay_ms, 0);
        assert!(config.reload.watch.is_empty());
        assert_eq!(config.build.out_dir, PathBuf::from("dist"));
        assert!(config.build.manifest);
        assert!(config.build.entry.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_single_entry() {
        let config: Config = toml::from_str(
            r#"
[build]
entry = "src/js/main.js"
"#,
        )
        .unwrap();

        let entry = config.build.entry.unwrap();
        assert_eq!(entry, EntryPoints::Single("src/js/main.js".to_string()));
        assert_eq!(
            entry.entries(),
            vec![("src/js/main.js".to_string(), "src/js/main.js".to_string())]
        );
    }

    #[test]
    fn test_named_entries_sorted_by_key() {
        let config: Config = toml::from_str(
            r#"
[build.entry]
"js/main.js" = "src/main.js"
"css/main.css" = "src/main.css"
"#,
        )
        .unwrap();

        let entry = config.build.entry.unwrap();
        let names: Vec<String> = entry.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["css/main.css", "js/main.js"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 0
asset_base = "assets"

[proxy]
target = "ftp://elsewhere"
"#,
        )
        .unwrap();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("server.port"));
        assert!(err.contains("asset_base"));
        assert!(err.contains("proxy.target"));
    }

    #[test]
    fn test_asset_base_trailing_slash_trimmed() {
        let config: Config = toml::from_str(
            r#"
[server]
asset_base = "/static/"
"#,
        )
        .unwrap();

        assert_eq!(config.server.asset_base(), "/static");
        config.validate().unwrap();
    }

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig::default();
        let addr = config.listen_addr().unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_target_uri() {
        let config = ProxyConfig::default();
        let uri = config.target_uri().unwrap();
        assert_eq!(uri.authority().unwrap().as_str(), "localhost:8081");
    }
}

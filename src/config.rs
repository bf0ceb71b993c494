//! Server Configuration
//!
//! Loaded from a redis.conf-style properties file: one `key value` pair per
//! line, split on the first space, `#` starts a comment, booleans spell
//! `yes`, list values are comma separated. The file is located by the
//! `CONFIG` environment variable, falling back to `redis.conf` in the
//! working directory, falling back to built-in defaults.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CONFIG";

/// Fallback config file in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "redis.conf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub append_only: bool,
    pub append_file_name: String,
    pub max_clients: usize,
    pub require_pass: String,
    pub databases: usize,
    pub peers: Vec<String>,
    pub self_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            append_only: false,
            append_file_name: String::new(),
            max_clients: 0,
            require_pass: String::new(),
            databases: 16,
            peers: Vec::new(),
            self_addr: String::new(),
        }
    }
}

impl ServerConfig {
    /// `bind:port`, ready for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Resolves the configuration the way the binary does: `CONFIG` env
    /// var, then `redis.conf`, then defaults.
    pub fn resolve() -> Self {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => match Self::from_file(&path) {
                Ok(config) => {
                    info!(path = %path, "loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to load config, using defaults");
                    Self::default()
                }
            },
            _ => {
                if Path::new(DEFAULT_CONFIG_FILE).is_file() {
                    match Self::from_file(DEFAULT_CONFIG_FILE) {
                        Ok(config) => {
                            info!(path = DEFAULT_CONFIG_FILE, "loaded configuration");
                            return config;
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to load redis.conf, using defaults");
                        }
                    }
                }
                Self::default()
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::parse(File::open(path)?)
    }

    /// Parses the properties format on top of the built-in defaults.
    pub fn parse(source: impl Read) -> io::Result<Self> {
        let mut config = Self::default();
        for line in BufReader::new(source).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "bind" => config.bind = value.to_string(),
                "port" => match value.parse() {
                    Ok(port) => config.port = port,
                    Err(_) => warn!(value, "ignoring invalid port"),
                },
                "appendonly" => config.append_only = value == "yes",
                "appendfilename" => config.append_file_name = value.to_string(),
                "maxclients" => match value.parse() {
                    Ok(n) => config.max_clients = n,
                    Err(_) => warn!(value, "ignoring invalid maxclients"),
                },
                "requirepass" => config.require_pass = value.to_string(),
                "databases" => match value.parse() {
                    Ok(n) if n > 0 => config.databases = n,
                    _ => warn!(value, "ignoring invalid databases"),
                },
                "peers" => {
                    config.peers = value.split(',').map(|s| s.trim().to_string()).collect();
                }
                "self" => config.self_addr = value.to_string(),
                other => warn!(key = other, "ignoring unknown config key"),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:6379");
        assert_eq!(config.databases, 16);
        assert!(!config.append_only);
        assert!(config.require_pass.is_empty());
    }

    #[test]
    fn parses_properties_file() {
        let text = "\
# example configuration
bind 0.0.0.0
port 6399
appendOnly yes
appendFilename aof.log
maxclients 1000
requirepass sesame
databases 4
peers a:6379, b:6379
self a:6379
";
        let config = ServerConfig::parse(text.as_bytes()).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6399);
        assert!(config.append_only);
        assert_eq!(config.append_file_name, "aof.log");
        assert_eq!(config.max_clients, 1000);
        assert_eq!(config.require_pass, "sesame");
        assert_eq!(config.databases, 4);
        assert_eq!(config.peers, vec!["a:6379".to_string(), "b:6379".to_string()]);
        assert_eq!(config.self_addr, "a:6379");
    }

    #[test]
    fn comments_blank_lines_and_bad_values_are_skipped() {
        let text = "\
# comment
bind 10.0.0.1

port notanumber
databases 0
appendOnly no
bogus whatever
";
        let config = ServerConfig::parse(text.as_bytes()).unwrap();
        assert_eq!(config.bind, "10.0.0.1");
        // invalid values keep the defaults
        assert_eq!(config.port, 6379);
        assert_eq!(config.databases, 16);
        assert!(!config.append_only);
    }

    #[test]
    fn value_split_is_on_the_first_space() {
        let config =
            ServerConfig::parse("requirepass pass with spaces\n".as_bytes()).unwrap();
        assert_eq!(config.require_pass, "pass with spaces");
    }
}

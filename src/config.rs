use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("both INNKEEP_TLS_CERT and INNKEEP_TLS_KEY must be set, or neither")]
    PartialTls,
    #[error("TLS: {0}")]
    Tls(String),
    #[error("TLS: {0}")]
    TlsIo(#[from] io::Error),
    #[error("invalid log filter {value:?}: {source}")]
    LogFilter {
        value: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("tracing subscriber: {0}")]
    Subscriber(String),
}

/// Server settings, read from `INNKEEP_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    /// How long a `status = 'pending'` booking is held without an explicit
    /// `hold_until`.
    pub pending_ttl: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "innkeep".into(),
            max_connections: 256,
            compact_threshold: 1000,
            pending_ttl: Duration::from_secs(15 * 60),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            log_level: "info".into(),
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("INNKEEP_PORT") {
            config.port = parse("INNKEEP_PORT", v)?;
        }
        if let Some(v) = lookup("INNKEEP_BIND") {
            config.bind = v;
        }
        if let Some(v) = lookup("INNKEEP_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("INNKEEP_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = lookup("INNKEEP_MAX_CONNECTIONS") {
            config.max_connections = parse("INNKEEP_MAX_CONNECTIONS", v)?;
            if config.max_connections == 0 {
                return Err(ConfigError::Invalid {
                    var: "INNKEEP_MAX_CONNECTIONS",
                    value: "0".into(),
                });
            }
        }
        if let Some(v) = lookup("INNKEEP_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("INNKEEP_COMPACT_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("INNKEEP_PENDING_TTL_SECS") {
            let secs: u64 = parse("INNKEEP_PENDING_TTL_SECS", v.clone())?;
            if secs == 0 || secs > crate::limits::MAX_PENDING_TTL_SECS {
                return Err(ConfigError::Invalid {
                    var: "INNKEEP_PENDING_TTL_SECS",
                    value: v,
                });
            }
            config.pending_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("INNKEEP_METRICS_PORT") {
            config.metrics_port = Some(parse("INNKEEP_METRICS_PORT", v)?);
        }
        config.tls_cert = lookup("INNKEEP_TLS_CERT").map(PathBuf::from);
        config.tls_key = lookup("INNKEEP_TLS_KEY").map(PathBuf::from);
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        if let Some(v) = lookup("INNKEEP_LOG") {
            config.log_level = v;
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// TLS acceptor when both cert and key are configured.
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| ConfigError::Tls("no private key found in key file".into()))?;

        let mut server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConfigError::Tls(e.to_string()))?;
        server.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(server))))
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &Config) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| ConfigError::LogFilter {
            value: config.log_level.clone(),
            source,
        })?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| ConfigError::Subscriber(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:5433");
        assert!(config.tls_acceptor().unwrap().is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("INNKEEP_PORT", "6543"),
            ("INNKEEP_BIND", "127.0.0.1"),
            ("INNKEEP_DATA_DIR", "/var/lib/innkeep"),
            ("INNKEEP_MAX_CONNECTIONS", "8"),
            ("INNKEEP_COMPACT_THRESHOLD", "50"),
            ("INNKEEP_PENDING_TTL_SECS", "120"),
            ("INNKEEP_METRICS_PORT", "9100"),
            ("INNKEEP_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.addr(), "127.0.0.1:6543");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/innkeep"));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.pending_ttl, Duration::from_secs(120));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Config::from_lookup(lookup(&[("INNKEEP_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "INNKEEP_PORT", .. }));

        let err = Config::from_lookup(lookup(&[("INNKEEP_MAX_CONNECTIONS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = Config::from_lookup(lookup(&[("INNKEEP_PENDING_TTL_SECS", "18446744073709551615")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "INNKEEP_PENDING_TTL_SECS", .. }));
    }

    #[test]
    fn tls_needs_both_files() {
        let err = Config::from_lookup(lookup(&[("INNKEEP_TLS_CERT", "cert.pem")])).unwrap_err();
        assert!(matches!(err, ConfigError::PartialTls));
    }

    #[test]
    fn missing_tls_file_is_an_error() {
        let config = Config::from_lookup(lookup(&[
            ("INNKEEP_TLS_CERT", "/nonexistent/innkeep-cert.pem"),
            ("INNKEEP_TLS_KEY", "/nonexistent/innkeep-key.pem"),
        ]))
        .unwrap();
        assert!(matches!(config.tls_acceptor(), Err(ConfigError::TlsIo(_))));
    }
}

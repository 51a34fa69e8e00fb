use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use thiserror::Error;
use url::Url;

/// Process-wide settings. Resolved once at startup from the command line, the environment and an optional
/// `.env` file, then handed to the router and the search client. Nothing mutates it afterwards.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "spideriment-web",
    version,
    about = "Web frontend that relays search queries to a Spideriment search server"
)]
pub struct Config {
    /// Address the HTTP listener binds to
    #[arg(long, env = "SPIDERIMENT_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Base URL of a search server speaking the JSON-over-HTTP query API
    #[arg(long, env = "SPIDERIMENT_BACKEND_URL")]
    pub backend_url: Option<Url>,

    /// Unix socket of a search server speaking MsgESS
    #[arg(long, env = "SPIDERIMENT_BACKEND_SOCKET")]
    pub backend_socket: Option<PathBuf>,

    /// Upper bound for one whole backend exchange, in milliseconds
    #[arg(long, env = "SPIDERIMENT_TIMEOUT_MS", default_value_t = 3000)]
    pub timeout_ms: u64,

    /// Upper bound for establishing the backend connection, in milliseconds
    #[arg(long, env = "SPIDERIMENT_CONNECT_TIMEOUT_MS", default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Results per page when the request does not ask for a specific count
    #[arg(long, env = "SPIDERIMENT_DEFAULT_PAGE_SIZE", default_value_t = 10)]
    pub default_page_size: usize,

    /// Largest page size a request may ask for; bigger requests are clamped
    #[arg(long, env = "SPIDERIMENT_MAX_PAGE_SIZE", default_value_t = 100)]
    pub max_page_size: usize,

    /// Queries longer than this many characters are truncated
    #[arg(long, env = "SPIDERIMENT_MAX_QUERY_LENGTH", default_value_t = 256)]
    pub max_query_length: usize,

    /// Directory served under /static
    #[arg(long, env = "SPIDERIMENT_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Result titles are cut to this many characters for display
    #[arg(long, env = "SPIDERIMENT_MAX_TITLE_LENGTH", default_value_t = 100)]
    pub max_title_length: usize,

    /// Result snippets are cut to this many characters for display
    #[arg(long, env = "SPIDERIMENT_MAX_SNIPPET_LENGTH", default_value_t = 300)]
    pub max_snippet_length: usize,

    /// Ask the search server for quotient-based scoring unless the request says otherwise
    #[arg(long, env = "SPIDERIMENT_QUOTIENT_SCORING")]
    pub quotient_scoring: bool,

    #[arg(long, env = "SPIDERIMENT_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no search server configured, pass --backend-url or --backend-socket")]
    MissingBackend,

    #[error("--backend-url and --backend-socket are mutually exclusive")]
    ConflictingBackends,

    #[error("backend URL must use http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("Unix socket backends are not supported on this platform")]
    UnixSocketUnsupported,

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("default page size {default} exceeds max page size {max}")]
    PageSizeOutOfRange { default: usize, max: usize },
}

/// Where the search server lives and which wire protocol it speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    Http(Url),
    Unix(PathBuf),
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendTarget::Http(url) => write!(f, "http backend at {url}"),
            BackendTarget::Unix(path) => write!(f, "msgess backend at {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Config {
    /// Load `.env` if present, parse the command line and validate the result.
    /// Parse errors and `--help` exit the process through clap.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend()?;

        for (name, value) in [
            ("timeout", self.timeout_ms),
            ("connect timeout", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }

        for (name, value) in [
            ("default page size", self.default_page_size),
            ("max query length", self.max_query_length),
            ("max title length", self.max_title_length),
            ("max snippet length", self.max_snippet_length),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }

        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::PageSizeOutOfRange {
                default: self.default_page_size,
                max: self.max_page_size,
            });
        }

        Ok(())
    }

    pub fn backend(&self) -> Result<BackendTarget, ConfigError> {
        match (&self.backend_url, &self.backend_socket) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingBackends),
            (None, None) => Err(ConfigError::MissingBackend),
            (Some(url), None) => match url.scheme() {
                "http" | "https" => Ok(BackendTarget::Http(url.clone())),
                other => Err(ConfigError::UnsupportedScheme(other.to_string())),
            },
            (None, Some(path)) => {
                if cfg!(unix) {
                    Ok(BackendTarget::Unix(path.clone()))
                } else {
                    Err(ConfigError::UnixSocketUnsupported)
                }
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["spideriment-web"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--backend-url", "http://127.0.0.1:8000"]);
        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(!config.quotient_scoring);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_backend() {
        let config = parse(&["--backend-url", "https://search.example.org/api"]);
        match config.backend().unwrap() {
            BackendTarget::Http(url) => assert_eq!(url.host_str(), Some("search.example.org")),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn test_missing_backend() {
        let config = parse(&[]);
        assert_eq!(config.validate(), Err(ConfigError::MissingBackend));
    }

    #[test]
    fn test_conflicting_backends() {
        let config = parse(&[
            "--backend-url",
            "http://localhost:8000",
            "--backend-socket",
            "/tmp/search.sock",
        ]);
        assert_eq!(config.validate(), Err(ConfigError::ConflictingBackends));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let config = parse(&["--backend-url", "ftp://localhost/"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme("ftp".to_string()))
        );
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = parse(&["--backend-url", "http://localhost", "--timeout-ms", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::Zero { name: "timeout" }));
    }

    #[test]
    fn test_large_timeouts_are_not_zero() {
        let config = parse(&[
            "--backend-url",
            "http://localhost:8000",
            "--timeout-ms",
            "4294967296",
            "--connect-timeout-ms",
            "8589934592",
        ]);
        assert!(config.validate().is_ok());

        let config = parse(&[
            "--backend-url",
            "http://localhost:8000",
            "--connect-timeout-ms",
            "0",
        ]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                name: "connect timeout"
            })
        );
    }

    #[test]
    fn test_default_page_size_above_max() {
        let config = parse(&[
            "--backend-url",
            "http://localhost",
            "--default-page-size",
            "50",
            "--max-page-size",
            "20",
        ]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::PageSizeOutOfRange {
                default: 50,
                max: 20
            })
        );
    }

    #[test]
    fn test_log_level_maps_to_tracing() {
        let config = parse(&["--backend-url", "http://localhost", "--log-level", "debug"]);
        assert_eq!(tracing::Level::from(config.log_level), tracing::Level::DEBUG);
    }
}

use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("production") || s.eq_ignore_ascii_case("prod") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    /// Internal error details may be shown to clients.
    pub fn exposes_error_details(&self) -> bool {
        *self != Environment::Production
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub environment: Environment,
    /// Seed the default fleet when the store starts empty.
    pub seed_fleet: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }
        Self {
            bind: lookup("RENTAL_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "RENTAL_PORT").unwrap_or(8080),
            data_dir: PathBuf::from(lookup("RENTAL_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: parsed(&lookup, "RENTAL_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "RENTAL_COMPACT_THRESHOLD").unwrap_or(1000),
            environment: lookup("RENTAL_ENVIRONMENT")
                .map(|s| Environment::parse(&s))
                .unwrap_or(Environment::Production),
            seed_fleet: parsed(&lookup, "RENTAL_SEED_FLEET").unwrap_or(true),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleet.wal")
    }
}

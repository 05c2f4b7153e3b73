//! Run configuration.
//!
//! Layered with figment: built-in defaults, an optional TOML file,
//! `HARVEST_*` environment variables, then command-line overrides.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::crawl::listing::directory_url;
use crate::crawl::CrawlSettings;
use crate::harvest::formats::{ApkParser, DebParser, RpmParser};
use crate::harvest::{Classifier, ParserRegistry};
use crate::traits::PackageParser;

pub const ENV_PREFIX: &str = "HARVEST_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    MissingFile(PathBuf),

    #[error("Invalid configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid mirror root '{root}': {source}")]
    InvalidRoot {
        root: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Distribution family to crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Alpine,
    Debian,
    Ubuntu,
    Centos,
}

impl PackageType {
    pub const ALL: [PackageType; 4] = [
        PackageType::Alpine,
        PackageType::Debian,
        PackageType::Ubuntu,
        PackageType::Centos,
    ];

    pub fn default_root(self) -> &'static str {
        match self {
            PackageType::Alpine => "https://mirrors.ustc.edu.cn/alpine/",
            PackageType::Debian => "https://mirrors.ustc.edu.cn/debian/pool/",
            PackageType::Ubuntu => "https://mirrors.ustc.edu.cn/ubuntu/pool/",
            PackageType::Centos => "https://mirrors.ustc.edu.cn/centos/",
        }
    }

    pub fn parser(self, classifier: Classifier) -> Arc<dyn PackageParser> {
        match self {
            PackageType::Alpine => Arc::new(ApkParser::new(classifier)),
            PackageType::Debian | PackageType::Ubuntu => Arc::new(DebParser::new(classifier)),
            PackageType::Centos => Arc::new(RpmParser::new(classifier)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mirror roots. Empty means the default root of every package type.
    pub roots: Vec<String>,
    pub package_types: Vec<PackageType>,
    /// Concurrent downloads/extractions.
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub history_path: PathBuf,
    pub error_log_path: PathBuf,
    /// NDJSON file receiving index documents; disabled when unset.
    pub index_path: Option<PathBuf>,
    pub index_batch_size: usize,
    pub max_depth: usize,
    pub delay_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub stage_timeout_secs: u64,
    /// License matches below this percentage are ignored.
    pub min_license_confidence: f64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let crawl = CrawlSettings::default();
        Self {
            roots: Vec::new(),
            package_types: PackageType::ALL.to_vec(),
            concurrency: 8,
            output_dir: PathBuf::from("output"),
            history_path: PathBuf::from("state/history.log"),
            error_log_path: PathBuf::from("state/errors.log"),
            index_path: None,
            index_batch_size: 500,
            max_depth: crawl.max_depth,
            delay_ms: crawl.delay.as_millis() as u64,
            jitter_ms: crawl.jitter.as_millis() as u64,
            max_attempts: crawl.max_attempts,
            request_timeout_secs: crawl.request_timeout.as_secs(),
            stage_timeout_secs: 300,
            min_license_confidence: 0.0,
            user_agent: crawl.user_agent,
        }
    }
}

impl Config {
    /// Provider stack without command-line overrides.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Loads and validates the configuration. `overrides` is merged last;
    /// only the fields it serializes take effect.
    pub fn load<T: Serialize>(file: Option<&Path>, overrides: T) -> Result<Self, ConfigError> {
        if let Some(file) = file {
            if !file.is_file() {
                return Err(ConfigError::MissingFile(file.to_path_buf()));
            }
        }
        let config: Config = Self::figment(file)
            .merge(Serialized::defaults(overrides))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.package_types.is_empty() {
            return Err(ConfigError::Invalid("no package types selected".to_string()));
        }
        if !(0.0..=100.0).contains(&self.min_license_confidence) {
            return Err(ConfigError::Invalid(format!(
                "min_license_confidence must be within 0..=100, got {}",
                self.min_license_confidence
            )));
        }
        Ok(())
    }

    /// Parsers for the selected package types. Debian and Ubuntu share one.
    pub fn registry(&self) -> ParserRegistry {
        let classifier = Classifier::new(self.min_license_confidence);
        let mut registry = ParserRegistry::new();
        for package_type in &self.package_types {
            registry.register(package_type.parser(classifier.clone()));
        }
        registry
    }

    /// Roots to crawl, as directory URLs.
    pub fn crawl_roots(&self) -> Result<Vec<Url>, ConfigError> {
        let roots: Vec<String> = if self.roots.is_empty() {
            self.package_types
                .iter()
                .map(|t| t.default_root().to_string())
                .collect()
        } else {
            self.roots.clone()
        };

        roots
            .into_iter()
            .map(|root| match Url::parse(&root) {
                Ok(url) => Ok(directory_url(url)),
                Err(source) => Err(ConfigError::InvalidRoot { root, source }),
            })
            .collect()
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            max_depth: self.max_depth,
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

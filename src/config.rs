//! File configuration for engine defaults.
//!
//! Configuration lives in a TOML file at an explicit `--config` path or at
//! `$XDG_CONFIG_HOME/paperfetch/config.toml` (falling back to
//! `$HOME/.config/paperfetch/config.toml`). Every key is optional; missing
//! keys keep the built-in defaults. Unknown keys are rejected.
//!
//! ```toml
//! output_dir = "papers"
//! workers = 8
//! mailto = "me@example.org"
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 500
//!
//! [sources.europepmc]
//! priority = 5
//! min_interval_ms = 250
//! ```

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::acquire::{
    AcquireError, ArtifactValidator, ChainSettings, ConcurrencyConfig, DEFAULT_IDENTIFIER_DEADLINE,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_ARTIFACT_BYTES, DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS,
    RetryPolicy,
};
use crate::classify::{AccessClassifier, CrossrefLookup};
use crate::source::{
    BrowserOptions, DEFAULT_MAX_ARTIFACT_BYTES, HttpTimeouts, SourceOptions, SourceOverride,
};

const CONFIG_DIR_NAME: &str = "paperfetch";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Source names that accept a `[sources.<name>]` table.
pub const KNOWN_SOURCES: &[&str] = &["pmc", "europepmc", "browser", "mirror"];

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.2;
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TOTAL_TIMEOUT_SECS: u64 = 180;
const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_RETRY_ATTEMPTS: u32 = 10;
const MAX_DELAY_CEILING_MS: u64 = 600_000;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The config path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An explicitly requested config file does not exist.
    #[error("config file '{path}' does not exist")]
    Missing {
        /// The requested path.
        path: PathBuf,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// The config path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Dotted key path, e.g. `retry.jitter`.
        field: String,
        /// What is wrong and what is expected.
        message: String,
    },

    /// Building an engine component from the configuration failed.
    #[error(transparent)]
    Acquire(#[from] AcquireError),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// `[retry]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts per source, including the first.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure.
    pub base_delay_ms: Option<u64>,
    /// Backoff growth factor.
    pub multiplier: Option<f64>,
    /// Relative jitter applied to each delay.
    pub jitter: Option<f64>,
    /// Upper bound on a single delay.
    pub max_delay_ms: Option<u64>,
    /// Timeout for one attempt.
    pub attempt_timeout_secs: Option<u64>,
    /// Ceiling on time spent on one source.
    pub total_timeout_secs: Option<u64>,
}

/// `[sources.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Enable or disable the source.
    pub enabled: Option<bool>,
    /// Lower is tried earlier.
    pub priority: Option<i32>,
    /// Simultaneous requests to the source's host.
    pub max_concurrent: Option<usize>,
    /// Minimum spacing between requests to the source's host.
    pub min_interval_ms: Option<u64>,
    /// Attempt budget for this source only.
    pub max_attempts: Option<u32>,
}

impl From<&SourceConfig> for SourceOverride {
    fn from(config: &SourceConfig) -> Self {
        Self {
            enabled: config.enabled,
            priority: config.priority,
            max_concurrent: config.max_concurrent,
            min_interval: config.min_interval_ms.map(Duration::from_millis),
            max_attempts: config.max_attempts,
        }
    }
}

/// TOML-backed configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Directory artifacts are written to.
    pub output_dir: Option<PathBuf>,
    /// Identifiers processed concurrently.
    pub workers: Option<usize>,
    /// Wall-clock budget for one identifier.
    pub deadline_secs: Option<u64>,
    /// HTTP connect timeout.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP whole-request timeout.
    pub read_timeout_secs: Option<u64>,
    /// Contact address for polite API use.
    pub mailto: Option<String>,
    /// Smallest accepted artifact.
    pub min_pdf_bytes: Option<u64>,
    /// Largest accepted artifact.
    pub max_pdf_bytes: Option<u64>,
    /// Require the `%%EOF` trailer in addition to the signature.
    pub structural_check: Option<bool>,
    /// Reuse already stored artifacts.
    pub skip_existing: Option<bool>,
    /// Query the access classifier before ordering sources.
    pub classify: Option<bool>,
    /// Relay mirror base URLs.
    pub mirrors: Option<Vec<String>>,
    /// Enable the browser-automation source.
    pub browser: Option<bool>,
    /// Chrome/Chromium binary for the browser source.
    pub chrome_executable: Option<PathBuf>,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Per-source overrides.
    pub sources: BTreeMap<String, SourceConfig>,
}

impl FileConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for syntax errors and unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(workers) = self.workers
            && !(MIN_WORKERS..=MAX_WORKERS).contains(&workers)
        {
            return Err(ConfigError::invalid(
                "workers",
                format!("{workers}. Expected range: {MIN_WORKERS}..={MAX_WORKERS}"),
            ));
        }

        validate_timeout_secs("deadline_secs", self.deadline_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        validate_timeout_secs("retry.attempt_timeout_secs", self.retry.attempt_timeout_secs)?;
        validate_timeout_secs("retry.total_timeout_secs", self.retry.total_timeout_secs)?;

        if let Some(max_attempts) = self.retry.max_attempts {
            validate_attempts("retry.max_attempts", max_attempts)?;
        }
        if let Some(multiplier) = self.retry.multiplier
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            return Err(ConfigError::invalid(
                "retry.multiplier",
                format!("{multiplier}. Expected a value >= 1.0"),
            ));
        }
        if let Some(jitter) = self.retry.jitter
            && !(0.0..=1.0).contains(&jitter)
        {
            return Err(ConfigError::invalid(
                "retry.jitter",
                format!("{jitter}. Expected range: 0.0..=1.0"),
            ));
        }
        for (field, value) in [
            ("retry.base_delay_ms", self.retry.base_delay_ms),
            ("retry.max_delay_ms", self.retry.max_delay_ms),
        ] {
            if let Some(value) = value
                && value > MAX_DELAY_CEILING_MS
            {
                return Err(ConfigError::invalid(
                    field,
                    format!("{value}. Expected range: 0..={MAX_DELAY_CEILING_MS}"),
                ));
            }
        }

        let min_bytes = self.min_pdf_bytes.unwrap_or(DEFAULT_MIN_ARTIFACT_BYTES);
        let max_bytes = self.max_pdf_bytes.unwrap_or(DEFAULT_MAX_ARTIFACT_BYTES);
        if max_bytes == 0 || min_bytes > max_bytes {
            return Err(ConfigError::invalid(
                "min_pdf_bytes",
                format!("{min_bytes} must not exceed max_pdf_bytes ({max_bytes})"),
            ));
        }

        if let Some(mailto) = &self.mailto
            && !mailto.contains('@')
        {
            return Err(ConfigError::invalid(
                "mailto",
                format!("'{mailto}' is not an email address"),
            ));
        }

        for mirror in self.mirrors.iter().flatten() {
            let valid = Url::parse(mirror.trim())
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host());
            if !valid {
                return Err(ConfigError::invalid(
                    "mirrors",
                    format!("'{mirror}' is not an http(s) URL"),
                ));
            }
        }

        for (name, source) in &self.sources {
            if !KNOWN_SOURCES.contains(&name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("sources.{name}"),
                    format!("unknown source. Expected one of: {}", KNOWN_SOURCES.join(", ")),
                ));
            }
            if source.max_concurrent == Some(0) {
                return Err(ConfigError::invalid(
                    format!("sources.{name}.max_concurrent"),
                    "0. Expected a value >= 1",
                ));
            }
            if let Some(max_attempts) = source.max_attempts {
                validate_attempts(&format!("sources.{name}.max_attempts"), max_attempts)?;
            }
        }

        Ok(())
    }

    /// HTTP timeouts for source clients and the classifier.
    #[must_use]
    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(
                self.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            read: Duration::from_secs(self.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS)),
        }
    }

    /// Retry policy from the `[retry]` table.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.retry;
        RetryPolicy::new(
            retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            Duration::from_millis(retry.base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS)),
            Duration::from_millis(retry.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS)),
            retry.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
            retry.jitter.unwrap_or(DEFAULT_JITTER),
        )
        .with_timeouts(
            Duration::from_secs(
                retry
                    .attempt_timeout_secs
                    .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            ),
            Duration::from_secs(retry.total_timeout_secs.unwrap_or(DEFAULT_TOTAL_TIMEOUT_SECS)),
        )
    }

    /// Per-identifier chain settings.
    #[must_use]
    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            policy: self.retry_policy(),
            validator: ArtifactValidator::new(
                self.min_pdf_bytes.unwrap_or(DEFAULT_MIN_ARTIFACT_BYTES),
                self.max_pdf_bytes.unwrap_or(DEFAULT_MAX_ARTIFACT_BYTES),
                self.structural_check.unwrap_or(true),
            ),
            deadline: self
                .deadline_secs
                .map_or(DEFAULT_IDENTIFIER_DEADLINE, Duration::from_secs),
            skip_existing: self.skip_existing.unwrap_or(false),
        }
    }

    /// Construction options for the built-in sources.
    #[must_use]
    pub fn source_options(&self) -> SourceOptions {
        let browser = self.browser.unwrap_or(false).then(|| BrowserOptions {
            chrome_executable: self.chrome_executable.clone(),
            ..BrowserOptions::default()
        });
        let overrides: HashMap<String, SourceOverride> = self
            .sources
            .iter()
            .map(|(name, config)| (name.clone(), SourceOverride::from(config)))
            .collect();

        SourceOptions {
            timeouts: self.http_timeouts(),
            max_artifact_bytes: self.max_pdf_bytes.unwrap_or(DEFAULT_MAX_ARTIFACT_BYTES),
            mailto: self.mailto.clone(),
            mirrors: self.mirrors.clone().unwrap_or_default(),
            browser,
            overrides,
        }
    }

    /// Worker-pool configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Acquire`] when `workers` is out of range.
    pub fn concurrency(&self) -> Result<ConcurrencyConfig, ConfigError> {
        Ok(ConcurrencyConfig::new(self.workers.unwrap_or(DEFAULT_WORKERS))?)
    }

    /// Access classifier backed by Crossref, or a disabled one when
    /// `classify = false`.
    ///
    /// A classifier that cannot be constructed degrades to disabled, since
    /// classification only ever reorders sources.
    #[must_use]
    pub fn classifier(&self) -> AccessClassifier {
        if !self.classify.unwrap_or(true) {
            return AccessClassifier::disabled();
        }
        match CrossrefLookup::new(self.mailto.clone(), self.http_timeouts()) {
            Ok(lookup) => AccessClassifier::new(Arc::new(lookup)),
            Err(error) => {
                tracing::warn!(error = %error, "Crossref lookup unavailable; classification disabled");
                AccessClassifier::disabled()
            }
        }
    }

    /// Output directory, defaulting to the working directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value}. Expected range: 1..={MAX_TIMEOUT_SECS}"),
        ));
    }
    Ok(())
}

fn validate_attempts(field: &str, value: u32) -> Result<(), ConfigError> {
    if !(1..=MAX_RETRY_ATTEMPTS).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value}. Expected range: 1..={MAX_RETRY_ATTEMPTS}"),
        ));
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path that was consulted, if one could be determined.
    pub path: Option<PathBuf>,
    /// Parsed configuration; defaults when no file was loaded.
    pub config: FileConfig,
    /// Whether a file was actually read.
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/paperfetch/config.toml`
/// 2. `$HOME/.config/paperfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads configuration from `explicit` or, when `None`, the default path.
///
/// A missing default file yields defaults; a missing explicit file is an error.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: load_file_config(path)?,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref().filter(|p| p.exists()) else {
        debug!(path = ?path, "no config file; using defaults");
        return Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        });
    };

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config,
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = FileConfig::from_toml_str(&raw, path)?;
    debug!(path = %path.display(), "config file loaded");
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::AccessTier;

    fn parse(raw: &str) -> Result<FileConfig, ConfigError> {
        FileConfig::from_toml_str(raw, Path::new("test.toml"))
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse(
            r#"
workers = 8
mailto = "me@example.org"
"#,
        )
        .unwrap();
        assert_eq!(cfg.workers, Some(8));
        assert_eq!(cfg.mailto.as_deref(), Some("me@example.org"));
        assert!(cfg.output_dir.is_none());
        assert_eq!(cfg.retry, RetryConfig::default());
    }

    #[test]
    fn test_parse_config_full_tables() {
        let cfg = parse(
            r#"
output_dir = "/tmp/papers"
skip_existing = true
mirrors = ["https://mirror.test"]

[retry]
max_attempts = 5
base_delay_ms = 250
multiplier = 3.0
jitter = 0.0

[sources.europepmc]
priority = 1
max_concurrent = 4
min_interval_ms = 100

[sources.mirror]
enabled = false
"#,
        )
        .unwrap();
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/tmp/papers")));
        assert_eq!(cfg.retry.max_attempts, Some(5));
        assert_eq!(cfg.sources["europepmc"].priority, Some(1));
        assert_eq!(cfg.sources["mirror"].enabled, Some(false));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse("unknown_key = 123").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("unknown_key"));

        let err = parse("[retry]\nbackoff = 2").unwrap_err();
        assert!(err.to_string().contains("backoff"));
    }

    #[test]
    fn test_parse_config_rejects_wrong_types() {
        let err = parse("workers = \"four\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_validate_rejects_invalid_workers() {
        let err = parse("workers = 0").unwrap_err();
        assert!(err.to_string().contains("workers"));
        let err = parse("workers = 65").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_validate_rejects_invalid_timeouts() {
        let err = parse("connect_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("connect_timeout_secs"));
        let err = parse("[retry]\nattempt_timeout_secs = 3601").unwrap_err();
        assert!(err.to_string().contains("retry.attempt_timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        assert!(parse("[retry]\njitter = 1.5").unwrap_err().to_string().contains("retry.jitter"));
        assert!(
            parse("[retry]\nmultiplier = 0.5")
                .unwrap_err()
                .to_string()
                .contains("retry.multiplier")
        );
        assert!(
            parse("[retry]\nmax_attempts = 0")
                .unwrap_err()
                .to_string()
                .contains("retry.max_attempts")
        );
    }

    #[test]
    fn test_validate_rejects_inverted_size_bounds() {
        let err = parse("min_pdf_bytes = 2048\nmax_pdf_bytes = 1024").unwrap_err();
        assert!(err.to_string().contains("min_pdf_bytes"));
    }

    #[test]
    fn test_validate_rejects_unknown_source_table() {
        let err = parse("[sources.scihub]\nenabled = true").unwrap_err();
        assert!(err.to_string().contains("sources.scihub"));
    }

    #[test]
    fn test_validate_rejects_zero_source_concurrency() {
        let err = parse("[sources.pmc]\nmax_concurrent = 0").unwrap_err();
        assert!(err.to_string().contains("sources.pmc.max_concurrent"));
    }

    #[test]
    fn test_validate_rejects_non_http_mirror() {
        let err = parse(r#"mirrors = ["ftp://mirror.test"]"#).unwrap_err();
        assert!(err.to_string().contains("mirrors"));
    }

    #[test]
    fn test_validate_rejects_mailto_without_at() {
        let err = parse(r#"mailto = "nobody""#).unwrap_err();
        assert!(err.to_string().contains("mailto"));
    }

    // ==================== Conversion Tests ====================

    #[test]
    fn test_defaults_match_engine_defaults() {
        let cfg = FileConfig::default();
        let settings = cfg.chain_settings();
        assert_eq!(settings.policy, RetryPolicy::default());
        assert_eq!(settings.validator, ArtifactValidator::default());
        assert_eq!(settings.deadline, DEFAULT_IDENTIFIER_DEADLINE);
        assert!(!settings.skip_existing);
        assert_eq!(cfg.concurrency().unwrap().workers(), DEFAULT_WORKERS);
        assert_eq!(cfg.http_timeouts(), HttpTimeouts::default());
        assert_eq!(cfg.output_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_retry_table_flows_into_policy() {
        let cfg = parse("[retry]\nmax_attempts = 6\nattempt_timeout_secs = 5").unwrap();
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.attempt_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_source_options_carry_overrides_and_browser() {
        let cfg = parse(
            r#"
browser = true
chrome_executable = "/usr/bin/chromium"
max_pdf_bytes = 5000000

[sources.pmc]
min_interval_ms = 50
max_attempts = 1
"#,
        )
        .unwrap();
        let options = cfg.source_options();
        assert_eq!(options.max_artifact_bytes, 5_000_000);
        let browser = options.browser.unwrap();
        assert_eq!(
            browser.chrome_executable,
            Some(PathBuf::from("/usr/bin/chromium"))
        );
        let pmc = &options.overrides["pmc"];
        assert_eq!(pmc.min_interval, Some(Duration::from_millis(50)));
        assert_eq!(pmc.max_attempts, Some(1));
    }

    #[test]
    fn test_source_override_applies_to_descriptor() {
        let cfg = parse("[sources.mirror]\npriority = 1\nenabled = false").unwrap();
        let overrides = SourceOverride::from(&cfg.sources["mirror"]);
        let descriptor = crate::source::MirrorSource::default_descriptor().apply(&overrides);
        assert_eq!(descriptor.priority, 1);
        assert!(!descriptor.enabled);
        assert_eq!(descriptor.tier, AccessTier::Restricted);
    }

    #[test]
    fn test_classify_false_disables_classifier() {
        let cfg = parse("classify = false").unwrap();
        let debug = format!("{:?}", cfg.classifier());
        assert!(debug.contains("lookup: None"));
    }

    // ==================== Loading Tests ====================

    #[test]
    fn test_load_config_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_load_config_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "workers = 2\n").unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.config.workers, Some(2));
    }

    #[test]
    fn test_load_config_default_path_from_xdg() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR_NAME);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE_NAME), "skip_existing = true\n").unwrap();

        let prev = env::var_os("XDG_CONFIG_HOME");
        // SAFETY: test-only env mutation, restored by the guard below.
        unsafe { env::set_var("XDG_CONFIG_HOME", dir.path()) };
        let _restore = RestoreEnv::new("XDG_CONFIG_HOME", prev);

        let loaded = load_config(None).unwrap();
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.config.skip_existing, Some(true));
        assert_eq!(
            loaded.path,
            Some(config_dir.join(CONFIG_FILE_NAME))
        );
    }

    struct RestoreEnv {
        key: &'static str,
        value: Option<std::ffi::OsString>,
    }
    impl RestoreEnv {
        fn new(key: &'static str, value: Option<std::ffi::OsString>) -> Self {
            Self { key, value }
        }
    }
    impl Drop for RestoreEnv {
        fn drop(&mut self) {
            // SAFETY: test restores env to prior state.
            match &self.value {
                Some(v) => unsafe { env::set_var(self.key, v) },
                None => unsafe { env::remove_var(self.key) },
            }
        }
    }
}

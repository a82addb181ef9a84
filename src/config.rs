use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};
use crate::retry::RetryPolicy;
use crate::storage::content::{Codec, DEFAULT_LEVEL};
use crate::storage::schema::Backend;
use crate::utils::redact::redact_url_credentials;

pub const DEFAULT_URL: &str = "sqlite:///./.tomb/archive.sqlite";
pub const DEFAULT_EVIDENCE_DIR: &str = ".tomb/evidence";
pub const PROJECT_CONFIG: &str = ".tomb/archive.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Fallback actor for restores when `--by` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl Config {
    /// Defaults, then the config file, then the process environment.
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        Self::load_with_env(explicit_path, root, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`] with environment lookups going through `env`.
    pub fn load_with_env<F>(explicit_path: Option<&Path>, root: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| env("TOMB_CONFIG").map(PathBuf::from));

        match explicit {
            Some(path) => {
                let patch = Self::load_patch(&path)?.ok_or_else(|| {
                    ArchiveError::Config(format!("config file {} not found", path.display()))
                })?;
                config.merge_patch(patch);
            }
            None => {
                if let Some(patch) = Self::load_patch(&root.join(PROJECT_CONFIG))? {
                    config.merge_patch(patch);
                }
            }
        }

        config.apply_env_overrides(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| ArchiveError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| ArchiveError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.backend {
            self.backend.merge(patch);
        }
        if let Some(patch) = patch.retry {
            self.retry.merge(patch);
        }
        if let Some(patch) = patch.batch {
            self.batch.merge(patch);
        }
        if let Some(patch) = patch.logging {
            self.logging.merge(patch);
        }
        if let Some(patch) = patch.performance {
            self.performance.merge(patch);
        }
        if let Some(patch) = patch.evidence {
            self.evidence.merge(patch);
        }
        if let Some(patch) = patch.compression {
            self.compression.merge(patch);
        }
        if let Some(actor) = patch.actor {
            self.actor = Some(actor);
        }
    }

    fn apply_env_overrides<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env_string(env, "TOMB_ARCHIVE_BACKEND") {
            self.backend.kind = Some(value);
        }
        if let Some(value) = env_string(env, "TOMB_ARCHIVE_URL") {
            self.backend.url = value;
        }
        if let Some(value) = env_string(env, "TOMB_EVIDENCE_DIR") {
            self.evidence.dir = PathBuf::from(value);
        }

        if let Some(value) = env_bool(env, "TOMB_RETRY_ENABLED") {
            self.retry.enabled = value;
        }
        if let Some(value) = env_parse(env, "TOMB_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = value;
        }
        if let Some(value) = env_parse(env, "TOMB_RETRY_INITIAL_DELAY_MS")? {
            self.retry.initial_delay_ms = value;
        }
        if let Some(value) = env_parse(env, "TOMB_RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay_ms = value;
        }
        if let Some(value) = env_parse(env, "TOMB_RETRY_MULTIPLIER")? {
            self.retry.multiplier = value;
        }
        if let Some(value) = env_parse(env, "TOMB_RETRY_JITTER")? {
            self.retry.jitter = value;
        }
        if let Some(value) = env_parse(env, "TOMB_RETRY_SEED")? {
            self.retry.seed = Some(value);
        }

        if let Some(value) = env_parse(env, "TOMB_BATCH_CONCURRENT")? {
            self.batch.concurrent = value;
        }
        if let Some(value) = env_parse(env, "TOMB_BATCH_PROGRESS_INTERVAL")? {
            self.batch.progress_interval = value;
        }
        if let Some(value) = env_string(env, "TOMB_BATCH_RESULTS_PATH") {
            self.batch.results_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_bool(env, "TOMB_BATCH_CONTINUE_ON_ERROR") {
            self.batch.continue_on_error = value;
        }

        if let Some(value) = env_string(env, "TOMB_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = env_string(env, "TOMB_LOG_FORMAT") {
            self.logging.format = value;
        }
        if let Some(value) = env_string(env, "TOMB_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(value));
        }

        if let Some(value) = env_bool(env, "TOMB_PERF_METRICS") {
            self.performance.enable_metrics = value;
        }
        if let Some(value) = env_bool(env, "TOMB_PERF_DECOMPRESSION") {
            self.performance.track_decompression = value;
        }

        if let Some(value) = env_string(env, "TOMB_COMPRESSION_CODEC") {
            self.compression.codec = value.parse()?;
        }
        if let Some(value) = env_parse(env, "TOMB_COMPRESSION_LEVEL")? {
            self.compression.level = value;
        }

        if let Some(value) = env_string(env, "TOMB_ACTOR") {
            self.actor = Some(value);
        }

        Ok(())
    }

    /// Resolve the backend: the explicit type if set, otherwise the URL scheme.
    pub fn resolve_backend(&self) -> Result<Backend> {
        let from_url = Backend::from_url(&self.backend.url);
        match self.backend.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(kind) => {
                let explicit: Backend = kind.parse()?;
                match from_url {
                    Ok(inferred) if inferred != explicit => Err(ArchiveError::Config(format!(
                        "backend.type is {explicit} but backend.url {} is a {inferred} URL",
                        redact_url_credentials(&self.backend.url)
                    ))),
                    _ => Ok(explicit),
                }
            }
            None => from_url,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.url.trim().is_empty() {
            return Err(ArchiveError::Config("backend.url must not be empty".into()));
        }
        self.resolve_backend()?;
        self.retry.policy().validate()?;
        if self.batch.concurrent == 0 {
            return Err(ArchiveError::Config("batch.concurrent must be >= 1".into()));
        }
        if self.batch.progress_interval == 0 {
            return Err(ArchiveError::Config("batch.progress_interval must be >= 1".into()));
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(ArchiveError::Config(format!(
                    "logging.format must be text or json, got {other}"
                )));
            }
        }
        Ok(())
    }

    /// Copy safe to print: the backend URL has its credentials masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.backend.url = redact_url_credentials(&self.backend.url);
        copy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// `sqlite`, `postgres` or `mariadb`; inferred from `url` when unset.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: None,
            url: DEFAULT_URL.to_string(),
        }
    }
}

impl BackendConfig {
    fn merge(&mut self, patch: BackendPatch) {
        if let Some(value) = patch.kind {
            self.kind = Some(value);
        }
        if let Some(value) = patch.url {
            self.url = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            enabled: false,
            max_attempts: policy.max_attempts,
            initial_delay_ms: u64::try_from(policy.initial_delay.as_millis()).unwrap_or(100),
            max_delay_ms: u64::try_from(policy.max_delay.as_millis()).unwrap_or(5_000),
            multiplier: policy.multiplier,
            jitter: policy.jitter,
            seed: None,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            seed: self.seed,
        }
    }

    fn merge(&mut self, patch: RetryPatch) {
        if let Some(value) = patch.enabled {
            self.enabled = value;
        }
        if let Some(value) = patch.max_attempts {
            self.max_attempts = value;
        }
        if let Some(value) = patch.initial_delay_ms {
            self.initial_delay_ms = value;
        }
        if let Some(value) = patch.max_delay_ms {
            self.max_delay_ms = value;
        }
        if let Some(value) = patch.multiplier {
            self.multiplier = value;
        }
        if let Some(value) = patch.jitter {
            self.jitter = value;
        }
        if let Some(value) = patch.seed {
            self.seed = Some(value);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Recorded in batch results; restores run sequentially.
    pub concurrent: u32,
    pub progress_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_path: Option<PathBuf>,
    pub continue_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrent: 1,
            progress_interval: 10,
            results_path: None,
            continue_on_error: false,
        }
    }
}

impl BatchConfig {
    fn merge(&mut self, patch: BatchPatch) {
        if let Some(value) = patch.concurrent {
            self.concurrent = value;
        }
        if let Some(value) = patch.progress_interval {
            self.progress_interval = value;
        }
        if let Some(value) = patch.results_path {
            self.results_path = Some(value);
        }
        if let Some(value) = patch.continue_on_error {
            self.continue_on_error = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, patch: LoggingPatch) {
        if let Some(value) = patch.level {
            self.level = value;
        }
        if let Some(value) = patch.format {
            self.format = value;
        }
        if let Some(value) = patch.file {
            self.file = Some(value);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub enable_metrics: bool,
    pub track_decompression: bool,
}

impl PerformanceConfig {
    fn merge(&mut self, patch: PerformancePatch) {
        if let Some(value) = patch.enable_metrics {
            self.enable_metrics = value;
        }
        if let Some(value) = patch.track_decompression {
            self.track_decompression = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub dir: PathBuf,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_EVIDENCE_DIR),
        }
    }
}

impl EvidenceConfig {
    fn merge(&mut self, patch: EvidencePatch) {
        if let Some(value) = patch.dir {
            self.dir = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub codec: Codec,
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: Codec::default(),
            level: DEFAULT_LEVEL,
        }
    }
}

impl CompressionConfig {
    fn merge(&mut self, patch: CompressionPatch) {
        if let Some(value) = patch.codec {
            self.codec = value;
        }
        if let Some(value) = patch.level {
            self.level = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub backend: Option<BackendPatch>,
    pub retry: Option<RetryPatch>,
    pub batch: Option<BatchPatch>,
    pub logging: Option<LoggingPatch>,
    pub performance: Option<PerformancePatch>,
    pub evidence: Option<EvidencePatch>,
    pub compression: Option<CompressionPatch>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BackendPatch {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RetryPatch {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BatchPatch {
    pub concurrent: Option<u32>,
    pub progress_interval: Option<u32>,
    pub results_path: Option<PathBuf>,
    pub continue_on_error: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoggingPatch {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PerformancePatch {
    pub enable_metrics: Option<bool>,
    pub track_decompression: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EvidencePatch {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CompressionPatch {
    pub codec: Option<Codec>,
    pub level: Option<i32>,
}

fn env_string<F: Fn(&str) -> Option<String>>(env: &F, key: &str) -> Option<String> {
    env(key).filter(|value| !value.trim().is_empty())
}

fn env_bool<F: Fn(&str) -> Option<String>>(env: &F, key: &str) -> Option<bool> {
    env_string(env, key).map(|value| {
        matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_parse<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match env_string(env, key) {
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|err| {
            ArchiveError::Config(format!("invalid {key} value {value}: {err}"))
        }),
        None => Ok(None),
    }
}

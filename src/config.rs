use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub ledger: LedgerConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub device: Option<DeviceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    /// Parent for private staging directories. System temp dir when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_program")]
    pub program: String,
    #[serde(default = "default_retrieval_args")]
    pub args: Vec<String>,
    #[serde(default = "default_output_flag")]
    pub output_flag: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            program: default_retrieval_program(),
            args: default_retrieval_args(),
            output_flag: default_output_flag(),
        }
    }
}

fn default_retrieval_program() -> String {
    "getWizPnP.pl".to_string()
}
fn default_retrieval_args() -> Vec<String> {
    ["--ts", "--recursive", "-v", "-B"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_output_flag() -> String {
    "--outDir".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscodeConfig {
    #[serde(default = "default_transcode_program")]
    pub program: String,
    #[serde(default = "default_encoder")]
    pub encoder: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            program: default_transcode_program(),
            encoder: default_encoder(),
            extra_args: Vec::new(),
        }
    }
}

fn default_transcode_program() -> String {
    "HandBrakeCLI".to_string()
}
fn default_encoder() -> String {
    "x264".to_string()
}

/// Retry policy for collaborator invocations.
///
/// The staging queue always holds one job, keeping at most one recording
/// staged and one queued on disk; it is not configurable.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl PipelineConfig {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped at 32x.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(5);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.program.trim().is_empty() {
        anyhow::bail!("retrieval.program must not be empty");
    }

    if config.transcode.program.trim().is_empty() {
        anyhow::bail!("transcode.program must not be empty");
    }

    if let Some(device) = &config.device {
        if !(device.url.starts_with("http://") || device.url.starts_with("https://")) {
            anyhow::bail!(
                "device.url must be an http:// or https:// URL, got '{}'",
                device.url
            );
        }
        if device.timeout_secs == 0 {
            anyhow::bail!("device.timeout_secs must be > 0");
        }
    }

    Ok(config)
}

impl Config {
    /// The `[device]` section, required by commands that talk to the PVR.
    pub fn device(&self) -> Result<&DeviceConfig> {
        self.device
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[device] section with url is required for this command"))
    }
}

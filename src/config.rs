// src/config.rs
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: General,
    pub templates: Templates,
    pub input: Input,
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub max_message_size: u32,      // e.g., 4096
    #[serde(default)]
    pub stop_on_error: bool,        // abort on the first decode error instead of skipping
    #[serde(default)]
    pub json_logs: bool,            // structured JSON logs to stdout
    #[serde(default)]
    pub report_every: Option<u64>,  // progress line every N messages
}

#[derive(Debug, Clone, Deserialize)]
pub struct Templates {
    /// Template definition XML (e.g. "templates/heartbeat.xml")
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Input {
    /// Capture file of framed messages
    pub path: String,
    pub framing: Framing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// [u32 big-endian length][message bytes], repeated
    LengthPrefixed,
    /// the whole file is one message
    Single,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    /// Bind address for Prometheus exporter (e.g. "0.0.0.0:9100")
    pub bind: String,
}

impl AppConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.max_message_size < 16 || self.general.max_message_size > 1 << 20 {
            anyhow::bail!("general.max_message_size must be in [16, 1048576]");
        }
        if self.templates.path.is_empty() {
            anyhow::bail!("templates.path must not be empty");
        }
        if self.input.path.is_empty() {
            anyhow::bail!("input.path must not be empty");
        }
        if let Some(n) = self.general.report_every {
            if n == 0 {
                anyhow::bail!("general.report_every must be > 0 when set");
            }
        }
        Ok(())
    }
}

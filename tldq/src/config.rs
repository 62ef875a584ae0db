use anyhow::{Context, Result};
use libhead_storm::{ProbeConfig, RepeatPolicy, TldSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub tlds: TldConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8100".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeSection {
    pub timeout_secs: u64,
    pub cache_max_cost: usize,
    pub negative_ttl_secs: u64,
    pub repeat_policy: RepeatPolicy,
}

impl Default for ProbeSection {
    fn default() -> Self {
        let defaults = ProbeConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            cache_max_cost: defaults.cache_max_cost,
            negative_ttl_secs: defaults.negative_ttl.as_secs(),
            repeat_policy: RepeatPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TldConfig {
    pub source: String,
    pub always: Vec<String>,
    pub never: Vec<String>,
}

impl Default for TldConfig {
    fn default() -> Self {
        Self {
            source: "tlds.txt".to_string(),
            always: Vec::new(),
            never: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub template: Option<PathBuf>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub tlds: Option<String>,
    pub template: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub repeat_policy: Option<RepeatPolicy>,
}

impl Config {
    pub fn apply_overrides(&mut self, overrides: CliOverrides) {
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if let Some(source) = overrides.tlds {
            self.tlds.source = source;
        }
        if let Some(template) = overrides.template {
            self.render.template = Some(template);
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.probe.timeout_secs = timeout;
        }
        if let Some(policy) = overrides.repeat_policy {
            self.probe.repeat_policy = policy;
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(self.probe.timeout_secs),
            cache_max_cost: self.probe.cache_max_cost,
            negative_ttl: Duration::from_secs(self.probe.negative_ttl_secs),
        }
    }

    pub fn tld_source(&self) -> TldSource {
        match self.tlds.source.parse() {
            Ok(source) => source,
            Err(never) => match never {},
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tldq").join("config.toml"))
}

/// Reads `explicit` if given, otherwise the per-user config file when it exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Config::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn default_config_toml() -> String {
    r#"# tldq configuration

[server]
# Address the landing page and the /ask socket listen on
bind = "0.0.0.0:8100"

[probe]
# Per-request HEAD timeout
timeout_secs = 5
# Maximum number of cached verdicts
cache_max_cost = 1000000
# Negative verdicts are re-probed after this long; positive ones are kept
negative_ttl_secs = 300
# "skip" ignores a label identical to the previous one, "rerun" probes again
repeat_policy = "skip"

[tlds]
# Newline-delimited TLD file, or "iana" to download the IANA list at startup
source = "tlds.txt"
# TLDs always probed, put first
always = []
# TLDs never probed
never = []

[render]
# Optional file containing "{link}", used to format each live result
# template = "domain.html"
"#
    .to_string()
}

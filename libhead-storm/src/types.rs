use std::time::Duration;

/// Result of probing one label+TLD candidate.
///
/// `url` holds the rendered display form handed to clients, `probe_url` the
/// raw `http://<label>.<tld>` that was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub url: String,
    pub probe_url: String,
    pub valid: bool,
}

impl Outcome {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub cache_max_cost: usize,
    pub negative_ttl: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            cache_max_cost: 1_000_000,
            negative_ttl: Duration::from_secs(300),
        }
    }
}
